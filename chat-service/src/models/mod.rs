//! Domain models for the chat service.

pub mod endpoint;
pub mod generation;
pub mod identity;
pub mod session;
pub mod usage;

pub use endpoint::{fallback_order, Capability, ModelEndpointConfig};
pub use generation::{
    AttemptClass, AttemptOutcome, AttemptRecord, GeneratedContent, GenerationParams,
    GenerationRequest, GenerationResult, HistoryTurn, OutputModality, Role,
};
pub use identity::{Identity, RoleSet, RoleSignals};
pub use session::{timestamp_title, ChatMessage, ChatSession, NewChatMessage, NewChatSession};
pub use usage::UsageRecord;
