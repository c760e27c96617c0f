pub mod chat;
pub mod classifier;
pub mod database;
pub mod identity;
pub mod memory_store;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod store;
pub mod usage_gate;

pub use chat::{ChatCommand, ChatError, ChatReply, ChatService, ChatSettings, Feature};
pub use database::ChatDb;
pub use identity::{IdentityProvider, JwtIdentityProvider};
pub use memory_store::InMemoryStore;
pub use orchestrator::{GenerationError, GenerationOrchestrator, OrchestratorConfig};
pub use persistence::{PersistOutcome, SessionPersistenceCoordinator, TurnRecord};
pub use store::{ChatStore, HealthProbe, StoreError};
pub use usage_gate::{UsageDecision, UsageGate};
