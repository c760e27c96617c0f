//! Storage seams used by the usage gate and the persistence coordinator.
//!
//! `ChatDb` implements these against PostgreSQL; `InMemoryStore` implements
//! them for tests.

use crate::models::{NewChatMessage, NewChatSession, UsageRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Table holding conversation sessions; the parent of every message.
pub const SESSIONS_TABLE: &str = "chat_sessions";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A foreign key pointed at a row that doesn't exist.
    #[error("Missing parent row in {table}")]
    MissingParent { table: String },

    /// The session exists but belongs to someone else.
    #[error("Session {session_id} belongs to another owner")]
    NotOwner { session_id: String },

    #[error("Unique constraint conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn missing_session() -> Self {
        Self::MissingParent {
            table: SESSIONS_TABLE.to_string(),
        }
    }

    /// True when a write failed because its session row doesn't exist yet.
    pub fn is_missing_session(&self) -> bool {
        matches!(self, Self::MissingParent { table } if table == SESSIONS_TABLE)
    }
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn fetch_usage(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError>;

    async fn insert_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError>;

    async fn update_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_message(&self, message: &NewChatMessage) -> Result<(), StoreError>;

    async fn create_session(&self, session: &NewChatSession) -> Result<(), StoreError>;

    /// Owner of the session, `None` when the session doesn't exist.
    async fn session_owner(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    /// Bump the session's updated-at timestamp. Only touches sessions of `owner_id`.
    async fn touch_session(&self, session_id: &str, owner_id: &str) -> Result<(), StoreError>;

    /// Only retitles sessions of `owner_id`.
    async fn set_session_title(
        &self,
        session_id: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), StoreError>;
}

/// Identity id to optional profile role.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn fetch_profile_role(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Everything the service needs from its relational store.
pub trait ChatStore: UsageStore + SessionStore + ProfileDirectory + HealthProbe {}

impl<T> ChatStore for T where T: UsageStore + SessionStore + ProfileDirectory + HealthProbe {}
