//! Conversation session and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::generation::Role;

/// A conversation. The id is supplied by the client and acts as a natural key.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored message. `id` is a serial and gives insertion order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatSession {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub locale: Option<String>,
}

/// Input for appending a message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
}

impl NewChatMessage {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
        }
    }
}

/// Human-readable timestamp used as a session title, e.g. `Chat · Oct 17, 2026, 8:05 PM`.
pub fn timestamp_title(at: DateTime<Utc>) -> String {
    format!("Chat · {}", at.format("%b %-d, %Y, %-I:%M %p"))
}
