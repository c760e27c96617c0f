//! Per-identity question quota record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Number of questions an identity has asked. One row per identity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub question_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user_id: impl Into<String>, question_count: i32) -> Self {
        Self {
            user_id: user_id.into(),
            question_count,
            updated_at: Utc::now(),
        }
    }
}
