//! Per-identity question quota.

use super::metrics;
use super::store::{StoreError, UsageStore};
use std::sync::Arc;

/// Default number of questions a non-privileged identity may ask.
pub const DEFAULT_QUESTION_LIMIT: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    LimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecision {
    Allowed,
    Denied(DenyReason),
}

impl UsageDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied(DenyReason::LimitReached) => "limit_reached",
        }
    }
}

/// Enforces the question quota for non-privileged identities.
///
/// The read and the write are separate statements, so two concurrent requests
/// at `limit - 1` can both pass. The limit is soft.
#[derive(Clone)]
pub struct UsageGate {
    store: Arc<dyn UsageStore>,
    limit: i32,
}

impl UsageGate {
    pub fn new(store: Arc<dyn UsageStore>, limit: i32) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub async fn check_and_increment(
        &self,
        identity_id: &str,
        is_privileged: bool,
    ) -> Result<UsageDecision, StoreError> {
        if is_privileged {
            metrics::record_usage_decision("privileged");
            return Ok(UsageDecision::Allowed);
        }

        let decision = match self.store.fetch_usage(identity_id).await? {
            Some(record) if record.question_count >= self.limit => {
                UsageDecision::Denied(DenyReason::LimitReached)
            }
            Some(record) => {
                self.store
                    .update_usage(identity_id, record.question_count + 1)
                    .await?;
                UsageDecision::Allowed
            }
            None if self.limit <= 0 => UsageDecision::Denied(DenyReason::LimitReached),
            None => {
                self.store.insert_usage(identity_id, 1).await?;
                UsageDecision::Allowed
            }
        };

        tracing::debug!(
            user_id = %identity_id,
            decision = decision.label(),
            limit = self.limit,
            "Usage gate decision"
        );
        metrics::record_usage_decision(decision.label());

        Ok(decision)
    }
}
