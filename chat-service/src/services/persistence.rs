//! Durable recording of conversation turns.
//!
//! A turn is written as user message, model message, session touch. When the
//! first write fails because the session row doesn't exist yet, the session is
//! created from the turn's own data and the writes are retried exactly once.
//! A session owned by someone else is never written to.

use super::metrics;
use super::store::{SessionStore, StoreError};
use crate::models::{timestamp_title, NewChatMessage, NewChatSession, Role};
use chrono::Utc;
use std::sync::Arc;

/// One completed exchange to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub session_id: String,
    pub owner_id: String,
    pub user_text: String,
    pub model_text: String,
    pub locale: Option<String>,
    /// The incoming history was empty.
    pub first_turn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    Skipped,
}

impl PersistOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone)]
pub struct SessionPersistenceCoordinator {
    store: Arc<dyn SessionStore>,
}

impl SessionPersistenceCoordinator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn persist_turn(&self, turn: &TurnRecord) -> PersistOutcome {
        let outcome = match self.write_turn(turn).await {
            Ok(()) => {
                self.title_first_turn(turn).await;
                PersistOutcome::Persisted
            }
            Err(e) => {
                tracing::error!(
                    session_id = %turn.session_id,
                    user_id = %turn.owner_id,
                    error = %e,
                    "Failed to persist chat turn"
                );
                PersistOutcome::Skipped
            }
        };

        metrics::record_persist(outcome.label());
        outcome
    }

    /// Attempt, and on a missing session compensate then retry once.
    async fn write_turn(&self, turn: &TurnRecord) -> Result<(), StoreError> {
        match self.attempt(turn).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_missing_session() => {
                tracing::info!(
                    session_id = %turn.session_id,
                    "Session row missing, creating it before retrying"
                );
                self.compensate(turn).await?;
                self.attempt(turn).await
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(&self, turn: &TurnRecord) -> Result<(), StoreError> {
        self.ensure_owner(turn).await?;
        self.store
            .insert_message(&NewChatMessage::new(
                &turn.session_id,
                Role::User,
                &turn.user_text,
            ))
            .await?;
        self.store
            .insert_message(&NewChatMessage::new(
                &turn.session_id,
                Role::Model,
                &turn.model_text,
            ))
            .await?;
        self.store
            .touch_session(&turn.session_id, &turn.owner_id)
            .await
    }

    /// A missing session passes; the insert reports it as a missing parent.
    async fn ensure_owner(&self, turn: &TurnRecord) -> Result<(), StoreError> {
        match self.store.session_owner(&turn.session_id).await? {
            Some(owner) if owner != turn.owner_id => Err(StoreError::NotOwner {
                session_id: turn.session_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    async fn compensate(&self, turn: &TurnRecord) -> Result<(), StoreError> {
        let session = NewChatSession {
            id: turn.session_id.clone(),
            owner_id: turn.owner_id.clone(),
            title: timestamp_title(Utc::now()),
            locale: turn.locale.clone(),
        };

        match self.store.create_session(&session).await {
            Ok(()) => {
                metrics::record_compensation();
                Ok(())
            }
            // Another request created it first.
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn title_first_turn(&self, turn: &TurnRecord) {
        if !turn.first_turn {
            return;
        }

        let title = timestamp_title(Utc::now());
        if let Err(e) = self
            .store
            .set_session_title(&turn.session_id, &turn.owner_id, &title)
            .await
        {
            tracing::warn!(
                session_id = %turn.session_id,
                error = %e,
                "Failed to set session title"
            );
        }
    }
}
