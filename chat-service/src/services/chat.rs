//! Request flow for chat, voice and lookup calls.
//!
//! validate → roles → usage gate → orchestrator → detached persistence.

use super::metrics;
use super::orchestrator::{GenerationError, GenerationOrchestrator};
use super::persistence::{PersistOutcome, SessionPersistenceCoordinator, TurnRecord};
use super::store::{ChatStore, ProfileDirectory};
use super::usage_gate::{UsageDecision, UsageGate};
use crate::models::{
    GeneratedContent, GenerationParams, GenerationRequest, HistoryTurn, Identity,
    OutputModality, RoleSet,
};
use service_core::error::AppError;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// User-facing feature; fixes the output modality and default instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Chat,
    Voice,
    Lookup,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Voice => "voice",
            Self::Lookup => "lookup",
        }
    }

    pub fn modality(&self) -> OutputModality {
        match self {
            Self::Chat => OutputModality::Text,
            Self::Voice => OutputModality::Audio,
            Self::Lookup => OutputModality::Json,
        }
    }

    fn default_instruction(&self) -> &'static str {
        match self {
            Self::Chat => "You are a helpful, friendly assistant. Answer clearly and concisely.",
            Self::Voice => {
                "You are a voice assistant. Reply in short, natural spoken sentences without markdown."
            }
            Self::Lookup => {
                "You are a lookup service. Reply only with a single JSON object that answers the request."
            }
        }
    }

    /// Default instruction plus a reply-language hint when a locale is given.
    pub fn system_instruction(&self, locale: Option<&str>) -> String {
        match locale.map(str::trim).filter(|l| !l.is_empty()) {
            Some(locale) => format!("{} Respond in {}.", self.default_instruction(), locale),
            None => self.default_instruction().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCommand {
    pub feature: Feature,
    pub prompt: String,
    pub history: Vec<HistoryTurn>,
    pub session_id: Option<String>,
    pub locale: Option<String>,
    pub params: GenerationParams,
}

#[derive(Debug)]
pub struct ChatReply {
    pub content: GeneratedContent,
    pub endpoint_id: String,
    pub session_id: Option<String>,
    /// Background persistence of this turn, when one was started.
    pub persistence: Option<JoinHandle<PersistOutcome>>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Question limit reached")]
    LimitReached,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("All model endpoints failed after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GenerationError> for ChatError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Exhausted { attempts } => ChatError::Exhausted { attempts },
            GenerationError::Rejected(reason) => ChatError::Rejected(reason),
            GenerationError::Cancelled => ChatError::Cancelled,
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::LimitReached => AppError::TooManyRequests(
                "Question limit reached. Sign in with an upgraded account to continue.".to_string(),
                None,
            ),
            ChatError::Rejected(reason) => AppError::BadRequest(anyhow::anyhow!(reason)),
            ChatError::Exhausted { .. } => AppError::ServiceUnavailable(
                "The assistant is temporarily unavailable. Please try again shortly.".to_string(),
            ),
            ChatError::Cancelled => AppError::ServiceUnavailable("Request cancelled".to_string()),
            ChatError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub question_limit: i32,
    pub privileged_roles: BTreeSet<String>,
    pub persist_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            question_limit: super::usage_gate::DEFAULT_QUESTION_LIMIT,
            privileged_roles: ["admin".to_string()].into_iter().collect(),
            persist_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    orchestrator: GenerationOrchestrator,
    usage_gate: UsageGate,
    persistence: SessionPersistenceCoordinator,
    profiles: Arc<dyn ProfileDirectory>,
    privileged_roles: Arc<BTreeSet<String>>,
    persist_timeout: Duration,
}

impl ChatService {
    pub fn new<S>(orchestrator: GenerationOrchestrator, store: Arc<S>, settings: ChatSettings) -> Self
    where
        S: ChatStore + 'static,
    {
        Self {
            orchestrator,
            usage_gate: UsageGate::new(store.clone(), settings.question_limit),
            persistence: SessionPersistenceCoordinator::new(store.clone()),
            profiles: store,
            privileged_roles: Arc::new(settings.privileged_roles),
            persist_timeout: settings.persist_timeout,
        }
    }

    pub fn orchestrator(&self) -> &GenerationOrchestrator {
        &self.orchestrator
    }

    /// Answer one command for `identity` (`None` for guests).
    pub async fn respond(
        &self,
        identity: Option<&Identity>,
        command: ChatCommand,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError> {
        if command.prompt.trim().is_empty() {
            return Err(ChatError::Rejected("Prompt must not be empty".to_string()));
        }

        if let Some(identity) = identity {
            self.admit(identity).await?;
        }

        let first_turn = command.history.is_empty();
        let request = GenerationRequest::new(
            command.prompt.clone(),
            command.history,
            command.feature.system_instruction(command.locale.as_deref()),
            command.params,
            command.feature.modality(),
            command.feature.name(),
        );

        let result = self.orchestrator.generate(&request, cancel).await?;

        let persistence = match (identity, &command.session_id, result.content.as_transcript()) {
            (Some(identity), Some(session_id), Some(model_text)) => {
                Some(self.persist_in_background(TurnRecord {
                    session_id: session_id.clone(),
                    owner_id: identity.id.clone(),
                    user_text: command.prompt,
                    model_text,
                    locale: command.locale,
                    first_turn,
                }))
            }
            _ => None,
        };

        Ok(ChatReply {
            content: result.content,
            endpoint_id: result.endpoint_id,
            session_id: command.session_id,
            persistence,
        })
    }

    /// Merge role sources and apply the question quota.
    async fn admit(&self, identity: &Identity) -> Result<(), ChatError> {
        let profile_role = match self.profiles.fetch_profile_role(&identity.id).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(user_id = %identity.id, error = %e, "Profile lookup failed");
                None
            }
        };
        let roles = RoleSet::merge(profile_role.as_deref(), &identity.roles);
        let privileged = roles.is_privileged(&self.privileged_roles);

        match self
            .usage_gate
            .check_and_increment(&identity.id, privileged)
            .await
        {
            Ok(UsageDecision::Allowed) => Ok(()),
            Ok(UsageDecision::Denied(_)) => {
                tracing::info!(user_id = %identity.id, "Question limit reached");
                Err(ChatError::LimitReached)
            }
            Err(e) => {
                tracing::error!(user_id = %identity.id, error = %e, "Usage gate failed");
                Err(ChatError::Internal(format!("usage check failed: {}", e)))
            }
        }
    }

    /// Persist a turn on a detached task bounded by the persistence timeout.
    ///
    /// The task outlives the caller, so a dropped request doesn't lose the turn.
    pub fn persist_in_background(&self, turn: TurnRecord) -> JoinHandle<PersistOutcome> {
        let coordinator = self.persistence.clone();
        let timeout = self.persist_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, coordinator.persist_turn(&turn)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(
                        session_id = %turn.session_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Persisting chat turn timed out"
                    );
                    metrics::record_persist("timeout");
                    PersistOutcome::Skipped
                }
            }
        })
    }
}
