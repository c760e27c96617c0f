//! Generation request/result types shared by the orchestrator and providers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::endpoint::Capability;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Get string representation for database and provider payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Output modality requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputModality {
    Text,
    Json,
    Audio,
}

impl OutputModality {
    /// Capability an endpoint must advertise to serve this modality.
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::Text => Capability::Text,
            Self::Json => Capability::Json,
            Self::Audio => Capability::Audio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Audio => "audio",
        }
    }
}

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    /// Temperature (0.0 - 2.0).
    pub temperature: Option<f32>,

    /// Maximum output tokens.
    pub max_output_tokens: Option<i32>,
}

/// One logical "produce an AI response" request.
///
/// Immutable once built; history always starts on a user turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    history: Vec<HistoryTurn>,
    system_instruction: String,
    params: GenerationParams,
    modality: OutputModality,
    feature: String,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        history: Vec<HistoryTurn>,
        system_instruction: impl Into<String>,
        params: GenerationParams,
        modality: OutputModality,
        feature: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            history: trim_leading_non_user(history),
            system_instruction: system_instruction.into(),
            params,
            modality,
            feature: feature.into(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn history(&self) -> &[HistoryTurn] {
        &self.history
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn modality(&self) -> OutputModality {
        self.modality
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }
}

/// Drop turns until the first user turn.
fn trim_leading_non_user(history: Vec<HistoryTurn>) -> Vec<HistoryTurn> {
    match history.iter().position(|turn| turn.role == Role::User) {
        Some(0) => history,
        Some(start) => history.into_iter().skip(start).collect(),
        None => Vec::new(),
    }
}

/// Content produced by a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedContent {
    Text(String),
    Json(serde_json::Value),
    Audio { mime_type: String, data: Vec<u8> },
}

impl GeneratedContent {
    /// Textual form suitable for the conversation history, if any.
    pub fn as_transcript(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Json(value) => Some(value.to_string()),
            Self::Audio { .. } => None,
        }
    }
}

/// Winning answer plus the endpoint that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub content: GeneratedContent,
    pub endpoint_id: String,
}

/// Classification attached to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    /// Transient; retry the same endpoint after backoff.
    RetrySame,
    /// Endpoint unusable for this request; advance the chain.
    RetryNext,
    /// Request unsatisfiable anywhere; abort the chain.
    Fatal,
}

impl AttemptClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrySame => "retry_same",
            Self::RetryNext => "retry_next",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed { class: AttemptClass, reason: String },
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { class, .. } => class.as_str(),
        }
    }
}

/// Diagnostic record of one attempt within an orchestration call.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub endpoint_id: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(history: Vec<HistoryTurn>) -> GenerationRequest {
        GenerationRequest::new(
            "hello",
            history,
            "be brief",
            GenerationParams::default(),
            OutputModality::Text,
            "chat",
        )
    }

    #[test]
    fn leading_model_turns_are_trimmed() {
        let req = request(vec![
            HistoryTurn::model("Welcome!"),
            HistoryTurn::model("How can I help?"),
            HistoryTurn::user("What is Rust?"),
            HistoryTurn::model("A language."),
        ]);

        assert_eq!(req.history().len(), 2);
        assert_eq!(req.history()[0], HistoryTurn::user("What is Rust?"));
    }

    #[test]
    fn history_without_user_turn_becomes_empty() {
        let req = request(vec![HistoryTurn::model("Welcome!")]);
        assert!(req.history().is_empty());
    }

    #[test]
    fn history_starting_with_user_is_untouched() {
        let history = vec![HistoryTurn::user("a"), HistoryTurn::model("b")];
        let req = request(history.clone());
        assert_eq!(req.history(), history.as_slice());
    }

    #[test]
    fn audio_has_no_transcript() {
        let content = GeneratedContent::Audio {
            mime_type: "audio/wav".to_string(),
            data: vec![1, 2, 3],
        };
        assert!(content.as_transcript().is_none());
    }
}
