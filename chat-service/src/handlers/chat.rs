//! Generation endpoints: chat (text), voice (audio) and lookup (JSON).

use axum::{extract::State, Extension, Json};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::models::{GeneratedContent, GenerationParams, HistoryTurn, Identity};
use crate::services::{ChatCommand, Feature};
use crate::startup::AppState;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 8000, message = "Prompt must be 1-8000 characters"))]
    pub prompt: String,

    #[serde(default)]
    #[validate(length(max = 200, message = "History is limited to 200 turns"))]
    pub history: Vec<HistoryTurn>,

    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,

    #[validate(length(min = 2, max = 35))]
    pub locale: Option<String>,

    #[validate(range(min = 0.0, max = 2.0, message = "Temperature must be between 0 and 2"))]
    pub temperature: Option<f32>,

    #[validate(range(min = 1, max = 8192))]
    pub max_output_tokens: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GenerateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Model endpoint that produced the answer.
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn chat(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    generate(state, identity.map(|Extension(identity)| identity), body, Feature::Chat).await
}

pub async fn voice(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    generate(state, identity.map(|Extension(identity)| identity), body, Feature::Voice).await
}

pub async fn lookup(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    generate(state, identity.map(|Extension(identity)| identity), body, Feature::Lookup).await
}

async fn generate(
    state: AppState,
    identity: Option<Identity>,
    body: GenerateRequest,
    feature: Feature,
) -> Result<Json<GenerateResponse>, AppError> {
    body.validate()?;

    // Fires when axum drops this future, e.g. on client disconnect.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let command = ChatCommand {
        feature,
        prompt: body.prompt,
        history: body.history,
        session_id: body.session_id,
        locale: body.locale,
        params: GenerationParams {
            temperature: body.temperature,
            max_output_tokens: body.max_output_tokens,
        },
    };

    let reply = state
        .chat
        .respond(identity.as_ref(), command, &cancel)
        .await?;

    let mut response = GenerateResponse {
        endpoint: reply.endpoint_id,
        session_id: reply.session_id,
        ..Default::default()
    };
    match reply.content {
        GeneratedContent::Text(text) => response.text = Some(text),
        GeneratedContent::Json(value) => response.data = Some(value),
        GeneratedContent::Audio { mime_type, data } => {
            response.audio_base64 = Some(general_purpose::STANDARD.encode(data));
            response.mime_type = Some(mime_type);
        }
    }

    Ok(Json(response))
}
