//! Gemini backend.
//!
//! Implements generation against Google's Gemini `generateContent` API. The
//! model id comes from the endpoint being attempted, so one backend instance
//! serves the whole fallback chain.

use super::{ModelBackend, ProviderError, ProviderResponse};
use crate::models::{
    GeneratedContent, GenerationRequest, ModelEndpointConfig, OutputModality, Role,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the answer was withheld by policy.
const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Gemini backend configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Client-side ceiling; the orchestrator enforces its own per-attempt timeout.
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct GeminiBackend {
    config: GeminiConfig,
    client: Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Build the API URL for the given model and method.
    fn api_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url, model, method, self.config.api_key
        )
    }

    fn build_request(request: &GenerationRequest) -> GenerateContentRequest {
        let mut contents: Vec<Content> = request
            .history()
            .iter()
            .map(|turn| Content {
                role: Some(turn.role.as_str().to_string()),
                parts: vec![ContentPart::Text {
                    text: turn.content.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: Some(Role::User.as_str().to_string()),
            parts: vec![ContentPart::Text {
                text: request.prompt().to_string(),
            }],
        });

        let system_instruction = (!request.system_instruction().is_empty()).then(|| Content {
            role: None,
            parts: vec![ContentPart::Text {
                text: request.system_instruction().to_string(),
            }],
        });

        let params = request.params();
        let generation_config = GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
            response_mime_type: (request.modality() == OutputModality::Json)
                .then(|| "application/json".to_string()),
            response_modalities: (request.modality() == OutputModality::Audio)
                .then(|| vec!["AUDIO".to_string()]),
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: Some(generation_config),
        }
    }
}

/// Map a non-success HTTP response to a provider error.
fn error_from_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .ok();
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| body.chars().take(300).collect());
    let api_status = detail.and_then(|d| d.status).unwrap_or_default();

    match status.as_u16() {
        400 if message.contains("API key") => ProviderError::NotConfigured(message),
        400 if api_status == "FAILED_PRECONDITION" => ProviderError::Unavailable(message),
        400 => ProviderError::InvalidRequest(message),
        401 | 403 => ProviderError::NotConfigured(message),
        404 => ProviderError::Unavailable(message),
        429 if api_status == "RESOURCE_EXHAUSTED" && message.contains("quota") => {
            ProviderError::QuotaExhausted(message)
        }
        429 => ProviderError::RateLimited(message),
        code @ 500..=599 => ProviderError::ServerError {
            status: code,
            message,
        },
        code => ProviderError::ApiError(format!("Gemini API error {}: {}", code, message)),
    }
}

fn error_from_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(Duration::ZERO)
    } else if e.is_connect() || e.is_request() || e.is_body() {
        ProviderError::NetworkError(e.to_string())
    } else {
        ProviderError::ApiError(e.to_string())
    }
}

/// Extract content of the requested modality from a parsed response.
fn extract_content(
    response: GenerateContentResponse,
    modality: OutputModality,
) -> Result<ProviderResponse, ProviderError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.clone())
    {
        return Err(ProviderError::ContentFiltered(reason));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError("Response contained no candidates".to_string()))?;

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|reason| BLOCKED_FINISH_REASONS.contains(reason))
    {
        return Err(ProviderError::ContentFiltered(reason.to_string()));
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let usage = response.usage_metadata.unwrap_or_default();

    let content = match modality {
        OutputModality::Audio => {
            let inline = parts
                .into_iter()
                .find_map(|part| match part {
                    ContentPart::InlineData { inline_data } => Some(inline_data),
                    ContentPart::Text { .. } => None,
                })
                .ok_or_else(|| {
                    ProviderError::CapabilityMismatch("Response contained no audio".to_string())
                })?;
            let data = general_purpose::STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| ProviderError::ApiError(format!("Invalid audio payload: {}", e)))?;
            GeneratedContent::Audio {
                mime_type: inline.mime_type,
                data,
            }
        }
        OutputModality::Text | OutputModality::Json => {
            let text: String = parts
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text),
                    ContentPart::InlineData { .. } => None,
                })
                .collect();
            if text.is_empty() {
                return Err(ProviderError::ApiError("Response contained no text".to_string()));
            }
            if modality == OutputModality::Json {
                let value = serde_json::from_str(&text).map_err(|e| {
                    ProviderError::ApiError(format!("Response was not valid JSON: {}", e))
                })?;
                GeneratedContent::Json(value)
            } else {
                GeneratedContent::Text(text)
            }
        }
    };

    Ok(ProviderResponse {
        content,
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0),
    })
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    async fn generate(
        &self,
        endpoint: &ModelEndpointConfig,
        request: &GenerationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = Self::build_request(request);
        let url = self.api_url(&endpoint.id, "generateContent");

        tracing::debug!(
            model = %endpoint.id,
            feature = %request.feature(),
            prompt_len = request.prompt().len(),
            history_len = request.history().len(),
            "Sending request to Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(error_from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, &error_text));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        extract_content(api_response, request.modality())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key not configured".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
