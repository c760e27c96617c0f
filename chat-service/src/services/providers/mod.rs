//! Remote generation backends.
//!
//! A backend is an opaque remote capability: it receives one endpoint's model id
//! plus the request and either returns content or a [`ProviderError`] that the
//! attempt classifier can label.

pub mod gemini;
pub mod mock;

use crate::models::{GeneratedContent, GenerationRequest, ModelEndpointConfig};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Capability not supported: {0}")]
    CapabilityMismatch(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl ProviderError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::RateLimited(_) => "rate_limited",
            Self::QuotaExhausted(_) => "quota_exhausted",
            Self::CapabilityMismatch(_) => "capability_mismatch",
            Self::Unavailable(_) => "unavailable",
            Self::NotConfigured(_) => "not_configured",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ContentFiltered(_) => "content_filtered",
            Self::ApiError(_) => "api_error",
        }
    }
}

/// Result of a provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: GeneratedContent,

    /// Input tokens consumed, when reported.
    pub input_tokens: i32,

    /// Output tokens generated, when reported.
    pub output_tokens: i32,
}

impl ProviderResponse {
    pub fn new(content: GeneratedContent) -> Self {
        Self {
            content,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// A remote model capability addressed per endpoint.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one generation attempt against `endpoint`.
    async fn generate(
        &self,
        endpoint: &ModelEndpointConfig,
        request: &GenerationRequest,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
