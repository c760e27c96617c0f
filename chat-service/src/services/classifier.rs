//! Attempt classification.
//!
//! Maps a provider failure to the action the orchestrator takes next. Pure
//! and total: every [`ProviderError`] variant has exactly one class.

use super::providers::ProviderError;
use crate::models::AttemptClass;

pub fn classify(error: &ProviderError) -> AttemptClass {
    match error {
        // Transient; the same endpoint may succeed shortly.
        ProviderError::Timeout(_)
        | ProviderError::ServerError { .. }
        | ProviderError::NetworkError(_) => AttemptClass::RetrySame,

        // This endpoint can't serve the request right now.
        ProviderError::RateLimited(_)
        | ProviderError::QuotaExhausted(_)
        | ProviderError::CapabilityMismatch(_)
        | ProviderError::Unavailable(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::ApiError(_) => AttemptClass::RetryNext,

        // No endpoint can satisfy the request as written.
        ProviderError::InvalidRequest(_) | ProviderError::ContentFiltered(_) => {
            AttemptClass::Fatal
        }
    }
}
