//! Resilient generation across a fallback chain of model endpoints.
//!
//! One call to [`GenerationOrchestrator::generate`] walks the configured
//! endpoints in priority order, retries transient failures on the same
//! endpoint with backoff, advances on endpoint-specific failures and stops on
//! fatal ones. Each attempt is bounded by a hard timeout and the whole walk
//! honours the caller's cancellation token.

use super::classifier::classify;
use super::metrics;
use super::providers::{ModelBackend, ProviderError, ProviderResponse};
use crate::models::{
    fallback_order, AttemptClass, AttemptOutcome, AttemptRecord, GenerationRequest,
    GenerationResult, ModelEndpointConfig,
};
use service_core::retry::BackoffPolicy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Terminal failure of an orchestration call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("All model endpoints failed after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "exhausted",
            Self::Rejected(_) => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard bound on a single remote call.
    pub attempt_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Result of one orchestration call plus its attempt trail.
#[derive(Debug)]
pub struct GenerationReport {
    pub result: Result<GenerationResult, GenerationError>,
    pub attempts: Vec<AttemptRecord>,
}

impl GenerationReport {
    /// Remote calls made; skipped endpoints are not counted.
    pub fn remote_calls(&self) -> u32 {
        self.attempts.iter().filter(|a| a.attempt > 0).count() as u32
    }
}

enum AttemptError {
    Provider(ProviderError),
    Cancelled,
}

#[derive(Clone)]
pub struct GenerationOrchestrator {
    endpoints: Arc<[ModelEndpointConfig]>,
    backend: Arc<dyn ModelBackend>,
    config: OrchestratorConfig,
}

impl GenerationOrchestrator {
    /// Endpoints are sorted by priority once here; ties keep their given order.
    pub fn new(
        endpoints: Vec<ModelEndpointConfig>,
        backend: Arc<dyn ModelBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            endpoints: fallback_order(endpoints).into(),
            backend,
            config,
        }
    }

    pub fn endpoints(&self) -> &[ModelEndpointConfig] {
        &self.endpoints
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        self.generate_with_report(request, cancel).await.result
    }

    /// Like [`generate`](Self::generate), also returning every attempt made.
    ///
    /// Skipped endpoints appear with `attempt == 0`.
    pub async fn generate_with_report(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> GenerationReport {
        let mut attempts = Vec::new();
        let result = self.run(request, cancel, &mut attempts).await;

        match &result {
            Ok(generated) => {
                tracing::info!(
                    feature = %request.feature(),
                    endpoint = %generated.endpoint_id,
                    attempts = attempts.len(),
                    "Generation succeeded"
                );
                metrics::record_generation("success");
            }
            Err(e) => {
                tracing::warn!(
                    feature = %request.feature(),
                    error = %e,
                    attempts = attempts.len(),
                    "Generation failed"
                );
                metrics::record_generation(e.label());
            }
        }

        GenerationReport { result, attempts }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        records: &mut Vec<AttemptRecord>,
    ) -> Result<GenerationResult, GenerationError> {
        let required = request.modality().required_capability();
        let mut remote_calls = 0u32;

        for endpoint in self.endpoints.iter() {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            if !endpoint.supports(required) {
                tracing::debug!(
                    endpoint = %endpoint.id,
                    modality = request.modality().as_str(),
                    "Skipping endpoint without required capability"
                );
                records.push(AttemptRecord {
                    endpoint_id: endpoint.id.clone(),
                    attempt: 0,
                    outcome: AttemptOutcome::Failed {
                        class: AttemptClass::RetryNext,
                        reason: format!("missing capability {:?}", required),
                    },
                    latency: Duration::ZERO,
                });
                continue;
            }

            for attempt in 1..=endpoint.retry_budget {
                let started = Instant::now();
                let outcome = self.attempt(endpoint, request, cancel).await;
                let latency = started.elapsed();
                remote_calls += 1;

                let error = match outcome {
                    Ok(response) => {
                        self.record(records, endpoint, attempt, AttemptOutcome::Success, latency);
                        return Ok(GenerationResult {
                            content: response.content,
                            endpoint_id: endpoint.id.clone(),
                        });
                    }
                    Err(AttemptError::Cancelled) => return Err(GenerationError::Cancelled),
                    Err(AttemptError::Provider(e)) => e,
                };

                let class = classify(&error);
                self.record(
                    records,
                    endpoint,
                    attempt,
                    AttemptOutcome::Failed {
                        class,
                        reason: error.to_string(),
                    },
                    latency,
                );

                match class {
                    AttemptClass::Fatal => return Err(GenerationError::Rejected(error.to_string())),
                    AttemptClass::RetryNext => break,
                    AttemptClass::RetrySame => {
                        if attempt == endpoint.retry_budget {
                            break;
                        }
                        let delay = self.config.backoff.delay(attempt - 1);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        Err(GenerationError::Exhausted {
            attempts: remote_calls,
        })
    }

    async fn attempt(
        &self,
        endpoint: &ModelEndpointConfig,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, AttemptError> {
        let timeout = self.config.attempt_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            res = tokio::time::timeout(timeout, self.backend.generate(endpoint, request)) => {
                match res {
                    Ok(inner) => inner.map_err(AttemptError::Provider),
                    Err(_) => Err(AttemptError::Provider(ProviderError::Timeout(timeout))),
                }
            }
        }
    }

    fn record(
        &self,
        records: &mut Vec<AttemptRecord>,
        endpoint: &ModelEndpointConfig,
        attempt: u32,
        outcome: AttemptOutcome,
        latency: Duration,
    ) {
        match &outcome {
            AttemptOutcome::Success => tracing::debug!(
                endpoint = %endpoint.id,
                attempt,
                latency_ms = latency.as_millis() as u64,
                "Attempt succeeded"
            ),
            AttemptOutcome::Failed { class, reason } => tracing::warn!(
                endpoint = %endpoint.id,
                attempt,
                class = class.as_str(),
                reason = %reason,
                latency_ms = latency.as_millis() as u64,
                "Attempt failed"
            ),
        }
        metrics::record_attempt(&endpoint.id, outcome.label(), latency.as_secs_f64());

        records.push(AttemptRecord {
            endpoint_id: endpoint.id.clone(),
            attempt,
            outcome,
            latency,
        });
    }
}
