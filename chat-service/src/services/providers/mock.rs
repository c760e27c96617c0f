//! Mock backends for testing.

use super::{ModelBackend, ProviderError, ProviderResponse};
use crate::models::{GeneratedContent, GenerationRequest, ModelEndpointConfig, OutputModality};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Echo backend: answers every request with its prompt.
pub struct MockBackend {
    enabled: bool,
}

impl MockBackend {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(
        &self,
        _endpoint: &ModelEndpointConfig,
        request: &GenerationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotConfigured(
                "Mock backend not enabled".to_string(),
            ));
        }

        let mut response = ProviderResponse::new(echo(request));
        response.input_tokens = request.prompt().len() as i32 / 4;
        response.output_tokens = 10;
        Ok(response)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock backend not enabled".to_string(),
            ))
        }
    }
}

fn echo(request: &GenerationRequest) -> GeneratedContent {
    match request.modality() {
        OutputModality::Text => GeneratedContent::Text(format!("Mock response for: {}", request.prompt())),
        OutputModality::Json => GeneratedContent::Json(serde_json::json!({ "echo": request.prompt() })),
        OutputModality::Audio => GeneratedContent::Audio {
            mime_type: "audio/wav".to_string(),
            data: request.prompt().as_bytes().to_vec(),
        },
    }
}

/// One scripted reaction to a `generate` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this content.
    Reply(GeneratedContent),
    /// Fail with this error.
    Fail(ProviderError),
    /// Wait, then perform the inner step.
    Delay(Duration, Box<Step>),
    /// Never complete.
    Hang,
    /// Echo the prompt in the requested modality.
    Echo,
}

impl Step {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Reply(GeneratedContent::Text(text.into()))
    }

    pub fn after(delay: Duration, step: Step) -> Self {
        Self::Delay(delay, Box::new(step))
    }
}

#[derive(Default)]
struct Script {
    steps: HashMap<String, VecDeque<Step>>,
    calls: HashMap<String, u32>,
    log: Vec<String>,
}

/// Backend driven by per-endpoint step queues.
///
/// Each call pops the next step for the endpoint being attempted; once a
/// queue is empty the fallback step is used.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    fallback: Step,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_fallback(Step::Echo)
    }

    pub fn with_fallback(fallback: Step) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            fallback,
        }
    }

    /// Queue steps for an endpoint.
    pub fn script(self, endpoint_id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.lock()
            .steps
            .entry(endpoint_id.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Number of calls made against `endpoint_id`.
    pub fn calls(&self, endpoint_id: &str) -> u32 {
        self.lock().calls.get(endpoint_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    /// Endpoint ids in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self, endpoint_id: &str) -> Step {
        let mut script = self.lock();
        *script.calls.entry(endpoint_id.to_string()).or_insert(0) += 1;
        script.log.push(endpoint_id.to_string());
        script
            .steps
            .get_mut(endpoint_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(
        &self,
        endpoint: &ModelEndpointConfig,
        request: &GenerationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut step = self.next_step(&endpoint.id);
        loop {
            match step {
                Step::Reply(content) => return Ok(ProviderResponse::new(content)),
                Step::Fail(err) => return Err(err),
                Step::Echo => return Ok(ProviderResponse::new(echo(request))),
                Step::Hang => std::future::pending::<()>().await,
                Step::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationParams;

    fn request() -> GenerationRequest {
        GenerationRequest::new(
            "ping",
            Vec::new(),
            "",
            GenerationParams::default(),
            OutputModality::Text,
            "chat",
        )
    }

    #[tokio::test]
    async fn mock_backend_echoes_prompt() {
        let backend = MockBackend::new(true);
        let endpoint = ModelEndpointConfig::new("m", 0, 1);

        let response = backend.generate(&endpoint, &request()).await.unwrap();
        assert_eq!(
            response.content,
            GeneratedContent::Text("Mock response for: ping".to_string())
        );
    }

    #[tokio::test]
    async fn disabled_mock_is_not_configured() {
        let backend = MockBackend::new(false);
        let endpoint = ModelEndpointConfig::new("m", 0, 1);

        assert!(matches!(
            backend.generate(&endpoint, &request()).await,
            Err(ProviderError::NotConfigured(_))
        ));
        assert!(backend.health_check().await.is_err());
    }

    #[tokio::test]
    async fn scripted_steps_are_consumed_in_order() {
        let backend = ScriptedBackend::new().script(
            "a",
            [
                Step::Fail(ProviderError::RateLimited("busy".to_string())),
                Step::text("ok"),
            ],
        );
        let endpoint = ModelEndpointConfig::new("a", 0, 1);

        assert!(backend.generate(&endpoint, &request()).await.is_err());
        let second = backend.generate(&endpoint, &request()).await.unwrap();
        assert_eq!(second.content, GeneratedContent::Text("ok".to_string()));

        // Queue drained: falls back to echo.
        assert!(backend.generate(&endpoint, &request()).await.is_ok());
        assert_eq!(backend.calls("a"), 3);
        assert_eq!(backend.total_calls(), 3);
    }
}
