//! Common test utilities for chat-service integration tests.
#![allow(dead_code)]

use chat_service::models::{
    Capability, GenerationParams, GenerationRequest, HistoryTurn, Identity, ModelEndpointConfig,
    OutputModality, RoleSignals,
};
use chat_service::services::identity::{MetadataClaims, SessionClaims};
use chat_service::services::providers::mock::ScriptedBackend;
use chat_service::services::{
    ChatService, ChatSettings, GenerationOrchestrator, InMemoryStore, JwtIdentityProvider,
    OrchestratorConfig,
};
use chat_service::startup::{build_router, AppState};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::retry::BackoffPolicy;
use std::sync::{Arc, Once};
use std::time::Duration;

pub const JWT_SECRET: &str = "integration-test-secret";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,chat_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Text/JSON endpoint with the given budget.
pub fn endpoint(id: &str, priority: u32, budget: u32) -> ModelEndpointConfig {
    ModelEndpointConfig::new(id, priority, budget)
}

pub fn audio_endpoint(id: &str, priority: u32, budget: u32) -> ModelEndpointConfig {
    ModelEndpointConfig::new(id, priority, budget).with_capability(Capability::Audio)
}

/// Deterministic schedule: 100ms, 200ms, 400ms ... capped at 1s, no jitter.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        attempt_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1)),
    }
}

pub fn orchestrator(
    endpoints: Vec<ModelEndpointConfig>,
    backend: Arc<ScriptedBackend>,
) -> GenerationOrchestrator {
    GenerationOrchestrator::new(endpoints, backend, test_config())
}

pub fn text_request(prompt: &str) -> GenerationRequest {
    request(prompt, OutputModality::Text)
}

pub fn request(prompt: &str, modality: OutputModality) -> GenerationRequest {
    GenerationRequest::new(
        prompt,
        vec![HistoryTurn::user("earlier"), HistoryTurn::model("reply")],
        "be brief",
        GenerationParams::default(),
        modality,
        "chat",
    )
}

pub fn settings() -> ChatSettings {
    ChatSettings {
        question_limit: 5,
        privileged_roles: ["admin".to_string()].into_iter().collect(),
        persist_timeout: Duration::from_secs(5),
    }
}

/// Chat service over a scripted backend with a text endpoint `a` and an audio endpoint `b`.
pub fn chat_service(backend: Arc<ScriptedBackend>, store: Arc<InMemoryStore>) -> ChatService {
    ChatService::new(
        orchestrator(
            vec![endpoint("a", 0, 2), audio_endpoint("b", 1, 2)],
            backend,
        ),
        store,
        settings(),
    )
}

pub fn identity(id: &str) -> Identity {
    Identity {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        roles: RoleSignals {
            session_role: Some("authenticated".to_string()),
            ..Default::default()
        },
    }
}

pub fn router(backend: Arc<ScriptedBackend>, store: Arc<InMemoryStore>) -> Router {
    router_with_limit(backend, store, 1000)
}

pub fn router_with_limit(
    backend: Arc<ScriptedBackend>,
    store: Arc<InMemoryStore>,
    guest_requests_per_min: u32,
) -> Router {
    let state = AppState {
        chat: chat_service(backend, store.clone()),
        identity: Arc::new(JwtIdentityProvider::new(JWT_SECRET)),
        probe: store,
    };
    build_router(state, create_ip_rate_limiter(guest_requests_per_min, 60))
}

/// Signed bearer token for `user_id`, optionally carrying an app-metadata role.
pub fn bearer(user_id: &str, app_role: Option<&str>) -> String {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        email: None,
        role: Some("authenticated".to_string()),
        app_metadata: app_role.map(|role| MetadataClaims {
            role: Some(role.to_string()),
        }),
        user_metadata: None,
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token");
    format!("Bearer {}", token)
}
