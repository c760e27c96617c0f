//! Application startup and lifecycle management.

use crate::config::ChatConfig;
use crate::handlers;
use crate::middleware::identity::resolve_identity;
use crate::services::providers::gemini::{GeminiBackend, GeminiConfig};
use crate::services::providers::ModelBackend;
use crate::services::{
    ChatDb, ChatService, ChatSettings, GenerationOrchestrator, HealthProbe, IdentityProvider,
    JwtIdentityProvider, OrchestratorConfig,
};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{
    create_ip_rate_limiter, guest_rate_limit_middleware, IpRateLimiter,
};
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub identity: Arc<dyn IdentityProvider>,
    pub probe: Arc<dyn HealthProbe>,
}

/// Build the HTTP router. Generation routes are throttled per IP for guests.
///
/// Identity is resolved before the guest limiter so that only verified
/// callers skip it.
pub fn build_router(state: AppState, guest_limiter: IpRateLimiter) -> Router {
    let api = Router::new()
        .route("/api/chat", post(handlers::chat::chat))
        .route("/api/voice", post(handlers::chat::voice))
        .route("/api/lookup", post(handlers::chat::lookup))
        .layer(from_fn_with_state(guest_limiter, guest_rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), resolve_identity));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .merge(api)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    db: ChatDb,
}

impl Application {
    pub async fn build(config: ChatConfig) -> Result<Self, AppError> {
        let db = ChatDb::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;
        db.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;

        let backend: Arc<dyn ModelBackend> = Arc::new(
            GeminiBackend::new(GeminiConfig::new(config.google.api_key.clone()))
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        );

        let endpoints = config.models.endpoints();
        if endpoints.is_empty() {
            tracing::warn!("Model chain is empty; every generation will be exhausted");
        }
        tracing::info!(
            endpoints = ?endpoints.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            retry_budget = config.models.retry_budget,
            "Initialized model fallback chain"
        );

        let orchestrator = GenerationOrchestrator::new(
            endpoints,
            backend,
            OrchestratorConfig {
                attempt_timeout: config.models.attempt_timeout,
                backoff: config.models.backoff.clone(),
            },
        );

        let store = Arc::new(db.clone());
        let chat = ChatService::new(
            orchestrator,
            store.clone(),
            ChatSettings {
                question_limit: config.usage.question_limit,
                privileged_roles: config.usage.privileged_roles.clone(),
                persist_timeout: config.persist_timeout,
            },
        );

        let state = AppState {
            chat,
            identity: Arc::new(JwtIdentityProvider::new(&config.auth.jwt_secret)),
            probe: store,
        };
        let limiter = create_ip_rate_limiter(config.guest_rate_limit_per_min, 60);
        let app = build_router(state, limiter);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            db,
        })
    }

    pub fn db(&self) -> &ChatDb {
        &self.db
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
