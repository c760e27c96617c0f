use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::middleware::rate_limit::Authenticated;

use crate::services::identity::bearer_token;
use crate::startup::AppState;

/// Verify the bearer credential and store the resulting [`Identity`] in the
/// request extensions.
///
/// Only verified callers are marked [`Authenticated`]; everyone else reaches
/// the guest limiter.
///
/// [`Identity`]: crate::models::Identity
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers()).map(str::to_owned);
    let identity = state.identity.identify(token.as_deref()).await;

    if let Some(identity) = identity {
        req.extensions_mut().insert(identity);
        req.extensions_mut().insert(Authenticated);
    }

    next.run(req).await
}
