use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::post,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::access::service::AccessService;
use crate::errors::AppError;
use crate::store::Store;

pub mod handlers;

/// Shared state for the request API.
pub struct AppState {
    pub service: AccessService,
    pub store: Arc<dyn Store>,
}

/// Build the request API router.
/// Routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(handlers::create_requests))
        .route("/requests/:id/review", post(handlers::review_request))
        .route("/requests/:id/cancel", post(handlers::cancel_request))
        .layer(middleware::from_fn_with_state(state, identify))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: resolves the `x-user-id` header to a known user and attaches
/// it to the request. Identity is asserted by the fronting proxy.
async fn identify(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            tracing::warn!("request API: missing x-user-id header");
            AppError::Unauthenticated
        })?
        .to_string();

    let user = match state.store.get_user(&user_id).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            tracing::warn!(user.id = %user_id, "request API: unknown user");
            return Err(AppError::Unauthenticated);
        }
        Err(e) => return Err(AppError::Internal(e.into())),
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
