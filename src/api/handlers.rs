use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::access::service::{CreateRequest, CreateRequestsOpts, ReviewDecision};
use crate::errors::AppError;
use crate::models::identity::User;
use crate::models::request::Request;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRequestsBody {
    pub requests: Vec<CreateRequest>,
}

#[derive(Deserialize)]
pub struct ReviewBody {
    pub decision: ReviewDecision,
}

/// POST /api/v1/requests: create one or more access requests
///
/// Each item succeeds or fails on its own. A single-item call that fails
/// returns that item's error status directly.
pub async fn create_requests(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateRequestsBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if body.requests.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({
            "error": {
                "message": "at least one request is required",
                "type": "invalid_request_error",
                "code": "empty_request",
            }
        }))));
    }

    let mut results = state
        .service
        .create_requests(CreateRequestsOpts {
            user,
            create: body.requests,
        })
        .await;

    if results.len() == 1 {
        let created = results.remove(0)?;
        return Ok((StatusCode::CREATED, Json(json!({ "results": [created] }))));
    }

    let all_ok = results.iter().all(Result::is_ok);
    let items: Vec<Value> = results
        .into_iter()
        .map(|r| match r {
            Ok(created) => json!(created),
            Err(e) => {
                let e = AppError::from(e);
                e.log();
                e.body()
            }
        })
        .collect();

    let status = if all_ok {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(json!({ "results": items }))))
}

/// POST /api/v1/requests/:id/review: approve or decline a pending request
pub async fn review_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Request>, AppError> {
    let request = state
        .service
        .review_request(&user, &id, body.decision)
        .await?;
    Ok(Json(request))
}

/// POST /api/v1/requests/:id/cancel: withdraw a pending request
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<Request>, AppError> {
    let request = state.service.cancel_request(&user, &id).await?;
    Ok(Json(request))
}
