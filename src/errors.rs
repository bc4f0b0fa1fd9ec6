use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::access::{AccessError, FieldError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown user")]
    Unauthenticated,

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Status, error type, code, message and field errors for the response body.
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String, Vec<FieldError>) {
        match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unknown_user",
                "missing or unknown x-user-id".to_string(),
                vec![],
            ),
            AppError::Access(e) => access_parts(e),
            AppError::Internal(_) => internal(),
        }
    }

    /// Logs server-side failures; client errors are not logged.
    pub fn log(&self) {
        match self {
            AppError::Internal(e) => tracing::error!("Internal error: {:#}", e),
            AppError::Access(AccessError::Grant(e)) => tracing::error!("Grant error: {:#}", e),
            AppError::Access(AccessError::GroupLookup { group, source }) => {
                tracing::error!("Group lookup error: group={} error={}", group, source)
            }
            AppError::Access(AccessError::Store(e)) => tracing::error!("Store error: {}", e),
            _ => {}
        }
    }
}

fn access_parts(e: &AccessError) -> (StatusCode, &'static str, &'static str, String, Vec<FieldError>) {
    match e {
        AccessError::Validation(v) => (
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "validation_failed",
            v.to_string(),
            v.fields.clone(),
        ),
        AccessError::RuleNotFound => (
            StatusCode::NOT_FOUND,
            "not_found_error",
            "rule_not_found",
            e.to_string(),
            vec![],
        ),
        AccessError::RequestNotFound => (
            StatusCode::NOT_FOUND,
            "not_found_error",
            "request_not_found",
            e.to_string(),
            vec![],
        ),
        AccessError::NoMatchingGroup => (
            StatusCode::FORBIDDEN,
            "permission_error",
            "no_matching_group",
            e.to_string(),
            vec![],
        ),
        AccessError::NotAReviewer => (
            StatusCode::FORBIDDEN,
            "permission_error",
            "not_a_reviewer",
            e.to_string(),
            vec![],
        ),
        AccessError::NotRequester => (
            StatusCode::FORBIDDEN,
            "permission_error",
            "not_requester",
            e.to_string(),
            vec![],
        ),
        AccessError::InvalidTransition(_) => (
            StatusCode::CONFLICT,
            "conflict_error",
            "invalid_status_transition",
            e.to_string(),
            vec![],
        ),
        AccessError::Grant(_) => (
            StatusCode::BAD_GATEWAY,
            "upstream_error",
            "grant_failed",
            "granting access failed".to_string(),
            vec![],
        ),
        AccessError::GroupLookup { .. } | AccessError::Store(_) => internal(),
    }
}

fn internal() -> (StatusCode, &'static str, &'static str, String, Vec<FieldError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
        vec![],
    )
}

impl AppError {
    /// JSON error body, shared by whole-response errors and per-item results.
    pub fn body(&self) -> serde_json::Value {
        let (_, error_type, code, msg, fields) = self.parts();
        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        if !fields.is_empty() {
            error["fields"] = json!(fields);
        }
        json!({ "error": error })
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.body())).into_response()
    }
}
