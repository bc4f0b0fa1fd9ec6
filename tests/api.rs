//! Request API routes served in-process with `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use approvals::api::{api_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    let state = Arc::new(AppState {
        service: approvals::access::service::AccessService::new(
            h.store.clone(),
            h.store.clone(),
            h.workflow.clone(),
            h.events.clone(),
            h.clock.clone(),
        ),
        store: h.store.clone(),
    });
    Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
}

fn seeded() -> Harness {
    let h = Harness::new();
    h.store.insert_user(user("a", &["eng"]));
    h.store.insert_user(user("b", &["eng"]));
    h.store.insert_rule(rule("rul_1", &["eng"], approvers(&["b"], &[]), 3600));
    h.store.insert_rule(rule("rul_auto", &["eng"], approvers(&[], &[]), 3600));
    h
}

fn post(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body(rule: &str, secs: u64) -> Value {
    json!({
        "requests": [{
            "access_rule_id": rule,
            "reason": "deploy hotfix",
            "timing": { "duration_seconds": secs }
        }]
    })
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", None, create_body("rul_1", 60)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("nobody"), create_body("rul_1", 60)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_returns_created_request() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("a"), create_body("rul_1", 60)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body = json_body(resp).await;
    let created = &body["results"][0];
    assert_eq!(created["request"]["status"], "PENDING");
    assert_eq!(created["request"]["approval_method"], "REVIEWED");
    assert_eq!(created["reviewers"][0]["reviewer_id"], "b");
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn test_validation_error_lists_fields() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("a"), create_body("rul_1", 7200)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "validation_failed");
    assert_eq!(body["error"]["fields"][0]["field"], "timing.durationSeconds");
    assert_eq!(h.store.request_count(), 0);
}

#[tokio::test]
async fn test_unknown_rule_is_not_found() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("a"), create_body("rul_nope", 60)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mixed_batch_is_multi_status() {
    let h = seeded();
    let body = json!({
        "requests": [
            { "access_rule_id": "rul_auto", "timing": { "duration_seconds": 60 } },
            { "access_rule_id": "rul_1", "timing": { "duration_seconds": 99999 } }
        ]
    });
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("a"), body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);

    let body = json_body(resp).await;
    assert_eq!(body["results"][0]["request"]["status"], "APPROVED");
    assert_eq!(body["results"][1]["error"]["code"], "validation_failed");
}

#[tokio::test]
async fn test_empty_batch_is_bad_request() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/requests", Some("a"), json!({ "requests": [] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_and_cancel_routes() {
    let h = seeded();
    let created = tokio_test::assert_ok!(
        h.service
            .create_request(
                &user("a", &["eng"]),
                &approvals::access::service::CreateRequest {
                    access_rule_id: "rul_1".into(),
                    ..Default::default()
                },
            )
            .await
    );
    let id = created.request.id;

    // requester cannot review their own request
    let resp = app(&h)
        .oneshot(post(
            &format!("/api/v1/requests/{}/review", id),
            Some("a"),
            json!({ "decision": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app(&h)
        .oneshot(post(
            &format!("/api/v1/requests/{}/review", id),
            Some("b"),
            json!({ "decision": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "APPROVED");
    assert!(body["grant"].is_object());

    let resp = app(&h)
        .oneshot(post(&format!("/api/v1/requests/{}/cancel", id), Some("a"), json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let h = seeded();
    let resp = app(&h)
        .oneshot(post("/api/v1/nope", Some("a"), json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
