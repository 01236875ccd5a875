use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::workflows::application::broker::InMemoryBrokerDirectory;
use crate::workflows::application::controller::WizardScreen;
use crate::workflows::application::draft::InMemoryDraftStore;
use crate::workflows::application::gateway::{InMemorySubmissionGateway, SubmissionError};
use crate::workflows::application::router::{submit_handler, wizard_router};
use crate::workflows::application::session::WizardSessions;

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("json encodes")))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

async fn open(router: &axum::Router, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request(Method::POST, "/api/v1/wizard/sessions", Some(body)))
        .await
        .expect("route executes");
    let status = response.status();
    (status, read_json_body(response).await)
}

fn session_path(payload: &Value, action: &str) -> String {
    let id = payload["session_id"].as_str().expect("session id");
    if action.is_empty() {
        format!("/api/v1/wizard/sessions/{id}")
    } else {
        format!("/api/v1/wizard/sessions/{id}/{action}")
    }
}

fn complete_fields() -> Value {
    let fields: serde_json::Map<String, Value> = complete_values()
        .into_iter()
        .map(|(field, value)| (field.as_str().to_string(), json!(value)))
        .collect();
    Value::Object(fields)
}

#[tokio::test]
async fn open_route_creates_a_session() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions.clone());

    let (status, payload) = open(&router, json!({ "visitor_id": "visitor-1" })).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payload["screen"]["screen"], "step");
    assert_eq!(payload["screen"]["number"], 1);
    assert_eq!(payload["phase"]["kind"], "step");
    assert_eq!(payload["submission"]["status"], "idle");
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn open_route_rejects_malformed_referral() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);

    let (status, payload) = open(
        &router,
        json!({ "visitor_id": "visitor-1", "broker_token": "../brokers" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["error"].as_str().is_some());
}

#[tokio::test]
async fn unknown_session_returns_not_found() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);

    let response = router
        .oneshot(request(
            Method::GET,
            "/api/v1/wizard/sessions/6f1c8a52-3a4e-4d59-9a7e-2a8f3c1d0b11",
            None,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn continue_route_returns_unprocessable_with_field_errors() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);
    let (_, opened) = open(&router, json!({ "visitor_id": "visitor-1" })).await;

    let response = router
        .clone()
        .oneshot(request(Method::POST, &session_path(&opened, "continue"), None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["step"], 1);
    assert_eq!(payload["errors"]["first_name"], "First name is required");
}

#[tokio::test]
async fn welcome_route_conflicts_on_direct_sessions() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);
    let (_, opened) = open(&router, json!({ "visitor_id": "visitor-1" })).await;

    let response = router
        .clone()
        .oneshot(request(
            Method::POST,
            &session_path(&opened, "welcome"),
            Some(json!({ "email": "avery@example.com" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn dead_referral_returns_gone() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions.clone());
    let (_, opened) = open(
        &router,
        json!({ "visitor_id": "visitor-1", "broker_token": "retired-broker" }),
    )
    .await;
    let id = opened["session_id"].as_str().expect("id").to_string();
    wait_for(&sessions, &id, |view| {
        matches!(view.screen, WizardScreen::ReferralUnavailable { .. })
    })
    .await;

    let response = router
        .clone()
        .oneshot(request(
            Method::PUT,
            &session_path(&opened, "fields"),
            Some(json!({ "email": "avery@example.com" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn unknown_field_returns_bad_request() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);
    let (_, opened) = open(&router, json!({ "visitor_id": "visitor-1" })).await;

    let response = router
        .clone()
        .oneshot(request(
            Method::PUT,
            &session_path(&opened, "fields"),
            Some(json!({ "social_security_number": "123-45-6789" })),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn save_route_surfaces_storage_failure() {
    let sessions = Arc::new(WizardSessions::new(
        ReadOnlyDraftStore,
        Arc::new(directory()),
        Arc::new(InMemorySubmissionGateway::default()),
    ));
    let router = wizard_router(sessions);
    let (_, opened) = open(&router, json!({ "visitor_id": "visitor-1" })).await;

    let response = router
        .clone()
        .oneshot(request(Method::POST, &session_path(&opened, "save"), None))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn walk_through_routes_to_completion() {
    let (sessions, gateway) = memory_sessions(InMemoryDraftStore::default());
    let router = wizard_router(sessions);
    let (_, opened) = open(&router, json!({ "visitor_id": "visitor-9" })).await;

    let response = router
        .clone()
        .oneshot(request(
            Method::PUT,
            &session_path(&opened, "fields"),
            Some(complete_fields()),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);

    for _ in 0..4 {
        let response = router
            .clone()
            .oneshot(request(Method::POST, &session_path(&opened, "continue"), None))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(request(Method::GET, &session_path(&opened, "review"), None))
        .await
        .expect("route executes");
    let review = read_json_body(response).await;
    assert_eq!(review["estimated_loan"], 440_000);
    assert_eq!(review["display"]["loan_to_value"], "80.0%");

    let response = router
        .clone()
        .oneshot(request(Method::POST, &session_path(&opened, "submit"), None))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["screen"]["screen"], "complete");
    assert_eq!(payload["screen"]["application_number"], "BD-000001");
    assert_eq!(payload["portal_path"], "/portal");

    let response = router
        .clone()
        .oneshot(request(Method::POST, &session_path(&opened, "home"), None))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["screen"]["number"], 1);
    assert_eq!(gateway.issued_count(), 1);

    let response = router
        .clone()
        .oneshot(request(Method::DELETE, &session_path(&opened, ""), None))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn submit_handler_returns_bad_gateway_on_backend_failure() {
    let (sessions, gateway) = memory_sessions(InMemoryDraftStore::default());
    let id = sessions
        .open("visitor-1", None)
        .expect("opens")
        .session_id
        .to_string();
    let fields = complete_values()
        .into_iter()
        .map(|(field, value)| (field.as_str().to_string(), value.to_string()))
        .collect();
    sessions.update_fields(&id, fields).expect("fields set");
    for _ in 0..4 {
        sessions
            .dispatch(&id, crate::workflows::application::WizardEvent::Continue)
            .expect("valid");
    }
    gateway.fail_next(SubmissionError::Transport("connection refused".to_string()));

    let response = submit_handler::<
        InMemoryDraftStore,
        InMemoryBrokerDirectory,
        InMemorySubmissionGateway,
    >(State(sessions.clone()), Path(id.clone()))
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["submission"]["status"], "error");
    assert_eq!(payload["screen"]["number"], 5);
    assert_eq!(payload["values"]["first_name"], "Avery");
}
