use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::broker::BrokerDirectory;
use super::controller::{SubmissionStatus, WizardError, WizardEvent};
use super::draft::{DraftError, DraftStore};
use super::gateway::SubmissionGateway;
use super::session::{SessionError, WizardSessions};

type SharedSessions<S, B, G> = State<Arc<WizardSessions<S, B, G>>>;

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub visitor_id: String,
    #[serde(default)]
    pub broker_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WelcomeRequest {
    pub email: String,
}

/// Router exposing wizard sessions to the browser front end.
pub fn wizard_router<S, B, G>(sessions: Arc<WizardSessions<S, B, G>>) -> Router
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    Router::new()
        .route("/api/v1/wizard/sessions", post(open_handler::<S, B, G>))
        .route(
            "/api/v1/wizard/sessions/:session_id",
            get(view_handler::<S, B, G>).delete(close_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/welcome",
            post(welcome_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/fields",
            put(fields_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/continue",
            post(continue_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/back",
            post(back_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/save",
            post(save_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/submit",
            post(submit_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/reset",
            post(reset_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/home",
            post(home_handler::<S, B, G>),
        )
        .route(
            "/api/v1/wizard/sessions/:session_id/review",
            get(review_handler::<S, B, G>),
        )
        .with_state(sessions)
}

pub(crate) async fn open_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Json(request): Json<OpenSessionRequest>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    match sessions.open(&request.visitor_id, request.broker_token.as_deref()) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(err) => session_error_response(err),
    }
}

pub(crate) async fn view_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.view(&session_id))
}

pub(crate) async fn close_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    match sessions.close(&session_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => session_error_response(err),
    }
}

pub(crate) async fn welcome_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
    Json(request): Json<WelcomeRequest>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    let event = WizardEvent::WelcomeSubmitted {
        email: request.email,
    };
    respond(sessions.dispatch(&session_id, event))
}

pub(crate) async fn fields_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.update_fields(&session_id, fields))
}

pub(crate) async fn continue_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.dispatch(&session_id, WizardEvent::Continue))
}

pub(crate) async fn back_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.dispatch(&session_id, WizardEvent::Back))
}

pub(crate) async fn save_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.dispatch(&session_id, WizardEvent::SaveForLater))
}

pub(crate) async fn submit_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    match sessions.submit(&session_id).await {
        Ok(view) if view.submission.status == SubmissionStatus::Error => {
            (StatusCode::BAD_GATEWAY, Json(view)).into_response()
        }
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => session_error_response(err),
    }
}

pub(crate) async fn reset_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.dispatch(&session_id, WizardEvent::Reset))
}

pub(crate) async fn home_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.dispatch(&session_id, WizardEvent::ReturnHome))
}

pub(crate) async fn review_handler<S, B, G>(
    State(sessions): SharedSessions<S, B, G>,
    Path(session_id): Path<String>,
) -> Response
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    respond(sessions.review(&session_id))
}

fn respond<T: serde::Serialize>(result: Result<T, SessionError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => session_error_response(err),
    }
}

pub(crate) fn session_error_response(err: SessionError) -> Response {
    let message = err.to_string();
    let (status, payload) = match err {
        SessionError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
        SessionError::InvalidReferral(_)
        | SessionError::UnknownField(_)
        | SessionError::Draft(DraftError::InvalidVisitor(_)) => {
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
        SessionError::Wizard(WizardError::Validation { step, errors }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": message,
                "step": step.number(),
                "errors": errors,
            }),
        ),
        SessionError::Wizard(WizardError::InvalidEmail) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": message,
                "errors": { "email": "Enter a valid email address" },
            }),
        ),
        SessionError::Wizard(
            WizardError::IllegalTransition { .. }
            | WizardError::ReferralPending
            | WizardError::SubmissionInFlight,
        ) => (StatusCode::CONFLICT, json!({ "error": message })),
        SessionError::Wizard(WizardError::ReferralUnavailable(_)) => {
            (StatusCode::GONE, json!({ "error": message }))
        }
        SessionError::Wizard(WizardError::Draft(_))
        | SessionError::Draft(_)
        | SessionError::SubmissionAborted(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        }
    };

    (status, Json(payload)).into_response()
}
