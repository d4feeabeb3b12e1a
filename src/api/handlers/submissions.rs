//! Submission endpoints: current state query and relayed-response ingest.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{SubmissionsMeta, SubmissionsParams, SubmissionsResponse};
use crate::app_state::AppState;
use crate::domain::SubmissionPhase;
use crate::error::WatcherError;
use crate::service::dispatch::{
    OP_RECEIVE_PARTICIPANT_SUBMISSIONS, OP_RECEIVE_SUBMISSION_RESPONSE,
    OP_SCHEDULE_DELAYED_REFRESH, dispatch,
};

fn parse_phase_filter(raw: Option<&str>) -> Result<(Option<SubmissionPhase>, String), WatcherError> {
    let normalized = raw.unwrap_or("").trim().to_lowercase();
    if normalized.is_empty() || normalized == "all" {
        return Ok((None, "all".to_string()));
    }
    match SubmissionPhase::parse(&normalized) {
        Some(phase) => Ok((Some(phase), normalized)),
        None => Err(WatcherError::Validation(
            "phase must be one of: all, submitting, submitted".to_string(),
        )),
    }
}

/// `GET /submissions` — Current submission state, optionally by phase.
///
/// # Errors
///
/// Returns [`WatcherError::Validation`] for an unknown phase filter.
#[utoipa::path(
    get,
    path = "/submissions",
    tag = "Submissions",
    summary = "Current submission state",
    params(SubmissionsParams),
    responses(
        (status = 200, description = "Submission rows", body = SubmissionsResponse),
        (status = 400, description = "Unknown phase filter"),
    )
)]
pub async fn list_submissions(
    State(state): State<AppState>,
    Query(params): Query<SubmissionsParams>,
) -> Result<impl IntoResponse, WatcherError> {
    let (phase, phase_label) = parse_phase_filter(params.phase.as_deref())?;
    let results = state
        .service
        .current_submissions(params.limit.unwrap_or(0), phase)
        .await?;

    let count = results.len();
    Ok(Json(SubmissionsResponse {
        results,
        meta: SubmissionsMeta {
            count,
            phase: phase_label,
        },
    }))
}

/// `POST /submission-response` — Relay an intercepted submission response
/// (`receive-submission-response`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/submission-response",
    tag = "Submissions",
    summary = "Relay an intercepted submission response",
    responses(
        (status = 200, description = "Submission merged"),
        (status = 400, description = "Invalid URL or body"),
    )
)]
pub async fn receive_submission_response(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(
        &state.service,
        OP_RECEIVE_SUBMISSION_RESPONSE,
        Some(&payload),
    )
    .await
    .map(Json)
}

/// `POST /participant-submissions-response` — Relay a participant
/// submissions list (`receive-participant-submissions-response`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/participant-submissions-response",
    tag = "Submissions",
    summary = "Relay a participant submissions list",
    responses(
        (status = 200, description = "List merged"),
        (status = 400, description = "Invalid URL or body"),
    )
)]
pub async fn receive_participant_submissions(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(
        &state.service,
        OP_RECEIVE_PARTICIPANT_SUBMISSIONS,
        Some(&payload),
    )
    .await
    .map(Json)
}

/// `POST /schedule-delayed-refresh` — Replace the delayed-refresh plan
/// (`schedule-delayed-refresh`).
///
/// # Errors
///
/// Returns [`WatcherError`] when the token state cannot be read.
#[utoipa::path(
    post,
    path = "/schedule-delayed-refresh",
    tag = "Scheduling",
    summary = "Replace the delayed-refresh plan",
    responses(
        (status = 200, description = "Plan replaced, or reported unscheduled"),
    )
)]
pub async fn schedule_delayed_refresh(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(&state.service, OP_SCHEDULE_DELAYED_REFRESH, Some(&payload))
        .await
        .map(Json)
}

/// Submission routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/submissions", get(list_submissions))
        .route("/submission-response", post(receive_submission_response))
        .route(
            "/participant-submissions-response",
            post(receive_participant_submissions),
        )
        .route("/schedule-delayed-refresh", post(schedule_delayed_refresh))
}
