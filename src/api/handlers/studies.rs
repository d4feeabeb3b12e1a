//! Listing endpoints: current set, event history, refresh state, forced
//! refresh, and relayed-response ingest.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    LimitParams, ListMeta, RefreshStateResponse, StudiesResponse, StudyEventsResponse,
};
use crate::app_state::AppState;
use crate::error::WatcherError;
use crate::service::ForceRefreshOutcome;
use crate::service::dispatch::{
    OP_RECEIVE_STUDIES_REFRESH, OP_RECEIVE_STUDIES_RESPONSE, dispatch,
};

/// `GET /studies` — Currently available listings from the snapshot.
///
/// # Errors
///
/// Returns [`WatcherError`] when the stores cannot be read.
#[utoipa::path(
    get,
    path = "/studies",
    tag = "Studies",
    summary = "Currently available listings",
    params(LimitParams),
    responses(
        (status = 200, description = "Available listings", body = StudiesResponse),
    )
)]
pub async fn list_studies(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, WatcherError> {
    let results = state
        .service
        .current_available_studies(params.effective())
        .await?;

    let count = results.len();
    Ok(Json(StudiesResponse {
        results,
        meta: ListMeta {
            count,
            source: Some("cache".to_string()),
        },
    }))
}

/// `GET /study-events` — Recent availability transitions.
///
/// # Errors
///
/// Returns [`WatcherError`] when the stores cannot be read.
#[utoipa::path(
    get,
    path = "/study-events",
    tag = "Studies",
    summary = "Recent availability transitions",
    params(LimitParams),
    responses(
        (status = 200, description = "Transition history", body = StudyEventsResponse),
    )
)]
pub async fn study_events(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, WatcherError> {
    let events = state
        .service
        .recent_availability_events(params.effective())
        .await?;

    let count = events.len();
    Ok(Json(StudyEventsResponse {
        events,
        meta: ListMeta {
            count,
            source: None,
        },
    }))
}

/// `GET /studies-refresh` — Last recorded refresh state.
///
/// # Errors
///
/// Returns [`WatcherError`] when the state cannot be read.
#[utoipa::path(
    get,
    path = "/studies-refresh",
    tag = "Studies",
    summary = "Last refresh state",
    responses(
        (status = 200, description = "Refresh state", body = RefreshStateResponse),
    )
)]
pub async fn get_refresh_state(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, WatcherError> {
    let state_row = state.service.refresh_state().await?;

    let Some(row) = state_row else {
        return Ok(Json(RefreshStateResponse::default()));
    };
    if row.last_refresh_at.is_none() {
        return Ok(Json(RefreshStateResponse::default()));
    }

    Ok(Json(RefreshStateResponse {
        has_refresh: true,
        last_refresh_at: row.last_refresh_at,
        last_refresh_source: Some(row.last_refresh_source),
        last_refresh_url: Some(row.last_refresh_url),
        last_refresh_status: Some(row.last_refresh_status),
        updated_at: Some(row.updated_at),
    }))
}

/// `POST /studies-refresh` — Relay a refresh observation
/// (`receive-studies-refresh`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/studies-refresh",
    tag = "Studies",
    summary = "Relay a refresh observation",
    responses(
        (status = 200, description = "Observation recorded"),
        (status = 400, description = "Invalid URL"),
    )
)]
pub async fn receive_refresh_report(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(&state.service, OP_RECEIVE_STUDIES_REFRESH, Some(&payload))
        .await
        .map(Json)
}

/// `POST /studies-response` — Relay an intercepted listing response
/// (`receive-studies-response`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/studies-response",
    tag = "Studies",
    summary = "Relay an intercepted listing response",
    responses(
        (status = 200, description = "Response ingested"),
        (status = 400, description = "Invalid URL or body"),
    )
)]
pub async fn receive_studies_response(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(&state.service, OP_RECEIVE_STUDIES_RESPONSE, Some(&payload))
        .await
        .map(Json)
}

/// `POST /studies/refresh` — Poll the upstream platform now, through the
/// admission guard.
///
/// # Errors
///
/// Returns [`WatcherError::NotAuthenticated`] without a credential,
/// [`WatcherError::GuardDenied`] when the guard holds the slot, and
/// [`WatcherError::UpstreamRequest`] on transport failure.
#[utoipa::path(
    post,
    path = "/studies/refresh",
    tag = "Studies",
    summary = "Force an upstream poll",
    responses(
        (status = 200, description = "Poll completed and ingested"),
        (status = 401, description = "No stored credential"),
        (status = 429, description = "Admission guard denied the slot"),
        (status = 502, description = "Upstream transport failure"),
    )
)]
pub async fn force_refresh(
    State(state): State<AppState>,
) -> Result<Response, WatcherError> {
    match state.service.force_refresh().await? {
        ForceRefreshOutcome::Ingested {
            normalized,
            changes,
        } => {
            let count = normalized.results.len();
            let mut body = serde_json::json!({
                "results": normalized.results,
                "_links": normalized.links,
                "meta": {"count": count},
            });
            if let Some(changes) = &changes
                && let Ok(value) = serde_json::to_value(changes)
                && let Some(map) = body.as_object_mut()
            {
                map.insert("changes".to_string(), value);
            }
            Ok(Json(body).into_response())
        }
        ForceRefreshOutcome::Passthrough {
            status,
            content_type,
            body,
        } => {
            let mut response = body.into_response();
            *response.status_mut() =
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = content_type.unwrap_or_else(|| "application/json".to_string());
            if let Ok(value) = header::HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            Ok(response)
        }
    }
}

/// Listing routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/studies", get(list_studies))
        .route("/study-events", get(study_events))
        .route(
            "/studies-refresh",
            get(get_refresh_state).post(receive_refresh_report),
        )
        .route("/studies-response", post(receive_studies_response))
        .route("/studies/refresh", post(force_refresh))
}
