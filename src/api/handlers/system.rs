//! System endpoints: banner, health check, and status report.

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::StatusResponse;
use crate::app_state::AppState;
use crate::domain::credentials::mask_token;
use crate::error::WatcherError;

/// `GET /` — Plain HTML banner.
pub async fn home_handler() -> impl IntoResponse {
    Html(
        "<!doctype html><html><body><h1>Study Watcher Service</h1>\
         <p>See README for endpoint details.</p></body></html>",
    )
}

/// `GET /healthz` — Liveness probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "System",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is up"),
    )
)]
pub async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

/// `GET /status` — Credential, capture, and refresh status.
///
/// # Errors
///
/// Returns [`WatcherError`] when stored state cannot be read.
#[utoipa::path(
    get,
    path = "/status",
    tag = "System",
    summary = "Watcher status",
    description = "Reports whether a credential and header capture are stored (token masked) and the last recorded refresh.",
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
    )
)]
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, WatcherError> {
    let token = state.service.stored_token().await?;
    let capture = state.service.stored_headers().await?;
    let refresh = state.service.refresh_state().await?;

    let mut status = StatusResponse {
        has_token: token.is_some(),
        has_studies_headers: capture.is_some(),
        ..StatusResponse::default()
    };

    if let Some(token) = token {
        status.token_type = Some(token.token_type);
        status.token_preview = Some(mask_token(&token.access_token));
        status.origin = Some(token.origin);
        status.browser_info = Some(token.browser_info);
        status.key = Some(token.key);
        status.received_at = token.received_at;
    }

    if let Some(capture) = capture {
        status.studies_headers_url = Some(capture.url);
        status.studies_headers_method = Some(capture.method);
        status.studies_headers_count = Some(capture.headers.len());
        status.studies_headers_captured_at = capture.captured_at;
    }

    if let Some(refresh) = refresh
        && refresh.last_refresh_at.is_some()
    {
        status.last_refresh_at = refresh.last_refresh_at;
        status.last_refresh_source = Some(refresh.last_refresh_source);
        status.last_refresh_url = Some(refresh.last_refresh_url);
        status.last_refresh_status = Some(refresh.last_refresh_status);
    }

    Ok(Json(status))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home_handler))
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
}
