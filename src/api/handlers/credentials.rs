//! Credential endpoints: stored token and header capture, read and ingest.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::error::WatcherError;
use crate::service::dispatch::{
    OP_CLEAR_TOKEN, OP_RECEIVE_STUDIES_HEADERS, OP_RECEIVE_TOKEN, dispatch,
};

/// `GET /token` — The stored token, verbatim.
///
/// # Errors
///
/// Returns [`WatcherError::NotFound`] when no token is stored.
#[utoipa::path(
    get,
    path = "/token",
    tag = "Credentials",
    summary = "Stored token",
    responses(
        (status = 200, description = "Stored token"),
        (status = 404, description = "No token stored"),
    )
)]
pub async fn get_token(State(state): State<AppState>) -> Result<impl IntoResponse, WatcherError> {
    let Some(token) = state.service.stored_token().await? else {
        return Err(WatcherError::NotFound("no token available".to_string()));
    };
    Ok(Json(token))
}

/// `POST /token` — Relay a captured token (`receive-token`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/token",
    tag = "Credentials",
    summary = "Relay a captured token",
    responses(
        (status = 200, description = "Token stored"),
        (status = 400, description = "Missing access token"),
    )
)]
pub async fn receive_token(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(&state.service, OP_RECEIVE_TOKEN, Some(&payload))
        .await
        .map(Json)
}

/// `POST /token/clear` — Drop the stored token (`clear-token`).
///
/// # Errors
///
/// Returns [`WatcherError`] when the token state cannot be cleared.
#[utoipa::path(
    post,
    path = "/token/clear",
    tag = "Credentials",
    summary = "Clear the stored token",
    request_body = String,
    responses(
        (status = 200, description = "Token cleared"),
    )
)]
pub async fn clear_token(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WatcherError> {
    let payload = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| WatcherError::Validation(format!("invalid payload: {e}")))?,
        )
    };
    dispatch(&state.service, OP_CLEAR_TOKEN, payload.as_ref())
        .await
        .map(Json)
}

/// `GET /studies-headers` — The stored header capture.
///
/// # Errors
///
/// Returns [`WatcherError::NotFound`] when no capture is stored.
#[utoipa::path(
    get,
    path = "/studies-headers",
    tag = "Credentials",
    summary = "Stored header capture",
    responses(
        (status = 200, description = "Stored capture"),
        (status = 404, description = "No capture stored"),
    )
)]
pub async fn get_studies_headers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, WatcherError> {
    let Some(capture) = state.service.stored_headers().await? else {
        return Err(WatcherError::NotFound(
            "no captured studies headers available".to_string(),
        ));
    };
    Ok(Json(capture))
}

/// `POST /studies-headers` — Relay a header capture
/// (`receive-studies-headers`).
///
/// # Errors
///
/// Returns [`WatcherError`] per the operation's validation rules.
#[utoipa::path(
    post,
    path = "/studies-headers",
    tag = "Credentials",
    summary = "Relay a header capture",
    responses(
        (status = 200, description = "Capture stored"),
        (status = 400, description = "Invalid URL or header list"),
    )
)]
pub async fn receive_studies_headers(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, WatcherError> {
    dispatch(&state.service, OP_RECEIVE_STUDIES_HEADERS, Some(&payload))
        .await
        .map(Json)
}

/// Credential routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/token", get(get_token).post(receive_token))
        .route("/token/clear", post(clear_token))
        .route(
            "/studies-headers",
            get(get_studies_headers).post(receive_studies_headers),
        )
}
