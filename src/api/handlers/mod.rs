//! REST endpoint handlers organized by resource.

pub mod credentials;
pub mod stream;
pub mod studies;
pub mod submissions;
pub mod system;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(system::routes())
        .merge(credentials::routes())
        .merge(studies::routes())
        .merge(submissions::routes())
        .route("/events", get(stream::events_stream))
}
