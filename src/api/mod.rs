//! REST API layer: route handlers, DTOs, and router composition.
//!
//! All endpoints are mounted at the root level; the WebSocket endpoint is
//! added alongside in `main.rs`.

pub mod dto;
pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete REST router.
pub fn build_router() -> Router<AppState> {
    handlers::routes()
}
