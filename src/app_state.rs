//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventHub;
use crate::service::WatcherService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Watcher service for all business logic.
    pub service: Arc<WatcherService>,
    /// Fan-out hub for the push transports.
    pub event_hub: EventHub,
}
