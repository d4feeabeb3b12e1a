//! # prolific-watcher
//!
//! Backend collector and refresh orchestrator behind a browser-side capture
//! agent watching a gig-work study platform. The service accepts relayed
//! credentials and intercepted responses, re-polls the upstream platform
//! through an admission-controlled, jitter-scheduled client, reconciles
//! listing availability into durable history, merges submission state, and
//! pushes change notifications to live subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Capture agent / clients (HTTP, WebSocket, SSE)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Transport (ws/)
//!     │
//!     ├── Operation Dispatcher (service/dispatch)
//!     ├── WatcherService (service/)
//!     │     ├── AdmissionGuard
//!     │     ├── RefreshScheduler + jitter planner (domain/refresh_policy)
//!     │     └── Upstream poll client (upstream/)
//!     │
//!     ├── EventHub fan-out (domain/event_hub)
//!     └── SQLite stores (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod upstream;
pub mod ws;
