//! Persistence layer: single-writer SQLite stores.
//!
//! The storage engine is a serialized, durable SQLite database: one pooled
//! connection, WAL journaling, transactional read/modify/write, and a
//! busy-retry contract on write paths hit by concurrent triggers. Each
//! store owns one concern; all share the pool opened by [`sqlite::connect`].

pub mod models;
pub mod sqlite;
pub mod state_stores;
pub mod studies_store;
pub mod submissions_store;

pub use models::{AvailabilityEvent, AvailabilityEventKind, AvailabilitySummary, SubmissionState};
pub use state_stores::{HeadersStore, RefreshStateStore, TokenStore};
pub use studies_store::StudiesStore;
pub use submissions_store::SubmissionsStore;
