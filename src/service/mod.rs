//! Service layer: admission control, scheduling, and orchestration.
//!
//! [`WatcherService`] coordinates every operation; the [`guard::AdmissionGuard`]
//! and [`scheduler::RefreshScheduler`] are its owned concurrency components,
//! and [`dispatch::dispatch`] is the single entry point both transports use.

pub mod dispatch;
pub mod guard;
pub mod refresh;
pub mod scheduler;
pub mod watcher_service;

pub use guard::{AdmissionGuard, SlotDecision};
pub use refresh::{DELAYED_REFRESH_SOURCE, FORCED_REFRESH_SOURCE, ForceRefreshOutcome};
pub use scheduler::RefreshScheduler;
pub use watcher_service::WatcherService;
