//! Refresh observations and last-known refresh state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::refresh_policy::RefreshPolicy;

/// A refresh observation: either relayed by the capture agent or produced
/// by the watcher's own upstream polls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshReport {
    /// When the refresh was observed; filled server-side when absent.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    /// Trigger source tag (e.g. `extension.page_refresh`).
    #[serde(default)]
    pub source: String,
    /// Target URL of the refresh, when known.
    #[serde(default)]
    pub url: String,
    /// HTTP status the refresh observed.
    #[serde(default)]
    pub status_code: u16,
    /// Optional delayed-refresh policy override riding along with the report.
    #[serde(default)]
    pub delayed_refresh_policy: Option<RefreshPolicy>,
}

/// Last-known refresh state, persisted as a single overwritten row.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshState {
    /// When the last refresh was observed.
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Source tag of the last refresh.
    pub last_refresh_source: String,
    /// Target URL of the last refresh.
    pub last_refresh_url: String,
    /// HTTP status of the last refresh.
    pub last_refresh_status: u16,
    /// When the row itself was last written.
    pub updated_at: DateTime<Utc>,
}
