//! Status and refresh-state response DTOs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Combined credential/capture/refresh status report.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Whether a bearer token is stored.
    pub has_token: bool,
    /// Whether a header capture is stored.
    pub has_studies_headers: bool,

    /// Token scheme, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Masked token preview, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_preview: Option<String>,
    /// Capture origin, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Browser info hint, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_info: Option<String>,
    /// Storage key the token came from, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// When the token was received, when a token is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,

    /// Capture URL, when a capture is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studies_headers_url: Option<String>,
    /// Capture method, when a capture is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studies_headers_method: Option<String>,
    /// Captured header count, when a capture is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studies_headers_count: Option<usize>,
    /// When the capture was taken, when a capture is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studies_headers_captured_at: Option<DateTime<Utc>>,

    /// When the last refresh was observed, once any refresh happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Source of the last refresh, once any refresh happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_source: Option<String>,
    /// Target URL of the last refresh, once any refresh happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_url: Option<String>,
    /// Status of the last refresh, once any refresh happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_status: Option<u16>,
}

/// Last-refresh report for the dedicated endpoint.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct RefreshStateResponse {
    /// Whether any refresh has been recorded yet.
    pub has_refresh: bool,
    /// When the last refresh was observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// Source of the last refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_source: Option<String>,
    /// Target URL of the last refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_url: Option<String>,
    /// Status of the last refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_status: Option<u16>,
    /// When the state row was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
