//! Submission endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::persistence::models::SubmissionState;

/// Query parameters for the submissions list endpoint.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct SubmissionsParams {
    /// Maximum rows to return; clamped server-side.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Phase filter: `all` (default), `submitting`, or `submitted`.
    #[serde(default)]
    pub phase: Option<String>,
}

/// Metadata on the submissions list response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmissionsMeta {
    /// Number of rows returned.
    pub count: usize,
    /// Phase filter that was applied.
    pub phase: String,
}

/// Current submission state rows.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmissionsResponse {
    /// Submission rows, newest observation first.
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<SubmissionState>,
    /// Filter metadata.
    pub meta: SubmissionsMeta,
}
