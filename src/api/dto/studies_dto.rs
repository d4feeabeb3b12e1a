//! Listing endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::NormalizedStudy;
use crate::persistence::models::AvailabilityEvent;

/// `limit` query parameter shared by the read endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
pub struct LimitParams {
    /// Maximum rows to return; clamped server-side.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl LimitParams {
    /// Effective limit: the caller's value, or 0 to take the store default.
    #[must_use]
    pub fn effective(&self) -> i64 {
        self.limit.unwrap_or(0)
    }
}

/// Count metadata on list responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListMeta {
    /// Number of rows returned.
    pub count: usize,
    /// Where the rows came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Currently available listings.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudiesResponse {
    /// Canonical listing records.
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<NormalizedStudy>,
    /// Count metadata.
    pub meta: ListMeta,
}

/// Recent availability transitions.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudyEventsResponse {
    /// Transition rows, newest first.
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<AvailabilityEvent>,
    /// Count metadata.
    pub meta: ListMeta,
}
