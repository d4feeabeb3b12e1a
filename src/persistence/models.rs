//! Row types surfaced by the stores.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::study::Money;
use crate::domain::{StudyChange, SubmissionPhase};

/// Kind of availability transition recorded for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityEventKind {
    /// The listing entered the available set.
    Available,
    /// The listing left the available set.
    Unavailable,
}

impl AvailabilityEventKind {
    /// Storage representation of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Result of one reconciliation pass: both transition lists, sorted by id.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilitySummary {
    /// When the underlying listing set was observed.
    pub observed_at: DateTime<Utc>,
    /// Listings that entered the available set.
    pub newly_available: Vec<StudyChange>,
    /// Listings that left the available set.
    pub became_unavailable: Vec<StudyChange>,
}

impl AvailabilitySummary {
    /// Whether the pass produced any transition at all.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.newly_available.is_empty() || !self.became_unavailable.is_empty()
    }
}

/// One stored availability transition, enriched with the latest known
/// listing metadata (which survives the listing leaving the active set).
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityEvent {
    /// Append-only row id.
    pub row_id: i64,
    /// Listing identifier.
    pub study_id: String,
    /// Listing name at transition time.
    pub study_name: String,
    /// Transition direction.
    pub event_type: AvailabilityEventKind,
    /// When the transition was observed.
    pub observed_at: DateTime<Utc>,
    /// Reward from the latest payload projection.
    pub reward: Money,
    /// Average hourly reward from the latest payload projection.
    pub average_reward_per_hour: Money,
    /// Estimated completion time from the latest payload projection.
    pub estimated_completion_time: i64,
    /// Total places from the latest payload projection.
    pub total_available_places: i64,
    /// Remaining places from the latest payload projection.
    pub places_available: i64,
}

/// Canonical per-submission state as stored and served.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionState {
    /// Submission identifier.
    pub submission_id: String,
    /// Listing identifier.
    pub study_id: String,
    /// Listing name.
    pub study_name: String,
    /// Participant identifier, possibly empty.
    pub participant_id: String,
    /// Canonical status.
    pub status: String,
    /// Phase derived from the status.
    pub phase: SubmissionPhase,
    /// Raw payload of the observation that last wrote the row.
    pub payload: serde_json::Value,
    /// Observation timestamp of the payload.
    pub observed_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}
