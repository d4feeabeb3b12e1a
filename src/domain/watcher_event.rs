//! Domain events pushed to live subscribers.
//!
//! Events are a best-effort notification layer over the durable stores:
//! a dropped event is a lost hint, never a lost fact. Both the WebSocket
//! and SSE transports receive the same [`WatcherEvent`] values through the
//! [`super::EventHub`].

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One listing availability transition, keyed by study id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StudyChange {
    /// Stable listing identifier.
    pub study_id: String,
    /// Display name at observation time.
    pub name: String,
}

/// Event pushed to all connected subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// A refresh was attempted or observed, successful or not.
    StudiesRefresh {
        /// Trigger source tag.
        source: String,
        /// Target URL of the refresh.
        url: String,
        /// HTTP status the refresh observed.
        status_code: u16,
        /// When the refresh was observed.
        observed_at: DateTime<Utc>,
    },

    /// A reconciliation pass produced availability transitions.
    StudiesUpdated {
        /// Listings that entered the available set, sorted by id.
        newly_available: Vec<StudyChange>,
        /// Listings that left the available set, sorted by id.
        became_unavailable: Vec<StudyChange>,
        /// Count of newly available listings.
        new_count: usize,
        /// Count of listings that became unavailable.
        gone_count: usize,
        /// When the underlying listing set was observed.
        observed_at: DateTime<Utc>,
    },
}

impl WatcherEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::StudiesRefresh { .. } => "studies_refresh",
            Self::StudiesUpdated { .. } => "studies_updated",
        }
    }

    /// Returns the observation timestamp carried by the event.
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Self::StudiesRefresh { observed_at, .. }
            | Self::StudiesUpdated { observed_at, .. } => *observed_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings() {
        let refresh = WatcherEvent::StudiesRefresh {
            source: "service.studies_refresh".to_string(),
            url: String::new(),
            status_code: 200,
            observed_at: Utc::now(),
        };
        assert_eq!(refresh.event_type_str(), "studies_refresh");

        let updated = WatcherEvent::StudiesUpdated {
            newly_available: vec![],
            became_unavailable: vec![],
            new_count: 0,
            gone_count: 0,
            observed_at: Utc::now(),
        };
        assert_eq!(updated.event_type_str(), "studies_updated");
    }

    #[test]
    fn serializes_with_event_type_tag() {
        let event = WatcherEvent::StudiesUpdated {
            newly_available: vec![StudyChange {
                study_id: "s1".to_string(),
                name: "Study One".to_string(),
            }],
            became_unavailable: vec![],
            new_count: 1,
            gone_count: 0,
            observed_at: Utc::now(),
        };
        let json = serde_json::to_string(&event);
        let Ok(json) = json else {
            panic!("serialization failed");
        };
        assert!(json.contains("studies_updated"));
        assert!(json.contains("\"new_count\":1"));
    }
}
