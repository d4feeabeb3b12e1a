//! Submission observations, status canonicalization, and phase derivation.
//!
//! A submission observation can arrive from two channels: a directly
//! intercepted reserve/transition response, or an item of a participant
//! submissions list. Both are normalized into [`SubmissionSnapshot`] before
//! being folded into canonical state by the submissions store.

use serde::{Deserialize, Serialize};

/// Placeholder study id written when an observation carries none.
pub const UNKNOWN_STUDY_ID: &str = "unknown";
/// Placeholder study name written when an observation carries none.
pub const UNKNOWN_STUDY_NAME: &str = "Unknown Study";

/// Coarse submission lifecycle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    /// The submission is still in progress.
    Submitting,
    /// The submission has reached a post-completion status.
    Submitted,
}

impl SubmissionPhase {
    /// Returns the lowercase wire/storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
        }
    }

    /// Parses the lowercase wire/storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "submitting" => Some(Self::Submitting),
            "submitted" => Some(Self::Submitted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonicalizes a raw status: uppercased, `_`/`-` become spaces, runs of
/// whitespace collapse to one space.
#[must_use]
pub fn canonical_status(status: &str) -> String {
    status
        .trim()
        .to_uppercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps a canonical status to its phase via the fixed lookup table.
///
/// Unrecognized statuses default to [`SubmissionPhase::Submitting`] — an
/// unknown status is treated as still in progress — and are logged.
#[must_use]
pub fn phase_for_status(status: &str) -> SubmissionPhase {
    let normalized = canonical_status(status);
    match normalized.as_str() {
        "RESERVED" | "ACTIVE" => SubmissionPhase::Submitting,
        "AWAITING REVIEW" | "APPROVED" | "REJECTED" | "SCREENED OUT" | "RETURNED" => {
            SubmissionPhase::Submitted
        }
        "" => SubmissionPhase::Submitting,
        other => {
            tracing::warn!(
                status,
                normalized_status = other,
                default_phase = SubmissionPhase::Submitting.as_str(),
                "unmapped submission status"
            );
            SubmissionPhase::Submitting
        }
    }
}

/// One submission observation, ready for the merge engine.
#[derive(Debug, Clone)]
pub struct SubmissionSnapshot {
    /// Submission identifier (primary key).
    pub submission_id: String,
    /// Listing the submission belongs to; placeholder when unknown.
    pub study_id: String,
    /// Listing display name; placeholder when unknown.
    pub study_name: String,
    /// Participant identifier; may be empty.
    pub participant_id: String,
    /// Canonical status string.
    pub status: String,
    /// Phase derived from the status.
    pub phase: SubmissionPhase,
    /// Raw observation payload.
    pub payload: serde_json::Value,
}

/// Canonical merge result handed back to callers and logged.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionUpdate {
    /// Submission identifier.
    pub submission_id: String,
    /// Listing identifier after placeholder substitution.
    pub study_id: String,
    /// Listing name after placeholder substitution.
    pub study_name: String,
    /// Canonical status.
    pub status: String,
    /// Derived phase.
    pub phase: SubmissionPhase,
    /// Observation timestamp applied on the write.
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionStudyPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionResponseBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    participant_id: String,
    #[serde(default)]
    participant: String,
    #[serde(default)]
    study_id: String,
    #[serde(default)]
    study: SubmissionStudyPayload,
    #[serde(default)]
    study_url: String,
}

/// Pulls a study id out of a submission `study_url` query string, accepting
/// both `STUDY_ID` and `study_id` parameter spellings.
#[must_use]
pub fn study_id_from_submission_url(study_url: &str) -> String {
    let Ok(parsed) = url::Url::parse(study_url.trim()) else {
        return String::new();
    };

    let mut lowercase_match = String::new();
    for (key, value) in parsed.query_pairs() {
        if key == "STUDY_ID" {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        if key == "study_id" && lowercase_match.is_empty() {
            lowercase_match = value.trim().to_string();
        }
    }
    lowercase_match
}

fn build_snapshot(
    submission_id: &str,
    status: &str,
    participant_id: &str,
    study_id: &str,
    study_name: &str,
    payload: serde_json::Value,
) -> Result<SubmissionSnapshot, String> {
    let submission_id = submission_id.trim();
    if submission_id.is_empty() {
        return Err("submission response missing id".to_string());
    }

    let status = canonical_status(status);
    if status.is_empty() {
        return Err("submission response missing status".to_string());
    }

    let study_id = study_id.trim();
    let study_name = study_name.trim();
    let payload = if payload.is_null() {
        serde_json::json!({})
    } else {
        payload
    };

    Ok(SubmissionSnapshot {
        submission_id: submission_id.to_string(),
        study_id: if study_id.is_empty() {
            UNKNOWN_STUDY_ID.to_string()
        } else {
            study_id.to_string()
        },
        study_name: if study_name.is_empty() {
            UNKNOWN_STUDY_NAME.to_string()
        } else {
            study_name.to_string()
        },
        participant_id: participant_id.trim().to_string(),
        phase: phase_for_status(&status),
        status,
        payload,
    })
}

/// Normalizes a directly intercepted submission response body.
///
/// Participant and study identifiers fall back through the alternate fields
/// the platform uses (`participant`, `study.id`, the `study_url` query).
///
/// # Errors
///
/// Returns a message when the body is not JSON or lacks an id/status.
pub fn normalize_submission_snapshot(body: &[u8]) -> Result<SubmissionSnapshot, String> {
    let parsed: SubmissionResponseBody =
        serde_json::from_slice(body).map_err(|e| format!("parse submission response: {e}"))?;
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("parse submission response: {e}"))?;

    let mut participant_id = parsed.participant_id.trim().to_string();
    if participant_id.is_empty() {
        participant_id = parsed.participant.trim().to_string();
    }

    let mut study_id = parsed.study_id.trim().to_string();
    if study_id.is_empty() {
        study_id = parsed.study.id.trim().to_string();
    }
    if study_id.is_empty() {
        study_id = study_id_from_submission_url(&parsed.study_url);
    }

    build_snapshot(
        &parsed.id,
        &parsed.status,
        &participant_id,
        &study_id,
        &parsed.study.name,
        payload,
    )
}

/// Normalizes one item of a participant submissions list.
///
/// # Errors
///
/// Returns a message when the item is not JSON or lacks an id/status.
pub fn normalize_participant_list_item(
    item: &serde_json::Value,
) -> Result<SubmissionSnapshot, String> {
    let parsed: SubmissionResponseBody = serde_json::from_value(item.clone())
        .map_err(|e| format!("parse participant submission item: {e}"))?;

    let mut participant_id = parsed.participant_id.trim().to_string();
    if participant_id.is_empty() {
        participant_id = parsed.participant.trim().to_string();
    }

    let mut study_id = parsed.study_id.trim().to_string();
    if study_id.is_empty() {
        study_id = parsed.study.id.trim().to_string();
    }
    if study_id.is_empty() {
        study_id = study_id_from_submission_url(&parsed.study_url);
    }

    build_snapshot(
        &parsed.id,
        &parsed.status,
        &participant_id,
        &study_id,
        &parsed.study.name,
        item.clone(),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_canonicalization_collapses_separators() {
        assert_eq!(canonical_status("awaiting_review"), "AWAITING REVIEW");
        assert_eq!(canonical_status("  screened-out  "), "SCREENED OUT");
        assert_eq!(canonical_status("ACTIVE"), "ACTIVE");
        assert_eq!(canonical_status("awaiting   review"), "AWAITING REVIEW");
    }

    #[test]
    fn phase_table_matches_spec() {
        assert_eq!(phase_for_status("RESERVED"), SubmissionPhase::Submitting);
        assert_eq!(phase_for_status("active"), SubmissionPhase::Submitting);
        assert_eq!(
            phase_for_status("awaiting_review"),
            SubmissionPhase::Submitted
        );
        assert_eq!(phase_for_status("APPROVED"), SubmissionPhase::Submitted);
        assert_eq!(phase_for_status("REJECTED"), SubmissionPhase::Submitted);
        assert_eq!(phase_for_status("screened out"), SubmissionPhase::Submitted);
        assert_eq!(phase_for_status("RETURNED"), SubmissionPhase::Submitted);
    }

    #[test]
    fn unknown_status_defaults_to_submitting() {
        assert_eq!(
            phase_for_status("TIMED OUT SOMEHOW"),
            SubmissionPhase::Submitting
        );
    }

    #[test]
    fn study_id_falls_back_through_alternates() {
        let body = serde_json::json!({
            "id": "sub-1",
            "status": "RESERVED",
            "participant": "p-9",
            "study": {"id": "st-3", "name": "Colors"},
        });
        let Ok(encoded) = serde_json::to_vec(&body) else {
            panic!("encode failed");
        };
        let Ok(snapshot) = normalize_submission_snapshot(&encoded) else {
            panic!("normalize failed");
        };
        assert_eq!(snapshot.study_id, "st-3");
        assert_eq!(snapshot.participant_id, "p-9");
        assert_eq!(snapshot.phase, SubmissionPhase::Submitting);
    }

    #[test]
    fn study_id_parsed_from_study_url() {
        assert_eq!(
            study_id_from_submission_url("https://example.com/start?STUDY_ID=abc123"),
            "abc123"
        );
        assert_eq!(
            study_id_from_submission_url("https://example.com/start?study_id=lower"),
            "lower"
        );
        assert_eq!(study_id_from_submission_url("not a url"), "");
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = normalize_submission_snapshot(br#"{"status": "ACTIVE"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn placeholders_applied_for_missing_study() {
        let body = serde_json::json!({"id": "sub-2", "status": "ACTIVE"});
        let Ok(encoded) = serde_json::to_vec(&body) else {
            panic!("encode failed");
        };
        let Ok(snapshot) = normalize_submission_snapshot(&encoded) else {
            panic!("normalize failed");
        };
        assert_eq!(snapshot.study_id, UNKNOWN_STUDY_ID);
        assert_eq!(snapshot.study_name, UNKNOWN_STUDY_NAME);
    }
}
