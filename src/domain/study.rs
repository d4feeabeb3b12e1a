//! Canonical listing records and vendor payload normalization.
//!
//! The upstream platform returns a paginated envelope of study listings.
//! [`normalize_studies_response`] translates that vendor shape into
//! [`NormalizedStudy`] records, which are immutable for a given observation
//! and are what the reconciliation engine and stores consume.

use serde::{Deserialize, Serialize};

/// Monetary amount with a currency code, as reported by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's major unit.
    #[serde(default)]
    pub amount: f64,
    /// ISO currency code (e.g. `"GBP"`).
    #[serde(default)]
    pub currency: String,
}

/// Researcher attribution on a listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Researcher {
    /// Researcher identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Country code.
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiSubmissionsConfig {
    #[serde(default)]
    max_submissions_per_participant: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiPii {
    #[serde(default)]
    enabled: bool,
}

/// One pagination link in the vendor envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudiesLink {
    /// Link target, absent on the last/first page.
    #[serde(default)]
    pub href: Option<String>,
    /// Link title.
    #[serde(default)]
    pub title: String,
}

/// Pagination links block of the vendor envelope, passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudiesLinks {
    /// Current page.
    #[serde(default, rename = "self")]
    pub self_: StudiesLink,
    /// Next page.
    #[serde(default)]
    pub next: StudiesLink,
    /// Previous page.
    #[serde(default)]
    pub previous: StudiesLink,
    /// Last page.
    #[serde(default)]
    pub last: StudiesLink,
}

impl StudiesLinks {
    fn from_api(links: ApiStudiesLinks) -> Self {
        Self {
            self_: links.self_,
            next: links.next,
            previous: links.previous,
            last: links.last,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiStudiesLinks {
    #[serde(default, rename = "self")]
    self_: StudiesLink,
    #[serde(default)]
    next: StudiesLink,
    #[serde(default)]
    previous: StudiesLink,
    #[serde(default)]
    last: StudiesLink,
}

/// Vendor listing record as returned by the platform API.
#[derive(Debug, Clone, Default, Deserialize)]
struct ApiStudy {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    study_type: String,
    #[serde(default)]
    date_created: String,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    total_available_places: i64,
    #[serde(default)]
    places_taken: i64,
    #[serde(default)]
    submissions_config: ApiSubmissionsConfig,
    #[serde(default)]
    study_reward: Money,
    #[serde(default)]
    study_average_reward_per_hour: Money,
    #[serde(default)]
    researcher: Researcher,
    #[serde(default)]
    description: String,
    #[serde(default)]
    estimated_completion_time: i64,
    #[serde(default)]
    device_compatibility: Vec<String>,
    #[serde(default)]
    peripheral_requirements: Vec<String>,
    #[serde(default)]
    maximum_allowed_time: i64,
    #[serde(default)]
    average_completion_time_in_seconds: i64,
    #[serde(default)]
    is_confidential: bool,
    #[serde(default)]
    is_ongoing_study: bool,
    #[serde(default)]
    submission_started_at: Option<String>,
    #[serde(default)]
    pii: ApiPii,
    #[serde(default)]
    study_labels: Vec<String>,
    #[serde(default)]
    ai_inferred_study_labels: Vec<String>,
    #[serde(default)]
    previous_submission_count: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStudiesResponse {
    #[serde(default)]
    results: Vec<ApiStudy>,
    #[serde(default, rename = "_links")]
    links: ApiStudiesLinks,
}

/// Canonical listing record keyed by `id`.
///
/// Derived field: `places_available = max(0, total_available_places −
/// places_taken)`. Immutable once constructed for a given observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedStudy {
    /// Stable listing identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Listing type string.
    #[serde(default)]
    pub study_type: String,
    /// Creation timestamp as reported upstream.
    #[serde(default)]
    pub date_created: String,
    /// Publication timestamp as reported upstream.
    #[serde(default)]
    pub published_at: String,
    /// Total number of places on the listing.
    #[serde(default)]
    pub total_available_places: i64,
    /// Places already taken.
    #[serde(default)]
    pub places_taken: i64,
    /// Derived remaining places, floored at zero.
    #[serde(default)]
    pub places_available: i64,
    /// Reward for completing the listing.
    #[serde(default)]
    pub reward: Money,
    /// Average hourly reward.
    #[serde(default)]
    pub average_reward_per_hour: Money,
    /// Per-participant submission cap.
    #[serde(default)]
    pub max_submissions_per_participant: i64,
    /// Researcher attribution.
    #[serde(default)]
    pub researcher: Researcher,
    /// Listing description.
    #[serde(default)]
    pub description: String,
    /// Estimated completion time in minutes.
    #[serde(default)]
    pub estimated_completion_time: i64,
    /// Compatible device classes.
    #[serde(default)]
    pub device_compatibility: Vec<String>,
    /// Required peripherals.
    #[serde(default)]
    pub peripheral_requirements: Vec<String>,
    /// Maximum allowed completion time in minutes.
    #[serde(default)]
    pub maximum_allowed_time: i64,
    /// Average completion time in seconds.
    #[serde(default)]
    pub average_completion_time_in_seconds: i64,
    /// Whether the listing is confidential.
    #[serde(default)]
    pub is_confidential: bool,
    /// Whether the listing is ongoing.
    #[serde(default)]
    pub is_ongoing_study: bool,
    /// When the participant started a submission, if any.
    #[serde(default)]
    pub submission_started_at: Option<String>,
    /// Whether the listing collects personally identifying information.
    #[serde(default)]
    pub pii_enabled: bool,
    /// Labels assigned by the researcher.
    #[serde(default)]
    pub study_labels: Vec<String>,
    /// Labels inferred by the platform.
    #[serde(default)]
    pub ai_inferred_study_labels: Vec<String>,
    /// Participant's previous submission count for this listing.
    #[serde(default)]
    pub previous_submission_count: i64,
}

/// Normalized listing envelope: records plus pass-through pagination links.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedStudiesResponse {
    /// Canonical listing records.
    pub results: Vec<NormalizedStudy>,
    /// Pagination links from the vendor envelope.
    #[serde(rename = "_links")]
    pub links: StudiesLinks,
}

/// Normalizes a raw listing payload into canonical records.
///
/// The payload must be a JSON object with a `results` array; anything else
/// is rejected before any record is constructed.
///
/// # Errors
///
/// Returns a message describing the malformed payload.
pub fn normalize_studies_response(body: &[u8]) -> Result<NormalizedStudiesResponse, String> {
    let envelope: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| format!("parse studies payload: {e}"))?;

    match envelope.get("results") {
        None => return Err("studies payload missing results array".to_string()),
        Some(serde_json::Value::Array(_)) => {}
        Some(_) => return Err("studies payload has non-array results field".to_string()),
    }

    let raw: ApiStudiesResponse =
        serde_json::from_slice(body).map_err(|e| format!("parse studies payload: {e}"))?;

    let results = raw
        .results
        .into_iter()
        .map(|study| NormalizedStudy {
            places_available: (study.total_available_places - study.places_taken).max(0),
            id: study.id,
            name: study.name,
            study_type: study.study_type,
            date_created: study.date_created,
            published_at: study.published_at,
            total_available_places: study.total_available_places,
            places_taken: study.places_taken,
            reward: study.study_reward,
            average_reward_per_hour: study.study_average_reward_per_hour,
            max_submissions_per_participant: study.submissions_config.max_submissions_per_participant,
            researcher: study.researcher,
            description: study.description,
            estimated_completion_time: study.estimated_completion_time,
            device_compatibility: study.device_compatibility,
            peripheral_requirements: study.peripheral_requirements,
            maximum_allowed_time: study.maximum_allowed_time,
            average_completion_time_in_seconds: study.average_completion_time_in_seconds,
            is_confidential: study.is_confidential,
            is_ongoing_study: study.is_ongoing_study,
            submission_started_at: study.submission_started_at,
            pii_enabled: study.pii.enabled,
            study_labels: study.study_labels,
            ai_inferred_study_labels: study.ai_inferred_study_labels,
            previous_submission_count: study.previous_submission_count,
        })
        .collect();

    Ok(NormalizedStudiesResponse {
        results,
        links: StudiesLinks::from_api(raw.links),
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_places_available() {
        let body = serde_json::json!({
            "results": [
                {
                    "id": "s1",
                    "name": "Study One",
                    "total_available_places": 10,
                    "places_taken": 4,
                    "study_reward": {"amount": 1.5, "currency": "GBP"}
                },
                {
                    "id": "s2",
                    "name": "Overbooked",
                    "total_available_places": 3,
                    "places_taken": 7
                }
            ]
        });
        let Ok(encoded) = serde_json::to_vec(&body) else {
            panic!("encode failed");
        };

        let Ok(normalized) = normalize_studies_response(&encoded) else {
            panic!("normalize failed");
        };
        assert_eq!(normalized.results.len(), 2);

        let Some(first) = normalized.results.first() else {
            panic!("missing first study");
        };
        assert_eq!(first.places_available, 6);
        assert!((first.reward.amount - 1.5).abs() < f64::EPSILON);

        let Some(second) = normalized.results.get(1) else {
            panic!("missing second study");
        };
        assert_eq!(second.places_available, 0);
    }

    #[test]
    fn rejects_missing_results() {
        let err = normalize_studies_response(br#"{"meta": {}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_array_results() {
        let err = normalize_studies_response(br#"{"results": {"id": "s1"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_object_payload() {
        let err = normalize_studies_response(b"[]");
        assert!(err.is_err());
    }
}
