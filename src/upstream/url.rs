//! Upstream URL normalization.
//!
//! Relayed captures name the endpoint they were taken against; only a small
//! set of platform endpoints is ever accepted, and each is normalized to a
//! canonical form before being stored or polled.

use url::Url;

use super::{STUDIES_COLLECTION_HOST, STUDIES_COLLECTION_PATH};

const PARTICIPANT_SUBMISSIONS_PATH: &str = "/api/v1/participant/submissions/";
const SUBMISSIONS_RESERVE_PATH: &str = "/api/v1/submissions/reserve/";

fn parse_platform_url(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?;
    if !host.eq_ignore_ascii_case(STUDIES_COLLECTION_HOST) {
        return None;
    }
    Some(parsed)
}

/// Normalizes a studies-collection URL, keeping its query string.
///
/// Returns `None` unless the URL targets the platform's studies collection
/// endpoint over https.
#[must_use]
pub fn normalize_studies_collection_url(raw: &str) -> Option<String> {
    let mut parsed = parse_platform_url(raw)?;

    let path = parsed.path().trim_end_matches('/');
    if path != STUDIES_COLLECTION_PATH.trim_end_matches('/') {
        return None;
    }

    parsed.set_path(STUDIES_COLLECTION_PATH);
    Some(parsed.to_string())
}

/// Normalizes a submission reserve/transition URL, dropping its query.
///
/// Accepted shapes: `/api/v1/submissions/reserve/` and
/// `/api/v1/submissions/{id}/transition/`.
#[must_use]
pub fn normalize_submission_url(raw: &str) -> Option<String> {
    let mut parsed = parse_platform_url(raw)?;

    if parsed.path() == SUBMISSIONS_RESERVE_PATH {
        parsed.set_path(SUBMISSIONS_RESERVE_PATH);
        parsed.set_query(None);
        return Some(parsed.to_string());
    }

    let parts: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .collect();
    if let [api, v1, submissions, id, transition] = parts.as_slice()
        && *api == "api"
        && *v1 == "v1"
        && *submissions == "submissions"
        && !id.is_empty()
        && *transition == "transition"
    {
        let canonical = format!("/api/v1/submissions/{id}/transition/");
        parsed.set_path(&canonical);
        parsed.set_query(None);
        return Some(parsed.to_string());
    }

    None
}

/// Normalizes a participant-submissions list URL, keeping its query.
#[must_use]
pub fn normalize_participant_submissions_url(raw: &str) -> Option<String> {
    let mut parsed = parse_platform_url(raw)?;

    let path = parsed.path().trim();
    if path != PARTICIPANT_SUBMISSIONS_PATH
        && path != PARTICIPANT_SUBMISSIONS_PATH.trim_end_matches('/')
    {
        return None;
    }

    parsed.set_path(PARTICIPANT_SUBMISSIONS_PATH);
    Some(parsed.to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn studies_url_normalizes_trailing_slash() {
        let normalized = normalize_studies_collection_url(
            "https://internal-api.prolific.com/api/v1/participant/studies?current=1",
        );
        assert_eq!(
            normalized.as_deref(),
            Some("https://internal-api.prolific.com/api/v1/participant/studies/?current=1")
        );
    }

    #[test]
    fn studies_url_rejects_wrong_host_or_scheme() {
        assert!(
            normalize_studies_collection_url("https://evil.example.com/api/v1/participant/studies/")
                .is_none()
        );
        assert!(
            normalize_studies_collection_url("http://internal-api.prolific.com/api/v1/participant/studies/")
                .is_none()
        );
        assert!(
            normalize_studies_collection_url("https://internal-api.prolific.com/api/v1/other/")
                .is_none()
        );
    }

    #[test]
    fn submission_reserve_url_drops_query() {
        let normalized = normalize_submission_url(
            "https://internal-api.prolific.com/api/v1/submissions/reserve/?foo=1",
        );
        assert_eq!(
            normalized.as_deref(),
            Some("https://internal-api.prolific.com/api/v1/submissions/reserve/")
        );
    }

    #[test]
    fn submission_transition_url_accepted() {
        let normalized = normalize_submission_url(
            "https://internal-api.prolific.com/api/v1/submissions/sub-42/transition?x=1",
        );
        assert_eq!(
            normalized.as_deref(),
            Some("https://internal-api.prolific.com/api/v1/submissions/sub-42/transition/")
        );
    }

    #[test]
    fn submission_url_rejects_other_paths() {
        assert!(
            normalize_submission_url("https://internal-api.prolific.com/api/v1/submissions/")
                .is_none()
        );
        assert!(
            normalize_submission_url(
                "https://internal-api.prolific.com/api/v1/submissions/x/y/transition/"
            )
            .is_none()
        );
    }

    #[test]
    fn participant_submissions_url_accepts_both_slash_forms() {
        let with_slash = normalize_participant_submissions_url(
            "https://internal-api.prolific.com/api/v1/participant/submissions/",
        );
        assert!(with_slash.is_some());

        let without_slash = normalize_participant_submissions_url(
            "https://internal-api.prolific.com/api/v1/participant/submissions",
        );
        assert_eq!(with_slash, without_slash);
    }
}
