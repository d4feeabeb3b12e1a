//! Spoofed-header poll client.
//!
//! Upstream polls replay the browser's own request shape: the captured
//! header set (minus hop-by-hop, auth, and identity headers) in its original
//! order, followed by a fixed set of injected headers and the bearer
//! authorization built from the stored credential.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{CLIENT_VERSION, FRONTEND_ORIGIN, FRONTEND_REFERER};
use crate::domain::{HeadersCapture, StoredToken};
use crate::error::WatcherError;

/// Headers never replayed from a capture.
const SKIPPED_CAPTURE_HEADERS: &[&str] = &[
    "authorization",
    "user-agent",
    "host",
    "content-length",
    "connection",
];

/// Builds the ordered, deduplicated header list for an upstream poll.
///
/// Capture headers come first in their captured order; fixed injections and
/// the authorization header follow. The first occurrence of a name wins.
#[must_use]
pub fn build_studies_headers(
    token: &StoredToken,
    capture: Option<&HeadersCapture>,
) -> Vec<(String, String)> {
    let token_type = if token.token_type.trim().is_empty() {
        "Bearer"
    } else {
        token.token_type.trim()
    };
    let browser_info = if token.browser_info.trim().is_empty() {
        "UTC"
    } else {
        token.browser_info.trim()
    };

    let mut ordered: Vec<(String, String)> = Vec::new();
    let mut append = |name: &str, value: &str| {
        let name = name.trim().to_lowercase();
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            return;
        }
        if ordered.iter().any(|(existing, _)| existing == &name) {
            return;
        }
        ordered.push((name, value.to_string()));
    };

    if let Some(capture) = capture {
        for header in &capture.headers {
            let name = header.name.trim().to_lowercase();
            if name.is_empty() || SKIPPED_CAPTURE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            append(&name, &header.value);
        }
    }

    append("accept", "application/json, text/plain, */*");
    append("accept-language", "en-US,en;q=0.9");
    append("x-client-version", CLIENT_VERSION);
    append("x-browser-info", browser_info);
    append("origin", FRONTEND_ORIGIN);
    append("referer", FRONTEND_REFERER);
    append(
        "authorization",
        &format!("{token_type} {}", token.access_token),
    );

    ordered
}

/// Raw result of one upstream poll.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// HTTP status the poll observed.
    pub status: u16,
    /// Content type of the response, when present.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Thin wrapper around a shared [`reqwest::Client`] performing the poll.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    /// Creates a poll client with the given per-request timeout.
    #[must_use]
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Performs one `GET` against the studies collection endpoint with the
    /// replayed header set.
    ///
    /// Returns whatever the upstream answered — status classification is the
    /// caller's concern; only transport failures are errors here.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::UpstreamRequest`] when the request cannot be
    /// sent or the body cannot be read.
    pub async fn fetch_studies(
        &self,
        target_url: &str,
        token: &StoredToken,
        capture: Option<&HeadersCapture>,
    ) -> Result<UpstreamResponse, WatcherError> {
        let mut headers = HeaderMap::new();
        for (name, value) in build_studies_headers(token, capture) {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "skipping invalid captured header name");
                continue;
            };
            let Ok(header_value) = HeaderValue::from_str(&value) else {
                tracing::warn!(header = %name, "skipping invalid captured header value");
                continue;
            };
            headers.insert(header_name, header_value);
        }

        let response = self
            .http
            .get(target_url)
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| WatcherError::UpstreamRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| WatcherError::UpstreamRequest(e.to_string()))?
            .to_vec();

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::CapturedHeader;

    fn token() -> StoredToken {
        StoredToken {
            access_token: "tok-1".to_string(),
            token_type: String::new(),
            key: String::new(),
            origin: String::new(),
            browser_info: String::new(),
            received_at: None,
        }
    }

    #[test]
    fn capture_headers_come_first_in_order() {
        let capture = HeadersCapture {
            url: String::new(),
            method: "GET".to_string(),
            headers: vec![
                CapturedHeader {
                    name: "X-Trace".to_string(),
                    value: "abc".to_string(),
                },
                CapturedHeader {
                    name: "Accept".to_string(),
                    value: "text/html".to_string(),
                },
            ],
            captured_at: None,
        };

        let headers = build_studies_headers(&token(), Some(&capture));
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.first(), Some(&"x-trace"));
        // Captured accept wins over the injected default.
        let accept = headers.iter().find(|(n, _)| n == "accept");
        let Some((_, value)) = accept else {
            panic!("missing accept header");
        };
        assert_eq!(value, "text/html");
    }

    #[test]
    fn auth_and_identity_capture_headers_are_dropped() {
        let capture = HeadersCapture {
            url: String::new(),
            method: "GET".to_string(),
            headers: vec![
                CapturedHeader {
                    name: "Authorization".to_string(),
                    value: "Bearer stale".to_string(),
                },
                CapturedHeader {
                    name: "User-Agent".to_string(),
                    value: "SomeBrowser/1.0".to_string(),
                },
                CapturedHeader {
                    name: "Host".to_string(),
                    value: "example.com".to_string(),
                },
            ],
            captured_at: None,
        };

        let headers = build_studies_headers(&token(), Some(&capture));
        let auth = headers.iter().find(|(n, _)| n == "authorization");
        let Some((_, value)) = auth else {
            panic!("missing authorization header");
        };
        assert_eq!(value, "Bearer tok-1");
        assert!(!headers.iter().any(|(n, _)| n == "user-agent"));
        assert!(!headers.iter().any(|(n, _)| n == "host"));
    }

    #[test]
    fn defaults_injected_without_capture() {
        let headers = build_studies_headers(&token(), None);
        assert!(
            headers
                .iter()
                .any(|(n, v)| n == "x-browser-info" && v == "UTC")
        );
        assert!(headers.iter().any(|(n, v)| n == "origin" && v == FRONTEND_ORIGIN));
        assert!(
            headers
                .iter()
                .any(|(n, v)| n == "x-client-version" && v == CLIENT_VERSION)
        );
    }
}
