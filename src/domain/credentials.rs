//! Captured credential and header state relayed by the capture agent.
//!
//! The watcher never performs the platform's authentication flow itself; it
//! consumes a bearer token and a request-header capture that the browser-side
//! agent intercepted, and replays them on upstream polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token payload accepted from the capture agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredToken {
    /// The captured access token.
    pub access_token: String,
    /// Token scheme; defaults to `"Bearer"` when empty.
    #[serde(default)]
    pub token_type: String,
    /// Storage key the token was captured from.
    #[serde(default)]
    pub key: String,
    /// Origin the capture agent observed the token on.
    #[serde(default)]
    pub origin: String,
    /// Browser locale/timezone hint, replayed on upstream polls.
    #[serde(default)]
    pub browser_info: String,
    /// When the token was received; filled server-side when absent.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

/// One captured request header, order-significant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedHeader {
    /// Header name as sent by the browser.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// A full request-header capture for the studies collection endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadersCapture {
    /// URL the capture was taken against.
    pub url: String,
    /// HTTP method; defaults to `"GET"` when empty.
    #[serde(default)]
    pub method: String,
    /// Ordered header list as observed.
    pub headers: Vec<CapturedHeader>,
    /// When the capture was taken; filled server-side when absent.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// Masks a token for status reporting: first 8 and last 4 characters.
#[must_use]
pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 {
        return "***".to_string();
    }
    let head: String = token.chars().take(8).collect();
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn short_tokens_fully_masked() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("123456789012"), "***");
    }

    #[test]
    fn long_tokens_keep_edges() {
        assert_eq!(mask_token("abcdefgh-middle-wxyz"), "abcdefgh...wxyz");
    }
}
