//! Watcher error types with HTTP status code mapping.
//!
//! [`WatcherError`] is the central error type for the service. Each variant
//! maps to an HTTP status code and a structured JSON error response; the
//! WebSocket transport maps the same variants onto its `ok`/`error` frame
//! fields via [`WatcherError::public_message`].

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All REST error responses follow this shape:
/// ```json
/// {
///   "error": "refresh guard active",
///   "retry_after_seconds": 3
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Seconds until the client may retry (rate-limited responses only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Server-side error enum covering the watcher's failure classes.
///
/// | Variant          | Class                | HTTP Status |
/// |------------------|----------------------|-------------|
/// | Validation       | malformed input      | 400         |
/// | NotAuthenticated | no stored credential | 401         |
/// | NotFound         | state not yet stored | 404         |
/// | GuardDenied      | poll slot denied     | 429         |
/// | UpstreamRequest  | poll transport error | 502         |
/// | UpstreamStatus   | poll non-2xx status  | 502         |
/// | Unavailable      | store not configured | 503         |
/// | Storage          | persistence failure  | 500         |
/// | Internal         | everything else      | 500         |
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Request validation failed before any state mutation.
    #[error("{0}")]
    Validation(String),

    /// Refreshing or scheduling attempted with no stored credential.
    #[error("not authenticated: extension token sync required")]
    NotAuthenticated,

    /// A requested single-row state does not exist yet.
    #[error("{0}")]
    NotFound(String),

    /// The admission guard denied the upstream poll slot.
    #[error("refresh guard active")]
    GuardDenied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },

    /// The upstream poll failed at the transport level.
    #[error("request to upstream failed: {0}")]
    UpstreamRequest(String),

    /// The upstream poll completed with a non-success status.
    #[error("upstream status {0}")]
    UpstreamStatus(u16),

    /// A required collaborator is not configured.
    #[error("{0}")]
    Unavailable(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl WatcherError {
    /// Wraps a `sqlx` error as a [`WatcherError::Storage`].
    #[must_use]
    pub fn storage(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::GuardDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamRequest(_) | Self::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a connected client.
    ///
    /// Storage and internal failures are redacted; their detail stays in the
    /// server logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Seconds until retry for rate-limited outcomes, rounded up, floored
    /// at one second.
    #[must_use]
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::GuardDenied { retry_after } => {
                let mut seconds = retry_after.as_secs();
                if retry_after.subsec_nanos() > 0 {
                    seconds = seconds.saturating_add(1);
                }
                Some(seconds.max(1))
            }
            _ => None,
        }
    }
}

impl IntoResponse for WatcherError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.public_message(),
            retry_after_seconds: self.retry_after_seconds(),
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_by_class() {
        assert_eq!(
            WatcherError::Validation("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WatcherError::NotAuthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WatcherError::UpstreamStatus(503).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            WatcherError::Storage("busy".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn guard_denied_rounds_retry_up() {
        let err = WatcherError::GuardDenied {
            retry_after: Duration::from_millis(2300),
        };
        assert_eq!(err.retry_after_seconds(), Some(3));

        let sub_second = WatcherError::GuardDenied {
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(sub_second.retry_after_seconds(), Some(1));
    }

    #[test]
    fn internal_detail_is_redacted() {
        let err = WatcherError::Storage("connection refused at /tmp/db".to_string());
        assert_eq!(err.public_message(), "internal server error");

        let validation = WatcherError::Validation("missing access_token".to_string());
        assert_eq!(validation.public_message(), "missing access_token");
    }
}
