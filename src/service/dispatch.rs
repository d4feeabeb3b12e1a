//! Operation dispatcher shared by both inbound transports.
//!
//! WebSocket frames and REST ingest routes name the same operations; both
//! decode here and invoke the same processing function, so transport choice
//! never changes behavior.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::watcher_service::{
    ClearTokenRequest, InterceptedResponse, ScheduleDelayedRefreshRequest, WatcherService,
};
use crate::domain::{HeadersCapture, RefreshReport, StoredToken};
use crate::error::WatcherError;

/// Relay a captured bearer token.
pub const OP_RECEIVE_TOKEN: &str = "receive-token";
/// Drop the stored credential.
pub const OP_CLEAR_TOKEN: &str = "clear-token";
/// Relay a captured request-header set.
pub const OP_RECEIVE_STUDIES_HEADERS: &str = "receive-studies-headers";
/// Relay a refresh observation.
pub const OP_RECEIVE_STUDIES_REFRESH: &str = "receive-studies-refresh";
/// Relay an intercepted listing response.
pub const OP_RECEIVE_STUDIES_RESPONSE: &str = "receive-studies-response";
/// Relay an intercepted submission response.
pub const OP_RECEIVE_SUBMISSION_RESPONSE: &str = "receive-submission-response";
/// Relay an intercepted participant submissions list.
pub const OP_RECEIVE_PARTICIPANT_SUBMISSIONS: &str = "receive-participant-submissions-response";
/// Replace the delayed-refresh plan with an explicit policy.
pub const OP_SCHEDULE_DELAYED_REFRESH: &str = "schedule-delayed-refresh";

/// Routes one named operation to its processing function.
///
/// # Errors
///
/// [`WatcherError::Validation`] for an unknown operation or an undecodable
/// payload; otherwise whatever the processing function reports.
pub async fn dispatch(
    service: &Arc<WatcherService>,
    operation: &str,
    payload: Option<&serde_json::Value>,
) -> Result<serde_json::Value, WatcherError> {
    match operation {
        OP_RECEIVE_TOKEN => {
            let token: StoredToken = decode_payload(payload, true)?;
            service.process_receive_token(token).await
        }
        OP_CLEAR_TOKEN => {
            let request: ClearTokenRequest = decode_payload(payload, false)?;
            service.process_clear_token(request).await
        }
        OP_RECEIVE_STUDIES_HEADERS => {
            let capture: HeadersCapture = decode_payload(payload, true)?;
            service.process_receive_headers(capture).await
        }
        OP_RECEIVE_STUDIES_REFRESH => {
            let report: RefreshReport = decode_payload(payload, true)?;
            Arc::clone(service)
                .process_receive_refresh_report(report)
                .await
        }
        OP_RECEIVE_STUDIES_RESPONSE => {
            let response: InterceptedResponse = decode_payload(payload, true)?;
            service.process_receive_studies_response(response).await
        }
        OP_RECEIVE_SUBMISSION_RESPONSE => {
            let response: InterceptedResponse = decode_payload(payload, true)?;
            service.process_receive_submission_response(response).await
        }
        OP_RECEIVE_PARTICIPANT_SUBMISSIONS => {
            let response: InterceptedResponse = decode_payload(payload, true)?;
            service
                .process_receive_participant_submissions(response)
                .await
        }
        OP_SCHEDULE_DELAYED_REFRESH => {
            let request: ScheduleDelayedRefreshRequest = decode_payload(payload, true)?;
            Arc::clone(service)
                .process_schedule_delayed_refresh(request)
                .await
        }
        unknown => Err(WatcherError::Validation(format!(
            "unknown message type {unknown:?}"
        ))),
    }
}

/// Decodes an operation payload into its request shape.
///
/// A missing or `null` payload is an error for `required` operations and
/// the default request shape otherwise.
fn decode_payload<T: DeserializeOwned + Default>(
    payload: Option<&serde_json::Value>,
    required: bool,
) -> Result<T, WatcherError> {
    match payload {
        None | Some(serde_json::Value::Null) => {
            if required {
                Err(WatcherError::Validation("missing payload".to_string()))
            } else {
                Ok(T::default())
            }
        }
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| WatcherError::Validation(format!("invalid payload: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventHub, RandomSource};
    use crate::persistence::sqlite::memory_pool;
    use crate::persistence::{
        HeadersStore, RefreshStateStore, StudiesStore, SubmissionsStore, TokenStore,
    };
    use crate::upstream::UpstreamClient;

    struct FixedSource(f64);

    impl RandomSource for FixedSource {
        fn next_f64(&mut self) -> f64 {
            self.0
        }
    }

    async fn make_service() -> Arc<WatcherService> {
        let pool = memory_pool().await;
        Arc::new(WatcherService::with_random_source(
            TokenStore::new(pool.clone()),
            HeadersStore::new(pool.clone()),
            RefreshStateStore::new(pool.clone()),
            StudiesStore::new(pool.clone()),
            SubmissionsStore::new(pool),
            EventHub::new(16),
            UpstreamClient::new(
                reqwest::Client::new(),
                std::time::Duration::from_secs(30),
            ),
            Box::new(FixedSource(0.0)),
        ))
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let service = make_service().await;
        let result = dispatch(&service, "receive-everything", None).await;
        assert!(matches!(result, Err(WatcherError::Validation(_))));
    }

    #[tokio::test]
    async fn required_payload_must_be_present() {
        let service = make_service().await;
        let result = dispatch(&service, OP_RECEIVE_TOKEN, None).await;
        assert!(matches!(result, Err(WatcherError::Validation(_))));

        let null = serde_json::Value::Null;
        let result = dispatch(&service, OP_RECEIVE_TOKEN, Some(&null)).await;
        assert!(matches!(result, Err(WatcherError::Validation(_))));
    }

    #[tokio::test]
    async fn clear_token_payload_is_optional() {
        let service = make_service().await;
        let Ok(response) = dispatch(&service, OP_CLEAR_TOKEN, None).await else {
            panic!("clear-token without payload should succeed");
        };
        assert_eq!(
            response.get("reason").and_then(|v| v.as_str()),
            Some("extension.clear_token")
        );
    }

    #[tokio::test]
    async fn token_round_trips_through_dispatcher() {
        let service = make_service().await;
        let payload = serde_json::json!({"access_token": "tok-1"});

        let Ok(response) = dispatch(&service, OP_RECEIVE_TOKEN, Some(&payload)).await else {
            panic!("receive-token failed");
        };
        assert_eq!(
            response.get("success").and_then(|v| v.as_bool()),
            Some(true)
        );

        let Ok(Some(stored)) = service.stored_token().await else {
            panic!("token not stored");
        };
        assert_eq!(stored.access_token, "tok-1");
    }
}
