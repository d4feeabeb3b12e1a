//! Watcher service: transport-agnostic processing functions.
//!
//! Every inbound trigger — WebSocket operation or REST ingest route — lands
//! on one of the `process_*` functions here, so there is exactly one
//! business-logic implementation regardless of transport. The service owns
//! the stores, the fan-out hub, the admission guard, and the delayed-refresh
//! scheduler; mutations persist first and publish events after commit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::guard::AdmissionGuard;
use super::scheduler::RefreshScheduler;
use crate::domain::{
    EventHub, HeadersCapture, RandomSource, RefreshPolicy, RefreshReport, StoredToken,
    SubmissionPhase, ThreadRngSource, WatcherEvent,
};
use crate::domain::study::NormalizedStudiesResponse;
use crate::domain::submission::{normalize_participant_list_item, normalize_submission_snapshot};
use crate::error::WatcherError;
use crate::persistence::models::{AvailabilityEvent, AvailabilitySummary, SubmissionState};
use crate::persistence::sqlite::utc_now_or;
use crate::persistence::{
    HeadersStore, RefreshStateStore, StudiesStore, SubmissionsStore, TokenStore,
};
use crate::upstream::{
    UpstreamClient, normalize_participant_submissions_url, normalize_studies_collection_url,
    normalize_submission_url,
};

/// Source tag for refreshes recorded by intercepted listing responses.
pub const INTERCEPTED_RESPONSE_SOURCE: &str = "extension.intercepted_response";
const MAX_CAPTURED_HEADERS: usize = 250;

/// Clear-token request payload; the reason feeds the cancellation log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearTokenRequest {
    /// Why the credential went away.
    #[serde(default)]
    pub reason: String,
}

/// Explicit scheduling request carrying a cadence policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleDelayedRefreshRequest {
    /// Cadence policy to normalize and arm.
    #[serde(default)]
    pub policy: RefreshPolicy,
    /// Trigger tag for logs; defaults to `extension.policy_update`.
    #[serde(default)]
    pub trigger: String,
}

/// An intercepted upstream response relayed by the capture agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterceptedResponse {
    /// URL the response was captured against.
    #[serde(default)]
    pub url: String,
    /// HTTP status of the captured response; 0 means unknown.
    #[serde(default)]
    pub status_code: u16,
    /// When the response was observed; filled server-side when absent.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    /// Raw response body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl InterceptedResponse {
    fn body_bytes(&self) -> Result<Vec<u8>, WatcherError> {
        if self.body.is_null() {
            return Err(WatcherError::Validation("body cannot be empty".to_string()));
        }
        serde_json::to_vec(&self.body)
            .map_err(|e| WatcherError::Internal(format!("encode relayed body: {e}")))
    }
}

/// Orchestration layer for every watcher operation.
pub struct WatcherService {
    token_store: TokenStore,
    headers_store: HeadersStore,
    state_store: RefreshStateStore,
    studies_store: StudiesStore,
    submissions_store: SubmissionsStore,
    event_hub: EventHub,
    pub(super) guard: AdmissionGuard,
    pub(super) scheduler: RefreshScheduler,
    pub(super) upstream: UpstreamClient,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl std::fmt::Debug for WatcherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherService")
            .field("guard", &self.guard)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl WatcherService {
    /// Creates the service over its stores, hub, and poll client.
    #[must_use]
    pub fn new(
        token_store: TokenStore,
        headers_store: HeadersStore,
        state_store: RefreshStateStore,
        studies_store: StudiesStore,
        submissions_store: SubmissionsStore,
        event_hub: EventHub,
        upstream: UpstreamClient,
    ) -> Self {
        Self::with_random_source(
            token_store,
            headers_store,
            state_store,
            studies_store,
            submissions_store,
            event_hub,
            upstream,
            Box::new(ThreadRngSource),
        )
    }

    /// Like [`WatcherService::new`] but with an injected jitter source, so
    /// tests can pin the scheduling plan.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn with_random_source(
        token_store: TokenStore,
        headers_store: HeadersStore,
        state_store: RefreshStateStore,
        studies_store: StudiesStore,
        submissions_store: SubmissionsStore,
        event_hub: EventHub,
        upstream: UpstreamClient,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            token_store,
            headers_store,
            state_store,
            studies_store,
            submissions_store,
            event_hub,
            guard: AdmissionGuard::new(),
            scheduler: RefreshScheduler::new(),
            upstream,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the fan-out hub shared with the transports.
    #[must_use]
    pub fn event_hub(&self) -> &EventHub {
        &self.event_hub
    }

    pub(super) fn plan_delays(&self, cfg: &RefreshPolicy) -> Vec<std::time::Duration> {
        let mut rng = self.lock_rng();
        crate::domain::refresh_policy::plan_refresh_delays(cfg, rng.as_mut())
    }

    fn lock_rng(&self) -> MutexGuard<'_, Box<dyn RandomSource>> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a relayed bearer token.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] without an access token,
    /// [`WatcherError::Storage`] on persistence failure.
    pub async fn process_receive_token(
        &self,
        token: StoredToken,
    ) -> Result<serde_json::Value, WatcherError> {
        if token.access_token.is_empty() {
            return Err(WatcherError::Validation("missing access_token".to_string()));
        }
        self.token_store.set(&token).await?;

        tracing::info!(
            origin = %token.origin,
            key = %token.key,
            browser_info = %token.browser_info,
            "token received"
        );
        Ok(json!({"success": true, "message": "token stored"}))
    }

    /// Clears the stored token and cancels any delayed-refresh plan.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on persistence failure.
    pub async fn process_clear_token(
        &self,
        request: ClearTokenRequest,
    ) -> Result<serde_json::Value, WatcherError> {
        self.token_store.clear().await?;

        let reason = if request.reason.trim().is_empty() {
            "extension.clear_token".to_string()
        } else {
            request.reason.trim().to_string()
        };
        self.cancel_delayed_refresh(&reason);

        tracing::info!(reason = %reason, "token cleared");
        Ok(json!({"success": true, "reason": reason}))
    }

    /// Stores a relayed header capture for later poll replay.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] for a non-collection URL or an
    /// empty/oversized header list, [`WatcherError::Storage`] on
    /// persistence failure.
    pub async fn process_receive_headers(
        &self,
        mut capture: HeadersCapture,
    ) -> Result<serde_json::Value, WatcherError> {
        let Some(normalized_url) = normalize_studies_collection_url(&capture.url) else {
            return Err(WatcherError::Validation(
                "url must target the studies collection endpoint".to_string(),
            ));
        };
        capture.url = normalized_url;

        if capture.headers.is_empty() {
            return Err(WatcherError::Validation("headers cannot be empty".to_string()));
        }
        if capture.headers.len() > MAX_CAPTURED_HEADERS {
            return Err(WatcherError::Validation(
                "too many headers in payload".to_string(),
            ));
        }

        self.headers_store.set(&capture).await?;

        tracing::info!(
            url = %capture.url,
            method = %capture.method,
            count = capture.headers.len(),
            "studies headers received"
        );
        Ok(json!({
            "success": true,
            "message": "studies headers stored",
            "count": capture.headers.len(),
        }))
    }

    /// Records a relayed refresh observation and, for successful
    /// capture-agent refreshes, arms the delayed-refresh plan.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] for a non-collection URL,
    /// [`WatcherError::Storage`] on persistence failure.
    pub async fn process_receive_refresh_report(
        self: Arc<Self>,
        mut report: RefreshReport,
    ) -> Result<serde_json::Value, WatcherError> {
        if !report.url.is_empty() {
            let Some(normalized_url) = normalize_studies_collection_url(&report.url) else {
                return Err(WatcherError::Validation(
                    "url must target the studies collection endpoint".to_string(),
                ));
            };
            report.url = normalized_url;
        }

        let observed_at = utc_now_or(report.observed_at);
        self.mark_refresh(observed_at, &report.source, &report.url, report.status_code)
            .await?;

        tracing::info!(
            source = %report.source,
            status_code = report.status_code,
            url = %report.url,
            "refresh report received"
        );

        if should_schedule_delayed_refresh(&report.source, report.status_code) {
            match self.can_schedule_delayed_refresh().await {
                Err(error) => {
                    tracing::warn!(
                        source = %report.source,
                        %error,
                        "delayed refresh skipped: token lookup failed"
                    );
                }
                Ok(false) => {
                    tracing::info!(
                        source = %report.source,
                        "delayed refresh skipped: not authenticated"
                    );
                }
                Ok(true) => {
                    Arc::clone(&self).schedule_delayed_refresh(
                        &report.source,
                        report.delayed_refresh_policy.as_ref(),
                    );
                }
            }
        }

        Ok(json!({"success": true}))
    }

    /// Replaces the delayed-refresh plan on an explicit scheduling request.
    ///
    /// With no stored credential the plan is cancelled instead and the
    /// response reports `scheduled: false`.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] when the token state cannot be read.
    pub async fn process_schedule_delayed_refresh(
        self: Arc<Self>,
        request: ScheduleDelayedRefreshRequest,
    ) -> Result<serde_json::Value, WatcherError> {
        let trigger = if request.trigger.trim().is_empty() {
            "extension.policy_update".to_string()
        } else {
            request.trigger.trim().to_string()
        };

        if !self.can_schedule_delayed_refresh().await? {
            self.cancel_delayed_refresh("extension.schedule.request_while_signed_out");
            return Ok(json!({
                "success": true,
                "trigger": trigger,
                "scheduled": false,
                "reason": "not authenticated",
            }));
        }

        Arc::clone(&self).schedule_delayed_refresh(&trigger, Some(&request.policy));
        Ok(json!({"success": true, "trigger": trigger}))
    }

    /// Ingests a relayed listing response: a non-success capture only
    /// updates the refresh state; a success runs the full pipeline.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] for a bad URL, empty body, or a
    /// payload that does not normalize; [`WatcherError::Storage`] when
    /// refresh state cannot be persisted.
    pub async fn process_receive_studies_response(
        &self,
        mut payload: InterceptedResponse,
    ) -> Result<serde_json::Value, WatcherError> {
        let Some(normalized_url) = normalize_studies_collection_url(&payload.url) else {
            return Err(WatcherError::Validation(
                "url must target the studies collection endpoint".to_string(),
            ));
        };
        payload.url = normalized_url;

        let body = payload.body_bytes()?;

        if payload.status_code != 0 && payload.status_code != 200 {
            let observed_at = utc_now_or(payload.observed_at);
            self.mark_refresh(
                observed_at,
                INTERCEPTED_RESPONSE_SOURCE,
                &payload.url,
                payload.status_code,
            )
            .await?;
            return Ok(json!({"success": true}));
        }

        let observed_at = utc_now_or(payload.observed_at);
        let (normalized, availability) = self
            .ingest_studies_payload(&body, observed_at, INTERCEPTED_RESPONSE_SOURCE, &payload.url, 200)
            .await
            .map_err(|error| {
                tracing::warn!(
                    source = INTERCEPTED_RESPONSE_SOURCE,
                    url = %payload.url,
                    %error,
                    "failed to ingest relayed studies response"
                );
                error
            })?;

        let mut response = json!({
            "success": true,
            "meta": {"count": normalized.results.len()},
        });
        if let Some(availability) = &availability {
            if let Ok(changes) = serde_json::to_value(availability)
                && let Some(map) = response.as_object_mut()
            {
                map.insert("changes".to_string(), changes);
            }
        }

        tracing::info!(
            source = INTERCEPTED_RESPONSE_SOURCE,
            count = normalized.results.len(),
            url = %payload.url,
            "relayed studies response ingested"
        );
        Ok(response)
    }

    /// Ingests one relayed submission response through the merge engine.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] for a bad URL, empty body, or a body
    /// lacking id/status; [`WatcherError::Storage`] on persistence failure.
    pub async fn process_receive_submission_response(
        &self,
        mut payload: InterceptedResponse,
    ) -> Result<serde_json::Value, WatcherError> {
        let Some(normalized_url) = normalize_submission_url(&payload.url) else {
            return Err(WatcherError::Validation(
                "url must target a submission endpoint".to_string(),
            ));
        };
        payload.url = normalized_url;

        let body = payload.body_bytes()?;
        let observed_at = utc_now_or(payload.observed_at);

        let snapshot = normalize_submission_snapshot(&body).map_err(|e| {
            tracing::warn!(
                source = "extension.intercepted_submission_response",
                url = %payload.url,
                error = %e,
                "failed to ingest submission response"
            );
            WatcherError::Validation(format!("failed to ingest submission response: {e}"))
        })?;
        let update = self
            .submissions_store
            .upsert_snapshot(&snapshot, observed_at)
            .await?;

        tracing::info!(
            source = "extension.intercepted_submission_response",
            url = %payload.url,
            submission_id = %update.submission_id,
            study_id = %update.study_id,
            status = %update.status,
            phase = %update.phase,
            "submission response ingested"
        );
        Ok(json!({"success": true, "submission": update}))
    }

    /// Ingests a relayed participant submissions list, merging each item
    /// and skipping the malformed ones.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] for a bad URL, empty body, or a body
    /// that is not a list envelope; [`WatcherError::Storage`] when an
    /// upsert fails.
    pub async fn process_receive_participant_submissions(
        &self,
        mut payload: InterceptedResponse,
    ) -> Result<serde_json::Value, WatcherError> {
        let Some(normalized_url) = normalize_participant_submissions_url(&payload.url) else {
            return Err(WatcherError::Validation(
                "url must target the participant submissions endpoint".to_string(),
            ));
        };
        payload.url = normalized_url;

        if payload.body.is_null() {
            return Err(WatcherError::Validation("body cannot be empty".to_string()));
        }
        if payload.status_code != 0 && payload.status_code != 200 {
            return Ok(json!({
                "success": true,
                "ignored": true,
                "status_code": payload.status_code,
            }));
        }

        let Some(results) = payload.body.get("results").and_then(|v| v.as_array()) else {
            return Err(WatcherError::Validation(
                "participant submissions payload missing results array".to_string(),
            ));
        };

        let observed_at = utc_now_or(payload.observed_at);
        let total = results.len();
        let mut upserted = 0usize;
        for item in results {
            let snapshot = match normalize_participant_list_item(item) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::warn!(%error, "skipping malformed participant submission item");
                    continue;
                }
            };
            self.submissions_store
                .upsert_snapshot(&snapshot, observed_at)
                .await?;
            upserted += 1;
        }

        tracing::info!(
            source = "extension.intercepted_participant_submissions_response",
            url = %payload.url,
            total,
            upserted,
            "participant submissions ingested"
        );
        Ok(json!({
            "success": true,
            "meta": {"total": total, "upserted": upserted},
        }))
    }

    /// Whether a delayed-refresh plan may be armed: a credential must exist.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] when the token state cannot be read.
    pub async fn can_schedule_delayed_refresh(&self) -> Result<bool, WatcherError> {
        Ok(self.token_store.get().await?.is_some())
    }

    /// Overwrites the last-refresh state and publishes `studies_refresh`.
    ///
    /// Publication happens after the write commits; a crash in between
    /// loses a notification, never a fact.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on persistence failure.
    pub async fn mark_refresh(
        &self,
        observed_at: DateTime<Utc>,
        source: &str,
        url: &str,
        status_code: u16,
    ) -> Result<(), WatcherError> {
        let source = if source.is_empty() { "unknown" } else { source };

        self.state_store
            .set_refresh(observed_at, source, url, status_code)
            .await?;

        self.event_hub.publish(&WatcherEvent::StudiesRefresh {
            source: source.to_string(),
            url: url.to_string(),
            status_code,
            observed_at,
        });
        Ok(())
    }

    /// Runs the ingest pipeline for a successful listing payload: record
    /// the refresh, persist history and the latest projection, reconcile
    /// availability, and publish `studies_updated` when anything changed.
    ///
    /// Persistence hiccups after normalization are logged and skipped so a
    /// partial storage outage cannot suppress the parts that did work; the
    /// reconciliation transaction itself stays all-or-nothing.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Validation`] when the payload does not normalize.
    pub async fn ingest_studies_payload(
        &self,
        body: &[u8],
        observed_at: DateTime<Utc>,
        source: &str,
        source_url: &str,
        status_code: u16,
    ) -> Result<(NormalizedStudiesResponse, Option<AvailabilitySummary>), WatcherError> {
        let status_code = if status_code == 0 { 200 } else { status_code };

        if let Err(error) = self
            .mark_refresh(observed_at, source, source_url, status_code)
            .await
        {
            tracing::warn!(%error, "failed to persist refresh state");
        }

        let normalized = crate::domain::study::normalize_studies_response(body)
            .map_err(WatcherError::Validation)?;

        if let Err(error) = self
            .studies_store
            .store_normalized(&normalized.results, observed_at)
            .await
        {
            tracing::warn!(%error, "failed to persist normalized studies");
        }

        let availability = match self
            .studies_store
            .reconcile_availability(&normalized.results, observed_at)
            .await
        {
            Ok(summary) => Some(summary),
            Err(error) => {
                tracing::warn!(%error, "availability reconciliation failed");
                None
            }
        };

        if let Some(summary) = &availability {
            for change in &summary.newly_available {
                tracing::info!(
                    event_type = "available",
                    study_id = %change.study_id,
                    name = %change.name,
                    "study availability changed"
                );
            }
            for change in &summary.became_unavailable {
                tracing::info!(
                    event_type = "unavailable",
                    study_id = %change.study_id,
                    name = %change.name,
                    "study availability changed"
                );
            }

            if summary.has_changes() {
                self.event_hub.publish(&WatcherEvent::StudiesUpdated {
                    newly_available: summary.newly_available.clone(),
                    became_unavailable: summary.became_unavailable.clone(),
                    new_count: summary.newly_available.len(),
                    gone_count: summary.became_unavailable.len(),
                    observed_at: summary.observed_at,
                });
            }
        }

        Ok((normalized, availability))
    }

    /// Loads the stored token, if any.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn stored_token(&self) -> Result<Option<StoredToken>, WatcherError> {
        self.token_store.get().await
    }

    /// Loads the stored header capture, if any.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn stored_headers(&self) -> Result<Option<HeadersCapture>, WatcherError> {
        self.headers_store.get().await
    }

    /// Loads the last-refresh state, if any.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn refresh_state(
        &self,
    ) -> Result<Option<crate::domain::RefreshState>, WatcherError> {
        self.state_store.get_refresh().await
    }

    /// Recent availability events, newest first.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn recent_availability_events(
        &self,
        limit: i64,
    ) -> Result<Vec<AvailabilityEvent>, WatcherError> {
        self.studies_store.recent_availability_events(limit).await
    }

    /// Currently available listings.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn current_available_studies(
        &self,
        limit: i64,
    ) -> Result<Vec<crate::domain::NormalizedStudy>, WatcherError> {
        self.studies_store.current_available_studies(limit).await
    }

    /// Current submission state, optionally phase-filtered.
    ///
    /// # Errors
    ///
    /// [`WatcherError::Storage`] on database failure.
    pub async fn current_submissions(
        &self,
        limit: i64,
        phase: Option<SubmissionPhase>,
    ) -> Result<Vec<SubmissionState>, WatcherError> {
        self.submissions_store.current_submissions(limit, phase).await
    }

    pub(super) fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub(super) fn headers_store(&self) -> &HeadersStore {
        &self.headers_store
    }
}

/// A delayed plan follows only successful refreshes the capture agent
/// itself observed.
#[must_use]
pub fn should_schedule_delayed_refresh(source: &str, status_code: u16) -> bool {
    status_code == 200 && source.starts_with("extension.")
}
