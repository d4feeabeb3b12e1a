//! Upstream poll paths: forced refresh and delayed-plan shots.
//!
//! Both paths funnel through the admission guard, poll with the replayed
//! header set, and feed successful payloads into the ingest pipeline. The
//! delayed plan arms one timer task per computed delay; each shot
//! re-validates its generation at fire time and treats a guard denial as a
//! skip, not a failure — it is one of several pre-planned shots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::guard::SlotDecision;
use super::watcher_service::WatcherService;
use crate::domain::study::NormalizedStudiesResponse;
use crate::domain::{HeadersCapture, RefreshPolicy, StoredToken};
use crate::error::WatcherError;
use crate::persistence::models::AvailabilitySummary;
use crate::persistence::sqlite::format_timestamp;
use crate::upstream::{STUDIES_COLLECTION_URL, normalize_studies_collection_url};

/// Source tag for shots fired by the delayed plan.
pub const DELAYED_REFRESH_SOURCE: &str = "service.delayed_after_extension";
/// Source tag for client-forced refreshes.
pub const FORCED_REFRESH_SOURCE: &str = "service.studies_refresh";

const FORCED_REFRESH_MIN_GAP: Duration = Duration::from_secs(5);

/// Result of a forced refresh once the guard granted the slot.
#[derive(Debug)]
pub enum ForceRefreshOutcome {
    /// The upstream payload normalized and ran the full ingest pipeline.
    Ingested {
        /// Normalized listing envelope.
        normalized: NormalizedStudiesResponse,
        /// Reconciliation result, when the pass ran.
        changes: Option<AvailabilitySummary>,
    },
    /// The upstream response is handed back raw: a non-success status, or
    /// a payload that did not normalize.
    Passthrough {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream content type, when present.
        content_type: Option<String>,
        /// Raw upstream body.
        body: Vec<u8>,
    },
}

impl WatcherService {
    /// Resolves everything an upstream poll needs: the stored credential,
    /// the optional header capture, and the target URL (the capture's URL
    /// when it normalizes, the fixed collection URL otherwise).
    ///
    /// # Errors
    ///
    /// [`WatcherError::NotAuthenticated`] without a stored token,
    /// [`WatcherError::Storage`] when state cannot be read.
    pub(super) async fn resolve_refresh_inputs(
        &self,
    ) -> Result<(StoredToken, Option<HeadersCapture>, String), WatcherError> {
        let Some(token) = self.token_store().get().await? else {
            return Err(WatcherError::NotAuthenticated);
        };

        let capture = self.headers_store().get().await?;
        let mut target_url = STUDIES_COLLECTION_URL.to_string();
        if let Some(capture) = &capture
            && let Some(normalized) = normalize_studies_collection_url(&capture.url)
        {
            target_url = normalized;
        }

        Ok((token, capture, target_url))
    }

    /// Performs one client-forced upstream poll through the guard.
    ///
    /// # Errors
    ///
    /// [`WatcherError::NotAuthenticated`] without a credential,
    /// [`WatcherError::GuardDenied`] when the slot is unavailable,
    /// [`WatcherError::UpstreamRequest`] on transport failure.
    pub async fn force_refresh(&self) -> Result<ForceRefreshOutcome, WatcherError> {
        let (token, capture, target_url) = self.resolve_refresh_inputs().await?;

        let _permit = match self.guard.acquire(FORCED_REFRESH_MIN_GAP) {
            SlotDecision::Granted(permit) => permit,
            SlotDecision::Denied { retry_after } => {
                return Err(WatcherError::GuardDenied { retry_after });
            }
        };

        let response = self
            .upstream
            .fetch_studies(&target_url, &token, capture.as_ref())
            .await?;

        if response.status != 200 {
            if let Err(error) = self
                .mark_refresh(Utc::now(), FORCED_REFRESH_SOURCE, &target_url, response.status)
                .await
            {
                tracing::warn!(source = FORCED_REFRESH_SOURCE, %error, "failed to persist refresh state");
            }
            return Ok(ForceRefreshOutcome::Passthrough {
                status: response.status,
                content_type: response.content_type,
                body: response.body,
            });
        }

        let observed_at = Utc::now();
        match self
            .ingest_studies_payload(
                &response.body,
                observed_at,
                FORCED_REFRESH_SOURCE,
                &target_url,
                response.status,
            )
            .await
        {
            Ok((normalized, changes)) => {
                tracing::info!(
                    count = normalized.results.len(),
                    target = %target_url,
                    "forced studies refresh completed"
                );
                Ok(ForceRefreshOutcome::Ingested {
                    normalized,
                    changes,
                })
            }
            Err(error) => {
                tracing::warn!(source = FORCED_REFRESH_SOURCE, %error, "forced refresh payload did not normalize");
                Ok(ForceRefreshOutcome::Passthrough {
                    status: response.status,
                    content_type: response.content_type,
                    body: response.body,
                })
            }
        }
    }

    /// Replaces the delayed-refresh plan: normalizes the policy, computes
    /// the jittered delays, bumps the generation, and arms one timer task
    /// per shot.
    pub fn schedule_delayed_refresh(
        self: Arc<Self>,
        trigger_source: &str,
        policy: Option<&RefreshPolicy>,
    ) {
        let cfg = RefreshPolicy::normalized(policy);
        let now = Utc::now();

        let delays = self.plan_delays(&cfg);
        let generation = self.scheduler.replace_plan();
        let run_total = delays.len();

        for (idx, delay) in delays.iter().copied().enumerate() {
            let service = Arc::clone(&self);
            let trigger = trigger_source.to_string();
            let shot_cfg = cfg.clone();
            let run_index = idx + 1;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !service.scheduler.is_current(generation) {
                    return;
                }
                if let Err(error) = service
                    .run_delayed_refresh(&trigger, &shot_cfg, run_index, run_total)
                    .await
                {
                    tracing::warn!(
                        trigger_source = %trigger,
                        run_index,
                        run_total,
                        %error,
                        "delayed refresh shot failed"
                    );
                }
            });
            self.scheduler.arm(handle.abort_handle());
        }

        let fire_at: Vec<String> = delays
            .iter()
            .map(|delay| {
                let offset =
                    chrono::TimeDelta::from_std(*delay).unwrap_or_else(|_| chrono::TimeDelta::zero());
                format_timestamp(now + offset)
            })
            .collect();

        tracing::info!(
            source = DELAYED_REFRESH_SOURCE,
            trigger_source,
            count = run_total,
            minimum_delay_seconds = cfg.minimum_delay_seconds,
            average_delay_seconds = cfg.average_delay_seconds,
            spread_seconds = cfg.spread_seconds,
            cycle_seconds = cfg.cycle_seconds,
            fire_at = fire_at.join(","),
            "delayed refresh scheduled"
        );
    }

    /// Cancels the delayed plan without arming anything.
    pub fn cancel_delayed_refresh(&self, reason: &str) {
        let stopped = self.scheduler.cancel();
        tracing::info!(reason, stopped, "delayed refresh plan cleared");
    }

    /// Runs one delayed shot: guard first, then poll and ingest. A denied
    /// slot is logged and skipped — never rescheduled.
    pub(super) async fn run_delayed_refresh(
        &self,
        trigger_source: &str,
        policy: &RefreshPolicy,
        run_index: usize,
        run_total: usize,
    ) -> Result<(), WatcherError> {
        let min_gap = Duration::from_secs(policy.minimum_delay_seconds.max(0) as u64);
        let _permit = match self.guard.acquire(min_gap) {
            SlotDecision::Granted(permit) => permit,
            SlotDecision::Denied { retry_after } => {
                tracing::info!(
                    trigger_source,
                    run_index,
                    run_total,
                    retry_after_seconds = retry_after.as_secs_f64(),
                    "delayed refresh shot skipped by guard"
                );
                return Ok(());
            }
        };

        let (token, capture, target_url) = self.resolve_refresh_inputs().await?;
        let response = self
            .upstream
            .fetch_studies(&target_url, &token, capture.as_ref())
            .await?;

        if response.status != 200 {
            if let Err(error) = self
                .mark_refresh(Utc::now(), DELAYED_REFRESH_SOURCE, &target_url, response.status)
                .await
            {
                tracing::warn!(source = DELAYED_REFRESH_SOURCE, %error, "failed to persist refresh state");
            }
            return Err(WatcherError::UpstreamStatus(response.status));
        }

        let observed_at = Utc::now();
        let (normalized, _availability) = self
            .ingest_studies_payload(
                &response.body,
                observed_at,
                DELAYED_REFRESH_SOURCE,
                &target_url,
                response.status,
            )
            .await?;

        tracing::info!(
            trigger_source,
            run_index,
            run_total,
            count = normalized.results.len(),
            target = %target_url,
            "delayed refresh completed"
        );
        Ok(())
    }
}
