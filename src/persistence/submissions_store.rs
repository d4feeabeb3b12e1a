//! Submission persistence: conflict-resolving merge and phase queries.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::SubmissionState;
use super::sqlite::{format_timestamp, parse_timestamp};
use crate::domain::submission::{UNKNOWN_STUDY_ID, UNKNOWN_STUDY_NAME};
use crate::domain::{SubmissionPhase, SubmissionSnapshot, SubmissionUpdate};
use crate::error::WatcherError;

/// Default page size for the submissions query.
pub const DEFAULT_SUBMISSIONS_LIMIT: i64 = 200;
/// Hard cap for the submissions query.
pub const MAX_SUBMISSIONS_LIMIT: i64 = 2000;

/// Store for canonical per-submission state.
#[derive(Debug, Clone)]
pub struct SubmissionsStore {
    pool: SqlitePool,
}

impl SubmissionsStore {
    /// Creates a submissions store over the shared pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Folds one observation into canonical state, keyed by submission id.
    ///
    /// The merge runs as a single conditional write — there is no separate
    /// read-then-write race window. Rules on conflict:
    /// - study id/name apply only when non-placeholder;
    /// - participant id applies only when non-empty;
    /// - status and phase always apply;
    /// - payload and observed-at are retained from the existing row only
    ///   for a submitted→submitted update whose existing payload carries a
    ///   `returned_at`/`completed_at` marker the new payload lacks, so a
    ///   coarser list-derived snapshot cannot erase an intercepted
    ///   terminal one.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Validation`] for a snapshot without an id or
    /// status, [`WatcherError::Storage`] on database failure.
    pub async fn upsert_snapshot(
        &self,
        snapshot: &SubmissionSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<SubmissionUpdate, WatcherError> {
        if snapshot.submission_id.trim().is_empty() {
            return Err(WatcherError::Validation("missing submission_id".to_string()));
        }
        if snapshot.status.trim().is_empty() {
            return Err(WatcherError::Validation("missing status".to_string()));
        }

        let payload = serde_json::to_string(&snapshot.payload)
            .map_err(|e| WatcherError::Internal(format!("marshal submission payload: {e}")))?;
        let at = format_timestamp(observed_at);

        sqlx::query(
            "INSERT INTO submissions (
                submission_id, study_id, study_name, participant_id, status, phase, payload_json, observed_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(submission_id) DO UPDATE SET
                study_id = CASE
                    WHEN excluded.study_id <> '' AND excluded.study_id <> 'unknown' THEN excluded.study_id
                    ELSE submissions.study_id
                END,
                study_name = CASE
                    WHEN excluded.study_name <> '' AND excluded.study_name <> 'Unknown Study' THEN excluded.study_name
                    ELSE submissions.study_name
                END,
                participant_id = CASE
                    WHEN excluded.participant_id <> '' THEN excluded.participant_id
                    ELSE submissions.participant_id
                END,
                status = excluded.status,
                phase = excluded.phase,
                payload_json = CASE
                    WHEN submissions.phase = excluded.phase
                        AND submissions.phase = 'submitted'
                        AND (
                            json_extract(submissions.payload_json, '$.returned_at') IS NOT NULL
                            OR json_extract(submissions.payload_json, '$.completed_at') IS NOT NULL
                        )
                        AND json_extract(excluded.payload_json, '$.returned_at') IS NULL
                        AND json_extract(excluded.payload_json, '$.completed_at') IS NULL
                    THEN submissions.payload_json
                    ELSE excluded.payload_json
                END,
                observed_at = CASE
                    WHEN submissions.phase = excluded.phase
                        AND submissions.phase = 'submitted'
                    THEN submissions.observed_at
                    ELSE excluded.observed_at
                END,
                updated_at = excluded.updated_at",
        )
        .bind(&snapshot.submission_id)
        .bind(&snapshot.study_id)
        .bind(&snapshot.study_name)
        .bind(&snapshot.participant_id)
        .bind(&snapshot.status)
        .bind(snapshot.phase.as_str())
        .bind(&payload)
        .bind(&at)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        Ok(SubmissionUpdate {
            submission_id: snapshot.submission_id.clone(),
            study_id: if snapshot.study_id.is_empty() {
                UNKNOWN_STUDY_ID.to_string()
            } else {
                snapshot.study_id.clone()
            },
            study_name: if snapshot.study_name.is_empty() {
                UNKNOWN_STUDY_NAME.to_string()
            } else {
                snapshot.study_name.clone()
            },
            status: snapshot.status.clone(),
            phase: snapshot.phase,
            observed_at,
        })
    }

    /// Returns current submission state, newest observation first,
    /// optionally filtered by phase.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn current_submissions(
        &self,
        limit: i64,
        phase: Option<SubmissionPhase>,
    ) -> Result<Vec<SubmissionState>, WatcherError> {
        let limit = clamp_limit(limit, DEFAULT_SUBMISSIONS_LIMIT, MAX_SUBMISSIONS_LIMIT);

        type Row = (
            String,
            String,
            String,
            Option<String>,
            String,
            String,
            String,
            String,
            String,
        );
        let query = match phase {
            Some(phase) => sqlx::query_as::<_, Row>(
                "SELECT submission_id, study_id, study_name, participant_id, status, phase, observed_at, updated_at, payload_json
                 FROM submissions
                 WHERE phase = ?
                 ORDER BY observed_at DESC, submission_id DESC
                 LIMIT ?",
            )
            .bind(phase.as_str())
            .bind(limit),
            None => sqlx::query_as::<_, Row>(
                "SELECT submission_id, study_id, study_name, participant_id, status, phase, observed_at, updated_at, payload_json
                 FROM submissions
                 ORDER BY observed_at DESC, submission_id DESC
                 LIMIT ?",
            )
            .bind(limit),
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(WatcherError::storage)?;

        rows.into_iter()
            .map(
                |(
                    submission_id,
                    study_id,
                    study_name,
                    participant_id,
                    status,
                    phase,
                    observed_at,
                    updated_at,
                    payload_json,
                )| {
                    let phase = SubmissionPhase::parse(&phase).ok_or_else(|| {
                        WatcherError::Storage(format!("unexpected stored phase {phase:?}"))
                    })?;
                    let payload = serde_json::from_str(&payload_json).map_err(|e| {
                        WatcherError::Storage(format!("parse stored submission payload: {e}"))
                    })?;

                    Ok(SubmissionState {
                        submission_id,
                        study_id,
                        study_name,
                        participant_id: participant_id.unwrap_or_default(),
                        status,
                        phase,
                        payload,
                        observed_at: parse_timestamp(&observed_at).unwrap_or_else(Utc::now),
                        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
                    })
                },
            )
            .collect()
    }
}

fn clamp_limit(value: i64, fallback: i64, max: i64) -> i64 {
    if value <= 0 {
        return fallback;
    }
    value.min(max)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::submission::phase_for_status;
    use crate::persistence::sqlite::memory_pool;

    fn snapshot(
        submission_id: &str,
        status: &str,
        study_id: &str,
        payload: serde_json::Value,
    ) -> SubmissionSnapshot {
        SubmissionSnapshot {
            submission_id: submission_id.to_string(),
            study_id: study_id.to_string(),
            study_name: if study_id == UNKNOWN_STUDY_ID {
                UNKNOWN_STUDY_NAME.to_string()
            } else {
                format!("Study {study_id}")
            },
            participant_id: "p-1".to_string(),
            status: status.to_string(),
            phase: phase_for_status(status),
            payload,
        }
    }

    async fn load_one(store: &SubmissionsStore, submission_id: &str) -> SubmissionState {
        let Ok(all) = store.current_submissions(100, None).await else {
            panic!("query failed");
        };
        let Some(found) = all.into_iter().find(|s| s.submission_id == submission_id) else {
            panic!("submission {submission_id} not found");
        };
        found
    }

    #[tokio::test]
    async fn first_observation_creates_row() {
        let store = SubmissionsStore::new(memory_pool().await);
        let snap = snapshot("sub-1", "RESERVED", "st-1", serde_json::json!({"k": 1}));

        let Ok(update) = store.upsert_snapshot(&snap, Utc::now()).await else {
            panic!("upsert failed");
        };
        assert_eq!(update.phase, SubmissionPhase::Submitting);

        let state = load_one(&store, "sub-1").await;
        assert_eq!(state.status, "RESERVED");
        assert_eq!(state.study_id, "st-1");
    }

    #[tokio::test]
    async fn terminal_payload_survives_coarser_snapshot() {
        let store = SubmissionsStore::new(memory_pool().await);

        let rich = snapshot(
            "sub-1",
            "AWAITING REVIEW",
            "st-1",
            serde_json::json!({"completed_at": "2026-01-01T00:00:00Z", "detail": "rich"}),
        );
        let first_at = Utc::now();
        let Ok(_) = store.upsert_snapshot(&rich, first_at).await else {
            panic!("rich upsert failed");
        };

        let coarse = snapshot(
            "sub-1",
            "APPROVED",
            "st-1",
            serde_json::json!({"detail": "coarse"}),
        );
        let Ok(_) = store.upsert_snapshot(&coarse, Utc::now()).await else {
            panic!("coarse upsert failed");
        };

        let state = load_one(&store, "sub-1").await;
        // Status and phase reflect the new observation...
        assert_eq!(state.status, "APPROVED");
        assert_eq!(state.phase, SubmissionPhase::Submitted);
        // ...but the terminal payload and its observation time are kept.
        assert_eq!(
            state.payload.get("detail").and_then(|v| v.as_str()),
            Some("rich")
        );
        assert_eq!(
            format_timestamp(state.observed_at),
            format_timestamp(first_at)
        );
    }

    #[tokio::test]
    async fn richer_payload_replaces_terminal_one() {
        let store = SubmissionsStore::new(memory_pool().await);

        let plain = snapshot(
            "sub-1",
            "AWAITING REVIEW",
            "st-1",
            serde_json::json!({"detail": "plain"}),
        );
        let Ok(_) = store.upsert_snapshot(&plain, Utc::now()).await else {
            panic!("plain upsert failed");
        };

        let terminal = snapshot(
            "sub-1",
            "RETURNED",
            "st-1",
            serde_json::json!({"returned_at": "2026-01-02T00:00:00Z"}),
        );
        let Ok(_) = store.upsert_snapshot(&terminal, Utc::now()).await else {
            panic!("terminal upsert failed");
        };

        let state = load_one(&store, "sub-1").await;
        assert!(state.payload.get("returned_at").is_some());
    }

    #[tokio::test]
    async fn placeholders_never_overwrite_real_values() {
        let store = SubmissionsStore::new(memory_pool().await);

        let real = snapshot("sub-1", "RESERVED", "st-1", serde_json::json!({}));
        let Ok(_) = store.upsert_snapshot(&real, Utc::now()).await else {
            panic!("real upsert failed");
        };

        let mut anonymous = snapshot(
            "sub-1",
            "ACTIVE",
            UNKNOWN_STUDY_ID,
            serde_json::json!({"step": 2}),
        );
        anonymous.participant_id = String::new();
        let Ok(_) = store.upsert_snapshot(&anonymous, Utc::now()).await else {
            panic!("anonymous upsert failed");
        };

        let state = load_one(&store, "sub-1").await;
        assert_eq!(state.study_id, "st-1");
        assert_eq!(state.study_name, "Study st-1");
        assert_eq!(state.participant_id, "p-1");
        assert_eq!(state.status, "ACTIVE");
    }

    #[tokio::test]
    async fn phase_transition_updates_payload_and_time() {
        let store = SubmissionsStore::new(memory_pool().await);

        let active = snapshot("sub-1", "ACTIVE", "st-1", serde_json::json!({"v": 1}));
        let Ok(_) = store.upsert_snapshot(&active, Utc::now()).await else {
            panic!("active upsert failed");
        };

        let reviewed = snapshot(
            "sub-1",
            "AWAITING REVIEW",
            "st-1",
            serde_json::json!({"v": 2}),
        );
        let later = Utc::now();
        let Ok(_) = store.upsert_snapshot(&reviewed, later).await else {
            panic!("reviewed upsert failed");
        };

        let state = load_one(&store, "sub-1").await;
        assert_eq!(state.payload.get("v").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(format_timestamp(state.observed_at), format_timestamp(later));
    }

    #[tokio::test]
    async fn phase_filter_limits_results() {
        let store = SubmissionsStore::new(memory_pool().await);

        let a = snapshot("sub-a", "ACTIVE", "st-1", serde_json::json!({}));
        let b = snapshot("sub-b", "APPROVED", "st-2", serde_json::json!({}));
        let Ok(_) = store.upsert_snapshot(&a, Utc::now()).await else {
            panic!("upsert a failed");
        };
        let Ok(_) = store.upsert_snapshot(&b, Utc::now()).await else {
            panic!("upsert b failed");
        };

        let Ok(submitting) = store
            .current_submissions(10, Some(SubmissionPhase::Submitting))
            .await
        else {
            panic!("submitting query failed");
        };
        assert_eq!(submitting.len(), 1);

        let Ok(all) = store.current_submissions(10, None).await else {
            panic!("all query failed");
        };
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn missing_id_rejected() {
        let store = SubmissionsStore::new(memory_pool().await);
        let snap = snapshot("  ", "ACTIVE", "st-1", serde_json::json!({}));
        let result = store.upsert_snapshot(&snap, Utc::now()).await;
        assert!(matches!(result, Err(WatcherError::Validation(_))));
    }
}
