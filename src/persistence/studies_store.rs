//! Listing persistence: history log, latest projection, active snapshot,
//! and the availability reconciliation transaction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{AvailabilityEvent, AvailabilityEventKind, AvailabilitySummary};
use super::sqlite::{format_timestamp, parse_timestamp};
use crate::domain::{NormalizedStudy, StudyChange};
use crate::error::WatcherError;

/// Default page size for the recent-events query.
pub const DEFAULT_RECENT_EVENTS_LIMIT: i64 = 50;
/// Hard cap for the recent-events query.
pub const MAX_RECENT_EVENTS_LIMIT: i64 = 1000;
/// Default page size for the current-studies query.
pub const DEFAULT_CURRENT_STUDIES_LIMIT: i64 = 200;
/// Hard cap for the current-studies query.
pub const MAX_CURRENT_STUDIES_LIMIT: i64 = 2000;

/// Store for listing history, the latest-payload projection, the active
/// snapshot, and the availability event log.
#[derive(Debug, Clone)]
pub struct StudiesStore {
    pool: SqlitePool,
}

impl StudiesStore {
    /// Creates a studies store over the shared pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends every observed listing to the history log and upserts the
    /// latest-payload projection, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure; the
    /// transaction rolls back as a whole.
    pub async fn store_normalized(
        &self,
        studies: &[NormalizedStudy],
        observed_at: DateTime<Utc>,
    ) -> Result<(), WatcherError> {
        if studies.is_empty() {
            return Ok(());
        }
        let at = format_timestamp(observed_at);

        let mut tx = self.pool.begin().await.map_err(WatcherError::storage)?;
        for study in studies {
            let payload = serde_json::to_string(study)
                .map_err(|e| WatcherError::Internal(format!("marshal study {}: {e}", study.id)))?;

            sqlx::query(
                "INSERT INTO studies_history (study_id, observed_at, payload_json)
                 VALUES (?, ?, ?)",
            )
            .bind(&study.id)
            .bind(&at)
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(WatcherError::storage)?;

            sqlx::query(
                "INSERT INTO studies_latest (study_id, name, payload_json, last_seen_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(study_id) DO UPDATE SET
                   name = excluded.name,
                   payload_json = excluded.payload_json,
                   last_seen_at = excluded.last_seen_at",
            )
            .bind(&study.id)
            .bind(&study.name)
            .bind(&payload)
            .bind(&at)
            .execute(&mut *tx)
            .await
            .map_err(WatcherError::storage)?;
        }
        tx.commit().await.map_err(WatcherError::storage)?;

        Ok(())
    }

    /// Diffs the observed listing set against the stored active snapshot,
    /// appends one availability event per transition, and replaces the
    /// snapshot — all in one transaction, so readers see either the fully
    /// old or fully new state.
    ///
    /// Listings with an empty id are skipped. Both transition lists come
    /// back sorted by study id.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure; the
    /// transaction rolls back as a whole.
    pub async fn reconcile_availability(
        &self,
        studies: &[NormalizedStudy],
        observed_at: DateTime<Utc>,
    ) -> Result<AvailabilitySummary, WatcherError> {
        let current: HashMap<&str, &str> = studies
            .iter()
            .filter(|study| !study.id.is_empty())
            .map(|study| (study.id.as_str(), study.name.as_str()))
            .collect();
        let at = format_timestamp(observed_at);

        let mut tx = self.pool.begin().await.map_err(WatcherError::storage)?;

        let previous_rows = sqlx::query_as::<_, (String, String)>(
            "SELECT study_id, name FROM studies_active_snapshot",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(WatcherError::storage)?;
        let previous: HashMap<String, String> = previous_rows.into_iter().collect();

        let mut newly_available: Vec<StudyChange> = Vec::new();
        for (&id, &name) in &current {
            if previous.contains_key(id) {
                continue;
            }
            newly_available.push(StudyChange {
                study_id: id.to_string(),
                name: name.to_string(),
            });
        }

        let mut became_unavailable: Vec<StudyChange> = Vec::new();
        for (id, name) in &previous {
            if current.contains_key(id.as_str()) {
                continue;
            }
            became_unavailable.push(StudyChange {
                study_id: id.clone(),
                name: name.clone(),
            });
        }

        for change in &newly_available {
            insert_availability_event(&mut tx, change, AvailabilityEventKind::Available, &at)
                .await?;
        }
        for change in &became_unavailable {
            insert_availability_event(&mut tx, change, AvailabilityEventKind::Unavailable, &at)
                .await?;
        }

        sqlx::query("DELETE FROM studies_active_snapshot")
            .execute(&mut *tx)
            .await
            .map_err(WatcherError::storage)?;
        for (&id, &name) in &current {
            sqlx::query(
                "INSERT INTO studies_active_snapshot (study_id, name, last_seen_at)
                 VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(&at)
            .execute(&mut *tx)
            .await
            .map_err(WatcherError::storage)?;
        }

        tx.commit().await.map_err(WatcherError::storage)?;

        newly_available.sort_by(|a, b| a.study_id.cmp(&b.study_id));
        became_unavailable.sort_by(|a, b| a.study_id.cmp(&b.study_id));

        Ok(AvailabilitySummary {
            observed_at,
            newly_available,
            became_unavailable,
        })
    }

    /// Returns the most recent availability events, newest first, each
    /// enriched with the latest known listing metadata.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn recent_availability_events(
        &self,
        limit: i64,
    ) -> Result<Vec<AvailabilityEvent>, WatcherError> {
        let limit = clamp_limit(limit, DEFAULT_RECENT_EVENTS_LIMIT, MAX_RECENT_EVENTS_LIMIT);

        let rows = sqlx::query_as::<_, (i64, String, String, String, String, Option<String>)>(
            "SELECT e.row_id, e.study_id, e.study_name, e.event_type, e.observed_at, l.payload_json
             FROM study_availability_events e
             LEFT JOIN studies_latest l ON l.study_id = e.study_id
             ORDER BY e.row_id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        let events = rows
            .into_iter()
            .map(
                |(row_id, study_id, study_name, event_type, observed_at, payload)| {
                    let kind = if event_type == "available" {
                        AvailabilityEventKind::Available
                    } else {
                        AvailabilityEventKind::Unavailable
                    };

                    let mut event = AvailabilityEvent {
                        row_id,
                        study_id,
                        study_name,
                        event_type: kind,
                        observed_at: parse_timestamp(&observed_at).unwrap_or_else(Utc::now),
                        reward: crate::domain::study::Money::default(),
                        average_reward_per_hour: crate::domain::study::Money::default(),
                        estimated_completion_time: 0,
                        total_available_places: 0,
                        places_available: 0,
                    };

                    if let Some(payload) = payload
                        && let Ok(study) = serde_json::from_str::<NormalizedStudy>(&payload)
                    {
                        event.reward = study.reward;
                        event.average_reward_per_hour = study.average_reward_per_hour;
                        event.estimated_completion_time = study.estimated_completion_time;
                        event.total_available_places = study.total_available_places;
                        event.places_available = study.places_available;
                    }

                    event
                },
            )
            .collect();

        Ok(events)
    }

    /// Returns the currently available listings from the snapshot joined
    /// with the latest-payload projection, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure or a corrupt
    /// stored payload.
    pub async fn current_available_studies(
        &self,
        limit: i64,
    ) -> Result<Vec<NormalizedStudy>, WatcherError> {
        let limit = clamp_limit(limit, DEFAULT_CURRENT_STUDIES_LIMIT, MAX_CURRENT_STUDIES_LIMIT);

        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT l.payload_json
             FROM studies_active_snapshot a
             JOIN studies_latest l ON l.study_id = a.study_id
             ORDER BY
               a.last_seen_at ASC,
               json_extract(l.payload_json, '$.published_at') ASC,
               json_extract(l.payload_json, '$.date_created') ASC,
               l.study_id ASC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str::<NormalizedStudy>(&payload)
                    .map_err(|e| WatcherError::Storage(format!("parse stored study payload: {e}")))
            })
            .collect()
    }
}

async fn insert_availability_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    change: &StudyChange,
    kind: AvailabilityEventKind,
    at: &str,
) -> Result<(), WatcherError> {
    sqlx::query(
        "INSERT INTO study_availability_events (study_id, study_name, event_type, observed_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&change.study_id)
    .bind(&change.name)
    .bind(kind.as_str())
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(WatcherError::storage)?;
    Ok(())
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
    use crate::persistence::sqlite::memory_pool;

    fn study(id: &str, name: &str) -> NormalizedStudy {
        NormalizedStudy {
            id: id.to_string(),
            name: name.to_string(),
            total_available_places: 10,
            places_taken: 2,
            places_available: 8,
            estimated_completion_time: 5,
            ..NormalizedStudy::default()
        }
    }

    #[tokio::test]
    async fn reconcile_emits_sorted_transitions() {
        let store = StudiesStore::new(memory_pool().await);
        let now = Utc::now();

        let initial = vec![study("a", "Study A"), study("b", "Study B")];
        let Ok(first) = store.reconcile_availability(&initial, now).await else {
            panic!("first reconcile failed");
        };
        assert_eq!(first.newly_available.len(), 2);
        assert!(first.became_unavailable.is_empty());

        let next = vec![study("c", "Study C"), study("b", "Study B")];
        let Ok(second) = store.reconcile_availability(&next, Utc::now()).await else {
            panic!("second reconcile failed");
        };
        assert_eq!(
            second.newly_available,
            vec![StudyChange {
                study_id: "c".to_string(),
                name: "Study C".to_string(),
            }]
        );
        assert_eq!(
            second.became_unavailable,
            vec![StudyChange {
                study_id: "a".to_string(),
                name: "Study A".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_for_same_set() {
        let store = StudiesStore::new(memory_pool().await);
        let studies = vec![study("a", "Study A"), study("b", "Study B")];
        let now = Utc::now();

        let Ok(_) = store.reconcile_availability(&studies, now).await else {
            panic!("first reconcile failed");
        };
        let Ok(replay) = store.reconcile_availability(&studies, now).await else {
            panic!("replay reconcile failed");
        };
        assert!(replay.newly_available.is_empty());
        assert!(replay.became_unavailable.is_empty());
    }

    #[tokio::test]
    async fn reconcile_skips_empty_ids() {
        let store = StudiesStore::new(memory_pool().await);
        let studies = vec![study("", "Ghost"), study("a", "Study A")];

        let Ok(summary) = store.reconcile_availability(&studies, Utc::now()).await else {
            panic!("reconcile failed");
        };
        assert_eq!(summary.newly_available.len(), 1);
    }

    #[tokio::test]
    async fn events_enriched_from_latest_projection() {
        let store = StudiesStore::new(memory_pool().await);
        let studies = vec![study("a", "Study A")];
        let now = Utc::now();

        let Ok(()) = store.store_normalized(&studies, now).await else {
            panic!("store failed");
        };
        let Ok(_) = store.reconcile_availability(&studies, now).await else {
            panic!("reconcile failed");
        };
        // Listing disappears; the unavailable event should still carry the
        // metadata captured while it was live.
        let Ok(_) = store.reconcile_availability(&[], Utc::now()).await else {
            panic!("empty reconcile failed");
        };

        let Ok(events) = store.recent_availability_events(10).await else {
            panic!("events query failed");
        };
        assert_eq!(events.len(), 2);
        let Some(latest) = events.first() else {
            panic!("missing event");
        };
        assert_eq!(latest.event_type, AvailabilityEventKind::Unavailable);
        assert_eq!(latest.places_available, 8);
        assert_eq!(latest.total_available_places, 10);
    }

    #[tokio::test]
    async fn current_studies_join_snapshot_and_latest() {
        let store = StudiesStore::new(memory_pool().await);
        let studies = vec![study("a", "Study A"), study("b", "Study B")];
        let now = Utc::now();

        let Ok(()) = store.store_normalized(&studies, now).await else {
            panic!("store failed");
        };
        let Ok(_) = store.reconcile_availability(&studies, now).await else {
            panic!("reconcile failed");
        };

        let Ok(available) = store.current_available_studies(10).await else {
            panic!("query failed");
        };
        assert_eq!(available.len(), 2);
    }

    #[test]
    fn limit_clamping() {
        assert_eq!(clamp_limit(0, 50, 1000), 50);
        assert_eq!(clamp_limit(-3, 50, 1000), 50);
        assert_eq!(clamp_limit(10, 50, 1000), 10);
        assert_eq!(clamp_limit(5000, 50, 1000), 1000);
    }
}
