//! SQLite wiring: single-writer pool, migrations, and busy classification.
//!
//! SQLite supports one writer at a time. The pool is capped at a single
//! connection so intra-process write contention cannot surface as
//! `SQLITE_BUSY`; cross-process contention still can, and write paths hit
//! concurrently by relayed events retry with a short linear backoff.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::WatcherError;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS token_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        access_token TEXT NOT NULL,
        token_type TEXT NOT NULL,
        storage_key TEXT,
        origin TEXT,
        browser_info TEXT,
        received_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS studies_headers_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        url TEXT NOT NULL,
        method TEXT NOT NULL,
        headers_json TEXT NOT NULL,
        captured_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS studies_latest (
        study_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS studies_history (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        payload_json TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS studies_active_snapshot (
        study_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS study_availability_events (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id TEXT NOT NULL,
        study_name TEXT NOT NULL,
        event_type TEXT NOT NULL CHECK (event_type IN ('available', 'unavailable')),
        observed_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS service_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_refresh_at TEXT,
        last_refresh_source TEXT,
        last_refresh_url TEXT,
        last_refresh_status INTEGER,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS submissions (
        submission_id TEXT PRIMARY KEY,
        study_id TEXT NOT NULL,
        study_name TEXT NOT NULL,
        participant_id TEXT,
        status TEXT NOT NULL,
        phase TEXT NOT NULL CHECK (phase IN ('submitting', 'submitted')),
        payload_json TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_studies_history_study_id ON studies_history(study_id)",
    "CREATE INDEX IF NOT EXISTS idx_studies_history_observed_at ON studies_history(observed_at)",
    "CREATE INDEX IF NOT EXISTS idx_availability_events_study_id ON study_availability_events(study_id)",
    "CREATE INDEX IF NOT EXISTS idx_availability_events_observed_at ON study_availability_events(observed_at)",
    "CREATE INDEX IF NOT EXISTS idx_submissions_phase ON submissions(phase)",
    "CREATE INDEX IF NOT EXISTS idx_submissions_observed_at ON submissions(observed_at)",
];

/// Opens (creating if missing) the database file and applies migrations.
///
/// # Errors
///
/// Returns [`WatcherError::Storage`] when the file cannot be opened or a
/// migration statement fails.
pub async fn connect(path: &str) -> Result<SqlitePool, WatcherError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(15));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(WatcherError::storage)?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Applies the schema statements; every statement is idempotent.
///
/// # Errors
///
/// Returns [`WatcherError::Storage`] when a statement fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), WatcherError> {
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(WatcherError::storage)?;
    }
    Ok(())
}

/// Classifies transient write-contention errors worth retrying.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            // SQLITE_BUSY (5) / SQLITE_LOCKED (6), including extended codes.
            if code == "5" || code == "6" || code == "517" || code == "262" {
                return true;
            }
        }
    }
    let message = err.to_string().to_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

/// Formats a timestamp in the fixed textual representation used everywhere:
/// RFC 3339 UTC with nanosecond precision.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses a stored timestamp; `None` when the text is malformed.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fills a missing observation time with the current UTC instant.
#[must_use]
pub fn utc_now_or(at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    at.unwrap_or_else(Utc::now)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    #[allow(clippy::panic)]
    let pool = match SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::new().in_memory(true))
        .await
    {
        Ok(pool) => pool,
        Err(err) => panic!("open in-memory sqlite: {err}"),
    };
    #[allow(clippy::panic)]
    if let Err(err) = run_migrations(&pool).await {
        panic!("apply migrations: {err}");
    }
    pool
}
