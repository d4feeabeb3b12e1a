//! Single-row state stores: token, header capture, and refresh state.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::sqlite::{format_timestamp, is_busy, parse_timestamp, utc_now_or};
use crate::domain::{CapturedHeader, HeadersCapture, RefreshState, StoredToken};
use crate::error::WatcherError;

const MAX_BUSY_RETRIES: u32 = 5;

/// Store for the single captured-token row.
#[derive(Debug, Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    /// Creates a token store over the shared pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists the captured token, overwriting any previous row.
    ///
    /// An empty token type defaults to `"Bearer"`; a missing received-at
    /// is stamped with the current instant.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn set(&self, token: &StoredToken) -> Result<(), WatcherError> {
        let token_type = if token.token_type.is_empty() {
            "Bearer"
        } else {
            token.token_type.as_str()
        };
        let received_at = utc_now_or(token.received_at);

        sqlx::query(
            "INSERT INTO token_state (id, access_token, token_type, storage_key, origin, browser_info, received_at)
             VALUES (1, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               access_token = excluded.access_token,
               token_type = excluded.token_type,
               storage_key = excluded.storage_key,
               origin = excluded.origin,
               browser_info = excluded.browser_info,
               received_at = excluded.received_at",
        )
        .bind(&token.access_token)
        .bind(token_type)
        .bind(&token.key)
        .bind(&token.origin)
        .bind(&token.browser_info)
        .bind(format_timestamp(received_at))
        .execute(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        Ok(())
    }

    /// Loads the stored token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn get(&self) -> Result<Option<StoredToken>, WatcherError> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, String)>(
            "SELECT access_token, token_type, storage_key, origin, browser_info, received_at
             FROM token_state
             WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        Ok(row.map(
            |(access_token, token_type, key, origin, browser_info, received_at)| StoredToken {
                access_token,
                token_type: if token_type.is_empty() {
                    "Bearer".to_string()
                } else {
                    token_type
                },
                key,
                origin,
                browser_info,
                received_at: parse_timestamp(&received_at),
            },
        ))
    }

    /// Deletes the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn clear(&self) -> Result<(), WatcherError> {
        sqlx::query("DELETE FROM token_state WHERE id = 1")
            .execute(&self.pool)
            .await
            .map_err(WatcherError::storage)?;
        Ok(())
    }
}

/// Store for the single header-capture row.
#[derive(Debug, Clone)]
pub struct HeadersStore {
    pool: SqlitePool,
}

impl HeadersStore {
    /// Creates a headers store over the shared pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists the header capture, overwriting any previous row.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure or when the
    /// header list cannot be serialized.
    pub async fn set(&self, capture: &HeadersCapture) -> Result<(), WatcherError> {
        let method = if capture.method.is_empty() {
            "GET"
        } else {
            capture.method.as_str()
        };
        let captured_at = utc_now_or(capture.captured_at);
        let headers_json = serde_json::to_string(&capture.headers)
            .map_err(|e| WatcherError::Internal(format!("marshal captured headers: {e}")))?;

        sqlx::query(
            "INSERT INTO studies_headers_state (id, url, method, headers_json, captured_at)
             VALUES (1, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               url = excluded.url,
               method = excluded.method,
               headers_json = excluded.headers_json,
               captured_at = excluded.captured_at",
        )
        .bind(&capture.url)
        .bind(method)
        .bind(headers_json)
        .bind(format_timestamp(captured_at))
        .execute(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        Ok(())
    }

    /// Loads the stored header capture, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure or a corrupt
    /// header list.
    pub async fn get(&self) -> Result<Option<HeadersCapture>, WatcherError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT url, method, headers_json, captured_at
             FROM studies_headers_state
             WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        let Some((url, method, headers_json, captured_at)) = row else {
            return Ok(None);
        };

        let headers: Vec<CapturedHeader> = serde_json::from_str(&headers_json)
            .map_err(|e| WatcherError::Storage(format!("parse captured headers: {e}")))?;

        Ok(Some(HeadersCapture {
            url,
            method,
            headers,
            captured_at: parse_timestamp(&captured_at),
        }))
    }
}

/// Store for the single last-refresh state row.
#[derive(Debug, Clone)]
pub struct RefreshStateStore {
    pool: SqlitePool,
}

impl RefreshStateStore {
    /// Creates a refresh-state store over the shared pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Overwrites the last-refresh row.
    ///
    /// This path is hit concurrently by relayed capture-agent events, so
    /// transient busy errors are retried with a short linear backoff.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] once retries are exhausted or on
    /// a non-transient failure.
    pub async fn set_refresh(
        &self,
        observed_at: DateTime<Utc>,
        source: &str,
        url: &str,
        status_code: u16,
    ) -> Result<(), WatcherError> {
        let at = format_timestamp(observed_at);

        for attempt in 0..=MAX_BUSY_RETRIES {
            let result = sqlx::query(
                "INSERT INTO service_state (
                    id,
                    last_refresh_at,
                    last_refresh_source,
                    last_refresh_url,
                    last_refresh_status,
                    updated_at
                )
                VALUES (1, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    last_refresh_at = excluded.last_refresh_at,
                    last_refresh_source = excluded.last_refresh_source,
                    last_refresh_url = excluded.last_refresh_url,
                    last_refresh_status = excluded.last_refresh_status,
                    updated_at = excluded.updated_at",
            )
            .bind(&at)
            .bind(source)
            .bind(url)
            .bind(i64::from(status_code))
            .bind(format_timestamp(Utc::now()))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return Ok(()),
                Err(err) if is_busy(&err) && attempt < MAX_BUSY_RETRIES => {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        25 * u64::from(attempt + 1),
                    ))
                    .await;
                }
                Err(err) => return Err(WatcherError::storage(err)),
            }
        }

        Ok(())
    }

    /// Loads the last-refresh state, if any refresh was ever recorded.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Storage`] on database failure.
    pub async fn get_refresh(&self) -> Result<Option<RefreshState>, WatcherError> {
        let row = sqlx::query_as::<
            _,
            (
                Option<String>,
                Option<String>,
                Option<String>,
                Option<i64>,
                String,
            ),
        >(
            "SELECT
                last_refresh_at,
                last_refresh_source,
                last_refresh_url,
                last_refresh_status,
                updated_at
             FROM service_state
             WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(WatcherError::storage)?;

        let Some((last_at, source, url, status, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(RefreshState {
            last_refresh_at: last_at.as_deref().and_then(parse_timestamp),
            last_refresh_source: source.unwrap_or_default(),
            last_refresh_url: url.unwrap_or_default(),
            last_refresh_status: status
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or_default(),
            updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
        }))
    }
}
