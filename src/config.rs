//! Watcher configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), with sensible defaults for local use.

use std::net::SocketAddr;

/// Top-level watcher configuration.
///
/// Loaded once at startup via [`WatcherConfig::from_env`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Path of the SQLite database file.
    pub sqlite_path: String,

    /// Bounded mailbox capacity per fan-out subscriber.
    pub event_mailbox_capacity: usize,

    /// Timeout in seconds for the upstream poll request.
    pub upstream_timeout_secs: u64,
}

impl WatcherConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let sqlite_path =
            std::env::var("SQLITE_PATH").unwrap_or_else(|_| "prolific_watcher.db".to_string());

        let event_mailbox_capacity = parse_env("EVENT_MAILBOX_CAPACITY", 16);
        let upstream_timeout_secs = parse_env("UPSTREAM_TIMEOUT_SECS", 30);

        Ok(Self {
            listen_addr,
            sqlite_path,
            event_mailbox_capacity,
            upstream_timeout_secs,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
