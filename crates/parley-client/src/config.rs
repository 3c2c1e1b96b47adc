//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a local client starts with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_shared::constants::{DEFAULT_FEED_CAPACITY, DEFAULT_HTTP_PORT, DEFAULT_POLL_INTERVAL_SECS};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `PARLEY_DB_PATH`
    /// Default: platform data dir, see `parley_store::database::default_data_dir`.
    pub db_path: Option<PathBuf>,

    /// Directory attachments are written to.
    /// Env: `PARLEY_OBJECT_ROOT`
    /// Default: `./objects`
    pub object_root: PathBuf,

    /// Base URL under which `parley-server` serves the object root.
    /// Env: `PARLEY_PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Fallback poll period.
    /// Env: `PARLEY_POLL_INTERVAL_SECS`
    pub poll_interval: Duration,

    /// Env: `PARLEY_FEED_CAPACITY`
    pub feed_capacity: usize,

    /// Outbound operations per user per minute (0 = unlimited).
    /// Env: `PARLEY_OUTBOUND_PER_MINUTE`
    pub outbound_per_minute: u32,

    pub max_object_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            object_root: PathBuf::from("./objects"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            outbound_per_minute: 0,
            max_object_size: parley_shared::constants::MAX_OBJECT_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PARLEY_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("PARLEY_OBJECT_ROOT") {
            config.object_root = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PARLEY_PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(secs) = parse_var::<u64>("PARLEY_POLL_INTERVAL_SECS") {
            if secs == 0 {
                tracing::warn!("PARLEY_POLL_INTERVAL_SECS must be positive, using default");
            } else {
                config.poll_interval = Duration::from_secs(secs);
            }
        }

        if let Some(capacity) = parse_var::<usize>("PARLEY_FEED_CAPACITY") {
            config.feed_capacity = capacity.max(1);
        }

        if let Some(limit) = parse_var::<u32>("PARLEY_OUTBOUND_PER_MINUTE") {
            config.outbound_per_minute = limit;
        }

        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
