//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, MAX_OBJECT_SIZE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory holding attachment objects, shared with the clients.
    /// Env: `PARLEY_OBJECT_ROOT`
    /// Default: `./objects`
    pub object_root: PathBuf,

    /// Base of the URLs handed out for stored objects.
    /// Env: `PARLEY_PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Maximum object size in bytes.
    /// Env: `PARLEY_MAX_OBJECT_SIZE`
    /// Default: 50 MiB
    pub max_object_size: usize,

    /// Sustained requests per second per client IP.
    pub rate_per_sec: f64,

    /// Burst allowance per client IP.
    pub rate_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            object_root: PathBuf::from("./objects"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_object_size: MAX_OBJECT_SIZE,
            rate_per_sec: 10.0,
            rate_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("PARLEY_OBJECT_ROOT") {
            config.object_root = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PARLEY_PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(val) = std::env::var("PARLEY_MAX_OBJECT_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_object_size = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PARLEY_MAX_OBJECT_SIZE, using default");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
