//! # parley-server
//!
//! HTTP edge for Parley attachments.
//!
//! This binary provides:
//! - **Object serving**: the public URLs handed out by the attachment
//!   uploader resolve here, with the stored content type
//! - **Health check** for load balancers
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use parley_store::{ObjectStore, RateLimiter};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let objects = Arc::new(
        ObjectStore::new(
            config.object_root.clone(),
            config.public_base_url.clone(),
            config.max_object_size,
        )
        .await?,
    );

    let rate_limiter = RateLimiter::new(config.rate_per_sec, config.rate_burst);

    let http_addr = config.http_addr;
    let app_state = AppState {
        objects,
        rate_limiter: rate_limiter.clone(),
    };

    // every 5 minutes, evict buckets idle for more than 10
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0);
        }
    });

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
