//! # parley-client
//!
//! The synchronization core of Parley: per-conversation sessions with an
//! optimistic send path, the change feed and poll reconciliation, attachment
//! upload and the inbox aggregator.

pub mod aggregator;
pub mod backend;
pub mod cache;
pub mod config;
pub mod events;
pub mod feed;
pub mod session;
pub mod state;
pub mod uploader;

mod error;

use tracing_subscriber::{fmt, EnvFilter};

pub use aggregator::ConversationAggregator;
pub use backend::{Backend, ChangeFeed, MessageService, ObjectStorage, ProfileDirectory};
pub use config::ClientConfig;
pub use error::{ClientError, UploadError};
pub use events::SessionEvent;
pub use feed::{ChangeFeedClient, FeedSubscription};
pub use session::{ChatSession, Composer, SessionOptions, SessionPhase};
pub use state::ClientState;
pub use uploader::{AttachmentUploader, PendingAttachment};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    tracing::info!("Starting Parley client");
}
