//! Process-wide client state.
//!
//! [`ClientState`] owns the local store, the object store and the backend
//! built from them. Sessions and the inbox aggregator are created from it.

use parley_shared::UserId;
use parley_store::{Database, MessageStore, ObjectStore, StoreOptions};
use tracing::info;

use crate::aggregator::ConversationAggregator;
use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::session::{ChatSession, SessionOptions};

pub struct ClientState {
    config: ClientConfig,
    store: MessageStore,
    backend: Backend,
}

impl ClientState {
    pub async fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let store = MessageStore::new(
            db,
            StoreOptions {
                feed_capacity: config.feed_capacity,
                outbound_per_minute: config.outbound_per_minute,
            },
        )?;
        let objects = ObjectStore::new(
            config.object_root.clone(),
            config.public_base_url.clone(),
            config.max_object_size,
        )
        .await?;

        info!(
            objects = %config.object_root.display(),
            base_url = %config.public_base_url,
            "Client state ready"
        );

        Ok(Self {
            backend: Backend::local(store.clone(), objects),
            store,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Direct access to the local store, e.g. to seed profiles.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn session(&self, me: UserId, counterpart: UserId) -> Result<ChatSession, ClientError> {
        ChatSession::new(
            self.backend.clone(),
            me,
            counterpart,
            SessionOptions {
                poll_interval: self.config.poll_interval,
            },
        )
    }

    pub fn aggregator(&self) -> ConversationAggregator {
        ConversationAggregator::new(&self.backend)
    }
}
