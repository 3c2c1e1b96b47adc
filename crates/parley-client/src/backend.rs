//! Collaborator seams.
//!
//! The core talks to the message store, object storage, the change feed and
//! the profile lookup only through these traits. `parley-store` provides the
//! local implementations; tests plug in fakes to inject failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_shared::{Attachment, ChangeEnvelope, Message, MessageId, UserId};
use parley_store::{MessageStore, ObjectStore, StoreError};
use tokio::sync::broadcast;

use crate::error::{ClientError, UploadError};

#[async_trait]
pub trait MessageService: Send + Sync {
    async fn create(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, ClientError>;

    async fn edit_content(
        &self,
        id: MessageId,
        requester: &UserId,
        new_content: &str,
    ) -> Result<Message, ClientError>;

    async fn delete(&self, id: MessageId, requester: &UserId) -> Result<(), ClientError>;

    async fn mark_conversation_read(
        &self,
        reader: &UserId,
        counterpart: &UserId,
    ) -> Result<usize, ClientError>;

    async fn list_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, ClientError>;

    async fn list_for_participant(&self, viewer: &UserId) -> Result<Vec<Message>, ClientError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `key` and return its public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, UploadError>;
}

pub trait ChangeFeed: Send + Sync {
    /// Table-wide subscription; filtering happens client-side.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEnvelope>;
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn resolve_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, ClientError>;
}

/// Every collaborator a session or aggregator needs.
#[derive(Clone)]
pub struct Backend {
    pub messages: Arc<dyn MessageService>,
    pub feed: Arc<dyn ChangeFeed>,
    pub objects: Arc<dyn ObjectStorage>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

impl Backend {
    pub fn local(store: MessageStore, objects: ObjectStore) -> Self {
        let store = Arc::new(store);
        Self {
            messages: store.clone(),
            feed: store.clone(),
            objects: Arc::new(objects),
            profiles: store,
        }
    }
}

/// Run a synchronous store call on the blocking pool.
async fn blocking<T, F>(store: &MessageStore, f: F) -> Result<T, ClientError>
where
    T: Send + 'static,
    F: FnOnce(&MessageStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| ClientError::Transport(format!("store task failed: {e}")))?
        .map_err(ClientError::from)
}

#[async_trait]
impl MessageService for MessageStore {
    async fn create(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, ClientError> {
        let (sender, recipient, content) = (sender.clone(), recipient.clone(), content.to_string());
        blocking(self, move |s| s.create(&sender, &recipient, &content, attachment)).await
    }

    async fn edit_content(
        &self,
        id: MessageId,
        requester: &UserId,
        new_content: &str,
    ) -> Result<Message, ClientError> {
        let (requester, content) = (requester.clone(), new_content.to_string());
        blocking(self, move |s| s.edit_content(id, &requester, &content)).await
    }

    async fn delete(&self, id: MessageId, requester: &UserId) -> Result<(), ClientError> {
        let requester = requester.clone();
        blocking(self, move |s| MessageStore::delete(s, id, &requester)).await
    }

    async fn mark_conversation_read(
        &self,
        reader: &UserId,
        counterpart: &UserId,
    ) -> Result<usize, ClientError> {
        let (reader, counterpart) = (reader.clone(), counterpart.clone());
        blocking(self, move |s| {
            MessageStore::mark_conversation_read(s, &reader, &counterpart)
        })
        .await
    }

    async fn list_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, ClientError> {
        let (a, b) = (a.clone(), b.clone());
        blocking(self, move |s| MessageStore::list_between(s, &a, &b)).await
    }

    async fn list_for_participant(&self, viewer: &UserId) -> Result<Vec<Message>, ClientError> {
        let viewer = viewer.clone();
        blocking(self, move |s| MessageStore::list_for_participant(s, &viewer)).await
    }
}

impl ChangeFeed for MessageStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEnvelope> {
        MessageStore::subscribe(self)
    }
}

#[async_trait]
impl ProfileDirectory for MessageStore {
    async fn resolve_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, ClientError> {
        let ids = ids.to_vec();
        blocking(self, move |s| MessageStore::resolve_names(s, &ids)).await
    }
}

#[async_trait]
impl ObjectStorage for ObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, UploadError> {
        ObjectStore::put(self, key, &data, content_type)
            .await
            .map_err(|e| match e {
                StoreError::InvalidPath(reason) | StoreError::ObjectRejected(reason) => {
                    UploadError::Rejected(reason)
                }
                other => UploadError::TransportFailure(other.to_string()),
            })
    }
}
