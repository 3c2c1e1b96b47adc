//! The authoritative message log.
//!
//! [`MessageStore`] layers the ownership rules on top of [`Database`]:
//! only the sender may edit or delete a message, only the recipient may mark
//! it read. Every committed mutation is published on a table-wide change
//! feed, in commit order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parley_shared::constants::DEFAULT_FEED_CAPACITY;
use parley_shared::validation::{validate_edit, validate_new_message, validate_participants};
use parley_shared::{Attachment, ChangeEnvelope, Message, MessageId, UserId};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Envelopes buffered per feed subscriber before it starts lagging.
    pub feed_capacity: usize,
    /// Outbound create/edit/delete operations allowed per user per minute;
    /// zero disables the throttle.
    pub outbound_per_minute: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            feed_capacity: DEFAULT_FEED_CAPACITY,
            outbound_per_minute: 0,
        }
    }
}

struct Inner {
    db: Database,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    /// Microsecond timestamps, strictly increasing within this store.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last_created_at {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_created_at = Some(now);
        now
    }
}

/// Only the sender may change a message's content or existence. Someone
/// outside the conversation gets the same answer as for a missing id.
fn check_sender(message: &Message, requester: &UserId) -> Result<()> {
    if &message.sender_id == requester {
        Ok(())
    } else if message.counterpart_of(requester).is_none() {
        Err(StoreError::NotFound)
    } else {
        Err(StoreError::PermissionDenied)
    }
}

#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<Mutex<Inner>>,
    feed: broadcast::Sender<ChangeEnvelope>,
    limiter: Option<RateLimiter<UserId>>,
}

impl MessageStore {
    pub fn new(db: Database, options: StoreOptions) -> Result<Self> {
        let last_created_at = db.latest_created_at()?;
        let (feed, _) = broadcast::channel(options.feed_capacity.max(1));
        let limiter = (options.outbound_per_minute > 0)
            .then(|| RateLimiter::per_minute(options.outbound_per_minute));

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                db,
                last_created_at,
            })),
            feed,
            limiter,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory()?, StoreOptions::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn throttle(&self, user: &UserId) -> Result<()> {
        if let Some(limiter) = &self.limiter {
            if !limiter.check(user.clone()) {
                warn!(user = %user, "Outbound rate limit exceeded");
                return Err(StoreError::RateLimited(user.to_string()));
            }
        }
        Ok(())
    }

    fn publish(&self, envelope: ChangeEnvelope) {
        // no subscribers is not an error
        let _ = self.feed.send(envelope);
    }

    /// Subscribe to every change on the message table.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEnvelope> {
        self.feed.subscribe()
    }

    pub fn create(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message> {
        validate_participants(sender, recipient)?;
        validate_new_message(content, attachment.as_ref())?;
        self.throttle(sender)?;

        let mut inner = self.lock()?;
        let message = Message {
            id: MessageId::new(),
            sender_id: sender.clone(),
            recipient_id: recipient.clone(),
            content: content.to_string(),
            attachment,
            read: false,
            created_at: inner.next_timestamp(),
        };
        inner.db.insert_message(&message)?;
        self.publish(ChangeEnvelope::insert(&message));

        info!(msg_id = %message.id, sender = %sender, recipient = %recipient, "Message created");
        Ok(message)
    }

    pub fn edit_content(
        &self,
        id: MessageId,
        requester: &UserId,
        new_content: &str,
    ) -> Result<Message> {
        validate_edit(new_content)?;

        let inner = self.lock()?;
        let existing = inner.db.get_message(id)?;
        if let Err(e) = check_sender(&existing, requester) {
            warn!(msg_id = %id, requester = %requester, "Edit refused: not the sender");
            return Err(e);
        }
        self.throttle(requester)?;

        if !inner.db.update_content(id, new_content)? {
            return Err(StoreError::NotFound);
        }
        let updated = Message {
            content: new_content.to_string(),
            ..existing.clone()
        };
        self.publish(ChangeEnvelope::update(&existing, &updated));

        debug!(msg_id = %id, "Message edited");
        Ok(updated)
    }

    pub fn delete(&self, id: MessageId, requester: &UserId) -> Result<()> {
        let inner = self.lock()?;
        let existing = inner.db.get_message(id)?;
        if let Err(e) = check_sender(&existing, requester) {
            warn!(msg_id = %id, requester = %requester, "Delete refused: not the sender");
            return Err(e);
        }
        self.throttle(requester)?;

        if !inner.db.delete_message(id)? {
            return Err(StoreError::NotFound);
        }
        self.publish(ChangeEnvelope::delete(&existing));

        debug!(msg_id = %id, "Message deleted");
        Ok(())
    }

    /// Mark a batch read on behalf of `requester`.
    ///
    /// The whole batch is refused if any surviving message was sent by the
    /// requester. Vanished ids, messages the requester takes no part in and
    /// already-read messages are skipped alike. Returns how many messages
    /// actually flipped.
    pub fn mark_read(&self, ids: &[MessageId], requester: &UserId) -> Result<usize> {
        let inner = self.lock()?;
        let tx = inner.db.conn().unchecked_transaction()?;

        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            match inner.db.get_message(*id) {
                Ok(m) if m.counterpart_of(requester).is_none() => {
                    debug!(msg_id = %id, "Mark-read skipped message outside the conversation")
                }
                Ok(m) if &m.recipient_id != requester => {
                    warn!(msg_id = %id, requester = %requester, "Mark-read refused: not the recipient");
                    return Err(StoreError::PermissionDenied);
                }
                Ok(m) => targets.push(m),
                Err(StoreError::NotFound) => debug!(msg_id = %id, "Mark-read skipped vanished message"),
                Err(e) => return Err(e),
            }
        }

        let target_ids: Vec<MessageId> = targets.iter().map(|m| m.id).collect();
        let changed = inner.db.set_read(&target_ids)?;
        tx.commit()?;

        for old in targets.iter().filter(|m| changed.contains(&m.id)) {
            let new = Message {
                read: true,
                ..old.clone()
            };
            self.publish(ChangeEnvelope::update(old, &new));
        }

        if !changed.is_empty() {
            debug!(count = changed.len(), reader = %requester, "Messages marked read");
        }
        Ok(changed.len())
    }

    /// Mark every unread message from `counterpart` to `reader` as read.
    pub fn mark_conversation_read(&self, reader: &UserId, counterpart: &UserId) -> Result<usize> {
        let ids = self.lock()?.db.unread_ids(counterpart, reader)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.mark_read(&ids, reader)
    }

    pub fn get(&self, id: MessageId) -> Result<Message> {
        self.lock()?.db.get_message(id)
    }

    pub fn list_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.lock()?.db.list_between(a, b)
    }

    pub fn list_for_participant(&self, viewer: &UserId) -> Result<Vec<Message>> {
        self.lock()?.db.list_for_participant(viewer)
    }

    pub fn unread_count(&self, viewer: &UserId, counterpart: &UserId) -> Result<usize> {
        self.lock()?.db.count_unread(viewer, counterpart)
    }

    pub fn upsert_profile(&self, user: &UserId, display_name: &str) -> Result<()> {
        self.lock()?.db.upsert_profile(user, display_name)
    }

    pub fn resolve_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>> {
        self.lock()?.db.resolve_names(ids)
    }
}
