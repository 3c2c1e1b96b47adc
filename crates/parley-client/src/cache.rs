//! Per-conversation message cache and the reconciliation rules.
//!
//! Two producers feed the cache: change-feed events through
//! [`ConversationCache::apply`] and the fallback poll through
//! [`ConversationCache::resync`]. Both are keyed by message id, so applying
//! the same event twice, or an event the poll already delivered, changes
//! nothing.

use parley_shared::{ChangeEvent, Message, MessageId, UserId};

/// What [`ConversationCache::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new message was inserted; `inbound` when the counterpart sent it.
    Inserted { inbound: bool },
    Updated,
    Removed,
    /// Irrelevant, duplicate, or about a message the cache does not hold.
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// What a resync did to the confirmed list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resynced {
    pub changed: bool,
    /// The snapshot brought in inbound messages the cache had not seen and
    /// that are still unread.
    pub new_unread_inbound: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationCache {
    me: UserId,
    counterpart: UserId,
    /// Store-confirmed messages, ascending `(created_at, id)`.
    confirmed: Vec<Message>,
    /// Optimistic entries awaiting the store, in send order.
    pending: Vec<Message>,
    /// Bumped on every change to `confirmed`.
    generation: u64,
}

impl ConversationCache {
    pub fn new(me: UserId, counterpart: UserId) -> Self {
        Self {
            me,
            counterpart,
            confirmed: Vec::new(),
            pending: Vec::new(),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> Applied {
        if !event.is_between(&self.me, &self.counterpart) {
            return Applied::Ignored;
        }
        match event {
            ChangeEvent::Insert(message) => {
                if self.insert_confirmed(message.clone()) {
                    Applied::Inserted {
                        inbound: message.sender_id == self.counterpart,
                    }
                } else {
                    Applied::Ignored
                }
            }
            ChangeEvent::Update(message) => {
                if self.replace(message.clone()) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
            ChangeEvent::Delete { id, .. } => {
                if self.remove(*id) {
                    Applied::Removed
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    /// Replace the confirmed list with a fresh `list_between` result.
    /// Pending entries survive.
    pub fn resync(&mut self, mut messages: Vec<Message>) -> Resynced {
        messages.retain(|m| m.is_between(&self.me, &self.counterpart));
        messages.sort_by_key(Message::sort_key);
        messages.dedup_by_key(|m| m.id);
        if messages == self.confirmed {
            return Resynced::default();
        }
        let new_unread_inbound = messages
            .iter()
            .any(|m| m.is_unread_for(&self.me) && self.position(m.id).is_none());
        self.confirmed = messages;
        self.generation += 1;
        Resynced {
            changed: true,
            new_unread_inbound,
        }
    }

    /// [`resync`](Self::resync) with a snapshot fetched while the cache was
    /// at `generation`. A snapshot overtaken by a local change is dropped and
    /// `None` returned; the next poll picks the state up again.
    pub fn resync_since(&mut self, generation: u64, messages: Vec<Message>) -> Option<Resynced> {
        if generation != self.generation {
            return None;
        }
        Some(self.resync(messages))
    }

    pub fn add_pending(&mut self, message: Message) {
        self.pending.push(message);
    }

    /// Swap a pending entry for the record the store returned. If the feed
    /// echo got there first, the pending entry is simply dropped.
    pub fn confirm(&mut self, temp_id: MessageId, message: Message) {
        self.pending.retain(|m| m.id != temp_id);
        self.insert_confirmed(message);
    }

    pub fn rollback(&mut self, temp_id: MessageId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|m| m.id != temp_id);
        self.pending.len() != before
    }

    /// Confirmed messages in order, then pending ones.
    pub fn messages(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .chain(self.pending.iter())
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> &[Message] {
        &self.pending
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.confirmed
            .iter()
            .chain(self.pending.iter())
            .find(|m| m.id == id)
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.iter().any(|m| m.id == id)
    }

    pub fn unread_inbound(&self) -> Vec<MessageId> {
        self.confirmed
            .iter()
            .filter(|m| m.is_unread_for(&self.me))
            .map(|m| m.id)
            .collect()
    }

    /// Reflect a successful mark-read without waiting for the feed.
    pub fn mark_inbound_read_locally(&mut self) -> usize {
        let mut flipped = 0;
        for m in self.confirmed.iter_mut().filter(|m| m.is_unread_for(&self.me)) {
            m.read = true;
            flipped += 1;
        }
        if flipped > 0 {
            self.generation += 1;
        }
        flipped
    }

    pub fn latest(&self) -> Option<&Message> {
        self.pending.last().or_else(|| self.confirmed.last())
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.pending.clear();
        self.generation += 1;
    }

    /// Store-side state of a message we hold, applied directly after a
    /// successful edit.
    pub(crate) fn replace(&mut self, message: Message) -> bool {
        match self.position(message.id) {
            Some(idx) => {
                self.confirmed[idx] = message;
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: MessageId) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.confirmed.remove(idx);
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.confirmed.iter().position(|m| m.id == id)
    }

    fn insert_confirmed(&mut self, message: Message) -> bool {
        if self.position(message.id).is_some() {
            return false;
        }
        let key = message.sort_key();
        // in-order delivery makes this an append
        let idx = self.confirmed.partition_point(|m| m.sort_key() <= key);
        self.confirmed.insert(idx, message);
        self.generation += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn msg(sender: &str, recipient: &str, content: &str, offset_ms: i64) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender.into(),
            recipient_id: recipient.into(),
            content: content.to_string(),
            attachment: None,
            read: false,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    fn cache() -> ConversationCache {
        ConversationCache::new("alice".into(), "bob".into())
    }

    #[test]
    fn insert_is_idempotent() {
        let mut cache = cache();
        let m = msg("bob", "alice", "hi", 0);
        let event = ChangeEvent::Insert(m.clone());

        assert_eq!(cache.apply(&event), Applied::Inserted { inbound: true });
        assert_eq!(cache.apply(&event), Applied::Ignored);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn out_of_order_insert_lands_in_order() {
        let mut cache = cache();
        let late = msg("alice", "bob", "second", 10);
        let early = msg("bob", "alice", "first", 0);

        cache.apply(&ChangeEvent::Insert(late.clone()));
        assert_eq!(
            cache.apply(&ChangeEvent::Insert(early.clone())),
            Applied::Inserted { inbound: true }
        );
        let ids: Vec<_> = cache.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[test]
    fn other_conversations_are_ignored() {
        let mut cache = cache();
        let stray = msg("bob", "carol", "hey carol", 0);
        assert_eq!(cache.apply(&ChangeEvent::Insert(stray)), Applied::Ignored);
        assert!(cache.is_empty());
    }

    #[test]
    fn update_replaces_in_place_and_skips_unknown() {
        let mut cache = cache();
        let a = msg("alice", "bob", "one", 0);
        let b = msg("bob", "alice", "two", 5);
        cache.resync(vec![a.clone(), b.clone()]);

        let mut edited = a.clone();
        edited.content = "one (edited)".into();
        assert_eq!(cache.apply(&ChangeEvent::Update(edited.clone())), Applied::Updated);
        assert_eq!(cache.apply(&ChangeEvent::Update(edited)), Applied::Updated);
        assert_eq!(cache.messages()[0].content, "one (edited)");
        assert_eq!(cache.messages()[1].id, b.id);

        let unknown = msg("alice", "bob", "never seen", 1);
        assert_eq!(cache.apply(&ChangeEvent::Update(unknown)), Applied::Ignored);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut cache = cache();
        let m = msg("alice", "bob", "oops", 0);
        cache.resync(vec![m.clone()]);

        let event = ChangeEvent::Delete {
            id: m.id,
            sender_id: m.sender_id.clone(),
            recipient_id: m.recipient_id.clone(),
        };
        assert_eq!(cache.apply(&event), Applied::Removed);
        assert_eq!(cache.apply(&event), Applied::Ignored);
        assert!(cache.is_empty());
    }

    #[test]
    fn resync_keeps_pending_and_reports_change() {
        let mut cache = cache();
        let pending = msg("alice", "bob", "sending…", 100);
        cache.add_pending(pending.clone());

        let a = msg("bob", "alice", "hello", 0);
        assert!(cache.resync(vec![a.clone()]).changed);
        assert_eq!(cache.resync(vec![a.clone()]), Resynced::default());

        let all = cache.messages();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, pending.id);
        assert!(cache.is_pending(pending.id));
    }

    #[test]
    fn confirm_after_echo_does_not_duplicate() {
        let mut cache = cache();
        let pending = msg("alice", "bob", "hello", 0);
        cache.add_pending(pending.clone());

        let stored = msg("alice", "bob", "hello", 1);
        cache.apply(&ChangeEvent::Insert(stored.clone()));
        cache.confirm(pending.id, stored.clone());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.messages()[0].id, stored.id);
        assert!(cache.pending().is_empty());
    }

    #[test]
    fn rollback_drops_only_pending() {
        let mut cache = cache();
        let confirmed = msg("bob", "alice", "hi", 0);
        cache.resync(vec![confirmed.clone()]);
        let pending = msg("alice", "bob", "reply", 1);
        cache.add_pending(pending.clone());

        assert!(cache.rollback(pending.id));
        assert!(!cache.rollback(pending.id));
        assert!(!cache.rollback(confirmed.id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unread_tracks_inbound_only() {
        let mut cache = cache();
        cache.resync(vec![
            msg("bob", "alice", "1", 0),
            msg("bob", "alice", "2", 1),
            msg("alice", "bob", "3", 2),
        ]);
        assert_eq!(cache.unread_inbound().len(), 2);
        assert_eq!(cache.mark_inbound_read_locally(), 2);
        assert!(cache.unread_inbound().is_empty());
        assert!(!cache.messages()[2].read);
    }

    #[test]
    fn resync_flags_only_unseen_unread_inbound() {
        let mut cache = cache();
        let mine = msg("alice", "bob", "hi", 0);
        assert_eq!(
            cache.resync(vec![mine.clone()]),
            Resynced {
                changed: true,
                new_unread_inbound: false,
            }
        );

        let reply = msg("bob", "alice", "hey", 1);
        assert!(cache.resync(vec![mine.clone(), reply.clone()]).new_unread_inbound);

        // already known, only its read flag moved
        let mut read_reply = reply.clone();
        read_reply.read = true;
        assert_eq!(
            cache.resync(vec![mine, read_reply]),
            Resynced {
                changed: true,
                new_unread_inbound: false,
            }
        );
    }

    #[test]
    fn feed_insert_then_poll_of_same_message_changes_nothing() {
        let mut cache = cache();
        let m = msg("bob", "alice", "hi", 0);
        cache.apply(&ChangeEvent::Insert(m.clone()));
        let before = cache.messages();

        assert_eq!(cache.resync(vec![m.clone()]), Resynced::default());
        assert_eq!(cache.messages(), before);

        // and the other way round
        let mut other = ConversationCache::new("alice".into(), "bob".into());
        other.resync(vec![m.clone()]);
        assert_eq!(other.apply(&ChangeEvent::Insert(m)), Applied::Ignored);
        assert_eq!(other.messages(), before);
    }

    #[test]
    fn feed_delete_then_poll_without_message_changes_nothing() {
        let mut cache = cache();
        let keep = msg("alice", "bob", "keep", 0);
        let gone = msg("alice", "bob", "gone", 1);
        cache.resync(vec![keep.clone(), gone.clone()]);

        cache.apply(&ChangeEvent::Delete {
            id: gone.id,
            sender_id: gone.sender_id.clone(),
            recipient_id: gone.recipient_id.clone(),
        });
        let before = cache.messages();

        assert_eq!(cache.resync(vec![keep.clone()]), Resynced::default());
        assert_eq!(cache.messages(), before);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, keep.id);
    }

    #[test]
    fn snapshot_older_than_local_confirm_is_dropped() {
        let mut cache = cache();
        let pending = msg("alice", "bob", "hi", 0);
        cache.add_pending(pending.clone());
        let before_send = cache.generation();

        let stored = msg("alice", "bob", "hi", 1);
        cache.confirm(pending.id, stored.clone());

        // the snapshot predates the create
        assert_eq!(cache.resync_since(before_send, Vec::new()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.messages()[0].id, stored.id);

        let current = cache.generation();
        assert_eq!(
            cache.resync_since(current, vec![stored]),
            Some(Resynced::default())
        );
    }
}
