//! One open conversation.
//!
//! A [`ChatSession`] owns the message cache for `(me, counterpart)`, the
//! change feed subscription, the fallback poll task and the composer. The
//! feed callback and the poll hold only a `Weak` reference, so dropping or
//! closing the session ends them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use parley_shared::constants::DEFAULT_POLL_INTERVAL_SECS;
use parley_shared::validation::{validate_edit, validate_new_message, validate_participants};
use parley_shared::{ChangeEvent, Message, MessageId, UserId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::cache::{Applied, ConversationCache};
use crate::error::ClientError;
use crate::events::{emit_event, SessionEvent, EVENT_CAPACITY};
use crate::feed::{ChangeFeedClient, FeedSubscription};
use crate::uploader::{AttachmentUploader, PendingAttachment};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Opening,
    Open,
    Closed,
}

/// Draft text and the attachment picked for the next send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub text: String,
    pub attachment: Option<PendingAttachment>,
}

struct State {
    phase: SessionPhase,
    cache: ConversationCache,
    composer: Composer,
    subscription: Option<FeedSubscription>,
    poller: Option<JoinHandle<()>>,
}

struct Shared {
    me: UserId,
    counterpart: UserId,
    backend: Backend,
    uploader: AttachmentUploader,
    options: SessionOptions,
    state: Mutex<State>,
    sending: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

/// Held for the duration of one send.
struct SendGuard<'a>(&'a AtomicBool);

impl<'a> SendGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ClientError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SendGuard(flag))
            .map_err(|_| ClientError::SendInFlight)
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn ensure_open(phase: SessionPhase) -> Result<(), ClientError> {
    match phase {
        SessionPhase::Open => Ok(()),
        SessionPhase::Closed => Err(ClientError::SessionClosed),
        SessionPhase::Idle | SessionPhase::Opening => Err(ClientError::InvalidState("session not open")),
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        emit_event(&self.events, event);
    }

    fn is_open(&self) -> bool {
        self.state().phase == SessionPhase::Open
    }

    fn on_change(self: &Arc<Self>, event: ChangeEvent) {
        let applied = {
            let mut st = self.state();
            if !matches!(st.phase, SessionPhase::Opening | SessionPhase::Open) {
                return;
            }
            st.cache.apply(&event)
        };
        if !applied.changed() {
            return;
        }
        debug!(msg_id = %event.id(), ?applied, "Change applied");
        self.emit(SessionEvent::MessagesChanged);

        if matches!(applied, Applied::Inserted { inbound: true }) {
            self.emit(SessionEvent::ScrollToLatest);
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = shared.mark_read_remote().await {
                    warn!(error = %e, "Marking inbound message read failed");
                    shared.emit(SessionEvent::from_error(&e));
                }
            });
        }
    }

    async fn mark_read_remote(&self) -> Result<usize, ClientError> {
        let flipped = self
            .backend
            .messages
            .mark_conversation_read(&self.me, &self.counterpart)
            .await?;
        let changed = {
            let mut st = self.state();
            if st.phase != SessionPhase::Open {
                return Ok(flipped);
            }
            st.cache.mark_inbound_read_locally()
        };
        if changed > 0 {
            self.emit(SessionEvent::MessagesChanged);
        }
        debug!(flipped, "Conversation marked read");
        Ok(flipped)
    }

    async fn poll_once(&self) -> Result<bool, ClientError> {
        let generation = {
            let st = self.state();
            if st.phase != SessionPhase::Open {
                return Ok(false);
            }
            st.cache.generation()
        };
        let messages = self
            .backend
            .messages
            .list_between(&self.me, &self.counterpart)
            .await?;
        let resynced = {
            let mut st = self.state();
            if st.phase != SessionPhase::Open {
                return Ok(false);
            }
            match st.cache.resync_since(generation, messages) {
                Some(resynced) => resynced,
                None => {
                    debug!("Poll snapshot overtaken by a local change, skipped");
                    return Ok(false);
                }
            }
        };
        if resynced.changed {
            debug!(new_inbound = resynced.new_unread_inbound, "Poll brought the cache up to date");
            self.emit(SessionEvent::MessagesChanged);
        }
        if resynced.new_unread_inbound {
            self.emit(SessionEvent::ScrollToLatest);
            if let Err(e) = self.mark_read_remote().await {
                warn!(error = %e, "Marking polled inbound messages read failed");
                self.emit(SessionEvent::from_error(&e));
            }
        }
        Ok(resynced.changed)
    }

    async fn upload_and_create(
        &self,
        content: &str,
        pending: Option<&PendingAttachment>,
    ) -> Result<Message, ClientError> {
        let attachment = match pending {
            Some(p) => Some(self.uploader.upload(p, &self.me).await?),
            None => None,
        };
        self.backend
            .messages
            .create(&self.me, &self.counterpart, content, attachment)
            .await
    }
}

fn spawn_poller(weak: Weak<Shared>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            if !shared.is_open() {
                break;
            }
            if let Err(e) = shared.poll_once().await {
                warn!(error = %e, "Fallback poll failed");
            }
        }
    })
}

pub struct ChatSession {
    shared: Arc<Shared>,
}

impl ChatSession {
    pub fn new(
        backend: Backend,
        me: UserId,
        counterpart: UserId,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        validate_participants(&me, &counterpart)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let uploader = AttachmentUploader::new(backend.objects.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    phase: SessionPhase::Idle,
                    cache: ConversationCache::new(me.clone(), counterpart.clone()),
                    composer: Composer::default(),
                    subscription: None,
                    poller: None,
                }),
                me,
                counterpart,
                backend,
                uploader,
                options,
                sending: AtomicBool::new(false),
                events,
            }),
        })
    }

    pub fn me(&self) -> &UserId {
        &self.shared.me
    }

    pub fn counterpart(&self) -> &UserId {
        &self.shared.counterpart
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.state().phase
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Load the conversation and start listening for changes.
    pub async fn open(&self) -> Result<(), ClientError> {
        {
            let mut st = self.shared.state();
            match st.phase {
                SessionPhase::Idle => st.phase = SessionPhase::Opening,
                SessionPhase::Closed => return Err(ClientError::SessionClosed),
                SessionPhase::Opening | SessionPhase::Open => {
                    return Err(ClientError::InvalidState("session already opened"))
                }
            }
        }

        // subscribe before the initial load so nothing committed in between is lost
        let weak = Arc::downgrade(&self.shared);
        let subscription = ChangeFeedClient::subscribe(
            self.shared.backend.feed.as_ref(),
            self.shared.me.clone(),
            self.shared.counterpart.clone(),
            move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_change(event);
                }
            },
        );

        let initial = match self
            .shared
            .backend
            .messages
            .list_between(&self.shared.me, &self.shared.counterpart)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                let mut st = self.shared.state();
                if st.phase == SessionPhase::Opening {
                    st.phase = SessionPhase::Idle;
                }
                warn!(error = %e, "Initial load failed");
                return Err(e);
            }
        };

        let count = {
            let mut st = self.shared.state();
            if st.phase != SessionPhase::Opening {
                return Err(ClientError::SessionClosed);
            }
            st.cache.resync(initial);
            st.subscription = Some(subscription);
            st.poller = Some(spawn_poller(
                Arc::downgrade(&self.shared),
                self.shared.options.poll_interval,
            ));
            st.phase = SessionPhase::Open;
            st.cache.len()
        };

        info!(
            me = %self.shared.me,
            counterpart = %self.shared.counterpart,
            messages = count,
            "Conversation opened"
        );
        self.shared.emit(SessionEvent::MessagesChanged);
        self.shared.emit(SessionEvent::ScrollToLatest);

        if let Err(e) = self.shared.mark_read_remote().await {
            warn!(error = %e, "Marking conversation read on open failed");
            self.shared.emit(SessionEvent::from_error(&e));
        }
        Ok(())
    }

    /// Stop the feed and the poll and discard local state. Idempotent.
    pub fn close(&self) {
        let (subscription, poller) = {
            let mut st = self.shared.state();
            if st.phase == SessionPhase::Closed {
                return;
            }
            st.phase = SessionPhase::Closed;
            st.cache.clear();
            st.composer = Composer::default();
            (st.subscription.take(), st.poller.take())
        };
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(poller) = poller {
            poller.abort();
        }
        info!(counterpart = %self.shared.counterpart, "Conversation closed");
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.state().cache.messages()
    }

    /// Inbound messages in the cache not yet marked read.
    pub fn unread_count(&self) -> usize {
        self.shared.state().cache.unread_inbound().len()
    }

    pub fn latest_message_id(&self) -> Option<MessageId> {
        self.shared.state().cache.latest().map(|m| m.id)
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.shared.state().cache.is_pending(id)
    }

    /// Whether `id` is a confirmed message we sent.
    pub fn can_modify(&self, id: MessageId) -> bool {
        let st = self.shared.state();
        !st.cache.is_pending(id)
            && st
                .cache
                .get(id)
                .map_or(false, |m| m.sender_id == self.shared.me)
    }

    pub fn composer(&self) -> Composer {
        self.shared.state().composer.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.shared.state().composer.text = text.into();
    }

    pub fn attach(&self, attachment: PendingAttachment) {
        self.shared.state().composer.attachment = Some(attachment);
    }

    pub fn discard_attachment(&self) -> Option<PendingAttachment> {
        self.shared.state().composer.attachment.take()
    }

    /// Put `content` and `attachment` in the composer and send them.
    pub async fn send(
        &self,
        content: &str,
        attachment: Option<PendingAttachment>,
    ) -> Result<Message, ClientError> {
        let guard = SendGuard::acquire(&self.shared.sending)?;
        {
            let mut st = self.shared.state();
            ensure_open(st.phase)?;
            st.composer = Composer {
                text: content.to_string(),
                attachment,
            };
        }
        self.dispatch(guard).await
    }

    /// Send whatever the composer holds; the retry path after a failure.
    pub async fn send_draft(&self) -> Result<Message, ClientError> {
        let guard = SendGuard::acquire(&self.shared.sending)?;
        self.dispatch(guard).await
    }

    async fn dispatch(&self, _guard: SendGuard<'_>) -> Result<Message, ClientError> {
        let composer = {
            let st = self.shared.state();
            ensure_open(st.phase)?;
            st.composer.clone()
        };
        let content = composer.text.trim().to_string();
        let preview = composer
            .attachment
            .as_ref()
            .map(PendingAttachment::local_preview);
        validate_new_message(&content, preview.as_ref())?;

        let temp_id = MessageId::new();
        {
            let mut st = self.shared.state();
            ensure_open(st.phase)?;
            st.cache.add_pending(Message {
                id: temp_id,
                sender_id: self.shared.me.clone(),
                recipient_id: self.shared.counterpart.clone(),
                content: content.clone(),
                attachment: preview,
                read: false,
                created_at: Utc::now(),
            });
        }
        self.shared.emit(SessionEvent::MessagesChanged);
        self.shared.emit(SessionEvent::ScrollToLatest);

        match self
            .shared
            .upload_and_create(&content, composer.attachment.as_ref())
            .await
        {
            Ok(message) => {
                {
                    let mut st = self.shared.state();
                    if st.phase == SessionPhase::Open {
                        st.cache.confirm(temp_id, message.clone());
                        // the user may have typed on while the send was in flight
                        if st.composer.text == composer.text {
                            st.composer.text.clear();
                        }
                        if st.composer.attachment == composer.attachment {
                            st.composer.attachment = None;
                        }
                    }
                }
                info!(msg_id = %message.id, to = %self.shared.counterpart, "Message sent");
                self.shared.emit(SessionEvent::MessagesChanged);
                self.shared.emit(SessionEvent::ScrollToLatest);
                Ok(message)
            }
            Err(e) => {
                let rolled_back = self.shared.state().cache.rollback(temp_id);
                warn!(error = %e, retryable = e.is_retryable(), "Send failed");
                if rolled_back {
                    self.shared.emit(SessionEvent::MessagesChanged);
                }
                Err(e)
            }
        }
    }

    /// Checks done locally before an edit or delete reaches the store.
    fn check_own(&self, id: MessageId) -> Result<(), ClientError> {
        let st = self.shared.state();
        ensure_open(st.phase)?;
        if st.cache.is_pending(id) {
            return Err(ClientError::InvalidState("message is still sending"));
        }
        match st.cache.get(id) {
            None => Err(ClientError::NotFound),
            Some(m) if m.sender_id != self.shared.me => Err(ClientError::PermissionDenied),
            Some(_) => Ok(()),
        }
    }

    /// The store no longer has `id`; drop it here too.
    fn forget(&self, id: MessageId) {
        if self.shared.state().cache.remove(id) {
            self.shared.emit(SessionEvent::MessagesChanged);
        }
    }

    pub async fn edit(&self, id: MessageId, new_content: &str) -> Result<Message, ClientError> {
        self.check_own(id)?;
        let content = new_content.trim();
        validate_edit(content)?;

        match self
            .shared
            .backend
            .messages
            .edit_content(id, &self.shared.me, content)
            .await
        {
            Ok(updated) => {
                let replaced = {
                    let mut st = self.shared.state();
                    st.phase == SessionPhase::Open && st.cache.replace(updated.clone())
                };
                if replaced {
                    self.shared.emit(SessionEvent::MessagesChanged);
                }
                info!(msg_id = %id, "Message edited");
                Ok(updated)
            }
            Err(ClientError::NotFound) => {
                self.forget(id);
                Err(ClientError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, id: MessageId) -> Result<(), ClientError> {
        self.check_own(id)?;

        match self.shared.backend.messages.delete(id, &self.shared.me).await {
            Ok(()) => {
                self.forget(id);
                info!(msg_id = %id, "Message deleted");
                Ok(())
            }
            Err(ClientError::NotFound) => {
                self.forget(id);
                Err(ClientError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark every inbound unread message in this conversation read.
    pub async fn mark_conversation_read(&self) -> Result<usize, ClientError> {
        ensure_open(self.phase())?;
        self.shared.mark_read_remote().await
    }

    /// Run one fallback poll now. Returns whether the cache changed.
    pub async fn resync(&self) -> Result<bool, ClientError> {
        ensure_open(self.phase())?;
        self.shared.poll_once().await
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}
