//! Client side of the change feed.
//!
//! The backend feed is table-wide; a [`FeedSubscription`] narrows it to one
//! conversation and hands decoded events to a callback until it is
//! unsubscribed or dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parley_shared::{ChangeEvent, UserId};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::ChangeFeed;

pub struct ChangeFeedClient;

impl ChangeFeedClient {
    /// Start forwarding changes between `a` and `b` to `callback`.
    ///
    /// The backend receiver is created before this returns, so nothing
    /// committed after the call is missed.
    pub fn subscribe<F>(feed: &dyn ChangeFeed, a: UserId, b: UserId, callback: F) -> FeedSubscription
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let mut rx = feed.subscribe();
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();

        let task = tokio::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change feed lagged, relying on poll to converge");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        info!("Change feed closed");
                        break;
                    }
                };

                let event = match envelope.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, event = ?envelope.event, "Dropping malformed change");
                        continue;
                    }
                };
                if !event.is_between(&a, &b) {
                    debug!(msg_id = %event.id(), "Change outside conversation");
                    continue;
                }
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                callback(event);
            }
        });

        FeedSubscription {
            active,
            task: Some(task),
        }
    }
}

/// Handle to a live feed subscription. Dropping it unsubscribes.
pub struct FeedSubscription {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// No callback runs after this returns.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
