//! Inbox view: one [`Conversation`] per counterpart.

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::constants::UNKNOWN_USER_NAME;
use parley_shared::{Conversation, Message, UserId};
use tracing::{debug, warn};

use crate::backend::{Backend, MessageService, ProfileDirectory};
use crate::error::ClientError;

#[derive(Clone)]
pub struct ConversationAggregator {
    messages: Arc<dyn MessageService>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl ConversationAggregator {
    pub fn new(backend: &Backend) -> Self {
        Self {
            messages: backend.messages.clone(),
            profiles: backend.profiles.clone(),
        }
    }

    pub async fn list_conversations(&self, viewer: &UserId) -> Result<Vec<Conversation>, ClientError> {
        let messages = self.messages.list_for_participant(viewer).await?;

        let mut counterparts: Vec<UserId> = Vec::new();
        for m in &messages {
            if let Some(other) = m.counterpart_of(viewer) {
                if !counterparts.contains(other) {
                    counterparts.push(other.clone());
                }
            }
        }

        let names = if counterparts.is_empty() {
            HashMap::new()
        } else {
            match self.profiles.resolve_names(&counterparts).await {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "Profile lookup failed, using fallback names");
                    HashMap::new()
                }
            }
        };

        let conversations = summarize(viewer, &messages, &names);
        debug!(viewer = %viewer, count = conversations.len(), "Conversations listed");
        Ok(conversations)
    }
}

/// Group `messages` (newest first) by counterpart.
pub fn summarize(
    viewer: &UserId,
    messages: &[Message],
    names: &HashMap<UserId, String>,
) -> Vec<Conversation> {
    let mut order: Vec<UserId> = Vec::new();
    let mut by_counterpart: HashMap<UserId, Conversation> = HashMap::new();

    for m in messages {
        let Some(other) = m.counterpart_of(viewer) else {
            continue;
        };
        let entry = by_counterpart.entry(other.clone()).or_insert_with(|| {
            order.push(other.clone());
            Conversation {
                counterpart_id: other.clone(),
                counterpart_name: counterpart_name(other, names),
                last_message: m.preview(),
                last_message_at: m.created_at,
                unread_count: 0,
            }
        });
        if m.created_at > entry.last_message_at {
            entry.last_message = m.preview();
            entry.last_message_at = m.created_at;
        }
        if m.is_unread_for(viewer) {
            entry.unread_count += 1;
        }
    }

    let mut conversations: Vec<Conversation> = order
        .into_iter()
        .filter_map(|id| by_counterpart.remove(&id))
        .collect();
    conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    conversations
}

fn counterpart_name(id: &UserId, names: &HashMap<UserId, String>) -> String {
    match names.get(id) {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => {
            debug!(user = %id, "No display name");
            UNKNOWN_USER_NAME.to_string()
        }
    }
}
