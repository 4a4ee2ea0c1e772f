//! Chat message log. Messages are immutable once created, except for the
//! retroactive task back-link written after asynchronous processing.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crewflow_fanout::{events, Broadcaster, RealtimeEvent};

use crate::DirectoryError;

/// A chat post. `sender_id` of `None` marks an anonymous system message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: Uuid,
    /// Containing channel.
    pub channel_id: Uuid,
    /// Posting user, or `None` for system messages.
    pub sender_id: Option<Uuid>,
    /// Message body.
    pub content: String,
    /// Optional message this one replies to.
    pub reply_to: Option<Uuid>,
    /// Soft back-link to the task spawned from this message, patched after
    /// the detached processing flow completes.
    pub linked_task_id: Option<Uuid>,
    /// Optional attached media reference.
    pub media: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Post timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when posting a message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// Containing channel.
    pub channel_id: Uuid,
    /// Posting user, or `None` for system messages.
    pub sender_id: Option<Uuid>,
    /// Message body.
    pub content: String,
    /// Optional reply target.
    pub reply_to: Option<Uuid>,
    /// Optional attached media reference.
    pub media: Option<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewMessage {
    /// Convenience constructor for an anonymous system post.
    #[must_use]
    pub fn system(channel_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            channel_id,
            sender_id: None,
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Append-only message store. Appends broadcast `message`; back-link patches
/// broadcast `message_updated` with the full patched message.
pub struct MessageLog {
    messages: RwLock<IndexMap<Uuid, Message>>,
    bus: Arc<dyn Broadcaster>,
}

impl MessageLog {
    /// Creates an empty log publishing on the given bus.
    #[must_use]
    pub fn new(bus: Arc<dyn Broadcaster>) -> Self {
        Self {
            messages: RwLock::new(IndexMap::new()),
            bus,
        }
    }

    /// Persists a message and broadcasts it.
    pub async fn append(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            channel_id: new.channel_id,
            sender_id: new.sender_id,
            content: new.content,
            reply_to: new.reply_to,
            linked_task_id: None,
            media: new.media,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.messages.write().insert(message.id, message.clone());
        self.bus
            .publish(RealtimeEvent::new(
                events::MESSAGE,
                serde_json::to_value(&message)?,
            ))
            .await?;
        Ok(message)
    }

    /// Patches the soft task back-link and re-broadcasts the message as
    /// updated.
    pub async fn link_task(&self, message_id: Uuid, task_id: Uuid) -> Result<Message> {
        let message = {
            let mut messages = self.messages.write();
            let message = messages
                .get_mut(&message_id)
                .ok_or(DirectoryError::MessageNotFound(message_id))?;
            message.linked_task_id = Some(task_id);
            message.clone()
        };
        self.bus
            .publish(RealtimeEvent::new(
                events::MESSAGE_UPDATED,
                serde_json::to_value(&message)?,
            ))
            .await?;
        Ok(message)
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Message> {
        self.messages.read().get(&id).cloned()
    }

    /// Most recent `limit` messages in a channel, newest last.
    #[must_use]
    pub fn recent_in_channel(&self, channel_id: Uuid, limit: usize) -> Vec<Message> {
        let messages = self.messages.read();
        let mut recent: Vec<Message> = messages
            .values()
            .filter(|message| message.channel_id == channel_id)
            .cloned()
            .collect();
        let skip = recent.len().saturating_sub(limit);
        recent.drain(..skip);
        recent
    }
}
