#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Realtime fan-out: the single shared broadcaster every component uses to
//! push task/channel/message mutations to all connected clients.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Canonical realtime event names delivered to connected clients.
pub mod events {
    /// A new task exists.
    pub const TASK_CREATED: &str = "task_created";
    /// A task mutated (status, fields, score).
    pub const TASK_UPDATED: &str = "task_updated";
    /// A task was removed.
    pub const TASK_DELETED: &str = "task_deleted";
    /// A new chat message was posted.
    pub const MESSAGE: &str = "message";
    /// An existing message was patched (task linkage, metadata).
    pub const MESSAGE_UPDATED: &str = "message_updated";
    /// A channel was created.
    pub const CHANNEL_CREATED: &str = "channel_created";
    /// A channel mutated.
    pub const CHANNEL_UPDATED: &str = "channel_updated";
    /// A channel was removed.
    pub const CHANNEL_DELETED: &str = "channel_deleted";
}

/// One fan-out event. Payloads are full objects, never diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Event name (see [`events`]).
    pub event: String,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Full-object JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    /// Builds an event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Publishing side of the fan-out channel.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Delivers an event to every currently connected client. Publishing with
    /// zero receivers is not an error.
    async fn publish(&self, event: RealtimeEvent) -> Result<()>;
}

/// In-process broadcaster backed by a tokio broadcast channel, with a bounded
/// backlog retained for inspection.
#[derive(Debug, Clone)]
pub struct MemoryBroadcaster {
    sender: broadcast::Sender<RealtimeEvent>,
    backlog: Arc<Mutex<VecDeque<RealtimeEvent>>>,
    backlog_cap: usize,
}

impl MemoryBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            backlog_cap: capacity,
        }
    }

    /// Registers a new connected client.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of recently published events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RealtimeEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Events in the backlog carrying the given name, oldest first.
    #[must_use]
    pub fn named(&self, event: &str) -> Vec<RealtimeEvent> {
        self.backlog
            .lock()
            .iter()
            .filter(|record| record.event == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Broadcaster for MemoryBroadcaster {
    async fn publish(&self, event: RealtimeEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.backlog_cap {
                backlog.pop_front();
            }
        }
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let bus = MemoryBroadcaster::new(16);
        let mut rx = bus.subscribe();
        bus.publish(RealtimeEvent::new(events::TASK_CREATED, json!({"id": 1})))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, events::TASK_CREATED);
        assert_eq!(event.payload["id"], 1);
    }

    #[tokio::test]
    async fn publish_without_receivers_is_not_an_error() {
        let bus = MemoryBroadcaster::new(4);
        bus.publish(RealtimeEvent::new(events::MESSAGE, json!({})))
            .await
            .unwrap();
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn preserves_single_publisher_fifo() {
        let bus = MemoryBroadcaster::new(16);
        let mut rx = bus.subscribe();
        for seq in 0..3 {
            bus.publish(RealtimeEvent::new(events::MESSAGE, json!({ "seq": seq })))
                .await
                .unwrap();
        }
        for seq in 0..3 {
            assert_eq!(rx.recv().await.unwrap().payload["seq"], seq);
        }
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryBroadcaster::new(2);
        for seq in 0..5 {
            bus.publish(RealtimeEvent::new(events::MESSAGE, json!({ "seq": seq })))
                .await
                .unwrap();
        }
        let snapshot = bus.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].payload["seq"], 3);
    }
}
