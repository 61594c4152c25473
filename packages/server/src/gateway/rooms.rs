//! In-process pub/sub registry for gateway rooms.
//!
//! Rooms are opaque string topics (`user:{owner_id}`, `quiz:{quiz_id}`)
//! backed by broadcast channels. The registry has no knowledge of what flows
//! through a room.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Thread-safe, cloneable room registry keyed by string topics.
///
/// Payloads are `serde_json::Value` - the broadcaster serializes its own
/// event types.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl RoomRegistry {
    /// Create a registry with default capacity (256 events per room).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish an event to a room. No-op if the room has no members.
    pub async fn publish(&self, room: &str, value: serde_json::Value) {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(room) {
            // Ignore send errors (no active receivers)
            let _ = tx.send(value);
        }
    }

    /// Join a room. Creates the room if it doesn't exist.
    pub async fn join(&self, room: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut rooms = self.rooms.write().await;
        let tx = rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Remove rooms with zero members (housekeeping after disconnects).
    pub async fn cleanup(&self) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_join_roundtrip() {
        let registry = RoomRegistry::new();
        let mut rx = registry.join("quiz:pdf-1").await;

        let value = serde_json::json!({"type": "progress", "percentage": 10});
        registry.publish("quiz:pdf-1", value.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, value);
    }

    #[tokio::test]
    async fn test_publish_without_members_is_noop() {
        let registry = RoomRegistry::new();
        // Should not panic
        registry
            .publish("user:nobody", serde_json::json!({"data": "dropped"}))
            .await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_rooms() {
        let registry = RoomRegistry::new();
        let rx = registry.join("quiz:ephemeral").await;

        assert_eq!(registry.rooms.read().await.len(), 1);

        drop(rx);
        registry.cleanup().await;

        assert_eq!(registry.rooms.read().await.len(), 0);
    }

    #[tokio::test]
    async fn test_every_member_receives_the_event() {
        let registry = RoomRegistry::new();
        let mut rx1 = registry.join("user:u1").await;
        let mut rx2 = registry.join("user:u1").await;

        let value = serde_json::json!({"type": "completed"});
        registry.publish("user:u1", value.clone()).await;

        assert_eq!(rx1.recv().await.unwrap(), value);
        assert_eq!(rx2.recv().await.unwrap(), value);
    }
}
