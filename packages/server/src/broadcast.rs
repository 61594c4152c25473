//! Progress broadcasting port.
//!
//! Best-effort by contract: events may be dropped, delivery never blocks the
//! pipeline, and no failure ever propagates to the caller. The pipeline's
//! correctness must not depend on anyone listening.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::gateway::rooms::RoomRegistry;
use crate::gateway::{owner_room, quiz_room};
use crate::jobs::{Outcome, ProgressSnapshot};

#[async_trait]
pub trait BaseProgressBroadcaster: Send + Sync {
    /// Forward a progress snapshot to the owner's viewers. May drop.
    async fn notify_progress(&self, owner_id: &str, quiz_id: &str, snapshot: &ProgressSnapshot);

    /// Forward a terminal outcome to the owner's viewers. May drop.
    async fn notify_terminal(&self, owner_id: &str, quiz_id: &str, outcome: &Outcome);
}

/// Broadcaster that fans events out through the gateway's room registry.
///
/// Events go to both the owner-scoped room and the quiz-scoped room, so a
/// client subscribed either way receives the event once per membership
/// (at-least-once, not exactly-once).
pub struct RoomBroadcaster {
    rooms: RoomRegistry,
}

impl RoomBroadcaster {
    pub fn new(rooms: RoomRegistry) -> Self {
        Self { rooms }
    }

    async fn publish_both(&self, owner_id: &str, quiz_id: &str, event: serde_json::Value) {
        self.rooms.publish(&owner_room(owner_id), event.clone()).await;
        self.rooms.publish(&quiz_room(quiz_id), event).await;
    }
}

#[async_trait]
impl BaseProgressBroadcaster for RoomBroadcaster {
    async fn notify_progress(&self, owner_id: &str, quiz_id: &str, snapshot: &ProgressSnapshot) {
        let event = match serde_json::to_value(snapshot) {
            Ok(serde_json::Value::Object(mut fields)) => {
                fields.insert("type".into(), json!("progress"));
                fields.insert("quizId".into(), json!(quiz_id));
                serde_json::Value::Object(fields)
            }
            Ok(other) => {
                warn!(quiz_id = %quiz_id, ?other, "progress snapshot serialized to a non-object; dropping");
                return;
            }
            Err(e) => {
                warn!(quiz_id = %quiz_id, error = %e, "failed to serialize progress event; dropping");
                return;
            }
        };
        self.publish_both(owner_id, quiz_id, event).await;
    }

    async fn notify_terminal(&self, owner_id: &str, quiz_id: &str, outcome: &Outcome) {
        let event = if outcome.success {
            json!({
                "type": "completed",
                "quizId": quiz_id,
                "questionCount": outcome.item_count.unwrap_or(0),
                "pageCount": outcome.page_count.unwrap_or(0),
                "timestamp": Utc::now(),
            })
        } else {
            json!({
                "type": "failed",
                "quizId": quiz_id,
                "errorMessage": outcome.error_message.clone().unwrap_or_default(),
                "timestamp": Utc::now(),
            })
        };
        self.publish_both(owner_id, quiz_id, event).await;
    }
}

/// No-op broadcaster for contexts with no gateway attached.
pub struct NoopBroadcaster;

#[async_trait]
impl BaseProgressBroadcaster for NoopBroadcaster {
    async fn notify_progress(&self, _owner_id: &str, quiz_id: &str, snapshot: &ProgressSnapshot) {
        debug!(quiz_id = %quiz_id, stage = %snapshot.stage, "no gateway attached; progress dropped");
    }

    async fn notify_terminal(&self, _owner_id: &str, quiz_id: &str, _outcome: &Outcome) {
        debug!(quiz_id = %quiz_id, "no gateway attached; terminal event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Stage;

    #[tokio::test]
    async fn progress_event_reaches_both_rooms() {
        let rooms = RoomRegistry::new();
        let mut owner_rx = rooms.join(&owner_room("user-1")).await;
        let mut quiz_rx = rooms.join(&quiz_room("pdf-1")).await;

        let broadcaster = RoomBroadcaster::new(rooms);
        let snapshot = ProgressSnapshot::for_stage(Stage::Extracting, "Extracting text");
        broadcaster
            .notify_progress("user-1", "pdf-1", &snapshot)
            .await;

        for rx in [&mut owner_rx, &mut quiz_rx] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event["type"], "progress");
            assert_eq!(event["quizId"], "pdf-1");
            assert_eq!(event["stage"], "extracting");
            assert_eq!(event["percentage"], 10);
        }
    }

    #[tokio::test]
    async fn terminal_events_carry_outcome_fields() {
        let rooms = RoomRegistry::new();
        let mut rx = rooms.join(&quiz_room("pdf-1")).await;
        let broadcaster = RoomBroadcaster::new(rooms);

        broadcaster
            .notify_terminal("user-1", "pdf-1", &Outcome::success(5, 12))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event["type"], "completed");
        assert_eq!(event["questionCount"], 5);

        broadcaster
            .notify_terminal("user-1", "pdf-1", &Outcome::failure("it broke"))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event["type"], "failed");
        assert_eq!(event["errorMessage"], "it broke");
    }

    #[tokio::test]
    async fn broadcasting_into_the_void_does_not_error() {
        let broadcaster = RoomBroadcaster::new(RoomRegistry::new());
        let snapshot = ProgressSnapshot::for_stage(Stage::Saving, "Saving questions");
        // No rooms, no members - must silently drop
        broadcaster
            .notify_progress("user-1", "pdf-1", &snapshot)
            .await;
        broadcaster
            .notify_terminal("user-1", "pdf-1", &Outcome::failure("x"))
            .await;
    }
}
