//! Room fan-out: deliver one message to every current member of a room.
//!
//! Each session owns a bounded outbound queue. Delivery is a non-blocking
//! `try_send` per member, so a slow or dead recipient costs the others
//! nothing. The sender receives its own echo like everyone else.

use std::sync::Arc;

use super::events::OutboundFrame;
use super::registry::{OutboundText, RoomRegistry};

/// Why one recipient did not get a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's connection is already gone.
    #[error("recipient disconnected")]
    Disconnected,
    /// The session's outbound queue is full; the frame was dropped for it.
    #[error("recipient outbound queue is full")]
    Lagging,
}

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(String, DeliveryError)>,
}

impl DeliveryReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Dispatches frames to room members. Cloneable; store in AppState.
#[derive(Clone)]
pub struct RoomBroadcast {
    rooms: Arc<RoomRegistry>,
}

impl RoomBroadcast {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Encode `frame` once and push it to a snapshot of the room's members.
    pub fn dispatch(
        &self,
        room_id: &str,
        frame: &OutboundFrame,
    ) -> Result<DeliveryReport, serde_json::Error> {
        let text: OutboundText = serde_json::to_string(frame)?.into();
        Ok(self.dispatch_text(room_id, &text))
    }

    fn dispatch_text(&self, room_id: &str, text: &OutboundText) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for member in self.rooms.members_of(room_id) {
            match member.push(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::debug!(
                        room_id,
                        session_id = %member.session_id,
                        %err,
                        "chat delivery failed"
                    );
                    report.failed.push((member.session_id, err));
                }
            }
        }

        report
    }
}
