//! Per-connection chat session state and frame processing.

use std::sync::Arc;

use campus_common::id::prefix;
use campus_common::PrefixedId;

use crate::db::store::StoreError;
use crate::models::chat_message::ChatMessage;
use crate::AppState;

use super::events::{decode_frame, ErrorFrame, FrameError, OutboundFrame};
use super::fanout::DeliveryReport;
use super::registry::{OutboundText, RoomRegistry, SessionHandle};

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Closed,
}

/// A frame that could not be turned into a delivered message.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] FrameError),
    #[error("message could not be stored: {0}")]
    Storage(#[from] StoreError),
    #[error("message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Encode(_) => "INTERNAL_ERROR",
        }
    }

    /// The error frame reported back to the sending session.
    pub fn to_frame(&self) -> ErrorFrame {
        let message = match self {
            Self::Protocol(e) => e.to_string(),
            Self::Storage(_) => "Message was not saved; please retry".to_string(),
            Self::Encode(_) => "Message could not be delivered".to_string(),
        };
        ErrorFrame::new(self.code(), message)
    }
}

/// State for a single chat connection.
///
/// The session is the only owner of its room membership: it joins once and
/// leaves exactly once, on `close` or when dropped, whichever comes first.
pub struct ChatSession {
    pub session_id: String,
    pub room_id: String,
    /// Authenticated user, if the connection carried a token.
    pub user_id: Option<String>,
    state: SessionState,
    rooms: Arc<RoomRegistry>,
}

impl ChatSession {
    pub fn new(rooms: Arc<RoomRegistry>, room_id: String, user_id: Option<String>) -> Self {
        Self {
            session_id: Self::generate_id(),
            room_id,
            user_id,
            state: SessionState::Connecting,
            rooms,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register in the room with `outbound` as this session's delivery queue.
    /// Only the first call from `Connecting` has an effect.
    pub fn join(&mut self, outbound: tokio::sync::mpsc::Sender<OutboundText>) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.rooms.join(
            &self.room_id,
            SessionHandle::new(self.session_id.clone(), outbound),
        );
        self.state = SessionState::Joined;
    }

    /// Leave the room. Idempotent; returns `true` only for the call that
    /// performed the transition to `Closed`.
    pub fn close(&mut self) -> bool {
        match self.state {
            SessionState::Closed => false,
            SessionState::Connecting => {
                self.state = SessionState::Closed;
                true
            }
            SessionState::Joined => {
                self.rooms.leave(&self.room_id, &self.session_id);
                self.state = SessionState::Closed;
                true
            }
        }
    }

    /// Decode one text frame, persist it, then fan it out to the room.
    ///
    /// Persistence completes before any member is offered the message. The
    /// room's clock is held across both steps so that every member sees the
    /// room's messages in history order.
    pub async fn handle_text(
        &self,
        state: &AppState,
        text: &str,
    ) -> Result<DeliveryReport, SessionError> {
        let frame = decode_frame(text, state.config.max_message_len)?;
        let sender_id = frame
            .sender_id
            .or_else(|| self.user_id.clone())
            .ok_or(FrameError::MissingSender)?;

        let clock = self.rooms.clock(&self.room_id);
        let mut clock = clock.lock().await;

        // A room recreated after going empty must not stamp before its history.
        if clock.is_fresh() {
            if let Some(latest) = state.store.latest(&self.room_id).await? {
                clock.raise_floor(latest);
            }
        }

        let message = ChatMessage {
            room_id: self.room_id.clone(),
            sender_id,
            sender_name: frame.sender_name,
            body: frame.message,
            created_at: clock.stamp(),
        };

        let stored = state.store.append(message).await?;
        let report = state
            .broadcast
            .dispatch(&self.room_id, &OutboundFrame::from(&stored))?;

        tracing::debug!(
            session_id = %self.session_id,
            room_id = %self.room_id,
            message_id = stored.id,
            recipients = report.recipients(),
            failed = report.failed.len(),
            "chat message broadcast"
        );

        Ok(report)
    }
}

impl PrefixedId for ChatSession {
    const PREFIX: &'static str = prefix::CHAT_SESSION;
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use chrono::SubsecRound;
    use tokio::sync::mpsc;

    use super::*;
    use crate::test_support::memory_state;

    fn open(state: &AppState, room_id: &str, user: Option<&str>) -> (ChatSession, mpsc::Receiver<OutboundText>) {
        let (tx, rx) = mpsc::channel(16);
        let mut session =
            ChatSession::new(state.rooms.clone(), room_id.to_string(), user.map(str::to_string));
        session.join(tx);
        (session, rx)
    }

    #[test]
    fn lifecycle_transitions() {
        let state = memory_state();
        let mut session = ChatSession::new(state.rooms.clone(), "r".to_string(), None);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.session_id.starts_with("ws_"));

        let (tx, _rx) = mpsc::channel(1);
        session.join(tx);
        assert_eq!(session.state(), SessionState::Joined);
        assert_eq!(state.rooms.member_count("r"), 1);

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(state.rooms.room_count(), 0);
    }

    #[test]
    fn closed_session_cannot_rejoin() {
        let state = memory_state();
        let (mut session, _rx) = open(&state, "r", None);
        session.close();

        let (tx, _rx2) = mpsc::channel(1);
        session.join(tx);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(state.rooms.room_count(), 0);
    }

    #[test]
    fn drop_leaves_room_once() {
        let state = memory_state();
        let (a, _ra) = open(&state, "r", None);
        let (_b, _rb) = open(&state, "r", None);

        drop(a);
        assert_eq!(state.rooms.member_count("r"), 1);
    }

    #[tokio::test]
    async fn message_is_stored_then_echoed_to_all_members() {
        let state = memory_state();
        let (a, mut ra) = open(&state, "job42", None);
        let (_b, mut rb) = open(&state, "job42", None);

        let report = a
            .handle_text(&state, r#"{"message":"hi","sender_id":"u1"}"#)
            .await
            .unwrap();
        assert_eq!(report.delivered, 2);

        let history = state.store.history("job42").await.unwrap();
        assert_eq!(history.len(), 1);

        for rx in [&mut ra, &mut rb] {
            let got: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(got["sender_id"], "u1");
            assert_eq!(got["sender_name"], serde_json::Value::Null);
            assert_eq!(got["message"], "hi");
            assert_eq!(got["timestamp"], serde_json::to_value(history[0].created_at).unwrap());
        }
    }

    #[tokio::test]
    async fn sender_falls_back_to_authenticated_user() {
        let state = memory_state();
        let (a, _ra) = open(&state, "r", Some("usr_7"));

        a.handle_text(&state, r#"{"message":"hello"}"#).await.unwrap();

        let history = state.store.history("r").await.unwrap();
        assert_eq!(history[0].sender_id, "usr_7");
    }

    #[tokio::test]
    async fn anonymous_frame_without_sender_is_a_protocol_error() {
        let state = memory_state();
        let (a, mut ra) = open(&state, "r", None);

        let err = a.handle_text(&state, r#"{"message":"hello"}"#).await.unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_ERROR");
        assert!(ra.try_recv().is_err());
        assert!(state.store.history("r").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_session_keeps_working() {
        let state = memory_state();
        let (a, mut ra) = open(&state, "r", None);

        assert!(matches!(
            a.handle_text(&state, "{oops").await,
            Err(SessionError::Protocol(FrameError::InvalidJson))
        ));
        assert_eq!(a.state(), SessionState::Joined);

        a.handle_text(&state, r#"{"message":"still here","sender_id":"u1"}"#)
            .await
            .unwrap();
        assert!(ra.try_recv().is_ok());
    }

    #[tokio::test]
    async fn sequential_messages_keep_order() {
        let state = memory_state();
        let (a, mut ra) = open(&state, "r", None);

        for body in ["m1", "m2", "m3"] {
            a.handle_text(&state, &format!(r#"{{"message":"{body}","sender_id":"u1"}}"#))
                .await
                .unwrap();
        }

        let history: Vec<String> = state
            .store
            .history("r")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(history, ["m1", "m2", "m3"]);

        for body in ["m1", "m2", "m3"] {
            let got: serde_json::Value = serde_json::from_str(&ra.try_recv().unwrap()).unwrap();
            assert_eq!(got["message"], body);
        }
    }

    #[tokio::test]
    async fn reopened_room_never_stamps_before_its_history() {
        let state = memory_state();
        let ahead = (chrono::Utc::now() + chrono::Duration::seconds(30)).trunc_subsecs(6);
        state
            .store
            .append(ChatMessage {
                room_id: "r".to_string(),
                sender_id: "u0".to_string(),
                sender_name: None,
                body: "from an earlier visit".to_string(),
                created_at: ahead,
            })
            .await
            .unwrap();

        let (a, _ra) = open(&state, "r", None);
        a.handle_text(&state, r#"{"message":"back again","sender_id":"u1"}"#)
            .await
            .unwrap();

        let history = state.store.history("r").await.unwrap();
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["from an earlier visit", "back again"]);
        assert!(history[1].created_at >= ahead);
    }

    #[test]
    fn error_frames_carry_codes() {
        let err = SessionError::from(StoreError::Unavailable);
        let frame = serde_json::to_value(err.to_frame()).unwrap();
        assert_eq!(frame["error"]["code"], "STORAGE_ERROR");

        let err = SessionError::from(FrameError::EmptyMessage);
        let frame = serde_json::to_value(err.to_frame()).unwrap();
        assert_eq!(frame["error"]["code"], "PROTOCOL_ERROR");
        assert_eq!(frame["error"]["message"], "message must not be empty");
    }
}
