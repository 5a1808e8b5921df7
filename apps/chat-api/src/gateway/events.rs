//! Chat wire format: inbound frames, outbound frames and frame errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::chat_message::StoredMessage;

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Session evicted after the idle timeout.
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A chat message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    pub message: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Why an inbound frame was dropped. The session survives all of these.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON")]
    InvalidJson,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message must be {max} characters or fewer")]
    MessageTooLong { max: usize },
    #[error("sender_id is required")]
    MissingSender,
    #[error("binary frames are not supported")]
    Binary,
}

/// Strictly decode a text frame into an [`InboundFrame`].
///
/// The message body is kept exactly as sent. Whitespace-only messages and
/// messages longer than `max_len` characters are rejected.
pub fn decode_frame(text: &str, max_len: usize) -> Result<InboundFrame, FrameError> {
    let mut frame: InboundFrame = serde_json::from_str(text).map_err(|e| {
        if e.is_data() {
            FrameError::InvalidPayload(e.to_string())
        } else {
            FrameError::InvalidJson
        }
    })?;

    if frame.message.trim().is_empty() {
        return Err(FrameError::EmptyMessage);
    }
    if frame.message.chars().count() > max_len {
        return Err(FrameError::MessageTooLong { max: max_len });
    }

    frame.sender_id = frame.sender_id.filter(|s| !s.trim().is_empty());
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A persisted message as pushed to every room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&StoredMessage> for OutboundFrame {
    fn from(stored: &StoredMessage) -> Self {
        Self {
            sender_id: stored.sender_id.clone(),
            sender_name: stored.sender_name.clone(),
            message: stored.body.clone(),
            timestamp: stored.created_at,
        }
    }
}

/// Sent only to the session whose frame failed.
#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub error: ErrorFrameDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorFrameDetail {
    pub code: &'static str,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorFrameDetail {
                code,
                message: message.into(),
            },
        }
    }
}
