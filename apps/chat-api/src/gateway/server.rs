//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::auth::middleware::connection_identity;
use crate::error::ApiError;
use crate::AppState;

use super::events::{ErrorFrame, FrameError, CLOSE_GOING_AWAY, CLOSE_SESSION_TIMEOUT};
use super::registry::OutboundText;
use super::session::{ChatSession, SessionError};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Why a session's event loop ended.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    ReadError,
    WriteError,
    IdleTimeout,
    Shutdown,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/chat/{room_id}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    if state.shutdown.is_triggered() {
        return Err(ApiError::service_unavailable("Server is shutting down"));
    }

    let identity = connection_identity(&state, &headers, params.token.as_deref()).await?;
    if identity.is_none() && state.config.ws_require_auth {
        return Err(ApiError::unauthorized("Missing access token"));
    }

    let user_id = identity.map(|i| i.user_id);
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, room_id, user_id)))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    user_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.send_queue_capacity);

    let mut session = ChatSession::new(state.rooms.clone(), room_id, user_id);
    session.join(outbound_tx);

    tracing::info!(
        session_id = %session.session_id,
        room_id = %session.room_id,
        user_id = session.user_id.as_deref().unwrap_or("anonymous"),
        members = state.rooms.member_count(&session.room_id),
        "chat session joined"
    );

    let reason = run_session(&session, &state, &mut ws_tx, &mut ws_rx, &mut outbound_rx).await;

    session.close();
    let _ = ws_tx.close().await;

    tracing::info!(
        session_id = %session.session_id,
        room_id = %session.room_id,
        ?reason,
        "chat session closed"
    );
}

/// Main session loop: read client frames, forward room broadcasts, enforce
/// the optional idle timeout and react to server shutdown.
async fn run_session(
    session: &ChatSession,
    state: &AppState,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsStream,
    outbound_rx: &mut mpsc::Receiver<OutboundText>,
) -> CloseReason {
    let idle_timeout = state.config.idle_timeout;
    let mut last_seen = Instant::now();

    loop {
        let idle = async move {
            match idle_timeout {
                Some(limit) => time::sleep_until(last_seen + limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                last_seen = Instant::now();
                let result = match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_text(state, text.as_str()).await.map(|_| ())
                    }
                    Some(Ok(Message::Binary(_))) => Err(SessionError::Protocol(FrameError::Binary)),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) | None => return CloseReason::PeerClosed,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                        return CloseReason::ReadError;
                    }
                };

                if let Err(err) = result {
                    report_frame_error(session, &err);
                    if send_json(ws_tx, &err.to_frame()).await.is_err() {
                        return CloseReason::WriteError;
                    }
                }
            }

            // Broadcast for this session's room.
            frame = outbound_rx.recv() => {
                // The registry holds our sender until `close`, so `None`
                // cannot happen while the loop runs.
                let Some(frame) = frame else {
                    return CloseReason::Shutdown;
                };
                if ws_tx.send(Message::Text(String::from(&*frame).into())).await.is_err() {
                    return CloseReason::WriteError;
                }
            }

            _ = idle => {
                tracing::debug!(session_id = %session.session_id, "idle timeout, closing connection");
                let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "Idle timeout").await;
                return CloseReason::IdleTimeout;
            }

            _ = state.shutdown.wait() => {
                let _ = send_close(ws_tx, CLOSE_GOING_AWAY, "Server shutting down").await;
                return CloseReason::Shutdown;
            }
        }
    }
}

fn report_frame_error(session: &ChatSession, err: &SessionError) {
    match err {
        SessionError::Protocol(e) => tracing::warn!(
            session_id = %session.session_id,
            room_id = %session.room_id,
            error = %e,
            "dropped malformed chat frame"
        ),
        SessionError::Storage(e) => tracing::error!(
            session_id = %session.session_id,
            room_id = %session.room_id,
            error = %e,
            "chat message not persisted"
        ),
        SessionError::Encode(e) => tracing::error!(
            session_id = %session.session_id,
            error = %e,
            "chat message could not be encoded"
        ),
    }
}

async fn send_json(ws_tx: &mut WsSink, frame: &ErrorFrame) -> Result<(), axum::Error> {
    let Ok(json) = serde_json::to_string(frame) else {
        return Ok(());
    };
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
