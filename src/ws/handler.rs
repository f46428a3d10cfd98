//! WebSocket upgrade handler

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::clock::wait_for_stop;
use crate::game::StoreError;
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::codec;
use crate::ws::error::SessionError;
use crate::ws::lifecycle::{CloseKind, SessionState};
use crate::ws::protocol::{Envelope, Payload};
use crate::ws::session::{
    read_handshake, Handshake, Inbound, Offer, Outbound, SessionContext, SessionHandle, SessionRegistry,
};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Resume a player whose previous connection dropped
    #[serde(rename = "playerId")]
    pub player_id: Option<Uuid>,
    /// Token from the previous session's `connect`, required alongside `playerId`
    #[serde(rename = "resumeToken")]
    pub resume_token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

/// How the reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderExit {
    Closed(CloseKind),
    /// Stop was signalled elsewhere (write failure, resume, shutdown)
    Stopped,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, query: WsQuery, state: AppState) {
    let requested_id = query.player_id;
    let player_id = requested_id.unwrap_or_else(Uuid::new_v4);
    let config = Arc::clone(&state.config);
    info!(player_id = %player_id, resume = requested_id.is_some(), "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Connecting: nothing is registered until a valid setName arrives
    let handshake = timeout(
        config.handshake_timeout,
        await_handshake(&mut ws_sink, &mut ws_stream, config.write_timeout),
    )
    .await;
    let display_name = match handshake {
        Ok(Some(Handshake::Named(name))) => name,
        Ok(Some(Handshake::Leave)) | Ok(None) => {
            info!(player_id = %player_id, "Connection ended before handshake");
            return;
        }
        Err(_) => {
            warn!(player_id = %player_id, "Handshake timed out");
            reject(&mut ws_sink, &SessionError::HandshakeTimeout, close_code::POLICY, config.write_timeout).await;
            return;
        }
    };

    let (handle, outbound_rx) = SessionHandle::new(player_id, config.outbound_queue_capacity);
    if let Err(e) = state.sessions.join(&handle, &display_name, query.resume_token.as_deref()) {
        warn!(player_id = %player_id, error = %e, "Join refused");
        let code = match e {
            StoreError::CapacityExceeded { .. } => close_code::AGAIN,
            _ => close_code::POLICY,
        };
        reject(&mut ws_sink, &SessionError::Store(e), code, config.write_timeout).await;
        return;
    }

    if let Err(e) = state.sessions.open(&handle) {
        error!(player_id = %player_id, error = %e, "Session could not open");
        state.sessions.retire(&handle, "open failed");
        return;
    }

    let writer = tokio::spawn(run_writer(
        ws_sink,
        outbound_rx,
        Arc::clone(&handle),
        Arc::clone(&state.sessions),
        config.write_timeout,
    ));

    let limiter = SessionRateLimiter::new(config.input_rate_limit);
    let ctx = SessionContext::new(player_id, Arc::clone(&state.processor));
    let exit = run_reader(&mut ws_stream, &handle, &ctx, &limiter).await;

    match exit {
        ReaderExit::Closed(CloseKind::Normal) => {
            if handle.transition(SessionState::Closing).is_ok() {
                handle.offer(Outbound::Close {
                    code: close_code::NORMAL,
                    reason: "bye".to_string(),
                });
            }
            state.sessions.retire(&handle, "client left");
            // The writer drains its queue before honouring stop, so the close frame goes out
            let _ = timeout(config.write_timeout, writer).await;
        }
        ReaderExit::Closed(CloseKind::Abnormal) => {
            handle.stop();
            if handle.close(CloseKind::Abnormal) == SessionState::Reconnecting {
                state.sessions.begin_grace(Arc::clone(&handle));
            }
            writer.abort();
        }
        ReaderExit::Stopped => {
            writer.abort();
        }
    }

    info!(player_id = %player_id, session_id = %handle.session_id, "WebSocket connection closed");
}

/// Read until a valid setName, an explicit leave, or the stream ends. Anything else is
/// answered with an error and otherwise ignored.
async fn await_handshake(sink: &mut WsSink, stream: &mut WsStream, write_timeout: Duration) -> Option<Handshake> {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match read_handshake(&text) {
                Ok(handshake) => return Some(handshake),
                Err(e) => {
                    debug!(error = %e, "Rejected pre-handshake message");
                    let envelope = Envelope::new(Payload::Error(e.to_message()), unix_millis());
                    if write_envelope(sink, &envelope, write_timeout).await.is_err() {
                        return None;
                    }
                }
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket error during handshake");
                return None;
            }
        }
    }
    None
}

/// Send an error then close the socket; used before a session exists
async fn reject(sink: &mut WsSink, err: &SessionError, code: u16, write_timeout: Duration) {
    let envelope = Envelope::new(Payload::Error(err.to_message()), unix_millis());
    if write_envelope(sink, &envelope, write_timeout).await.is_ok() {
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: err.code().into(),
        }));
        let _ = timeout(write_timeout, sink.send(frame)).await;
    }
}

async fn write_envelope(sink: &mut WsSink, envelope: &Envelope, write_timeout: Duration) -> Result<(), String> {
    let json = codec::encode(envelope).map_err(|e| e.to_string())?;
    match timeout(write_timeout, sink.send(Message::Text(json))).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("write timed out".to_string()),
    }
}

/// Reader loop: WebSocket -> action processor
async fn run_reader(
    stream: &mut WsStream,
    handle: &SessionHandle,
    ctx: &SessionContext,
    limiter: &SessionRateLimiter,
) -> ReaderExit {
    let player_id = handle.player_id;
    let mut stop = handle.stop_signal();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = wait_for_stop(&mut stop) => return ReaderExit::Stopped,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(player_id = %player_id, error = %e, "WebSocket read error");
                return ReaderExit::Closed(CloseKind::Abnormal);
            }
            None => {
                debug!(player_id = %player_id, "Stream ended without close frame");
                return ReaderExit::Closed(CloseKind::Abnormal);
            }
        };

        match message {
            Message::Text(text) => {
                if !limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match ctx.handle_text(&text) {
                    Ok(Inbound::Applied(_)) => {}
                    Ok(Inbound::Reply(envelope)) => {
                        if let Err(e) = handle.send(&envelope) {
                            error!(player_id = %player_id, error = %e, "Failed to encode reply");
                        }
                    }
                    Ok(Inbound::Leave(reason)) => {
                        info!(player_id = %player_id, reason = reason.as_deref().unwrap_or(""), "Client left");
                        return ReaderExit::Closed(CloseKind::Normal);
                    }
                    Err(e) => {
                        debug!(player_id = %player_id, code = e.code(), error = %e, "Rejected message");
                        if handle.send_error(&e) == Offer::Full {
                            warn!(player_id = %player_id, "Outbound queue full, dropping error reply");
                        }
                    }
                }
            }
            Message::Binary(_) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Message::Ping(_) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Message::Pong(_) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Message::Close(frame) => {
                let kind = match frame.as_ref().map(|f| f.code) {
                    None | Some(close_code::NORMAL) | Some(close_code::AWAY) => CloseKind::Normal,
                    Some(_) => CloseKind::Abnormal,
                };
                info!(player_id = %player_id, ?kind, "Client initiated close");
                return ReaderExit::Closed(kind);
            }
        }
    }
}

/// Writer task: outbound queue -> WebSocket. Every write is bounded by `write_timeout`;
/// a failed or stalled write closes the session.
async fn run_writer(
    mut sink: WsSink,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    handle: Arc<SessionHandle>,
    sessions: Arc<SessionRegistry>,
    write_timeout: Duration,
) {
    let player_id = handle.player_id;
    let mut stop = handle.stop_signal();

    loop {
        let item = tokio::select! {
            biased;
            item = outbound_rx.recv() => item,
            _ = wait_for_stop(&mut stop) => break,
        };
        let Some(item) = item else { break };

        let (message, closing) = match item {
            Outbound::Frame(text) => (Message::Text(text), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        match timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) if closing => break,
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                fail_session(&handle, &sessions, "write failed");
                break;
            }
            Err(_) => {
                warn!(player_id = %player_id, "WebSocket write timed out");
                fail_session(&handle, &sessions, "write timed out");
                break;
            }
        }
    }
}

fn fail_session(handle: &SessionHandle, sessions: &SessionRegistry, reason: &str) {
    // Only an open session is torn down here; closing and reconnecting ones already
    // have an owner for their cleanup
    if handle.transition(SessionState::Closing).is_ok() {
        sessions.retire(handle, reason);
    } else {
        handle.stop();
    }
}
