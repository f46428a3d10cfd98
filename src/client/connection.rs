//! Connection driver for the client engine
//!
//! A single driver task owns the socket, so at most one connect or reconnect attempt is
//! ever in flight. Handles talk to it through a command queue and observe it through
//! the lifecycle watch and the event channel.

use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::clock::wait_for_stop;
use crate::util::backoff::Backoff;
use crate::util::time::unix_millis;
use crate::ws::codec;
use crate::ws::error::validate_display_name;
use crate::ws::lifecycle::{CloseKind, Lifecycle, SessionState};
use crate::ws::protocol::{DisconnectInfo, Envelope, ErrorMessage, Payload, PlayerAction, PlayerId, PlayerSnapshot, SetName};

use super::mirror::{ClientMirror, Reconciliation};
use super::ClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("client is closed")]
    Closed,

    #[error("command queue is full")]
    QueueFull,

    #[error("invalid display name: {0}")]
    InvalidName(String),
}

/// Notifications for whoever renders the match
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(SessionState),
    Joined { player_id: PlayerId, match_id: Uuid },
    /// Connection lost; the next attempt starts after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    Snapshot { game_time: f64, reconciliation: Reconciliation },
    PlayerUpdated(PlayerSnapshot),
    ServerError(ErrorMessage),
}

#[derive(Debug)]
enum Command {
    Action(PlayerAction),
    Rename(String),
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// Leave, stop, or the server closing normally; never retried
    Explicit,
    Abnormal,
}

struct Shared {
    config: ClientConfig,
    display_name: Mutex<String>,
    player_id: Mutex<Option<PlayerId>>,
    resume_token: Mutex<Option<String>>,
    mirror: Mutex<ClientMirror>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn transition(&self, next: SessionState) -> bool {
        let result = self.lifecycle.lock().transition(next);
        match result {
            Ok(_) => {
                self.publish_state(next);
                true
            }
            Err(e) => {
                debug!(error = %e, "Transition refused");
                false
            }
        }
    }

    fn close_abnormal(&self) -> SessionState {
        let state = self.lifecycle.lock().close(CloseKind::Abnormal);
        self.publish_state(state);
        state
    }

    fn finish(&self) {
        self.lifecycle.lock().finish();
        self.publish_state(SessionState::Closed);
    }

    fn publish_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
        self.emit(ClientEvent::StateChanged(state));
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Server URL, with the resume credentials once the server has assigned an id
    fn connect_url(&self) -> String {
        let url = &self.config.server_url;
        let player_id = *self.player_id.lock();
        match (player_id, self.resume_token.lock().as_deref()) {
            (Some(id), Some(token)) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{}{}playerId={}&resumeToken={}", url, separator, id, token)
            }
            _ => url.clone(),
        }
    }
}

/// Handle to the client engine
pub struct SyncClient {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    stop_tx: watch::Sender<bool>,
}

impl SyncClient {
    /// Spawn the connection driver. Must be called from within a tokio runtime.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let display_name =
            validate_display_name(&config.display_name).map_err(|e| ClientError::InvalidName(e.to_string()))?;

        let (commands, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let (events, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            mirror: Mutex::new(ClientMirror::new(&config)),
            display_name: Mutex::new(display_name),
            player_id: Mutex::new(None),
            resume_token: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::new()),
            state_tx,
            events,
            config,
        });

        tokio::spawn(drive(Arc::clone(&shared), command_rx, stop_rx));

        Ok(Self {
            shared,
            commands,
            stop_tx,
        })
    }

    /// Predict the action locally, then queue it for the server. Actions submitted
    /// while the client is not joined are dropped by the driver; the next snapshot
    /// corrects their prediction.
    pub fn submit(&self, action: PlayerAction) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.shared.mirror.lock().predict(&action);
        self.enqueue(Command::Action(action))
    }

    /// Change the display name now and for every future reconnect
    pub fn rename(&self, display_name: &str) -> Result<(), ClientError> {
        let name = validate_display_name(display_name).map_err(|e| ClientError::InvalidName(e.to_string()))?;
        self.enqueue(Command::Rename(name))
    }

    /// Explicit leave: send `disconnect`, close normally, never reconnect
    pub async fn leave(&self) {
        if self.commands.send(Command::Leave).await.is_ok() {
            self.wait_closed().await;
        }
    }

    /// Cancel the driver. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Resolves once the client has closed for good
    pub async fn wait_closed(&self) {
        let mut state_rx = self.watch_state();
        loop {
            if self.is_closed() {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lifecycle.lock().state()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.lifecycle.lock().is_reconnecting()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.lock().is_terminal()
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        *self.shared.player_id.lock()
    }

    pub fn mirror(&self) -> MutexGuard<'_, ClientMirror> {
        self.shared.mirror.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    fn enqueue(&self, command: Command) -> Result<(), ClientError> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::QueueFull,
            TrySendError::Closed(_) => ClientError::Closed,
        })
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connect, run, and reconnect with backoff until an explicit end or the retry budget
/// runs out
async fn drive(shared: Arc<Shared>, mut commands: mpsc::Receiver<Command>, mut stop: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(shared.config.backoff);

    loop {
        let url = shared.connect_url();
        debug!(url = %url, attempt = backoff.attempts(), "Connecting");

        let connect = timeout(shared.config.connect_timeout, connect_async(url));
        tokio::pin!(connect);
        let attempt = loop {
            tokio::select! {
                result = &mut connect => break Some(result),
                _ = wait_for_stop(&mut stop) => break None,
                command = commands.recv() => {
                    if idle_command(&shared, command) {
                        break None;
                    }
                }
            }
        };

        let end = match attempt {
            None => ConnectionEnd::Explicit,
            Some(Ok(Ok((ws, _response)))) => run_connection(&shared, ws, &mut commands, &mut stop, &mut backoff).await,
            Some(Ok(Err(e))) => {
                warn!(error = %e, "Connect failed");
                ConnectionEnd::Abnormal
            }
            Some(Err(_)) => {
                warn!("Connect timed out");
                ConnectionEnd::Abnormal
            }
        };

        if end == ConnectionEnd::Explicit {
            shared.finish();
            info!("Client closed");
            return;
        }

        shared.close_abnormal();
        let Some(delay) = backoff.next_delay() else {
            warn!(attempts = backoff.attempts(), "Reconnect budget exhausted");
            shared.finish();
            return;
        };
        info!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        shared.emit(ClientEvent::Reconnecting {
            attempt: backoff.attempts(),
            delay,
        });

        let wait = sleep(delay);
        tokio::pin!(wait);
        let retry = loop {
            tokio::select! {
                _ = &mut wait => break true,
                _ = wait_for_stop(&mut stop) => break false,
                command = commands.recv() => {
                    if idle_command(&shared, command) {
                        break false;
                    }
                }
            }
        };
        if !retry {
            shared.finish();
            info!("Client closed while reconnecting");
            return;
        }
        shared.transition(SessionState::Connecting);
    }
}

/// Handle a command while no joined connection exists. Returns true when the client
/// should end.
fn idle_command(shared: &Shared, command: Option<Command>) -> bool {
    match command {
        None | Some(Command::Leave) => true,
        Some(Command::Action(action)) => {
            debug!(action = action.kind().as_str(), "Not connected, dropping action");
            false
        }
        Some(Command::Rename(name)) => {
            *shared.display_name.lock() = name;
            false
        }
    }
}

async fn run_connection(
    shared: &Shared,
    ws: WsStream,
    commands: &mut mpsc::Receiver<Command>,
    stop: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> ConnectionEnd {
    let write_timeout = shared.config.write_timeout;
    let (mut sink, mut stream) = ws.split();

    if !shared.transition(SessionState::Open) {
        return ConnectionEnd::Abnormal;
    }
    info!("Connected");

    // Every connection starts with the handshake; actions wait for `connect`
    let display_name = shared.display_name.lock().clone();
    if send_payload(&mut sink, Payload::SetName(SetName { display_name }), write_timeout)
        .await
        .is_err()
    {
        return ConnectionEnd::Abnormal;
    }

    let mut joined = false;
    let mut settled = false;
    let sustained = sleep(shared.config.sustained_open);
    tokio::pin!(sustained);

    loop {
        tokio::select! {
            _ = &mut sustained, if !settled => {
                settled = true;
                backoff.reset();
                debug!("Connection sustained, backoff reset");
            }
            _ = wait_for_stop(&mut *stop) => {
                shared.transition(SessionState::Closing);
                close_normally(&mut sink, write_timeout).await;
                return ConnectionEnd::Explicit;
            }
            command = commands.recv() => match command {
                Some(Command::Action(action)) => {
                    if !joined {
                        debug!(action = action.kind().as_str(), "Not joined yet, dropping action");
                        continue;
                    }
                    if send_payload(&mut sink, Payload::PlayerAction(action), write_timeout).await.is_err() {
                        return ConnectionEnd::Abnormal;
                    }
                }
                Some(Command::Rename(display_name)) => {
                    *shared.display_name.lock() = display_name.clone();
                    if send_payload(&mut sink, Payload::SetName(SetName { display_name }), write_timeout).await.is_err() {
                        return ConnectionEnd::Abnormal;
                    }
                }
                Some(Command::Leave) | None => {
                    shared.transition(SessionState::Closing);
                    let leave = Payload::Disconnect(DisconnectInfo::default());
                    if send_payload(&mut sink, leave, write_timeout).await.is_ok() {
                        close_normally(&mut sink, write_timeout).await;
                    }
                    return ConnectionEnd::Explicit;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(end) = handle_server_text(shared, &text, &mut joined) {
                        return end;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let normal = frame.as_ref().map_or(false, |f| f.code == CloseCode::Normal);
                    info!(normal, "Server closed connection");
                    return if normal { ConnectionEnd::Explicit } else { ConnectionEnd::Abnormal };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read error");
                    return ConnectionEnd::Abnormal;
                }
                None => {
                    warn!("Server stream ended without close frame");
                    return ConnectionEnd::Abnormal;
                }
            },
        }
    }
}

fn handle_server_text(shared: &Shared, text: &str, joined: &mut bool) -> Option<ConnectionEnd> {
    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Failed to decode server message");
            return None;
        }
    };

    match envelope.payload {
        Payload::Connect(info) => {
            *joined = true;
            *shared.player_id.lock() = Some(info.player_id);
            *shared.resume_token.lock() = Some(info.resume_token);
            shared.mirror.lock().set_local_player(info.player_id, info.match_id);
            info!(player_id = %info.player_id, match_id = %info.match_id, "Joined match");
            shared.emit(ClientEvent::Joined {
                player_id: info.player_id,
                match_id: info.match_id,
            });
        }
        Payload::GameState(state) => {
            let game_time = state.game_time;
            let reconciliation = shared.mirror.lock().apply_snapshot(state);
            shared.emit(ClientEvent::Snapshot {
                game_time,
                reconciliation,
            });
        }
        Payload::PlayerUpdate(player) => {
            shared.mirror.lock().apply_player_update(player.clone());
            shared.emit(ClientEvent::PlayerUpdated(player));
        }
        Payload::Error(error) => {
            warn!(code = %error.code, message = %error.message, "Server rejected message");
            shared.emit(ClientEvent::ServerError(error));
        }
        Payload::Disconnect(info) => {
            info!(reason = info.reason.as_deref().unwrap_or(""), "Server ended the session");
            return Some(ConnectionEnd::Explicit);
        }
        other => {
            debug!(kind = %other.kind(), "Ignoring unexpected message type");
        }
    }
    None
}

async fn send_payload(sink: &mut WsSink, payload: Payload, write_timeout: Duration) -> Result<(), ()> {
    let envelope = Envelope::new(payload, unix_millis());
    let json = match codec::encode(&envelope) {
        Ok(json) => json,
        Err(e) => {
            // Encoding our own types cannot fail in practice; drop the message if it does
            warn!(error = %e, "Failed to encode outbound message");
            return Ok(());
        }
    };

    match timeout(write_timeout, sink.send(Message::Text(json))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "WebSocket send failed");
            Err(())
        }
        Err(_) => {
            warn!("WebSocket write timed out");
            Err(())
        }
    }
}

async fn close_normally(sink: &mut WsSink, write_timeout: Duration) {
    let frame = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "leave".into(),
    }));
    let _ = timeout(write_timeout, sink.send(frame)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::backoff::BackoffPolicy;
    use crate::ws::protocol::{ConnectInfo, MessageType};
    use tokio::net::TcpListener;
    use tokio::sync::broadcast::error::RecvError;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    type ServerWs = WebSocketStream<TcpStream>;

    fn test_config(server_url: String) -> ClientConfig {
        ClientConfig {
            server_url,
            display_name: "Tester".to_string(),
            backoff: BackoffPolicy {
                base: Duration::from_millis(20),
                max: Duration::from_millis(100),
                max_attempts: Some(5),
            },
            sustained_open: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    async fn fake_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accept one connection, returning it with the request path and query
    async fn accept(listener: &TcpListener) -> (ServerWs, String) {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let uri = Arc::new(Mutex::new(String::new()));
        let captured = Arc::clone(&uri);
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *captured.lock() = req.uri().to_string();
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        let uri = uri.lock().clone();
        (ws, uri)
    }

    async fn next_envelope(ws: &mut ServerWs) -> Envelope {
        loop {
            let message = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no message from client")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return codec::decode(&text).unwrap();
            }
        }
    }

    async fn send_to(ws: &mut ServerWs, payload: Payload) {
        let text = codec::encode(&Envelope::new(payload, unix_millis())).unwrap();
        ws.send(Message::Text(text)).await.unwrap();
    }

    async fn wait_for(events: &mut broadcast::Receiver<ClientEvent>, pred: impl Fn(&ClientEvent) -> bool) {
        timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("event never arrived");
    }

    async fn join(ws: &mut ServerWs, events: &mut broadcast::Receiver<ClientEvent>) -> PlayerId {
        let hello = next_envelope(ws).await;
        assert_eq!(
            hello.payload,
            Payload::SetName(SetName {
                display_name: "Tester".to_string()
            })
        );
        let player_id = Uuid::new_v4();
        send_to(
            ws,
            Payload::Connect(ConnectInfo {
                player_id,
                match_id: Uuid::nil(),
                resume_token: format!("token-{}", player_id.simple()),
            }),
        )
        .await;
        wait_for(events, |e| matches!(e, ClientEvent::Joined { .. })).await;
        player_id
    }

    #[tokio::test]
    async fn test_abnormal_drop_reconnects_and_resumes() {
        let (listener, url) = fake_server().await;
        let client = SyncClient::connect(test_config(url)).unwrap();
        let mut events = client.subscribe();

        let (mut ws, uri) = accept(&listener).await;
        assert!(!uri.contains("playerId"));
        let player_id = join(&mut ws, &mut events).await;
        assert_eq!(client.player_id(), Some(player_id));

        // Vanish without a close handshake
        drop(ws);
        wait_for(&mut events, |e| {
            matches!(e, ClientEvent::StateChanged(SessionState::Reconnecting))
        })
        .await;

        let (mut ws, uri) = accept(&listener).await;
        assert!(uri.contains(&format!("playerId={}", player_id)));
        assert!(uri.contains(&format!("resumeToken=token-{}", player_id.simple())));
        assert_eq!(next_envelope(&mut ws).await.kind(), MessageType::SetName);

        client.stop();
        client.stop();
        timeout(Duration::from_secs(5), client.wait_closed()).await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(!client.is_reconnecting());
    }

    async fn next_reconnect(events: &mut broadcast::Receiver<ClientEvent>) -> (u32, Duration) {
        timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Reconnecting { attempt, delay }) => return (attempt, delay),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("client never scheduled a reconnect")
    }

    /// Accept the TCP connection and hang up before the WebSocket handshake
    async fn refuse(listener: &TcpListener) {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        drop(stream);
    }

    #[tokio::test]
    async fn test_sustained_connection_resets_backoff() {
        let (listener, url) = fake_server().await;
        let mut config = test_config(url);
        config.sustained_open = Duration::from_millis(200);
        let client = SyncClient::connect(config).unwrap();
        let mut events = client.subscribe();

        refuse(&listener).await;
        assert_eq!(next_reconnect(&mut events).await, (1, Duration::from_millis(20)));
        refuse(&listener).await;
        assert_eq!(next_reconnect(&mut events).await, (2, Duration::from_millis(40)));

        // Stay up well past the sustained period, then vanish
        let (mut ws, _) = accept(&listener).await;
        join(&mut ws, &mut events).await;
        sleep(Duration::from_millis(400)).await;
        drop(ws);

        assert_eq!(next_reconnect(&mut events).await, (1, Duration::from_millis(20)));
        client.stop();
    }

    #[tokio::test]
    async fn test_short_connection_keeps_backoff_growing() {
        let (listener, url) = fake_server().await;
        let client = SyncClient::connect(test_config(url)).unwrap();
        let mut events = client.subscribe();

        refuse(&listener).await;
        assert_eq!(next_reconnect(&mut events).await, (1, Duration::from_millis(20)));

        // Dropped long before the one second sustained period
        let (mut ws, _) = accept(&listener).await;
        join(&mut ws, &mut events).await;
        drop(ws);

        assert_eq!(next_reconnect(&mut events).await, (2, Duration::from_millis(40)));
        client.stop();
    }

    #[tokio::test]
    async fn test_server_normal_close_is_final() {
        let (listener, url) = fake_server().await;
        let client = SyncClient::connect(test_config(url)).unwrap();
        let mut events = client.subscribe();

        let (mut ws, _) = accept(&listener).await;
        join(&mut ws, &mut events).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();

        timeout(Duration::from_secs(5), client.wait_closed()).await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
        assert_eq!(client.submit(PlayerAction::Jump {}), Err(ClientError::Closed));
    }

    #[tokio::test]
    async fn test_leave_sends_disconnect_and_normal_close() {
        let (listener, url) = fake_server().await;
        let client = SyncClient::connect(test_config(url)).unwrap();
        let mut events = client.subscribe();

        let (mut ws, _) = accept(&listener).await;
        join(&mut ws, &mut events).await;

        let server = async {
            assert_eq!(next_envelope(&mut ws).await.kind(), MessageType::Disconnect);
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
                other => panic!("expected close frame, got {:?}", other),
            }
        };
        let (_, ()) = tokio::join!(client.leave(), server);

        assert_eq!(client.state(), SessionState::Closed);
        assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
    }

    #[tokio::test]
    async fn test_actions_wait_for_join() {
        let (listener, url) = fake_server().await;
        let client = SyncClient::connect(test_config(url)).unwrap();
        let mut events = client.subscribe();

        let (mut ws, _) = accept(&listener).await;
        assert_eq!(next_envelope(&mut ws).await.kind(), MessageType::SetName);

        // Not joined yet: dropped by the driver
        client.submit(PlayerAction::Jump {}).unwrap();
        sleep(Duration::from_millis(50)).await;

        send_to(
            &mut ws,
            Payload::Connect(ConnectInfo {
                player_id: Uuid::new_v4(),
                match_id: Uuid::nil(),
                resume_token: "t".to_string(),
            }),
        )
        .await;
        wait_for(&mut events, |e| matches!(e, ClientEvent::Joined { .. })).await;

        client.submit(PlayerAction::Reload {}).unwrap();
        match next_envelope(&mut ws).await.payload {
            Payload::PlayerAction(action) => assert_eq!(action, PlayerAction::Reload {}),
            other => panic!("expected reload, got {:?}", other.kind()),
        }
        client.stop();
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_terminal() {
        // Reserve a port, then free it so every connect is refused
        let (listener, url) = fake_server().await;
        drop(listener);

        let mut config = test_config(url);
        config.backoff = BackoffPolicy {
            base: Duration::from_millis(5),
            max: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        let client = SyncClient::connect(config).unwrap();

        timeout(Duration::from_secs(5), client.wait_closed()).await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_display_name_is_rejected() {
        let mut config = test_config("ws://127.0.0.1:1/ws".to_string());
        config.display_name = "   ".to_string();
        assert!(matches!(SyncClient::connect(config), Err(ClientError::InvalidName(_))));
    }
}
