//! Server-side session registry
//!
//! One [`SessionHandle`] per connected player. The registry owns player membership on
//! the network side: joining adds the player to the store, retiring a session removes
//! it, and a session that dropped abnormally keeps its player for the reconnect grace
//! period so a new connection can resume it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::action::ActionOutcome;
use crate::game::snapshot::{SnapshotBuilder, SnapshotStats};
use crate::game::{ActionProcessor, MatchStore, SnapshotSink, StoreError};
use crate::util::time::unix_millis;
use crate::ws::codec::{self, CodecError};
use crate::ws::error::{validate_display_name, SessionError};
use crate::ws::lifecycle::{CloseKind, InvalidTransition, Lifecycle, SessionState};
use crate::ws::protocol::{ConnectInfo, Envelope, ErrorMessage, GameState, Payload, PlayerId, SetName};

/// Item queued for a session's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encoded envelope
    Frame(String),
    /// Close frame; the writer exits after sending it
    Close { code: u16, reason: String },
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue at capacity, item dropped
    Full,
    /// Writer is gone
    Closed,
}

/// How a session joined the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Joined,
    /// Took over a player whose previous session was reconnecting
    Resumed,
}

pub struct SessionHandle {
    pub session_id: Uuid,
    pub player_id: PlayerId,
    resume_token: String,
    lifecycle: Mutex<Lifecycle>,
    outbound: mpsc::Sender<Outbound>,
    stop_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(player_id: PlayerId, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);
        let handle = Arc::new(Self {
            session_id: Uuid::new_v4(),
            player_id,
            resume_token: Uuid::new_v4().simple().to_string(),
            lifecycle: Mutex::new(Lifecycle::new()),
            outbound,
            stop_tx,
        });
        (handle, outbound_rx)
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state()
    }

    /// Handed to the client in `connect`; only its holder may resume this player
    pub fn resume_token(&self) -> &str {
        &self.resume_token
    }

    pub fn transition(&self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        self.lifecycle.lock().transition(next)
    }

    pub fn close(&self, kind: CloseKind) -> SessionState {
        self.lifecycle.lock().close(kind)
    }

    pub fn finish(&self) {
        self.lifecycle.lock().finish();
    }

    /// Signal the reader and writer tasks to stop. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Enqueue without waiting
    pub fn offer(&self, item: Outbound) -> Offer {
        match self.outbound.try_send(item) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub fn send(&self, envelope: &Envelope) -> Result<Offer, CodecError> {
        Ok(self.offer(Outbound::Frame(codec::encode(envelope)?)))
    }

    pub fn send_error(&self, error: &SessionError) -> Offer {
        send_error_message(self, error.to_message())
    }
}

fn send_error_message(handle: &SessionHandle, message: ErrorMessage) -> Offer {
    let envelope = Envelope::new(Payload::Error(message), unix_millis());
    match handle.send(&envelope) {
        Ok(offer) => offer,
        Err(e) => {
            error!(player_id = %handle.player_id, error = %e, "Failed to encode error envelope");
            Offer::Full
        }
    }
}

/// Snapshot delivery counters exposed on the health route
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BroadcastStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
    pub dropped_frames: u64,
}

pub struct SessionRegistry {
    sessions: DashMap<PlayerId, Arc<SessionHandle>>,
    store: Arc<MatchStore>,
    reconnect_grace: Duration,
    stats: Mutex<SnapshotStats>,
    dropped_frames: Mutex<u64>,
}

impl SessionRegistry {
    pub fn new(store: Arc<MatchStore>, reconnect_grace: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            reconnect_grace,
            stats: Mutex::new(SnapshotStats::default()),
            dropped_frames: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, player_id: PlayerId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&player_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn store(&self) -> &Arc<MatchStore> {
        &self.store
    }

    /// Attach a session to its player, creating the player or resuming a reconnecting one.
    /// Resuming requires the token issued to the previous session.
    pub fn join(
        &self,
        handle: &Arc<SessionHandle>,
        display_name: &str,
        resume_token: Option<&str>,
    ) -> Result<JoinKind, StoreError> {
        let player_id = handle.player_id;

        // The entry guard serializes concurrent joins for the same id
        match self.sessions.entry(player_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() != SessionState::Reconnecting {
                    return Err(StoreError::DuplicatePlayer(player_id));
                }
                if resume_token != Some(entry.get().resume_token()) {
                    warn!(player_id = %player_id, "Resume refused, token mismatch");
                    return Err(StoreError::DuplicatePlayer(player_id));
                }
                if !self.store.contains(player_id) {
                    self.store.add_player(player_id)?;
                }
                self.store.update_player_name(player_id, display_name)?;

                let previous = entry.insert(Arc::clone(handle));
                previous.finish();
                previous.stop();
                info!(
                    player_id = %player_id,
                    session_id = %handle.session_id,
                    previous_session = %previous.session_id,
                    "Session resumed"
                );
                Ok(JoinKind::Resumed)
            }
            Entry::Vacant(entry) => {
                self.store.add_player(player_id)?;
                self.store.update_player_name(player_id, display_name)?;
                entry.insert(Arc::clone(handle));
                info!(player_id = %player_id, session_id = %handle.session_id, "Session joined");
                Ok(JoinKind::Joined)
            }
        }
    }

    /// Queue the welcome (`connect`, then a full snapshot) and mark the session Open.
    /// Broadcasts skip sessions that are not Open, so nothing can overtake the welcome.
    pub fn open(&self, handle: &SessionHandle) -> Result<SessionState, InvalidTransition> {
        let connect = Envelope::new(
            Payload::Connect(ConnectInfo {
                player_id: handle.player_id,
                match_id: self.store.match_id(),
                resume_token: handle.resume_token().to_string(),
            }),
            unix_millis(),
        );
        let snapshot = Envelope::new(Payload::GameState(self.store.snapshot()), unix_millis());
        for envelope in [&connect, &snapshot] {
            if let Err(e) = handle.send(envelope) {
                error!(player_id = %handle.player_id, error = %e, "Failed to encode welcome");
            }
        }
        handle.transition(SessionState::Open)
    }

    /// Drop a session and remove its player. Only the first call for a given session
    /// removes anything; later calls and calls for superseded sessions return false.
    pub fn retire(&self, handle: &SessionHandle, reason: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(&handle.player_id, |_, current| current.session_id == handle.session_id);
        handle.finish();
        handle.stop();

        if removed.is_none() {
            return false;
        }

        match self.store.remove_player(handle.player_id) {
            Ok(_) => info!(player_id = %handle.player_id, reason, "Session retired"),
            Err(e) => warn!(player_id = %handle.player_id, error = %e, reason, "Retired session had no player"),
        }
        true
    }

    /// Keep the player for the grace period, then retire unless a new session took over
    pub fn begin_grace(self: &Arc<Self>, handle: Arc<SessionHandle>) {
        let registry = Arc::clone(self);
        let grace = self.reconnect_grace;
        info!(
            player_id = %handle.player_id,
            grace_ms = grace.as_millis() as u64,
            "Session reconnecting"
        );

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if registry.retire(&handle, "reconnect grace expired") {
                info!(player_id = %handle.player_id, "Reconnect window closed");
            }
        });
    }

    /// Encode the snapshot once and enqueue it for every open session. Never waits on
    /// a slow consumer: a full queue loses this frame, a closed one retires the session.
    pub fn broadcast(&self, snapshot: &GameState) {
        let envelope = Envelope::new(Payload::GameState(snapshot.clone()), unix_millis());
        let frame = match codec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                return;
            }
        };

        let mut dead = Vec::new();
        let mut dropped = 0u64;
        for entry in self.sessions.iter() {
            let handle = entry.value();
            if handle.state() != SessionState::Open {
                continue;
            }
            match handle.offer(Outbound::Frame(frame.clone())) {
                Offer::Queued => {}
                Offer::Full => {
                    dropped += 1;
                    warn!(player_id = %handle.player_id, "Outbound queue full, dropping snapshot");
                }
                Offer::Closed => dead.push(Arc::clone(handle)),
            }
        }

        // Shard locks are released; safe to mutate the map now
        for handle in dead {
            if handle.transition(SessionState::Closing).is_ok() {
                self.retire(&handle, "outbound channel closed");
            }
        }

        self.stats.lock().record(snapshot.players.len(), frame.len());
        if dropped > 0 {
            *self.dropped_frames.lock() += dropped;
        }
    }

    pub fn stats(&self) -> BroadcastStats {
        let stats = self.stats.lock();
        BroadcastStats {
            total_snapshots: stats.total_snapshots,
            total_bytes: stats.total_bytes,
            avg_players_per_snapshot: stats.avg_players_per_snapshot,
            dropped_frames: *self.dropped_frames.lock(),
        }
    }

    /// Stop every live session (server shutdown)
    pub fn stop_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().stop();
        }
    }
}

impl SnapshotSink for SessionRegistry {
    fn publish(&self, snapshot: &GameState) {
        self.broadcast(snapshot);
    }
}

/// First meaningful message on a fresh connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Named(String),
    Leave,
}

/// Interpret a message received before the session has joined
pub fn read_handshake(text: &str) -> Result<Handshake, SessionError> {
    let envelope = codec::decode(text)?;
    match envelope.payload {
        Payload::SetName(SetName { display_name }) => Ok(Handshake::Named(validate_display_name(&display_name)?)),
        Payload::Disconnect(_) => Ok(Handshake::Leave),
        other => Err(SessionError::HandshakeRequired(other.kind())),
    }
}

/// What the reader should do with a decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Applied(ActionOutcome),
    Reply(Envelope),
    Leave(Option<String>),
}

/// Inbound dispatch for a joined session
pub struct SessionContext {
    player_id: PlayerId,
    processor: Arc<ActionProcessor>,
}

impl SessionContext {
    pub fn new(player_id: PlayerId, processor: Arc<ActionProcessor>) -> Self {
        Self { player_id, processor }
    }

    pub fn handle_text(&self, text: &str) -> Result<Inbound, SessionError> {
        let envelope = codec::decode(text)?;
        match envelope.payload {
            Payload::PlayerAction(action) => {
                let outcome = self.processor.handle_action(self.player_id, &action)?;
                Ok(Inbound::Applied(outcome))
            }
            Payload::SetName(SetName { display_name }) => {
                let name = validate_display_name(&display_name)?;
                let store = self.processor.store();
                store.update_player_name(self.player_id, &name)?;
                let player = store.player(self.player_id)?;
                Ok(Inbound::Reply(Envelope::new(
                    Payload::PlayerUpdate(SnapshotBuilder::player(&player)),
                    unix_millis(),
                )))
            }
            Payload::Disconnect(info) => Ok(Inbound::Leave(info.reason)),
            other => Err(SessionError::UnexpectedMessage(other.kind())),
        }
    }
}
