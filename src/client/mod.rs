//! Client synchronization engine
//!
//! [`SyncClient`] keeps one connection to the server alive (reconnecting with backoff
//! after unexpected drops) and maintains a [`ClientMirror`] that predicts local actions
//! and reconciles them against each authoritative snapshot.

pub mod connection;
pub mod mirror;

use std::time::Duration;

use crate::game::physics::ArenaBounds;
use crate::util::backoff::BackoffPolicy;

pub use connection::{ClientError, ClientEvent, SyncClient};
pub use mirror::{ClientMirror, Reconciliation};

/// Client tuning
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/ws`
    pub server_url: String,
    /// Sent in `setName` on every (re)connect
    pub display_name: String,
    pub backoff: BackoffPolicy,
    /// Time a connection must stay open before the backoff counter resets
    pub sustained_open: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Allowed distance between predicted and authoritative position
    pub position_tolerance: f32,
    /// Must match the server for move prediction to line up
    pub move_speed: f32,
    pub tick_rate: u32,
    pub arena: ArenaBounds,
    /// Pending commands before `submit` reports the queue as full
    pub command_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            display_name: "Player".to_string(),
            backoff: BackoffPolicy::default(),
            sustained_open: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            position_tolerance: 0.5,
            move_speed: 8.0,
            tick_rate: 30,
            arena: ArenaBounds::default(),
            command_capacity: 64,
        }
    }
}
