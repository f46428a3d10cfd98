//! Arena Sync - authoritative state synchronization for a multiplayer arena shooter
//!
//! The server side owns the match state ([`game::MatchStore`]), applies player intents
//! ([`game::ActionProcessor`]), advances time ([`game::SimulationClock`]) and fans
//! snapshots out over WebSocket sessions ([`ws::SessionRegistry`]). The [`client`]
//! module is the matching client engine: local prediction, snapshot reconciliation and
//! reconnect with backoff.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
