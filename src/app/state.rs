//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{ActionProcessor, ArenaBounds, MatchStore, SimulationClock, SnapshotSink};
use crate::util::time::tick_delta;
use crate::ws::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MatchStore>,
    pub processor: Arc<ActionProcessor>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Authoritative match state
        let bounds = ArenaBounds::new(config.arena_half_extent, config.arena_height);
        let store = Arc::new(MatchStore::new(config.max_players, bounds, config.match_seed));

        // Movement integrates one tick's worth of travel per move intent
        let processor = Arc::new(ActionProcessor::new(
            Arc::clone(&store),
            config.move_speed,
            tick_delta(config.tick_rate),
        ));

        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&store), config.reconnect_grace));

        Self {
            config,
            store,
            processor,
            sessions,
        }
    }

    /// Clock publishing snapshots to every open session
    pub fn clock(&self) -> SimulationClock {
        SimulationClock::new(
            Arc::clone(&self.store),
            Arc::clone(&self.sessions) as Arc<dyn SnapshotSink>,
            self.config.tick_rate,
        )
    }
}
