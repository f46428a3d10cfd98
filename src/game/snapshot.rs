//! Snapshot building for network transmission

use crate::ws::protocol::{GameState, PlayerSnapshot};

use super::store::{MatchState, PlayerState};

/// Builds full-state snapshots. Every tick ships the whole world; there is no delta encoding.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Copy the world into its wire form
    pub fn build(state: &MatchState) -> GameState {
        GameState {
            players: state
                .players
                .iter()
                .map(|(id, p)| (*id, Self::player(p)))
                .collect(),
            game_time: state.game_time,
            is_game_active: state.is_active,
            match_id: state.match_id,
        }
    }

    pub fn player(p: &PlayerState) -> PlayerSnapshot {
        PlayerSnapshot {
            id: p.id,
            display_name: p.display_name.clone(),
            position: p.position,
            rotation: p.rotation,
            health: p.health,
            weapon: p.weapon,
            kills: p.kills,
            deaths: p.deaths,
            alive: p.alive,
            ammo: p.ammo,
            is_reloading: p.is_reloading(),
        }
    }
}

/// Snapshot size stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
