//! Client-side mirror of the match: local prediction plus snapshot reconciliation

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::game::combat::WeaponStats;
use crate::game::physics::{ArenaBounds, PhysicsSystem, JUMP_VELOCITY};
use crate::util::time::tick_delta;
use crate::ws::protocol::{GameState, PlayerAction, PlayerId, PlayerSnapshot, WeaponKind};

use super::ClientConfig;

/// What a snapshot did to the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// Not joined yet, or the snapshot did not concern us
    NoLocalPlayer,
    /// First authoritative view of the local player
    Adopted,
    /// Prediction agreed with authority
    InSync,
    /// Prediction diverged and was replaced
    Corrected { position_error: f32 },
    /// The server no longer knows the local player
    Dropped,
}

pub struct ClientMirror {
    local_id: Option<PlayerId>,
    match_id: Option<Uuid>,
    players: HashMap<PlayerId, PlayerSnapshot>,
    game_time: f64,
    is_game_active: bool,
    position_tolerance: f32,
    move_speed: f32,
    tick_delta: f32,
    bounds: ArenaBounds,
    corrections: u64,
}

impl ClientMirror {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            local_id: None,
            match_id: None,
            players: HashMap::new(),
            game_time: 0.0,
            is_game_active: false,
            position_tolerance: config.position_tolerance,
            move_speed: config.move_speed,
            tick_delta: tick_delta(config.tick_rate),
            bounds: config.arena,
            corrections: 0,
        }
    }

    /// Record the identity assigned by the server
    pub fn set_local_player(&mut self, player_id: PlayerId, match_id: Uuid) {
        if self.local_id.is_some_and(|id| id != player_id) {
            // A different identity; anything we predicted belongs to someone else
            self.players.clear();
        }
        self.local_id = Some(player_id);
        self.match_id = Some(match_id);
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn match_id(&self) -> Option<Uuid> {
        self.match_id
    }

    pub fn local_player(&self) -> Option<&PlayerSnapshot> {
        self.local_id.and_then(|id| self.players.get(&id))
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerSnapshot> {
        self.players.get(&id)
    }

    pub fn players(&self) -> &HashMap<PlayerId, PlayerSnapshot> {
        &self.players
    }

    pub fn game_time(&self) -> f64 {
        self.game_time
    }

    pub fn is_game_active(&self) -> bool {
        self.is_game_active
    }

    /// Number of times authority overrode a prediction
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Apply an action to the local player immediately. Mirrors the server's rules
    /// closely enough that a correct prediction survives the next snapshot.
    pub fn predict(&mut self, action: &PlayerAction) {
        let (move_speed, dt, bounds) = (self.move_speed, self.tick_delta, self.bounds);
        let Some(player) = self.local_id.and_then(|id| self.players.get_mut(&id)) else {
            return;
        };
        if !player.alive {
            return;
        }

        match action {
            PlayerAction::Move(data) => {
                if let Some(next) = PhysicsSystem::integrate_move(player.position, data.direction, move_speed, dt, &bounds) {
                    player.position.x = next.x;
                    player.position.z = next.z;
                }
                if let Some(rotation) = data.rotation.filter(|r| r.is_finite()) {
                    player.rotation = rotation;
                }
            }
            PlayerAction::Jump {} => {
                if PhysicsSystem::is_grounded(player.position) {
                    player.position.y = (JUMP_VELOCITY * dt).min(bounds.max_height);
                }
            }
            PlayerAction::Shoot(_) => {
                if player.weapon.is_some() && !player.is_reloading && player.ammo > 0 {
                    player.ammo -= 1;
                }
            }
            PlayerAction::Reload {} => {
                if player.weapon.is_some() {
                    player.is_reloading = true;
                }
            }
            PlayerAction::SwitchWeapon(data) => {
                if let Ok(weapon) = WeaponKind::parse_slot(&data.weapon_id) {
                    player.weapon = weapon;
                    player.ammo = weapon.map_or(0, |w| WeaponStats::for_kind(w).magazine);
                    player.is_reloading = false;
                }
            }
        }
    }

    /// Fold an authoritative snapshot into the mirror.
    ///
    /// Remote players are replaced wholesale. The local player keeps its prediction only
    /// while it agrees with authority.
    pub fn apply_snapshot(&mut self, snapshot: GameState) -> Reconciliation {
        self.game_time = snapshot.game_time;
        self.is_game_active = snapshot.is_game_active;
        self.match_id = Some(snapshot.match_id);

        let mut incoming = snapshot.players;
        let Some(local_id) = self.local_id else {
            self.players = incoming;
            return Reconciliation::NoLocalPlayer;
        };

        let authority = incoming.remove(&local_id);
        let belief = self.players.remove(&local_id);
        self.players = incoming;

        let Some(authority) = authority else {
            if belief.is_some() {
                debug!(player_id = %local_id, "Local player missing from snapshot");
                return Reconciliation::Dropped;
            }
            return Reconciliation::NoLocalPlayer;
        };

        match belief {
            None => {
                self.players.insert(local_id, authority);
                Reconciliation::Adopted
            }
            Some(mut belief) => {
                let position_error = belief.position.distance(authority.position);
                if diverges(&belief, &authority, self.position_tolerance) {
                    self.corrections += 1;
                    debug!(player_id = %local_id, position_error, "Prediction corrected");
                    self.players.insert(local_id, authority);
                    Reconciliation::Corrected { position_error }
                } else {
                    // Fields we never predict always follow authority
                    belief.display_name = authority.display_name;
                    self.players.insert(local_id, belief);
                    Reconciliation::InSync
                }
            }
        }
    }

    /// Authoritative single-player update (rename acknowledgement)
    pub fn apply_player_update(&mut self, update: PlayerSnapshot) {
        self.players.insert(update.id, update);
    }
}

fn diverges(belief: &PlayerSnapshot, authority: &PlayerSnapshot, tolerance: f32) -> bool {
    belief.position.distance(authority.position) > tolerance
        || belief.health != authority.health
        || belief.alive != authority.alive
        || belief.weapon != authority.weapon
        || belief.ammo != authority.ammo
        || belief.is_reloading != authority.is_reloading
        || belief.kills != authority.kills
        || belief.deaths != authority.deaths
}
