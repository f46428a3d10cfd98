//! Authoritative match state and its single-writer store
//!
//! All mutation goes through [`MatchStore`], which guards the world with one
//! `RwLock`. Each method takes the write lock for exactly one in-memory update and
//! releases it before returning, so a caller observes either the whole effect of a
//! call or none of it. Nothing here awaits or performs I/O while the lock is held.
//!
//! Field-level primitives are `pub(in crate::game)`: only the action processor and the
//! simulation clock may reach them. The network layer is limited to joins, leaves,
//! renames, match start/end and snapshots.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{GameState, PlayerId, Vec3, WeaponKind};

use super::combat::{CombatSystem, DamageOutcome, WeaponStats, MAX_HEALTH};
use super::physics::{ArenaBounds, PhysicsSystem, JUMP_VELOCITY};
use super::snapshot::SnapshotBuilder;

/// Store failures surfaced to callers as typed results
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("match is full ({max} players)")]
    CapacityExceeded { max: usize },

    #[error("player {0} already exists")]
    DuplicatePlayer(PlayerId),

    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),

    #[error("player {0} is dead")]
    PlayerDead(PlayerId),

    #[error("player {0} has no weapon equipped")]
    NoWeapon(PlayerId),

    #[error("player {0} is already reloading")]
    AlreadyReloading(PlayerId),

    #[error("player {0} is out of ammo")]
    OutOfAmmo(PlayerId),

    #[error("player {0} weapon is cooling down")]
    WeaponCooldown(PlayerId),

    #[error("player {0} is airborne")]
    Airborne(PlayerId),
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub display_name: String,

    pub position: Vec3,
    pub rotation: Vec3,
    pub vertical_velocity: f32,

    pub health: f32,
    pub alive: bool,
    pub weapon: Option<WeaponKind>,
    pub ammo: u32,
    /// Game time at which a pending reload completes
    pub reload_ready_at: Option<f64>,
    /// Earliest game time the next shot may be fired
    pub next_fire_at: f64,
    pub recoil: f32,

    pub kills: u32,
    pub deaths: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, position: Vec3, rotation: Vec3) -> Self {
        let weapon = WeaponKind::default();
        Self {
            id,
            display_name: default_display_name(id),
            position,
            rotation,
            vertical_velocity: 0.0,
            health: MAX_HEALTH,
            alive: true,
            weapon: Some(weapon),
            ammo: WeaponStats::for_kind(weapon).magazine,
            reload_ready_at: None,
            next_fire_at: 0.0,
            recoil: 0.0,
            kills: 0,
            deaths: 0,
        }
    }

    pub fn is_reloading(&self) -> bool {
        self.reload_ready_at.is_some()
    }
}

fn default_display_name(id: PlayerId) -> String {
    format!("Player_{}", &id.to_string()[..8])
}

/// The authoritative world (owned by the store)
#[derive(Debug, Clone)]
pub struct MatchState {
    pub match_id: Uuid,
    pub players: HashMap<PlayerId, PlayerState>,
    /// Seconds of simulated match time
    pub game_time: f64,
    pub is_active: bool,
}

impl MatchState {
    fn new() -> Self {
        Self {
            match_id: Uuid::new_v4(),
            players: HashMap::new(),
            game_time: 0.0,
            is_active: false,
        }
    }

    fn player_mut(&mut self, id: PlayerId) -> Result<&mut PlayerState, StoreError> {
        self.players.get_mut(&id).ok_or(StoreError::PlayerNotFound(id))
    }

    fn living_mut(&mut self, id: PlayerId) -> Result<&mut PlayerState, StoreError> {
        let player = self.player_mut(id)?;
        if !player.alive {
            return Err(StoreError::PlayerDead(id));
        }
        Ok(player)
    }
}

/// Firing details captured atomically with ammo consumption
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotFired {
    pub origin: Vec3,
    pub weapon: WeaponKind,
    pub ammo_left: u32,
}

struct Inner {
    state: MatchState,
    rng: ChaCha8Rng,
}

/// Single-writer owner of the match state
pub struct MatchStore {
    inner: RwLock<Inner>,
    max_players: usize,
    bounds: ArenaBounds,
    active_tx: watch::Sender<bool>,
}

impl MatchStore {
    pub fn new(max_players: usize, bounds: ArenaBounds, seed: u64) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner {
                state: MatchState::new(),
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
            max_players,
            bounds,
            active_tx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_players
    }

    pub fn bounds(&self) -> ArenaBounds {
        self.bounds
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Independent copy of the current state, safe to use while writers continue
    pub fn snapshot(&self) -> GameState {
        SnapshotBuilder::build(&self.inner.read().state)
    }

    /// Clone of one player's authoritative state
    pub fn player(&self, id: PlayerId) -> Result<PlayerState, StoreError> {
        self.inner
            .read()
            .state
            .players
            .get(&id)
            .cloned()
            .ok_or(StoreError::PlayerNotFound(id))
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.inner.read().state.players.contains_key(&id)
    }

    pub fn player_count(&self) -> usize {
        self.inner.read().state.players.len()
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().state.is_active
    }

    pub fn game_time(&self) -> f64 {
        self.inner.read().state.game_time
    }

    pub fn match_id(&self) -> Uuid {
        self.inner.read().state.match_id
    }

    /// Watch match activity; the value flips on `start`/`end`
    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Membership and lifecycle
    // ------------------------------------------------------------------

    /// Insert a freshly spawned player
    pub fn add_player(&self, id: PlayerId) -> Result<PlayerState, StoreError> {
        let mut inner = self.inner.write();

        if inner.state.players.len() >= self.max_players {
            return Err(StoreError::CapacityExceeded {
                max: self.max_players,
            });
        }
        if inner.state.players.contains_key(&id) {
            return Err(StoreError::DuplicatePlayer(id));
        }

        let (position, rotation) = spawn_point(&mut inner.rng, &self.bounds);
        let player = PlayerState::new(id, position, rotation);
        inner.state.players.insert(id, player.clone());

        info!(
            player_id = %id,
            player_count = inner.state.players.len(),
            "Player added to match"
        );
        Ok(player)
    }

    pub fn remove_player(&self, id: PlayerId) -> Result<PlayerState, StoreError> {
        let mut inner = self.inner.write();
        let removed = inner
            .state
            .players
            .remove(&id)
            .ok_or(StoreError::PlayerNotFound(id))?;

        info!(
            player_id = %id,
            player_count = inner.state.players.len(),
            "Player removed from match"
        );
        Ok(removed)
    }

    pub fn update_player_name(&self, id: PlayerId, display_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.player_mut(id)?;
        player.display_name = display_name.to_string();
        Ok(())
    }

    /// Activate the match: game time restarts at zero under a fresh match id
    pub fn start(&self) -> Uuid {
        let match_id = {
            let mut inner = self.inner.write();
            let state = &mut inner.state;
            state.match_id = Uuid::new_v4();
            state.game_time = 0.0;
            state.is_active = true;
            for player in state.players.values_mut() {
                // Timers are expressed in game time, which just restarted
                player.reload_ready_at = None;
                player.next_fire_at = 0.0;
                player.recoil = 0.0;
                if let Some(weapon) = player.weapon {
                    player.ammo = WeaponStats::for_kind(weapon).magazine;
                }
            }
            state.match_id
        };
        self.active_tx.send_replace(true);
        info!(match_id = %match_id, "Match started");
        match_id
    }

    /// Deactivate the match, freezing game time
    pub fn end(&self) {
        let (match_id, game_time) = {
            let mut inner = self.inner.write();
            inner.state.is_active = false;
            (inner.state.match_id, inner.state.game_time)
        };
        self.active_tx.send_replace(false);
        info!(match_id = %match_id, game_time, "Match ended");
    }

    // ------------------------------------------------------------------
    // Field primitives (action processor / simulation clock only)
    // ------------------------------------------------------------------

    #[cfg(test)]
    pub(in crate::game) fn set_position(&self, id: PlayerId, position: Vec3) -> Result<Vec3, StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.living_mut(id)?;
        player.position = self.bounds.clamp(position);
        Ok(player.position)
    }

    /// Integrate one horizontal movement step and apply an optional new rotation, all
    /// under one write lock. Height belongs to gravity and is left untouched.
    ///
    /// `Ok(None)` means the direction was degenerate and nothing changed.
    pub(in crate::game) fn move_player(
        &self,
        id: PlayerId,
        direction: Vec3,
        speed: f32,
        dt: f32,
        rotation: Option<Vec3>,
    ) -> Result<Option<Vec3>, StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.living_mut(id)?;
        let Some(target) = PhysicsSystem::integrate_move(player.position, direction, speed, dt, &self.bounds) else {
            return Ok(None);
        };

        player.position = Vec3::new(target.x, player.position.y, target.z);
        if let Some(rotation) = rotation {
            player.rotation = rotation;
        }
        Ok(Some(player.position))
    }

    /// Set health directly, clamped to [0, 100]; reaching zero kills without a credited killer
    pub(in crate::game) fn set_health(&self, id: PlayerId, health: f32) -> Result<f32, StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.living_mut(id)?;
        player.health = if health.is_finite() {
            health.clamp(0.0, MAX_HEALTH)
        } else {
            0.0
        };
        if player.health <= 0.0 {
            player.alive = false;
            player.deaths += 1;
        }
        Ok(player.health)
    }

    /// Equip a weapon (or none) with a full magazine, cancelling any reload
    pub(in crate::game) fn set_weapon(&self, id: PlayerId, weapon: Option<WeaponKind>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.living_mut(id)?;
        if player.weapon == weapon {
            return Ok(());
        }
        player.weapon = weapon;
        player.ammo = weapon.map(|w| WeaponStats::for_kind(w).magazine).unwrap_or(0);
        player.reload_ready_at = None;
        Ok(())
    }

    /// Damage a victim and, on a kill, credit the attacker. One atomic update.
    pub(in crate::game) fn apply_damage(
        &self,
        victim_id: PlayerId,
        attacker_id: Option<PlayerId>,
        damage: f32,
    ) -> Result<DamageOutcome, StoreError> {
        let mut inner = self.inner.write();
        let state = &mut inner.state;

        if let Some(attacker) = attacker_id {
            if !state.players.contains_key(&attacker) {
                return Err(StoreError::PlayerNotFound(attacker));
            }
        }

        let victim = state.living_mut(victim_id)?;
        let (health, killed) = CombatSystem::apply_damage(victim.health, damage);
        victim.health = health;
        if killed {
            victim.alive = false;
            victim.deaths += 1;
        }

        if killed {
            if let Some(attacker) = attacker_id.and_then(|id| state.players.get_mut(&id)) {
                attacker.kills += 1;
            }
        }

        Ok(DamageOutcome {
            damage,
            remaining_health: health,
            killed,
        })
    }

    /// Validate and consume one round, starting the fire cooldown and adding recoil
    pub(in crate::game) fn fire_weapon(&self, id: PlayerId) -> Result<ShotFired, StoreError> {
        let mut inner = self.inner.write();
        let game_time = inner.state.game_time;
        let player = inner.state.living_mut(id)?;

        let weapon = player.weapon.ok_or(StoreError::NoWeapon(id))?;
        if player.is_reloading() {
            return Err(StoreError::AlreadyReloading(id));
        }
        if player.ammo == 0 {
            return Err(StoreError::OutOfAmmo(id));
        }
        if game_time < player.next_fire_at {
            return Err(StoreError::WeaponCooldown(id));
        }

        let stats = WeaponStats::for_kind(weapon);
        player.ammo -= 1;
        player.next_fire_at = game_time + stats.cooldown_secs;
        player.recoil += stats.recoil;

        Ok(ShotFired {
            origin: player.position,
            weapon,
            ammo_left: player.ammo,
        })
    }

    /// Schedule a reload; returns the game time at which it completes
    pub(in crate::game) fn begin_reload(&self, id: PlayerId) -> Result<f64, StoreError> {
        let mut inner = self.inner.write();
        let game_time = inner.state.game_time;
        let player = inner.state.living_mut(id)?;

        let weapon = player.weapon.ok_or(StoreError::NoWeapon(id))?;
        if player.is_reloading() {
            return Err(StoreError::AlreadyReloading(id));
        }

        let ready_at = game_time + WeaponStats::for_kind(weapon).reload_secs;
        player.reload_ready_at = Some(ready_at);
        Ok(ready_at)
    }

    /// Give a grounded player upward velocity
    pub(in crate::game) fn launch_jump(&self, id: PlayerId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let player = inner.state.living_mut(id)?;
        if !PhysicsSystem::is_grounded(player.position) || player.vertical_velocity > 0.0 {
            return Err(StoreError::Airborne(id));
        }
        player.vertical_velocity = JUMP_VELOCITY;
        Ok(())
    }

    /// Advance game time by `elapsed` and apply time-based effects.
    ///
    /// Returns the post-tick snapshot, or None when the match is inactive (no time passes).
    /// Reload completion and recoil recovery only depend on the current game time, so
    /// re-applying them is harmless.
    pub(in crate::game) fn advance(&self, elapsed: Duration) -> Option<GameState> {
        let mut inner = self.inner.write();
        let state = &mut inner.state;
        if !state.is_active {
            return None;
        }

        let dt = elapsed.as_secs_f64();
        state.game_time += dt;
        let now = state.game_time;
        let dt = dt as f32;

        for player in state.players.values_mut() {
            if !player.alive {
                continue;
            }

            if let Some(ready_at) = player.reload_ready_at {
                if now >= ready_at {
                    player.reload_ready_at = None;
                    if let Some(weapon) = player.weapon {
                        player.ammo = WeaponStats::for_kind(weapon).magazine;
                    }
                    debug!(player_id = %player.id, "Reload complete");
                }
            }

            player.recoil = CombatSystem::recover_recoil(player.recoil, dt);

            let (position, velocity) =
                PhysicsSystem::apply_gravity(player.position, player.vertical_velocity, dt, &self.bounds);
            player.position = position;
            player.vertical_velocity = velocity;
        }

        Some(SnapshotBuilder::build(state))
    }
}

fn spawn_point(rng: &mut ChaCha8Rng, bounds: &ArenaBounds) -> (Vec3, Vec3) {
    let reach = bounds.half_extent * 0.8;
    let (x, z) = if reach > 0.0 {
        (rng.gen_range(-reach..=reach), rng.gen_range(-reach..=reach))
    } else {
        (0.0, 0.0)
    };
    let yaw = rng.gen_range(0.0..std::f32::consts::TAU);
    (Vec3::new(x, 0.0, z), Vec3::new(0.0, yaw, 0.0))
}
