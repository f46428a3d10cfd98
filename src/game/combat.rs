//! Combat system - weapons, damage, hit detection

use crate::ws::protocol::{Vec3, WeaponKind};

/// Upper bound for player health
pub const MAX_HEALTH: f32 = 100.0;

/// Hitbox radius around a player's position
pub const PLAYER_HIT_RADIUS: f32 = 1.0;

/// Recoil recovered per second of game time
pub const RECOIL_RECOVERY_PER_SEC: f32 = 4.0;

/// Weapon stats per weapon kind
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Maximum hit distance
    pub range: f32,
    /// Rounds per magazine
    pub magazine: u32,
    /// Time to restore a full magazine (seconds)
    pub reload_secs: f64,
    /// Minimum time between shots (seconds)
    pub cooldown_secs: f64,
    /// Recoil added per shot
    pub recoil: f32,
}

impl WeaponStats {
    pub fn for_kind(kind: WeaponKind) -> Self {
        match kind {
            WeaponKind::Pistol => Self {
                damage: 15.0,
                range: 60.0,
                magazine: 12,
                reload_secs: 1.2,
                cooldown_secs: 0.25,
                recoil: 0.5,
            },
            WeaponKind::Rifle => Self {
                damage: 25.0,
                range: 120.0,
                magazine: 30,
                reload_secs: 2.0,
                cooldown_secs: 0.1,
                recoil: 1.0,
            },
            WeaponKind::Shotgun => Self {
                damage: 45.0,
                range: 20.0,
                magazine: 6,
                reload_secs: 2.5,
                cooldown_secs: 0.8,
                recoil: 3.0,
            },
            WeaponKind::Sniper => Self {
                damage: 80.0,
                range: 300.0,
                magazine: 5,
                reload_secs: 3.0,
                cooldown_secs: 1.5,
                recoil: 5.0,
            },
        }
    }
}

/// Result of applying damage to a victim
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub damage: f32,
    pub remaining_health: f32,
    pub killed: bool,
}

/// Combat system for managing weapons and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage.max(0.0)).clamp(0.0, MAX_HEALTH);
        (new_health, new_health <= 0.0)
    }

    /// Recoil left after `dt` seconds of recovery
    pub fn recover_recoil(recoil: f32, dt: f32) -> f32 {
        (recoil - RECOIL_RECOVERY_PER_SEC * dt).max(0.0)
    }

    /// Resolve a hitscan shot against one target.
    ///
    /// Casts a ray from `origin` along `direction` and intersects it with the target's
    /// hit sphere. Returns the distance to the impact when it lies within `range` and no
    /// reported obstacle sits in front of it.
    pub fn resolve_hit(
        origin: Vec3,
        direction: Vec3,
        target: Vec3,
        range: f32,
        obstacle_distances: &[f32],
    ) -> Option<f32> {
        let dir = direction.normalized()?;
        let to_target = target - origin;

        let along = to_target.dot(dir);
        if along < 0.0 {
            return None;
        }

        let miss_sq = to_target.length_squared() - along * along;
        let radius_sq = PLAYER_HIT_RADIUS * PLAYER_HIT_RADIUS;
        if miss_sq > radius_sq {
            return None;
        }

        let distance = (along - (radius_sq - miss_sq).max(0.0).sqrt()).max(0.0);
        if distance > range {
            return None;
        }

        let blocked = obstacle_distances
            .iter()
            .any(|d| d.is_finite() && *d >= 0.0 && *d < distance);
        if blocked {
            return None;
        }

        Some(distance)
    }
}
