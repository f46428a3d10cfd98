//! Player movement and arena constraints

use crate::ws::protocol::Vec3;

/// Downward acceleration applied to airborne players
pub const GRAVITY: f32 = 20.0;

/// Initial upward speed of a jump
pub const JUMP_VELOCITY: f32 = 8.0;

/// Height below which a player counts as standing on the ground
pub const GROUND_EPSILON: f32 = 1e-3;

/// Playable volume: x and z in [-half_extent, half_extent], y in [0, max_height]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaBounds {
    pub half_extent: f32,
    pub max_height: f32,
}

impl ArenaBounds {
    pub fn new(half_extent: f32, max_height: f32) -> Self {
        Self {
            half_extent: half_extent.abs(),
            max_height: max_height.abs(),
        }
    }

    /// Clamp a position into the arena
    pub fn clamp(&self, position: Vec3) -> Vec3 {
        Vec3::new(
            position.x.clamp(-self.half_extent, self.half_extent),
            position.y.clamp(0.0, self.max_height),
            position.z.clamp(-self.half_extent, self.half_extent),
        )
    }

    pub fn contains(&self, position: Vec3) -> bool {
        self.clamp(position) == position
    }
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self::new(100.0, 30.0)
    }
}

/// Physics system for updating player positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate one movement step.
    /// Returns None when the direction is degenerate or not finite.
    pub fn integrate_move(
        position: Vec3,
        direction: Vec3,
        speed: f32,
        dt: f32,
        bounds: &ArenaBounds,
    ) -> Option<Vec3> {
        if !direction.is_finite() {
            return None;
        }
        let dir = direction.normalized()?;
        Some(bounds.clamp(position + dir * (speed * dt)))
    }

    pub fn is_grounded(position: Vec3) -> bool {
        position.y <= GROUND_EPSILON
    }

    /// Apply gravity to an airborne player.
    /// Returns (new_position, new_vertical_velocity)
    pub fn apply_gravity(position: Vec3, vertical_velocity: f32, dt: f32, bounds: &ArenaBounds) -> (Vec3, f32) {
        if Self::is_grounded(position) && vertical_velocity <= 0.0 {
            return (Vec3::new(position.x, 0.0, position.z), 0.0);
        }

        let velocity = vertical_velocity - GRAVITY * dt;
        let mut next = position;
        next.y += velocity * dt;

        if next.y <= 0.0 {
            next.y = 0.0;
            return (bounds.clamp(next), 0.0);
        }
        if next.y >= bounds.max_height {
            return (bounds.clamp(next), 0.0);
        }
        (next, velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_scales_by_speed_and_delta() {
        let bounds = ArenaBounds::default();
        let next = PhysicsSystem::integrate_move(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), 6.0, 0.5, &bounds).unwrap();
        assert_eq!(next, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_move_rejects_degenerate_direction() {
        let bounds = ArenaBounds::default();
        assert!(PhysicsSystem::integrate_move(Vec3::ZERO, Vec3::ZERO, 6.0, 0.5, &bounds).is_none());
        assert!(PhysicsSystem::integrate_move(Vec3::ZERO, Vec3::new(f32::NAN, 0.0, 1.0), 6.0, 0.5, &bounds).is_none());
        assert!(
            PhysicsSystem::integrate_move(Vec3::ZERO, Vec3::new(f32::INFINITY, 0.0, 0.0), 6.0, 0.5, &bounds).is_none()
        );
    }

    #[test]
    fn test_move_is_clamped_to_arena() {
        let bounds = ArenaBounds::new(10.0, 5.0);
        let next = PhysicsSystem::integrate_move(Vec3::new(9.5, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), 8.0, 1.0, &bounds)
            .unwrap();
        assert_eq!(next.x, 10.0);
        assert!(bounds.contains(next));
    }

    #[test]
    fn test_gravity_lands_player() {
        let bounds = ArenaBounds::default();
        let mut pos = Vec3::ZERO;
        let mut vel = JUMP_VELOCITY;
        for _ in 0..200 {
            let (p, v) = PhysicsSystem::apply_gravity(pos, vel, 1.0 / 30.0, &bounds);
            pos = p;
            vel = v;
        }
        assert_eq!(pos.y, 0.0);
        assert_eq!(vel, 0.0);
    }
}
