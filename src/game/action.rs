//! Action processing: validate one player's intent, then apply it through the store

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::ws::codec::{self, CodecError};
use crate::ws::protocol::{MoveData, PlayerAction, PlayerId, ShootData, Vec3, WeaponKind};

use super::combat::{CombatSystem, WeaponStats};
use super::store::{MatchStore, StoreError};

/// Action failures, returned to the session layer as typed results
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("invalid action: {0}")]
    Invalid(String),

    #[error("unknown weapon: {0}")]
    InvalidWeapon(String),
}

impl ActionError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Effect of an applied action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Moved { position: Vec3 },
    Jumped,
    Shot { hit: Option<HitReport>, ammo_left: u32 },
    ReloadStarted { ready_at: f64 },
    WeaponSwitched { weapon: Option<WeaponKind> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitReport {
    pub target_id: PlayerId,
    pub distance: f32,
    pub damage: f32,
    pub killed: bool,
}

/// Stateless validator/applier of player actions
pub struct ActionProcessor {
    store: Arc<MatchStore>,
    move_speed: f32,
    tick_delta: f32,
}

impl ActionProcessor {
    pub fn new(store: Arc<MatchStore>, move_speed: f32, tick_delta: f32) -> Self {
        Self {
            store,
            move_speed,
            tick_delta,
        }
    }

    pub fn store(&self) -> &Arc<MatchStore> {
        &self.store
    }

    /// Decode a raw `{type, data}` action and handle it
    pub fn handle_raw_action(&self, player_id: PlayerId, raw: Value) -> Result<ActionOutcome, ActionError> {
        let action = codec::decode_action(raw).map_err(|e| match e {
            CodecError::UnknownActionType(tag) => ActionError::UnknownActionType(tag),
            other => ActionError::Invalid(other.to_string()),
        })?;
        self.handle_action(player_id, &action)
    }

    pub fn handle_action(&self, player_id: PlayerId, action: &PlayerAction) -> Result<ActionOutcome, ActionError> {
        // Unknown ids fail before any validation so the error is always NotFound
        if !self.store.contains(player_id) {
            return Err(StoreError::PlayerNotFound(player_id).into());
        }

        let outcome = match action {
            PlayerAction::Move(data) => self.handle_move(player_id, data),
            PlayerAction::Jump {} => self.handle_jump(player_id),
            PlayerAction::Shoot(data) => self.handle_shoot(player_id, data),
            PlayerAction::Reload {} => self.handle_reload(player_id),
            PlayerAction::SwitchWeapon(data) => self.handle_switch_weapon(player_id, &data.weapon_id),
        }?;

        debug!(player_id = %player_id, action = action.kind().as_str(), ?outcome, "Action applied");
        Ok(outcome)
    }

    fn handle_move(&self, player_id: PlayerId, data: &MoveData) -> Result<ActionOutcome, ActionError> {
        if let Some(rotation) = data.rotation {
            if !rotation.is_finite() {
                return Err(ActionError::invalid("rotation must be finite"));
            }
        }

        let position = self
            .store
            .move_player(player_id, data.direction, self.move_speed, self.tick_delta, data.rotation)?
            .ok_or_else(|| ActionError::invalid("direction must be finite and non-zero"))?;

        Ok(ActionOutcome::Moved { position })
    }

    fn handle_jump(&self, player_id: PlayerId) -> Result<ActionOutcome, ActionError> {
        self.store.launch_jump(player_id)?;
        Ok(ActionOutcome::Jumped)
    }

    fn handle_shoot(&self, player_id: PlayerId, data: &ShootData) -> Result<ActionOutcome, ActionError> {
        if data.direction.normalized().is_none() || !data.direction.is_finite() {
            return Err(ActionError::invalid("aim direction must be finite and non-zero"));
        }

        // Resolve the claimed target before spending ammo
        let target = match data.target_id {
            Some(target_id) if target_id == player_id => {
                return Err(ActionError::invalid("cannot target yourself"));
            }
            Some(target_id) => Some(self.store.player(target_id)?),
            None => None,
        };

        let shot = self.store.fire_weapon(player_id)?;
        let stats = WeaponStats::for_kind(shot.weapon);

        let hit = match target.filter(|t| t.alive) {
            Some(target) => CombatSystem::resolve_hit(
                shot.origin,
                data.direction,
                target.position,
                stats.range,
                &data.obstacle_distances,
            )
            .map(|distance| (target.id, distance)),
            None => None,
        };

        let hit = match hit {
            Some((target_id, distance)) => match self.store.apply_damage(target_id, Some(player_id), stats.damage) {
                Ok(outcome) => Some(HitReport {
                    target_id,
                    distance,
                    damage: outcome.damage,
                    killed: outcome.killed,
                }),
                // Target died or left between resolution and damage; the shot still fired
                Err(StoreError::PlayerDead(_)) | Err(StoreError::PlayerNotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        Ok(ActionOutcome::Shot {
            hit,
            ammo_left: shot.ammo_left,
        })
    }

    fn handle_reload(&self, player_id: PlayerId) -> Result<ActionOutcome, ActionError> {
        let ready_at = self.store.begin_reload(player_id)?;
        Ok(ActionOutcome::ReloadStarted { ready_at })
    }

    fn handle_switch_weapon(&self, player_id: PlayerId, weapon_id: &str) -> Result<ActionOutcome, ActionError> {
        let weapon =
            WeaponKind::parse_slot(weapon_id).map_err(|_| ActionError::InvalidWeapon(weapon_id.to_string()))?;
        self.store.set_weapon(player_id, weapon)?;
        Ok(ActionOutcome::WeaponSwitched { weapon })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::ArenaBounds;
    use crate::ws::protocol::SwitchWeaponData;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    const SPEED: f32 = 6.0;
    const DT: f32 = 0.5;

    fn setup() -> (Arc<MatchStore>, ActionProcessor) {
        let store = Arc::new(MatchStore::new(8, ArenaBounds::new(50.0, 20.0), 11));
        let processor = ActionProcessor::new(store.clone(), SPEED, DT);
        (store, processor)
    }

    fn place(store: &MatchStore, id: PlayerId, position: Vec3) {
        store.set_position(id, position).unwrap();
    }

    fn shoot_at(target: PlayerId, direction: Vec3) -> PlayerAction {
        PlayerAction::Shoot(ShootData {
            direction,
            target_id: Some(target),
            obstacle_distances: Vec::new(),
        })
    }

    #[test]
    fn test_unknown_player_is_not_found_and_state_unchanged() {
        let (store, processor) = setup();
        store.add_player(Uuid::new_v4()).unwrap();
        let before = store.snapshot();
        let ghost = Uuid::new_v4();

        let err = processor.handle_action(ghost, &PlayerAction::Jump {}).unwrap_err();
        assert_eq!(err, ActionError::Store(StoreError::PlayerNotFound(ghost)));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();

        let err = processor
            .handle_raw_action(id, json!({"type": "dance", "data": {}}))
            .unwrap_err();
        assert_eq!(err, ActionError::UnknownActionType("dance".to_string()));
    }

    #[test]
    fn test_move_integrates_and_clamps() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        place(&store, id, Vec3::ZERO);

        let outcome = processor
            .handle_action(
                id,
                &PlayerAction::Move(MoveData {
                    direction: Vec3::new(0.0, 0.0, 4.0),
                    rotation: Some(Vec3::new(0.0, 1.0, 0.0)),
                }),
            )
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Moved { position: Vec3::new(0.0, 0.0, 3.0) });
        assert_eq!(store.player(id).unwrap().rotation, Vec3::new(0.0, 1.0, 0.0));

        place(&store, id, Vec3::new(49.0, 0.0, 0.0));
        processor
            .handle_action(
                id,
                &PlayerAction::Move(MoveData {
                    direction: Vec3::new(1.0, 0.0, 0.0),
                    rotation: None,
                }),
            )
            .unwrap();
        assert_eq!(store.player(id).unwrap().position.x, 50.0);
    }

    #[test]
    fn test_move_while_airborne_keeps_current_height() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        store.start();
        place(&store, id, Vec3::ZERO);
        processor.handle_action(id, &PlayerAction::Jump {}).unwrap();
        store.advance(Duration::from_millis(50)).unwrap();
        let height = store.player(id).unwrap().position.y;

        let outcome = processor
            .handle_action(
                id,
                &PlayerAction::Move(MoveData {
                    direction: Vec3::new(1.0, 0.0, 0.0),
                    rotation: None,
                }),
            )
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Moved { position: Vec3::new(3.0, height, 0.0) });
    }

    #[test]
    fn test_move_rejects_degenerate_direction() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        let before = store.player(id).unwrap();

        for direction in [Vec3::ZERO, Vec3::new(f32::NAN, 0.0, 0.0)] {
            let err = processor
                .handle_action(id, &PlayerAction::Move(MoveData { direction, rotation: None }))
                .unwrap_err();
            assert!(matches!(err, ActionError::Invalid(_)));
        }
        assert_eq!(store.player(id).unwrap(), before);
    }

    #[test]
    fn test_lethal_shot_clamps_and_credits() {
        let (store, processor) = setup();
        let (shooter, victim) = (Uuid::new_v4(), Uuid::new_v4());
        store.add_player(shooter).unwrap();
        store.add_player(victim).unwrap();
        store.start();
        place(&store, shooter, Vec3::ZERO);
        place(&store, victim, Vec3::new(0.0, 0.0, 10.0));
        store.set_health(victim, 10.0).unwrap();

        let outcome = processor
            .handle_action(shooter, &shoot_at(victim, Vec3::new(0.0, 0.0, 1.0)))
            .unwrap();

        let ActionOutcome::Shot { hit: Some(hit), .. } = outcome else {
            panic!("expected a hit, got {outcome:?}");
        };
        assert_eq!(hit.damage, 15.0);
        assert!(hit.killed);

        let victim_state = store.player(victim).unwrap();
        assert_eq!(victim_state.health, 0.0);
        assert!(!victim_state.alive);
        assert_eq!(victim_state.deaths, 1);
        assert_eq!(store.player(shooter).unwrap().kills, 1);
    }

    #[test]
    fn test_shot_blocked_by_obstacle_still_spends_ammo() {
        let (store, processor) = setup();
        let (shooter, victim) = (Uuid::new_v4(), Uuid::new_v4());
        store.add_player(shooter).unwrap();
        store.add_player(victim).unwrap();
        store.start();
        place(&store, shooter, Vec3::ZERO);
        place(&store, victim, Vec3::new(0.0, 0.0, 10.0));

        let action = PlayerAction::Shoot(ShootData {
            direction: Vec3::new(0.0, 0.0, 1.0),
            target_id: Some(victim),
            obstacle_distances: vec![4.0],
        });
        let outcome = processor.handle_action(shooter, &action).unwrap();

        assert_eq!(outcome, ActionOutcome::Shot { hit: None, ammo_left: 11 });
        assert_eq!(store.player(victim).unwrap().health, 100.0);
    }

    #[test]
    fn test_shot_at_unknown_target_is_not_found() {
        let (store, processor) = setup();
        let shooter = Uuid::new_v4();
        store.add_player(shooter).unwrap();
        let ghost = Uuid::new_v4();

        let err = processor
            .handle_action(shooter, &shoot_at(ghost, Vec3::new(0.0, 0.0, 1.0)))
            .unwrap_err();
        assert_eq!(err, ActionError::Store(StoreError::PlayerNotFound(ghost)));
        assert_eq!(store.player(shooter).unwrap().ammo, 12);
    }

    #[test]
    fn test_dead_player_cannot_act() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        store.set_health(id, 0.0).unwrap();

        let err = processor
            .handle_action(
                id,
                &PlayerAction::Move(MoveData {
                    direction: Vec3::new(1.0, 0.0, 0.0),
                    rotation: None,
                }),
            )
            .unwrap_err();
        assert_eq!(err, ActionError::Store(StoreError::PlayerDead(id)));
    }

    #[test]
    fn test_reload_twice_is_rejected_until_complete() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        store.start();

        assert!(matches!(
            processor.handle_action(id, &PlayerAction::Reload {}),
            Ok(ActionOutcome::ReloadStarted { .. })
        ));
        assert_eq!(
            processor.handle_action(id, &PlayerAction::Reload {}).unwrap_err(),
            ActionError::Store(StoreError::AlreadyReloading(id))
        );

        store.advance(Duration::from_secs(2));
        assert!(processor.handle_action(id, &PlayerAction::Reload {}).is_ok());
    }

    #[test]
    fn test_switch_weapon_validates_id() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();

        let switch = |weapon: &str| {
            processor.handle_action(
                id,
                &PlayerAction::SwitchWeapon(SwitchWeaponData {
                    weapon_id: weapon.to_string(),
                }),
            )
        };

        assert_eq!(
            switch("railgun").unwrap_err(),
            ActionError::InvalidWeapon("railgun".to_string())
        );
        assert_eq!(store.player(id).unwrap().weapon, Some(WeaponKind::Pistol));

        assert_eq!(
            switch("shotgun").unwrap(),
            ActionOutcome::WeaponSwitched {
                weapon: Some(WeaponKind::Shotgun)
            }
        );
        let player = store.player(id).unwrap();
        assert_eq!(player.weapon, Some(WeaponKind::Shotgun));
        assert_eq!(player.ammo, 6);

        switch("none").unwrap();
        assert_eq!(
            processor.handle_action(id, &PlayerAction::Reload {}).unwrap_err(),
            ActionError::Store(StoreError::NoWeapon(id))
        );
    }

    #[test]
    fn test_jump_requires_ground() {
        let (store, processor) = setup();
        let id = Uuid::new_v4();
        store.add_player(id).unwrap();
        store.start();

        assert_eq!(processor.handle_action(id, &PlayerAction::Jump {}).unwrap(), ActionOutcome::Jumped);
        assert_eq!(
            processor.handle_action(id, &PlayerAction::Jump {}).unwrap_err(),
            ActionError::Store(StoreError::Airborne(id))
        );

        store.advance(Duration::from_millis(100));
        assert!(store.player(id).unwrap().position.y > 0.0);
    }
}
