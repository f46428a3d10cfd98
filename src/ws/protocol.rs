//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player identifier (stable across reconnects)
pub type PlayerId = Uuid;

/// Weapons a player can equip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeaponKind {
    /// Sidearm every player spawns with
    Pistol,
    /// Automatic, mid range
    Rifle,
    /// Heavy damage, short range
    Shotgun,
    /// Long range, slow to fire
    Sniper,
}

impl WeaponKind {
    pub const ALL: [WeaponKind; 4] = [
        WeaponKind::Pistol,
        WeaponKind::Rifle,
        WeaponKind::Shotgun,
        WeaponKind::Sniper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WeaponKind::Pistol => "pistol",
            WeaponKind::Rifle => "rifle",
            WeaponKind::Shotgun => "shotgun",
            WeaponKind::Sniper => "sniper",
        }
    }

    /// Parse a `switchWeapon` id; an empty id or `none` unequips
    pub fn parse_slot(id: &str) -> Result<Option<WeaponKind>, ()> {
        match id.trim() {
            "" => Ok(None),
            id if id.eq_ignore_ascii_case("none") => Ok(None),
            id => id.parse().map(Some),
        }
    }
}

impl Default for WeaponKind {
    fn default() -> Self {
        Self::Pistol
    }
}

impl fmt::Display for WeaponKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeaponKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WeaponKind::ALL
            .into_iter()
            .find(|w| w.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

/// 3-component vector used for positions, rotations and directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn dot(&self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_squared(&self) -> f32 {
        self.dot(*self)
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(&self, other: Vec3) -> f32 {
        (*self - other).length()
    }

    /// Unit vector in the same direction, or None for zero/non-finite input
    pub fn normalized(&self) -> Option<Vec3> {
        let len = self.length();
        if !len.is_finite() || len <= 1e-6 {
            return None;
        }
        Some(*self * (1.0 / len))
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Envelope type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Connect,
    Disconnect,
    PlayerUpdate,
    GameState,
    PlayerAction,
    SetName,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Disconnect => "disconnect",
            MessageType::PlayerUpdate => "playerUpdate",
            MessageType::GameState => "gameState",
            MessageType::PlayerAction => "playerAction",
            MessageType::SetName => "setName",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connect" => MessageType::Connect,
            "disconnect" => MessageType::Disconnect,
            "playerUpdate" => MessageType::PlayerUpdate,
            "gameState" => MessageType::GameState,
            "playerAction" => MessageType::PlayerAction,
            "setName" => MessageType::SetName,
            "error" => MessageType::Error,
            _ => return Err(()),
        })
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Payload,
    /// Sender wall clock, unix millis
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(payload: Payload, timestamp: u64) -> Self {
        Self { payload, timestamp }
    }

    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }
}

/// Payload variants, one per envelope type
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Connect(ConnectInfo),
    Disconnect(DisconnectInfo),
    PlayerUpdate(PlayerSnapshot),
    GameState(GameState),
    PlayerAction(PlayerAction),
    SetName(SetName),
    Error(ErrorMessage),
}

impl Payload {
    pub fn kind(&self) -> MessageType {
        match self {
            Payload::Connect(_) => MessageType::Connect,
            Payload::Disconnect(_) => MessageType::Disconnect,
            Payload::PlayerUpdate(_) => MessageType::PlayerUpdate,
            Payload::GameState(_) => MessageType::GameState,
            Payload::PlayerAction(_) => MessageType::PlayerAction,
            Payload::SetName(_) => MessageType::SetName,
            Payload::Error(_) => MessageType::Error,
        }
    }
}

/// Sent by the server once a join handshake completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub player_id: PlayerId,
    pub match_id: Uuid,
    /// Secret that must accompany `playerId` when resuming this player
    pub resume_token: String,
}

/// Explicit leave (client) or termination notice (server)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Display name handshake / rename
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetName {
    pub display_name: String,
}

/// Error surfaced to one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Player intents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PlayerAction {
    Move(MoveData),
    Jump {},
    Shoot(ShootData),
    Reload {},
    SwitchWeapon(SwitchWeaponData),
}

impl PlayerAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            PlayerAction::Move(_) => ActionKind::Move,
            PlayerAction::Jump {} => ActionKind::Jump,
            PlayerAction::Shoot(_) => ActionKind::Shoot,
            PlayerAction::Reload {} => ActionKind::Reload,
            PlayerAction::SwitchWeapon(_) => ActionKind::SwitchWeapon,
        }
    }
}

/// Action type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Jump,
    Shoot,
    Reload,
    SwitchWeapon,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Jump => "jump",
            ActionKind::Shoot => "shoot",
            ActionKind::Reload => "reload",
            ActionKind::SwitchWeapon => "switchWeapon",
        }
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "move" => ActionKind::Move,
            "jump" => ActionKind::Jump,
            "shoot" => ActionKind::Shoot,
            "reload" => ActionKind::Reload,
            "switchWeapon" => ActionKind::SwitchWeapon,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveData {
    /// Desired movement direction (normalized server side)
    pub direction: Vec3,
    /// New facing, if the client turned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootData {
    /// Aim direction from the shooter's position
    pub direction: Vec3,
    /// Player the client believes it hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
    /// Distances along the ray to obstacles the client's scene reported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obstacle_distances: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchWeaponData {
    pub weapon_id: String,
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub display_name: String,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Health (0-100)
    pub health: f32,
    pub weapon: Option<WeaponKind>,
    pub kills: u32,
    pub deaths: u32,
    pub alive: bool,
    /// Rounds left in the magazine
    #[serde(default)]
    pub ammo: u32,
    #[serde(default)]
    pub is_reloading: bool,
}

/// Full authoritative match snapshot (sent every tick)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: HashMap<PlayerId, PlayerSnapshot>,
    /// Match clock in seconds
    pub game_time: f64,
    pub is_game_active: bool,
    pub match_id: Uuid,
}
