//! Session-layer errors and their stable wire codes

use crate::game::{ActionError, StoreError};
use crate::ws::protocol::{ErrorMessage, MessageType};

use super::codec::CodecError;

/// Longest accepted display name, in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("send setName before {0}")]
    HandshakeRequired(MessageType),

    #[error("no setName received within the handshake grace period")]
    HandshakeTimeout,

    #[error("invalid display name: {0}")]
    InvalidName(&'static str),

    #[error("clients may not send {0} messages")]
    UnexpectedMessage(MessageType),
}

impl SessionError {
    /// Stable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Codec(CodecError::UnknownActionType(_)) => "unknown_action_type",
            SessionError::Codec(_) => "validation_error",
            SessionError::Action(ActionError::Store(e)) | SessionError::Store(e) => store_code(e),
            SessionError::Action(ActionError::UnknownActionType(_)) => "unknown_action_type",
            SessionError::Action(ActionError::Invalid(_)) => "invalid_action",
            SessionError::Action(ActionError::InvalidWeapon(_)) => "invalid_weapon",
            SessionError::HandshakeRequired(_) => "handshake_required",
            SessionError::HandshakeTimeout => "handshake_timeout",
            SessionError::InvalidName(_) => "invalid_name",
            SessionError::UnexpectedMessage(_) => "validation_error",
        }
    }

    pub fn to_message(&self) -> ErrorMessage {
        ErrorMessage::new(self.code(), self.to_string())
    }
}

fn store_code(err: &StoreError) -> &'static str {
    match err {
        StoreError::CapacityExceeded { .. } => "match_full",
        StoreError::DuplicatePlayer(_) => "duplicate_player",
        StoreError::PlayerNotFound(_) => "player_not_found",
        StoreError::PlayerDead(_) => "player_dead",
        StoreError::NoWeapon(_) => "no_weapon",
        StoreError::AlreadyReloading(_) => "already_reloading",
        StoreError::OutOfAmmo(_) => "out_of_ammo",
        StoreError::WeaponCooldown(_) => "weapon_cooldown",
        StoreError::Airborne(_) => "invalid_action",
    }
}

/// Trim and check a requested display name
pub fn validate_display_name(raw: &str) -> Result<String, SessionError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SessionError::InvalidName("name is empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(SessionError::InvalidName("name is longer than 32 characters"));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::InvalidName("name contains control characters"));
    }
    Ok(name.to_string())
}
