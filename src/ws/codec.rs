//! Envelope encoding and decoding
//!
//! The wire format is `{ "type": <tag>, "payload": <variant>, "timestamp": <millis> }`.
//! Decoding is two-stage: the outer envelope is parsed loosely, then the payload is
//! decoded into the variant selected by the tag. Unknown tags are rejected here so no
//! untyped payload ever reaches the session layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::protocol::{ActionKind, Envelope, MessageType, Payload, PlayerAction};

/// Codec failures. Every variant is a validation error from the session's point of view.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind} envelope: {source}")]
    Encode {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<f64>,
}

#[derive(Serialize)]
struct OutEnvelope<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a P,
    timestamp: u64,
}

/// Serialize an envelope to a JSON text frame
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let kind = envelope.kind();
    let result = match &envelope.payload {
        Payload::Connect(p) => write(kind, p, envelope.timestamp),
        Payload::Disconnect(p) => write(kind, p, envelope.timestamp),
        Payload::PlayerUpdate(p) => write(kind, p, envelope.timestamp),
        Payload::GameState(p) => write(kind, p, envelope.timestamp),
        Payload::PlayerAction(p) => write(kind, p, envelope.timestamp),
        Payload::SetName(p) => write(kind, p, envelope.timestamp),
        Payload::Error(p) => write(kind, p, envelope.timestamp),
    };
    result.map_err(|source| CodecError::Encode { kind, source })
}

fn write<P: Serialize>(kind: MessageType, payload: &P, timestamp: u64) -> serde_json::Result<String> {
    serde_json::to_string(&OutEnvelope {
        kind: kind.as_str(),
        payload,
        timestamp,
    })
}

/// Parse a JSON text frame into a typed envelope
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(CodecError::Malformed)?;

    let kind: MessageType = raw
        .kind
        .parse()
        .map_err(|_| CodecError::UnknownMessageType(raw.kind.clone()))?;

    let payload = match kind {
        MessageType::Connect => Payload::Connect(typed(kind, raw.payload)?),
        MessageType::Disconnect => {
            // A bare `{"type":"disconnect"}` is a valid leave
            let value = if raw.payload.is_null() {
                Value::Object(Default::default())
            } else {
                raw.payload
            };
            Payload::Disconnect(typed(kind, value)?)
        }
        MessageType::PlayerUpdate => Payload::PlayerUpdate(typed(kind, raw.payload)?),
        MessageType::GameState => Payload::GameState(typed(kind, raw.payload)?),
        MessageType::PlayerAction => Payload::PlayerAction(decode_action(raw.payload)?),
        MessageType::SetName => Payload::SetName(typed(kind, raw.payload)?),
        MessageType::Error => Payload::Error(typed(kind, raw.payload)?),
    };

    let timestamp = raw
        .timestamp
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(|t| t as u64)
        .unwrap_or(0);

    Ok(Envelope { payload, timestamp })
}

/// Decode a `{type, data}` action payload, rejecting unknown action tags explicitly
pub fn decode_action(mut value: Value) -> Result<PlayerAction, CodecError> {
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| CodecError::InvalidPayload {
            kind: MessageType::PlayerAction,
            source: <serde_json::Error as serde::de::Error>::missing_field("type"),
        })?;

    if tag.parse::<ActionKind>().is_err() {
        return Err(CodecError::UnknownActionType(tag));
    }

    // Data-less actions (jump, reload) may omit `data` or send null
    if let Value::Object(map) = &mut value {
        let missing = map.get("data").map_or(true, Value::is_null);
        if missing {
            map.insert("data".to_string(), Value::Object(Default::default()));
        }
    }

    typed(MessageType::PlayerAction, value)
}

fn typed<T: serde::de::DeserializeOwned>(kind: MessageType, value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|source| CodecError::InvalidPayload { kind, source })
}
