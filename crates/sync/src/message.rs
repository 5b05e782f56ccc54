//! Inbound authority messages.
//!
//! ```text
//! {
//!   "foggedChunks": [{"x": 1, "z": 2, "state": "FOGGED", "fogBlock": "minecraft:stone", "snapshot": "<base64>"}],
//!   "resetState": true,
//!   "npcUuids": ["..."],
//!   "resetNpcs": false
//! }
//! ```
//!
//! Decoding is per item: a bad element or field is logged and substituted or
//! skipped, never fatal to the rest of the message.

use crate::SyncError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fogwar_common::{ActorId, FogAppearance, TilePosition, VisibilityState};
use fogwar_kernel::{Snapshot, TileUpdate};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Change to the tracked actor set requested by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorDirective {
    pub ids: Vec<ActorId>,
    /// Replace the membership instead of adding to it.
    pub reset: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub updates: Vec<TileUpdate>,
    /// Every listed position, including items whose other fields were bad.
    pub seen: HashSet<TilePosition>,
    pub reset: bool,
    pub actors: Option<ActorDirective>,
    /// Items dropped for a missing or malformed position.
    pub skipped: usize,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && !self.reset && self.actors.is_none()
    }
}

pub fn decode(text: &str) -> Result<InboundMessage, SyncError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(object) = value else {
        return Err(SyncError::NotObject);
    };

    let mut message = InboundMessage {
        reset: object.get("resetState").and_then(Value::as_bool).unwrap_or(false),
        ..InboundMessage::default()
    };

    match object.get("foggedChunks") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                match decode_item(index, item) {
                    Some(update) => {
                        message.seen.insert(update.pos);
                        message.updates.push(update);
                    }
                    None => message.skipped += 1,
                }
            }
        }
        Some(other) => tracing::warn!(kind = value_kind(other), "foggedChunks is not an array, ignoring"),
    }

    message.actors = decode_actors(&object);
    Ok(message)
}

fn decode_item(index: usize, item: &Value) -> Option<TileUpdate> {
    let Some(fields) = item.as_object() else {
        tracing::warn!(index, "tile item is not an object, skipping");
        return None;
    };
    let (Some(x), Some(z)) = (int_field(fields, "x"), int_field(fields, "z")) else {
        tracing::warn!(index, "tile item without integer x/z, skipping");
        return None;
    };
    let pos = TilePosition::new(x, z);

    let state = match fields.get("state").and_then(Value::as_str) {
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            tracing::warn!(%pos, error = %err, "unknown state, treating as FOGGED");
            VisibilityState::Fogged
        }),
        None => {
            tracing::warn!(%pos, "missing state, treating as FOGGED");
            VisibilityState::Fogged
        }
    };

    let mut update = TileUpdate::new(pos, state);

    match fields.get("fogBlock") {
        None | Some(Value::Null) => {}
        Some(Value::String(token)) => match FogAppearance::parse(token) {
            Ok(appearance) => update.appearance = Some(appearance),
            Err(err) => tracing::warn!(%pos, error = %err, "bad fogBlock, using default appearance"),
        },
        Some(other) => {
            tracing::warn!(%pos, kind = value_kind(other), "fogBlock is not a string, using default appearance")
        }
    }

    match fields.get("snapshot") {
        None | Some(Value::Null) => {}
        Some(Value::String(encoded)) => match decode_snapshot(encoded) {
            Ok(snapshot) => update.snapshot = Some(Arc::new(snapshot)),
            Err(reason) => tracing::warn!(%pos, %reason, "dropping undecodable snapshot"),
        },
        Some(other) => tracing::warn!(%pos, kind = value_kind(other), "snapshot is not a string, dropping"),
    }

    Some(update)
}

fn decode_snapshot(encoded: &str) -> Result<Snapshot, String> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| e.to_string())?;
    Snapshot::decode(&bytes).map_err(|e| e.to_string())
}

/// Encode a snapshot the way the authority sends it.
pub fn encode_snapshot(snapshot: &Snapshot) -> String {
    STANDARD.encode(snapshot.encode())
}

fn decode_actors(object: &Map<String, Value>) -> Option<ActorDirective> {
    let reset = object.get("resetNpcs").and_then(Value::as_bool).unwrap_or(false);
    let ids: Vec<ActorId> = match object.get("npcUuids") {
        Some(Value::Array(raw)) => raw
            .iter()
            .filter_map(|value| {
                let parsed = value.as_str().map(ActorId::parse);
                match parsed {
                    Some(Ok(id)) => Some(id),
                    _ => {
                        tracing::warn!(value = %value, "skipping unparsable actor id");
                        None
                    }
                }
            })
            .collect(),
        None | Some(Value::Null) => {
            if !reset {
                return None;
            }
            Vec::new()
        }
        Some(other) => {
            tracing::warn!(kind = value_kind(other), "npcUuids is not an array, ignoring");
            if !reset {
                return None;
            }
            Vec::new()
        }
    };
    Some(ActorDirective { ids, reset })
}

fn int_field(fields: &Map<String, Value>, name: &str) -> Option<i32> {
    fields
        .get(name)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogwar_common::HeightBounds;

    #[test]
    fn decodes_full_item() {
        let snapshot = Snapshot::from_parts(HeightBounds::new(-4, 1), vec![1; 256]).unwrap();
        let text = format!(
            r#"{{"foggedChunks":[{{"x":3,"z":-2,"state":"FOGGED","fogBlock":"stone","snapshot":"{}"}}]}}"#,
            encode_snapshot(&snapshot)
        );
        let message = decode(&text).unwrap();
        assert_eq!(message.updates.len(), 1);
        let update = &message.updates[0];
        assert_eq!(update.pos, TilePosition::new(3, -2));
        assert_eq!(update.state, VisibilityState::Fogged);
        assert_eq!(update.appearance.as_ref().unwrap().as_str(), "minecraft:stone");
        assert_eq!(update.snapshot.as_deref(), Some(&snapshot));
        assert!(!message.reset);
        assert!(message.actors.is_none());
    }

    #[test]
    fn state_is_case_insensitive_and_defaults_to_fogged() {
        let message = decode(
            r#"{"foggedChunks":[{"x":0,"z":0,"state":"visible"},{"x":1,"z":0},{"x":2,"z":0,"state":"PURPLE"},{"x":3,"z":0,"state":7}]}"#,
        )
        .unwrap();
        let states: Vec<_> = message.updates.iter().map(|u| u.state).collect();
        assert_eq!(
            states,
            vec![
                VisibilityState::Visible,
                VisibilityState::Fogged,
                VisibilityState::Fogged,
                VisibilityState::Fogged
            ]
        );
    }

    #[test]
    fn malformed_positions_are_skipped() {
        let message = decode(
            r#"{"foggedChunks":[{"x":"1","z":0},{"z":0},7,{"x":1.5,"z":0},{"x":4294967296,"z":0},{"x":5,"z":5,"state":"HIDDEN"}]}"#,
        )
        .unwrap();
        assert_eq!(message.skipped, 5);
        assert_eq!(message.updates.len(), 1);
        assert_eq!(message.seen.len(), 1);
    }

    #[test]
    fn bad_fog_data_is_substituted() {
        let message = decode(
            r#"{"foggedChunks":[{"x":1,"z":1,"state":"FOGGED","fogBlock":"Not Valid!","snapshot":"%%%"},{"x":2,"z":2,"fogBlock":5,"snapshot":"AAAA"}]}"#,
        )
        .unwrap();
        assert_eq!(message.updates.len(), 2);
        for update in &message.updates {
            assert!(update.appearance.is_none());
            assert!(update.snapshot.is_none());
            assert_eq!(update.state, VisibilityState::Fogged);
        }
    }

    #[test]
    fn reset_flag_and_actor_directives() {
        let a = ActorId::new();
        let text = format!(r#"{{"resetState":true,"npcUuids":["{a}","nope",3],"resetNpcs":true}}"#);
        let message = decode(&text).unwrap();
        assert!(message.reset);
        assert!(message.updates.is_empty());
        assert_eq!(
            message.actors,
            Some(ActorDirective {
                ids: vec![a],
                reset: true
            })
        );

        let clear = decode(r#"{"resetNpcs":true}"#).unwrap();
        assert_eq!(
            clear.actors,
            Some(ActorDirective {
                ids: vec![],
                reset: true
            })
        );
        assert!(decode("{}").unwrap().is_empty());
    }

    #[test]
    fn non_object_messages_are_errors() {
        assert!(matches!(decode("[1,2]"), Err(SyncError::NotObject)));
        assert!(matches!(decode("{not json"), Err(SyncError::Malformed(_))));
        let ignored = decode(r#"{"foggedChunks":{"x":1}}"#).unwrap();
        assert!(ignored.updates.is_empty());
    }
}
