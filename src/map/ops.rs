// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-03
// driver = "Isaac Clayton"

//! Wire operations and local op metadata.
//!
//! Three ops cross the wire: `set`, `delete`, and `clear`. Each is tagged
//! by `type` so the envelope's contents stay self-describing - the
//! transport routes op payloads to many replicated objects, and only the
//! ones tagged with our op kinds belong to the map.
//!
//! When a local op is submitted, the kernel attaches [`LocalOpMetadata`]
//! describing how to undo it. The transport holds the metadata opaquely
//! and hands it back on acknowledgement, resubmission, and rollback.

use serde::Deserialize;
use serde::Serialize;

use super::MapError;
use super::value::LocalValue;
use super::value::SerializedValue;

/// A map operation as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapOp {
    /// Store a value under a key.
    Set {
        /// The key to write.
        key: String,
        /// The encoded value.
        value: SerializedValue,
    },
    /// Remove a key.
    Delete {
        /// The key to remove.
        key: String,
    },
    /// Remove every key.
    Clear,
}

impl MapOp {
    /// Decode an opaque op payload.
    ///
    /// Returns `None` when the payload is not tagged with one of our op
    /// kinds (it belongs to some other replicated object). A payload that
    /// claims one of our kinds but does not match its schema is an error.
    pub fn from_value(raw: &serde_json::Value) -> Result<Option<MapOp>, MapError> {
        let kind = raw.get("type").and_then(|t| t.as_str());
        match kind {
            Some("set") | Some("delete") | Some("clear") => {}
            _ => return Ok(None),
        }
        let op = serde_json::from_value(raw.clone())?;
        return Ok(Some(op));
    }

    /// The key this op touches, if it is a key op.
    pub fn key(&self) -> Option<&str> {
        match self {
            MapOp::Set { key, .. } => return Some(key),
            MapOp::Delete { key } => return Some(key),
            MapOp::Clear => return None,
        }
    }
}

/// A sequenced message as delivered by the ordering service.
///
/// `contents` is kept opaque; [`MapOp::from_value`] decides whether the
/// payload belongs to this kernel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedMessage {
    /// The op payload.
    pub contents: serde_json::Value,
    /// Global order assigned by the sequencer.
    pub sequence_number: u64,
    /// The client that issued the op.
    pub client_id: String,
    /// The issuing client's own op counter.
    pub client_sequence_number: u64,
}

/// Undo information attached to a locally submitted op.
///
/// The variant records what the op displaced:
///
/// - `Add`: a set (or delete) of a key that had no prior value.
/// - `Edit`: a set or delete of a key with a prior value.
/// - `Clear`: carries the whole prior store, in insertion order.
#[derive(Clone, Debug)]
pub enum LocalOpMetadata {
    /// The key had no prior value.
    Add {
        /// Pending id issued for this op.
        pending_id: u64,
    },
    /// The key had a prior value, preserved here for rollback.
    Edit {
        /// Pending id issued for this op.
        pending_id: u64,
        /// The displaced value.
        previous: LocalValue,
    },
    /// A clear, carrying the displaced store.
    Clear {
        /// Pending id issued for this op.
        pending_id: u64,
        /// The displaced entries, in insertion order.
        previous: Vec<(String, LocalValue)>,
    },
}

impl LocalOpMetadata {
    /// Metadata for a key op, picking `Add` or `Edit` from the displaced
    /// value.
    pub fn for_key(pending_id: u64, previous: Option<LocalValue>) -> LocalOpMetadata {
        match previous {
            None => return LocalOpMetadata::Add { pending_id },
            Some(previous) => return LocalOpMetadata::Edit { pending_id, previous },
        }
    }

    /// The pending id this metadata was issued under.
    pub fn pending_id(&self) -> u64 {
        match self {
            LocalOpMetadata::Add { pending_id } => return *pending_id,
            LocalOpMetadata::Edit { pending_id, .. } => return *pending_id,
            LocalOpMetadata::Clear { pending_id, .. } => return *pending_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_wire_shape() {
        let op = MapOp::Set {
            key: "k".to_string(),
            value: SerializedValue {
                kind: "Plain".to_string(),
                value: json!(1),
            },
        };
        let raw = serde_json::to_value(&op).unwrap();
        assert_eq!(
            raw,
            json!({"type": "set", "key": "k", "value": {"type": "Plain", "value": 1}})
        );
    }

    #[test]
    fn clear_wire_shape() {
        let raw = serde_json::to_value(&MapOp::Clear).unwrap();
        assert_eq!(raw, json!({"type": "clear"}));
    }

    #[test]
    fn foreign_op_is_not_ours() {
        let raw = json!({"type": "insert", "pos": 3});
        assert_eq!(MapOp::from_value(&raw).unwrap(), None);

        let raw = json!({"address": "counter-1"});
        assert_eq!(MapOp::from_value(&raw).unwrap(), None);
    }

    #[test]
    fn malformed_map_op_is_an_error() {
        // Claims to be a set, but has no key.
        let raw = json!({"type": "set", "value": {"type": "Plain", "value": 1}});
        assert!(MapOp::from_value(&raw).is_err());
    }

    #[test]
    fn envelope_field_names() {
        let text = r#"{
            "contents": {"type": "clear"},
            "sequenceNumber": 7,
            "clientId": "client-a",
            "clientSequenceNumber": 3
        }"#;
        let msg: SequencedMessage = serde_json::from_str(text).unwrap();
        assert_eq!(msg.sequence_number, 7);
        assert_eq!(msg.client_id, "client-a");
        assert_eq!(msg.client_sequence_number, 3);
    }

    #[test]
    fn metadata_picks_variant_from_previous() {
        let add = LocalOpMetadata::for_key(0, None);
        assert!(matches!(add, LocalOpMetadata::Add { pending_id: 0 }));

        let edit = LocalOpMetadata::for_key(1, Some(LocalValue::plain(5)));
        assert!(matches!(edit, LocalOpMetadata::Edit { pending_id: 1, .. }));
    }
}
