// model = "claude-opus-4-5"
// created = 2026-02-03
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! Snapshot encoding and hydration.
//!
//! The emitted format is a flat JSON object, one field per key in
//! insertion order:
//!
//! ```text
//! {
//!   "name":  { "type": "Plain",  "value": "ada" },
//!   "score": { "type": "Plain",  "value": 3, "attribution": { "type": "op", "seq": 12 } },
//!   "peer":  { "type": "Shared", "value": "/objects/counter-1" }
//! }
//! ```
//!
//! Hydration also accepts the older nested format produced by the
//! directory-shaped variant of this data structure,
//! `{ "storage": { ... }, "subdirectories": { ... }, "ci": { ... } }`,
//! from which only `storage` is consumed. A small normalizer lifts either
//! shape into the flat form before any decoding happens.
//!
//! Decoding is all-or-nothing: every entry is decoded before the caller
//! commits anything, so a malformed snapshot leaves the map untouched.

use serde::Deserialize;
use serde::Serialize;

use super::MapError;
use super::attribution::AttributionKey;
use super::attribution::AttributionTable;
use super::value::HandleResolver;
use super::value::LocalValue;
use super::value::SerializedValue;

/// One key's snapshot record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// The encoded value.
    #[serde(flatten)]
    pub value: SerializedValue,
    /// Attribution, when it was tracked at serialization time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionKey>,
}

/// A fully decoded snapshot record, ready for insertion.
#[derive(Clone, Debug)]
pub struct DecodedEntry {
    /// The key.
    pub key: String,
    /// The materialized value.
    pub value: LocalValue,
    /// Attribution carried by the snapshot, if any.
    pub attribution: Option<AttributionKey>,
}

/// Encode entries into snapshot text, preserving iteration order.
pub fn encode<'a>(
    entries: impl Iterator<Item = (&'a str, &'a LocalValue)>,
    attribution: Option<&AttributionTable>,
    resolver: &dyn HandleResolver,
) -> Result<String, MapError> {
    let mut out = serde_json::Map::new();
    for (key, value) in entries {
        let entry = SnapshotEntry {
            value: value.to_wire(resolver),
            attribution: attribution.and_then(|table| table.get(key)),
        };
        out.insert(key.to_string(), serde_json::to_value(entry)?);
    }
    return Ok(serde_json::to_string(&serde_json::Value::Object(out))?);
}

/// Decode snapshot text into entries, in the order the snapshot lists
/// them. Accepts both the flat and the nested legacy format.
pub fn decode(text: &str, resolver: &dyn HandleResolver) -> Result<Vec<DecodedEntry>, MapError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let flat = normalize(root)?;

    let mut entries = Vec::with_capacity(flat.len());
    for (key, raw) in flat {
        let entry: SnapshotEntry = serde_json::from_value(raw)?;
        let value = LocalValue::from_wire(&entry.value, resolver)?;
        entries.push(DecodedEntry {
            key,
            value,
            attribution: entry.attribution,
        });
    }
    return Ok(entries);
}

/// Lift either accepted snapshot shape into the canonical flat object.
///
/// The nested format is recognized by a top-level `storage` field holding
/// an object that is not itself a snapshot entry. A flat map that merely
/// *contains* a key named "storage" keeps working, because its entry
/// carries a string `type` field.
fn normalize(
    root: serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, MapError> {
    let mut obj: serde_json::Map<String, serde_json::Value> = serde_json::from_value(root)?;

    let is_nested = match obj.get("storage") {
        Some(serde_json::Value::Object(storage)) => {
            !storage.get("type").is_some_and(|t| t.is_string())
        }
        _ => false,
    };

    if is_nested {
        // Subdirectories and creation info belong to the directory
        // variant; only the flat key storage is ours.
        if let Some(storage) = obj.remove("storage") {
            return Ok(serde_json::from_value(storage)?);
        }
    }
    return Ok(obj);
}
