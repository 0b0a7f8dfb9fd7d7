// model = "claude-opus-4-5"
// created = 2026-02-03
// modified = 2026-02-03
// driver = "Isaac Clayton"

//! Attribution: which sequenced op last wrote each key.
//!
//! Tracking is optional; a kernel only carries a table when configured
//! for it. Entries are written when an op is acknowledged with a global
//! sequence number - local state that has not sequenced yet has no
//! attribution.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

/// Attribution for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributionKey {
    /// Written by the op with this global sequence number.
    Op {
        /// Sequence number assigned by the ordering service.
        seq: u64,
    },
}

/// Key to attribution mapping.
#[derive(Clone, Debug, Default)]
pub struct AttributionTable {
    entries: FxHashMap<String, AttributionKey>,
}

impl AttributionTable {
    /// Create an empty table.
    pub fn new() -> AttributionTable {
        return AttributionTable {
            entries: FxHashMap::default(),
        };
    }

    /// Record that `key` was last written by the op sequenced at `seq`.
    pub fn record(&mut self, key: &str, seq: u64) {
        self.insert(key, AttributionKey::Op { seq });
    }

    /// Store attribution for a key directly (snapshot hydration).
    pub fn insert(&mut self, key: &str, attribution: AttributionKey) {
        self.entries.insert(key.to_string(), attribution);
    }

    /// Forget one key.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Attribution for a key, if any op has sequenced a write to it.
    pub fn get(&self, key: &str) -> Option<AttributionKey> {
        return self.entries.get(key).copied();
    }

    /// Iterate over all attributed keys.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AttributionKey)> {
        return self.entries.iter().map(|(k, v)| (k.as_str(), *v));
    }

    /// Number of attributed keys.
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    /// Whether no key has attribution.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }
}
