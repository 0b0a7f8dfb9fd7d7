// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! Bookkeeping for locally submitted but unacknowledged ops.
//!
//! Every local op receives a pending id from a single monotonic counter.
//! Key ops queue their ids per key (FIFO, oldest first); clears queue on
//! their own list. The partition invariant: a pending id lives in exactly
//! one place - some key's list or the clear list - until it is popped by
//! an acknowledgement, a rollback, or a resubmission.
//!
//! Acknowledgements consume from the front (the sequencer echoes our ops
//! in submission order); rollbacks consume from the back (the runtime
//! unwinds the newest op first). Both pops verify the id they were handed.
//! A mismatch means the bookkeeping no longer agrees with the op stream,
//! which the kernel treats as fatal.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::MapError;

/// Pending ids for one key. Almost always one or two entries.
type IdList = SmallVec<[u64; 2]>;

/// Tracks pending ids for in-flight local ops.
#[derive(Clone, Debug, Default)]
pub struct PendingTracker {
    /// Next id to issue.
    next_id: u64,
    /// Pending key-op ids, oldest first. Empty lists are removed.
    keys: FxHashMap<String, IdList>,
    /// Pending clear ids, oldest first.
    clears: IdList,
}

impl PendingTracker {
    /// Create a tracker with no pending ops.
    pub fn new() -> PendingTracker {
        return PendingTracker {
            next_id: 0,
            keys: FxHashMap::default(),
            clears: SmallVec::new(),
        };
    }

    /// Issue the next pending id. Ids strictly increase and are never
    /// reused, even after rollback.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        return id;
    }

    /// Queue a pending id for a key.
    pub fn push_key(&mut self, key: &str, id: u64) {
        self.keys.entry(key.to_string()).or_default().push(id);
    }

    /// Consume the oldest pending id for a key, verifying it is
    /// `expected`.
    pub fn pop_key_front(&mut self, key: &str, expected: u64) -> Result<(), MapError> {
        let Some(ids) = self.keys.get_mut(key) else {
            return Err(MapError::InvariantViolation("no pending ops for key"));
        };
        if ids.first() != Some(&expected) {
            return Err(MapError::InvariantViolation("pending key op out of order"));
        }
        ids.remove(0);
        if ids.is_empty() {
            self.keys.remove(key);
        }
        return Ok(());
    }

    /// Consume the newest pending id for a key, verifying it is
    /// `expected`. Used by rollback, which unwinds submissions in reverse.
    pub fn pop_key_back(&mut self, key: &str, expected: u64) -> Result<(), MapError> {
        let Some(ids) = self.keys.get_mut(key) else {
            return Err(MapError::InvariantViolation("no pending ops for key"));
        };
        if ids.last() != Some(&expected) {
            return Err(MapError::InvariantViolation("rollback does not match newest pending op"));
        }
        ids.pop();
        if ids.is_empty() {
            self.keys.remove(key);
        }
        return Ok(());
    }

    /// Queue a pending clear id.
    pub fn push_clear(&mut self, id: u64) {
        self.clears.push(id);
    }

    /// Consume the oldest pending clear id, verifying it is `expected`.
    pub fn pop_clear_front(&mut self, expected: u64) -> Result<(), MapError> {
        if self.clears.first() != Some(&expected) {
            return Err(MapError::InvariantViolation("pending clear out of order"));
        }
        self.clears.remove(0);
        return Ok(());
    }

    /// Consume the newest pending clear id, verifying it is `expected`.
    pub fn pop_clear_back(&mut self, expected: u64) -> Result<(), MapError> {
        if self.clears.last() != Some(&expected) {
            return Err(MapError::InvariantViolation("rollback does not match newest pending clear"));
        }
        self.clears.pop();
        return Ok(());
    }

    /// Whether any clear is in flight.
    #[inline]
    pub fn has_pending_clear(&self) -> bool {
        return !self.clears.is_empty();
    }

    /// The oldest in-flight clear id.
    #[inline]
    pub fn first_pending_clear(&self) -> Option<u64> {
        return self.clears.first().copied();
    }

    /// The in-flight ids for a key, oldest first.
    #[inline]
    pub fn pending_for(&self, key: &str) -> Option<&[u64]> {
        return self.keys.get(key).map(|ids| ids.as_slice());
    }

    /// Whether a key has any op in flight.
    #[inline]
    pub fn has_pending_for(&self, key: &str) -> bool {
        return self.keys.contains_key(key);
    }

    /// Whether any key op is in flight.
    #[inline]
    pub fn has_pending_keys(&self) -> bool {
        return !self.keys.is_empty();
    }

    /// Whether nothing at all is in flight.
    pub fn is_empty(&self) -> bool {
        return self.keys.is_empty() && self.clears.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_zero_and_increase() {
        let mut pending = PendingTracker::new();
        assert_eq!(pending.next_id(), 0);
        assert_eq!(pending.next_id(), 1);
        assert_eq!(pending.next_id(), 2);
    }

    #[test]
    fn key_fifo() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_key("k", a);
        pending.push_key("k", b);

        assert_eq!(pending.pending_for("k"), Some(&[a, b][..]));
        pending.pop_key_front("k", a).unwrap();
        assert_eq!(pending.pending_for("k"), Some(&[b][..]));
        pending.pop_key_front("k", b).unwrap();

        // Drained lists are removed entirely.
        assert_eq!(pending.pending_for("k"), None);
        assert!(!pending.has_pending_for("k"));
    }

    #[test]
    fn front_pop_verifies_id() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_key("k", a);
        pending.push_key("k", b);

        assert!(pending.pop_key_front("k", b).is_err());
        assert!(pending.pop_key_front("missing", a).is_err());
    }

    #[test]
    fn back_pop_is_lifo() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_key("k", a);
        pending.push_key("k", b);

        assert!(pending.pop_key_back("k", a).is_err());
        pending.pop_key_back("k", b).unwrap();
        pending.pop_key_back("k", a).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn clear_fifo() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_clear(a);
        pending.push_clear(b);

        assert!(pending.has_pending_clear());
        assert_eq!(pending.first_pending_clear(), Some(a));
        assert!(pending.pop_clear_front(b).is_err());
        pending.pop_clear_front(a).unwrap();
        pending.pop_clear_front(b).unwrap();
        assert!(!pending.has_pending_clear());
    }

    #[test]
    fn clear_back_pop() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_clear(a);
        pending.push_clear(b);

        assert!(pending.pop_clear_back(a).is_err());
        pending.pop_clear_back(b).unwrap();
        pending.pop_clear_back(a).unwrap();
    }

    #[test]
    fn keys_and_clears_are_disjoint() {
        let mut pending = PendingTracker::new();
        let a = pending.next_id();
        let b = pending.next_id();
        pending.push_key("k", a);
        pending.push_clear(b);

        assert_eq!(pending.pending_for("k"), Some(&[a][..]));
        assert_eq!(pending.first_pending_clear(), Some(b));
        assert!(!pending.is_empty());
    }
}
