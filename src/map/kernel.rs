// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! The map kernel: local state plus reconciliation against the op stream.
//!
//! Key design decisions:
//!
//! 1. **Insertion-ordered store**: iteration and snapshots observe keys in
//!    the order they first appeared on this replica. Overwrites keep a
//!    key's slot; delete-then-reinsert moves it to the end.
//!
//! 2. **Optimism with receipts**: local ops mutate the store immediately
//!    and queue a pending id. The sequencer echoes our ops back in
//!    submission order, so acknowledgements always consume the *front* of
//!    a pending list and rollbacks always consume the *back*. Any other
//!    shape is a protocol bug and poisons the kernel.
//!
//! 3. **Remote ops yield to pending locals**: a remote op for a key with
//!    in-flight local writes is skipped outright; our writes sequence
//!    later and overwrite it anyway. A remote clear with in-flight key
//!    writes keeps exactly those keys (the "clear except pending" path).
//!
//! 4. **Seams, not dependencies**: the ordering service and the shared-
//!    object resolver sit behind the [`MapTransport`] and
//!    [`HandleResolver`] traits. The kernel performs no I/O and suspends
//!    nowhere; everything runs on the caller's thread.

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use tracing::debug;
use tracing::trace;

use super::MapError;
use super::attribution::AttributionKey;
use super::attribution::AttributionTable;
use super::events::EventRegistry;
use super::events::ListenerId;
use super::events::ValueChanged;
use super::ops::LocalOpMetadata;
use super::ops::MapOp;
use super::ops::SequencedMessage;
use super::pending::PendingTracker;
use super::snapshot;
use super::value::HandleResolver;
use super::value::LocalValue;
use super::value::NoopResolver;

/// The live store. `IndexMap` gives the insertion-order iteration the
/// replication model requires: `insert` on an existing key keeps its
/// slot, `shift_remove` keeps the order of the survivors.
type Store = IndexMap<String, LocalValue, FxBuildHasher>;

/// The kernel's connection to the ordering service.
pub trait MapTransport {
    /// Whether this replica is attached to a live session. Detached
    /// replicas apply ops locally and submit nothing.
    fn is_attached(&self) -> bool;

    /// Hand an op to the sequencer together with its undo metadata. The
    /// transport stores the metadata opaquely and returns it through
    /// [`MapKernel::try_process`], [`MapKernel::try_submit`], or
    /// [`MapKernel::rollback`].
    fn submit(&mut self, op: MapOp, metadata: LocalOpMetadata);
}

/// A replicated key-value map replica.
pub struct MapKernel {
    data: Store,
    pending: PendingTracker,
    attribution: Option<AttributionTable>,
    events: EventRegistry,
    transport: Box<dyn MapTransport>,
    resolver: Box<dyn HandleResolver>,
    failed: bool,
}

impl MapKernel {
    /// Create a kernel with no attribution tracking and pass-through
    /// handle resolution.
    pub fn new(transport: Box<dyn MapTransport>) -> MapKernel {
        return MapKernel::with_config(transport, Box::new(NoopResolver), false);
    }

    /// Create a kernel with an explicit resolver and optional attribution
    /// tracking.
    pub fn with_config(
        transport: Box<dyn MapTransport>,
        resolver: Box<dyn HandleResolver>,
        track_attribution: bool,
    ) -> MapKernel {
        return MapKernel {
            data: Store::default(),
            pending: PendingTracker::new(),
            attribution: if track_attribution {
                Some(AttributionTable::new())
            } else {
                None
            },
            events: EventRegistry::new(),
            transport,
            resolver,
            failed: false,
        };
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The current value for a key.
    pub fn get(&self, key: &str) -> Option<&LocalValue> {
        return self.data.get(key);
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        return self.data.contains_key(key);
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        return self.data.len();
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        return self.data.is_empty();
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        return self.data.keys().map(|k| k.as_str());
    }

    /// Values in key insertion order.
    pub fn values(&self) -> impl Iterator<Item = &LocalValue> {
        return self.data.values();
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &LocalValue)> {
        return self.data.iter().map(|(k, v)| (k.as_str(), v));
    }

    /// Visit every entry in insertion order.
    pub fn for_each(&self, mut visit: impl FnMut(&str, &LocalValue)) {
        for (key, value) in &self.data {
            visit(key, value);
        }
    }

    /// Attribution for a key. `None` when tracking is off or no sequenced
    /// op has written the key.
    pub fn attribution(&self, key: &str) -> Option<AttributionKey> {
        return self.attribution.as_ref()?.get(key);
    }

    /// The whole attribution table, when tracking is on.
    pub fn all_attribution(&self) -> Option<&AttributionTable> {
        return self.attribution.as_ref();
    }

    /// Whether an earlier fatal error left this kernel unusable.
    pub fn is_failed(&self) -> bool {
        return self.failed;
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Subscribe to `valueChanged`. Listeners must not call back into the
    /// kernel.
    pub fn on_value_changed(
        &mut self,
        listener: impl FnMut(&ValueChanged, bool) + 'static,
    ) -> ListenerId {
        return self.events.on_value_changed(listener);
    }

    /// Subscribe to `clear`. Listeners must not call back into the kernel.
    pub fn on_clear(&mut self, listener: impl FnMut(bool) + 'static) -> ListenerId {
        return self.events.on_clear(listener);
    }

    /// Drop a listener.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        return self.events.unsubscribe(id);
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Store a value under a key, submitting the op when attached.
    pub fn set(&mut self, key: impl Into<String>, value: LocalValue) -> Result<(), MapError> {
        self.ensure_usable()?;
        let key = key.into();
        if key.is_empty() {
            return Err(MapError::InvalidKey);
        }

        let wire = if self.transport.is_attached() {
            Some(value.to_wire(self.resolver.as_ref()))
        } else {
            None
        };

        let previous = self.data.insert(key.clone(), value);
        self.events.emit_value_changed(
            &ValueChanged {
                key: key.clone(),
                previous: previous.clone(),
            },
            true,
        );

        if let Some(wire) = wire {
            let id = self.pending.next_id();
            self.pending.push_key(&key, id);
            debug!(key = %key, pending_id = id, "submit set");
            self.transport.submit(
                MapOp::Set { key, value: wire },
                LocalOpMetadata::for_key(id, previous),
            );
        }
        return Ok(());
    }

    /// Remove a key, submitting the op when attached. Returns whether the
    /// key was present.
    pub fn delete(&mut self, key: &str) -> Result<bool, MapError> {
        self.ensure_usable()?;
        if key.is_empty() {
            return Err(MapError::InvalidKey);
        }

        let previous = self.data.shift_remove(key);
        let existed = previous.is_some();
        if existed {
            self.events.emit_value_changed(
                &ValueChanged {
                    key: key.to_string(),
                    previous: previous.clone(),
                },
                true,
            );
        }

        if self.transport.is_attached() {
            let id = self.pending.next_id();
            self.pending.push_key(key, id);
            debug!(key = %key, pending_id = id, "submit delete");
            self.transport.submit(
                MapOp::Delete {
                    key: key.to_string(),
                },
                LocalOpMetadata::for_key(id, previous),
            );
        }
        return Ok(existed);
    }

    /// Empty the store, submitting the op when attached. The displaced
    /// entries ride along in the metadata so the op can be rolled back.
    pub fn clear(&mut self) -> Result<(), MapError> {
        self.ensure_usable()?;

        let previous = if self.transport.is_attached() {
            Some(self.snapshot_entries())
        } else {
            None
        };

        self.data.clear();
        self.events.emit_clear(true);

        if let Some(previous) = previous {
            let id = self.pending.next_id();
            self.pending.push_clear(id);
            debug!(pending_id = id, "submit clear");
            self.transport.submit(
                MapOp::Clear,
                LocalOpMetadata::Clear {
                    pending_id: id,
                    previous,
                },
            );
        }
        return Ok(());
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Encode the store as snapshot text, in insertion order, including
    /// attribution when tracking is on.
    pub fn serialize(&self) -> Result<String, MapError> {
        return snapshot::encode(
            self.data.iter().map(|(k, v)| (k.as_str(), v)),
            self.attribution.as_ref(),
            self.resolver.as_ref(),
        );
    }

    /// Replace the store with the contents of a snapshot. Accepts both
    /// snapshot formats; see [`snapshot`](super::snapshot). Emits no
    /// events: hydration precedes any observer.
    pub fn populate(&mut self, text: &str) -> Result<(), MapError> {
        self.ensure_usable()?;
        let entries = snapshot::decode(text, self.resolver.as_ref())?;

        self.data.clear();
        if let Some(table) = self.attribution.as_mut() {
            table.clear();
        }
        for entry in entries {
            if let Some(table) = self.attribution.as_mut() {
                if let Some(attribution) = entry.attribution {
                    table.insert(&entry.key, attribution);
                }
            }
            self.data.insert(entry.key, entry.value);
        }
        return Ok(());
    }

    // =========================================================================
    // Op stream
    // =========================================================================

    /// Process a sequenced message.
    ///
    /// `local` marks the acknowledgement of one of our own ops, in which
    /// case `metadata` must be the metadata we attached at submission.
    /// Returns `Ok(false)` untouched when the payload belongs to some
    /// other replicated object.
    pub fn try_process(
        &mut self,
        msg: &SequencedMessage,
        local: bool,
        metadata: Option<LocalOpMetadata>,
    ) -> Result<bool, MapError> {
        self.ensure_usable()?;
        let Some(op) = MapOp::from_value(&msg.contents)? else {
            return Ok(false);
        };
        let result = self.process_op(&op, local, metadata, msg.sequence_number);
        return self.seal_fatal(result).map(|_| true);
    }

    /// Resubmit an op after a reconnect, rotating its pending id.
    ///
    /// Returns `Ok(false)` untouched when the payload belongs to some
    /// other replicated object.
    pub fn try_submit(
        &mut self,
        raw: &serde_json::Value,
        metadata: LocalOpMetadata,
    ) -> Result<bool, MapError> {
        self.ensure_usable()?;
        let Some(op) = MapOp::from_value(raw)? else {
            return Ok(false);
        };
        let result = self.resubmit(op, metadata);
        return self.seal_fatal(result).map(|_| true);
    }

    /// Replay an op that was persisted before transmission, as if it were
    /// newly issued here. Returns fresh metadata for the new submission.
    pub fn try_apply_stashed(
        &mut self,
        raw: &serde_json::Value,
    ) -> Result<LocalOpMetadata, MapError> {
        self.ensure_usable()?;
        let Some(op) = MapOp::from_value(raw)? else {
            let kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or("<untyped>");
            return Err(MapError::UnknownOp(kind.to_string()));
        };

        match op {
            MapOp::Set { key, value } => {
                let value = LocalValue::from_wire(&value, self.resolver.as_ref())?;
                let previous = self.data.insert(key.clone(), value);
                self.events.emit_value_changed(
                    &ValueChanged {
                        key: key.clone(),
                        previous: previous.clone(),
                    },
                    true,
                );
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                return Ok(LocalOpMetadata::for_key(id, previous));
            }
            MapOp::Delete { key } => {
                let previous = self.data.shift_remove(&key);
                if previous.is_some() {
                    self.events.emit_value_changed(
                        &ValueChanged {
                            key: key.clone(),
                            previous: previous.clone(),
                        },
                        true,
                    );
                }
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                return Ok(LocalOpMetadata::for_key(id, previous));
            }
            MapOp::Clear => {
                let previous = self.snapshot_entries();
                self.data.clear();
                self.events.emit_clear(true);
                let id = self.pending.next_id();
                self.pending.push_clear(id);
                return Ok(LocalOpMetadata::Clear {
                    pending_id: id,
                    previous,
                });
            }
        }
    }

    /// Revert an unsequenced local op. `metadata` must be what we
    /// attached when the op was submitted; ops unwind newest-first.
    pub fn rollback(&mut self, op: &MapOp, metadata: LocalOpMetadata) -> Result<(), MapError> {
        self.ensure_usable()?;
        let result = self.rollback_op(op, metadata);
        return self.seal_fatal(result);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_usable(&self) -> Result<(), MapError> {
        if self.failed {
            return Err(MapError::Failed);
        }
        return Ok(());
    }

    /// Poison the kernel on protocol-breaking errors.
    fn seal_fatal<T>(&mut self, result: Result<T, MapError>) -> Result<T, MapError> {
        if let Err(MapError::InvariantViolation(_) | MapError::RollbackMismatch) = &result {
            self.failed = true;
        }
        return result;
    }

    /// Clone the store in insertion order.
    fn snapshot_entries(&self) -> Vec<(String, LocalValue)> {
        return self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }

    fn process_op(
        &mut self,
        op: &MapOp,
        local: bool,
        metadata: Option<LocalOpMetadata>,
        seq: u64,
    ) -> Result<(), MapError> {
        match op {
            MapOp::Clear => {
                return self.process_clear(local, metadata);
            }
            MapOp::Set { key, value } => {
                if !self.need_process_key_op(key, local, metadata.as_ref(), seq)? {
                    return Ok(());
                }
                trace!(key = %key, seq, "apply remote set");
                let value = LocalValue::from_wire(value, self.resolver.as_ref())?;
                let previous = self.data.insert(key.clone(), value);
                if let Some(table) = self.attribution.as_mut() {
                    table.record(key, seq);
                }
                self.events.emit_value_changed(
                    &ValueChanged {
                        key: key.clone(),
                        previous,
                    },
                    false,
                );
                return Ok(());
            }
            MapOp::Delete { key } => {
                if !self.need_process_key_op(key, local, metadata.as_ref(), seq)? {
                    return Ok(());
                }
                trace!(key = %key, seq, "apply remote delete");
                let previous = self.data.shift_remove(key);
                if previous.is_some() {
                    if let Some(table) = self.attribution.as_mut() {
                        table.record(key, seq);
                    }
                    self.events.emit_value_changed(
                        &ValueChanged {
                            key: key.clone(),
                            previous,
                        },
                        false,
                    );
                }
                return Ok(());
            }
        }
    }

    /// Decide whether an inbound key op must be applied, and do the
    /// pending bookkeeping for our own acknowledgements.
    ///
    /// Three cases, checked in order:
    ///
    /// 1. A clear of ours is in flight. Everything before it is void:
    ///    our own earlier key acks drain their pending entries, remote
    ///    ops are dropped outright.
    /// 2. The key has in-flight local writes. Our own ack drains the
    ///    front of the queue and records attribution; remote ops lose to
    ///    the pending writes and are dropped.
    /// 3. Nothing pending: remote ops apply. A local ack here means the
    ///    bookkeeping is broken.
    fn need_process_key_op(
        &mut self,
        key: &str,
        local: bool,
        metadata: Option<&LocalOpMetadata>,
        seq: u64,
    ) -> Result<bool, MapError> {
        if let Some(first_clear) = self.pending.first_pending_clear() {
            if local {
                let id = Self::acked_pending_id(metadata)?;
                if id >= first_clear {
                    return Err(MapError::InvariantViolation(
                        "key op sequenced out of order with pending clear",
                    ));
                }
                self.pending.pop_key_front(key, id)?;
            }
            return Ok(false);
        }

        if self.pending.has_pending_for(key) {
            if local {
                let id = Self::acked_pending_id(metadata)?;
                self.pending.pop_key_front(key, id)?;
                if let Some(table) = self.attribution.as_mut() {
                    table.record(key, seq);
                }
            }
            return Ok(false);
        }

        if local {
            return Err(MapError::InvariantViolation("local key op with no pending id"));
        }
        return Ok(true);
    }

    fn acked_pending_id(metadata: Option<&LocalOpMetadata>) -> Result<u64, MapError> {
        match metadata {
            Some(LocalOpMetadata::Add { pending_id }) => return Ok(*pending_id),
            Some(LocalOpMetadata::Edit { pending_id, .. }) => return Ok(*pending_id),
            _ => {
                return Err(MapError::InvariantViolation(
                    "local key op without key metadata",
                ));
            }
        }
    }

    fn process_clear(
        &mut self,
        local: bool,
        metadata: Option<LocalOpMetadata>,
    ) -> Result<(), MapError> {
        if local {
            let Some(LocalOpMetadata::Clear { pending_id, .. }) = metadata else {
                return Err(MapError::InvariantViolation(
                    "local clear without clear metadata",
                ));
            };
            self.pending.pop_clear_front(pending_id)?;
            if let Some(table) = self.attribution.as_mut() {
                table.clear();
            }
            return Ok(());
        }

        if self.pending.has_pending_keys() {
            debug!("remote clear reconciled against pending local writes");
            self.clear_except_pending();
            return Ok(());
        }

        self.data.clear();
        if let Some(table) = self.attribution.as_mut() {
            table.clear();
        }
        self.events.emit_clear(false);
        return Ok(());
    }

    /// A remote clear arrived while local key writes are in flight: wipe
    /// the store but keep the keys those writes touched, at their local
    /// values. The restores fire `valueChanged` as locally authored; the
    /// pending writes themselves sequence later and land normally.
    fn clear_except_pending(&mut self) {
        let keep: Vec<(String, LocalValue)> = self
            .data
            .iter()
            .filter(|(key, _)| self.pending.has_pending_for(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        self.data.clear();
        if let Some(table) = self.attribution.as_mut() {
            table.clear();
        }

        for (key, value) in keep {
            self.data.insert(key.clone(), value);
            self.events.emit_value_changed(
                &ValueChanged {
                    key,
                    previous: None,
                },
                true,
            );
        }
    }

    fn resubmit(&mut self, op: MapOp, metadata: LocalOpMetadata) -> Result<(), MapError> {
        match (op, metadata) {
            (MapOp::Clear, LocalOpMetadata::Clear { pending_id, previous }) => {
                self.pending.pop_clear_front(pending_id)?;
                let id = self.pending.next_id();
                self.pending.push_clear(id);
                debug!(old = pending_id, new = id, "resubmit clear");
                self.transport.submit(
                    MapOp::Clear,
                    LocalOpMetadata::Clear {
                        pending_id: id,
                        previous,
                    },
                );
                return Ok(());
            }
            (op, LocalOpMetadata::Add { pending_id }) => {
                let key = Self::key_of(&op)?;
                self.pending.pop_key_front(&key, pending_id)?;
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                debug!(key = %key, old = pending_id, new = id, "resubmit key op");
                self.transport
                    .submit(op, LocalOpMetadata::Add { pending_id: id });
                return Ok(());
            }
            (op, LocalOpMetadata::Edit { pending_id, previous }) => {
                let key = Self::key_of(&op)?;
                self.pending.pop_key_front(&key, pending_id)?;
                let id = self.pending.next_id();
                self.pending.push_key(&key, id);
                debug!(key = %key, old = pending_id, new = id, "resubmit key op");
                self.transport.submit(
                    op,
                    LocalOpMetadata::Edit {
                        pending_id: id,
                        previous,
                    },
                );
                return Ok(());
            }
            _ => {
                return Err(MapError::InvariantViolation(
                    "resubmitted op does not match its metadata",
                ));
            }
        }
    }

    fn key_of(op: &MapOp) -> Result<String, MapError> {
        match op.key() {
            Some(key) => return Ok(key.to_string()),
            None => {
                return Err(MapError::InvariantViolation(
                    "key metadata attached to a clear op",
                ));
            }
        }
    }

    fn rollback_op(&mut self, op: &MapOp, metadata: LocalOpMetadata) -> Result<(), MapError> {
        match (op, metadata) {
            (MapOp::Clear, LocalOpMetadata::Clear { pending_id, previous }) => {
                for (key, value) in previous {
                    let displaced = self.data.insert(key.clone(), value);
                    self.events.emit_value_changed(
                        &ValueChanged {
                            key,
                            previous: displaced,
                        },
                        true,
                    );
                }
                self.pending.pop_clear_back(pending_id)?;
                return Ok(());
            }
            (MapOp::Set { key, .. } | MapOp::Delete { key }, LocalOpMetadata::Add { pending_id }) => {
                let previous = self.data.shift_remove(key);
                if previous.is_some() {
                    self.events.emit_value_changed(
                        &ValueChanged {
                            key: key.clone(),
                            previous,
                        },
                        true,
                    );
                }
                self.pending.pop_key_back(key, pending_id)?;
                return Ok(());
            }
            (
                MapOp::Set { key, .. } | MapOp::Delete { key },
                LocalOpMetadata::Edit { pending_id, previous },
            ) => {
                let displaced = self.data.insert(key.clone(), previous);
                self.events.emit_value_changed(
                    &ValueChanged {
                        key: key.clone(),
                        previous: displaced,
                    },
                    true,
                );
                self.pending.pop_key_back(key, pending_id)?;
                return Ok(());
            }
            _ => {
                return Err(MapError::RollbackMismatch);
            }
        }
    }
}
