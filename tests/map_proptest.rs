// model = "claude-opus-4-5"
// created = 2026-02-04
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! Property-based tests for the map kernel.
//!
//! The central property is convergence: a replica that edits
//! optimistically while remote traffic interleaves must, once all of its
//! ops are acknowledged, hold the same contents as a replica that only
//! watched the authoritative stream.

use proptest::prelude::*;

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use unison::map::LocalOpMetadata;
use unison::map::LocalValue;
use unison::map::MapKernel;
use unison::map::MapOp;
use unison::map::MapTransport;
use unison::map::NoopResolver;
use unison::map::SequencedMessage;

// =============================================================================
// Harness
// =============================================================================

#[derive(Clone, Default)]
struct Outbox {
    attached: Rc<Cell<bool>>,
    submitted: Rc<RefCell<Vec<(MapOp, LocalOpMetadata)>>>,
}

struct Wire(Outbox);

impl MapTransport for Wire {
    fn is_attached(&self) -> bool {
        return self.0.attached.get();
    }

    fn submit(&mut self, op: MapOp, metadata: LocalOpMetadata) {
        self.0.submitted.borrow_mut().push((op, metadata));
    }
}

fn attached() -> (MapKernel, Outbox) {
    let outbox = Outbox::default();
    outbox.attached.set(true);
    let kernel = MapKernel::new(Box::new(Wire(outbox.clone())));
    return (kernel, outbox);
}

fn watcher() -> MapKernel {
    let outbox = Outbox::default();
    return MapKernel::new(Box::new(Wire(outbox)));
}

fn envelope(op: &MapOp, seq: u64) -> SequencedMessage {
    return SequencedMessage {
        contents: serde_json::to_value(op).unwrap(),
        sequence_number: seq,
        client_id: "client".to_string(),
        client_sequence_number: seq,
    };
}

fn contents_sorted(kernel: &MapKernel) -> Vec<(String, LocalValue)> {
    let mut entries: Vec<(String, LocalValue)> = kernel
        .entries()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    return entries;
}

// =============================================================================
// Edit strategies
// =============================================================================

const KEYS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

/// One edit against the map, local or remote.
#[derive(Clone, Debug)]
enum Edit {
    Set(usize, i64),
    Delete(usize),
    Clear,
}

/// A step in an interleaved schedule.
#[derive(Clone, Debug)]
enum Step {
    Local(Edit),
    Remote(Edit),
}

fn arbitrary_edit() -> impl Strategy<Value = Edit> {
    return prop_oneof![
        4 => (0..KEYS.len(), -100..100i64).prop_map(|(k, v)| Edit::Set(k, v)),
        2 => (0..KEYS.len()).prop_map(Edit::Delete),
        1 => Just(Edit::Clear),
    ];
}

fn arbitrary_step() -> impl Strategy<Value = Step> {
    return prop_oneof![
        2 => arbitrary_edit().prop_map(Step::Local),
        1 => arbitrary_edit().prop_map(Step::Remote),
    ];
}

fn apply_local(kernel: &mut MapKernel, edit: &Edit) {
    match edit {
        Edit::Set(k, v) => kernel.set(KEYS[*k], LocalValue::plain(*v)).unwrap(),
        Edit::Delete(k) => {
            kernel.delete(KEYS[*k]).unwrap();
        }
        Edit::Clear => kernel.clear().unwrap(),
    }
}

fn as_op(edit: &Edit) -> MapOp {
    match edit {
        Edit::Set(k, v) => {
            return MapOp::Set {
                key: KEYS[*k].to_string(),
                value: LocalValue::plain(*v).to_wire(&NoopResolver),
            };
        }
        Edit::Delete(k) => {
            return MapOp::Delete {
                key: KEYS[*k].to_string(),
            };
        }
        Edit::Clear => return MapOp::Clear,
    }
}

// =============================================================================
// Pending id properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every submitted op carries a strictly larger pending id than the
    /// one before it, across rollbacks and resubmissions.
    #[test]
    fn pending_ids_strictly_increase(
        edits in prop::collection::vec(arbitrary_edit(), 1..20),
        resubmit in any::<bool>(),
    ) {
        let (mut kernel, outbox) = attached();
        for edit in &edits {
            apply_local(&mut kernel, edit);
        }

        let mut ids: Vec<u64> = Vec::new();
        ids.extend(outbox.submitted.borrow().iter().map(|(_, m)| m.pending_id()));

        // Optionally reconnect: every in-flight op rotates its id.
        if resubmit {
            let pending = outbox.submitted.borrow_mut().drain(..).collect::<Vec<_>>();
            for (op, metadata) in pending {
                let raw = serde_json::to_value(&op).unwrap();
                prop_assert!(kernel.try_submit(&raw, metadata).unwrap());
            }
            ids.extend(outbox.submitted.borrow().iter().map(|(_, m)| m.pending_id()));
        }

        for pair in ids.windows(2) {
            prop_assert!(pair[0] < pair[1], "ids not strictly increasing: {ids:?}");
        }
    }
}

// =============================================================================
// Convergence
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// An optimistic replica converges to the authoritative stream once
    /// all of its ops are acknowledged, whatever remote traffic
    /// interleaved with its edits.
    #[test]
    fn optimistic_replica_converges(
        schedule in prop::collection::vec(arbitrary_step(), 0..24),
    ) {
        let (mut optimist, outbox) = attached();
        let mut reference = watcher();
        let mut seq = 0;

        for step in &schedule {
            match step {
                Step::Local(edit) => {
                    apply_local(&mut optimist, edit);
                }
                Step::Remote(edit) => {
                    seq += 1;
                    let msg = envelope(&as_op(edit), seq);
                    prop_assert!(optimist.try_process(&msg, false, None).unwrap());
                    prop_assert!(reference.try_process(&msg, false, None).unwrap());
                }
            }
        }

        // The sequencer now echoes the optimist's ops, in order.
        let submitted: Vec<_> = outbox.submitted.borrow_mut().drain(..).collect();
        for (op, metadata) in submitted {
            seq += 1;
            let msg = envelope(&op, seq);
            prop_assert!(optimist.try_process(&msg, true, Some(metadata)).unwrap());
            prop_assert!(reference.try_process(&msg, false, None).unwrap());
        }

        prop_assert_eq!(contents_sorted(&optimist), contents_sorted(&reference));
    }

    /// A reconnect in the middle (every pending op resubmitted with a
    /// fresh id) does not change what the replica converges to.
    #[test]
    fn convergence_survives_a_reconnect(
        edits in prop::collection::vec(arbitrary_edit(), 1..16),
    ) {
        let (mut optimist, outbox) = attached();
        let mut reference = watcher();

        for edit in &edits {
            apply_local(&mut optimist, edit);
        }

        // Connection drops: everything in flight is resubmitted.
        let pending: Vec<_> = outbox.submitted.borrow_mut().drain(..).collect();
        for (op, metadata) in pending {
            let raw = serde_json::to_value(&op).unwrap();
            prop_assert!(optimist.try_submit(&raw, metadata).unwrap());
        }

        // The resubmitted ops sequence normally.
        let mut seq = 0;
        let submitted: Vec<_> = outbox.submitted.borrow_mut().drain(..).collect();
        for (op, metadata) in submitted {
            seq += 1;
            let msg = envelope(&op, seq);
            prop_assert!(optimist.try_process(&msg, true, Some(metadata)).unwrap());
            prop_assert!(reference.try_process(&msg, false, None).unwrap());
        }

        prop_assert_eq!(contents_sorted(&optimist), contents_sorted(&reference));
    }
}

// =============================================================================
// Rollback
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Rolling every submitted op back, newest first, restores the
    /// pre-submit contents and drains all pending state.
    #[test]
    fn rollback_all_restores_the_presubmit_state(
        base in prop::collection::vec((0..KEYS.len(), -100..100i64), 0..6),
        edits in prop::collection::vec(arbitrary_edit(), 1..12),
    ) {
        let (mut kernel, outbox) = attached();

        // Acknowledged base state, established by remote writes.
        let mut seq = 0;
        for (k, v) in &base {
            seq += 1;
            let msg = envelope(&as_op(&Edit::Set(*k, *v)), seq);
            kernel.try_process(&msg, false, None).unwrap();
        }
        let before = contents_sorted(&kernel);

        for edit in &edits {
            apply_local(&mut kernel, edit);
        }

        let submitted: Vec<_> = outbox.submitted.borrow_mut().drain(..).collect();
        for (op, metadata) in submitted.into_iter().rev() {
            kernel.rollback(&op, metadata).unwrap();
        }

        prop_assert_eq!(contents_sorted(&kernel), before);

        // Pending state fully drained: a remote clear empties the store
        // outright instead of taking the keep-pending path.
        seq += 1;
        kernel.try_process(&envelope(&MapOp::Clear, seq), false, None).unwrap();
        prop_assert!(kernel.is_empty());
    }
}

// =============================================================================
// Snapshots
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// serialize -> populate reproduces the store exactly, insertion
    /// order included.
    #[test]
    fn snapshot_round_trip_is_exact(
        edits in prop::collection::vec(arbitrary_edit(), 0..20),
    ) {
        let mut original = watcher();
        for edit in &edits {
            apply_local(&mut original, edit);
        }

        let text = original.serialize().unwrap();
        let mut restored = watcher();
        restored.populate(&text).unwrap();

        let original_entries: Vec<_> = original.entries().collect();
        let restored_entries: Vec<_> = restored.entries().collect();
        prop_assert_eq!(original_entries, restored_entries);

        // A second trip is a fixpoint.
        prop_assert_eq!(restored.serialize().unwrap(), text);
    }
}
