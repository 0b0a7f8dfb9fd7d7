//! AFL fuzz harness for the replicated map kernel.
//!
//! This harness tests the replication-critical properties:
//! 1. Convergence: once every local op is acknowledged, the optimistic
//!    replica matches a replica that only watched the sequenced stream.
//! 2. Rollback: unwinding in-flight ops newest-first never corrupts the
//!    pending bookkeeping.
//! 3. No fatal states: a well-behaved sequencer schedule never poisons
//!    the kernel.
//!
//! Model: one optimistic replica edits locally while remote traffic
//! interleaves; a reference replica sees only the sequenced stream. The
//! fuzzer drives the schedule, including reconnect-style flushes.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use afl::fuzz;

use unison::map::LocalOpMetadata;
use unison::map::LocalValue;
use unison::map::MapKernel;
use unison::map::MapOp;
use unison::map::MapTransport;
use unison::map::NoopResolver;
use unison::map::SequencedMessage;

const KEYS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

/// Operation types the fuzzer can generate.
#[derive(Debug, Clone, Copy)]
enum FuzzOp {
    /// Optimistic local edit on the replica under test.
    LocalSet { key: u8, value: u8 },
    LocalDelete { key: u8 },
    LocalClear,
    /// Remote client traffic, sequenced immediately.
    RemoteSet { key: u8, value: u8 },
    RemoteDelete { key: u8 },
    RemoteClear,
    /// Sequencer echoes every in-flight local op, in order.
    Flush,
    /// Runtime unwinds the newest in-flight local op.
    Rollback,
}

impl FuzzOp {
    fn from_bytes(bytes: &[u8]) -> Option<(FuzzOp, &[u8])> {
        if bytes.is_empty() {
            return None;
        }

        let op_type = bytes[0] % 8;
        let rest = &bytes[1..];

        match op_type {
            0 if rest.len() >= 2 => {
                let op = FuzzOp::LocalSet {
                    key: rest[0] % KEYS.len() as u8,
                    value: rest[1],
                };
                Some((op, &rest[2..]))
            }
            1 if !rest.is_empty() => {
                let op = FuzzOp::LocalDelete {
                    key: rest[0] % KEYS.len() as u8,
                };
                Some((op, &rest[1..]))
            }
            2 => Some((FuzzOp::LocalClear, rest)),
            3 if rest.len() >= 2 => {
                let op = FuzzOp::RemoteSet {
                    key: rest[0] % KEYS.len() as u8,
                    value: rest[1],
                };
                Some((op, &rest[2..]))
            }
            4 if !rest.is_empty() => {
                let op = FuzzOp::RemoteDelete {
                    key: rest[0] % KEYS.len() as u8,
                };
                Some((op, &rest[1..]))
            }
            5 => Some((FuzzOp::RemoteClear, rest)),
            6 => Some((FuzzOp::Flush, rest)),
            7 => Some((FuzzOp::Rollback, rest)),
            _ => None,
        }
    }
}

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

fn envelope(op: &MapOp, seq: u64) -> SequencedMessage {
    return SequencedMessage {
        contents: serde_json::to_value(op).expect("map ops serialize"),
        sequence_number: seq,
        client_id: "fuzz".to_string(),
        client_sequence_number: seq,
    };
}

fn sorted_contents(kernel: &MapKernel) -> Vec<(String, LocalValue)> {
    let mut entries: Vec<(String, LocalValue)> = kernel
        .entries()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    return entries;
}

/// Acknowledge every in-flight op and deliver it to the reference.
fn flush(
    optimist: &mut MapKernel,
    reference: &mut MapKernel,
    outbox: &Outbox,
    seq: &mut u64,
) {
    let submitted: Vec<_> = outbox.submitted.borrow_mut().drain(..).collect();
    for (op, metadata) in submitted {
        *seq += 1;
        let msg = envelope(&op, *seq);
        optimist
            .try_process(&msg, true, Some(metadata))
            .expect("ack must process");
        reference
            .try_process(&msg, false, None)
            .expect("reference must process");
    }

    // CRITICAL INVARIANT: the optimistic replica converges!
    assert_eq!(
        sorted_contents(optimist),
        sorted_contents(reference),
        "convergence failure after flush"
    );
}

fn main() {
    fuzz!(|data: &[u8]| {
        let outbox = Outbox::default();
        outbox.attached.set(true);
        let mut optimist = MapKernel::new(Box::new(Wire(outbox.clone())));

        let reference_outbox = Outbox::default();
        let mut reference = MapKernel::new(Box::new(Wire(reference_outbox)));

        let mut seq = 0u64;
        let mut remaining = data;
        // The runtime only rolls back ops still in its outbox, before any
        // further inbound processing. Track whether that window is open.
        let mut rollback_window_open = false;

        while let Some((op, rest)) = FuzzOp::from_bytes(remaining) {
            remaining = rest;

            match op {
                FuzzOp::LocalSet { key, value } => {
                    optimist
                        .set(KEYS[key as usize], LocalValue::plain(value))
                        .expect("local set");
                    rollback_window_open = true;
                }

                FuzzOp::LocalDelete { key } => {
                    optimist.delete(KEYS[key as usize]).expect("local delete");
                    rollback_window_open = true;
                }

                FuzzOp::LocalClear => {
                    optimist.clear().expect("local clear");
                    rollback_window_open = true;
                }

                FuzzOp::RemoteSet { key, value } => {
                    seq += 1;
                    rollback_window_open = false;
                    let op = MapOp::Set {
                        key: KEYS[key as usize].to_string(),
                        value: LocalValue::plain(value).to_wire(&NoopResolver),
                    };
                    let msg = envelope(&op, seq);
                    optimist.try_process(&msg, false, None).expect("remote set");
                    reference.try_process(&msg, false, None).expect("remote set");
                }

                FuzzOp::RemoteDelete { key } => {
                    seq += 1;
                    rollback_window_open = false;
                    let op = MapOp::Delete {
                        key: KEYS[key as usize].to_string(),
                    };
                    let msg = envelope(&op, seq);
                    optimist.try_process(&msg, false, None).expect("remote delete");
                    reference.try_process(&msg, false, None).expect("remote delete");
                }

                FuzzOp::RemoteClear => {
                    seq += 1;
                    rollback_window_open = false;
                    let msg = envelope(&MapOp::Clear, seq);
                    optimist.try_process(&msg, false, None).expect("remote clear");
                    reference.try_process(&msg, false, None).expect("remote clear");
                }

                FuzzOp::Flush => {
                    flush(&mut optimist, &mut reference, &outbox, &mut seq);
                }

                FuzzOp::Rollback => {
                    if !rollback_window_open {
                        continue;
                    }
                    // The newest in-flight op never reached the wire.
                    let newest = outbox.submitted.borrow_mut().pop();
                    if let Some((op, metadata)) = newest {
                        optimist.rollback(&op, metadata).expect("rollback");
                    }
                }
            }
        }

        // Final flush and convergence check.
        flush(&mut optimist, &mut reference, &outbox, &mut seq);
        assert!(!optimist.is_failed(), "well-behaved schedule poisoned the kernel");
    });
}
