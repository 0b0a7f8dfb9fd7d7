// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! A replicated key-value map kept consistent through a totally-ordered
//! op stream.
//!
//! Each client holds a full in-memory replica. Edits are applied locally
//! right away, handed to an external sequencer, and reconciled when they
//! come back with a global order. The interesting part is the bookkeeping
//! while our own ops are still in flight:
//!
//! 1. **Optimistic writes**: a local `set`/`delete`/`clear` mutates the
//!    store immediately and records a pending id. Remote ops for a key
//!    with pending local writes are skipped - our writes will sequence
//!    after them and win.
//!
//! 2. **Clear shielding**: while a local `clear` is unacknowledged, every
//!    inbound key op is dropped; the clear will erase it anyway once it
//!    sequences.
//!
//! 3. **Recovery hooks**: the transport can roll back an unsequenced op,
//!    resubmit pending ops after a reconnect (rotating their ids), or
//!    replay an op that was persisted but never sent.
//!
//! The kernel performs no I/O and takes no locks; everything runs on the
//! caller's thread. The sequencer, container lifecycle, and persistence
//! all live behind the [`MapTransport`] and [`HandleResolver`] seams.

pub mod attribution;
pub mod events;
pub mod kernel;
pub mod ops;
pub mod pending;
pub mod snapshot;
pub mod value;

pub use attribution::AttributionKey;
pub use events::ListenerId;
pub use events::ValueChanged;
pub use kernel::MapKernel;
pub use kernel::MapTransport;
pub use ops::LocalOpMetadata;
pub use ops::MapOp;
pub use ops::SequencedMessage;
pub use value::HandleResolver;
pub use value::LocalValue;
pub use value::NoopResolver;
pub use value::SerializedValue;
pub use value::SharedHandle;

use thiserror::Error;

/// Errors surfaced by the map kernel.
///
/// `InvariantViolation` and `RollbackMismatch` are fatal: they mean the
/// pending-op bookkeeping no longer agrees with the op stream, which is a
/// protocol bug. The kernel poisons itself and every later call returns
/// [`MapError::Failed`]; the transport is expected to close the session.
#[derive(Debug, Error)]
pub enum MapError {
    /// Keys must be non-empty strings.
    #[error("map keys may not be empty")]
    InvalidKey,

    /// An inbound value carried a kind this kernel does not recognize.
    #[error("unknown value kind: {0}")]
    UnknownValueKind(String),

    /// A shared-handle value whose payload is not a locator string.
    #[error("malformed shared handle payload")]
    MalformedHandle,

    /// A stashed op of a kind this kernel cannot replay.
    #[error("unknown stashed op kind: {0}")]
    UnknownOp(String),

    /// Pending-op bookkeeping disagreed with the op stream. Fatal.
    #[error("replication invariant violated: {0}")]
    InvariantViolation(&'static str),

    /// Rollback was handed metadata that does not match the op. Fatal.
    #[error("rollback metadata does not match the op")]
    RollbackMismatch,

    /// A previous fatal error left the kernel unusable.
    #[error("map kernel is in a failed state")]
    Failed,

    /// An op or snapshot payload that does not match its schema.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}
