// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-04
// driver = "Isaac Clayton"

//! Unison - a replicated key-value map for collaborating clients.
//!
//! Every client holds a full replica. Edits apply locally at once, travel
//! through a total-order sequencer, and reconcile when they come back -
//! eventual consistency with last-writer-wins by sequence number.
//!
//! # Quick Start
//!
//! ```
//! use unison::map::LocalOpMetadata;
//! use unison::map::LocalValue;
//! use unison::map::MapKernel;
//! use unison::map::MapOp;
//! use unison::map::MapTransport;
//!
//! // A replica with no live session: edits apply locally only.
//! struct Detached;
//!
//! impl MapTransport for Detached {
//!     fn is_attached(&self) -> bool { false }
//!     fn submit(&mut self, _op: MapOp, _metadata: LocalOpMetadata) {}
//! }
//!
//! let mut map = MapKernel::new(Box::new(Detached));
//! map.set("name", LocalValue::plain("ada")).unwrap();
//! assert_eq!(map.get("name"), Some(&LocalValue::plain("ada")));
//! ```

pub mod map;
pub mod range_map;
