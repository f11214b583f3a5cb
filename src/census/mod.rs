//! Live-object census: heap enumeration, category filters, usage aggregation.
//!
//! The census itself is runtime-agnostic. Hosts with real heap introspection
//! implement [`HeapWalker`] over it; everyone else instruments allocations
//! through [`TrackedHeap`] and walks the resulting live-object table.

mod analyser;
pub mod mock;
mod tracked;
mod walker;

pub use analyser::{Analyser, CensusResult};
pub use tracked::{RecordedSizeEstimator, TrackId, TrackedHeap, TrackedObject};
pub use walker::{Category, GcControl, HeapObject, HeapWalker, NoopGc, SizeEstimator};
