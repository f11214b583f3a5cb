//! Application-level allocation tracking.
//!
//! Instrumented allocation/free events feed a live-object table that the
//! census can walk, standing in for runtimes without heap introspection.
//! Instrumented code calls [`TrackedHeap::track`] when a value of interest
//! is created and [`TrackedHeap::release`] when it goes away; everything in
//! between is the walkable heap.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Category, HeapObject, HeapWalker, SizeEstimator};

/// Handle to one tracked allocation.
///
/// Pass it back to [`TrackedHeap::release`] when the value is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

/// A live tracked allocation, as seen by the walker.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    category: Category,
    bytes: u64,
    text: Option<String>,
}

impl TrackedObject {
    /// Byte size recorded when the allocation was tracked.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl HeapObject for TrackedObject {
    fn category(&self) -> Category {
        self.category
    }

    fn describe(&self) -> String {
        self.text
            .clone()
            .unwrap_or_else(|| self.category.name().to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of live tracked allocations.
#[derive(Debug, Default)]
pub struct TrackedHeap {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // BTreeMap keeps walk order stable across identical populations.
    live: BTreeMap<u64, TrackedObject>,
    next_id: u64,
}

impl TrackedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a live value of type `T` occupying `bytes` bytes.
    pub fn track<T: 'static>(&self, bytes: u64) -> TrackId {
        self.track_described::<T>(bytes, None)
    }

    /// Records a live value together with a textual representation for the
    /// debug text dump.
    pub fn track_described<T: 'static>(&self, bytes: u64, text: Option<String>) -> TrackId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(
            id,
            TrackedObject {
                category: Category::of::<T>(),
                bytes,
                text,
            },
        );
        TrackId(id)
    }

    /// Removes a tracked value. Unknown ids are ignored (double release is
    /// a caller bug, not a crash).
    pub fn release(&self, id: TrackId) {
        self.inner.lock().unwrap().live.remove(&id.0);
    }

    /// Number of currently tracked allocations.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }
}

impl HeapWalker for TrackedHeap {
    fn walk(&self, visit: &mut dyn FnMut(&dyn HeapObject)) {
        let inner = self.inner.lock().unwrap();
        for obj in inner.live.values() {
            visit(obj);
        }
    }
}

/// Estimator that replays the byte size recorded at `track` time.
///
/// Fails for objects that did not come out of a [`TrackedHeap`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordedSizeEstimator;

impl SizeEstimator for RecordedSizeEstimator {
    fn size_of(&self, obj: &dyn HeapObject) -> Option<u64> {
        obj.as_any()
            .downcast_ref::<TrackedObject>()
            .map(TrackedObject::bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_and_release_drive_walk_population() {
        let heap = TrackedHeap::new();
        let a = heap.track::<String>(16);
        let _b = heap.track::<String>(32);
        let _c = heap.track::<Vec<u8>>(64);
        assert_eq!(heap.live_count(), 3);

        heap.release(a);
        assert_eq!(heap.live_count(), 2);

        let mut seen = Vec::new();
        heap.walk(&mut |obj| seen.push(obj.category()));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&Category::of::<String>()));
        assert!(seen.contains(&Category::of::<Vec<u8>>()));
    }

    #[test]
    fn double_release_is_ignored() {
        let heap = TrackedHeap::new();
        let id = heap.track::<u32>(4);
        heap.release(id);
        heap.release(id);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn recorded_estimator_replays_tracked_size() {
        let heap = TrackedHeap::new();
        heap.track::<String>(123);

        let mut sizes = Vec::new();
        heap.walk(&mut |obj| sizes.push(RecordedSizeEstimator.size_of(obj)));
        assert_eq!(sizes, vec![Some(123)]);
    }

    #[test]
    fn describe_prefers_tracked_text() {
        let heap = TrackedHeap::new();
        heap.track_described::<String>(8, Some("hello".to_string()));
        heap.track::<u32>(4);

        let mut texts = Vec::new();
        heap.walk(&mut |obj| texts.push(obj.describe()));
        assert!(texts.contains(&"hello".to_string()));
        assert!(texts.iter().any(|t| t.ends_with("u32")));
    }
}
