//! Scriptable in-memory heap for tests.
//!
//! `MockHeap` plays the role of the host runtime: tests push a population,
//! run censuses, mutate the population, and run more censuses.

use std::any::Any;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Category, GcControl, HeapObject, HeapWalker, SizeEstimator};

/// One scripted live object.
#[derive(Debug, Clone)]
pub struct MockObject {
    category: Category,
    text: String,
    bytes: Option<u64>,
}

impl MockObject {
    /// An object of category `T` with the given textual representation.
    pub fn new<T: 'static>(text: impl Into<String>) -> Self {
        Self {
            category: Category::of::<T>(),
            text: text.into(),
            bytes: None,
        }
    }

    /// Same, with a scripted byte size for [`ScriptedEstimator`].
    pub fn sized<T: 'static>(text: impl Into<String>, bytes: u64) -> Self {
        Self {
            bytes: Some(bytes),
            ..Self::new::<T>(text)
        }
    }

    pub fn bytes(&self) -> Option<u64> {
        self.bytes
    }
}

impl HeapObject for MockObject {
    fn category(&self) -> Category {
        self.category
    }

    fn describe(&self) -> String {
        self.text.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Heap whose live population is set by the test.
#[derive(Debug, Default)]
pub struct MockHeap {
    objects: Mutex<Vec<MockObject>>,
}

impl MockHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, obj: MockObject) {
        self.objects.lock().unwrap().push(obj);
    }

    /// Pushes `count` objects of category `T`.
    pub fn push_many<T: 'static>(&self, count: usize) {
        let mut objects = self.objects.lock().unwrap();
        for i in 0..count {
            objects.push(MockObject::new::<T>(format!("obj-{i}")));
        }
    }

    pub fn clear(&self) {
        self.objects.lock().unwrap().clear();
    }
}

impl HeapWalker for MockHeap {
    fn walk(&self, visit: &mut dyn FnMut(&dyn HeapObject)) {
        for obj in self.objects.lock().unwrap().iter() {
            visit(obj);
        }
    }
}

/// Estimator reading the scripted byte size; fails when none was scripted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedEstimator;

impl SizeEstimator for ScriptedEstimator {
    fn size_of(&self, obj: &dyn HeapObject) -> Option<u64> {
        obj.as_any()
            .downcast_ref::<MockObject>()
            .and_then(MockObject::bytes)
    }
}

/// Estimator that fails for every object.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingEstimator;

impl SizeEstimator for FailingEstimator {
    fn size_of(&self, _obj: &dyn HeapObject) -> Option<u64> {
        None
    }
}

/// GC hook that counts collection requests.
#[derive(Debug, Default)]
pub struct CountingGc {
    collections: AtomicUsize,
}

impl CountingGc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collections(&self) -> usize {
        self.collections.load(Ordering::SeqCst)
    }
}

impl GcControl for CountingGc {
    fn collect(&self) {
        self.collections.fetch_add(1, Ordering::SeqCst);
    }
}
