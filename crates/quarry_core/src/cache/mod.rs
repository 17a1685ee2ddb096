//! Cache of translated queries keyed by query shape.

pub mod parameters;

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::expr::ExprRef;

/// Cache key wrapping a (parameterized) query tree.
///
/// Equality is structural, with node identity checked first.
#[derive(Debug, Clone)]
pub struct ShapeKey(pub ExprRef);

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ShapeKey {}

impl Hash for ShapeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<ShapeKey, V, ahash::RandomState>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<ShapeKey>,
}

/// Bounded map from query shape to compiled value.
///
/// When full, the oldest inserted entry is evicted. Inserting an existing
/// key replaces its value. Values are cloned out on lookup, so they should
/// be cheap to clone (e.g. an `Arc`).
#[derive(Debug)]
pub struct CompiledQueryCache<V> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> CompiledQueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        CompiledQueryCache {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
                order: VecDeque::with_capacity(capacity),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &ShapeKey) -> Option<V> {
        let found = self.inner.lock().entries.get(key).cloned();
        match found {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("query cache hit");
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!("query cache miss");
                None
            }
        }
    }

    pub fn insert(&self, key: ShapeKey, value: V) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get_mut(&key) {
            *existing = value;
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.capacity, "evicted query from cache");
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
