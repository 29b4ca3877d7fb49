//! Single-flight memo cache with LRU eviction under a weight budget.
//!
//! Callers asking for the same key while it is being computed block on the
//! same cell and observe the one result. Entries never go stale; they only
//! leave the cache through eviction, [`MemoCache::clear`], or when their
//! computation declines to keep them.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

struct Slot<V> {
    cell: OnceCell<V>,
    last_used: AtomicU64,
    weight: AtomicUsize,
}

struct Inner<K, V> {
    slots: FxHashMap<K, Arc<Slot<V>>>,
    tick: u64,
    used: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoStats {
    pub entries: usize,
    pub used: usize,
    pub computations: u64,
    pub hits: u64,
    pub evictions: u64,
}

pub struct MemoCache<K, V> {
    name: &'static str,
    inner: Mutex<Inner<K, V>>,
    budget: usize,
    weigher: fn(&V) -> usize,
    computations: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, budget: usize, weigher: fn(&V) -> usize) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner { slots: FxHashMap::default(), tick: 0, used: 0 }),
            budget,
            weigher,
            computations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, computing it at most once across
    /// concurrent callers.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.get_or_compute_if(key, || (compute(), true))
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but `compute` also says
    /// whether its value may be kept. A value that may not is still handed to
    /// callers already waiting on the key; the next caller computes afresh.
    pub fn get_or_compute_if<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> (V, bool),
    {
        let slot = {
            let mut inner = self.inner.lock();
            inner.tick += 1;
            let tick = inner.tick;
            let slot = inner
                .slots
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        cell: OnceCell::new(),
                        last_used: AtomicU64::new(tick),
                        weight: AtomicUsize::new(0),
                    })
                })
                .clone();
            slot.last_used.store(tick, Ordering::Relaxed);
            slot
        };

        let mut kept = None;
        let value = slot
            .cell
            .get_or_init(|| {
                self.computations.fetch_add(1, Ordering::Relaxed);
                let (value, keep) = compute();
                kept = Some(keep);
                value
            })
            .clone();

        match kept {
            Some(true) => self.account(&key, &slot, (self.weigher)(&value)),
            Some(false) => self.forget(&key, &slot),
            None => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
        }
        value
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        slot.last_used.store(inner.tick, Ordering::Relaxed);
        slot.cell.get().cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().slots.get(key).is_some_and(|s| s.cell.get().is_some())
    }

    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MemoStats {
        let inner = self.inner.lock();
        MemoStats {
            entries: inner.slots.len(),
            used: inner.used,
            computations: self.computations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop every finished entry. Keys still being computed stay, so their
    /// waiters and later callers share the one result.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.retain(|_, slot| slot.cell.get().is_none());
        inner.used = 0;
    }

    fn forget(&self, key: &K, slot: &Arc<Slot<V>>) {
        let mut inner = self.inner.lock();
        if inner.slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            inner.slots.remove(key);
        }
    }

    fn account(&self, key: &K, slot: &Arc<Slot<V>>, weight: usize) {
        let mut inner = self.inner.lock();
        // Evicted while computing: nothing to charge.
        let still_resident = inner.slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
        if !still_resident {
            return;
        }
        slot.weight.store(weight, Ordering::Relaxed);
        inner.used += weight;

        while inner.used > self.budget {
            let victim = inner
                .slots
                .iter()
                .filter(|(k, s)| *k != key && s.cell.get().is_some())
                .min_by_key(|(_, s)| s.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else { break };
            if let Some(removed) = inner.slots.remove(&victim) {
                inner.used = inner.used.saturating_sub(removed.weight.load(Ordering::Relaxed));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        if inner.used > self.budget {
            debug!(cache = self.name, used = inner.used, budget = self.budget, "single entry exceeds budget");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_computes_once_then_hits() {
        let cache: MemoCache<u32, u64> = MemoCache::new("test", 100, |_| 1);
        assert_eq!(cache.get_or_compute(1, || 10), 10);
        assert_eq!(cache.get_or_compute(1, || 99), 10);
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_concurrent_identical_keys_collapse() {
        let cache: Arc<MemoCache<&'static str, u64>> = Arc::new(MemoCache::new("test", 100, |_| 1));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compute("speed", || {
                        thread::sleep(Duration::from_millis(20));
                        42
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn test_lru_eviction_under_budget() {
        let cache: MemoCache<u32, Vec<u8>> = MemoCache::new("test", 10, |v| v.len());
        cache.get_or_compute(1, || vec![0; 4]);
        cache.get_or_compute(2, || vec![0; 4]);
        // Touch 1 so that 2 becomes the oldest.
        cache.get_or_compute(1, || vec![0; 4]);
        cache.get_or_compute(3, || vec![0; 4]);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.used, 8);
    }

    #[test]
    fn test_declined_value_is_not_kept() {
        let cache: MemoCache<u32, u64> = MemoCache::new("test", 100, |_| 1);
        assert_eq!(cache.get_or_compute_if(1, || (5, false)), 5);
        assert!(!cache.contains(&1));
        assert_eq!(cache.get_or_compute_if(1, || (6, true)), 6);
        assert!(cache.contains(&1));
        assert_eq!(cache.get_or_compute(1, || 7), 6);
        assert_eq!(cache.computations(), 2);
        assert_eq!(cache.stats().used, 1);
    }

    #[test]
    fn test_clear_keeps_in_flight_computation() {
        let cache: Arc<MemoCache<u32, u64>> = Arc::new(MemoCache::new("test", 100, |_| 1));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let worker = {
            let cache = cache.clone();
            let started = started.clone();
            let release = release.clone();
            thread::spawn(move || {
                cache.get_or_compute(1, || {
                    started.wait();
                    release.wait();
                    7
                })
            })
        };
        started.wait();
        cache.clear();
        release.wait();
        assert_eq!(worker.join().unwrap(), 7);

        assert_eq!(cache.get_or_compute(1, || 99), 7);
        assert_eq!(cache.computations(), 1);
        assert_eq!(cache.stats().used, 1);
    }

    #[test]
    fn test_oversized_entry_is_kept() {
        let cache: MemoCache<u32, Vec<u8>> = MemoCache::new("test", 2, |v| v.len());
        cache.get_or_compute(1, || vec![0; 1]);
        cache.get_or_compute(2, || vec![0; 5]);
        assert!(cache.contains(&2));
        assert!(!cache.contains(&1));
    }
}
