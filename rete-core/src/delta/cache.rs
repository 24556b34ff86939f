//! Bounded, TTL-aware LRU cache for detected deltas.
//!
//! A slab-backed doubly-linked list plus a hash map index give amortized
//! O(1) `get` and `put`. Hit/miss/eviction counters are atomics; the list
//! itself sits behind a shared/exclusive lock with exclusive access only on
//! modifying paths.
//!
//! TTL-expired entries return a miss on read and are queued for deferred
//! removal so the reader path never blocks on cleanup; the pending queue is
//! drained on the next write-path operation (or explicitly through
//! [`DeltaCache::purge_expired`]), with a second expiry check under the
//! exclusive lock to guard against races with a concurrent `put`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::types::FactDelta;

/// Default maximum number of cached deltas.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default time-to-live for a cached delta.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

const NIL: usize = usize::MAX;

struct Entry {
    key: String,
    delta: Arc<FactDelta>,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    prev: usize,
    next: usize,
}

/// Slab-backed LRU list: `head` is most recently used, `tail` least.
struct CacheInner {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    map: HashMap<String, usize>,
    head: usize,
    tail: usize,
}

impl CacheInner {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            map: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.slots[idx].as_ref().expect("linked slot must be live");
            (entry.prev, entry.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().expect("live slot").next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().expect("live slot").prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        {
            let entry = self.slots[idx].as_mut().expect("live slot");
            entry.prev = NIL;
            entry.next = self.head;
        }
        if self.head != NIL {
            self.slots[self.head].as_mut().expect("live slot").prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn remove(&mut self, idx: usize) -> Entry {
        self.unlink(idx);
        let entry = self.slots[idx].take().expect("live slot");
        self.map.remove(&entry.key);
        self.free.push(idx);
        entry
    }

    fn insert(&mut self, entry: Entry) -> usize {
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(entry);
            idx
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        };
        let key = self.slots[idx].as_ref().expect("live slot").key.clone();
        self.map.insert(key, idx);
        self.push_front(idx);
        idx
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Counters and derived figures reported by [`DeltaCache::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses (including TTL-expired reads)
    pub misses: u64,
    /// Entries evicted by the LRU policy
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0 when no lookups happened
    pub hit_rate: f64,
}

/// Concurrency-safe LRU + TTL cache mapping fact ids to their last-observed
/// delta.
pub struct DeltaCache {
    inner: RwLock<CacheInner>,
    pending_removal: Mutex<Vec<String>>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DeltaCache {
    /// Creates a cache with the given capacity and TTL.
    ///
    /// Zero values fall back to [`DEFAULT_MAX_SIZE`] and [`DEFAULT_TTL`].
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let max_size = if max_size == 0 {
            DEFAULT_MAX_SIZE
        } else {
            max_size
        };
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            inner: RwLock::new(CacheInner::new(max_size.min(4096))),
            pending_removal: Mutex::new(Vec::new()),
            max_size,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up the delta cached for `key`.
    ///
    /// A TTL-expired entry counts as a miss and is queued for deferred
    /// removal; the reader path never waits for the removal itself.
    pub fn get(&self, key: &str) -> Option<Arc<FactDelta>> {
        let expired = {
            let inner = self.inner.read();
            match inner.map.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(&idx) => {
                    let entry = inner.slots[idx].as_ref().expect("live slot");
                    entry.created_at.elapsed() > self.ttl
                }
            }
        };

        if expired {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.pending_removal.lock().push(key.to_string());
            return None;
        }

        // Hit: refresh the LRU position under the exclusive lock. The entry
        // may have been removed or replaced since the shared-lock check.
        let mut inner = self.inner.write();
        match inner.map.get(key).copied() {
            Some(idx) => {
                if inner.slots[idx]
                    .as_ref()
                    .expect("live slot")
                    .created_at
                    .elapsed()
                    > self.ttl
                {
                    // Second check: expired between the two locks.
                    inner.remove(idx);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                inner.move_to_front(idx);
                let entry = inner.slots[idx].as_mut().expect("live slot");
                entry.last_accessed_at = Instant::now();
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.delta))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces the delta cached for `key`, evicting the
    /// least-recently-used entry when at capacity.
    pub fn put(&self, key: impl Into<String>, delta: Arc<FactDelta>) {
        let key = key.into();
        let mut inner = self.inner.write();

        self.drain_pending(&mut inner);

        if let Some(&idx) = inner.map.get(&key) {
            inner.move_to_front(idx);
            let entry = inner.slots[idx].as_mut().expect("live slot");
            entry.delta = delta;
            entry.created_at = Instant::now();
            entry.last_accessed_at = entry.created_at;
            return;
        }

        if inner.len() >= self.max_size {
            let tail = inner.tail;
            if tail != NIL {
                inner.remove(tail);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let now = Instant::now();
        inner.insert(Entry {
            key,
            delta,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            prev: NIL,
            next: NIL,
        });
    }

    /// Removes every entry whose TTL elapsed, plus entries queued by expired
    /// reads.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.write();
        self.drain_pending(&mut inner);

        let expired: Vec<usize> = inner
            .map
            .values()
            .copied()
            .filter(|&idx| {
                inner.slots[idx]
                    .as_ref()
                    .expect("live slot")
                    .created_at
                    .elapsed()
                    > self.ttl
            })
            .collect();
        for idx in expired {
            inner.remove(idx);
        }
    }

    fn drain_pending(&self, inner: &mut CacheInner) {
        let pending: Vec<String> = std::mem::take(&mut *self.pending_removal.lock());
        for key in pending {
            if let Some(&idx) = inner.map.get(&key) {
                // Re-check under the exclusive lock: a concurrent put may
                // have refreshed the entry since it was queued.
                let still_expired = inner.slots[idx]
                    .as_ref()
                    .expect("live slot")
                    .created_at
                    .elapsed()
                    > self.ttl;
                if still_expired {
                    inner.remove(idx);
                }
            }
        }
    }

    /// Drops every entry. Counters are preserved.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.slots.clear();
        inner.free.clear();
        inner.map.clear();
        inner.head = NIL;
        inner.tail = NIL;
        self.pending_removal.lock().clear();
    }

    /// Current entry count (size-only shared read).
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot with the derived hit rate.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(fact_id: &str) -> Arc<FactDelta> {
        Arc::new(FactDelta::new(fact_id, "Product", 4))
    }

    fn cache(max: usize) -> DeltaCache {
        DeltaCache::new(max, Duration::from_secs(300))
    }

    #[test]
    fn test_get_miss_then_hit() {
        let c = cache(10);
        assert!(c.get("Product~p1").is_none());
        c.put("Product~p1", delta("Product~p1"));
        let hit = c.get("Product~p1").expect("cached entry");
        assert_eq!(hit.fact_id, "Product~p1");

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction_order() {
        // S5: put k1, k2, k3; get k1; put k4 => k2 evicted.
        let c = cache(3);
        c.put("k1", delta("k1"));
        c.put("k2", delta("k2"));
        c.put("k3", delta("k3"));
        assert!(c.get("k1").is_some());
        c.put("k4", delta("k4"));

        assert!(c.get("k2").is_none());
        assert!(c.get("k1").is_some());
        assert!(c.get("k3").is_some());
        assert!(c.get("k4").is_some());
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_overflow_evicts_least_recently_inserted() {
        // Property 9: max_size + k puts with no gets evict exactly the k
        // oldest entries.
        let c = cache(5);
        for i in 0..8 {
            c.put(format!("k{i}"), delta(&format!("k{i}")));
        }
        assert_eq!(c.len(), 5);
        assert_eq!(c.stats().evictions, 3);
        for evicted in ["k0", "k1", "k2"] {
            assert!(c.get(evicted).is_none());
        }
        for kept in ["k3", "k4", "k5", "k6", "k7"] {
            assert!(c.get(kept).is_some(), "{kept} should survive");
        }
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let c = DeltaCache::new(10, Duration::from_millis(10));
        c.put("k1", delta("k1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.get("k1").is_none());
        // Deferred removal happens on the next write-path operation.
        c.purge_expired();
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_put_refreshes_existing_key() {
        let c = cache(2);
        c.put("k1", delta("old"));
        c.put("k1", delta("new"));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("k1").expect("entry").fact_id, "new");
    }

    #[test]
    fn test_clear() {
        let c = cache(10);
        c.put("k1", delta("k1"));
        c.put("k2", delta("k2"));
        c.clear();
        assert!(c.is_empty());
        assert!(c.get("k1").is_none());
    }

    #[test]
    fn test_zero_parameters_fall_back_to_defaults() {
        let c = DeltaCache::new(0, Duration::ZERO);
        assert_eq!(c.stats().max_size, DEFAULT_MAX_SIZE);
        c.put("k1", delta("k1"));
        assert!(c.get("k1").is_some());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc as StdArc;

        let c = StdArc::new(cache(64));
        let mut handles = Vec::new();
        for t in 0..8 {
            let c = StdArc::clone(&c);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("k{}", (t * 31 + i) % 100);
                    c.put(key.clone(), delta(&key));
                    let _ = c.get(&key);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(c.len() <= 64);
    }
}
