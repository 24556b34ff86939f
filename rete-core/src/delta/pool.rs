//! Lifecycle-managed object pools for the hot update path.
//!
//! Every update allocates the same handful of shapes: a [`FactDelta`], a
//! scratch node list, scratch strings and field maps. The pools keep bounded
//! free lists of each so a steady stream of updates settles into zero
//! allocation. Releasing beyond a pool's capacity drops the object instead
//! of growing the free list, and an object whose own backing capacity grew
//! past the retention threshold is dropped rather than pooled.
//!
//! Raw `acquire_*`/`release_*` pairs are used where ownership crosses an
//! await point; the `scoped_*` guards return the object on drop, so scratch
//! space is returned even when the enclosing code panics or early-returns.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::fact::FieldMap;
use crate::rete::node::NodeReference;

use super::types::FactDelta;

/// Default free-list capacity for each pool.
pub const DEFAULT_POOL_CAPACITY: usize = 128;

/// Default largest backing capacity a released object may keep.
pub const DEFAULT_RETAINED_CAPACITY: usize = 4096;

/// Per-pool free-list capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Retained [`FactDelta`] instances
    pub max_fact_deltas: usize,
    /// Retained node-reference scratch vectors
    pub max_node_lists: usize,
    /// Retained scratch strings
    pub max_strings: usize,
    /// Retained scratch field maps
    pub max_field_maps: usize,
    /// Largest backing capacity a released object may keep (entries for
    /// collections, bytes for strings). Objects that grew past this are
    /// dropped instead of pooled, so one oversized update cannot pin its
    /// scratch space for the lifetime of the pool.
    pub max_retained_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_fact_deltas: DEFAULT_POOL_CAPACITY,
            max_node_lists: DEFAULT_POOL_CAPACITY,
            max_strings: DEFAULT_POOL_CAPACITY,
            max_field_maps: DEFAULT_POOL_CAPACITY,
            max_retained_capacity: DEFAULT_RETAINED_CAPACITY,
        }
    }
}

/// Free-list sizes and reuse counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Currently pooled fact deltas
    pub pooled_fact_deltas: usize,
    /// Currently pooled node lists
    pub pooled_node_lists: usize,
    /// Currently pooled strings
    pub pooled_strings: usize,
    /// Currently pooled field maps
    pub pooled_field_maps: usize,
    /// Total acquisitions across all pools
    pub acquisitions: u64,
    /// Acquisitions served from a free list
    pub reuses: u64,
    /// Releases dropped because the free list was full
    pub discards: u64,
}

/// Bounded free lists for the allocation shapes of the update path.
#[derive(Debug, Default)]
pub struct DeltaPools {
    fact_deltas: Mutex<Vec<FactDelta>>,
    node_lists: Mutex<Vec<Vec<NodeReference>>>,
    strings: Mutex<Vec<String>>,
    field_maps: Mutex<Vec<FieldMap>>,
    config: PoolConfig,
    acquisitions: AtomicU64,
    reuses: AtomicU64,
    discards: AtomicU64,
}

impl DeltaPools {
    /// Creates pools with the given capacities.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Acquires a delta, reset for the given fact.
    pub fn acquire_fact_delta(
        &self,
        fact_id: &str,
        fact_type: &str,
        field_count: usize,
    ) -> FactDelta {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if let Some(mut delta) = self.fact_deltas.lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            delta.reset(fact_id, fact_type, field_count);
            delta
        } else {
            FactDelta::new(fact_id, fact_type, field_count)
        }
    }

    /// Returns a delta to the pool, dropping it when the pool is full or the
    /// delta's field table has grown past the retention threshold.
    pub fn release_fact_delta(&self, delta: FactDelta) {
        if delta.fields.capacity() > self.config.max_retained_capacity {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut pool = self.fact_deltas.lock();
        if pool.len() < self.config.max_fact_deltas {
            pool.push(delta);
        } else {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Acquires an empty node-reference scratch vector.
    pub fn acquire_node_list(&self) -> Vec<NodeReference> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if let Some(mut list) = self.node_lists.lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            list.clear();
            list
        } else {
            Vec::new()
        }
    }

    /// Returns a node list to the pool.
    pub fn release_node_list(&self, list: Vec<NodeReference>) {
        if list.capacity() > self.config.max_retained_capacity {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut pool = self.node_lists.lock();
        if pool.len() < self.config.max_node_lists {
            pool.push(list);
        } else {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Acquires an empty scratch string.
    pub fn acquire_string(&self) -> String {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if let Some(mut s) = self.strings.lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            s.clear();
            s
        } else {
            String::new()
        }
    }

    /// Returns a scratch string to the pool.
    pub fn release_string(&self, s: String) {
        if s.capacity() > self.config.max_retained_capacity {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut pool = self.strings.lock();
        if pool.len() < self.config.max_strings {
            pool.push(s);
        } else {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Acquires an empty scratch field map.
    pub fn acquire_field_map(&self) -> FieldMap {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if let Some(mut map) = self.field_maps.lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            map.clear();
            map
        } else {
            HashMap::new()
        }
    }

    /// Returns a scratch field map to the pool.
    pub fn release_field_map(&self, map: FieldMap) {
        if map.capacity() > self.config.max_retained_capacity {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut pool = self.field_maps.lock();
        if pool.len() < self.config.max_field_maps {
            pool.push(map);
        } else {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Node-list guard that returns its vector on drop.
    pub fn scoped_node_list(&self) -> NodeListGuard<'_> {
        NodeListGuard {
            pools: self,
            list: Some(self.acquire_node_list()),
        }
    }

    /// Scratch-string guard that returns its string on drop.
    pub fn scoped_string(&self) -> StringGuard<'_> {
        StringGuard {
            pools: self,
            value: Some(self.acquire_string()),
        }
    }

    /// Field-map guard that returns its map on drop.
    pub fn scoped_field_map(&self) -> FieldMapGuard<'_> {
        FieldMapGuard {
            pools: self,
            value: Some(self.acquire_field_map()),
        }
    }

    /// Runs `f` with a pooled delta; the delta is returned on every exit
    /// path, including panics.
    pub fn with_fact_delta<R>(
        &self,
        fact_id: &str,
        fact_type: &str,
        field_count: usize,
        f: impl FnOnce(&mut FactDelta) -> R,
    ) -> R {
        let mut guard = self.scoped_fact_delta(fact_id, fact_type, field_count);
        f(&mut guard)
    }

    /// Runs `f` with a pooled node list.
    pub fn with_node_refs<R>(&self, f: impl FnOnce(&mut Vec<NodeReference>) -> R) -> R {
        let mut guard = self.scoped_node_list();
        f(&mut guard)
    }

    /// Runs `f` with a pooled scratch string.
    pub fn with_string<R>(&self, f: impl FnOnce(&mut String) -> R) -> R {
        let mut guard = self.scoped_string();
        f(&mut guard)
    }

    /// Runs `f` with a pooled scratch field map.
    pub fn with_field_map<R>(&self, f: impl FnOnce(&mut FieldMap) -> R) -> R {
        let mut guard = self.scoped_field_map();
        f(&mut guard)
    }

    /// Fact-delta guard that returns its delta on drop unless detached.
    pub fn scoped_fact_delta(
        &self,
        fact_id: &str,
        fact_type: &str,
        field_count: usize,
    ) -> FactDeltaGuard<'_> {
        FactDeltaGuard {
            pools: self,
            delta: Some(self.acquire_fact_delta(fact_id, fact_type, field_count)),
        }
    }

    /// Free-list sizes and counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pooled_fact_deltas: self.fact_deltas.lock().len(),
            pooled_node_lists: self.node_lists.lock().len(),
            pooled_strings: self.strings.lock().len(),
            pooled_field_maps: self.field_maps.lock().len(),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
        }
    }
}

/// Scope guard around a pooled node list.
pub struct NodeListGuard<'a> {
    pools: &'a DeltaPools,
    list: Option<Vec<NodeReference>>,
}

impl Deref for NodeListGuard<'_> {
    type Target = Vec<NodeReference>;

    fn deref(&self) -> &Self::Target {
        self.list.as_ref().expect("guard holds list until drop")
    }
}

impl DerefMut for NodeListGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.list.as_mut().expect("guard holds list until drop")
    }
}

impl Drop for NodeListGuard<'_> {
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            self.pools.release_node_list(list);
        }
    }
}

/// Scope guard around a pooled scratch string.
pub struct StringGuard<'a> {
    pools: &'a DeltaPools,
    value: Option<String>,
}

impl Deref for StringGuard<'_> {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("guard holds string until drop")
    }
}

impl DerefMut for StringGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("guard holds string until drop")
    }
}

impl Drop for StringGuard<'_> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pools.release_string(value);
        }
    }
}

/// Scope guard around a pooled scratch field map.
pub struct FieldMapGuard<'a> {
    pools: &'a DeltaPools,
    value: Option<FieldMap>,
}

impl Deref for FieldMapGuard<'_> {
    type Target = FieldMap;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("guard holds map until drop")
    }
}

impl DerefMut for FieldMapGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("guard holds map until drop")
    }
}

impl Drop for FieldMapGuard<'_> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pools.release_field_map(value);
        }
    }
}

/// Scope guard around a pooled fact delta.
pub struct FactDeltaGuard<'a> {
    pools: &'a DeltaPools,
    delta: Option<FactDelta>,
}

impl FactDeltaGuard<'_> {
    /// Takes ownership of the delta; the guard no longer returns it on drop.
    pub fn detach(mut self) -> FactDelta {
        self.delta.take().expect("guard holds delta until detach")
    }
}

impl Deref for FactDeltaGuard<'_> {
    type Target = FactDelta;

    fn deref(&self) -> &Self::Target {
        self.delta.as_ref().expect("guard holds delta until drop")
    }
}

impl DerefMut for FactDeltaGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.delta.as_mut().expect("guard holds delta until drop")
    }
}

impl Drop for FactDeltaGuard<'_> {
    fn drop(&mut self) {
        if let Some(delta) = self.delta.take() {
            self.pools.release_fact_delta(delta);
        }
    }
}
