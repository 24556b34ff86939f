//! Thread-safe counters for propagation outcomes.
//!
//! Counters are plain atomics so the hot path never takes a lock for them;
//! only the latency aggregates sit behind a mutex. Fallback counts are keyed
//! by reason in a concurrent map. `snapshot` assembles a serializable view;
//! it reads counters individually and is not an atomic cut across all of
//! them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::types::FallbackReason;

/// Smoothing factor for the moving latency average.
const EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default)]
struct LatencyStats {
    count: u64,
    total_micros: u64,
    min_micros: u64,
    max_micros: u64,
    ema_micros: f64,
}

impl LatencyStats {
    fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.count += 1;
        self.total_micros += micros;
        if self.count == 1 {
            self.min_micros = micros;
            self.max_micros = micros;
            self.ema_micros = micros as f64;
        } else {
            self.min_micros = self.min_micros.min(micros);
            self.max_micros = self.max_micros.max(micros);
            self.ema_micros = EMA_ALPHA * micros as f64 + (1.0 - EMA_ALPHA) * self.ema_micros;
        }
    }

    fn view(&self) -> LatencyView {
        LatencyView {
            count: self.count,
            avg_micros: if self.count == 0 {
                0
            } else {
                self.total_micros / self.count
            },
            min_micros: self.min_micros,
            max_micros: self.max_micros,
            moving_avg_micros: self.ema_micros as u64,
        }
    }
}

#[derive(Debug, Default)]
struct LatencyInner {
    delta: LatencyStats,
    classic: LatencyStats,
    first_update: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
}

/// Serializable latency aggregate for one path.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyView {
    /// Number of recorded updates
    pub count: u64,
    /// Arithmetic mean, microseconds
    pub avg_micros: u64,
    /// Fastest update, microseconds
    pub min_micros: u64,
    /// Slowest update, microseconds
    pub max_micros: u64,
    /// Exponential moving average, microseconds
    pub moving_avg_micros: u64,
}

/// Point-in-time serializable view of all counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Updates that completed on any path (noops excluded)
    pub total_updates: u64,
    /// Updates that ran the delta path
    pub delta_propagations: u64,
    /// Updates that ran the classic path
    pub classic_propagations: u64,
    /// Updates that surfaced an error
    pub failed_propagations: u64,
    /// Updates in which nothing changed
    pub noop_updates: u64,
    /// Nodes actually visited on the delta path
    pub nodes_evaluated: u64,
    /// Nodes the delta path avoided visiting
    pub nodes_skipped: u64,
    /// Field deltas delivered
    pub fields_changed: u64,
    /// Classic fallbacks by reason tag
    pub fallbacks: HashMap<String, u64>,
    /// Delta-path latency aggregate
    pub delta_latency: LatencyView,
    /// Classic-path latency aggregate
    pub classic_latency: LatencyView,
    /// `nodes_skipped / (nodes_evaluated + nodes_skipped)`
    pub efficiency: f64,
    /// `delta_propagations / total_updates`
    pub delta_usage: f64,
    /// First recorded update
    pub first_update: Option<DateTime<Utc>>,
    /// Most recent recorded update
    pub last_update: Option<DateTime<Utc>>,
}

/// Concurrent propagation counters.
#[derive(Debug, Default)]
pub struct PropagationMetrics {
    total: AtomicU64,
    delta: AtomicU64,
    classic: AtomicU64,
    failed: AtomicU64,
    noops: AtomicU64,
    nodes_evaluated: AtomicU64,
    nodes_skipped: AtomicU64,
    fields_changed: AtomicU64,
    fallbacks: DashMap<FallbackReason, u64>,
    latency: Mutex<LatencyInner>,
}

impl PropagationMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed delta-path update.
    pub fn record_delta(&self, duration: Duration, nodes_visited: usize, fields: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.delta.fetch_add(1, Ordering::Relaxed);
        self.nodes_evaluated
            .fetch_add(nodes_visited as u64, Ordering::Relaxed);
        self.fields_changed
            .fetch_add(fields as u64, Ordering::Relaxed);
        let mut latency = self.latency.lock();
        latency.delta.record(duration);
        Self::touch(&mut latency);
    }

    /// Records a completed classic-path update.
    ///
    /// `network_nodes` is the full node population the classic path had to
    /// consider; the delta path's skip counter is measured against it.
    pub fn record_classic(&self, duration: Duration, network_nodes: usize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.classic.fetch_add(1, Ordering::Relaxed);
        self.nodes_evaluated
            .fetch_add(network_nodes as u64, Ordering::Relaxed);
        let mut latency = self.latency.lock();
        latency.classic.record(duration);
        Self::touch(&mut latency);
    }

    /// Records an update that surfaced an error.
    pub fn record_failed(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        Self::touch(&mut self.latency.lock());
    }

    /// Records an update in which no field changed.
    pub fn record_noop(&self) {
        self.noops.fetch_add(1, Ordering::Relaxed);
        Self::touch(&mut self.latency.lock());
    }

    /// Counts one classic fallback under its reason.
    pub fn record_fallback(&self, reason: FallbackReason) {
        *self.fallbacks.entry(reason).or_insert(0) += 1;
    }

    /// Counts node visits the delta path avoided.
    pub fn record_nodes_skipped(&self, skipped: usize) {
        self.nodes_skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);
    }

    /// Fraction of node visits avoided by the delta path.
    pub fn efficiency(&self) -> f64 {
        let evaluated = self.nodes_evaluated.load(Ordering::Relaxed);
        let skipped = self.nodes_skipped.load(Ordering::Relaxed);
        let considered = evaluated + skipped;
        if considered == 0 {
            0.0
        } else {
            skipped as f64 / considered as f64
        }
    }

    /// Fraction of completed updates that took the delta path.
    pub fn delta_usage(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.delta.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.latency.lock();
        MetricsSnapshot {
            total_updates: self.total.load(Ordering::Relaxed),
            delta_propagations: self.delta.load(Ordering::Relaxed),
            classic_propagations: self.classic.load(Ordering::Relaxed),
            failed_propagations: self.failed.load(Ordering::Relaxed),
            noop_updates: self.noops.load(Ordering::Relaxed),
            nodes_evaluated: self.nodes_evaluated.load(Ordering::Relaxed),
            nodes_skipped: self.nodes_skipped.load(Ordering::Relaxed),
            fields_changed: self.fields_changed.load(Ordering::Relaxed),
            fallbacks: self
                .fallbacks
                .iter()
                .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
                .collect(),
            delta_latency: latency.delta.view(),
            classic_latency: latency.classic.view(),
            efficiency: self.efficiency(),
            delta_usage: self.delta_usage(),
            first_update: latency.first_update,
            last_update: latency.last_update,
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.delta.store(0, Ordering::Relaxed);
        self.classic.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.noops.store(0, Ordering::Relaxed);
        self.nodes_evaluated.store(0, Ordering::Relaxed);
        self.nodes_skipped.store(0, Ordering::Relaxed);
        self.fields_changed.store(0, Ordering::Relaxed);
        self.fallbacks.clear();
        *self.latency.lock() = LatencyInner::default();
    }

    fn touch(latency: &mut LatencyInner) {
        let now = Utc::now();
        if latency.first_update.is_none() {
            latency.first_update = Some(now);
        }
        latency.last_update = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = PropagationMetrics::new();
        m.record_delta(Duration::from_micros(120), 3, 2);
        m.record_delta(Duration::from_micros(80), 2, 1);
        m.record_classic(Duration::from_micros(500), 10);
        m.record_noop();
        m.record_failed();

        let snap = m.snapshot();
        assert_eq!(snap.total_updates, 4);
        assert_eq!(snap.delta_propagations, 2);
        assert_eq!(snap.classic_propagations, 1);
        assert_eq!(snap.failed_propagations, 1);
        assert_eq!(snap.noop_updates, 1);
        assert_eq!(snap.nodes_evaluated, 15);
        assert_eq!(snap.fields_changed, 3);
    }

    #[test]
    fn test_noop_excluded_from_total() {
        let m = PropagationMetrics::new();
        m.record_noop();
        m.record_noop();
        m.record_delta(Duration::from_micros(10), 1, 1);
        let snap = m.snapshot();
        assert_eq!(snap.total_updates, 1);
        assert_eq!(snap.noop_updates, 2);
    }

    #[test]
    fn test_latency_aggregates() {
        let m = PropagationMetrics::new();
        m.record_delta(Duration::from_micros(100), 1, 1);
        m.record_delta(Duration::from_micros(300), 1, 1);

        let view = m.snapshot().delta_latency;
        assert_eq!(view.count, 2);
        assert_eq!(view.min_micros, 100);
        assert_eq!(view.max_micros, 300);
        assert_eq!(view.avg_micros, 200);
        assert!(view.moving_avg_micros >= 100 && view.moving_avg_micros <= 300);
    }

    #[test]
    fn test_fallback_reasons_keyed_by_tag() {
        let m = PropagationMetrics::new();
        m.record_fallback(FallbackReason::Ratio);
        m.record_fallback(FallbackReason::Ratio);
        m.record_fallback(FallbackReason::PrimaryKey);

        let snap = m.snapshot();
        assert_eq!(snap.fallbacks.get("ratio"), Some(&2));
        assert_eq!(snap.fallbacks.get("pk"), Some(&1));
        assert_eq!(snap.fallbacks.get("fields"), None);
    }

    #[test]
    fn test_efficiency_and_usage() {
        let m = PropagationMetrics::new();
        assert_eq!(m.efficiency(), 0.0);
        assert_eq!(m.delta_usage(), 0.0);

        m.record_delta(Duration::from_micros(10), 2, 1);
        m.record_nodes_skipped(8);
        m.record_classic(Duration::from_micros(10), 10);

        assert!((m.efficiency() - 8.0 / 20.0).abs() < f64::EPSILON);
        assert!((m.delta_usage() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let m = PropagationMetrics::new();
        m.record_delta(Duration::from_micros(10), 1, 1);
        m.record_fallback(FallbackReason::Forced);
        m.reset();

        let snap = m.snapshot();
        assert_eq!(snap.total_updates, 0);
        assert!(snap.fallbacks.is_empty());
        assert_eq!(snap.delta_latency.count, 0);
        assert!(snap.first_update.is_none());
    }

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;

        let m = Arc::new(PropagationMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    m.record_delta(Duration::from_micros(50), 1, 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(m.snapshot().delta_propagations, 2000);
    }
}
