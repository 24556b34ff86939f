//! Integration façade over the delta subsystem.
//!
//! A [`DeltaEngine`] wires the detector, dependency index, propagator,
//! metrics, and event channel together behind a small surface: install the
//! callbacks, hand it a network, call
//! [`process_update`](DeltaEngine::process_update) per fact mutation.
//! Interested observers subscribe to a broadcast channel instead of polling
//! metrics; events are dropped when nobody listens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::error::{EngineError, Result};
use crate::core::fact::FieldMap;
use crate::rete::network::ReteNetwork;

use super::builder::{BuildDiagnostics, IndexBuilder};
use super::cache::CacheStats;
use super::detector::DetectorConfig;
use super::index::IndexStats;
use super::metrics::{MetricsSnapshot, PropagationMetrics};
use super::pool::PoolStats;
use super::propagator::{
    ClassicPropagateFn, DeltaPropagator, GetNodeFn, NodeDeliveryFn, PropagationConfig,
    StorageUpdateFn,
};
use super::strategy::PropagationStrategy;
use super::types::{OutcomeMode, PropagationOutcome};

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Combined configuration for the whole subsystem.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Change-detection knobs
    pub detector: DetectorConfig,
    /// Decision thresholds and dispatch limits
    pub propagation: PropagationConfig,
}

impl EngineConfig {
    /// Rejects configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.propagation.validate()
    }
}

/// What an emitted event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationEventKind {
    /// An update completed on the delta path
    DeltaApplied,
    /// An update completed on the classic path
    ClassicApplied,
    /// An update changed nothing
    Noop,
    /// An update surfaced an error
    UpdateFailed,
    /// The dependency index was rebuilt
    IndexRebuilt,
}

/// One observable engine occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationEvent {
    /// What happened
    pub kind: PropagationEventKind,
    /// Fact involved, when the event concerns one update
    pub fact_id: Option<String>,
    /// Nodes visited by the update (0 for non-update events)
    pub nodes_visited: usize,
    /// Changed fields in the update (0 for non-update events)
    pub fields_changed: usize,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

impl PropagationEvent {
    fn new(kind: PropagationEventKind) -> Self {
        Self {
            kind,
            fact_id: None,
            nodes_visited: 0,
            fields_changed: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregated view over every component's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Propagation counters and latencies
    pub metrics: MetricsSnapshot,
    /// Comparison-cache counters, when the cache is enabled
    pub cache: Option<CacheStats>,
    /// Dependency-index shape
    pub index: IndexStats,
    /// Object-pool reuse counters
    pub pools: PoolStats,
}

/// Façade assembling detector, index, propagator, metrics, and events.
pub struct DeltaEngine {
    propagator: DeltaPropagator,
    network: RwLock<Option<Arc<dyn ReteNetwork>>>,
    diagnostics_enabled: AtomicBool,
    events: broadcast::Sender<PropagationEvent>,
}

impl DeltaEngine {
    /// Creates an engine with an empty index and no callbacks installed.
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            propagator: DeltaPropagator::new(config.detector, config.propagation),
            network: RwLock::new(None),
            diagnostics_enabled: AtomicBool::new(false),
            events,
        }
    }

    /// Attaches a network and builds the dependency index from it.
    pub fn with_network(self, network: Arc<dyn ReteNetwork>) -> Self {
        *self.network.write() = Some(Arc::clone(&network));
        let (index, _) = IndexBuilder::new().build_from_network(network.as_ref());
        self.propagator.set_index(Arc::new(index));
        self
    }

    /// Installs the per-node delta delivery callback.
    pub fn with_node_delivery(self, delivery: NodeDeliveryFn) -> Self {
        self.propagator
            .update_callbacks(|cb| cb.node_delivery = Some(delivery));
        self
    }

    /// Installs the classic retract+insert callback.
    pub fn with_classic_propagate(self, classic: ClassicPropagateFn) -> Self {
        self.propagator
            .update_callbacks(|cb| cb.classic_propagate = Some(classic));
        self
    }

    /// Installs the storage-update callback.
    pub fn with_storage_update(self, storage: StorageUpdateFn) -> Self {
        self.propagator
            .update_callbacks(|cb| cb.storage_update = Some(storage));
        self
    }

    /// Installs the node-resolution override.
    pub fn with_get_node(self, get_node: GetNodeFn) -> Self {
        self.propagator
            .update_callbacks(|cb| cb.get_node = Some(get_node));
        self
    }

    /// Replaces the node-ordering strategy.
    pub fn with_strategy(self, strategy: Box<dyn PropagationStrategy>) -> Self {
        self.propagator.set_strategy(strategy);
        self
    }

    /// Processes one fact update end to end.
    pub async fn process_update(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
    ) -> Result<PropagationOutcome> {
        self.process_update_with_cancel(old, new, fact_id, fact_type, CancellationToken::new())
            .await
    }

    /// Like [`process_update`](Self::process_update) with a cancellation
    /// token checked between node deliveries.
    pub async fn process_update_with_cancel(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
        cancel: CancellationToken,
    ) -> Result<PropagationOutcome> {
        let result = self
            .propagator
            .propagate_update_with_cancel(old, new, fact_id, fact_type, cancel)
            .await;

        let event = match &result {
            Ok(outcome) => {
                let kind = match outcome.mode {
                    OutcomeMode::Delta => PropagationEventKind::DeltaApplied,
                    OutcomeMode::Classic => PropagationEventKind::ClassicApplied,
                    OutcomeMode::Noop => PropagationEventKind::Noop,
                };
                PropagationEvent {
                    kind,
                    fact_id: Some(fact_id.to_string()),
                    nodes_visited: outcome.nodes_visited,
                    fields_changed: outcome.fields_changed,
                    timestamp: Utc::now(),
                }
            }
            Err(_) => PropagationEvent {
                fact_id: Some(fact_id.to_string()),
                ..PropagationEvent::new(PropagationEventKind::UpdateFailed)
            },
        };
        // No subscribers means the event is simply dropped.
        let _ = self.events.send(event);

        result
    }

    /// Rebuilds the dependency index from the attached network and swaps it
    /// in atomically; in-flight updates keep the index they started with.
    pub fn rebuild_index(&self) -> Result<BuildDiagnostics> {
        let network = self.network.read().clone().ok_or_else(|| {
            EngineError::ComponentNotInitialized {
                component: "network".to_string(),
                function: "rebuild_index".to_string(),
                message: "attach a network with with_network first".to_string(),
            }
        })?;

        let builder =
            IndexBuilder::new().with_diagnostics(self.diagnostics_enabled.load(Ordering::Relaxed));
        let (index, diagnostics) = builder.build_from_network(network.as_ref());
        info!(
            nodes = diagnostics.nodes_processed,
            warnings = diagnostics.warnings.len(),
            "dependency index rebuilt"
        );
        self.propagator.set_index(Arc::new(index));
        let _ = self
            .events
            .send(PropagationEvent::new(PropagationEventKind::IndexRebuilt));
        Ok(diagnostics)
    }

    /// Enables or disables diagnostics accumulation during index rebuilds.
    pub fn enable_diagnostics(&self, enabled: bool) {
        self.diagnostics_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Subscribes to engine events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PropagationEvent> {
        self.events.subscribe()
    }

    /// Validates and installs a new propagation configuration.
    pub fn update_propagation_config(&self, config: PropagationConfig) -> Result<()> {
        self.propagator.update_config(config)
    }

    /// Metrics handle.
    pub fn metrics(&self) -> Arc<PropagationMetrics> {
        self.propagator.metrics()
    }

    /// Zeroes all metrics counters.
    pub fn reset_metrics(&self) {
        self.propagator.metrics().reset();
    }

    /// Aggregated statistics across every component.
    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            metrics: self.propagator.metrics().snapshot(),
            cache: self.propagator.detector().cache_stats(),
            index: self.propagator.index().stats(),
            pools: self.propagator.pool_stats(),
        }
    }
}
