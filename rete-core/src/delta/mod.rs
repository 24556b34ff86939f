//! Incremental (delta) propagation subsystem.
//!
//! This module turns a fact mutation into a precise set of field-level
//! changes and delivers them only to the nodes whose match predicates depend
//! on the fields that actually changed, with a principled fallback to the
//! full retract+insert path.
//!
//! # Architecture
//!
//! The subsystem is organized into focused submodules:
//!
//! - [`types`] - field/fact deltas, fallback reasons, outcome records
//! - [`extractor`] - field-name extraction from opaque condition/action ASTs
//! - [`index`] - inverted `(fact_type, field) -> nodes` dependency index
//! - [`builder`] - index construction from a network, with diagnostics
//! - [`detector`] - field-level change detection
//! - [`cache`] - bounded TTL-aware LRU cache for detected deltas
//! - [`pool`] - lifecycle-managed object pools
//! - [`strategy`] - node-ordering and should-propagate policies
//! - [`metrics`] - thread-safe propagation counters
//! - [`propagator`] - detect → lookup → decide → dispatch coordinator
//! - [`engine`] - integration façade assembling all of the above
//!
//! # Data flow for a single update
//!
//! ```text
//! process_update(old, new, id, type)
//!   -> detector.detect(old, new, id, type)
//!   -> index.affected_for_delta(delta)
//!   -> decide(delta, affected, config)
//!        |- classic path -> classic_propagate + update_storage
//!        '- delta path   -> strategy.order(affected) -> per-node delivery
//!   -> metrics.record(...)
//!   -> update_storage(id, new)
//! ```

pub mod builder;
pub mod cache;
pub mod detector;
pub mod engine;
pub mod extractor;
pub mod index;
pub mod metrics;
pub mod pool;
pub mod propagator;
pub mod strategy;
pub mod types;

// Re-export the types callers touch on every update.
pub use types::{
    ChangeKind, FactDelta, FallbackReason, FieldDelta, OutcomeMode, PropagationMode,
    PropagationOutcome, UpdateId,
};

pub use builder::{BuildDiagnostics, IndexBuilder};
pub use cache::{CacheStats, DeltaCache};
pub use detector::{DeltaDetector, DetectorConfig};
pub use engine::{DeltaEngine, EngineConfig, EngineStatistics, PropagationEvent, PropagationEventKind};
pub use extractor::{action_fields, alpha_condition_fields, beta_join_fields};
pub use index::{DependencyIndex, IndexStats};
pub use metrics::{MetricsSnapshot, PropagationMetrics};
pub use pool::{DeltaPools, PoolConfig, PoolStats};
pub use propagator::{
    ClassicPropagateFn, ClassicUpdate, DeltaPropagator, GetNodeFn, NodeDeliveryFn,
    PropagationCallbacks, PropagationConfig, StorageUpdateFn,
};
pub use strategy::{
    OptimizedStrategy, PropagationStrategy, SequentialStrategy, TopologicalStrategy,
};
