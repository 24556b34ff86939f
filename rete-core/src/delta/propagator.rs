//! Update coordinator: detect, look up, decide, dispatch.
//!
//! The propagator owns the per-update pipeline. It detects the field-level
//! delta, asks the dependency index for the affected nodes, applies the
//! decision heuristics, and either delivers field deltas tier by tier or
//! falls back to the classic retract+insert callback. All outward effects
//! run through caller-installed callbacks so the propagator never touches
//! node internals or storage directly.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{EngineError, Result};
use crate::core::fact::FieldMap;
use crate::rete::node::{NodeKind, NodeReference};

use super::detector::{DeltaDetector, DetectorConfig};
use super::index::DependencyIndex;
use super::metrics::PropagationMetrics;
use super::pool::DeltaPools;
use super::strategy::{PropagationStrategy, SequentialStrategy};
use super::types::{FactDelta, FallbackReason, OutcomeMode, PropagationMode, PropagationOutcome, UpdateId};

// ============================================================================
// Callbacks
// ============================================================================

/// Delivers one fact delta to one node.
pub type NodeDeliveryFn =
    Arc<dyn Fn(String, Arc<FactDelta>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Full retract+insert payload handed to the classic path.
#[derive(Debug, Clone)]
pub struct ClassicUpdate {
    /// Identifier of the updated fact
    pub fact_id: String,
    /// Nominal type of the updated fact
    pub fact_type: String,
    /// Snapshot before the update
    pub old: FieldMap,
    /// Snapshot after the update
    pub new: FieldMap,
}

/// Runs the classic retract+insert path for one update.
pub type ClassicPropagateFn =
    Arc<dyn Fn(ClassicUpdate) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Persists the post-update snapshot.
pub type StorageUpdateFn =
    Arc<dyn Fn(String, FieldMap) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Resolves a node id to its reference, bypassing the index registry.
pub type GetNodeFn = Arc<dyn Fn(&str) -> Option<NodeReference> + Send + Sync>;

/// The callback set the propagator dispatches through.
#[derive(Clone, Default)]
pub struct PropagationCallbacks {
    /// Per-node delta delivery (required for the delta path)
    pub node_delivery: Option<NodeDeliveryFn>,
    /// Classic retract+insert (required whenever a fallback fires)
    pub classic_propagate: Option<ClassicPropagateFn>,
    /// Post-update storage write (optional)
    pub storage_update: Option<StorageUpdateFn>,
    /// Node resolution override (optional)
    pub get_node: Option<GetNodeFn>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Decision thresholds and dispatch limits.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    /// Requested mode; `Auto` applies the heuristics below
    pub default_mode: PropagationMode,
    /// Master switch; when false every update takes the classic path
    pub enable_delta_propagation: bool,
    /// Classic fallback when `change_ratio > delta_threshold`; in `[0, 1]`
    pub delta_threshold: f64,
    /// Classic fallback when the fact has fewer fields than this
    pub min_fields_for_delta: usize,
    /// Classic fallback when more nodes than this are affected; at least 1
    pub max_affected_nodes_for_delta: usize,
    /// Permit primary-key fields to change without a fallback
    pub allow_primary_key_change: bool,
    /// Field names treated as primary keys
    pub primary_key_fields: Vec<String>,
    /// Record counters and latencies
    pub enable_metrics: bool,
    /// Wall-clock bound on one update; must be non-zero
    pub propagation_timeout: std::time::Duration,
    /// Absorb per-node delivery errors by falling back to classic
    pub retry_on_error: bool,
    /// Concurrent node deliveries within a tier; at least 1
    pub max_concurrent_propagations: usize,
    /// Dispatch all tiers in one wave instead of waiting per tier
    pub enable_optimistic_propagation: bool,
    /// Emit a debug log line per node delivery
    pub log_propagation_details: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            default_mode: PropagationMode::Auto,
            enable_delta_propagation: true,
            delta_threshold: 0.5,
            min_fields_for_delta: 0,
            max_affected_nodes_for_delta: 100,
            allow_primary_key_change: false,
            primary_key_fields: Vec::new(),
            enable_metrics: true,
            propagation_timeout: std::time::Duration::from_secs(30),
            retry_on_error: true,
            max_concurrent_propagations: 10,
            enable_optimistic_propagation: false,
            log_propagation_details: false,
        }
    }
}

impl PropagationConfig {
    /// Rejects configurations the propagator cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.delta_threshold) {
            return Err(EngineError::InvalidConfig {
                field: "delta_threshold".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.max_affected_nodes_for_delta == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_affected_nodes_for_delta".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_propagations == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_concurrent_propagations".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.propagation_timeout.is_zero() {
            return Err(EngineError::InvalidConfig {
                field: "propagation_timeout".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Propagator
// ============================================================================

/// Coordinates change detection, decision heuristics, and node dispatch for
/// a single fact update.
pub struct DeltaPropagator {
    detector: DeltaDetector,
    index: RwLock<Arc<DependencyIndex>>,
    strategy: RwLock<Box<dyn PropagationStrategy>>,
    metrics: Arc<PropagationMetrics>,
    pools: Arc<DeltaPools>,
    callbacks: RwLock<PropagationCallbacks>,
    semaphore: RwLock<Arc<Semaphore>>,
    config: RwLock<PropagationConfig>,
}

impl DeltaPropagator {
    /// Creates a propagator with an empty index and no callbacks installed.
    ///
    /// Invalid configuration values are replaced with defaults after a
    /// warning; use [`PropagationConfig::validate`] to reject them instead.
    pub fn new(detector_config: DetectorConfig, config: PropagationConfig) -> Self {
        let config = Self::sanitize(config);
        let pools = Arc::new(DeltaPools::default());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_propagations));
        Self {
            detector: DeltaDetector::new(detector_config, Arc::clone(&pools)),
            index: RwLock::new(Arc::new(DependencyIndex::new())),
            strategy: RwLock::new(Box::new(SequentialStrategy)),
            metrics: Arc::new(PropagationMetrics::new()),
            pools,
            callbacks: RwLock::new(PropagationCallbacks::default()),
            semaphore: RwLock::new(semaphore),
            config: RwLock::new(config),
        }
    }

    fn sanitize(mut config: PropagationConfig) -> PropagationConfig {
        let defaults = PropagationConfig::default();
        if !(0.0..=1.0).contains(&config.delta_threshold) {
            warn!(
                threshold = config.delta_threshold,
                "delta_threshold out of [0, 1]; using default"
            );
            config.delta_threshold = defaults.delta_threshold;
        }
        if config.max_affected_nodes_for_delta == 0 {
            warn!("max_affected_nodes_for_delta of 0; using default");
            config.max_affected_nodes_for_delta = defaults.max_affected_nodes_for_delta;
        }
        if config.max_concurrent_propagations == 0 {
            warn!("max_concurrent_propagations of 0; using default");
            config.max_concurrent_propagations = defaults.max_concurrent_propagations;
        }
        if config.propagation_timeout.is_zero() {
            warn!("zero propagation_timeout; using default");
            config.propagation_timeout = defaults.propagation_timeout;
        }
        config
    }

    /// Replaces the dependency index atomically.
    pub fn set_index(&self, index: Arc<DependencyIndex>) {
        *self.index.write() = index;
    }

    /// Current dependency index.
    pub fn index(&self) -> Arc<DependencyIndex> {
        Arc::clone(&self.index.read())
    }

    /// Replaces the ordering strategy.
    pub fn set_strategy(&self, strategy: Box<dyn PropagationStrategy>) {
        *self.strategy.write() = strategy;
    }

    /// Replaces the callback set.
    pub fn set_callbacks(&self, callbacks: PropagationCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    /// Mutates the callback set in place.
    pub fn update_callbacks(&self, f: impl FnOnce(&mut PropagationCallbacks)) {
        f(&mut self.callbacks.write());
    }

    /// Metrics handle shared with the façade.
    pub fn metrics(&self) -> Arc<PropagationMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Detector owned by this propagator.
    pub fn detector(&self) -> &DeltaDetector {
        &self.detector
    }

    /// Pool statistics.
    pub fn pool_stats(&self) -> super::pool::PoolStats {
        self.pools.stats()
    }

    /// Validates and installs a new configuration.
    ///
    /// The concurrency semaphore is rebuilt when the limit changed; updates
    /// already in flight keep the permits they hold.
    pub fn update_config(&self, config: PropagationConfig) -> Result<()> {
        config.validate()?;
        let rebuild = {
            let current = self.config.read();
            current.max_concurrent_propagations != config.max_concurrent_propagations
        };
        if rebuild {
            *self.semaphore.write() = Arc::new(Semaphore::new(config.max_concurrent_propagations));
        }
        *self.config.write() = config;
        Ok(())
    }

    /// Active configuration.
    pub fn config(&self) -> PropagationConfig {
        self.config.read().clone()
    }

    /// Processes one fact update end to end.
    pub async fn propagate_update(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
    ) -> Result<PropagationOutcome> {
        self.propagate_update_with_cancel(old, new, fact_id, fact_type, CancellationToken::new())
            .await
    }

    /// Like [`propagate_update`](Self::propagate_update), aborting between
    /// node deliveries once `cancel` fires.
    pub async fn propagate_update_with_cancel(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
        cancel: CancellationToken,
    ) -> Result<PropagationOutcome> {
        let config = self.config.read().clone();
        let timeout = config.propagation_timeout;

        match tokio::time::timeout(
            timeout,
            self.run_update(old, new, fact_id, fact_type, &config, cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                if config.enable_metrics {
                    self.metrics.record_failed();
                }
                Err(EngineError::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn run_update(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
        config: &PropagationConfig,
        cancel: CancellationToken,
    ) -> Result<PropagationOutcome> {
        let start = Instant::now();
        let update_id = UpdateId::new();

        if !config.enable_delta_propagation {
            return self
                .run_classic(
                    old,
                    new,
                    fact_id,
                    fact_type,
                    FallbackReason::Forced,
                    0,
                    update_id,
                    start,
                    config,
                )
                .await;
        }

        let delta = self.detector.detect(old, new, fact_id, fact_type);

        // Nothing changed: no callbacks run, storage stays untouched.
        if delta.is_empty() {
            let fields = delta.fields.len();
            self.pools.release_fact_delta(delta);
            if config.enable_metrics {
                self.metrics.record_noop();
            }
            return Ok(PropagationOutcome {
                update_id,
                mode: OutcomeMode::Noop,
                fallback_reason: None,
                nodes_visited: 0,
                fields_changed: fields,
                duration: start.elapsed(),
            });
        }

        let index = self.index();
        let affected = index.affected_for_delta(&delta);

        let fallback = match config.default_mode {
            PropagationMode::Delta => None,
            PropagationMode::Classic => Some(FallbackReason::Forced),
            PropagationMode::Auto => self.decide(&delta, &affected, config),
        };

        if let Some(reason) = fallback {
            let fields = delta.fields.len();
            self.pools.release_fact_delta(delta);
            return self
                .run_classic(
                    old, new, fact_id, fact_type, reason, fields, update_id, start, config,
                )
                .await;
        }

        // The strategy gets the last word: a rejected update is a no-op,
        // not a fallback, so neither callback runs.
        if !self.strategy.read().should_propagate(&delta, &affected) {
            let fields = delta.fields.len();
            self.pools.release_fact_delta(delta);
            if config.enable_metrics {
                self.metrics.record_noop();
            }
            return Ok(PropagationOutcome {
                update_id,
                mode: OutcomeMode::Noop,
                fallback_reason: None,
                nodes_visited: 0,
                fields_changed: fields,
                duration: start.elapsed(),
            });
        }

        match self
            .run_delta(&delta, affected, config, &cancel)
            .await
        {
            Ok(nodes_visited) => {
                if let Err(err) = self.update_storage(fact_id, new).await {
                    self.pools.release_fact_delta(delta);
                    if config.enable_metrics {
                        self.metrics.record_failed();
                    }
                    return Err(err);
                }
                let fields = delta.fields.len();
                if config.enable_metrics {
                    self.metrics.record_delta(start.elapsed(), nodes_visited, fields);
                    self.metrics
                        .record_nodes_skipped(index.node_count().saturating_sub(nodes_visited));
                }
                self.pools.release_fact_delta(delta);
                Ok(PropagationOutcome {
                    update_id,
                    mode: OutcomeMode::Delta,
                    fallback_reason: None,
                    nodes_visited,
                    fields_changed: fields,
                    duration: start.elapsed(),
                })
            }
            Err(err) if config.retry_on_error && !matches!(err, EngineError::Cancelled) => {
                warn!(fact_id = %fact_id, error = %err, "delta delivery failed; falling back to classic");
                let fields = delta.fields.len();
                self.pools.release_fact_delta(delta);
                self.run_classic(
                    old,
                    new,
                    fact_id,
                    fact_type,
                    FallbackReason::Error,
                    fields,
                    update_id,
                    start,
                    config,
                )
                .await
            }
            Err(err) => {
                self.pools.release_fact_delta(delta);
                if config.enable_metrics {
                    self.metrics.record_failed();
                }
                Err(err)
            }
        }
    }

    /// Applies the auto-mode heuristics in their documented order.
    fn decide(
        &self,
        delta: &FactDelta,
        affected: &[NodeReference],
        config: &PropagationConfig,
    ) -> Option<FallbackReason> {
        if delta.field_count < config.min_fields_for_delta {
            return Some(FallbackReason::Fields);
        }
        if delta.change_ratio() > config.delta_threshold {
            return Some(FallbackReason::Ratio);
        }
        if affected.len() > config.max_affected_nodes_for_delta {
            return Some(FallbackReason::Nodes);
        }
        if !config.allow_primary_key_change
            && config
                .primary_key_fields
                .iter()
                .any(|pk| delta.contains_field(pk))
        {
            return Some(FallbackReason::PrimaryKey);
        }
        None
    }

    /// Delivers the delta to the affected nodes, tier by tier.
    ///
    /// Returns the number of nodes visited. Within a tier deliveries run
    /// concurrently, bounded by the semaphore; a tier must drain before the
    /// next one starts unless optimistic dispatch is enabled.
    async fn run_delta(
        &self,
        delta: &FactDelta,
        affected: Vec<NodeReference>,
        config: &PropagationConfig,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let (delivery, get_node) = {
            let callbacks = self.callbacks.read();
            (
                callbacks
                    .node_delivery
                    .clone()
                    .ok_or_else(|| EngineError::missing_callback("node_delivery"))?,
                callbacks.get_node.clone(),
            )
        };

        let ordered = {
            let strategy = self.strategy.read();
            strategy
                .order(affected)
                .into_iter()
                // Index entries can outlive their nodes between rebuilds.
                .filter(|node| {
                    get_node
                        .as_ref()
                        .map_or(true, |get| get(&node.node_id).is_some())
                })
                .collect::<Vec<_>>()
        };

        let shared = Arc::new(delta.clone());
        let semaphore = Arc::clone(&self.semaphore.read());
        let mut visited = 0usize;

        if config.enable_optimistic_propagation {
            visited += self
                .dispatch_wave(&ordered, &shared, &delivery, &semaphore, config, cancel)
                .await?;
            return Ok(visited);
        }

        for kind in [NodeKind::Alpha, NodeKind::Beta, NodeKind::Terminal] {
            let tier: Vec<NodeReference> = ordered
                .iter()
                .filter(|node| node.kind == kind)
                .cloned()
                .collect();
            if tier.is_empty() {
                continue;
            }
            visited += self
                .dispatch_wave(&tier, &shared, &delivery, &semaphore, config, cancel)
                .await?;
        }
        Ok(visited)
    }

    async fn dispatch_wave(
        &self,
        nodes: &[NodeReference],
        delta: &Arc<FactDelta>,
        delivery: &NodeDeliveryFn,
        semaphore: &Arc<Semaphore>,
        config: &PropagationConfig,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();

        for node in nodes {
            if cancel.is_cancelled() {
                join_set.abort_all();
                return Err(EngineError::Cancelled);
            }
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(EngineError::Cancelled);
                }
                permit = Arc::clone(semaphore).acquire_owned() => {
                    permit.map_err(|_| EngineError::Cancelled)?
                }
            };

            if config.log_propagation_details {
                debug!(node_id = %node.node_id, kind = node.kind.as_str(), "delivering delta");
            }

            let node_id = node.node_id.clone();
            let delta = Arc::clone(delta);
            let delivery = Arc::clone(delivery);
            join_set.spawn(async move {
                let _permit = permit;
                delivery(node_id.clone(), delta)
                    .await
                    .map_err(|err| EngineError::propagation(node_id, &err))
            });
        }

        let mut delivered = 0usize;
        let mut first_error: Option<EngineError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::PropagationFailed {
                            node_id: "<task>".to_string(),
                            message: join_err.to_string(),
                        });
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(delivered),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_classic(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
        reason: FallbackReason,
        fields_changed: usize,
        update_id: UpdateId,
        start: Instant,
        config: &PropagationConfig,
    ) -> Result<PropagationOutcome> {
        let classic = match self.callbacks.read().classic_propagate.clone() {
            Some(classic) => classic,
            None => {
                if config.enable_metrics {
                    self.metrics.record_failed();
                }
                return Err(EngineError::missing_callback("classic_propagate"));
            }
        };

        debug!(fact_id = %fact_id, reason = %reason, "classic propagation");

        let applied = classic(ClassicUpdate {
            fact_id: fact_id.to_string(),
            fact_type: fact_type.to_string(),
            old: old.clone(),
            new: new.clone(),
        })
        .await;
        if let Err(err) = applied {
            if config.enable_metrics {
                self.metrics.record_failed();
            }
            return Err(err);
        }

        if let Err(err) = self.update_storage(fact_id, new).await {
            if config.enable_metrics {
                self.metrics.record_failed();
            }
            return Err(err);
        }

        if config.enable_metrics {
            self.metrics.record_fallback(reason);
            self.metrics
                .record_classic(start.elapsed(), self.index().node_count());
        }

        Ok(PropagationOutcome {
            update_id,
            mode: OutcomeMode::Classic,
            fallback_reason: Some(reason),
            nodes_visited: 0,
            fields_changed,
            duration: start.elapsed(),
        })
    }

    async fn update_storage(&self, fact_id: &str, new: &FieldMap) -> Result<()> {
        let storage = self.callbacks.read().storage_update.clone();
        if let Some(storage) = storage {
            storage(fact_id.to_string(), new.clone())
                .await
                .map_err(|err| EngineError::StorageUpdateFailed {
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }
}
