//! Field-level change detection between fact snapshots.
//!
//! The detector compares the pre- and post-update field maps of one fact and
//! emits a [`FactDelta`] holding exactly the fields whose values differ under
//! the configured equality. Detection is a pure function of the two
//! snapshots; the optional cache keyed by fact id memoizes the last observed
//! delta for callers that re-detect the same mutation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::core::error::{EngineError, Result};
use crate::core::fact::FieldMap;
use crate::core::value::{Value, ValueComparator, DEFAULT_FLOAT_EPSILON, DEFAULT_MAX_DEPTH};

use super::cache::DeltaCache;
use super::pool::DeltaPools;
use super::types::{FactDelta, FieldDelta};

/// Default time-to-live for memoized comparisons.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Tuning knobs for change detection.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Tolerance for float comparison; must be non-negative
    pub float_epsilon: f64,
    /// Skip fields whose names start with an underscore
    pub ignore_internal_fields: bool,
    /// Explicit field names to skip
    pub ignored_fields: HashSet<String>,
    /// Report a change when only the value's kind differs
    pub track_type_changes: bool,
    /// Recurse into maps and lists instead of treating them as opaque
    pub enable_deep_comparison: bool,
    /// Recursion bound for structural comparison; must be at least 1
    pub max_nesting_level: usize,
    /// Memoize non-empty deltas by fact id
    pub cache_comparisons: bool,
    /// Capacity of the comparison cache
    pub cache_max_size: usize,
    /// Time-to-live of cached comparisons
    pub cache_ttl: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            float_epsilon: DEFAULT_FLOAT_EPSILON,
            ignore_internal_fields: true,
            ignored_fields: HashSet::new(),
            track_type_changes: true,
            enable_deep_comparison: true,
            max_nesting_level: DEFAULT_MAX_DEPTH,
            cache_comparisons: false,
            cache_max_size: super::cache::DEFAULT_MAX_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl DetectorConfig {
    /// Rejects configurations the detector cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !self.float_epsilon.is_finite() || self.float_epsilon < 0.0 {
            return Err(EngineError::InvalidConfig {
                field: "float_epsilon".to_string(),
                reason: "must be a finite non-negative number".to_string(),
            });
        }
        if self.max_nesting_level == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_nesting_level".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Replaces out-of-range values with defaults, warning about each one.
    fn sanitized(mut self) -> Self {
        if !self.float_epsilon.is_finite() || self.float_epsilon < 0.0 {
            warn!(
                epsilon = self.float_epsilon,
                "invalid float_epsilon; using default"
            );
            self.float_epsilon = DEFAULT_FLOAT_EPSILON;
        }
        if self.max_nesting_level == 0 {
            warn!("max_nesting_level of 0; using default");
            self.max_nesting_level = DEFAULT_MAX_DEPTH;
        }
        self
    }
}

/// Detects field-level differences between two fact snapshots.
pub struct DeltaDetector {
    config: DetectorConfig,
    comparator: ValueComparator,
    cache: Option<DeltaCache>,
    pools: Arc<DeltaPools>,
}

impl DeltaDetector {
    /// Creates a detector, replacing invalid config values with defaults.
    pub fn new(config: DetectorConfig, pools: Arc<DeltaPools>) -> Self {
        let config = config.sanitized();
        let comparator = ValueComparator {
            epsilon: config.float_epsilon,
            track_type_changes: config.track_type_changes,
            deep_comparison: config.enable_deep_comparison,
            max_depth: config.max_nesting_level,
        };
        let cache = if config.cache_comparisons {
            Some(DeltaCache::new(config.cache_max_size, config.cache_ttl))
        } else {
            None
        };
        Self {
            config,
            comparator,
            cache,
            pools,
        }
    }

    /// Compares two snapshots of the same fact and returns the delta.
    ///
    /// The field universe is the union of both snapshots' keys: a key present
    /// only before is a removal, a key present only after is an addition. The
    /// change-ratio denominator is the field count of the *new* snapshot.
    pub fn detect(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
    ) -> FactDelta {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(fact_id) {
                return (*hit).clone();
            }
        }

        let mut delta = self
            .pools
            .acquire_fact_delta(fact_id, fact_type, new.len());

        for (name, new_value) in new {
            if self.is_ignored(name) {
                continue;
            }
            let old_value = old.get(name).unwrap_or(&Value::Null);
            if !self.comparator.equal(old_value, new_value) {
                delta.fields.insert(
                    name.clone(),
                    FieldDelta::new(name.clone(), old_value.clone(), new_value.clone()),
                );
            }
        }

        // Keys present only in the old snapshot are removals.
        for (name, old_value) in old {
            if new.contains_key(name) || self.is_ignored(name) || old_value.is_null() {
                continue;
            }
            delta.fields.insert(
                name.clone(),
                FieldDelta::new(name.clone(), old_value.clone(), Value::Null),
            );
        }

        if let Some(cache) = &self.cache {
            if !delta.is_empty() {
                cache.put(fact_id, Arc::new(delta.clone()));
            }
        }

        delta
    }

    /// Like [`detect`](Self::detect) but returns `None` for an unchanged
    /// fact. When both snapshots carry the same keys, the no-change case is
    /// decided by a scan alone, without touching the pool.
    pub fn detect_quick(
        &self,
        old: &FieldMap,
        new: &FieldMap,
        fact_id: &str,
        fact_type: &str,
    ) -> Option<FactDelta> {
        if old.len() == new.len() && self.snapshots_equal(old, new) {
            return None;
        }
        let delta = self.detect(old, new, fact_id, fact_type);
        if delta.is_empty() {
            self.pools.release_fact_delta(delta);
            None
        } else {
            Some(delta)
        }
    }

    /// True when a full [`detect`](Self::detect) would produce an empty
    /// delta: every non-ignored field of `new` exists unchanged in `old`,
    /// and no old-only field would register as a removal.
    fn snapshots_equal(&self, old: &FieldMap, new: &FieldMap) -> bool {
        new.iter().all(|(name, new_value)| {
            if self.is_ignored(name) {
                return true;
            }
            match old.get(name) {
                Some(old_value) => self.comparator.equal(old_value, new_value),
                None => false,
            }
        }) && old.iter().all(|(name, old_value)| {
            new.contains_key(name) || self.is_ignored(name) || old_value.is_null()
        })
    }

    /// Returns a previously detected delta to the pool.
    pub fn release(&self, delta: FactDelta) {
        self.pools.release_fact_delta(delta);
    }

    /// Active configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Comparison-cache counters, when the cache is enabled.
    pub fn cache_stats(&self) -> Option<super::cache::CacheStats> {
        self.cache.as_ref().map(DeltaCache::stats)
    }

    /// Drops expired entries from the comparison cache.
    pub fn purge_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.purge_expired();
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        if self.config.ignore_internal_fields && name.starts_with('_') {
            return true;
        }
        self.config.ignored_fields.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::types::ChangeKind;

    fn detector(config: DetectorConfig) -> DeltaDetector {
        DeltaDetector::new(config, Arc::new(DeltaPools::default()))
    }

    fn fields(entries: &[(&str, Value)]) -> FieldMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_single_field_change() {
        let d = detector(DetectorConfig::default());
        let old = fields(&[
            ("price", Value::Float(10.0)),
            ("stock", Value::Int(5)),
            ("name", Value::from("widget")),
            ("status", Value::from("active")),
        ]);
        let mut new = old.clone();
        new.insert("price".to_string(), Value::Float(12.0));

        let delta = d.detect(&old, &new, "Product~p1", "Product");
        assert_eq!(delta.fields.len(), 1);
        assert!(delta.contains_field("price"));
        assert!((delta.change_ratio() - 0.25).abs() < f64::EPSILON);

        let fd = &delta.fields["price"];
        assert_eq!(fd.change_kind, ChangeKind::Modified);
        assert_eq!(fd.old_value, Value::Float(10.0));
        assert_eq!(fd.new_value, Value::Float(12.0));
    }

    #[test]
    fn test_no_change_is_empty() {
        let d = detector(DetectorConfig::default());
        let snapshot = fields(&[("price", Value::Float(10.0)), ("stock", Value::Int(5))]);
        assert!(d.detect(&snapshot, &snapshot, "Product~p1", "Product").is_empty());
        assert!(d
            .detect_quick(&snapshot, &snapshot, "Product~p1", "Product")
            .is_none());
    }

    #[test]
    fn test_detect_quick_skips_pool_on_no_change() {
        let pools = Arc::new(DeltaPools::default());
        let d = DeltaDetector::new(DetectorConfig::default(), Arc::clone(&pools));

        let snapshot = fields(&[("price", Value::Float(10.0)), ("stock", Value::Int(5))]);
        assert!(d
            .detect_quick(&snapshot, &snapshot, "Product~p1", "Product")
            .is_none());
        assert_eq!(pools.stats().acquisitions, 0);

        // Same sizes but different key sets fall through to a full detect.
        let old = fields(&[("price", Value::Float(10.0)), ("legacy", Value::from("x"))]);
        let new = fields(&[("price", Value::Float(10.0)), ("status", Value::from("active"))]);
        let delta = d
            .detect_quick(&old, &new, "Product~p1", "Product")
            .unwrap_or_else(|| panic!("differing key sets must yield a delta"));
        assert_eq!(delta.fields.len(), 2);
        assert!(pools.stats().acquisitions > 0);
    }

    #[test]
    fn test_added_and_removed_fields() {
        let d = detector(DetectorConfig::default());
        let old = fields(&[("stock", Value::Int(5)), ("legacy", Value::from("x"))]);
        let new = fields(&[("stock", Value::Int(5)), ("status", Value::from("active"))]);

        let delta = d.detect(&old, &new, "Product~p1", "Product");
        assert_eq!(delta.fields.len(), 2);
        assert_eq!(delta.fields["status"].change_kind, ChangeKind::Added);
        assert_eq!(delta.fields["legacy"].change_kind, ChangeKind::Removed);
        // Denominator is the new snapshot's field count.
        assert_eq!(delta.field_count, 2);
    }

    #[test]
    fn test_detection_is_symmetric_under_swap() {
        let d = detector(DetectorConfig::default());
        let a = fields(&[
            ("price", Value::Float(10.0)),
            ("legacy", Value::from("x")),
            ("stock", Value::Int(5)),
        ]);
        let b = fields(&[
            ("price", Value::Float(12.0)),
            ("status", Value::from("active")),
            ("stock", Value::Int(5)),
        ]);

        let forward = d.detect(&a, &b, "Product~p1", "Product");
        let backward = d.detect(&b, &a, "Product~p1", "Product");

        let mut forward_names: Vec<_> = forward.fields.keys().collect();
        let mut backward_names: Vec<_> = backward.fields.keys().collect();
        forward_names.sort();
        backward_names.sort();
        assert_eq!(forward_names, backward_names);

        for (name, fd) in &forward.fields {
            let rev = &backward.fields[name];
            assert_eq!(rev.old_value, fd.new_value);
            assert_eq!(rev.new_value, fd.old_value);
            assert_eq!(rev.change_kind, fd.change_kind.inverse());
        }
    }

    #[test]
    fn test_internal_and_ignored_fields_skipped() {
        let mut config = DetectorConfig::default();
        config.ignored_fields.insert("updated_at".to_string());
        let d = detector(config);

        let old = fields(&[
            ("_version", Value::Int(1)),
            ("updated_at", Value::from("yesterday")),
            ("price", Value::Float(10.0)),
        ]);
        let new = fields(&[
            ("_version", Value::Int(2)),
            ("updated_at", Value::from("today")),
            ("price", Value::Float(10.0)),
        ]);

        assert!(d.detect(&old, &new, "Product~p1", "Product").is_empty());
    }

    #[test]
    fn test_nested_map_change_is_one_field() {
        let d = detector(DetectorConfig::default());
        let address = |city: &str| {
            Value::Map(std::collections::BTreeMap::from([
                ("city".to_string(), Value::from(city)),
                ("zip".to_string(), Value::from("75001")),
            ]))
        };
        let old = fields(&[("name", Value::from("Alice")), ("address", address("Paris"))]);
        let new = fields(&[("name", Value::from("Alice")), ("address", address("Lyon"))]);

        let delta = d.detect(&old, &new, "Customer~c1", "Customer");
        assert_eq!(delta.fields.len(), 1);
        assert_eq!(delta.fields["address"].change_kind, ChangeKind::Modified);
    }

    #[test]
    fn test_epsilon_suppresses_float_noise() {
        let d = detector(DetectorConfig {
            float_epsilon: 0.01,
            ..DetectorConfig::default()
        });
        let old = fields(&[("price", Value::Float(10.0))]);
        let new = fields(&[("price", Value::Float(10.004))]);
        assert!(d.detect(&old, &new, "Product~p1", "Product").is_empty());
    }

    #[test]
    fn test_type_change_detected_by_default() {
        let d = detector(DetectorConfig::default());
        let old = fields(&[("count", Value::Int(1))]);
        let new = fields(&[("count", Value::Float(1.0))]);
        assert_eq!(d.detect(&old, &new, "X~1", "X").fields.len(), 1);

        let lax = detector(DetectorConfig {
            track_type_changes: false,
            ..DetectorConfig::default()
        });
        assert!(lax.detect(&old, &new, "X~1", "X").is_empty());
    }

    #[test]
    fn test_invalid_config_sanitized() {
        let d = detector(DetectorConfig {
            float_epsilon: -1.0,
            max_nesting_level: 0,
            ..DetectorConfig::default()
        });
        assert_eq!(d.config().float_epsilon, DEFAULT_FLOAT_EPSILON);
        assert_eq!(d.config().max_nesting_level, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = DetectorConfig {
            float_epsilon: f64::NAN,
            ..DetectorConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_cache_memoizes_by_fact_id() {
        let d = detector(DetectorConfig {
            cache_comparisons: true,
            ..DetectorConfig::default()
        });
        let old = fields(&[("price", Value::Float(10.0))]);
        let new = fields(&[("price", Value::Float(12.0))]);

        let first = d.detect(&old, &new, "Product~p1", "Product");
        assert_eq!(first.fields.len(), 1);

        // Second detection for the same fact id is served from the cache.
        let second = d.detect(&old, &new, "Product~p1", "Product");
        assert_eq!(second, first);
        let stats = d.cache_stats().expect("cache enabled");
        assert_eq!(stats.hits, 1);
    }
}
