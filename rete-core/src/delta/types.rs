//! Field-level change records and aggregated per-fact deltas.
//!
//! A [`FieldDelta`] records one field's transition; a [`FactDelta`] groups
//! every changed field of a single update together with the denominator
//! needed for the change-ratio decision knob.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::value::{Value, ValueKind};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier tagging one `process_update` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId(String);

impl UpdateId {
    /// Creates a new unique update identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the update ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Field-level changes
// ============================================================================

/// Kind of a single field change.
///
/// `Added` iff the old value is null and the new one is not; `Removed` iff
/// the old value is non-null and the new one is null; `Modified` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Field appeared (old was null/absent)
    Added,
    /// Field disappeared (new is null/absent)
    Removed,
    /// Field value changed
    Modified,
}

impl ChangeKind {
    /// Derives the change kind from old/new nullness.
    pub fn classify(old: &Value, new: &Value) -> Self {
        match (old.is_null(), new.is_null()) {
            (true, false) => ChangeKind::Added,
            (false, true) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }

    /// The kind produced when old and new are swapped.
    pub fn inverse(&self) -> Self {
        match self {
            ChangeKind::Added => ChangeKind::Removed,
            ChangeKind::Removed => ChangeKind::Added,
            ChangeKind::Modified => ChangeKind::Modified,
        }
    }
}

/// One field's transition within a fact update.
///
/// Only emitted when `old_value` and `new_value` compare unequal under the
/// configured equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    /// Name of the changed field
    pub field_name: String,
    /// Value before the update (null when added)
    pub old_value: Value,
    /// Value after the update (null when removed)
    pub new_value: Value,
    /// Added / Removed / Modified
    pub change_kind: ChangeKind,
    /// Kind of the post-update value (pre-update kind for removals)
    pub value_type: ValueKind,
}

impl FieldDelta {
    /// Creates a field delta, classifying the change kind from nullness.
    pub fn new(field_name: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        let change_kind = ChangeKind::classify(&old_value, &new_value);
        let value_type = if new_value.is_null() {
            old_value.kind()
        } else {
            new_value.kind()
        };
        Self {
            field_name: field_name.into(),
            old_value,
            new_value,
            change_kind,
            value_type,
        }
    }
}

// ============================================================================
// Fact-level delta
// ============================================================================

/// Aggregated per-fact delta produced by the detector.
///
/// Lifecycle: acquired from the pool on detection and owned by the caller;
/// the propagator releases it once dispatch finishes. Copies handed to the
/// delta cache are owned by the cache until eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactDelta {
    /// Identifier of the updated fact
    pub fact_id: String,
    /// Nominal type of the updated fact
    pub fact_type: String,
    /// Number of fields in the *new* fact (change-ratio denominator)
    pub field_count: usize,
    /// Changed fields by name
    pub fields: HashMap<String, FieldDelta>,
    /// When the delta was detected
    pub timestamp: DateTime<Utc>,
}

impl FactDelta {
    /// Creates an empty delta for the given fact.
    pub fn new(
        fact_id: impl Into<String>,
        fact_type: impl Into<String>,
        field_count: usize,
    ) -> Self {
        Self {
            fact_id: fact_id.into(),
            fact_type: fact_type.into(),
            field_count,
            fields: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Fraction of the fact's fields that changed (0 when the fact is empty).
    pub fn change_ratio(&self) -> f64 {
        if self.field_count == 0 {
            0.0
        } else {
            self.fields.len() as f64 / self.field_count as f64
        }
    }

    /// True when no field changed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns true when the delta touches the given field.
    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Resets the delta for pool reuse, keeping allocated capacity.
    pub(crate) fn reset(&mut self, fact_id: &str, fact_type: &str, field_count: usize) {
        self.fact_id.clear();
        self.fact_id.push_str(fact_id);
        self.fact_type.clear();
        self.fact_type.push_str(fact_type);
        self.field_count = field_count;
        self.fields.clear();
        self.timestamp = Utc::now();
    }
}

// ============================================================================
// Propagation decisions and outcomes
// ============================================================================

/// Requested propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationMode {
    /// Force the delta path, skipping every heuristic
    Delta,
    /// Force the classic retract+insert path
    Classic,
    /// Decide per update from thresholds (default)
    Auto,
}

impl Default for PropagationMode {
    fn default() -> Self {
        PropagationMode::Auto
    }
}

/// Why an update fell back to the classic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackReason {
    /// Fact has fewer fields than `min_fields_for_delta`
    Fields,
    /// Change ratio above `delta_threshold`
    Ratio,
    /// More affected nodes than `max_affected_nodes_for_delta`
    Nodes,
    /// A configured primary-key field changed
    PrimaryKey,
    /// A per-node delivery error was absorbed by `retry_on_error`
    Error,
    /// Classic mode was forced by configuration
    Forced,
}

impl FallbackReason {
    /// Canonical short tag used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Fields => "fields",
            FallbackReason::Ratio => "ratio",
            FallbackReason::Nodes => "nodes",
            FallbackReason::PrimaryKey => "pk",
            FallbackReason::Error => "error",
            FallbackReason::Forced => "forced",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single `process_update` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeMode {
    /// Field-level deltas were delivered to affected nodes
    Delta,
    /// The classic retract+insert callback ran
    Classic,
    /// Nothing changed; no callback was invoked
    Noop,
}

/// Result record returned by `process_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationOutcome {
    /// Identifier tagging this update
    pub update_id: UpdateId,
    /// Which path ran
    pub mode: OutcomeMode,
    /// Fallback reason when the classic path ran on a heuristic
    pub fallback_reason: Option<FallbackReason>,
    /// Nodes visited on the delta path (0 for classic/noop)
    pub nodes_visited: usize,
    /// Number of changed fields in the detected delta
    pub fields_changed: usize,
    /// Wall-clock duration of the call
    pub duration: std::time::Duration,
}
