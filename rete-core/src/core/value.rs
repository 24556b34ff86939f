//! Tagged value model and configurable equality.
//!
//! Facts are heterogeneous attribute maps; every attribute holds a [`Value`].
//! Change detection never relies on `PartialEq` directly - it goes through a
//! [`ValueComparator`], which applies the configured float epsilon, type
//! tracking, deep-comparison and recursion-depth rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Value
// ============================================================================

/// A single fact attribute value.
///
/// Maps use `BTreeMap` so that two values built from the same fields in
/// different insertion orders are structurally identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    Uint(u64),
    /// Double-precision float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Nested field map
    Map(BTreeMap<String, Value>),
    /// Ordered list
    List(Vec<Value>),
}

/// Discriminant of a [`Value`], used for type-change tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Null variant
    Null,
    /// Bool variant
    Bool,
    /// Int variant
    Int,
    /// Uint variant
    Uint,
    /// Float variant
    Float,
    /// String variant
    String,
    /// Map variant
    Map,
    /// List variant
    List,
}

impl Value {
    /// Returns the kind discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Map(_) => ValueKind::Map,
            Value::List(_) => ValueKind::List,
        }
    }

    /// Returns true for the `Null` variant.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it is any numeric variant.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Comparator
// ============================================================================

/// Default float comparison epsilon.
pub const DEFAULT_FLOAT_EPSILON: f64 = 1e-9;

/// Default maximum recursion depth for structural comparison.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Configurable equality over [`Value`]s.
///
/// Primitive kinds take an exact type-switch fast path; maps and lists
/// recurse up to `max_depth`. Beyond the depth bound the comparator returns
/// `true`: callers that rely on deep inequality past the bound must configure
/// a larger one.
#[derive(Debug, Clone)]
pub struct ValueComparator {
    /// Tolerance for float comparison (`|a - b| <= epsilon`).
    pub epsilon: f64,
    /// When true (default), values of differing kinds never compare equal,
    /// even when numerically equivalent.
    pub track_type_changes: bool,
    /// When false, maps and lists are treated as opaque equal-by-kind leaves.
    pub deep_comparison: bool,
    /// Recursion bound for structural comparison.
    pub max_depth: usize,
}

impl Default for ValueComparator {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_FLOAT_EPSILON,
            track_type_changes: true,
            deep_comparison: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ValueComparator {
    /// Compares two values under the configured rules.
    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        self.equal_at(a, b, 0)
    }

    fn equal_at(&self, a: &Value, b: &Value, depth: usize) -> bool {
        // Exact type switch first: primitives never pay the structural path.
        match (a, b) {
            (Value::Null, Value::Null) => return true,
            (Value::Bool(x), Value::Bool(y)) => return x == y,
            (Value::Int(x), Value::Int(y)) => return x == y,
            (Value::Uint(x), Value::Uint(y)) => return x == y,
            (Value::String(x), Value::String(y)) => return x == y,
            (Value::Float(x), Value::Float(y)) => return self.floats_equal(*x, *y),
            _ => {}
        }

        if a.kind() != b.kind() {
            // Numeric coercion is only allowed when type tracking is off.
            if !self.track_type_changes {
                if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                    return self.floats_equal(x, y);
                }
            }
            return false;
        }

        match (a, b) {
            (Value::Map(x), Value::Map(y)) => {
                if !self.deep_comparison {
                    return true;
                }
                if depth >= self.max_depth {
                    // Protective: treat over-deep structures as unchanged.
                    return true;
                }
                if x.len() != y.len() {
                    return false;
                }
                x.iter().all(|(k, xv)| {
                    y.get(k)
                        .map(|yv| self.equal_at(xv, yv, depth + 1))
                        .unwrap_or(false)
                })
            }
            (Value::List(x), Value::List(y)) => {
                if !self.deep_comparison {
                    return true;
                }
                if depth >= self.max_depth {
                    return true;
                }
                if x.len() != y.len() {
                    return false;
                }
                x.iter()
                    .zip(y.iter())
                    .all(|(xv, yv)| self.equal_at(xv, yv, depth + 1))
            }
            // Same-kind primitives were handled by the fast path.
            _ => false,
        }
    }

    fn floats_equal(&self, x: f64, y: f64) -> bool {
        if x.is_nan() || y.is_nan() {
            return false;
        }
        if x.is_infinite() || y.is_infinite() {
            return x == y;
        }
        (x - y).abs() <= self.epsilon
    }
}
