//! Node kinds and node references.

use serde::{Deserialize, Serialize};

/// Tier of a RETE node.
///
/// Alpha nodes run single-fact tests, beta nodes join facts, terminal nodes
/// hold rule activations. Propagation always completes a tier before the
/// next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Single-fact test node
    Alpha,
    /// Multi-fact join node
    Beta,
    /// Rule activation node
    Terminal,
}

impl NodeKind {
    /// Canonical lowercase name, used in logs and metrics tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Alpha => "alpha",
            NodeKind::Beta => "beta",
            NodeKind::Terminal => "terminal",
        }
    }
}

/// Immutable reference to a network node as seen by the dependency index.
///
/// References are immutable after insertion into the index; structural rule
/// edits rebuild the index rather than mutating entries in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReference {
    /// Unique node identifier
    pub node_id: String,
    /// Tier of the node
    pub kind: NodeKind,
    /// Fact type the node's predicate applies to
    pub fact_type: String,
    /// Field names the node's predicate or action reads
    pub watched_fields: Vec<String>,
}

impl NodeReference {
    /// Creates a node reference.
    pub fn new(
        node_id: impl Into<String>,
        kind: NodeKind,
        fact_type: impl Into<String>,
        watched_fields: Vec<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            fact_type: fact_type.into(),
            watched_fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(NodeKind::Alpha.as_str(), "alpha");
        assert_eq!(NodeKind::Beta.as_str(), "beta");
        assert_eq!(NodeKind::Terminal.as_str(), "terminal");
    }

    #[test]
    fn test_tier_ordering() {
        assert!(NodeKind::Alpha < NodeKind::Beta);
        assert!(NodeKind::Beta < NodeKind::Terminal);
    }
}
