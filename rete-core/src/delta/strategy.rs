//! Node-ordering and should-propagate policies.
//!
//! The propagator asks a strategy two questions per update: is dispatch
//! worth running for this delta and node set at all, and in what order
//! should the affected nodes be visited if so. All strategies preserve the
//! tier invariant (alpha before beta
//! before terminal); they differ in how they arrange nodes inside a tier.

use std::collections::HashMap;

use crate::rete::node::{NodeKind, NodeReference};

use super::types::FactDelta;

/// Ordering and filtering policy applied before dispatch.
pub trait PropagationStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether dispatch is worth running at all for this update.
    ///
    /// Returning false turns the whole update into a no-op: no node is
    /// visited and no callback runs.
    fn should_propagate(&self, delta: &FactDelta, affected: &[NodeReference]) -> bool;

    /// Arranges the affected nodes into dispatch order.
    ///
    /// The returned vector must keep every alpha node before every beta
    /// node and every beta node before every terminal node.
    fn order(&self, nodes: Vec<NodeReference>) -> Vec<NodeReference>;
}

/// Visits nodes tier by tier in the order the index returned them.
#[derive(Debug, Default)]
pub struct SequentialStrategy;

impl PropagationStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn should_propagate(&self, _delta: &FactDelta, affected: &[NodeReference]) -> bool {
        !affected.is_empty()
    }

    fn order(&self, mut nodes: Vec<NodeReference>) -> Vec<NodeReference> {
        // Stable: ties keep the index's insertion order.
        nodes.sort_by_key(|node| node.kind);
        nodes
    }
}

/// Visits nodes by ascending network depth.
///
/// Depths come from an externally supplied map of node id to depth. Nodes
/// absent from the map sort after all mapped nodes of the same tier, in
/// insertion order, so an incomplete depth map degrades to the sequential
/// arrangement rather than failing.
#[derive(Debug, Default)]
pub struct TopologicalStrategy {
    depths: HashMap<String, usize>,
}

impl TopologicalStrategy {
    /// Creates a strategy with no depth information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the depth of a node.
    pub fn with_depth(mut self, node_id: impl Into<String>, depth: usize) -> Self {
        self.depths.insert(node_id.into(), depth);
        self
    }
}

impl PropagationStrategy for TopologicalStrategy {
    fn name(&self) -> &'static str {
        "topological"
    }

    fn should_propagate(&self, _delta: &FactDelta, affected: &[NodeReference]) -> bool {
        !affected.is_empty()
    }

    fn order(&self, mut nodes: Vec<NodeReference>) -> Vec<NodeReference> {
        nodes.sort_by_key(|node| {
            let depth = self
                .depths
                .get(&node.node_id)
                .copied()
                .unwrap_or(usize::MAX);
            (node.kind, depth)
        });
        nodes
    }
}

/// Groups nodes of a tier by fact type and additionally refuses dispatch
/// when the delta carries no changes.
#[derive(Debug, Default)]
pub struct OptimizedStrategy;

impl PropagationStrategy for OptimizedStrategy {
    fn name(&self) -> &'static str {
        "optimized"
    }

    fn should_propagate(&self, delta: &FactDelta, affected: &[NodeReference]) -> bool {
        !delta.is_empty() && !affected.is_empty()
    }

    fn order(&self, mut nodes: Vec<NodeReference>) -> Vec<NodeReference> {
        // Same-type nodes land adjacently so per-type work batches up.
        nodes.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.fact_type.cmp(&b.fact_type))
        });
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::delta::types::FieldDelta;

    fn node(id: &str, kind: NodeKind, fact_type: &str, fields: &[&str]) -> NodeReference {
        NodeReference::new(id, kind, fact_type, fields.iter().map(|s| s.to_string()).collect())
    }

    fn delta_with(fields: &[&str]) -> FactDelta {
        let mut delta = FactDelta::new("Product~p1", "Product", 4);
        for field in fields {
            delta.fields.insert(
                field.to_string(),
                FieldDelta::new(*field, Value::Int(1), Value::Int(2)),
            );
        }
        delta
    }

    fn kinds(nodes: &[NodeReference]) -> Vec<NodeKind> {
        nodes.iter().map(|n| n.kind).collect()
    }

    #[test]
    fn test_sequential_orders_by_tier_stably() {
        let strategy = SequentialStrategy;
        let ordered = strategy.order(vec![
            node("t1", NodeKind::Terminal, "Product", &["price"]),
            node("a1", NodeKind::Alpha, "Product", &["price"]),
            node("b1", NodeKind::Beta, "Product", &["price"]),
            node("a2", NodeKind::Alpha, "Product", &["stock"]),
        ]);
        assert_eq!(
            kinds(&ordered),
            vec![NodeKind::Alpha, NodeKind::Alpha, NodeKind::Beta, NodeKind::Terminal]
        );
        // a1 stayed ahead of a2.
        assert_eq!(ordered[0].node_id, "a1");
        assert_eq!(ordered[1].node_id, "a2");
    }

    #[test]
    fn test_sequential_skips_when_nothing_is_affected() {
        let strategy = SequentialStrategy;
        let affected = vec![node("a1", NodeKind::Alpha, "Product", &["price"])];
        assert!(!strategy.should_propagate(&delta_with(&["price"]), &[]));
        assert!(strategy.should_propagate(&delta_with(&["price"]), &affected));
        // Sequential only looks at the node list, not the delta.
        assert!(strategy.should_propagate(&delta_with(&[]), &affected));
    }

    #[test]
    fn test_topological_orders_within_tier() {
        let strategy = TopologicalStrategy::new()
            .with_depth("a_deep", 5)
            .with_depth("a_shallow", 1);
        let ordered = strategy.order(vec![
            node("a_deep", NodeKind::Alpha, "Product", &["price"]),
            node("a_shallow", NodeKind::Alpha, "Product", &["price"]),
            node("t1", NodeKind::Terminal, "Product", &["price"]),
        ]);
        assert_eq!(ordered[0].node_id, "a_shallow");
        assert_eq!(ordered[1].node_id, "a_deep");
        assert_eq!(ordered[2].node_id, "t1");
    }

    #[test]
    fn test_topological_unknown_nodes_sort_last_in_tier() {
        let strategy = TopologicalStrategy::new().with_depth("a_known", 3);
        let ordered = strategy.order(vec![
            node("a_unknown", NodeKind::Alpha, "Product", &["price"]),
            node("a_known", NodeKind::Alpha, "Product", &["price"]),
        ]);
        assert_eq!(ordered[0].node_id, "a_known");
        assert_eq!(ordered[1].node_id, "a_unknown");
    }

    #[test]
    fn test_topological_never_reorders_across_tiers() {
        // A terminal with a tiny depth still runs after a deep alpha.
        let strategy = TopologicalStrategy::new()
            .with_depth("t1", 0)
            .with_depth("a1", 99);
        let ordered = strategy.order(vec![
            node("t1", NodeKind::Terminal, "Product", &["price"]),
            node("a1", NodeKind::Alpha, "Product", &["price"]),
        ]);
        assert_eq!(kinds(&ordered), vec![NodeKind::Alpha, NodeKind::Terminal]);
    }

    #[test]
    fn test_optimized_groups_by_fact_type() {
        let strategy = OptimizedStrategy;
        let ordered = strategy.order(vec![
            node("a_prod", NodeKind::Alpha, "Product", &["price"]),
            node("a_ord", NodeKind::Alpha, "Order", &["total"]),
            node("a_prod2", NodeKind::Alpha, "Product", &["stock"]),
        ]);
        assert_eq!(ordered[0].fact_type, "Order");
        assert_eq!(ordered[1].fact_type, "Product");
        assert_eq!(ordered[2].fact_type, "Product");
    }

    #[test]
    fn test_optimized_requires_changes_and_targets() {
        let strategy = OptimizedStrategy;
        let affected = vec![node("a1", NodeKind::Alpha, "Product", &["price"])];
        assert!(strategy.should_propagate(&delta_with(&["price"]), &affected));
        assert!(!strategy.should_propagate(&delta_with(&[]), &affected));
        assert!(!strategy.should_propagate(&delta_with(&["price"]), &[]));
    }
}
