//! Inverted dependency index from `(fact_type, field)` to node references.
//!
//! Three parallel per-kind indexes (alpha, beta, terminal) map a fact type
//! and field name to the ordered list of nodes whose predicates depend on
//! that field, plus a registry keeping full [`NodeReference`] records. The
//! whole structure sits behind a single shared/exclusive lock so readers see
//! all maps as one consistent snapshot: many concurrent lookups, few rare
//! mutations.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::rete::node::{NodeKind, NodeReference};

use super::types::FactDelta;

/// `fact_type -> field -> ordered node ids (no duplicates)`.
type KindIndex = HashMap<String, HashMap<String, Vec<String>>>;

#[derive(Debug, Default)]
struct IndexInner {
    alpha: KindIndex,
    beta: KindIndex,
    terminal: KindIndex,
    registry: HashMap<String, NodeReference>,
    built_at: Option<DateTime<Utc>>,
}

impl IndexInner {
    fn kind_index_mut(&mut self, kind: NodeKind) -> &mut KindIndex {
        match kind {
            NodeKind::Alpha => &mut self.alpha,
            NodeKind::Beta => &mut self.beta,
            NodeKind::Terminal => &mut self.terminal,
        }
    }

    fn kind_index(&self, kind: NodeKind) -> &KindIndex {
        match kind {
            NodeKind::Alpha => &self.alpha,
            NodeKind::Beta => &self.beta,
            NodeKind::Terminal => &self.terminal,
        }
    }

    fn add(&mut self, kind: NodeKind, node_id: &str, fact_type: &str, fields: &[String]) {
        for field in fields {
            let ids = self
                .kind_index_mut(kind)
                .entry(fact_type.to_string())
                .or_default()
                .entry(field.clone())
                .or_default();
            // No node id twice under the same (fact_type, field) key.
            if !ids.iter().any(|existing| existing == node_id) {
                ids.push(node_id.to_string());
            }
        }
        self.registry
            .entry(node_id.to_string())
            .or_insert_with(|| {
                NodeReference::new(node_id, kind, fact_type, fields.to_vec())
            });
    }

    fn nodes_for_field(&self, fact_type: &str, field: &str) -> Vec<&NodeReference> {
        let mut out = Vec::new();
        for kind in [NodeKind::Alpha, NodeKind::Beta, NodeKind::Terminal] {
            if let Some(ids) = self
                .kind_index(kind)
                .get(fact_type)
                .and_then(|fields| fields.get(field))
            {
                for id in ids {
                    if let Some(node) = self.registry.get(id) {
                        out.push(node);
                    }
                }
            }
        }
        out
    }
}

/// Per-kind node counts and a rough memory estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Nodes registered in the alpha index
    pub alpha_nodes: usize,
    /// Nodes registered in the beta index
    pub beta_nodes: usize,
    /// Nodes registered in the terminal index
    pub terminal_nodes: usize,
    /// Total registered nodes
    pub total_nodes: usize,
    /// Fact types covered by any index
    pub fact_types: Vec<String>,
    /// Rough estimate of retained bytes
    pub approx_memory_bytes: usize,
    /// When the index was last built/cleared
    pub built_at: Option<DateTime<Utc>>,
}

/// Inverted index from `(fact_type, field)` to affected nodes.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    inner: RwLock<IndexInner>,
}

impl DependencyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                built_at: Some(Utc::now()),
                ..IndexInner::default()
            }),
        }
    }

    /// Registers an alpha node watching `fields` on `fact_type`.
    pub fn add_alpha(&self, node_id: &str, fact_type: &str, fields: &[String]) {
        self.inner
            .write()
            .add(NodeKind::Alpha, node_id, fact_type, fields);
    }

    /// Registers a beta node watching `fields` on `fact_type`.
    pub fn add_beta(&self, node_id: &str, fact_type: &str, fields: &[String]) {
        self.inner
            .write()
            .add(NodeKind::Beta, node_id, fact_type, fields);
    }

    /// Registers a terminal node watching `fields` on `fact_type`.
    pub fn add_terminal(&self, node_id: &str, fact_type: &str, fields: &[String]) {
        self.inner
            .write()
            .add(NodeKind::Terminal, node_id, fact_type, fields);
    }

    /// Nodes whose predicates depend on `(fact_type, field)`.
    ///
    /// Order within each kind is insertion order; no stability guarantee is
    /// exposed to callers. Unknown keys return an empty vector.
    pub fn affected_for_field(&self, fact_type: &str, field: &str) -> Vec<NodeReference> {
        let inner = self.inner.read();
        inner
            .nodes_for_field(fact_type, field)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Nodes affected by any field of `delta`, de-duplicated across fields.
    pub fn affected_for_delta(&self, delta: &FactDelta) -> Vec<NodeReference> {
        let inner = self.inner.read();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for field in delta.fields.keys() {
            for node in inner.nodes_for_field(&delta.fact_type, field) {
                if seen.insert(node.node_id.as_str()) {
                    out.push(node.clone());
                }
            }
        }
        out
    }

    /// Full reference for a registered node.
    pub fn node(&self, node_id: &str) -> Option<NodeReference> {
        self.inner.read().registry.get(node_id).cloned()
    }

    /// Total number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.inner.read().registry.len()
    }

    /// Atomically empties all maps and resets the built-at timestamp.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.alpha.clear();
        inner.beta.clear();
        inner.terminal.clear();
        inner.registry.clear();
        inner.built_at = Some(Utc::now());
    }

    /// Marks the index as freshly built.
    pub(crate) fn mark_built(&self) {
        self.inner.write().built_at = Some(Utc::now());
    }

    /// Counts, fact types, and a rough memory estimate.
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();

        let count_kind = |kind: NodeKind| {
            inner
                .registry
                .values()
                .filter(|node| node.kind == kind)
                .count()
        };

        let mut fact_types: HashSet<&String> = HashSet::new();
        let mut approx = 0usize;
        for index in [&inner.alpha, &inner.beta, &inner.terminal] {
            for (fact_type, fields) in index {
                fact_types.insert(fact_type);
                approx += fact_type.len();
                for (field, ids) in fields {
                    approx += field.len();
                    approx += ids.iter().map(|id| id.len() + 8).sum::<usize>();
                }
            }
        }
        for node in inner.registry.values() {
            approx += node.node_id.len()
                + node.fact_type.len()
                + node.watched_fields.iter().map(String::len).sum::<usize>()
                + 64;
        }

        let mut fact_types: Vec<String> = fact_types.into_iter().cloned().collect();
        fact_types.sort();

        IndexStats {
            alpha_nodes: count_kind(NodeKind::Alpha),
            beta_nodes: count_kind(NodeKind::Beta),
            terminal_nodes: count_kind(NodeKind::Terminal),
            total_nodes: inner.registry.len(),
            fact_types,
            approx_memory_bytes: approx,
            built_at: inner.built_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::delta::types::FieldDelta;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lookup_by_field() {
        let index = DependencyIndex::new();
        index.add_alpha("alpha_price", "Product", &fields(&["price"]));
        index.add_alpha("alpha_stock", "Product", &fields(&["stock", "status"]));
        index.add_terminal("term_update", "Product", &fields(&["price", "status"]));

        let affected = index.affected_for_field("Product", "price");
        let ids: Vec<&str> = affected.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha_price", "term_update"]);

        assert!(index.affected_for_field("Product", "missing").is_empty());
        assert!(index.affected_for_field("Order", "price").is_empty());
    }

    #[test]
    fn test_no_duplicate_ids_per_key() {
        let index = DependencyIndex::new();
        for _ in 0..5 {
            index.add_alpha("alpha_price", "Product", &fields(&["price"]));
        }
        assert_eq!(index.affected_for_field("Product", "price").len(), 1);
        assert_eq!(index.node_count(), 1);
    }

    #[test]
    fn test_affected_for_delta_dedups_across_fields() {
        let index = DependencyIndex::new();
        index.add_terminal("term_update", "Product", &fields(&["price", "status"]));
        index.add_alpha("alpha_price", "Product", &fields(&["price"]));

        let mut delta = FactDelta::new("Product~p1", "Product", 4);
        delta.fields.insert(
            "price".to_string(),
            FieldDelta::new("price", Value::Float(1.0), Value::Float(2.0)),
        );
        delta.fields.insert(
            "status".to_string(),
            FieldDelta::new("status", Value::from("a"), Value::from("b")),
        );

        let affected = index.affected_for_delta(&delta);
        assert_eq!(affected.len(), 2);
        let ids: HashSet<&str> = affected.iter().map(|n| n.node_id.as_str()).collect();
        assert!(ids.contains("term_update"));
        assert!(ids.contains("alpha_price"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let index = DependencyIndex::new();
        index.add_beta("join_1", "Order", &fields(&["customer_id"]));
        assert_eq!(index.node_count(), 1);

        index.clear();
        assert_eq!(index.node_count(), 0);
        assert!(index.affected_for_field("Order", "customer_id").is_empty());
        assert!(index.stats().built_at.is_some());
    }

    #[test]
    fn test_stats() {
        let index = DependencyIndex::new();
        index.add_alpha("a1", "Product", &fields(&["price"]));
        index.add_beta("b1", "Order", &fields(&["customer_id"]));
        index.add_terminal("t1", "Product", &fields(&["price"]));

        let stats = index.stats();
        assert_eq!(stats.alpha_nodes, 1);
        assert_eq!(stats.beta_nodes, 1);
        assert_eq!(stats.terminal_nodes, 1);
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.fact_types, vec!["Order", "Product"]);
        assert!(stats.approx_memory_bytes > 0);
    }

    #[test]
    fn test_concurrent_readers() {
        use std::sync::Arc;

        let index = Arc::new(DependencyIndex::new());
        index.add_alpha("a1", "Product", &fields(&["price"]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let idx = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    assert_eq!(idx.affected_for_field("Product", "price").len(), 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
