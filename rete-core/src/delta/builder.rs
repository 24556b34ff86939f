//! Dependency-index construction from an existing network.
//!
//! The builder rebuilds from scratch, so it is safe to call after structural
//! rule edits. It never panics on missing collections or attributes: a node
//! without a resolvable fact type is registered under `"Unknown"` with a
//! warning, and a node advertising zero fields is still registered (with an
//! empty field set) so the façade can treat it through the classic path.

use tracing::{debug, warn};

use crate::rete::network::{NetworkNode, ReteNetwork};
use crate::rete::node::NodeKind;

use super::extractor::{action_fields, alpha_condition_fields, beta_join_fields};
use super::index::DependencyIndex;

/// Fact type recorded for nodes that advertise neither a variable name nor a
/// type name.
pub const UNKNOWN_FACT_TYPE: &str = "Unknown";

/// Diagnostics accumulated during a build.
#[derive(Debug, Clone, Default)]
pub struct BuildDiagnostics {
    /// Nodes successfully registered
    pub nodes_processed: usize,
    /// Nodes skipped (currently only nodes with an empty id)
    pub nodes_skipped: usize,
    /// Total field names extracted
    pub fields_extracted: usize,
    /// Hard errors (none abort the rebuild)
    pub errors: Vec<String>,
    /// Soft findings: unknown fact types, zero-field nodes
    pub warnings: Vec<String>,
}

/// Builds a [`DependencyIndex`] by traversing a network's node collections.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    diagnostics_enabled: bool,
}

impl IndexBuilder {
    /// Creates a builder with diagnostics disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables diagnostics accumulation.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics_enabled = enabled;
        self
    }

    /// Builds a fresh index from the network's alpha, beta, and terminal
    /// collections.
    pub fn build_from_network(
        &self,
        network: &dyn ReteNetwork,
    ) -> (DependencyIndex, BuildDiagnostics) {
        let index = DependencyIndex::new();
        let mut diag = BuildDiagnostics::default();

        for node in network.alpha_nodes() {
            self.register(&index, &node, &mut diag);
        }
        for node in network.beta_nodes() {
            self.register(&index, &node, &mut diag);
        }
        for node in network.terminal_nodes() {
            self.register(&index, &node, &mut diag);
        }

        index.mark_built();
        debug!(
            nodes = diag.nodes_processed,
            fields = diag.fields_extracted,
            warnings = diag.warnings.len(),
            "dependency index built"
        );
        (index, diag)
    }

    fn register(&self, index: &DependencyIndex, node: &NetworkNode, diag: &mut BuildDiagnostics) {
        if node.node_id.is_empty() {
            diag.nodes_skipped += 1;
            if self.diagnostics_enabled {
                diag.errors
                    .push(format!("{:?} node with empty id skipped", node.kind));
            }
            return;
        }

        let fact_type = self.resolve_fact_type(node, diag);
        let fields = self.extract_fields(node);

        if fields.is_empty() {
            warn!(node_id = %node.node_id, "node advertises no fields; registered with empty field set");
            if self.diagnostics_enabled {
                diag.warnings.push(format!(
                    "node {} advertises no fields; it will only be reached through the classic path",
                    node.node_id
                ));
            }
        }

        match node.kind {
            NodeKind::Alpha => index.add_alpha(&node.node_id, &fact_type, &fields),
            NodeKind::Beta => index.add_beta(&node.node_id, &fact_type, &fields),
            NodeKind::Terminal => index.add_terminal(&node.node_id, &fact_type, &fields),
        }

        diag.nodes_processed += 1;
        diag.fields_extracted += fields.len();
    }

    fn resolve_fact_type(&self, node: &NetworkNode, diag: &mut BuildDiagnostics) -> String {
        if let Some(name) = node.variable_name.as_deref().filter(|s| !s.is_empty()) {
            return name.to_string();
        }
        if let Some(name) = node.type_name.as_deref().filter(|s| !s.is_empty()) {
            return name.to_string();
        }
        warn!(node_id = %node.node_id, "node has no fact type; using \"Unknown\"");
        if self.diagnostics_enabled {
            diag.warnings
                .push(format!("node {} has no fact type", node.node_id));
        }
        UNKNOWN_FACT_TYPE.to_string()
    }

    fn extract_fields(&self, node: &NetworkNode) -> Vec<String> {
        let mut fields = Vec::new();
        if let Some(condition) = &node.condition {
            let extracted = match node.kind {
                NodeKind::Beta => beta_join_fields(condition),
                _ => alpha_condition_fields(condition),
            };
            for field in extracted {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        if let Some(action) = &node.action {
            for field in action_fields(action) {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }
}
