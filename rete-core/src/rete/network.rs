//! Network capability surface.
//!
//! The index builder reads an existing network through [`ReteNetwork`]:
//! iterate alpha/beta/terminal nodes, and for each get a fact type and the
//! opaque condition/action ASTs. The trait deliberately knows nothing about
//! the rule language; conditions and actions are tagged `serde_json::Value`
//! trees consumed through the field extractor.

use serde::{Deserialize, Serialize};

use super::node::NodeKind;

/// A node as advertised by the surrounding network.
///
/// `variable_name` takes precedence over `type_name` when the builder
/// resolves the fact type; nodes advertising neither are registered under
/// `"Unknown"` with a diagnostic warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Unique node identifier
    pub node_id: String,
    /// Tier of the node
    pub kind: NodeKind,
    /// Variable name bound to the matched fact, if any
    pub variable_name: Option<String>,
    /// Declared fact type name, if any
    pub type_name: Option<String>,
    /// Opaque condition AST (alpha test or beta join), if any
    pub condition: Option<serde_json::Value>,
    /// Opaque action AST, if any
    pub action: Option<serde_json::Value>,
}

impl NetworkNode {
    /// Creates a bare node with the given id and kind.
    pub fn new(node_id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            variable_name: None,
            type_name: None,
            condition: None,
            action: None,
        }
    }

    /// Sets the bound variable name.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    /// Sets the declared type name.
    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Sets the condition AST.
    pub fn with_condition(mut self, ast: serde_json::Value) -> Self {
        self.condition = Some(ast);
        self
    }

    /// Sets the action AST.
    pub fn with_action(mut self, ast: serde_json::Value) -> Self {
        self.action = Some(ast);
        self
    }
}

/// Read-only view of an existing RETE network.
pub trait ReteNetwork: Send + Sync {
    /// All alpha nodes currently in the network.
    fn alpha_nodes(&self) -> Vec<NetworkNode>;

    /// All beta nodes currently in the network.
    fn beta_nodes(&self) -> Vec<NetworkNode>;

    /// All terminal nodes currently in the network.
    fn terminal_nodes(&self) -> Vec<NetworkNode>;

    /// Total node count across all tiers.
    fn node_count(&self) -> usize {
        self.alpha_nodes().len() + self.beta_nodes().len() + self.terminal_nodes().len()
    }
}

/// In-memory [`ReteNetwork`] used by tests, the demo binary, and as a
/// reference for integrators.
#[derive(Debug, Clone, Default)]
pub struct StaticNetwork {
    alphas: Vec<NetworkNode>,
    betas: Vec<NetworkNode>,
    terminals: Vec<NetworkNode>,
}

impl StaticNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the tier matching its kind.
    pub fn add_node(&mut self, node: NetworkNode) {
        match node.kind {
            NodeKind::Alpha => self.alphas.push(node),
            NodeKind::Beta => self.betas.push(node),
            NodeKind::Terminal => self.terminals.push(node),
        }
    }

    /// Builder-style [`Self::add_node`].
    pub fn with_node(mut self, node: NetworkNode) -> Self {
        self.add_node(node);
        self
    }
}

impl ReteNetwork for StaticNetwork {
    fn alpha_nodes(&self) -> Vec<NetworkNode> {
        self.alphas.clone()
    }

    fn beta_nodes(&self) -> Vec<NetworkNode> {
        self.betas.clone()
    }

    fn terminal_nodes(&self) -> Vec<NetworkNode> {
        self.terminals.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_network_tiers() {
        let net = StaticNetwork::new()
            .with_node(NetworkNode::new("a1", NodeKind::Alpha))
            .with_node(NetworkNode::new("b1", NodeKind::Beta))
            .with_node(NetworkNode::new("t1", NodeKind::Terminal))
            .with_node(NetworkNode::new("a2", NodeKind::Alpha));

        assert_eq!(net.alpha_nodes().len(), 2);
        assert_eq!(net.beta_nodes().len(), 1);
        assert_eq!(net.terminal_nodes().len(), 1);
        assert_eq!(net.node_count(), 4);
    }

    #[test]
    fn test_node_builder() {
        let node = NetworkNode::new("a1", NodeKind::Alpha)
            .with_variable("Product")
            .with_condition(serde_json::json!({
                "type": "comparison",
                "left": { "type": "fieldAccess", "field": "price" },
                "right": 100
            }));
        assert_eq!(node.variable_name.as_deref(), Some("Product"));
        assert!(node.condition.is_some());
        assert!(node.action.is_none());
    }
}
