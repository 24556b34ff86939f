//! Error types for the propagation engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during incremental propagation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required collaborator (propagator, index, network) is absent.
    #[error("component not initialized: {component} (in {function}): {message}")]
    ComponentNotInitialized {
        /// Name of the missing component
        component: String,
        /// Function that required it
        function: String,
        /// Human-readable explanation
        message: String,
    },

    /// A configuration value violates a documented constraint.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// Offending configuration field
        field: String,
        /// Why the value is rejected
        reason: String,
    },

    /// Malformed input at the detector boundary.
    #[error("invalid fact {fact_id} ({fact_type}): {reason}")]
    InvalidFact {
        /// Identifier of the offending fact
        fact_id: String,
        /// Declared fact type
        fact_type: String,
        /// Why the fact is rejected
        reason: String,
    },

    /// Wraps a detector-internal failure.
    #[error("delta detection failed: {message}")]
    DetectionFailed {
        /// Inner failure description
        message: String,
    },

    /// Per-node callback error during delta propagation.
    #[error("propagation failed at node {node_id}: {message}")]
    PropagationFailed {
        /// Node whose delivery failed
        node_id: String,
        /// Inner failure description
        message: String,
    },

    /// The storage-update callback failed.
    #[error("storage update failed: {message}")]
    StorageUpdateFailed {
        /// Inner failure description
        message: String,
    },

    /// Propagation was cancelled through the caller-supplied token.
    #[error("propagation cancelled")]
    Cancelled,

    /// Propagation exceeded the configured wall-clock timeout.
    #[error("propagation timed out after {timeout_ms}ms")]
    TimedOut {
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// A required callback was never installed.
    #[error("callback not configured: {role}")]
    CallbackNotConfigured {
        /// Which callback role is missing
        role: String,
    },
}

impl EngineError {
    /// Creates a propagation error for a node, wrapping another error.
    pub fn propagation(node_id: impl Into<String>, inner: &dyn std::fmt::Display) -> Self {
        EngineError::PropagationFailed {
            node_id: node_id.into(),
            message: inner.to_string(),
        }
    }

    /// Creates a missing-callback error for the given role.
    pub fn missing_callback(role: &str) -> Self {
        EngineError::CallbackNotConfigured {
            role: role.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::CallbackNotConfigured {
            role: "classic_propagate".to_string(),
        };
        assert_eq!(err.to_string(), "callback not configured: classic_propagate");

        let err = EngineError::TimedOut { timeout_ms: 30000 };
        assert!(err.to_string().contains("30000"));
    }

    #[test]
    fn test_propagation_helper() {
        let inner = EngineError::Cancelled;
        let err = EngineError::propagation("alpha_price", &inner);
        match err {
            EngineError::PropagationFailed { node_id, message } => {
                assert_eq!(node_id, "alpha_price");
                assert_eq!(message, "propagation cancelled");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
