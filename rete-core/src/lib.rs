//! Forward-chaining RETE rule engine core with incremental (delta) propagation.
//!
//! Users submit typed facts (heterogeneous attribute maps) and rules; the
//! engine materializes a dataflow network that continuously re-derives which
//! rule activations hold. This crate implements the incremental propagation
//! subsystem: instead of retracting and re-asserting a fact across the whole
//! network on every update, it detects the exact set of field-level changes
//! and delivers them only to the nodes whose predicates depend on the fields
//! that actually changed.
//!
//! # Architecture
//!
//! - [`core`] - error type, tagged value model, fact model
//! - [`rete`] - node references and the network capability surface
//! - [`delta`] - the incremental propagation subsystem (detector, dependency
//!   index, LRU cache, pools, strategies, propagator, metrics, façade)
//!
//! # Quick start
//!
//! ```no_run
//! use rete_core::delta::{DeltaEngine, EngineConfig};
//! use rete_core::core::{FieldMap, Value};
//! use std::sync::Arc;
//!
//! # async fn run() -> rete_core::core::Result<()> {
//! let engine = DeltaEngine::new(EngineConfig::default())
//!     .with_node_delivery(Arc::new(|node_id, delta| {
//!         Box::pin(async move {
//!             println!("{node_id} <- {} changed fields", delta.fields.len());
//!             Ok(())
//!         })
//!     }));
//!
//! let mut old = FieldMap::new();
//! old.insert("price".to_string(), Value::Float(100.0));
//! let mut new = old.clone();
//! new.insert("price".to_string(), Value::Float(150.0));
//!
//! let outcome = engine.process_update(&old, &new, "Product~p123", "Product").await?;
//! println!("mode: {:?}", outcome.mode);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod delta;
pub mod rete;

pub use crate::core::{EngineError, FieldMap, Result, Value};
pub use crate::delta::{DeltaEngine, EngineConfig, FactDelta, FieldDelta};
pub use crate::rete::{NodeKind, NodeReference, ReteNetwork};
