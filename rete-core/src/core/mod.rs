//! Core domain types shared by the whole engine.
//!
//! This module contains the pieces every other subsystem builds on: the
//! crate-wide error type, the tagged [`Value`] model with its configurable
//! comparator, and the fact model.

pub mod error;
pub mod fact;
pub mod value;

pub use error::{EngineError, Result};
pub use fact::{compose_fact_id, split_fact_id, Fact, FieldMap};
pub use value::{Value, ValueComparator, ValueKind};
