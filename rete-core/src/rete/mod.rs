//! RETE node references and the network capability surface.
//!
//! The propagation core does not own the RETE network; it reads it through
//! the narrow [`ReteNetwork`] capability and addresses nodes through
//! [`NodeReference`] records. Alpha-chain construction, tokens, and rule
//! actions live outside this crate.

pub mod network;
pub mod node;

pub use network::{NetworkNode, ReteNetwork, StaticNetwork};
pub use node::{NodeKind, NodeReference};
