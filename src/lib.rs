//! Graph-based JIT intermediate representation and transformation utilities.
//!
//! This crate provides the mutable IR that optimization passes rewrite and
//! the machinery that keeps it structurally consistent while they do:
//! - Sea-of-Nodes style graph with explicit use-def and control edges
//! - Dead control-flow elimination that tears down whole loops safely
//! - Loop fragment duplication for peeling and unrolling
//! - Redundancy collapse on merge/phi/proxy constructs
//! - Interpreter frame reconstruction for deoptimization
#![deny(unsafe_op_in_unsafe_fn)]
pub mod deopt;
pub mod ir;
pub mod transform;

pub use ir::graph::Graph;
pub use ir::node::{Node, NodeId};
