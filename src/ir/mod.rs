//! Graph-based intermediate representation.
//!
//! # Components
//!
//! - **Arena**: typed index allocation, side tables and node bitmaps
//! - **Operators**: the closed set of node roles and their payloads
//! - **Node**: compact node storage with inline input lists
//! - **Graph**: edge-symmetric mutable graph with control chain
//! - **State**: frame state and escape state traversal helpers

pub mod arena;
pub mod graph;
pub mod node;
pub mod operators;
pub mod state;

pub use arena::{Arena, Id, NodeBitMap, SecondaryMap};
pub use graph::{Graph, NodeWorklist};
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{
    ArithOp, FrameStateInfo, MethodId, Operator, PhiKind, ProxyKind, TypeId, ValueType,
    VirtualObjectInfo,
};
