//! Graph transformation passes.
//!
//! # Components
//!
//! - **Kill**: dead control-flow and dataflow elimination, including full
//!   dismantling of loops that lost their entry
//! - **Fragment**: loop fragment computation, duplication and early-exit
//!   merging
//! - **Simplify**: redundant phi/proxy elimination and loop normalization

use std::fmt;

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;

pub mod fragment;
pub mod kill;
pub mod simplify;

pub use fragment::LoopFragment;
pub use kill::{kill_cfg, kill_with_unused_floating_inputs, try_kill_unused, unproxify};
pub use simplify::{
    check_redundant_phi, check_redundant_proxy, normalize_loops, reduce_degenerate_loop_begin,
    reduce_trivial_merge,
};

// =============================================================================
// Errors
// =============================================================================

/// Failure of a graph transformation.
///
/// These abort the current compilation; none is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformError {
    /// The control-flow and dataflow replacement policies disagreed about
    /// the same node during fragment duplication. Indicates a miscomputed
    /// fragment boundary.
    DuplicationConflict {
        node: NodeId,
        cfg_replacement: NodeId,
        data_replacement: NodeId,
    },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::DuplicationConflict {
                node,
                cfg_replacement,
                data_replacement,
            } => write!(
                f,
                "conflicting duplication replacements for {:?}: control fix {:?} vs data fix {:?}",
                node, cfg_replacement, data_replacement
            ),
        }
    }
}

impl std::error::Error for TransformError {}

// =============================================================================
// Tracing
// =============================================================================

/// Coarse-grained observation hook for graph transformations.
///
/// All methods default to no-ops; implementations must not mutate the graph
/// and their presence never changes transformation behavior.
pub trait GraphTrace {
    fn before_kill(&mut self, _graph: &Graph, _node: NodeId) {}
    fn after_kill(&mut self, _graph: &Graph, _node: NodeId) {}
    fn loop_dismantled(&mut self, _graph: &Graph, _begin: NodeId) {}
    fn after_duplication(&mut self, _graph: &Graph, _duplicated: usize) {}
}

/// The default trace: observes nothing.
pub struct NullTrace;

impl GraphTrace for NullTrace {}
