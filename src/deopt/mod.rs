//! Deoptimization frame reconstruction.
//!
//! When compiled code bails out, the runtime resumes execution in the
//! interpreter at the bci recorded by a frame state. This module renders a
//! frame state subtree into the machine-level description the runtime
//! needs to rebuild those interpreter frames:
//! - **`kind`** - interpreter slot kinds and machine value locations
//! - **`frame_builder`** - walks the state chain and its escape-object
//!   mappings and produces an [`frame_builder::FrameSnapshot`]
//!
//! Rendering is read-only with respect to the graph; all mutation of state
//! subtrees happens in `ir::state` and the transformation passes.

use std::error::Error;
use std::fmt;

use crate::ir::node::NodeId;
use crate::ir::operators::MethodId;

pub mod frame_builder;
pub mod kind;

pub use frame_builder::{
    BuildObserver, ConstValue, CountingObserver, FrameBuilder, FrameSnapshot, FrameValue,
    InterpreterFrame, NullObserver, SlotClass, TypeLayouts, ValueLocator, VirtualObjectValue,
};
pub use kind::{SlotKind, ValueLocation};

// =============================================================================
// Errors
// =============================================================================

/// Failure while rendering a frame state into an interpreter frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The state describes a synthetic or intrinsic frame whose bci does not
    /// index the declaring method's bytecode.
    NonReconstructible { method: MethodId, bci: i32 },
    /// A virtual object with fields is referenced but no state in the chain
    /// maps it.
    MissingVirtualMapping { object: NodeId },
    /// A live value has no register or stack slot assigned.
    UnallocatedValue { node: NodeId },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NonReconstructible { method, bci } => write!(
                f,
                "frame at bci {} of method {} cannot be reconstructed",
                bci, method.0
            ),
            FrameError::MissingVirtualMapping { object } => {
                write!(f, "no escape mapping for virtual object {:?}", object)
            }
            FrameError::UnallocatedValue { node } => {
                write!(f, "no machine location for value {:?}", node)
            }
        }
    }
}

impl Error for FrameError {}
