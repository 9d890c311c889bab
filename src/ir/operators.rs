//! IR operator catalogue.
//!
//! Operators are a closed sum type over node *roles*: what a node is to the
//! control skeleton and the transformation passes, not what it computes.
//! Exhaustive matches replace runtime kind-check cascades. Arithmetic is
//! deliberately minimal - the transformations only care that such nodes are
//! pure floating values.
//!
//! # Input layouts
//!
//! Input positions are fixed per operator. `INVALID` is only legal at
//! positions [`Operator::is_optional_input`] reports as optional:
//!
//! - `Merge`:            `[state?, end...]`
//! - `LoopBegin{f}`:     `[state?, forward end x f, loop end...]`
//! - `LoopExit`:         `[state?, loop_begin]`
//! - `Invoke`:           `[state?, call_target]`
//! - `Phi`:              `[merge, value per end]` (values align by end index)
//! - `Proxy`:            `[value?, loop_exit]`  (value optional for guards)
//! - `FrameState{..}`:   `[slot x (locals+stack+locks), outer?, mapping...]`
//! - `VirtualState`:     `[object, entry...]`
//! - `MaterializedState`: `[object, value]`

// =============================================================================
// External identities
// =============================================================================

/// Identity of a compiled method, assigned by the surrounding compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Identity of a declared type, assigned by the surrounding runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

// =============================================================================
// Value types
// =============================================================================

/// Declared result type of a node.
///
/// This is the small slice of the target value model the transformations
/// need: enough to drive the two-slot rule during frame reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int32,
    Int64,
    Float32,
    Float64,
    Object,
    /// Control flow, not a value.
    Control,
    /// Guard/anchor dependency, not a value.
    Guard,
    /// Frame or escape state, not a value.
    State,
    Void,
}

impl ValueType {
    /// Whether values of this type occupy two interpreter slots.
    #[inline]
    pub const fn is_two_slot(self) -> bool {
        matches!(self, ValueType::Int64 | ValueType::Float64)
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Minimal arithmetic catalogue, used by tests and as generic floating work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

// =============================================================================
// Phi / Proxy kinds
// =============================================================================

/// What a phi merges: values or guard dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhiKind {
    Value,
    Guard,
}

/// What a proxy carries across its loop exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Value,
    Guard,
}

impl ProxyKind {
    /// The phi kind produced when this proxy is re-homed at a merge.
    #[inline]
    pub const fn phi_kind(self) -> PhiKind {
        match self {
            ProxyKind::Value => PhiKind::Value,
            ProxyKind::Guard => PhiKind::Guard,
        }
    }
}

// =============================================================================
// State payloads
// =============================================================================

/// Immutable-once-built shape of a frame state node.
///
/// `method` is the declaring method; `code` is the identity of the bytecode
/// the state's bci indexes into. They differ for synthetic/intrinsic frames,
/// which cannot be reconstructed (see `deopt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStateInfo {
    pub method: MethodId,
    pub code: MethodId,
    pub bci: i32,
    pub locals: u16,
    pub stack: u16,
    pub locks: u16,
    pub rethrow_exception: bool,
    pub during_call: bool,
}

impl FrameStateInfo {
    /// Total number of value slot inputs.
    #[inline]
    pub const fn slot_count(&self) -> usize {
        self.locals as usize + self.stack as usize + self.locks as usize
    }

    /// Whether this state can be rendered into an interpreter frame.
    #[inline]
    pub const fn can_produce_frame(&self) -> bool {
        self.method.0 == self.code.0
    }
}

/// Shape of an escape-analyzed object that was never allocated.
///
/// Carries field/element count and declared type only; storage is supplied
/// by the frame builder when the object has to be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualObjectInfo {
    pub type_id: TypeId,
    pub entry_count: u32,
    pub is_array: bool,
}

// =============================================================================
// Poison
// =============================================================================

/// Witness token for the teardown-only poison placeholder.
///
/// The field is private, so a `Operator::Poison` node can only be built
/// through [`PoisonToken::for_loop_teardown`], which is crate-internal and
/// called from exactly one place: dead-loop dismantling. A poison node is
/// never visible to a live optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonToken(());

impl PoisonToken {
    #[inline]
    pub(crate) fn for_loop_teardown() -> Self {
        PoisonToken(())
    }
}

// =============================================================================
// Operator
// =============================================================================

/// The role a node plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    // ---- floating values ----------------------------------------------------
    ConstInt(i64),
    /// Float constant, stored as bits so the operator stays `Eq`-comparable.
    ConstFloat(u64),
    ConstNone,
    Parameter(u16),
    Binary(ArithOp),

    // ---- control skeleton ---------------------------------------------------
    Start,
    Begin,
    /// Two successors: true begin, false begin.
    If,
    Return,
    /// Forward control edge into a merge.
    End,
    /// Back edge into its loop begin.
    LoopEnd,
    Merge,
    LoopBegin {
        /// Number of forward (entry) ends; inputs past these are loop ends.
        forward_ends: u32,
    },
    LoopExit,
    Invoke,

    // ---- floating control-adjacent ------------------------------------------
    CallTarget {
        method: MethodId,
    },
    Phi(PhiKind),
    Proxy(ProxyKind),

    // ---- deoptimization state -----------------------------------------------
    FrameState(FrameStateInfo),
    VirtualObject(VirtualObjectInfo),
    VirtualState,
    MaterializedState,

    // ---- teardown -----------------------------------------------------------
    Poison(PoisonToken),
}

impl Operator {
    /// Whether this node has a definite position in the control chain.
    #[inline]
    pub const fn is_fixed(&self) -> bool {
        matches!(
            self,
            Operator::Start
                | Operator::Begin
                | Operator::If
                | Operator::Return
                | Operator::End
                | Operator::LoopEnd
                | Operator::Merge
                | Operator::LoopBegin { .. }
                | Operator::LoopExit
                | Operator::Invoke
        )
    }

    /// Pure value with no fixed control position, kept alive by usages only.
    #[inline]
    pub const fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Either kind of control edge into a merge.
    #[inline]
    pub const fn is_end(&self) -> bool {
        matches!(self, Operator::End | Operator::LoopEnd)
    }

    /// Join point owning ends and phis.
    #[inline]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Operator::Merge | Operator::LoopBegin { .. })
    }

    #[inline]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi(_))
    }

    #[inline]
    pub const fn is_proxy(&self) -> bool {
        matches!(self, Operator::Proxy(_))
    }

    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::ConstInt(_) | Operator::ConstFloat(_) | Operator::ConstNone
        )
    }

    /// First node of a basic block.
    #[inline]
    pub const fn is_block_begin(&self) -> bool {
        matches!(
            self,
            Operator::Start
                | Operator::Begin
                | Operator::Merge
                | Operator::LoopBegin { .. }
                | Operator::LoopExit
        )
    }

    /// Whether input 0 is a reserved, optional frame-state slot.
    #[inline]
    pub const fn has_state_slot(&self) -> bool {
        matches!(
            self,
            Operator::Merge | Operator::LoopBegin { .. } | Operator::LoopExit | Operator::Invoke
        )
    }

    /// Whether the input at `index` may legally be `INVALID` on an alive node.
    pub fn is_optional_input(&self, index: usize) -> bool {
        match self {
            op if op.has_state_slot() => index == 0,
            Operator::Return => index == 0,
            Operator::Proxy(ProxyKind::Guard) => index == 0,
            // Slot values (dead locals, two-slot upper halves) and the outer
            // state may be absent; mapping inputs may not.
            Operator::FrameState(info) => index <= info.slot_count(),
            // Entry slots use INVALID as the upper-half filler of a
            // two-slot primitive.
            Operator::VirtualState => index >= 1,
            _ => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_predicates() {
        assert!(Operator::Merge.is_fixed());
        assert!(Operator::Merge.is_merge());
        assert!(Operator::LoopBegin { forward_ends: 1 }.is_merge());
        assert!(Operator::End.is_end());
        assert!(Operator::LoopEnd.is_end());
        assert!(Operator::Phi(PhiKind::Value).is_floating());
        assert!(Operator::Proxy(ProxyKind::Guard).is_floating());
        assert!(!Operator::ConstInt(3).is_fixed());
    }

    #[test]
    fn test_optional_inputs() {
        assert!(Operator::Merge.is_optional_input(0));
        assert!(!Operator::Merge.is_optional_input(1));
        assert!(Operator::LoopExit.is_optional_input(0));
        assert!(Operator::Proxy(ProxyKind::Guard).is_optional_input(0));
        assert!(!Operator::Proxy(ProxyKind::Value).is_optional_input(0));

        let info = FrameStateInfo {
            method: MethodId(1),
            code: MethodId(1),
            bci: 0,
            locals: 2,
            stack: 1,
            locks: 0,
            rethrow_exception: false,
            during_call: false,
        };
        let fs = Operator::FrameState(info);
        assert!(fs.is_optional_input(0)); // slot
        assert!(fs.is_optional_input(3)); // outer
        assert!(!fs.is_optional_input(4)); // mapping
    }

    #[test]
    fn test_frame_state_info() {
        let info = FrameStateInfo {
            method: MethodId(7),
            code: MethodId(8),
            bci: 12,
            locals: 3,
            stack: 2,
            locks: 1,
            rethrow_exception: false,
            during_call: true,
        };
        assert_eq!(info.slot_count(), 6);
        assert!(!info.can_produce_frame());
    }

    #[test]
    fn test_two_slot_types() {
        assert!(ValueType::Int64.is_two_slot());
        assert!(ValueType::Float64.is_two_slot());
        assert!(!ValueType::Int32.is_two_slot());
        assert!(!ValueType::Object.is_two_slot());
    }
}
