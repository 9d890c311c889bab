//! IR node representation.
//!
//! A node is an operator plus its input edges. Everything else - usage
//! (reverse) edges and the control predecessor/successor chain - lives in
//! side tables on the [`Graph`](super::graph::Graph), so a node stays small
//! and cheap to clone during duplication.

use super::arena::Id;
use super::operators::{Operator, ValueType};

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Maximum number of inline inputs before spilling to heap.
const INLINE_INPUTS: usize = 4;

/// Compact input list optimized for small node arity.
///
/// Most nodes have 0-4 inputs and stay inline; merges, frame states and
/// phis with many inputs spill to a Vec. Slots hold `NodeId::INVALID` for
/// absent optional inputs, so positions stay stable.
#[derive(Clone, PartialEq)]
pub enum InputList {
    Empty,
    Single(NodeId),
    Pair(NodeId, NodeId),
    Triple(NodeId, NodeId, NodeId),
    Quad(NodeId, NodeId, NodeId, NodeId),
    Many(Vec<NodeId>),
}

impl InputList {
    /// Create an empty input list.
    pub const fn empty() -> Self {
        InputList::Empty
    }

    /// Create from a slice.
    pub fn from_slice(inputs: &[NodeId]) -> Self {
        match inputs.len() {
            0 => InputList::Empty,
            1 => InputList::Single(inputs[0]),
            2 => InputList::Pair(inputs[0], inputs[1]),
            3 => InputList::Triple(inputs[0], inputs[1], inputs[2]),
            4 => InputList::Quad(inputs[0], inputs[1], inputs[2], inputs[3]),
            _ => InputList::Many(inputs.to_vec()),
        }
    }

    /// Number of input positions (absent optional slots included).
    pub fn len(&self) -> usize {
        match self {
            InputList::Empty => 0,
            InputList::Single(_) => 1,
            InputList::Pair(..) => 2,
            InputList::Triple(..) => 3,
            InputList::Quad(..) => 4,
            InputList::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot at `index`; `None` only when out of bounds.
    pub fn get(&self, index: usize) -> Option<NodeId> {
        match self {
            InputList::Empty => None,
            InputList::Single(a) => [*a].get(index).copied(),
            InputList::Pair(a, b) => [*a, *b].get(index).copied(),
            InputList::Triple(a, b, c) => [*a, *b, *c].get(index).copied(),
            InputList::Quad(a, b, c, d) => [*a, *b, *c, *d].get(index).copied(),
            InputList::Many(v) => v.get(index).copied(),
        }
    }

    /// Overwrite the slot at `index`. Out-of-bounds writes are ignored.
    pub fn set(&mut self, index: usize, value: NodeId) {
        match self {
            InputList::Single(a) if index == 0 => *a = value,
            InputList::Pair(a, b) => match index {
                0 => *a = value,
                1 => *b = value,
                _ => {}
            },
            InputList::Triple(a, b, c) => match index {
                0 => *a = value,
                1 => *b = value,
                2 => *c = value,
                _ => {}
            },
            InputList::Quad(a, b, c, d) => match index {
                0 => *a = value,
                1 => *b = value,
                2 => *c = value,
                3 => *d = value,
                _ => {}
            },
            InputList::Many(v) => {
                if index < v.len() {
                    v[index] = value;
                }
            }
            _ => {}
        }
    }

    /// Append a slot.
    pub fn push(&mut self, value: NodeId) {
        *self = match std::mem::take(self) {
            InputList::Empty => InputList::Single(value),
            InputList::Single(a) => InputList::Pair(a, value),
            InputList::Pair(a, b) => InputList::Triple(a, b, value),
            InputList::Triple(a, b, c) => InputList::Quad(a, b, c, value),
            InputList::Quad(a, b, c, d) => InputList::Many(vec![a, b, c, d, value]),
            InputList::Many(mut v) => {
                v.push(value);
                InputList::Many(v)
            }
        };
    }

    /// Insert a slot at `index`, shifting later slots up.
    pub fn insert(&mut self, index: usize, value: NodeId) {
        let mut v = self.to_vec();
        v.insert(index, value);
        *self = InputList::from_slice(&v);
    }

    /// Remove the slot at `index`, shifting later slots down.
    pub fn remove(&mut self, index: usize) -> NodeId {
        let mut v = self.to_vec();
        let removed = v.remove(index);
        *self = InputList::from_slice(&v);
        removed
    }

    /// First position holding `needle`.
    pub fn position_of(&self, needle: NodeId) -> Option<usize> {
        self.iter().position(|id| id == needle)
    }

    /// Iterate all slots, absent ones included.
    pub fn iter(&self) -> InputIter<'_> {
        InputIter {
            list: self,
            index: 0,
        }
    }

    /// Collect all slots.
    pub fn to_vec(&self) -> Vec<NodeId> {
        self.iter().collect()
    }
}

impl Default for InputList {
    fn default() -> Self {
        InputList::Empty
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", id)?;
        }
        write!(f, "]")
    }
}

/// Iterator over input slots.
pub struct InputIter<'a> {
    list: &'a InputList,
    index: usize,
}

impl<'a> Iterator for InputIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.list.get(self.index);
        self.index += 1;
        result
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for InputIter<'_> {}

// =============================================================================
// Node
// =============================================================================

/// A node in the IR graph.
#[derive(Clone)]
pub struct Node {
    /// The role this node plays.
    pub op: Operator,

    /// Input edges (data and control dependencies).
    pub inputs: InputList,

    /// Declared result type.
    pub ty: ValueType,

    /// Node properties.
    pub flags: NodeFlags,
}

impl Node {
    /// Create a node.
    pub fn new(op: Operator, inputs: InputList, ty: ValueType) -> Self {
        Node {
            op,
            inputs,
            ty,
            flags: NodeFlags::empty(),
        }
    }

    /// Whether this node has been deleted. Deletion is monotonic.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(NodeFlags::DELETED)
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.is_deleted()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_deleted() {
            write!(f, "<deleted> ")?;
        }
        write!(f, "{:?}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node has been deleted; its arena slot is never reused.
        const DELETED = 0b0000_0001;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
