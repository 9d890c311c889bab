//! Frame state and escape state helpers.
//!
//! A frame state records the interpreter-visible values at one program
//! point: local slots, operand stack slots and lock slots, an optional
//! caller state, and one mapping per escape-analyzed object that is still
//! virtual at that point. The helpers here navigate and clone that subtree;
//! rendering it into a machine-level frame lives in `deopt`.

use rustc_hash::FxHashMap;

use super::arena::NodeBitMap;
use super::graph::Graph;
use super::node::{Node, NodeId};
use super::operators::{FrameStateInfo, Operator};

impl Graph {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a frame state node.
    ///
    /// `slots` must hold exactly `info.slot_count()` entries in
    /// locals-stack-locks order; INVALID marks a dead or elided slot.
    pub fn add_frame_state(
        &mut self,
        info: FrameStateInfo,
        slots: &[NodeId],
        outer: NodeId,
        mappings: &[NodeId],
    ) -> NodeId {
        debug_assert_eq!(slots.len(), info.slot_count());
        let mut inputs = Vec::with_capacity(slots.len() + 1 + mappings.len());
        inputs.extend_from_slice(slots);
        inputs.push(outer);
        inputs.extend_from_slice(mappings);
        self.add_node(Operator::FrameState(info), &inputs)
    }

    /// Mapping for an object that is still virtual: its field/element values.
    pub fn add_virtual_state(&mut self, object: NodeId, entries: &[NodeId]) -> NodeId {
        debug_assert!(matches!(self.op(object), Operator::VirtualObject(_)));
        let mut inputs = Vec::with_capacity(1 + entries.len());
        inputs.push(object);
        inputs.extend_from_slice(entries);
        self.add_node(Operator::VirtualState, &inputs)
    }

    /// Mapping for an object that escaped and was allocated: the allocation.
    pub fn add_materialized_state(&mut self, object: NodeId, value: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(object), Operator::VirtualObject(_)));
        self.add_node(Operator::MaterializedState, &[object, value])
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Payload of a frame state node. Panics on any other role.
    #[inline]
    pub fn frame_state_info(&self, state: NodeId) -> FrameStateInfo {
        match self.op(state) {
            Operator::FrameState(info) => info,
            op => panic!("not a frame state: {:?}", op),
        }
    }

    /// Slot `index` in the flat locals-stack-locks order.
    #[inline]
    pub fn state_slot_at(&self, state: NodeId, index: usize) -> NodeId {
        debug_assert!(index < self.frame_state_info(state).slot_count());
        self.input(state, index)
    }

    pub fn local_at(&self, state: NodeId, index: usize) -> NodeId {
        let info = self.frame_state_info(state);
        debug_assert!(index < info.locals as usize);
        self.input(state, index)
    }

    pub fn stack_at(&self, state: NodeId, index: usize) -> NodeId {
        let info = self.frame_state_info(state);
        debug_assert!(index < info.stack as usize);
        self.input(state, info.locals as usize + index)
    }

    pub fn lock_at(&self, state: NodeId, index: usize) -> NodeId {
        let info = self.frame_state_info(state);
        debug_assert!(index < info.locks as usize);
        self.input(state, info.locals as usize + info.stack as usize + index)
    }

    /// The caller's state, INVALID for the outermost frame.
    #[inline]
    pub fn outer_frame_state(&self, state: NodeId) -> NodeId {
        let info = self.frame_state_info(state);
        self.input(state, info.slot_count())
    }

    /// Escape-object mappings attached to this state (outer states excluded).
    pub fn virtual_mappings(&self, state: NodeId) -> Vec<NodeId> {
        let info = self.frame_state_info(state);
        let first = info.slot_count() + 1;
        (first..self.input_count(state))
            .map(|i| self.input(state, i))
            .collect()
    }

    /// The virtual object a mapping describes.
    #[inline]
    pub fn mapping_object(&self, mapping: NodeId) -> NodeId {
        debug_assert!(matches!(
            self.op(mapping),
            Operator::VirtualState | Operator::MaterializedState
        ));
        self.input(mapping, 0)
    }

    /// The allocated replacement of a materialized mapping.
    #[inline]
    pub fn materialized_value(&self, mapping: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(mapping), Operator::MaterializedState));
        self.input(mapping, 1)
    }

    /// Field/element values of a still-virtual mapping.
    pub fn virtual_entries(&self, mapping: NodeId) -> Vec<NodeId> {
        debug_assert!(matches!(self.op(mapping), Operator::VirtualState));
        (1..self.input_count(mapping))
            .map(|i| self.input(mapping, i))
            .collect()
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Apply `f` to every escape-object mapping reachable from `state`,
    /// walking the outer chain.
    pub fn apply_to_virtual<F>(&self, state: NodeId, mut f: F)
    where
        F: FnMut(NodeId),
    {
        let mut current = state;
        while current.is_valid() {
            for mapping in self.virtual_mappings(current) {
                if mapping.is_valid() {
                    f(mapping);
                }
            }
            current = self.outer_frame_state(current);
        }
    }

    /// Mark the state node, its outer chain and all mappings. Shared value
    /// and object inputs are not part of the subtree.
    pub fn state_subtree(&self, state: NodeId) -> NodeBitMap<Node> {
        let mut map = self.create_node_bitmap();
        let mut current = state;
        while current.is_valid() {
            map.mark(current);
            for mapping in self.virtual_mappings(current) {
                if mapping.is_valid() {
                    map.mark(mapping);
                }
            }
            current = self.outer_frame_state(current);
        }
        map
    }

    /// Whether `node` belongs to the subtree of `state` (the state itself,
    /// its outer states, or any of their mappings).
    pub fn is_part_of_state(&self, state: NodeId, node: NodeId) -> bool {
        let mut current = state;
        while current.is_valid() {
            if current == node {
                return true;
            }
            if self.virtual_mappings(current).contains(&node) {
                return true;
            }
            current = self.outer_frame_state(current);
        }
        false
    }

    /// Clone a frame state together with its outer chain and mappings.
    ///
    /// Value and object inputs stay shared between original and copy; only
    /// the state skeleton is duplicated.
    pub fn duplicate_state_subtree(&mut self, state: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(state), Operator::FrameState(_)));
        // Outer states first so inner copies can reference them.
        let mut chain = Vec::new();
        let mut current = state;
        while current.is_valid() {
            chain.push(current);
            current = self.outer_frame_state(current);
        }
        let mut copies: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for &original in chain.iter().rev() {
            let info = self.frame_state_info(original);
            let slots: Vec<NodeId> =
                (0..info.slot_count()).map(|i| self.input(original, i)).collect();
            let outer = self.outer_frame_state(original);
            let outer_copy = if outer.is_valid() { copies[&outer] } else { NodeId::INVALID };
            let mappings: Vec<NodeId> = self
                .virtual_mappings(original)
                .into_iter()
                .map(|m| self.duplicate_mapping(m))
                .collect();
            let copy = self.add_frame_state(info, &slots, outer_copy, &mappings);
            copies.insert(original, copy);
        }
        copies[&state]
    }

    fn duplicate_mapping(&mut self, mapping: NodeId) -> NodeId {
        let inputs = self.inputs(mapping);
        let op = self.op(mapping);
        self.add_node(op, &inputs)
    }
}

// =============================================================================
// Tests
// =============================================================================
