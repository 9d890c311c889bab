//! Mutable IR graph.
//!
//! The graph owns all nodes of one compilation unit and maintains three edge
//! relations:
//! - **Inputs**: stored on the node itself (data and control dependencies)
//! - **Usages**: reverse of inputs, kept in a side table
//! - **Control chain**: predecessor/successor links between fixed nodes
//!
//! Inputs and usages are kept symmetric at all times (except inside the
//! atomic deletion sequences in `transform::kill`, which restore symmetry
//! before returning), as are successor and predecessor links. `verify`
//! checks both symmetries plus null-input legality, and is compiled only
//! under debug assertions - the checks are too costly for the hot
//! compilation path.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{Arena, NodeBitMap, SecondaryMap};
use super::node::{InputList, Node, NodeFlags, NodeId};
use super::operators::{ArithOp, Operator, PhiKind, ProxyKind, ValueType};

// =============================================================================
// Graph
// =============================================================================

/// A mutable graph of IR nodes.
///
/// One graph per compilation unit, owned by one thread. Nodes are never
/// shared across compilations.
#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    /// Reverse edges: for each node, the nodes that have it as an input.
    usages: SecondaryMap<Node, Vec<NodeId>>,
    /// Single control predecessor of each fixed node (INVALID if detached).
    preds: SecondaryMap<Node, NodeId>,
    /// Control successors of each fixed node. Slots may be INVALID after a
    /// branch has been detached.
    succs: SecondaryMap<Node, SmallVec<[NodeId; 2]>>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Graph {
            nodes: Arena::with_capacity(64),
            usages: SecondaryMap::new(),
            preds: SecondaryMap::new(),
            succs: SecondaryMap::new(),
        }
    }

    // =========================================================================
    // Node access
    // =========================================================================

    /// Get a node. Panics on an ID from another graph.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of node slots ever allocated (deleted slots included).
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` refers to an alive node.
    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        id.is_valid() && self.nodes.get(id).is_some_and(Node::is_alive)
    }

    #[inline]
    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.nodes[id].is_deleted()
    }

    /// The operator of a node.
    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    /// Declared type of a node.
    #[inline]
    pub fn ty(&self, id: NodeId) -> ValueType {
        self.nodes[id].ty
    }

    /// Iterate all alive nodes.
    pub fn alive_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| n.is_alive())
            .map(|(id, _)| id)
    }

    /// Create a membership bitmap sized for the current node universe.
    pub fn create_node_bitmap(&self) -> NodeBitMap<Node> {
        NodeBitMap::with_capacity(self.nodes.len())
    }

    // =========================================================================
    // Node creation
    // =========================================================================

    /// Add a node with an explicit type.
    pub fn add_node_typed(&mut self, op: Operator, inputs: &[NodeId], ty: ValueType) -> NodeId {
        let list = InputList::from_slice(inputs);
        let id = self.nodes.alloc(Node::new(op, list, ty));
        for input in inputs.iter().copied().filter(|i| i.is_valid()) {
            self.usages.entry(input).push(id);
        }
        id
    }

    /// Add a node, deriving the type from its role.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let ty = match op {
            Operator::ConstInt(_) => ValueType::Int64,
            Operator::ConstFloat(_) => ValueType::Float64,
            Operator::Binary(_) => ValueType::Int64,
            Operator::Phi(PhiKind::Guard) | Operator::Proxy(ProxyKind::Guard) => ValueType::Guard,
            Operator::FrameState(_) | Operator::VirtualState | Operator::MaterializedState => {
                ValueType::State
            }
            Operator::Poison(_) => ValueType::Void,
            op if op.is_fixed() => ValueType::Control,
            _ => ValueType::Object,
        };
        self.add_node_typed(op, inputs, ty)
    }

    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.add_node(Operator::ConstInt(value), &[])
    }

    pub fn const_float(&mut self, value: f64) -> NodeId {
        self.add_node(Operator::ConstFloat(value.to_bits()), &[])
    }

    pub fn parameter(&mut self, index: u16, ty: ValueType) -> NodeId {
        self.add_node_typed(Operator::Parameter(index), &[], ty)
    }

    pub fn binary(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Binary(op), &[lhs, rhs])
    }

    /// Create a merge with the given forward ends and no state.
    pub fn add_merge(&mut self, ends: &[NodeId]) -> NodeId {
        let mut inputs = vec![NodeId::INVALID];
        inputs.extend_from_slice(ends);
        self.add_node(Operator::Merge, &inputs)
    }

    /// Create a loop header entered through `forward_end`.
    pub fn add_loop_begin(&mut self, forward_end: NodeId) -> NodeId {
        self.add_node(
            Operator::LoopBegin { forward_ends: 1 },
            &[NodeId::INVALID, forward_end],
        )
    }

    pub fn add_end(&mut self) -> NodeId {
        self.add_node(Operator::End, &[])
    }

    /// Create a back edge and register it on its loop header.
    ///
    /// Phis of `begin` must be created after all ends, or widened by the
    /// caller; this does not touch them.
    pub fn add_loop_end(&mut self, begin: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(begin), Operator::LoopBegin { .. }));
        let end = self.add_node(Operator::LoopEnd, &[]);
        self.nodes[begin].inputs.push(end);
        self.usages.entry(end).push(begin);
        end
    }

    /// Register an additional forward end on a merge.
    ///
    /// For loop headers the end is inserted before the back edges. Phis must
    /// be created afterwards, or widened by the caller.
    pub fn add_forward_end(&mut self, merge: NodeId, end: NodeId) {
        debug_assert!(self.op(merge).is_merge());
        let pos = match self.nodes[merge].op {
            Operator::LoopBegin { ref mut forward_ends } => {
                *forward_ends += 1;
                *forward_ends as usize // position after state slot + previous forward ends
            }
            _ => self.nodes[merge].inputs.len(),
        };
        self.nodes[merge].inputs.insert(pos, end);
        self.usages.entry(end).push(merge);
    }

    pub fn add_loop_exit(&mut self, begin: NodeId) -> NodeId {
        self.add_node(Operator::LoopExit, &[NodeId::INVALID, begin])
    }

    /// Create a phi at `merge` with one value per end, in end order.
    pub fn add_phi(&mut self, kind: PhiKind, merge: NodeId, values: &[NodeId]) -> NodeId {
        debug_assert!(self.op(merge).is_merge());
        debug_assert_eq!(values.len(), self.end_count(merge));
        let mut inputs = vec![merge];
        inputs.extend_from_slice(values);
        self.add_node(Operator::Phi(kind), &inputs)
    }

    pub fn add_proxy(&mut self, kind: ProxyKind, value: NodeId, exit: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(exit), Operator::LoopExit));
        self.add_node(Operator::Proxy(kind), &[value, exit])
    }

    // =========================================================================
    // Input edges
    // =========================================================================

    /// Input slot `index` of `id`, INVALID when absent or out of range.
    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> NodeId {
        self.nodes[id].inputs.get(index).unwrap_or(NodeId::INVALID)
    }

    #[inline]
    pub fn input_count(&self, id: NodeId) -> usize {
        self.nodes[id].inputs.len()
    }

    /// Snapshot of all input slots (INVALID slots included).
    pub fn inputs(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id].inputs.to_vec()
    }

    fn remove_usage_edge(&mut self, def: NodeId, user: NodeId) {
        let list = self.usages.entry(def);
        if let Some(pos) = list.iter().position(|&u| u == user) {
            // Ordered removal keeps usage iteration deterministic.
            list.remove(pos);
        }
    }

    /// Overwrite an input slot, maintaining usage symmetry.
    pub fn set_input(&mut self, id: NodeId, index: usize, new: NodeId) {
        let old = self.input(id, index);
        if old == new {
            return;
        }
        if old.is_valid() {
            self.remove_usage_edge(old, id);
        }
        self.nodes[id].inputs.set(index, new);
        if new.is_valid() {
            self.usages.entry(new).push(id);
        }
    }

    /// Replace the first input slot holding `old` with `new`.
    pub fn replace_first_input(&mut self, id: NodeId, old: NodeId, new: NodeId) -> bool {
        match self.nodes[id].inputs.position_of(old) {
            Some(pos) => {
                self.set_input(id, pos, new);
                true
            }
            None => false,
        }
    }

    /// Remove an input slot entirely, shifting later slots down.
    pub fn remove_input_slot(&mut self, id: NodeId, index: usize) {
        let old = self.nodes[id].inputs.remove(index);
        if old.is_valid() {
            self.remove_usage_edge(old, id);
        }
    }

    // =========================================================================
    // Usage edges
    // =========================================================================

    /// Current users of `id`.
    #[inline]
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.usages.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn has_no_usages(&self, id: NodeId) -> bool {
        self.usages(id).is_empty()
    }

    /// Snapshot of the usage list, safe to iterate while mutating.
    pub fn usages_snapshot(&self, id: NodeId) -> Vec<NodeId> {
        self.usages(id).to_vec()
    }

    /// Rewrite every usage's input slots pointing at `id` to `replacement`
    /// (INVALID detaches them).
    pub fn replace_at_usages(&mut self, id: NodeId, replacement: NodeId) {
        self.replace_at_matching_usages(id, replacement, |_| true);
    }

    /// Like [`Self::replace_at_usages`], restricted to usages accepted by
    /// the filter.
    pub fn replace_at_matching_usages<F>(&mut self, id: NodeId, replacement: NodeId, mut filter: F)
    where
        F: FnMut(NodeId) -> bool,
    {
        debug_assert!(replacement != id);
        for user in self.usages_snapshot(id) {
            if !filter(user) {
                continue;
            }
            let count = self.input_count(user);
            for slot in 0..count {
                if self.input(user, slot) == id {
                    self.set_input(user, slot, replacement);
                }
            }
        }
    }

    // =========================================================================
    // Control chain
    // =========================================================================

    /// Control predecessor, INVALID if detached or not fixed.
    #[inline]
    pub fn predecessor(&self, id: NodeId) -> NodeId {
        self.preds.get(id).copied().unwrap_or(NodeId::INVALID)
    }

    /// Raw successor slots; detached slots hold INVALID.
    #[inline]
    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.succs.get(id).map(SmallVec::as_slice).unwrap_or(&[])
    }

    /// Alive successors only.
    pub fn valid_successors(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        self.successors(id)
            .iter()
            .copied()
            .filter(|s| s.is_valid())
            .collect()
    }

    /// The unique successor of a fixed-with-next node, INVALID otherwise.
    pub fn next(&self, id: NodeId) -> NodeId {
        let valid = self.valid_successors(id);
        if valid.len() == 1 {
            valid[0]
        } else {
            NodeId::INVALID
        }
    }

    /// Set successor slot `index`, maintaining predecessor symmetry.
    pub fn set_successor(&mut self, id: NodeId, index: usize, succ: NodeId) {
        debug_assert!(self.op(id).is_fixed());
        let slots = self.succs.entry(id);
        if slots.len() <= index {
            slots.resize(index + 1, NodeId::INVALID);
        }
        let old = slots[index];
        if old == succ {
            return;
        }
        slots[index] = succ;
        if old.is_valid() {
            self.preds.set(old, NodeId::INVALID);
        }
        if succ.is_valid() {
            debug_assert!(!self.predecessor(succ).is_valid(), "successor already linked");
            self.preds.set(succ, id);
        }
    }

    /// Link `id -> next` as the single-successor control edge.
    pub fn set_next(&mut self, id: NodeId, next: NodeId) {
        self.set_successor(id, 0, next);
    }

    /// Replace the successor slot holding `old` with `new`.
    pub fn replace_first_successor(&mut self, id: NodeId, old: NodeId, new: NodeId) -> bool {
        let pos = self.successors(id).iter().position(|&s| s == old);
        match pos {
            Some(index) => {
                self.set_successor(id, index, new);
                true
            }
            None => false,
        }
    }

    /// Rewrite the predecessor's successor slot pointing at `id` to `new`
    /// (INVALID detaches `id` from the chain).
    pub fn replace_at_predecessor(&mut self, id: NodeId, new: NodeId) {
        let pred = self.predecessor(id);
        if pred.is_valid() {
            let replaced = self.replace_first_successor(pred, id, new);
            debug_assert!(replaced, "predecessor link without successor link");
        }
    }

    // =========================================================================
    // Merge / loop structure
    // =========================================================================

    /// Optional frame state carried by a state-splitting node.
    #[inline]
    pub fn state_after(&self, id: NodeId) -> NodeId {
        if self.op(id).has_state_slot() {
            self.input(id, 0)
        } else {
            NodeId::INVALID
        }
    }

    pub fn set_state_after(&mut self, id: NodeId, state: NodeId) {
        debug_assert!(self.op(id).has_state_slot());
        self.set_input(id, 0, state);
    }

    /// Number of ends (forward and back edges) of a merge.
    #[inline]
    pub fn end_count(&self, merge: NodeId) -> usize {
        debug_assert!(self.op(merge).is_merge());
        self.input_count(merge) - 1
    }

    /// End at `index`, in phi value order.
    #[inline]
    pub fn end_at(&self, merge: NodeId, index: usize) -> NodeId {
        self.input(merge, 1 + index)
    }

    /// All ends of a merge, in phi value order.
    pub fn ends(&self, merge: NodeId) -> Vec<NodeId> {
        (0..self.end_count(merge))
            .map(|i| self.end_at(merge, i))
            .collect()
    }

    /// Number of forward (non-back-edge) ends.
    pub fn forward_end_count(&self, merge: NodeId) -> usize {
        match self.op(merge) {
            Operator::LoopBegin { forward_ends } => forward_ends as usize,
            _ => self.end_count(merge),
        }
    }

    pub fn forward_end_at(&self, merge: NodeId, index: usize) -> NodeId {
        debug_assert!(index < self.forward_end_count(merge));
        self.end_at(merge, index)
    }

    /// Back-edge ends of a loop header.
    pub fn loop_ends(&self, begin: NodeId) -> Vec<NodeId> {
        let forward = self.forward_end_count(begin);
        (forward..self.end_count(begin))
            .map(|i| self.end_at(begin, i))
            .collect()
    }

    pub fn loop_end_count(&self, begin: NodeId) -> usize {
        self.end_count(begin) - self.forward_end_count(begin)
    }

    /// The merge a control end flows into, if still attached.
    pub fn merge_of_end(&self, end: NodeId) -> NodeId {
        debug_assert!(self.op(end).is_end());
        for &user in self.usages(end) {
            if self.op(user).is_merge() && self.nodes[user].inputs.position_of(end).is_some() {
                return user;
            }
        }
        NodeId::INVALID
    }

    /// Phis owned by a merge.
    pub fn phis(&self, merge: NodeId) -> Vec<NodeId> {
        self.usages(merge)
            .iter()
            .copied()
            .filter(|&u| self.is_phi_at_merge(u, merge))
            .collect()
    }

    /// Whether `id` is a phi whose owning merge is `merge`.
    pub fn is_phi_at_merge(&self, id: NodeId, merge: NodeId) -> bool {
        self.is_alive(id) && self.op(id).is_phi() && self.input(id, 0) == merge
    }

    #[inline]
    pub fn phi_value_count(&self, phi: NodeId) -> usize {
        debug_assert!(self.op(phi).is_phi());
        self.input_count(phi) - 1
    }

    #[inline]
    pub fn phi_value_at(&self, phi: NodeId, index: usize) -> NodeId {
        self.input(phi, 1 + index)
    }

    /// Remove an end from its merge, dropping the matching value from every
    /// phi. For loop headers the forward-end count is adjusted.
    pub fn remove_end(&mut self, merge: NodeId, end: NodeId) {
        let slot = self.nodes[merge]
            .inputs
            .position_of(end)
            .expect("end not attached to merge");
        debug_assert!(slot >= 1);
        if let Operator::LoopBegin { ref mut forward_ends } = self.nodes[merge].op {
            if slot <= *forward_ends as usize {
                *forward_ends -= 1;
            }
        }
        self.remove_input_slot(merge, slot);
        // Phi inputs are [merge, v...]; value slot index equals the merge's
        // input slot index for the same end.
        for phi in self.phis(merge) {
            self.remove_input_slot(phi, slot);
        }
    }

    /// Loop exits anchored to a loop header.
    pub fn loop_exits(&self, begin: NodeId) -> Vec<NodeId> {
        self.usages(begin)
            .iter()
            .copied()
            .filter(|&u| {
                self.is_alive(u)
                    && matches!(self.op(u), Operator::LoopExit)
                    && self.input(u, 1) == begin
            })
            .collect()
    }

    /// Proxies anchored to a loop exit.
    pub fn proxies(&self, exit: NodeId) -> Vec<NodeId> {
        self.usages(exit)
            .iter()
            .copied()
            .filter(|&u| {
                self.is_alive(u) && self.op(u).is_proxy() && self.input(u, 1) == exit
            })
            .collect()
    }

    /// The call target of an invoke.
    pub fn call_target(&self, invoke: NodeId) -> NodeId {
        debug_assert!(matches!(self.op(invoke), Operator::Invoke));
        self.input(invoke, 1)
    }

    /// Rewrite a node's operator in place, keeping all edges.
    ///
    /// Used by loop normalization to demote a loop header that lost all back
    /// edges into a plain merge.
    pub(crate) fn set_operator(&mut self, id: NodeId, op: Operator) {
        debug_assert!(self.is_alive(id));
        self.nodes[id].op = op;
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Mark deleted without touching edges. Only the kill machinery may use
    /// this mid-teardown; symmetry must be restored before returning.
    pub(crate) fn mark_deleted(&mut self, id: NodeId) {
        debug_assert!(self.is_alive(id));
        self.nodes[id].flags.insert(NodeFlags::DELETED);
    }

    /// Delete a fully detached node: no usages, no predecessor.
    ///
    /// Releases its input and successor edges, then marks it deleted.
    pub fn safe_delete(&mut self, id: NodeId) {
        debug_assert!(self.is_alive(id), "must be alive: {:?}", id);
        debug_assert!(self.has_no_usages(id), "usages remain on {:?}", id);
        debug_assert!(!self.predecessor(id).is_valid(), "predecessor remains on {:?}", id);
        for slot in 0..self.input_count(id) {
            let input = self.input(id, slot);
            if input.is_valid() {
                self.nodes[id].inputs.set(slot, NodeId::INVALID);
                if self.is_alive(input) {
                    self.remove_usage_edge(input, id);
                }
            }
        }
        for index in 0..self.successors(id).len() {
            let succ = self.successors(id)[index];
            if succ.is_valid() {
                self.set_successor(id, index, NodeId::INVALID);
            }
        }
        self.mark_deleted(id);
    }

    // =========================================================================
    // Duplication
    // =========================================================================

    /// Bulk-duplicate a node set inside this graph.
    ///
    /// Returns the old-to-new map. Edges between two set members are mapped;
    /// input edges leaving the set go through `replacement` (identity keeps
    /// the edge pointing at the original node); successor edges leaving the
    /// set are dropped unless `replacement` redirects them - the caller
    /// stitches the copy into control flow afterwards.
    pub fn add_duplicates<F>(
        &mut self,
        set: &NodeBitMap<Node>,
        mut replacement: F,
    ) -> FxHashMap<NodeId, NodeId>
    where
        F: FnMut(NodeId) -> NodeId,
    {
        let originals: Vec<NodeId> = set.iter().filter(|&id| self.is_alive(id)).collect();
        let mut map = FxHashMap::with_capacity_and_hasher(originals.len(), Default::default());

        for &old in &originals {
            let node = &self.nodes[old];
            let copy = Node::new(node.op, InputList::empty(), node.ty);
            let new = self.nodes.alloc(copy);
            map.insert(old, new);
        }

        for &old in &originals {
            let new = map[&old];
            for slot in 0..self.input_count(old) {
                let target = self.input(old, slot);
                let mapped = if !target.is_valid() {
                    NodeId::INVALID
                } else if let Some(&dup) = map.get(&target) {
                    dup
                } else {
                    replacement(target)
                };
                self.nodes[new].inputs.push(mapped);
                if mapped.is_valid() {
                    self.usages.entry(mapped).push(new);
                }
            }
            for index in 0..self.successors(old).len() {
                let target = self.successors(old)[index];
                let mapped = if !target.is_valid() {
                    NodeId::INVALID
                } else if let Some(&dup) = map.get(&target) {
                    dup
                } else {
                    let r = replacement(target);
                    if r != target {
                        r
                    } else {
                        NodeId::INVALID
                    }
                };
                if mapped.is_valid() {
                    self.set_successor(new, index, mapped);
                }
            }
        }
        map
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Structural invariant check, compiled only for diagnostic builds.
    #[cfg(debug_assertions)]
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.nodes.iter() {
            if node.is_deleted() {
                continue;
            }
            for (slot, input) in node.inputs.iter().enumerate() {
                if !input.is_valid() {
                    if !node.op.is_optional_input(slot) {
                        return Err(format!(
                            "{:?}: non-optional input {} is null",
                            id, slot
                        ));
                    }
                    continue;
                }
                let target = self
                    .nodes
                    .get(input)
                    .ok_or_else(|| format!("{:?}: input {:?} out of bounds", id, input))?;
                if target.is_deleted() {
                    return Err(format!("{:?}: input {:?} is deleted", id, input));
                }
                if !self.usages(input).contains(&id) {
                    return Err(format!("{:?}: missing usage backlink on {:?}", id, input));
                }
            }
            for &user in self.usages(id) {
                if !self.is_alive(user) {
                    return Err(format!("{:?}: deleted node {:?} in usages", id, user));
                }
                if self.nodes[user].inputs.position_of(id).is_none() {
                    return Err(format!("{:?}: usage {:?} lacks the input edge", id, user));
                }
            }
            let pred = self.predecessor(id);
            if pred.is_valid() {
                if !self.op(id).is_fixed() {
                    return Err(format!("{:?}: floating node has a predecessor", id));
                }
                if !self.successors(pred).contains(&id) {
                    return Err(format!("{:?}: predecessor {:?} lacks successor link", id, pred));
                }
            }
            for &succ in self.successors(id) {
                if succ.is_valid() && self.predecessor(succ) != id {
                    return Err(format!("{:?}: successor {:?} lacks predecessor link", id, succ));
                }
            }
        }
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    pub fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.nodes.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Worklist
// =============================================================================

/// FIFO worklist with bitmap-backed dedup over the graph's node universe.
///
/// Used instead of recursion wherever fan-out is unbounded (wide successor
/// sets during kill, floating closures during fragment computation).
pub struct NodeWorklist {
    queue: VecDeque<NodeId>,
    enqueued: NodeBitMap<Node>,
}

impl NodeWorklist {
    pub fn new(graph: &Graph) -> Self {
        NodeWorklist {
            queue: VecDeque::new(),
            enqueued: graph.create_node_bitmap(),
        }
    }

    /// Enqueue a node unless it was ever enqueued before.
    pub fn add(&mut self, id: NodeId) {
        if id.is_valid() && !self.enqueued.is_marked(id) {
            self.enqueued.mark(id);
            self.queue.push_back(id);
        }
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_usage_symmetry() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);
        let sum = g.binary(ArithOp::Add, a, b);

        assert_eq!(g.usages(a), &[sum]);
        assert_eq!(g.usages(b), &[sum]);
        assert!(g.verify().is_ok());

        let c = g.const_int(3);
        g.replace_first_input(sum, a, c);
        assert!(g.usages(a).is_empty());
        assert_eq!(g.usages(c), &[sum]);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_replace_at_usages() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let x = g.binary(ArithOp::Add, a, a);
        let y = g.binary(ArithOp::Mul, a, a);
        let b = g.const_int(2);

        g.replace_at_usages(a, b);
        assert!(g.has_no_usages(a));
        assert_eq!(g.input(x, 0), b);
        assert_eq!(g.input(x, 1), b);
        assert_eq!(g.input(y, 0), b);
        assert_eq!(g.usages(b).len(), 4);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_control_chain_symmetry() {
        let mut g = Graph::new();
        let start = g.add_node(Operator::Start, &[]);
        let begin = g.add_node(Operator::Begin, &[]);
        let ret = g.add_node(Operator::Return, &[NodeId::INVALID]);

        g.set_next(start, begin);
        g.set_next(begin, ret);

        assert_eq!(g.predecessor(begin), start);
        assert_eq!(g.predecessor(ret), begin);
        assert_eq!(g.next(start), begin);
        assert!(g.verify().is_ok());

        // Detach the middle node from its predecessor.
        g.replace_at_predecessor(begin, NodeId::INVALID);
        assert!(!g.predecessor(begin).is_valid());
        assert!(!g.successors(start)[0].is_valid());
    }

    #[test]
    fn test_merge_ends_and_phis() {
        let mut g = Graph::new();
        let e0 = g.add_end();
        let e1 = g.add_end();
        let merge = g.add_merge(&[e0, e1]);
        let v0 = g.const_int(1);
        let v1 = g.const_int(2);
        let phi = g.add_phi(PhiKind::Value, merge, &[v0, v1]);

        assert_eq!(g.end_count(merge), 2);
        assert_eq!(g.merge_of_end(e0), merge);
        assert_eq!(g.phis(merge), vec![phi]);
        assert_eq!(g.phi_value_at(phi, 1), v1);

        g.remove_end(merge, e1);
        assert_eq!(g.end_count(merge), 1);
        assert_eq!(g.phi_value_count(phi), 1);
        assert_eq!(g.phi_value_at(phi, 0), v0);
        assert!(g.has_no_usages(e1));
    }

    #[test]
    fn test_loop_begin_end_bookkeeping() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        let back = g.add_loop_end(begin);

        assert_eq!(g.forward_end_count(begin), 1);
        assert_eq!(g.loop_ends(begin), vec![back]);
        assert_eq!(g.merge_of_end(back), begin);

        let exit = g.add_loop_exit(begin);
        let v = g.const_int(5);
        let proxy = g.add_proxy(ProxyKind::Value, v, exit);
        assert_eq!(g.loop_exits(begin), vec![exit]);
        assert_eq!(g.proxies(exit), vec![proxy]);

        g.remove_end(begin, entry);
        assert_eq!(g.forward_end_count(begin), 0);
        assert_eq!(g.loop_end_count(begin), 1);
    }

    #[test]
    fn test_safe_delete_releases_edges() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);
        let sum = g.binary(ArithOp::Add, a, b);

        g.safe_delete(sum);
        assert!(g.is_deleted(sum));
        assert!(g.has_no_usages(a));
        assert!(g.has_no_usages(b));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_add_duplicates_isomorphism() {
        let mut g = Graph::new();
        let outside = g.const_int(7);
        let a = g.const_int(1);
        let sum = g.binary(ArithOp::Add, a, outside);
        let double = g.binary(ArithOp::Mul, sum, sum);

        let mut set = g.create_node_bitmap();
        set.mark(a);
        set.mark(sum);
        set.mark(double);

        let map = g.add_duplicates(&set, |n| n);
        assert_eq!(map.len(), 3);

        // Edges inside the set are remapped; the edge to `outside` is kept.
        let sum2 = map[&sum];
        let double2 = map[&double];
        assert_eq!(g.input(sum2, 0), map[&a]);
        assert_eq!(g.input(sum2, 1), outside);
        assert_eq!(g.input(double2, 0), sum2);
        assert_eq!(g.input(double2, 1), sum2);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_worklist_dedup() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);

        let mut wl = NodeWorklist::new(&g);
        wl.add(a);
        wl.add(b);
        wl.add(a); // dedup
        assert_eq!(wl.pop(), Some(a));
        assert_eq!(wl.pop(), Some(b));
        assert!(wl.pop().is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_verify_rejects_null_required_input() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let sum = g.binary(ArithOp::Add, a, a);
        g.set_input(sum, 1, NodeId::INVALID);
        assert!(g.verify().is_err());
    }
}
