//! Loop fragment computation, duplication and early-exit merging.
//!
//! A fragment is the set of nodes owned by a region of the loop: the fixed
//! nodes of its blocks plus every floating node whose consumers live in the
//! region. Ownership of a floating node follows its *usages*, not where it
//! was created, so the floating closure is computed usage-driven with a
//! two-color memo.
//!
//! Duplication clones the set inside the same graph through the substrate's
//! bulk duplicator; edges leaving the set go through caller-supplied
//! control and data replacement policies, which must agree wherever both
//! redirect the same node. `merge_early_exits` then stitches a duplicated
//! exit path back together with the original one through a fresh two-way
//! merge, turning each still-used exit proxy into a phi over both copies.

use rustc_hash::FxHashMap;

use crate::ir::arena::NodeBitMap;
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Operator;

use super::{GraphTrace, TransformError};

/// Replacement policy for edges that cross the fragment boundary during
/// duplication. Returning the argument keeps the edge on the original node.
pub type ReplacementFn<'a> = &'a mut dyn FnMut(NodeId) -> NodeId;

// =============================================================================
// Fragment
// =============================================================================

/// The node set of one loop region, in the original graph.
pub struct LoopFragment {
    nodes: NodeBitMap<Node>,
}

impl LoopFragment {
    /// Compute the fragment covering `blocks` (given by their block-begin
    /// nodes) plus the given early-exit loop exits.
    pub fn compute(graph: &Graph, blocks: &[NodeId], early_exits: &[NodeId]) -> LoopFragment {
        let mut nodes = graph.create_node_bitmap();
        for &block in blocks {
            if !graph.is_alive(block) {
                continue;
            }
            for n in block_nodes(graph, block) {
                if matches!(graph.op(n), Operator::Invoke) {
                    let target = graph.call_target(n);
                    if target.is_valid() {
                        nodes.mark(target);
                    }
                }
                if graph.op(n).has_state_slot() {
                    let state = graph.state_after(n);
                    if state.is_valid() {
                        mark_state_closure(graph, state, &mut nodes);
                    }
                }
                nodes.mark(n);
            }
        }
        for &exit in early_exits {
            if !graph.is_alive(exit) {
                continue;
            }
            let state = graph.state_after(exit);
            if state.is_valid() {
                mark_state_closure(graph, state, &mut nodes);
            }
            nodes.mark(exit);
            for proxy in graph.proxies(exit) {
                nodes.mark(proxy);
            }
        }
        // Floating closure, seeded from the usages of every block node.
        let mut outside = graph.create_node_bitmap();
        for &block in blocks {
            if !graph.is_alive(block) {
                continue;
            }
            for n in block_nodes(graph, block) {
                for &usage in graph.usages(n) {
                    mark_floating(graph, usage, &mut nodes, &mut outside);
                }
            }
        }
        LoopFragment { nodes }
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.is_marked(node)
    }

    pub fn nodes(&self) -> &NodeBitMap<Node> {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone the fragment inside `graph`.
    ///
    /// `data_fix` and `cfg_fix` redirect boundary edges for data and
    /// control respectively; where both redirect the same node they must
    /// agree. The data fix wins ties with identity.
    pub fn duplicate(
        &self,
        graph: &mut Graph,
        mut data_fix: Option<ReplacementFn<'_>>,
        mut cfg_fix: Option<ReplacementFn<'_>>,
        trace: &mut dyn GraphTrace,
    ) -> Result<FragmentDuplicate, TransformError> {
        let mut conflict = None;
        let map = graph.add_duplicates(&self.nodes, |old| {
            let data = match data_fix.as_mut() {
                Some(f) => f(old),
                None => old,
            };
            let cfg = match cfg_fix.as_mut() {
                Some(f) => f(old),
                None => old,
            };
            if data != old {
                if cfg != old && cfg != data && conflict.is_none() {
                    conflict = Some(TransformError::DuplicationConflict {
                        node: old,
                        cfg_replacement: cfg,
                        data_replacement: data,
                    });
                }
                data
            } else {
                cfg
            }
        });
        if let Some(error) = conflict {
            return Err(error);
        }
        trace.after_duplication(graph, map.len());
        Ok(FragmentDuplicate { map })
    }
}

// =============================================================================
// Duplicate fragment
// =============================================================================

/// The copy produced by [`LoopFragment::duplicate`], keyed by the
/// old-to-new node map. Scoped to one duplication; discard after stitching.
#[derive(Debug)]
pub struct FragmentDuplicate {
    map: FxHashMap<NodeId, NodeId>,
}

impl FragmentDuplicate {
    /// The duplicated counterpart of an original node, if it was in the set.
    #[inline]
    pub fn duplicated(&self, original: NodeId) -> Option<NodeId> {
        self.map.get(&original).copied()
    }

    /// The corresponding value in the copy: mapped if duplicated, the
    /// original itself otherwise.
    #[inline]
    pub fn prim(&self, original: NodeId) -> NodeId {
        self.duplicated(original).unwrap_or(original)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Reconnect every early exit both fragments still reach.
    ///
    /// Each such exit gets a fresh two-way merge fed by the original exit
    /// and its duplicate. The merge takes over the original exit's state
    /// (dominated states must observe the proxy-to-phi rewiring below) while
    /// the exit keeps a fresh clone, and `original`'s membership is updated
    /// to match. Every proxy still in use becomes a two-input phi over the
    /// original and duplicated value, except where the consumer is a phi
    /// already at the new merge or part of the exit's rebuilt state.
    pub fn merge_early_exits(
        &self,
        graph: &mut Graph,
        original: &mut LoopFragment,
        early_exits: &[NodeId],
    ) {
        for &exit in early_exits {
            if !graph.is_alive(exit) || !original.contains(exit) {
                continue;
            }
            let new_exit = match self.duplicated(exit) {
                Some(n) => n,
                None => continue,
            };
            let next = graph.next(exit);

            let merge = graph.add_node(Operator::Merge, &[NodeId::INVALID]);
            let original_end = graph.add_end();
            let new_end = graph.add_end();
            graph.add_forward_end(merge, original_end);
            graph.add_forward_end(merge, new_end);
            if next.is_valid() {
                graph.replace_first_successor(exit, next, NodeId::INVALID);
            }
            graph.set_next(exit, original_end);
            let dup_next = graph.next(new_exit);
            if dup_next.is_valid() {
                graph.replace_first_successor(new_exit, dup_next, NodeId::INVALID);
            }
            graph.set_next(new_exit, new_end);
            if next.is_valid() {
                graph.set_next(merge, next);
            }

            let mut final_exit_state = NodeId::INVALID;
            let exit_state = graph.state_after(exit);
            if exit_state.is_valid() {
                let fresh = graph.duplicate_state_subtree(exit_state);
                graph.set_state_after(exit, fresh);
                graph.set_state_after(merge, exit_state);
                // The old state now belongs to the merge, outside the
                // fragment; the fresh clone stays with the exit inside it.
                for_each_state_closure_node(graph, exit_state, |n| original.nodes.clear(n));
                for_each_state_closure_node(graph, fresh, |n| original.nodes.mark(n));
                final_exit_state = fresh;
            }

            // Anything anchored on the exit besides its proxies moves to
            // the merge.
            for usage in graph.usages_snapshot(exit) {
                let is_own_proxy =
                    graph.op(usage).is_proxy() && graph.input(usage, 1) == exit;
                if !is_own_proxy {
                    graph.replace_first_input(usage, exit, merge);
                }
            }

            let new_exit_is_loop_exit = matches!(graph.op(new_exit), Operator::LoopExit);
            for proxy in graph.proxies(exit) {
                if graph.has_no_usages(proxy) {
                    continue;
                }
                let value = graph.input(proxy, 0);
                if !value.is_valid() {
                    debug_assert!(matches!(
                        graph.op(proxy),
                        Operator::Proxy(crate::ir::operators::ProxyKind::Guard)
                    ));
                    graph.replace_at_usages(proxy, NodeId::INVALID);
                    continue;
                }
                // When the duplicate still exits a loop, its values stay
                // proxied; otherwise the raw value flows out directly.
                let source = if new_exit_is_loop_exit { proxy } else { value };
                let replace_with = match self.duplicated(source) {
                    Some(new_value) => {
                        let kind = match graph.op(proxy) {
                            Operator::Proxy(k) => k.phi_kind(),
                            _ => unreachable!(),
                        };
                        graph.add_node_typed(
                            Operator::Phi(kind),
                            &[merge, proxy, new_value],
                            graph.ty(proxy),
                        )
                    }
                    None => value,
                };
                for user in graph.usages_snapshot(proxy) {
                    if graph.is_phi_at_merge(user, merge) {
                        continue;
                    }
                    if final_exit_state.is_valid()
                        && graph.is_part_of_state(final_exit_state, user)
                    {
                        continue;
                    }
                    graph.replace_first_input(user, proxy, replace_with);
                }
            }
        }
    }
}

// =============================================================================
// Block and closure walks
// =============================================================================

/// The fixed nodes of one basic block, from its begin to its terminator.
fn block_nodes(graph: &Graph, begin: NodeId) -> Vec<NodeId> {
    debug_assert!(graph.op(begin).is_block_begin());
    let mut out = vec![begin];
    let mut current = begin;
    loop {
        let next = graph.next(current);
        if !next.is_valid() || graph.op(next).is_block_begin() {
            break;
        }
        out.push(next);
        current = next;
    }
    out
}

/// Mark a frame state's full closure: the outer chain, every escape-object
/// mapping, and each mapped virtual object (its shape must travel with the
/// fragment even though it sits in no block).
fn mark_state_closure(graph: &Graph, state: NodeId, nodes: &mut NodeBitMap<Node>) {
    for_each_state_closure_node(graph, state, |n| nodes.mark(n));
}

fn for_each_state_closure_node<F>(graph: &Graph, state: NodeId, mut f: F)
where
    F: FnMut(NodeId),
{
    let mut current = state;
    while current.is_valid() {
        f(current);
        for mapping in graph.virtual_mappings(current) {
            if !mapping.is_valid() {
                continue;
            }
            f(mapping);
            let object = graph.mapping_object(mapping);
            if object.is_valid() {
                f(object);
            }
        }
        current = graph.outer_frame_state(current);
    }
}

/// Usage-driven two-color closure over floating nodes.
///
/// A floating node belongs to the fragment if it is a phi at an in-set
/// merge, or if any of its usages (transitively) does. Runs on an explicit
/// frame stack; phis are colored before their usages are scanned so cycles
/// through loop phis terminate.
fn mark_floating(
    graph: &Graph,
    start: NodeId,
    inside: &mut NodeBitMap<Node>,
    outside: &mut NodeBitMap<Node>,
) -> bool {
    struct Frame {
        node: NodeId,
        usage_index: usize,
        mark: bool,
    }

    fn resolve(
        graph: &Graph,
        node: NodeId,
        inside: &NodeBitMap<Node>,
        outside: &NodeBitMap<Node>,
    ) -> Option<bool> {
        if inside.is_marked(node) {
            Some(true)
        } else if outside.is_marked(node) {
            Some(false)
        } else if graph.op(node).is_fixed() {
            Some(false)
        } else {
            None
        }
    }

    fn enter(
        graph: &Graph,
        node: NodeId,
        inside: &mut NodeBitMap<Node>,
        outside: &mut NodeBitMap<Node>,
    ) -> Result<Frame, bool> {
        if let Some(known) = resolve(graph, node, inside, outside) {
            return Err(known);
        }
        if graph.op(node).is_phi() {
            let merge = graph.input(node, 0);
            if inside.is_marked(merge) {
                inside.mark(node);
                Ok(Frame { node, usage_index: 0, mark: true })
            } else {
                outside.mark(node);
                Err(false)
            }
        } else {
            Ok(Frame { node, usage_index: 0, mark: false })
        }
    }

    let mut stack = match enter(graph, start, inside, outside) {
        Ok(frame) => vec![frame],
        Err(known) => return known,
    };
    let mut result = false;
    while let Some(top) = stack.last_mut() {
        let usages = graph.usages(top.node);
        if top.usage_index < usages.len() {
            let usage = usages[top.usage_index];
            top.usage_index += 1;
            match enter(graph, usage, inside, outside) {
                Ok(frame) => stack.push(frame),
                Err(known) => top.mark |= known,
            }
        } else {
            let done = stack.pop().expect("frame stack underflow");
            let in_set = if done.mark {
                inside.mark(done.node);
                true
            } else {
                if !inside.is_marked(done.node) {
                    outside.mark(done.node);
                }
                false
            };
            match stack.last_mut() {
                Some(parent) => parent.mark |= in_set,
                None => result = in_set,
            }
        }
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
