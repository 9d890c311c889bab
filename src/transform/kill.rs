//! Dead-subgraph elimination.
//!
//! `kill_cfg` removes a fixed node and everything whose liveness depended
//! solely on it: the control chain below it, merges that lose their ends,
//! loops that lose their entry, and every floating value that no longer has
//! a path to a live consumer.
//!
//! # Structure
//!
//! - The linear walk follows single-successor chains directly; wide
//!   successor fan-out (branches) goes through a deferred worklist instead
//!   of recursion, so stack depth stays bounded on adversarial graphs.
//! - Reaching an end hands off to `kill_end`, which maintains merge/loop
//!   structure. A loop header that lost its last forward end is provably
//!   dead and gets dismantled wholesale: phi self-cycles are broken by a
//!   shared poison tombstone that is itself deleted once the loop body is
//!   gone.
//! - `propagate_kill` detaches floating usages and hands usage-free values
//!   to `kill_with_unused_floating_inputs`, which walks dying inputs with an
//!   explicit stack.

use crate::ir::graph::{Graph, NodeWorklist};
use crate::ir::node::NodeId;
use crate::ir::operators::{Operator, PoisonToken};

use super::simplify::{check_redundant_phi, reduce_degenerate_loop_begin, reduce_trivial_merge};
use super::GraphTrace;

// =============================================================================
// Entry point
// =============================================================================

/// Kill `node` and the dead subgraph hanging off it.
///
/// `node` must be alive and fixed. On return the graph satisfies the
/// structural invariants again: no alive node references a deleted one.
pub fn kill_cfg(graph: &mut Graph, node: NodeId, trace: &mut dyn GraphTrace) {
    debug_assert!(graph.is_alive(node));
    debug_assert!(graph.op(node).is_fixed());
    trace.before_kill(graph, node);
    let mut worklist = NodeWorklist::new(graph);
    kill_node(graph, node, &mut worklist, trace);
    while let Some(deferred) = worklist.pop() {
        // A deferred branch may have been reached and killed through
        // another path already.
        if graph.is_alive(deferred) {
            kill_node(graph, deferred, &mut worklist, trace);
        }
    }
    trace.after_kill(graph, node);
    debug_assert_eq!(graph.verify(), Ok(()));
}

fn kill_node(
    graph: &mut Graph,
    node: NodeId,
    worklist: &mut NodeWorklist,
    trace: &mut dyn GraphTrace,
) {
    if graph.op(node).is_fixed() {
        kill_cfg_linear(graph, node, worklist, trace);
    } else {
        propagate_kill(graph, node, worklist);
    }
}

// =============================================================================
// Linear control walk
// =============================================================================

fn kill_cfg_linear(
    graph: &mut Graph,
    start: NodeId,
    worklist: &mut NodeWorklist,
    trace: &mut dyn GraphTrace,
) {
    let mut current = start;
    while current.is_valid() {
        debug_assert!(graph.is_alive(current));
        let mut next = NodeId::INVALID;
        if graph.op(current).is_end() {
            kill_end(graph, current, worklist, trace);
        } else {
            let successors = graph.valid_successors(current);
            if successors.len() == 1 {
                next = successors[0];
            } else if successors.len() > 1 {
                for &successor in &successors {
                    worklist.add(successor);
                    if matches!(graph.op(successor), Operator::LoopExit) {
                        // The exit will die through the worklist; detach its
                        // loop anchor now so the header does not keep it
                        // alive (or vice versa).
                        let begin = graph.input(successor, 1);
                        if begin.is_valid() {
                            graph.replace_first_input(successor, begin, NodeId::INVALID);
                        }
                    }
                }
            }
        }
        graph.replace_at_predecessor(current, NodeId::INVALID);
        propagate_kill(graph, current, worklist);
        current = next;
    }
}

// =============================================================================
// End / merge handling
// =============================================================================

fn kill_end(
    graph: &mut Graph,
    end: NodeId,
    worklist: &mut NodeWorklist,
    trace: &mut dyn GraphTrace,
) {
    let merge = graph.merge_of_end(end);
    if !merge.is_valid() {
        return;
    }
    remove_end_and_clean(graph, merge, end);
    let is_loop = matches!(graph.op(merge), Operator::LoopBegin { .. });
    if is_loop && graph.forward_end_count(merge) == 0 {
        dismantle_dead_loop(graph, merge, worklist, trace);
    } else if is_loop && graph.loop_end_count(merge) == 0 {
        // Lost all back edges: not a loop anymore.
        let survivors = phi_and_proxy_usages_of_phis(graph, merge);
        reduce_degenerate_loop_begin(graph, merge);
        recheck(graph, &survivors);
    } else if !is_loop && graph.end_count(merge) == 1 {
        // Single remaining predecessor: not a merge anymore.
        let survivors = phi_and_proxy_usages_of_phis(graph, merge);
        reduce_trivial_merge(graph, merge);
        recheck(graph, &survivors);
    }
}

/// A loop header with no forward end has no entry: tear the whole loop down.
fn dismantle_dead_loop(
    graph: &mut Graph,
    begin: NodeId,
    worklist: &mut NodeWorklist,
    trace: &mut dyn GraphTrace,
) {
    trace.loop_dismantled(graph, begin);
    // Disconnect and delete the back edges.
    for loop_end in graph.loop_ends(begin) {
        graph.replace_at_predecessor(loop_end, NodeId::INVALID);
        remove_end_and_clean(graph, begin, loop_end);
        graph.safe_delete(loop_end);
    }
    // Drop proxies nothing uses, so exit removal creates no new garbage.
    for exit in graph.loop_exits(begin) {
        for proxy in graph.proxies(exit) {
            try_kill_unused(graph, proxy);
        }
    }
    remove_exits(graph, begin);
    // Phi self-cycles would keep the loop body alive through data edges.
    // Break them with one shared poison tombstone, then delete the phis.
    let phis = graph.phis(begin);
    let mut poison = NodeId::INVALID;
    if !phis.is_empty() {
        poison = graph.add_node(Operator::Poison(PoisonToken::for_loop_teardown()), &[]);
        for &phi in &phis {
            graph.replace_at_usages(phi, poison);
        }
        for &phi in &phis {
            if graph.is_alive(phi) {
                kill_with_unused_floating_inputs(graph, phi);
            }
        }
    }
    // The body may already be gone for tiny self-contained loops.
    let body = graph.next(begin);
    if body.is_valid() && graph.is_alive(body) {
        kill_node(graph, body, worklist, trace);
    }
    let state = graph.state_after(begin);
    graph.safe_delete(begin);
    if state.is_valid() && graph.is_alive(state) {
        try_kill_unused(graph, state);
    }
    if poison.is_valid() && graph.is_alive(poison) {
        // Finish tearing the loop down before touching the poison, so no
        // dying node still referencing it resurrects anything.
        while let Some(deferred) = worklist.pop() {
            if graph.is_alive(deferred) {
                kill_node(graph, deferred, worklist, trace);
            }
        }
        if graph.is_alive(poison) {
            propagate_kill(graph, poison, worklist);
        }
    }
    debug_assert!(!graph.is_alive(begin));
}

/// Remove an end from its merge, then collect the phi values that end
/// contributed if nothing else uses them.
fn remove_end_and_clean(graph: &mut Graph, merge: NodeId, end: NodeId) {
    let slot = graph
        .inputs(merge)
        .iter()
        .position(|&i| i == end)
        .expect("end not attached to merge");
    let dropped: Vec<NodeId> = graph
        .phis(merge)
        .into_iter()
        .map(|phi| graph.input(phi, slot))
        .collect();
    graph.remove_end(merge, end);
    for value in dropped {
        if value.is_valid() {
            try_kill_unused(graph, value);
        }
    }
}

/// Replace every loop exit of `begin` with a plain block begin, folding each
/// remaining proxy into its wrapped value.
pub(crate) fn remove_exits(graph: &mut Graph, begin: NodeId) {
    for exit in graph.loop_exits(begin) {
        for proxy in graph.proxies(exit) {
            let value = graph.input(proxy, 0);
            graph.replace_at_usages(proxy, value);
            graph.safe_delete(proxy);
        }
        let state = graph.state_after(exit);
        if state.is_valid() {
            graph.set_state_after(exit, NodeId::INVALID);
        }
        let fresh = graph.add_node(Operator::Begin, &[]);
        let next = graph.next(exit);
        if next.is_valid() {
            graph.replace_first_successor(exit, next, NodeId::INVALID);
            graph.set_next(fresh, next);
        }
        graph.replace_at_predecessor(exit, fresh);
        graph.safe_delete(exit);
        if state.is_valid() && graph.is_alive(state) {
            try_kill_unused(graph, state);
        }
    }
}

// =============================================================================
// Dataflow propagation
// =============================================================================

/// Detach all usages of a dying node, queueing floating consumers for their
/// own kill, then delete the node together with its now-unused inputs.
///
/// A phi reached through one of its value edges is left for the matching
/// end's removal; only the edge from its owning merge queues it, so a
/// self-referential phi is processed exactly once.
fn propagate_kill(graph: &mut Graph, node: NodeId, worklist: &mut NodeWorklist) {
    if !node.is_valid() || !graph.is_alive(node) {
        return;
    }
    for usage in graph.usages_snapshot(node) {
        debug_assert!(graph.is_alive(usage));
        if graph.op(usage).is_floating() {
            let reached_through_merge =
                !graph.op(usage).is_phi() || graph.input(usage, 0) == node;
            if reached_through_merge {
                worklist.add(usage);
            }
        }
        graph.replace_first_input(usage, node, NodeId::INVALID);
    }
    kill_with_unused_floating_inputs(graph, node);
}

/// Delete a usage-free, predecessor-free node and transitively every
/// floating input that loses its last usage because of it.
///
/// Fixed inputs are released but never auto-killed through data edges. A
/// phi whose only remaining usages are itself is a dead self-cycle and is
/// collapsed here.
pub fn kill_with_unused_floating_inputs(graph: &mut Graph, node: NodeId) {
    let mut stack = vec![node];
    while let Some(dying) = stack.pop() {
        debug_assert!(graph.is_alive(dying), "must be alive: {:?}", dying);
        debug_assert!(graph.has_no_usages(dying), "usages remain on {:?}", dying);
        debug_assert!(!graph.predecessor(dying).is_valid());
        graph.mark_deleted(dying);
        for slot in 0..graph.input_count(dying) {
            let input = graph.input(dying, slot);
            if !input.is_valid() || !graph.is_alive(input) {
                continue;
            }
            graph.set_input(dying, slot, NodeId::INVALID);
            if !graph.op(input).is_floating() {
                continue;
            }
            if graph.has_no_usages(input) {
                stack.push(input);
            } else if graph.op(input).is_phi()
                && graph.usages(input).iter().all(|&u| u == input)
            {
                graph.replace_at_usages(input, NodeId::INVALID);
                stack.push(input);
            }
        }
    }
}

/// Kill a floating node if nothing uses it. Returns whether it was killed.
pub fn try_kill_unused(graph: &mut Graph, node: NodeId) -> bool {
    if graph.is_alive(node) && graph.op(node).is_floating() && graph.has_no_usages(node) {
        kill_with_unused_floating_inputs(graph, node);
        true
    } else {
        false
    }
}

// =============================================================================
// Fixed-node removal helpers
// =============================================================================

/// Splice a fixed-with-next node out of the control chain without deleting
/// it.
pub fn unlink_fixed(graph: &mut Graph, fixed: NodeId) {
    debug_assert!(graph.is_alive(fixed));
    let next = graph.next(fixed);
    debug_assert!(next.is_valid() && graph.predecessor(fixed).is_valid());
    graph.replace_first_successor(fixed, next, NodeId::INVALID);
    graph.replace_at_predecessor(fixed, next);
}

/// Remove a fixed-with-next node whose value nobody uses, releasing its
/// frame state and floating inputs.
pub fn remove_fixed_with_unused_inputs(graph: &mut Graph, fixed: NodeId) {
    if graph.op(fixed).has_state_slot() {
        let state = graph.state_after(fixed);
        if state.is_valid() {
            graph.set_state_after(fixed, NodeId::INVALID);
            if graph.has_no_usages(state) {
                kill_with_unused_floating_inputs(graph, state);
            }
        }
    }
    unlink_fixed(graph, fixed);
    kill_with_unused_floating_inputs(graph, fixed);
}

/// Follow a chain of proxies down to the original definition.
pub fn unproxify(graph: &Graph, value: NodeId) -> NodeId {
    let mut current = value;
    while current.is_valid() && graph.op(current).is_proxy() {
        current = graph.input(current, 0);
    }
    current
}

// =============================================================================
// Simplification requeue
// =============================================================================

/// Phi and proxy consumers of a merge's phis, collected before the merge is
/// reduced so they can be rechecked for redundancy afterwards.
fn phi_and_proxy_usages_of_phis(graph: &Graph, merge: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    for phi in graph.phis(merge) {
        for &usage in graph.usages(phi) {
            if (graph.op(usage).is_phi() || graph.op(usage).is_proxy()) && usage != phi {
                out.push(usage);
            }
        }
    }
    out
}

fn recheck(graph: &mut Graph, candidates: &[NodeId]) {
    for &candidate in candidates {
        if graph.is_alive(candidate) && graph.op(candidate).is_phi() {
            check_redundant_phi(graph, candidate);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{ArithOp, PhiKind, ProxyKind};
    use crate::transform::NullTrace;

    /// start -> begin -> return
    #[test]
    fn test_kill_linear_chain() {
        let mut g = Graph::new();
        let start = g.add_node(Operator::Start, &[]);
        let begin = g.add_node(Operator::Begin, &[]);
        let value = g.const_int(7);
        let ret = g.add_node(Operator::Return, &[value]);
        g.set_next(start, begin);
        g.set_next(begin, ret);

        kill_cfg(&mut g, begin, &mut NullTrace);
        assert!(!g.is_alive(begin));
        assert!(!g.is_alive(ret));
        // Constant lost its only consumer.
        assert!(!g.is_alive(value));
        assert!(g.is_alive(start));
        assert!(!g.successors(start)[0].is_valid());
    }

    /// Killing a branch kills both arms through the deferred worklist.
    #[test]
    fn test_kill_branch_fanout() {
        let mut g = Graph::new();
        let cond = g.const_int(1);
        let iff = g.add_node(Operator::If, &[cond]);
        let then_begin = g.add_node(Operator::Begin, &[]);
        let else_begin = g.add_node(Operator::Begin, &[]);
        let then_ret = g.add_node(Operator::Return, &[NodeId::INVALID]);
        let else_ret = g.add_node(Operator::Return, &[NodeId::INVALID]);
        g.set_successor(iff, 0, then_begin);
        g.set_successor(iff, 1, else_begin);
        g.set_next(then_begin, then_ret);
        g.set_next(else_begin, else_ret);

        kill_cfg(&mut g, iff, &mut NullTrace);
        for n in [iff, then_begin, else_begin, then_ret, else_ret, cond] {
            assert!(!g.is_alive(n), "{:?} survived", n);
        }
    }

    /// Killing one end of a two-way merge degrades it to a pass-through and
    /// folds the phi to the surviving value.
    #[test]
    fn test_kill_end_reduces_trivial_merge() {
        let mut g = Graph::new();
        let pred0 = g.add_node(Operator::Begin, &[]);
        let pred1 = g.add_node(Operator::Begin, &[]);
        let e0 = g.add_end();
        let e1 = g.add_end();
        g.set_next(pred0, e0);
        g.set_next(pred1, e1);
        let merge = g.add_merge(&[e0, e1]);
        let v0 = g.const_int(1);
        let v1 = g.const_int(2);
        let phi = g.add_phi(PhiKind::Value, merge, &[v0, v1]);
        let ret = g.add_node(Operator::Return, &[phi]);
        g.set_next(merge, ret);

        kill_cfg(&mut g, pred1, &mut NullTrace);
        assert!(!g.is_alive(e1));
        assert!(!g.is_alive(merge));
        assert!(!g.is_alive(phi));
        assert!(!g.is_alive(v1));
        // Surviving path flows straight into the return.
        assert!(g.is_alive(ret));
        assert_eq!(g.input(ret, 0), v0);
        assert_eq!(g.predecessor(ret), pred0);
    }

    /// Entry End of a loop with zero back edges: the header, its phis and
    /// everything alive only through them disappear, and no poison survives.
    #[test]
    fn test_kill_entry_of_degenerate_loop() {
        let mut g = Graph::new();
        let pred = g.add_node(Operator::Begin, &[]);
        let entry = g.add_end();
        g.set_next(pred, entry);
        let begin = g.add_loop_begin(entry);
        let init = g.const_int(0);
        let phi = g.add_phi(PhiKind::Value, begin, &[init]);
        let doubled = g.binary(ArithOp::Add, phi, phi);
        let ret = g.add_node(Operator::Return, &[doubled]);
        g.set_next(begin, ret);

        kill_cfg(&mut g, pred, &mut NullTrace);
        for n in [pred, entry, begin, phi, doubled, ret, init] {
            assert!(!g.is_alive(n), "{:?} survived", n);
        }
        assert!(g
            .alive_ids()
            .all(|n| !matches!(g.op(n), Operator::Poison(_))));
    }

    /// Full dead-loop dismantling: a loop with a back edge, a self-feeding
    /// phi and an exit proxy loses its entry.
    #[test]
    fn test_dismantle_dead_loop_with_backedge() {
        let mut g = Graph::new();
        let pred = g.add_node(Operator::Begin, &[]);
        let entry = g.add_end();
        g.set_next(pred, entry);
        let begin = g.add_loop_begin(entry);
        let back = g.add_loop_end(begin);
        let init = g.const_int(0);
        let one = g.const_int(1);
        let phi = g.add_phi(PhiKind::Value, begin, &[init, NodeId::INVALID]);
        let next_val = g.binary(ArithOp::Add, phi, one);
        g.set_input(phi, 2, next_val);

        let iff = g.add_node(Operator::If, &[phi]);
        g.set_next(begin, iff);
        let body = g.add_node(Operator::Begin, &[]);
        let exit = g.add_loop_exit(begin);
        g.set_successor(iff, 0, body);
        g.set_successor(iff, 1, exit);
        g.set_next(body, back);

        let proxy = g.add_proxy(ProxyKind::Value, phi, exit);
        let ret = g.add_node(Operator::Return, &[proxy]);
        g.set_next(exit, ret);

        kill_cfg(&mut g, pred, &mut NullTrace);
        for n in [pred, entry, begin, back, phi, next_val, iff, body, exit, proxy, ret] {
            assert!(!g.is_alive(n), "{:?} survived", n);
        }
        assert!(g
            .alive_ids()
            .all(|n| !matches!(g.op(n), Operator::Poison(_))));
        assert_eq!(g.verify(), Ok(()));
    }

    #[test]
    fn test_kill_completeness_no_dangling_inputs() {
        let mut g = Graph::new();
        let keep = g.const_int(9);
        let pred = g.add_node(Operator::Begin, &[]);
        let dying = g.binary(ArithOp::Mul, keep, keep);
        let ret = g.add_node(Operator::Return, &[dying]);
        g.set_next(pred, ret);
        let keeper_ret = g.add_node(Operator::Return, &[keep]);

        kill_cfg(&mut g, pred, &mut NullTrace);
        assert!(!g.is_alive(dying));
        assert!(g.is_alive(keep));
        assert_eq!(g.input(keeper_ret, 0), keep);
        // No alive node references anything deleted.
        for n in g.alive_ids().collect::<Vec<_>>() {
            for input in g.inputs(n) {
                assert!(!input.is_valid() || g.is_alive(input));
            }
        }
    }

    #[test]
    fn test_remove_fixed_with_unused_inputs() {
        let mut g = Graph::new();
        let pred = g.add_node(Operator::Begin, &[]);
        let target = g.add_node(
            Operator::CallTarget {
                method: crate::ir::operators::MethodId(3),
            },
            &[],
        );
        let invoke = g.add_node(Operator::Invoke, &[NodeId::INVALID, target]);
        let ret = g.add_node(Operator::Return, &[NodeId::INVALID]);
        g.set_next(pred, invoke);
        g.set_next(invoke, ret);

        remove_fixed_with_unused_inputs(&mut g, invoke);
        assert!(!g.is_alive(invoke));
        assert!(!g.is_alive(target));
        assert_eq!(g.predecessor(ret), pred);
        assert_eq!(g.verify(), Ok(()));
    }

    #[test]
    fn test_unproxify_follows_chain() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        let exit = g.add_loop_exit(begin);
        let v = g.const_int(3);
        let p1 = g.add_proxy(ProxyKind::Value, v, exit);
        let p2 = g.add_proxy(ProxyKind::Value, p1, exit);
        assert_eq!(unproxify(&g, p2), v);
        assert_eq!(unproxify(&g, v), v);
    }
}
