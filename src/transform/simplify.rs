//! Redundant phi/proxy elimination and loop normalization.
//!
//! A phi whose inputs all agree (ignoring references to itself) carries no
//! information; neither does a loop-exit proxy wrapping a value that is
//! already known to equal its loop-entry incarnation. Removing one such node
//! can expose another, so elimination cascades through the phi/proxy
//! consumers of each deleted node, driven by an explicit worklist.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;

use super::kill::{remove_exits, try_kill_unused};

// =============================================================================
// Redundancy cascade
// =============================================================================

/// Eliminate `phi` if all its non-self inputs agree, then recheck any phi or
/// proxy that used it.
pub fn check_redundant_phi(graph: &mut Graph, phi: NodeId) {
    debug_assert!(graph.op(phi).is_phi());
    simplify_cascade(graph, phi);
}

/// Eliminate `proxy` if its wrapped value provably equals its loop-entry
/// incarnation, then recheck any phi or proxy that used it.
pub fn check_redundant_proxy(graph: &mut Graph, proxy: NodeId) {
    debug_assert!(graph.op(proxy).is_proxy());
    simplify_cascade(graph, proxy);
}

fn simplify_cascade(graph: &mut Graph, root: NodeId) {
    let mut work = vec![root];
    while let Some(node) = work.pop() {
        if !graph.is_alive(node) {
            continue;
        }
        let replacement = match graph.op(node) {
            op if op.is_phi() => redundant_phi_value(graph, node),
            op if op.is_proxy() => redundant_proxy_value(graph, node),
            _ => None,
        };
        if let Some(value) = replacement {
            let users = graph.usages_snapshot(node);
            graph.replace_at_usages(node, value);
            graph.safe_delete(node);
            for user in users {
                if graph.is_alive(user)
                    && (graph.op(user).is_phi() || graph.op(user).is_proxy())
                {
                    work.push(user);
                }
            }
        }
    }
}

/// The single distinct non-self input of a phi, or None when the phi is
/// either genuinely merging or a pure self-cycle (left for the kill pass).
fn redundant_phi_value(graph: &Graph, phi: NodeId) -> Option<NodeId> {
    let count = graph.phi_value_count(phi);
    if count <= 1 {
        // A one-input phi belongs to a merge mid-reduction; leave it alone.
        return None;
    }
    let mut single = None;
    for index in 0..count {
        let value = graph.phi_value_at(phi, index);
        if value == phi {
            continue;
        }
        match single {
            None => single = Some(value),
            Some(seen) if seen == value => {}
            Some(_) => return None,
        }
    }
    single
}

/// A proxy is redundant when its value matches, under phi resolution at the
/// loop entry, some value recorded in the loop header's state.
fn redundant_proxy_value(graph: &Graph, proxy: NodeId) -> Option<NodeId> {
    let exit = graph.input(proxy, 1);
    if !exit.is_valid() || !matches!(graph.op(exit), Operator::LoopExit) {
        return None;
    }
    let begin = graph.input(exit, 1);
    if !begin.is_valid() {
        return None;
    }
    let state = graph.state_after(begin);
    if !state.is_valid() {
        return None;
    }
    let value = graph.input(proxy, 0);
    let slots = graph.frame_state_info(state).slot_count();
    for slot in 0..slots {
        let mut recorded = graph.state_slot_at(state, slot);
        if !recorded.is_valid() {
            continue;
        }
        if graph.is_phi_at_merge(recorded, begin) {
            // Resolve to the value the phi had on the loop-entry path.
            debug_assert_eq!(graph.forward_end_count(begin), 1);
            recorded = graph.phi_value_at(recorded, 0);
        }
        if recorded == value {
            return Some(value);
        }
    }
    None
}

// =============================================================================
// Merge reductions
// =============================================================================

/// Collapse a merge with a single remaining end into a pass-through: phis
/// fold to their one value and the end's predecessor flows straight into the
/// merge's successor.
pub fn reduce_trivial_merge(graph: &mut Graph, merge: NodeId) {
    debug_assert!(graph.op(merge).is_merge());
    debug_assert_eq!(graph.forward_end_count(merge), 1);
    debug_assert_eq!(graph.loop_end_count(merge), 0);
    for phi in graph.phis(merge) {
        debug_assert_eq!(graph.phi_value_count(phi), 1);
        let value = graph.phi_value_at(phi, 0);
        debug_assert!(value != phi);
        graph.replace_at_usages(phi, value);
        graph.safe_delete(phi);
    }
    if matches!(graph.op(merge), Operator::LoopBegin { .. }) {
        remove_exits(graph, merge);
    }
    let end = graph.forward_end_at(merge, 0);
    let successor = graph.next(merge);
    let state = graph.state_after(merge);
    graph.safe_delete(merge);
    graph.replace_at_predecessor(end, successor);
    graph.safe_delete(end);
    if state.is_valid() && graph.is_alive(state) {
        try_kill_unused(graph, state);
    }
}

/// Degrade a loop header with no remaining back edges into a non-loop
/// pass-through: a single entry collapses entirely, several entries leave a
/// plain merge behind.
pub fn reduce_degenerate_loop_begin(graph: &mut Graph, begin: NodeId) {
    debug_assert!(matches!(graph.op(begin), Operator::LoopBegin { .. }));
    debug_assert_eq!(graph.loop_end_count(begin), 0);
    if graph.forward_end_count(begin) == 1 {
        reduce_trivial_merge(graph, begin);
    } else {
        remove_exits(graph, begin);
        graph.set_operator(begin, Operator::Merge);
    }
}

// =============================================================================
// Loop normalization
// =============================================================================

/// Remove degenerate loop headers and eagerly drop redundant phis and exit
/// proxies on the surviving loops.
///
/// Removing a degenerate loop can make an unrelated phi trivially
/// redundant, so every phi in the graph is rechecked once after any
/// removal.
pub fn normalize_loops(graph: &mut Graph) {
    let mut loop_removed = false;
    let headers: Vec<NodeId> = graph
        .alive_ids()
        .filter(|&n| matches!(graph.op(n), Operator::LoopBegin { .. }))
        .collect();
    for begin in headers {
        if !graph.is_alive(begin) {
            continue;
        }
        if graph.loop_end_count(begin) == 0 {
            debug_assert_eq!(graph.forward_end_count(begin), 1);
            reduce_degenerate_loop_begin(graph, begin);
            loop_removed = true;
        } else {
            for phi in graph.phis(begin) {
                if graph.is_alive(phi) {
                    check_redundant_phi(graph, phi);
                }
            }
            for exit in graph.loop_exits(begin) {
                for proxy in graph.proxies(exit) {
                    if graph.is_alive(proxy) {
                        check_redundant_proxy(graph, proxy);
                    }
                }
            }
        }
    }
    if loop_removed {
        let phis: Vec<NodeId> = graph
            .alive_ids()
            .filter(|&n| graph.op(n).is_phi())
            .collect();
        for phi in phis {
            if graph.is_alive(phi) {
                check_redundant_phi(graph, phi);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{FrameStateInfo, MethodId, PhiKind, ProxyKind};
    use crate::ir::NodeId;

    #[test]
    fn test_phi_with_equal_inputs_folds() {
        let mut g = Graph::new();
        let e0 = g.add_end();
        let e1 = g.add_end();
        let merge = g.add_merge(&[e0, e1]);
        let v = g.const_int(4);
        let phi = g.add_phi(PhiKind::Value, merge, &[v, v]);
        let ret = g.add_node(Operator::Return, &[phi]);

        check_redundant_phi(&mut g, phi);
        assert!(!g.is_alive(phi));
        assert_eq!(g.input(ret, 0), v);
    }

    #[test]
    fn test_phi_ignores_self_reference() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        g.add_loop_end(begin);
        let v = g.const_int(1);
        let phi = g.add_phi(PhiKind::Value, begin, &[v, NodeId::INVALID]);
        g.set_input(phi, 2, phi);
        let ret = g.add_node(Operator::Return, &[phi]);

        check_redundant_phi(&mut g, phi);
        assert!(!g.is_alive(phi));
        assert_eq!(g.input(ret, 0), v);
    }

    #[test]
    fn test_genuine_phi_untouched_and_idempotent() {
        let mut g = Graph::new();
        let e0 = g.add_end();
        let e1 = g.add_end();
        let merge = g.add_merge(&[e0, e1]);
        let a = g.const_int(1);
        let b = g.const_int(2);
        let phi = g.add_phi(PhiKind::Value, merge, &[a, b]);

        check_redundant_phi(&mut g, phi);
        assert!(g.is_alive(phi));
        check_redundant_phi(&mut g, phi);
        assert!(g.is_alive(phi));
        assert_eq!(g.phi_value_at(phi, 0), a);
        assert_eq!(g.phi_value_at(phi, 1), b);
    }

    #[test]
    fn test_cascade_through_phi_usages() {
        let mut g = Graph::new();
        let e0 = g.add_end();
        let e1 = g.add_end();
        let inner = g.add_merge(&[e0, e1]);
        let v = g.const_int(3);
        let inner_phi = g.add_phi(PhiKind::Value, inner, &[v, v]);

        let e2 = g.add_end();
        let e3 = g.add_end();
        let outer = g.add_merge(&[e2, e3]);
        // Becomes redundant once the inner phi folds to v.
        let outer_phi = g.add_phi(PhiKind::Value, outer, &[inner_phi, v]);

        check_redundant_phi(&mut g, inner_phi);
        assert!(!g.is_alive(inner_phi));
        assert!(!g.is_alive(outer_phi));
    }

    #[test]
    fn test_redundant_proxy_of_entry_value() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        g.add_loop_end(begin);
        let init = g.const_int(0);
        let step = g.const_int(1);
        let phi = g.add_phi(PhiKind::Value, begin, &[init, step]);
        let info = FrameStateInfo {
            method: MethodId(1),
            code: MethodId(1),
            bci: 0,
            locals: 1,
            stack: 0,
            locks: 0,
            rethrow_exception: false,
            during_call: false,
        };
        let state = g.add_frame_state(info, &[phi], NodeId::INVALID, &[]);
        g.set_state_after(begin, state);

        let exit = g.add_loop_exit(begin);
        // Wraps the value the phi had at loop entry.
        let proxy = g.add_proxy(ProxyKind::Value, init, exit);
        let ret = g.add_node(Operator::Return, &[proxy]);

        check_redundant_proxy(&mut g, proxy);
        assert!(!g.is_alive(proxy));
        assert_eq!(g.input(ret, 0), init);
    }

    #[test]
    fn test_non_redundant_proxy_untouched() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        g.add_loop_end(begin);
        let exit = g.add_loop_exit(begin);
        let unrelated = g.const_int(42);
        let proxy = g.add_proxy(ProxyKind::Value, unrelated, exit);

        // No state on the header: nothing to match against.
        check_redundant_proxy(&mut g, proxy);
        assert!(g.is_alive(proxy));
    }

    #[test]
    fn test_reduce_trivial_merge_splices_chain() {
        let mut g = Graph::new();
        let pred = g.add_node(Operator::Begin, &[]);
        let end = g.add_end();
        g.set_next(pred, end);
        let merge = g.add_merge(&[end]);
        let v = g.const_int(5);
        let phi = g.add_phi(PhiKind::Value, merge, &[v]);
        let ret = g.add_node(Operator::Return, &[phi]);
        g.set_next(merge, ret);

        reduce_trivial_merge(&mut g, merge);
        assert!(!g.is_alive(merge));
        assert!(!g.is_alive(end));
        assert!(!g.is_alive(phi));
        assert_eq!(g.input(ret, 0), v);
        assert_eq!(g.predecessor(ret), pred);
        assert_eq!(g.verify(), Ok(()));
    }

    #[test]
    fn test_normalize_removes_degenerate_loop() {
        let mut g = Graph::new();
        let pred = g.add_node(Operator::Begin, &[]);
        let entry = g.add_end();
        g.set_next(pred, entry);
        let begin = g.add_loop_begin(entry);
        let v = g.const_int(2);
        let phi = g.add_phi(PhiKind::Value, begin, &[v]);
        let ret = g.add_node(Operator::Return, &[phi]);
        g.set_next(begin, ret);

        normalize_loops(&mut g);
        assert!(!g.is_alive(begin));
        assert!(!g.is_alive(phi));
        assert_eq!(g.input(ret, 0), v);
        assert_eq!(g.predecessor(ret), pred);
        assert_eq!(g.verify(), Ok(()));
    }

    #[test]
    fn test_normalize_cleans_surviving_loop() {
        let mut g = Graph::new();
        let entry = g.add_end();
        let begin = g.add_loop_begin(entry);
        g.add_loop_end(begin);
        let v = g.const_int(9);
        // Same value on entry and back edge.
        let phi = g.add_phi(PhiKind::Value, begin, &[v, v]);
        let ret = g.add_node(Operator::Return, &[phi]);

        normalize_loops(&mut g);
        assert!(!g.is_alive(phi));
        assert_eq!(g.input(ret, 0), v);
    }
}
