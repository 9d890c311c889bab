//! End-to-end tests driving the public surface: graph construction, dead
//! control-flow elimination, fragment duplication and frame rendering
//! working against each other on one graph.

use facet_jit::deopt::{
    ConstValue, FrameBuilder, FrameValue, NullObserver, SlotKind, ValueLocation, ValueLocator,
};
use facet_jit::ir::{
    ArithOp, FrameStateInfo, Graph, MethodId, NodeId, Operator, PhiKind, ProxyKind,
};
use facet_jit::transform::{
    check_redundant_phi, kill_cfg, normalize_loops, LoopFragment, NullTrace,
};

struct NoLocations;

impl ValueLocator for NoLocations {
    fn operand(&self, _node: NodeId) -> Option<ValueLocation> {
        None
    }
}

fn state_info(locals: u16, stack: u16, locks: u16) -> FrameStateInfo {
    FrameStateInfo {
        method: MethodId(1),
        code: MethodId(1),
        bci: 4,
        locals,
        stack,
        locks,
        rethrow_exception: false,
        during_call: false,
    }
}

/// pred -> entry -> LoopBegin -> If -> (body -> LoopEnd | LoopExit -> ret)
/// with an induction phi and a proxied exit value.
struct CountedLoop {
    g: Graph,
    begin: NodeId,
    body: NodeId,
    exit: NodeId,
    phi: NodeId,
    proxy: NodeId,
    ret: NodeId,
}

fn counted_loop() -> CountedLoop {
    let mut g = Graph::new();
    let pred = g.add_node(Operator::Begin, &[]);
    let entry = g.add_end();
    g.set_next(pred, entry);
    let begin = g.add_loop_begin(entry);
    let back = g.add_loop_end(begin);
    let init = g.const_int(0);
    let one = g.const_int(1);
    let phi = g.add_phi(PhiKind::Value, begin, &[init, NodeId::INVALID]);
    let inc = g.binary(ArithOp::Add, phi, one);
    g.set_input(phi, 2, inc);

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
    CountedLoop {
        g,
        begin,
        body,
        exit,
        phi,
        proxy,
        ret,
    }
}

/// Killing the branch arm that feeds a whole loop tears the loop down and
/// leaves the surviving path untouched.
#[test]
fn test_branch_kill_dismantles_loop() {
    let mut l = counted_loop();
    let g = &mut l.g;
    // Put a branch in front: one arm runs the loop, the other returns.
    let cond = g.const_int(1);
    let iff = g.add_node(Operator::If, &[cond]);
    let loop_arm = g.add_node(Operator::Begin, &[]);
    let plain_arm = g.add_node(Operator::Begin, &[]);
    let plain_ret = g.add_node(Operator::Return, &[NodeId::INVALID]);
    g.set_successor(iff, 0, loop_arm);
    g.set_successor(iff, 1, plain_arm);
    g.set_next(plain_arm, plain_ret);
    // Splice the loop's old predecessor out and hang its entry on the arm.
    let entry = g.ends(l.begin)[0];
    let old_pred = g.predecessor(entry);
    g.set_next(old_pred, NodeId::INVALID);
    g.set_next(loop_arm, entry);

    kill_cfg(g, loop_arm, &mut NullTrace);

    for n in [loop_arm, l.begin, l.body, l.exit, l.phi, l.proxy, l.ret] {
        assert!(!g.is_alive(n), "{:?} survived", n);
    }
    assert!(g.is_alive(plain_ret));
    assert_eq!(g.predecessor(plain_ret), plain_arm);
    // Teardown must not leak its poison placeholder.
    assert!(g
        .alive_ids()
        .all(|n| !matches!(g.op(n), Operator::Poison(_))));
    assert_eq!(g.verify(), Ok(()));
}

/// Duplicating a loop body and merging its early exit produces one merge
/// fed by both copies, with the proxied value re-joined through a phi.
#[test]
fn test_duplicated_exit_rejoins_through_phi() {
    let mut l = counted_loop();
    let mut frag = LoopFragment::compute(&l.g, &[l.begin, l.body], &[l.exit]);
    let dup = frag
        .duplicate(&mut l.g, None, None, &mut NullTrace)
        .expect("no replacement conflict");
    assert_eq!(dup.len(), frag.len());

    dup.merge_early_exits(&mut l.g, &mut frag, &[l.exit]);
    let g = &l.g;

    let joined = g.input(l.ret, 0);
    assert!(g.op(joined).is_phi());
    let merge = g.input(joined, 0);
    assert!(matches!(g.op(merge), Operator::Merge));
    assert_eq!(g.end_count(merge), 2);
    assert_eq!(g.next(merge), l.ret);
    // One arm carries the original proxy, the other the duplicate's value.
    assert_eq!(g.phi_value_at(joined, 0), l.proxy);
    let dup_exit = dup.duplicated(l.exit).expect("exit was duplicated");
    assert_eq!(g.next(dup_exit), g.end_at(merge, 1));
    assert_eq!(g.verify(), Ok(()));
}

/// A chain of phis where folding one uncovers the next.
#[test]
fn test_phi_folding_cascades_and_settles() {
    let mut g = Graph::new();
    let c = g.const_int(9);
    let e0 = g.add_end();
    let e1 = g.add_end();
    let m0 = g.add_merge(&[e0, e1]);
    let p0 = g.add_phi(PhiKind::Value, m0, &[c, c]);
    let e2 = g.add_end();
    let e3 = g.add_end();
    let m1 = g.add_merge(&[e2, e3]);
    g.set_next(m0, e2);
    // p1 is only redundant once p0 folds to the constant.
    let p1 = g.add_phi(PhiKind::Value, m1, &[p0, c]);
    let ret = g.add_node(Operator::Return, &[p1]);
    g.set_next(m1, ret);

    check_redundant_phi(&mut g, p0);
    assert!(!g.is_alive(p0));
    assert!(!g.is_alive(p1));
    assert_eq!(g.input(ret, 0), c);

    // A second pass over the survivors changes nothing.
    let alive_before: Vec<NodeId> = g.alive_ids().collect();
    let phis: Vec<NodeId> = g.alive_ids().filter(|&n| g.op(n).is_phi()).collect();
    for phi in phis {
        check_redundant_phi(&mut g, phi);
    }
    let alive_after: Vec<NodeId> = g.alive_ids().collect();
    assert_eq!(alive_before, alive_after);
}

/// A loop header with no back edges is demoted to straight-line control.
#[test]
fn test_normalize_removes_degenerate_loop() {
    let mut g = Graph::new();
    let pred = g.add_node(Operator::Begin, &[]);
    let entry = g.add_end();
    g.set_next(pred, entry);
    let begin = g.add_loop_begin(entry);
    let v = g.const_int(3);
    let ret = g.add_node(Operator::Return, &[v]);
    g.set_next(begin, ret);

    normalize_loops(&mut g);

    assert!(!g.is_alive(begin));
    assert!(!g.is_alive(entry));
    assert!(g.is_alive(ret));
    assert_eq!(g.predecessor(ret), pred);
    assert_eq!(g.verify(), Ok(()));
}

/// Frame rendering observes simplification: once a phi folds to a constant
/// the state slot that held it renders as that constant.
#[test]
fn test_frame_snapshot_after_phi_folding() {
    let mut g = Graph::new();
    let c = g.const_int(17);
    let e0 = g.add_end();
    let e1 = g.add_end();
    let merge = g.add_merge(&[e0, e1]);
    let phi = g.add_phi(PhiKind::Value, merge, &[c, c]);
    let state = g.add_frame_state(state_info(1, 0, 0), &[phi], NodeId::INVALID, &[]);
    g.set_state_after(merge, state);

    check_redundant_phi(&mut g, phi);
    assert!(!g.is_alive(phi));
    assert_eq!(g.local_at(state, 0), c);

    let locator = NoLocations;
    let snapshot = FrameBuilder::new(&g, &locator)
        .build(state, &mut NullObserver)
        .expect("state renders");
    assert_eq!(
        snapshot.frame.values,
        vec![FrameValue::Constant(ConstValue::Int(17))]
    );
    assert_eq!(snapshot.frame.slot_kinds, vec![SlotKind::Long]);
    assert_eq!(
        snapshot.frame.values.len(),
        snapshot.frame.num_locals + snapshot.frame.num_stack + snapshot.frame.num_locks
    );
}

/// The fragment copy is a bijection: same size, same operator roles, in-set
/// edges preserved.
#[test]
fn test_duplicate_is_isomorphic() {
    let mut l = counted_loop();
    let frag = LoopFragment::compute(&l.g, &[l.begin, l.body], &[l.exit]);
    let members: Vec<NodeId> = l.g.alive_ids().filter(|&n| frag.contains(n)).collect();
    let dup = frag
        .duplicate(&mut l.g, None, None, &mut NullTrace)
        .expect("no replacement conflict");

    assert_eq!(dup.len(), members.len());
    for &n in &members {
        let copy = dup.duplicated(n).expect("member was copied");
        assert_ne!(copy, n);
        assert_eq!(
            std::mem::discriminant(&l.g.op(n)),
            std::mem::discriminant(&l.g.op(copy))
        );
        assert_eq!(l.g.input_count(n), l.g.input_count(copy));
        // In-set inputs map through the bijection; boundary inputs stay.
        for i in 0..l.g.input_count(n) {
            let input = l.g.input(n, i);
            if !input.is_valid() {
                continue;
            }
            let expected = dup.duplicated(input).unwrap_or(input);
            assert_eq!(l.g.input(copy, i), expected);
        }
    }
    assert_eq!(l.g.verify(), Ok(()));
}
