//! Sibling fusion: `ParallelDo`s sharing one input collapse into a
//! single `MultipleParallelDo` that reads the input once.

use std::collections::HashSet;

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, DeferredOp, FlowGraph, OpId};

/// Fuses every sibling group of `ParallelDo`s reachable upward from
/// `output`.
pub fn fuse_sibling_parallel_dos(
    graph: &mut FlowGraph,
    output: CollectionId,
) -> Result<(), PlanError> {
    let mut visited = HashSet::new();
    fuse(graph, output, &mut visited)
}

fn fuse(
    graph: &mut FlowGraph,
    c: CollectionId,
    visited: &mut HashSet<CollectionId>,
) -> Result<(), PlanError> {
    if !visited.insert(c) {
        return Ok(());
    }
    let Some(producer) = graph.producer(c) else {
        return Ok(());
    };

    if let DeferredOp::ParallelDo { origin, .. } = graph.op(producer) {
        let origin = *origin;
        fuse_consumers_of(graph, origin)?;
        if !graph.is_materialized(origin) {
            fuse(graph, origin, visited)?;
        }
    } else {
        for origin in graph.op(producer).origins() {
            if !graph.is_materialized(origin) {
                fuse(graph, origin, visited)?;
            }
        }
    }
    Ok(())
}

/// Collapses the non-combining `ParallelDo` consumers of `shared` into
/// one `MultipleParallelDo`, if there are at least two. A combiner never
/// joins a sibling group; it stays attached to its shuffle.
fn fuse_consumers_of(graph: &mut FlowGraph, shared: CollectionId) -> Result<(), PlanError> {
    let consumers = graph.consumers(shared).to_vec();
    let siblings: Vec<OpId> = consumers
        .iter()
        .copied()
        .filter(|&op| {
            matches!(
                graph.op(op),
                DeferredOp::ParallelDo {
                    combining: false,
                    ..
                }
            )
        })
        .collect();
    if siblings.len() < 2 {
        return Ok(());
    }

    // The fused op takes the list position of the first sibling, leaving
    // the order of non-ParallelDo consumers untouched.
    let index = consumers
        .iter()
        .position(|op| siblings.contains(op))
        .expect("siblings are drawn from the consumer list");

    let mut dests = Vec::with_capacity(siblings.len());
    for &sibling in &siblings {
        let DeferredOp::ParallelDo { f, dest, .. } = graph.op(sibling) else {
            unreachable!("siblings are filtered to ParallelDo");
        };
        dests.push((f.clone(), *dest));
    }
    debug!(?shared, count = siblings.len(), "fusing sibling parallel_dos");

    for &sibling in &siblings {
        graph.remove_op(sibling)?;
    }
    let fused = graph.insert_op(DeferredOp::MultipleParallelDo {
        origin: shared,
        dests,
    })?;
    graph.position_consumer(shared, fused, index)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{DoFn, ElemType};
    use crate::graph::FlowGraphBuilder;

    fn ints() -> ElemType {
        ElemType::new("ints")
    }

    fn labelled(label: &str) -> DoFn {
        DoFn::new(label, |v, emit| emit(v))
    }

    #[test]
    fn three_siblings_collapse_into_one_fanout() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let out_b = b.parallel_do(a, labelled("f_b"), ints()).unwrap();
        let out_c = b.parallel_do(a, labelled("f_c"), ints()).unwrap();
        let out_d = b.parallel_do(a, labelled("f_d"), ints()).unwrap();
        for (out, name) in [(out_b, "b"), (out_c, "c"), (out_d, "d")] {
            b.mark_output(out, name);
        }
        let mut g = b.finish();

        for out in [out_b, out_c, out_d] {
            fuse_sibling_parallel_dos(&mut g, out).unwrap();
        }
        g.check_edges().unwrap();

        let [fused] = g.consumers(a) else {
            panic!("expected a single fused consumer");
        };
        let DeferredOp::MultipleParallelDo { dests, .. } = g.op(*fused) else {
            panic!("expected a multiple_parallel_do");
        };
        let labels: Vec<_> = dests.iter().map(|(f, d)| (f.label(), *d)).collect();
        assert_eq!(
            labels,
            vec![("f_b", out_b), ("f_c", out_c), ("f_d", out_d)]
        );
        for out in [out_b, out_c, out_d] {
            assert_eq!(g.producer(out), Some(*fused));
        }
    }

    #[test]
    fn lone_parallel_do_is_untouched() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let out = b.parallel_do(a, labelled("f"), ints()).unwrap();
        b.mark_output(out, "out");
        let mut g = b.finish();

        fuse_sibling_parallel_dos(&mut g, out).unwrap();
        g.check_edges().unwrap();
        assert!(matches!(
            g.op(g.producer(out).unwrap()),
            DeferredOp::ParallelDo { .. }
        ));
    }

    #[test]
    fn non_parallel_do_consumers_keep_their_order() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ElemType::new("pairs"));
        let grouped = b.group_by_key(a, ElemType::new("groups")).unwrap();
        let s1 = b.parallel_do(a, labelled("s1"), ints()).unwrap();
        let s2 = b.parallel_do(a, labelled("s2"), ints()).unwrap();
        for (out, name) in [(grouped, "g"), (s1, "s1"), (s2, "s2")] {
            b.mark_output(out, name);
        }
        let mut g = b.finish();

        for out in [grouped, s1, s2] {
            fuse_sibling_parallel_dos(&mut g, out).unwrap();
        }
        g.check_edges().unwrap();

        let consumers = g.consumers(a);
        assert_eq!(consumers.len(), 2);
        assert!(matches!(g.op(consumers[0]), DeferredOp::GroupByKey { .. }));
        assert!(matches!(
            g.op(consumers[1]),
            DeferredOp::MultipleParallelDo { .. }
        ));
    }

    #[test]
    fn combiner_never_joins_a_sibling_group() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ElemType::new("pairs"));
        let grouped = b.group_by_key(a, ElemType::new("groups")).unwrap();
        let combined = b
            .combine_values(grouped, labelled("sum"), ElemType::new("pairs"))
            .unwrap();
        let t1 = b.parallel_do(grouped, labelled("t1"), ints()).unwrap();
        let t2 = b.parallel_do(grouped, labelled("t2"), ints()).unwrap();
        for (out, name) in [(combined, "combined"), (t1, "t1"), (t2, "t2")] {
            b.mark_output(out, name);
        }
        let mut g = b.finish();

        for out in [combined, t1, t2] {
            fuse_sibling_parallel_dos(&mut g, out).unwrap();
        }
        g.check_edges().unwrap();

        // The plain transforms fused; the combiner did not.
        let cp = g.producer(combined).unwrap();
        assert!(g.op(cp).is_combining());
        assert_eq!(g.producer(t1), g.producer(t2));
        assert!(matches!(
            g.op(g.producer(t1).unwrap()),
            DeferredOp::MultipleParallelDo { .. }
        ));
    }
}
