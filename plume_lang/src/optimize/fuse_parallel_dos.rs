//! Producer-consumer fusion: collapses `ParallelDo` chains into a single
//! op whose function is the emitter composition of the pair.

use std::collections::HashSet;

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, DeferredOp, DoFn, FlowGraph};

/// Fuses every `ParallelDo` producer-consumer pair reachable upward from
/// `output`.
pub fn fuse_parallel_dos(graph: &mut FlowGraph, output: CollectionId) -> Result<(), PlanError> {
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

    // Fuse the chain ending at this node to fixed point. Each successful
    // fusion removes one ParallelDo between here and the chain's head, so
    // the loop terminates.
    loop {
        let Some(p1) = graph.producer(c) else { break };
        let DeferredOp::ParallelDo {
            f: f1, origin: o1, ..
        } = graph.op(p1)
        else {
            break;
        };
        let (f1, o1) = (f1.clone(), *o1);
        if graph.is_materialized(o1) {
            break;
        }
        let Some(p2) = graph.producer(o1) else { break };
        let DeferredOp::ParallelDo {
            f: f2,
            combining,
            origin: o2,
            ..
        } = graph.op(p2)
        else {
            break;
        };
        let (f2, o2) = (f2.clone(), *o2);

        // A combiner stays attached to its shuffle.
        if *combining
            && graph
                .producer(o2)
                .is_some_and(|p| matches!(graph.op(p), DeferredOp::GroupByKey { .. }))
        {
            break;
        }

        let fused = DoFn::compose(&f1, &f2);
        debug!(consumer = ?p1, producer = ?p2, f = fused.label(), "fusing parallel_do pair");

        graph.remove_op(p1)?;
        if graph.consumers(o1).is_empty() && !graph.is_materialized(o1) {
            // The intermediate is orphaned outright.
            graph.remove_op(p2)?;
        }
        graph.insert_op(DeferredOp::ParallelDo {
            f: fused,
            combining: false,
            origin: o2,
            dest: c,
        })?;
    }

    // Continue upward through whatever now produces this node.
    if let Some(producer) = graph.producer(c) {
        for origin in graph.op(producer).origins() {
            if !graph.is_materialized(origin) {
                fuse(graph, origin, visited)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{Datum, ElemType};
    use crate::graph::FlowGraphBuilder;
    use crate::interp::execute;

    fn ints() -> ElemType {
        ElemType::new("ints")
    }

    fn dup() -> DoFn {
        DoFn::new("dup", |v, emit| {
            emit(v.clone());
            emit(v);
        })
    }

    fn incr() -> DoFn {
        DoFn::new("incr", |v, emit| {
            if let Datum::Int(n) = v {
                emit(Datum::Int(n + 1));
            }
        })
    }

    #[test]
    fn chain_collapses_and_orphans_the_intermediate() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let x = b.parallel_do(a, dup(), ints()).unwrap();
        let y = b.parallel_do(x, incr(), ints()).unwrap();
        b.mark_output(y, "y");
        let mut g = b.finish();

        fuse_parallel_dos(&mut g, y).unwrap();
        g.check_edges().unwrap();

        let p = g.producer(y).unwrap();
        let DeferredOp::ParallelDo { origin, .. } = g.op(p) else {
            panic!("expected a fused parallel_do");
        };
        assert_eq!(*origin, a);
        assert_eq!(g.consumers(a), &[p]);
        assert_eq!(g.producer(x), None);
        assert!(g.consumers(x).is_empty());

        // Feeding [1, 2] through dup then incr yields [2, 2, 3, 3].
        let feeds = [(a, vec![Datum::Int(1), Datum::Int(2)])].into();
        let results = execute(&g, &feeds, &[y]).unwrap();
        assert_eq!(
            results[&y],
            vec![
                Datum::Int(2),
                Datum::Int(2),
                Datum::Int(3),
                Datum::Int(3)
            ]
        );
    }

    #[test]
    fn long_chain_collapses_to_one_op() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let mut cur = a;
        for _ in 0..4 {
            cur = b.parallel_do(cur, incr(), ints()).unwrap();
        }
        b.mark_output(cur, "out");
        let mut g = b.finish();

        fuse_parallel_dos(&mut g, cur).unwrap();
        g.check_edges().unwrap();

        let p = g.producer(cur).unwrap();
        let DeferredOp::ParallelDo { origin, .. } = g.op(p) else {
            panic!("expected a fused parallel_do");
        };
        assert_eq!(*origin, a);
        assert_eq!(g.ops().count(), 1);
    }

    #[test]
    fn combiner_stays_attached_to_its_shuffle() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ElemType::new("pairs"));
        let grouped = b.group_by_key(a, ElemType::new("groups")).unwrap();
        let combined = b
            .combine_values(
                grouped,
                DoFn::new("sum", |v, emit| emit(v)),
                ElemType::new("pairs"),
            )
            .unwrap();
        let z1 = b.parallel_do(combined, incr(), ints()).unwrap();
        let z2 = b.parallel_do(z1, incr(), ints()).unwrap();
        b.mark_output(z2, "z");
        let mut g = b.finish();

        fuse_parallel_dos(&mut g, z2).unwrap();
        g.check_edges().unwrap();

        // The two plain ParallelDos fused into one, which did not fuse
        // with the combiner above it.
        let p = g.producer(z2).unwrap();
        let DeferredOp::ParallelDo { origin, .. } = g.op(p) else {
            panic!("expected a fused parallel_do");
        };
        assert_eq!(*origin, combined);
        let cp = g.producer(combined).unwrap();
        assert!(g.op(cp).is_combining());
        assert_eq!(g.op(cp).origins(), vec![grouped]);
    }

    #[test]
    fn shared_intermediate_keeps_its_producer() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let x = b.parallel_do(a, dup(), ints()).unwrap();
        let y = b.parallel_do(x, incr(), ints()).unwrap();
        let grouped = b
            .group_by_key(x, ElemType::new("groups"))
            .unwrap();
        b.mark_output(y, "y");
        b.mark_output(grouped, "grouped");
        let mut g = b.finish();

        fuse_parallel_dos(&mut g, y).unwrap();
        g.check_edges().unwrap();

        // y reads a directly now, but x survives for the shuffle.
        let p = g.producer(y).unwrap();
        assert_eq!(g.op(p).origins(), vec![a]);
        assert!(g.producer(x).is_some());
        assert_eq!(g.consumers(x).len(), 1);
    }
}
