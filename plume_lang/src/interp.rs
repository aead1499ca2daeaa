//! A single-process reference interpreter for lazy graphs.
//!
//! Executes every op over in-memory `Vec<Datum>` streams, in a data
//! dependency order. This is the executable semantics the rewrite
//! passes must preserve; the tests run a graph before and after
//! optimization and compare per-output multisets.

use std::collections::HashMap;

use tracing::trace;

use crate::error::PlanError;
use crate::graph::{CollectionId, Datum, DeferredOp, FlowGraph, OpId};

/// Runs `graph` over the given input streams and returns the elements
/// delivered to each requested output.
///
/// `feeds` maps source collections to their elements; any collection
/// with no producer and no feed is treated as empty. Shuffle outputs are
/// emitted in key order so runs are deterministic.
pub fn execute(
    graph: &FlowGraph,
    feeds: &HashMap<CollectionId, Vec<Datum>>,
    outputs: &[CollectionId],
) -> Result<HashMap<CollectionId, Vec<Datum>>, PlanError> {
    let mut values: HashMap<CollectionId, Vec<Datum>> = feeds.clone();
    for (id, collection) in graph.collections() {
        if collection.producer().is_none() {
            values.entry(id).or_default();
        }
    }

    let mut pending: Vec<OpId> = graph.ops().map(|(id, _)| id).collect();
    while !pending.is_empty() {
        let mut progressed = false;
        pending.retain(|&op| {
            let ready = graph
                .op(op)
                .origins()
                .iter()
                .all(|origin| values.contains_key(origin));
            if !ready {
                return true;
            }
            run_op(graph, op, &mut values);
            progressed = true;
            false
        });
        if !progressed {
            // Origins that never resolve mean the op set is not acyclic.
            let stuck = pending[0];
            return Err(PlanError::invariant(
                stuck,
                "op inputs never become available (cyclic graph?)",
            ));
        }
    }

    Ok(outputs
        .iter()
        .map(|&out| (out, values.get(&out).cloned().unwrap_or_default()))
        .collect())
}

fn run_op(graph: &FlowGraph, op: OpId, values: &mut HashMap<CollectionId, Vec<Datum>>) {
    trace!(?op, kind = graph.op(op).kind(), "running op");
    match graph.op(op) {
        DeferredOp::ParallelDo { f, origin, dest, .. } => {
            let mut out = Vec::new();
            for v in values[origin].clone() {
                f.call(v, &mut |w| out.push(w));
            }
            values.insert(*dest, out);
        }
        DeferredOp::GroupByKey { origin, dest } => {
            let mut groups: std::collections::BTreeMap<Datum, Vec<Datum>> = Default::default();
            for v in values[origin].clone() {
                let (key, value) = match v {
                    Datum::Pair(k, v) => (*k, *v),
                    // Non-pair elements shuffle under themselves.
                    other => (other.clone(), other),
                };
                groups.entry(key).or_default().push(value);
            }
            let grouped = groups
                .into_iter()
                .map(|(k, vs)| Datum::Pair(Box::new(k), Box::new(Datum::Seq(vs))))
                .collect();
            values.insert(*dest, grouped);
        }
        DeferredOp::Flatten { origins, dest } => {
            let mut out = Vec::new();
            for origin in origins {
                out.extend(values[origin].iter().cloned());
            }
            values.insert(*dest, out);
        }
        DeferredOp::MultipleParallelDo { origin, dests } => {
            let input = values[origin].clone();
            for (f, dest) in dests {
                let mut out = Vec::new();
                for v in input.iter().cloned() {
                    f.call(v, &mut |w| out.push(w));
                }
                values.insert(*dest, out);
            }
        }
        DeferredOp::OneToOne { origin, dest } => {
            let out = values[origin].clone();
            values.insert(*dest, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{DoFn, ElemType};
    use crate::graph::FlowGraphBuilder;

    fn ints() -> ElemType {
        ElemType::new("ints")
    }

    #[test]
    fn wordcount_shape_runs_end_to_end() {
        let mut b = FlowGraphBuilder::new();
        let lines = b.input("lines", ElemType::new("lines"));
        let words = b
            .parallel_do(
                lines,
                DoFn::new("split", |v, emit| {
                    if let Datum::Str(line) = v {
                        for word in line.split_whitespace() {
                            emit(Datum::pair(word, 1));
                        }
                    }
                }),
                ElemType::new("pairs"),
            )
            .unwrap();
        let grouped = b.group_by_key(words, ElemType::new("groups")).unwrap();
        let counts = b
            .combine_values(
                grouped,
                DoFn::new("count", |v, emit| {
                    if let Datum::Pair(k, vs) = v
                        && let Datum::Seq(vs) = *vs
                    {
                        emit(Datum::Pair(
                            k,
                            Box::new(Datum::Int(vs.len() as i64)),
                        ));
                    }
                }),
                ElemType::new("pairs"),
            )
            .unwrap();
        b.mark_output(counts, "counts");
        let g = b.finish();

        let feeds = [(
            lines,
            vec![Datum::from("a b a"), Datum::from("b a")],
        )]
        .into();
        let results = execute(&g, &feeds, &[counts]).unwrap();
        assert_eq!(
            results[&counts],
            vec![Datum::pair("a", 3), Datum::pair("b", 2)]
        );
    }

    #[test]
    fn unfed_source_is_empty() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let out = b
            .parallel_do(a, DoFn::new("id", |v, emit| emit(v)), ints())
            .unwrap();
        b.mark_output(out, "out");
        let g = b.finish();

        let results = execute(&g, &HashMap::new(), &[out]).unwrap();
        assert!(results[&out].is_empty());
    }
}
