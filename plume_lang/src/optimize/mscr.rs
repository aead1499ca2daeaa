//! MSCR formation: carves the rewritten graph into
//! MapShuffleCombineReduce units, each centered on one or more
//! `GroupByKey`s that share map-side sources.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, DeferredOp, FlowGraph, OpId};
use crate::plan::{Mscr, OutputChannel};

/// Discovers the MSCR units reachable from `outputs`.
///
/// Map-only outputs (no `GroupByKey` upstream) yield no unit; callers
/// needing an MSCR to emit an input directly insert an identity
/// `GroupByKey` upstream.
pub fn mscr_blocks(
    graph: &FlowGraph,
    outputs: &[CollectionId],
) -> Result<Vec<Mscr>, PlanError> {
    let mut gbks = Vec::new();
    let mut seen = HashSet::new();
    for &output in outputs {
        collect_gbks(graph, output, &mut seen, &mut gbks);
    }
    if gbks.is_empty() {
        return Ok(Vec::new());
    }

    // Reduce-side channels first; their ops bound every map-side walk.
    let output_set: HashSet<CollectionId> = outputs.iter().copied().collect();
    let channels: Vec<OutputChannel> = gbks
        .iter()
        .map(|&gbk| channel_for(graph, gbk, &output_set))
        .collect();
    let mut claimed: HashSet<OpId> = gbks.iter().copied().collect();
    for ch in &channels {
        claimed.extend(ch.combiner);
        claimed.extend(ch.reducer);
    }

    let mut sources = Vec::with_capacity(gbks.len());
    let mut map_ops = Vec::with_capacity(gbks.len());
    for &gbk in &gbks {
        let (s, m) = map_side(graph, gbk, &claimed)?;
        sources.push(s);
        map_ops.push(m);
    }

    // Union shuffles whose map-side subgraphs share a source collection.
    let mut union = UnionFind::new(gbks.len());
    let mut by_source: HashMap<CollectionId, usize> = HashMap::new();
    for (i, srcs) in sources.iter().enumerate() {
        for &src in srcs {
            match by_source.get(&src) {
                Some(&j) => union.merge(i, j),
                None => {
                    by_source.insert(src, i);
                }
            }
        }
    }

    // Assemble one MSCR per union class, in shuffle discovery order.
    let mut class_index: HashMap<usize, usize> = HashMap::new();
    let mut mscrs: Vec<Mscr> = Vec::new();
    for i in 0..gbks.len() {
        let root = union.find(i);
        let slot = *class_index.entry(root).or_insert_with(|| {
            mscrs.push(Mscr::default());
            mscrs.len() - 1
        });
        let mscr = &mut mscrs[slot];
        mscr.inputs.extend(sources[i].iter().copied());
        mscr.ops.extend(map_ops[i].iter().copied());
        mscr.ops.insert(gbks[i]);
        let ch = channels[i].clone();
        mscr.ops.extend(ch.combiner);
        mscr.ops.extend(ch.reducer);
        mscr.output_channels.insert(ch.output, ch);
    }
    debug!(count = mscrs.len(), shuffles = gbks.len(), "formed MSCR blocks");
    Ok(mscrs)
}

fn collect_gbks(
    graph: &FlowGraph,
    c: CollectionId,
    seen: &mut HashSet<CollectionId>,
    gbks: &mut Vec<OpId>,
) {
    if !seen.insert(c) {
        return;
    }
    let Some(producer) = graph.producer(c) else {
        return;
    };
    if matches!(graph.op(producer), DeferredOp::GroupByKey { .. }) {
        gbks.push(producer);
    }
    for origin in graph.op(producer).origins() {
        if !graph.is_materialized(origin) {
            collect_gbks(graph, origin, seen, gbks);
        }
    }
}

/// Builds the shuffle+reduce channel hanging below one `GroupByKey`: an
/// optional combiner, then an optional trailing reducer whose destination
/// is a boundary (materialized, named output, or consumed by nothing).
/// Anything further downstream is map-side territory of the next unit.
fn channel_for(
    graph: &FlowGraph,
    gbk: OpId,
    outputs: &HashSet<CollectionId>,
) -> OutputChannel {
    let DeferredOp::GroupByKey { dest, .. } = graph.op(gbk) else {
        unreachable!("channel_for is only called on GroupByKey ops");
    };
    let mut terminal = *dest;
    let mut combiner = None;
    if let [only] = graph.consumers(terminal)
        && graph.op(*only).is_combining()
    {
        combiner = Some(*only);
        terminal = graph
            .op(*only)
            .single_dest()
            .expect("a ParallelDo has a single destination");
    }

    let mut reducer = None;
    if let [only] = graph.consumers(terminal)
        && let DeferredOp::ParallelDo {
            combining: false,
            dest,
            ..
        } = graph.op(*only)
    {
        let dest = *dest;
        let is_boundary = graph.is_materialized(dest)
            || outputs.contains(&dest)
            || graph.consumers(dest).is_empty();
        if is_boundary {
            reducer = Some(*only);
            terminal = dest;
        }
    }

    OutputChannel {
        group_by_key: gbk,
        combiner,
        reducer,
        output: terminal,
    }
}

/// Walks the map-side subgraph above one `GroupByKey`, returning the
/// source collections entering it and the ops it subsumes. Stops at
/// materialized collections, producerless collections, and ops already
/// claimed by a shuffle or its channel.
fn map_side(
    graph: &FlowGraph,
    gbk: OpId,
    claimed: &HashSet<OpId>,
) -> Result<(BTreeSet<CollectionId>, BTreeSet<OpId>), PlanError> {
    let mut sources = BTreeSet::new();
    let mut ops = BTreeSet::new();
    let mut stack = graph.op(gbk).origins();
    let mut seen: HashSet<CollectionId> = stack.iter().copied().collect();

    while let Some(c) = stack.pop() {
        let producer = graph.producer(c);
        let boundary = graph.is_materialized(c)
            || producer.is_none_or(|p| claimed.contains(&p));
        if boundary {
            sources.insert(c);
            continue;
        }
        let producer = producer.expect("boundary check covers the producerless case");
        match graph.op(producer) {
            DeferredOp::ParallelDo {
                combining: true, ..
            } => {
                // A combiner that no channel claimed has no shuffle
                // directly upstream.
                return Err(PlanError::unsupported(
                    producer,
                    "combine_values detached from any group_by_key",
                ));
            }
            DeferredOp::ParallelDo { .. }
            | DeferredOp::Flatten { .. }
            | DeferredOp::MultipleParallelDo { .. }
            | DeferredOp::OneToOne { .. } => {
                ops.insert(producer);
                for origin in graph.op(producer).origins() {
                    if seen.insert(origin) {
                        stack.push(origin);
                    }
                }
            }
            DeferredOp::GroupByKey { .. } => {
                // Every output-reachable shuffle is claimed; landing here
                // means the walk strayed outside that region.
                sources.insert(c);
            }
        }
    }
    Ok((sources, ops))
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn merge(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the earlier-discovered shuffle as the class root so
            // MSCR order follows discovery order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{DoFn, ElemType};
    use crate::graph::FlowGraphBuilder;

    fn pairs() -> ElemType {
        ElemType::new("pairs")
    }

    fn noop(label: &str) -> DoFn {
        DoFn::new(label, |v, emit| emit(v))
    }

    #[test]
    fn single_shuffle_forms_one_unit() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", pairs());
        let mapped = b.parallel_do(a, noop("map"), pairs()).unwrap();
        let grouped = b.group_by_key(mapped, ElemType::new("groups")).unwrap();
        let combined = b
            .combine_values(grouped, noop("sum"), pairs())
            .unwrap();
        let reduced = b.parallel_do(combined, noop("fmt"), pairs()).unwrap();
        b.mark_output(reduced, "out");
        let g = b.finish();

        let mscrs = mscr_blocks(&g, &[reduced]).unwrap();
        assert_eq!(mscrs.len(), 1);
        let m = &mscrs[0];
        assert_eq!(m.inputs, BTreeSet::from([a]));
        assert_eq!(m.output_channels.len(), 1);
        let ch = &m.output_channels[&reduced];
        assert!(ch.combiner.is_some());
        assert!(ch.reducer.is_some());
        assert_eq!(ch.output, reduced);
        // map op + gbk + combiner + reducer
        assert_eq!(m.ops.len(), 4);
    }

    #[test]
    fn shuffles_sharing_a_source_are_unioned() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", pairs());
        let left = b.parallel_do(a, noop("left"), pairs()).unwrap();
        let right = b.parallel_do(a, noop("right"), pairs()).unwrap();
        let g1 = b.group_by_key(left, ElemType::new("groups")).unwrap();
        let g2 = b.group_by_key(right, ElemType::new("groups")).unwrap();
        b.mark_output(g1, "g1");
        b.mark_output(g2, "g2");
        let g = b.finish();

        let mscrs = mscr_blocks(&g, &[g1, g2]).unwrap();
        assert_eq!(mscrs.len(), 1);
        let m = &mscrs[0];
        assert_eq!(m.inputs, BTreeSet::from([a]));
        assert_eq!(m.output_channels.len(), 2);
    }

    #[test]
    fn sequential_shuffles_form_separate_units() {
        let mut b = FlowGraphBuilder::new();
        let x = b.input("x", pairs());
        let g1 = b.group_by_key(x, ElemType::new("groups")).unwrap();
        let y = b.parallel_do(g1, noop("rekey"), pairs()).unwrap();
        let g2 = b.group_by_key(y, ElemType::new("groups")).unwrap();
        let z = b.parallel_do(g2, noop("fmt"), pairs()).unwrap();
        b.mark_output(z, "z");
        let g = b.finish();

        let mscrs = mscr_blocks(&g, &[z]).unwrap();
        assert_eq!(mscrs.len(), 2);
    }

    #[test]
    fn map_only_output_yields_no_unit() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", pairs());
        let out = b.parallel_do(a, noop("map"), pairs()).unwrap();
        b.mark_output(out, "out");
        let g = b.finish();

        let mscrs = mscr_blocks(&g, &[out]).unwrap();
        assert!(mscrs.is_empty());
    }
}
