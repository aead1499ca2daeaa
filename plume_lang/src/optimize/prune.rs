//! Dead-branch elimination: drops every op whose destinations all fail to
//! reach an output.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, DeferredOp, FlowGraph};

/// Prunes branches below `input` that reach no output. Returns true when
/// `input` itself leads to no output and is prunable by its own upstream.
pub fn remove_unnecessary_ops(
    graph: &mut FlowGraph,
    input: CollectionId,
    outputs: &HashSet<CollectionId>,
) -> Result<bool, PlanError> {
    let mut memo = HashMap::new();
    prune(graph, input, outputs, &mut memo)
}

fn prune(
    graph: &mut FlowGraph,
    c: CollectionId,
    outputs: &HashSet<CollectionId>,
    memo: &mut HashMap<CollectionId, bool>,
) -> Result<bool, PlanError> {
    if let Some(&dead) = memo.get(&c) {
        return Ok(dead);
    }

    for op in graph.consumers(c).to_vec() {
        // A Flatten shared with an already-pruned branch may be gone by
        // the time this origin's snapshot reaches it.
        let Some(deferred) = graph.get_op(op) else {
            continue;
        };
        let dead = match deferred {
            DeferredOp::ParallelDo { dest, .. }
            | DeferredOp::GroupByKey { dest, .. }
            | DeferredOp::Flatten { dest, .. }
            | DeferredOp::OneToOne { dest, .. } => {
                let dest = *dest;
                prune(graph, dest, outputs, memo)?
            }
            DeferredOp::MultipleParallelDo { dests, .. } => {
                // The whole fanout is removable only if every sibling
                // branch is dead; dead branches of a surviving fanout are
                // shrunk away individually. Each branch is visited
                // regardless so its own subtree gets pruned.
                let dests: Vec<CollectionId> = dests.iter().map(|(_, d)| *d).collect();
                let mut dead_dests = Vec::new();
                for dest in dests {
                    if prune(graph, dest, outputs, memo)? {
                        dead_dests.push(dest);
                    }
                }
                let all_dead = dead_dests.len() == graph.op(op).dests().len();
                if !all_dead && !dead_dests.is_empty() {
                    debug!(?op, dropped = dead_dests.len(), "shrinking fanout");
                    graph.prune_fanout_dests(op, &dead_dests)?;
                }
                all_dead
            }
        };
        if dead {
            debug!(?op, "dropping op that reaches no output");
            graph.remove_op(op)?;
        }
    }

    let dead = graph.consumers(c).is_empty() && !outputs.contains(&c);
    memo.insert(c, dead);
    Ok(dead)
}
