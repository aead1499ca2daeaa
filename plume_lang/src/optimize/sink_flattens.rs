//! Pushes `Flatten` ops below their single `ParallelDo` consumer, so the
//! transform distributes over the union and exposes more
//! producer-consumer fusion opportunities.

use std::collections::HashSet;

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, DeferredOp, FlowGraph};

/// Sinks every eligible `Flatten` reachable upward from `output`.
pub fn sink_flattens(graph: &mut FlowGraph, output: CollectionId) -> Result<(), PlanError> {
    let mut visited = HashSet::new();
    sink(graph, output, &mut visited)
}

fn sink(
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

    // Upstream first, so nested Flattens sink in one bottom-up sweep.
    for origin in graph.op(producer).origins() {
        if !graph.is_materialized(origin) {
            sink(graph, origin, visited)?;
        }
    }

    // The sweep above may have installed a new Flatten here (a sink one
    // level up lands its Flatten on this node), so re-read the producer.
    try_sink_here(graph, c)
}

fn try_sink_here(graph: &mut FlowGraph, c: CollectionId) -> Result<(), PlanError> {
    let Some(flatten_id) = graph.producer(c) else {
        return Ok(());
    };
    let DeferredOp::Flatten { origins, .. } = graph.op(flatten_id) else {
        return Ok(());
    };
    if graph.is_materialized(c) {
        return Ok(());
    }
    let [consumer] = graph.consumers(c) else {
        return Ok(());
    };
    let consumer = *consumer;
    let DeferredOp::ParallelDo {
        f,
        combining: false,
        dest,
        ..
    } = graph.op(consumer)
    else {
        return Ok(());
    };

    let origins = origins.clone();
    let f = f.clone();
    let dest = *dest;
    let dest_ty = graph.collection(dest).elem_type().clone();
    debug!(
        flatten = ?flatten_id,
        parallel_do = ?consumer,
        "sinking flatten below its parallel_do consumer"
    );

    graph.remove_op(consumer)?;
    graph.remove_op(flatten_id)?;

    let mut new_origins = Vec::with_capacity(origins.len());
    for origin in origins {
        let lifted = graph.add_collection(dest_ty.clone(), false, None);
        graph.insert_op(DeferredOp::ParallelDo {
            f: f.clone(),
            combining: false,
            origin,
            dest: lifted,
        })?;
        new_origins.push(lifted);
    }
    graph.insert_op(DeferredOp::Flatten {
        origins: new_origins,
        dest,
    })?;
    Ok(())
}
