//! The rewrite orchestrator: runs the passes in fixed order, forms MSCR
//! units, and schedules them into stages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, FlowGraph, FlowGraphBuilder, PlumeWorkflow};
use crate::plan::ExecutionPlan;

pub mod fuse_parallel_dos;
pub mod fuse_siblings;
pub mod mscr;
pub mod prune;
pub mod schedule;
pub mod sink_flattens;

pub use fuse_parallel_dos::fuse_parallel_dos;
pub use fuse_siblings::fuse_sibling_parallel_dos;
pub use mscr::mscr_blocks;
pub use prune::remove_unnecessary_ops;
pub use schedule::schedule;
pub use sink_flattens::sink_flattens;

/// Rewrites `graph` in place and computes its staged execution plan.
///
/// Pass order is fixed: flattens sink, producer-consumer pairs fuse,
/// sibling groups fuse, dead branches drop, MSCRs form, stages schedule.
/// On error the graph may be partially rewritten; there is no partial
/// plan.
pub fn optimize(
    graph: &mut FlowGraph,
    inputs: &[CollectionId],
    outputs: &[CollectionId],
) -> Result<ExecutionPlan, PlanError> {
    optimize_inner(graph, inputs, outputs, None)
}

/// Like [`optimize`], but checks the shared `cancel` flag between passes
/// and returns [`PlanError::Cancelled`] once it is observed set.
pub fn optimize_with_cancel(
    graph: &mut FlowGraph,
    inputs: &[CollectionId],
    outputs: &[CollectionId],
    cancel: &AtomicBool,
) -> Result<ExecutionPlan, PlanError> {
    optimize_inner(graph, inputs, outputs, Some(cancel))
}

/// Materializes a workflow's lazy graph and optimizes it in one shot,
/// returning the rewritten graph alongside its plan.
pub fn plan_workflow(
    workflow: &mut impl PlumeWorkflow,
) -> Result<(FlowGraph, ExecutionPlan), PlanError> {
    let mut builder = FlowGraphBuilder::new();
    workflow.build(&mut builder);
    let mut graph = builder.finish();
    let plan = optimize(&mut graph, &workflow.inputs(), &workflow.outputs())?;
    Ok((graph, plan))
}

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<(), PlanError> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(PlanError::Cancelled),
        _ => Ok(()),
    }
}

fn optimize_inner(
    graph: &mut FlowGraph,
    inputs: &[CollectionId],
    outputs: &[CollectionId],
    cancel: Option<&AtomicBool>,
) -> Result<ExecutionPlan, PlanError> {
    if inputs.is_empty() {
        return Err(PlanError::InvalidArgument("inputs list is empty"));
    }
    if outputs.is_empty() {
        return Err(PlanError::InvalidArgument("outputs list is empty"));
    }

    check_cancel(cancel)?;
    for &output in outputs {
        sink_flattens(graph, output)?;
    }
    check_cancel(cancel)?;
    for &output in outputs {
        fuse_parallel_dos(graph, output)?;
    }
    check_cancel(cancel)?;
    for &output in outputs {
        fuse_sibling_parallel_dos(graph, output)?;
    }
    check_cancel(cancel)?;
    let output_set: HashSet<CollectionId> = outputs.iter().copied().collect();
    for &input in inputs {
        remove_unnecessary_ops(graph, input, &output_set)?;
    }

    check_cancel(cancel)?;
    let mscrs = mscr_blocks(graph, outputs)?;
    check_cancel(cancel)?;
    let first_step = schedule(graph, mscrs, inputs)?;
    debug!("optimization complete");
    Ok(ExecutionPlan { first_step })
}
