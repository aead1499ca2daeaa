//! Stage scheduling: orders MSCRs into a forward-linked chain of stages
//! respecting inter-MSCR data dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::PlanError;
use crate::graph::{CollectionId, FlowGraph};
use crate::plan::{ExecutionStep, Mscr};

/// Places every MSCR into the earliest stage whose predecessors satisfy
/// its dependencies. Returns the head of the stage chain, or `None` when
/// there is nothing to run.
pub fn schedule(
    graph: &FlowGraph,
    mscrs: Vec<Mscr>,
    inputs: &[CollectionId],
) -> Result<Option<Box<ExecutionStep>>, PlanError> {
    if mscrs.is_empty() {
        return Ok(None);
    }

    // Which MSCR produces each collection.
    let mut produced_by: HashMap<CollectionId, usize> = HashMap::new();
    for (i, mscr) in mscrs.iter().enumerate() {
        for &op in &mscr.ops {
            for dest in graph.op(op).dests() {
                produced_by.insert(dest, i);
            }
        }
    }

    let deps: Vec<BTreeSet<usize>> = mscrs
        .iter()
        .enumerate()
        .map(|(i, mscr)| {
            mscr.inputs
                .iter()
                .filter_map(|c| produced_by.get(c).copied())
                .filter(|&j| j != i)
                .collect()
        })
        .collect();

    let input_set: HashSet<CollectionId> = inputs.iter().copied().collect();
    let mut scheduled = vec![false; mscrs.len()];
    let mut stages: Vec<Vec<usize>> = Vec::new();

    // Stage 0 holds the beginning MSCRs: dependency-free units reading
    // the user inputs directly.
    let stage0: Vec<usize> = (0..mscrs.len())
        .filter(|&i| deps[i].is_empty() && mscrs[i].inputs.iter().any(|c| input_set.contains(c)))
        .collect();
    for &i in &stage0 {
        scheduled[i] = true;
    }
    if !stage0.is_empty() {
        stages.push(stage0);
    }

    while scheduled.iter().any(|&s| !s) {
        let ready: Vec<usize> = (0..mscrs.len())
            .filter(|&i| !scheduled[i] && deps[i].iter().all(|&d| scheduled[d]))
            .collect();
        if ready.is_empty() {
            let remaining = scheduled.iter().filter(|&&s| !s).count();
            return Err(PlanError::InvariantViolated { remaining });
        }
        for &i in &ready {
            scheduled[i] = true;
        }
        stages.push(ready);
    }
    debug!(stages = stages.len(), mscrs = mscrs.len(), "scheduled plan");

    // Fold the stages into a forward-linked chain, back to front.
    let mut slots: Vec<Option<Mscr>> = mscrs.into_iter().map(Some).collect();
    let mut next: Option<Box<ExecutionStep>> = None;
    for stage in stages.iter().rev() {
        let mscr_steps = stage
            .iter()
            .map(|&i| slots[i].take().expect("each MSCR is placed exactly once"))
            .collect();
        next = Some(Box::new(ExecutionStep {
            mscr_steps,
            next_step: next,
        }));
    }
    Ok(next)
}
