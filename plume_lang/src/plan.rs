//! The execution plan surface exposed to an executor: MSCR units, their
//! output channels, and the forward-linked stage chain.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{CollectionId, FlowGraph, OpId};

/// The shuffle+reduce path of one MSCR output.
///
/// Executors run the `group_by_key`, apply the `combiner` to each group
/// if present, then run the `reducer` transform if present, delivering
/// results into `output`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputChannel {
    pub group_by_key: OpId,
    pub combiner: Option<OpId>,
    pub reducer: Option<OpId>,
    pub output: CollectionId,
}

/// One MapShuffleCombineReduce execution unit.
#[derive(Clone, Debug, Default)]
pub struct Mscr {
    /// Collections entering this unit from outside it.
    pub inputs: BTreeSet<CollectionId>,
    /// Terminal collection of each shuffle+reduce path, keyed by the
    /// collection the channel delivers into.
    pub output_channels: BTreeMap<CollectionId, OutputChannel>,
    /// Every op subsumed into this unit (map side, shuffles, channels).
    pub ops: BTreeSet<OpId>,
}

impl Mscr {
    /// True if `collection` is produced by an op of this unit.
    pub fn produces(&self, collection: CollectionId, graph: &FlowGraph) -> bool {
        self.ops
            .iter()
            .any(|&op| graph.op(op).dests().contains(&collection))
    }
}

/// A set of MSCRs that may run concurrently, plus the next stage.
#[derive(Debug, Default)]
pub struct ExecutionStep {
    pub mscr_steps: Vec<Mscr>,
    pub next_step: Option<Box<ExecutionStep>>,
}

impl ExecutionStep {
    /// Iterates this stage and every following one, in order.
    pub fn iter(&self) -> StepIter<'_> {
        StepIter { next: Some(self) }
    }
}

/// Iterator over a stage chain.
pub struct StepIter<'a> {
    next: Option<&'a ExecutionStep>,
}

impl<'a> Iterator for StepIter<'a> {
    type Item = &'a ExecutionStep;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.next?;
        self.next = step.next_step.as_deref();
        Some(step)
    }
}

/// The full staged plan: a possibly-empty chain of stages.
///
/// The chain references collections and ops of the post-rewrite graph;
/// the graph passed to [`optimize`](crate::optimize::optimize) must be
/// treated as consumed and kept alongside the plan.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    pub first_step: Option<Box<ExecutionStep>>,
}

impl ExecutionPlan {
    /// Iterates the stages in execution order.
    pub fn stages(&self) -> StepIter<'_> {
        StepIter {
            next: self.first_step.as_deref(),
        }
    }

    /// Number of stages in the chain.
    pub fn num_stages(&self) -> usize {
        self.stages().count()
    }

    /// Total number of MSCRs across all stages.
    pub fn num_mscrs(&self) -> usize {
        self.stages().map(|s| s.mscr_steps.len()).sum()
    }
}
