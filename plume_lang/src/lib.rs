//! Plume's lazy dataflow IR and plan optimizer.
//!
//! A user workflow builds a DAG of deferred operators over lazy parallel
//! collections ([`graph`]). [`optimize`](optimize::optimize) rewrites
//! that DAG into a smaller, semantically equivalent one (flattens sink
//! below their transforms, `ParallelDo` chains and sibling groups fuse,
//! dead branches drop), carves it into MapShuffleCombineReduce units,
//! and schedules those units into a forward-linked chain of stages
//! ([`plan`]).
//!
//! ```
//! use plume_lang::graph::{Datum, DoFn, ElemType, FlowGraphBuilder};
//! use plume_lang::optimize::optimize;
//!
//! let mut b = FlowGraphBuilder::new();
//! let lines = b.input("lines", ElemType::new("lines"));
//! let pairs = b
//!     .parallel_do(
//!         lines,
//!         DoFn::new("split", |v, emit| {
//!             if let Datum::Str(line) = v {
//!                 for word in line.split_whitespace() {
//!                     emit(Datum::pair(word, 1));
//!                 }
//!             }
//!         }),
//!         ElemType::new("pairs"),
//!     )
//!     .unwrap();
//! let grouped = b.group_by_key(pairs, ElemType::new("groups")).unwrap();
//! b.mark_output(grouped, "grouped");
//! let mut graph = b.finish();
//!
//! let plan = optimize(&mut graph, &[lines], &[grouped]).unwrap();
//! assert_eq!(plan.num_stages(), 1);
//! ```

pub mod error;
pub mod graph;
pub mod interp;
pub mod optimize;
pub mod plan;

pub use error::{GraphId, PlanError};
pub use graph::{
    CollectionId, Datum, DeferredOp, DoFn, ElemType, FlowGraph, FlowGraphBuilder, OpId,
    PlumeWorkflow,
};
pub use optimize::{optimize, optimize_with_cancel, plan_workflow};
pub use plan::{ExecutionPlan, ExecutionStep, Mscr, OutputChannel};
