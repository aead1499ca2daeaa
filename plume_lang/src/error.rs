//! Error kinds for graph construction and plan optimization.

use crate::graph::{CollectionId, OpId};

/// Identity of the graph entity an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphId {
    /// A lazy collection node.
    Collection(CollectionId),
    /// A deferred operator node.
    Op(OpId),
}

impl From<CollectionId> for GraphId {
    fn from(id: CollectionId) -> Self {
        Self::Collection(id)
    }
}

impl From<OpId> for GraphId {
    fn from(id: OpId) -> Self {
        Self::Op(id)
    }
}

/// Fatal errors raised while building or optimizing a dataflow graph.
///
/// All variants abort the current [`optimize`](crate::optimize::optimize)
/// call; there is no retry and no partial plan.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    /// The caller passed an empty inputs or outputs list.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A producing/consuming edge operation broke a structural invariant,
    /// e.g. installing a second producing op or detaching an absent
    /// consumer.
    #[error("graph invariant broken at {id:?}: {message}")]
    GraphInvariant {
        /// The collection or op at fault.
        id: GraphId,
        /// What went wrong.
        message: String,
    },

    /// A rewrite or the MSCR builder met an operator shape it cannot
    /// handle, e.g. a combiner with no shuffle directly upstream.
    #[error("unsupported operator at {id:?}: {message}")]
    UnsupportedOperator {
        /// The op at fault.
        id: GraphId,
        /// What went wrong.
        message: String,
    },

    /// The scheduler could not place every MSCR, which implies a cyclic
    /// dependency between MSCRs.
    #[error("scheduler stalled with {remaining} unplaced MSCRs (dependency cycle)")]
    InvariantViolated {
        /// Number of MSCRs left unplaced when progress stopped.
        remaining: usize,
    },

    /// The cooperative cancellation flag was observed set between passes.
    #[error("optimization cancelled")]
    Cancelled,
}

impl PlanError {
    pub(crate) fn invariant(id: impl Into<GraphId>, message: impl Into<String>) -> Self {
        Self::GraphInvariant {
            id: id.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(id: impl Into<GraphId>, message: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            id: id.into(),
            message: message.into(),
        }
    }
}
