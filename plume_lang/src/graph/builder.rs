//! Construction surface for lazy dataflow graphs.
//!
//! The optimizer consumes graphs through [`FlowGraph`]; this module is
//! the half that builds them, either directly through
//! [`FlowGraphBuilder`] or behind a user-owned [`PlumeWorkflow`].

use crate::error::PlanError;

use super::ops::{DeferredOp, DoFn, ElemType};
use super::{CollectionId, FlowGraph};

/// Incrementally builds a [`FlowGraph`].
///
/// Every method that adds an op creates the destination collection and
/// wires both edge directions, so a builder-produced graph always
/// satisfies the producer/consumer symmetry invariant.
#[derive(Debug, Default)]
pub struct FlowGraphBuilder {
    graph: FlowGraph,
}

impl FlowGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a materialized source collection.
    pub fn input(&mut self, name: &str, ty: ElemType) -> CollectionId {
        self.graph.add_collection(ty, true, Some(name))
    }

    /// Applies an element-wise transform, producing a fresh collection of
    /// `dest_ty` elements.
    pub fn parallel_do(
        &mut self,
        origin: CollectionId,
        f: DoFn,
        dest_ty: ElemType,
    ) -> Result<CollectionId, PlanError> {
        let dest = self.graph.add_collection(dest_ty, false, None);
        self.graph.insert_op(DeferredOp::ParallelDo {
            f,
            combining: false,
            origin,
            dest,
        })?;
        Ok(dest)
    }

    /// Applies a per-key combiner. Legal only directly downstream of
    /// [`group_by_key`](Self::group_by_key).
    pub fn combine_values(
        &mut self,
        origin: CollectionId,
        f: DoFn,
        dest_ty: ElemType,
    ) -> Result<CollectionId, PlanError> {
        let produced_by_shuffle = self
            .graph
            .producer(origin)
            .is_some_and(|p| matches!(self.graph.op(p), DeferredOp::GroupByKey { .. }));
        if !produced_by_shuffle {
            return Err(PlanError::unsupported(
                origin,
                "combine_values requires a group_by_key directly upstream",
            ));
        }
        let dest = self.graph.add_collection(dest_ty, false, None);
        self.graph.insert_op(DeferredOp::ParallelDo {
            f,
            combining: true,
            origin,
            dest,
        })?;
        Ok(dest)
    }

    /// Shuffles key/value pairs into key/sequence groups.
    pub fn group_by_key(
        &mut self,
        origin: CollectionId,
        dest_ty: ElemType,
    ) -> Result<CollectionId, PlanError> {
        let dest = self.graph.add_collection(dest_ty, false, None);
        self.graph
            .insert_op(DeferredOp::GroupByKey { origin, dest })?;
        Ok(dest)
    }

    /// Unions collections of the same element type.
    pub fn flatten(&mut self, origins: &[CollectionId]) -> Result<CollectionId, PlanError> {
        let Some(&first) = origins.first() else {
            return Err(PlanError::InvalidArgument("flatten of zero collections"));
        };
        let ty = self.graph.collection(first).elem_type().clone();
        for &origin in &origins[1..] {
            if *self.graph.collection(origin).elem_type() != ty {
                return Err(PlanError::invariant(
                    origin,
                    format!(
                        "flatten origins disagree on element type ({} vs {})",
                        self.graph.collection(origin).elem_type(),
                        ty
                    ),
                ));
            }
        }
        let dest = self.graph.add_collection(ty, false, None);
        self.graph.insert_op(DeferredOp::Flatten {
            origins: origins.to_vec(),
            dest,
        })?;
        Ok(dest)
    }

    /// Framework passthrough, transparent to the optimizer.
    pub fn one_to_one(&mut self, origin: CollectionId) -> Result<CollectionId, PlanError> {
        let ty = self.graph.collection(origin).elem_type().clone();
        let dest = self.graph.add_collection(ty, false, None);
        self.graph
            .insert_op(DeferredOp::OneToOne { origin, dest })?;
        Ok(dest)
    }

    /// Marks a collection as a named output, pinning it as a boundary the
    /// rewrite passes will not cross.
    pub fn mark_output(&mut self, id: CollectionId, name: &str) {
        self.graph.mark_materialized(id);
        self.graph.set_name(id, name);
    }

    /// Read access to the graph under construction.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Finishes construction.
    pub fn finish(self) -> FlowGraph {
        self.graph
    }
}

/// A user workflow: builds a lazy graph on demand and names its source
/// and sink collections.
pub trait PlumeWorkflow {
    /// Materializes the lazy computation into `builder`.
    fn build(&mut self, builder: &mut FlowGraphBuilder);

    /// Source collections, valid after [`build`](Self::build).
    fn inputs(&self) -> Vec<CollectionId>;

    /// Sink collections, valid after [`build`](Self::build).
    fn outputs(&self) -> Vec<CollectionId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::Datum;

    fn ints() -> ElemType {
        ElemType::new("ints")
    }

    #[test]
    fn combine_values_requires_shuffle() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let f = DoFn::new("sum", |v, emit| emit(v));
        let err = b.combine_values(a, f, ints()).unwrap_err();
        assert!(matches!(err, PlanError::UnsupportedOperator { .. }));
    }

    #[test]
    fn flatten_rejects_mixed_types() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let s = b.input("s", ElemType::new("strings"));
        let err = b.flatten(&[a, s]).unwrap_err();
        assert!(matches!(err, PlanError::GraphInvariant { .. }));
    }

    #[test]
    fn built_graph_has_symmetric_edges() {
        let mut b = FlowGraphBuilder::new();
        let a = b.input("a", ints());
        let doubled = b
            .parallel_do(
                a,
                DoFn::new("double", |v, emit| {
                    if let Datum::Int(n) = v {
                        emit(Datum::Int(n * 2));
                    }
                }),
                ints(),
            )
            .unwrap();
        let keyed = b
            .parallel_do(
                doubled,
                DoFn::new("key", |v, emit| emit(Datum::pair(v, 1))),
                ElemType::new("pairs"),
            )
            .unwrap();
        let grouped = b.group_by_key(keyed, ElemType::new("groups")).unwrap();
        b.mark_output(grouped, "out");

        let g = b.finish();
        g.check_edges().unwrap();
        assert!(g.is_materialized(grouped));
        assert_eq!(g.collection(grouped).name(), Some("out"));
    }
}
