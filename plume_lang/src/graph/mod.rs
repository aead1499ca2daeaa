//! Arena-backed representation of a lazy dataflow graph.
//!
//! Collections and deferred ops live in [`slotmap`] arenas and reference
//! each other through stable keys, so the graph's producer/consumer
//! back-edges never form cyclic ownership and edge rewiring is a local
//! operation on two endpoints.

use slotmap::SlotMap;

use crate::error::PlanError;

pub mod builder;
pub mod mermaid;
pub mod ops;

pub use builder::{FlowGraphBuilder, PlumeWorkflow};
pub use ops::{Datum, DeferredOp, DoFn, ElemType};

slotmap::new_key_type! {
    /// Stable handle of a lazy collection node.
    pub struct CollectionId;
    /// Stable handle of a deferred operator node.
    pub struct OpId;
}

/// A lazy parallel collection node.
#[derive(Clone, Debug)]
pub struct Collection {
    ty: ElemType,
    name: Option<String>,
    producer: Option<OpId>,
    consumers: Vec<OpId>,
    materialized: bool,
}

impl Collection {
    /// Element type descriptor.
    pub fn elem_type(&self) -> &ElemType {
        &self.ty
    }

    /// Debug name, if the builder assigned one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The op whose destination is this collection, if any.
    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    /// Ops reading this collection, in attachment order.
    pub fn consumers(&self) -> &[OpId] {
        &self.consumers
    }

    /// True if this collection is a graph boundary (user input, named
    /// output, or already-computed result). Rewrites do not traverse past
    /// materialized collections.
    pub fn is_materialized(&self) -> bool {
        self.materialized
    }
}

/// The doubly linked DAG of collections and deferred ops.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    collections: SlotMap<CollectionId, Collection>,
    ops: SlotMap<OpId, DeferredOp>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fresh collection with no edges.
    pub fn add_collection(
        &mut self,
        ty: ElemType,
        materialized: bool,
        name: Option<&str>,
    ) -> CollectionId {
        self.collections.insert(Collection {
            ty,
            name: name.map(str::to_owned),
            producer: None,
            consumers: Vec::new(),
            materialized,
        })
    }

    pub fn collection(&self, id: CollectionId) -> &Collection {
        &self.collections[id]
    }

    pub fn op(&self, id: OpId) -> &DeferredOp {
        &self.ops[id]
    }

    /// Like [`op`](Self::op), but `None` for an id that has been removed.
    pub fn get_op(&self, id: OpId) -> Option<&DeferredOp> {
        self.ops.get(id)
    }

    /// Marks a collection as a boundary node.
    pub fn mark_materialized(&mut self, id: CollectionId) {
        self.collections[id].materialized = true;
    }

    /// Assigns a debug name.
    pub fn set_name(&mut self, id: CollectionId, name: &str) {
        self.collections[id].name = Some(name.to_owned());
    }

    pub fn is_materialized(&self, id: CollectionId) -> bool {
        self.collections[id].materialized
    }

    pub fn producer(&self, id: CollectionId) -> Option<OpId> {
        self.collections[id].producer
    }

    pub fn consumers(&self, id: CollectionId) -> &[OpId] {
        &self.collections[id].consumers
    }

    /// Iterates all live collections.
    pub fn collections(&self) -> impl Iterator<Item = (CollectionId, &Collection)> {
        self.collections.iter()
    }

    /// Iterates all live ops.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &DeferredOp)> {
        self.ops.iter()
    }

    /// Inserts an op and wires every edge it implies: the op is appended
    /// to each origin's consumer list and installed as its destination's
    /// producer.
    pub fn insert_op(&mut self, op: DeferredOp) -> Result<OpId, PlanError> {
        let origins = op.origins();
        let dests = op.dests();
        for (i, origin) in origins.iter().enumerate() {
            if origins[..i].contains(origin) {
                return Err(PlanError::invariant(*origin, "duplicate origin on one op"));
            }
        }
        for dest in &dests {
            if origins.contains(dest) {
                return Err(PlanError::invariant(*dest, "op origin and dest coincide"));
            }
            if let Some(existing) = self.collections[*dest].producer {
                return Err(PlanError::invariant(
                    *dest,
                    format!("second producing op (already produced by {existing:?})"),
                ));
            }
        }

        let id = self.ops.insert(op);
        for origin in origins {
            self.add_consumer(origin, id)?;
        }
        for dest in dests {
            self.collections[dest].producer = Some(id);
        }
        Ok(id)
    }

    /// Removes an op entirely, detaching it from every origin's consumer
    /// list and clearing the producer of every destination.
    pub fn remove_op(&mut self, id: OpId) -> Result<DeferredOp, PlanError> {
        let op = self
            .ops
            .remove(id)
            .ok_or_else(|| PlanError::invariant(id, "removing an op not in the graph"))?;
        for origin in op.origins() {
            self.remove_consumer(origin, id)?;
        }
        for dest in op.dests() {
            let slot = &mut self.collections[dest].producer;
            if *slot == Some(id) {
                *slot = None;
            }
        }
        Ok(op)
    }

    /// Appends `op` to `collection`'s consumer list. Duplicates are a
    /// programmer error.
    pub fn add_consumer(&mut self, collection: CollectionId, op: OpId) -> Result<(), PlanError> {
        let consumers = &mut self.collections[collection].consumers;
        if consumers.contains(&op) {
            return Err(PlanError::invariant(
                collection,
                format!("op {op:?} is already a consumer"),
            ));
        }
        consumers.push(op);
        Ok(())
    }

    /// Detaches the specific op `op` from `collection`'s consumer list.
    /// Removing an absent op is a programmer error.
    pub fn remove_consumer(&mut self, collection: CollectionId, op: OpId) -> Result<(), PlanError> {
        let consumers = &mut self.collections[collection].consumers;
        let position = consumers.iter().position(|&c| c == op).ok_or_else(|| {
            PlanError::invariant(collection, format!("op {op:?} is not a consumer"))
        })?;
        consumers.remove(position);
        Ok(())
    }

    /// Redirects one origin of `op` from `old` to `new`, maintaining the
    /// consumer lists on both endpoints.
    pub fn replace_origin(
        &mut self,
        op: OpId,
        old: CollectionId,
        new: CollectionId,
    ) -> Result<(), PlanError> {
        self.remove_consumer(old, op)?;
        self.add_consumer(new, op)?;
        self.ops[op].replace_origin(old, new);
        Ok(())
    }

    /// Redirects the destination of a single-destination op from `old`
    /// to `new`, maintaining the producer slots on both endpoints.
    pub fn replace_dest(
        &mut self,
        op: OpId,
        old: CollectionId,
        new: CollectionId,
    ) -> Result<(), PlanError> {
        if self.collections[old].producer != Some(op) {
            return Err(PlanError::invariant(old, "op is not this collection's producer"));
        }
        if let Some(existing) = self.collections[new].producer {
            return Err(PlanError::invariant(
                new,
                format!("second producing op (already produced by {existing:?})"),
            ));
        }
        match &mut self.ops[op] {
            DeferredOp::ParallelDo { dest, .. }
            | DeferredOp::GroupByKey { dest, .. }
            | DeferredOp::Flatten { dest, .. }
            | DeferredOp::OneToOne { dest, .. } if *dest == old => *dest = new,
            _ => {
                return Err(PlanError::invariant(op, "op does not target the old collection"));
            }
        }
        self.collections[old].producer = None;
        self.collections[new].producer = Some(op);
        Ok(())
    }

    /// Moves an already-attached consumer of `collection` to `index` in
    /// its consumer list. Sibling fusion uses this to keep the fused op
    /// in the position of the first sibling it replaced.
    pub(crate) fn position_consumer(
        &mut self,
        collection: CollectionId,
        op: OpId,
        index: usize,
    ) -> Result<(), PlanError> {
        self.remove_consumer(collection, op)?;
        let consumers = &mut self.collections[collection].consumers;
        let index = index.min(consumers.len());
        consumers.insert(index, op);
        Ok(())
    }

    /// Drops the given destinations from a `MultipleParallelDo`,
    /// detaching each dropped collection. A fanout left with exactly one
    /// destination collapses back into a plain `ParallelDo` under the
    /// same op id, so its remaining edges stay valid.
    pub(crate) fn prune_fanout_dests(
        &mut self,
        id: OpId,
        dead: &[CollectionId],
    ) -> Result<(), PlanError> {
        let DeferredOp::MultipleParallelDo { origin, dests } = &mut self.ops[id] else {
            return Err(PlanError::invariant(id, "pruning dests of a non-fanout op"));
        };
        let origin = *origin;
        dests.retain(|(_, d)| !dead.contains(d));
        if dests.is_empty() {
            return Err(PlanError::invariant(id, "pruning every dest of a fanout"));
        }
        let collapse = match dests.as_slice() {
            [(f, dest)] => Some((f.clone(), *dest)),
            _ => None,
        };
        if let Some((f, dest)) = collapse {
            self.ops[id] = DeferredOp::ParallelDo {
                f,
                combining: false,
                origin,
                dest,
            };
        }
        for &d in dead {
            let slot = &mut self.collections[d].producer;
            if *slot == Some(id) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Verifies that producing/consuming edges are symmetric. Used by
    /// tests after every rewrite.
    pub fn check_edges(&self) -> Result<(), PlanError> {
        for (op_id, op) in self.ops.iter() {
            for origin in op.origins() {
                if !self.collections[origin].consumers.contains(&op_id) {
                    return Err(PlanError::invariant(
                        op_id,
                        format!("origin {origin:?} does not list this op as consumer"),
                    ));
                }
            }
            for dest in op.dests() {
                if self.collections[dest].producer != Some(op_id) {
                    return Err(PlanError::invariant(
                        op_id,
                        format!("dest {dest:?} does not list this op as producer"),
                    ));
                }
            }
        }
        for (c_id, c) in self.collections.iter() {
            if let Some(p) = c.producer {
                let Some(op) = self.ops.get(p) else {
                    return Err(PlanError::invariant(c_id, "producer op not in the graph"));
                };
                if !op.dests().contains(&c_id) {
                    return Err(PlanError::invariant(
                        c_id,
                        "producer op does not target this collection",
                    ));
                }
            }
            for &consumer in &c.consumers {
                let Some(op) = self.ops.get(consumer) else {
                    return Err(PlanError::invariant(c_id, "consumer op not in the graph"));
                };
                if !op.origins().contains(&c_id) {
                    return Err(PlanError::invariant(
                        c_id,
                        "consumer op does not read this collection",
                    ));
                }
            }
        }
        Ok(())
    }
}
