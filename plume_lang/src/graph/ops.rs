//! The deferred-operator algebra: dynamic element values, opaque
//! emitter-style user functions, and the tagged operator variants that
//! make up a lazy dataflow graph.

use std::fmt::{self, Debug, Display};
use std::rc::Rc;

use super::CollectionId;

/// A dynamic element value flowing through an executed pipeline.
///
/// The optimizer itself never inspects element values; they exist for the
/// reference interpreter and for user functions, which are type-erased.
/// Pairs are the currency of [`GroupByKey`](DeferredOp::GroupByKey):
/// shuffling `Pair(k, v)` elements produces `Pair(k, Seq(vs))` groups.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Bool(bool),
    Int(i64),
    Str(String),
    Pair(Box<Datum>, Box<Datum>),
    Seq(Vec<Datum>),
}

impl Datum {
    /// Builds a key/value pair.
    pub fn pair(key: impl Into<Datum>, value: impl Into<Datum>) -> Datum {
        Datum::Pair(Box::new(key.into()), Box::new(value.into()))
    }

    /// Builds a sequence from anything iterable.
    pub fn seq(items: impl IntoIterator<Item = Datum>) -> Datum {
        Datum::Seq(items.into_iter().collect())
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Str(v.to_owned())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Str(v)
    }
}

/// Element type descriptor carried by every collection.
///
/// Rewrites never change the element type of a collection they replace,
/// so descriptors only need identity, not structure.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ElemType(Rc<str>);

impl ElemType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Rc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Debug for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElemType({})", self.0)
    }
}

impl Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque user transform `(element, emit) -> ()`.
///
/// The closure is shared via `Rc` so rewrites can duplicate an op (e.g.
/// when a ParallelDo is distributed over a `Flatten`) without copying any
/// captured state. `Debug` prints the label only; the payload is opaque,
/// like the labelled expression wrappers in the surrounding IR types.
#[derive(Clone)]
pub struct DoFn {
    label: Rc<str>,
    f: Rc<dyn Fn(Datum, &mut dyn FnMut(Datum))>,
}

impl DoFn {
    pub fn new(
        label: impl AsRef<str>,
        f: impl Fn(Datum, &mut dyn FnMut(Datum)) + 'static,
    ) -> Self {
        Self {
            label: Rc::from(label.as_ref()),
            f: Rc::new(f),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Applies the function to one element, forwarding emissions to
    /// `emit` one at a time.
    pub fn call(&self, v: Datum, emit: &mut dyn FnMut(Datum)) {
        (self.f)(v, emit);
    }

    /// Functional composition used by producer-consumer fusion.
    ///
    /// The composed function satisfies
    /// `f'(v, e) == upstream(v, |w| downstream(w, e))` for every element
    /// `v` and emitter `e`; the inner emitter forwards each emission
    /// immediately rather than buffering.
    pub fn compose(downstream: &DoFn, upstream: &DoFn) -> DoFn {
        let down = Rc::clone(&downstream.f);
        let up = Rc::clone(&upstream.f);
        DoFn {
            label: Rc::from(format!("{}>>{}", upstream.label, downstream.label)),
            f: Rc::new(move |v, emit: &mut dyn FnMut(Datum)| {
                up(v, &mut |w| down(w, &mut *emit));
            }),
        }
    }
}

impl Debug for DoFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DoFn({})", self.label)
    }
}

/// A deferred operator node. Exactly these variants exist.
///
/// `CombineValues` is the `combining: true` refinement of `ParallelDo`:
/// it combines values per key and is legal only directly downstream of a
/// `GroupByKey`. It is matched as a ParallelDo everywhere except where a
/// rewrite explicitly distinguishes it.
#[derive(Clone, Debug)]
pub enum DeferredOp {
    /// Element-wise transform producing zero or more outputs per input.
    ParallelDo {
        f: DoFn,
        combining: bool,
        origin: CollectionId,
        dest: CollectionId,
    },
    /// Shuffles key/value pairs into key/sequence groups.
    GroupByKey {
        origin: CollectionId,
        dest: CollectionId,
    },
    /// Set-theoretic union of same-typed collections.
    Flatten {
        origins: Vec<CollectionId>,
        dest: CollectionId,
    },
    /// One input fanned out to many independent transforms. Only produced
    /// by sibling fusion.
    MultipleParallelDo {
        origin: CollectionId,
        dests: Vec<(DoFn, CollectionId)>,
    },
    /// Structural passthrough, transparent to every rewrite.
    OneToOne {
        origin: CollectionId,
        dest: CollectionId,
    },
}

impl DeferredOp {
    /// Short name of the variant, used by rendering and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredOp::ParallelDo {
                combining: true, ..
            } => "combine_values",
            DeferredOp::ParallelDo { .. } => "parallel_do",
            DeferredOp::GroupByKey { .. } => "group_by_key",
            DeferredOp::Flatten { .. } => "flatten",
            DeferredOp::MultipleParallelDo { .. } => "multiple_parallel_do",
            DeferredOp::OneToOne { .. } => "one_to_one",
        }
    }

    /// Upstream collections read by this op, in order.
    pub fn origins(&self) -> Vec<CollectionId> {
        match self {
            DeferredOp::ParallelDo { origin, .. }
            | DeferredOp::GroupByKey { origin, .. }
            | DeferredOp::MultipleParallelDo { origin, .. }
            | DeferredOp::OneToOne { origin, .. } => vec![*origin],
            DeferredOp::Flatten { origins, .. } => origins.clone(),
        }
    }

    /// Downstream collections written by this op, in order.
    pub fn dests(&self) -> Vec<CollectionId> {
        match self {
            DeferredOp::ParallelDo { dest, .. }
            | DeferredOp::GroupByKey { dest, .. }
            | DeferredOp::Flatten { dest, .. }
            | DeferredOp::OneToOne { dest, .. } => vec![*dest],
            DeferredOp::MultipleParallelDo { dests, .. } => {
                dests.iter().map(|(_, d)| *d).collect()
            }
        }
    }

    /// The destination, for the single-destination variants.
    pub fn single_dest(&self) -> Option<CollectionId> {
        match self {
            DeferredOp::ParallelDo { dest, .. }
            | DeferredOp::GroupByKey { dest, .. }
            | DeferredOp::Flatten { dest, .. }
            | DeferredOp::OneToOne { dest, .. } => Some(*dest),
            DeferredOp::MultipleParallelDo { .. } => None,
        }
    }

    /// True for `ParallelDo` whether or not it is the combining
    /// refinement.
    pub fn is_parallel_do(&self) -> bool {
        matches!(self, DeferredOp::ParallelDo { .. })
    }

    /// True only for the `CombineValues` refinement.
    pub fn is_combining(&self) -> bool {
        matches!(
            self,
            DeferredOp::ParallelDo {
                combining: true,
                ..
            }
        )
    }

    /// Redirects one origin reference. The caller maintains the edge
    /// lists on both endpoints.
    pub(crate) fn replace_origin(&mut self, old: CollectionId, new: CollectionId) {
        match self {
            DeferredOp::ParallelDo { origin, .. }
            | DeferredOp::GroupByKey { origin, .. }
            | DeferredOp::MultipleParallelDo { origin, .. }
            | DeferredOp::OneToOne { origin, .. } => {
                if *origin == old {
                    *origin = new;
                }
            }
            DeferredOp::Flatten { origins, .. } => {
                for origin in origins {
                    if *origin == old {
                        *origin = new;
                    }
                }
            }
        }
    }
}
