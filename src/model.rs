//! The sequential datatype a history is checked against.

use std::fmt;
use std::hash::Hash;

use crate::history::Op;

/// Semantic rejection of an operation by a [`Model`].
///
/// This is the only legitimate failure mode of a model: a `step` that cannot
/// accept an operation returns `Err(Inconsistent)` rather than panicking.
/// Folding a sequence of operations over a model short-circuits at the first
/// inconsistency, so an inconsistent state is never stepped again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Inconsistent {
    /// Why the operation cannot be applied to the current state.
    pub message: String,
}

impl Inconsistent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A sequential specification of a datatype: registers, queues, locks, ...
///
/// A model is an immutable value; [`step`](Model::step) produces the next
/// state rather than mutating in place, because the search advances many
/// alternative states from the same origin.
///
/// # Equality
///
/// `Eq` and `Hash` are load-bearing: the search deduplicates states on them,
/// so two models must compare equal exactly when every future sequence of
/// operations behaves identically on both. Value equality of the internal
/// state satisfies this for ordinary models.
///
/// `Send + Sync` are required because states cross explorer worker threads.
pub trait Model: Clone + Eq + Hash + fmt::Debug + Send + Sync {
    /// The function symbol of an operation. Often an enum.
    type Fn: Clone + Eq + Hash + fmt::Debug + Send + Sync;

    /// The value payload of an operation.
    type Value: Clone + Eq + Hash + fmt::Debug + Send + Sync;

    /// Advance this state by one operation, or report why it cannot happen.
    fn step(&self, op: &Op<Self::Fn, Self::Value>) -> Result<Self, Inconsistent>;
}
