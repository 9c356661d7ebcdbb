//! History representation for linearizability checking.
//!
//! Operations in a history follow a request/response model:
//! - `Invoke` marks the start of an operation
//! - `Ok` marks successful completion
//! - `Fail` marks a definite failure: the operation did *not* take effect
//! - `Info` marks an indeterminate result (crash, timeout, etc.): the
//!   operation may or may not have taken effect
//!
//! The checker is model-agnostic, so the function an operation performs is a
//! type parameter `F` (e.g. an enum of read/write) and its payload is an
//! optional value `T`, `None` meaning nil/unknown (as in a read invocation
//! whose result is not yet determined).

use std::hash::{Hash, Hasher};
use std::time::Duration;

use ahash::{HashMap, HashMapExt};

/// Process or thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProcessId(pub u64);

impl From<u64> for ProcessId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// The type/phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Operation was invoked but hasn't completed yet.
    Invoke,
    /// Operation completed successfully.
    Ok,
    /// Operation definitely failed (and definitely did not take effect).
    Fail,
    /// Operation result is indeterminate (e.g., timeout, crash).
    Info,
}

/// A single operation in a history.
///
/// Equality and hashing are structural over everything except `time`:
/// wall-clock timestamps are diagnostic payload, not part of an event's
/// identity.
#[derive(Debug, Clone)]
pub struct Op<F, T> {
    /// Unique index of this operation in the history.
    pub index: usize,
    /// The type/phase of this operation.
    pub op_type: OpType,
    /// The function being performed (read, write, ...).
    pub f: F,
    /// The value associated with this operation; `None` means nil/unknown.
    pub value: Option<T>,
    /// Timestamp (optional, used for latency calculations).
    pub time: Option<Duration>,
    /// Process/thread that performed this operation.
    pub process: ProcessId,
}

impl<F, T> Op<F, T> {
    /// Create an invocation.
    pub fn invoke(index: usize, process: impl Into<ProcessId>, f: F, value: Option<T>) -> Self {
        Self {
            index,
            op_type: OpType::Invoke,
            f,
            value,
            time: None,
            process: process.into(),
        }
    }

    /// Create a successful completion.
    pub fn ok(index: usize, process: impl Into<ProcessId>, f: F, value: Option<T>) -> Self {
        Self {
            index,
            op_type: OpType::Ok,
            f,
            value,
            time: None,
            process: process.into(),
        }
    }

    /// Create a definite failure.
    pub fn fail(index: usize, process: impl Into<ProcessId>, f: F, value: Option<T>) -> Self {
        Self {
            index,
            op_type: OpType::Fail,
            f,
            value,
            time: None,
            process: process.into(),
        }
    }

    /// Create an indeterminate outcome (timeout, crash).
    pub fn info(index: usize, process: impl Into<ProcessId>, f: F, value: Option<T>) -> Self {
        Self {
            index,
            op_type: OpType::Info,
            f,
            value,
            time: None,
            process: process.into(),
        }
    }

    /// Set the timestamp for this operation.
    #[must_use]
    pub fn at(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }
}

impl<F: PartialEq, T: PartialEq> PartialEq for Op<F, T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.op_type == other.op_type
            && self.f == other.f
            && self.value == other.value
            && self.process == other.process
    }
}

impl<F: Eq, T: Eq> Eq for Op<F, T> {}

impl<F: Hash, T: Hash> Hash for Op<F, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.op_type.hash(state);
        self.f.hash(state);
        self.value.hash(state);
        self.process.hash(state);
    }
}

/// A history of operations.
#[derive(Debug, Clone)]
pub struct History<F, T> {
    ops: Vec<Op<F, T>>,
}

impl<F, T> Default for History<F, T> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<F, T> History<F, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_ops(ops: Vec<Op<F, T>>) -> Self {
        Self { ops }
    }

    pub fn push(&mut self, op: Op<F, T>) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn ops(&self) -> &[Op<F, T>] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<F: Clone, T: Clone> History<F, T> {
    /// Complete a history so every invocation is accounted for.
    ///
    /// Two things happen here:
    ///
    /// 1. Invocations inherit the value of their `Ok` completion when the
    ///    invocation's own value is `None`. A read is invoked with an unknown
    ///    value and only its completion pins what was observed; the search
    ///    linearizes invocations, so the observed value must flow back.
    /// 2. Invocations with no completion at all get a synthetic trailing
    ///    `Info`: the process stopped responding, and whether its operation
    ///    took effect is indeterminate.
    ///
    /// After completion, every invoke either has a matching ok/fail/info
    /// later in the history or is marked outstanding by an info at the tail.
    ///
    /// A process with an indeterminate (`Info`) outcome must not appear
    /// again later in the history: its invocation stays pending forever, and
    /// reusing the id would give the process two outstanding operations.
    #[must_use]
    pub fn complete(mut self) -> Self {
        let mut open: HashMap<ProcessId, usize> = HashMap::new();
        for i in 0..self.ops.len() {
            let process = self.ops[i].process;
            match self.ops[i].op_type {
                OpType::Invoke => {
                    open.insert(process, i);
                }
                OpType::Ok => {
                    if let Some(inv) = open.remove(&process) {
                        if self.ops[inv].value.is_none() {
                            let observed = self.ops[i].value.clone();
                            self.ops[inv].value = observed;
                        }
                    }
                }
                // A failed op never happened and an info op stays
                // indeterminate; neither pins a value on its invocation.
                OpType::Fail | OpType::Info => {
                    open.remove(&process);
                }
            }
        }

        let mut unmatched: Vec<usize> = open.into_values().collect();
        unmatched.sort_unstable();
        for inv in unmatched {
            let index = self.ops.len();
            let (f, value, process) = {
                let op = &self.ops[inv];
                (op.f.clone(), op.value.clone(), op.process)
            };
            self.ops.push(Op::info(index, process, f, value));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum F {
        Read,
        Write,
    }

    #[test]
    fn op_identity_ignores_time() {
        let a = Op::invoke(0, 0u64, F::Read, None::<i32>);
        let b = Op::invoke(0, 0u64, F::Read, None::<i32>).at(Duration::from_millis(7));
        assert_eq!(a, b);
    }

    #[test]
    fn complete_backfills_read_value() {
        let mut h = History::new();
        h.push(Op::invoke(0, 0u64, F::Read, None));
        h.push(Op::ok(1, 0u64, F::Read, Some(3)));
        let h = h.complete();
        assert_eq!(h.ops()[0].value, Some(3));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn complete_keeps_existing_invocation_value() {
        let mut h = History::new();
        h.push(Op::invoke(0, 0u64, F::Write, Some(1)));
        h.push(Op::ok(1, 0u64, F::Write, Some(9)));
        let h = h.complete();
        assert_eq!(h.ops()[0].value, Some(1));
    }

    #[test]
    fn complete_does_not_backfill_from_fail_or_info() {
        let mut h = History::new();
        h.push(Op::invoke(0, 0u64, F::Read, None));
        h.push(Op::fail(1, 0u64, F::Read, Some(3)));
        h.push(Op::invoke(2, 1u64, F::Read, None));
        h.push(Op::info(3, 1u64, F::Read, Some(5)));
        let h = h.complete();
        assert_eq!(h.ops()[0].value, None);
        assert_eq!(h.ops()[2].value, None);
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn complete_appends_info_for_unmatched_invocations() {
        let mut h = History::new();
        h.push(Op::invoke(0, 0u64, F::Write, Some(1)));
        h.push(Op::invoke(1, 1u64, F::Write, Some(2)));
        h.push(Op::ok(2, 1u64, F::Write, Some(2)));
        let h = h.complete();
        assert_eq!(h.len(), 4);
        let tail = &h.ops()[3];
        assert_eq!(tail.op_type, OpType::Info);
        assert_eq!(tail.process, ProcessId(0));
        assert_eq!(tail.f, F::Write);
        assert_eq!(tail.value, Some(1));
        assert_eq!(tail.index, 3);
    }

    #[test]
    fn complete_on_empty_history_is_empty() {
        let h: History<F, i32> = History::new().complete();
        assert!(h.is_empty());
    }
}
