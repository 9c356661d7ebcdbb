//! Linearizability checker.
//!
//! Decides whether a concurrent history admits a total order of its
//! operations, consistent with real-time order, under which a sequential
//! [`Model`] accepts every operation. When it does, the checker returns
//! witness worlds whose committed order is such a linearization; when it
//! does not, it returns the longest linearizable prefix and the first
//! operation that cannot be accommodated.
//!
//! Derived from Knossos, Jepsen's linearizability checker, licensed under
//! EPL-1.0.

use std::time::Duration;

use ahash::HashSet;
use tracing::debug;

use crate::history::{History, Op};
use crate::model::Model;
use crate::search::{self, SearchStats};
use crate::world::World;

/// Options for the linearizability checker.
#[derive(Debug, Clone)]
pub struct LinearOptions {
    /// Worker threads for the search. Defaults to available parallelism
    /// plus two, so the pool stays busy while a couple of workers sit in
    /// expensive expansions.
    pub threads: Option<usize>,
    /// Deduplicate equivalent worlds. Disabling never changes the verdict,
    /// only how much work the search repeats.
    pub seen_cache: bool,
    /// Period of the progress log, `None` to disable it.
    pub report_interval: Option<Duration>,
}

impl Default for LinearOptions {
    fn default() -> Self {
        Self {
            threads: None,
            seen_cache: true,
            report_interval: Some(Duration::from_secs(5)),
        }
    }
}

/// Result of a linearizability check.
///
/// All indices and prefixes refer to the *completed* history (see
/// [`History::complete`]): invocation values are back-filled from their
/// completions and unmatched invocations get a trailing synthetic info.
#[derive(Debug, Clone)]
pub struct LinearResult<M: Model> {
    /// Whether the full history is linearizable.
    pub valid: bool,
    /// The longest prefix of the history that is linearizable; the full
    /// history when valid.
    pub linearizable_prefix: Vec<Op<M::Fn, M::Value>>,
    /// When valid: accepting worlds, whose [`World::fixed`] order is a
    /// witness linearization. When invalid: the deepest consistent worlds,
    /// deduplicated by equivalence.
    pub worlds: Vec<World<M>>,
    /// The first operation no world could accommodate (when invalid).
    pub inconsistent_op: Option<Op<M::Fn, M::Value>>,
    /// For each last-consistent world whose model rejects the culprit op:
    /// the model and the rejection message. Worlds killed purely by
    /// ordering bookkeeping carry no diagnostic and are omitted.
    pub inconsistent_transitions: Vec<(M, String)>,
    /// Search meters.
    pub stats: SearchStats,
}

/// The linearizability checker.
#[derive(Debug, Clone, Default)]
pub struct LinearChecker {
    pub options: LinearOptions,
}

impl LinearChecker {
    pub fn new(options: LinearOptions) -> Self {
        Self { options }
    }

    /// Check a history against a model.
    ///
    /// The model argument is the state *before* any operation in the
    /// history (e.g. a register's initial value).
    pub fn check<M: Model>(
        &self,
        model: M,
        history: &History<M::Fn, M::Value>,
    ) -> LinearResult<M> {
        let completed = history.clone().complete();
        let (depth, worlds, stats) = prefix_depth_and_worlds(model, &completed, &self.options);
        let valid = depth == completed.len();
        let linearizable_prefix = completed.ops()[..depth].to_vec();
        debug!(valid, depth, events = completed.len(), "analysis complete");

        if valid {
            return LinearResult {
                valid,
                linearizable_prefix,
                worlds,
                inconsistent_op: None,
                inconsistent_transitions: Vec::new(),
                stats,
            };
        }

        let culprit = completed.ops()[depth].clone();
        let inconsistent_transitions = worlds
            .iter()
            .filter_map(|w| match w.model().step(&culprit) {
                Err(e) => Some((w.model().clone(), e.message)),
                Ok(_) => None,
            })
            .collect();
        LinearResult {
            valid,
            linearizable_prefix,
            worlds,
            inconsistent_op: Some(culprit),
            inconsistent_transitions,
            stats,
        }
    }
}

/// Lower-level entry: the longest linearizable prefix of the (completed)
/// history and the deepest worlds that witness it.
pub fn linearizable_prefix_and_worlds<M: Model>(
    model: M,
    history: &History<M::Fn, M::Value>,
    options: &LinearOptions,
) -> (Vec<Op<M::Fn, M::Value>>, Vec<World<M>>) {
    let completed = history.clone().complete();
    let (depth, worlds, _) = prefix_depth_and_worlds(model, &completed, options);
    (completed.ops()[..depth].to_vec(), worlds)
}

fn prefix_depth_and_worlds<M: Model>(
    model: M,
    completed: &History<M::Fn, M::Value>,
    options: &LinearOptions,
) -> (usize, Vec<World<M>>, SearchStats) {
    if completed.is_empty() {
        return (0, vec![World::initial(model)], SearchStats::default());
    }
    let outcome = search::run(model, completed.ops(), options);
    let worlds: Vec<World<M>> = outcome
        .deepest
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let depth = worlds[0].index();
    (depth, worlds, outcome.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{OpType, ProcessId};
    use crate::models::{Register, RegisterFn};

    /// Shorthand history builder: indices are assigned positionally.
    fn history(ops: Vec<(OpType, u64, RegisterFn, Option<i32>)>) -> History<RegisterFn, i32> {
        let mut h = History::new();
        for (i, (op_type, process, f, value)) in ops.into_iter().enumerate() {
            h.push(match op_type {
                OpType::Invoke => Op::invoke(i, process, f, value),
                OpType::Ok => Op::ok(i, process, f, value),
                OpType::Fail => Op::fail(i, process, f, value),
                OpType::Info => Op::info(i, process, f, value),
            });
        }
        h
    }

    use OpType::{Fail, Info, Invoke, Ok as OkT};
    use RegisterFn::{Read, Write};

    fn check(h: &History<RegisterFn, i32>) -> LinearResult<Register<i32>> {
        LinearChecker::default().check(Register(0), h)
    }

    #[test]
    fn empty_history_is_valid() {
        let result = check(&History::new());
        assert!(result.valid);
        assert!(result.linearizable_prefix.is_empty());
        assert_eq!(result.worlds.len(), 1);
        assert!(result.worlds[0].fixed().is_empty());
    }

    #[test]
    fn trivial_read() {
        let h = history(vec![
            (Invoke, 1, Read, None),
            (OkT, 1, Read, Some(0)),
        ]);
        let result = check(&h);
        assert!(result.valid);
        assert_eq!(result.linearizable_prefix.len(), 2);
    }

    #[test]
    fn concurrent_read_linearizes_before_write() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
            (OkT, 1, Write, Some(1)),
        ]);
        let result = check(&h);
        assert!(result.valid);
        // Every witness reads 0 before the write lands.
        for world in &result.worlds {
            let mut model = Register(0);
            for op in world.fixed() {
                model = model.step(op).unwrap();
            }
            assert_eq!(model, Register(1));
        }
    }

    #[test]
    fn stale_read_after_write_is_invalid() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        let result = check(&h);
        assert!(!result.valid);
        assert_eq!(result.linearizable_prefix.len(), 3);
        let culprit = result.inconsistent_op.unwrap();
        assert_eq!(culprit.index, 3);
        assert_eq!(culprit.op_type, OpType::Ok);
        assert_eq!(culprit.process, ProcessId(2));
        assert_eq!(culprit.value, Some(0));
        assert!(!result.inconsistent_transitions.is_empty());
        for (model, message) in &result.inconsistent_transitions {
            assert_eq!(*model, Register(1));
            assert!(message.contains("can't read"));
        }
    }

    #[test]
    fn failed_write_never_happened() {
        let h = history(vec![
            (Invoke, 1, Write, Some(5)),
            (Fail, 1, Write, Some(5)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        assert!(check(&h).valid);
    }

    #[test]
    fn indeterminate_write_pinned_by_read() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Info, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(1)),
        ]);
        assert!(check(&h).valid);
    }

    #[test]
    fn indeterminate_write_may_also_never_happen() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Info, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        assert!(check(&h).valid);
    }

    #[test]
    fn concurrent_writes_ordered_by_later_read() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Write, Some(2)),
            (OkT, 1, Write, Some(1)),
            (OkT, 2, Write, Some(2)),
            (Invoke, 3, Read, None),
            (OkT, 3, Read, Some(2)),
        ]);
        let result = check(&h);
        assert!(result.valid);
        // Replay a witness: both writes commit, and the read of 2 comes
        // after the write of 2.
        let world = &result.worlds[0];
        assert_eq!(world.fixed().len(), 3);
        let mut model = Register(0);
        for op in world.fixed() {
            model = model.step(op).unwrap();
        }
        assert_eq!(model, Register(2));
        let last = world.fixed().last().unwrap();
        assert_eq!(last.f, RegisterFn::Read);
        assert_eq!(last.value, Some(2));
    }

    #[test]
    fn sequential_inconsistent_history_is_invalid() {
        let h = history(vec![
            (Invoke, 1, Read, None),
            (OkT, 1, Read, Some(5)),
        ]);
        let result = check(&h);
        assert!(!result.valid);
        assert_eq!(result.linearizable_prefix.len(), 1);
        assert_eq!(result.inconsistent_op.unwrap().index, 1);
    }

    #[test]
    fn sequential_consistent_history_is_valid() {
        let h = history(vec![
            (Invoke, 1, Write, Some(3)),
            (OkT, 1, Write, Some(3)),
            (Invoke, 1, Read, None),
            (OkT, 1, Read, Some(3)),
            (Invoke, 1, Write, Some(4)),
            (OkT, 1, Write, Some(4)),
            (Invoke, 1, Read, None),
            (OkT, 1, Read, Some(4)),
        ]);
        assert!(check(&h).valid);
    }

    #[test]
    fn reported_prefix_is_itself_valid() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        let result = check(&h);
        assert!(!result.valid);
        let prefix = History::from_ops(result.linearizable_prefix);
        assert!(check(&prefix).valid);
    }

    #[test]
    fn verdict_is_deterministic() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        let first = check(&h);
        for _ in 0..5 {
            let again = check(&h);
            assert_eq!(again.valid, first.valid);
            assert_eq!(
                again.linearizable_prefix.len(),
                first.linearizable_prefix.len()
            );
            assert_eq!(
                again.inconsistent_op.as_ref().map(|op| op.index),
                first.inconsistent_op.as_ref().map(|op| op.index)
            );
        }
    }

    #[test]
    fn relaxing_ok_to_info_can_only_help() {
        // The stale-read history is invalid; making the read indeterminate
        // removes the refutation.
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (Info, 2, Read, None),
        ]);
        assert!(check(&h).valid);
    }

    #[test]
    fn verdict_survives_disabling_the_seen_cache() {
        let checker = LinearChecker::new(LinearOptions {
            seen_cache: false,
            ..LinearOptions::default()
        });
        let valid = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Write, Some(2)),
            (OkT, 1, Write, Some(1)),
            (OkT, 2, Write, Some(2)),
            (Invoke, 3, Read, None),
            (OkT, 3, Read, Some(2)),
        ]);
        let invalid = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        assert!(checker.check(Register(0), &valid).valid);
        let result = checker.check(Register(0), &invalid);
        assert!(!result.valid);
        assert_eq!(result.linearizable_prefix.len(), 3);
    }

    #[test]
    fn single_threaded_search_agrees() {
        let checker = LinearChecker::new(LinearOptions {
            threads: Some(1),
            ..LinearOptions::default()
        });
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
            (OkT, 1, Write, Some(1)),
        ]);
        assert!(checker.check(Register(0), &h).valid);
    }

    #[test]
    fn prefix_and_worlds_entry_point() {
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (OkT, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        let (prefix, worlds) =
            linearizable_prefix_and_worlds(Register(0), &h, &LinearOptions::default());
        assert_eq!(prefix.len(), 3);
        assert!(!worlds.is_empty());
        assert!(worlds.iter().all(|w| w.index() == 3));
    }

    #[test]
    fn unmatched_invocation_stays_open_through_the_tail() {
        // The write never completes; both "it happened" and "it didn't"
        // must remain admissible at the end of history.
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(1)),
        ]);
        assert!(check(&h).valid);
        let h = history(vec![
            (Invoke, 1, Write, Some(1)),
            (Invoke, 2, Read, None),
            (OkT, 2, Read, Some(0)),
        ]);
        assert!(check(&h).valid);
    }
}
