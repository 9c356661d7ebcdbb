//! Worlds: partial linearizations of a history.
//!
//! A world is one hypothesis about how the operations seen so far could have
//! taken effect: a committed order (`fixed`), the invocations still in
//! flight (`pending`), the model state after the committed order, and a
//! cursor into the history. Worlds are immutable values; folding a history
//! event into a world yields fresh successor worlds: possibly none, when
//! the hypothesis was wrong, and possibly many for an invocation.

use std::hash::{Hash, Hasher};

use crate::history::{Op, OpType, ProcessId};
use crate::model::Model;

/// A partial linearization.
///
/// # Equality
///
/// Two worlds are interchangeable to the search when they agree on the model
/// state, the pending set, and the cursor: any linearization completing one
/// completes the other. Equality and hashing therefore *exclude* `fixed`,
/// which only records how this particular world got here. This is what lets
/// the seen cache and deepest-world deduplication collapse converging
/// branches.
#[derive(Debug, Clone)]
pub struct World<M: Model> {
    pub(crate) model: M,
    pub(crate) fixed: Vec<Op<M::Fn, M::Value>>,
    /// Sorted by (process, index) so equality and hashing are set-equality.
    pub(crate) pending: Vec<Op<M::Fn, M::Value>>,
    pub(crate) index: usize,
}

impl<M: Model> PartialEq for World<M> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.pending == other.pending && self.model == other.model
    }
}

impl<M: Model> Eq for World<M> {}

impl<M: Model> Hash for World<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.model.hash(state);
        self.pending.hash(state);
        self.index.hash(state);
    }
}

impl<M: Model> World<M> {
    /// The world before any history has been consumed.
    pub fn initial(model: M) -> Self {
        Self {
            model,
            fixed: Vec::new(),
            pending: Vec::new(),
            index: 0,
        }
    }

    /// Model state after applying `fixed` to the initial model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Invocations committed to this linearization, in order. For a world
    /// that consumed the whole history this is the witness order.
    pub fn fixed(&self) -> &[Op<M::Fn, M::Value>] {
        &self.fixed
    }

    /// Invocations seen but not yet committed, failed, or refuted.
    pub fn pending(&self) -> &[Op<M::Fn, M::Value>] {
        &self.pending
    }

    /// Count of history events consumed.
    pub fn index(&self) -> usize {
        self.index
    }

    fn insert_pending(&mut self, op: Op<M::Fn, M::Value>) {
        let key = (op.process, op.index);
        let pos = self
            .pending
            .partition_point(|p| (p.process, p.index) < key);
        self.pending.insert(pos, op);
    }

    fn take_pending(&mut self, process: ProcessId) -> Option<Op<M::Fn, M::Value>> {
        let pos = self.pending.iter().position(|p| p.process == process)?;
        Some(self.pending.remove(pos))
    }

    /// Fold an invocation into this world, yielding every consistent
    /// successor: for each subset of the pending set and each order of that
    /// subset, the world that commits those invocations now. The empty
    /// subset (nothing linearizes yet) is always consistent, so an
    /// expansion yields at least one successor.
    fn fold_invoke(mut self, op: &Op<M::Fn, M::Value>) -> Vec<World<M>> {
        self.index += 1;
        self.insert_pending(op.clone());
        let mut successors = Vec::new();
        self.linearizations(&mut successors);
        successors
    }

    /// Emit this world and, recursively, every world reachable by committing
    /// one more consistent pending invocation. Subtrees rooted at an
    /// inconsistent commit are cut without recursion, which keeps the
    /// subset-times-permutation enumeration tractable in practice.
    fn linearizations(&self, out: &mut Vec<World<M>>) {
        out.push(self.clone());
        for i in 0..self.pending.len() {
            if let Ok(model) = self.model.step(&self.pending[i]) {
                let mut next = self.clone();
                next.model = model;
                let committed = next.pending.remove(i);
                next.fixed.push(committed);
                next.linearizations(out);
            }
        }
    }

    /// An `ok` completion: by now the operation must have been committed. If
    /// it is still pending, this world failed to linearize it in time and
    /// dies; if it was already absorbed into `fixed`, the world stands.
    ///
    /// A dying world is handed back unadvanced, still positioned at the
    /// event that killed it, so the search can record how deep the branch
    /// got and what its last consistent state was.
    fn fold_ok(mut self, op: &Op<M::Fn, M::Value>) -> Result<World<M>, World<M>> {
        if self.pending.iter().any(|p| p.process == op.process) {
            Err(self)
        } else {
            self.index += 1;
            Ok(self)
        }
    }

    /// A `fail` completion guarantees the operation never took effect. A
    /// world that still holds it pending simply drops it; a world that
    /// already committed it assumed something that didn't happen and dies,
    /// handed back unadvanced like in [`World::fold_ok`].
    fn fold_fail(mut self, op: &Op<M::Fn, M::Value>) -> Result<World<M>, World<M>> {
        match self.take_pending(op.process) {
            Some(_) => {
                self.index += 1;
                Ok(self)
            }
            None => Err(self),
        }
    }

    /// An `info` completion is indeterminate: it neither confirms nor
    /// refutes, so only the cursor advances. The invocation stays pending
    /// and may still be committed by a later expansion, or never happen.
    fn fold_info(mut self) -> World<M> {
        self.index += 1;
        self
    }
}

/// Outcome of expanding a world by one history event.
pub(crate) struct Expansion<M: Model> {
    /// Successors that survived pruning and continue the search.
    pub alive: Vec<World<M>>,
    /// Last consistent states of branches that died on a completion event
    /// during pruning, each still positioned at the event that killed it.
    /// Dead branches no longer expand, but they mark how far their
    /// hypothesis got, which is exactly what an invalidity report shows.
    pub dead: Vec<World<M>>,
}

/// Deterministically advance a world through non-branching events (`ok`,
/// `fail`, `info`) until the next event is an invocation or the history is
/// exhausted. `Err` means the world died along the way and carries its last
/// consistent state, cursor still at the killing event.
///
/// Long completion runs collapse here in one pass, before the world pays
/// for hashing and queueing.
fn prune<M: Model>(
    mut world: World<M>,
    history: &[Op<M::Fn, M::Value>],
) -> Result<World<M>, World<M>> {
    loop {
        let Some(op) = history.get(world.index) else {
            return Ok(world);
        };
        world = match op.op_type {
            OpType::Invoke => return Ok(world),
            OpType::Ok => world.fold_ok(op)?,
            OpType::Fail => world.fold_fail(op)?,
            OpType::Info => world.fold_info(),
        };
    }
}

/// Expand a world by its next history event and prune each successor.
///
/// - Past the end of history: the world is terminal and yields itself.
/// - Next event is an invocation: all consistent linearization choices,
///   each pruned.
/// - Otherwise: the single pruned world.
pub(crate) fn expand<M: Model>(
    world: World<M>,
    history: &[Op<M::Fn, M::Value>],
) -> Expansion<M> {
    let mut expansion = Expansion {
        alive: Vec::new(),
        dead: Vec::new(),
    };
    let Some(op) = history.get(world.index) else {
        expansion.alive.push(world);
        return expansion;
    };
    let candidates = if op.op_type == OpType::Invoke {
        world.fold_invoke(op)
    } else {
        vec![world]
    };
    for candidate in candidates {
        match prune(candidate, history) {
            Ok(survivor) => expansion.alive.push(survivor),
            Err(casualty) => expansion.dead.push(casualty),
        }
    }
    expansion
}
