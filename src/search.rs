//! The parallel state-space search behind the linearizability checker.
//!
//! Workers pull the least-awful world from a shared priority frontier,
//! expand it against the next history event, and reinject the survivors.
//! A lossy concurrent cache drops worlds equivalent to ones already
//! explored, and a tracker remembers the worlds that got furthest through
//! the history. The search ends when a world consumes the whole history
//! (the history linearizes) or the frontier drains (it does not).

use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

use crate::history::Op;
use crate::linear::LinearOptions;
use crate::model::Model;
use crate::world::{expand, World};

/// How long an idle worker blocks on the frontier before re-checking the
/// termination conditions.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The seen cache holds at most 2^24 slots.
const SEEN_MASK: u64 = 0xFF_FFFF;

/// Rate meters for one search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Worlds produced by expansion.
    pub visited: u64,
    /// Worlds discarded as equivalent to already-explored ones.
    pub skipped: u64,
}

/// What the search produced: the deepest worlds reached (undeduplicated)
/// and the meters.
pub(crate) struct SearchOutcome<M: Model> {
    pub deepest: Vec<World<M>>,
    pub stats: SearchStats,
}

/// Priority wrapper ordering the frontier by cheapness: a world with fewer
/// pending invocations expands into fewer permutations, and among those the
/// one deeper into the history is closer to acceptance.
///
/// Comparisons look only at the rank; two differently-shaped worlds of
/// equal rank are equal here, which is all a heap needs.
struct Rated<M: Model>(World<M>);

impl<M: Model> Rated<M> {
    fn rank(&self) -> (cmp::Reverse<usize>, usize) {
        (cmp::Reverse(self.0.pending().len()), self.0.index())
    }
}

impl<M: Model> PartialEq for Rated<M> {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl<M: Model> Eq for Rated<M> {}

impl<M: Model> PartialOrd for Rated<M> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<M: Model> Ord for Rated<M> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Thread-safe priority queue of worlds awaiting expansion.
struct Frontier<M: Model> {
    heap: Mutex<BinaryHeap<Rated<M>>>,
    available: Condvar,
}

impl<M: Model> Frontier<M> {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
        }
    }

    fn put(&self, world: World<M>) {
        self.heap.lock().push(Rated(world));
        self.available.notify_one();
    }

    /// Pop the best world, blocking up to `timeout` for one to appear.
    fn poll(&self, timeout: Duration) -> Option<World<M>> {
        let mut heap = self.heap.lock();
        if let Some(Rated(world)) = heap.pop() {
            return Some(world);
        }
        self.available.wait_for(&mut heap, timeout);
        heap.pop().map(|Rated(world)| world)
    }

    fn len(&self) -> usize {
        self.heap.lock().len()
    }

    fn wake_all(&self) {
        self.available.notify_all();
    }
}

/// Bounded, lossy dedup over world equivalence.
///
/// Keyed by 24 bits of the world's hash; a slot holds the most recent world
/// stored there, and a colliding store simply displaces it. Losing an entry
/// only costs re-exploration, never correctness. Worlds with nothing
/// pending are checked but never stored: they are cheap to re-explore, and
/// the slots are better spent on worlds facing a permutation fan-out.
struct SeenCache<M: Model> {
    slots: DashMap<u32, World<M>, RandomState>,
    hasher: RandomState,
}

impl<M: Model> SeenCache<M> {
    fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
            hasher: RandomState::new(),
        }
    }

    /// Has an equivalent world already been explored? Marks the world as
    /// explored as a side effect (when it is worth a slot).
    fn seen(&self, world: &World<M>) -> bool {
        let slot = (self.hasher.hash_one(world) & SEEN_MASK) as u32;
        match self.slots.entry(slot) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get() == world {
                    return true;
                }
                if !world.pending().is_empty() {
                    entry.insert(world.clone());
                }
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                if !world.pending().is_empty() {
                    entry.insert(world.clone());
                }
                false
            }
        }
    }
}

/// The worlds that have consumed the most history so far.
struct Deepest<M: Model> {
    /// Nonempty; every element shares the maximum index.
    worlds: Mutex<Vec<World<M>>>,
}

impl<M: Model> Deepest<M> {
    fn new(initial: World<M>) -> Self {
        Self {
            worlds: Mutex::new(vec![initial]),
        }
    }

    fn offer(&self, world: &World<M>) {
        let mut worlds = self.worlds.lock();
        let depth = worlds[0].index();
        if world.index() > depth {
            worlds.clear();
            worlds.push(world.clone());
        } else if world.index() == depth {
            worlds.push(world.clone());
        }
    }

    fn into_worlds(self) -> Vec<World<M>> {
        self.worlds.into_inner()
    }
}

/// Everything the workers share.
struct Shared<'h, M: Model> {
    history: &'h [Op<M::Fn, M::Value>],
    frontier: Frontier<M>,
    seen: Option<SeenCache<M>>,
    deepest: Deepest<M>,
    running: AtomicBool,
    /// Worlds in the frontier or currently being expanded. Incremented
    /// before a world is published, decremented after its expansion is
    /// done; zero means the search space is exhausted.
    extant: AtomicU64,
    visited: AtomicU64,
    skipped: AtomicU64,
    shutdown_lock: Mutex<()>,
    shutdown: Condvar,
}

impl<M: Model> Shared<'_, M> {
    /// Stop the search and wake anything blocked. Monotone: once cleared,
    /// `running` never goes back up.
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Taking the lock orders the store before the reporter's wait, so
        // the notification cannot slip between its flag check and sleep.
        let guard = self.shutdown_lock.lock();
        self.shutdown.notify_all();
        drop(guard);
        self.frontier.wake_all();
    }
}

/// Clears the running flag when a worker exits for any reason, so peers
/// never wait on a dead pool. A panic is logged here and propagates to the
/// analyzer at scope join.
struct HaltOnExit<'a, 'h, M: Model> {
    shared: &'a Shared<'h, M>,
    worker: usize,
}

impl<M: Model> Drop for HaltOnExit<'_, '_, M> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.worker, "explorer worker panicked; halting search");
        }
        self.shared.halt();
    }
}

fn explore<M: Model>(shared: &Shared<'_, M>, worker: usize) {
    let _guard = HaltOnExit { shared, worker };
    while shared.running.load(Ordering::SeqCst) && shared.extant.load(Ordering::SeqCst) > 0 {
        let Some(world) = shared.frontier.poll(POLL_TIMEOUT) else {
            continue;
        };
        let expansion = expand(world, shared.history);
        // Branches that died during pruning still mark how deep their
        // hypothesis got; an invalidity report is made of exactly these
        // last consistent states.
        for casualty in &expansion.dead {
            shared.deepest.offer(casualty);
        }
        for successor in expansion.alive {
            shared.visited.fetch_add(1, Ordering::Relaxed);
            shared.deepest.offer(&successor);
            if successor.index() == shared.history.len() {
                trace!(worker, "world consumed the full history; accepting");
                shared.halt();
                continue;
            }
            if shared.seen.as_ref().is_some_and(|seen| seen.seen(&successor)) {
                shared.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            shared.extant.fetch_add(1, Ordering::SeqCst);
            shared.frontier.put(successor);
        }
        shared.extant.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Periodic progress log. Purely observational; the search behaves
/// identically without it.
fn report<M: Model>(shared: &Shared<'_, M>, period: Duration) {
    let mut guard = shared.shutdown_lock.lock();
    while shared.running.load(Ordering::SeqCst) {
        if shared.shutdown.wait_for(&mut guard, period).timed_out() {
            info!(
                visited = shared.visited.load(Ordering::Relaxed),
                skipped = shared.skipped.load(Ordering::Relaxed),
                extant = shared.extant.load(Ordering::SeqCst),
                frontier = shared.frontier.len(),
                "linearizability search progress"
            );
        }
    }
}

fn default_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1) + 2
}

/// Run the search to completion and hand back the deepest worlds.
pub(crate) fn run<M: Model>(
    model: M,
    history: &[Op<M::Fn, M::Value>],
    options: &LinearOptions,
) -> SearchOutcome<M> {
    let initial = World::initial(model);
    let shared = Shared {
        history,
        frontier: Frontier::new(),
        seen: options.seen_cache.then(SeenCache::new),
        deepest: Deepest::new(initial.clone()),
        running: AtomicBool::new(true),
        extant: AtomicU64::new(1),
        visited: AtomicU64::new(0),
        skipped: AtomicU64::new(0),
        shutdown_lock: Mutex::new(()),
        shutdown: Condvar::new(),
    };
    shared.frontier.put(initial);

    let threads = options.threads.unwrap_or_else(default_threads).max(1);
    debug!(threads, events = history.len(), "starting linearizability search");
    thread::scope(|scope| {
        for worker in 0..threads {
            let shared = &shared;
            scope.spawn(move || explore(shared, worker));
        }
        if let Some(period) = options.report_interval {
            let shared = &shared;
            scope.spawn(move || report(shared, period));
        }
    });

    let Shared {
        deepest,
        visited,
        skipped,
        ..
    } = shared;
    let stats = SearchStats {
        visited: visited.into_inner(),
        skipped: skipped.into_inner(),
    };
    debug!(
        visited = stats.visited,
        skipped = stats.skipped,
        "linearizability search finished"
    );
    SearchOutcome {
        deepest: deepest.into_worlds(),
        stats,
    }
}
