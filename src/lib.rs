//! Linearizability checking for concurrent operation histories.
//!
//! Worldline verifies that a history of operations against a shared object
//! (invocations and their ok/fail/indeterminate outcomes, as logged by a
//! concurrent or distributed systems test) is *linearizable*: some total
//! order of the operations, consistent with real-time, makes a sequential
//! model accept every result. Derived from
//! [Knossos](https://github.com/jepsen-io/knossos), Jepsen's
//! linearizability checker.
//!
//! # Quick Start
//!
//! ```
//! use worldline::{History, LinearChecker, Op, Register, RegisterFn};
//!
//! let mut history = History::new();
//!
//! // Process 1 writes 1; concurrently, process 2 reads 0.
//! history.push(Op::invoke(0, 1u64, RegisterFn::Write, Some(1)));
//! history.push(Op::invoke(1, 2u64, RegisterFn::Read, None));
//! history.push(Op::ok(2, 2u64, RegisterFn::Read, Some(0)));
//! history.push(Op::ok(3, 1u64, RegisterFn::Write, Some(1)));
//!
//! // Fine: the read linearizes before the write.
//! let result = LinearChecker::default().check(Register(0), &history);
//! assert!(result.valid);
//!
//! // The committed order of any returned world is a witness.
//! let witness = &result.worlds[0];
//! assert_eq!(witness.fixed().len(), 2);
//! ```
//!
//! # How It Works
//!
//! The checker searches over *worlds*: partial linearizations pairing a
//! committed operation order with the invocations still in flight. A pool
//! of worker threads expands worlds event by event, with an invocation
//! fanning out into every order its pending operations could commit in and
//! a completion confirming or refuting what a world already decided. A
//! priority frontier steers the search toward cheap worlds and a lossy
//! cache collapses branches that converge on the same state.
//!
//! When no world survives the whole history, the deepest surviving worlds
//! pin down the longest linearizable prefix and the operation that cannot
//! be accommodated.
//!
//! # Defining Models
//!
//! Implement [`Model`] with a single `step` function from state and
//! operation to the next state, or an [`Inconsistent`] rejection. The
//! [`models`] module ships the canonical ones: [`Register`],
//! [`CasRegister`], and [`models::Mutex`].

pub mod history;
pub mod linear;
pub mod model;
pub mod models;
pub mod world;

mod search;

pub use history::{History, Op, OpType, ProcessId};
pub use linear::{linearizable_prefix_and_worlds, LinearChecker, LinearOptions, LinearResult};
pub use model::{Inconsistent, Model};
pub use models::{CasFn, CasRegister, CasValue, Register, RegisterFn};
pub use search::SearchStats;
pub use world::World;
