//! Canonical sequential models.
//!
//! These cover the datatypes most concurrent systems emulate: a single
//! register, a compare-and-set register, and a mutex. They double as
//! reference implementations of the [`Model`] trait.

use std::fmt;
use std::hash::Hash;

use crate::history::Op;
use crate::model::{Inconsistent, Model};

/// Functions on a plain register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFn {
    Read,
    Write,
}

/// A single mutable cell.
///
/// `write v` sets the value. `read` with a `None` payload is a wildcard (an
/// observation that never completed); `read Some(v)` is consistent iff `v`
/// equals the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register<T>(pub T);

impl<T> Model for Register<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync,
{
    type Fn = RegisterFn;
    type Value = T;

    fn step(&self, op: &Op<RegisterFn, T>) -> Result<Self, Inconsistent> {
        match op.f {
            RegisterFn::Write => match &op.value {
                Some(v) => Ok(Register(v.clone())),
                None => Err(Inconsistent::new("write invoked without a value")),
            },
            RegisterFn::Read => match &op.value {
                None => Ok(self.clone()),
                Some(v) if *v == self.0 => Ok(self.clone()),
                Some(v) => Err(Inconsistent::new(format!(
                    "can't read {:?} from register holding {:?}",
                    v, self.0
                ))),
            },
        }
    }
}

/// Functions on a compare-and-set register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasFn {
    Read,
    Write,
    Cas,
}

/// Payload for [`CasRegister`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CasValue<T> {
    /// A plain value, for reads and writes.
    Val(T),
    /// `Swap(expected, replacement)` for compare-and-set.
    Swap(T, T),
}

/// A register with an atomic compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasRegister<T>(pub T);

impl<T> Model for CasRegister<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync,
{
    type Fn = CasFn;
    type Value = CasValue<T>;

    fn step(&self, op: &Op<CasFn, CasValue<T>>) -> Result<Self, Inconsistent> {
        match (op.f, &op.value) {
            (CasFn::Read, None) => Ok(self.clone()),
            (CasFn::Read, Some(CasValue::Val(v))) => {
                if *v == self.0 {
                    Ok(self.clone())
                } else {
                    Err(Inconsistent::new(format!(
                        "can't read {:?} from register holding {:?}",
                        v, self.0
                    )))
                }
            }
            (CasFn::Write, Some(CasValue::Val(v))) => Ok(CasRegister(v.clone())),
            (CasFn::Write, None) => Err(Inconsistent::new("write invoked without a value")),
            (CasFn::Cas, Some(CasValue::Swap(expected, replacement))) => {
                if *expected == self.0 {
                    Ok(CasRegister(replacement.clone()))
                } else {
                    Err(Inconsistent::new(format!(
                        "cas expected {:?} but register holds {:?}",
                        expected, self.0
                    )))
                }
            }
            (f, value) => Err(Inconsistent::new(format!(
                "malformed op: {f:?} with payload {value:?}"
            ))),
        }
    }
}

/// Functions on a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexFn {
    Acquire,
    Release,
}

/// A lock that cannot be acquired twice or released while free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mutex {
    held: bool,
}

impl Model for Mutex {
    type Fn = MutexFn;
    type Value = ();

    fn step(&self, op: &Op<MutexFn, ()>) -> Result<Self, Inconsistent> {
        match op.f {
            MutexFn::Acquire => {
                if self.held {
                    Err(Inconsistent::new("cannot acquire a held lock"))
                } else {
                    Ok(Mutex { held: true })
                }
            }
            MutexFn::Release => {
                if self.held {
                    Ok(Mutex { held: false })
                } else {
                    Err(Inconsistent::new("cannot release a free lock"))
                }
            }
        }
    }
}
