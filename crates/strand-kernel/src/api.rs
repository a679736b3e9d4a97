//! Constructors for every named kernel operation.
//!
//! Each helper returns a [`Yieldable`] ready to be yielded from a coroutine:
//!
//! ```
//! use strand_kernel::{api, Script, Step, Value};
//!
//! let task = Script::new()
//!     .then(|_| Step::yielding(api::all(vec![api::sleep(0.01), api::cooperate()])))
//!     .then(|results| Step::done(results.as_map().map_or(0, |m| m.len() as i64)));
//! # let _ = task;
//! ```

use std::rc::Rc;

use crate::handle::KernelHandle;
use crate::io::Stream;
use crate::value::{StrandId, Value};
use crate::yieldable::{ApiCall, Yieldable};

/// Resume on the next scheduler pass.
pub fn cooperate() -> Yieldable {
    ApiCall::Cooperate.into()
}

/// Resume after at least `seconds`.
pub fn sleep(seconds: f64) -> Yieldable {
    ApiCall::Sleep(seconds).into()
}

/// Run `task` as a substrand, throwing [`StrandError::Timeout`] if it has not
/// exited within `seconds`.
///
/// [`StrandError::Timeout`]: crate::StrandError::Timeout
pub fn timeout(seconds: f64, task: impl Into<Yieldable>) -> Yieldable {
    ApiCall::Timeout {
        seconds,
        task: Box::new(task.into()),
    }
    .into()
}

/// Park the strand until someone resumes or throws into it.
pub fn suspend() -> Yieldable {
    ApiCall::Suspend {
        on_suspend: None,
        on_terminate: None,
    }
    .into()
}

/// Park the strand, handing its id and a kernel handle to `on_suspend`.
/// `on_terminate` runs if the strand is terminated while parked.
pub fn suspend_with<S, T>(on_suspend: S, on_terminate: Option<T>) -> Yieldable
where
    S: FnOnce(StrandId, &KernelHandle) + 'static,
    T: FnOnce() + 'static,
{
    ApiCall::Suspend {
        on_suspend: Some(Box::new(on_suspend)),
        on_terminate: on_terminate.map(|f| Box::new(f) as Box<dyn FnOnce()>),
    }
    .into()
}

/// Terminate the calling strand.
pub fn terminate() -> Yieldable {
    ApiCall::Terminate.into()
}

/// Spawn `task` as a new strand; resumes with its id.
pub fn execute(task: impl Into<Yieldable>) -> Yieldable {
    ApiCall::Execute(Box::new(task.into())).into()
}

/// Resume with a [`Callback`](crate::Callback) spawning `factory(args)` per call.
pub fn callback<F>(factory: F) -> Yieldable
where
    F: Fn(Vec<Value>) -> Yieldable + 'static,
{
    ApiCall::Callback(Rc::new(factory)).into()
}

/// Link `a` with `b`, or with the caller when `b` is `None`.
pub fn link(a: StrandId, b: Option<StrandId>) -> Yieldable {
    ApiCall::Link { a, b }.into()
}

/// Remove the link between `a` and `b` (default: the caller).
pub fn unlink(a: StrandId, b: Option<StrandId>) -> Yieldable {
    ApiCall::Unlink { a, b }.into()
}

/// Become `strand`'s primary listener and wait for it.
pub fn adopt(strand: StrandId) -> Yieldable {
    ApiCall::Adopt(strand).into()
}

pub fn all(tasks: Vec<Yieldable>) -> Yieldable {
    ApiCall::All(tasks).into()
}

pub fn any(tasks: Vec<Yieldable>) -> Yieldable {
    ApiCall::Any(tasks).into()
}

/// Wait until `count` of `tasks` have succeeded.
pub fn some(count: usize, tasks: Vec<Yieldable>) -> Yieldable {
    ApiCall::Some { count, tasks }.into()
}

pub fn first(tasks: Vec<Yieldable>) -> Yieldable {
    ApiCall::First(tasks).into()
}

/// Read at least `min_len` and at most `max_len` bytes.
pub fn read(stream: Rc<dyn Stream>, min_len: usize, max_len: usize) -> Yieldable {
    ApiCall::Read {
        stream,
        min_len,
        max_len,
    }
    .into()
}

/// Write `data`, or only its first `length` bytes.
pub fn write(stream: Rc<dyn Stream>, data: impl Into<Vec<u8>>, length: Option<usize>) -> Yieldable {
    ApiCall::Write {
        stream,
        data: data.into(),
        length,
    }
    .into()
}
