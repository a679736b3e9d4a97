//! Coroutines and call-stack frames.
//!
//! A [`Coroutine`] is a computation that can be driven one step at a time,
//! accepting either a value or an injected exception at each step.  Rust has
//! no stable generators, so bodies are written as explicit state machines:
//! implement the trait directly, build one from a closure with [`from_fn`],
//! or chain stages with [`Script`].
//!
//! A [`Frame`] wraps one coroutine on a strand's call stack and translates
//! each [`Step`] into a [`FrameEvent`] for the strand: push a nested call,
//! hand an operation to the dispatcher, or complete with a value/exception.

use std::collections::VecDeque;
use std::fmt;

use crate::error::StrandError;
use crate::value::Value;
use crate::yieldable::{Key, Yieldable};

// ---------------------------------------------------------------------------
// Coroutine contract
// ---------------------------------------------------------------------------

/// Input delivered to a coroutine when it is driven.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First step; no value has been produced yet.
    Start,
    /// Resume with the result of the last yield.
    Value(Value),
    /// Resume by raising `error` at the last yield point.
    Error(StrandError),
}

impl Resume {
    /// Collapse into a `Result`, treating [`Resume::Start`] as `Null`.
    pub fn into_result(self) -> Result<Value, StrandError> {
        match self {
            Self::Start => Ok(Value::Null),
            Self::Value(v) => Ok(v),
            Self::Error(e) => Err(e),
        }
    }
}

/// What a coroutine produced for one step.
pub enum Step {
    /// Suspend at a yield point.
    Yield { key: Key, value: Yieldable },
    /// Finish with a value.
    Return(Value),
    /// Finish by raising an exception.
    Throw(StrandError),
}

impl Step {
    /// Yield `value` under the default key.
    pub fn yielding(value: impl Into<Yieldable>) -> Self {
        Self::Yield {
            key: Key::default(),
            value: value.into(),
        }
    }

    /// Yield `value` under an explicit key.
    pub fn yielding_keyed(key: Key, value: impl Into<Yieldable>) -> Self {
        Self::Yield {
            key,
            value: value.into(),
        }
    }

    /// Call a nested coroutine; its result becomes the yield result.
    pub fn call(coroutine: impl Coroutine + 'static) -> Self {
        Self::yielding(Yieldable::coroutine(coroutine))
    }

    /// Finish with `value`.
    pub fn done(value: impl Into<Value>) -> Self {
        Self::Return(value.into())
    }

    /// Finish with a raised user exception.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Throw(StrandError::raised(message))
    }
}

impl From<Result<Value, StrandError>> for Step {
    fn from(result: Result<Value, StrandError>) -> Self {
        match result {
            Ok(v) => Self::Return(v),
            Err(e) => Self::Throw(e),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield { key, value } => f
                .debug_struct("Yield")
                .field("key", key)
                .field("value", value)
                .finish(),
            Self::Return(v) => f.debug_tuple("Return").field(v).finish(),
            Self::Throw(e) => f.debug_tuple("Throw").field(e).finish(),
        }
    }
}

/// A resumable computation.
///
/// `resume` is called with [`Resume::Start`] exactly once, then with the
/// outcome of each yield until the coroutine returns or throws.  It is never
/// called again after that.
pub trait Coroutine {
    fn resume(&mut self, input: Resume) -> Step;
}

// ---------------------------------------------------------------------------
// Closure coroutines
// ---------------------------------------------------------------------------

/// Coroutine backed by an `FnMut` closure holding its own state.
pub struct FnCoroutine<F> {
    body: F,
}

impl<F> Coroutine for FnCoroutine<F>
where
    F: FnMut(Resume) -> Step,
{
    fn resume(&mut self, input: Resume) -> Step {
        (self.body)(input)
    }
}

/// Build a coroutine from a closure.
pub fn from_fn<F>(body: F) -> FnCoroutine<F>
where
    F: FnMut(Resume) -> Step,
{
    FnCoroutine { body }
}

type Stage = Box<dyn FnOnce(Resume) -> Step>;

/// A coroutine assembled from one-shot stages.
///
/// Each resume consumes the next stage.  Once every stage has run, the last
/// input is returned (or rethrown), so a script whose final stage yields an
/// operation returns that operation's result.
///
/// ```
/// use strand_kernel::{api, Script, Step};
///
/// let script = Script::new()
///     .then(|_| Step::yielding(api::sleep(0.01)))
///     .then(|_| Step::done("woke"));
/// # let _ = script;
/// ```
#[derive(Default)]
pub struct Script {
    stages: VecDeque<Stage>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage that receives the resumed value.  An incoming exception
    /// skips the stage and propagates.
    pub fn then<F>(mut self, stage: F) -> Self
    where
        F: FnOnce(Value) -> Step + 'static,
    {
        self.stages
            .push_back(Box::new(move |input| match input.into_result() {
                Ok(value) => stage(value),
                Err(error) => Step::Throw(error),
            }));
        self
    }

    /// Append a stage that sees the raw [`Resume`], exceptions included.
    pub fn handle<F>(mut self, stage: F) -> Self
    where
        F: FnOnce(Resume) -> Step + 'static,
    {
        self.stages.push_back(Box::new(stage));
        self
    }

    /// Number of stages not yet run.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl Coroutine for Script {
    fn resume(&mut self, input: Resume) -> Step {
        match self.stages.pop_front() {
            Some(stage) => stage(input),
            None => input.into_result().into(),
        }
    }
}

/// Coroutine that yields a single operation and returns its result.
///
/// Used to run a bare yieldable (a sleep, a deferred, ...) as the entry point
/// of a strand.
pub struct Once {
    value: Option<Yieldable>,
}

impl Once {
    pub fn new(value: Yieldable) -> Self {
        Self { value: Some(value) }
    }
}

impl Coroutine for Once {
    fn resume(&mut self, input: Resume) -> Step {
        match (input, self.value.take()) {
            (Resume::Start, Some(value)) => Step::yielding(value),
            (input, _) => input.into_result().into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// What a frame reports after being driven one step.
pub enum FrameEvent {
    /// Push a nested coroutine on top of this frame.
    Call(Box<dyn Coroutine>),
    /// Hand an operation to the dispatcher.
    Dispatch { key: Key, value: Yieldable },
    /// The coroutine returned.
    Return(Value),
    /// The coroutine raised an exception.
    Raise(StrandError),
}

/// One coroutine on a strand's call stack.
pub struct Frame {
    coroutine: Box<dyn Coroutine>,
    started: bool,
    finished: bool,
    last_key: Option<Key>,
}

impl Frame {
    pub fn new(coroutine: Box<dyn Coroutine>) -> Self {
        Self {
            coroutine,
            started: false,
            finished: false,
            last_key: None,
        }
    }

    /// Drive the coroutine's first step.
    pub fn start(&mut self) -> FrameEvent {
        debug_assert!(!self.started, "frame started twice");
        self.started = true;
        self.drive(Resume::Start)
    }

    /// Resume the coroutine with the result of its last yield.
    pub fn send(&mut self, value: Value) -> FrameEvent {
        self.drive(Resume::Value(value))
    }

    /// Raise `error` at the coroutine's last yield point.
    pub fn throw(&mut self, error: StrandError) -> FrameEvent {
        self.drive(Resume::Error(error))
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Key of the most recent operation this frame yielded.
    pub fn yielded_key(&self) -> Option<&Key> {
        self.last_key.as_ref()
    }

    fn drive(&mut self, input: Resume) -> FrameEvent {
        debug_assert!(!self.finished, "frame driven after completion");
        match self.coroutine.resume(input) {
            Step::Yield {
                value: Yieldable::Coroutine(nested),
                key,
            } => {
                self.last_key = Some(key);
                FrameEvent::Call(nested)
            }
            Step::Yield { key, value } => {
                self.last_key = Some(key.clone());
                FrameEvent::Dispatch { key, value }
            }
            Step::Return(value) => {
                self.finished = true;
                FrameEvent::Return(value)
            }
            Step::Throw(error) => {
                self.finished = true;
                FrameEvent::Raise(error)
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("started", &self.started)
            .field("finished", &self.finished)
            .field("last_key", &self.last_key)
            .finish_non_exhaustive()
    }
}
