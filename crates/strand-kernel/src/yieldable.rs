//! Values a coroutine may yield.
//!
//! [`Yieldable`] is the explicit tagged union the dispatcher matches on.  The
//! terse forms (`Value::Null`, a number, a list, a stream under a data key)
//! follow the classic sniffing rules; named operations travel as
//! [`ApiCall`] tokens.

use std::fmt;
use std::rc::Rc;

use crate::coroutine::{Coroutine, Once, Script};
use crate::deferred::Deferred;
use crate::error::StrandError;
use crate::handle::KernelHandle;
use crate::io::Stream;
use crate::value::{StrandId, TaskFactory, Value};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// The key a value is yielded under.
///
/// Plain yields use [`Key::Index`].  A [`Key::Data`] key on a stream yield is
/// the data to write to that stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(u64),
    Data(Vec<u8>),
}

impl Default for Key {
    fn default() -> Self {
        Self::Index(0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Data(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Yieldable
// ---------------------------------------------------------------------------

/// Hook run when a strand parks via `suspend`; receives the strand id and a
/// handle for resuming it later.
pub type SuspendHook = Box<dyn FnOnce(StrandId, &KernelHandle)>;

/// Cleanup run if a parked strand is terminated.
pub type TerminateHook = Box<dyn FnOnce()>;

/// Everything a coroutine can yield.
pub enum Yieldable {
    /// Yield to other strands until the next scheduler pass.
    Cooperate,
    /// Sleep for a number of seconds.
    Sleep(f64),
    /// Wait for every sub-operation; shorthand for [`ApiCall::All`].
    All(Vec<Yieldable>),
    /// Read from the stream, or write the yield key's data to it.
    Stream(Rc<dyn Stream>),
    /// Wait for a then-style deferred value.
    Deferred(Box<dyn Deferred>),
    /// An explicit named operation.
    Call(ApiCall),
    /// A nested coroutine call.
    Coroutine(Box<dyn Coroutine>),
    /// Wait for another strand to exit.
    Strand(StrandId),
    /// A named operation with dynamic arguments, resolved at dispatch.
    Named { name: String, args: Vec<Value> },
    /// A plain value, classified by the dispatcher.
    Value(Value),
}

impl Yieldable {
    pub fn coroutine(coroutine: impl Coroutine + 'static) -> Self {
        Self::Coroutine(Box::new(coroutine))
    }

    pub fn named(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Named {
            name: name.into(),
            args,
        }
    }

    /// Turn this yieldable into the entry coroutine of a strand.
    pub(crate) fn into_entry(self) -> Box<dyn Coroutine> {
        match self {
            Self::Coroutine(coroutine) => coroutine,
            other => Box::new(Once::new(other)),
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Cooperate => "Cooperate",
            Self::Sleep(_) => "Sleep",
            Self::All(_) => "All",
            Self::Stream(_) => "Stream",
            Self::Deferred(_) => "Deferred",
            Self::Call(_) => "Call",
            Self::Coroutine(_) => "Coroutine",
            Self::Strand(_) => "Strand",
            Self::Named { .. } => "Named",
            Self::Value(_) => "Value",
        }
    }
}

impl fmt::Debug for Yieldable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep(seconds) => f.debug_tuple("Sleep").field(seconds).finish(),
            Self::All(items) => f.debug_tuple("All").field(items).finish(),
            Self::Call(call) => f.debug_tuple("Call").field(call).finish(),
            Self::Strand(id) => f.debug_tuple("Strand").field(id).finish(),
            Self::Named { name, args } => f
                .debug_struct("Named")
                .field("name", name)
                .field("args", args)
                .finish(),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => f.write_str(other.variant_name()),
        }
    }
}

impl From<ApiCall> for Yieldable {
    fn from(call: ApiCall) -> Self {
        Self::Call(call)
    }
}

impl From<Script> for Yieldable {
    fn from(script: Script) -> Self {
        Self::coroutine(script)
    }
}

impl From<StrandId> for Yieldable {
    fn from(id: StrandId) -> Self {
        Self::Strand(id)
    }
}

/// Classify a plain value: null cooperates, numbers sleep, lists wait for
/// all elements, strand ids are awaited, anything else stays a value.
impl From<Value> for Yieldable {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Cooperate,
            Value::Int(n) => Self::Sleep(n as f64),
            Value::Float(x) => Self::Sleep(x),
            Value::List(items) => Self::All(items.into_iter().map(Self::from).collect()),
            Value::Strand(id) => Self::Strand(id),
            other => Self::Value(other),
        }
    }
}

// ---------------------------------------------------------------------------
// ApiCall
// ---------------------------------------------------------------------------

/// An explicit kernel operation.
pub enum ApiCall {
    /// Resume on the next scheduler pass.
    Cooperate,
    /// Resume after at least `seconds`; non-positive values cooperate.
    Sleep(f64),
    /// Run `task` as a substrand raced against a timer.
    Timeout { seconds: f64, task: Box<Yieldable> },
    /// Park with no wake condition.
    Suspend {
        on_suspend: Option<SuspendHook>,
        on_terminate: Option<TerminateHook>,
    },
    /// Terminate the calling strand.
    Terminate,
    /// Spawn `task`; resumes immediately with the new strand id.
    Execute(Box<Yieldable>),
    /// Resume with a [`Callback`](crate::Callback) that spawns a strand per call.
    Callback(TaskFactory),
    /// Link `a` with `b` (default: the caller).
    Link { a: StrandId, b: Option<StrandId> },
    /// Remove a link between `a` and `b` (default: the caller).
    Unlink { a: StrandId, b: Option<StrandId> },
    /// Become the primary listener of an existing strand and wait for it.
    Adopt(StrandId),
    /// Wait for every task to succeed.
    All(Vec<Yieldable>),
    /// Wait for the first task to succeed.
    Any(Vec<Yieldable>),
    /// Wait for `count` tasks to succeed.
    Some { count: usize, tasks: Vec<Yieldable> },
    /// Wait for the first task to exit, whatever the outcome.
    First(Vec<Yieldable>),
    /// Read between `min_len` and `max_len` bytes.
    Read {
        stream: Rc<dyn Stream>,
        min_len: usize,
        max_len: usize,
    },
    /// Write `data` (or its first `length` bytes).
    Write {
        stream: Rc<dyn Stream>,
        data: Vec<u8>,
        length: Option<usize>,
    },
}

impl ApiCall {
    /// The operation's name as used by [`Yieldable::Named`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cooperate => "cooperate",
            Self::Sleep(_) => "sleep",
            Self::Timeout { .. } => "timeout",
            Self::Suspend { .. } => "suspend",
            Self::Terminate => "terminate",
            Self::Execute(_) => "execute",
            Self::Callback(_) => "callback",
            Self::Link { .. } => "link",
            Self::Unlink { .. } => "unlink",
            Self::Adopt(_) => "adopt",
            Self::All(_) => "all",
            Self::Any(_) => "any",
            Self::Some { .. } => "some",
            Self::First(_) => "first",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
        }
    }

    /// Resolve a named operation with dynamic arguments.
    ///
    /// Only operations whose arguments are expressible as [`Value`]s can be
    /// named; `timeout`, `callback`, `read` and `write` need typed payloads and
    /// must be yielded as [`ApiCall`]s directly.
    pub fn resolve(name: &str, args: Vec<Value>) -> Result<Self, StrandError> {
        let call = match name {
            "cooperate" => Self::Cooperate,
            "sleep" => {
                let seconds = args.first().and_then(Value::as_f64).ok_or_else(|| {
                    StrandError::InvalidArgument {
                        operation: "sleep",
                        reason: "expected a number of seconds".into(),
                    }
                })?;
                Self::Sleep(seconds)
            }
            "terminate" => Self::Terminate,
            "suspend" => Self::Suspend {
                on_suspend: None,
                on_terminate: None,
            },
            "execute" => {
                let task = args.into_iter().next().ok_or(StrandError::InvalidArgument {
                    operation: "execute",
                    reason: "expected a task".into(),
                })?;
                Self::Execute(Box::new(Yieldable::from(task)))
            }
            "link" | "unlink" | "adopt" => {
                let mut ids = args.iter().map(Value::as_strand);
                let operation = match name {
                    "link" => "link",
                    "unlink" => "unlink",
                    _ => "adopt",
                };
                let a = ids.next().flatten().ok_or(StrandError::InvalidArgument {
                    operation,
                    reason: "expected a strand".into(),
                })?;
                let b = match ids.next() {
                    None => None,
                    Some(Some(id)) => Some(id),
                    Some(None) => {
                        return Err(StrandError::InvalidArgument {
                            operation,
                            reason: "second argument must be a strand".into(),
                        });
                    }
                };
                match operation {
                    "link" => Self::Link { a, b },
                    "unlink" => Self::Unlink { a, b },
                    _ => Self::Adopt(a),
                }
            }
            "all" => Self::All(args.into_iter().map(Yieldable::from).collect()),
            "any" => Self::Any(args.into_iter().map(Yieldable::from).collect()),
            "first" => Self::First(args.into_iter().map(Yieldable::from).collect()),
            "some" => {
                let mut args = args.into_iter();
                let count = args
                    .next()
                    .and_then(|v| v.as_int())
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or(StrandError::InvalidArgument {
                        operation: "some",
                        reason: "expected a non-negative count".into(),
                    })?;
                Self::Some {
                    count,
                    tasks: args.map(Yieldable::from).collect(),
                }
            }
            other => {
                return Err(StrandError::UnknownOperation {
                    name: other.to_string(),
                });
            }
        };
        Ok(call)
    }
}

impl fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep(seconds) => write!(f, "sleep({seconds})"),
            Self::Timeout { seconds, task } => write!(f, "timeout({seconds}, {task:?})"),
            Self::Execute(task) => write!(f, "execute({task:?})"),
            Self::Link { a, b } => write!(f, "link({a}, {b:?})"),
            Self::Unlink { a, b } => write!(f, "unlink({a}, {b:?})"),
            Self::Adopt(id) => write!(f, "adopt({id})"),
            Self::All(tasks) | Self::Any(tasks) | Self::First(tasks) => {
                write!(f, "{}({} tasks)", self.name(), tasks.len())
            }
            Self::Some { count, tasks } => write!(f, "some({count} of {} tasks)", tasks.len()),
            Self::Read {
                min_len, max_len, ..
            } => write!(f, "read({min_len}..={max_len})"),
            Self::Write { data, length, .. } => {
                write!(f, "write({} bytes, length {length:?})", data.len())
            }
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_are_classified() {
        assert!(matches!(Yieldable::from(Value::Null), Yieldable::Cooperate));
        assert!(matches!(Yieldable::from(Value::Int(2)), Yieldable::Sleep(s) if s == 2.0));
        assert!(matches!(Yieldable::from(Value::Float(0.25)), Yieldable::Sleep(s) if s == 0.25));
        assert!(matches!(
            Yieldable::from(Value::List(vec![Value::Null, Value::Int(1)])),
            Yieldable::All(items) if items.len() == 2
        ));
        assert!(matches!(
            Yieldable::from(Value::from("text")),
            Yieldable::Value(Value::Str(_))
        ));
    }

    #[test]
    fn resolve_known_operations() {
        assert!(matches!(
            ApiCall::resolve("sleep", vec![Value::Float(0.5)]),
            Ok(ApiCall::Sleep(s)) if s == 0.5
        ));
        let call = ApiCall::resolve("some", vec![Value::Int(1), Value::Null, Value::Null]);
        assert!(matches!(call, Ok(ApiCall::Some { count: 1, ref tasks }) if tasks.len() == 2));

        let a = StrandId::new(1);
        assert!(matches!(
            ApiCall::resolve("link", vec![Value::Strand(a)]),
            Ok(ApiCall::Link { a: x, b: None }) if x == a
        ));
    }

    #[test]
    fn resolve_rejects_unknown_and_malformed() {
        match ApiCall::resolve("teleport", Vec::new()) {
            Err(StrandError::UnknownOperation { name }) => assert_eq!(name, "teleport"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            ApiCall::resolve("sleep", vec![Value::from("soon")]),
            Err(StrandError::InvalidArgument { operation: "sleep", .. })
        ));
        assert!(matches!(
            ApiCall::resolve("adopt", vec![Value::Int(3)]),
            Err(StrandError::InvalidArgument { operation: "adopt", .. })
        ));
    }

    #[test]
    fn key_display_names_data() {
        assert_eq!(Key::default().to_string(), "0");
        assert_eq!(Key::from("abc").to_string(), "\"abc\"");
    }
}
