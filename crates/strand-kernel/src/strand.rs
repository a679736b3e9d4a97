//! Strands: cooperatively scheduled threads of execution.
//!
//! A strand owns a stack of coroutine [`Frame`]s, the pending action to
//! deliver to the top frame, an optional terminator, its listeners and its
//! links.  It knows nothing about other strands; the kernel drives it one
//! step at a time and routes every cross-strand effect by [`StrandId`].
//!
//! # State machine
//!
//! ```text
//! Ready --start--> Ticking --suspend--> Suspended --resume/throw--> Ticking
//!                     |                     |
//!                     +--return--> Succeeded |
//!                     +--raise---> Failed    |
//!        any non-terminal --terminate--> Terminated
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coroutine::{Coroutine, Frame, FrameEvent};
use crate::error::StrandError;
use crate::io::{Interest, StreamKey};
use crate::reactor::Token;
use crate::value::{StrandId, Value};
use crate::wait::GroupId;
use crate::yieldable::{Key, Yieldable};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of a strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrandState {
    /// Spawned; the entry coroutine has not run yet.
    Ready,
    /// Currently being driven by the kernel.
    Ticking,
    /// Waiting for an external event or for someone to resume it.
    Suspended,
    /// The entry coroutine returned.
    Succeeded,
    /// An exception escaped the entry coroutine.
    Failed,
    /// The strand was terminated.
    Terminated,
}

impl StrandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Terminated)
    }
}

/// How a strand exited.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(Value),
    Failed(StrandError),
    Terminated,
}

impl Outcome {
    /// The terminal state matching this outcome.
    pub fn state(&self) -> StrandState {
        match self {
            Self::Succeeded(_) => StrandState::Succeeded,
            Self::Failed(_) => StrandState::Failed,
            Self::Terminated => StrandState::Terminated,
        }
    }

    /// The value a waiter on `strand` receives: termination becomes
    /// [`StrandError::Terminated`].
    pub fn to_result(&self, strand: StrandId) -> Result<Value, StrandError> {
        match self {
            Self::Succeeded(v) => Ok(v.clone()),
            Self::Failed(e) => Err(e.clone()),
            Self::Terminated => Err(StrandError::Terminated { strand }),
        }
    }
}

/// External observer of a strand's exit.
///
/// An observer that returns `Err` is treated like an unhandled strand
/// failure and escalated to the kernel's unhandled-exception handler.
pub trait StrandObserver {
    fn on_exit(&self, strand: StrandId, outcome: &Outcome) -> Result<(), StrandError>;
}

/// Serializable snapshot of a live strand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandInfo {
    pub id: StrandId,
    pub state: StrandState,
    /// Number of frames on the call stack.
    pub depth: usize,
    pub links: Vec<StrandId>,
    /// Whether a wait group, timeout or adopter is listening.
    pub has_primary: bool,
    pub observers: usize,
    pub spawned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Kernel-internal types
// ---------------------------------------------------------------------------

/// Next input for the top frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    Start,
    Send(Value),
    Throw(StrandError),
}

impl From<Result<Value, StrandError>> for Action {
    fn from(result: Result<Value, StrandError>) -> Self {
        match result {
            Ok(v) => Self::Send(v),
            Err(e) => Self::Throw(e),
        }
    }
}

/// The privileged listener of a strand.  Setting a new one evicts the old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Listener {
    /// Member `index` of a composite wait group (including adopt/await).
    Member { group: GroupId, index: usize },
    /// Substrand of a timeout race.
    Race(GroupId),
}

/// Cleanup run once if a suspended strand is terminated.
pub(crate) enum Terminator {
    CancelTimer(Token),
    CancelGroup(GroupId),
    CancelRace(GroupId),
    CancelIo { key: StreamKey, interest: Interest },
    Callback(Box<dyn FnOnce()>),
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CancelTimer(t) => f.debug_tuple("CancelTimer").field(t).finish(),
            Self::CancelGroup(g) => f.debug_tuple("CancelGroup").field(g).finish(),
            Self::CancelRace(g) => f.debug_tuple("CancelRace").field(g).finish(),
            Self::CancelIo { key, interest } => f
                .debug_struct("CancelIo")
                .field("key", key)
                .field("interest", interest)
                .finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Result of driving a strand one step.
pub(crate) enum StrandStep {
    /// A frame was pushed or popped; there is more to do.
    Continue,
    /// No pending action: the strand must suspend.
    Idle,
    /// The top frame yielded an operation for the dispatcher.
    Yielded { key: Key, value: Yieldable },
    /// The call stack unwound completely.
    Exited(Outcome),
}

// ---------------------------------------------------------------------------
// Strand
// ---------------------------------------------------------------------------

pub(crate) struct Strand {
    id: StrandId,
    pub(crate) state: StrandState,
    stack: Vec<Frame>,
    pub(crate) pending: Option<Action>,
    pub(crate) terminator: Option<Terminator>,
    pub(crate) primary: Option<Listener>,
    pub(crate) observers: Vec<Rc<dyn StrandObserver>>,
    pub(crate) links: BTreeSet<StrandId>,
    /// Bumped on every accepted resume; wakeups carrying an older epoch are
    /// stale.
    pub(crate) epoch: u64,
    spawned_at: DateTime<Utc>,
}

impl Strand {
    pub(crate) fn new(id: StrandId, entry: Box<dyn Coroutine>) -> Self {
        Self {
            id,
            state: StrandState::Ready,
            stack: vec![Frame::new(entry)],
            pending: None,
            terminator: None,
            primary: None,
            observers: Vec::new(),
            links: BTreeSet::new(),
            epoch: 0,
            spawned_at: Utc::now(),
        }
    }

    pub(crate) fn id(&self) -> StrandId {
        self.id
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Move out of `Ready` and schedule the entry frame's first step.
    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.state, StrandState::Ready);
        self.state = StrandState::Ticking;
        self.pending = Some(Action::Start);
    }

    /// Push a nested coroutine and schedule its first step.
    pub(crate) fn push_call(&mut self, coroutine: Box<dyn Coroutine>) {
        self.stack.push(Frame::new(coroutine));
        self.pending = Some(Action::Start);
    }

    /// Deliver the pending action to the top frame and translate the
    /// result.  Never recurses: nested calls and returns just reshape the
    /// stack and leave the next action pending.
    pub(crate) fn step_once(&mut self) -> StrandStep {
        let Some(action) = self.pending.take() else {
            return StrandStep::Idle;
        };
        let Some(frame) = self.stack.last_mut() else {
            return StrandStep::Idle;
        };

        let event = match action {
            Action::Start => frame.start(),
            Action::Send(value) => frame.send(value),
            Action::Throw(error) => frame.throw(error),
        };

        match event {
            FrameEvent::Call(coroutine) => {
                self.push_call(coroutine);
                StrandStep::Continue
            }
            FrameEvent::Dispatch { key, value } => StrandStep::Yielded { key, value },
            FrameEvent::Return(value) => {
                self.stack.pop();
                if self.stack.is_empty() {
                    StrandStep::Exited(Outcome::Succeeded(value))
                } else {
                    self.pending = Some(Action::Send(value));
                    StrandStep::Continue
                }
            }
            FrameEvent::Raise(error) => {
                self.stack.pop();
                if self.stack.is_empty() {
                    StrandStep::Exited(Outcome::Failed(error))
                } else {
                    self.pending = Some(Action::Throw(error));
                    StrandStep::Continue
                }
            }
        }
    }

    /// Discard the call stack and everything pending.
    pub(crate) fn finish(&mut self, state: StrandState) {
        self.state = state;
        self.stack.clear();
        self.pending = None;
        self.terminator = None;
    }

    pub(crate) fn info(&self) -> StrandInfo {
        StrandInfo {
            id: self.id,
            state: self.state,
            depth: self.depth(),
            links: self.links.iter().copied().collect(),
            has_primary: self.primary.is_some(),
            observers: self.observers.len(),
            spawned_at: self.spawned_at,
        }
    }
}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strand")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("depth", &self.depth())
            .field("pending", &self.pending)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
