//! Bridge for then-style deferred values.
//!
//! Yielding a [`Deferred`] suspends the strand until the value settles.  A
//! fulfilled value resumes the strand; a rejection is thrown into it.  When
//! the deferred can be cancelled, its canceller becomes the strand's
//! terminator.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::StrandError;
use crate::value::Value;

/// Why a deferred value was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Rejected with an exception; thrown as is.
    Error(StrandError),
    /// Rejected with a plain value; thrown as [`StrandError::Rejected`].
    Reason(Value),
}

impl Rejection {
    pub fn into_error(self) -> StrandError {
        match self {
            Self::Error(error) => error,
            Self::Reason(Value::Str(reason)) => StrandError::Rejected { reason },
            Self::Reason(other) => StrandError::Rejected {
                reason: format!("{other:?}"),
            },
        }
    }
}

impl From<StrandError> for Rejection {
    fn from(error: StrandError) -> Self {
        Self::Error(error)
    }
}

/// Callback receiving the settled result of a deferred value.
pub type Settle = Box<dyn FnOnce(Result<Value, Rejection>)>;

/// A value that settles later.
pub trait Deferred {
    /// Register the single settlement callback.  It may run immediately if
    /// the value has already settled.
    fn then(self: Box<Self>, on_settled: Settle);

    /// A hook that abandons the pending value, if supported.
    fn canceller(&self) -> Option<Box<dyn FnOnce()>> {
        None
    }
}

// ---------------------------------------------------------------------------
// Promise
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    settled: Option<Result<Value, Rejection>>,
    waiter: Option<Settle>,
    finished: bool,
    cancelled: bool,
}

/// Consumer side of a one-shot deferred value.
pub struct Promise {
    state: Rc<RefCell<State>>,
}

/// Producer side of a [`Promise`].
#[derive(Clone)]
pub struct Resolver {
    state: Rc<RefCell<State>>,
}

impl Promise {
    /// A promise settled later through the returned [`Resolver`].
    pub fn pending() -> (Self, Resolver) {
        let state = Rc::new(RefCell::new(State::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            Resolver { state },
        )
    }

    pub fn resolved(value: impl Into<Value>) -> Self {
        let (promise, resolver) = Self::pending();
        resolver.resolve(value);
        promise
    }

    pub fn rejected(rejection: impl Into<Rejection>) -> Self {
        let (promise, resolver) = Self::pending();
        resolver.reject(rejection);
        promise
    }
}

impl Deferred for Promise {
    fn then(self: Box<Self>, on_settled: Settle) {
        let settled = self.state.borrow_mut().settled.take();
        match settled {
            Some(result) => on_settled(result),
            None => self.state.borrow_mut().waiter = Some(on_settled),
        }
    }

    fn canceller(&self) -> Option<Box<dyn FnOnce()>> {
        let state = Rc::clone(&self.state);
        Some(Box::new(move || {
            let mut state = state.borrow_mut();
            state.cancelled = true;
            state.waiter = None;
        }))
    }
}

impl Resolver {
    /// Fulfil the promise.  Returns `false` if it already settled or was
    /// cancelled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(Ok(value.into()))
    }

    /// Reject the promise.  Returns `false` if it already settled or was
    /// cancelled.
    pub fn reject(&self, rejection: impl Into<Rejection>) -> bool {
        self.settle(Err(rejection.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().cancelled
    }

    fn settle(&self, result: Result<Value, Rejection>) -> bool {
        let waiter = {
            let mut state = self.state.borrow_mut();
            if state.cancelled || state.finished {
                return false;
            }
            state.finished = true;
            match state.waiter.take() {
                Some(waiter) => waiter,
                None => {
                    state.settled = Some(result);
                    return true;
                }
            }
        };
        waiter(result);
        true
    }
}
