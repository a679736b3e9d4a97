//! Kernel error types.
//!
//! Two error types cross the public API:
//!
//! - [`StrandError`] is the "exception" of the strand model.  It is thrown
//!   into coroutines at yield points, propagates frame-by-frame up a strand's
//!   call stack and is delivered to whoever waits on a strand.  It is `Clone`
//!   because a single failure may be observed by several listeners.
//! - [`KernelError`] is returned by the scheduling loop itself
//!   ([`Kernel::run`](crate::Kernel::run) and friends) and by configuration
//!   loading.

use std::fmt;

use crate::value::StrandId;

/// An exception raised inside, or synthesized for, a strand.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrandError {
    // -- Coroutine-level ------------------------------------------------------
    /// Raised by user code inside a coroutine.
    #[error("{message}")]
    Raised { message: String },

    // -- Synthesized by the kernel -------------------------------------------
    /// The observed strand exited via termination rather than return/throw.
    #[error("{strand} was terminated")]
    Terminated { strand: StrandId },

    /// A timeout-raced substrand lost to its timer.
    #[error("timed out after {seconds}s")]
    Timeout { seconds: f64 },

    /// Several substrands failed; see [`CompositeError`].
    #[error(transparent)]
    Composite(CompositeError),

    /// A deferred value was rejected with a reason that is not itself an
    /// exception.
    #[error("deferred value rejected: {reason}")]
    Rejected { reason: String },

    /// Another listener replaced this one as the strand's primary listener.
    #[error("primary listener of {strand} was replaced")]
    Evicted { strand: StrandId },

    /// The referenced strand is neither live nor has a retained outcome.
    #[error("unknown strand: {strand}")]
    UnknownStrand { strand: StrandId },

    // -- Operation errors -----------------------------------------------------
    /// An API operation was invoked with invalid input.
    #[error("invalid argument to `{operation}`: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    /// A coroutine yielded a `(key, value)` pair the dispatcher does not
    /// recognise.
    #[error("unexpected value yielded: key {key}, value {value}")]
    UnexpectedValue { key: String, value: String },

    /// A named operation does not exist.
    #[error("unknown operation: `{name}`")]
    UnknownOperation { name: String },

    /// A stream read or write failed.
    #[error("stream i/o failed: {reason}")]
    Io { reason: String },
}

impl StrandError {
    /// Shorthand for a user-level exception carrying `message`.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised {
            message: message.into(),
        }
    }

    /// Whether this error reports a terminated strand.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl From<std::io::Error> for StrandError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composite failures
// ---------------------------------------------------------------------------

/// Aggregated failures of a composite wait.
///
/// Every entry is keyed by the failing substrand's spawn-order index; the
/// entries themselves are stored in completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeError {
    failures: Vec<(usize, StrandError)>,
}

impl CompositeError {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.  Call in completion order.
    pub fn push(&mut self, index: usize, error: StrandError) {
        self.failures.push((index, error));
    }

    /// The failure recorded for the substrand at spawn index `index`.
    pub fn get(&self, index: usize) -> Option<&StrandError> {
        self.failures
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, e)| e)
    }

    /// Iterate `(spawn index, error)` pairs in completion order.
    pub fn iter(&self) -> impl Iterator<Item = &(usize, StrandError)> {
        self.failures.iter()
    }

    /// Spawn indices in completion order.
    pub fn indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(i, _)| *i).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} substrand(s) failed", self.failures.len())?;
        for (index, error) in &self.failures {
            write!(f, "; [{index}] {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}

// ---------------------------------------------------------------------------
// Kernel errors
// ---------------------------------------------------------------------------

/// Error returned by the scheduling loop and by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Run loop -------------------------------------------------------------
    /// The strand passed to [`Kernel::run_until`](crate::Kernel::run_until)
    /// failed or was terminated.
    #[error("{strand} failed: {source}")]
    StrandFailed {
        strand: StrandId,
        #[source]
        source: StrandError,
    },

    /// A strand failed with nobody watching and the unhandled-exception
    /// handler was absent or itself failed.
    #[error("unhandled failure in {strand}: {source}")]
    Unhandled {
        strand: StrandId,
        #[source]
        source: StrandError,
    },

    /// The kernel was interrupted via [`Kernel::interrupt`](crate::Kernel::interrupt).
    #[error("kernel interrupted: {source}")]
    Interrupted {
        #[source]
        source: StrandError,
    },

    /// The loop ran out of work before the awaited strand exited.
    #[error("{strand} cannot make progress: no runnable strands and no pending events")]
    Stalled { strand: StrandId },

    /// The strand is neither live nor has a retained outcome.
    #[error("unknown strand: {strand}")]
    UnknownStrand { strand: StrandId },

    // -- Configuration --------------------------------------------------------
    /// Configuration validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The configuration file is not valid TOML for [`KernelConfig`](crate::KernelConfig).
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Reading the configuration file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
