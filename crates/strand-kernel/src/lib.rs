//! Strand Kernel.
//!
//! A single-threaded, cooperative scheduler for *strands*: lightweight
//! threads of execution built from nested coroutines.
//!
//! - **[`kernel`]** -- The [`Kernel`]: spawn, scheduling loop, termination,
//!   links, observers and the unhandled-exception policy.
//! - **[`coroutine`]** -- The [`Coroutine`] contract, [`Script`] and frames.
//! - **[`api`]** -- Constructors for every operation a coroutine can yield:
//!   cooperate, sleep, timeout, suspend, execute, composite waits, stream
//!   reads and writes.
//! - **[`reactor`]** -- The [`Reactor`] collaborator delivering timers and
//!   stream readiness, with the default [`EventQueue`].
//! - **[`io`]** -- The [`Stream`] abstraction and the in-memory
//!   [`MemoryStream`].
//! - **[`deferred`]** -- Bridge for then-style deferred values ([`Promise`]).
//! - **[`handle`]** -- [`KernelHandle`], the command inbox for code running
//!   outside a tick.
//! - **[`config`]** -- TOML-backed [`KernelConfig`].
//! - **[`error`]** -- [`StrandError`] and [`KernelError`] via [`thiserror`].
//!
//! Nothing here is `Send`: a kernel and its strands live on one thread.
//!
//! ```
//! use strand_kernel::{api, Kernel, Script, Step, Value};
//!
//! let mut kernel = Kernel::new();
//! let worker = kernel.spawn(
//!     Script::new()
//!         .then(|_| Step::yielding(api::sleep(0.001)))
//!         .then(|_| Step::done("rested")),
//! );
//! let waiter = kernel.spawn(Script::new().then(move |_| Step::yielding(worker)));
//! assert_eq!(kernel.run_until(waiter).unwrap(), Value::from("rested"));
//! ```

pub mod api;
pub mod config;
pub mod coroutine;
pub mod deferred;
mod dispatch;
pub mod error;
pub mod handle;
pub mod io;
pub mod kernel;
pub mod reactor;
mod registry;
pub mod strand;
pub mod value;
mod wait;
pub mod yieldable;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::KernelConfig;
pub use coroutine::{Coroutine, FnCoroutine, Frame, FrameEvent, Once, Resume, Script, Step, from_fn};
pub use deferred::{Deferred, Promise, Rejection, Resolver, Settle};
pub use error::{CompositeError, KernelError, Result, StrandError};
pub use handle::KernelHandle;
pub use io::{Interest, MemoryStream, Stream, StreamKey};
pub use kernel::{Kernel, UnhandledHandler};
pub use reactor::{EventQueue, Reactor, Token};
pub use strand::{Outcome, StrandInfo, StrandObserver, StrandState};
pub use value::{Callback, ResultMap, StrandId, TaskFactory, Value};
pub use yieldable::{ApiCall, Key, Yieldable};
