//! Command inbox for code running outside a tick.
//!
//! Callbacks, deferred settlements and suspend hooks cannot borrow the
//! kernel while it is driving a strand.  They talk to it through a
//! [`KernelHandle`] instead: a cheap, cloneable, single-threaded handle that
//! queues [`Command`]s the kernel applies at the start of its next pass.
//!
//! Strand ids are allocated eagerly, so [`KernelHandle::spawn`] returns the
//! new strand's id even though the strand only exists once the command has
//! been applied.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::StrandError;
use crate::strand::Action;
use crate::value::{StrandId, Value};
use crate::yieldable::Yieldable;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A request queued for the kernel.
pub(crate) enum Command {
    Spawn {
        id: StrandId,
        entry: Yieldable,
    },
    /// Resume a strand.  With an epoch, the command is dropped if the strand
    /// has been resumed by someone else since.
    Resume {
        strand: StrandId,
        epoch: Option<u64>,
        action: Action,
    },
    Terminate(StrandId),
    Stop {
        also_stop_reactor: bool,
    },
    Interrupt(StrandError),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { id, entry } => f
                .debug_struct("Spawn")
                .field("id", id)
                .field("entry", entry)
                .finish(),
            Self::Resume {
                strand,
                epoch,
                action,
            } => f
                .debug_struct("Resume")
                .field("strand", strand)
                .field("epoch", epoch)
                .field("action", action)
                .finish(),
            Self::Terminate(id) => f.debug_tuple("Terminate").field(id).finish(),
            Self::Stop { also_stop_reactor } => f
                .debug_struct("Stop")
                .field("also_stop_reactor", also_stop_reactor)
                .finish(),
            Self::Interrupt(e) => f.debug_tuple("Interrupt").field(e).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// KernelHandle
// ---------------------------------------------------------------------------

/// Cloneable handle queueing commands for a [`Kernel`](crate::Kernel).
///
/// The handle is `Rc`-backed and `!Send`, since the kernel is
/// single-threaded.
#[derive(Clone)]
pub struct KernelHandle {
    shared: Rc<Shared>,
}

struct Shared {
    last_id: Cell<u64>,
    commands: RefCell<VecDeque<Command>>,
}

impl KernelHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                last_id: Cell::new(0),
                commands: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Spawn `task` as a new strand.  It starts on a later scheduler pass.
    pub fn spawn(&self, task: impl Into<Yieldable>) -> StrandId {
        let id = self.allocate_id();
        tracing::trace!(strand = %id, "spawn queued");
        self.push(Command::Spawn {
            id,
            entry: task.into(),
        });
        id
    }

    /// Resume a suspended strand with `value`.
    pub fn resume(&self, strand: StrandId, value: impl Into<Value>) {
        self.push(Command::Resume {
            strand,
            epoch: None,
            action: Action::Send(value.into()),
        });
    }

    /// Throw `error` into a suspended strand.
    pub fn throw(&self, strand: StrandId, error: StrandError) {
        self.push(Command::Resume {
            strand,
            epoch: None,
            action: Action::Throw(error),
        });
    }

    pub fn terminate(&self, strand: StrandId) {
        self.push(Command::Terminate(strand));
    }

    /// Request a graceful shutdown; see [`Kernel::stop`](crate::Kernel::stop).
    pub fn stop(&self, also_stop_reactor: bool) {
        self.push(Command::Stop { also_stop_reactor });
    }

    /// Abort the running loop with `error`.
    pub fn interrupt(&self, error: StrandError) {
        self.push(Command::Interrupt(error));
    }

    // -- Kernel side ---------------------------------------------------------

    pub(crate) fn allocate_id(&self) -> StrandId {
        let next = self.shared.last_id.get() + 1;
        self.shared.last_id.set(next);
        StrandId::new(next)
    }

    /// Whether `id` was ever handed out.
    pub(crate) fn is_allocated(&self, id: StrandId) -> bool {
        (1..=self.shared.last_id.get()).contains(&id.get())
    }

    pub(crate) fn resume_at(&self, strand: StrandId, epoch: u64, action: Action) {
        self.push(Command::Resume {
            strand,
            epoch: Some(epoch),
            action,
        });
    }

    pub(crate) fn pop(&self) -> Option<Command> {
        self.shared.commands.borrow_mut().pop_front()
    }

    pub(crate) fn has_commands(&self) -> bool {
        !self.shared.commands.borrow().is_empty()
    }

    /// Whether a spawn of `id` is still waiting in the inbox.
    pub(crate) fn is_pending_spawn(&self, id: StrandId) -> bool {
        self.shared
            .commands
            .borrow()
            .iter()
            .any(|cmd| matches!(cmd, Command::Spawn { id: queued, .. } if *queued == id))
    }

    /// Pull a queued spawn of `id` out of the inbox so it can be created now.
    pub(crate) fn take_spawn(&self, id: StrandId) -> Option<Yieldable> {
        let mut commands = self.shared.commands.borrow_mut();
        let index = commands
            .iter()
            .position(|cmd| matches!(cmd, Command::Spawn { id: queued, .. } if *queued == id))?;
        match commands.remove(index) {
            Some(Command::Spawn { entry, .. }) => Some(entry),
            _ => None,
        }
    }

    fn push(&self, command: Command) {
        self.shared.commands.borrow_mut().push_back(command);
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("last_id", &self.shared.last_id.get())
            .field("queued", &self.shared.commands.borrow().len())
            .finish()
    }
}
