//! The strand kernel.
//!
//! The [`Kernel`] owns every strand and runs the scheduling loop.  Each pass:
//!
//! 1. applies commands queued through [`KernelHandle`]s,
//! 2. ticks every attached strand once, in attachment order,
//! 3. attaches strands that cooperated during the pass,
//! 4. polls the [`Reactor`]: without blocking if anything is runnable,
//!    otherwise until a timer or stream fires,
//! 5. delivers fired wakeups.
//!
//! A strand attached during a pass (a new spawn, a resume, a cooperate) runs
//! on a later pass, never the current one.  The loop ends once nothing is
//! attached, no commands are queued and the reactor is idle.
//!
//! # Failure policy
//!
//! A strand failure is delivered to whoever waits on the strand.  A strand
//! that fails with nobody watching, or an observer that returns an error, is
//! escalated to the unhandled-exception handler.  Without a handler, or if
//! the handler itself fails, the run loop aborts with
//! [`KernelError::Unhandled`] carrying the original error.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::KernelConfig;
use crate::error::{KernelError, Result, StrandError};
use crate::handle::{Command, KernelHandle};
use crate::io::{Interest, Stream, StreamKey, StreamQueue};
use crate::reactor::{EventQueue, Reactor, Token};
use crate::registry::{Registry, Retained};
use crate::strand::{
    Action, Listener, Outcome, Strand, StrandInfo, StrandObserver, StrandState, StrandStep,
    Terminator,
};
use crate::value::{StrandId, Value};
use crate::wait::{GroupId, TimeoutRace, WaitGroup};
use crate::yieldable::Yieldable;

/// Hook receiving strand failures nobody was watching.  Returning `Err`
/// aborts the run loop.
pub type UnhandledHandler =
    Box<dyn FnMut(StrandId, &StrandError) -> std::result::Result<(), StrandError>>;

/// What a fired reactor token means.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wake {
    /// A sleep elapsed.
    Resume { strand: StrandId, epoch: u64 },
    /// A timeout race's timer expired.
    RaceExpired(GroupId),
    /// A stream became ready for its queue's head request.
    Io { key: StreamKey, interest: Interest },
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Single-threaded cooperative scheduler for strands.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) registry: Registry,
    pub(crate) retained: Retained,
    pub(crate) handle: KernelHandle,
    reactor: Box<dyn Reactor>,
    wakes: HashMap<Token, Wake>,
    next_token: u64,
    next_group: u64,
    pub(crate) groups: HashMap<GroupId, WaitGroup>,
    pub(crate) races: HashMap<GroupId, TimeoutRace>,
    pub(crate) streams: HashMap<StreamKey, StreamQueue>,
    /// Strands that cooperated this pass, with their suspension epochs.
    pub(crate) cooperating: Vec<(StrandId, u64)>,
    handler: Option<UnhandledHandler>,
    /// First fatal error; aborts the run loop.
    panic: Option<KernelError>,
    /// `Some(also_stop_reactor)` once a stop was requested.
    stop_requested: Option<bool>,
    /// Strand awaited by `run_until` and its outcome once exited.
    awaited: Option<(StrandId, Option<Outcome>)>,
}

impl Kernel {
    /// Create a kernel with the default configuration and event queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(config: KernelConfig) -> Self {
        let reactor = Box::new(EventQueue::new(config.io_poll_interval()));
        Self::with_reactor(config, reactor)
    }

    /// Create a kernel driven by a custom reactor.
    #[must_use]
    pub fn with_reactor(config: KernelConfig, reactor: Box<dyn Reactor>) -> Self {
        Self {
            retained: Retained::new(config.retained_outcomes),
            config,
            registry: Registry::new(),
            handle: KernelHandle::new(),
            reactor,
            wakes: HashMap::new(),
            next_token: 0,
            next_group: 0,
            groups: HashMap::new(),
            races: HashMap::new(),
            streams: HashMap::new(),
            cooperating: Vec::new(),
            handler: None,
            panic: None,
            stop_requested: None,
            awaited: None,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// A handle for queueing commands from callbacks and external code.
    pub fn handle(&self) -> KernelHandle {
        self.handle.clone()
    }

    /// Spawn `task` as a new strand.  It starts on the next scheduler pass.
    pub fn spawn(&mut self, task: impl Into<Yieldable>) -> StrandId {
        self.spawn_entry(task.into(), None)
    }

    // -- Running -------------------------------------------------------------

    /// Run until no strand is runnable and no timer or stream wait remains.
    pub fn run(&mut self) -> Result<()> {
        info!(strands = self.registry.len(), "kernel run started");
        let result = self.run_loop(None);
        match &result {
            Ok(()) => info!(strands = self.registry.len(), "kernel run finished"),
            Err(e) => tracing::error!(error = %e, "kernel run aborted"),
        }
        result
    }

    /// Run until `strand` exits and return its value.
    ///
    /// Fails with [`KernelError::StrandFailed`] if the strand fails or is
    /// terminated, and with [`KernelError::Stalled`] if the loop runs out of
    /// work first.
    pub fn run_until(&mut self, strand: StrandId) -> Result<Value> {
        if !self.registry.contains(strand) && !self.handle.is_pending_spawn(strand) {
            return match self.retained.get(strand) {
                Some(outcome) => outcome_value(strand, outcome.clone()),
                None => Err(KernelError::UnknownStrand { strand }),
            };
        }

        info!(%strand, "kernel run started");
        self.awaited = Some((strand, None));
        let result = self.run_loop(Some(strand));
        let outcome = self.awaited.take().and_then(|(_, outcome)| outcome);
        if let Err(e) = result {
            tracing::error!(error = %e, "kernel run aborted");
            return Err(e);
        }
        info!(%strand, exited = outcome.is_some(), "kernel run finished");
        match outcome {
            Some(outcome) => outcome_value(strand, outcome),
            None => Err(KernelError::Stalled { strand }),
        }
    }

    /// Request shutdown: every live strand is terminated at the start of the
    /// next pass, and the reactor is stopped too if `also_stop_reactor`.
    pub fn stop(&mut self, also_stop_reactor: bool) {
        let previous = self.stop_requested.unwrap_or(false);
        self.stop_requested = Some(previous || also_stop_reactor);
    }

    /// Abort the run loop with [`KernelError::Interrupted`].
    pub fn interrupt(&mut self, error: StrandError) {
        warn!(%error, "kernel interrupted");
        if self.panic.is_none() {
            self.panic = Some(KernelError::Interrupted { source: error });
        }
    }

    pub fn set_unhandled_exception_handler<F>(&mut self, handler: F)
    where
        F: FnMut(StrandId, &StrandError) -> std::result::Result<(), StrandError> + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_unhandled_exception_handler(&mut self) {
        self.handler = None;
    }

    // -- Strand surface ------------------------------------------------------

    /// Whether `strand` was spawned and has exited.
    pub fn has_exited(&self, strand: StrandId) -> bool {
        self.handle.is_allocated(strand)
            && !self.registry.contains(strand)
            && !self.handle.is_pending_spawn(strand)
    }

    /// Resume a suspended strand with `value`.  No-op once it exited.
    pub fn resume(&mut self, strand: StrandId, value: impl Into<Value>) {
        self.resume_with(strand, Action::Send(value.into()));
    }

    /// Throw `error` into a suspended strand.  No-op once it exited.
    pub fn throw(&mut self, strand: StrandId, error: StrandError) {
        self.resume_with(strand, Action::Throw(error));
    }

    /// Terminate a strand: run its terminator, discard its call stack,
    /// notify its listeners and terminate every linked strand.  No-op once
    /// it exited.
    pub fn terminate(&mut self, strand: StrandId) {
        let Some(s) = self.registry.get_mut(strand) else {
            return;
        };
        let terminator = s.terminator.take();
        debug!(%strand, state = ?s.state, "terminating strand");
        if let Some(terminator) = terminator {
            self.run_terminator(strand, terminator);
        }
        self.exit(strand, Outcome::Terminated);
    }

    /// Observe a live strand's exit.
    pub fn attach_observer(&mut self, strand: StrandId, observer: Rc<dyn StrandObserver>) -> Result<()> {
        self.materialize(strand);
        let s = self
            .registry
            .get_mut(strand)
            .ok_or(KernelError::UnknownStrand { strand })?;
        s.observers.push(observer);
        Ok(())
    }

    /// Remove an observer.  Returns `false` if it was not attached.
    pub fn detach_observer(&mut self, strand: StrandId, observer: &Rc<dyn StrandObserver>) -> bool {
        let Some(s) = self.registry.get_mut(strand) else {
            return false;
        };
        let before = s.observers.len();
        s.observers.retain(|o| !Rc::ptr_eq(o, observer));
        s.observers.len() != before
    }

    /// Link two live strands so that either one's exit terminates the other.
    pub fn link(&mut self, a: StrandId, b: StrandId) -> Result<()> {
        self.link_strands(a, b).map_err(|e| match e {
            StrandError::UnknownStrand { strand } => KernelError::UnknownStrand { strand },
            other => KernelError::StrandFailed { strand: a, source: other },
        })
    }

    pub fn unlink(&mut self, a: StrandId, b: StrandId) {
        self.unlink_strands(a, b);
    }

    // -- Introspection -------------------------------------------------------

    pub fn strand_info(&self, strand: StrandId) -> Option<StrandInfo> {
        self.registry.get(strand).map(Strand::info)
    }

    /// Snapshots of every live strand, in spawn order.
    pub fn strands(&self) -> Vec<StrandInfo> {
        self.registry.infos()
    }

    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    /// The retained exit outcome of `strand`, if any.
    pub fn outcome(&self, strand: StrandId) -> Option<&Outcome> {
        self.retained.get(strand)
    }

    // -----------------------------------------------------------------------
    // Scheduling loop
    // -----------------------------------------------------------------------

    fn run_loop(&mut self, until: Option<StrandId>) -> Result<()> {
        loop {
            self.drain_commands();
            self.check_panic()?;
            if let Some(also_stop_reactor) = self.stop_requested.take() {
                self.shutdown(also_stop_reactor);
                self.check_panic()?;
            }
            if self.awaited_exited(until) {
                return Ok(());
            }

            let mut batch = self.registry.take_ready().into_iter();
            trace!(strands = batch.len(), "scheduler pass");
            while let Some(strand) = batch.next() {
                self.tick(strand);
                if let Err(e) = self.check_panic() {
                    self.registry.reattach_front(batch);
                    return Err(e);
                }
            }
            self.flush_cooperating();
            if self.awaited_exited(until) {
                return Ok(());
            }

            let runnable = self.registry.has_ready()
                || self.handle.has_commands()
                || self.stop_requested.is_some();
            if !runnable && self.reactor.is_idle() {
                debug!(live = self.registry.len(), "no runnable strands and no pending events");
                return Ok(());
            }
            let max_wait = if runnable {
                Some(Duration::ZERO)
            } else {
                self.config.max_poll_wait()
            };
            let mut fired = Vec::new();
            self.reactor.poll(max_wait, &mut fired);
            for token in fired {
                self.fire(token);
                self.check_panic()?;
            }
        }
    }

    fn check_panic(&mut self) -> Result<()> {
        match self.panic.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn awaited_exited(&self, until: Option<StrandId>) -> bool {
        until.is_some() && matches!(self.awaited, Some((_, Some(_))))
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.handle.pop() {
            trace!(?command, "applying command");
            match command {
                Command::Spawn { id, entry } => self.insert_strand(id, entry, None),
                Command::Resume {
                    strand,
                    epoch,
                    action,
                } => self.resume_strand(strand, epoch, action),
                Command::Terminate(strand) => self.terminate(strand),
                Command::Stop { also_stop_reactor } => self.stop(also_stop_reactor),
                Command::Interrupt(error) => self.interrupt(error),
            }
        }
    }

    fn shutdown(&mut self, also_stop_reactor: bool) {
        let live = self.registry.ids();
        info!(strands = live.len(), also_stop_reactor, "stopping kernel");
        for strand in live {
            self.terminate(strand);
        }
        if also_stop_reactor {
            self.reactor.stop();
        }
    }

    fn flush_cooperating(&mut self) {
        for (strand, epoch) in std::mem::take(&mut self.cooperating) {
            self.resume_strand(strand, Some(epoch), Action::Send(Value::Null));
        }
    }

    /// Drive a strand until it suspends or exits.
    fn tick(&mut self, id: StrandId) {
        let Some(strand) = self.registry.get_mut(id) else {
            return;
        };
        debug_assert_ne!(strand.state, StrandState::Ticking, "{id} ticked re-entrantly");
        match strand.state {
            StrandState::Ready => strand.start(),
            StrandState::Suspended if strand.pending.is_some() => {
                strand.state = StrandState::Ticking;
            }
            _ => return,
        }
        trace!(strand = %id, "tick");

        loop {
            let Some(strand) = self.registry.get_mut(id) else {
                return;
            };
            match strand.step_once() {
                StrandStep::Continue => {}
                StrandStep::Idle => {
                    strand.state = StrandState::Suspended;
                    return;
                }
                StrandStep::Yielded { key, value } => self.dispatch(id, key, value),
                StrandStep::Exited(outcome) => {
                    self.exit(id, outcome);
                    return;
                }
            }
        }
    }

    fn fire(&mut self, token: Token) {
        let Some(wake) = self.wakes.remove(&token) else {
            trace!(%token, "cancelled token fired");
            return;
        };
        trace!(%token, ?wake, "wakeup");
        match wake {
            Wake::Resume { strand, epoch } => {
                self.resume_strand(strand, Some(epoch), Action::Send(Value::Null));
            }
            Wake::RaceExpired(group) => self.on_race_timeout(group),
            Wake::Io { key, interest } => self.service_stream(key, interest),
        }
    }

    // -----------------------------------------------------------------------
    // Strand lifecycle
    // -----------------------------------------------------------------------

    pub(crate) fn spawn_entry(&mut self, task: Yieldable, listener: Option<Listener>) -> StrandId {
        let id = self.handle.allocate_id();
        self.insert_strand(id, task, listener);
        id
    }

    fn insert_strand(&mut self, id: StrandId, task: Yieldable, listener: Option<Listener>) {
        let mut strand = Strand::new(id, task.into_entry());
        strand.primary = listener;
        self.registry.insert(strand);
        self.registry.attach(id);
        debug!(strand = %id, "strand spawned");
    }

    /// Create a strand whose spawn is still queued in the inbox.
    pub(crate) fn materialize(&mut self, id: StrandId) {
        if self.registry.contains(id) {
            return;
        }
        if let Some(entry) = self.handle.take_spawn(id) {
            self.insert_strand(id, entry, None);
        }
    }

    /// Set the pending action of a strand.
    ///
    /// A ticking strand picks it up in its current tick; a suspended strand
    /// is attached for the next pass.  Accepting a resume clears the
    /// terminator without running it and starts a new suspension epoch.
    pub(crate) fn resume_with(&mut self, id: StrandId, action: Action) {
        let Some(strand) = self.registry.get_mut(id) else {
            trace!(strand = %id, "resume of exited strand ignored");
            return;
        };
        match strand.state {
            StrandState::Ticking | StrandState::Suspended => {
                if strand.pending.is_some() {
                    warn!(strand = %id, ?action, "strand already has a pending action, resume dropped");
                    return;
                }
                strand.pending = Some(action);
                strand.terminator = None;
                strand.epoch += 1;
                if strand.state == StrandState::Suspended {
                    self.registry.attach(id);
                }
            }
            StrandState::Ready => warn!(strand = %id, "strand has not started, resume dropped"),
            _ => {}
        }
    }

    /// Resume a strand on behalf of a wakeup registered at `epoch`.  Stale
    /// wakeups are dropped.
    pub(crate) fn resume_strand(&mut self, id: StrandId, epoch: Option<u64>, action: Action) {
        if let Some(epoch) = epoch {
            if !self.registry.is_current(id, epoch) {
                if self.registry.contains(id) {
                    warn!(strand = %id, epoch, "stale wakeup ignored");
                }
                return;
            }
        }
        self.resume_with(id, action);
    }

    fn run_terminator(&mut self, id: StrandId, terminator: Terminator) {
        trace!(strand = %id, ?terminator, "running terminator");
        match terminator {
            Terminator::CancelTimer(token) => self.cancel_token(token),
            Terminator::CancelGroup(group) => self.cancel_group(group),
            Terminator::CancelRace(group) => self.cancel_race(group),
            Terminator::CancelIo { key, interest } => self.cancel_io(key, interest, id),
            Terminator::Callback(callback) => callback(),
        }
    }

    /// Retire a strand and deliver its outcome.
    fn exit(&mut self, id: StrandId, outcome: Outcome) {
        let Some(mut strand) = self.registry.remove(id) else {
            return;
        };
        strand.finish(outcome.state());
        let primary = strand.primary.take();
        let observers = std::mem::take(&mut strand.observers);
        let links = std::mem::take(&mut strand.links);
        debug!(strand = %id, state = ?outcome.state(), "strand exited");
        self.retained.insert(id, outcome.clone());

        let mut watched = primary.is_some() || !observers.is_empty();
        if let Some((awaited, slot)) = &mut self.awaited {
            if *awaited == id {
                *slot = Some(outcome.clone());
                watched = true;
            }
        }

        match primary {
            Some(Listener::Member { group, index }) => self.on_member_exit(group, index, &outcome),
            Some(Listener::Race(group)) => self.on_race_exit(group, &outcome),
            None => {}
        }
        for observer in observers {
            if let Err(error) = observer.on_exit(id, &outcome) {
                warn!(strand = %id, %error, "observer failed");
                self.escalate(id, error);
            }
        }
        if !watched {
            if let Outcome::Failed(error) = &outcome {
                self.escalate(id, error.clone());
            }
        }

        for other in links {
            if let Some(s) = self.registry.get_mut(other) {
                s.links.remove(&id);
            }
            debug!(strand = %other, linked = %id, "terminating linked strand");
            self.terminate(other);
        }
    }

    /// Hand an unwatched failure to the unhandled-exception handler.
    fn escalate(&mut self, id: StrandId, error: StrandError) {
        let handled = match self.handler.as_mut() {
            Some(handler) => handler(id, &error),
            None => Err(error.clone()),
        };
        if let Err(handler_error) = handled {
            tracing::error!(strand = %id, %error, %handler_error, "unhandled strand failure");
            if self.panic.is_none() {
                self.panic = Some(KernelError::Unhandled {
                    strand: id,
                    source: error,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers for operations
    // -----------------------------------------------------------------------

    pub(crate) fn epoch_of(&self, id: StrandId) -> u64 {
        self.registry.get(id).map_or(0, |s| s.epoch)
    }

    pub(crate) fn set_terminator(&mut self, id: StrandId, terminator: Terminator) {
        if let Some(strand) = self.registry.get_mut(id) {
            strand.terminator = Some(terminator);
        }
    }

    /// Make `listener` the primary listener of `target`, evicting the
    /// previous one with [`StrandError::Evicted`].
    pub(crate) fn set_primary(&mut self, target: StrandId, listener: Listener) {
        let Some(strand) = self.registry.get_mut(target) else {
            return;
        };
        let Some(evicted) = strand.primary.replace(listener) else {
            return;
        };
        debug!(strand = %target, ?evicted, "primary listener evicted");
        let outcome = Outcome::Failed(StrandError::Evicted { strand: target });
        match evicted {
            Listener::Member { group, index } => self.on_member_exit(group, index, &outcome),
            Listener::Race(group) => self.on_race_exit(group, &outcome),
        }
    }

    /// Drop `listener` from `target` if it is still the primary listener.
    pub(crate) fn clear_primary(&mut self, target: StrandId, listener: Listener) {
        if let Some(strand) = self.registry.get_mut(target) {
            if strand.primary == Some(listener) {
                strand.primary = None;
            }
        }
    }

    pub(crate) fn next_group_id(&mut self) -> GroupId {
        self.next_group += 1;
        GroupId::new(self.next_group)
    }

    fn next_token(&mut self) -> Token {
        self.next_token += 1;
        Token::new(self.next_token)
    }

    pub(crate) fn schedule_timer(&mut self, delay: Duration, wake: Wake) -> Token {
        let token = self.next_token();
        self.wakes.insert(token, wake);
        self.reactor.schedule_after(token, delay);
        token
    }

    pub(crate) fn watch_stream(&mut self, source: Rc<dyn Stream>, key: StreamKey, interest: Interest) -> Token {
        let token = self.next_token();
        self.wakes.insert(token, Wake::Io { key, interest });
        self.reactor.watch(token, source, interest);
        token
    }

    pub(crate) fn cancel_token(&mut self, token: Token) {
        if self.wakes.remove(&token).is_some() {
            self.reactor.cancel(token);
        }
    }

    pub(crate) fn link_strands(&mut self, a: StrandId, b: StrandId) -> std::result::Result<(), StrandError> {
        if a == b {
            return Ok(());
        }
        for id in [a, b] {
            self.materialize(id);
            if !self.registry.contains(id) {
                return Err(StrandError::UnknownStrand { strand: id });
            }
        }
        if let Some(s) = self.registry.get_mut(a) {
            s.links.insert(b);
        }
        if let Some(s) = self.registry.get_mut(b) {
            s.links.insert(a);
        }
        debug!(%a, %b, "strands linked");
        Ok(())
    }

    pub(crate) fn unlink_strands(&mut self, a: StrandId, b: StrandId) {
        if let Some(s) = self.registry.get_mut(a) {
            s.links.remove(&b);
        }
        if let Some(s) = self.registry.get_mut(b) {
            s.links.remove(&a);
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_value(strand: StrandId, outcome: Outcome) -> Result<Value> {
    outcome
        .to_result(strand)
        .map_err(|source| KernelError::StrandFailed { strand, source })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::api;
    use crate::coroutine::{Script, Step};

    fn logger() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(Value) -> Step>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |entry: &str| -> Box<dyn Fn(Value) -> Step> {
            let sink = Rc::clone(&sink);
            let entry = entry.to_string();
            Box::new(move |_| {
                sink.borrow_mut().push(entry.clone());
                Step::yielding(api::cooperate())
            })
        };
        (log, make)
    }

    #[test]
    fn spawned_strands_start_on_the_next_pass() {
        let mut kernel = Kernel::new();
        let id = kernel.spawn(Script::new().then(|_| Step::done(1)));
        assert_eq!(kernel.strand_info(id).map(|i| i.state), Some(StrandState::Ready));
        assert!(!kernel.has_exited(id));

        assert_eq!(kernel.run_until(id).unwrap(), Value::Int(1));
        assert!(kernel.has_exited(id));
        assert_eq!(kernel.live_count(), 0);
    }

    #[test]
    fn cooperating_strands_interleave() {
        let (log, step) = logger();
        let mut kernel = Kernel::new();
        let a1 = step("a1");
        let a2 = step("a2");
        let b1 = step("b1");
        let b2 = step("b2");
        kernel.spawn(Script::new().then(move |v| a1(v)).then(move |v| a2(v)));
        kernel.spawn(Script::new().then(move |v| b1(v)).then(move |v| b2(v)));
        kernel.run().unwrap();
        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn unhandled_failure_aborts_run() {
        let mut kernel = Kernel::new();
        let id = kernel.spawn(Script::new().then(|_| Step::fail("boom")));
        match kernel.run() {
            Err(KernelError::Unhandled { strand, source }) => {
                assert_eq!(strand, id);
                assert_eq!(source, StrandError::raised("boom"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn handler_absorbs_unwatched_failures() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut kernel = Kernel::new();
        kernel.set_unhandled_exception_handler(move |id, error| {
            sink.borrow_mut().push((id, error.clone()));
            Ok(())
        });
        let id = kernel.spawn(Script::new().then(|_| Step::fail("boom")));
        kernel.run().unwrap();
        assert_eq!(*seen.borrow(), vec![(id, StrandError::raised("boom"))]);

        kernel.clear_unhandled_exception_handler();
        kernel.spawn(Script::new().then(|_| Step::fail("again")));
        assert!(kernel.run().is_err());
    }

    #[test]
    fn stop_terminates_live_strands() {
        let mut kernel = Kernel::new();
        let sleeper = kernel.spawn(api::sleep(60.0));
        kernel.stop(true);
        kernel.run().unwrap();
        assert!(kernel.has_exited(sleeper));
        assert_eq!(kernel.outcome(sleeper), Some(&Outcome::Terminated));
    }

    #[test]
    fn interrupt_aborts_run() {
        let mut kernel = Kernel::new();
        let handle = kernel.handle();
        kernel.spawn(Script::new().then(move |_| {
            handle.interrupt(StrandError::raised("enough"));
            Step::yielding(api::sleep(60.0))
        }));
        assert!(matches!(
            kernel.run(),
            Err(KernelError::Interrupted { .. })
        ));
    }

    #[test]
    fn run_until_reports_stall() {
        let mut kernel = Kernel::new();
        let parked = kernel.spawn(api::suspend());
        assert!(matches!(
            kernel.run_until(parked),
            Err(KernelError::Stalled { strand }) if strand == parked
        ));
        kernel.resume(parked, "late");
        assert_eq!(kernel.run_until(parked).unwrap(), Value::from("late"));
    }

    #[test]
    fn run_until_unknown_strand() {
        let mut kernel = Kernel::new();
        let ghost = StrandId::new(42);
        assert!(matches!(
            kernel.run_until(ghost),
            Err(KernelError::UnknownStrand { .. })
        ));
        assert!(!kernel.has_exited(ghost));
    }
}
