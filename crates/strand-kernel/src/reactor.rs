//! Timer and readiness collaborator.
//!
//! The kernel never sleeps or polls streams itself.  It registers one-shot
//! [`Token`]s with a [`Reactor`] and asks it which have fired.  The default
//! implementation, [`EventQueue`], keeps an ordered timer queue and polls
//! watched streams for readiness.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::io::{Interest, Stream, StreamKey};

/// Identifies one registration with a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// The event source driving the kernel's waits.
///
/// Every registration fires at most once.  A token registered while the
/// kernel processes fired tokens is only reported by a later `poll`.
pub trait Reactor {
    /// Fire `token` once `delay` has elapsed.
    fn schedule_after(&mut self, token: Token, delay: Duration);

    /// Fire `token` when `source` is ready for `interest`.  Registrations on
    /// the same source and interest queue up; only the oldest may fire.
    fn watch(&mut self, token: Token, source: Rc<dyn Stream>, interest: Interest);

    /// Drop a registration.  Returns `false` if it already fired or never
    /// existed.
    fn cancel(&mut self, token: Token) -> bool;

    /// Append fired tokens to `fired`, blocking for at most `max_wait`
    /// (`None` blocks until something fires) while nothing is ready.
    fn poll(&mut self, max_wait: Option<Duration>, fired: &mut Vec<Token>);

    /// Whether no registrations are outstanding.
    fn is_idle(&self) -> bool;

    /// Drop every registration and stop reporting events.
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// Sleep granularity while only never-firing timers are pending.
const UNREACHABLE_RECHECK: Duration = Duration::from_secs(3600);

struct Watch {
    token: Token,
    key: StreamKey,
    source: Rc<dyn Stream>,
    interest: Interest,
}

/// Default [`Reactor`]: a `BTreeMap` timer queue plus readiness polling.
///
/// Streams expose readiness through [`Stream::poll_ready`] rather than file
/// descriptors, so watched streams are re-polled every `poll_interval` while
/// the queue blocks.
pub struct EventQueue {
    timers: BTreeMap<(Instant, u64), Token>,
    deadlines: HashMap<Token, (Instant, u64)>,
    /// Timers whose deadline lies beyond what `Instant` can represent.
    unreachable: HashSet<Token>,
    watches: Vec<Watch>,
    seq: u64,
    poll_interval: Duration,
    stopped: bool,
}

impl EventQueue {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            timers: BTreeMap::new(),
            deadlines: HashMap::new(),
            unreachable: HashSet::new(),
            watches: Vec::new(),
            seq: 0,
            poll_interval,
            stopped: false,
        }
    }

    /// Number of outstanding registrations.
    pub fn len(&self) -> usize {
        self.timers.len() + self.unreachable.len() + self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn fire_due_timers(&mut self, now: Instant, fired: &mut Vec<Token>) {
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let token = entry.remove();
            self.deadlines.remove(&token);
            fired.push(token);
        }
    }

    /// Fire the oldest watch of every (source, interest) pair that is ready.
    fn fire_ready_watches(&mut self, fired: &mut Vec<Token>) {
        let mut heads = HashSet::new();
        let mut i = 0;
        while i < self.watches.len() {
            let watch = &self.watches[i];
            let is_head = heads.insert((watch.key, watch.interest));
            if is_head && watch.source.poll_ready(watch.interest) {
                fired.push(watch.token);
                self.watches.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// How long to sleep before re-checking, or `None` if nothing can fire.
    fn next_wait(&self, now: Instant, deadline: Option<Instant>) -> Option<Duration> {
        let mut wait = (!self.watches.is_empty()).then_some(self.poll_interval);
        if wait.is_none() && !self.unreachable.is_empty() {
            wait = Some(UNREACHABLE_RECHECK);
        }
        if let Some((&(at, _), _)) = self.timers.first_key_value() {
            let until = at.saturating_duration_since(now);
            wait = Some(wait.map_or(until, |w| w.min(until)));
        }
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(now);
            wait = Some(wait.map_or(remaining, |w| w.min(remaining)));
        }
        wait
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl Reactor for EventQueue {
    fn schedule_after(&mut self, token: Token, delay: Duration) {
        if self.stopped {
            tracing::trace!(%token, "reactor stopped, timer dropped");
            return;
        }
        let Some(at) = Instant::now().checked_add(delay) else {
            tracing::debug!(%token, ?delay, "timer deadline out of range, it will never fire");
            self.unreachable.insert(token);
            return;
        };
        self.seq += 1;
        self.timers.insert((at, self.seq), token);
        self.deadlines.insert(token, (at, self.seq));
    }

    fn watch(&mut self, token: Token, source: Rc<dyn Stream>, interest: Interest) {
        if self.stopped {
            tracing::trace!(%token, "reactor stopped, watch dropped");
            return;
        }
        self.watches.push(Watch {
            token,
            key: StreamKey::of(&source),
            source,
            interest,
        });
    }

    fn cancel(&mut self, token: Token) -> bool {
        if let Some(key) = self.deadlines.remove(&token) {
            self.timers.remove(&key);
            return true;
        }
        if self.unreachable.remove(&token) {
            return true;
        }
        match self.watches.iter().position(|w| w.token == token) {
            Some(i) => {
                self.watches.remove(i);
                true
            }
            None => false,
        }
    }

    fn poll(&mut self, max_wait: Option<Duration>, fired: &mut Vec<Token>) {
        let deadline = max_wait.and_then(|w| Instant::now().checked_add(w));
        let before = fired.len();
        loop {
            if self.stopped {
                return;
            }
            let now = Instant::now();
            self.fire_due_timers(now, fired);
            self.fire_ready_watches(fired);
            if fired.len() > before {
                return;
            }
            if deadline.is_some_and(|d| now >= d) {
                return;
            }
            match self.next_wait(now, deadline) {
                Some(wait) => thread::sleep(wait),
                None => return,
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.stopped || self.is_empty()
    }

    fn stop(&mut self) {
        tracing::debug!(pending = self.len(), "event queue stopped");
        self.stopped = true;
        self.timers.clear();
        self.deadlines.clear();
        self.unreachable.clear();
        self.watches.clear();
    }
}
