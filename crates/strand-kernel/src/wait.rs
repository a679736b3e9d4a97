//! Composite waits and timeouts.
//!
//! A [`WaitGroup`] is the primary listener of a set of substrands.  It
//! aggregates their exits under a [`WaitPolicy`] and resumes the waiting
//! strand exactly once: the group is removed from the kernel the moment it
//! resolves, so later exits find nothing to notify.  Remaining substrands are
//! terminated on resolution and when the waiting strand itself is
//! terminated.
//!
//! | Policy   | Succeeds when            | Fails when                              |
//! |----------|--------------------------|-----------------------------------------|
//! | `All`    | every member succeeded   | the first member fails                  |
//! | `Any`    | a member succeeds        | every member failed (composite)         |
//! | `Some(n)`| `n` members succeeded    | `n` can no longer be reached (composite)|
//! | `First`  | the first member exits   | the first member exits with an error    |
//! | `One`    | the single member exits  | the member fails or is terminated       |
//!
//! Results and failures are keyed by spawn index and kept in completion
//! order.

use std::time::Duration;

use crate::error::{CompositeError, StrandError};
use crate::kernel::{Kernel, Wake};
use crate::reactor::Token;
use crate::strand::{Action, Listener, Outcome, Terminator};
use crate::value::{ResultMap, StrandId, Value};
use crate::yieldable::Yieldable;

/// Identifier of a wait group or timeout race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GroupId(u64);

impl GroupId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitPolicy {
    All,
    Any,
    Some(usize),
    First,
    One,
}

impl WaitPolicy {
    fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::Some(_) => "some",
            Self::First => "first",
            Self::One => "adopt",
        }
    }

    /// Reject task counts the policy cannot resolve, before anything spawns.
    pub(crate) fn validate(self, total: usize) -> Result<(), StrandError> {
        let reason = match self {
            Self::All => None,
            Self::Any | Self::First if total == 0 => Some("expected at least one task".to_string()),
            Self::Some(n) if n == 0 || n > total => {
                Some(format!("count must be within 1..={total}, got {n}"))
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(StrandError::InvalidArgument {
                operation: self.name(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// WaitGroup
// ---------------------------------------------------------------------------

/// Aggregation state of one composite wait.
#[derive(Debug)]
pub(crate) struct WaitGroup {
    caller: StrandId,
    epoch: u64,
    policy: WaitPolicy,
    members: Vec<StrandId>,
    live: Vec<bool>,
    values: ResultMap,
    errors: CompositeError,
}

impl WaitGroup {
    pub(crate) fn new(caller: StrandId, epoch: u64, policy: WaitPolicy, members: Vec<StrandId>) -> Self {
        let live = vec![true; members.len()];
        Self {
            caller,
            epoch,
            policy,
            members,
            live,
            values: ResultMap::new(),
            errors: CompositeError::new(),
        }
    }

    fn live_remaining(&self) -> usize {
        self.live.iter().filter(|&&live| live).count()
    }

    /// `(index, strand)` of members that have not exited.
    pub(crate) fn live_members(&self) -> Vec<(usize, StrandId)> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| self.live[*i])
            .map(|(i, id)| (i, *id))
            .collect()
    }

    /// Record the exit of member `index`.  Returns the group's result once
    /// the policy is decided; afterwards the group must be discarded.
    pub(crate) fn record(&mut self, index: usize, outcome: &Outcome) -> Option<Result<Value, StrandError>> {
        if !self.live.get(index).copied().unwrap_or(false) {
            return None;
        }
        self.live[index] = false;
        let result = outcome.to_result(self.members[index]);

        match self.policy {
            WaitPolicy::All => match result {
                Ok(value) => {
                    self.values.insert(index, value);
                    (self.values.len() == self.members.len())
                        .then(|| Ok(Value::Map(std::mem::take(&mut self.values))))
                }
                Err(error) => Some(Err(error)),
            },
            WaitPolicy::Any => match result {
                Ok(value) => Some(Ok(value)),
                Err(error) => {
                    self.errors.push(index, error);
                    (self.errors.len() == self.members.len()).then(|| Err(self.take_composite()))
                }
            },
            WaitPolicy::Some(needed) => {
                match result {
                    Ok(value) => self.values.insert(index, value),
                    Err(error) => self.errors.push(index, error),
                }
                if self.values.len() >= needed {
                    Some(Ok(Value::Map(std::mem::take(&mut self.values))))
                } else if needed - self.values.len() > self.live_remaining() {
                    Some(Err(self.take_composite()))
                } else {
                    None
                }
            }
            WaitPolicy::First | WaitPolicy::One => Some(result),
        }
    }

    fn take_composite(&mut self) -> StrandError {
        StrandError::Composite(std::mem::take(&mut self.errors))
    }
}

/// A substrand raced against a timer.
#[derive(Debug)]
pub(crate) struct TimeoutRace {
    caller: StrandId,
    epoch: u64,
    substrand: StrandId,
    token: Token,
    seconds: f64,
}

// ---------------------------------------------------------------------------
// Kernel operations
// ---------------------------------------------------------------------------

impl Kernel {
    /// Spawn `tasks` as substrands of `caller` and wait for them under
    /// `policy`.
    pub(crate) fn start_group(
        &mut self,
        caller: StrandId,
        policy: WaitPolicy,
        tasks: Vec<Yieldable>,
    ) -> Result<(), StrandError> {
        policy.validate(tasks.len())?;
        if tasks.is_empty() {
            self.resume_with(caller, Action::Send(Value::Map(ResultMap::new())));
            return Ok(());
        }

        let group = self.next_group_id();
        let epoch = self.epoch_of(caller);
        let members: Vec<StrandId> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| self.spawn_entry(task, Some(Listener::Member { group, index })))
            .collect();
        tracing::debug!(%caller, ?group, ?policy, members = members.len(), "wait group started");

        self.groups
            .insert(group, WaitGroup::new(caller, epoch, policy, members));
        self.set_terminator(caller, Terminator::CancelGroup(group));
        Ok(())
    }

    /// Wait for (and take over) an existing strand.
    pub(crate) fn await_strand(&mut self, caller: StrandId, target: StrandId) -> Result<(), StrandError> {
        if target == caller {
            return Err(StrandError::InvalidArgument {
                operation: "adopt",
                reason: format!("{caller} cannot wait for itself"),
            });
        }
        self.materialize(target);

        if self.registry.contains(target) {
            let group = self.next_group_id();
            let epoch = self.epoch_of(caller);
            self.groups
                .insert(group, WaitGroup::new(caller, epoch, WaitPolicy::One, vec![target]));
            self.set_terminator(caller, Terminator::CancelGroup(group));
            self.set_primary(target, Listener::Member { group, index: 0 });
            tracing::debug!(%caller, %target, ?group, "strand adopted");
            return Ok(());
        }

        match self.retained.get(target) {
            Some(outcome) => {
                let result = outcome.to_result(target);
                self.resume_with(caller, Action::from(result));
                Ok(())
            }
            None => Err(StrandError::UnknownStrand { strand: target }),
        }
    }

    /// Feed a member's exit into its group, resolving it if decided.
    pub(crate) fn on_member_exit(&mut self, group: GroupId, index: usize, outcome: &Outcome) {
        let Some(wait) = self.groups.get_mut(&group) else {
            return;
        };
        let Some(result) = wait.record(index, outcome) else {
            return;
        };
        let Some(wait) = self.groups.remove(&group) else {
            return;
        };
        tracing::debug!(caller = %wait.caller, ?group, ok = result.is_ok(), "wait group resolved");

        self.release_members(group, &wait);
        self.resume_strand(wait.caller, Some(wait.epoch), Action::from(result));
    }

    /// Terminator of a waiting strand: drop the group and terminate every
    /// member still running.  Idempotent.
    pub(crate) fn cancel_group(&mut self, group: GroupId) {
        if let Some(wait) = self.groups.remove(&group) {
            tracing::debug!(caller = %wait.caller, ?group, "wait group cancelled");
            self.release_members(group, &wait);
        }
    }

    fn release_members(&mut self, group: GroupId, wait: &WaitGroup) {
        for (index, member) in wait.live_members() {
            self.clear_primary(member, Listener::Member { group, index });
            self.terminate(member);
        }
    }

    /// Race `task` against a timer of `seconds`.
    pub(crate) fn start_race(
        &mut self,
        caller: StrandId,
        seconds: f64,
        task: Yieldable,
    ) -> Result<(), StrandError> {
        let delay = seconds_to_duration("timeout", seconds)?;
        let group = self.next_group_id();
        let epoch = self.epoch_of(caller);
        let substrand = self.spawn_entry(task, Some(Listener::Race(group)));
        let token = self.schedule_timer(delay, Wake::RaceExpired(group));
        tracing::debug!(%caller, %substrand, seconds, "timeout race started");

        self.races.insert(
            group,
            TimeoutRace {
                caller,
                epoch,
                substrand,
                token,
                seconds,
            },
        );
        self.set_terminator(caller, Terminator::CancelRace(group));
        Ok(())
    }

    /// The timer won: terminate the substrand and throw a timeout.
    pub(crate) fn on_race_timeout(&mut self, group: GroupId) {
        let Some(race) = self.races.remove(&group) else {
            return;
        };
        tracing::debug!(caller = %race.caller, substrand = %race.substrand, "timeout expired");
        self.clear_primary(race.substrand, Listener::Race(group));
        self.terminate(race.substrand);
        self.resume_strand(
            race.caller,
            Some(race.epoch),
            Action::Throw(StrandError::Timeout {
                seconds: race.seconds,
            }),
        );
    }

    /// The substrand won: cancel the timer and forward its outcome.
    pub(crate) fn on_race_exit(&mut self, group: GroupId, outcome: &Outcome) {
        let Some(race) = self.races.remove(&group) else {
            return;
        };
        self.cancel_token(race.token);
        let result = outcome.to_result(race.substrand);
        self.resume_strand(race.caller, Some(race.epoch), Action::from(result));
    }

    /// Terminator of a strand waiting on a timeout.
    pub(crate) fn cancel_race(&mut self, group: GroupId) {
        if let Some(race) = self.races.remove(&group) {
            self.cancel_token(race.token);
            self.clear_primary(race.substrand, Listener::Race(group));
            self.terminate(race.substrand);
        }
    }
}

/// Convert a user-supplied duration, rejecting negative and non-finite
/// values.
pub(crate) fn seconds_to_duration(operation: &'static str, seconds: f64) -> Result<Duration, StrandError> {
    Duration::try_from_secs_f64(seconds).map_err(|e| StrandError::InvalidArgument {
        operation,
        reason: format!("{seconds} is not a valid duration: {e}"),
    })
}
