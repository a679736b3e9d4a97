//! API dispatcher.
//!
//! Every operation a coroutine yields passes through [`Kernel::dispatch`],
//! which turns it into a kernel capability.  Plain values are classified
//! first:
//!
//! | Yielded                         | Operation                              |
//! |---------------------------------|----------------------------------------|
//! | `Value::Null`                   | cooperate                              |
//! | `Value::Int` / `Value::Float`   | sleep for that many seconds            |
//! | `Value::List`                   | wait for all elements                  |
//! | `Value::Strand`                 | wait for that strand                   |
//! | stream under a [`Key::Data`]    | write the key's bytes to the stream    |
//! | stream under a [`Key::Index`]   | read one chunk from the stream         |
//! | deferred value                  | resume when it settles                 |
//! | anything else                   | throw [`StrandError::UnexpectedValue`] |
//!
//! Operations either resume the strand inline (its pending action is set
//! while it is still ticking) or register a wait and a terminator, leaving
//! the strand to suspend.  Errors are thrown into the calling strand at its
//! yield point.

use crate::deferred::Deferred;
use crate::error::StrandError;
use crate::kernel::{Kernel, Wake};
use crate::strand::{Action, Terminator};
use crate::value::{Callback, StrandId, Value};
use crate::wait::{seconds_to_duration, WaitPolicy};
use crate::yieldable::{ApiCall, Key, Yieldable};

impl Kernel {
    /// Carry out the operation `value`, yielded by `strand` under `key`.
    pub(crate) fn dispatch(&mut self, strand: StrandId, key: Key, value: Yieldable) {
        tracing::trace!(%strand, %key, op = ?value, "dispatch");
        if let Err(error) = self.dispatch_inner(strand, key, value) {
            tracing::debug!(%strand, %error, "operation failed");
            self.resume_with(strand, Action::Throw(error));
        }
    }

    fn dispatch_inner(&mut self, strand: StrandId, key: Key, value: Yieldable) -> Result<(), StrandError> {
        match value {
            Yieldable::Cooperate => {
                self.cooperate(strand);
                Ok(())
            }
            Yieldable::Sleep(seconds) => self.sleep(strand, seconds),
            Yieldable::All(tasks) => self.start_group(strand, WaitPolicy::All, tasks),
            Yieldable::Stream(stream) => match key {
                Key::Data(data) => self.write(strand, stream, data),
                Key::Index(_) => {
                    let chunk = self.config.read_chunk_size;
                    self.read(strand, stream, 1, chunk)
                }
            },
            Yieldable::Deferred(deferred) => {
                self.await_deferred(strand, deferred);
                Ok(())
            }
            Yieldable::Call(call) => self.call(strand, call),
            Yieldable::Coroutine(coroutine) => {
                if let Some(s) = self.registry.get_mut(strand) {
                    s.push_call(coroutine);
                }
                Ok(())
            }
            Yieldable::Strand(target) => self.await_strand(strand, target),
            Yieldable::Named { name, args } => {
                let call = ApiCall::resolve(&name, args)?;
                self.call(strand, call)
            }
            Yieldable::Value(value) => match Yieldable::from(value) {
                Yieldable::Value(value) => Err(StrandError::UnexpectedValue {
                    key: key.to_string(),
                    value: format!("{value:?}"),
                }),
                classified => self.dispatch_inner(strand, key, classified),
            },
        }
    }

    /// Carry out a named operation.
    fn call(&mut self, strand: StrandId, call: ApiCall) -> Result<(), StrandError> {
        match call {
            ApiCall::Cooperate => {
                self.cooperate(strand);
                Ok(())
            }
            ApiCall::Sleep(seconds) => self.sleep(strand, seconds),
            ApiCall::Timeout { seconds, task } => self.start_race(strand, seconds, *task),
            ApiCall::Suspend {
                on_suspend,
                on_terminate,
            } => {
                if let Some(hook) = on_terminate {
                    self.set_terminator(strand, Terminator::Callback(hook));
                }
                if let Some(hook) = on_suspend {
                    hook(strand, &self.handle);
                }
                Ok(())
            }
            ApiCall::Terminate => {
                self.terminate(strand);
                Ok(())
            }
            ApiCall::Execute(task) => {
                let child = self.spawn_entry(*task, None);
                self.resume_with(strand, Action::Send(Value::Strand(child)));
                Ok(())
            }
            ApiCall::Callback(factory) => {
                let callback = Callback::new(factory, self.handle.clone());
                self.resume_with(strand, Action::Send(Value::Callback(callback)));
                Ok(())
            }
            ApiCall::Link { a, b } => {
                self.link_strands(a, b.unwrap_or(strand))?;
                self.resume_with(strand, Action::Send(Value::Null));
                Ok(())
            }
            ApiCall::Unlink { a, b } => {
                self.unlink_strands(a, b.unwrap_or(strand));
                self.resume_with(strand, Action::Send(Value::Null));
                Ok(())
            }
            ApiCall::Adopt(target) => self.await_strand(strand, target),
            ApiCall::All(tasks) => self.start_group(strand, WaitPolicy::All, tasks),
            ApiCall::Any(tasks) => self.start_group(strand, WaitPolicy::Any, tasks),
            ApiCall::Some { count, tasks } => self.start_group(strand, WaitPolicy::Some(count), tasks),
            ApiCall::First(tasks) => self.start_group(strand, WaitPolicy::First, tasks),
            ApiCall::Read {
                stream,
                min_len,
                max_len,
            } => self.read(strand, stream, min_len, max_len),
            ApiCall::Write {
                stream,
                mut data,
                length,
            } => {
                if let Some(length) = length {
                    if length > data.len() {
                        return Err(StrandError::InvalidArgument {
                            operation: "write",
                            reason: format!("length {length} exceeds {} buffered bytes", data.len()),
                        });
                    }
                    data.truncate(length);
                }
                self.write(strand, stream, data)
            }
        }
    }

    /// Resume on the next pass, never within the current one.
    fn cooperate(&mut self, strand: StrandId) {
        let epoch = self.epoch_of(strand);
        self.cooperating.push((strand, epoch));
    }

    fn sleep(&mut self, strand: StrandId, seconds: f64) -> Result<(), StrandError> {
        if !seconds.is_finite() {
            return Err(StrandError::InvalidArgument {
                operation: "sleep",
                reason: format!("{seconds} is not a finite number of seconds"),
            });
        }
        if seconds <= 0.0 {
            self.cooperate(strand);
            return Ok(());
        }
        let delay = seconds_to_duration("sleep", seconds)?;
        let epoch = self.epoch_of(strand);
        let token = self.schedule_timer(delay, Wake::Resume { strand, epoch });
        self.set_terminator(strand, Terminator::CancelTimer(token));
        Ok(())
    }

    /// Suspend until `deferred` settles.  Settlement arrives through the
    /// handle, so it is applied on a later pass even if already settled.
    fn await_deferred(&mut self, strand: StrandId, deferred: Box<dyn Deferred>) {
        if let Some(cancel) = deferred.canceller() {
            self.set_terminator(strand, Terminator::Callback(cancel));
        }
        let epoch = self.epoch_of(strand);
        let handle = self.handle.clone();
        deferred.then(Box::new(move |settled| {
            let action = match settled {
                Ok(value) => Action::Send(value),
                Err(rejection) => Action::Throw(rejection.into_error()),
            };
            handle.resume_at(strand, epoch, action);
        }));
    }
}
