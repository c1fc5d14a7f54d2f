//! What callbacks get to work with.
//!
//! Callbacks never touch the session directly. Writes go into an
//! [`Outbox`] and scheduling requests into [`Deferred`]; the client applies
//! both once the callback pass is over. This keeps the connection and the
//! scheduler under a single owner for the whole tick.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::scheduler::{TaskControl, TaskId, TaskKind, task_id};
use crate::error::Error;
use crate::topic::{ChannelId, channel_id};
use crate::value::{Payload, ToPayload, Value};

/// Writes one callback pass can queue.
pub const OUTBOX_DEPTH: usize = 8;
/// Scheduling requests one callback pass can queue.
pub const DEFERRED_DEPTH: usize = 8;

/// A periodic, one-shot or send callback.
pub type TaskFn<A> = fn(&mut A, &mut Context<'_, A>);
/// Called with the decoded value of every message on a receive channel.
pub type ReceiveFn<A> = fn(&mut A, &Value, &mut Context<'_, A>);

/// A scheduled callback together with the channel it sends for, if any.
pub struct Job<A> {
    pub(crate) callback: TaskFn<A>,
    pub(crate) channel: Option<ChannelId>,
}

impl<A> Job<A> {
    pub fn new(callback: TaskFn<A>) -> Self {
        Self {
            callback,
            channel: None,
        }
    }

    pub(crate) fn for_channel(callback: TaskFn<A>, channel: ChannelId) -> Self {
        Self {
            callback,
            channel: Some(channel),
        }
    }
}

// Derived Clone would require `A: Clone`.
impl<A> Clone for Job<A> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback,
            channel: self.channel.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Channel(ChannelId),
    Status,
}

#[derive(Debug, Clone)]
pub struct Outgoing {
    pub target: Target,
    pub payload: Payload,
}

/// Writes queued during a callback pass.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Vec<Outgoing, OUTBOX_DEPTH>,
    rejected: Vec<Error, OUTBOX_DEPTH>,
}

impl Outbox {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn push(&mut self, target: Target, value: impl ToPayload) -> Result<(), Error> {
        let result = self.render(target, value);
        if let Err(e) = result {
            self.reject(e);
        }
        result
    }

    /// Records a write that was refused before it could be queued.
    pub fn reject(&mut self, error: Error) {
        let _ = self.rejected.push(error);
    }

    fn render(&mut self, target: Target, value: impl ToPayload) -> Result<(), Error> {
        let mut payload = Payload::new();
        value.write_payload(&mut payload)?;
        self.entries
            .push(Outgoing { target, payload })
            .map_err(|_| Error::capacity(OUTBOX_DEPTH + 1, OUTBOX_DEPTH))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.rejected.is_empty()
    }

    /// Takes every queued write, oldest first, and the errors of writes
    /// that never made it into the queue.
    pub fn take(&mut self) -> (Vec<Outgoing, OUTBOX_DEPTH>, Vec<Error, OUTBOX_DEPTH>) {
        (
            core::mem::take(&mut self.entries),
            core::mem::take(&mut self.rejected),
        )
    }
}

pub enum DeferredOp<A> {
    Schedule {
        id: TaskId,
        kind: TaskKind,
        interval: Duration,
        job: Job<A>,
    },
    Cancel(TaskId),
}

/// Scheduler changes requested during a callback pass.
pub struct Deferred<A> {
    ops: Vec<DeferredOp<A>, DEFERRED_DEPTH>,
}

impl<A> Default for Deferred<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Deferred<A> {
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    fn push(&mut self, op: DeferredOp<A>) -> Result<(), Error> {
        self.ops
            .push(op)
            .map_err(|_| Error::capacity(DEFERRED_DEPTH + 1, DEFERRED_DEPTH))
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn take(&mut self) -> Vec<DeferredOp<A>, DEFERRED_DEPTH> {
        core::mem::take(&mut self.ops)
    }
}

/// Handed to every callback.
pub struct Context<'c, A> {
    now: Instant,
    channel: Option<&'c str>,
    outbox: &'c mut Outbox,
    deferred: &'c mut Deferred<A>,
    tasks: &'c mut TaskControl,
}

impl<'c, A> Context<'c, A> {
    pub(crate) fn new(
        now: Instant,
        channel: Option<&'c str>,
        outbox: &'c mut Outbox,
        deferred: &'c mut Deferred<A>,
        tasks: &'c mut TaskControl,
    ) -> Self {
        Self {
            now,
            channel,
            outbox,
            deferred,
            tasks,
        }
    }

    /// Monotonic time of the current tick.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Channel the callback is bound to, if it is a receive or send
    /// callback.
    pub fn channel(&self) -> Option<&str> {
        self.channel
    }

    /// Queues a write to `channel`.
    ///
    /// Failures are not returned; they show up in the client's
    /// [`Diagnostics`](crate::connection::Diagnostics).
    pub fn write(&mut self, channel: &str, value: impl ToPayload) {
        let result = match channel_id(channel) {
            Ok(id) => self.outbox.push(Target::Channel(id), value),
            Err(e) => {
                self.outbox.reject(e);
                Err(e)
            }
        };
        if let Err(e) = result {
            debug!("write to {} not queued: {:?}", channel, e);
        }
    }

    /// Queues a write to the channel this callback is bound to.
    pub fn reply(&mut self, value: impl ToPayload) {
        match self.channel {
            Some(channel) => self.write(channel, value),
            None => debug!("reply outside a channel callback"),
        }
    }

    /// Queues `text` verbatim for the status topic.
    pub fn publish_status(&mut self, text: &str) {
        let _ = self.outbox.push(Target::Status, text);
    }

    /// Schedules `callback` under `id`, replacing any task with that id.
    pub fn schedule(
        &mut self,
        id: &str,
        interval: Duration,
        callback: TaskFn<A>,
    ) -> Result<(), Error> {
        self.deferred.push(DeferredOp::Schedule {
            id: task_id(id)?,
            kind: TaskKind::Periodic,
            interval,
            job: Job::new(callback),
        })
    }

    pub fn schedule_every(
        &mut self,
        interval: Duration,
        callback: TaskFn<A>,
    ) -> Result<TaskId, Error> {
        self.defer(TaskKind::Periodic, interval, callback)
    }

    pub fn schedule_once(&mut self, delay: Duration, callback: TaskFn<A>) -> Result<TaskId, Error> {
        self.defer(TaskKind::Once, delay, callback)
    }

    fn defer(
        &mut self,
        kind: TaskKind,
        interval: Duration,
        callback: TaskFn<A>,
    ) -> Result<TaskId, Error> {
        let id = self.tasks.allocate(kind)?;
        self.deferred.push(DeferredOp::Schedule {
            id: id.clone(),
            kind,
            interval,
            job: Job::new(callback),
        })?;
        Ok(id)
    }

    /// Cancels a task. Unknown ids are ignored.
    ///
    /// A task cancelled during a scheduler pass does not run later in that
    /// pass. Schedule and cancel requests for the same id still apply in
    /// the order they were made.
    pub fn cancel(&mut self, id: &str) {
        if let Ok(id) = task_id(id) {
            self.tasks.cancel(id.clone());
            let _ = self.deferred.push(DeferredOp::Cancel(id));
        }
    }
}
