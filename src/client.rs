//! # Virtual-Pin Client
//!
//! [`Client`] is the single object an application owns. It ties the
//! connection state machine to the channel registry and the scheduler, and
//! advances all three from [`Client::run`], once per tick.
//!
//! ```ignore
//! struct App { led: bool }
//!
//! fn on_led(app: &mut App, value: &Value, _: &mut Context<'_, App>) {
//!     app.led = value.as_bool();
//! }
//!
//! fn send_uptime(_: &mut App, ctx: &mut Context<'_, App>) {
//!     ctx.reply(ctx.now().as_secs() as i32);
//! }
//!
//! let config = ClientConfig::new("broker.example", 8883, "user", "pass", "proj", "me", "dev1")?;
//! let mut client: Client<'_, App, _, _, _> = Client::begin(config, tls, clock, rng)?;
//! client.on_receive("P0", on_led)?;
//! client.on_send_every("P1", Duration::from_secs(10), send_uptime)?;
//!
//! loop {
//!     client.run(&mut app);
//! }
//! ```

use core::fmt::Write;

use embassy_time::{Duration, Instant};
use rand_core::RngCore;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, Diagnostics};
use crate::error::Error;
use crate::runtime::{
    ChannelRegistry, Context, Deferred, DeferredOp, Job, MAX_TASK_ID_LEN, Outbox, ReceiveFn,
    Scheduler, Target, TaskFn, TaskId, TaskKind, WriteQueue, task_id,
};
use crate::time::TimeSource;
use crate::topic::{TopicRouter, channel_id};
use crate::transport::Session;
use crate::value::{Payload, ToPayload};

/// Prefix of the task id a periodic send binding runs under.
const SEND_TASK_PREFIX: &str = "send_";

/// A virtual-pin device client.
///
/// `A` is the application state handed to every callback. `CHANNELS`
/// bounds the receive and send bindings, `TASKS` the scheduled tasks.
pub struct Client<'q, A, S, T, R, const CHANNELS: usize = 16, const TASKS: usize = 16> {
    connection: Connection<S, T, R>,
    registry: ChannelRegistry<A, CHANNELS>,
    scheduler: Scheduler<Job<A>, TASKS>,
    outbox: Outbox,
    deferred: Deferred<A>,
    queue: Option<&'q WriteQueue>,
}

impl<'q, A, S, T, R, const CHANNELS: usize, const TASKS: usize>
    Client<'q, A, S, T, R, CHANNELS, TASKS>
where
    S: Session,
    T: TimeSource,
    R: RngCore,
{
    /// Creates a client. Nothing is sent until the first [`Client::run`].
    ///
    /// The session must be of the kind the broker port selects: 8883 for
    /// TLS, 8884 for WebSocket.
    pub fn begin(config: ClientConfig, session: S, time: T, rng: R) -> Result<Self, Error> {
        match config.transport() {
            Some(kind) if kind == session.kind() => {}
            _ => return Err(Error::UnsupportedPort(config.port())),
        }
        info!(
            "vpin client for {}:{} ({:?})",
            config.broker(),
            config.port(),
            session.kind()
        );
        Ok(Self {
            connection: Connection::new(config, session, time, rng)?,
            registry: ChannelRegistry::new(),
            scheduler: Scheduler::new(),
            outbox: Outbox::new(),
            deferred: Deferred::new(),
            queue: None,
        })
    }

    /// Registers a receive callback.
    ///
    /// When already connected, a channel seen for the first time is
    /// subscribed right away; otherwise it is subscribed on connect.
    pub fn on_receive(&mut self, channel: &str, callback: ReceiveFn<A>) -> Result<(), Error> {
        let known = self.registry.has_receiver(channel);
        self.registry.on_receive(channel, callback)?;
        if !known && let Err(e) = self.connection.subscribe_channel(channel) {
            // Retried with every other channel on the next connect.
            warn!("subscribe to {} failed: {:?}", channel, e);
            self.connection.diagnostics_mut().record(e);
        }
        Ok(())
    }

    /// Registers a send callback, run only through [`Client::trigger_send`].
    pub fn on_send(&mut self, channel: &str, callback: TaskFn<A>) -> Result<(), Error> {
        self.registry.on_send(channel, callback)
    }

    /// Registers a send callback and runs it every `interval` under the
    /// task id `send_<channel>`.
    pub fn on_send_every(
        &mut self,
        channel: &str,
        interval: Duration,
        callback: TaskFn<A>,
    ) -> Result<TaskId, Error> {
        let channel = channel_id(channel)?;
        self.registry.on_send(&channel, callback)?;
        let id = send_task_id(&channel)?;
        let now = self.connection.now();
        self.scheduler.schedule(
            id.clone(),
            TaskKind::Periodic,
            interval,
            now,
            Job::for_channel(callback, channel),
        )?;
        Ok(id)
    }

    /// Stops the periodic schedule of a send binding. The binding itself
    /// stays available to [`Client::trigger_send`].
    pub fn cancel_send(&mut self, channel: &str) -> bool {
        send_task_id(channel).is_ok_and(|id| self.scheduler.cancel(&id))
    }

    /// Runs the send callback bound to `channel` now.
    pub fn trigger_send(&mut self, app: &mut A, channel: &str) -> Result<(), Error> {
        let callback = self
            .registry
            .sender(channel)
            .ok_or(Error::InvalidChannelId)?;
        let now = self.connection.now();
        let mut ctx = Context::new(
            now,
            Some(channel),
            &mut self.outbox,
            &mut self.deferred,
            self.scheduler.control_mut(),
        );
        callback(app, &mut ctx);
        self.apply_deferred(now);
        self.flush_outbox();
        Ok(())
    }

    /// Publishes a value to `channel`.
    ///
    /// Never fails from the caller's point of view: writes that cannot be
    /// delivered are dropped and counted in [`Client::diagnostics`].
    pub fn write(&mut self, channel: &str, value: impl ToPayload) {
        let mut payload = Payload::new();
        if let Err(e) = value.write_payload(&mut payload) {
            self.connection.diagnostics_mut().drop_write(e);
            return;
        }
        let _ = self.connection.write(channel, &payload);
    }

    /// Publishes `text` verbatim to the status topic.
    pub fn publish_status(&mut self, text: &str) {
        if let Err(e) = self.connection.publish_status(text) {
            debug!("status not published: {:?}", e);
        }
    }

    /// Schedules `callback` under `id`, replacing any task with that id.
    pub fn schedule(&mut self, id: &str, interval: Duration, callback: TaskFn<A>) -> Result<(), Error> {
        let now = self.connection.now();
        self.scheduler.schedule(
            task_id(id)?,
            TaskKind::Periodic,
            interval,
            now,
            Job::new(callback),
        )
    }

    /// Schedules a periodic task under a generated id.
    pub fn schedule_every(&mut self, interval: Duration, callback: TaskFn<A>) -> Result<TaskId, Error> {
        let now = self.connection.now();
        self.scheduler.schedule_every(interval, now, Job::new(callback))
    }

    /// Schedules a task that runs once, `delay` from now.
    pub fn schedule_once(&mut self, delay: Duration, callback: TaskFn<A>) -> Result<TaskId, Error> {
        let now = self.connection.now();
        self.scheduler.schedule_once(delay, now, Job::new(callback))
    }

    /// Cancels a task. Returns `false` if no task had that id.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.scheduler.cancel(id)
    }

    /// Drains writes sent through [`WriteHandle`](crate::runtime::WriteHandle)s
    /// on every tick while connected.
    pub fn attach_write_queue(&mut self, queue: &'q WriteQueue) {
        self.queue = Some(queue);
    }

    /// One tick: advance the connection and dispatch incoming messages, run
    /// due tasks, apply what callbacks queued, and send the heartbeat.
    pub fn run(&mut self, app: &mut A) {
        let Self {
            connection,
            registry,
            scheduler,
            outbox,
            deferred,
            ..
        } = self;
        let now = connection.now();

        connection.advance(registry.subscription_channels(), &mut |channel, value| {
            let Some(callback) = registry.receiver(channel) else {
                trace!("no receiver for {}", channel);
                return;
            };
            let mut ctx = Context::new(now, Some(channel), outbox, deferred, scheduler.control_mut());
            callback(app, &value, &mut ctx);
        });

        scheduler.process(now, |id, job, control| {
            trace!("running task {}", id);
            let mut ctx = Context::new(now, job.channel.as_deref(), outbox, deferred, control);
            (job.callback)(app, &mut ctx);
        });

        self.apply_deferred(now);
        self.drain_queue();
        self.flush_outbox();
        self.connection.heartbeat();
    }

    fn apply_deferred(&mut self, now: Instant) {
        self.scheduler.control_mut().clear_cancelled();
        for op in self.deferred.take() {
            match op {
                DeferredOp::Schedule {
                    id,
                    kind,
                    interval,
                    job,
                } => {
                    if let Err(e) = self.scheduler.schedule(id, kind, interval, now, job) {
                        warn!("task not scheduled: {:?}", e);
                        self.connection.diagnostics_mut().record(e);
                    }
                }
                DeferredOp::Cancel(id) => {
                    self.scheduler.cancel(&id);
                }
            }
        }
    }

    fn drain_queue(&mut self) {
        let Some(queue) = self.queue else {
            return;
        };
        if !self.connection.is_connected() {
            return;
        }
        while let Ok(queued) = queue.try_receive() {
            let _ = self.connection.write(&queued.channel, &queued.payload);
        }
    }

    fn flush_outbox(&mut self) {
        let (entries, rejected) = self.outbox.take();
        for e in rejected {
            self.connection.diagnostics_mut().drop_write(e);
        }
        for outgoing in entries {
            let _ = match outgoing.target {
                Target::Channel(channel) => self.connection.write(&channel, &outgoing.payload),
                Target::Status => self.connection.publish_status(&outgoing.payload),
            };
        }
    }

    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Publishes an offline status if connected and releases the session.
    /// The client stays shut down afterwards.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// `"connected"` or `"disconnected"`.
    pub fn status(&self) -> &'static str {
        self.connection.status()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.connection.diagnostics().last_error
    }

    /// Whether the broker port selects a TLS-protected transport.
    pub fn is_secure(&self) -> bool {
        self.connection.config().is_secure()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.connection.diagnostics()
    }

    pub fn router(&self) -> &TopicRouter {
        self.connection.router()
    }

    pub fn client_id(&self) -> &str {
        self.connection.client_id()
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduler.contains(id)
    }

    pub fn session(&self) -> &S {
        self.connection.session()
    }

    pub fn session_mut(&mut self) -> &mut S {
        self.connection.session_mut()
    }
}

fn send_task_id(channel: &str) -> Result<TaskId, Error> {
    let mut id = TaskId::new();
    write!(id, "{SEND_TASK_PREFIX}{channel}")
        .map_err(|_| Error::capacity(SEND_TASK_PREFIX.len() + channel.len(), MAX_TASK_ID_LEN))?;
    Ok(id)
}
