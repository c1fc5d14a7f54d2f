//! # Connection State Machine
//!
//! [`Connection`] owns the broker session and drives it through its
//! lifecycle, one tick at a time:
//!
//! ```text
//! LinkDown -> ReconnectBackoff -> Connecting -> Connected <-> Degraded
//!                  ^                  |             |
//!                  +------------------+-------------+
//! ```
//!
//! `Shutdown` is entered only through [`Connection::disconnect`] and is
//! terminal. Link loss, refused credentials and timeouts are never fatal:
//! they are recorded in [`Diagnostics`] and retried, at most once per
//! reconnect interval.

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;
use rand_core::RngCore;

use crate::config::{ClientConfig, MAX_CLIENT_ID_PREFIX_LEN};
use crate::error::{ConnectReasonCode, Error};
use crate::time::{TimeSource, await_valid_time, has_elapsed};
use crate::topic::{TopicRouter, channel_id};
use crate::transport::{Credentials, Handshake, Session, SessionEvent};
use crate::value::{MAX_PAYLOAD_LEN, Payload, Value};

/// Capacity of a generated client id: the prefix plus eight hex digits.
pub const CLIENT_ID_LEN: usize = MAX_CLIENT_ID_PREFIX_LEN + 8;

pub type ClientId = String<CLIENT_ID_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// The network link is down. Nothing is attempted until it returns.
    LinkDown,
    /// `CONNECT` is out and the broker has not answered yet.
    Connecting,
    Connected,
    /// Connected, but the last write failed.
    Degraded,
    /// Waiting for the reconnect interval before the next attempt.
    ReconnectBackoff,
    /// Explicitly disconnected. Terminal.
    Shutdown,
}

/// Counters for failures the client recovers from on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Incoming frames that could not be parsed and were dropped.
    pub malformed_frames: u32,
    /// Incoming messages whose payload was too large to decode.
    pub dropped_messages: u32,
    /// Writes dropped because the session was down, the payload did not
    /// fit, or the transport rejected them.
    pub dropped_writes: u32,
    /// Connections the broker refused.
    pub auth_failures: u32,
    /// Connection attempts, the first one included.
    pub connect_attempts: u32,
    pub last_error: Option<Error>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, error: Error) {
        self.last_error = Some(error);
    }

    pub(crate) fn drop_write(&mut self, error: Error) {
        self.dropped_writes = self.dropped_writes.saturating_add(1);
        self.record(error);
    }
}

/// The broker connection and everything needed to re-establish it.
pub struct Connection<S, T, R> {
    session: S,
    time: T,
    rng: R,
    config: ClientConfig,
    router: TopicRouter,
    state: ConnectionState,
    client_id: ClientId,
    last_connect: Option<Instant>,
    last_attempt: Option<Instant>,
    handshake_started: Option<Instant>,
    last_status: Option<Instant>,
    diagnostics: Diagnostics,
}

impl<S, T, R> Connection<S, T, R>
where
    S: Session,
    T: TimeSource,
    R: RngCore,
{
    pub fn new(config: ClientConfig, session: S, time: T, rng: R) -> Result<Self, Error> {
        let router = TopicRouter::new(&config.project, &config.user, &config.device)?;
        Ok(Self {
            session,
            time,
            rng,
            config,
            router,
            state: ConnectionState::LinkDown,
            client_id: ClientId::new(),
            last_connect: None,
            last_attempt: None,
            handshake_started: None,
            last_status: None,
            diagnostics: Diagnostics::default(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Client id presented in the most recent handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Monotonic time of the last successful connection.
    pub fn last_connect(&self) -> Option<Instant> {
        self.last_connect
    }

    pub fn now(&self) -> Instant {
        self.time.now()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Degraded
        ) && self.session.is_connected()
    }

    pub fn status(&self) -> &'static str {
        if self.is_connected() {
            "connected"
        } else {
            "disconnected"
        }
    }

    /// Advances the state machine by one tick.
    ///
    /// `channels` lists every receive channel; each is subscribed exactly
    /// once per successful connection. Messages for this device are handed
    /// to `on_message` as channel id and decoded value.
    pub fn advance<'c, I>(&mut self, channels: I, on_message: &mut dyn FnMut(&str, Value))
    where
        I: IntoIterator<Item = &'c str>,
    {
        if self.state == ConnectionState::Shutdown {
            return;
        }

        let now = self.time.now();

        if !self.session.link_up() {
            if self.state != ConnectionState::LinkDown {
                self.session.close();
                self.diagnostics.record(Error::LinkUnavailable);
                self.transition(ConnectionState::LinkDown);
            }
            return;
        }

        match self.state {
            ConnectionState::LinkDown => {
                self.transition(ConnectionState::ReconnectBackoff);
                self.try_reconnect(now, channels);
            }
            ConnectionState::ReconnectBackoff => self.try_reconnect(now, channels),
            ConnectionState::Connecting => {
                match self.pump(now, on_message) {
                    Some(code) if code.is_success() => self.on_connected(now, channels),
                    Some(code) => self.fail(Error::AuthenticationFailed(code)),
                    None if !self.session.stream_open() => self.fail(Error::LinkUnavailable),
                    None => {
                        let timed_out = self.handshake_started.is_none_or(|started| {
                            has_elapsed(now, started, self.config.connack_timeout)
                        });
                        if timed_out {
                            self.fail(Error::Timeout);
                        }
                    }
                }
            }
            ConnectionState::Connected | ConnectionState::Degraded => {
                self.pump(now, on_message);
                if !self.session.is_connected() {
                    warn!("broker session lost");
                    self.session.close();
                    self.transition(ConnectionState::ReconnectBackoff);
                }
            }
            ConnectionState::Shutdown => {}
        }
    }

    /// Polls the session, dispatching messages. Returns the reason code of
    /// a `CONNACK` seen during the poll.
    fn pump(
        &mut self,
        now: Instant,
        on_message: &mut dyn FnMut(&str, Value),
    ) -> Option<ConnectReasonCode> {
        let Self {
            session,
            router,
            diagnostics,
            ..
        } = self;
        let mut connack = None;

        let result = session.poll(now, &mut |event| match event {
            SessionEvent::ConnAck(code) => connack = Some(code),
            SessionEvent::Message { topic, payload } => {
                let Some(channel) = router.channel_for(topic) else {
                    debug!("ignoring message on foreign topic {}", topic);
                    return;
                };
                match Value::from_payload(payload) {
                    Ok(value) => on_message(channel, value),
                    Err(e) => {
                        warn!("dropping message on {}: {:?}", channel, e);
                        diagnostics.dropped_messages = diagnostics.dropped_messages.saturating_add(1);
                        diagnostics.record(e);
                    }
                }
            }
            SessionEvent::SubAck { granted } => {
                if !granted {
                    warn!("broker rejected a subscription");
                }
            }
            SessionEvent::Malformed => {
                diagnostics.malformed_frames = diagnostics.malformed_frames.saturating_add(1);
                diagnostics.record(Error::MalformedFrame);
                debug!("dropped malformed frame");
            }
        });

        if let Err(e) = result {
            warn!("session poll failed: {:?}", e);
            self.diagnostics.record(e);
        }
        connack
    }

    fn try_reconnect<'c, I>(&mut self, now: Instant, channels: I)
    where
        I: IntoIterator<Item = &'c str>,
    {
        let eligible = self
            .last_attempt
            .is_none_or(|last| has_elapsed(now, last, self.config.reconnect_interval));
        if eligible {
            self.attempt(now, channels);
        }
    }

    /// One full, clean connection attempt.
    fn attempt<'c, I>(&mut self, now: Instant, channels: I)
    where
        I: IntoIterator<Item = &'c str>,
    {
        self.last_attempt = Some(now);
        self.diagnostics.connect_attempts = self.diagnostics.connect_attempts.saturating_add(1);
        self.session.close();

        if self.session.requires_valid_time() {
            match await_valid_time(&mut self.time, &self.config.time_sync) {
                Ok(0) => {}
                Ok(attempts) => debug!("time synchronized after {} attempts", attempts),
                Err(e) if self.config.time_sync.required => {
                    self.fail(e);
                    return;
                }
                Err(e) => {
                    warn!("time not synchronized, connecting anyway");
                    self.diagnostics.record(e);
                }
            }
            self.session.refresh_trust();
        }

        if let Err(e) = self.session.open(&self.config.broker, self.config.port) {
            self.fail(e);
            return;
        }

        if let Err(e) = self.regenerate_client_id() {
            self.fail(e);
            return;
        }

        let credentials = Credentials {
            client_id: &self.client_id,
            username: &self.config.username,
            password: &self.config.password,
            keep_alive_secs: self.config.keep_alive_secs,
        };
        info!("connecting to {}:{}", self.config.broker.as_str(), self.config.port);

        match self.session.handshake(&credentials) {
            Ok(Handshake::Accepted) => self.on_connected(now, channels),
            Ok(Handshake::Refused(code)) => self.fail(Error::AuthenticationFailed(code)),
            Ok(Handshake::Pending) => {
                self.handshake_started = Some(now);
                self.transition(ConnectionState::Connecting);
            }
            Err(e) => self.fail(e),
        }
    }

    fn regenerate_client_id(&mut self) -> Result<(), Error> {
        self.client_id.clear();
        write!(
            self.client_id,
            "{}{:08x}",
            self.config.client_id_prefix,
            self.rng.next_u32()
        )
        .map_err(|_| Error::capacity(self.config.client_id_prefix.len() + 8, CLIENT_ID_LEN))
    }

    fn on_connected<'c, I>(&mut self, now: Instant, channels: I)
    where
        I: IntoIterator<Item = &'c str>,
    {
        self.handshake_started = None;
        self.last_connect = Some(now);
        self.transition(ConnectionState::Connected);

        for channel in channels {
            if let Err(e) = self.subscribe_channel(channel) {
                warn!("subscribe to {} failed: {:?}", channel, e);
                self.diagnostics.record(e);
            }
        }

        if let Err(e) = self.publish_online(now, true) {
            warn!("online status not published: {:?}", e);
        }
    }

    fn fail(&mut self, error: Error) {
        warn!("connection attempt failed: {:?}", error);
        if matches!(error, Error::AuthenticationFailed(_)) {
            self.diagnostics.auth_failures = self.diagnostics.auth_failures.saturating_add(1);
        }
        self.diagnostics.record(error);
        self.handshake_started = None;
        self.session.close();
        self.transition(ConnectionState::ReconnectBackoff);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("connection {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Subscribes to a channel's topic if the session is up.
    pub fn subscribe_channel(&mut self, channel: &str) -> Result<(), Error> {
        if !self.is_connected() {
            return Ok(());
        }
        let topic = self.router.topic_for(channel)?;
        debug!("subscribing to {}", topic.as_str());
        self.session.subscribe(&topic)
    }

    /// Publishes a payload to a channel.
    ///
    /// Wildcards, separators and the reserved status channel are refused
    /// before anything reaches the broker.
    pub fn write(&mut self, channel: &str, payload: &str) -> Result<(), Error> {
        let topic = match channel_id(channel).and_then(|id| self.router.topic_for(&id)) {
            Ok(topic) => topic,
            Err(e) => {
                self.diagnostics.drop_write(e);
                return Err(e);
            }
        };
        self.publish(&topic, payload, self.config.retain_writes)
    }

    /// Publishes caller-supplied text verbatim to the status topic.
    pub fn publish_status(&mut self, text: &str) -> Result<(), Error> {
        let topic = self.router.status_topic()?;
        self.publish(&topic, text, true)
    }

    /// Publishes the online heartbeat once the status interval has passed.
    pub fn heartbeat(&mut self) {
        if !self.is_connected() {
            return;
        }
        let now = self.time.now();
        let due = self
            .last_status
            .is_none_or(|last| has_elapsed(now, last, self.config.status_interval));
        if due {
            let _ = self.publish_online(now, true);
        }
    }

    fn publish_online(&mut self, now: Instant, online: bool) -> Result<(), Error> {
        let mut payload = Payload::new();
        write!(
            payload,
            "{{\"s\":{},\"t\":{}}}",
            u8::from(online),
            self.time.unix_time()
        )
        .map_err(|_| Error::capacity(payload.len(), MAX_PAYLOAD_LEN))?;
        self.last_status = Some(now);
        self.publish_status(&payload)
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), Error> {
        if !self.is_connected() {
            debug!("dropping write to {}: not connected", topic);
            self.diagnostics.drop_write(Error::TransportWriteFailed);
            return Err(Error::TransportWriteFailed);
        }
        if retain && !self.session.supports_retain() {
            trace!("retain not supported by transport, publishing unretained");
        }

        match self.session.publish(topic, payload.as_bytes(), retain) {
            Ok(()) => {
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!("publish to {} failed: {:?}", topic, e);
                self.diagnostics.drop_write(e);
                self.transition(ConnectionState::Degraded);
                Err(e)
            }
        }
    }

    /// Publishes an offline status if connected, then releases the session.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            let now = self.time.now();
            if let Err(e) = self.publish_online(now, false) {
                debug!("offline status not published: {:?}", e);
            }
        }
        self.session.close();
        self.transition(ConnectionState::Shutdown);
    }
}
