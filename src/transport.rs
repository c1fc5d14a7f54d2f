//! # Transport Abstraction
//!
//! The connection state machine is written once, against the [`Session`]
//! capability trait. Two kinds of transport plug into it:
//!
//! - **TLS** (port 8883): a native MQTT client running over a TLS socket
//!   implements [`Session`] directly. It owns its own codec and supports
//!   retained publishes.
//! - **WebSocket** (port 8884): a raw binary link implements [`FrameLink`]
//!   and is wrapped in a [`FramedSession`](crate::framed::FramedSession),
//!   which speaks MQTT through this crate's own [packet codec](crate::packet).
//!
//! [`AnySession`] picks between the two from the broker port.

use embassy_time::Instant;

use crate::error::{ConnectReasonCode, Error};
use crate::framed::FramedSession;

/// Which transport a broker port selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportKind {
    /// MQTT over a TLS socket, handled by a native client.
    Tls,
    /// MQTT over WebSocket binary frames, encoded by this crate.
    WebSocket,
}

impl TransportKind {
    pub const TLS_PORT: u16 = 8883;
    pub const WEBSOCKET_PORT: u16 = 8884;

    pub fn for_port(port: u16) -> Option<Self> {
        match port {
            Self::TLS_PORT => Some(Self::Tls),
            Self::WEBSOCKET_PORT => Some(Self::WebSocket),
            _ => None,
        }
    }
}

/// Identity presented to the broker.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub keep_alive_secs: u16,
}

/// Outcome of starting a broker handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The broker accepted the connection synchronously.
    Accepted,
    /// The broker refused the connection synchronously.
    Refused(ConnectReasonCode),
    /// `CONNECT` was sent; the answer arrives later as
    /// [`SessionEvent::ConnAck`].
    Pending,
}

/// Something observed while polling a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent<'a> {
    ConnAck(ConnectReasonCode),
    Message { topic: &'a str, payload: &'a [u8] },
    SubAck { granted: bool },
    /// An incoming frame could not be parsed and was dropped.
    Malformed,
}

/// A broker session the connection state machine can drive.
///
/// All methods are synchronous and must return within one tick.
pub trait Session {
    fn kind(&self) -> TransportKind;

    /// Whether the underlying network link (e.g. Wi-Fi) is up.
    fn link_up(&self) -> bool {
        true
    }

    /// Whether the handshake needs plausible wall-clock time, as TLS
    /// certificate validation does.
    fn requires_valid_time(&self) -> bool {
        true
    }

    /// Reinstalls TLS trust anchors before a fresh connection.
    fn refresh_trust(&mut self) {}

    /// Opens the byte stream to the broker.
    fn open(&mut self, host: &str, port: u16) -> Result<(), Error>;

    /// Authenticates with the broker.
    fn handshake(&mut self, credentials: &Credentials<'_>) -> Result<Handshake, Error>;

    /// Processes whatever the broker sent since the last call.
    fn poll(
        &mut self,
        now: Instant,
        on_event: &mut dyn FnMut(SessionEvent<'_>),
    ) -> Result<(), Error>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Error>;

    fn subscribe(&mut self, topic: &str) -> Result<(), Error>;

    fn is_connected(&self) -> bool;

    /// Whether the byte stream opened by [`Session::open`] is still up,
    /// handshake or not. Sessions that cannot tell report `true`.
    fn stream_open(&self) -> bool {
        true
    }

    /// Tears the session down. Must be safe to call in any state.
    fn close(&mut self);

    /// Whether `retain` on [`Session::publish`] reaches the broker.
    fn supports_retain(&self) -> bool {
        self.kind() == TransportKind::Tls
    }
}

/// A raw binary link without MQTT semantics, such as a WebSocket client.
pub trait FrameLink {
    /// Whether the underlying network link is up.
    fn link_up(&self) -> bool {
        true
    }

    fn connect(&mut self, host: &str, port: u16) -> bool;

    /// Sends one binary frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Copies the next received binary frame into `buf`.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// Session chosen at runtime from the broker port.
pub enum AnySession<N, L, const BUF: usize = 512> {
    Tls(N),
    WebSocket(FramedSession<L, BUF>),
}

impl<N, L, const BUF: usize> AnySession<N, L, BUF>
where
    N: Session,
    L: FrameLink,
{
    /// Builds only the transport the port selects.
    pub fn for_port(
        port: u16,
        tls: impl FnOnce() -> N,
        websocket: impl FnOnce() -> L,
    ) -> Result<Self, Error> {
        match TransportKind::for_port(port) {
            Some(TransportKind::Tls) => Ok(Self::Tls(tls())),
            Some(TransportKind::WebSocket) => Ok(Self::WebSocket(FramedSession::new(websocket()))),
            None => Err(Error::UnsupportedPort(port)),
        }
    }
}

impl<N, L, const BUF: usize> Session for AnySession<N, L, BUF>
where
    N: Session,
    L: FrameLink,
{
    fn kind(&self) -> TransportKind {
        match self {
            Self::Tls(s) => s.kind(),
            Self::WebSocket(s) => s.kind(),
        }
    }

    fn link_up(&self) -> bool {
        match self {
            Self::Tls(s) => s.link_up(),
            Self::WebSocket(s) => s.link_up(),
        }
    }

    fn requires_valid_time(&self) -> bool {
        match self {
            Self::Tls(s) => s.requires_valid_time(),
            Self::WebSocket(s) => s.requires_valid_time(),
        }
    }

    fn refresh_trust(&mut self) {
        match self {
            Self::Tls(s) => s.refresh_trust(),
            Self::WebSocket(s) => s.refresh_trust(),
        }
    }

    fn open(&mut self, host: &str, port: u16) -> Result<(), Error> {
        match self {
            Self::Tls(s) => s.open(host, port),
            Self::WebSocket(s) => s.open(host, port),
        }
    }

    fn handshake(&mut self, credentials: &Credentials<'_>) -> Result<Handshake, Error> {
        match self {
            Self::Tls(s) => s.handshake(credentials),
            Self::WebSocket(s) => s.handshake(credentials),
        }
    }

    fn poll(
        &mut self,
        now: Instant,
        on_event: &mut dyn FnMut(SessionEvent<'_>),
    ) -> Result<(), Error> {
        match self {
            Self::Tls(s) => s.poll(now, on_event),
            Self::WebSocket(s) => s.poll(now, on_event),
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Error> {
        match self {
            Self::Tls(s) => s.publish(topic, payload, retain),
            Self::WebSocket(s) => s.publish(topic, payload, retain),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), Error> {
        match self {
            Self::Tls(s) => s.subscribe(topic),
            Self::WebSocket(s) => s.subscribe(topic),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Tls(s) => s.is_connected(),
            Self::WebSocket(s) => s.is_connected(),
        }
    }

    fn stream_open(&self) -> bool {
        match self {
            Self::Tls(s) => s.stream_open(),
            Self::WebSocket(s) => s.stream_open(),
        }
    }

    fn close(&mut self) {
        match self {
            Self::Tls(s) => s.close(),
            Self::WebSocket(s) => s.close(),
        }
    }

    fn supports_retain(&self) -> bool {
        match self {
            Self::Tls(s) => s.supports_retain(),
            Self::WebSocket(s) => s.supports_retain(),
        }
    }
}
