//! # Error Types
//!
//! A single error enum covers every failure the client can observe, from a
//! missing network link to an oversized frame. Most of them never reach the
//! caller: the connection state machine recovers from link and
//! authentication failures on its own, and records them in
//! [`Diagnostics`](crate::connection::Diagnostics) instead.

use core::fmt;

/// The primary error enum for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The underlying network link (e.g. Wi-Fi) is down, or the broker
    /// endpoint could not be reached.
    LinkUnavailable,
    /// Wall-clock time never became plausible within the allowed attempts.
    TimeSyncFailed,
    /// The broker refused the connection. The enclosed code gives the reason.
    AuthenticationFailed(ConnectReasonCode),
    /// Writing to the transport failed, or a write was attempted while the
    /// session is not connected.
    TransportWriteFailed,
    /// An incoming frame could not be parsed.
    MalformedFrame,
    /// A frame, topic, identifier or payload does not fit its fixed-capacity
    /// buffer.
    CapacityExceeded {
        /// Bytes (or entries) the operation needed.
        needed: usize,
        /// Bytes (or entries) available.
        capacity: usize,
    },
    /// A channel id is empty, contains a topic separator or wildcard, or
    /// names the reserved status channel.
    InvalidChannelId,
    /// The broker port does not select a supported transport, or the
    /// transport given does not match the port.
    UnsupportedPort(u16),
    /// The broker did not acknowledge the connection in time.
    Timeout,
}

impl Error {
    pub(crate) const fn capacity(needed: usize, capacity: usize) -> Self {
        Error::CapacityExceeded { needed, capacity }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LinkUnavailable => f.write_str("network link unavailable"),
            Error::TimeSyncFailed => f.write_str("time synchronization failed"),
            Error::AuthenticationFailed(code) => {
                write!(f, "broker refused connection: {:?}", code)
            }
            Error::TransportWriteFailed => f.write_str("transport write failed"),
            Error::MalformedFrame => f.write_str("malformed frame"),
            Error::CapacityExceeded { needed, capacity } => {
                write!(f, "capacity exceeded: needed {needed}, capacity {capacity}")
            }
            Error::InvalidChannelId => f.write_str("invalid channel id"),
            Error::UnsupportedPort(port) => write!(f, "unsupported broker port {port}"),
            Error::Timeout => f.write_str("timed out waiting for broker"),
        }
    }
}

impl core::error::Error for Error {}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

impl ConnectReasonCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}
