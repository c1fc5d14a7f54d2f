//! Client configuration.
//!
//! All strings are stored inline in fixed-capacity buffers, so a
//! configuration is validated once, up front, and never allocates.

use embassy_time::Duration;
use heapless::String;

use crate::error::Error;
use crate::transport::TransportKind;

pub const MAX_HOST_LEN: usize = 64;
pub const MAX_CREDENTIAL_LEN: usize = 64;
pub const MAX_ID_LEN: usize = 32;
pub const MAX_CLIENT_ID_PREFIX_LEN: usize = 16;

/// Keep-alive announced in `CONNECT`.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
/// Period of the online-status heartbeat.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum spacing between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// How long to wait for `CONNACK` on transports that deliver it
/// asynchronously.
pub const DEFAULT_CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "vpin-";

/// How hard to insist on valid wall-clock time before a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPolicy {
    /// Unix times at or below this value count as unsynchronized.
    pub min_unix_time: u64,
    /// Sync requests issued before giving up.
    pub max_attempts: u32,
    /// When `false`, a failed sync is logged and the handshake proceeds
    /// anyway. When `true`, the attempt fails and goes to backoff.
    pub required: bool,
}

impl Default for TimeSyncPolicy {
    fn default() -> Self {
        Self {
            min_unix_time: 8 * 3600 * 2,
            max_attempts: 20,
            required: false,
        }
    }
}

/// Everything needed to reach the broker and address this device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) broker: String<MAX_HOST_LEN>,
    pub(crate) port: u16,
    pub(crate) username: String<MAX_CREDENTIAL_LEN>,
    pub(crate) password: String<MAX_CREDENTIAL_LEN>,
    pub(crate) project: String<MAX_ID_LEN>,
    pub(crate) user: String<MAX_ID_LEN>,
    pub(crate) device: String<MAX_ID_LEN>,
    pub(crate) client_id_prefix: String<MAX_CLIENT_ID_PREFIX_LEN>,
    pub(crate) keep_alive_secs: u16,
    pub(crate) status_interval: Duration,
    pub(crate) reconnect_interval: Duration,
    pub(crate) connack_timeout: Duration,
    pub(crate) retain_writes: bool,
    pub(crate) time_sync: TimeSyncPolicy,
}

fn fixed<const N: usize>(s: &str) -> Result<String<N>, Error> {
    String::try_from(s).map_err(|_| Error::capacity(s.len(), N))
}

impl ClientConfig {
    pub fn new(
        broker: &str,
        port: u16,
        username: &str,
        password: &str,
        project: &str,
        user: &str,
        device: &str,
    ) -> Result<Self, Error> {
        Ok(Self {
            broker: fixed(broker)?,
            port,
            username: fixed(username)?,
            password: fixed(password)?,
            project: fixed(project)?,
            user: fixed(user)?,
            device: fixed(device)?,
            client_id_prefix: fixed(DEFAULT_CLIENT_ID_PREFIX)?,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            status_interval: DEFAULT_STATUS_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connack_timeout: DEFAULT_CONNACK_TIMEOUT,
            retain_writes: true,
            time_sync: TimeSyncPolicy::default(),
        })
    }

    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connack_timeout(mut self, timeout: Duration) -> Self {
        self.connack_timeout = timeout;
        self
    }

    /// Whether channel writes ask the broker to retain the last value.
    pub fn with_retained_writes(mut self, retain: bool) -> Self {
        self.retain_writes = retain;
        self
    }

    pub fn with_time_sync(mut self, policy: TimeSyncPolicy) -> Self {
        self.time_sync = policy;
        self
    }

    pub fn with_client_id_prefix(mut self, prefix: &str) -> Result<Self, Error> {
        self.client_id_prefix = fixed(prefix)?;
        Ok(self)
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transport selected by the broker port, if any.
    pub fn transport(&self) -> Option<TransportKind> {
        TransportKind::for_port(self.port)
    }

    /// Both supported transports run over TLS.
    pub fn is_secure(&self) -> bool {
        self.transport().is_some()
    }
}
