//! Time sources.
//!
//! The client needs two clocks: a monotonic one for intervals (scheduler,
//! heartbeat, reconnect throttle) and wall-clock Unix time for status
//! payloads and TLS certificate validation. Both come from one collaborator
//! the host provides.

use embassy_time::{Duration, Instant};

use crate::config::TimeSyncPolicy;
use crate::error::Error;

/// Host-provided clock.
pub trait TimeSource {
    /// Monotonic time used for every interval comparison.
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch. Values below
    /// [`TimeSyncPolicy::min_unix_time`] mean "not synchronized yet".
    fn unix_time(&self) -> u64;

    /// Triggers (or waits a bounded time for) a synchronization round, e.g.
    /// an SNTP query. Called repeatedly while time is implausible.
    fn request_sync(&mut self);
}

/// Waits, with bounded retries, for wall-clock time to become plausible.
///
/// Returns the attempt count on success.
pub fn await_valid_time<T: TimeSource + ?Sized>(
    source: &mut T,
    policy: &TimeSyncPolicy,
) -> Result<u32, Error> {
    let mut attempts = 0;
    while source.unix_time() <= policy.min_unix_time {
        if attempts >= policy.max_attempts {
            return Err(Error::TimeSyncFailed);
        }
        source.request_sync();
        attempts += 1;
    }
    Ok(attempts)
}

/// Whether at least `interval` has passed from `since` to `now`.
///
/// A `now` earlier than `since` counts as not elapsed.
pub(crate) fn has_elapsed(now: Instant, since: Instant, interval: Duration) -> bool {
    now.checked_duration_since(since)
        .is_some_and(|elapsed| elapsed >= interval)
}
