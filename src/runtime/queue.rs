//! Writes from other tasks.
//!
//! The client has a single owner. Code running elsewhere (another embassy
//! task, an interrupt-driven sensor driver) cannot call
//! [`Client::write`](crate::Client::write) directly, so it sends through a
//! [`WriteHandle`] into a [`WriteQueue`] that the owner drains on every tick.
//!
//! ```ignore
//! static WRITES: WriteQueue = WriteQueue::new();
//!
//! client.attach_write_queue(&WRITES);
//!
//! // elsewhere
//! let handle = WriteHandle::new(&WRITES);
//! handle.try_write("P3", 21.5f32)?;
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::error::Error;
use crate::topic::{ChannelId, channel_id};
use crate::value::{Payload, ToPayload};

pub const WRITE_QUEUE_DEPTH: usize = 8;

/// A write waiting to be published by the client's owner.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
    pub channel: ChannelId,
    pub payload: Payload,
}

pub type WriteQueue = Channel<CriticalSectionRawMutex, QueuedWrite, WRITE_QUEUE_DEPTH>;

/// Cloneable sending side of a [`WriteQueue`].
#[derive(Clone, Copy)]
pub struct WriteHandle<'q> {
    queue: &'q WriteQueue,
}

impl<'q> WriteHandle<'q> {
    pub fn new(queue: &'q WriteQueue) -> Self {
        Self { queue }
    }

    /// Queues a write without waiting.
    ///
    /// Fails with [`Error::CapacityExceeded`] when the queue is full.
    pub fn try_write(&self, channel: &str, value: impl ToPayload) -> Result<(), Error> {
        let channel = channel_id(channel)?;
        let mut payload = Payload::new();
        value.write_payload(&mut payload)?;
        self.queue
            .try_send(QueuedWrite { channel, payload })
            .map_err(|_| Error::capacity(WRITE_QUEUE_DEPTH + 1, WRITE_QUEUE_DEPTH))
    }

    /// Queues a write, waiting for room.
    pub async fn write(&self, channel: &str, value: impl ToPayload) -> Result<(), Error> {
        let channel = channel_id(channel)?;
        let mut payload = Payload::new();
        value.write_payload(&mut payload)?;
        self.queue.send(QueuedWrite { channel, payload }).await;
        Ok(())
    }
}
