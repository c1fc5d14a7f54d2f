//! Channel bindings.

use heapless::Vec;

use super::context::{ReceiveFn, TaskFn};
use crate::error::Error;
use crate::topic::{ChannelId, channel_id};

struct Binding<F> {
    channel: ChannelId,
    callback: F,
}

/// Receive and send bindings, in registration order.
///
/// Receive lookups take the first binding for a channel. Registering a send
/// binding for a channel that already has one replaces it.
pub struct ChannelRegistry<A, const N: usize> {
    receivers: Vec<Binding<ReceiveFn<A>>, N>,
    senders: Vec<Binding<TaskFn<A>>, N>,
}

impl<A, const N: usize> Default for ChannelRegistry<A, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, const N: usize> ChannelRegistry<A, N> {
    pub const fn new() -> Self {
        Self {
            receivers: Vec::new(),
            senders: Vec::new(),
        }
    }

    pub fn on_receive(&mut self, channel: &str, callback: ReceiveFn<A>) -> Result<(), Error> {
        let channel = channel_id(channel)?;
        self.receivers
            .push(Binding { channel, callback })
            .map_err(|_| Error::capacity(N + 1, N))
    }

    pub fn on_send(&mut self, channel: &str, callback: TaskFn<A>) -> Result<(), Error> {
        let channel = channel_id(channel)?;
        if let Some(existing) = self.senders.iter_mut().find(|b| b.channel == channel) {
            existing.callback = callback;
            return Ok(());
        }
        self.senders
            .push(Binding { channel, callback })
            .map_err(|_| Error::capacity(N + 1, N))
    }

    pub fn receiver(&self, channel: &str) -> Option<ReceiveFn<A>> {
        self.receivers
            .iter()
            .find(|b| b.channel == channel)
            .map(|b| b.callback)
    }

    pub fn sender(&self, channel: &str) -> Option<TaskFn<A>> {
        self.senders
            .iter()
            .find(|b| b.channel == channel)
            .map(|b| b.callback)
    }

    pub fn has_receiver(&self, channel: &str) -> bool {
        self.receivers.iter().any(|b| b.channel == channel)
    }

    /// Channels to subscribe to, each listed once.
    pub fn subscription_channels(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.receivers
            .iter()
            .enumerate()
            .filter(|(i, b)| !self.receivers[..*i].iter().any(|o| o.channel == b.channel))
            .map(|(_, b)| b.channel.as_str())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec as StdVec;

    use super::*;
    use crate::runtime::context::Context;
    use crate::value::Value;

    #[derive(Default)]
    struct App {
        hits: u8,
    }

    fn first(app: &mut App, _: &Value, _: &mut Context<'_, App>) {
        app.hits += 1;
    }

    fn second(app: &mut App, _: &Value, _: &mut Context<'_, App>) {
        app.hits += 10;
    }

    fn send(_: &mut App, _: &mut Context<'_, App>) {}

    #[test]
    fn test_first_receiver_wins() {
        let mut registry = ChannelRegistry::<App, 4>::new();
        registry.on_receive("P0", first).unwrap();
        registry.on_receive("P0", second).unwrap();
        registry.on_receive("P1", second).unwrap();

        let cb = registry.receiver("P0").unwrap();
        let mut app = App::default();
        let mut outbox = crate::runtime::context::Outbox::new();
        let mut deferred = crate::runtime::context::Deferred::new();
        let mut tasks = crate::runtime::scheduler::TaskControl::new();
        let mut ctx = Context::new(
            embassy_time::Instant::from_millis(0),
            Some("P0"),
            &mut outbox,
            &mut deferred,
            &mut tasks,
        );
        cb(&mut app, &Value::Int(1), &mut ctx);
        assert_eq!(app.hits, 1);
        assert!(registry.receiver("P9").is_none());
    }

    #[test]
    fn test_subscription_channels_are_unique() {
        let mut registry = ChannelRegistry::<App, 4>::new();
        registry.on_receive("P1", first).unwrap();
        registry.on_receive("P0", first).unwrap();
        registry.on_receive("P1", second).unwrap();
        let channels: StdVec<&str> = registry.subscription_channels().collect();
        assert_eq!(channels, ["P1", "P0"]);
    }

    #[test]
    fn test_invalid_and_full() {
        let mut registry = ChannelRegistry::<App, 1>::new();
        assert_eq!(
            registry.on_receive("status", first),
            Err(Error::InvalidChannelId)
        );
        registry.on_send("P0", send).unwrap();
        registry.on_send("P0", send).unwrap();
        assert!(registry.sender("P0").is_some());
        assert!(matches!(
            registry.on_send("P1", send),
            Err(Error::CapacityExceeded { .. })
        ));
    }
}
