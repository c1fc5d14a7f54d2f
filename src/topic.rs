//! Channel id to broker topic mapping.
//!
//! Every channel lives under one device prefix:
//!
//! ```text
//! {project}/users/{user}/datastreams/{device}/{channel}
//! ```
//!
//! The channel is always the final path segment, which is what makes
//! [`TopicRouter::topic_for`] and [`TopicRouter::channel_for`] inverses.

use core::fmt::Write;

use heapless::String;

use crate::error::Error;

/// Maximum length for a fully-qualified topic.
pub const MAX_TOPIC_LEN: usize = 128;
/// Maximum length for a channel id.
pub const MAX_CHANNEL_ID_LEN: usize = 16;
/// Reserved channel carrying the device's online status.
pub const STATUS_CHANNEL: &str = "status";

pub type Topic = String<MAX_TOPIC_LEN>;
pub type ChannelId = String<MAX_CHANNEL_ID_LEN>;

/// Builds and parses topics for one device.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    base: Topic,
}

impl TopicRouter {
    pub fn new(project: &str, user: &str, device: &str) -> Result<Self, Error> {
        let mut base = Topic::new();
        write!(base, "{project}/users/{user}/datastreams/{device}").map_err(|_| {
            Error::capacity(
                project.len() + user.len() + device.len() + 20,
                MAX_TOPIC_LEN,
            )
        })?;
        Ok(Self { base })
    }

    /// Topic prefix shared by every channel of this device.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn topic_for(&self, channel: &str) -> Result<Topic, Error> {
        let mut topic = self.base.clone();
        let needed = topic.len() + 1 + channel.len();
        write!(topic, "/{channel}").map_err(|_| Error::capacity(needed, MAX_TOPIC_LEN))?;
        Ok(topic)
    }

    pub fn status_topic(&self) -> Result<Topic, Error> {
        self.topic_for(STATUS_CHANNEL)
    }

    /// Extracts the channel id from a topic of this device.
    ///
    /// Returns `None` for topics outside the device prefix or with more than
    /// one segment after it.
    pub fn channel_for<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let channel = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        if channel.is_empty() || channel.contains('/') {
            return None;
        }
        Some(channel)
    }
}

/// Validates a channel id for registration.
///
/// Ids must be non-empty, free of topic separators and wildcards, and must
/// not collide with the reserved status channel.
pub fn channel_id(id: &str) -> Result<ChannelId, Error> {
    if id.is_empty()
        || id == STATUS_CHANNEL
        || id.contains(|c| matches!(c, '/' | '+' | '#'))
    {
        return Err(Error::InvalidChannelId);
    }
    ChannelId::try_from(id).map_err(|_| Error::capacity(id.len(), MAX_CHANNEL_ID_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TopicRouter {
        TopicRouter::new("proj", "u", "d").unwrap()
    }

    #[test]
    fn test_topic_layout() {
        let r = router();
        assert_eq!(r.topic_for("P1").unwrap(), "proj/users/u/datastreams/d/P1");
        assert_eq!(r.status_topic().unwrap(), "proj/users/u/datastreams/d/status");
    }

    #[test]
    fn test_topic_and_channel_are_inverse() {
        let r = router();
        for id in ["P0", "P1", "P50", "temp", "x9Y", "0"] {
            let topic = r.topic_for(id).unwrap();
            assert_eq!(r.channel_for(&topic), Some(id));
        }
    }

    #[test]
    fn test_foreign_topics_have_no_channel() {
        let r = router();
        assert_eq!(r.channel_for("other/users/u/datastreams/d/P1"), None);
        assert_eq!(r.channel_for("proj/users/u/datastreams/d"), None);
        assert_eq!(r.channel_for("proj/users/u/datastreams/d/"), None);
        assert_eq!(r.channel_for("proj/users/u/datastreams/d/P1/value"), None);
        assert_eq!(r.channel_for("proj/users/u/datastreams/dd/P1"), None);
    }

    #[test]
    fn test_topic_capacity() {
        let long = [b'p'; MAX_TOPIC_LEN];
        let long = core::str::from_utf8(&long).unwrap();
        assert!(matches!(
            TopicRouter::new(long, "u", "d"),
            Err(Error::CapacityExceeded { .. })
        ));

        let r = TopicRouter::new(&long[..100], "u", "d").unwrap();
        assert!(matches!(
            r.topic_for("abcdefghijkl"),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_channel_id_validation() {
        assert!(channel_id("P0").is_ok());
        assert_eq!(channel_id(""), Err(Error::InvalidChannelId));
        assert_eq!(channel_id("a/b"), Err(Error::InvalidChannelId));
        assert_eq!(channel_id("#"), Err(Error::InvalidChannelId));
        assert_eq!(channel_id(STATUS_CHANNEL), Err(Error::InvalidChannelId));
        assert!(matches!(
            channel_id("a-very-long-channel-name"),
            Err(Error::CapacityExceeded { .. })
        ));
    }
}
