//! MQTT over a raw binary link.
//!
//! [`FramedSession`] turns any [`FrameLink`] into a [`Session`] using the
//! crate's packet codec. The broker's `CONNACK` arrives asynchronously, so
//! [`Session::handshake`] only sends `CONNECT` and reports
//! [`Handshake::Pending`]; the connection state machine waits for the
//! [`SessionEvent::ConnAck`] before it subscribes anything.
//!
//! Publishes always go out at QoS 0 without the RETAIN bit. A `retain`
//! request is accepted but has no effect on the wire.

use embassy_time::{Duration, Instant};

use crate::error::Error;
use crate::packet::{
    CONTROL_FRAME_CAPACITY, Connect, Disconnect, EncodePacket, FrameIter, Incoming, PingReq,
    Publish, Subscribe,
};
use crate::time::has_elapsed;
use crate::transport::{
    Credentials, FrameLink, Handshake, Session, SessionEvent, TransportKind,
};

/// Frames read per poll, so a chatty broker cannot starve the tick.
const MAX_FRAMES_PER_POLL: usize = 8;

/// A [`Session`] that encodes MQTT itself over a [`FrameLink`].
///
/// `BUF` bounds both outgoing `PUBLISH` frames and incoming frames; control
/// frames use a fixed [`CONTROL_FRAME_CAPACITY`] buffer.
pub struct FramedSession<L, const BUF: usize = 512> {
    link: L,
    rx: [u8; BUF],
    tx: [u8; BUF],
    acked: bool,
    next_packet_id: u16,
    keep_alive: Duration,
    last_tx: Option<Instant>,
    last_poll: Option<Instant>,
}

impl<L: FrameLink, const BUF: usize> FramedSession<L, BUF> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            rx: [0; BUF],
            tx: [0; BUF],
            acked: false,
            next_packet_id: 1,
            keep_alive: Duration::from_secs(0),
            last_tx: None,
            last_poll: None,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        id
    }

    fn send_control<P: EncodePacket>(&mut self, packet: &P) -> Result<(), Error> {
        let mut buf = [0u8; CONTROL_FRAME_CAPACITY];
        let len = packet.encode(&mut buf)?;
        self.link.send(&buf[..len])?;
        self.last_tx = self.last_poll;
        Ok(())
    }

    fn keep_alive_due(&self, now: Instant) -> bool {
        if !self.acked || self.keep_alive.as_ticks() == 0 {
            return false;
        }
        match self.last_tx {
            Some(last) => has_elapsed(now, last, self.keep_alive / 2),
            None => true,
        }
    }
}

impl<L: FrameLink, const BUF: usize> Session for FramedSession<L, BUF> {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn link_up(&self) -> bool {
        self.link.link_up()
    }

    fn open(&mut self, host: &str, port: u16) -> Result<(), Error> {
        self.acked = false;
        if self.link.connect(host, port) {
            debug!("framed link open to {}:{}", host, port);
            Ok(())
        } else {
            Err(Error::LinkUnavailable)
        }
    }

    fn handshake(&mut self, credentials: &Credentials<'_>) -> Result<Handshake, Error> {
        self.keep_alive = Duration::from_secs(credentials.keep_alive_secs as u64);
        self.send_control(&Connect::new(
            credentials.client_id,
            credentials.username,
            credentials.password,
            credentials.keep_alive_secs,
        ))?;
        Ok(Handshake::Pending)
    }

    fn poll(
        &mut self,
        now: Instant,
        on_event: &mut dyn FnMut(SessionEvent<'_>),
    ) -> Result<(), Error> {
        self.last_poll = Some(now);
        if !self.link.is_connected() {
            self.acked = false;
            return Ok(());
        }

        for _ in 0..MAX_FRAMES_PER_POLL {
            let Self {
                link,
                rx,
                acked,
                last_tx,
                ..
            } = &mut *self;
            let Some(len) = link.recv(rx)? else {
                break;
            };
            let Some(frame) = rx.get(..len) else {
                on_event(SessionEvent::Malformed);
                continue;
            };
            for packet in FrameIter::new(frame) {
                match packet {
                    Ok(Incoming::ConnAck(ack)) => {
                        *acked = ack.reason_code.is_success();
                        *last_tx = Some(now);
                        on_event(SessionEvent::ConnAck(ack.reason_code));
                    }
                    Ok(Incoming::Publish(publish)) => on_event(SessionEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    }),
                    Ok(Incoming::SubAck(ack)) => on_event(SessionEvent::SubAck {
                        granted: ack.granted(),
                    }),
                    Ok(Incoming::PingResp) => trace!("pingresp"),
                    Ok(Incoming::Ignored(packet_type)) => {
                        trace!("ignoring packet type {}", packet_type)
                    }
                    Err(_) => on_event(SessionEvent::Malformed),
                }
            }
        }

        if self.keep_alive_due(now) {
            self.send_control(&PingReq)?;
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _retain: bool) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::TransportWriteFailed);
        }
        let len = Publish::new(topic, payload).encode(&mut self.tx)?;
        self.link.send(&self.tx[..len])?;
        self.last_tx = self.last_poll;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::TransportWriteFailed);
        }
        let packet_id = self.packet_id();
        self.send_control(&Subscribe::new(packet_id, topic))
    }

    fn is_connected(&self) -> bool {
        self.acked && self.link.is_connected()
    }

    fn stream_open(&self) -> bool {
        self.link.is_connected()
    }

    fn close(&mut self) {
        if self.link.is_connected() {
            if self.acked {
                let _ = self.send_control(&Disconnect);
            }
            self.link.disconnect();
        }
        self.acked = false;
        self.last_tx = None;
    }

    fn supports_retain(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::collections::VecDeque;
    use std::vec::Vec;

    use super::*;
    use crate::error::ConnectReasonCode;

    #[derive(Default)]
    struct MockLink {
        open: bool,
        refuse: bool,
        sent: Vec<Vec<u8>>,
        inbound: VecDeque<Vec<u8>>,
    }

    impl FrameLink for MockLink {
        fn connect(&mut self, _host: &str, _port: u16) -> bool {
            self.open = !self.refuse;
            self.open
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
            if !self.open {
                return Err(Error::TransportWriteFailed);
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
            match self.inbound.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(Some(frame.len()))
                }
                None => Ok(None),
            }
        }

        fn is_connected(&self) -> bool {
            self.open
        }

        fn disconnect(&mut self) {
            self.open = false;
        }
    }

    fn credentials() -> Credentials<'static> {
        Credentials {
            client_id: "vpin-1",
            username: "u",
            password: "p",
            keep_alive_secs: 60,
        }
    }

    fn collect(session: &mut FramedSession<MockLink, 256>, now: Instant) -> Vec<std::string::String> {
        let mut events = Vec::new();
        session
            .poll(now, &mut |event| events.push(std::format!("{event:?}")))
            .unwrap();
        events
    }

    fn connected_session() -> FramedSession<MockLink, 256> {
        let mut session = FramedSession::<_, 256>::new(MockLink::default());
        session.open("broker", 8884).unwrap();
        assert_eq!(session.handshake(&credentials()).unwrap(), Handshake::Pending);
        session.link_mut().inbound.push_back(std::vec![0x20, 0x02, 0x00, 0x00]);
        collect(&mut session, Instant::from_millis(0));
        assert!(session.is_connected());
        session
    }

    #[test]
    fn test_handshake_waits_for_connack() {
        let mut session = FramedSession::<_, 256>::new(MockLink::default());
        session.open("broker", 8884).unwrap();
        session.handshake(&credentials()).unwrap();

        assert_eq!(session.link().sent.len(), 1);
        assert_eq!(session.link().sent[0][0], 0x10);
        assert!(!session.is_connected());
        assert_eq!(
            session.subscribe("t"),
            Err(Error::TransportWriteFailed)
        );

        session.link_mut().inbound.push_back(std::vec![0x20, 0x02, 0x00, 0x00]);
        let mut acks = Vec::new();
        session
            .poll(Instant::from_millis(10), &mut |event| {
                if let SessionEvent::ConnAck(code) = event {
                    acks.push(code);
                }
            })
            .unwrap();
        assert_eq!(acks, [ConnectReasonCode::Success]);
        assert!(session.is_connected());
    }

    #[test]
    fn test_refused_connack_keeps_session_down() {
        let mut session = FramedSession::<_, 256>::new(MockLink::default());
        session.open("broker", 8884).unwrap();
        session.handshake(&credentials()).unwrap();
        session.link_mut().inbound.push_back(std::vec![0x20, 0x02, 0x00, 0x04]);
        let events = collect(&mut session, Instant::from_millis(0));
        assert_eq!(events, ["ConnAck(BadUserNameOrPassword)"]);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_open_failure_is_link_unavailable() {
        let mut session = FramedSession::<_, 256>::new(MockLink {
            refuse: true,
            ..MockLink::default()
        });
        assert_eq!(session.open("broker", 8884), Err(Error::LinkUnavailable));
    }

    #[test]
    fn test_subscribe_uses_increasing_packet_ids() {
        let mut session = connected_session();
        session.subscribe("a").unwrap();
        session.subscribe("b").unwrap();
        let sent = &session.link().sent;
        assert_eq!(sent[1][0], 0x82);
        assert_eq!(&sent[1][2..4], &[0x00, 0x01]);
        assert_eq!(&sent[2][2..4], &[0x00, 0x02]);
    }

    #[test]
    fn test_publish_ignores_retain_on_wire() {
        let mut session = connected_session();
        session.publish("a", b"1", true).unwrap();
        let frame = session.link().sent.last().unwrap().clone();
        assert_eq!(frame, [0x30, 0x04, 0x00, 0x01, b'a', b'1']);
        assert!(!session.supports_retain());
    }

    #[test]
    fn test_publish_over_capacity_is_rejected() {
        let mut session = connected_session();
        let payload = [b'x'; 300];
        assert!(matches!(
            session.publish("a", &payload, false),
            Err(Error::CapacityExceeded { capacity: 256, .. })
        ));
        // Only the CONNECT went out.
        assert_eq!(session.link().sent.len(), 1);
    }

    #[test]
    fn test_poll_delivers_messages_and_flags_malformed() {
        let mut session = connected_session();
        session
            .link_mut()
            .inbound
            .push_back(std::vec![0x30, 0x05, 0x00, 0x01, b'a', b'h', b'i']);
        session.link_mut().inbound.push_back(std::vec![0x30, 0x7F, 0x00]);
        session
            .link_mut()
            .inbound
            .push_back(std::vec![0x90, 0x03, 0x00, 0x01, 0x80]);
        let events = collect(&mut session, Instant::from_millis(100));
        assert_eq!(
            events,
            [
                "Message { topic: \"a\", payload: [104, 105] }",
                "Malformed",
                "SubAck { granted: false }",
            ]
        );
    }

    #[test]
    fn test_keep_alive_ping() {
        let mut session = connected_session();
        let sent_before = session.link().sent.len();
        collect(&mut session, Instant::from_secs(29));
        assert_eq!(session.link().sent.len(), sent_before);
        collect(&mut session, Instant::from_secs(30));
        assert_eq!(session.link().sent.last().unwrap(), &[0xC0, 0x00]);
    }

    #[test]
    fn test_close_sends_disconnect() {
        let mut session = connected_session();
        session.close();
        assert_eq!(session.link().sent.last().unwrap(), &[0xE0, 0x00]);
        assert!(!session.link().open);
        assert!(!session.is_connected());
    }
}
