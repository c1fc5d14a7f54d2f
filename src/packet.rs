//! # MQTT Packet Structures and Serialization
//!
//! A minimal MQTT 3.1.1 subset for transports that carry raw bytes and know
//! nothing about MQTT (e.g. a WebSocket carrying binary frames). Only what a
//! QoS 0 device session needs is here: `CONNECT`, `PUBLISH`, `SUBSCRIBE`,
//! `PINGREQ` and `DISCONNECT` are encoded; `CONNACK`, `PUBLISH`, `SUBACK` and
//! `PINGRESP` are decoded.
//!
//! Every encoder writes into a caller-provided fixed buffer and checks the
//! full frame size up front. A frame that does not fit yields
//! [`Error::CapacityExceeded`]; nothing is ever truncated.
//!
//! `PUBLISH` frames are always sent at QoS 0 with neither DUP nor RETAIN set.

use heapless::Vec;

use crate::error::{ConnectReasonCode, Error};
use crate::util::{
    read_u16, read_utf8_string, read_variable_byte_integer,
    variable_byte_integer_len, write_bytes, write_prefixed, write_u16,
    write_variable_byte_integer,
};

/// Protocol name carried in `CONNECT`.
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;
/// Buffer size used for control frames (`CONNECT`, `SUBSCRIBE`, ...).
pub const CONTROL_FRAME_CAPACITY: usize = 128;

const CONNECT: u8 = 0x10;
const PUBLISH: u8 = 0x30;
const SUBSCRIBE: u8 = 0x82;
const PINGREQ: u8 = 0xC0;
const DISCONNECT: u8 = 0xE0;

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// A packet that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Length of the variable header plus payload.
    fn remaining_len(&self) -> usize;

    /// Writes everything after the fixed header.
    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), Error>;

    /// First byte of the fixed header.
    fn header(&self) -> u8;

    /// Total encoded size, fixed header included.
    fn encoded_len(&self) -> usize {
        let remaining = self.remaining_len();
        1 + variable_byte_integer_len(remaining) + remaining
    }

    /// Encodes the whole frame into `buf`, returning the number of bytes
    /// written.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let total = self.encoded_len();
        if total > buf.len() {
            return Err(Error::capacity(total, buf.len()));
        }
        buf[0] = self.header();
        let mut cursor = 1;
        write_variable_byte_integer(&mut cursor, buf, self.remaining_len())?;
        self.encode_body(&mut cursor, buf)?;
        debug_assert_eq!(cursor, total);
        Ok(cursor)
    }
}

/// A packet that can be decoded from a complete frame.
pub trait DecodePacket<'a>: Sized {
    /// `buf` holds exactly one packet, fixed header included.
    fn decode(buf: &'a [u8]) -> Result<Self, Error>;
}

// --- CONNECT Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub keep_alive: u16,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, username: &'a str, password: &'a str, keep_alive: u16) -> Self {
        Self {
            client_id,
            username,
            password,
            keep_alive,
        }
    }
}

impl EncodePacket for Connect<'_> {
    fn header(&self) -> u8 {
        CONNECT
    }

    fn remaining_len(&self) -> usize {
        // name + level + flags + keep-alive, then the three strings
        (2 + PROTOCOL_NAME.len())
            + 1
            + 1
            + 2
            + (2 + self.client_id.len())
            + (2 + self.username.len())
            + (2 + self.password.len())
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), Error> {
        write_prefixed(cursor, buf, PROTOCOL_NAME.as_bytes())?;
        write_bytes(
            cursor,
            buf,
            &[
                PROTOCOL_LEVEL,
                FLAG_USERNAME | FLAG_PASSWORD | FLAG_CLEAN_SESSION,
            ],
        )?;
        write_u16(cursor, buf, self.keep_alive)?;
        write_prefixed(cursor, buf, self.client_id.as_bytes())?;
        write_prefixed(cursor, buf, self.username.as_bytes())?;
        write_prefixed(cursor, buf, self.password.as_bytes())
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: ConnectReasonCode,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> Result<Self, Error> {
        match buf {
            [_, 2, flags, code] => Ok(Self {
                session_present: flags & 0x01 != 0,
                reason_code: ConnectReasonCode::from(*code),
            }),
            _ => Err(Error::MalformedFrame),
        }
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    /// Set by the broker on delivery of a retained message. Never encoded.
    pub retained: bool,
}

impl<'a> Publish<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            retained: false,
        }
    }
}

impl EncodePacket for Publish<'_> {
    fn header(&self) -> u8 {
        PUBLISH
    }

    fn remaining_len(&self) -> usize {
        2 + self.topic.len() + self.payload.len()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), Error> {
        write_prefixed(cursor, buf, self.topic.as_bytes())?;
        write_bytes(cursor, buf, self.payload)
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, Error> {
        let flags = buf.first().ok_or(Error::MalformedFrame)? & 0x0F;
        let qos = (flags >> 1) & 0x03;
        if qos == 3 {
            return Err(Error::MalformedFrame);
        }

        let mut cursor = 1;
        let remaining = read_variable_byte_integer(&mut cursor, buf)?;
        if cursor + remaining != buf.len() {
            return Err(Error::MalformedFrame);
        }

        let topic = read_utf8_string(&mut cursor, buf)?;
        if qos > 0 {
            // Packet identifier; we never acknowledge, so it is skipped.
            read_u16(&mut cursor, buf)?;
        }

        Ok(Publish {
            topic,
            payload: &buf[cursor..],
            retained: flags & 0x01 != 0,
        })
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
}

impl<'a> Subscribe<'a> {
    pub fn new(packet_id: u16, topic: &'a str) -> Self {
        Self { packet_id, topic }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn header(&self) -> u8 {
        SUBSCRIBE
    }

    fn remaining_len(&self) -> usize {
        2 + 2 + self.topic.len() + 1
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), Error> {
        write_u16(cursor, buf, self.packet_id)?;
        write_prefixed(cursor, buf, self.topic.as_bytes())?;
        // Requested QoS
        write_bytes(cursor, buf, &[0x00])
    }
}

// --- SUBACK Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, 8>,
}

impl SubAck {
    /// `false` if the broker rejected any of the requested filters.
    pub fn granted(&self) -> bool {
        self.return_codes.iter().all(|code| *code < 0x80)
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut cursor = 1;
        let remaining = read_variable_byte_integer(&mut cursor, buf)?;
        if remaining < 3 || cursor + remaining != buf.len() {
            return Err(Error::MalformedFrame);
        }
        let packet_id = read_u16(&mut cursor, buf)?;
        let mut return_codes = Vec::new();
        for code in &buf[cursor..] {
            // Only ever one filter per SUBSCRIBE; extra codes are ignored.
            let _ = return_codes.push(*code);
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn header(&self) -> u8 {
        PINGREQ
    }

    fn remaining_len(&self) -> usize {
        0
    }

    fn encode_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> Result<(), Error> {
        Ok(())
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn header(&self) -> u8 {
        DISCONNECT
    }

    fn remaining_len(&self) -> usize {
        0
    }

    fn encode_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> Result<(), Error> {
        Ok(())
    }
}

/// An incoming packet, as far as the client cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    SubAck(SubAck),
    PingResp,
    /// Any other packet type; carries the type nibble.
    Ignored(u8),
}

/// Decodes the packet at the start of `buf`.
///
/// Returns the packet and the number of bytes it occupied, so that several
/// packets coalesced into one frame can be walked with [`FrameIter`].
pub fn decode(buf: &[u8]) -> Result<(Incoming<'_>, usize), Error> {
    let first = *buf.first().ok_or(Error::MalformedFrame)?;
    let mut cursor = 1;
    let remaining = read_variable_byte_integer(&mut cursor, buf)?;
    let end = cursor + remaining;
    let packet = buf.get(..end).ok_or(Error::MalformedFrame)?;

    let incoming = match first >> 4 {
        2 => Incoming::ConnAck(ConnAck::decode(packet)?),
        3 => Incoming::Publish(Publish::decode(packet)?),
        9 => Incoming::SubAck(SubAck::decode(packet)?),
        13 => Incoming::PingResp,
        other => Incoming::Ignored(other),
    };
    Ok((incoming, end))
}

/// Walks every packet in a received frame.
///
/// Stops after the first malformed packet, since the remainder of the frame
/// can no longer be delimited.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Incoming<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        match decode(self.buf) {
            Ok((packet, used)) => {
                self.buf = &self.buf[used..];
                Some(Ok(packet))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
