//! Typed values carried on virtual pins.
//!
//! Payloads travel as plain text. On the way in, [`Value::from_payload`]
//! classifies the text as boolean, integer, float or free text; every
//! accessor then coerces to the requested type without ever failing. On the
//! way out, [`ToPayload`] renders a value back into text.

use core::fmt::Write;

use heapless::String;

use crate::error::Error;

/// Capacity of an outgoing payload.
pub const MAX_PAYLOAD_LEN: usize = 256;
/// Capacity of a decoded text value, in UTF-8 bytes.
///
/// Every byte at or above `0x80` takes two bytes once decoded, so any
/// payload up to [`MAX_PAYLOAD_LEN`] always fits, as does plain ASCII up to
/// the default WebSocket frame size. Payloads that still do not fit are
/// rejected by [`Value::from_payload`].
pub const MAX_TEXT_LEN: usize = 2 * MAX_PAYLOAD_LEN;
/// Scratch space for a rendered number.
const SCALAR_LEN: usize = 24;

pub type Text = String<MAX_TEXT_LEN>;
pub type Payload = String<MAX_PAYLOAD_LEN>;

/// A decoded payload.
///
/// Exactly one variant holds the authoritative value. The `as_*` accessors
/// convert between variants with the same lossy rules the device firmware
/// has always used.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(Text),
}

impl Value {
    /// Classifies raw payload bytes.
    ///
    /// Bytes are read as Latin-1, so any byte sequence decodes. The first
    /// matching rule wins:
    ///
    /// 1. `"true"` / `"false"` become [`Value::Bool`].
    /// 2. An optional `-` followed by one or more digits becomes
    ///    [`Value::Int`], saturating at the `i32` bounds.
    /// 3. Text containing a `.` whose leading number is non-zero becomes
    ///    [`Value::Float`]. Text that reads as exactly zero (`"0.0"`) stays
    ///    text.
    /// 4. Anything else is kept verbatim as [`Value::Text`].
    ///
    /// The whole payload is classified. One whose decoded text exceeds
    /// [`MAX_TEXT_LEN`] is rejected with [`Error::CapacityExceeded`].
    pub fn from_payload(payload: &[u8]) -> Result<Self, Error> {
        let text = latin1_to_text(payload)?;
        let s = text.as_str();

        if s == "true" || s == "false" {
            return Ok(Value::Bool(s == "true"));
        }

        if let Some((negative, digits)) = integer_literal(s) {
            return Ok(Value::Int(parse_saturating(digits, negative)));
        }

        if s.contains('.') {
            let f = leading_float(s);
            if f != 0.0 {
                return Ok(Value::Float(f));
            }
        }

        Ok(Value::Text(text))
    }

    /// Builds a text value, failing if it does not fit.
    pub fn text(s: &str) -> Result<Self, Error> {
        let mut text = Text::new();
        text.push_str(s)
            .map_err(|_| Error::capacity(s.len(), MAX_TEXT_LEN))?;
        Ok(Value::Text(text))
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => s == "true" || s == "1",
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::Bool(b) => *b as i32,
            Value::Int(i) => *i,
            // `as` truncates toward zero and saturates.
            Value::Float(f) => *f as i32,
            Value::Text(s) => leading_int(s),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match self {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f32,
            Value::Float(f) => *f,
            Value::Text(s) => leading_float(s),
        }
    }

    /// Canonical text form: `"true"`/`"false"` for booleans, decimal for
    /// numbers, the text itself otherwise.
    pub fn as_text(&self) -> Text {
        let mut out = Text::new();
        match self {
            Value::Text(s) => {
                let _ = out.push_str(s);
            }
            // Numbers and booleans always fit in MAX_TEXT_LEN.
            other => {
                let _ = write_scalar(other, &mut out);
            }
        }
        out
    }

    /// Digital output level: `1` for high, `0` for low.
    ///
    /// Numbers are truncated to a byte, text is high only for `"true"` or
    /// `"1"`.
    pub fn as_level(&self) -> u8 {
        match self {
            Value::Bool(b) => *b as u8,
            Value::Int(i) => *i as u8,
            Value::Float(f) => *f as u8,
            Value::Text(s) => (s == "true" || s == "1") as u8,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

/// Renders a value as an outgoing payload.
pub trait ToPayload {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error>;
}

impl ToPayload for bool {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        push(out, if *self { "true" } else { "false" })
    }
}

impl ToPayload for i32 {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        push_scalar(out, format_args!("{}", self))
    }
}

impl ToPayload for f32 {
    // Debug formatting keeps a fractional part ("1.0"), so the receiver
    // classifies the payload as a float again.
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        push_scalar(out, format_args!("{:?}", self))
    }
}

impl ToPayload for str {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        push(out, self)
    }
}

impl ToPayload for Value {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        match self {
            Value::Bool(b) => b.write_payload(out),
            Value::Int(i) => i.write_payload(out),
            Value::Float(f) => f.write_payload(out),
            Value::Text(s) => push(out, s),
        }
    }
}

impl<T: ToPayload + ?Sized> ToPayload for &T {
    fn write_payload(&self, out: &mut Payload) -> Result<(), Error> {
        (**self).write_payload(out)
    }
}

fn push(out: &mut Payload, s: &str) -> Result<(), Error> {
    out.push_str(s)
        .map_err(|_| Error::capacity(out.len() + s.len(), MAX_PAYLOAD_LEN))
}

fn push_scalar(out: &mut Payload, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
    let mut scratch = String::<SCALAR_LEN>::new();
    scratch
        .write_fmt(args)
        .map_err(|_| Error::capacity(SCALAR_LEN + 1, SCALAR_LEN))?;
    push(out, &scratch)
}

fn write_scalar<const N: usize>(value: &Value, out: &mut String<N>) -> core::fmt::Result {
    match value {
        Value::Bool(b) => out.write_str(if *b { "true" } else { "false" }),
        Value::Int(i) => write!(out, "{}", i),
        Value::Float(f) => write!(out, "{:?}", f),
        Value::Text(s) => out.write_str(s),
    }
}

fn latin1_to_text(bytes: &[u8]) -> Result<Text, Error> {
    let needed = bytes.len() + bytes.iter().filter(|b| !b.is_ascii()).count();
    if needed > MAX_TEXT_LEN {
        return Err(Error::capacity(needed, MAX_TEXT_LEN));
    }
    let mut text = Text::new();
    for b in bytes {
        text.push(char::from(*b))
            .map_err(|_| Error::capacity(needed, MAX_TEXT_LEN))?;
    }
    Ok(text)
}

/// Splits `-?[0-9]+` into sign and digits.
fn integer_literal(s: &str) -> Option<(bool, &[u8])> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let digits = digits.as_bytes();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some((negative, digits))
}

fn parse_saturating(digits: &[u8], negative: bool) -> i32 {
    let limit = i32::MAX as i64 + 1;
    let mut acc: i64 = 0;
    for d in digits {
        acc = (acc * 10 + (d - b'0') as i64).min(limit);
    }
    let signed = if negative { -acc } else { acc };
    signed.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Leading integer of `s` after optional whitespace and sign, `0` if none.
fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    parse_saturating(&rest.as_bytes()[..end], negative)
}

/// Leading decimal number of `s` (sign, digits, fraction, exponent), `0.0`
/// if none.
fn leading_float(s: &str) -> f32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        let frac_start = end;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
        mantissa_digits += end - frac_start;
    }
    if mantissa_digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse::<f32>().unwrap_or(0.0)
}
