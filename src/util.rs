//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT primitives from and to fixed byte
//! buffers: variable-byte integers (remaining length), big-endian `u16`
//! fields and 16-bit length-prefixed strings.

use crate::error::Error;

/// Largest value a four-byte variable-byte integer can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, Error> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let encoded_byte = *buf.get(*cursor + i).ok_or(Error::MalformedFrame)?;
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(Error::MalformedFrame);
        }
    }
    *cursor += i + 1;
    Ok(value)
}

/// Number of bytes `val` occupies as a variable-byte integer.
pub const fn variable_byte_integer_len(val: usize) -> usize {
    if val < 128 {
        1
    } else if val < 16_384 {
        2
    } else if val < 2_097_152 {
        3
    } else {
        4
    }
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    mut val: usize,
) -> Result<(), Error> {
    if val > MAX_REMAINING_LENGTH {
        return Err(Error::capacity(val, MAX_REMAINING_LENGTH));
    }
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        let len = buf.len();
        *buf
            .get_mut(*cursor)
            .ok_or(Error::capacity(*cursor + 1, len))? = encoded_byte;
        *cursor += 1;
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, Error> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(Error::MalformedFrame)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16`, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), Error> {
    let len = buf.len();
    buf.get_mut(*cursor..*cursor + 2)
        .ok_or(Error::capacity(*cursor + 2, len))?
        .copy_from_slice(&val.to_be_bytes());
    *cursor += 2;
    Ok(())
}

/// Reads a 16-bit length-prefixed byte string, advancing the cursor.
pub fn read_prefixed<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a [u8], Error> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(Error::MalformedFrame)?;
    *cursor += len;
    Ok(bytes)
}

/// Reads a 16-bit length-prefixed UTF-8 string, advancing the cursor.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, Error> {
    let bytes = read_prefixed(cursor, buf)?;
    core::str::from_utf8(bytes).map_err(|_| Error::MalformedFrame)
}

/// Writes a 16-bit length-prefixed byte string, advancing the cursor.
pub fn write_prefixed(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), Error> {
    if bytes.len() > u16::MAX as usize {
        return Err(Error::capacity(bytes.len(), u16::MAX as usize));
    }
    write_u16(cursor, buf, bytes.len() as u16)?;
    write_bytes(cursor, buf, bytes)
}

/// Copies raw bytes into the buffer, advancing the cursor.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), Error> {
    let len = buf.len();
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(Error::capacity(*cursor + bytes.len(), len))?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_byte_integer_boundaries() {
        for (val, expected) in [
            (0usize, &[0x00u8][..]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
        ] {
            let mut buf = [0u8; 4];
            let mut cursor = 0;
            write_variable_byte_integer(&mut cursor, &mut buf, val).unwrap();
            assert_eq!(&buf[..cursor], expected, "encoding {val}");
            assert_eq!(cursor, variable_byte_integer_len(val));

            let mut read_cursor = 0;
            assert_eq!(read_variable_byte_integer(&mut read_cursor, &buf).unwrap(), val);
            assert_eq!(read_cursor, cursor);
        }
    }

    #[test]
    fn test_variable_byte_integer_too_long() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut cursor = 0;
        assert_eq!(
            read_variable_byte_integer(&mut cursor, &buf),
            Err(Error::MalformedFrame)
        );
    }

    #[test]
    fn test_prefixed_string_truncated() {
        // Declares 5 bytes but only carries 2.
        let buf = [0x00, 0x05, b'a', b'b'];
        let mut cursor = 0;
        assert_eq!(read_utf8_string(&mut cursor, &buf), Err(Error::MalformedFrame));
    }

    #[test]
    fn test_write_prefixed_reports_capacity() {
        let mut buf = [0u8; 4];
        let mut cursor = 0;
        assert_eq!(
            write_prefixed(&mut cursor, &mut buf, b"abcd"),
            Err(Error::CapacityExceeded {
                needed: 6,
                capacity: 4
            })
        );
    }
}
