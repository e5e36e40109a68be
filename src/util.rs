//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers and length-prefixed strings.
//!
//! All helpers are bounds-checked: running off the end of a buffer is reported as
//! `MalformedPacket` when reading and `BufferTooSmall` when writing.

use crate::error::{MqttError, ProtocolError};
use crate::transport::ErrorPlaceHolder;

pub type CodecResult<T> = Result<T, MqttError<ErrorPlaceHolder>>;

const MALFORMED: MqttError<ErrorPlaceHolder> = MqttError::Protocol(ProtocolError::MalformedPacket);

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is the encoding MQTT uses for the "remaining length" of every packet.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> CodecResult<usize> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let encoded_byte = *buf.get(*cursor + i).ok_or(MALFORMED)?;
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(MALFORMED);
        }
    }
    *cursor += i + 1;
    Ok(value)
}

/// Writes a variable-byte integer to the start of `buf` and returns the byte count.
pub fn write_variable_byte_integer_len(buf: &mut [u8], mut val: usize) -> CodecResult<usize> {
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(MqttError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> CodecResult<u16> {
    let bytes = buf.get(*cursor..*cursor + 2).ok_or(MALFORMED)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> CodecResult<&'a str> {
    let len = read_u16(cursor, buf)? as usize;
    let s = core::str::from_utf8(buf.get(*cursor..*cursor + len).ok_or(MALFORMED)?)
        .map_err(|_| MqttError::Protocol(ProtocolError::InvalidUtf8String))?;
    *cursor += len;
    Ok(s)
}

/// Copies raw bytes into the buffer at the cursor, advancing it.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> CodecResult<()> {
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(MqttError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) at the cursor.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> CodecResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| MqttError::Protocol(ProtocolError::PayloadTooLarge))?;
    write_bytes(cursor, buf, &len.to_be_bytes())?;
    write_bytes(cursor, buf, s.as_bytes())
}

/// Finishes a packet whose body was written after a 5-byte reserved header.
///
/// The fixed header byte is stored at offset 0, the remaining length is encoded
/// right after it, and the body is moved down so the packet is contiguous.
/// Returns the total packet length.
pub fn finish_packet(buf: &mut [u8], header: u8, body_end: usize) -> CodecResult<usize> {
    let remaining_len = body_end - RESERVED_HEADER;
    *buf.first_mut().ok_or(MqttError::BufferTooSmall)? = header;
    let len_bytes = write_variable_byte_integer_len(
        buf.get_mut(1..RESERVED_HEADER).ok_or(MqttError::BufferTooSmall)?,
        remaining_len,
    )?;
    let header_len = 1 + len_bytes;
    buf.copy_within(RESERVED_HEADER..body_end, header_len);
    Ok(header_len + remaining_len)
}

/// Room kept in front of a packet body for the fixed header and remaining length.
pub const RESERVED_HEADER: usize = 5;

/// Returns the total length of the first complete packet in `buf`, if one is buffered.
pub fn frame_len(buf: &[u8]) -> CodecResult<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let mut cursor = 1;
    match read_variable_byte_integer(&mut cursor, buf) {
        Ok(remaining) => {
            let total = cursor + remaining;
            Ok((buf.len() >= total).then_some(total))
        }
        // The length field itself is still incomplete.
        Err(_) if buf.len() < 5 && buf[1..].iter().all(|b| b & 128 != 0) => Ok(None),
        Err(e) => Err(e),
    }
}
