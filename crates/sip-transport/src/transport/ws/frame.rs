//! WebSocket frame encoding and decoding (RFC 6455 §5)
//!
//! No I/O happens here. [`decode`] works on whatever bytes have been buffered
//! so far and reports `Ok(None)` until a whole frame is available.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// Largest payload that fits in the 7-bit length field
const SMALL_PAYLOAD_MAX: usize = 125;
// Largest payload that fits in the 16-bit extended length field
const MEDIUM_PAYLOAD_MAX: usize = 65_535;

const LEN_16_MARKER: u8 = 126;
const LEN_64_MARKER: u8 = 127;

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of the first header byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }
}

/// A decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Payload bytes
    pub payload: Bytes,
}

/// XOR `data` with the masking key, in place
///
/// Masking is its own inverse.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode a single client frame: FIN set, masked with a fresh random key
pub fn encode(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mask: [u8; 4] = rand::random();
    encode_frame(opcode, payload, true, Some(mask))
}

/// Encode a frame with explicit FIN flag and optional masking key
///
/// Servers send unmasked frames, so `mask` is `None` on that side.
pub fn encode_frame(opcode: OpCode, payload: &[u8], fin: bool, mask: Option<[u8; 4]>) -> Bytes {
    let mut buf = BytesMut::with_capacity(14 + payload.len());

    let mut b0 = opcode as u8;
    if fin {
        b0 |= 0x80;
    }
    buf.put_u8(b0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len <= SMALL_PAYLOAD_MAX {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= MEDIUM_PAYLOAD_MAX {
        buf.put_u8(mask_bit | LEN_16_MARKER);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | LEN_64_MARKER);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(mask) => {
            buf.put_slice(&mask);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], mask);
        }
        None => buf.put_slice(payload),
    }

    buf.freeze()
}

/// Try to decode one frame from the front of `buf`
///
/// Returns the frame and the number of bytes it occupied, `Ok(None)` when
/// more bytes are needed, or an error for input that can never become a
/// valid frame.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & 0x80 != 0;
    let raw_opcode = b0 & 0x0F;
    let opcode = OpCode::from_u8(raw_opcode).ok_or(Error::UnknownOpcode(raw_opcode))?;
    let masked = b1 & 0x80 != 0;

    let mut offset = 2;
    let declared_len: u64 = match b1 & 0x7F {
        LEN_16_MARKER => {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]);
            offset += 2;
            u64::from(len)
        }
        LEN_64_MARKER => {
            if buf.len() < offset + 8 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            offset += 8;
            let len = u64::from_be_bytes(raw);
            // the most significant bit must be 0
            if len & (1 << 63) != 0 {
                return Err(Error::PayloadTooLarge(len));
            }
            len
        }
        len => u64::from(len),
    };
    let len = usize::try_from(declared_len).map_err(|_| Error::PayloadTooLarge(declared_len))?;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = offset
        .checked_add(len)
        .ok_or(Error::PayloadTooLarge(declared_len))?;
    if buf.len() < end {
        return Ok(None);
    }

    let mut payload = BytesMut::from(&buf[offset..end]);
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        },
        end,
    )))
}

/// Build a close frame payload: 2-byte big-endian code and optional reason
pub fn close_payload(code: u16, reason: Option<&str>) -> Bytes {
    let reason = reason.unwrap_or_default();
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code);
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Parse a close frame payload into its status code and reason
///
/// The reason is dropped when it is empty or not valid UTF-8.
pub fn parse_close_payload(payload: &[u8]) -> (Option<u16>, Option<String>) {
    if payload.len() < 2 {
        return (None, None);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = std::str::from_utf8(&payload[2..])
        .ok()
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    (Some(code), reason)
}
