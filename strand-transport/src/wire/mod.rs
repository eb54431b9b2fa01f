//! Frame format for stream transports.
//!
//! Frame layout: `[length:4][checksum:4][kind:1][payload:N]`
//!
//! - **length**: total frame size including the header (little-endian u32)
//! - **checksum**: CRC32C of (kind + payload)
//! - **kind**: one of [`FrameKind`]
//! - **payload**: frame body; for [`FrameKind::Close`] it is
//!   `[code:2 LE][reason utf-8]`
//!
//! Corrupted or truncated frames are protocol errors and end the connection;
//! there is no resynchronisation.

mod framed;

pub use framed::FramedTransport;

use strand_core::CloseFrame;

/// Header size: 4 (length) + 4 (checksum) + 1 (kind) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size (1MB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Frame kinds carried on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Connect-time metadata blob.
    Header = 0,
    /// Application payload.
    Data = 1,
    /// Keep-alive probe.
    Ping = 2,
    /// Keep-alive answer.
    Pong = 3,
    /// Orderly shutdown with code and reason.
    Close = 4,
}

impl FrameKind {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(FrameKind::Header),
            1 => Ok(FrameKind::Data),
            2 => Ok(FrameKind::Ping),
            3 => Ok(FrameKind::Pong),
            4 => Ok(FrameKind::Close),
            other => Err(WireError::UnknownKind { kind: other }),
        }
    }
}

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Payload exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Kind byte is not a known frame kind.
    #[error("unknown frame kind: {kind}")]
    UnknownKind {
        /// The raw kind byte.
        kind: u8,
    },

    /// Close frame payload is malformed.
    #[error("malformed close frame")]
    InvalidClosePayload,
}

fn compute_checksum(kind: FrameKind, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&[kind as u8]);
    crc32c::crc32c_append(crc, payload)
}

/// Encode one frame.
///
/// ```
/// use strand_transport::wire::{FrameKind, encode_frame, try_decode_frame};
///
/// let frame = encode_frame(FrameKind::Data, b"hello").expect("encode");
/// let (kind, payload, consumed) = try_decode_frame(&frame).expect("valid").expect("complete");
/// assert_eq!(kind, FrameKind::Data);
/// assert_eq!(payload, b"hello");
/// assert_eq!(consumed, frame.len());
/// ```
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let mut frame = Vec::with_capacity(total_length);
    frame.extend_from_slice(&(total_length as u32).to_le_bytes());
    frame.extend_from_slice(&compute_checksum(kind, payload).to_le_bytes());
    frame.push(kind as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Try to decode one frame from a buffer that may hold partial data.
///
/// - `Ok(Some((kind, payload, consumed)))` when a complete frame is present
/// - `Ok(None)` when more bytes are needed
/// - `Err` when the bytes are malformed
pub fn try_decode_frame(data: &[u8]) -> Result<Option<(FrameKind, Vec<u8>, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if (length as usize) < HEADER_SIZE || length as usize > HEADER_SIZE + MAX_PAYLOAD_SIZE {
        return Err(WireError::InvalidLength { length });
    }

    let expected_len = length as usize;
    if data.len() < expected_len {
        return Ok(None);
    }

    let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let kind = FrameKind::from_u8(data[8])?;
    let payload = &data[HEADER_SIZE..expected_len];

    let computed = compute_checksum(kind, payload);
    if computed != checksum {
        return Err(WireError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }

    Ok(Some((kind, payload.to_vec(), expected_len)))
}

/// Encode a close frame body: `[code:2 LE][reason]`.
pub fn encode_close_payload(frame: &CloseFrame) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + frame.reason.len());
    payload.extend_from_slice(&frame.code.to_le_bytes());
    payload.extend_from_slice(frame.reason.as_bytes());
    payload
}

/// Decode a close frame body.
pub fn decode_close_payload(payload: &[u8]) -> Result<CloseFrame, WireError> {
    if payload.len() < 2 {
        return Err(WireError::InvalidClosePayload);
    }
    let code = u16::from_le_bytes([payload[0], payload[1]]);
    let reason =
        std::str::from_utf8(&payload[2..]).map_err(|_| WireError::InvalidClosePayload)?;
    Ok(CloseFrame::new(code, reason))
}
