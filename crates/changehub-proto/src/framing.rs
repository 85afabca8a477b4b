//! Message framing utilities for the transport layer.
//!
//! Every frame is `[length (4 bytes LE)][payload][trailer (2 bytes)]`, where
//! `length` counts the whole frame: header, payload and trailer. The trailer
//! is always `\n\n` and carries no meaning on receive; it is written
//! bit-for-bit for wire compatibility.

use bytes::{Buf, Bytes, BytesMut};

use crate::Error;

/// Maximum frame size (16 MB plus framing), matching the BSON document limit.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024 + FRAME_OVERHEAD;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Fixed trailer appended to every frame.
pub const TRAILER: [u8; 2] = *b"\n\n";

/// Size of the trailer in bytes.
pub const TRAILER_SIZE: usize = TRAILER.len();

/// Bytes added around a payload.
pub const FRAME_OVERHEAD: usize = LENGTH_PREFIX_SIZE + TRAILER_SIZE;

/// Encode a payload as a frame.
///
/// Returns a new buffer containing `[length (4 bytes LE)][payload][\n\n]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let total = payload.len() + FRAME_OVERHEAD;
    if total > MAX_FRAME_SIZE {
        return Err(Error::InvalidFrame(format!(
            "frame size {} exceeds maximum {}",
            total, MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&TRAILER);
    Ok(frame)
}

/// Decode the total frame length from a 4-byte header.
pub fn decode_frame_length(header: &[u8; LENGTH_PREFIX_SIZE], max: usize) -> Result<usize, Error> {
    let len = u32::from_le_bytes(*header) as usize;
    if len < FRAME_OVERHEAD {
        return Err(Error::InvalidFrame(format!(
            "frame length {} shorter than header and trailer",
            len
        )));
    }
    if len > max {
        return Err(Error::InvalidFrame(format!(
            "frame length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(len)
}

/// Extract the payload from a complete frame.
///
/// Bytes past the declared length are ignored.
pub fn extract_payload(frame: &[u8]) -> Result<&[u8], Error> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(Error::InvalidFrame("frame too short".to_string()));
    }

    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    header.copy_from_slice(&frame[..LENGTH_PREFIX_SIZE]);
    let total = decode_frame_length(&header, MAX_FRAME_SIZE)?;

    if frame.len() < total {
        return Err(Error::InvalidFrame(format!(
            "frame incomplete: have {}, need {}",
            frame.len(),
            total
        )));
    }

    Ok(&frame[LENGTH_PREFIX_SIZE..total - TRAILER_SIZE])
}

/// Accumulates bytes from a socket and yields complete frame payloads.
///
/// Surplus bytes belonging to the next frame stay buffered.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder accepting frames up to [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size: max_frame_size.max(FRAME_OVERHEAD),
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Mutable access to the receive buffer, for `read_buf` style reads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. after the socket was replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Pop the next complete payload, if one is buffered.
    pub fn next_payload(&mut self) -> Result<Option<Bytes>, Error> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        header.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
        let total = decode_frame_length(&header, self.max_frame_size)?;

        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total);
        frame.advance(LENGTH_PREFIX_SIZE);
        frame.truncate(total - FRAME_OVERHEAD);
        Ok(Some(frame.freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
