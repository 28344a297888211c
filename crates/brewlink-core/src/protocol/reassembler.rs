//! Cuts a transport byte stream into delimiter-bounded raw frames.
//!
//! The serial driver hands over bytes in whatever chunks it happens to read:
//! half a frame, three frames, or line noise followed by a frame.  The
//! [`FrameReassembler`] keeps at most one partial frame buffered and emits a
//! [`RawFrame`] for every `SOH ... EOT` span it completes.
//!
//! A partial frame that would grow past the configured maximum is thrown away
//! and the reassembler waits for the next `SOH`.

use tracing::debug;

use crate::protocol::codec;
use crate::protocol::error::FrameError;
use crate::protocol::packet::Packet;
use crate::protocol::stuffing::{EOT, SOH};

/// A complete frame as received, delimiters and stuffing still in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strips delimiters, reverts stuffing, and decodes the telegram.
    ///
    /// # Errors
    ///
    /// See [`codec::decode_frame`].
    pub fn decode(&self) -> Result<Packet, FrameError> {
        codec::decode_frame(&self.0)
    }
}

/// Accumulation buffer for a single partial frame.
///
/// # Examples
///
/// ```rust
/// use brewlink_core::FrameReassembler;
///
/// let mut reassembler = FrameReassembler::new(256);
/// assert!(reassembler.push(&[0xFF, 0x01, 0x00, 0x6A]).is_empty());
/// let frames = reassembler.push(&[0x00, 0x41, 0x42, 0x04]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].as_bytes(), &[0x01, 0x00, 0x6A, 0x00, 0x41, 0x42, 0x04]);
/// ```
#[derive(Debug)]
pub struct FrameReassembler {
    /// Bytes of the current partial frame.  Empty, or starts with `SOH`.
    buffer: Vec<u8>,
    max_frame_size: usize,
    dropped: u64,
}

impl FrameReassembler {
    /// Creates a reassembler that drops frames longer than `max_frame_size`
    /// bytes (delimiters included).
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_frame_size),
            max_frame_size,
            dropped: 0,
        }
    }

    /// Feeds one chunk from the transport and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            if self.buffer.is_empty() {
                match rest.iter().position(|&b| b == SOH) {
                    Some(start) => rest = &rest[start..],
                    None => break,
                }
            }

            match rest.iter().position(|&b| b == EOT) {
                Some(end) => {
                    let (head, tail) = rest.split_at(end + 1);
                    if self.buffer.len() + head.len() <= self.max_frame_size {
                        let mut frame = std::mem::take(&mut self.buffer);
                        frame.extend_from_slice(head);
                        frames.push(RawFrame(frame));
                    } else {
                        self.drop_partial();
                    }
                    rest = tail;
                }
                None => {
                    if self.buffer.len() + rest.len() <= self.max_frame_size {
                        self.buffer.extend_from_slice(rest);
                    } else {
                        self.drop_partial();
                    }
                    break;
                }
            }
        }

        frames
    }

    fn drop_partial(&mut self) {
        self.dropped += 1;
        debug!(
            error = %FrameError::Oversized { max: self.max_frame_size },
            buffered = self.buffer.len(),
            "dropping partial frame, waiting for next SOH"
        );
        self.buffer.clear();
    }

    /// Number of bytes held for the current partial frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Changes the frame limit.  A partial frame that no longer fits is dropped.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
        if self.buffer.len() > max_frame_size {
            self.drop_partial();
        }
    }

    /// Frames discarded for exceeding the limit since construction.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}
