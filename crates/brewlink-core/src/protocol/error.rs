//! Error types shared by the codec, stuffer, and reassembler.

use thiserror::Error;

/// Errors raised while building a telegram from a [`crate::Packet`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload does not fit into the 16-bit length field.
    #[error("payload too large: {len} bytes exceeds the {max} byte length field")]
    PayloadTooLarge { len: usize, max: usize },

    /// A Data or Request packet was built without a command/parameter header.
    #[error("{0:?} packet has no message header")]
    MissingMessage(crate::PacketKind),
}

/// Errors raised while turning received bytes back into a packet.
///
/// None of these reach the application: a frame that fails here is logged
/// and dropped, and the stream resynchronises on the next start marker.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    /// The frame does not start with `SOH` and end with `EOT`.
    #[error("frame is not bounded by SOH/EOT delimiters")]
    MissingDelimiters,

    /// The frame ends with a shift byte that has no byte to modify.
    #[error("dangling shift byte at end of frame")]
    DanglingShift,

    /// The kind bits hold a value outside Data/Reserved/PositiveAck/NegativeAck/Request.
    #[error("unknown packet kind: {0}")]
    UnknownKind(u8),

    /// No end marker appeared before the buffered frame outgrew the limit.
    #[error("frame exceeds {max} bytes without an end marker")]
    Oversized { max: usize },
}
