//! Protocol module containing the packet model, framing, and checksums.

pub mod codec;
pub mod crc;
pub mod error;
pub mod packet;
pub mod reassembler;
pub mod sequence;
pub mod stuffing;

pub use codec::{decode_frame, decode_packet, encode_frame, encode_packet};
pub use error::{FrameError, ProtocolError};
pub use packet::*;
pub use reassembler::{FrameReassembler, RawFrame};
pub use sequence::SequenceCounter;
