//! # brewlink-core
//!
//! Protocol library for the point-to-point serial link spoken by the brewer
//! controller.  It turns structured packets into byte-stuffed, CRC-protected
//! telegrams and back, and cuts an arbitrary byte stream into telegrams.
//!
//! This crate performs no I/O and spawns no threads.  The transmission state
//! machine, queues, and transports live in `brewlink-engine`.
//!
//! # Architecture overview
//!
//! A telegram on the wire looks like this:
//!
//! ```text
//! SOH | stuffed( header | [command | parameter | length | payload | CRC] ) | EOT
//! ```
//!
//! - **`protocol::crc`** – the CRC-16 checksum over the unstuffed bytes.
//! - **`protocol::stuffing`** – escaping of reserved control bytes so that
//!   `SOH` and `EOT` only ever appear as delimiters.
//! - **`protocol::packet`** – the decoded [`Packet`] and its [`Message`].
//! - **`protocol::codec`** – `Packet` to wire bytes and back.
//! - **`protocol::reassembler`** – buffers transport chunks and emits whole
//!   delimiter-bounded [`RawFrame`]s.
//! - **`protocol::sequence`** – the 8-bit wrapping sequence counter.

pub mod protocol;

pub use protocol::codec::{decode_frame, decode_packet, encode_frame, encode_packet};
pub use protocol::error::{FrameError, ProtocolError};
pub use protocol::packet::{Message, Packet, PacketKind};
pub use protocol::reassembler::{FrameReassembler, RawFrame};
pub use protocol::sequence::SequenceCounter;
