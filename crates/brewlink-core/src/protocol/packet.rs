//! Packet model for the brewer serial link.
//!
//! # Telegram layout
//!
//! ```text
//! Byte:  0    1    2   3   4   5   6    7    8    9    10..10+n  10+n  11+n
//! Name:  PIP  PIE  PN  SA  DA  MI  MP1  MP2  DL1  DL2  DATA[]    CRC1  CRC2
//! ```
//!
//! - `PIP`: parity (bits 6-7) and protocol version (bits 0-5).
//! - `PIE`: encrypted flag (bit 7), application port (bits 3-6), kind (bits 0-2).
//! - `PN`: sequence number, `SA`/`DA`: source and destination address.
//! - `MI`, `MP`: command id and 16-bit parameter, low byte first.
//! - `DL`: payload length, low byte first.
//! - `CRC`: CRC-16 over bytes `0..10+n`, low byte first.
//!
//! Acknowledgements (PositiveAck / NegativeAck) stop after `DA`.

use crate::protocol::codec;
use crate::protocol::error::ProtocolError;

/// Protocol version written into every outgoing packet.
pub const PROTOCOL_VERSION: u8 = 0;

/// Application port assigned to the machine API.
pub const API_PORT: u8 = 0x0D;

/// Default address of the host controller.
pub const DEFAULT_HOST_ADDRESS: u8 = 0x42;

/// Default address of the brewing machine.
pub const DEFAULT_MACHINE_ADDRESS: u8 = 0x41;

/// Command id of the status reply that carries the "just reset" flag.
pub const STATUS_COMMAND: u8 = 0x01;

/// Bit in the first payload byte of a status reply set after a machine restart.
pub const JUST_RESET_FLAG: u8 = 0x01;

/// Class of a packet, stored in bits 0-2 of the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// A command or a response to a request.
    Data = 0,
    /// Reserved for future use; dropped on receipt.
    Reserved = 1,
    /// Positive acknowledgement.
    PositiveAck = 2,
    /// Negative acknowledgement; the sender retransmits.
    NegativeAck = 3,
    /// A command that expects a Data response carrying the same sequence number.
    Request = 4,
}

impl PacketKind {
    /// Returns `true` for kinds that carry a message header, payload, and CRC.
    pub fn carries_message(self) -> bool {
        matches!(self, PacketKind::Data | PacketKind::Request)
    }

    /// Returns `true` for PositiveAck and NegativeAck.
    pub fn is_control(self) -> bool {
        matches!(self, PacketKind::PositiveAck | PacketKind::NegativeAck)
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketKind::Data),
            1 => Ok(PacketKind::Reserved),
            2 => Ok(PacketKind::PositiveAck),
            3 => Ok(PacketKind::NegativeAck),
            4 => Ok(PacketKind::Request),
            other => Err(other),
        }
    }
}

/// Command id plus its 16-bit parameter (`MI`, `MP1`, `MP2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Message {
    pub command: u8,
    pub parameter: u16,
}

impl Message {
    pub const fn new(command: u8, parameter: u16) -> Self {
        Self { command, parameter }
    }

    /// Builds a message whose parameter is a signed value.
    pub const fn with_signed(command: u8, parameter: i16) -> Self {
        Self {
            command,
            parameter: parameter as u16,
        }
    }

    /// The parameter reinterpreted as a signed value.
    pub const fn signed_parameter(&self) -> i16 {
        self.parameter as i16
    }
}

/// A decoded telegram, without delimiters and with stuffing reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Parity bits (2 bits on the wire).
    pub parity: u8,
    /// Protocol version (6 bits on the wire).
    pub version: u8,
    pub encrypted: bool,
    /// Application port (4 bits on the wire).
    pub app_port: u8,
    pub kind: PacketKind,
    pub sequence: u8,
    pub source: u8,
    pub destination: u8,
    /// Present for Data and Request packets only.
    pub message: Option<Message>,
    pub payload: Vec<u8>,
    /// Checksum of a Data or Request packet, as sent or as received.
    pub crc: Option<u16>,
    /// Set locally when a received frame was too short or failed its CRC.
    ///
    /// Never transmitted.
    pub fail: bool,
}

impl Packet {
    /// Builds a Data packet with the CRC already computed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if `payload` exceeds the
    /// 16-bit length field.
    pub fn data(
        source: u8,
        destination: u8,
        sequence: u8,
        message: Message,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        Self::with_message(PacketKind::Data, source, destination, sequence, message, payload)
    }

    /// Builds a Request packet with the CRC already computed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if `payload` exceeds the
    /// 16-bit length field.
    pub fn request(
        source: u8,
        destination: u8,
        sequence: u8,
        message: Message,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        Self::with_message(PacketKind::Request, source, destination, sequence, message, payload)
    }

    fn with_message(
        kind: PacketKind,
        source: u8,
        destination: u8,
        sequence: u8,
        message: Message,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        let mut packet = Self {
            parity: 0,
            version: PROTOCOL_VERSION,
            encrypted: false,
            app_port: API_PORT,
            kind,
            sequence,
            source,
            destination,
            message: Some(message),
            payload,
            crc: None,
            fail: false,
        };
        packet.seal()?;
        Ok(packet)
    }

    /// Builds a PositiveAck or NegativeAck answering `sequence`.
    pub fn acknowledgement(positive: bool, source: u8, destination: u8, sequence: u8) -> Self {
        Self {
            parity: 0,
            version: PROTOCOL_VERSION,
            encrypted: false,
            app_port: API_PORT,
            kind: if positive {
                PacketKind::PositiveAck
            } else {
                PacketKind::NegativeAck
            },
            sequence,
            source,
            destination,
            message: None,
            payload: Vec::new(),
            crc: None,
            fail: false,
        }
    }

    /// Recomputes [`Packet::crc`] after header or payload fields were changed.
    ///
    /// Acknowledgements carry no CRC and are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet cannot be encoded.
    pub fn seal(&mut self) -> Result<(), ProtocolError> {
        if self.kind.carries_message() {
            self.crc = Some(codec::checksum(self)?);
        }
        Ok(())
    }

    /// Number of payload bytes, as written into the length field.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for a status reply whose "just reset" flag is set.
    ///
    /// Such a packet means the machine restarted and both ends must start
    /// counting sequence numbers from zero again.
    pub fn is_reset_status(&self) -> bool {
        self.kind == PacketKind::Data
            && self.message.map(|m| m.command) == Some(STATUS_COMMAND)
            && self
                .payload
                .first()
                .is_some_and(|&flags| flags & JUST_RESET_FLAG == JUST_RESET_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_kind_try_from_all_values() {
        assert_eq!(PacketKind::try_from(0), Ok(PacketKind::Data));
        assert_eq!(PacketKind::try_from(1), Ok(PacketKind::Reserved));
        assert_eq!(PacketKind::try_from(2), Ok(PacketKind::PositiveAck));
        assert_eq!(PacketKind::try_from(3), Ok(PacketKind::NegativeAck));
        assert_eq!(PacketKind::try_from(4), Ok(PacketKind::Request));
        for invalid in 5..=7u8 {
            assert_eq!(PacketKind::try_from(invalid), Err(invalid));
        }
    }

    #[test]
    fn test_message_signed_parameter() {
        let message = Message::with_signed(0x02, -2);
        assert_eq!(message.parameter, 0xFFFE);
        assert_eq!(message.signed_parameter(), -2);
    }

    #[test]
    fn test_data_constructor_fills_defaults_and_crc() {
        // Arrange / Act
        let packet = Packet::data(0x42, 0x41, 7, Message::new(0x02, 5), vec![1, 2, 3]).unwrap();

        // Assert
        assert_eq!(packet.kind, PacketKind::Data);
        assert_eq!(packet.version, PROTOCOL_VERSION);
        assert_eq!(packet.app_port, API_PORT);
        assert!(!packet.encrypted);
        assert!(!packet.fail);
        assert!(packet.crc.is_some());
    }

    #[test]
    fn test_acknowledgement_has_no_message_or_crc() {
        let ack = Packet::acknowledgement(false, 0x42, 0x41, 9);
        assert_eq!(ack.kind, PacketKind::NegativeAck);
        assert_eq!(ack.sequence, 9);
        assert!(ack.message.is_none());
        assert!(ack.crc.is_none());
    }

    #[test]
    fn test_seal_tracks_payload_changes() {
        let mut packet = Packet::data(0x42, 0x41, 1, Message::new(0, 0), vec![]).unwrap();
        let before = packet.crc;
        packet.payload.push(0xAA);
        packet.seal().unwrap();
        assert_ne!(packet.crc, before);
    }

    #[test]
    fn test_reset_status_requires_flag_bit() {
        let reset =
            Packet::data(0x41, 0x42, 3, Message::new(STATUS_COMMAND, 0), vec![0x01, 0x00]).unwrap();
        let normal =
            Packet::data(0x41, 0x42, 3, Message::new(STATUS_COMMAND, 0), vec![0x02, 0x00]).unwrap();
        let empty = Packet::data(0x41, 0x42, 3, Message::new(STATUS_COMMAND, 0), vec![]).unwrap();
        let other_command =
            Packet::data(0x41, 0x42, 3, Message::new(0x02, 0), vec![0x01]).unwrap();

        assert!(reset.is_reset_status());
        assert!(!normal.is_reset_status());
        assert!(!empty.is_reset_status());
        assert!(!other_command.is_reset_status());
    }

    #[test]
    fn test_reset_status_ignores_requests() {
        let request =
            Packet::request(0x41, 0x42, 3, Message::new(STATUS_COMMAND, 0), vec![0x01]).unwrap();
        assert!(!request.is_reset_status());
    }
}
