//! Frame codec: [`Packet`] to wire bytes and back.
//!
//! Two representations are involved:
//!
//! - the *telegram*: header, optional message/payload and CRC, unstuffed;
//! - the *frame*: `SOH + stuffed(telegram) + EOT`, as it travels on the wire.
//!
//! Decoding never fails on a short telegram or a CRC mismatch.  The packet is
//! returned with [`Packet::fail`] set so the engine can answer with a negative
//! acknowledgement.

use crate::protocol::crc::crc16;
use crate::protocol::error::{FrameError, ProtocolError};
use crate::protocol::packet::{Message, Packet, PacketKind};
use crate::protocol::stuffing;

/// Bytes in the packet header (`PIP PIE PN SA DA`).
pub const PACKET_HEADER_LEN: usize = 5;
/// Bytes in the data header (`MI MP1 MP2 DL1 DL2`).
pub const DATA_HEADER_LEN: usize = 5;
/// Offset of the first payload byte.
pub const HEADER_LEN: usize = PACKET_HEADER_LEN + DATA_HEADER_LEN;
/// Bytes in the CRC field.
pub const CRC_LEN: usize = 2;
/// Telegram bytes that are not payload, for Data and Request packets.
pub const TELEGRAM_OVERHEAD: usize = HEADER_LEN + CRC_LEN;
/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `packet` into an unstuffed telegram, CRC included.
///
/// The CRC is always recomputed; [`Packet::crc`] is not consulted.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the payload is too large or a Data/Request
/// packet has no message.
///
/// # Examples
///
/// ```rust
/// use brewlink_core::{decode_packet, encode_packet, Message, Packet};
///
/// let packet = Packet::data(0x42, 0x41, 0, Message::new(0x01, 0), vec![]).unwrap();
/// let telegram = encode_packet(&packet).unwrap();
/// assert_eq!(&telegram[..10], &[0x00, 0x68, 0x00, 0x42, 0x41, 0x01, 0x00, 0x00, 0x00, 0x00]);
/// assert_eq!(decode_packet(&telegram).unwrap(), packet);
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = encode_body(packet)?;
    if packet.kind.carries_message() {
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
    }
    Ok(buf)
}

/// Encodes `packet` into its delimited, stuffed wire form.
///
/// # Errors
///
/// Same as [`encode_packet`].
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    Ok(stuffing::wrap(&encode_packet(packet)?))
}

/// Decodes an unstuffed telegram.
///
/// # Errors
///
/// Returns [`FrameError::UnknownKind`] when the kind bits are 5, 6, or 7.
/// Length and checksum problems set [`Packet::fail`] instead.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, FrameError> {
    let at = |index: usize| bytes.get(index).copied().unwrap_or(0);

    let pip = at(0);
    let pie = at(1);
    let kind = PacketKind::try_from(pie & 0x07).map_err(FrameError::UnknownKind)?;

    let mut packet = Packet {
        parity: pip >> 6,
        version: pip & 0x3F,
        encrypted: pie & 0x80 != 0,
        app_port: (pie >> 3) & 0x0F,
        kind,
        sequence: at(2),
        source: at(3),
        destination: at(4),
        message: None,
        payload: Vec::new(),
        crc: None,
        fail: bytes.len() < PACKET_HEADER_LEN,
    };

    if !kind.carries_message() {
        return Ok(packet);
    }

    packet.message = Some(Message::new(at(5), u16::from_le_bytes([at(6), at(7)])));

    if bytes.len() < TELEGRAM_OVERHEAD {
        packet.fail = true;
        return Ok(packet);
    }

    let declared = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
    let payload_end = HEADER_LEN + declared;
    let expected_len = payload_end + CRC_LEN;

    if bytes.len() < expected_len {
        packet.payload = bytes[HEADER_LEN..bytes.len().min(payload_end)].to_vec();
        packet.fail = true;
        return Ok(packet);
    }

    packet.payload = bytes[HEADER_LEN..payload_end].to_vec();
    packet.crc = Some(u16::from_le_bytes([
        bytes[payload_end],
        bytes[payload_end + 1],
    ]));
    // Trailing bytes past the CRC are covered too, so they fail the check.
    if crc16(bytes) != 0 || bytes.len() != expected_len {
        packet.fail = true;
    }
    Ok(packet)
}

/// Decodes a raw frame as cut by the reassembler (delimiters included).
///
/// A frame ending in a dangling shift byte decodes with [`Packet::fail`] set.
///
/// # Errors
///
/// Returns [`FrameError::MissingDelimiters`] if `raw` is not bounded by
/// `SOH`/`EOT`, and [`FrameError::UnknownKind`] for invalid kind bits.
pub fn decode_frame(raw: &[u8]) -> Result<Packet, FrameError> {
    let inner = stuffing::strip_delimiters(raw)?;
    let (telegram, complete) = stuffing::unstuff_partial(inner);
    let mut packet = decode_packet(&telegram)?;
    if !complete {
        packet.fail = true;
    }
    Ok(packet)
}

/// CRC that [`encode_packet`] would append to `packet`.
///
/// # Errors
///
/// Same as [`encode_packet`].
pub fn checksum(packet: &Packet) -> Result<u16, ProtocolError> {
    Ok(crc16(&encode_body(packet)?))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Header, message, and payload: everything the CRC covers.
fn encode_body(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(TELEGRAM_OVERHEAD + packet.payload.len());

    buf.push(((packet.parity & 0x03) << 6) | (packet.version & 0x3F));
    buf.push(
        (u8::from(packet.encrypted) << 7) | ((packet.app_port & 0x0F) << 3) | (packet.kind as u8 & 0x07),
    );
    buf.push(packet.sequence);
    buf.push(packet.source);
    buf.push(packet.destination);

    if !packet.kind.carries_message() {
        return Ok(buf);
    }

    let message = packet
        .message
        .ok_or(ProtocolError::MissingMessage(packet.kind))?;
    let len = u16::try_from(packet.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        len: packet.payload.len(),
        max: MAX_PAYLOAD_LEN,
    })?;

    buf.push(message.command);
    buf.extend_from_slice(&message.parameter.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&packet.payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::API_PORT;
    use crate::protocol::stuffing::{EOT, SOH};

    fn status_request() -> Packet {
        Packet::data(0x42, 0x41, 0, Message::new(0x01, 0), vec![]).unwrap()
    }

    #[test]
    fn test_encode_data_header_layout() {
        // Arrange
        let packet = Packet::data(0x42, 0x41, 0x07, Message::new(0x02, 0x1234), vec![0xAA, 0xBB])
            .unwrap();

        // Act
        let telegram = encode_packet(&packet).unwrap();

        // Assert
        assert_eq!(
            &telegram[..12],
            &[0x00, 0x68, 0x07, 0x42, 0x41, 0x02, 0x34, 0x12, 0x02, 0x00, 0xAA, 0xBB]
        );
        assert_eq!(telegram.len(), TELEGRAM_OVERHEAD + 2);
        assert_eq!(crc16(&telegram), 0);
    }

    #[test]
    fn test_encode_pie_byte_for_each_kind() {
        // API port 0xD << 3 == 0x68.
        let data = status_request();
        let mut request = data.clone();
        request.kind = PacketKind::Request;
        let ack = Packet::acknowledgement(true, 0x42, 0x41, 0);
        let nack = Packet::acknowledgement(false, 0x42, 0x41, 0);

        assert_eq!(encode_packet(&data).unwrap()[1], 0x68);
        assert_eq!(encode_packet(&request).unwrap()[1], 0x6C);
        assert_eq!(encode_packet(&ack).unwrap()[1], 0x6A);
        assert_eq!(encode_packet(&nack).unwrap()[1], 0x6B);
    }

    #[test]
    fn test_encode_parity_encrypted_and_version_bits() {
        let mut packet = status_request();
        packet.parity = 2;
        packet.version = 0x15;
        packet.encrypted = true;
        packet.app_port = 0x3;

        let telegram = encode_packet(&packet).unwrap();

        assert_eq!(telegram[0], 0x80 | 0x15);
        assert_eq!(telegram[1], 0x80 | (0x3 << 3));
    }

    #[test]
    fn test_encode_acknowledgement_is_header_only() {
        let ack = Packet::acknowledgement(true, 0x42, 0x41, 0x11);
        assert_eq!(encode_packet(&ack).unwrap(), vec![0x00, 0x6A, 0x11, 0x42, 0x41]);
    }

    #[test]
    fn test_encode_frame_wraps_and_stuffs() {
        // Scenario: GetStatus-style command from 0x42 to 0x41, sequence 0.
        let frame = encode_frame(&status_request()).unwrap();
        let telegram = encode_packet(&status_request()).unwrap();

        assert_eq!(frame.first(), Some(&SOH));
        assert_eq!(frame.last(), Some(&EOT));
        // 0x00 and 0x01 inside the telegram must be shifted.
        assert_eq!(&frame[1..3], &[0x10, 0x40]);
        assert_eq!(stuffing::unstuff(&frame[1..frame.len() - 1]).unwrap(), telegram);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut packet = status_request();
        packet.payload = vec![0; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_packet(&packet),
            Err(ProtocolError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_encode_rejects_data_without_message() {
        let mut packet = status_request();
        packet.message = None;
        assert_eq!(
            encode_packet(&packet),
            Err(ProtocolError::MissingMessage(PacketKind::Data))
        );
    }

    #[test]
    fn test_decode_recovers_every_field() {
        let mut packet =
            Packet::request(0x41, 0x42, 0xFE, Message::new(0x10, 0xBEEF), vec![0x01, 0x10, 0x7F])
                .unwrap();
        packet.parity = 1;
        packet.encrypted = true;
        packet.seal().unwrap();

        let decoded = decode_frame(&encode_frame(&packet).unwrap()).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.app_port, API_PORT);
    }

    #[test]
    fn test_decode_stuffed_soh_in_payload() {
        // Arrange: payload byte 0x01 travels as 10 41.
        let packet = Packet::data(0x41, 0x42, 3, Message::new(0x02, 0), vec![0x01]).unwrap();
        let frame = encode_frame(&packet).unwrap();
        assert!(frame.windows(2).any(|w| w == [0x10, 0x41]));

        // Act
        let decoded = decode_frame(&frame).unwrap();

        // Assert
        assert_eq!(decoded.payload, vec![0x01]);
        assert!(!decoded.fail);
    }

    #[test]
    fn test_decode_short_header_sets_fail() {
        let decoded = decode_packet(&[0x00, 0x68, 0x05]).unwrap();
        assert!(decoded.fail);
        assert_eq!(decoded.sequence, 5);
        assert_eq!(decoded.destination, 0);
    }

    #[test]
    fn test_decode_empty_frame_sets_fail() {
        let decoded = decode_frame(&[SOH, EOT]).unwrap();
        assert!(decoded.fail);
        assert_eq!(decoded.kind, PacketKind::Data);
    }

    #[test]
    fn test_decode_bad_crc_sets_fail_but_keeps_fields() {
        let mut telegram = encode_packet(&status_request()).unwrap();
        let last = telegram.len() - 1;
        telegram[last] ^= 0xFF;

        let decoded = decode_packet(&telegram).unwrap();

        assert!(decoded.fail);
        assert_eq!(decoded.source, 0x42);
        assert_eq!(decoded.message, Some(Message::new(0x01, 0)));
    }

    #[test]
    fn test_decode_truncated_payload_sets_fail() {
        let packet = Packet::data(0x41, 0x42, 3, Message::new(0x02, 0), vec![9; 8]).unwrap();
        let telegram = encode_packet(&packet).unwrap();

        let decoded = decode_packet(&telegram[..HEADER_LEN + 4]).unwrap();

        assert!(decoded.fail);
        assert_eq!(decoded.payload, vec![9; 4]);
        assert_eq!(decoded.crc, None);
    }

    #[test]
    fn test_decode_trailing_garbage_sets_fail() {
        let mut telegram = encode_packet(&status_request()).unwrap();
        telegram.push(0x55);
        assert!(decode_packet(&telegram).unwrap().fail);
    }

    #[test]
    fn test_decode_acknowledgement() {
        let decoded = decode_frame(&stuffing::wrap(&[0x00, 0x6A, 0x00, 0x41, 0x42])).unwrap();
        assert_eq!(decoded.kind, PacketKind::PositiveAck);
        assert_eq!(decoded.sequence, 0);
        assert_eq!(decoded.source, 0x41);
        assert_eq!(decoded.destination, 0x42);
        assert!(decoded.message.is_none());
        assert!(!decoded.fail);
    }

    #[test]
    fn test_decode_unknown_kind_is_error() {
        assert_eq!(
            decode_packet(&[0x00, 0x6D, 0x00, 0x41, 0x42]),
            Err(FrameError::UnknownKind(5))
        );
    }

    #[test]
    fn test_decode_dangling_shift_sets_fail() {
        let mut frame = encode_frame(&status_request()).unwrap();
        frame.insert(frame.len() - 1, stuffing::SHIFT);
        assert!(decode_frame(&frame).unwrap().fail);
    }

    #[test]
    fn test_decode_frame_requires_delimiters() {
        assert_eq!(
            decode_frame(&[0x00, 0x6A, 0x00, 0x41, 0x42]),
            Err(FrameError::MissingDelimiters)
        );
    }

    #[test]
    fn test_checksum_matches_encoded_trailer() {
        let packet = Packet::data(0x42, 0x41, 9, Message::new(0x03, 1), vec![4, 5, 6]).unwrap();
        let telegram = encode_packet(&packet).unwrap();
        let trailer = u16::from_le_bytes([telegram[telegram.len() - 2], telegram[telegram.len() - 1]]);
        assert_eq!(checksum(&packet).unwrap(), trailer);
        assert_eq!(packet.crc, Some(trailer));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_message_packet() -> impl Strategy<Value = Packet> {
        (
            0..=3u8,
            0..=0x3Fu8,
            any::<bool>(),
            0..=0x0Fu8,
            any::<bool>(),
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            any::<(u8, u16)>(),
            proptest::collection::vec(any::<u8>(), 0..=244),
        )
            .prop_map(
                |(parity, version, encrypted, app_port, request, sequence, source, destination, (command, parameter), payload)| {
                    let mut packet = Packet {
                        parity,
                        version,
                        encrypted,
                        app_port,
                        kind: if request { PacketKind::Request } else { PacketKind::Data },
                        sequence,
                        source,
                        destination,
                        message: Some(Message::new(command, parameter)),
                        payload,
                        crc: None,
                        fail: false,
                    };
                    packet.seal().expect("payload fits");
                    packet
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn frame_roundtrip(packet in any_message_packet()) {
            let frame = encode_frame(&packet).unwrap();
            prop_assert_eq!(decode_frame(&frame).unwrap(), packet);
        }

        #[test]
        fn encoded_telegram_passes_crc_self_check(packet in any_message_packet()) {
            let telegram = encode_packet(&packet).unwrap();
            prop_assert_eq!(crc16(&telegram), 0);
        }
    }
}
