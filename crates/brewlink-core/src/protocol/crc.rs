//! CRC-16 over the unstuffed telegram bytes.
//!
//! The link uses the reflected CRC-16 polynomial x^16 + x^15 + x^2 + 1
//! (`0xA001` in reflected form) with an initial value of `0xFFFF` and no
//! final XOR.  The checksum is appended low byte first, which gives the
//! property the receiver relies on: running the CRC over a telegram that
//! already carries its two CRC bytes yields `0`.

/// Initial value of the running checksum.
pub const CRC_INIT: u16 = 0xFFFF;

/// Reflected form of x^16 + x^15 + x^2 + 1.
const POLYNOMIAL: u16 = 0xA001;

/// 256-entry lookup table, built at compile time.
pub static CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = i as u16;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 != 0 {
                (value >> 1) ^ POLYNOMIAL
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Computes the checksum of `data`.
///
/// # Examples
///
/// ```rust
/// use brewlink_core::protocol::crc::crc16;
///
/// let mut telegram = vec![0x00, 0x68, 0x07, 0x42, 0x41];
/// let crc = crc16(&telegram);
/// telegram.extend_from_slice(&crc.to_le_bytes());
/// assert_eq!(crc16(&telegram), 0);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC_INIT, |checksum, &byte| {
        (checksum >> 8) ^ CRC_TABLE[usize::from((checksum ^ u16::from(byte)) & 0x00FF)]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_known_entries() {
        assert_eq!(CRC_TABLE[0], 0x0000);
        assert_eq!(CRC_TABLE[1], 0xC0C1);
        assert_eq!(CRC_TABLE[2], 0xC181);
        assert_eq!(CRC_TABLE[128], 0xA001);
        assert_eq!(CRC_TABLE[255], 0x4040);
    }

    #[test]
    fn test_crc_of_check_string() {
        // Reference check value for this parameter set (init 0xFFFF, reflected, no xorout).
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc_of_empty_input_is_init() {
        assert_eq!(crc16(&[]), CRC_INIT);
    }

    #[test]
    fn test_appending_crc_low_byte_first_yields_zero() {
        // Arrange
        let mut data = vec![0x00, 0x00, 0x00, 0x42, 0x41, 0x01, 0x00, 0x00, 0x00, 0x00];

        // Act
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        // Assert
        assert_eq!(crc16(&data), 0);
    }

    #[test]
    fn test_appending_crc_high_byte_first_does_not_yield_zero() {
        let mut data = vec![0x10, 0x20, 0x30];
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        assert_ne!(crc16(&data), 0, "byte order of the CRC field matters");
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let mut data = b"brewlink telegram".to_vec();
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data[3] ^= 0x01;
        assert_ne!(crc16(&data), 0);
    }
}
