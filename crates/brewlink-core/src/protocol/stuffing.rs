//! Character stuffing and frame delimiters.
//!
//! Reserved control bytes must never appear between the delimiters, so every
//! reserved byte `b` is sent as the pair `[SHIFT, b ^ SHIFT_XOR]`.  The
//! receiver reverses this by XOR-ing the byte that follows each `SHIFT`.
//!
//! The reserved set is `0x00..=0x04`, `0x0A` (LF), `0x0D` (CR), `0x10`
//! (the shift marker itself) and `0x17` (ETB).

use crate::protocol::error::FrameError;

/// Start of header: first byte of every telegram.
pub const SOH: u8 = 0x01;
/// End of transmission: last byte of every telegram.
pub const EOT: u8 = 0x04;
/// End of transmit block; reserved but unused as a delimiter.
pub const ETB: u8 = 0x17;
/// Line feed; reserved.
pub const LF: u8 = 0x0A;
/// Carriage return; reserved.
pub const CR: u8 = 0x0D;
/// Shift marker: the next byte is XOR-ed with [`SHIFT_XOR`].
pub const SHIFT: u8 = 0x10;
/// Value XOR-ed into a shifted byte.
pub const SHIFT_XOR: u8 = 0x40;

/// Returns `true` if `byte` must be escaped inside a telegram.
pub const fn is_reserved(byte: u8) -> bool {
    matches!(byte, 0x00..=EOT | LF | CR | SHIFT | ETB)
}

/// Escapes every reserved byte of `data`, appending the result to `out`.
pub fn stuff_into(data: &[u8], out: &mut Vec<u8>) {
    for &byte in data {
        if is_reserved(byte) {
            out.push(SHIFT);
            out.push(byte ^ SHIFT_XOR);
        } else {
            out.push(byte);
        }
    }
}

/// Escapes every reserved byte of `data`.
///
/// The result is never shorter than the input.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 4);
    stuff_into(data, &mut out);
    out
}

/// Reverses [`stuff`].
///
/// # Errors
///
/// Returns [`FrameError::DanglingShift`] when `data` ends with a shift byte.
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    match unstuff_partial(data) {
        (bytes, true) => Ok(bytes),
        (_, false) => Err(FrameError::DanglingShift),
    }
}

/// Unstuffs as much of `data` as possible.
///
/// The flag is `false` if a trailing shift byte had to be dropped.
pub(crate) fn unstuff_partial(data: &[u8]) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte == SHIFT {
            match bytes.next() {
                Some(&shifted) => out.push(shifted ^ SHIFT_XOR),
                None => return (out, false),
            }
        } else {
            out.push(byte);
        }
    }
    (out, true)
}

/// Wraps unstuffed telegram bytes into the wire form `SOH + stuffed + EOT`.
pub fn wrap(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2 + 2);
    out.push(SOH);
    stuff_into(data, &mut out);
    out.push(EOT);
    out
}

/// Returns the stuffed bytes between the delimiters of a raw frame.
///
/// # Errors
///
/// Returns [`FrameError::MissingDelimiters`] unless `raw` starts with `SOH`
/// and ends with `EOT`.
pub fn strip_delimiters(raw: &[u8]) -> Result<&[u8], FrameError> {
    match raw {
        [SOH, inner @ .., EOT] => Ok(inner),
        _ => Err(FrameError::MissingDelimiters),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn mostly_reserved() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            prop_oneof![
                3 => prop::sample::select(vec![0x00u8, 0x01, 0x02, 0x03, 0x04, 0x0A, 0x0D, 0x10, 0x17]),
                1 => any::<u8>(),
            ],
            0..256,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn stuffing_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let stuffed = stuff(&data);
            prop_assert!(stuffed.len() >= data.len());
            prop_assert_eq!(unstuff(&stuffed).unwrap(), data);
        }

        #[test]
        fn stuffing_roundtrip_reserved_heavy(data in mostly_reserved()) {
            let stuffed = stuff(&data);
            prop_assert!(!stuffed.contains(&SOH));
            prop_assert!(!stuffed.contains(&EOT));
            prop_assert_eq!(unstuff(&stuffed).unwrap(), data);
        }
    }
}
