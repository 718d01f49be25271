//! The base-91 textual encoding used by compressed positions.

use crate::{Error, Result};

/// Lowest character value used by the encoding (`!`).
pub const BYTE_VALUE_OFFSET: u8 = 33;
/// Radix of the encoding.
pub const BYTE_VALUE_RADIX: u64 = 91;

/// Encode `value` as `length` base-91 characters.
#[must_use]
pub fn compress(value: u64, length: usize) -> String {
    let mut out = vec![0u8; length];
    let mut value = value;
    for slot in out.iter_mut().rev() {
        *slot = (value % BYTE_VALUE_RADIX) as u8 + BYTE_VALUE_OFFSET;
        value /= BYTE_VALUE_RADIX;
    }
    out.into_iter().map(char::from).collect()
}

/// Decode a base-91 character sequence.
pub fn decompress(value: &str) -> Result<u64> {
    let mut out = 0u64;
    for c in value.chars() {
        let c = u32::from(c);
        if !(u32::from(BYTE_VALUE_OFFSET)..u32::from(BYTE_VALUE_OFFSET) + 91).contains(&c) {
            return Err(Error::InvalidAprs(format!(
                "invalid base-91 character {c:#x}"
            )));
        }
        out = out * BYTE_VALUE_RADIX + u64::from(c - u32::from(BYTE_VALUE_OFFSET));
    }
    Ok(out)
}
