//! The firmware format's non-standard rolling 32-bit checksum.
//!
//! Bytes are folded four at a time, little-endian, into an accumulator.
//! After every complete 4-byte group the accumulator is rotated left by 11
//! bits and carried into the next group as its baseline.  The final byte of
//! the declared range is never consumed — an off-by-one baked into the
//! vendor format that every on-disk CRC depends on, so it is reproduced
//! here exactly rather than fixed.

/// Checksum of a declared byte range.
///
/// Consumes `range.len() - 1` bytes (the last byte of the range is excluded
/// by the format).  Returns the accumulator of the last processed group;
/// ranges of fewer than two bytes checksum to 0.
pub fn checksum(range: &[u8]) -> u32 {
    let Some(body) = range.len().checked_sub(1).map(|n| &range[..n]) else {
        return 0;
    };

    let mut acc: u32 = 0;
    let mut carry: u32 = 0;
    for group in body.chunks(4) {
        acc = carry.wrapping_add(group[0] as u32);
        if let Some(&b) = group.get(1) {
            acc = acc.wrapping_add((b as u32) << 8);
        }
        if let Some(&b) = group.get(2) {
            acc = acc.wrapping_add((b as u32) << 16);
        }
        if let Some(&b) = group.get(3) {
            acc = acc.wrapping_add((b as u32) << 24);
            carry = acc.rotate_left(11);
        }
    }
    acc
}

/// True when `range` checksums to `expected`.
pub fn matches(range: &[u8], expected: u32) -> bool {
    checksum(range) == expected
}
