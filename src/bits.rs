//! Bit scans over the sector bitmaps.
//!
//! Bitmaps are stored least significant bit first: bit `n` lives in byte `n / 8` at position
//! `n % 8`. They are allocated in whole bytes, so every scan takes the logical bit length and
//! ignores the bits above it, which are left in their erased state.

/// Number of bytes needed to store `bits` bits.
#[inline]
pub(crate) const fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Returns `byte` with all bits at positions `>= valid` cleared.
#[inline]
fn mask_tail(byte: u8, valid: usize) -> u8 {
    if valid >= 8 {
        byte
    } else {
        byte & ((1u8 << valid) - 1)
    }
}

/// Index of the lowest set bit below `bit_len`.
pub(crate) fn first_set_bit(bytes: &[u8], bit_len: usize) -> Option<usize> {
    let len = bytes_for_bits(bit_len).min(bytes.len());
    bytes[..len]
        .iter()
        .enumerate()
        .find_map(|(idx, &byte)| {
            let byte = mask_tail(byte, bit_len - idx * 8);
            (byte != 0).then(|| idx * 8 + byte.trailing_zeros() as usize)
        })
}

/// Index of the highest set bit below `bit_len`.
pub(crate) fn last_set_bit(bytes: &[u8], bit_len: usize) -> Option<usize> {
    let len = bytes_for_bits(bit_len).min(bytes.len());
    bytes[..len]
        .iter()
        .enumerate()
        .rev()
        .find_map(|(idx, &byte)| {
            let byte = mask_tail(byte, bit_len - idx * 8);
            (byte != 0).then(|| idx * 8 + 7 - byte.leading_zeros() as usize)
        })
}

pub(crate) fn count_set_bits(bytes: &[u8], bit_len: usize) -> usize {
    let len = bytes_for_bits(bit_len).min(bytes.len());
    bytes[..len]
        .iter()
        .enumerate()
        .map(|(idx, &byte)| mask_tail(byte, bit_len - idx * 8).count_ones() as usize)
        .sum()
}
