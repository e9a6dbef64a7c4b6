//! Prefix integer representation (RFC 7541 Section 5.1).

use bytes::{BufMut, BytesMut};

use crate::error::{H2Error, Result};

/// Encode `value` with an N-bit prefix; `flags` supplies the high bits of the
/// first byte that are not part of the prefix.
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let max_first = (1usize << prefix_bits) - 1;

    if value < max_first {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | max_first as u8);
    let mut remaining = value - max_first;
    while remaining >= 128 {
        dst.put_u8((remaining & 0x7f) as u8 | 0x80);
        remaining >>= 7;
    }
    dst.put_u8(remaining as u8);
}

/// Decode an N-bit prefix integer from the front of `src`, advancing it.
pub fn decode_integer(src: &mut &[u8], prefix_bits: u8) -> Result<usize> {
    let (&first, rest) = src
        .split_first()
        .ok_or_else(|| H2Error::compression("unexpected end of integer"))?;
    *src = rest;

    let max_first = (1usize << prefix_bits) - 1;
    let first = first as usize & max_first;
    if first < max_first {
        return Ok(first);
    }

    let mut value = max_first;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = src
            .split_first()
            .ok_or_else(|| H2Error::compression("unexpected end of integer"))?;
        *src = rest;

        // Five continuation bytes already cover 2^35; anything longer is hostile.
        if shift > 28 {
            return Err(H2Error::compression("integer too large"));
        }

        let increment = ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .ok_or_else(|| H2Error::compression("integer overflow in shift"))?;
        value = value
            .checked_add(increment)
            .ok_or_else(|| H2Error::compression("integer overflow in addition"))?;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}
