use bytes::{Buf, BufMut};
use std::io::Cursor;

/// Failures while decoding a prefix integer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntegerError {
    /// The value does not fit the bound the caller imposed (64 bits, or 32
    /// bits via [`decode_int_u32`]).
    Overflow,
    /// The buffer ended mid-integer.
    Underflow,
}

/// Encodes `value` as an HPACK prefix integer with `prefix_bits` available in
/// the first octet, which already carries the representation's pattern bits in
/// `first_byte`.
pub fn encode_int<B: BufMut>(value: u64, prefix_bits: u8, first_byte: u8, dst: &mut B) {
    debug_assert!((1..=8).contains(&prefix_bits));

    let mask = if prefix_bits == 8 {
        0xff
    } else {
        (1u8 << prefix_bits) - 1
    };

    if value < mask as u64 {
        dst.put_u8(first_byte | value as u8);
        return;
    }

    dst.put_u8(first_byte | mask);

    let mut rem = value - mask as u64;

    while rem >= 128 {
        dst.put_u8(0b1000_0000 | (rem & 0x7f) as u8);
        rem >>= 7;
    }

    dst.put_u8(rem as u8);
}

/// Decodes an HPACK prefix integer. On any failure the cursor position is
/// restored, so retrying the same bytes reproduces the same error.
pub fn decode_int<T: AsRef<[u8]>>(
    buf: &mut Cursor<T>,
    prefix_bits: u8,
) -> Result<u64, IntegerError> {
    let start = buf.position();

    match decode_inner(buf, prefix_bits) {
        Ok(value) => Ok(value),
        Err(e) => {
            buf.set_position(start);
            Err(e)
        }
    }
}

/// Decodes a prefix integer that must fit 32 bits, as required for stream
/// ids, window increments and settings values referenced from header blocks.
pub fn decode_int_u32<T: AsRef<[u8]>>(
    buf: &mut Cursor<T>,
    prefix_bits: u8,
) -> Result<u32, IntegerError> {
    let start = buf.position();
    let value = decode_int(buf, prefix_bits)?;

    u32::try_from(value).map_err(|_| {
        buf.set_position(start);
        IntegerError::Overflow
    })
}

fn decode_inner<T: AsRef<[u8]>>(buf: &mut Cursor<T>, prefix_bits: u8) -> Result<u64, IntegerError> {
    debug_assert!((1..=8).contains(&prefix_bits));

    const VARINT_MASK: u8 = 0b0111_1111;
    const VARINT_FLAG: u8 = 0b1000_0000;

    if !buf.has_remaining() {
        return Err(IntegerError::Underflow);
    }

    let mask = if prefix_bits == 8 {
        0xff
    } else {
        (1u8 << prefix_bits) - 1
    };

    let mut value = (buf.get_u8() & mask) as u64;

    if value < mask as u64 {
        return Ok(value);
    }

    let mut shift: u32 = 0;

    loop {
        if !buf.has_remaining() {
            return Err(IntegerError::Underflow);
        }

        let byte = buf.get_u8();

        value = 1u64
            .checked_shl(shift)
            .and_then(|base| base.checked_mul((byte & VARINT_MASK) as u64))
            .and_then(|add| value.checked_add(add))
            .ok_or(IntegerError::Overflow)?;

        if byte & VARINT_FLAG == 0 {
            return Ok(value);
        }

        shift += 7;

        // Ten continuation octets saturate 64 bits.
        if shift > 63 {
            return Err(IntegerError::Overflow);
        }
    }
}
