use bytes::{Buf, Bytes};
use std::fmt;

use super::Error;

/// Strips the pad-length octet and trailing padding from a PADDED payload,
/// returning the pad length. The pad length counts against flow control, so
/// callers must retain it.
pub fn strip_padding(payload: &mut Bytes) -> Result<u8, Error> {
    let total = payload.len();

    // The pad-length octet plus the padding itself must leave room for the
    // payload proper.
    let pad_len = match payload.first() {
        Some(&declared) if (declared as usize) < total => declared,
        _ => return Err(Error::TooMuchPadding),
    };

    payload.advance(1);
    payload.truncate(total - 1 - pad_len as usize);

    Ok(pad_len)
}

/// Reads a big-endian u32 out of `src` at `offset`. Frame payloads carry
/// error codes, window increments and promised ids in this form.
pub(super) fn unpack_u32(src: &[u8], offset: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&src[offset..offset + 4]);
    u32::from_be_bytes(raw)
}

/// Renders a flag octet as `(0x5: END_HEADERS | END_STREAM)`, naming only the
/// bits that are set.
pub(super) fn fmt_flags(
    fmt: &mut fmt::Formatter<'_>,
    bits: u8,
    names: &[(bool, &str)],
) -> fmt::Result {
    write!(fmt, "({:#x}", bits)?;

    let mut sep = ": ";
    for &(set, name) in names {
        if set {
            write!(fmt, "{}{}", sep, name)?;
            sep = " | ";
        }
    }

    fmt.write_str(")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Error;

    #[test]
    fn strips_pad_length_and_trailer() {
        let mut payload = Bytes::from_static(&[2, b'h', b'i', 0, 0]);
        let pad = strip_padding(&mut payload).unwrap();
        assert_eq!(pad, 2);
        assert_eq!(&payload[..], b"hi");
    }

    #[test]
    fn zero_padding_is_legal() {
        let mut payload = Bytes::from_static(&[0, b'x']);
        assert_eq!(strip_padding(&mut payload).unwrap(), 0);
        assert_eq!(&payload[..], b"x");
    }

    #[test]
    fn pad_length_covering_payload_rejected() {
        let mut payload = Bytes::from_static(&[4, 0, 0, 0]);
        assert!(matches!(
            strip_padding(&mut payload),
            Err(Error::TooMuchPadding)
        ));

        let mut empty = Bytes::new();
        assert!(strip_padding(&mut empty).is_err());
    }

    #[test]
    fn unpack_u32_is_big_endian() {
        let raw = [0xff, 0x00, 0x00, 0x00, 0x01, 0xff];
        assert_eq!(unpack_u32(&raw, 1), 1);
        assert_eq!(unpack_u32(&raw, 0), 0xff00_0000);
    }

    #[test]
    fn flag_rendering() {
        struct Probe(u8);

        impl std::fmt::Debug for Probe {
            fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                fmt_flags(
                    fmt,
                    self.0,
                    &[(self.0 & 0x1 != 0, "END_STREAM"), (self.0 & 0x8 != 0, "PADDED")],
                )
            }
        }

        assert_eq!(format!("{:?}", Probe(0)), "(0x0)");
        assert_eq!(format!("{:?}", Probe(0x1)), "(0x1: END_STREAM)");
        assert_eq!(format!("{:?}", Probe(0x9)), "(0x9: END_STREAM | PADDED)");
    }
}
