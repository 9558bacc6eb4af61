//! Character helpers shared by both protocol versions.
//!
//! Hessian counts string lengths in UTF-16 code units and writes every unit as
//! a 1, 2 or 3 byte sequence. Supplementary characters therefore travel as two
//! 3-byte surrogate sequences.

use super::err::{Error, SerDeResult};

pub(crate) fn is_high_surrogate(unit: u16) -> bool {
    (0xd800..=0xdbff).contains(&unit)
}

/// Append the encoding of one UTF-16 unit.
pub(crate) fn push_unit(buffer: &mut Vec<u8>, unit: u16) {
    if unit < 0x80 {
        buffer.push(unit as u8);
    } else if unit < 0x800 {
        buffer.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
        buffer.push(0x80 | (unit & 0x3f) as u8);
    } else {
        buffer.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
        buffer.push(0x80 | ((unit >> 6) & 0x3f) as u8);
        buffer.push(0x80 | (unit & 0x3f) as u8);
    }
}

/// Decode one UTF-16 unit whose first byte has been read.
pub(crate) fn decode_unit<F>(first: u8, mut next: F) -> SerDeResult<u16>
where
    F: FnMut() -> SerDeResult<u8>,
{
    match first {
        0x00..=0x7f => Ok(first as u16),
        0xc0..=0xdf => {
            let b = next()?;
            Ok((((first & 0x1f) as u16) << 6) | (b & 0x3f) as u16)
        }
        0xe0..=0xef => {
            let b1 = next()?;
            let b2 = next()?;
            Ok((((first & 0x0f) as u16) << 12) | (((b1 & 0x3f) as u16) << 6) | (b2 & 0x3f) as u16)
        }
        _ => Err(Error::protocol(format!(
            "bad utf-8 encoding at 0x{:02x}",
            first
        ))),
    }
}

pub(crate) fn units_to_string(units: &[u16]) -> SerDeResult<String> {
    String::from_utf16(units).map_err(|e| Error::protocol(format!("bad utf-16 string: {}", e)))
}

/// Render bytes for error context, escaping anything non-printable.
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

/// Escape markup characters in text echoed back to a caller.
pub(crate) fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\0' => out.push_str("&#00;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> Vec<u8> {
        let mut out = vec![];
        for unit in s.encode_utf16() {
            push_unit(&mut out, unit);
        }
        out
    }

    fn decode(bytes: &[u8]) -> String {
        let mut iter = bytes.iter().copied();
        let mut units = vec![];
        while let Some(first) = iter.next() {
            units.push(decode_unit(first, || iter.next().ok_or_else(Error::unexpected_eof)).unwrap());
        }
        units_to_string(&units).unwrap()
    }

    #[test]
    fn test_unit_widths() {
        assert_eq!(encode("a"), b"a");
        assert_eq!(encode("é").len(), 2);
        assert_eq!(encode("已").len(), 3);
        // surrogate pair, two 3-byte sequences
        assert_eq!(encode("👏").len(), 6);
    }

    #[test]
    fn test_decode_matches_encode() {
        for s in ["", "hello", "未发送", "how about that 👏👏👏", "\0\u{7ff}\u{800}\u{ffff}"] {
            assert_eq!(decode(&encode(s)), s);
        }
    }

    #[test]
    fn test_bad_lead_byte() {
        let err = decode_unit(0xf0, || Ok(0x80)).unwrap_err();
        assert!(err.to_string().contains("bad utf-8"));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(escape_bytes(b"ab\x00\xff"), "ab\\x00\\xff");
        assert_eq!(escape_message("<a & b>"), "&lt;a &amp; b&gt;");
    }
}
