//! Encoding and comparison helpers shared by the wire formats.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// Used when checking digests and MACs so the comparison does not leak
/// how many leading bytes matched.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Standard (padded) base64, as used on every wire field.
pub fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(s)
}

/// Hex with a `0x` prefix.
pub fn hex_0x(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Decode hex, accepting an optional `0x`/`0X` prefix.
pub fn decode_hex_0x(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare(b"hello world", b"hello world"));
    }

    #[test]
    fn test_constant_time_compare_different() {
        assert!(!constant_time_compare(b"hello world", b"hello worlD"));
    }

    #[test]
    fn test_constant_time_compare_different_length() {
        assert!(!constant_time_compare(b"hello", b"hello world"));
    }

    #[test]
    fn test_hex_prefix_handling() {
        assert_eq!(hex_0x(&[0xde, 0xad]), "0xdead");
        assert_eq!(decode_hex_0x("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(decode_hex_0x("DEAD").unwrap(), vec![0xde, 0xad]);
        assert!(decode_hex_0x("0xzz").is_err());
    }

    #[test]
    fn test_base64_is_padded_standard() {
        assert_eq!(b64_encode(&[0xfb, 0xff]), "+/8=");
        assert_eq!(b64_decode("+/8=").unwrap(), vec![0xfb, 0xff]);
    }
}
