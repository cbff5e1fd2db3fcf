//! IBM hexadecimal floating point.
//!
//! Layout: 1 sign bit, 7-bit excess-64 base-16 exponent, 56-bit fraction.
//! Variables shorter than 8 bytes store the leading bytes only.

/// Decodes a stored numeric, returning `None` for SAS missing values.
pub fn ibm_to_f64(bytes: &[u8]) -> Option<f64> {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);

    if is_missing(&buf) {
        return None;
    }

    let negative = buf[0] & 0x80 != 0;
    let exponent = i32::from(buf[0] & 0x7f) - 64;

    buf[0] = 0;
    let fraction = u64::from_be_bytes(buf);
    if fraction == 0 {
        return Some(0.0);
    }

    let magnitude = fraction as f64 * 2f64.powi(4 * exponent - 56);
    Some(if negative { -magnitude } else { magnitude })
}

/// Missing values: a marker byte followed by zeros.
fn is_missing(buf: &[u8; 8]) -> bool {
    let marker = buf[0];
    let is_marker = marker == b'.' || marker == b'_' || marker.is_ascii_uppercase();
    is_marker && buf[1..].iter().all(|&b| b == 0)
}

/// Formats a number in shortest round-trip form.
///
/// Integral values keep a `.0` suffix (`73557.0`) and very small or very large
/// magnitudes switch to exponent notation (`5.397605346934028e-79`).
pub fn format_number(value: f64) -> String {
    format!("{:?}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_values() {
        // 1.0 = 0x41 10 00 00 00 00 00 00
        assert_eq!(ibm_to_f64(&[0x41, 0x10, 0, 0, 0, 0, 0, 0]), Some(1.0));
        // -118.625 = 0xC2 76 A0 00 00 00 00 00
        assert_eq!(
            ibm_to_f64(&[0xC2, 0x76, 0xA0, 0, 0, 0, 0, 0]),
            Some(-118.625)
        );
        // 0.5 = 0x40 80 00 ...
        assert_eq!(ibm_to_f64(&[0x40, 0x80, 0, 0, 0, 0, 0, 0]), Some(0.5));
    }

    #[test]
    fn zero_is_not_missing() {
        assert_eq!(ibm_to_f64(&[0; 8]), Some(0.0));
    }

    #[test]
    fn missing_markers() {
        for marker in [b'.', b'_', b'A', b'Z'] {
            let mut bytes = [0u8; 8];
            bytes[0] = marker;
            assert_eq!(ibm_to_f64(&bytes), None, "marker {:?}", marker as char);
        }
        // A marker byte followed by data is an ordinary number.
        assert!(ibm_to_f64(&[b'A', 0x10, 0, 0, 0, 0, 0, 0]).is_some());
    }

    #[test]
    fn short_numerics_are_zero_padded() {
        // SEQN-style 4-byte storage of 73557 = 0x45 11 F5 50
        assert_eq!(ibm_to_f64(&[0x45, 0x11, 0xF5, 0x50]), Some(73557.0));
    }

    #[test]
    fn formatting_matches_csv_conventions() {
        assert_eq!(format_number(73557.0), "73557.0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.125), "-0.125");
        assert!(format_number(5.397605346934028e-79).contains("e-79"));
    }
}
