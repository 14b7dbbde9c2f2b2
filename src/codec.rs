//! Decoder for the tracker's hex payload.
//!
//! The payload packs three fields into ten hex digits:
//!
//! ```text
//! digits 0-3  longitude code (u16)
//! digits 4-7  latitude code  (u16)
//! digits 8-9  battery code   (u8)
//! ```
//!
//! Shorter payloads are zero-filled on the right, longer ones are truncated.

use crate::reading::{DecodedReading, Fix, PayloadCodes};
use thiserror::Error;

/// Number of hex digits consumed from a payload.
pub const PAYLOAD_DIGITS: usize = 10;

/// Error types for decoding a payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A digit group contains characters that are not hexadecimal
    #[error("Invalid {field} digits: {digits:?}")]
    InvalidDigits { field: &'static str, digits: String },
}

/// Map a 16-bit longitude code onto [-180, 180] degrees.
#[inline]
pub fn lon16_to_degrees(lon16: u16) -> f64 {
    f64::from(lon16) * 360.0 / 65535.0 - 180.0
}

/// Map a 16-bit latitude code onto [-90, 90] degrees.
#[inline]
pub fn lat16_to_degrees(lat16: u16) -> f64 {
    f64::from(lat16) * 180.0 / 65535.0 - 90.0
}

/// Clamp an 8-bit battery code to a percentage.
#[inline]
pub fn batt8_to_percent(batt8: u8) -> u8 {
    batt8.min(100)
}

/// Strip whitespace and an optional `0x`/`0X` prefix, then uppercase.
fn normalize(payload_hex: &str) -> String {
    let trimmed = payload_hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    digits.to_ascii_uppercase()
}

fn parse_group(field: &'static str, group: &[char]) -> Result<u32, DecodeError> {
    let invalid = || DecodeError::InvalidDigits {
        field,
        digits: group.iter().collect(),
    };

    // from_str_radix would also accept a leading '+'
    group.iter().try_fold(0u32, |acc, c| {
        c.to_digit(16).map(|d| (acc << 4) | d).ok_or_else(invalid)
    })
}

fn decode_fix(payload_hex: &str) -> Result<Fix, DecodeError> {
    let mut digits: Vec<char> = normalize(payload_hex)
        .chars()
        .take(PAYLOAD_DIGITS)
        .collect();
    let padded = digits.len() < PAYLOAD_DIGITS;
    digits.resize(PAYLOAD_DIGITS, '0');

    // Group widths bound the values, so the narrowing casts are lossless.
    let lon16 = parse_group("longitude", &digits[0..4])? as u16;
    let lat16 = parse_group("latitude", &digits[4..8])? as u16;
    let batt8 = parse_group("battery", &digits[8..10])? as u8;

    Ok(Fix {
        longitude: lon16_to_degrees(lon16),
        latitude: lat16_to_degrees(lat16),
        battery_percent: batt8_to_percent(batt8),
        codes: PayloadCodes {
            lon16,
            lat16,
            batt8,
        },
        padded,
    })
}

/// Decode a hex payload into a reading.
///
/// Never fails outright: a malformed payload yields a reading whose
/// `outcome` holds the [`DecodeError`].
pub fn decode(payload_hex: &str) -> DecodedReading {
    DecodedReading {
        raw_hex: payload_hex.to_string(),
        outcome: decode_fix(payload_hex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::KNOWN_PAYLOAD;

    const EPSILON: f64 = 1e-9;

    fn fix(payload: &str) -> Fix {
        *decode(payload).fix().expect("payload should decode")
    }

    #[test]
    fn test_decode_known_vector() {
        let reading = decode(KNOWN_PAYLOAD);
        let fix = reading.fix().unwrap();
        assert_eq!(
            fix.codes,
            PayloadCodes {
                lon16: 45512,
                lat16: 20334,
                batt8: 100
            }
        );
        assert!((fix.longitude - (45512.0 * 360.0 / 65535.0 - 180.0)).abs() < EPSILON);
        assert!((fix.latitude - (20334.0 * 180.0 / 65535.0 - 90.0)).abs() < EPSILON);
        assert!((fix.longitude - 70.0).abs() < 0.05);
        assert!((fix.latitude - -34.15).abs() < 0.01);
        assert_eq!(fix.battery_percent, 100);
        assert!(!fix.padded);
        assert_eq!(reading.raw_hex, KNOWN_PAYLOAD);
    }

    #[test]
    fn test_decode_extremes() {
        let low = fix("0000000000");
        assert!((low.longitude - -180.0).abs() < EPSILON);
        assert!((low.latitude - -90.0).abs() < EPSILON);

        let high = fix("FFFFFFFFFF");
        assert!((high.longitude - 180.0).abs() < EPSILON);
        assert!((high.latitude - 90.0).abs() < EPSILON);
        assert_eq!(high.battery_percent, 100);
    }

    #[test]
    fn test_coordinates_stay_in_range() {
        for code in (0..=u16::MAX).step_by(97).chain([u16::MAX]) {
            let lon = lon16_to_degrees(code);
            let lat = lat16_to_degrees(code);
            assert!((-180.0..=180.0).contains(&lon), "lon {lon} for {code}");
            assert!((-90.0..=90.0).contains(&lat), "lat {lat} for {code}");
        }
    }

    #[test]
    fn test_battery_clamp() {
        for code in 0..=u8::MAX {
            assert!(batt8_to_percent(code) <= 100);
        }
        assert_eq!(batt8_to_percent(0), 0);
        assert_eq!(batt8_to_percent(100), 100);
        assert_eq!(batt8_to_percent(0xFF), 100);
        assert_eq!(fix("00000000FF").battery_percent, 100);
        assert_eq!(fix("000000002A").battery_percent, 42);
    }

    #[test]
    fn test_short_payload_is_padded() {
        let padded = fix("AB");
        let full = fix("AB00000000");
        assert!(padded.padded);
        assert_eq!(padded.codes, full.codes);
        assert_eq!(padded.battery_percent, 0);
    }

    #[test]
    fn test_empty_payload_decodes_to_origin_codes() {
        let fix = fix("");
        assert!(fix.padded);
        assert_eq!(fix.codes.lon16, 0);
        assert_eq!(fix.codes.lat16, 0);
        assert_eq!(fix.codes.batt8, 0);
    }

    #[test]
    fn test_normalization() {
        let expected = fix(KNOWN_PAYLOAD);
        assert_eq!(fix("  0xB1C84F6E64\n").codes, expected.codes);
        assert_eq!(fix("0Xb1c84f6e64").codes, expected.codes);
        assert_eq!(fix("b1c84f6e64").codes, expected.codes);
    }

    #[test]
    fn test_extra_digits_are_ignored() {
        assert_eq!(fix("B1C84F6E64FFFF").codes, fix(KNOWN_PAYLOAD).codes);
        // trailing garbage beyond the tenth digit is never parsed
        assert!(decode("B1C84F6E64ZZ").is_ok());
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let reading = decode("ZZZZZZZZZZ");
        assert!(reading.fix().is_none());
        assert_eq!(
            reading.decode_error(),
            Some(&DecodeError::InvalidDigits {
                field: "longitude",
                digits: "ZZZZ".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_group_is_named() {
        let err = decode("B1C84F6EZ4").outcome.unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidDigits {
                field: "battery",
                digits: "Z4".to_string()
            }
        );
        assert_eq!(format!("{err}"), "Invalid battery digits: \"Z4\"");
    }

    #[test]
    fn test_sign_and_non_ascii_are_rejected() {
        assert!(!decode("+1C84F6E64").is_ok());
        assert!(!decode("B1C8-F6E64").is_ok());
        assert!(!decode("B1C8４F6E64").is_ok());
        assert!(!decode("B1C8 4F6E6").is_ok());
    }
}
