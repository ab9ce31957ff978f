//! revision markers (TIDs) and their sortable base-32 alphabet.
//!
//! A revision is an opaque token, but it is built so that comparing the
//! strings compares the times: all but the last two characters are a Unix
//! timestamp in microseconds, the last two are a clock id, both written in an
//! alphabet whose character order matches digit order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// digit alphabet, in ascending order
pub const S32_ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

/// characters used for the timestamp part of a canonical revision
pub const TIMESTAMP_WIDTH: usize = 11;

/// characters used for the clock id
pub const CLOCK_ID_WIDTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TidError {
    #[error("invalid base-32 character {char:?} at position {position}")]
    InvalidCharacter { char: char, position: usize },

    #[error("base-32 value overflows 64 bits: {0}")]
    Overflow(String),

    #[error("revision too short: {0:?}")]
    TooShort(String),

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(u64),
}

/// encode a number with the sortable alphabet
///
/// zero encodes to the empty string.
pub fn s32_encode(mut i: u64) -> String {
    let mut digits = Vec::new();
    while i > 0 {
        digits.push(S32_ALPHABET[(i % 32) as usize]);
        i /= 32;
    }
    digits.reverse();
    // alphabet is ASCII
    digits.into_iter().map(char::from).collect()
}

/// decode a string written with the sortable alphabet
pub fn s32_decode(s: &str) -> Result<u64, TidError> {
    let mut value: u64 = 0;
    for (position, c) in s.chars().enumerate() {
        let digit = digit_of(c).ok_or(TidError::InvalidCharacter { char: c, position })?;
        value = value
            .checked_mul(32)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| TidError::Overflow(s.to_string()))?;
    }
    Ok(value)
}

fn digit_of(c: char) -> Option<u64> {
    S32_ALPHABET
        .iter()
        .position(|&d| char::from(d) == c)
        .map(|p| p as u64)
}

/// left-pad with the zero digit so equal-width tokens sort numerically
fn encode_padded(i: u64, width: usize) -> String {
    let digits = s32_encode(i);
    let zero = char::from(S32_ALPHABET[0]);
    let mut out: String = std::iter::repeat(zero)
        .take(width.saturating_sub(digits.len()))
        .collect();
    out.push_str(&digits);
    out
}

/// A commit's revision marker.
///
/// Ordering is the string ordering of the token, which is what the commit
/// walker sorts by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

/// decoded parts of a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionParts {
    /// microseconds since the Unix epoch
    pub timestamp_micros: u64,
    pub clock_id: u64,
}

impl RevisionParts {
    pub fn timestamp(&self) -> Result<DateTime<Utc>, TidError> {
        i64::try_from(self.timestamp_micros)
            .ok()
            .and_then(DateTime::from_timestamp_micros)
            .ok_or(TidError::TimestampOutOfRange(self.timestamp_micros))
    }
}

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// build a canonical 13 character revision
    pub fn from_parts(timestamp_micros: u64, clock_id: u64) -> Self {
        let mut rev = encode_padded(timestamp_micros, TIMESTAMP_WIDTH);
        rev.push_str(&encode_padded(clock_id, CLOCK_ID_WIDTH));
        Self(rev)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// split into timestamp and clock id
    pub fn parse(&self) -> Result<RevisionParts, TidError> {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= CLOCK_ID_WIDTH {
            return Err(TidError::TooShort(self.0.clone()));
        }

        let split = chars.len() - CLOCK_ID_WIDTH;
        let timestamp: String = chars[..split].iter().collect();
        let clock: String = chars[split..].iter().collect();

        let timestamp_micros = s32_decode(&timestamp)?;
        let clock_id = s32_decode(&clock).map_err(|e| match e {
            TidError::InvalidCharacter { char, position } => TidError::InvalidCharacter {
                char,
                position: position + split,
            },
            other => other,
        })?;

        Ok(RevisionParts {
            timestamp_micros,
            clock_id,
        })
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, TidError> {
        self.parse()?.timestamp()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(s32_encode(0), "");
        assert_eq!(s32_encode(1), "3");
        assert_eq!(s32_encode(31), "z");
        assert_eq!(s32_encode(32), "32");
    }

    #[test]
    fn test_decode_rejects_foreign_characters() {
        assert_eq!(
            s32_decode("3a1"),
            Err(TidError::InvalidCharacter { char: '1', position: 2 })
        );
    }

    #[test]
    fn test_decode_overflow() {
        assert!(matches!(s32_decode(&"z".repeat(14)), Err(TidError::Overflow(_))));
    }

    #[test]
    fn test_parse_real_revision() {
        let rev = Revision::new("3jzfcijpj2z2a");
        let parts = rev.parse().unwrap();
        assert_eq!(parts.clock_id, s32_decode("2a").unwrap());

        let ts = rev.timestamp().unwrap();
        // rev from a 2023 repository
        assert!(ts > Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert!(ts < Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_too_short() {
        assert_eq!(
            Revision::new("2a").parse(),
            Err(TidError::TooShort("2a".to_string()))
        );
    }

    #[test]
    fn test_clock_id_error_position() {
        let err = Revision::new("3jzfcijpj2z2!").parse().unwrap_err();
        assert_eq!(err, TidError::InvalidCharacter { char: '!', position: 12 });
    }

    #[test]
    fn test_from_parts_is_canonical_width() {
        let rev = Revision::from_parts(1_688_169_600_000_000, 7);
        assert_eq!(rev.as_str().len(), TIMESTAMP_WIDTH + CLOCK_ID_WIDTH);
        assert_eq!(rev.parse().unwrap().timestamp_micros, 1_688_169_600_000_000);
        assert_eq!(rev.parse().unwrap().clock_id, 7);
    }

    #[proptest(fork = false)]
    fn test_s32_roundtrip(n: u64) {
        prop_assert_eq!(s32_decode(&s32_encode(n))?, n);
    }

    #[proptest(fork = false)]
    fn test_revisions_sort_by_time(
        #[strategy(0u64..(1u64 << 53))] a: u64,
        #[strategy(0u64..(1u64 << 53))] b: u64,
        #[strategy(0u64..1024)] clock: u64,
    ) {
        let ra = Revision::from_parts(a, clock);
        let rb = Revision::from_parts(b, clock);
        prop_assert_eq!(ra.cmp(&rb), a.cmp(&b));
    }
}
