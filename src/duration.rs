//! Go style duration strings, e.g. "300ms", "1m30s" or "2h45m".
//!
//! Config durations are wall-clock cadences, so unlike Go's
//! `time.ParseDuration` the sign prefix is not allowed here.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use ::serde::de::Error as _;
use ::serde::{Deserialize, Deserializer, Serializer};

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1000 * NANOSECOND;
const MILLISECOND: u64 = 1000 * MICROSECOND;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum ParseDurationError {
    BadInteger,
    InvalidDuration,
    MissingUnit,
    UnknownUnit,
    Negative,
}

impl Display for ParseDurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseDurationError::BadInteger => f.write_str("integer part is too large"),
            ParseDurationError::InvalidDuration => f.write_str("invalid duration"),
            ParseDurationError::MissingUnit => f.write_str("missing unit in duration"),
            ParseDurationError::UnknownUnit => f.write_str("unknown unit in duration"),
            ParseDurationError::Negative => f.write_str("duration must not be negative"),
        }
    }
}

impl std::error::Error for ParseDurationError {}

/// leading_int consumes the leading [0-9]* from s
fn leading_int(s: &[u8]) -> Result<(u64, &[u8]), ParseDurationError> {
    let mut consumed = 0;
    let parsed = s
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .try_fold(0u64, |x, &c| {
            consumed += 1;

            x.checked_mul(10)
                .and_then(|x| x.checked_add(u64::from(c - b'0')))
        });

    match parsed {
        Some(v) => Ok((v, &s[consumed..])),
        None => Err(ParseDurationError::BadInteger),
    }
}

/// leading_fraction consumes the leading [0-9]* from s.
/// It is used only for fractions, so does not return an error on overflow,
/// it just stops accumulating precision.
fn leading_fraction(s: &[u8]) -> (u64, f64, &[u8]) {
    let mut consumed = 0;
    let mut scale = 1.0;
    let mut overflow = false;

    let value = s
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .fold(0u64, |x, &c| {
            consumed += 1;

            if overflow {
                return x;
            }

            match x
                .checked_mul(10)
                .and_then(|x| x.checked_add(u64::from(c - b'0')))
            {
                Some(y) => {
                    scale *= 10.0;
                    y
                }
                None => {
                    overflow = true;
                    x
                }
            }
        });

    (value, scale, &s[consumed..])
}

fn unit_of(u: &[u8]) -> Option<u64> {
    match u {
        [b'n', b's'] => Some(NANOSECOND),
        [b'u', b's'] => Some(MICROSECOND),
        // "µs" U+00B5
        [194, 181, b's'] => Some(MICROSECOND),
        // "μs" U+03BC
        [206, 188, b's'] => Some(MICROSECOND),
        [b'm', b's'] => Some(MILLISECOND),
        [b's'] => Some(SECOND),
        [b'm'] => Some(MINUTE),
        [b'h'] => Some(HOUR),
        [b'd'] => Some(DAY),
        [b'w'] => Some(WEEK),
        _ => None,
    }
}

/// parse_duration parses a duration string, a sequence of decimal numbers
/// each with optional fraction and a unit suffix, such as "300ms", "1.5h"
/// or "2h45m". Valid time units are "ns", "us" (or "µs"), "ms", "s", "m",
/// "h", "d" and "w".
pub fn parse_duration(text: &str) -> Result<Duration, ParseDurationError> {
    let mut total = 0u64;
    let mut s = text.as_bytes();

    if let Some(&c) = s.first() {
        if c == b'-' {
            return Err(ParseDurationError::Negative);
        }
        if c == b'+' {
            s = &s[1..];
        }
    }

    // Special case: if all that is left is "0", this is zero
    if s == b"0" {
        return Ok(Duration::ZERO);
    }

    if s.is_empty() {
        return Err(ParseDurationError::InvalidDuration);
    }

    while !s.is_empty() {
        // The next character must be [0-9.]
        let c = s[0];
        if !(c == b'.' || c.is_ascii_digit()) {
            return Err(ParseDurationError::InvalidDuration);
        }

        // Consume [0-9]*
        let pl = s.len();
        let (mut v, remain) = leading_int(s)?;
        s = remain;
        let pre = pl != s.len();

        // Consume (\.[0-9]*)?
        let mut f = 0;
        let mut scale = 1.0;
        let mut post = false;
        if !s.is_empty() && s[0] == b'.' {
            s = &s[1..];
            let pl = s.len();
            let (lf, ls, remain) = leading_fraction(s);
            f = lf;
            scale = ls;
            s = remain;
            post = pl != s.len();
        }
        if !pre && !post {
            // no digits (e.g. ".s")
            return Err(ParseDurationError::InvalidDuration);
        }

        // Consume unit
        let mut i = 0;
        while i < s.len() {
            let c = s[i];
            if c == b'.' || c.is_ascii_digit() {
                break;
            }

            i += 1;
        }

        if i == 0 {
            return Err(ParseDurationError::MissingUnit);
        }
        let unit = unit_of(&s[..i]).ok_or(ParseDurationError::UnknownUnit)?;
        s = &s[i..];

        v = v
            .checked_mul(unit)
            .ok_or(ParseDurationError::InvalidDuration)?;
        if f > 0 {
            // float64 is needed to be nanosecond accurate for fractions of
            // hours, f * (unit / scale) stays well below 2^53 for any unit.
            v = v
                .checked_add((f as f64 * (unit as f64 / scale)) as u64)
                .ok_or(ParseDurationError::InvalidDuration)?;
        }

        total = total
            .checked_add(v)
            .ok_or(ParseDurationError::InvalidDuration)?;
    }

    Ok(Duration::from_nanos(total))
}

/// Render a duration the way `parse_duration` reads it, largest units
/// first, zero components omitted, e.g. "1m30s" or "250ms".
pub fn format_duration(duration: Duration) -> String {
    let mut nanos = duration.as_nanos() as u64;
    if nanos == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (value, suffix) in [
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (MILLISECOND, "ms"),
        (MICROSECOND, "us"),
        (NANOSECOND, "ns"),
    ] {
        if nanos >= value {
            out.push_str(&format!("{}{}", nanos / value, suffix));
            nanos %= value;
        }
    }

    out
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(|err| D::Error::custom(format!("{err}, got \"{text}\"")))
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize_option_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) => parse_duration(&text)
            .map(Some)
            .map_err(|err| D::Error::custom(format!("{err}, got \"{text}\""))),
        None => Ok(None),
    }
}

pub fn serialize_option_duration<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(duration) => serializer.serialize_some(&format_duration(*duration)),
        None => serializer.serialize_none(),
    }
}

/// For use with `#[serde(with = "crate::duration::serde")]`.
pub mod serde {
    pub use super::{deserialize_duration as deserialize, serialize_duration as serialize};

    pub mod option {
        pub use super::super::{
            deserialize_option_duration as deserialize, serialize_option_duration as serialize,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_int_consume() {
        let (x, remain) = leading_int("12h".as_bytes()).unwrap();
        assert_eq!(x, 12);
        assert_eq!(remain, b"h");
    }

    #[test]
    fn leading_int_overflow() {
        let err = leading_int("99999999999999999999".as_bytes()).unwrap_err();
        assert_eq!(err, ParseDurationError::BadInteger)
    }

    #[test]
    fn leading_fraction_consume() {
        let (f, scale, r) = leading_fraction("6s".as_bytes());
        assert_eq!(6, f);
        assert_eq!(10.0, scale);
        assert_eq!(r, b"s");
    }

    #[test]
    fn parse() {
        let tests = [
            // simple
            ("0", 0),
            ("5s", 5 * SECOND),
            ("30s", 30 * SECOND),
            ("1478s", 1478 * SECOND),
            ("+5s", 5 * SECOND),
            // decimal
            ("5.0s", 5 * SECOND),
            ("5.6s", 5 * SECOND + 600 * MILLISECOND),
            ("5.s", 5 * SECOND),
            (".5s", 500 * MILLISECOND),
            ("1.0s", SECOND),
            ("1.004s", SECOND + 4 * MILLISECOND),
            ("1.0040s", SECOND + 4 * MILLISECOND),
            ("100.00100s", 100 * SECOND + MILLISECOND),
            // different units
            ("10ns", 10 * NANOSECOND),
            ("11us", 11 * MICROSECOND),
            ("12µs", 12 * MICROSECOND),  // U+00B5
            ("12μs", 12 * MICROSECOND),  // U+03BC
            ("13ms", 13 * MILLISECOND),
            ("14s", 14 * SECOND),
            ("15m", 15 * MINUTE),
            ("16h", 16 * HOUR),
            ("2d", 2 * DAY),
            ("1w", WEEK),
            // composite durations
            ("3h30m", 3 * HOUR + 30 * MINUTE),
            ("10.5s4m", 4 * MINUTE + 10 * SECOND + 500 * MILLISECOND),
            ("1h2m3s4ms5us6ns", HOUR + 2 * MINUTE + 3 * SECOND + 4 * MILLISECOND + 5 * MICROSECOND + 6 * NANOSECOND),
            ("39h9m14.425s", 39 * HOUR + 9 * MINUTE + 14 * SECOND + 425 * MILLISECOND),
            // large value
            ("52763797000ns", 52763797000 * NANOSECOND),
            // more than 9 digits after decimal point, see https://golang.org/issue/6617
            ("0.3333333333333333333h", 20 * MINUTE),
            // huge string; issue 15011.
            ("0.100000000000000000000h", 6 * MINUTE),
        ];

        for (input, want) in tests {
            let d = parse_duration(input).unwrap_or_else(|err| panic!("{input}: {err}"));
            assert_eq!(d, Duration::from_nanos(want), "input: {input}");
        }
    }

    #[test]
    fn parse_errors() {
        let tests = [
            ("", ParseDurationError::InvalidDuration),
            ("5", ParseDurationError::MissingUnit),
            ("s", ParseDurationError::InvalidDuration),
            (".s", ParseDurationError::InvalidDuration),
            ("x5s", ParseDurationError::InvalidDuration),
            ("5y", ParseDurationError::UnknownUnit),
            ("-5s", ParseDurationError::Negative),
            ("-0", ParseDurationError::Negative),
            ("99999999999999999999ns", ParseDurationError::BadInteger),
        ];

        for (input, want) in tests {
            let err = parse_duration(input).unwrap_err();
            assert_eq!(err, want, "input: {input}");
        }
    }

    #[test]
    fn format() {
        let tests = [
            (0, "0s"),
            (500 * MILLISECOND, "500ms"),
            (SECOND, "1s"),
            (90 * SECOND, "1m30s"),
            (MINUTE, "1m"),
            (15 * MINUTE, "15m"),
            (HOUR + 30 * MINUTE, "1h30m"),
            (DAY, "1d"),
            (8 * DAY, "1w1d"),
            (SECOND + 4 * MILLISECOND, "1s4ms"),
        ];

        for (nanos, want) in tests {
            assert_eq!(format_duration(Duration::from_nanos(nanos)), want);
        }
    }

    #[test]
    fn round_trips_through_parse() {
        for input in ["1m", "90s", "1h30m", "250ms", "1w"] {
            let parsed = parse_duration(input).unwrap();
            let other = parse_duration(&format_duration(parsed)).unwrap();
            assert_eq!(parsed, other);
        }
    }
}
