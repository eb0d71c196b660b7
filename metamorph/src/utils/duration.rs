//! Parsing for human duration strings such as `90s` or `1h30m`.
//!
//! Accepts a sequence of `<number><unit>` groups. Units are `ns`, `us`
//! (or `µs`), `ms`, `s`, `m` and `h`; numbers may carry a fractional part.
//! A bare `0` is the zero duration.

use std::time::Duration;
use thiserror::Error;

/// Error returned for malformed duration strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl DurationParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

fn unit_nanos(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1.0),
        "us" | "µs" => Some(1e3),
        "ms" => Some(1e6),
        "s" => Some(1e9),
        "m" => Some(60.0 * 1e9),
        "h" => Some(3600.0 * 1e9),
        _ => None,
    }
}

/// Parses a duration string.
///
/// # Errors
///
/// Returns an error if the string is empty, negative, or contains a group
/// without a number or with an unknown unit.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::new(input, "empty string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(DurationParseError::new(input, "negative durations are not allowed"));
    }

    let mut total_nanos = 0f64;
    let mut rest = s.trim_start_matches('+');

    while !rest.is_empty() {
        let num_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map_or(rest.len(), |(i, _)| i);
        if num_len == 0 {
            return Err(DurationParseError::new(input, "expected a number"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| DurationParseError::new(input, "malformed number"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map_or(rest.len(), |(i, _)| i);
        if unit_len == 0 {
            return Err(DurationParseError::new(input, "missing unit"));
        }
        let unit = &rest[..unit_len];
        let scale = unit_nanos(unit)
            .ok_or_else(|| DurationParseError::new(input, format!("unknown unit '{unit}'")))?;
        rest = &rest[unit_len..];

        total_nanos += value * scale;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parses an optional duration string, treating empty as absent.
///
/// # Errors
///
/// Returns an error if a non-empty string fails to parse.
pub fn parse_optional_duration(input: Option<&str>) -> Result<Option<Duration>, DurationParseError> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_duration(s).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1m0.5s").unwrap(), Duration::from_millis(60_500));
    }

    #[test]
    fn test_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_optional() {
        assert_eq!(parse_optional_duration(None).unwrap(), None);
        assert_eq!(parse_optional_duration(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_optional_duration(Some("3s")).unwrap(),
            Some(Duration::from_secs(3))
        );
    }
}
