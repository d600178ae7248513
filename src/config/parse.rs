// ABOUTME: Value parsers for environment-style settings.
// ABOUTME: Handles booleans, counts with floors, durations, and serde helpers.

use crate::error::{Error, Result};
use serde::Serializer;
use std::fmt::Display;
use std::time::Duration;

pub fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "{name} must be a boolean, got {raw:?}"
        ))),
    }
}

/// Parse an integer and clamp it to `floor`.
pub fn parse_count(name: &str, raw: &str, floor: u32) -> Result<u32> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{name} must be an integer, got {raw:?}")))?;
    Ok(value.clamp(floor as i64, u32::MAX as i64) as u32)
}

/// Plain integers are seconds; anything else goes through humantime (`5m`, `1h 30m`).
pub fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(Duration::from_secs(secs.max(0) as u64));
    }
    humantime::parse_duration(raw)
        .map_err(|e| Error::InvalidConfig(format!("{name} must be a duration: {e}")))
}

pub fn serialize_display<T: Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn serialize_duration<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn counts_respect_floor() {
        assert_eq!(parse_count("N", "0", 1).unwrap(), 1);
        assert_eq!(parse_count("N", "-4", 1).unwrap(), 1);
        assert_eq!(parse_count("N", "7", 1).unwrap(), 7);
        assert!(parse_count("N", "seven", 1).is_err());
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        assert_eq!(parse_duration("D", "300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("D", "5m").unwrap(), Duration::from_secs(300));
        assert_eq!(
            parse_duration("D", "1h 30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert!(parse_duration("D", "soon").is_err());
    }
}
