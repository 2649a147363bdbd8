//! Timestamp parsing and formatting for the web service protocol.
//!
//! Devices echo back whatever `lastUpdated` value they were given, and older
//! deployments handed out `YYYY-MM-DD HH:MM:SS`, so parsing is lenient while
//! formatting is always RFC 3339 UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Timelike, Utc};

use crate::error::{Error, Result};

/// Legacy watermark format, interpreted as UTC.
const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const NAIVE_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const SPACED_OFFSET_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Parse a client-supplied timestamp.
///
/// Accepts RFC 3339, naive ISO-8601 (UTC), the legacy
/// `YYYY-MM-DD HH:MM:SS` form (UTC), HTTP dates and integer Unix seconds.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Some(parsed) = parse_any(trimmed) {
        return Ok(parsed);
    }
    // An unescaped `+` in a query string decodes to a space.
    if trimmed.contains('T') && trimmed.contains(' ') {
        if let Some(parsed) = parse_any(&trimmed.replace(' ', "+")) {
            return Ok(parsed);
        }
    }
    Err(Error::Timestamp(input.to_string()))
}

fn parse_any(s: &str) -> Option<DateTime<Utc>> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
    }
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .or_else(|_| DateTime::parse_from_str(s, SPACED_OFFSET_FORMAT))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, NAIVE_ISO_FORMAT)
                .or_else(|_| NaiveDateTime::parse_from_str(s, LEGACY_FORMAT))
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Format a `lastUpdated` watermark. Microsecond precision so that the value
/// round-trips exactly through [`parse_timestamp`].
pub fn format_watermark(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format an HTTP-date (`Last-Modified`), second precision.
pub fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Drop the sub-second part.
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Convert stored microseconds since epoch to a UTC datetime.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Convert a UTC datetime to stored microseconds since epoch.
pub fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}
