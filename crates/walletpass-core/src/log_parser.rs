//! Parser for the diagnostic messages Wallet posts to `/v1/log`.
//!
//! Devices emit a handful of fixed shapes. Anything else is reported as
//! [`MalformedLog`] and stored raw by the caller.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static REGISTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(.*?)\]\s(.*?)\s\(for device (.*?), pass type (.*?), serial number (.*?); with web service url (.*?)\)\s(.*?): (.*)$",
    )
    .expect("static regex is valid")
});

static GET_WARNING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(.*?)\]\s(.*?)\s\(pass type (.*?), serial number (.*?), if-modified-since \(.*?\); with web service url (.*?)\) (.*?): (.*\.\s.*)$",
    )
    .expect("static regex is valid")
});

static GET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(.*?)\]\s(.*?)\s\(pass type (.*?), serial number (.*?), if-modified-since \(.*?\); with web service url (.*?)\) (.*?): (.*)$",
    )
    .expect("static regex is valid")
});

static WEB_SERVICE_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(.*?)\]\s(.*?)\sfor (.*?)\s\((.*?)\):\s(.*)$").expect("static regex is valid")
});

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p %z";
const TIMESTAMP_FORMAT_24H: &str = "%Y-%m-%d %H:%M:%S %z";

/// Normalized log status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStatus {
    Error,
    Warning,
    /// The message matched no known shape.
    Unknown,
    /// Status text as the device sent it.
    Other(String),
}

impl LogStatus {
    fn normalize(status: &str) -> Self {
        let lower = status.to_ascii_lowercase();
        if lower.contains("error") {
            Self::Error
        } else if lower.contains("warning") {
            Self::Warning
        } else {
            Self::Other(status.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields extracted from one device log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    /// `None` when the bracketed timestamp could not be read.
    pub created_at: Option<DateTime<Utc>>,
    pub status: LogStatus,
    pub task_type: String,
    pub device_id: Option<String>,
    pub pass_type_identifier: String,
    pub serial_number: Option<String>,
    pub web_service_url: String,
    pub msg: String,
}

/// A message in none of the known shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized log message")]
pub struct MalformedLog {
    pub message: String,
}

/// Parse a raw device log message.
pub fn parse(raw: &str) -> Result<ParsedLog, MalformedLog> {
    let raw = raw.trim_end();
    if let Some(c) = REGISTER_RE.captures(raw) {
        return Ok(ParsedLog {
            created_at: parse_device_timestamp(&c[1]),
            status: LogStatus::normalize(&c[7]),
            task_type: c[2].to_string(),
            device_id: Some(c[3].to_string()),
            pass_type_identifier: c[4].to_string(),
            serial_number: Some(c[5].to_string()),
            web_service_url: c[6].to_string(),
            msg: c[8].to_string(),
        });
    }

    if let Some(c) = GET_WARNING_RE
        .captures(raw)
        .filter(|c| c[6].to_ascii_lowercase().contains("warning"))
    {
        return Ok(ParsedLog {
            created_at: parse_device_timestamp(&c[1]),
            status: LogStatus::Warning,
            task_type: c[2].to_string(),
            device_id: None,
            pass_type_identifier: c[3].to_string(),
            serial_number: Some(c[4].to_string()),
            web_service_url: c[5].to_string(),
            msg: c[7].to_string(),
        });
    }

    if let Some(c) = GET_RE.captures(raw) {
        return Ok(ParsedLog {
            created_at: parse_device_timestamp(&c[1]),
            status: LogStatus::normalize(&c[6]),
            task_type: c[2].to_string(),
            device_id: None,
            pass_type_identifier: c[3].to_string(),
            serial_number: Some(c[4].to_string()),
            web_service_url: c[5].to_string(),
            msg: c[7].to_string(),
        });
    }

    if let Some(c) = WEB_SERVICE_ERROR_RE.captures(raw) {
        return Ok(ParsedLog {
            created_at: parse_device_timestamp(&c[1]),
            status: LogStatus::Error,
            task_type: c[2].to_string(),
            device_id: None,
            pass_type_identifier: c[3].to_string(),
            serial_number: None,
            web_service_url: c[4].to_string(),
            msg: c[5].to_string(),
        });
    }

    Err(MalformedLog {
        message: raw.to_string(),
    })
}

/// `2024-07-08 10:22:35 AM +0200`, converted to UTC.
///
/// Some devices print a 24-hour hour next to the meridiem; those are read
/// as 24-hour time.
pub fn parse_device_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(dt.with_timezone(&Utc));
    }
    let without_meridiem = s
        .split_whitespace()
        .filter(|t| !t.eq_ignore_ascii_case("AM") && !t.eq_ignore_ascii_case("PM"))
        .collect::<Vec<_>>()
        .join(" ");
    DateTime::parse_from_str(&without_meridiem, TIMESTAMP_FORMAT_24H)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
