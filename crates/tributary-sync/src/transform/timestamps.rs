//! Timestamp normalisation
//!
//! Source systems report instants as RFC 3339 strings, space-separated
//! timestamps with or without an offset, or epoch numbers in seconds or
//! milliseconds. Everything is converted to UTC, with a fixed-offset local
//! copy for reporting. Unparseable input becomes `None`.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value;

/// Offset used for `_local` columns when none is configured (Pacific standard time)
pub const DEFAULT_LOCAL_OFFSET: &str = "-08:00";

/// Epoch values above this are taken to be milliseconds in [`EpochUnit::Auto`]
const AUTO_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const WAREHOUSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

/// Unit of an epoch timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochUnit {
    Seconds,
    #[default]
    Millis,
    /// Guess from magnitude
    Auto,
}

impl std::str::FromStr for EpochUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "seconds" => Ok(EpochUnit::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(EpochUnit::Millis),
            "auto" => Ok(EpochUnit::Auto),
            other => Err(format!("unknown epoch unit '{}'", other)),
        }
    }
}

/// Parse `+HH:MM` / `-HH:MM` (or `Z`) into a fixed offset
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => (rest.get(..2)?, rest.get(2..)?),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Convert an epoch number to UTC
pub fn from_epoch(value: i64, unit: EpochUnit) -> Option<DateTime<Utc>> {
    let unit = match unit {
        EpochUnit::Auto if value.abs() >= AUTO_MILLIS_THRESHOLD => EpochUnit::Millis,
        EpochUnit::Auto => EpochUnit::Seconds,
        other => other,
    };
    match unit {
        EpochUnit::Millis => DateTime::from_timestamp_millis(value),
        _ => DateTime::from_timestamp(value, 0),
    }
}

/// Convert a JSON number or numeric string holding an epoch value
pub fn epoch_from_value(value: &Value, unit: EpochUnit) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    from_epoch(raw, unit)
}

/// Parse a textual timestamp into UTC
///
/// Naive timestamps (no offset) are taken to already be UTC, which is how
/// the warehouse returns `TIMESTAMP` columns.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

/// Parse an optional JSON string field
pub fn parse_optional(value: Option<&str>) -> Option<DateTime<Utc>> {
    value.and_then(parse_timestamp)
}

/// A UTC instant and its local-zone copy, always derived together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalizedTimestamp {
    pub utc: Option<DateTime<Utc>>,
    pub local: Option<DateTime<FixedOffset>>,
}

impl LocalizedTimestamp {
    pub fn new(utc: Option<DateTime<Utc>>, zone: FixedOffset) -> Self {
        Self {
            utc,
            local: utc.map(|ts| ts.with_timezone(&zone)),
        }
    }

    pub fn parse(value: Option<&str>, zone: FixedOffset) -> Self {
        Self::new(parse_optional(value), zone)
    }

    pub fn utc_cell(&self) -> String {
        self.utc.as_ref().map(format_timestamp).unwrap_or_default()
    }

    pub fn local_cell(&self) -> String {
        self.local.as_ref().map(format_timestamp).unwrap_or_default()
    }
}

/// Current time in the configured local zone
pub fn now_local(zone: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&zone)
}

/// Render a timestamp the way the warehouse `COPY` expects it
pub fn format_timestamp<Tz>(ts: &DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    ts.format(WAREHOUSE_FORMAT).to_string()
}
