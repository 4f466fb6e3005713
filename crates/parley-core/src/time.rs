//! Timestamp parsing and room time labels.
//!
//! The REST layer reports room activity either as RFC 3339 or as the compact
//! form `yyMMddTHHmmss` (e.g. `251113T231154`, years offset from 2000).
//! Compact values carry no zone and are read as UTC.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Deserializer};

/// Label shown for a room the user is looking at, or just wrote to.
pub const JUST_NOW: &str = "just now";

/// Parse the compact `yyMMddTHHmmss` form. `None` if malformed.
pub fn parse_compact(value: &str) -> Option<DateTime<Utc>> {
    let bytes = value.as_bytes();
    if bytes.len() != 13 || bytes[6] != b'T' {
        return None;
    }
    if !bytes[..6].iter().chain(&bytes[7..]).all(u8::is_ascii_digit) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| value[range].parse::<u32>().ok();
    let year = 2000 + field(0..2)? as i32;
    let date = NaiveDate::from_ymd_opt(year, field(2..4)?, field(4..6)?)?;
    let time = date.and_hms_opt(field(7..9)?, field(9..11)?, field(11..13)?)?;
    Some(time.and_utc())
}

/// Parse RFC 3339 or the compact form.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_compact(value))
}

/// Render a room time label relative to `now`.
///
/// Labels without a `T` (already human text such as [`JUST_NOW`]) pass
/// through. Parsed times within the last 24 hours render as `HH:MM`, older
/// ones as `YYYY-MM-DD`. Unparseable labels pass through unchanged.
pub fn format_room_time(label: &str, now: DateTime<Utc>) -> String {
    if label.is_empty() || !label.contains('T') {
        return label.to_string();
    }

    let Some(at) = parse_timestamp(label) else {
        return label.to_string();
    };

    if now - at < TimeDelta::hours(24) {
        at.format("%H:%M").to_string()
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}

/// Serde adapter for optional timestamps in either accepted form.
///
/// Unparseable values deserialize to `None` so one bad row does not fail a
/// whole room list.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
