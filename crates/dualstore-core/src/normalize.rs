//! Conversion of protocol-native timestamps and sizes into the entry model.
//!
//! Pure functions only; both adapters call into this module.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};

/// 100-ns ticks between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;
pub const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;
/// Tick values at or below this are assumed to already be Unix seconds.
pub const FILETIME_PLAUSIBILITY_THRESHOLD: i64 = 10_000_000_000_000;
/// Epoch values above this are milliseconds.
pub const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A modification time as some server reported it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for RawTimestamp {
    fn from(v: i64) -> Self {
        RawTimestamp::Integer(v)
    }
}

impl From<f64> for RawTimestamp {
    fn from(v: f64) -> Self {
        RawTimestamp::Float(v)
    }
}

impl From<&str> for RawTimestamp {
    fn from(v: &str) -> Self {
        RawTimestamp::Text(v.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(v: String) -> Self {
        RawTimestamp::Text(v)
    }
}

/// Convert a share-protocol FILETIME into a UTC timestamp.
///
/// Values too small to be a FILETIME are passed through as Unix seconds.
/// Returns `None` only when the result is outside chrono's range.
pub fn decode_share_timestamp(ticks: i64) -> Option<DateTime<Utc>> {
    let unix_seconds = if ticks > FILETIME_PLAUSIBILITY_THRESHOLD {
        (ticks - FILETIME_UNIX_OFFSET).div_euclid(FILETIME_TICKS_PER_SECOND)
    } else {
        ticks
    };
    DateTime::from_timestamp(unix_seconds, 0)
}

/// Normalize a modification time of unknown shape. Never fails; anything
/// unparseable yields `None`.
pub fn normalize_modified(raw: impl Into<RawTimestamp>) -> Option<DateTime<Utc>> {
    match raw.into() {
        RawTimestamp::Integer(v) => from_epoch(v),
        RawTimestamp::Float(v) => {
            if !v.is_finite() {
                return None;
            }
            let secs = if v > EPOCH_MILLIS_THRESHOLD as f64 {
                v / 1000.0
            } else {
                v
            };
            let secs = secs.floor();
            if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
                return None;
            }
            DateTime::from_timestamp(secs as i64, 0)
        }
        RawTimestamp::Text(s) => parse_text(&s),
    }
}

fn from_epoch(v: i64) -> Option<DateTime<Utc>> {
    let secs = if v > EPOCH_MILLIS_THRESHOLD {
        v.div_euclid(1000)
    } else {
        v
    };
    DateTime::from_timestamp(secs, 0)
}

fn parse_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }

    let iso = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(stripped) => format!("{}+00:00", stripped),
        None => s.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&iso) {
        return truncate(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&iso, fmt) {
            return truncate(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&iso, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).and_then(|n| truncate(n.and_utc()));
    }
    // WebDAV getlastmodified: "Wed, 01 Jan 2025 10:00:00 GMT"
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return truncate(dt.with_timezone(&Utc));
    }
    None
}

fn truncate(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.timestamp(), 0)
}

/// Minute-resolution display string in the local zone.
pub fn format_modified(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Human-readable size with B/KB/MB units and one decimal place.
pub fn humanize_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
