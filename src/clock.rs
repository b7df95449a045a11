//! Wall-clock formatting for logs and the client display.

use chrono::{DateTime, Local, Utc};

const UNKNOWN: &str = "[--:--:--]";

/// `[HH:MM:SS]` in local time.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("[%H:%M:%S]").to_string()
}

/// Like [`format_timestamp`] for raw unix seconds; out-of-range values
/// render as `[--:--:--]`.
pub fn format_unix(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0).map_or_else(|| UNKNOWN.to_string(), format_timestamp)
}
