//! Small helpers shared by the store, the engine and the CLI.

use chrono::{DateTime, Utc};

/// Trimmed text, or `None` when nothing but whitespace is left.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(ToString::to_string)
}

pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Single-line excerpt of a server error body, at most 180 characters.
pub fn compact_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(180)
        .collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time truncated to millisecond precision.
///
/// Stored payloads keep milliseconds, so anything stamped with this value
/// reads back unchanged.
pub fn utc_now() -> DateTime<Utc> {
    millis_to_datetime(unix_millis_now())
}

/// Convert a Unix millisecond timestamp to a UTC date-time.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn millis_to_datetime(timestamp_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(timestamp_ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Check that a money value is a plain decimal number (`12`, `-3.50`, `0.125`).
///
/// Amounts are kept as strings end to end so nothing is ever rounded through
/// floating point.
pub fn is_decimal_amount(value: &str) -> bool {
    let digits = value.trim().strip_prefix('-').unwrap_or_else(|| value.trim());
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let whole_ok = !whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit());
    let fraction_ok = fraction.is_none_or(|fraction| {
        !fraction.is_empty() && fraction.chars().all(|c| c.is_ascii_digit())
    });
    whole_ok && fraction_ok
}
