//! GMT timestamp parsing and comparison.
//!
//! The remote server reports modification times as `date_modified_gmt`
//! strings in the form `2024-03-01T12:30:00` (UTC, no offset suffix).
//! All comparisons here parse into [`DateTime<Utc>`] first; string order
//! is never used, so the engine does not depend on fixed-width
//! serialization. An unparseable timestamp never wins a comparison.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;

/// The wire format used by the remote server for `date_modified_gmt`.
pub const GMT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a `date_modified_gmt` string into a UTC datetime.
///
/// Accepts the server's offset-less format first, then falls back to
/// RFC 3339 for callers that store full offsets.
pub fn parse_gmt(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, GMT_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a UTC datetime in the server's `date_modified_gmt` format.
pub fn format_gmt(value: DateTime<Utc>) -> String {
    value.format(GMT_FORMAT).to_string()
}

/// The current time in the server's `date_modified_gmt` format.
pub fn now_gmt() -> String {
    format_gmt(Utc::now())
}

/// Compares two optional timestamp strings.
///
/// Missing or unparseable timestamps order before any valid timestamp,
/// so a document without a modification time never overrides one that
/// has one.
pub fn cmp_gmt(a: Option<&str>, b: Option<&str>) -> Ordering {
    let pa = a.and_then(parse_gmt);
    let pb = b.and_then(parse_gmt);
    match (pa, pb) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Returns true if `incoming` is strictly newer than `local`.
pub fn is_newer(incoming: Option<&str>, local: Option<&str>) -> bool {
    cmp_gmt(incoming, local) == Ordering::Greater
}

/// The maximum timestamp among an iterator of optional timestamp strings.
///
/// Used as the `modified_after` watermark once the initial sync is
/// complete. Returns `None` when no document carries a valid timestamp.
pub fn max_gmt<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    values
        .into_iter()
        .flatten()
        .filter_map(|s| parse_gmt(s).map(|dt| (dt, s)))
        .max_by_key(|(dt, _)| *dt)
        .map(|(_, s)| s.to_string())
}
