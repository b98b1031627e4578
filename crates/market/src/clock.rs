//! Timestamps and identifiers.
//!
//! Timestamps are UTC RFC 3339 strings with exactly six fractional digits, so
//! that lexical order equals chronological order in every backend.

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// The current time as a fixed-width RFC 3339 string.
pub fn now() -> String {
    timestamp(OffsetDateTime::now_utc())
}

pub fn timestamp(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");
    at.format(format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// A fresh UUID v4 record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A fresh merchant trade number: 32 hex digits, no separators.
pub fn new_trade_no() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
