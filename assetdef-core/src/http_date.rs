//! HTTP date formatting for cache validation headers.

use chrono::{DateTime, Utc};

/// IMF-fixdate layout used by `If-Modified-Since` and `Last-Modified`.
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an IMF-fixdate string, always in GMT.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(IMF_FIXDATE).to_string()
}

/// Parse a `Last-Modified` style header value.
///
/// Accepts IMF-fixdate and the wider RFC 2822 grammar. Returns `None` for
/// anything else rather than guessing.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(trimmed, IMF_FIXDATE)
        .ok()
        .map(|naive| naive.and_utc())
}
