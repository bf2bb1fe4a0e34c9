//! `Retry-After` header values, see [RFC 9110 §10.2.3].
//!
//! ```text
//! Retry-After = HTTP-date / delay-seconds
//! ```
//!
//! [RFC 9110 §10.2.3]: https://datatracker.ietf.org/doc/html/rfc9110#section-10.2.3

use time::{
    format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

use crate::retry::RetryDirective;

/// IMF-fixdate, the preferred HTTP-date form.
const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Parses a `Retry-After` header into a retry directive.
///
/// A missing or unparseable header is [`RetryDirective::Invalid`].
pub fn parse(value: Option<&http::HeaderValue>) -> RetryDirective {
    value
        .and_then(|value| value.to_str().ok())
        .map(parse_str)
        .unwrap_or(RetryDirective::Invalid)
}

/// Parses the textual value of a `Retry-After` header.
pub fn parse_str(value: &str) -> RetryDirective {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return RetryDirective::new(secs, 0);
    }

    match PrimitiveDateTime::parse(value, IMF_FIXDATE) {
        Ok(at) => RetryDirective::new(0, at.assume_utc().unix_timestamp()),
        Err(err) => {
            log::warn!("Ignoring malformed Retry-After value {value:?}: {err}");
            RetryDirective::Invalid
        }
    }
}

/// Formats a time as an IMF-fixdate `Retry-After` value.
pub fn format_http_date(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(IMF_FIXDATE)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
