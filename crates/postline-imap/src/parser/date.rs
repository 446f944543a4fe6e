//! Date decoding for INTERNALDATE and envelope dates.

use chrono::{DateTime, FixedOffset};

/// A server-supplied date.
///
/// The raw text is always kept because envelope dates come from arbitrary
/// mail software and frequently fail to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapDate {
    /// Text exactly as the server sent it.
    pub raw: String,
    /// Parsed timestamp, if the text was understood.
    pub parsed: Option<DateTime<FixedOffset>>,
}

impl ImapDate {
    /// Decodes an INTERNALDATE value such as `05-Sep-2004 00:38:03 +0000`.
    ///
    /// A space-padded day (` 5-Sep-2004`) is accepted.
    #[must_use]
    pub fn internal(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            parsed: parse_internal(raw),
        }
    }

    /// Decodes an RFC 2822 date, falling back to the INTERNALDATE format.
    ///
    /// A trailing zone comment such as `(PDT)` is ignored.
    #[must_use]
    pub fn rfc2822(raw: &str) -> Self {
        let trimmed = strip_comment(raw.trim());
        let parsed = DateTime::parse_from_rfc2822(trimmed)
            .ok()
            .or_else(|| parse_internal(trimmed));
        Self {
            raw: raw.to_string(),
            parsed,
        }
    }
}

fn parse_internal(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw.trim_start(), "%d-%b-%Y %H:%M:%S %z").ok()
}

fn strip_comment(text: &str) -> &str {
    if text.ends_with(')') {
        if let Some(open) = text.rfind('(') {
            return text[..open].trim_end();
        }
    }
    text
}

/// Formats a timestamp as an IMAP `date-time` for APPEND.
#[must_use]
pub fn format_date_time(date: &DateTime<FixedOffset>) -> String {
    date.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_date() {
        let date = ImapDate::internal("17-Jul-1996 02:44:25 -0700");
        let parsed = date.parsed.unwrap();
        assert_eq!(parsed.timestamp(), 837_596_665);
        assert_eq!(parsed.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn test_space_padded_day() {
        let padded = ImapDate::internal(" 5-Sep-2004 00:38:03 +0000");
        let zero = ImapDate::internal("05-Sep-2004 00:38:03 +0000");
        assert_eq!(padded.parsed, zero.parsed);
        assert!(padded.parsed.is_some());
    }

    #[test]
    fn test_rfc2822_with_comment() {
        let envelope = ImapDate::rfc2822("Wed, 1 Apr 2020 17:52:41 +0200 (CEST)");
        let internal = ImapDate::internal("01-Apr-2020 15:52:41 +0000");
        assert_eq!(
            envelope.parsed.unwrap().timestamp(),
            internal.parsed.unwrap().timestamp()
        );
    }

    #[test]
    fn test_garbage_keeps_raw() {
        let date = ImapDate::rfc2822("sometime last week");
        assert!(date.parsed.is_none());
        assert_eq!(date.raw, "sometime last week");
    }

    #[test]
    fn test_format_date_time() {
        let date = DateTime::parse_from_rfc3339("2004-09-05T00:38:03+02:00").unwrap();
        assert_eq!(format_date_time(&date), "05-Sep-2004 00:38:03 +0200");
    }
}
