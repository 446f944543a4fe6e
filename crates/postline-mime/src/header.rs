//! Header-block decoding.

use std::collections::HashMap;

use crate::encoding::decode_words;

/// Collection of decoded message headers.
///
/// Names are stored lowercased; each name maps to its values in the order
/// they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        self.headers.entry(name).or_default().push(value.into());
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns `true` if no headers were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses a header block.
    ///
    /// Folded lines are joined by removing the line break only, so the
    /// leading space or tab of a continuation line is kept. Encoded words in
    /// values are decoded. Parsing stops at the first empty line; anything
    /// after it is treated as body and ignored. Continuation lines with no
    /// header to continue are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(line);
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, decode_words(value.trim()));
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim_start().to_string()));
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, decode_words(value.trim()));
        }
        headers
    }

    /// Parses a header block from raw bytes, replacing invalid UTF-8.
    #[must_use]
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }
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
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_folded_with_space() {
        let headers = Headers::parse("To: Foo\r\n Bar Baz\r\n");
        assert_eq!(headers.get_all("to"), vec!["Foo Bar Baz"]);
    }

    #[test]
    fn test_folded_with_tab() {
        let headers = Headers::parse("To: Foo\r\n\tBar\tBaz\r\n");
        assert_eq!(headers.get_all("to"), vec!["Foo\tBar\tBaz"]);
    }

    #[test]
    fn test_repeated_headers() {
        let headers = Headers::parse("Received: a\r\nReceived: b\r\n");
        assert_eq!(headers.get_all("received"), vec!["a", "b"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_adjacent_words_across_folds() {
        let text = concat!(
            "Subject: =?GB2312?Q?=B2=E2=CA=D4=CC=E2=C4=BF=D3=EB=D6=D0=B9=FA=D0=C5_long_subjects_are_not_OK_12?=\r\n",
            " =?GB2312?Q?345678901234567890123456789012345678901234567890123456789012?=\r\n",
            " =?GB2312?Q?345678901234567890?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(
            headers.get("subject"),
            Some(
                "测试题目与中国信 long subjects are not OK 12345678901234567890123456789012345678901234567890123456789012345678901234567890"
            )
        );
    }

    #[test]
    fn test_non_adjacent_words_keep_text() {
        let text = concat!(
            "Subject: =?GB2312?Q?=B2=E2=CA=D4=CC=E2=C4=BF=D3=EB=D6=D0=B9=FA=D0=C5_long_subjects_are_not_OK_12?=\r\n",
            " 3=?GB2312?Q?45678901234567890123456789012345678901234567890123456789012?=\r\n",
            " 3=?GB2312?Q?45678901234567890?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(
            headers.get("subject"),
            Some(
                "测试题目与中国信 long subjects are not OK 12 345678901234567890123456789012345678901234567890123456789012 345678901234567890"
            )
        );
    }

    #[test]
    fn test_whitespace_only_fold_line() {
        let text = concat!(
            "Subject: =?UTF-8?Q?=E0=B9=84=E0=B8=97=E0=B8=A2_=E0=B9=84?=\r\n",
            "   \r\n",
            " =?UTF-8?Q?=E0=B8=97=E0=B8=A2_=E0=B9=84=E0=B8=97?=  =?UTF-8?Q?=E0=B8=A2?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("ไทย ไทย ไทย"));
    }

    #[test]
    fn test_split_multibyte_across_fold() {
        let text = concat!(
            "Subject: =?utf-8?Q?abcdefghij_=E0=B9=83=E0=B8=99_klmnopqr_=E0=B9=84=E0=B8=A1=E0=B9?=\r\n",
            " =?utf-8?Q?=88=E0=B8=82=E0=B8=B6=E0=B9=89=E0=B8=99?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("abcdefghij ใน klmnopqr ไม่ขึ้น"));
    }

    #[test]
    fn test_consecutive_complete_base64_words() {
        let text = concat!(
            "Subject: =?utf-8?B?Rlc6IOC4quC4tOC5iOC4h+C4oeC4tQ==?=\r\n",
            " =?utf-8?B?4LiK4Li14Lin4Li04LiV4Lir4LiZ4LmJ4Liy4LiV?=\r\n",
            " =?utf-8?B?4Liy4LmB4Lib4Lil4LiBIOC5hiDguKPguK3=?=\r\n",
            " =?utf-8?Q?=E0=B8=9A=E0=B9=82=E0=B8=A5=E0=B8=81?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("FW: สิ่งมีชีวิตหน้าตาแปลก ๆ รอบโลก"));
    }

    #[test]
    fn test_consecutive_partial_base64_words() {
        let text = concat!(
            "Subject: =?utf-8?B?4Lij4Li54Lib4Lig4Liy4Lie4LiX4Li14LmIIGVtYmVkIOC5g+C4meC5gOC4?=\r\n",
            " =?utf-8?B?meC4t+C5ieC4reC5gOC4oeC4peC4peC5jOC5hOC4oeC5iOC5geC4quC4lOC4?=\r\n",
            " =?utf-8?B?hw==?=\r\n",
        );
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("รูปภาพที่ embed ในเนื้อเมลล์ไม่แสดง"));
    }

    #[test]
    fn test_leading_whitespace_line_skipped() {
        let headers = Headers::parse("               \r\nTo: Foo\r\n");
        assert_eq!(headers.get_all("to"), vec!["Foo"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_stops_at_body() {
        let text =
            "Subject: test subject\r\nX-Another-Header: test\r\n\r\nThis is body: Not a header\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("test subject"));
        assert_eq!(headers.get("x-another-header"), Some("test"));
        assert!(headers.get("this is body").is_none());
        assert_eq!(headers.len(), 2);
    }
}
