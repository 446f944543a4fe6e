//! Outgoing protocol data.
#![allow(clippy::missing_const_for_fn)]

/// Bytes the I/O layer must write to the server, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes, CRLF included.
    pub data: Vec<u8>,
    /// Loggable form of the bytes; credentials and literal payloads masked.
    pub log: String,
}

impl Transmit {
    /// A line of text; `CRLF` is appended.
    #[must_use]
    pub fn line(text: &str) -> Self {
        let mut data = Vec::with_capacity(text.len() + 2);
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(b"\r\n");
        Self {
            data,
            log: text.to_string(),
        }
    }

    /// Raw bytes terminated by `CRLF`, logged as `log`.
    #[must_use]
    pub fn segment(bytes: &[u8], log: String) -> Self {
        let mut data = Vec::with_capacity(bytes.len() + 2);
        data.extend_from_slice(bytes);
        data.extend_from_slice(b"\r\n");
        Self { data, log }
    }

    /// Returns the data as a string slice, if valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the length of the data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the transmit is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
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
    fn test_line_appends_crlf() {
        let t = Transmit::line("DONE");
        assert_eq!(t.as_str(), Some("DONE\r\n"));
        assert_eq!(t.log, "DONE");
        assert_eq!(t.len(), 6);
        assert!(!t.is_empty());
    }

    #[test]
    fn test_segment_keeps_binary() {
        let t = Transmit::segment(&[0xff, 0x00], "<2 bytes>".to_string());
        assert_eq!(t.as_ref(), &[0xff, 0x00, b'\r', b'\n']);
        assert_eq!(t.as_str(), None);
        assert_eq!(t.log, "<2 bytes>");
    }
}
