//! Incremental wire parser.
//!
//! The parser is sans-I/O: the caller feeds whatever bytes the transport
//! produced and pulls [`WireEvent`]s until none are left. Chunk boundaries
//! are arbitrary; a line terminator or a `{N}` marker may be split anywhere.
//!
//! Literals that carry a FETCH `BODY[...]` section are not spliced into the
//! line. They are surfaced as a [`WireEvent::BodyStart`], a run of
//! [`WireEvent::BodyData`] chunks and a [`WireEvent::BodyEnd`], so a caller
//! that stops pulling events stops consuming input.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::expr::Value;
use super::response::{FetchItem, FetchValue, Response, Untagged, classify};

/// One unit of parsed server output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A complete response line.
    Response(Response),
    /// A body section begins.
    BodyStart {
        /// Message sequence number of the enclosing FETCH.
        seqno: u32,
        /// Section specifier between the brackets, e.g. `HEADER`.
        section: String,
        /// Declared size in bytes.
        size: u64,
    },
    /// The next bytes of the current body section.
    BodyData(Bytes),
    /// The current body section is complete.
    BodyEnd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Line,
    /// Literal bytes still to splice into the logical line.
    Literal(usize),
    /// Body bytes still to stream out.
    Body(u64),
}

/// Incremental parser state.
#[derive(Debug, Default)]
pub struct WireParser {
    buf: BytesMut,
    line: Vec<u8>,
    mode: Mode,
    pending: VecDeque<WireEvent>,
}

impl WireParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends transport bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet turned into events,
    /// including a partial logical line.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len() + self.line.len()
    }

    /// Drops all buffered state, e.g. after a TLS upgrade.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns the next event, or `None` when more input is needed.
    pub fn next_event(&mut self) -> Option<WireEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match self.mode {
                Mode::Body(0) => {
                    self.mode = Mode::Line;
                    return Some(WireEvent::BodyEnd);
                }
                Mode::Body(remaining) => {
                    if self.buf.is_empty() {
                        return None;
                    }
                    let available = self.buf.len();
                    let take = usize::try_from(remaining).map_or(available, |r| r.min(available));
                    let chunk = self.buf.split_to(take).freeze();
                    self.mode = Mode::Body(remaining - take as u64);
                    return Some(WireEvent::BodyData(chunk));
                }
                Mode::Literal(0) => self.mode = Mode::Line,
                Mode::Literal(remaining) => {
                    if self.buf.is_empty() {
                        return None;
                    }
                    let take = remaining.min(self.buf.len());
                    self.line.extend_from_slice(&self.buf.split_to(take));
                    self.mode = Mode::Literal(remaining - take);
                }
                Mode::Line => {
                    let newline = self.buf.iter().position(|&b| b == b'\n')?;
                    let raw = self.buf.split_to(newline + 1);
                    let chunk = raw[..newline].strip_suffix(b"\r").unwrap_or(&raw[..newline]);
                    self.scan_chunk(chunk);
                }
            }
        }
    }

    fn scan_chunk(&mut self, chunk: &[u8]) {
        let literal = trailing_literal(chunk);
        let offset = self.line.len();
        self.line.extend_from_slice(chunk);

        let Some((marker, size)) = literal else {
            let line = std::mem::take(&mut self.line);
            if !line.is_empty() {
                self.push_response(&line);
            }
            return;
        };

        let before = &self.line[..offset + marker];
        if let Some(seqno) = fetch_seqno(&self.line) {
            if let Some((start, section)) = body_section(before) {
                tracing::trace!(seqno, %section, size, "body literal");
                self.line.truncate(start);
                self.mode = Mode::Body(size);
                self.pending.push_back(WireEvent::BodyStart { seqno, section, size });
                return;
            }
        }

        self.line.extend_from_slice(b"\r\n");
        self.mode = Mode::Literal(usize::try_from(size).unwrap_or(usize::MAX));
    }

    fn push_response(&mut self, line: &[u8]) {
        let response = classify(line);
        if let Response::Untagged(Untagged::Fetch { seqno, items }) = response {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                match inline_body(&item) {
                    Some((section, content)) => {
                        self.pending.push_back(WireEvent::BodyStart {
                            seqno,
                            section,
                            size: content.len() as u64,
                        });
                        if !content.is_empty() {
                            self.pending.push_back(WireEvent::BodyData(content));
                        }
                        self.pending.push_back(WireEvent::BodyEnd);
                    }
                    None => kept.push(item),
                }
            }
            let fetch = Untagged::Fetch { seqno, items: kept };
            self.pending.push_back(WireEvent::Response(Response::Untagged(fetch)));
        } else {
            self.pending.push_back(WireEvent::Response(response));
        }
    }
}

/// Finds a `{N}` or `{N+}` marker ending the chunk. Returns the marker
/// offset and the announced size.
fn trailing_literal(chunk: &[u8]) -> Option<(usize, u64)> {
    let inner = chunk.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = &inner[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let size = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some((open, size))
}

/// Returns the sequence number if the line is `* n FETCH ...`.
fn fetch_seqno(line: &[u8]) -> Option<u32> {
    let rest = line.strip_prefix(b"* ")?;
    let space = rest.iter().position(|&b| b == b' ')?;
    let seqno = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
    let kind = rest[space + 1..].get(..5)?;
    kind.eq_ignore_ascii_case(b"FETCH").then_some(seqno)
}

/// Matches a `BODY[section]` or `BODY[section]<origin>` item at the end of
/// `line`, returning where the item starts and the section text.
fn body_section(line: &[u8]) -> Option<(usize, String)> {
    let end = line.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let mut item = &line[..end];
    if item.last() == Some(&b'>') {
        let origin = item.iter().rposition(|&b| b == b'<')?;
        item = &item[..origin];
    }
    let inner = item.strip_suffix(b"]")?;
    let open = inner.iter().rposition(|&b| b == b'[')?;
    let start = open.checked_sub(4)?;
    if !inner[start..open].eq_ignore_ascii_case(b"BODY") {
        return None;
    }
    if start > 0 && !matches!(inner[start - 1], b' ' | b'(') {
        return None;
    }
    Some((start, String::from_utf8_lossy(&inner[open + 1..]).into_owned()))
}

/// Returns the section and content of an inline `BODY[...]` item.
fn inline_body(item: &FetchItem) -> Option<(String, Bytes)> {
    let section = item.key.strip_prefix("BODY[")?;
    let section = &section[..section.rfind(']')?];
    let content = match &item.value {
        FetchValue::Other(Value::String(text)) => Bytes::copy_from_slice(text.as_bytes()),
        FetchValue::Other(Value::Nil) => Bytes::new(),
        FetchValue::Other(Value::Number(n)) => Bytes::from(n.to_string()),
        _ => return None,
    };
    Some((section.to_string(), content))
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
    use proptest::prelude::*;

    use super::*;
    use crate::parser::response::Status;

    fn drain(parser: &mut WireParser) -> Vec<WireEvent> {
        std::iter::from_fn(|| parser.next_event()).collect()
    }

    fn parse_chunks(chunks: &[&[u8]]) -> Vec<WireEvent> {
        let mut parser = WireParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            parser.feed(chunk);
            events.extend(drain(&mut parser));
        }
        events
    }

    /// Joins adjacent data chunks so assertions do not depend on chunking.
    fn coalesce(events: Vec<WireEvent>) -> Vec<WireEvent> {
        let mut out: Vec<WireEvent> = Vec::new();
        for event in events {
            if let (WireEvent::BodyData(next), Some(WireEvent::BodyData(prev))) =
                (&event, out.last_mut())
            {
                let mut joined = BytesMut::from(&prev[..]);
                joined.extend_from_slice(next);
                *prev = joined.freeze();
                continue;
            }
            out.push(event);
        }
        out
    }

    fn empty_fetch(seqno: u32) -> WireEvent {
        WireEvent::Response(Response::Untagged(Untagged::Fetch { seqno, items: vec![] }))
    }

    #[test]
    fn test_body_literal() {
        let padded = format!("{}\r\n\r\n", "Subject: x\r\n".repeat(28).trim_end()) + &"y".repeat(4);
        assert_eq!(padded.len(), 342);
        let input = format!("* 1 FETCH (BODY[HEADER] {{342}}\r\n{padded})\r\n");

        let events = coalesce(parse_chunks(&[input.as_bytes()]));
        assert_eq!(
            events,
            vec![
                WireEvent::BodyStart {
                    seqno: 1,
                    section: "HEADER".into(),
                    size: 342,
                },
                WireEvent::BodyData(Bytes::from(padded)),
                WireEvent::BodyEnd,
                empty_fetch(1),
            ]
        );
    }

    #[test]
    fn test_inline_quoted_body() {
        let events = parse_chunks(&[b"* 12 FETCH (BODY[TEXT] \"IMAP is terrible\")\r\n"]);
        assert_eq!(
            events,
            vec![
                WireEvent::BodyStart {
                    seqno: 12,
                    section: "TEXT".into(),
                    size: 16,
                },
                WireEvent::BodyData(Bytes::from_static(b"IMAP is terrible")),
                WireEvent::BodyEnd,
                empty_fetch(12),
            ]
        );
    }

    #[test]
    fn test_inline_body_with_escapes() {
        let events =
            parse_chunks(&[b"* 12 FETCH (BODY[TEXT] \"\\\"IMAP\\\" is terrible :\\\\\")\r\n"]);
        assert_eq!(
            events[1],
            WireEvent::BodyData(Bytes::from_static(b"\"IMAP\" is terrible :\\"))
        );
        assert!(matches!(events[0], WireEvent::BodyStart { size: 21, .. }));
    }

    #[test]
    fn test_body_with_origin_and_other_items() {
        let events = coalesce(parse_chunks(&[
            b"* 3 FETCH (UID 9 BODY[1.2]<0> {5}\r\nhello FLAGS (\\Seen))\r\n",
        ]));
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            WireEvent::BodyStart {
                seqno: 3,
                section: "1.2".into(),
                size: 5,
            }
        );
        assert_eq!(events[1], WireEvent::BodyData(Bytes::from_static(b"hello")));
        let WireEvent::Response(Response::Untagged(Untagged::Fetch { items, .. })) = &events[3]
        else {
            panic!("expected fetch");
        };
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["UID", "FLAGS"]);
    }

    #[test]
    fn test_empty_body_literal() {
        let events = parse_chunks(&[b"* 1 FETCH (BODY[] {0}\r\n)\r\n"]);
        assert_eq!(
            events,
            vec![
                WireEvent::BodyStart {
                    seqno: 1,
                    section: String::new(),
                    size: 0,
                },
                WireEvent::BodyEnd,
                empty_fetch(1),
            ]
        );
    }

    fn internaldate(events: &[WireEvent]) -> String {
        let WireEvent::Response(Response::Untagged(Untagged::Fetch { items, .. })) = &events[0]
        else {
            panic!("expected fetch, got {events:?}");
        };
        let FetchValue::InternalDate(date) = &items[0].value else {
            panic!("expected date");
        };
        date.raw.clone()
    }

    #[test]
    fn test_non_body_literal() {
        let events =
            parse_chunks(&[b"* 1 FETCH (INTERNALDATE {26}\r\n17-Jul-1996 02:44:25 -0700)\r\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(internaldate(&events), "17-Jul-1996 02:44:25 -0700");
    }

    #[test]
    fn test_non_body_literal_split_marker() {
        let events = parse_chunks(&[
            b"* 1 FETCH (INTERNALDATE {2",
            b"6}\r\n17-Jul-1996 02:44:25 -0700)\r\n",
        ]);
        assert_eq!(internaldate(&events), "17-Jul-1996 02:44:25 -0700");
    }

    #[test]
    fn test_non_body_literal_split_crlf() {
        let events = parse_chunks(&[
            b"* 1 FETCH (INTERNALDATE {26}\r",
            b"\n17-Jul-1996 02:44:25 -0700)\r",
            b"\n",
        ]);
        assert_eq!(internaldate(&events), "17-Jul-1996 02:44:25 -0700");
    }

    #[test]
    fn test_multiple_lines_and_bare_lf() {
        let events = parse_chunks(&[b"* 18 EXISTS\n* 2 RECENT\r\nA1 OK done\r\n"]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], WireEvent::Response(Response::Untagged(Untagged::Exists(18))));
        assert_eq!(events[1], WireEvent::Response(Response::Untagged(Untagged::Recent(2))));
        let WireEvent::Response(Response::Tagged(tagged)) = &events[2] else {
            panic!("expected tagged");
        };
        assert_eq!(tagged.status, Status::Ok);
    }

    #[test]
    fn test_literal_in_list_response() {
        let events = parse_chunks(&[b"* LIST () \"/\" {7}\r\nFoo Bar\r\n"]);
        let WireEvent::Response(Response::Untagged(Untagged::List(entry))) = &events[0] else {
            panic!("expected list");
        };
        assert_eq!(entry.name, "Foo Bar");
    }

    #[test]
    fn test_pull_suspends_input() {
        let mut parser = WireParser::new();
        parser.feed(b"* 1 FETCH (BODY[] {4}\r\nab");
        assert!(matches!(parser.next_event(), Some(WireEvent::BodyStart { .. })));
        assert_eq!(parser.next_event(), Some(WireEvent::BodyData(Bytes::from_static(b"ab"))));
        assert_eq!(parser.next_event(), None);
        parser.feed(b"cd)\r\n* 2 EXISTS\r\n");
        assert_eq!(parser.next_event(), Some(WireEvent::BodyData(Bytes::from_static(b"cd"))));
        assert_eq!(parser.next_event(), Some(WireEvent::BodyEnd));
        assert_eq!(parser.next_event(), Some(empty_fetch(1)));
        assert_eq!(
            parser.next_event(),
            Some(WireEvent::Response(Response::Untagged(Untagged::Exists(2))))
        );
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_reset_discards_partial_line() {
        let mut parser = WireParser::new();
        parser.feed(b"A0 OK Begin TLS\r\n* OK [ALERT] pa");
        assert!(matches!(parser.next_event(), Some(WireEvent::Response(Response::Tagged(_)))));
        assert_eq!(parser.next_event(), None);
        assert_eq!(parser.buffered(), 15);

        parser.reset();
        assert_eq!(parser.buffered(), 0);
        parser.feed(b"* 1 EXISTS\r\n");
        assert_eq!(
            parser.next_event(),
            Some(WireEvent::Response(Response::Untagged(Untagged::Exists(1))))
        );
    }

    proptest! {
        #[test]
        fn chunked_body_reassembles(
            body in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut input =
                format!("* 7 FETCH (UID 3 BODY[TEXT] {{{}}}\r\n", body.len()).into_bytes();
            input.extend_from_slice(&body);
            input.extend_from_slice(b")\r\n* 8 EXISTS\r\n");

            let mut points: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
            points.sort_unstable();
            let mut chunks = Vec::new();
            let mut last = 0;
            for point in points {
                chunks.push(&input[last..point]);
                last = point;
            }
            chunks.push(&input[last..]);

            let events = coalesce(parse_chunks(&chunks));
            let mut received = Vec::new();
            for event in &events {
                if let WireEvent::BodyData(data) = event {
                    received.extend_from_slice(data);
                }
            }
            prop_assert_eq!(received, body);
            prop_assert_eq!(
                events.last(),
                Some(&WireEvent::Response(Response::Untagged(Untagged::Exists(8))))
            );
            let fetch = events.iter().find_map(|e| match e {
                WireEvent::Response(Response::Untagged(Untagged::Fetch { items, .. })) => {
                    Some(items.len())
                }
                _ => None,
            });
            prop_assert_eq!(fetch, Some(1));
        }
    }
}
