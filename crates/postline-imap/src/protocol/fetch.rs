//! Correlation of FETCH data into per-message streams.
//!
//! Each message opens when its first body or FETCH line arrives and ends
//! once every requested item and section has been seen. Whatever is still
//! open at the tagged completion ends with the data it has.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::fetch::{BodyInfo, BodyStream, FetchMessage, MessageAttributes, MessageEvent};
use crate::parser::{FetchItem, Value, parse_expr};

/// Decodes a section specifier for structural comparison.
///
/// Case, quoting and a partial `<origin.length>` suffix do not matter, so
/// `header.fields (from)` matches `HEADER.FIELDS ("FROM")`.
pub(crate) fn section_key(section: &str) -> Vec<Value> {
    let section = section.split_once('<').map_or(section, |(head, _)| head);
    parse_expr(section.trim().to_ascii_uppercase().as_bytes()).unwrap_or_default()
}

#[derive(Debug)]
struct Entry {
    items: Vec<String>,
    bodies: Vec<Vec<Value>>,
    attrs: MessageAttributes,
    events: mpsc::UnboundedSender<MessageEvent>,
}

impl Entry {
    fn is_complete(&self) -> bool {
        self.items.is_empty() && self.bodies.is_empty()
    }
}

/// Accumulator for one FETCH command.
#[derive(Debug)]
pub(crate) struct FetchAccumulator {
    items: Vec<String>,
    bodies: Vec<Vec<Value>>,
    sink: mpsc::UnboundedSender<FetchMessage>,
    entries: BTreeMap<u32, Entry>,
}

impl FetchAccumulator {
    pub(crate) const fn new(
        items: Vec<String>,
        bodies: Vec<Vec<Value>>,
        sink: mpsc::UnboundedSender<FetchMessage>,
    ) -> Self {
        Self {
            items,
            bodies,
            sink,
            entries: BTreeMap::new(),
        }
    }

    fn open(&mut self, seqno: u32) -> &mut Entry {
        self.entries.entry(seqno).or_insert_with(|| {
            let (events, rx) = mpsc::unbounded_channel();
            if self.sink.send(FetchMessage::new(seqno, rx)).is_err() {
                tracing::trace!(seqno, "fetch stream dropped");
            }
            Entry {
                items: self.items.clone(),
                bodies: self.bodies.clone(),
                attrs: MessageAttributes::default(),
                events,
            }
        })
    }

    /// A body section begins. Returns the sender for its bytes, or `None`
    /// when the section was not requested and must be discarded.
    pub(crate) fn body_start(
        &mut self,
        seqno: u32,
        section: String,
        size: u64,
        buffer: usize,
    ) -> Option<mpsc::Sender<Bytes>> {
        let key = section_key(&section);
        let entry = self.open(seqno);
        let Some(pos) = entry.bodies.iter().position(|b| *b == key) else {
            tracing::debug!(seqno, %section, "discarding unrequested body");
            return None;
        };
        entry.bodies.remove(pos);

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let info = BodyInfo { seqno, section, size };
        // A dropped message handle makes the send fail; the body is then
        // discarded chunk by chunk.
        let _ = entry.events.send(MessageEvent::Body(BodyStream::new(rx), info));
        Some(tx)
    }

    /// Folds the non-body items of a FETCH line. Only items still
    /// outstanding are taken; a repeated item keeps its first value.
    pub(crate) fn fetch_line(&mut self, seqno: u32, items: Vec<FetchItem>) {
        if !self.entries.contains_key(&seqno) && self.items.is_empty() && self.bodies.is_empty() {
            return;
        }
        let entry = self.open(seqno);
        for item in items {
            let key = item.key.to_ascii_uppercase();
            if let Some(pos) = entry.items.iter().position(|i| *i == key) {
                entry.items.remove(pos);
                entry.attrs.apply(item);
            }
        }
        if entry.is_complete() {
            self.end(seqno);
        }
    }

    fn end(&mut self, seqno: u32) {
        if let Some(entry) = self.entries.remove(&seqno) {
            let _ = entry.events.send(MessageEvent::Attributes(Box::new(entry.attrs)));
        }
    }

    /// Ends every open message at the tagged completion.
    pub(crate) fn finish(mut self) {
        let open: Vec<u32> = self.entries.keys().copied().collect();
        for seqno in open {
            tracing::debug!(seqno, "ending incomplete message");
            self.end(seqno);
        }
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
    use crate::parser::FetchValue;

    fn accumulator(
        items: &[&str],
        bodies: &[&str],
    ) -> (FetchAccumulator, mpsc::UnboundedReceiver<FetchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let acc = FetchAccumulator::new(
            items.iter().map(|s| (*s).to_string()).collect(),
            bodies.iter().map(|s| section_key(s)).collect(),
            tx,
        );
        (acc, rx)
    }

    fn uid(n: u32) -> FetchItem {
        FetchItem {
            key: "UID".into(),
            value: FetchValue::Uid(n),
        }
    }

    #[test]
    fn test_section_key_is_structural() {
        assert_eq!(
            section_key("header.fields (from to)"),
            section_key("HEADER.FIELDS (\"FROM\" \"TO\")")
        );
        assert_eq!(section_key("TEXT<0.100>"), section_key("TEXT"));
        assert_ne!(section_key("1.TEXT"), section_key("TEXT"));
    }

    #[tokio::test]
    async fn test_bodies_then_line_end_message() {
        let (mut acc, mut rx) =
            accumulator(&["UID"], &["TEXT", "HEADER.FIELDS (FROM TO SUBJECT DATE)"]);

        let text = acc.body_start(1, "TEXT".into(), 13, 4).unwrap();
        let mut message = rx.try_recv().unwrap();
        assert_eq!(message.seqno, 1);
        text.send(Bytes::from_static(b"Hello\r\nWorld!")).await.unwrap();
        drop(text);

        let header = acc.body_start(1, "HEADER.FIELDS (FROM TO SUBJECT DATE)".into(), 130, 4);
        assert!(header.is_some());
        drop(header);
        acc.fetch_line(1, vec![uid(1)]);

        let Some(MessageEvent::Body(body, info)) = message.next_event().await else {
            panic!("expected body");
        };
        assert_eq!(info.section, "TEXT");
        assert_eq!(&body.collect().await[..], b"Hello\r\nWorld!");
        assert!(matches!(message.next_event().await, Some(MessageEvent::Body(..))));
        let Some(MessageEvent::Attributes(attrs)) = message.next_event().await else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.uid, Some(1));
        assert!(message.next_event().await.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unrequested_body_is_discarded() {
        let (mut acc, mut rx) = accumulator(&["UID"], &["TEXT"]);
        assert!(acc.body_start(3, "HEADER".into(), 10, 4).is_none());
        assert_eq!(rx.try_recv().unwrap().seqno, 3);
        assert!(acc.body_start(3, "TEXT".into(), 10, 4).is_some());
        assert!(acc.body_start(3, "TEXT".into(), 10, 4).is_none());
    }

    #[tokio::test]
    async fn test_split_lines_merge_into_one_message() {
        let (mut acc, mut rx) = accumulator(&["UID", "FLAGS"], &[]);
        acc.fetch_line(
            2,
            vec![FetchItem {
                key: "FLAGS".into(),
                value: FetchValue::Flags(vec!["\\Seen".into()]),
            }],
        );
        acc.fetch_line(2, vec![uid(9)]);
        let mut message = rx.try_recv().unwrap();
        let Some(MessageEvent::Attributes(attrs)) = message.next_event().await else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.uid, Some(9));
        assert_eq!(attrs.flags, Some(vec!["\\Seen".to_string()]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_item_keeps_first_value() {
        let (mut acc, mut rx) = accumulator(&["UID", "FLAGS"], &[]);
        acc.fetch_line(1, vec![uid(1)]);
        acc.fetch_line(1, vec![uid(1000)]);
        acc.fetch_line(
            1,
            vec![FetchItem {
                key: "FLAGS".into(),
                value: FetchValue::Flags(vec![]),
            }],
        );
        let mut message = rx.try_recv().unwrap();
        let Some(MessageEvent::Attributes(attrs)) = message.next_event().await else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.uid, Some(1));
    }

    #[tokio::test]
    async fn test_finish_ends_incomplete_messages() {
        let (mut acc, mut rx) = accumulator(&["UID", "ENVELOPE"], &[]);
        acc.fetch_line(4, vec![uid(40)]);
        acc.finish();
        let mut message = rx.try_recv().unwrap();
        let Some(MessageEvent::Attributes(attrs)) = message.next_event().await else {
            panic!("expected attributes");
        };
        assert_eq!(attrs.uid, Some(40));
        assert!(attrs.envelope.is_none());
    }

    #[test]
    fn test_nothing_requested_opens_nothing() {
        let (mut acc, mut rx) = accumulator(&[], &[]);
        acc.fetch_line(1, vec![uid(1)]);
        assert!(rx.try_recv().is_err());
    }
}
