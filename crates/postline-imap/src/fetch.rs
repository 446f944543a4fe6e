//! Streaming fetch results.
//!
//! A FETCH produces a [`FetchStream`] of [`FetchMessage`]s. Each message
//! yields its body sections as [`BodyStream`]s while the bytes arrive,
//! followed by exactly one [`MessageEvent::Attributes`].
//!
//! Body channels are bounded. While a body is not being read, the connection
//! stops reading from the socket, so a slow consumer slows the server down
//! instead of growing a buffer. Read or drop each body before asking for the
//! next event.

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use postline_mime::Headers;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};

use crate::parser::{BodyStructure, Envelope, FetchItem, FetchValue, ImapDate, Value};
use crate::protocol::Completion;
use crate::{Error, Result};

/// What to request for each message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Body sections, e.g. `HEADER`, `TEXT` or `1.2`.
    pub bodies: Vec<String>,
    /// Request `ENVELOPE`.
    pub envelope: bool,
    /// Request `BODYSTRUCTURE`.
    pub structure: bool,
    /// Request `RFC822.SIZE`.
    pub size: bool,
    /// Request `MODSEQ` (needs CONDSTORE).
    pub modseq: bool,
    /// Extra data items, e.g. `X-CUSTOM`.
    pub extensions: Vec<String>,
    /// Use `BODY[]` instead of `BODY.PEEK[]`, which sets `\Seen`.
    pub mark_seen: bool,
    /// Only messages whose MODSEQ is higher (`CHANGEDSINCE`).
    pub changed_since: Option<u64>,
    /// Ask for `VANISHED` data along with `CHANGEDSINCE` (needs QRESYNC).
    pub vanished: bool,
}

impl FetchOptions {
    /// Creates options that fetch only UID, flags and internal date.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a body section.
    #[must_use]
    pub fn body(mut self, section: &str) -> Self {
        self.bodies.push(section.to_string());
        self
    }

    /// Adds the full header block.
    #[must_use]
    pub fn headers(self) -> Self {
        self.body("HEADER")
    }

    /// Adds selected header fields.
    #[must_use]
    pub fn header_fields(self, fields: &[&str]) -> Self {
        let fields = fields.iter().map(|f| f.to_ascii_uppercase()).collect::<Vec<_>>().join(" ");
        self.body(&format!("HEADER.FIELDS ({fields})"))
    }

    /// Requests the envelope.
    #[must_use]
    pub const fn envelope(mut self) -> Self {
        self.envelope = true;
        self
    }

    /// Requests the body structure.
    #[must_use]
    pub const fn structure(mut self) -> Self {
        self.structure = true;
        self
    }

    /// Requests the message size.
    #[must_use]
    pub const fn size(mut self) -> Self {
        self.size = true;
        self
    }

    /// Requests the MODSEQ of each message.
    #[must_use]
    pub const fn modseq(mut self) -> Self {
        self.modseq = true;
        self
    }

    /// Requests an extension data item.
    #[must_use]
    pub fn extension(mut self, item: &str) -> Self {
        self.extensions.push(item.to_ascii_uppercase());
        self
    }

    /// Marks fetched messages as seen.
    #[must_use]
    pub const fn mark_seen(mut self) -> Self {
        self.mark_seen = true;
        self
    }

    /// Restricts the fetch to messages changed since `modseq`.
    #[must_use]
    pub const fn changed_since(mut self, modseq: u64) -> Self {
        self.changed_since = Some(modseq);
        self
    }

    /// Asks the server to report expunged UIDs too.
    #[must_use]
    pub const fn vanished(mut self) -> Self {
        self.vanished = true;
        self
    }
}

/// Non-body data of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageAttributes {
    /// `UID`.
    pub uid: Option<u32>,
    /// `FLAGS`.
    pub flags: Option<Vec<String>>,
    /// `INTERNALDATE`.
    pub date: Option<ImapDate>,
    /// `RFC822.SIZE`.
    pub size: Option<u64>,
    /// `ENVELOPE`.
    pub envelope: Option<Envelope>,
    /// `BODYSTRUCTURE`.
    pub structure: Option<BodyStructure>,
    /// `MODSEQ`, kept as text.
    pub modseq: Option<String>,
    /// `X-GM-LABELS`.
    pub gmail_labels: Option<Vec<String>>,
    /// `X-GM-THRID`.
    pub gmail_thread_id: Option<String>,
    /// `X-GM-MSGID`.
    pub gmail_message_id: Option<String>,
    /// Other items keyed by lowercased name.
    pub extensions: BTreeMap<String, Value>,
}

impl MessageAttributes {
    /// Builds attributes from the items of an unsolicited FETCH.
    #[must_use]
    pub fn from_items(items: Vec<FetchItem>) -> Self {
        let mut attrs = Self::default();
        for item in items {
            attrs.apply(item);
        }
        attrs
    }

    /// Folds one FETCH item in.
    pub fn apply(&mut self, item: FetchItem) {
        match item.value {
            FetchValue::Uid(uid) => self.uid = Some(uid),
            FetchValue::Flags(flags) => self.flags = Some(flags),
            FetchValue::InternalDate(date) => self.date = Some(date),
            FetchValue::Size(size) => self.size = Some(size),
            FetchValue::Envelope(envelope) => self.envelope = Some(*envelope),
            FetchValue::Structure(structure) => self.structure = Some(*structure),
            FetchValue::ModSeq(modseq) => self.modseq = Some(modseq),
            FetchValue::Labels(labels) => self.gmail_labels = Some(labels),
            FetchValue::Id(id) if item.key == "X-GM-THRID" => self.gmail_thread_id = Some(id),
            FetchValue::Id(id) => self.gmail_message_id = Some(id),
            FetchValue::Other(value) => {
                self.extensions.insert(item.key.to_ascii_lowercase(), value);
            }
        }
    }
}

/// Describes a body section as the server labelled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyInfo {
    /// Message sequence number.
    pub seqno: u32,
    /// Section specifier, e.g. `HEADER.FIELDS (FROM TO)`.
    pub section: String,
    /// Announced size in bytes.
    pub size: u64,
}

impl BodyInfo {
    /// Whether the section is a header block.
    #[must_use]
    pub fn is_header(&self) -> bool {
        let upper = self.section.to_ascii_uppercase();
        upper.starts_with("HEADER") || upper.ends_with(".HEADER") || upper.contains(".HEADER.")
    }
}

/// The bytes of one body section.
///
/// Implements [`AsyncRead`]; ends when the section is complete. A stream
/// that ends short of [`BodyInfo::size`] was cut off by a connection failure,
/// which the fetch completion reports.
#[derive(Debug)]
pub struct BodyStream {
    rx: mpsc::Receiver<Bytes>,
    chunk: Bytes,
}

impl BodyStream {
    pub(crate) const fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx, chunk: Bytes::new() }
    }

    /// Returns the next chunk, or `None` at the end of the section.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        if !self.chunk.is_empty() {
            return Some(std::mem::take(&mut self.chunk));
        }
        self.rx.recv().await
    }

    /// Reads the rest of the section into memory.
    pub async fn collect(mut self) -> Bytes {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

impl AsyncRead for BodyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.chunk.is_empty() {
                let n = self.chunk.len().min(buf.remaining());
                let part = self.chunk.split_to(n);
                buf.put_slice(&part);
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.chunk = chunk,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// One event of a fetched message.
#[derive(Debug)]
pub enum MessageEvent {
    /// A body section begins streaming.
    Body(BodyStream, BodyInfo),
    /// All non-body data; always the last event.
    Attributes(Box<MessageAttributes>),
}

/// One message of a fetch.
#[derive(Debug)]
pub struct FetchMessage {
    /// Message sequence number.
    pub seqno: u32,
    events: mpsc::UnboundedReceiver<MessageEvent>,
}

impl FetchMessage {
    pub(crate) const fn new(seqno: u32, events: mpsc::UnboundedReceiver<MessageEvent>) -> Self {
        Self { seqno, events }
    }

    /// Returns the next event, or `None` once the message ended.
    pub async fn next_event(&mut self) -> Option<MessageEvent> {
        self.events.recv().await
    }
}

/// A fully buffered body section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// Section description.
    pub info: BodyInfo,
    /// Section bytes.
    pub data: Bytes,
}

impl FetchedBody {
    /// Parses the section as a header block, if it is one.
    #[must_use]
    pub fn headers(&self) -> Option<Headers> {
        self.info.is_header().then(|| Headers::parse_bytes(&self.data))
    }
}

/// A fully buffered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message sequence number.
    pub seqno: u32,
    /// Non-body data.
    pub attributes: MessageAttributes,
    /// Body sections in arrival order.
    pub bodies: Vec<FetchedBody>,
}

impl FetchedMessage {
    /// Returns the first body with the given section, compared
    /// case-insensitively.
    #[must_use]
    pub fn body(&self, section: &str) -> Option<&FetchedBody> {
        self.bodies.iter().find(|b| b.info.section.eq_ignore_ascii_case(section))
    }
}

/// Messages of an in-flight fetch plus its completion.
#[derive(Debug)]
pub struct FetchStream {
    messages: mpsc::UnboundedReceiver<FetchMessage>,
    done: oneshot::Receiver<Result<Completion>>,
}

impl FetchStream {
    pub(crate) const fn new(
        messages: mpsc::UnboundedReceiver<FetchMessage>,
        done: oneshot::Receiver<Result<Completion>>,
    ) -> Self {
        Self { messages, done }
    }

    /// Returns the next message, or `None` when the fetch is over.
    pub async fn next(&mut self) -> Option<FetchMessage> {
        self.messages.recv().await
    }

    /// Discards remaining messages and waits for the tagged completion.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or the connection failure.
    pub async fn finish(mut self) -> Result<()> {
        while self.messages.recv().await.is_some() {}
        self.done.await.map_err(|_| Error::Closed)?.map(|_| ())
    }

    /// Buffers every message and body.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or the connection failure.
    pub async fn all(mut self) -> Result<Vec<FetchedMessage>> {
        let mut out = Vec::new();
        while let Some(mut message) = self.messages.recv().await {
            let mut fetched = FetchedMessage {
                seqno: message.seqno,
                attributes: MessageAttributes::default(),
                bodies: Vec::new(),
            };
            while let Some(event) = message.next_event().await {
                match event {
                    MessageEvent::Body(stream, info) => {
                        let data = stream.collect().await;
                        fetched.bodies.push(FetchedBody { info, data });
                    }
                    MessageEvent::Attributes(attrs) => fetched.attributes = *attrs,
                }
            }
            out.push(fetched);
        }
        self.done.await.map_err(|_| Error::Closed)??;
        Ok(out)
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
    use tokio::io::AsyncReadExt;

    use super::*;

    fn item(key: &str, value: FetchValue) -> FetchItem {
        FetchItem {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_options_builder() {
        let options = FetchOptions::new()
            .header_fields(&["from", "Subject"])
            .body("TEXT")
            .envelope()
            .size()
            .changed_since(12345)
            .vanished();
        assert_eq!(options.bodies, vec!["HEADER.FIELDS (FROM SUBJECT)", "TEXT"]);
        assert!(options.envelope && options.size && options.vanished);
        assert!(!options.structure && !options.mark_seen);
        assert_eq!(options.changed_since, Some(12345));
    }

    #[test]
    fn test_attributes_from_items() {
        let attrs = MessageAttributes::from_items(vec![
            item("UID", FetchValue::Uid(7)),
            item("FLAGS", FetchValue::Flags(vec!["\\Seen".into()])),
            item("X-GM-THRID", FetchValue::Id("1278455344230334865".into())),
            item("X-GM-MSGID", FetchValue::Id("1278455344230334866".into())),
            item("X-CUSTOM", FetchValue::Other(Value::Number(3))),
        ]);
        assert_eq!(attrs.uid, Some(7));
        assert_eq!(attrs.flags, Some(vec!["\\Seen".to_string()]));
        assert_eq!(attrs.gmail_thread_id.as_deref(), Some("1278455344230334865"));
        assert_eq!(attrs.gmail_message_id.as_deref(), Some("1278455344230334866"));
        assert_eq!(attrs.extensions.get("x-custom"), Some(&Value::Number(3)));
    }

    #[test]
    fn test_header_sections() {
        let info = |section: &str| BodyInfo {
            seqno: 1,
            section: section.to_string(),
            size: 0,
        };
        assert!(info("HEADER").is_header());
        assert!(info("header.fields (FROM)").is_header());
        assert!(info("1.2.HEADER").is_header());
        assert!(!info("TEXT").is_header());
        assert!(!info("1").is_header());
    }

    #[tokio::test]
    async fn test_body_stream_reads_across_chunks() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = BodyStream::new(rx);
        tx.send(Bytes::from_static(b"Hello\r\n")).await.unwrap();
        tx.send(Bytes::from_static(b"World!")).await.unwrap();
        drop(tx);

        let mut small = [0u8; 4];
        let n = stream.read(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"Hell");
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"o\r\nWorld!");
    }

    #[tokio::test]
    async fn test_all_buffers_messages() {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let stream = FetchStream::new(msg_rx, done_rx);

        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        msg_tx.send(FetchMessage::new(1, ev_rx)).unwrap();
        let (body_tx, body_rx) = mpsc::channel(4);
        let info = BodyInfo {
            seqno: 1,
            section: "HEADER".into(),
            size: 17,
        };
        ev_tx.send(MessageEvent::Body(BodyStream::new(body_rx), info)).unwrap();
        body_tx.send(Bytes::from_static(b"Subject: hi\r\n\r\n")).await.unwrap();
        drop(body_tx);
        let attrs = MessageAttributes {
            uid: Some(42),
            ..MessageAttributes::default()
        };
        ev_tx.send(MessageEvent::Attributes(Box::new(attrs))).unwrap();
        drop(ev_tx);
        drop(msg_tx);
        done_tx.send(Ok(Completion::default())).unwrap();

        let messages = stream.all().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].attributes.uid, Some(42));
        let headers = messages[0].body("header").unwrap().headers().unwrap();
        assert_eq!(headers.get("subject"), Some("hi"));
    }

    #[tokio::test]
    async fn test_finish_reports_closed() {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<FetchMessage>();
        let (done_tx, done_rx) = oneshot::channel();
        drop(msg_tx);
        drop(done_tx);
        let err = FetchStream::new(msg_rx, done_rx).finish().await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
