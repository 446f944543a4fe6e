//! # postline-imap
//!
//! An async IMAP4rev1 client engine that pipelines commands through a single
//! queue, streams message bodies with backpressure and keeps the selected
//! mailbox in sync from unsolicited server data.
//!
//! ## Features
//!
//! - **Command queue**: any number of callers, one command in flight; each
//!   operation resolves with the data gathered while it ran
//! - **Streaming bodies**: FETCH body literals arrive as bounded
//!   [`BodyStream`]s; an unread body pauses socket reads
//! - **Keepalive**: IDLE when the server supports it, NOOP otherwise, with
//!   `DONE` held back until the IDLE continuation arrived
//! - **Extensions**: CONDSTORE/QRESYNC, UIDPLUS, LITERAL+, MOVE, SORT,
//!   THREAD, ESEARCH, METADATA, QUOTA, NAMESPACE, ID and the Gmail extensions
//! - **TLS via rustls**: implicit TLS or STARTTLS, no OpenSSL
//! - **Sans-I/O core**: the wire parser and the command correlator never
//!   touch a socket and can be driven directly
//!
//! ## Quick Start
//!
//! ```ignore
//! use postline_imap::{Client, Config, FetchOptions, LoggingHandler, OpenOptions, SearchKey};
//!
//! #[tokio::main]
//! async fn main() -> postline_imap::Result<()> {
//!     let config = Config::builder("imap.example.com")
//!         .login("user@example.com", "password")
//!         .build();
//!     let client = Client::connect(config, LoggingHandler).await?;
//!
//!     let boxes = client.get_boxes("").await?;
//!     for name in boxes.keys() {
//!         println!("Folder: {name}");
//!     }
//!
//!     client.open_box("INBOX", OpenOptions::read_only()).await?;
//!     let unseen = client.search(&[SearchKey::Unseen]).await?;
//!     if let Ok(uids) = postline_imap::SequenceSet::from_ids(&unseen.ids) {
//!         let mut fetch = client.fetch(&uids, &FetchOptions::new().headers())?;
//!         while let Some(mut message) = fetch.next().await {
//!             while let Some(event) = message.next_event().await {
//!                 println!("{} -> {event:?}", message.seqno);
//!             }
//!         }
//!         fetch.finish().await?;
//!     }
//!
//!     client.end().await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ── login ──→ Authenticating ──→ Authenticated ── LOGOUT/BYE ──→ Closing
//!     │                                          │
//!     └───────────── transport closed ───────────┴──────────────────────────→ Disconnected
//! ```
//!
//! ## Modules
//!
//! - [`client`]: the async API
//! - [`command`]: command builder, search compiler and argument validation
//! - [`connection`]: configuration, transport and TLS
//! - [`parser`]: sans-I/O wire parser and grammar decoder
//! - [`protocol`]: sans-I/O command queue, correlator and keepalive scheduler
//! - [`types`]: capabilities, sequence sets and mailbox listings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod command;
pub mod connection;
mod error;
mod fetch;
mod handler;
mod mailbox_name;
pub mod parser;
pub mod protocol;
pub mod types;

pub use client::{
    AppendOptions, AppendUid, Client, CopyUid, EsearchReturn, IdFields, Messages, OpenOptions,
    QresyncParams, SearchResults,
};
pub use command::{Command, MetadataDepth, SearchKey, SortCriterion, SortKey};
pub use connection::{AutoTls, Config, ConfigBuilder, Credentials, Security, Transport};
pub use error::{Error, ErrorSource, ProtocolErrorKind, Result, TimeoutSource};
pub use fetch::{
    BodyInfo, BodyStream, FetchMessage, FetchOptions, FetchStream, FetchedBody, FetchedMessage,
    MessageAttributes, MessageEvent,
};
pub use handler::{ChannelHandler, EventHandler, LoggingHandler, NoopHandler, Notification};
pub use mailbox_name::{MailboxNameCodec, ModifiedUtf7, Utf8Names};
pub use parser::{
    Address, BodyStructure, Envelope, Esearch, ImapDate, Metadata, Namespaces, Quota, QuotaResource,
};
pub use protocol::{Completion, Keepalive, Mailbox, MessageCounts, SessionState};
pub use types::{Capabilities, MailboxNode, MailboxStatus, MailboxTree, SequenceSet};
