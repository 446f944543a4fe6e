//! IMAP response parsing.
//!
//! Layered bottom-up: [`lexer`] tokenizes a logical line, [`expr`] decodes
//! tokens into [`Value`] trees, the envelope and bodystructure decoders build
//! on those, [`response`] classifies whole lines and [`wire`] turns raw
//! transport bytes into events.

pub mod bodystructure;
pub mod date;
pub mod envelope;
pub mod expr;
pub mod lexer;
pub mod response;
pub mod wire;

pub use bodystructure::{BodyPart, BodyStructure, Disposition, Multipart, Params};
pub use date::{ImapDate, format_date_time};
pub use envelope::{Address, AddressEntry, Envelope, parse_addresses};
pub use expr::{MAX_EXACT_NUMBER, Value, escape, parse_expr, quote};
pub use response::{
    Esearch, FetchItem, FetchValue, ListEntry, Metadata, Namespace, Namespaces, Quota,
    QuotaResource, Response, Status, StatusData, StatusText, Tagged, TextCode, Untagged, classify,
};
pub use wire::{WireEvent, WireParser};
