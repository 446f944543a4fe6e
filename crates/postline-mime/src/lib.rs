//! # postline-mime
//!
//! Header-block and MIME encoded-word decoding for mail clients.
//!
//! ## Features
//!
//! - **Header blocks**: RFC 822 unfolding into a case-insensitive,
//!   multi-valued header map
//! - **Encoded words**: RFC 2047 `Q` and `B` encodings, including adjacent
//!   words that split a multi-byte character or a base64 quantum
//! - **Charsets**: any label known to the WHATWG encoding standard
//!
//! ## Quick Start
//!
//! ```
//! use postline_mime::Headers;
//!
//! let headers = Headers::parse("Subject: =?iso-8859-1?Q?=A1Hola,_se=F1or!?=\r\n\r\nbody");
//! assert_eq!(headers.get("subject"), Some("¡Hola, señor!"));
//! ```
//!
//! ```
//! use postline_mime::encoding::decode_words;
//!
//! assert_eq!(decode_words("=?utf-8?B?SGVsbG8=?= =?utf-8?Q?_World?="), "Hello World");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;

pub mod charset;
pub mod encoding;

pub use error::{Error, Result};
pub use header::Headers;
