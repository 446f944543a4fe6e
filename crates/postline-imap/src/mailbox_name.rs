//! Mailbox-name codecs.
//!
//! Names travel over the wire in modified UTF-7 (RFC 3501 section 5.1.3)
//! unless the server accepts UTF-8. The codec is applied to every name
//! embedded in a command and to every name decoded from a response.

use std::borrow::Cow;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Converts mailbox names between their display and wire forms.
pub trait MailboxNameCodec: Send + Sync + std::fmt::Debug {
    /// Encodes a display name for the wire.
    fn encode<'a>(&self, name: &'a str) -> Cow<'a, str>;

    /// Decodes a wire name for display.
    fn decode<'a>(&self, name: &'a str) -> Cow<'a, str>;
}

/// Modified UTF-7, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedUtf7;

/// Pass-through codec for servers that announced `UTF8=ACCEPT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Names;

const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::IMAP_MUTF7,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const fn is_direct(c: char) -> bool {
    matches!(c, ' '..='~') && c != '&'
}

const fn is_base64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b','
}

impl MailboxNameCodec for ModifiedUtf7 {
    fn encode<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if name.chars().all(is_direct) {
            return Cow::Borrowed(name);
        }

        let mut out = String::with_capacity(name.len() + 8);
        let mut pending: Vec<u16> = Vec::new();

        let flush = |pending: &mut Vec<u16>, out: &mut String| {
            if pending.is_empty() {
                return;
            }
            let bytes: Vec<u8> = pending.iter().flat_map(|u| u.to_be_bytes()).collect();
            out.push('&');
            out.push_str(&ENGINE.encode(bytes));
            out.push('-');
            pending.clear();
        };

        for c in name.chars() {
            if is_direct(c) {
                flush(&mut pending, &mut out);
                out.push(c);
            } else if c == '&' {
                flush(&mut pending, &mut out);
                out.push_str("&-");
            } else {
                let mut units = [0u16; 2];
                pending.extend_from_slice(c.encode_utf16(&mut units));
            }
        }
        flush(&mut pending, &mut out);
        Cow::Owned(out)
    }

    /// Decoding is permissive: a shift sequence that does not decode is kept
    /// verbatim and a missing `-` terminator is tolerated.
    fn decode<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if !name.contains('&') {
            return Cow::Borrowed(name);
        }

        let bytes = name.as_bytes();
        let mut out = String::with_capacity(name.len());
        let mut i = 0;

        while i < bytes.len() {
            let Some(offset) = bytes[i..].iter().position(|&b| b == b'&') else {
                out.push_str(&name[i..]);
                break;
            };
            out.push_str(&name[i..i + offset]);
            let start = i + offset + 1;
            let end = bytes[start..]
                .iter()
                .position(|&b| !is_base64(b))
                .map_or(bytes.len(), |n| start + n);
            let next = if bytes.get(end) == Some(&b'-') { end + 1 } else { end };

            if start == end {
                out.push('&');
            } else {
                match decode_utf16(&name[start..end]) {
                    Some(text) => out.push_str(&text),
                    None => out.push_str(&name[start - 1..next]),
                }
            }
            i = next;
        }
        Cow::Owned(out)
    }
}

fn decode_utf16(encoded: &str) -> Option<String> {
    let bytes = ENGINE.decode(encoded).ok()?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

impl MailboxNameCodec for Utf8Names {
    fn encode<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
    }

    fn decode<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
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
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        assert!(matches!(ModifiedUtf7.encode("INBOX/Sent"), Cow::Borrowed("INBOX/Sent")));
        assert_eq!(ModifiedUtf7.decode("INBOX/Sent"), "INBOX/Sent");
    }

    #[test]
    fn test_ampersand() {
        assert_eq!(ModifiedUtf7.encode("Tom & Jerry"), "Tom &- Jerry");
        assert_eq!(ModifiedUtf7.decode("Tom &- Jerry"), "Tom & Jerry");
    }

    #[test]
    fn test_rfc3501_example() {
        let wire = "~peter/mail/&U,BTFw-/&ZeVnLIqe-";
        let name = "~peter/mail/台北/日本語";
        assert_eq!(ModifiedUtf7.encode(name), wire);
        assert_eq!(ModifiedUtf7.decode(wire), name);
    }

    #[test]
    fn test_non_bmp() {
        assert_eq!(ModifiedUtf7.encode("📬"), "&2D3c7A-");
        assert_eq!(ModifiedUtf7.decode("&2D3c7A-"), "📬");
    }

    #[test]
    fn test_permissive_decode() {
        assert_eq!(ModifiedUtf7.decode("&ZeVnLIqe"), "日本語");
        assert_eq!(ModifiedUtf7.decode("a&-b&"), "a&b&");
    }

    #[test]
    fn test_utf8_names() {
        assert_eq!(Utf8Names.encode("Entwürfe"), "Entwürfe");
        assert_eq!(Utf8Names.decode("Entwürfe"), "Entwürfe");
    }

    proptest! {
        #[test]
        fn round_trips(name in "\\PC{0,24}") {
            let encoded = ModifiedUtf7.encode(&name).into_owned();
            prop_assert!(encoded.is_ascii());
            prop_assert_eq!(ModifiedUtf7.decode(&encoded), name);
        }
    }
}
