//! MIME encoded-word decoding.
//!
//! Supports the RFC 2047 `Q` and `B` encodings. Decoding is best effort:
//! malformed words are passed through rather than rejected, because header
//! values come from arbitrary mail software.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::charset;

/// Base64 engine that tolerates missing padding and stray trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes base64 leniently.
///
/// Whitespace is ignored, padding is optional, and undecodable input yields
/// an empty vector.
#[must_use]
pub fn decode_base64(data: &str) -> Vec<u8> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT.decode(cleaned.trim_end_matches('=')).unwrap_or_default()
}

/// Decodes the `Q` encoding of RFC 2047 section 4.2.
///
/// `_` stands for a space and `=XX` for a raw byte. An `=` that does not
/// start a valid escape is kept as is.
#[must_use]
pub fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'=');
            }
            b => out.push(b),
        }
        i += 1;
    }

    out
}

/// One piece of a header value: plain text or an encoded word.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Word {
        charset: &'a str,
        base64: bool,
        text: &'a str,
    },
}

/// Splits `input` into plain text and encoded words.
fn split_words(input: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(offset) = input[pos..].find("=?") {
        let start = pos + offset;
        if let Some((word, end)) = parse_word(input, start) {
            if start > text_start {
                pieces.push(Piece::Text(&input[text_start..start]));
            }
            pieces.push(word);
            text_start = end;
            pos = end;
        } else {
            pos = start + 1;
        }
    }

    if text_start < input.len() {
        pieces.push(Piece::Text(&input[text_start..]));
    }
    pieces
}

/// Parses `=?charset[*lang]?enc?text?=` starting at `start`.
fn parse_word(input: &str, start: usize) -> Option<(Piece<'_>, usize)> {
    let body = &input[start + 2..];
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 language suffix
    let charset = charset.split_once('*').map_or(charset, |(name, _)| name);

    let rest = &body[charset_end + 1..];
    let mut chars = rest.chars();
    let base64 = match chars.next()? {
        'B' | 'b' => true,
        'Q' | 'q' => false,
        _ => return None,
    };
    if chars.next()? != '?' {
        return None;
    }

    let text_area = &rest[2..];
    let text_end = text_area.find("?=")?;
    let text = &text_area[..text_end];
    let end = start + 2 + charset_end + 1 + 2 + text_end + 2;

    Some((
        Piece::Word {
            charset,
            base64,
            text,
        },
        end,
    ))
}

/// Accumulates the bytes of a run of same-charset encoded words.
struct Run<'a> {
    charset: &'a str,
    bytes: Vec<u8>,
    carry: String,
}

impl<'a> Run<'a> {
    fn new(charset: &'a str) -> Self {
        Self {
            charset,
            bytes: Vec::new(),
            carry: String::new(),
        }
    }

    fn push(&mut self, base64: bool, text: &str) {
        if base64 {
            self.carry.push_str(text);
            if self.carry.contains('=') {
                self.bytes.extend(decode_base64(&self.carry));
                self.carry.clear();
            } else {
                let whole = self.carry.len() - self.carry.len() % 4;
                self.bytes.extend(decode_base64(&self.carry[..whole]));
                self.carry.drain(..whole);
            }
        } else {
            self.flush_carry();
            self.bytes.extend(decode_q(text));
        }
    }

    fn flush_carry(&mut self) {
        if !self.carry.is_empty() {
            self.bytes.extend(decode_base64(&self.carry));
            self.carry.clear();
        }
    }

    fn finish(mut self, out: &mut String) {
        self.flush_carry();
        out.push_str(&charset::decode(self.charset, &self.bytes));
    }
}

/// Decodes every encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped. Adjacent words
/// in the same charset are decoded together, so a multi-byte character or a
/// base64 quantum split across words comes out intact. Text outside encoded
/// words is kept verbatim.
#[must_use]
pub fn decode_words(input: &str) -> String {
    let pieces = split_words(input);
    let mut out = String::with_capacity(input.len());
    let mut run: Option<Run<'_>> = None;

    for (i, piece) in pieces.iter().enumerate() {
        match *piece {
            Piece::Text(text) => {
                let between_words = text.trim().is_empty()
                    && i > 0
                    && matches!(pieces.get(i + 1), Some(Piece::Word { .. }))
                    && matches!(pieces[i - 1], Piece::Word { .. });
                if between_words {
                    continue;
                }
                if let Some(done) = run.take() {
                    done.finish(&mut out);
                }
                out.push_str(text);
            }
            Piece::Word {
                charset,
                base64,
                text,
            } => {
                let same = run
                    .as_ref()
                    .is_some_and(|r| r.charset.eq_ignore_ascii_case(charset));
                if !same {
                    if let Some(done) = run.take() {
                        done.finish(&mut out);
                    }
                    run = Some(Run::new(charset));
                }
                if let Some(current) = run.as_mut() {
                    current.push(base64, text);
                }
            }
        }
    }

    if let Some(done) = run {
        done.finish(&mut out);
    }
    out
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
    fn test_decode_q() {
        assert_eq!(decode_q("a_b=3Dc"), b"a b=c");
        assert_eq!(decode_q("trailing="), b"trailing=");
        assert_eq!(decode_q("=ZZ"), b"=ZZ");
    }

    #[test]
    fn test_decode_base64_lenient() {
        assert_eq!(decode_base64("SGVsbG8="), b"Hello");
        assert_eq!(decode_base64("SGVsbG8"), b"Hello");
        assert_eq!(decode_base64("!!!"), Vec::<u8>::new());
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(decode_words("Hello world"), "Hello world");
        assert_eq!(decode_words("a =? b"), "a =? b");
    }

    #[test]
    fn test_single_word() {
        assert_eq!(
            decode_words("=?iso-8859-1?Q?=A1Hola,_se=F1or!?="),
            "¡Hola, señor!"
        );
    }

    #[test]
    fn test_language_suffix_stripped() {
        assert_eq!(
            decode_words("=?iso-8859-1*es?Q?=A1Hola,_se=F1or!?="),
            "¡Hola, señor!"
        );
        assert_eq!(
            decode_words("=?iso-8859-1*?Q?=A1Hola,_se=F1or!?="),
            "¡Hola, señor!"
        );
    }

    #[test]
    fn test_whitespace_between_words_dropped() {
        assert_eq!(
            decode_words("=?utf-8?Q?a?=   =?utf-8?Q?b?= c =?utf-8?Q?d?="),
            "ab c d"
        );
    }

    #[test]
    fn test_split_multibyte_character() {
        let input = "=?utf-8?Q?=E0=B9=84=E0=B8=A1=E0=B9?= =?utf-8?Q?=88?=";
        assert_eq!(decode_words(input), "ไม่");
    }

    #[test]
    fn test_partial_base64_quantum() {
        // "Hello" split mid-quantum
        assert_eq!(decode_words("=?utf-8?B?SGVs?= =?utf-8?B?bG?= =?utf-8?B?8=?="), "Hello");
    }

    #[test]
    fn test_mixed_charsets() {
        assert_eq!(
            decode_words("=?iso-8859-1?Q?=E9?= =?utf-8?Q?=C3=A9?="),
            "éé"
        );
    }

    #[test]
    fn test_text_prefix_before_word() {
        assert_eq!(decode_words("Re: =?utf-8?B?w6k=?="), "Re: é");
    }

    proptest! {
        #[test]
        fn decoding_never_panics(s in ".*") {
            decode_words(&s);
        }

        #[test]
        fn text_without_words_is_unchanged(s in "[^=]*") {
            prop_assert_eq!(decode_words(&s), s);
        }
    }
}
