//! Charset conversion.
//!
//! Labels are resolved through the WHATWG encoding standard, so aliases such
//! as `latin1`, `GB2312` or `utf8` all work.

use encoding_rs::Encoding;

use crate::error::{Error, Result};

/// Decodes `bytes` in the named charset.
///
/// # Errors
///
/// Returns [`Error::UnknownCharset`] if the label is not recognised.
pub fn decode_strict(label: &str, bytes: &[u8]) -> Result<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::UnknownCharset(label.to_string()))?;
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    Ok(text.into_owned())
}

/// Decodes `bytes` in the named charset, falling back to lossy UTF-8 for
/// unknown labels.
#[must_use]
pub fn decode(label: &str, bytes: &[u8]) -> String {
    decode_strict(label, bytes).unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
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
    fn test_decode_latin1() {
        assert_eq!(decode("iso-8859-1", &[0xA1, b'H', b'o', b'l', b'a']), "¡Hola");
    }

    #[test]
    fn test_decode_gb2312() {
        assert_eq!(decode("GB2312", &[0xB2, 0xE2, 0xCA, 0xD4]), "测试");
    }

    #[test]
    fn test_unknown_charset_falls_back() {
        assert!(decode_strict("x-no-such-charset", b"abc").is_err());
        assert_eq!(decode("x-no-such-charset", b"abc"), "abc");
    }
}
