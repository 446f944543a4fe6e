//! Argument validation for command builders.

use std::fmt;

use crate::{Error, Result};

/// Prefixes a system flag with `\` when the caller left it out.
#[must_use]
pub fn normalize_flag(flag: &str) -> String {
    if flag.starts_with('\\') {
        flag.to_string()
    } else {
        format!("\\{flag}")
    }
}

/// Normalizes an APPEND flag: keywords starting with `$` are kept as is.
#[must_use]
pub fn append_flag(flag: &str) -> String {
    if flag.starts_with('$') {
        flag.to_string()
    } else {
        normalize_flag(flag)
    }
}

/// Rejects keywords containing atom-specials or control characters.
///
/// # Errors
///
/// Returns a validation error naming the keyword.
pub fn validate_keyword(keyword: &str) -> Result<()> {
    let invalid = keyword.is_empty()
        || keyword.chars().any(|c| {
            c.is_ascii_control()
                || matches!(c, ' ' | '(' | ')' | '{' | '%' | '*' | '\\' | '"' | ']')
        });
    if invalid {
        return Err(Error::validation(format!(
            "The keyword \"{keyword}\" contains invalid characters"
        )));
    }
    Ok(())
}

const ID_MAX_KEYS: usize = 30;
const ID_MAX_KEY_LEN: usize = 30;
const ID_MAX_VALUE_LEN: usize = 1024;

/// Checks client identification fields against the RFC 2971 limits.
///
/// # Errors
///
/// Returns a validation error when a limit is exceeded.
pub fn validate_id_params<'a, I>(params: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut count = 0;
    for (key, value) in params {
        count += 1;
        if count > ID_MAX_KEYS {
            return Err(Error::validation("Max allowed number of keys is 30"));
        }
        if key.len() > ID_MAX_KEY_LEN {
            return Err(Error::validation("Max allowed key length is 30"));
        }
        if value.len() > ID_MAX_VALUE_LEN {
            return Err(Error::validation("Max allowed value length is 1024"));
        }
    }
    Ok(())
}

/// `DEPTH` option of GETMETADATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataDepth {
    /// Only the named entries.
    Zero,
    /// Entries and their immediate children.
    One,
    /// The whole subtree.
    Infinity,
}

impl fmt::Display for MetadataDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("0"),
            Self::One => f.write_str("1"),
            Self::Infinity => f.write_str("infinity"),
        }
    }
}

impl std::str::FromStr for MetadataDepth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "0" => Ok(Self::Zero),
            "1" => Ok(Self::One),
            "infinity" => Ok(Self::Infinity),
            _ => Err(Error::validation(format!(
                "Depth must be one of 0, 1, infinity. Got {s}"
            ))),
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

    #[test]
    fn test_normalize_flag() {
        assert_eq!(normalize_flag("Seen"), "\\Seen");
        assert_eq!(normalize_flag("\\Deleted"), "\\Deleted");
        assert_eq!(append_flag("$Forwarded"), "$Forwarded");
        assert_eq!(append_flag("Draft"), "\\Draft");
    }

    #[test]
    fn test_keyword_validation() {
        assert!(validate_keyword("$Label1").is_ok());
        assert!(validate_keyword("Work").is_ok());
        let bad_keywords = [
            "a b", "x(", "y)", "{z", "50%", "*", "back\\slash", "q\"", "]", "tab\t", "del\x7f", "",
        ];
        for bad in bad_keywords {
            assert!(matches!(validate_keyword(bad), Err(Error::Validation(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_id_limits() {
        assert!(validate_id_params([("name", "postline")]).is_ok());
        let long_key = "k".repeat(31);
        assert!(validate_id_params([(long_key.as_str(), "v")]).is_err());
        let long_value = "v".repeat(1025);
        assert!(validate_id_params([("k", long_value.as_str())]).is_err());
        let keys: Vec<String> = (0..31).map(|i| format!("k{i}")).collect();
        assert!(validate_id_params(keys.iter().map(|k| (k.as_str(), "v"))).is_err());
    }

    #[test]
    fn test_metadata_depth() {
        assert_eq!("1".parse::<MetadataDepth>().unwrap(), MetadataDepth::One);
        assert_eq!("Infinity".parse::<MetadataDepth>().unwrap(), MetadataDepth::Infinity);
        assert!("2".parse::<MetadataDepth>().is_err());
        assert_eq!(MetadataDepth::Infinity.to_string(), "infinity");
    }
}
