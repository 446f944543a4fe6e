//! Server capabilities.

use std::collections::BTreeSet;

/// Capabilities advertised by the server, stored uppercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<String>);

impl Capabilities {
    /// Builds a set from capability atoms.
    pub fn new<I, S>(atoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(atoms.into_iter().map(|a| a.as_ref().to_ascii_uppercase()).collect())
    }

    /// Returns true if `name` was advertised. Case-insensitive.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_uppercase())
    }

    /// Returns true if `AUTH=<mechanism>` was advertised.
    #[must_use]
    pub fn has_auth(&self, mechanism: &str) -> bool {
        self.has(&format!("AUTH={mechanism}"))
    }

    /// Returns true if nothing has been learned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the capability atoms.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether non-synchronizing literals may be sent.
    #[must_use]
    pub fn literal_plus(&self) -> bool {
        self.has("LITERAL+")
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
    fn test_case_insensitive() {
        let caps = Capabilities::new(["IMAP4rev1", "idle", "AUTH=XOAUTH2", "LITERAL+"]);
        assert!(caps.has("IDLE"));
        assert!(caps.has("imap4rev1"));
        assert!(caps.has_auth("xoauth2"));
        assert!(!caps.has_auth("PLAIN"));
        assert!(caps.literal_plus());
        assert_eq!(caps.iter().count(), 4);
    }
}
