//! IMAP command builder.
//!
//! A [`Command`] is the text that follows the tag, split into segments at
//! every literal. The first segment is written right after the tag; each
//! later segment starts with literal bytes and is written once the server
//! sends a continuation, or immediately when every literal is
//! non-synchronizing. Every segment is terminated with CRLF on the wire.

mod search;
mod tag_generator;
mod validate;

pub use search::{SearchKey, SortCriterion, SortKey, has_non_ascii};
pub use tag_generator::TagGenerator;
pub use validate::{
    MetadataDepth, append_flag, normalize_flag, validate_id_params, validate_keyword,
};

use crate::parser::{Value, escape};

/// What the correlator must do beyond collecting data for a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Plain command; untagged data is collected for the caller.
    #[default]
    Generic,
    /// `CAPABILITY`.
    Capability,
    /// `LOGIN`; capabilities are forgotten until the server resends them.
    Login,
    /// `AUTHENTICATE XOAUTH` or `XOAUTH2`.
    Authenticate,
    /// `STARTTLS`; dispatch pauses for the TLS upgrade after OK.
    StartTls,
    /// `LOGOUT`; the BYE it provokes is expected.
    Logout,
    /// `SELECT` or `EXAMINE`; a fresh mailbox record is projected.
    Select {
        /// Display name of the mailbox.
        name: String,
    },
    /// `CLOSE`, `UNSELECT` or the select-nonexistent fallback.
    Close,
    /// `LIST "" ""` issued during login to learn the delimiter.
    Delimiter,
    /// `FETCH` or `UID FETCH`.
    Fetch {
        /// Requested non-body items, uppercased.
        items: Vec<String>,
        /// Requested body sections, decoded for structural comparison.
        bodies: Vec<Vec<Value>>,
    },
    /// Keepalive `IDLE`, sent with the fixed tag `IDLE`.
    Idle,
    /// Keepalive `NOOP`, sent with the fixed tag `NOOP`.
    Noop,
}

impl CommandKind {
    /// Fixed tag used by the internal keepalive commands.
    #[must_use]
    pub const fn fixed_tag(&self) -> Option<&'static str> {
        match self {
            Self::Idle => Some("IDLE"),
            Self::Noop => Some("NOOP"),
            _ => None,
        }
    }
}

/// A command ready to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    verb: String,
    segments: Vec<Vec<u8>>,
    nonsync: bool,
    redacted: Option<String>,
}

impl Command {
    /// Starts building a command with the given verb, e.g. `UID FETCH`.
    #[must_use]
    pub fn builder(verb: &str) -> CommandBuilder {
        CommandBuilder::new(verb)
    }

    /// Returns the correlator kind.
    #[must_use]
    pub const fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Returns the verb, e.g. `UID FETCH`.
    #[must_use]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Returns the wire segments without their CRLF terminators.
    #[must_use]
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// True when every literal is non-synchronizing (`{N+}`).
    #[must_use]
    pub const fn is_nonsync(&self) -> bool {
        self.nonsync
    }

    /// Text for logs with credentials masked.
    #[must_use]
    pub fn log_text(&self) -> String {
        self.redacted.clone().unwrap_or_else(|| {
            let first = self.segments.first().map(Vec::as_slice).unwrap_or_default();
            String::from_utf8_lossy(first).into_owned()
        })
    }

    pub(crate) fn into_parts(self) -> (CommandKind, Vec<Vec<u8>>, bool) {
        (self.kind, self.segments, self.nonsync)
    }
}

/// Builder for [`Command`].
///
/// Every argument method writes a separating space before its argument;
/// [`CommandBuilder::raw`] writes text verbatim.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    kind: CommandKind,
    verb: String,
    current: Vec<u8>,
    segments: Vec<Vec<u8>>,
    nonsync: bool,
    literals: usize,
    redacted: Option<String>,
}

impl CommandBuilder {
    fn new(verb: &str) -> Self {
        Self {
            kind: CommandKind::Generic,
            verb: verb.to_string(),
            current: verb.as_bytes().to_vec(),
            segments: Vec::new(),
            nonsync: true,
            literals: 0,
            redacted: None,
        }
    }

    /// Sets the correlator kind.
    #[must_use]
    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Appends text without a separating space.
    #[must_use]
    pub fn raw(mut self, text: &str) -> Self {
        self.current.extend_from_slice(text.as_bytes());
        self
    }

    /// Appends an atom or pre-formatted argument.
    #[must_use]
    pub fn atom(self, atom: &str) -> Self {
        self.raw(" ").raw(atom)
    }

    /// Appends a quoted string.
    #[must_use]
    pub fn quoted(self, text: &str) -> Self {
        self.raw(" \"").raw(&escape(text)).raw("\"")
    }

    /// Appends a string: quoted when ASCII, a synchronizing literal otherwise.
    #[must_use]
    pub fn string(self, text: &str) -> Self {
        if text.is_ascii() {
            self.quoted(text)
        } else {
            self.literal(text.as_bytes(), false)
        }
    }

    /// Appends a literal. The bytes start the next segment.
    #[must_use]
    pub fn literal(mut self, data: &[u8], nonsync: bool) -> Self {
        let marker = if nonsync {
            format!(" {{{}+}}", data.len())
        } else {
            format!(" {{{}}}", data.len())
        };
        self.current.extend_from_slice(marker.as_bytes());
        self.segments.push(std::mem::take(&mut self.current));
        self.current = data.to_vec();
        self.nonsync &= nonsync;
        self.literals += 1;
        self
    }

    /// Replaces the logged form of the command.
    #[must_use]
    pub fn redact(mut self, text: &str) -> Self {
        self.redacted = Some(text.to_string());
        self
    }

    /// Finishes the command.
    #[must_use]
    pub fn build(mut self) -> Command {
        self.segments.push(self.current);
        Command {
            kind: self.kind,
            verb: self.verb,
            segments: self.segments,
            nonsync: self.nonsync || self.literals == 0,
            redacted: self.redacted,
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
    fn test_simple_command() {
        let cmd = Command::builder("EXAMINE").quoted("INBOX").build();
        assert_eq!(cmd.segments(), &[b"EXAMINE \"INBOX\"".to_vec()]);
        assert_eq!(cmd.verb(), "EXAMINE");
        assert!(cmd.is_nonsync());
        assert_eq!(cmd.kind(), &CommandKind::Generic);
    }

    #[test]
    fn test_quoting_escapes() {
        let cmd = Command::builder("LOGIN").quoted("a\"b").quoted("c\\d").build();
        assert_eq!(cmd.segments()[0], b"LOGIN \"a\\\"b\" \"c\\\\d\"");
    }

    #[test]
    fn test_literal_splits_segments() {
        let cmd = Command::builder("UID SEARCH")
            .atom("CHARSET UTF-8")
            .atom("SUBJECT")
            .string("größe")
            .atom("FROM")
            .string("bob")
            .build();
        assert_eq!(cmd.segments().len(), 2);
        assert_eq!(cmd.segments()[0], b"UID SEARCH CHARSET UTF-8 SUBJECT {7}");
        assert_eq!(cmd.segments()[1], "größe FROM \"bob\"".as_bytes());
        assert!(!cmd.is_nonsync());
    }

    #[test]
    fn test_nonsync_literal() {
        let cmd = Command::builder("APPEND")
            .quoted("INBOX")
            .literal(b"hello", true)
            .build();
        assert_eq!(cmd.segments()[0], b"APPEND \"INBOX\" {5+}");
        assert_eq!(cmd.segments()[1], b"hello");
        assert!(cmd.is_nonsync());
    }

    #[test]
    fn test_redacted_log_text() {
        let cmd = Command::builder("LOGIN")
            .quoted("foo")
            .quoted("bar")
            .redact("LOGIN \"foo\" <password>")
            .build();
        assert_eq!(cmd.log_text(), "LOGIN \"foo\" <password>");
        let plain = Command::builder("NOOP").build();
        assert_eq!(plain.log_text(), "NOOP");
    }

    #[test]
    fn test_fixed_tags() {
        assert_eq!(CommandKind::Idle.fixed_tag(), Some("IDLE"));
        assert_eq!(CommandKind::Noop.fixed_tag(), Some("NOOP"));
        assert_eq!(CommandKind::Logout.fixed_tag(), None);
    }
}
