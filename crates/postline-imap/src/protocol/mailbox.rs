//! Selected-mailbox record and its projection from server data.

use crate::parser::{TextCode, Value};

/// Message counters of the selected mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    /// Messages in the mailbox.
    pub total: u32,
    /// Messages that arrived since the last count, or the RECENT count.
    pub new: u32,
}

/// State of the currently selected mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name.
    pub name: String,
    /// Flags defined for the mailbox.
    pub flags: Vec<String>,
    /// Flags the client may change permanently, without keywords.
    pub perm_flags: Vec<String>,
    /// Keywords among the permanent flags.
    pub keywords: Vec<String>,
    /// Whether new keywords may be created (`\*`).
    pub new_keywords: bool,
    /// Opened with EXAMINE or reported read-only.
    pub read_only: bool,
    /// `UIDVALIDITY`.
    pub uidvalidity: u32,
    /// `UIDNEXT`.
    pub uidnext: u32,
    /// `HIGHESTMODSEQ`, kept as text.
    pub highestmodseq: Option<String>,
    /// False after `UIDNOTSTICKY`.
    pub persistent_uids: bool,
    /// True after `NOMODSEQ`.
    pub nomodseq: bool,
    /// Message counters.
    pub messages: MessageCounts,
}

impl Mailbox {
    /// A fresh record for a mailbox being opened.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: Vec::new(),
            perm_flags: Vec::new(),
            keywords: Vec::new(),
            new_keywords: false,
            read_only: false,
            uidvalidity: 0,
            uidnext: 0,
            highestmodseq: None,
            persistent_uids: true,
            nomodseq: false,
            messages: MessageCounts::default(),
        }
    }

    /// Whether `\Deleted` can be set, which a COPY based move needs.
    #[must_use]
    pub fn allows_deletion(&self) -> bool {
        let deleted = |f: &String| f.eq_ignore_ascii_case("\\Deleted");
        self.perm_flags.iter().any(deleted) || self.flags.iter().any(deleted)
    }

    /// Folds a response code received while the mailbox is being opened.
    pub(crate) fn apply_code(&mut self, code: &TextCode) {
        let number = || code.value.as_ref().and_then(Value::as_number);
        let id = || number().and_then(|n| u32::try_from(n).ok()).unwrap_or_default();
        match code.key.to_ascii_uppercase().as_str() {
            "UIDVALIDITY" => self.uidvalidity = id(),
            "UIDNEXT" => self.uidnext = id(),
            "HIGHESTMODSEQ" => self.highestmodseq = code.value.as_ref().and_then(Value::to_text),
            "PERMANENTFLAGS" => {
                let flags = code.items().iter().filter_map(Value::to_text);
                self.set_permanent_flags(flags);
            }
            "UIDNOTSTICKY" => self.persistent_uids = false,
            "NOMODSEQ" => self.nomodseq = true,
            _ => {}
        }
    }

    fn set_permanent_flags(&mut self, flags: impl Iterator<Item = String>) {
        self.perm_flags.clear();
        self.keywords.clear();
        self.new_keywords = false;
        for flag in flags {
            if flag == "\\*" {
                self.new_keywords = true;
            } else if flag.starts_with('\\') {
                self.perm_flags.push(flag);
            } else {
                self.keywords.push(flag);
            }
        }
    }

    /// Applies an EXISTS count. Returns the number of new messages when the
    /// count grew and arrivals should be announced.
    pub(crate) fn apply_exists(&mut self, count: u32, announce: bool) -> Option<u32> {
        let previous = self.messages.total;
        self.messages.total = count;
        if count > previous && announce {
            self.messages.new = count - previous;
            Some(self.messages.new)
        } else {
            None
        }
    }

    /// Applies one EXPUNGE.
    pub(crate) fn apply_expunge(&mut self) {
        self.messages.total = self.messages.total.saturating_sub(1);
    }

    /// Applies a non-EARLIER VANISHED of `count` messages.
    pub(crate) fn apply_vanished(&mut self, count: u64) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.messages.total = self.messages.total.saturating_sub(count);
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
    use crate::parser::response::parse_status_text;

    fn code(text: &str) -> TextCode {
        parse_status_text(text).code.unwrap()
    }

    #[test]
    fn test_fresh_record() {
        let mailbox = Mailbox::new("INBOX");
        assert_eq!(mailbox.name, "INBOX");
        assert!(mailbox.persistent_uids);
        assert!(!mailbox.nomodseq);
        assert_eq!(mailbox.messages, MessageCounts::default());
    }

    #[test]
    fn test_permanent_flags_split() {
        let mut mailbox = Mailbox::new("INBOX");
        mailbox.apply_code(&code(
            "[PERMANENTFLAGS (\\Answered \\Seen $Forwarded Work \\*)] Permanent flags",
        ));
        assert_eq!(mailbox.perm_flags, vec!["\\Answered", "\\Seen"]);
        assert_eq!(mailbox.keywords, vec!["$Forwarded", "Work"]);
        assert!(mailbox.new_keywords);
    }

    #[test]
    fn test_numeric_codes() {
        let mut mailbox = Mailbox::new("INBOX");
        mailbox.apply_code(&code("[UIDVALIDITY 67890007] UIDs valid"));
        mailbox.apply_code(&code("[UIDNEXT 600] Predicted next UID"));
        mailbox.apply_code(&code("[HIGHESTMODSEQ 90060115205545359] Highest"));
        mailbox.apply_code(&code("[UIDNOTSTICKY] Non-persistent UIDs"));
        mailbox.apply_code(&code("[NOMODSEQ] Sorry"));
        assert_eq!(mailbox.uidvalidity, 67890007);
        assert_eq!(mailbox.uidnext, 600);
        assert_eq!(mailbox.highestmodseq.as_deref(), Some("90060115205545359"));
        assert!(!mailbox.persistent_uids);
        assert!(mailbox.nomodseq);
    }

    #[test]
    fn test_exists_deltas() {
        let mut mailbox = Mailbox::new("INBOX");
        assert_eq!(mailbox.apply_exists(10, true), Some(10));
        assert_eq!(mailbox.apply_exists(12, true), Some(2));
        assert_eq!(mailbox.messages.new, 2);
        assert_eq!(mailbox.apply_exists(12, true), None);
        assert_eq!(mailbox.apply_exists(15, false), None);
        assert_eq!(mailbox.messages.total, 15);
    }

    #[test]
    fn test_expunge_and_vanished() {
        let mut mailbox = Mailbox::new("INBOX");
        mailbox.apply_exists(685, false);
        mailbox.apply_vanished(89);
        assert_eq!(mailbox.messages.total, 596);
        mailbox.apply_expunge();
        assert_eq!(mailbox.messages.total, 595);
        mailbox.apply_vanished(1000);
        mailbox.apply_expunge();
        assert_eq!(mailbox.messages.total, 0);
    }

    #[test]
    fn test_allows_deletion() {
        let mut mailbox = Mailbox::new("INBOX");
        assert!(!mailbox.allows_deletion());
        mailbox.flags = vec!["\\Seen".into(), "\\Deleted".into()];
        assert!(mailbox.allows_deletion());
    }
}
