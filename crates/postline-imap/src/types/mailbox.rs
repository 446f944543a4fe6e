//! Mailbox listing and status types.

use std::collections::BTreeMap;

/// A mailbox hierarchy built from LIST-style responses, keyed by the
/// decoded name of each level.
pub type MailboxTree = BTreeMap<String, MailboxNode>;

/// One level of a [`MailboxTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxNode {
    /// Name attributes such as `\Noselect` or `\Sent`.
    pub attributes: Vec<String>,
    /// Hierarchy delimiter.
    pub delimiter: Option<String>,
    /// Special-use attribute, if one of the attributes is a special use.
    pub special_use: Option<String>,
    /// Child mailboxes.
    pub children: MailboxTree,
}

const SPECIAL_USE: &[&str] = &[
    "\\ALL",
    "\\ARCHIVE",
    "\\DRAFTS",
    "\\FLAGGED",
    "\\JUNK",
    "\\SENT",
    "\\TRASH",
    "\\IMPORTANT",
    "\\ALLMAIL",
    "\\SPAM",
    "\\STARRED",
    "\\INBOX",
];

/// Inserts a listed mailbox into `tree`, splitting its name on `delimiter`.
pub fn insert_listed(
    tree: &mut MailboxTree,
    name: &str,
    delimiter: Option<&str>,
    attributes: Vec<String>,
) {
    let parts: Vec<&str> = match delimiter.filter(|d| !d.is_empty()) {
        Some(delim) => name.split(delim).collect(),
        None => vec![name],
    };
    let Some((leaf, parents)) = parts.split_last() else {
        return;
    };

    let mut level = tree;
    for parent in parents {
        level = &mut level.entry((*parent).to_string()).or_default().children;
    }
    let node = level.entry((*leaf).to_string()).or_default();
    node.special_use = attributes
        .iter()
        .find(|a| SPECIAL_USE.contains(&a.to_ascii_uppercase().as_str()))
        .cloned();
    node.attributes = attributes;
    node.delimiter = delimiter.map(str::to_string);
}

/// Result of a STATUS command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Decoded mailbox name.
    pub name: String,
    /// `MESSAGES`.
    pub messages: Option<u32>,
    /// `RECENT`.
    pub recent: Option<u32>,
    /// `UNSEEN`.
    pub unseen: Option<u32>,
    /// `UIDNEXT`.
    pub uidnext: Option<u32>,
    /// `UIDVALIDITY`.
    pub uidvalidity: Option<u32>,
    /// `HIGHESTMODSEQ`, kept as text.
    pub highestmodseq: Option<String>,
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
    fn test_nested_insert() {
        let mut tree = MailboxTree::new();
        insert_listed(&mut tree, "INBOX", Some("/"), vec![]);
        insert_listed(&mut tree, "Archive/2020/Q1", Some("/"), vec!["\\HasNoChildren".into()]);
        insert_listed(&mut tree, "Sent", Some("/"), vec!["\\Sent".into()]);

        let q1 = &tree["Archive"].children["2020"].children["Q1"];
        assert_eq!(q1.attributes, vec!["\\HasNoChildren".to_string()]);
        assert_eq!(q1.delimiter.as_deref(), Some("/"));
        assert_eq!(tree["Sent"].special_use.as_deref(), Some("\\Sent"));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_flat_without_delimiter() {
        let mut tree = MailboxTree::new();
        insert_listed(&mut tree, "a/b", None, vec![]);
        assert!(tree.contains_key("a/b"));
    }
}
