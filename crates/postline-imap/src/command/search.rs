//! Search criteria compiler.
//!
//! Criteria are a typed tree, so arity mistakes cannot be expressed. What is
//! left to check at compile time is argument content and whether the server
//! advertises the extension a key belongs to.

use chrono::NaiveDate;

use super::CommandBuilder;
use super::validate::validate_keyword;
use crate::parser::quote;
use crate::types::{Capabilities, SequenceSet};
use crate::{Error, Result};

/// One search key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// `ALL`.
    All,
    /// `ANSWERED`.
    Answered,
    /// `DELETED`.
    Deleted,
    /// `DRAFT`.
    Draft,
    /// `FLAGGED`.
    Flagged,
    /// `NEW`.
    New,
    /// `SEEN`.
    Seen,
    /// `RECENT`.
    Recent,
    /// `OLD`.
    Old,
    /// `UNANSWERED`.
    Unanswered,
    /// `UNDELETED`.
    Undeleted,
    /// `UNDRAFT`.
    Undraft,
    /// `UNFLAGGED`.
    Unflagged,
    /// `UNSEEN`.
    Unseen,
    /// `BCC <string>`.
    Bcc(String),
    /// `BODY <string>`.
    Body(String),
    /// `CC <string>`.
    Cc(String),
    /// `FROM <string>`.
    From(String),
    /// `SUBJECT <string>`.
    Subject(String),
    /// `TEXT <string>`.
    Text(String),
    /// `TO <string>`.
    To(String),
    /// `BEFORE <date>`.
    Before(NaiveDate),
    /// `ON <date>`.
    On(NaiveDate),
    /// `SINCE <date>`.
    Since(NaiveDate),
    /// `SENTBEFORE <date>`.
    SentBefore(NaiveDate),
    /// `SENTON <date>`.
    SentOn(NaiveDate),
    /// `SENTSINCE <date>`.
    SentSince(NaiveDate),
    /// `KEYWORD <flag>`.
    Keyword(String),
    /// `UNKEYWORD <flag>`.
    Unkeyword(String),
    /// `LARGER <n>`.
    Larger(u64),
    /// `SMALLER <n>`.
    Smaller(u64),
    /// `HEADER <field> <string>`.
    Header(String, String),
    /// `UID <set>`.
    Uid(SequenceSet),
    /// A bare sequence set.
    Sequence(SequenceSet),
    /// `MODSEQ <n>` (CONDSTORE).
    ModSeq(u64),
    /// `X-GM-MSGID <id>` (X-GM-EXT-1).
    GmailMessageId(String),
    /// `X-GM-THRID <id>` (X-GM-EXT-1).
    GmailThreadId(String),
    /// `X-GM-RAW <query>` (X-GM-EXT-1).
    GmailRaw(String),
    /// `X-GM-LABELS <label>` (X-GM-EXT-1).
    GmailLabels(String),
    /// `NOT <key>`.
    Not(Box<SearchKey>),
    /// `OR (<keys>) (<keys>)`.
    Or(Vec<SearchKey>, Vec<SearchKey>),
}

impl SearchKey {
    /// Negates a key.
    #[must_use]
    pub fn not(key: Self) -> Self {
        Self::Not(Box::new(key))
    }

    /// Builds an `OR` of two conjunctions.
    #[must_use]
    pub const fn or(left: Vec<Self>, right: Vec<Self>) -> Self {
        Self::Or(left, right)
    }

    fn strings(&self) -> Vec<&str> {
        match self {
            Self::Bcc(s)
            | Self::Body(s)
            | Self::Cc(s)
            | Self::From(s)
            | Self::Subject(s)
            | Self::Text(s)
            | Self::To(s)
            | Self::GmailRaw(s)
            | Self::Header(_, s) => vec![s.as_str()],
            Self::Not(key) => key.strings(),
            Self::Or(left, right) => left.iter().chain(right).flat_map(Self::strings).collect(),
            _ => Vec::new(),
        }
    }

    /// Writes the key with a leading space.
    ///
    /// # Errors
    ///
    /// Fails on a missing capability or malformed argument.
    pub fn write(&self, builder: CommandBuilder, caps: &Capabilities) -> Result<CommandBuilder> {
        if let Some(name) = self.flag_name() {
            return Ok(builder.atom(name));
        }
        match self {
            Self::Bcc(s) => Ok(builder.atom("BCC").string(s)),
            Self::Body(s) => Ok(builder.atom("BODY").string(s)),
            Self::Cc(s) => Ok(builder.atom("CC").string(s)),
            Self::From(s) => Ok(builder.atom("FROM").string(s)),
            Self::Subject(s) => Ok(builder.atom("SUBJECT").string(s)),
            Self::Text(s) => Ok(builder.atom("TEXT").string(s)),
            Self::To(s) => Ok(builder.atom("TO").string(s)),
            Self::Before(d) => Ok(builder.atom("BEFORE").atom(&format_search_date(d))),
            Self::On(d) => Ok(builder.atom("ON").atom(&format_search_date(d))),
            Self::Since(d) => Ok(builder.atom("SINCE").atom(&format_search_date(d))),
            Self::SentBefore(d) => Ok(builder.atom("SENTBEFORE").atom(&format_search_date(d))),
            Self::SentOn(d) => Ok(builder.atom("SENTON").atom(&format_search_date(d))),
            Self::SentSince(d) => Ok(builder.atom("SENTSINCE").atom(&format_search_date(d))),
            Self::Keyword(k) => {
                validate_keyword(k)?;
                Ok(builder.atom("KEYWORD").atom(k))
            }
            Self::Unkeyword(k) => {
                validate_keyword(k)?;
                Ok(builder.atom("UNKEYWORD").atom(k))
            }
            Self::Larger(n) => Ok(builder.atom("LARGER").atom(&n.to_string())),
            Self::Smaller(n) => Ok(builder.atom("SMALLER").atom(&n.to_string())),
            Self::Header(field, value) => {
                Ok(builder.atom("HEADER").atom(&quote(field)).string(value))
            }
            Self::Uid(set) => Ok(builder.atom("UID").atom(&set.to_string())),
            Self::Sequence(set) => Ok(builder.atom(&set.to_string())),
            Self::ModSeq(n) => {
                require(caps, "CONDSTORE")?;
                Ok(builder.atom("MODSEQ").atom(&n.to_string()))
            }
            Self::GmailMessageId(id) => {
                require(caps, "X-GM-EXT-1")?;
                Ok(builder.atom("X-GM-MSGID").atom(gmail_id(id)?))
            }
            Self::GmailThreadId(id) => {
                require(caps, "X-GM-EXT-1")?;
                Ok(builder.atom("X-GM-THRID").atom(gmail_id(id)?))
            }
            Self::GmailRaw(query) => {
                require(caps, "X-GM-EXT-1")?;
                Ok(builder.atom("X-GM-RAW").string(query))
            }
            Self::GmailLabels(label) => {
                require(caps, "X-GM-EXT-1")?;
                Ok(builder.atom("X-GM-LABELS").atom(label))
            }
            Self::Not(key) => key.write(builder.atom("NOT"), caps),
            Self::Or(left, right) => {
                if left.is_empty() || right.is_empty() {
                    return Err(Error::validation("OR must have exactly two arguments"));
                }
                let builder = write_group(builder.atom("OR").raw(" ("), left, caps)?;
                let builder = write_group(builder.raw(") ("), right, caps)?;
                Ok(builder.raw(")"))
            }
            _ => Ok(builder),
        }
    }

    const fn flag_name(&self) -> Option<&'static str> {
        Some(match self {
            Self::All => "ALL",
            Self::Answered => "ANSWERED",
            Self::Deleted => "DELETED",
            Self::Draft => "DRAFT",
            Self::Flagged => "FLAGGED",
            Self::New => "NEW",
            Self::Seen => "SEEN",
            Self::Recent => "RECENT",
            Self::Old => "OLD",
            Self::Unanswered => "UNANSWERED",
            Self::Undeleted => "UNDELETED",
            Self::Undraft => "UNDRAFT",
            Self::Unflagged => "UNFLAGGED",
            Self::Unseen => "UNSEEN",
            _ => return None,
        })
    }
}

/// Writes a parenthesized group without the leading space of its first key.
fn write_group(
    mut builder: CommandBuilder,
    keys: &[SearchKey],
    caps: &Capabilities,
) -> Result<CommandBuilder> {
    for (i, key) in keys.iter().enumerate() {
        let mut sub = key.write(CommandBuilder::new(""), caps)?;
        if i == 0 {
            sub = sub.strip_leading_space();
        }
        builder = builder.append(sub);
    }
    Ok(builder)
}

impl CommandBuilder {
    /// Writes a list of criteria, each with a leading space.
    ///
    /// # Errors
    ///
    /// Fails on an empty list, a missing capability or a malformed argument.
    pub fn search(mut self, keys: &[SearchKey], caps: &Capabilities) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::validation("Expected at least one search criterion"));
        }
        for key in keys {
            self = key.write(self, caps)?;
        }
        Ok(self)
    }

    fn strip_leading_space(mut self) -> Self {
        let first = self.segments.first_mut().unwrap_or(&mut self.current);
        if first.first() == Some(&b' ') {
            first.remove(0);
        }
        self
    }

    /// Concatenates another builder's text, literals included.
    fn append(mut self, other: Self) -> Self {
        let mut segments = other.segments.into_iter();
        if let Some(first) = segments.next() {
            self.current.extend_from_slice(&first);
            self.segments.push(std::mem::take(&mut self.current));
            for segment in segments {
                self.segments.push(segment);
            }
        }
        self.current.extend_from_slice(&other.current);
        self.nonsync &= other.nonsync;
        self.literals += other.literals;
        self
    }
}

/// True when any string argument needs a UTF-8 literal.
#[must_use]
pub fn has_non_ascii(keys: &[SearchKey]) -> bool {
    keys.iter().flat_map(SearchKey::strings).any(|s| !s.is_ascii())
}

fn require(caps: &Capabilities, name: &'static str) -> Result<()> {
    if caps.has(name) {
        Ok(())
    } else {
        Err(Error::capability(name))
    }
}

fn gmail_id(id: &str) -> Result<&str> {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(Error::validation(format!("Invalid value: {id}")))
    }
}

fn format_search_date(date: &NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Field a SORT orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortCriterion {
    /// Internal date.
    Arrival,
    /// First Cc address.
    Cc,
    /// Sent date.
    Date,
    /// First From address.
    From,
    /// Message size.
    Size,
    /// Base subject.
    Subject,
    /// First To address.
    To,
}

/// One SORT key, optionally reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Field to sort by.
    pub criterion: SortCriterion,
    /// Descending order.
    pub reverse: bool,
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reverse {
            f.write_str("REVERSE ")?;
        }
        f.write_str(match self.criterion {
            SortCriterion::Arrival => "ARRIVAL",
            SortCriterion::Cc => "CC",
            SortCriterion::Date => "DATE",
            SortCriterion::From => "FROM",
            SortCriterion::Size => "SIZE",
            SortCriterion::Subject => "SUBJECT",
            SortCriterion::To => "TO",
        })
    }
}

impl std::str::FromStr for SortKey {
    type Err = Error;

    /// Parses `date`, `-date` (reversed), and so on.
    fn from_str(s: &str) -> Result<Self> {
        let (reverse, name) = s.strip_prefix('-').map_or((false, s), |rest| (true, rest));
        let criterion = match name.to_ascii_uppercase().as_str() {
            "ARRIVAL" => SortCriterion::Arrival,
            "CC" => SortCriterion::Cc,
            "DATE" => SortCriterion::Date,
            "FROM" => SortCriterion::From,
            "SIZE" => SortCriterion::Size,
            "SUBJECT" => SortCriterion::Subject,
            "TO" => SortCriterion::To,
            _ => return Err(Error::validation(format!("Unexpected sort criteria: {s}"))),
        };
        Ok(Self { criterion, reverse })
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
    use crate::command::Command;

    fn compile(keys: &[SearchKey], caps: &Capabilities) -> Result<Command> {
        Ok(Command::builder("UID SEARCH").search(keys, caps)?.build())
    }

    fn first_line(keys: &[SearchKey]) -> String {
        let cmd = compile(keys, &Capabilities::default()).unwrap();
        String::from_utf8(cmd.segments()[0].clone()).unwrap()
    }

    #[test]
    fn test_flags_and_strings() {
        assert_eq!(first_line(&[SearchKey::Deleted]), "UID SEARCH DELETED");
        assert_eq!(
            first_line(&[SearchKey::Unseen, SearchKey::From("bob@example.com".into())]),
            "UID SEARCH UNSEEN FROM \"bob@example.com\""
        );
        assert_eq!(
            first_line(&[SearchKey::Header("X-Mailer".into(), "a \"b\"".into())]),
            "UID SEARCH HEADER \"X-Mailer\" \"a \\\"b\\\"\""
        );
    }

    #[test]
    fn test_dates_and_numbers() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(
            first_line(&[SearchKey::Since(date), SearchKey::Larger(1024)]),
            "UID SEARCH SINCE 5-Mar-2024 LARGER 1024"
        );
    }

    #[test]
    fn test_not_and_or() {
        assert_eq!(first_line(&[SearchKey::not(SearchKey::Seen)]), "UID SEARCH NOT SEEN");
        assert_eq!(
            first_line(&[SearchKey::or(
                vec![SearchKey::Flagged, SearchKey::Unseen],
                vec![SearchKey::Subject("x".into())]
            )]),
            "UID SEARCH OR (FLAGGED UNSEEN) (SUBJECT \"x\")"
        );
        let empty_or = SearchKey::or(vec![], vec![SearchKey::All]);
        assert!(compile(&[empty_or], &Capabilities::default()).is_err());
    }

    #[test]
    fn test_sequence_sets() {
        let uids = SequenceSet::parse("1:3,7").unwrap();
        assert_eq!(first_line(&[SearchKey::Uid(uids.clone())]), "UID SEARCH UID 1:3,7");
        assert_eq!(first_line(&[SearchKey::Sequence(uids)]), "UID SEARCH 1:3,7");
    }

    #[test]
    fn test_capability_checks() {
        let none = Capabilities::default();
        assert!(matches!(compile(&[SearchKey::ModSeq(5)], &none), Err(Error::Capability(_))));
        assert!(matches!(
            compile(&[SearchKey::GmailRaw("has:attachment".into())], &none),
            Err(Error::Capability(_))
        ));
        let gmail = Capabilities::new(["X-GM-EXT-1", "CONDSTORE"]);
        assert!(compile(&[SearchKey::ModSeq(5)], &gmail).is_ok());
        assert!(compile(&[SearchKey::GmailThreadId("1278455344230334865".into())], &gmail).is_ok());
        assert!(matches!(
            compile(&[SearchKey::GmailThreadId("12ab".into())], &gmail),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_keyword() {
        let spaced = SearchKey::Keyword("bad word".into());
        assert!(compile(&[spaced], &Capabilities::default()).is_err());
        assert!(compile(&[], &Capabilities::default()).is_err());
    }

    #[test]
    fn test_non_ascii_becomes_literal() {
        let keys = [SearchKey::Subject("Grüße".into()), SearchKey::Seen];
        assert!(has_non_ascii(&keys));
        assert!(!has_non_ascii(&[SearchKey::Subject("plain".into())]));
        let cmd = compile(&keys, &Capabilities::default()).unwrap();
        assert_eq!(cmd.segments()[0], b"UID SEARCH SUBJECT {7}");
        assert_eq!(cmd.segments()[1], "Grüße SEEN".as_bytes());
    }

    #[test]
    fn test_non_ascii_inside_or_group() {
        let keys = [SearchKey::or(vec![SearchKey::To("zoë".into())], vec![SearchKey::Seen])];
        assert!(has_non_ascii(&keys));
        let cmd = compile(&keys, &Capabilities::default()).unwrap();
        assert_eq!(cmd.segments()[0], b"UID SEARCH OR (TO {4}");
        assert_eq!(cmd.segments()[1], "zoë) (SEEN)".as_bytes());
    }

    #[test]
    fn test_sort_keys() {
        let key: SortKey = "-date".parse().unwrap();
        assert_eq!(key.to_string(), "REVERSE DATE");
        assert_eq!("Subject".parse::<SortKey>().unwrap().to_string(), "SUBJECT");
        assert!("colour".parse::<SortKey>().is_err());
    }
}
