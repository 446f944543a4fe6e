//! Sequence sets for message ranges.

use std::fmt;

use crate::{Error, Result};

/// One element of a sequence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqItem {
    /// A single number.
    Single(u32),
    /// `*`, the highest number in the mailbox.
    Last,
    /// An inclusive range; `None` stands for `*`.
    Range(Option<u32>, Option<u32>),
}

impl fmt::Display for SeqItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = |n: &Option<u32>| n.map_or_else(|| "*".to_string(), |n| n.to_string());
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Last => f.write_str("*"),
            Self::Range(start, stop) => write!(f, "{}:{}", end(start), end(stop)),
        }
    }
}

/// A validated, non-empty set of UIDs or sequence numbers.
///
/// Validation happens at construction, so a malformed set never reaches the
/// command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<SeqItem>);

impl SequenceSet {
    /// Parses a comma-separated set such as `1:3,7,10:*`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty input, zero or non-numeric items.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_items(text.split(','))
    }

    /// Builds a set from individual items such as `["1:3", "7"]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty list or malformed items.
    pub fn from_items<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items = items
            .into_iter()
            .map(|item| parse_item(item.as_ref().trim()))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(Error::validation("Empty message identifier list"));
        }
        Ok(Self(items))
    }

    /// Builds a set from numbers, folding consecutive runs into ranges.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty list or a zero.
    pub fn from_ids(ids: &[u32]) -> Result<Self> {
        if ids.is_empty() {
            return Err(Error::validation("Empty message identifier list"));
        }
        if ids.contains(&0) {
            return Err(Error::validation("Message identifier must be greater than zero"));
        }

        let mut items = Vec::new();
        let mut run: Option<(u32, u32)> = None;
        for &id in ids {
            run = match run {
                Some((start, stop)) if stop.checked_add(1) == Some(id) => Some((start, id)),
                Some(done) => {
                    items.push(run_item(done));
                    Some((id, id))
                }
                None => Some((id, id)),
            };
        }
        items.extend(run.map(run_item));
        Ok(Self(items))
    }

    /// Returns every message: `1:*`.
    #[must_use]
    pub fn all() -> Self {
        Self(vec![SeqItem::Range(Some(1), None)])
    }

    /// Returns the parsed items.
    #[must_use]
    pub fn items(&self) -> &[SeqItem] {
        &self.0
    }

    /// Counts the numbers covered. `*` makes the count unknowable, so such
    /// items contribute one.
    #[must_use]
    pub fn cardinality(&self) -> u64 {
        self.0
            .iter()
            .map(|item| match *item {
                SeqItem::Range(Some(a), Some(b)) => u64::from(a.abs_diff(b)) + 1,
                _ => 1,
            })
            .sum()
    }
}

fn run_item((start, stop): (u32, u32)) -> SeqItem {
    if start == stop {
        SeqItem::Single(start)
    } else {
        SeqItem::Range(Some(start), Some(stop))
    }
}

fn parse_bound(text: &str) -> Result<Option<u32>> {
    if text == "*" {
        return Ok(None);
    }
    match text.parse::<u32>() {
        Ok(n) if n > 0 && text.bytes().all(|b| b.is_ascii_digit()) => Ok(Some(n)),
        _ => Err(Error::validation(format!("Invalid message identifier: {text:?}"))),
    }
}

fn parse_item(text: &str) -> Result<SeqItem> {
    match text.split_once(':') {
        Some((start, stop)) => Ok(SeqItem::Range(parse_bound(start)?, parse_bound(stop)?)),
        None => Ok(parse_bound(text)?.map_or(SeqItem::Last, SeqItem::Single)),
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl From<u32> for SequenceSet {
    /// A zero id still produces a set; the server rejects it.
    fn from(id: u32) -> Self {
        Self(vec![SeqItem::Single(id)])
    }
}

impl std::str::FromStr for SequenceSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
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
    fn test_parse_and_display() {
        let set = SequenceSet::parse("1:3,7,10:*,*").unwrap();
        assert_eq!(set.to_string(), "1:3,7,10:*,*");
        assert_eq!(set.items().len(), 4);
    }

    #[test]
    fn test_invalid_items() {
        assert!(SequenceSet::parse("").is_err());
        assert!(SequenceSet::parse("0").is_err());
        assert!(SequenceSet::parse("1:x").is_err());
        assert!(SequenceSet::parse("+5").is_err());
        assert!(SequenceSet::from_items(Vec::<String>::new()).is_err());
        assert!(matches!(
            SequenceSet::parse("abc"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_from_ids_folds_runs() {
        let set = SequenceSet::from_ids(&[1, 2, 3, 5, 7, 8]).unwrap();
        assert_eq!(set.to_string(), "1:3,5,7:8");
        assert!(SequenceSet::from_ids(&[]).is_err());
        assert!(SequenceSet::from_ids(&[0]).is_err());
    }

    #[test]
    fn test_cardinality() {
        assert_eq!(SequenceSet::parse("300:310,405,411").unwrap().cardinality(), 13);
        assert_eq!(SequenceSet::parse("5:1").unwrap().cardinality(), 5);
        assert_eq!(SequenceSet::all().cardinality(), 1);
    }
}
