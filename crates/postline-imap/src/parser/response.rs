//! Classification of complete response lines into typed responses.
//!
//! Classification never fails: lines that match no known shape come back as
//! [`Response::Other`] carrying the raw text.

use std::collections::BTreeMap;

use super::bodystructure::BodyStructure;
use super::date::ImapDate;
use super::envelope::Envelope;
use super::expr::{Value, parse_expr};

/// Tagged completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command succeeded.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed.
    Bad,
}

/// Bracketed response code such as `[UIDVALIDITY 3857529045]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCode {
    /// Uppercased code name.
    pub key: String,
    /// Code argument: the single decoded item, or a list when there are
    /// several. `None` when the code has no argument.
    pub value: Option<Value>,
}

impl TextCode {
    /// Returns the argument items as a slice.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        match &self.value {
            Some(Value::List(items)) => items,
            Some(value) => std::slice::from_ref(value),
            None => &[],
        }
    }

    /// Returns the `index`-th argument item.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<&Value> {
        self.items().get(index)
    }
}

/// Response code plus human-readable text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusText {
    /// Optional response code.
    pub code: Option<TextCode>,
    /// Human-readable text; empty when the server sent none.
    pub text: String,
}

/// A tagged completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    /// Tag as sent, e.g. `A12`.
    pub tag: String,
    /// Completion status.
    pub status: Status,
    /// Optional response code.
    pub code: Option<TextCode>,
    /// Human-readable text.
    pub text: String,
}

/// A mailbox listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Name attributes such as `\Noselect`.
    pub flags: Vec<String>,
    /// Hierarchy delimiter, if any.
    pub delimiter: Option<String>,
    /// Mailbox name, still in wire encoding.
    pub name: String,
}

/// STATUS response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusData {
    /// Mailbox name, still in wire encoding.
    pub name: String,
    /// Attributes with lowercased names.
    pub attrs: BTreeMap<String, Value>,
}

/// One namespace description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Name prefix.
    pub prefix: String,
    /// Hierarchy delimiter.
    pub delimiter: Option<String>,
    /// Namespace extension fields.
    pub extensions: Option<BTreeMap<String, Vec<String>>>,
}

/// NAMESPACE response data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespaces {
    /// Personal namespaces.
    pub personal: Option<Vec<Namespace>>,
    /// Other users' namespaces.
    pub other: Option<Vec<Namespace>>,
    /// Shared namespaces.
    pub shared: Option<Vec<Namespace>>,
}

/// Usage and limit of one quota resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaResource {
    /// Current usage.
    pub usage: u64,
    /// Limit.
    pub limit: u64,
}

/// QUOTA response data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quota {
    /// Quota root name.
    pub root: String,
    /// Resources keyed by lowercased name.
    pub resources: BTreeMap<String, QuotaResource>,
}

/// METADATA response data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Mailbox name; empty for server annotations.
    pub mailbox: String,
    /// Entries; unsolicited change notices carry no value.
    pub entries: BTreeMap<String, Option<String>>,
}

/// ESEARCH response data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Esearch {
    /// Whether results are UIDs.
    pub uid: bool,
    /// `MIN` result.
    pub min: Option<u32>,
    /// `MAX` result.
    pub max: Option<u32>,
    /// `COUNT` result.
    pub count: Option<u32>,
    /// `ALL` result as raw sequence-set tokens.
    pub all: Option<Vec<String>>,
    /// `MODSEQ` result.
    pub modseq: Option<String>,
    /// Other return data keyed by lowercased name.
    pub other: BTreeMap<String, Value>,
}

/// Decoded value of a FETCH data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchValue {
    /// `UID`.
    Uid(u32),
    /// `FLAGS`.
    Flags(Vec<String>),
    /// `INTERNALDATE`.
    InternalDate(ImapDate),
    /// `RFC822.SIZE`.
    Size(u64),
    /// `ENVELOPE`.
    Envelope(Box<Envelope>),
    /// `BODY` or `BODYSTRUCTURE`.
    Structure(Box<BodyStructure>),
    /// `MODSEQ`, kept as text.
    ModSeq(String),
    /// `X-GM-LABELS`.
    Labels(Vec<String>),
    /// `X-GM-THRID` or `X-GM-MSGID`, kept as text.
    Id(String),
    /// Anything else, undecoded.
    Other(Value),
}

/// One FETCH data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    /// Item name, uppercased up to any `[` section.
    pub key: String,
    /// Decoded value.
    pub value: FetchValue,
}

/// Untagged response payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// `* OK`.
    Ok(StatusText),
    /// `* NO`.
    No(StatusText),
    /// `* BAD`.
    Bad(StatusText),
    /// `* BYE`.
    Bye(StatusText),
    /// `* PREAUTH`.
    Preauth(StatusText),
    /// `* CAPABILITY`, uppercased.
    Capability(Vec<String>),
    /// `* ENABLED`.
    Enabled(Vec<String>),
    /// `* FLAGS`.
    Flags(Vec<String>),
    /// `* LIST`.
    List(ListEntry),
    /// `* LSUB`.
    Lsub(ListEntry),
    /// `* XLIST`.
    Xlist(ListEntry),
    /// `* SEARCH`.
    Search {
        /// Matching numbers.
        results: Vec<u32>,
        /// Highest MODSEQ of the matches (CONDSTORE).
        modseq: Option<String>,
    },
    /// `* SORT`.
    Sort(Vec<u32>),
    /// `* THREAD`, as nested lists.
    Thread(Vec<Value>),
    /// `* ESEARCH`.
    Esearch(Esearch),
    /// `* STATUS`.
    Status(StatusData),
    /// `* NAMESPACE`.
    Namespace(Namespaces),
    /// `* QUOTA`.
    Quota(Quota),
    /// `* QUOTAROOT`.
    QuotaRoot {
        /// Quota roots.
        roots: Vec<String>,
        /// Mailbox name, still in wire encoding.
        mailbox: String,
    },
    /// `* METADATA`.
    Metadata(Metadata),
    /// `* ID`; `None` for `NIL`.
    Id(Option<BTreeMap<String, Option<String>>>),
    /// `* VANISHED`.
    Vanished {
        /// Whether `(EARLIER)` was given.
        earlier: bool,
        /// Raw UID set tokens, unexpanded.
        uids: Vec<String>,
    },
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(u32),
    /// `* n FETCH`.
    Fetch {
        /// Message sequence number.
        seqno: u32,
        /// Data items in order of appearance.
        items: Vec<FetchItem>,
    },
    /// An untagged response this client does not model.
    Other {
        /// Uppercased response name.
        name: String,
        /// Leading number, if any.
        num: Option<u32>,
        /// Remaining text.
        text: String,
    },
}

/// A classified server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged completion.
    Tagged(Tagged),
    /// Untagged data.
    Untagged(Untagged),
    /// Continuation request.
    Continuation(StatusText),
    /// Unrecognised line, verbatim.
    Other(String),
}

/// Classifies one logical line (without its trailing CRLF).
#[must_use]
pub fn classify(line: &[u8]) -> Response {
    if line == b"*" || line.starts_with(b"* ") {
        return Response::Untagged(parse_untagged(line.get(2..).unwrap_or_default()));
    }
    if let Some(rest) = line.strip_prefix(b"+") {
        let text = String::from_utf8_lossy(rest);
        return Response::Continuation(parse_status_text(text.trim_start()));
    }
    if let Some(tagged) = parse_tagged(line) {
        return Response::Tagged(tagged);
    }
    Response::Other(String::from_utf8_lossy(line).into_owned())
}

fn parse_tagged(line: &[u8]) -> Option<Tagged> {
    let text = std::str::from_utf8(line).ok()?;
    let (tag, rest) = text.split_once(' ')?;
    let digits = tag.strip_prefix(['A', 'a'])?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let (word, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    let StatusText { code, text } = parse_status_text(rest);
    Some(Tagged {
        tag: format!("A{digits}"),
        status,
        code,
        text,
    })
}

/// Splits `[CODE args] text`.
#[must_use]
pub fn parse_status_text(text: &str) -> StatusText {
    let text = text.trim_start();
    if let Some(inner_start) = text.strip_prefix('[') {
        if let Some(end) = closing_bracket(inner_start) {
            return StatusText {
                code: Some(parse_text_code(&inner_start[..end])),
                text: inner_start[end + 1..].trim_start().to_string(),
            };
        }
    }
    StatusText {
        code: None,
        text: text.to_string(),
    }
}

/// Finds the `]` closing a response code, skipping quoted strings and
/// nested brackets.
fn closing_bracket(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quote = true,
            '[' => depth += 1,
            ']' if depth == 0 => return Some(i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn parse_text_code(inner: &str) -> TextCode {
    let (key, args) = inner.split_once(' ').unwrap_or((inner, ""));
    let value = match parse_expr(args.as_bytes()) {
        Ok(mut values) => match values.len() {
            0 => None,
            1 => values.pop(),
            _ => Some(Value::List(values)),
        },
        Err(_) => Some(Value::String(args.to_string())),
    };
    TextCode {
        key: key.to_ascii_uppercase(),
        value,
    }
}

fn split_word(input: &[u8]) -> (&[u8], &[u8]) {
    match input.iter().position(|&b| b == b' ') {
        Some(i) => (&input[..i], &input[i + 1..]),
        None => (input, &[]),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_untagged(body: &[u8]) -> Untagged {
    let (first, rest) = split_word(body);

    if !first.is_empty() && first.iter().all(u8::is_ascii_digit) {
        let num = std::str::from_utf8(first)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        let (kind, rest) = split_word(rest);
        let name = lossy(kind).to_ascii_uppercase();
        return match name.as_str() {
            "EXISTS" => Untagged::Exists(num),
            "RECENT" => Untagged::Recent(num),
            "EXPUNGE" => Untagged::Expunge(num),
            "FETCH" => Untagged::Fetch {
                seqno: num,
                items: parse_fetch(rest),
            },
            _ => Untagged::Other {
                name,
                num: Some(num),
                text: lossy(rest),
            },
        };
    }

    let name = lossy(first).to_ascii_uppercase();
    let values = || parse_expr(rest).unwrap_or_default();
    let text = || lossy(rest);

    match name.as_str() {
        "OK" => Untagged::Ok(parse_status_text(&text())),
        "NO" => Untagged::No(parse_status_text(&text())),
        "BAD" => Untagged::Bad(parse_status_text(&text())),
        "BYE" => Untagged::Bye(parse_status_text(&text())),
        "PREAUTH" => Untagged::Preauth(parse_status_text(&text())),
        "CAPABILITY" => {
            Untagged::Capability(words(&text()).map(|w| w.to_ascii_uppercase()).collect())
        }
        "ENABLED" => Untagged::Enabled(words(&text()).map(|w| w.to_ascii_uppercase()).collect()),
        "FLAGS" => Untagged::Flags(values().first().map(string_list).unwrap_or_default()),
        "LIST" => Untagged::List(parse_list_entry(&values())),
        "LSUB" => Untagged::Lsub(parse_list_entry(&values())),
        "XLIST" => Untagged::Xlist(parse_list_entry(&values())),
        "SEARCH" => parse_search(&values()),
        "SORT" => Untagged::Sort(values().iter().filter_map(as_u32).collect()),
        "THREAD" => Untagged::Thread(values()),
        "ESEARCH" => Untagged::Esearch(parse_esearch(&values())),
        "STATUS" => Untagged::Status(parse_status(&values())),
        "NAMESPACE" => Untagged::Namespace(parse_namespaces(&values())),
        "QUOTA" => Untagged::Quota(parse_quota(&values())),
        "QUOTAROOT" => {
            let values = values();
            let mut texts = values.iter().map(|v| v.to_text().unwrap_or_default());
            let mailbox = texts.next().unwrap_or_default();
            Untagged::QuotaRoot {
                roots: texts.collect(),
                mailbox,
            }
        }
        "METADATA" => Untagged::Metadata(parse_metadata(&values())),
        "ID" => Untagged::Id(values().first().and_then(Value::as_list).map(|items| {
            items
                .chunks(2)
                .filter_map(|pair| {
                    Some((pair.first()?.to_text()?, pair.get(1).and_then(Value::to_text)))
                })
                .collect()
        })),
        "VANISHED" => parse_vanished(&text()),
        _ => Untagged::Other {
            name,
            num: None,
            text: text(),
        },
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split_ascii_whitespace()
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_number().and_then(|n| u32::try_from(n).ok())
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_list()
        .map(|items| items.iter().filter_map(Value::to_text).collect())
        .unwrap_or_default()
}

fn parse_list_entry(values: &[Value]) -> ListEntry {
    ListEntry {
        flags: values.first().map(string_list).unwrap_or_default(),
        delimiter: values.get(1).and_then(Value::to_text),
        name: values.get(2).and_then(Value::to_text).unwrap_or_default(),
    }
}

fn parse_search(values: &[Value]) -> Untagged {
    let mut results = Vec::new();
    let mut modseq = None;
    for value in values {
        match value {
            Value::List(items) => {
                let is_modseq = items
                    .first()
                    .and_then(Value::as_str)
                    .is_some_and(|k| k.eq_ignore_ascii_case("MODSEQ"));
                if is_modseq {
                    modseq = items.get(1).and_then(Value::to_text);
                }
            }
            other => results.extend(as_u32(other)),
        }
    }
    Untagged::Search { results, modseq }
}

fn parse_esearch(values: &[Value]) -> Esearch {
    let mut out = Esearch::default();
    let mut items = values.iter().peekable();

    if matches!(items.peek(), Some(Value::List(_))) {
        items.next();
    }
    if items
        .peek()
        .and_then(|v| v.as_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("UID"))
    {
        out.uid = true;
        items.next();
    }

    while let Some(key) = items.next() {
        let Some(key) = key.to_text() else { continue };
        let Some(value) = items.next() else { break };
        match key.to_ascii_uppercase().as_str() {
            "MIN" => out.min = as_u32(value),
            "MAX" => out.max = as_u32(value),
            "COUNT" => out.count = as_u32(value),
            "ALL" => {
                out.all = value
                    .to_text()
                    .map(|set| set.split(',').map(str::to_string).collect());
            }
            "MODSEQ" => out.modseq = value.to_text(),
            _ => {
                out.other.insert(key.to_ascii_lowercase(), value.clone());
            }
        }
    }
    out
}

fn parse_status(values: &[Value]) -> StatusData {
    let attrs = values
        .get(1)
        .and_then(Value::as_list)
        .map(|items| {
            items
                .chunks(2)
                .filter_map(|pair| {
                    Some((pair.first()?.to_text()?.to_ascii_lowercase(), pair.get(1)?.clone()))
                })
                .collect()
        })
        .unwrap_or_default();
    StatusData {
        name: values.first().and_then(Value::to_text).unwrap_or_default(),
        attrs,
    }
}

fn parse_namespace_list(value: Option<&Value>) -> Option<Vec<Namespace>> {
    let items = value?.as_list()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_list)
            .map(|fields| {
                let extensions = (fields.len() > 2).then(|| {
                    fields[2..]
                        .chunks(2)
                        .filter_map(|pair| {
                            let key = pair.first()?.to_text()?;
                            Some((key, pair.get(1).map(string_list).unwrap_or_default()))
                        })
                        .collect()
                });
                Namespace {
                    prefix: fields.first().and_then(Value::to_text).unwrap_or_default(),
                    delimiter: fields.get(1).and_then(Value::to_text),
                    extensions,
                }
            })
            .collect(),
    )
}

fn parse_namespaces(values: &[Value]) -> Namespaces {
    Namespaces {
        personal: parse_namespace_list(values.first()),
        other: parse_namespace_list(values.get(1)),
        shared: parse_namespace_list(values.get(2)),
    }
}

fn parse_quota(values: &[Value]) -> Quota {
    let resources = values
        .get(1)
        .and_then(Value::as_list)
        .map(|items| {
            items
                .chunks(3)
                .filter_map(|triple| {
                    let name = triple.first()?.to_text()?.to_ascii_lowercase();
                    let usage = triple.get(1)?.as_number()?;
                    let limit = triple.get(2)?.as_number()?;
                    Some((name, QuotaResource { usage, limit }))
                })
                .collect()
        })
        .unwrap_or_default();
    Quota {
        root: values.first().and_then(Value::to_text).unwrap_or_default(),
        resources,
    }
}

fn parse_metadata(values: &[Value]) -> Metadata {
    let mut entries = BTreeMap::new();
    for value in values.iter().skip(1) {
        match value {
            Value::List(items) => {
                for pair in items.chunks(2) {
                    if let Some(key) = pair.first().and_then(Value::to_text) {
                        entries.insert(key, pair.get(1).and_then(Value::to_text));
                    }
                }
            }
            other => {
                if let Some(key) = other.to_text() {
                    entries.insert(key, None);
                }
            }
        }
    }
    Metadata {
        mailbox: values.first().and_then(Value::to_text).unwrap_or_default(),
        entries,
    }
}

fn parse_vanished(text: &str) -> Untagged {
    let text = text.trim();
    let (earlier, set) = match text.get(..9) {
        Some(prefix) if prefix.eq_ignore_ascii_case("(EARLIER)") => (true, text[9..].trim()),
        _ => (false, text),
    };
    Untagged::Vanished {
        earlier,
        uids: set
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

fn fetch_key(raw: &str) -> String {
    match raw.find('[') {
        Some(i) => format!("{}{}", raw[..i].to_ascii_uppercase(), &raw[i..]),
        None => raw.to_ascii_uppercase(),
    }
}

fn parse_fetch(rest: &[u8]) -> Vec<FetchItem> {
    let values = parse_expr(rest).unwrap_or_default();
    let Some(items) = values.first().and_then(Value::as_list) else {
        return Vec::new();
    };

    items
        .chunks(2)
        .filter_map(|pair| {
            let key = fetch_key(&pair.first()?.to_text()?);
            let value = pair.get(1).cloned().unwrap_or(Value::Nil);
            let value = decode_fetch_value(&key, value);
            Some(FetchItem { key, value })
        })
        .collect()
}

fn decode_fetch_value(key: &str, value: Value) -> FetchValue {
    match key {
        "UID" => match as_u32(&value) {
            Some(uid) => FetchValue::Uid(uid),
            None => FetchValue::Other(value),
        },
        "FLAGS" => FetchValue::Flags(string_list(&value)),
        "INTERNALDATE" => match value.to_text() {
            Some(raw) => FetchValue::InternalDate(ImapDate::internal(&raw)),
            None => FetchValue::Other(value),
        },
        "RFC822.SIZE" => match value.as_number() {
            Some(size) => FetchValue::Size(size),
            None => FetchValue::Other(value),
        },
        "ENVELOPE" => match value.as_list() {
            Some(fields) => FetchValue::Envelope(Box::new(Envelope::from_values(fields))),
            None => FetchValue::Other(value),
        },
        "BODY" | "BODYSTRUCTURE" => match value.as_list() {
            Some(items) => FetchValue::Structure(Box::new(BodyStructure::from_values(items))),
            None => FetchValue::Other(value),
        },
        "MODSEQ" => {
            let modseq = value
                .as_list()
                .and_then(|items| items.first())
                .unwrap_or(&value)
                .to_text();
            modseq.map_or(FetchValue::Other(value), FetchValue::ModSeq)
        }
        "X-GM-LABELS" => FetchValue::Labels(
            string_list(&value)
                .into_iter()
                .map(|label| label.replace("\\\\", "\\"))
                .collect(),
        ),
        "X-GM-THRID" | "X-GM-MSGID" => match value.to_text() {
            Some(id) => FetchValue::Id(id),
            None => FetchValue::Other(value),
        },
        _ => FetchValue::Other(value),
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

    fn untagged(line: &str) -> Untagged {
        match classify(line.as_bytes()) {
            Response::Untagged(u) => u,
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    fn s(text: &str) -> Value {
        Value::String(text.into())
    }

    #[test]
    fn test_tagged_ok() {
        assert_eq!(
            classify(b"A1 OK LOGIN completed"),
            Response::Tagged(Tagged {
                tag: "A1".into(),
                status: Status::Ok,
                code: None,
                text: "LOGIN completed".into(),
            })
        );
    }

    #[test]
    fn test_tagged_without_text() {
        let Response::Tagged(tagged) = classify(b"A1 OK") else {
            panic!("expected tagged");
        };
        assert_eq!(tagged.text, "");
        assert_eq!(tagged.code, None);
    }

    #[test]
    fn test_tagged_with_code() {
        let Response::Tagged(tagged) = classify(b"A4 OK [READ-ONLY] INBOX selected.") else {
            panic!("expected tagged");
        };
        assert_eq!(tagged.code.unwrap().key, "READ-ONLY");
        assert_eq!(tagged.text, "INBOX selected.");
    }

    #[test]
    fn test_unknown_lines() {
        assert_eq!(
            classify(b"IDLE OK IDLE terminated"),
            Response::Other("IDLE OK IDLE terminated".into())
        );
        assert_eq!(
            classify(b"IDLE OK Idle completed (0.002 + 1.783 + 1.783 secs)."),
            Response::Other("IDLE OK Idle completed (0.002 + 1.783 + 1.783 secs).".into())
        );
        assert!(matches!(classify(b"A1 MAYBE"), Response::Other(_)));
    }

    #[test]
    fn test_continuations() {
        assert_eq!(
            classify(b"+ idling"),
            Response::Continuation(StatusText {
                code: None,
                text: "idling".into(),
            })
        );
        let Response::Continuation(with_code) = classify(b"+ [ALERT] idling") else {
            panic!("expected continuation");
        };
        assert_eq!(
            with_code.code,
            Some(TextCode {
                key: "ALERT".into(),
                value: None,
            })
        );
        assert_eq!(classify(b"+"), Response::Continuation(StatusText::default()));
    }

    #[test]
    fn test_namespaces() {
        let Untagged::Namespace(ns) = untagged(
            r##"* NAMESPACE (("" "/")) (("~" "/")) (("#shared/" "/")("#public/" "/")("#ftp/" "/")("#news." "."))"##,
        ) else {
            panic!("expected namespace");
        };
        let personal = ns.personal.unwrap();
        assert_eq!(personal[0].prefix, "");
        assert_eq!(personal[0].delimiter.as_deref(), Some("/"));
        assert_eq!(personal[0].extensions, None);
        assert_eq!(ns.other.unwrap()[0].prefix, "~");
        let shared = ns.shared.unwrap();
        assert_eq!(shared.len(), 4);
        assert_eq!(shared[3].delimiter.as_deref(), Some("."));
    }

    #[test]
    fn test_namespace_extensions() {
        let Untagged::Namespace(ns) =
            untagged(r#"* NAMESPACE (("" "/" "X-PARAM" ("FLAG1" "FLAG2"))) NIL NIL"#)
        else {
            panic!("expected namespace");
        };
        let personal = ns.personal.unwrap();
        let ext = personal[0].extensions.as_ref().unwrap();
        assert_eq!(ext["X-PARAM"], vec!["FLAG1".to_string(), "FLAG2".to_string()]);
        assert_eq!(ns.other, None);
        assert_eq!(ns.shared, None);
    }

    #[test]
    fn test_flags_search_and_lists() {
        assert_eq!(
            untagged("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)"),
            Untagged::Flags(
                ["\\Answered", "\\Flagged", "\\Deleted", "\\Seen", "\\Draft"]
                    .map(String::from)
                    .to_vec()
            )
        );
        assert_eq!(
            untagged("* SEARCH 2 3 6"),
            Untagged::Search {
                results: vec![2, 3, 6],
                modseq: None,
            }
        );
        assert_eq!(
            untagged("* SEARCH 2 5 (MODSEQ 917162500)"),
            Untagged::Search {
                results: vec![2, 5],
                modseq: Some("917162500".into()),
            }
        );
        let entry = ListEntry {
            flags: vec!["\\Noselect".into()],
            delimiter: Some("/".into()),
            name: "~/Mail/foo".into(),
        };
        assert_eq!(untagged("* LIST (\\Noselect) \"/\" ~/Mail/foo"), Untagged::List(entry.clone()));
        assert_eq!(untagged("* XLIST (\\Noselect) \"/\" ~/Mail/foo"), Untagged::Xlist(entry));
    }

    #[test]
    fn test_status() {
        let Untagged::Status(status) = untagged("* STATUS blurdybloop (MESSAGES 231 UIDNEXT 44292)")
        else {
            panic!("expected status");
        };
        assert_eq!(status.name, "blurdybloop");
        assert_eq!(status.attrs["messages"], Value::Number(231));
        assert_eq!(status.attrs["uidnext"], Value::Number(44292));
    }

    #[test]
    fn test_untagged_ok_codes() {
        assert_eq!(
            untagged("* OK [UNSEEN 17] Message 17 is the first unseen message"),
            Untagged::Ok(StatusText {
                code: Some(TextCode {
                    key: "UNSEEN".into(),
                    value: Some(Value::Number(17)),
                }),
                text: "Message 17 is the first unseen message".into(),
            })
        );
        let Untagged::Ok(perm) = untagged("* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited")
        else {
            panic!("expected ok");
        };
        assert_eq!(
            perm.code.unwrap().value,
            Some(Value::List(vec![s("\\Deleted"), s("\\Seen"), s("\\*")]))
        );
        let Untagged::Ok(bare) = untagged("* OK [UNSEEN 17]") else {
            panic!("expected ok");
        };
        assert_eq!(bare.text, "");
        assert_eq!(untagged("* OK"), Untagged::Ok(StatusText::default()));
        assert_eq!(
            untagged("* OK IMAP4rev1 Service Ready"),
            Untagged::Ok(StatusText {
                code: None,
                text: "IMAP4rev1 Service Ready".into(),
            })
        );
    }

    #[test]
    fn test_multi_value_code() {
        let Response::Tagged(tagged) = classify(b"A3 OK [COPYUID 38505 304,319:320 3956:3958] Done")
        else {
            panic!("expected tagged");
        };
        let code = tagged.code.unwrap();
        assert_eq!(code.key, "COPYUID");
        assert_eq!(code.item(0), Some(&Value::Number(38505)));
        assert_eq!(code.item(2), Some(&s("3956:3958")));
    }

    #[test]
    fn test_counts() {
        assert_eq!(untagged("* 18 EXISTS"), Untagged::Exists(18));
        assert_eq!(untagged("* 2 RECENT"), Untagged::Recent(2));
        assert_eq!(untagged("* 44 EXPUNGE"), Untagged::Expunge(44));
    }

    #[test]
    fn test_fetch_items() {
        let Untagged::Fetch { seqno, items } = untagged(concat!(
            "* 12 FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" ",
            "RFC822.SIZE 4286 UID 7 MODSEQ (90060115194045001) ",
            "BODY (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" 3028 92))"
        )) else {
            panic!("expected fetch");
        };
        assert_eq!(seqno, 12);
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["FLAGS", "INTERNALDATE", "RFC822.SIZE", "UID", "MODSEQ", "BODY"]);
        assert_eq!(items[0].value, FetchValue::Flags(vec!["\\Seen".into()]));
        assert_eq!(items[2].value, FetchValue::Size(4286));
        assert_eq!(items[3].value, FetchValue::Uid(7));
        assert_eq!(items[4].value, FetchValue::ModSeq("90060115194045001".into()));
        assert!(matches!(items[5].value, FetchValue::Structure(_)));
    }

    #[test]
    fn test_fetch_section_key_keeps_case() {
        let Untagged::Fetch { items, .. } = untagged("* 1 FETCH (body[header.fields (From)] NIL)")
        else {
            panic!("expected fetch");
        };
        assert_eq!(items[0].key, "BODY[header.fields (From)]");
    }

    #[test]
    fn test_gmail_labels() {
        let Untagged::Fetch { items, .. } = untagged(
            r#"* 1 FETCH (X-GM-LABELS (\\Important "Work") X-GM-THRID 1278455344230334865)"#,
        ) else {
            panic!("expected fetch");
        };
        assert_eq!(
            items[0].value,
            FetchValue::Labels(vec!["\\Important".into(), "Work".into()])
        );
        assert_eq!(items[1].value, FetchValue::Id("1278455344230334865".into()));
    }

    #[test]
    fn test_esearch() {
        let Untagged::Esearch(min_max) = untagged("* ESEARCH (TAG \"A285\") UID MIN 7 MAX 3800")
        else {
            panic!("expected esearch");
        };
        assert!(min_max.uid);
        assert_eq!((min_max.min, min_max.max), (Some(7), Some(3800)));

        let Untagged::Esearch(min) = untagged("* ESEARCH (TAG \"A284\") MIN 4") else {
            panic!("expected esearch");
        };
        assert!(!min.uid);
        assert_eq!(min.min, Some(4));
        assert_eq!(min.max, None);

        let Untagged::Esearch(all) = untagged("* ESEARCH (TAG \"A283\") ALL 2,10:11") else {
            panic!("expected esearch");
        };
        assert_eq!(all.all, Some(vec!["2".to_string(), "10:11".to_string()]));
    }

    #[test]
    fn test_quota() {
        let Untagged::Quota(quota) = untagged("* QUOTA \"\" (STORAGE 10 512)") else {
            panic!("expected quota");
        };
        assert_eq!(quota.root, "");
        assert_eq!(quota.resources["storage"], QuotaResource { usage: 10, limit: 512 });

        assert_eq!(
            untagged("* QUOTAROOT INBOX \"\""),
            Untagged::QuotaRoot {
                roots: vec![String::new()],
                mailbox: "INBOX".into(),
            }
        );
    }

    #[test]
    fn test_metadata() {
        let Untagged::Metadata(single) =
            untagged(r#"* METADATA "INBOX" (/private/comment "My own comment")"#)
        else {
            panic!("expected metadata");
        };
        assert_eq!(single.mailbox, "INBOX");
        assert_eq!(single.entries["/private/comment"].as_deref(), Some("My own comment"));

        let Untagged::Metadata(multiple) = untagged(
            r#"* METADATA "INBOX" (/private/comment "My comment" /shared/comment "Its sunny outside!")"#,
        ) else {
            panic!("expected metadata");
        };
        assert_eq!(multiple.entries.len(), 2);
        assert_eq!(
            multiple.entries["/shared/comment"].as_deref(),
            Some("Its sunny outside!")
        );

        let Untagged::Metadata(notice) = untagged(r#"* METADATA "" /shared/comment"#) else {
            panic!("expected metadata");
        };
        assert_eq!(notice.mailbox, "");
        assert_eq!(notice.entries["/shared/comment"], None);
    }

    #[test]
    fn test_vanished() {
        assert_eq!(
            untagged("* VANISHED (EARLIER) 300:310,405,411"),
            Untagged::Vanished {
                earlier: true,
                uids: vec!["300:310".into(), "405".into(), "411".into()],
            }
        );
        assert_eq!(
            untagged("* VANISHED 405,407,410,425:510"),
            Untagged::Vanished {
                earlier: false,
                uids: vec!["405".into(), "407".into(), "410".into(), "425:510".into()],
            }
        );
    }

    #[test]
    fn test_id_and_capability() {
        assert_eq!(untagged("* ID NIL"), Untagged::Id(None));
        let Untagged::Id(Some(id)) = untagged(r#"* ID ("name" "Cyrus" "os" NIL)"#) else {
            panic!("expected id");
        };
        assert_eq!(id["name"].as_deref(), Some("Cyrus"));
        assert_eq!(id["os"], None);
        assert_eq!(
            untagged("* CAPABILITY IMAP4rev1 idle AUTH=XOAUTH2"),
            Untagged::Capability(vec!["IMAP4REV1".into(), "IDLE".into(), "AUTH=XOAUTH2".into()])
        );
    }

    #[test]
    fn test_unknown_untagged() {
        assert_eq!(
            untagged("* XYZZY plugh"),
            Untagged::Other {
                name: "XYZZY".into(),
                num: None,
                text: "plugh".into(),
            }
        );
    }
}
