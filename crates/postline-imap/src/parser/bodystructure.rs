//! BODYSTRUCTURE decoding.
//!
//! Produces a tree of [`BodyStructure`] nodes. Leaves carry a dotted part
//! identifier usable in `BODY[<part>]` fetches. Malformed structures degrade
//! to default field values rather than failing.

use std::collections::BTreeMap;

use super::envelope::Envelope;
use super::expr::{Value, parse_expr};
use crate::Result;

/// Parameter map with lowercased names.
pub type Params = BTreeMap<String, String>;

/// Content-Disposition extension data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition type, e.g. `attachment`.
    pub kind: String,
    /// Disposition parameters.
    pub params: Option<Params>,
}

/// A non-multipart body part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Dotted part path, e.g. `1.2`.
    pub part_id: String,
    /// Lowercased media type. `NIL` yields `text`.
    pub media_type: String,
    /// Lowercased media subtype. `NIL` yields `plain`.
    pub subtype: String,
    /// Content-Type parameters.
    pub params: Option<Params>,
    /// Content-ID.
    pub id: Option<String>,
    /// Content-Description.
    pub description: Option<String>,
    /// Content-Transfer-Encoding, as sent.
    pub encoding: Option<String>,
    /// Size in octets.
    pub size: Option<u64>,
    /// Line count for `text/*` and `message/rfc822` parts.
    pub lines: Option<u64>,
    /// Envelope of an embedded `message/rfc822`.
    pub envelope: Option<Box<Envelope>>,
    /// Body of an embedded `message/rfc822`.
    pub body: Option<Box<BodyStructure>>,
    /// Content-MD5.
    pub md5: Option<String>,
    /// Content-Disposition.
    pub disposition: Option<Disposition>,
    /// Content-Language.
    pub language: Option<Vec<String>>,
    /// Content-Location.
    pub location: Option<String>,
    /// Unrecognised trailing extension data.
    pub extensions: Option<Vec<Value>>,
}

/// A multipart container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    /// Lowercased subtype, e.g. `mixed`. `None` for broken structures.
    pub subtype: Option<String>,
    /// Child parts in order.
    pub parts: Vec<BodyStructure>,
    /// Content-Type parameters.
    pub params: Option<Params>,
    /// Content-Disposition.
    pub disposition: Option<Disposition>,
    /// Content-Language.
    pub language: Option<Vec<String>>,
    /// Content-Location.
    pub location: Option<String>,
    /// Unrecognised trailing extension data.
    pub extensions: Option<Vec<Value>>,
}

/// A node of a message's MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    /// Multipart container.
    Multipart(Multipart),
    /// Leaf part.
    Part(BodyPart),
}

impl BodyStructure {
    /// Decodes the items of a BODY or BODYSTRUCTURE list.
    #[must_use]
    pub fn from_values(items: &[Value]) -> Self {
        parse_node(items, "")
    }

    /// Decodes BODYSTRUCTURE text, i.e. the content between the outer
    /// parentheses.
    ///
    /// # Errors
    ///
    /// Fails only if the text contains a truncated literal.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::from_values(&parse_expr(text.as_bytes())?))
    }

    /// Visits every leaf part in depth-first order.
    pub fn leaves(&self) -> Vec<&BodyPart> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a BodyPart>) {
        match self {
            Self::Multipart(multi) => multi.parts.iter().for_each(|p| p.collect_leaves(out)),
            Self::Part(part) => out.push(part),
        }
    }
}

fn child_path(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        index.to_string()
    } else {
        format!("{prefix}.{index}")
    }
}

fn parse_node(items: &[Value], path: &str) -> BodyStructure {
    match items.first() {
        Some(Value::List(_) | Value::Nil) => BodyStructure::Multipart(parse_multipart(items, path)),
        _ => BodyStructure::Part(parse_part(items, path)),
    }
}

fn parse_multipart(items: &[Value], path: &str) -> Multipart {
    let parts: Vec<BodyStructure> = items
        .iter()
        .take_while(|v| v.as_list().is_some())
        .enumerate()
        .map(|(i, child)| parse_node(child.as_list().unwrap_or_default(), &child_path(path, i + 1)))
        .collect();

    let mut cursor = Cursor::new(items, parts.len());
    let subtype = cursor.next().and_then(Value::to_text).map(|s| s.to_lowercase());
    let params = cursor.next().and_then(parse_params);
    let (disposition, language, location) = cursor.extension_fields();
    let extensions = if subtype.is_some() { cursor.rest() } else { None };

    Multipart {
        subtype,
        parts,
        params,
        disposition,
        language,
        location,
        extensions,
    }
}

fn parse_part(items: &[Value], path: &str) -> BodyPart {
    let part_id = if path.is_empty() { "1".to_string() } else { path.to_string() };
    let text = |i: usize| items.get(i).and_then(Value::to_text);
    let number = |i: usize| items.get(i).and_then(Value::as_number);

    let media_type = text(0).map_or_else(|| "text".to_string(), |s| s.to_lowercase());
    let subtype = text(1).map_or_else(|| "plain".to_string(), |s| s.to_lowercase());

    let mut part = BodyPart {
        params: items.get(2).and_then(parse_params),
        id: text(3),
        description: text(4),
        encoding: text(5),
        size: number(6),
        lines: None,
        envelope: None,
        body: None,
        md5: None,
        disposition: None,
        language: None,
        location: None,
        extensions: None,
        part_id,
        media_type,
        subtype,
    };

    let mut cursor = Cursor::new(items, 7);
    if part.media_type == "message" && part.subtype == "rfc822" {
        part.envelope = cursor
            .next()
            .and_then(Value::as_list)
            .map(|fields| Box::new(Envelope::from_values(fields)));
        part.body = cursor.next().and_then(Value::as_list).map(|inner| {
            let path = match inner.first() {
                Some(Value::List(_)) => part.part_id.clone(),
                _ => child_path(&part.part_id, 1),
            };
            Box::new(parse_node(inner, &path))
        });
        part.lines = cursor.next().and_then(Value::as_number);
    } else if part.media_type == "text" {
        part.lines = cursor.next().and_then(Value::as_number);
    }

    if cursor.has_more() {
        part.md5 = cursor.next().and_then(Value::to_text);
    }
    let (disposition, language, location) = cursor.extension_fields();
    part.disposition = disposition;
    part.language = language;
    part.location = location;
    part.extensions = cursor.rest();
    part
}

struct Cursor<'a> {
    items: &'a [Value],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(items: &'a [Value], pos: usize) -> Self {
        Self { items, pos }
    }

    fn has_more(&self) -> bool {
        self.pos < self.items.len()
    }

    fn peek(&self) -> Option<&'a Value> {
        self.items.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Value> {
        let item = self.peek()?;
        self.pos += 1;
        Some(item)
    }

    /// Reads disposition, language and location.
    ///
    /// A list that is not shaped like a disposition is left for the language
    /// field instead of being consumed.
    fn extension_fields(&mut self) -> (Option<Disposition>, Option<Vec<String>>, Option<String>) {
        let disposition = match self.peek() {
            Some(value @ Value::List(_)) => {
                let parsed = parse_disposition(value);
                if parsed.is_some() {
                    self.pos += 1;
                }
                parsed
            }
            Some(_) => {
                self.pos += 1;
                None
            }
            None => None,
        };
        let language = self.next().and_then(|v| match v {
            Value::List(items) => Some(items.iter().filter_map(Value::to_text).collect()),
            Value::Nil => None,
            other => other.to_text().map(|s| vec![s]),
        });
        let location = self.next().and_then(Value::to_text);
        (disposition, language, location)
    }

    fn rest(&mut self) -> Option<Vec<Value>> {
        if !self.has_more() {
            return None;
        }
        let rest = self.items[self.pos..].to_vec();
        self.pos = self.items.len();
        Some(rest)
    }
}

fn parse_params(value: &Value) -> Option<Params> {
    let items = value.as_list()?;
    Some(
        items
            .chunks(2)
            .filter_map(|pair| {
                let key = pair.first()?.to_text()?.to_lowercase();
                let value = pair.get(1).and_then(Value::to_text).unwrap_or_default();
                Some((key, value))
            })
            .collect(),
    )
}

fn parse_disposition(value: &Value) -> Option<Disposition> {
    let items = value.as_list()?;
    let kind = items.first()?.to_text()?;
    let params = match items.get(1) {
        None | Some(Value::Nil) => None,
        Some(list @ Value::List(_)) => parse_params(list),
        Some(_) => return None,
    };
    Some(Disposition { kind, params })
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

    fn params(pairs: &[(&str, &str)]) -> Option<Params> {
        Some(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    fn leaf(structure: &BodyStructure) -> &BodyPart {
        match structure {
            BodyStructure::Part(part) => part,
            BodyStructure::Multipart(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_rfc3501_multipart() {
        let structure = BodyStructure::parse(concat!(
            r#"("TEXT" "PLAIN" ("CHARSET" "US-ASCII") NIL NIL "7BIT" 1152 23)"#,
            r#"("TEXT" "PLAIN" ("CHARSET" "US-ASCII" "NAME" "cc.diff")"#,
            r#" "<960723163407.20117h@cac.washington.edu>" "Compiler diff""#,
            r#" "BASE64" 4554 73)"#,
            r#""MIXED""#
        ))
        .unwrap();

        let BodyStructure::Multipart(multi) = &structure else {
            panic!("expected multipart");
        };
        assert_eq!(multi.subtype.as_deref(), Some("mixed"));
        assert_eq!(multi.params, None);
        assert_eq!(multi.parts.len(), 2);

        let first = leaf(&multi.parts[0]);
        assert_eq!(first.part_id, "1");
        assert_eq!(first.media_type, "text");
        assert_eq!(first.subtype, "plain");
        assert_eq!(first.params, params(&[("charset", "US-ASCII")]));
        assert_eq!(first.id, None);
        assert_eq!(first.encoding.as_deref(), Some("7BIT"));
        assert_eq!(first.size, Some(1152));
        assert_eq!(first.lines, Some(23));

        let second = leaf(&multi.parts[1]);
        assert_eq!(second.part_id, "2");
        assert_eq!(
            second.params,
            params(&[("charset", "US-ASCII"), ("name", "cc.diff")])
        );
        assert_eq!(
            second.id.as_deref(),
            Some("<960723163407.20117h@cac.washington.edu>")
        );
        assert_eq!(second.description.as_deref(), Some("Compiler diff"));
        assert_eq!(second.encoding.as_deref(), Some("BASE64"));
        assert_eq!(second.size, Some(4554));
        assert_eq!(second.lines, Some(73));
    }

    #[test]
    fn test_rfc3501_single_part() {
        let structure =
            BodyStructure::parse(r#""TEXT" "PLAIN" ("CHARSET" "US-ASCII") NIL NIL "7BIT" 3028 92"#)
                .unwrap();
        let part = leaf(&structure);
        assert_eq!(part.part_id, "1");
        assert_eq!(part.size, Some(3028));
        assert_eq!(part.lines, Some(92));
        assert_eq!(part.md5, None);
        assert_eq!(part.extensions, None);
    }

    #[test]
    fn test_nil_subtype_degrades() {
        let structure =
            BodyStructure::parse(r#"NIL NIL ("CHARSET" "GB2312") NIL NIL NIL 176 NIL NIL NIL"#)
                .unwrap();
        assert_eq!(
            structure,
            BodyStructure::Multipart(Multipart {
                subtype: None,
                parts: vec![],
                params: None,
                disposition: None,
                language: Some(vec!["CHARSET".into(), "GB2312".into()]),
                location: None,
                extensions: None,
            })
        );
    }

    #[test]
    fn test_leaf_extension_fields() {
        let structure = BodyStructure::parse(
            r#""text" "plain" ("charset" "UTF-8") NIL NIL "7bit" 15 2 NIL ("inline" ("filename" "a.txt")) "en" NIL"#,
        )
        .unwrap();
        let part = leaf(&structure);
        assert_eq!(part.encoding.as_deref(), Some("7bit"));
        assert_eq!(part.lines, Some(2));
        assert_eq!(
            part.disposition,
            Some(Disposition {
                kind: "inline".into(),
                params: params(&[("filename", "a.txt")]),
            })
        );
        assert_eq!(part.language, Some(vec!["en".to_string()]));
        assert_eq!(part.location, None);
    }

    #[test]
    fn test_nested_part_ids() {
        let structure = BodyStructure::parse(concat!(
            r#"("TEXT" "PLAIN" NIL NIL NIL "7BIT" 10 1)"#,
            r#"(("TEXT" "PLAIN" NIL NIL NIL "7BIT" 10 1)("TEXT" "HTML" NIL NIL NIL "7BIT" 20 1) "ALTERNATIVE")"#,
            r#""MIXED""#
        ))
        .unwrap();
        let ids: Vec<&str> = structure.leaves().iter().map(|p| p.part_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2.1", "2.2"]);
    }

    #[test]
    fn test_embedded_message() {
        let structure = BodyStructure::parse(concat!(
            r#"("TEXT" "PLAIN" NIL NIL NIL "7BIT" 10 1)"#,
            r#"("MESSAGE" "RFC822" NIL NIL NIL "7BIT" 300 (NIL "Inner" NIL NIL NIL NIL NIL NIL NIL NIL) ("TEXT" "PLAIN" NIL NIL NIL "7BIT" 20 2) 8)"#,
            r#""MIXED""#
        ))
        .unwrap();
        let leaves = structure.leaves();
        assert_eq!(leaves.len(), 2);
        let message = leaves[1];
        assert_eq!(message.part_id, "2");
        assert_eq!(message.lines, Some(8));
        assert_eq!(
            message.envelope.as_ref().unwrap().subject.as_deref(),
            Some("Inner")
        );
        assert_eq!(leaf(message.body.as_ref().unwrap()).part_id, "2.1");
    }
}
