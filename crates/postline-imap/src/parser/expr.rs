//! Grammar decoder for parenthesized IMAP data.

use std::fmt;

use super::lexer::{Lexer, Token};
use crate::Result;

/// Largest integer that is still exactly representable as an IEEE double.
///
/// Numbers above it stay strings, so a 64-bit MODSEQ never loses digits
/// when a consumer converts it.
pub const MAX_EXACT_NUMBER: u64 = 9_007_199_254_740_992;

/// A decoded IMAP data item.
///
/// Atoms and strings both decode to [`Value::String`], so two spellings of
/// the same section specifier compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `NIL`.
    Nil,
    /// A numeric atom no larger than [`MAX_EXACT_NUMBER`].
    Number(u64),
    /// An atom, quoted string or literal.
    String(String),
    /// A parenthesized list.
    List(Vec<Value>),
}

impl Value {
    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number, also accepting numeric strings.
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true for `NIL`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Renders strings and numbers as text; `None` for `NIL` and lists.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("NIL"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn atom_value(atom: &[u8]) -> Value {
    if atom.eq_ignore_ascii_case(b"NIL") {
        return Value::Nil;
    }
    if !atom.is_empty() && atom.len() <= 16 && atom.iter().all(u8::is_ascii_digit) {
        let n = std::str::from_utf8(atom)
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(n) = n.filter(|&n| n <= MAX_EXACT_NUMBER) {
            return Value::Number(n);
        }
    }
    Value::String(String::from_utf8_lossy(atom).into_owned())
}

/// Decodes a sequence of IMAP data items.
///
/// Unbalanced parentheses are tolerated: a stray `)` at the top level is
/// skipped and unclosed lists end at end of input.
///
/// # Errors
///
/// Fails only on a literal that announces more bytes than are present.
pub fn parse_expr(input: &[u8]) -> Result<Vec<Value>> {
    let mut lexer = Lexer::new(input);
    let mut stack: Vec<Vec<Value>> = vec![Vec::new()];

    loop {
        let value = match lexer.next_token()? {
            Token::Eof => break,
            Token::LParen => {
                stack.push(Vec::new());
                continue;
            }
            Token::RParen => {
                if stack.len() == 1 {
                    continue;
                }
                let items = stack.pop().unwrap_or_default();
                Value::List(items)
            }
            Token::Atom(atom) => atom_value(atom),
            Token::Quoted(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            Token::Literal(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        };
        if let Some(top) = stack.last_mut() {
            top.push(value);
        }
    }

    while stack.len() > 1 {
        let items = stack.pop().unwrap_or_default();
        if let Some(top) = stack.last_mut() {
            top.push(Value::List(items));
        }
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Escapes a string for use inside an IMAP quoted string.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Quotes a string for use as a command argument.
#[must_use]
pub fn quote(text: &str) -> String {
    format!("\"{}\"", escape(text))
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
    use proptest::prelude::*;

    use super::*;

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    fn list(items: Vec<Value>) -> Value {
        Value::List(items)
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_expr(b"").unwrap(), vec![]);
    }

    #[test]
    fn test_empty_quoted_string() {
        assert_eq!(parse_expr(b"\"\"").unwrap(), vec![s("")]);
    }

    #[test]
    fn test_pairs_with_nil() {
        assert_eq!(
            parse_expr(b"FLAGS NIL RFC822.SIZE 44827").unwrap(),
            vec![s("FLAGS"), Value::Nil, s("RFC822.SIZE"), Value::Number(44827)]
        );
    }

    #[test]
    fn test_pairs_with_list() {
        assert_eq!(
            parse_expr(b"FLAGS (\\Seen) RFC822.SIZE 44827").unwrap(),
            vec![s("FLAGS"), list(vec![s("\\Seen")]), s("RFC822.SIZE"), Value::Number(44827)]
        );
    }

    #[test]
    fn test_number_beyond_exact_range_stays_string() {
        assert_eq!(
            parse_expr(b"RFC822.SIZE 9007199254740993").unwrap(),
            vec![s("RFC822.SIZE"), s("9007199254740993")]
        );
        assert_eq!(
            parse_expr(b"9007199254740992").unwrap(),
            vec![Value::Number(MAX_EXACT_NUMBER)]
        );
    }

    #[test]
    fn test_quoted_date() {
        assert_eq!(
            parse_expr(b"INTERNALDATE \"17-Jul-1996 02:44:25 -0700\"").unwrap(),
            vec![s("INTERNALDATE"), s("17-Jul-1996 02:44:25 -0700")]
        );
    }

    #[test]
    fn test_lists_with_varying_spacing() {
        assert_eq!(
            parse_expr(b"(\"Foo\")(\"Bar\") (\"Baz\")").unwrap(),
            vec![list(vec![s("Foo")]), list(vec![s("Bar")]), list(vec![s("Baz")])]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            parse_expr(br#""\"IMAP\" is terrible :\\""#).unwrap(),
            vec![s(r#""IMAP" is terrible :\"#)]
        );
        assert_eq!(
            parse_expr(br#""\\"IMAP\" is terrible :\\""#).unwrap(),
            vec![s(r#"\"IMAP" is terrible :\"#)]
        );
        assert_eq!(
            parse_expr(br#""Who does not think \"IMAP\" is terrible\\bad?""#).unwrap(),
            vec![s(r#"Who does not think "IMAP" is terrible\bad?"#)]
        );
        assert_eq!(
            parse_expr(br#""Who does not think \\"IMAP\" is terrible\\bad?""#).unwrap(),
            vec![s(r#"Who does not think \"IMAP" is terrible\bad?"#)]
        );
    }

    #[test]
    fn test_triple_backslash_in_envelope() {
        let input = br#"ENVELOPE ("Wed, 30 Mar 2014 02:38:23 +0100" "=?ISO-8859-1?Q?##ALLCAPS##123456## - ?= =?ISO-8859-1?Q?[ALERT][P3][ONE.TWO.FR] ?= =?ISO-8859-1?Q?Some Subject Line \"D:\\\"?=" (("Test Account (Rltvty L)" NIL "account" "test.com")) (("Test Account (Rltvty L)" NIL "account" "test.com")) ((NIL NIL "account" "test.com")) ((NIL NIL "one.two" "test.fr") (NIL NIL "two.three" "test.fr")) NIL NIL NIL "<message@test.eu>")"#;
        let account =
            list(vec![s("Test Account (Rltvty L)"), Value::Nil, s("account"), s("test.com")]);
        assert_eq!(
            parse_expr(input).unwrap(),
            vec![
                s("ENVELOPE"),
                list(vec![
                    s("Wed, 30 Mar 2014 02:38:23 +0100"),
                    s(r#"=?ISO-8859-1?Q?##ALLCAPS##123456## - ?= =?ISO-8859-1?Q?[ALERT][P3][ONE.TWO.FR] ?= =?ISO-8859-1?Q?Some Subject Line "D:\"?="#),
                    list(vec![account.clone()]),
                    list(vec![account]),
                    list(vec![list(vec![Value::Nil, Value::Nil, s("account"), s("test.com")])]),
                    list(vec![
                        list(vec![Value::Nil, Value::Nil, s("one.two"), s("test.fr")]),
                        list(vec![Value::Nil, Value::Nil, s("two.three"), s("test.fr")]),
                    ]),
                    Value::Nil,
                    Value::Nil,
                    Value::Nil,
                    s("<message@test.eu>"),
                ]),
            ]
        );
    }

    #[test]
    fn test_literal_becomes_string() {
        assert_eq!(
            parse_expr(b"(INTERNALDATE {26}\r\n17-Jul-1996 02:44:25 -0700)").unwrap(),
            vec![list(vec![s("INTERNALDATE"), s("17-Jul-1996 02:44:25 -0700")])]
        );
    }

    #[test]
    fn test_unbalanced_parens() {
        assert_eq!(parse_expr(b"a) (b (c").unwrap(), vec![
            s("a"),
            list(vec![s("b"), list(vec![s("c")])]),
        ]);
    }

    #[test]
    fn test_atom_and_quoted_compare_equal() {
        assert_eq!(
            parse_expr(b"HEADER.FIELDS (FROM TO)").unwrap(),
            parse_expr(b"\"HEADER.FIELDS\" (\"FROM\" TO)").unwrap()
        );
    }

    proptest! {
        #[test]
        fn numbers_are_exact_or_strings(n in any::<u64>()) {
            let parsed = parse_expr(n.to_string().as_bytes()).unwrap();
            if n <= MAX_EXACT_NUMBER {
                prop_assert_eq!(parsed, vec![Value::Number(n)]);
            } else {
                prop_assert_eq!(parsed, vec![Value::String(n.to_string())]);
            }
        }

        #[test]
        fn quoting_round_trips(text in "[ -~]*") {
            let parsed = parse_expr(quote(&text).as_bytes()).unwrap();
            prop_assert_eq!(parsed, vec![Value::String(text)]);
        }
    }
}
