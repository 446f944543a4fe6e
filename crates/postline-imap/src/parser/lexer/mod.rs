//! Token cursor over a logical response line.
//!
//! A logical line is a server line with any embedded literals spliced back
//! in, so a literal appears as `{n}\r\n` followed by its `n` raw bytes. The
//! lexer is deliberately permissive: real servers send unescaped quotes,
//! 8-bit atoms and section specifiers full of spaces, and none of that may
//! abort parsing.

mod token;

pub use token::Token;

use crate::{Error, Result};

/// Lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if only whitespace is left.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.remaining().iter().all(u8::is_ascii_whitespace)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Skips spaces and line breaks between tokens.
    pub fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Reads the next token.
    ///
    /// # Errors
    ///
    /// Fails only when a literal announces more bytes than the input holds.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        self.skip_spaces();
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        match byte {
            b'(' => {
                self.pos += 1;
                Ok(Token::LParen)
            }
            b')' => {
                self.pos += 1;
                Ok(Token::RParen)
            }
            b'"' => Ok(self.read_quoted()),
            b'{' => match self.literal_size() {
                Some((size, header_len)) => self.read_literal(size, header_len),
                None => Ok(self.read_atom()),
            },
            _ => Ok(self.read_atom()),
        }
    }

    /// Reads a quoted string.
    ///
    /// A backslash escapes the following byte. A quote only terminates the
    /// string when followed by end of input, a space, a parenthesis or a
    /// bracket; any other quote is taken as text.
    fn read_quoted(&mut self) -> Token<'a> {
        self.pos += 1;
        let mut out = Vec::new();

        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => {
                    if let Some(next) = self.peek() {
                        out.push(next);
                        self.pos += 1;
                    }
                }
                b'"' => {
                    if matches!(self.peek(), None | Some(b' ' | b'(' | b')' | b'[' | b']')) {
                        return Token::Quoted(out);
                    }
                    out.push(b'"');
                }
                _ => out.push(b),
            }
        }

        Token::Quoted(out)
    }

    /// Returns `(size, header length)` if a well-formed `{n}` or `{n+}`
    /// marker followed by a line break starts here.
    fn literal_size(&self) -> Option<(usize, usize)> {
        let rest = self.remaining();
        let close = rest.iter().position(|&b| b == b'}')?;
        let digits = rest[1..close].strip_suffix(b"+").unwrap_or(&rest[1..close]);
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let size = std::str::from_utf8(digits).ok()?.parse().ok()?;

        let after = close + 1;
        let header_len = match (rest.get(after), rest.get(after + 1)) {
            (Some(b'\r'), Some(b'\n')) => after + 2,
            (Some(b'\n'), _) => after + 1,
            _ => return None,
        };
        Some((size, header_len))
    }

    fn read_literal(&mut self, size: usize, header_len: usize) -> Result<Token<'a>> {
        let start = self.pos + header_len;
        let end = start + size;
        if end > self.input.len() {
            return Err(self.error("Incomplete literal data"));
        }
        self.pos = end;
        Ok(Token::Literal(&self.input[start..end]))
    }

    /// Reads an atom. `[...]` runs are consumed whole, so section
    /// specifiers with spaces and parentheses stay in one token.
    fn read_atom(&mut self) -> Token<'a> {
        let start = self.pos;

        while let Some(b) = self.peek() {
            if b == b'[' {
                self.skip_bracketed();
            } else if is_atom_char(b) {
                self.pos += 1;
            } else {
                break;
            }
        }

        // Stray '{' or similar: never return an empty atom.
        if self.pos == start {
            self.pos += 1;
        }
        Token::Atom(&self.input[start..self.pos])
    }

    fn skip_bracketed(&mut self) {
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                b'"' => self.skip_quoted_in_section(),
                _ => {}
            }
        }
    }

    fn skip_quoted_in_section(&mut self) {
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' if self.peek_at(0).is_some() => self.pos += 1,
                b'"' => return,
                _ => {}
            }
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }
}

/// Returns true if `b` may appear in an atom.
///
/// 8-bit bytes are accepted because servers put raw UTF-8 in atoms.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    b > 0x20 && !matches!(b, b'(' | b')' | b'"')
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

    fn tokens(input: &[u8]) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::Eof {
                return out;
            }
            out.push(token);
        }
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            tokens(b"FLAGS (\\Seen) 42"),
            vec![
                Token::Atom(b"FLAGS"),
                Token::LParen,
                Token::Atom(b"\\Seen"),
                Token::RParen,
                Token::Atom(b"42"),
            ]
        );
    }

    #[test]
    fn test_section_stays_in_one_atom() {
        assert_eq!(
            tokens(b"BODY[HEADER.FIELDS (TO \"FROM\")]<0> NIL"),
            vec![
                Token::Atom(b"BODY[HEADER.FIELDS (TO \"FROM\")]<0>"),
                Token::Atom(b"NIL"),
            ]
        );
    }

    #[test]
    fn test_quoted_string_escaped() {
        assert_eq!(
            tokens(br#""a \"b\" \\c""#),
            vec![Token::Quoted(br#"a "b" \c"#.to_vec())]
        );
    }

    #[test]
    fn test_embedded_quote_is_text() {
        assert_eq!(
            tokens(br#"("FROM "boss@example.com"")"#),
            vec![
                Token::LParen,
                Token::Quoted(br#"FROM "boss@example.com""#.to_vec()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(tokens(b"\"abc"), vec![Token::Quoted(b"abc".to_vec())]);
    }

    #[test]
    fn test_literal() {
        assert_eq!(
            tokens(b"X {5}\r\nhe)lo Y"),
            vec![Token::Atom(b"X"), Token::Literal(b"he)lo"), Token::Atom(b"Y")]
        );
    }

    #[test]
    fn test_literal_plus_and_bare_lf() {
        assert_eq!(tokens(b"{3+}\nabc"), vec![Token::Literal(b"abc")]);
    }

    #[test]
    fn test_incomplete_literal_fails() {
        let mut lexer = Lexer::new(b"{10}\r\nabc");
        assert!(matches!(lexer.next_token(), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_brace_without_size_is_atom() {
        assert_eq!(tokens(b"{abc}"), vec![Token::Atom(b"{abc}")]);
    }

    #[test]
    fn test_eight_bit_atom() {
        assert_eq!(tokens("Entwürfe".as_bytes()), vec![Token::Atom("Entwürfe".as_bytes())]);
    }

    #[test]
    fn test_is_atom_char() {
        assert!(is_atom_char(b'a'));
        assert!(is_atom_char(b'\\'));
        assert!(is_atom_char(b'*'));
        assert!(!is_atom_char(b' '));
        assert!(!is_atom_char(b'('));
        assert!(!is_atom_char(b'"'));
    }
}
