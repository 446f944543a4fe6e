//! Token types.

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Atom, possibly carrying a `[section]` and `<origin>` suffix.
    Atom(&'a [u8]),
    /// Quoted string with escapes removed.
    Quoted(Vec<u8>),
    /// Literal string introduced by `{n}`.
    Literal(&'a [u8]),
    /// Opening parenthesis.
    LParen,
    /// Closing parenthesis.
    RParen,
    /// End of input.
    Eof,
}
