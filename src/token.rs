//! Tokens and source positions.
//!
//! The tokenizer, its preprocessor, and its macro engine live outside this
//! crate (§1 of the spec); this module only defines the shape of the tokens
//! the core consumes. A [`Line`] is a non-empty, already-lexed slice of
//! tokens; [`crate::source::Source`] yields one `Line` at a time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 1-based line/column position in a source file, attached to tokens and
/// (by propagation) to the expressions and errors built from them.
///
/// Grounded in `aex/pos.rs`'s `Pos`, dropping the interned file-name field:
/// this crate has no notion of "file" (that belongs to the tokenizer's
/// `.include` handling), only line/column within whatever stream the host
/// is currently feeding it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Pos { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The kind of a single token, per §6's token-source contract.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// An identifier: a label, mnemonic, directive operand, or symbol name.
    Ident(String),
    /// A string literal, already unescaped by the tokenizer.
    Str(String),
    /// A numeric literal, already parsed to a value by the tokenizer.
    Num(i64),
    /// An operator or punctuation token (`+`, `,`, `:`, `(`, `#`, ...).
    Op(String),
    /// A control symbol: a directive name, always spelled with a leading
    /// `.` (e.g. `.org`, `.byte`).
    Cs(String),
    /// A parenthesized/bracketed run of sub-tokens, already grouped by the
    /// tokenizer (e.g. the argument of an indirect addressing mode).
    Group(Vec<Token>),
}

/// A single token with its source position, if known.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Option<Pos>,
}

impl Token {
    pub fn new(kind: TokenKind, pos: Option<Pos>) -> Self {
        Token { kind, pos }
    }

    pub fn ident(name: impl Into<String>, pos: Option<Pos>) -> Self {
        Token::new(TokenKind::Ident(name.into()), pos)
    }

    pub fn op(text: impl Into<String>, pos: Option<Pos>) -> Self {
        Token::new(TokenKind::Op(text.into()), pos)
    }

    pub fn cs(name: impl Into<String>, pos: Option<Pos>) -> Self {
        Token::new(TokenKind::Cs(name.into()), pos)
    }

    pub fn num(value: i64, pos: Option<Pos>) -> Self {
        Token::new(TokenKind::Num(value), pos)
    }

    pub fn str(value: impl Into<String>, pos: Option<Pos>) -> Self {
        Token::new(TokenKind::Str(value.into()), pos)
    }

    /// The token's own position, used for diagnostics when a line-level
    /// position isn't otherwise available.
    pub fn pos(&self) -> Option<Pos> {
        self.pos
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Op(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cs(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Cs(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_lit(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<i64> {
        match &self.kind {
            TokenKind::Num(n) => Some(*n),
            _ => None,
        }
    }
}

/// A non-empty ordered sequence of tokens, as yielded by [`crate::source::Source`].
pub type Line = Vec<Token>;
