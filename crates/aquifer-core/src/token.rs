//! Lexical tokens shared by both dialects.

use serde::{Deserialize, Serialize};

/// Closed enumeration of token kinds produced by the lexer.
///
/// Both dialects share one `Token`/`TokenKind` pair; per-dialect
/// keyword tables (see [`crate::lexer::KeywordTable`]) decide which
/// lexeme maps to which keyword variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals / identifiers
    Identifier,
    Integer,
    Decimal,
    StringLiteral,
    Boolean,
    Null,

    // SQL keywords
    Select,
    From,
    Where,
    Join,
    On,
    GroupBy,
    Having,
    OrderBy,
    As,
    And,
    Or,
    Not,
    Asc,
    Desc,
    Distinct,
    In,
    Like,

    // Document-dialect keywords
    Find,
    Project,
    Sort,
    Limit,
    Skip,

    // Operators
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Delimiters
    Comma,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Star,

    /// End of input.
    Eof,
    /// An unrecognized or malformed lexeme. The parser turns this
    /// into a `SYNTAX_ERROR` without panicking.
    Error,
}

/// A single lexical token. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Token kind.
    pub kind:   TokenKind,
    /// Exact source text this token was scanned from.
    pub lexeme: String,
    /// 1-based line number.
    pub line:   usize,
    /// 1-based column number (of the first character).
    pub column: usize,
}

impl Token {
    /// Construct a new token.
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self { kind, lexeme: lexeme.into(), line, column }
    }

    /// Shorthand for an [`TokenKind::Error`] token carrying a message
    /// as its lexeme.
    pub fn error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::new(TokenKind::Error, message, line, column)
    }

    /// True for the sentinel end-of-input token.
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}
