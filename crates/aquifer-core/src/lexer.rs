//! Single-pass scanner shared by both dialects.
//!
//! Grounded on the teacher's recursive-descent conventions in
//! `fraiseql-core::compiler::parser` and the original `datapunk`
//! `Lexer`/`NoSQLLexer` (`examples/original_source/datapunk/containers/lake/src/query/parser/{core,nosql}.py`):
//! a `start`/`current` cursor pair, 1-character lookahead, and a
//! per-dialect keyword table consulted only when an identifier has
//! already been scanned.

use std::collections::HashMap;

use crate::token::{Token, TokenKind};

/// Maps uppercased keyword text to a [`TokenKind`]. Dialects register
/// their own table; the scanner itself has no dialect knowledge.
pub type KeywordTable = HashMap<&'static str, TokenKind>;

/// SQL dialect keyword table.
pub fn sql_keywords() -> KeywordTable {
    use TokenKind::*;
    HashMap::from([
        ("SELECT", Select),
        ("FROM", From),
        ("WHERE", Where),
        ("JOIN", Join),
        ("ON", On),
        ("GROUP", GroupBy),
        ("HAVING", Having),
        ("ORDER", OrderBy),
        ("BY", Identifier), // consumed contextually after GROUP/ORDER
        ("AS", As),
        ("AND", And),
        ("OR", Or),
        ("NOT", Not),
        ("ASC", Asc),
        ("DESC", Desc),
        ("DISTINCT", Distinct),
        ("IN", In),
        ("LIKE", Like),
        ("NULL", Null),
        ("TRUE", Boolean),
        ("FALSE", Boolean),
    ])
}

/// Document dialect keyword table.
///
/// `LIMIT` and `SKIP` are first-class keywords here (see
/// `SPEC_FULL.md` §4.1 for why this resolves the upstream
/// inconsistency rather than reinterpreting an `Identifier` token at
/// parse time).
pub fn doc_keywords() -> KeywordTable {
    use TokenKind::*;
    HashMap::from([
        ("FIND", Find),
        ("IN", From), // `FIND IN <collection>`
        ("WHERE", Where),
        ("PROJECT", Project),
        ("SORT", Sort),
        ("LIMIT", Limit),
        ("SKIP", Skip),
        ("ASC", Asc),
        ("DESC", Desc),
        ("AND", And),
        ("OR", Or),
        ("NOT", Not),
        ("NULL", Null),
        ("TRUE", Boolean),
        ("FALSE", Boolean),
    ])
}

/// Single-pass, panic-free scanner.
pub struct Lexer<'a> {
    source:   &'a [u8],
    keywords: &'a KeywordTable,
    start:    usize,
    current:  usize,
    line:     usize,
    column:   usize,
    start_col: usize,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source` using `keywords` for identifier
    /// reclassification.
    pub fn new(source: &'a str, keywords: &'a KeywordTable) -> Self {
        Self {
            source: source.as_bytes(),
            keywords,
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_col: 1,
        }
    }

    /// Scan the entire source into a token stream. Always terminates
    /// with exactly one [`TokenKind::Eof`] token. Malformed input
    /// produces [`TokenKind::Error`] tokens inline rather than
    /// aborting the scan.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while !self.is_at_end() {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            self.start = self.current;
            self.start_col = self.column;
            if let Some(token) = self.scan_token() {
                tokens.push(token);
            }
        }
        tokens.push(Token::new(TokenKind::Eof, "", self.line, self.column));
        tokens
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.source[self.current] }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.source.len() { 0 } else { self.source[self.current + 1] }
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn lexeme(&self) -> String {
        String::from_utf8_lossy(&self.source[self.start..self.current]).into_owned()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.lexeme(), self.line, self.start_col)
    }

    fn scan_token(&mut self) -> Option<Token> {
        let c = self.advance();
        let token = match c {
            b'(' => self.make(TokenKind::LParen),
            b')' => self.make(TokenKind::RParen),
            b'{' => return Some(self.scan_braced(b'{', b'}', TokenKind::LBrace)),
            b'}' => self.make(TokenKind::RBrace),
            b'[' => return Some(self.scan_braced(b'[', b']', TokenKind::LBracket)),
            b']' => self.make(TokenKind::RBracket),
            b',' => self.make(TokenKind::Comma),
            b'.' if !self.peek().is_ascii_digit() => self.make(TokenKind::Dot),
            b'*' => self.make(TokenKind::Star),
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                }
                self.make(TokenKind::Eq)
            }
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(TokenKind::NotEq)
                } else {
                    Token::error(format!("unexpected character '{}'", c as char), self.line, self.start_col)
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(TokenKind::LtEq)
                } else {
                    self.make(TokenKind::Lt)
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(TokenKind::GtEq)
                } else {
                    self.make(TokenKind::Gt)
                }
            }
            b'\'' | b'"' => return Some(self.scan_string(c)),
            b'-' if self.peek().is_ascii_digit() => return Some(self.scan_number()),
            c if c.is_ascii_digit() => return Some(self.scan_number()),
            c if c.is_ascii_alphabetic() || c == b'_' => return Some(self.scan_identifier()),
            other => Token::error(format!("unexpected character '{}'", other as char), self.line, self.start_col),
        };
        Some(token)
    }

    fn scan_string(&mut self, quote: u8) -> Token {
        while !self.is_at_end() && self.peek() != quote {
            self.advance();
        }
        if self.is_at_end() {
            return Token::error("unterminated string literal", self.line, self.start_col);
        }
        self.advance(); // closing quote
        let raw = self.lexeme();
        let inner = raw[1..raw.len() - 1].to_string();
        Token::new(TokenKind::StringLiteral, inner, self.line, self.start_col)
    }

    fn scan_number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            return self.make(TokenKind::Decimal);
        }
        self.make(TokenKind::Integer)
    }

    fn scan_identifier(&mut self) -> Token {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let text = self.lexeme();
        match self.keywords.get(text.to_uppercase().as_str()) {
            Some(kind) => self.make(*kind),
            None => self.make(TokenKind::Identifier),
        }
    }

    /// Scans a balanced `{...}`/`[...]` literal used by the document
    /// dialect's filter values. Unbalanced nesting yields an
    /// [`TokenKind::Error`] token rather than scanning past EOF.
    fn scan_braced(&mut self, open: u8, close: u8, kind: TokenKind) -> Token {
        let mut depth = 1usize;
        while !self.is_at_end() && depth > 0 {
            let c = self.advance();
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
            } else if c == b'"' || c == b'\'' {
                while !self.is_at_end() && self.peek() != c {
                    self.advance();
                }
                if !self.is_at_end() {
                    self.advance();
                }
            }
        }
        if depth != 0 {
            return Token::error("unbalanced nested literal", self.line, self.start_col);
        }
        self.make(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, kw: &KeywordTable) -> Vec<TokenKind> {
        Lexer::new(src, kw).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_basic_sql_tokens() {
        let kw = sql_keywords();
        let k = kinds("SELECT a, b.c FROM t WHERE a >= 1.5", &kw);
        assert_eq!(
            k,
            vec![
                TokenKind::Select,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::From,
                TokenKind::Identifier,
                TokenKind::Where,
                TokenKind::Identifier,
                TokenKind::GtEq,
                TokenKind::Decimal,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_line_and_column() {
        let kw = sql_keywords();
        let tokens = Lexer::new("SELECT a\nFROM t", &kw).tokenize();
        let from_tok = tokens.iter().find(|t| t.kind == TokenKind::From).unwrap();
        assert_eq!(from_tok.line, 2);
        assert_eq!(from_tok.column, 1);
    }

    #[test]
    fn limit_and_skip_are_keywords_in_doc_dialect() {
        let kw = doc_keywords();
        let k = kinds("LIMIT 10 SKIP 5", &kw);
        assert_eq!(k, vec![TokenKind::Limit, TokenKind::Integer, TokenKind::Skip, TokenKind::Integer, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_yields_error_token_not_panic() {
        let kw = sql_keywords();
        let k = kinds("SELECT 'abc", &kw);
        assert_eq!(k, vec![TokenKind::Select, TokenKind::Error, TokenKind::Eof]);
    }

    #[test]
    fn unbalanced_brace_yields_error_token() {
        let kw = doc_keywords();
        let k = kinds("{a: 1", &kw);
        assert_eq!(k, vec![TokenKind::Error, TokenKind::Eof]);
    }
}
