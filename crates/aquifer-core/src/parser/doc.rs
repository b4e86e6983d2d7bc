//! Document (NoSQL) dialect parser.
//!
//! Grammar (spec §4.1):
//! ```text
//! Query := FIND IN Ident (WHERE FilterChain)? (PROJECT IdentList)?
//!          (SORT SortList)? (LIMIT Number)? (SKIP Number)?
//! ```
//! Filter chains are left-associative with `AND`/`OR` links;
//! `LIMIT`/`SKIP` must be non-negative (enforced here, at parse time,
//! per spec §4.1).

use aquifer_error::AquiferError;

use crate::ast::{Ast, DocQuery, Filter, FilterChain, LogicalOp, Literal, Operator};
use crate::lexer::{doc_keywords, Lexer};
use crate::parser::{DialectParser, ParseOutcome};
use crate::token::{Token, TokenKind};

/// The document dialect parser, registered under `"nosql"`.
pub struct DocParser;

impl DialectParser for DocParser {
    fn parse(&self, text: &str) -> ParseOutcome {
        let keywords = doc_keywords();
        let tokens = Lexer::new(text, &keywords).tokenize();
        let mut p = Parser::new(tokens);
        let query = p.parse_query();
        match query {
            Some(query) if p.errors.is_empty() => ParseOutcome::ok(Ast::Doc(query)),
            _ => {
                if p.errors.is_empty() {
                    p.errors.push(AquiferError::SyntaxError {
                        message: "failed to parse FIND query".into(),
                        line:    0,
                        column:  0,
                    });
                }
                ParseOutcome::fail(p.errors)
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos:    usize,
    errors: Vec<AquiferError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, errors: Vec::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let tok = self.peek();
        self.errors.push(AquiferError::SyntaxError {
            message: message.into(),
            line:    tok.line,
            column:  tok.column,
        });
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            self.error_here(format!("expected {what}, found '{}'", self.peek().lexeme));
            None
        }
    }

    fn parse_query(&mut self) -> Option<DocQuery> {
        if self.peek().kind == TokenKind::Error {
            self.error_here(self.peek().lexeme.clone());
            return None;
        }
        self.expect(TokenKind::Find, "FIND")?;
        self.expect(TokenKind::From, "IN")?;
        let collection = self.expect(TokenKind::Identifier, "collection name")?.lexeme;

        let filter = if self.check(TokenKind::Where) {
            self.advance();
            Some(self.parse_filter_chain()?)
        } else {
            None
        };

        let projection = if self.check(TokenKind::Project) {
            self.advance();
            self.parse_ident_list()
        } else {
            Vec::new()
        };

        let sort = if self.check(TokenKind::Sort) {
            self.advance();
            self.parse_sort_list()
        } else {
            Vec::new()
        };

        let limit = if self.check(TokenKind::Limit) {
            self.advance();
            Some(self.parse_non_negative("LIMIT")?)
        } else {
            None
        };

        let skip = if self.check(TokenKind::Skip) {
            self.advance();
            Some(self.parse_non_negative("SKIP")?)
        } else {
            None
        };

        Some(DocQuery { collection, filter, projection, sort, limit, skip })
    }

    fn parse_non_negative(&mut self, what: &str) -> Option<u64> {
        let tok = self.expect(TokenKind::Integer, "a non-negative integer")?;
        match tok.lexeme.parse::<i64>() {
            Ok(n) if n >= 0 => Some(n as u64),
            _ => {
                self.error_here(format!("{what} must be non-negative"));
                None
            }
        }
    }

    fn parse_ident_list(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let Some(tok) = self.expect(TokenKind::Identifier, "identifier") else { break };
            out.push(tok.lexeme);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    fn parse_sort_list(&mut self) -> Vec<(String, i8)> {
        let mut out = Vec::new();
        loop {
            let Some(tok) = self.expect(TokenKind::Identifier, "field name") else { break };
            let direction = if self.check(TokenKind::Desc) {
                self.advance();
                -1
            } else {
                if self.check(TokenKind::Asc) {
                    self.advance();
                }
                1
            };
            out.push((tok.lexeme, direction));
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    fn parse_filter_chain(&mut self) -> Option<Filter> {
        let mut head = self.parse_single_filter()?;
        let mut cursor = &mut head;
        loop {
            let logical = if self.check(TokenKind::And) {
                self.advance();
                LogicalOp::And
            } else if self.check(TokenKind::Or) {
                self.advance();
                LogicalOp::Or
            } else {
                break;
            };
            let next = self.parse_single_filter()?;
            cursor.chain = Some(Box::new(FilterChain { logical, next }));
            cursor = &mut cursor.chain.as_mut().expect("chain just assigned above").next;
        }
        Some(head)
    }

    fn parse_single_filter(&mut self) -> Option<Filter> {
        let field = self.expect(TokenKind::Identifier, "field name")?.lexeme;
        let op = self.parse_operator()?;
        let value = self.parse_literal()?;
        Some(Filter { field, op, value, chain: None })
    }

    fn parse_operator(&mut self) -> Option<Operator> {
        let op = match self.peek().kind {
            TokenKind::Eq => Operator::Eq,
            TokenKind::NotEq => Operator::NotEq,
            TokenKind::Lt => Operator::Lt,
            TokenKind::LtEq => Operator::LtEq,
            TokenKind::Gt => Operator::Gt,
            TokenKind::GtEq => Operator::GtEq,
            TokenKind::In => Operator::In,
            TokenKind::Like => Operator::Like,
            _ => {
                self.error_here("expected a comparison operator");
                return None;
            }
        };
        self.advance();
        Some(op)
    }

    fn parse_literal(&mut self) -> Option<Literal> {
        let tok = self.peek().clone();
        let lit = match tok.kind {
            TokenKind::Integer => Literal::Integer(tok.lexeme.parse().unwrap_or_default()),
            TokenKind::Decimal => Literal::Decimal(tok.lexeme.parse().unwrap_or_default()),
            TokenKind::StringLiteral => Literal::String(tok.lexeme.clone()),
            TokenKind::Boolean => Literal::Boolean(tok.lexeme.eq_ignore_ascii_case("true")),
            TokenKind::Null => Literal::Null,
            _ => {
                self.error_here("expected a literal value");
                return None;
            }
        };
        self.advance();
        Some(lit)
    }
}
