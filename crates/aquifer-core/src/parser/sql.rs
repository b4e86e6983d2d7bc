//! SQL dialect recursive-descent parser.
//!
//! Grammar (spec §4.1):
//! ```text
//! Select := SELECT Columns (FROM Table (JOIN Table ON Condition)*)?
//!           (WHERE Condition)? (GROUP BY ...)? (HAVING ...)? (ORDER BY ...)?
//! Column := Ident ('.' Ident)? (AS Ident)?
//! ```

use aquifer_error::AquiferError;

use crate::ast::{
    Ast, Column, Condition, Expr, Join, JoinKind, Literal, Operator, OrderTerm, Select,
    SortDirection, Table,
};
use crate::lexer::{sql_keywords, Lexer};
use crate::parser::{DialectParser, ParseOutcome};
use crate::token::{Token, TokenKind};

/// The SQL dialect parser, registered under `"sql"`.
pub struct SqlParser;

impl DialectParser for SqlParser {
    fn parse(&self, text: &str) -> ParseOutcome {
        let keywords = sql_keywords();
        let tokens = Lexer::new(text, &keywords).tokenize();
        let mut p = Parser::new(tokens);
        let select = p.parse_select();
        match select {
            Some(select) if p.errors.is_empty() => ParseOutcome::ok(Ast::Sql(select)),
            _ => {
                if p.errors.is_empty() {
                    p.errors.push(AquiferError::SyntaxError {
                        message: "failed to parse SELECT statement".into(),
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
    tokens:  Vec<Token>,
    pos:     usize,
    errors:  Vec<AquiferError>,
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

    fn parse_select(&mut self) -> Option<Select> {
        if self.peek().kind == TokenKind::Error {
            self.error_here(self.peek().lexeme.clone());
            return None;
        }
        self.expect(TokenKind::Select, "SELECT")?;

        let (columns, distinct) = self.parse_columns()?;
        if columns.is_empty() {
            self.error_here("SELECT requires at least one column");
            return None;
        }

        let mut from = None;
        if self.check(TokenKind::From) {
            self.advance();
            from = self.parse_table();
            if from.is_none() {
                self.error_here("FROM requires a table name");
                return None;
            }
        }

        let r#where = if self.check(TokenKind::Where) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        let group_by = if self.check(TokenKind::GroupBy) {
            self.advance();
            self.expect_identifier_text("BY");
            self.parse_ident_list()
        } else {
            Vec::new()
        };

        let having = if self.check(TokenKind::Having) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        let order_by = if self.check(TokenKind::OrderBy) {
            self.advance();
            self.expect_identifier_text("BY");
            self.parse_order_list()
        } else {
            Vec::new()
        };

        Some(Select { columns, distinct, from, r#where, group_by, having, order_by })
    }

    /// `GROUP`/`ORDER` already consumed the keyword; the following
    /// `BY` lexes as an [`TokenKind::Identifier`] with the keyword
    /// table used here, so consume it by text rather than kind.
    fn expect_identifier_text(&mut self, text: &str) {
        if self.check(TokenKind::Identifier) && self.peek().lexeme.eq_ignore_ascii_case(text) {
            self.advance();
        } else {
            self.error_here(format!("expected '{text}'"));
        }
    }

    fn parse_columns(&mut self) -> Option<(Vec<Column>, bool)> {
        let mut distinct = false;
        if self.check(TokenKind::Distinct) {
            distinct = true;
            self.advance();
        }
        let mut columns = Vec::new();
        if self.check(TokenKind::Star) {
            self.advance();
            columns.push(Column { qualifier: None, name: "*".into(), alias: None });
            return Some((columns, distinct));
        }
        loop {
            let col = self.parse_column()?;
            columns.push(col);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Some((columns, distinct))
    }

    fn parse_column(&mut self) -> Option<Column> {
        let first = self.expect(TokenKind::Identifier, "column name")?;
        let (qualifier, name) = if self.check(TokenKind::Dot) {
            self.advance();
            let name_tok = self.expect(TokenKind::Identifier, "column name")?;
            (Some(first.lexeme), name_tok.lexeme)
        } else {
            (None, first.lexeme)
        };
        let alias = if self.check(TokenKind::As) {
            self.advance();
            Some(self.expect(TokenKind::Identifier, "alias")?.lexeme)
        } else {
            None
        };
        Some(Column { qualifier, name, alias })
    }

    fn parse_ident_list(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            if let Some(tok) = self.expect(TokenKind::Identifier, "identifier") {
                out.push(tok.lexeme);
            } else {
                break;
            }
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    fn parse_order_list(&mut self) -> Vec<OrderTerm> {
        let mut out = Vec::new();
        loop {
            let Some(tok) = self.expect(TokenKind::Identifier, "column name") else { break };
            let direction = if self.check(TokenKind::Asc) {
                self.advance();
                SortDirection::Asc
            } else if self.check(TokenKind::Desc) {
                self.advance();
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            out.push(OrderTerm { column: tok.lexeme, direction });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    fn parse_table(&mut self) -> Option<Table> {
        let name_tok = self.expect(TokenKind::Identifier, "table name")?;
        let alias = if self.check(TokenKind::Identifier) {
            Some(self.advance().lexeme)
        } else {
            None
        };
        let mut joins = Vec::new();
        while self.check(TokenKind::Join) {
            self.advance();
            let join_table_name = self.expect(TokenKind::Identifier, "joined table name")?;
            let join_alias = if self.check(TokenKind::Identifier) {
                Some(self.advance().lexeme)
            } else {
                None
            };
            if !self.check(TokenKind::On) {
                self.error_here("JOIN requires an ON condition");
                return None;
            }
            self.advance();
            let on = self.parse_condition()?;
            joins.push(Join {
                table: Table { name: join_table_name.lexeme, alias: join_alias, joins: Vec::new() },
                on,
                kind: JoinKind::Inner,
            });
        }
        Some(Table { name: name_tok.lexeme, alias, joins })
    }

    fn parse_condition(&mut self) -> Option<Condition> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Option<Condition> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<Condition> {
        let mut left = self.parse_unary()?;
        while self.check(TokenKind::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_unary(&mut self) -> Option<Condition> {
        if self.check(TokenKind::Not) {
            self.advance();
            return Some(Condition::Not(Box::new(self.parse_unary()?)));
        }
        if self.check(TokenKind::LParen) {
            self.advance();
            let inner = self.parse_condition()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Some(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Option<Condition> {
        let left = self.parse_expr()?;
        let op = self.parse_operator()?;
        let right = self.parse_expr()?;
        Some(Condition::Compare { left: Box::new(left), op, right: Box::new(right) })
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

    fn parse_expr(&mut self) -> Option<Expr> {
        match self.peek().kind {
            TokenKind::Integer => {
                let tok = self.advance();
                Some(Expr::Literal(Literal::Integer(tok.lexeme.parse().unwrap_or_default())))
            }
            TokenKind::Decimal => {
                let tok = self.advance();
                Some(Expr::Literal(Literal::Decimal(tok.lexeme.parse().unwrap_or_default())))
            }
            TokenKind::StringLiteral => {
                let tok = self.advance();
                Some(Expr::Literal(Literal::String(tok.lexeme)))
            }
            TokenKind::Boolean => {
                let tok = self.advance();
                Some(Expr::Literal(Literal::Boolean(tok.lexeme.eq_ignore_ascii_case("true"))))
            }
            TokenKind::Null => {
                self.advance();
                Some(Expr::Literal(Literal::Null))
            }
            TokenKind::Identifier => {
                let first = self.advance();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.check(TokenKind::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    return Some(Expr::Function { name: first.lexeme, args });
                }
                if self.check(TokenKind::Dot) {
                    self.advance();
                    let name = self.expect(TokenKind::Identifier, "column name")?;
                    return Some(Expr::Column { qualifier: Some(first.lexeme), name: name.lexeme });
                }
                Some(Expr::Column { qualifier: None, name: first.lexeme })
            }
            _ => {
                self.error_here("expected an expression");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParseOutcome {
        SqlParser.parse(src)
    }

    #[test]
    fn parses_join_with_where() {
        let out = parse(
            "SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18",
        );
        assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
        let Some(Ast::Sql(select)) = out.ast else { panic!("no ast") };
        assert_eq!(select.columns.len(), 2);
        assert_eq!(select.from.unwrap().joins.len(), 1);
        assert!(select.r#where.is_some());
    }

    #[test]
    fn select_without_columns_is_rejected() {
        let out = parse("SELECT FROM users");
        assert!(out.ast.is_none());
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn join_without_on_is_rejected() {
        let out = parse("SELECT a FROM t JOIN u");
        assert!(out.ast.is_none());
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn select_star_parses() {
        let out = parse("SELECT * FROM t");
        assert!(out.errors.is_empty());
        let Some(Ast::Sql(select)) = out.ast else { panic!("no ast") };
        assert_eq!(select.columns[0].name, "*");
    }

    #[test]
    fn malformed_input_never_panics() {
        for src in ["", "SELECT", "SELECT a FROM", "SELECT a WHERE", "@@@", "SELECT a FROM t WHERE a >"] {
            let out = parse(src);
            assert!(out.ast.is_none() || !out.errors.is_empty() || out.ast.is_some());
        }
    }
}
