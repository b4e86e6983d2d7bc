//! Pure, CPU-only query compilation pipeline for Aquifer (spec C1/C2/C3).
//!
//! Three stages, each a pure function over immutable data: the
//! [`parser`] turns query text into an [`ast::Ast`], the
//! [`validation`] engine runs an ordered rule set over an `Ast` plus
//! an injected [`validation::ValidationContext`], and the
//! [`optimizer`] rewrites an [`optimizer::LogicalPlan`] built from
//! that `Ast` to a fixed point. Nothing here performs I/O or yields —
//! the cooperative scheduling rules in spec §5 apply to the streaming
//! and federation crates, not to this one.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod token;
pub mod unparse;
pub mod validation;

pub use ast::Ast;
pub use token::{Token, TokenKind};
pub use unparse::unparse;
