//! The theme template language.
//!
//! A theme describes page layout in three plain-text template files (one
//! per [`Role`]): ordinary HTML interleaved with comment-style directives.
//! This module owns the whole language:
//!
//! - [`ast`] — the [`Document`]/[`Tag`] tree and per-role built-in
//!   fallbacks
//! - [`parser`] — theme text → AST
//! - [`expr`] — the small integer/boolean expression language used in
//!   directive arguments, evaluated against a [`Resolver`]
//!
//! Parsing has no side effects beyond building the AST; rendering lives in
//! [`crate::render`].

pub mod ast;
pub mod expr;
pub mod parser;

pub use ast::{Document, LinkTarget, MaxSize, Role, Tag};
pub use expr::{Expr, ExprError, Resolver};
pub use parser::{ParseError, parse_document};
