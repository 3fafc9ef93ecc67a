//! Best-effort parser for the Python fragments a live model emits in
//! `executableCode` parts.
//!
//! Covers the statement and expression grammar of Python 3 apart from `match`
//! statements; f-string interpolations are kept as text. Anything else is
//! rejected with a [`ParseError`], as are fragments nested deeper than the
//! parser is willing to recurse. Callers treat both the same as invalid
//! source.

pub mod ast;
mod lexer;
mod parser;

use thiserror::Error;

pub use ast::{Call, Constant, Expr, Keyword, Module, Stmt};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Parse a source fragment into a [`Module`].
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse_module()
}
