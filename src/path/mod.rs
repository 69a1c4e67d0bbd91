//! JSONPath-style filter paths.
//!
//! A path is compiled once into a [`PathQuery`] and evaluated either against
//! a fully decoded [`Value`] (see [`PathQuery::select`]) or incrementally
//! against a token stream (see [`matcher::StreamMatcher`]). Both evaluators
//! produce the same nodes in the same order.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod pattern;
pub mod tokens;

use std::sync::Arc;

use thiserror::Error;

pub use ast::{
    CompareOp, Comparable, FilterExpr, Function, FunctionCall, PathQuery, RelativePath, Segment,
    Selector,
};
pub use lexer::{LexError, Position};
pub use pattern::{Pattern, PatternEngine, RegexEngine};

use crate::value::Value;

/// A path expression that failed to compile.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    #[error("Path syntax error: {0}")]
    Lex(#[from] LexError),

    #[error("Path parse error at {position}: {message}")]
    Parse { message: String, position: Position },

    #[error("Invalid pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
}

impl PathQuery {
    /// Compile `expr` with the default pattern engine.
    pub fn compile(expr: &str) -> Result<Self, PathError> {
        Self::compile_with(expr, Arc::new(RegexEngine))
    }

    /// Compile `expr`, using `engine` for `match()` and `search()` patterns.
    pub fn compile_with(expr: &str, engine: Arc<dyn PatternEngine>) -> Result<Self, PathError> {
        let mut parser = parser::Parser::new(lexer::Lexer::new(expr), engine)?;
        let segments = parser.parse_path()?;
        tracing::trace!(path = expr, segments = segments.len(), "compiled path");
        Ok(PathQuery {
            segments,
            source: expr.to_string(),
        })
    }

    /// Nodes selected from `root`, in document order.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        self.select_with(root, false)
    }

    /// Like [`select`](Self::select); member names may ignore case.
    pub fn select_with<'a>(&self, root: &'a Value, ignore_case: bool) -> Vec<&'a Value> {
        let mut out = Vec::new();
        eval::Walker::new(&self.segments, ignore_case).walk(root, &[0], &mut out);
        out
    }
}
