//! Error types for query compilation and execution

use std::io;

use thiserror::Error;

use crate::{path::PathError, plan::OperatorKind};

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by compiling or running a query.
///
/// Every variant is final: nothing is retried internally and each query is
/// all-or-nothing within one pass over its source.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Missing or invalid components at setup, before any query runs
    #[error("Configuration error: {0}")]
    Config(String),

    /// The filter path did not compile
    #[error(transparent)]
    Path(#[from] PathError),

    /// Plan validation rejected the query before any I/O
    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Malformed input or an element that cannot become the declared type
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Raised by a terminal operator at its execution point
    #[error(transparent)]
    Logical(#[from] LogicalError),

    /// The caller cancelled an asynchronous query
    #[error("Query cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl QueryError {
    /// True when the query was aborted rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

/// Structural problems found while compiling a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("sort has {keys} key(s) but {directions} direction(s)")]
    SortArityMismatch { keys: usize, directions: usize },

    #[error("{operator:?} requires a non-negative count, got {count}")]
    NegativeCount { operator: OperatorKind, count: i64 },

    #[error("{0:?} requires a selector")]
    MissingSelector(OperatorKind),

    #[error("join is missing its {0}")]
    IncompleteJoin(&'static str),

    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(i64),

    #[error("{0:?} must follow an ordering operator")]
    ThenByWithoutOrderBy(OperatorKind),

    #[error("{next:?} cannot follow terminal operator {terminal:?}")]
    OperatorAfterTerminal { terminal: OperatorKind, next: OperatorKind },
}

/// Malformed JSON or a failed conversion, with a bounded preview of the
/// offending input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Decode error{}: {message} (near `{preview}`)", .offset.map(|o| format!(" at byte {}", o)).unwrap_or_default())]
pub struct DecodeError {
    pub message: String,
    pub offset: Option<u64>,
    pub preview: String,
}

impl DecodeError {
    /// Error at `offset` within the whole input; `local` indexes into `window`.
    pub fn at(
        message: impl Into<String>,
        offset: u64,
        window: &[u8],
        local: usize,
        preview_len: usize,
    ) -> Self {
        let half = preview_len / 2;
        let start = local.saturating_sub(half).min(window.len());
        let end = (start + preview_len).min(window.len());
        DecodeError {
            message: message.into(),
            offset: Some(offset),
            preview: String::from_utf8_lossy(&window[start..end]).into_owned(),
        }
    }

    /// Error without a position, previewing the start of `text`.
    pub fn with_preview(message: impl Into<String>, text: &str, preview_len: usize) -> Self {
        let mut end = preview_len.min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        DecodeError {
            message: message.into(),
            offset: None,
            preview: text[..end].to_string(),
        }
    }
}

/// Violations detected while a terminal operator runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogicalError {
    #[error("Sequence contains no elements")]
    NoElements,

    #[error("Sequence contains no matching element")]
    NoMatch,

    #[error("Sequence contains more than one element")]
    MoreThanOneElement,

    #[error("Sequence contains more than one matching element")]
    MoreThanOneMatch,

    #[error("Index {0} is out of range")]
    IndexOutOfRange(i64),

    #[error("An item with the same key has already been added: {0}")]
    DuplicateKey(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_is_bounded() {
        let input = vec![b'x'; 500];
        let err = DecodeError::at("bad", 250, &input, 250, 48);
        assert_eq!(err.preview.len(), 48);
        assert!(err.to_string().contains("at byte 250"));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(QueryError::Cancelled.is_cancelled());
        assert!(!QueryError::Logical(LogicalError::NoElements).is_cancelled());
    }
}
