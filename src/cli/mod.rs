//! CLI support for clove-query
//!
//! Provides programmatic access to the `clove-query` commands so they can
//! be embedded in other tools.

mod check;
mod run;

pub use check::{CheckResult, execute_check};
pub use run::{RunOptions, RunOutput, execute_run};

use std::io;

use crate::{error::QueryError, path::PathError};

/// Errors that can occur during CLI operations
#[derive(Debug)]
pub enum CliError {
    /// Path expression did not compile
    Path(PathError),
    /// Query compilation or execution failed
    Query(QueryError),
    /// Output serialization failed
    Json(serde_json::Error),
    /// IO error
    Io(io::Error),
    /// No input provided
    NoInput,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Path(e) => write!(f, "{}", e),
            CliError::Query(e) => write!(f, "Query failed: {}", e),
            CliError::Json(e) => write!(f, "Invalid JSON: {}", e),
            CliError::Io(e) => write!(f, "IO error: {}", e),
            CliError::NoInput => write!(f, "No input provided. Use --input or pipe JSON to stdin."),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Path(e) => Some(e),
            CliError::Query(e) => Some(e),
            CliError::Json(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::NoInput => None,
        }
    }
}

impl From<PathError> for CliError {
    fn from(e: PathError) -> Self {
        CliError::Path(e)
    }
}

impl From<QueryError> for CliError {
    fn from(e: QueryError) -> Self {
        CliError::Query(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}
