//! Validate filter path syntax

use super::CliError;
use crate::path::PathQuery;

/// Result of a check operation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// Number of segments after `$`
    pub segments: usize,
    /// Whether every segment can be matched without buffering a container
    pub streamable: bool,
}

/// Compile `path` without running it.
pub fn execute_check(path: &str) -> Result<CheckResult, CliError> {
    let query = PathQuery::compile(path)?;
    Ok(CheckResult {
        segments: query.segments.len(),
        streamable: query.segments.iter().all(|s| s.is_streamable()),
    })
}
