//! Pluggable pattern matching behind `match()` and `search()`.
//!
//! The dialect is whatever the engine implements; the default engine uses
//! the `regex` crate's syntax.

use std::{fmt, sync::Arc};

use regex::Regex;

/// A compiled pattern.
pub trait Pattern: Send + Sync {
    fn is_match(&self, haystack: &str) -> bool;
}

/// Compiles patterns for the filter functions.
///
/// `anchored` is true for `match()`, which must cover the whole string, and
/// false for `search()`, which accepts any substring hit.
pub trait PatternEngine: Send + Sync {
    fn compile(&self, pattern: &str, anchored: bool) -> Result<Arc<dyn Pattern>, String>;
}

/// Default engine backed by `regex`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexEngine;

struct RegexPattern(Regex);

impl Pattern for RegexPattern {
    fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }
}

impl PatternEngine for RegexEngine {
    fn compile(&self, pattern: &str, anchored: bool) -> Result<Arc<dyn Pattern>, String> {
        let source = if anchored {
            format!(r"\A(?:{})\z", pattern)
        } else {
            pattern.to_string()
        };
        Regex::new(&source)
            .map(|re| Arc::new(RegexPattern(re)) as Arc<dyn Pattern>)
            .map_err(|e| e.to_string())
    }
}

impl fmt::Debug for dyn PatternEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PatternEngine")
    }
}
