//! Compiled path expressions.
//!
//! ```text
//! $.store.book[?@.price < 13 && @.inStock == true]
//! ```
//!
//! compiles to three child segments: `store`, `book`, and a filter whose
//! expression is an `And` of two comparisons against the current node.

use std::{fmt, sync::Arc};

use crate::{
    path::pattern::{Pattern, PatternEngine},
    value::Value,
};

/// A compiled path: root followed by segments.
#[derive(Debug, Clone)]
pub struct PathQuery {
    pub segments: Vec<Segment>,
    pub(crate) source: String,
}

impl PathQuery {
    /// The expression text this query was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the query is just `$`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// One step of a path: `.name`, `[..]`, or `..[..]`.
#[derive(Debug, Clone)]
pub struct Segment {
    /// `..` segments apply to the node and all of its descendants
    pub descendant: bool,
    pub selectors: Vec<Selector>,
}

impl Segment {
    /// A segment is streamable when its selection can be decided per child
    /// in document order, without knowing the container's length.
    pub fn is_streamable(&self) -> bool {
        self.selectors.len() == 1 && self.selectors[0].is_streamable()
    }
}

#[derive(Debug, Clone)]
pub enum Selector {
    /// Member name (`.name`, `['name']`)
    Name(String),

    /// `*`
    Wildcard,

    /// Array index; negative counts from the end
    Index(i64),

    /// `[start:end:step]`
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
    },

    /// `[?expr]`
    Filter(Arc<FilterExpr>),
}

impl Selector {
    pub fn is_streamable(&self) -> bool {
        match self {
            Selector::Name(_) | Selector::Wildcard | Selector::Filter(_) => true,
            Selector::Index(i) => *i >= 0,
            Selector::Slice { start, end, step } => {
                step.unwrap_or(1) >= 0 && start.unwrap_or(0) >= 0 && end.unwrap_or(0) >= 0
            }
        }
    }
}

/// Boolean expression inside a filter selector.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    Or(Box<FilterExpr>, Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),

    Comparison {
        left: Comparable,
        op: CompareOp,
        right: Comparable,
    },

    /// `@.field` used as a test: true when it selects at least one node
    Exists(RelativePath),

    /// `match(..)` / `search(..)` used as a test
    Test(FunctionCall),
}

/// Operand of a comparison.
#[derive(Debug, Clone)]
pub enum Comparable {
    Literal(Value),
    Path(RelativePath),
    Function(FunctionCall),
}

/// `@` followed by segments, evaluated against the current node.
#[derive(Debug, Clone)]
pub struct RelativePath {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Length of a string, array or object
    Length,
    /// Number of nodes selected by a path argument
    Count,
    /// Anchored pattern match
    Match,
    /// Unanchored pattern search
    Search,
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Length => "length",
            Function::Count => "count",
            Function::Match => "match",
            Function::Search => "search",
        }
    }
}

#[derive(Clone)]
pub struct FunctionCall {
    pub function: Function,
    pub args: Vec<Comparable>,
    pub(crate) pattern: PatternSlot,
}

/// How `match`/`search` obtain their pattern.
#[derive(Clone)]
pub(crate) enum PatternSlot {
    /// Not a pattern function
    None,
    /// Literal pattern compiled together with the path
    Compiled(Arc<dyn Pattern>),
    /// Pattern computed per element, compiled on use
    Dynamic(Arc<dyn PatternEngine>),
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("function", &self.function)
            .field("args", &self.args)
            .field("compiled", &matches!(self.pattern, PatternSlot::Compiled(_)))
            .finish()
    }
}
