//! Operator nodes captured by the query builder.
//!
//! Every builder call appends one [`Operator`]. Nothing runs until the list is
//! compiled into a [`Plan`](crate::plan::Plan); the compiler decides whether
//! the operators can be folded into fixed slots or must run in source order.

use std::{fmt, sync::Arc};

use crate::{
    executor::aggregate::NumericKind,
    plan::OperatorKind,
    value::{Value, ValueKind},
};

/// Element test used by filtering, partitioning and quantifiers.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Projection or key extraction.
pub type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Combines a pair of elements (zip and join results).
pub type Combiner = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Equality used in place of structural equality.
pub type Comparer = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Builds a group's result from its key and elements.
pub type GroupResult = Arc<dyn Fn(&Value, &[Value]) -> Value + Send + Sync>;

/// Accumulator step of a custom fold.
pub type Folder = Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone)]
pub struct ZipSpec {
    pub second: Arc<Vec<Value>>,
    /// Without a result selector each pair becomes a two-element array
    pub result: Option<Combiner>,
}

#[derive(Clone)]
pub enum Partition {
    Skip(i64),
    Take(i64),
    SkipWhile(Predicate),
    TakeWhile(Predicate),
    SkipLast(i64),
    TakeLast(i64),
    Chunk(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Distinct,
    Union,
    Intersect,
    Except,
}

#[derive(Clone)]
pub struct SetOperation {
    pub kind: SetKind,
    /// Unused by distinct
    pub second: Arc<Vec<Value>>,
    /// The `*By` variants compare keys instead of elements
    pub key: Option<Selector>,
    pub comparer: Option<Comparer>,
}

#[derive(Clone)]
pub struct Grouping {
    pub key: Option<Selector>,
    pub element: Option<Selector>,
    pub result: Option<GroupResult>,
}

#[derive(Clone)]
pub struct JoinSpec {
    pub inner: Arc<Vec<Value>>,
    pub outer_key: Option<Selector>,
    pub inner_key: Option<Selector>,
    pub result: Option<Combiner>,
}

#[derive(Clone)]
pub enum SequenceOp {
    Append(Value),
    Prepend(Value),
    Concat(Arc<Vec<Value>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericAggregate {
    Sum,
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    First,
    Last,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    List,
    Array,
    Dictionary,
    HashSet,
    Lookup,
}

/// Operators that end a query and produce a single outcome.
#[derive(Clone)]
pub enum Terminal {
    /// `long` selects 64-bit counting
    Count {
        predicate: Option<Predicate>,
        long: bool,
    },
    Numeric {
        aggregate: NumericAggregate,
        selector: Option<Selector>,
        numeric: NumericKind,
    },
    MinBy(Option<Selector>),
    MaxBy(Option<Selector>),
    Fold {
        seed: Value,
        folder: Folder,
    },
    All(Predicate),
    Any(Option<Predicate>),
    Contains {
        value: Value,
        comparer: Option<Comparer>,
    },
    SequenceEqual {
        second: Arc<Vec<Value>>,
        comparer: Option<Comparer>,
    },
    Element {
        kind: ElementKind,
        predicate: Option<Predicate>,
        or_default: bool,
    },
    ElementAt {
        index: i64,
        or_default: bool,
    },
    Convert {
        kind: ConversionKind,
        key: Option<Selector>,
        element: Option<Selector>,
    },
}

#[derive(Clone)]
pub enum Operator {
    Where(Predicate),
    Select(Selector),
    /// Selector returning an array whose items are flattened
    SelectMany(Selector),
    OfType(ValueKind),
    Zip(ZipSpec),
    OrderBy {
        keys: Vec<Selector>,
        directions: Vec<Direction>,
    },
    ThenBy {
        key: Selector,
        direction: Direction,
    },
    Reverse,
    Partition(Partition),
    Set(SetOperation),
    GroupBy(Grouping),
    Join(JoinSpec),
    Sequence(SequenceOp),
    DefaultIfEmpty(Value),
    Terminal(Terminal),
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        use OperatorKind as K;
        match self {
            Operator::Where(_) => K::Where,
            Operator::Select(_) => K::Select,
            Operator::SelectMany(_) => K::SelectMany,
            Operator::OfType(_) => K::OfType,
            Operator::Zip(_) => K::Zip,
            Operator::OrderBy { directions, .. } => match directions.first() {
                Some(Direction::Descending) => K::OrderByDescending,
                _ => K::OrderBy,
            },
            Operator::ThenBy { direction, .. } => match direction {
                Direction::Ascending => K::ThenBy,
                Direction::Descending => K::ThenByDescending,
            },
            Operator::Reverse => K::Reverse,
            Operator::Partition(p) => match p {
                Partition::Skip(_) => K::Skip,
                Partition::Take(_) => K::Take,
                Partition::SkipWhile(_) => K::SkipWhile,
                Partition::TakeWhile(_) => K::TakeWhile,
                Partition::SkipLast(_) => K::SkipLast,
                Partition::TakeLast(_) => K::TakeLast,
                Partition::Chunk(_) => K::Chunk,
            },
            Operator::Set(set) => match (set.kind, set.key.is_some()) {
                (SetKind::Distinct, false) => K::Distinct,
                (SetKind::Distinct, true) => K::DistinctBy,
                (SetKind::Union, false) => K::Union,
                (SetKind::Union, true) => K::UnionBy,
                (SetKind::Intersect, false) => K::Intersect,
                (SetKind::Intersect, true) => K::IntersectBy,
                (SetKind::Except, false) => K::Except,
                (SetKind::Except, true) => K::ExceptBy,
            },
            Operator::GroupBy(_) => K::GroupBy,
            Operator::Join(_) => K::Join,
            Operator::Sequence(op) => match op {
                SequenceOp::Append(_) => K::Append,
                SequenceOp::Prepend(_) => K::Prepend,
                SequenceOp::Concat(_) => K::Concat,
            },
            Operator::DefaultIfEmpty(_) => K::DefaultIfEmpty,
            Operator::Terminal(t) => t.kind(),
        }
    }
}

impl Terminal {
    pub fn kind(&self) -> OperatorKind {
        use OperatorKind as K;
        match self {
            Terminal::Count { long: false, .. } => K::Count,
            Terminal::Count { long: true, .. } => K::LongCount,
            Terminal::Numeric { aggregate, .. } => match aggregate {
                NumericAggregate::Sum => K::Sum,
                NumericAggregate::Average => K::Average,
                NumericAggregate::Min => K::Min,
                NumericAggregate::Max => K::Max,
            },
            Terminal::MinBy(_) => K::MinBy,
            Terminal::MaxBy(_) => K::MaxBy,
            Terminal::Fold { .. } => K::Aggregate,
            Terminal::All(_) => K::All,
            Terminal::Any(_) => K::Any,
            Terminal::Contains { .. } => K::Contains,
            Terminal::SequenceEqual { .. } => K::SequenceEqual,
            Terminal::Element { kind, or_default, .. } => match (kind, or_default) {
                (ElementKind::First, false) => K::First,
                (ElementKind::First, true) => K::FirstOrDefault,
                (ElementKind::Last, false) => K::Last,
                (ElementKind::Last, true) => K::LastOrDefault,
                (ElementKind::Single, false) => K::Single,
                (ElementKind::Single, true) => K::SingleOrDefault,
            },
            Terminal::ElementAt { or_default: false, .. } => K::ElementAt,
            Terminal::ElementAt { or_default: true, .. } => K::ElementAtOrDefault,
            Terminal::Convert { kind, .. } => match kind {
                ConversionKind::List => K::ToList,
                ConversionKind::Array => K::ToArray,
                ConversionKind::Dictionary => K::ToDictionary,
                ConversionKind::HashSet => K::ToHashSet,
                ConversionKind::Lookup => K::ToLookup,
            },
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::OfType(kind) => write!(f, "OfType({:?})", kind),
            Operator::Partition(
                Partition::Skip(n)
                | Partition::Take(n)
                | Partition::SkipLast(n)
                | Partition::TakeLast(n)
                | Partition::Chunk(n),
            ) => write!(f, "{:?}({})", self.kind(), n),
            Operator::OrderBy { keys, directions } => {
                write!(f, "OrderBy({} keys, {:?})", keys.len(), directions)
            }
            _ => write!(f, "{:?}", self.kind()),
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}
