//! Compiled, immutable execution plans.
//!
//! A plan is in one of two modes. In *flat* mode each operator family owns a
//! fixed slot and the executor applies the slots in a fixed precedence. In
//! *step* mode the operators run one after another in source order. A
//! non-empty step list always wins; the flat slots are then left empty.
//! The terminal operator applies last in both modes. Pagination held in
//! `skip`/`take` takes its precedence slot in flat mode and runs after every
//! step in step mode.

pub mod compiler;
pub mod validate;

use std::{any, fmt, marker::PhantomData, sync::Arc};

use crate::{
    path::PathQuery,
    query::ast::{
        Direction, Grouping, JoinSpec, Operator, Partition, Predicate, Selector, SequenceOp,
        SetOperation, Terminal, ZipSpec,
    },
    value::{Value, ValueKind},
};

/// Tag identifying an operator, used for dispatch and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    // Filtering and projection
    Where,
    Select,
    SelectMany,
    OfType,
    Zip,

    // Sorting
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Reverse,

    // Partitioning
    Skip,
    Take,
    SkipWhile,
    TakeWhile,
    SkipLast,
    TakeLast,
    Chunk,

    // Set operations
    Distinct,
    DistinctBy,
    Union,
    UnionBy,
    Intersect,
    IntersectBy,
    Except,
    ExceptBy,

    GroupBy,
    Join,

    // Sequence operations
    Append,
    Prepend,
    Concat,
    DefaultIfEmpty,

    // Aggregations
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
    MinBy,
    MaxBy,
    Aggregate,

    // Quantifiers
    All,
    Any,
    Contains,
    SequenceEqual,

    // Element operators
    First,
    FirstOrDefault,
    Last,
    LastOrDefault,
    Single,
    SingleOrDefault,
    ElementAt,
    ElementAtOrDefault,

    // Conversions
    ToList,
    ToArray,
    ToDictionary,
    ToHashSet,
    ToLookup,
}

impl OperatorKind {
    pub fn is_terminal(self) -> bool {
        use OperatorKind::*;
        matches!(
            self,
            Count
                | LongCount
                | Sum
                | Average
                | Min
                | Max
                | MinBy
                | MaxBy
                | Aggregate
                | All
                | Any
                | Contains
                | SequenceEqual
                | First
                | FirstOrDefault
                | Last
                | LastOrDefault
                | Single
                | SingleOrDefault
                | ElementAt
                | ElementAtOrDefault
                | ToList
                | ToArray
                | ToDictionary
                | ToHashSet
                | ToLookup
        )
    }

    /// Aggregations consume the whole filtered source.
    pub fn is_aggregation(self) -> bool {
        use OperatorKind::*;
        matches!(
            self,
            Count | LongCount | Sum | Average | Min | Max | MinBy | MaxBy | Aggregate
        )
    }

    pub fn is_sort(self) -> bool {
        use OperatorKind::*;
        matches!(self, OrderBy | OrderByDescending | ThenBy | ThenByDescending)
    }

    pub fn is_set_operation(self) -> bool {
        use OperatorKind::*;
        matches!(
            self,
            Distinct | DistinctBy | Union | UnionBy | Intersect | IntersectBy | Except | ExceptBy
        )
    }

    /// Operators that must see every element before releasing any.
    pub fn requires_materialization(self) -> bool {
        use OperatorKind::*;
        self.is_sort()
            || self.is_aggregation()
            || self.is_set_operation()
            || matches!(self, Reverse | GroupBy | Join | SkipLast | TakeLast)
    }
}

/// Element shape produced by a step that changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Projection,
    Grouping,
    Join,
    Flattening,
    Zip,
    Chunk,
}

impl Shape {
    pub fn of(operator: &Operator) -> Option<Shape> {
        match operator {
            Operator::Select(_) => Some(Shape::Projection),
            Operator::GroupBy(_) => Some(Shape::Grouping),
            Operator::Join(_) => Some(Shape::Join),
            Operator::SelectMany(_) => Some(Shape::Flattening),
            Operator::Zip(_) => Some(Shape::Zip),
            Operator::Partition(Partition::Chunk(_)) => Some(Shape::Chunk),
            _ => None,
        }
    }
}

/// One operator application in an ordered plan.
#[derive(Clone)]
pub struct Step {
    pub kind: OperatorKind,
    pub operator: Operator,
    pub shape: Option<Shape>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Some(shape) => write!(f, "{:?} -> {:?}", self.operator, shape),
            None => write!(f, "{:?}", self.operator),
        }
    }
}

/// A declared element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementType {
    name: &'static str,
}

impl ElementType {
    pub fn of<T: ?Sized>() -> Self {
        ElementType {
            name: any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True for the dynamic document shape.
    pub fn is_dynamic(&self) -> bool {
        self.name == any::type_name::<Value>()
    }
}

/// Flat-mode slots, applied in the executor's fixed precedence.
#[derive(Clone, Default)]
pub struct FlatFields {
    pub of_type: Option<ValueKind>,
    pub flatten: Option<Selector>,
    pub zip: Option<ZipSpec>,
    /// Applied in order
    pub predicates: Vec<Predicate>,
    pub set: Option<SetOperation>,
    pub group: Option<Grouping>,
    pub join: Option<JoinSpec>,
    /// Applied in order
    pub sequence: Vec<SequenceOp>,
    /// While, last-N and chunk partitioning
    pub partition: Option<Partition>,
    /// Primary key first
    pub sort: Vec<(Selector, Direction)>,
    pub reverse: bool,
    pub default_if_empty: Option<Value>,
    /// Composed projections, applied in order
    pub projections: Vec<Selector>,
}

/// Compiled query. Immutable; every run builds fresh execution state.
pub struct Plan<R = Value> {
    pub(crate) flat: FlatFields,
    pub(crate) steps: Vec<Step>,
    pub(crate) skip: u64,
    pub(crate) take: Option<u64>,
    pub(crate) terminal: Option<Terminal>,
    pub(crate) path: Option<Arc<PathQuery>>,
    pub(crate) source_type: ElementType,
    pub(crate) result_type: ElementType,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Plan<R> {
    /// True when operators run one by one in source order.
    pub fn is_step_mode(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn flat(&self) -> &FlatFields {
        &self.flat
    }

    /// Composed skip count.
    pub fn skip(&self) -> u64 {
        self.skip
    }

    /// Composed element limit.
    pub fn take(&self) -> Option<u64> {
        self.take
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    pub fn terminal_kind(&self) -> Option<OperatorKind> {
        self.terminal.as_ref().map(Terminal::kind)
    }

    pub fn path(&self) -> Option<&PathQuery> {
        self.path.as_deref()
    }

    /// Type of the elements read from the source.
    pub fn source_type(&self) -> ElementType {
        self.source_type
    }

    pub fn result_type(&self) -> ElementType {
        self.result_type
    }

    /// Whether every accepted element must be collected before the first
    /// result can be released.
    pub fn requires_materialization(&self) -> bool {
        if self.terminal_kind().is_some_and(OperatorKind::is_aggregation) {
            return true;
        }
        if self.is_step_mode() {
            return self.steps.iter().any(|s| s.kind.requires_materialization());
        }

        let flat = &self.flat;
        !flat.sort.is_empty()
            || flat.reverse
            || flat.set.is_some()
            || flat.group.is_some()
            || flat.join.is_some()
            || matches!(flat.partition, Some(Partition::SkipLast(_) | Partition::TakeLast(_)))
    }
}

impl<R> fmt::Debug for Plan<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Plan");
        if self.is_step_mode() {
            s.field("steps", &self.steps);
        } else {
            s.field("predicates", &self.flat.predicates.len())
                .field("projections", &self.flat.projections.len())
                .field("sort_keys", &self.flat.sort.len());
        }
        s.field("skip", &self.skip)
            .field("take", &self.take)
            .field("terminal", &self.terminal)
            .field("path", &self.path.as_ref().map(|p| p.source()))
            .field("source_type", &self.source_type.name())
            .field("result_type", &self.result_type.name())
            .finish()
    }
}
