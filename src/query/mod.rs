//! Query capture: a builder that records operators for later compilation.

pub mod ast;
pub mod builder;

pub use ast::{
    Combiner, Comparer, ConversionKind, Direction, ElementKind, Folder, GroupResult, Grouping,
    JoinSpec, NumericAggregate, Operator, Partition, Predicate, Selector, SequenceOp, SetKind,
    SetOperation, Terminal, ZipSpec,
};
pub use builder::Query;
