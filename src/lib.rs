//! clove-query: compile relational-style queries once, run them over JSON.
//!
//! A [`Query`] records operators; [`Query::compile`] validates them into an
//! immutable [`Plan`]. An [`ExecutionStrategy`](stream::ExecutionStrategy)
//! then runs the plan against a [`Source`], either decoding the whole
//! document ([`MaterializedStrategy`]) or decoding only what the filter path
//! reaches ([`TokenStreamStrategy`]).

#[cfg(feature = "cli")]
pub mod cli;
pub mod convert;
pub mod error;
pub mod executor;
pub mod json;
pub mod path;
pub mod plan;
pub mod query;
pub mod stream;
pub mod value;

pub use error::{DecodeError, LogicalError, PlanError, QueryError, QueryResult};
pub use executor::{Container, Lookup, Number, NumericKind, Outcome, Results};
pub use path::{PathError, PathQuery, PatternEngine};
pub use plan::{OperatorKind, Plan};
pub use query::{Direction, Query};
pub use stream::{
    AsyncSource, CancellationToken, DecodeOptions, ExecutionStrategy, MaterializedStrategy,
    ResultStream, Source, StreamOptions, TokenStreamStrategy,
};
pub use value::{Value, ValueKind};
