//! Incremental JSON reading for the token-filtered strategy.

pub mod builder;
pub mod tokenizer;

pub use builder::ValueBuilder;
pub use tokenizer::{Event, Next, Tokenizer};
