//! Execution strategies: where elements come from and how they are read.
//!
//! Both strategies hand the same elements to the same executor, so a plan
//! gives identical results whichever one runs it. They differ in memory
//! use: [`MaterializedStrategy`] decodes the whole input up front, while
//! [`TokenStreamStrategy`] decodes only the elements the filter path
//! accepts and can stop reading as soon as the plan is satisfied.

pub mod cancel;
pub mod materialized;
pub mod options;
pub mod pool;
pub mod token;

use std::{
    fmt,
    future::Future,
    io::{Cursor, Read},
    path::PathBuf,
    pin::Pin,
};

use futures_util::{Stream, stream};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::{
    error::{QueryError, QueryResult},
    executor::{Outcome, Results},
    plan::Plan,
};

pub use cancel::CancellationToken;
pub use materialized::MaterializedStrategy;
pub use options::{DecodeOptions, StreamOptions, ValueConverter};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use token::TokenStreamStrategy;

/// Asynchronous typed result sequence.
pub type ResultStream<R> = Pin<Box<dyn Stream<Item = QueryResult<R>> + Send>>;

/// Synchronous input.
pub enum Source {
    Text(String),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
    File(PathBuf),
}

impl Source {
    pub fn text(text: impl Into<String>) -> Self {
        Source::Text(text.into())
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Source::Bytes(bytes.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Source::Reader(Box::new(reader))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::File(path.into())
    }

    pub(crate) fn into_reader(self) -> QueryResult<Box<dyn Read + Send>> {
        Ok(match self {
            Source::Text(text) => Box::new(Cursor::new(text.into_bytes())),
            Source::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            Source::Reader(reader) => reader,
            Source::File(path) => Box::new(std::fs::File::open(path)?),
        })
    }

    pub(crate) fn read_all(self) -> QueryResult<Vec<u8>> {
        match self {
            Source::Text(text) => Ok(text.into_bytes()),
            Source::Bytes(bytes) => Ok(bytes),
            Source::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            Source::File(path) => Ok(std::fs::read(path)?),
        }
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::text(text)
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Text(text)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Source::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Source::Reader(_) => write!(f, "Reader"),
            Source::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

/// Asynchronous input.
pub enum AsyncSource {
    Text(String),
    Bytes(Vec<u8>),
    Reader(Pin<Box<dyn AsyncRead + Send>>),
    File(PathBuf),
}

impl AsyncSource {
    pub fn text(text: impl Into<String>) -> Self {
        AsyncSource::Text(text.into())
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        AsyncSource::Bytes(bytes.into())
    }

    pub fn reader(reader: impl AsyncRead + Send + 'static) -> Self {
        AsyncSource::Reader(Box::pin(reader))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        AsyncSource::File(path.into())
    }

    pub(crate) async fn into_reader(self) -> QueryResult<Pin<Box<dyn AsyncRead + Send>>> {
        Ok(match self {
            AsyncSource::Text(text) => Box::pin(Cursor::new(text.into_bytes())),
            AsyncSource::Bytes(bytes) => Box::pin(Cursor::new(bytes)),
            AsyncSource::Reader(reader) => reader,
            AsyncSource::File(path) => Box::pin(tokio::fs::File::open(path).await?),
        })
    }

    pub(crate) async fn read_all(self) -> QueryResult<Vec<u8>> {
        match self {
            AsyncSource::Text(text) => Ok(text.into_bytes()),
            AsyncSource::Bytes(bytes) => Ok(bytes),
            AsyncSource::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await?;
                Ok(bytes)
            }
            AsyncSource::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

impl fmt::Debug for AsyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncSource::Text(text) => write!(f, "Text({} bytes)", text.len()),
            AsyncSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            AsyncSource::Reader(_) => write!(f, "Reader"),
            AsyncSource::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

/// Runs a compiled plan against a source.
pub trait ExecutionStrategy {
    /// Blocking execution. Sequences are produced lazily as the caller
    /// iterates.
    fn execute<R: DeserializeOwned>(
        &self,
        plan: &Plan<R>,
        source: Source,
    ) -> QueryResult<Outcome<Results<R>>>;

    /// Execution that suspends only while reading. `cancel` is checked
    /// before each read and before each yielded element.
    fn execute_async<R: DeserializeOwned + Send + 'static>(
        &self,
        plan: &Plan<R>,
        source: AsyncSource,
        cancel: CancellationToken,
    ) -> impl Future<Output = QueryResult<Outcome<ResultStream<R>>>> + Send;
}

/// Yield `results` as a stream that stops with one `Cancelled` error once
/// `cancel` fires.
pub(crate) fn cancellable<R>(results: Results<R>, cancel: CancellationToken) -> ResultStream<R>
where
    R: DeserializeOwned + Send + 'static,
{
    Box::pin(stream::unfold(
        (results, cancel, false),
        |(mut results, cancel, stopped)| async move {
            if stopped {
                return None;
            }
            if cancel.is_cancelled() {
                warn!("query cancelled");
                return Some((Err(QueryError::Cancelled), (results, cancel, true)));
            }
            let item = results.next()?;
            Some((item, (results, cancel, false)))
        },
    ))
}
