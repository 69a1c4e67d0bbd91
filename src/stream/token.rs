//! Token-filtered streaming.
//!
//! Raw bytes go through the incremental tokenizer and the path matcher.
//! Subtrees the path cannot reach are stepped over without decoding; only
//! accepted elements are built into values. Unless the plan needs the whole
//! input, each accepted element flows through the pipeline as soon as it is
//! complete, and reading stops once the pipeline closes.

use std::{
    collections::VecDeque,
    future::Future,
    io::{self, Read},
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
};

use futures_util::stream;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use crate::{
    convert,
    error::{QueryError, QueryResult},
    executor::{Drain, Executor, Flow, Outcome, Pipeline, Reduction, Results},
    json::{Next, Tokenizer},
    path::{PathQuery, matcher::StreamMatcher},
    plan::Plan,
    stream::{
        AsyncSource, BufferPool, CancellationToken, DecodeOptions, ExecutionStrategy, PoolStats,
        ResultStream, Source, StreamOptions, cancellable,
    },
    value::Value,
};

/// Size of the stack buffer used by blocking reads.
const SYNC_READ_SIZE: usize = 4 * 1024;

enum Scan {
    Element(Value),
    NeedMore,
    End,
}

/// Tokenizer plus matcher: turns fed bytes into accepted elements.
struct Scanner {
    tokenizer: Tokenizer,
    matcher: StreamMatcher,
    ready: VecDeque<Value>,
    options: DecodeOptions,
    done: bool,
}

impl Scanner {
    fn new(path: Option<&PathQuery>, options: DecodeOptions) -> Self {
        let ignore_case = options.case_insensitive_names;
        Scanner {
            tokenizer: Tokenizer::new(options.preview_len),
            matcher: match path {
                Some(path) => StreamMatcher::new(path, ignore_case),
                None => StreamMatcher::unwrap_root(ignore_case),
            },
            ready: VecDeque::new(),
            options,
            done: false,
        }
    }

    /// An empty slice marks end of input.
    fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            self.tokenizer.finish();
        } else {
            self.tokenizer.feed(bytes);
        }
    }

    fn next(&mut self) -> QueryResult<Scan> {
        loop {
            if let Some(value) = self.ready.pop_front() {
                return Ok(Scan::Element(self.options.apply(value)?));
            }
            if self.done {
                return Ok(Scan::End);
            }
            match self.tokenizer.next(self.matcher.wants_decode())? {
                Next::Event(event) => self.matcher.push(event, &mut self.ready),
                Next::NeedMore => return Ok(Scan::NeedMore),
                Next::Done => {
                    trace!(bytes = self.tokenizer.offset(), "end of document");
                    self.done = true;
                }
            }
        }
    }
}

/// Accepted elements of a blocking reader.
struct Elements {
    reader: Box<dyn Read + Send>,
    scanner: Scanner,
    stopped: bool,
}

impl Elements {
    fn fill(&mut self) -> QueryResult<()> {
        let mut buffer = [0u8; SYNC_READ_SIZE];
        let read = loop {
            match self.reader.read(&mut buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        trace!(bytes = read, "read chunk");
        self.scanner.feed(&buffer[..read]);
        Ok(())
    }
}

impl Iterator for Elements {
    type Item = QueryResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.stopped {
            let scanned = match self.scanner.next() {
                Ok(Scan::NeedMore) => match self.fill() {
                    Ok(()) => continue,
                    Err(e) => Err(e),
                },
                other => other,
            };
            match scanned {
                Ok(Scan::Element(value)) => return Some(Ok(value)),
                Ok(_) => self.stopped = true,
                Err(e) => {
                    self.stopped = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Accepted elements of an asynchronous reader.
struct AsyncElements {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    scanner: Scanner,
    pool: Arc<BufferPool>,
    cancel: CancellationToken,
}

impl AsyncElements {
    async fn next_element(&mut self) -> QueryResult<Option<Value>> {
        loop {
            match self.scanner.next()? {
                Scan::Element(value) => return Ok(Some(value)),
                Scan::End => return Ok(None),
                Scan::NeedMore => {
                    if self.cancel.is_cancelled() {
                        return Err(QueryError::Cancelled);
                    }
                    self.fill().await?;
                }
            }
        }
    }

    /// One read cycle into a pooled buffer.
    async fn fill(&mut self) -> QueryResult<()> {
        let mut buffer = self.pool.checkout();
        let read = self.reader.read(&mut buffer[..]).await?;
        trace!(bytes = read, "read chunk");
        self.scanner.feed(&buffer[..read]);
        Ok(())
    }

    async fn collect(&mut self) -> QueryResult<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(value) = self.next_element().await? {
            items.push(value);
        }
        Ok(items)
    }
}

/// State of an asynchronous result sequence between yields.
struct Running<R> {
    elements: AsyncElements,
    drain: Drain,
    preview_len: usize,
    stopped: bool,
    _marker: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> Running<R> {
    async fn step(&mut self) -> Option<QueryResult<R>> {
        loop {
            if self.stopped {
                return None;
            }
            if self.elements.cancel.is_cancelled() {
                warn!("query cancelled");
                self.stopped = true;
                return Some(Err(QueryError::Cancelled));
            }
            if let Some(value) = self.drain.pop() {
                return Some(convert::decode_value(value, self.preview_len).map_err(Into::into));
            }
            if !self.drain.wants_input() {
                return None;
            }
            match self.elements.next_element().await {
                Ok(Some(value)) => self.drain.push(value),
                Ok(None) => self.drain.end(),
                Err(e) => {
                    if e.is_cancelled() {
                        warn!("query cancelled while reading");
                    }
                    self.stopped = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Incremental, path-pruned decoding of a byte stream.
pub struct TokenStreamStrategy {
    options: DecodeOptions,
    stream: StreamOptions,
    pool: Arc<BufferPool>,
}

impl Default for TokenStreamStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStreamStrategy {
    pub fn new() -> Self {
        Self::with_options(DecodeOptions::default(), StreamOptions::default())
    }

    pub fn with_options(options: DecodeOptions, stream: StreamOptions) -> Self {
        TokenStreamStrategy {
            pool: BufferPool::new(stream.pool_capacity, stream.async_buffer_size),
            options,
            stream,
        }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn stream_options(&self) -> &StreamOptions {
        &self.stream
    }

    /// Counters of the pool that serves asynchronous reads.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn scanner<R>(&self, plan: &Plan<R>) -> Scanner {
        Scanner::new(plan.path(), self.options.clone())
    }
}

impl ExecutionStrategy for TokenStreamStrategy {
    fn execute<R: DeserializeOwned>(
        &self,
        plan: &Plan<R>,
        source: Source,
    ) -> QueryResult<Outcome<Results<R>>> {
        debug!(strategy = "token", ?source, "starting query");
        let elements = Elements {
            reader: source.into_reader()?,
            scanner: self.scanner(plan),
            stopped: false,
        };
        let executor = Executor::new(plan).preview_len(self.options.preview_len);

        if plan.requires_materialization() {
            let buffered = elements.collect::<QueryResult<Vec<_>>>()?;
            debug!(elements = buffered.len(), "buffered accepted elements");
            return executor.run_values(buffered);
        }
        executor.run(elements)
    }

    fn execute_async<R: DeserializeOwned + Send + 'static>(
        &self,
        plan: &Plan<R>,
        source: AsyncSource,
        cancel: CancellationToken,
    ) -> impl Future<Output = QueryResult<Outcome<ResultStream<R>>>> + Send {
        async move {
            debug!(strategy = "token", ?source, "starting async query");
            if cancel.is_cancelled() {
                warn!("query cancelled before reading");
                return Err(QueryError::Cancelled);
            }
            let mut elements = AsyncElements {
                reader: source.into_reader().await?,
                scanner: self.scanner(plan),
                pool: Arc::clone(&self.pool),
                cancel: cancel.clone(),
            };

            if plan.requires_materialization() {
                let buffered = elements.collect().await?;
                debug!(elements = buffered.len(), "buffered accepted elements");
                let outcome = Executor::new(plan)
                    .preview_len(self.options.preview_len)
                    .run_values(buffered)?;
                return Ok(outcome.map_sequence(|results| cancellable(results, cancel)));
            }

            let pipeline = Pipeline::for_plan(plan)?;
            if let Some(terminal) = plan.terminal() {
                let mut reduction = Reduction::new(pipeline, terminal);
                while let Some(value) = elements.next_element().await? {
                    if reduction.feed(value)? == Flow::Done {
                        break;
                    }
                }
                return reduction.finish();
            }

            let running = Running::<R> {
                elements,
                drain: Drain::new(pipeline),
                preview_len: self.options.preview_len,
                stopped: false,
                _marker: PhantomData,
            };
            let results: ResultStream<R> = Box::pin(stream::unfold(running, |mut running| async move {
                let item = running.step().await?;
                Some((item, running))
            }));
            Ok(Outcome::Sequence(results))
        }
    }
}
