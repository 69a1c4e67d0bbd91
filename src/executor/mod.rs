//! Unified operation executor.
//!
//! A plan becomes a [`Pipeline`] of push-based [`Stage`]s. Flat plans lay
//! their slots out in this fixed precedence:
//!
//! 1. type filter
//! 2. flatten
//! 3. zip
//! 4. filter predicates
//! 5. set operation
//! 6. group-by
//! 7. join
//! 8. append / prepend / concat
//! 9. while, last-N and chunk partitioning
//! 10. sort
//! 11. reverse
//! 12. skip / take
//! 13. default-if-empty
//! 14. projection
//!
//! Step plans lay out one stage per step in source order. The terminal
//! operator, if any, consumes the pipeline's output through a
//! [`Collector`](terminal::Collector).
//!
//! The same pipeline runs over materialized collections and incrementally
//! decoded streams. A stage that can no longer produce output reports
//! [`Flow::Done`]; the pipeline then closes and sources stop reading.

pub mod aggregate;
pub mod stages;
pub mod terminal;

use std::{collections::VecDeque, fmt, marker::PhantomData};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    convert,
    error::QueryResult,
    plan::Plan,
    query::ast::Terminal,
    value::Value,
};

pub use aggregate::{Number, NumericKind};
pub use terminal::{Collector, Container, Dictionary, Lookup};

/// Whether a stage wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// One operator application.
pub trait Stage: Send {
    /// Consume one element, pushing any ready output.
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow;

    /// Flush buffered output at end of input.
    fn finish(&mut self, _out: &mut Vec<Value>) {}
}

/// A chain of stages with per-stage completion tracking.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    done: Vec<bool>,
    closed: bool,
    finished: bool,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let done = vec![false; stages.len()];
        Pipeline {
            stages,
            done,
            closed: false,
            finished: false,
        }
    }

    /// Fresh state for one run of `plan`.
    pub fn for_plan<R>(plan: &Plan<R>) -> QueryResult<Self> {
        Ok(Self::new(stages::build(plan)?))
    }

    /// True once no further input can change the output.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn run_from(&mut self, start: usize, mut batch: Vec<Value>, out: &mut Vec<Value>) {
        for i in start..self.stages.len() {
            if batch.is_empty() {
                return;
            }
            let mut next = Vec::with_capacity(batch.len());
            for item in batch {
                if self.done[i] {
                    break;
                }
                if self.stages[i].accept(item, &mut next) == Flow::Done {
                    self.done[i] = true;
                    self.closed = true;
                }
            }
            batch = next;
        }
        out.append(&mut batch);
    }

    /// Push one source element; ready results are appended to `out`.
    pub fn push(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if self.closed {
            return Flow::Done;
        }
        self.run_from(0, vec![item], out);
        if self.closed { Flow::Done } else { Flow::Continue }
    }

    /// Flush every stage in order. Idempotent.
    pub fn finish(&mut self, out: &mut Vec<Value>) {
        if self.finished {
            return;
        }
        self.finished = true;
        for i in 0..self.stages.len() {
            let mut flushed = Vec::new();
            self.stages[i].finish(&mut flushed);
            self.run_from(i + 1, flushed, out);
        }
    }
}

/// What running a plan produced.
#[derive(Debug)]
pub enum Outcome<S> {
    /// Lazy element sequence
    Sequence(S),
    /// Count or numeric aggregation
    Number(Number),
    /// Quantifier
    Boolean(bool),
    /// Element operator, min-by/max-by or fold
    Value(Value),
    Container(Container),
}

impl<S> Outcome<S> {
    pub fn into_sequence(self) -> Option<S> {
        match self {
            Outcome::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<Number> {
        match self {
            Outcome::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self) -> Option<bool> {
        match self {
            Outcome::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn container(&self) -> Option<&Container> {
        match self {
            Outcome::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn map_sequence<T>(self, f: impl FnOnce(S) -> T) -> Outcome<T> {
        match self {
            Outcome::Sequence(s) => Outcome::Sequence(f(s)),
            Outcome::Number(n) => Outcome::Number(n),
            Outcome::Boolean(b) => Outcome::Boolean(b),
            Outcome::Value(v) => Outcome::Value(v),
            Outcome::Container(c) => Outcome::Container(c),
        }
    }

    /// JSON rendering of a non-sequence outcome.
    pub fn scalar_value(&self) -> Option<Value> {
        match self {
            Outcome::Sequence(_) => None,
            Outcome::Number(n) => Some(n.to_value()),
            Outcome::Boolean(b) => Some(Value::Boolean(*b)),
            Outcome::Value(v) => Some(v.clone()),
            Outcome::Container(c) => Some(c.to_value()),
        }
    }
}

/// Boxed element source feeding a pipeline.
pub type ElementSource = Box<dyn Iterator<Item = QueryResult<Value>> + Send>;

/// Pipeline output waiting to be handed out, for sources driven one
/// element at a time.
pub struct Drain {
    pipeline: Pipeline,
    ready: VecDeque<Value>,
    ended: bool,
}

impl Drain {
    pub fn new(pipeline: Pipeline) -> Self {
        Drain {
            pipeline,
            ready: VecDeque::new(),
            ended: false,
        }
    }

    /// Next ready result, if any.
    pub fn pop(&mut self) -> Option<Value> {
        self.ready.pop_front()
    }

    /// True when the source should be pulled for more input.
    pub fn wants_input(&self) -> bool {
        !self.ended && !self.pipeline.is_closed()
    }

    /// True once the source is exhausted or no longer needed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn push(&mut self, item: Value) {
        let mut out = Vec::new();
        self.pipeline.push(item, &mut out);
        self.ready.extend(out);
        if self.pipeline.is_closed() {
            debug!("pipeline closed; source no longer read");
            self.end();
        }
    }

    /// End of input: flush buffered stages.
    pub fn end(&mut self) {
        let mut out = Vec::new();
        self.pipeline.finish(&mut out);
        self.ready.extend(out);
        self.ended = true;
    }
}

/// A pipeline feeding a terminal operator.
pub struct Reduction {
    pipeline: Pipeline,
    collector: Collector,
    out: Vec<Value>,
    answered: bool,
}

impl Reduction {
    pub fn new(pipeline: Pipeline, terminal: &Terminal) -> Self {
        Reduction {
            pipeline,
            collector: Collector::new(terminal),
            out: Vec::new(),
            answered: false,
        }
    }

    /// `Flow::Done` once no further input can change the outcome.
    pub fn feed(&mut self, item: Value) -> QueryResult<Flow> {
        self.pipeline.push(item, &mut self.out);
        for value in self.out.drain(..) {
            if self.collector.accept(value)? == Flow::Done {
                self.answered = true;
                return Ok(Flow::Done);
            }
        }
        Ok(if self.pipeline.is_closed() {
            Flow::Done
        } else {
            Flow::Continue
        })
    }

    pub fn finish<S>(mut self) -> QueryResult<Outcome<S>> {
        if !self.answered {
            self.pipeline.finish(&mut self.out);
            for value in self.out.drain(..) {
                if self.collector.accept(value)? == Flow::Done {
                    break;
                }
            }
        }
        self.collector.finish()
    }
}

/// Lazy, typed result sequence.
///
/// The source is only pulled when the caller asks for the next result, and
/// never again once the pipeline closes.
pub struct Results<R> {
    source: ElementSource,
    drain: Drain,
    failed: bool,
    preview_len: usize,
    _marker: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for Results<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("ended", &self.drain.is_ended())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl<R: DeserializeOwned> Iterator for Results<R> {
    type Item = QueryResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.drain.pop() {
                return Some(convert::decode_value(value, self.preview_len).map_err(Into::into));
            }
            if self.failed || !self.drain.wants_input() {
                return None;
            }
            match self.source.next() {
                Some(Ok(item)) => self.drain.push(item),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => self.drain.end(),
            }
        }
    }
}

/// Applies one plan to element sources.
pub struct Executor<'p, R> {
    plan: &'p Plan<R>,
    preview_len: usize,
}

impl<'p, R: DeserializeOwned> Executor<'p, R> {
    pub fn new(plan: &'p Plan<R>) -> Self {
        Executor {
            plan,
            preview_len: 48,
        }
    }

    /// Bound on the input preview carried by conversion errors.
    pub fn preview_len(mut self, len: usize) -> Self {
        self.preview_len = len;
        self
    }

    /// Run over a fallible element source. Sequences stay lazy; terminal
    /// operators consume the source up to their answer.
    pub fn run<I>(&self, source: I) -> QueryResult<Outcome<Results<R>>>
    where
        I: IntoIterator<Item = QueryResult<Value>>,
        I::IntoIter: Send + 'static,
    {
        let pipeline = Pipeline::for_plan(self.plan)?;
        let Some(terminal) = self.plan.terminal() else {
            return Ok(Outcome::Sequence(Results {
                source: Box::new(source.into_iter()),
                drain: Drain::new(pipeline),
                failed: false,
                preview_len: self.preview_len,
                _marker: PhantomData,
            }));
        };

        let mut reduction = Reduction::new(pipeline, terminal);
        for item in source {
            if reduction.feed(item?)? == Flow::Done {
                debug!(terminal = ?terminal.kind(), "terminal answered before end of input");
                break;
            }
        }
        reduction.finish()
    }

    /// Run over an in-memory collection.
    pub fn run_values<I>(&self, items: I) -> QueryResult<Outcome<Results<R>>>
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        self.run(items.into_iter().map(Ok))
    }
}

impl<R: DeserializeOwned> Plan<R> {
    /// Run this plan over an in-memory collection.
    pub fn execute<I>(&self, items: I) -> QueryResult<Outcome<Results<R>>>
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Executor::new(self).run_values(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    #[test]
    fn test_pipeline_closes_after_take() {
        let plan = Query::<Value>::new().take(1).compile().unwrap();
        let mut pipeline = Pipeline::for_plan(&plan).unwrap();
        let mut out = Vec::new();
        assert_eq!(pipeline.push(Value::Integer(1), &mut out), Flow::Done);
        assert_eq!(pipeline.push(Value::Integer(2), &mut out), Flow::Done);
        assert_eq!(out, vec![Value::Integer(1)]);
    }

    #[test]
    fn test_finish_flushes_through_later_stages() {
        let plan = Query::<Value>::new()
            .order_by(|v| v.clone())
            .take(2)
            .compile()
            .unwrap();
        let mut pipeline = Pipeline::for_plan(&plan).unwrap();
        let mut out = Vec::new();
        for n in [3, 1, 2] {
            pipeline.push(Value::Integer(n), &mut out);
        }
        assert!(out.is_empty());
        pipeline.finish(&mut out);
        pipeline.finish(&mut out);
        assert_eq!(out, vec![Value::Integer(1), Value::Integer(2)]);
    }
}
