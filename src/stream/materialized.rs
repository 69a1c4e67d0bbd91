use std::future::Future;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    convert,
    error::{QueryError, QueryResult},
    executor::{Executor, Outcome, Results},
    plan::Plan,
    stream::{
        AsyncSource, CancellationToken, DecodeOptions, ExecutionStrategy, ResultStream, Source,
        cancellable,
    },
    value::Value,
};

/// Decodes the whole input once, then selects and runs.
#[derive(Debug, Clone, Default)]
pub struct MaterializedStrategy {
    options: DecodeOptions,
}

impl MaterializedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DecodeOptions) -> Self {
        MaterializedStrategy { options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Path-selected nodes, or the items of a root array, or the root.
    fn elements<R>(&self, plan: &Plan<R>, bytes: &[u8]) -> QueryResult<Vec<Value>> {
        let root = convert::decode_slice(bytes, self.options.preview_len)?;
        let selected = match plan.path() {
            Some(path) => path
                .select_with(&root, self.options.case_insensitive_names)
                .into_iter()
                .cloned()
                .collect(),
            None => match root {
                Value::Array(items) => items,
                other => vec![other],
            },
        };
        debug!(elements = selected.len(), "materialized input");
        selected
            .into_iter()
            .map(|v| self.options.apply(v).map_err(QueryError::from))
            .collect()
    }
}

impl ExecutionStrategy for MaterializedStrategy {
    fn execute<R: DeserializeOwned>(
        &self,
        plan: &Plan<R>,
        source: Source,
    ) -> QueryResult<Outcome<Results<R>>> {
        debug!(strategy = "materialized", ?source, "starting query");
        let bytes = source.read_all()?;
        let elements = self.elements(plan, &bytes)?;
        Executor::new(plan)
            .preview_len(self.options.preview_len)
            .run_values(elements)
    }

    fn execute_async<R: DeserializeOwned + Send + 'static>(
        &self,
        plan: &Plan<R>,
        source: AsyncSource,
        cancel: CancellationToken,
    ) -> impl Future<Output = QueryResult<Outcome<ResultStream<R>>>> + Send {
        async move {
            debug!(strategy = "materialized", ?source, "starting async query");
            if cancel.is_cancelled() {
                warn!("query cancelled before reading");
                return Err(QueryError::Cancelled);
            }
            let bytes = source.read_all().await?;
            let elements = self.elements(plan, &bytes)?;
            let outcome = Executor::new(plan)
                .preview_len(self.options.preview_len)
                .run_values(elements)?;
            Ok(outcome.map_sequence(|results| cancellable(results, cancel)))
        }
    }
}
