//! Run a query built from command-line flags

use super::CliError;
use crate::{
    convert,
    error::QueryResult,
    query::Query,
    stream::{ExecutionStrategy, MaterializedStrategy, Source, TokenStreamStrategy},
    value::Value,
};

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Filter path selecting the elements to query
    pub path: Option<String>,
    /// Use the token-filtered streaming strategy
    pub stream: bool,
    pub skip: Option<i64>,
    pub take: Option<i64>,
    /// Member name to sort by
    pub sort_by: Option<String>,
    pub descending: bool,
    pub distinct: bool,
    /// Print the number of results instead of the results
    pub count: bool,
    pub pretty: bool,
}

/// Result of a run operation
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    Elements(Vec<Value>),
    Scalar(Value),
}

impl RunOutput {
    pub fn to_value(&self) -> Value {
        match self {
            RunOutput::Elements(items) => Value::Array(items.clone()),
            RunOutput::Scalar(value) => value.clone(),
        }
    }

    /// JSON text of the output
    pub fn render(&self, pretty: bool) -> Result<String, CliError> {
        let json = convert::to_json(self.to_value());
        let text = if pretty {
            serde_json::to_string_pretty(&json)?
        } else {
            serde_json::to_string(&json)?
        };
        Ok(text)
    }
}

fn build_query(options: &RunOptions) -> Query {
    let mut query = Query::new();
    if let Some(path) = &options.path {
        query = query.path(path.clone());
    }
    if options.distinct {
        query = query.distinct();
    }
    if let Some(member) = options.sort_by.clone() {
        let key = move |v: &Value| v.get(&member).cloned().unwrap_or_default();
        query = if options.descending {
            query.order_by_descending(key)
        } else {
            query.order_by(key)
        };
    }
    if let Some(n) = options.skip {
        query = query.skip(n);
    }
    if let Some(n) = options.take {
        query = query.take(n);
    }
    if options.count {
        query = query.count();
    }
    query
}

/// Execute the run command
pub fn execute_run(options: &RunOptions, source: Source) -> Result<RunOutput, CliError> {
    let plan = build_query(options).compile()?;
    let outcome = if options.stream {
        TokenStreamStrategy::new().execute(&plan, source)?
    } else {
        MaterializedStrategy::new().execute(&plan, source)?
    };

    if let Some(scalar) = outcome.scalar_value() {
        return Ok(RunOutput::Scalar(scalar));
    }
    let items = match outcome.into_sequence() {
        Some(results) => results.collect::<QueryResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(RunOutput::Elements(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKS: &str = r#"{"books": [
        {"title": "C", "price": 3},
        {"title": "A", "price": 1},
        {"title": "B", "price": 2}
    ]}"#;

    fn titles(output: &RunOutput) -> Vec<String> {
        let RunOutput::Elements(items) = output else {
            panic!("expected elements, got {:?}", output);
        };
        items
            .iter()
            .map(|v| v["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_run_sorts_and_pages() {
        let options = RunOptions {
            path: Some("$.books[*]".into()),
            sort_by: Some("price".into()),
            take: Some(2),
            ..Default::default()
        };
        let output = execute_run(&options, Source::text(BOOKS)).unwrap();
        assert_eq!(titles(&output), vec!["A", "B"]);
    }

    #[test]
    fn test_run_count_streaming() {
        let options = RunOptions {
            path: Some("$.books[*]".into()),
            stream: true,
            count: true,
            ..Default::default()
        };
        let output = execute_run(&options, Source::text(BOOKS)).unwrap();
        assert_eq!(output, RunOutput::Scalar(Value::Integer(3)));
        assert_eq!(output.render(false).unwrap(), "3");
    }

    #[test]
    fn test_run_strategies_agree() {
        let options = RunOptions {
            path: Some("$.books[*]".into()),
            sort_by: Some("title".into()),
            descending: true,
            skip: Some(1),
            ..Default::default()
        };
        let materialized = execute_run(&options, Source::text(BOOKS)).unwrap();
        let streamed = execute_run(
            &RunOptions {
                stream: true,
                ..options.clone()
            },
            Source::text(BOOKS),
        )
        .unwrap();
        assert_eq!(materialized, streamed);
        assert_eq!(titles(&streamed), vec!["B", "A"]);
    }
}
