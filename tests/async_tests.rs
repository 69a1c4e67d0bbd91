use clove_query::{
    AsyncSource, CancellationToken, DecodeOptions, ExecutionStrategy, MaterializedStrategy,
    Number, Outcome, Query, QueryError, QueryResult, ResultStream, StreamOptions,
    TokenStreamStrategy,
    value::Value,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::io::Write;
use tempfile::NamedTempFile;

fn numbers(n: usize) -> String {
    let items: Vec<String> = (1..=n).map(|i| format!(r#"{{"n":{}}}"#, i)).collect();
    format!("[{}]", items.join(","))
}

fn sequence<R>(outcome: Outcome<ResultStream<R>>) -> ResultStream<R> {
    match outcome {
        Outcome::Sequence(stream) => stream,
        _ => panic!("expected a sequence"),
    }
}

async fn start<S: ExecutionStrategy>(
    strategy: &S,
    query: Query,
    source: AsyncSource,
    cancel: CancellationToken,
) -> QueryResult<Outcome<ResultStream<Value>>> {
    let plan = query.compile().unwrap();
    strategy.execute_async(&plan, source, cancel).await
}

async fn values<S: ExecutionStrategy>(strategy: &S, query: Query, text: &str) -> Vec<Value> {
    let outcome = start(strategy, query, AsyncSource::text(text), CancellationToken::new())
        .await
        .unwrap();
    sequence(outcome)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<QueryResult<Vec<_>>>()
        .unwrap()
}

fn ns(values: &[Value]) -> Vec<i64> {
    values.iter().map(|v| v["n"].as_int().unwrap()).collect()
}

// ============================================================================
// Async execution
// ============================================================================

#[tokio::test]
async fn test_async_strategies_agree() {
    let query = Query::new()
        .filter(|v| v["n"].as_int().is_some_and(|n| n % 2 == 0))
        .order_by_descending(|v| v["n"].clone())
        .take(3);
    let text = numbers(10);

    let streamed = values(&TokenStreamStrategy::new(), query.clone(), &text).await;
    let materialized = values(&MaterializedStrategy::new(), query, &text).await;
    assert_eq!(ns(&streamed), vec![10, 8, 6]);
    assert_eq!(streamed, materialized);
}

#[tokio::test]
async fn test_async_path_with_small_buffers() {
    let strategy = TokenStreamStrategy::with_options(
        DecodeOptions::default(),
        StreamOptions::new().async_buffer_size(7).pool_capacity(2),
    );
    let text = format!(r#"{{"meta": {{"x": [1, 2]}}, "items": {}}}"#, numbers(20));
    let query = Query::new().path("$.items[?@.n > 15]");

    let result = values(&strategy, query, &text).await;
    assert_eq!(ns(&result), vec![16, 17, 18, 19, 20]);

    let stats = strategy.pool_stats();
    assert!(stats.checkouts > 1);
    assert_eq!(stats.outstanding(), 0);
    assert!(stats.available <= 2);
}

#[tokio::test]
async fn test_async_terminal() {
    let outcome = start(
        &TokenStreamStrategy::new(),
        Query::new().count(),
        AsyncSource::text(numbers(7)),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.number(), Some(Number::Int32(7)));

    let outcome = start(
        &MaterializedStrategy::new(),
        Query::new().any_where(|v| v["n"].as_int() == Some(3)),
        AsyncSource::text(numbers(7)),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.boolean(), Some(true));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    n: u32,
}

#[tokio::test]
async fn test_async_typed_results_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(numbers(5).as_bytes()).unwrap();
    file.flush().unwrap();

    let plan = Query::<Item>::new().skip(3).compile().unwrap();
    let outcome = TokenStreamStrategy::new()
        .execute_async(&plan, AsyncSource::file(file.path()), CancellationToken::new())
        .await
        .unwrap();
    let items: Vec<Item> = sequence(outcome)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<QueryResult<_>>()
        .unwrap();
    assert_eq!(items, vec![Item { n: 4 }, Item { n: 5 }]);
}

#[tokio::test]
async fn test_async_missing_file() {
    let result = start(
        &MaterializedStrategy::new(),
        Query::new(),
        AsyncSource::file("/definitely/not/here.json"),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(QueryError::Io(_))));
}

#[tokio::test]
async fn test_async_reader_source() {
    let bytes = numbers(3).into_bytes();
    let outcome = start(
        &TokenStreamStrategy::new(),
        Query::new().select(|v| v["n"].clone()),
        AsyncSource::reader(std::io::Cursor::new(bytes)),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let result: Vec<_> = sequence(outcome).collect().await;
    assert_eq!(result.len(), 3);
    assert_eq!(result[2].as_ref().unwrap(), &Value::Integer(3));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = start(
        &TokenStreamStrategy::new(),
        Query::new(),
        AsyncSource::text(numbers(3)),
        cancel.clone(),
    )
    .await;
    assert!(matches!(result, Err(QueryError::Cancelled)));

    let result = start(
        &MaterializedStrategy::new(),
        Query::new(),
        AsyncSource::text(numbers(3)),
        cancel,
    )
    .await;
    assert!(matches!(result, Err(QueryError::Cancelled)));
}

#[tokio::test]
async fn test_cancel_mid_stream_token() {
    let strategy = TokenStreamStrategy::with_options(
        DecodeOptions::default(),
        StreamOptions::new().async_buffer_size(16),
    );
    let cancel = CancellationToken::new();
    let outcome = start(
        &strategy,
        Query::new(),
        AsyncSource::text(numbers(50)),
        cancel.clone(),
    )
    .await
    .unwrap();
    let mut stream = sequence(outcome);

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        seen.push(item.unwrap());
        if seen.len() == 3 {
            break;
        }
    }
    cancel.cancel();

    assert!(matches!(stream.next().await, Some(Err(QueryError::Cancelled))));
    assert!(stream.next().await.is_none());
    drop(stream);

    assert_eq!(ns(&seen), vec![1, 2, 3]);
    assert_eq!(strategy.pool_stats().outstanding(), 0);
}

#[tokio::test]
async fn test_cancel_mid_stream_materialized() {
    let cancel = CancellationToken::new();
    let outcome = start(
        &MaterializedStrategy::new(),
        Query::new().order_by(|v| v["n"].clone()),
        AsyncSource::text(numbers(10)),
        cancel.clone(),
    )
    .await
    .unwrap();
    let mut stream = sequence(outcome);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first["n"], Value::Integer(1));
    cancel.cancel();

    let rest: Vec<_> = stream.collect().await;
    assert_eq!(rest.len(), 1);
    assert!(matches!(rest[0], Err(QueryError::Cancelled)));
}

#[tokio::test]
async fn test_cancel_token_is_shared_across_clones() {
    let cancel = CancellationToken::new();
    let other = cancel.clone();
    assert!(!other.is_cancelled());
    cancel.cancel();
    assert!(other.is_cancelled());
}
