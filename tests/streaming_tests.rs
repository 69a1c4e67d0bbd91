use clove_query::{
    DecodeError, DecodeOptions, ExecutionStrategy, LogicalError, MaterializedStrategy, Number,
    NumericKind, Outcome, Query, QueryError, QueryResult, Source, StreamOptions,
    TokenStreamStrategy, convert,
    value::Value,
};
use serde::Deserialize;
use std::{
    io::{self, Cursor, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tempfile::NamedTempFile;

/// Reader that records how many bytes were handed out.
struct CountingReader {
    inner: Cursor<Vec<u8>>,
    read: Arc<AtomicUsize>,
}

impl CountingReader {
    fn new(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let read = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: Cursor::new(bytes),
            read: Arc::clone(&read),
        };
        (reader, read)
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

fn doc(text: &str) -> Value {
    convert::from_json(serde_json::from_str(text).unwrap())
}

fn items(text: &str) -> Vec<Value> {
    match doc(text) {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// `[{"a":1},{"a":2},{"a":3}, ...filler]`, well over 64 KiB.
fn large_input() -> Vec<u8> {
    let mut text = String::from(r#"[{"a":1},{"a":2},{"a":3}"#);
    let pad = "x".repeat(200);
    for i in 0..400 {
        text.push_str(&format!(r#",{{"a":0,"i":{},"pad":"{}"}}"#, i, pad));
    }
    text.push(']');
    text.into_bytes()
}

fn collect<S: ExecutionStrategy>(strategy: &S, query: &Query, source: Source) -> Vec<Value> {
    let plan = query.compile().unwrap();
    strategy
        .execute(&plan, source)
        .unwrap()
        .into_sequence()
        .unwrap()
        .collect::<QueryResult<Vec<_>>>()
        .unwrap()
}

/// Results from both strategies, asserted equal.
fn both(query: &Query, text: &str) -> Vec<Value> {
    let materialized = collect(&MaterializedStrategy::new(), query, Source::text(text));
    let streamed = collect(&TokenStreamStrategy::new(), query, Source::text(text));
    assert_eq!(materialized, streamed);
    streamed
}

const RECORDS: &str = r#"{
    "meta": {"source": "test", "skipped": [1, 2, {"deep": [3, 4]}]},
    "records": [
        {"id": 1, "price": 8, "inStock": true},
        {"id": 2, "price": 15, "inStock": true},
        {"id": 3, "price": 12, "inStock": false},
        {"id": 4, "price": 12.5, "inStock": true},
        {"id": 5, "price": 13, "inStock": true}
    ]
}"#;

fn ids(values: &[Value]) -> Vec<i64> {
    values.iter().map(|v| v["id"].as_int().unwrap()).collect()
}

// ============================================================================
// Early termination
// ============================================================================

#[test]
fn test_take_stops_reading() {
    let input = large_input();
    let total = input.len();
    let (reader, read) = CountingReader::new(input);

    let query = Query::new()
        .filter(|v| v["a"].as_int().is_some_and(|a| a > 1))
        .take(1);
    let result = collect(&TokenStreamStrategy::new(), &query, Source::reader(reader));

    assert_eq!(result, items(r#"[{"a":2}]"#));
    let read = read.load(Ordering::SeqCst);
    assert!(total > 64 * 1024);
    assert!(read <= 4096, "read {} of {} bytes", read, total);
}

#[test]
fn test_first_stops_reading() {
    let input = large_input();
    let total = input.len();
    let (reader, read) = CountingReader::new(input);

    let plan = Query::<Value>::new()
        .first_where(|v| v["a"].as_int() == Some(3))
        .compile()
        .unwrap();
    let outcome = TokenStreamStrategy::new()
        .execute(&plan, Source::reader(reader))
        .unwrap();

    assert_eq!(outcome.value(), Some(&doc(r#"{"a":3}"#)));
    assert!(read.load(Ordering::SeqCst) < total);
}

#[test]
fn test_materialized_reads_everything() {
    let input = large_input();
    let total = input.len();
    let (reader, read) = CountingReader::new(input);

    let query = Query::new().take(1);
    let result = collect(&MaterializedStrategy::new(), &query, Source::reader(reader));

    assert_eq!(result.len(), 1);
    assert_eq!(read.load(Ordering::SeqCst), total);
}

#[test]
fn test_lazy_results_read_on_demand() {
    let input = large_input();
    let total = input.len();
    let (reader, read) = CountingReader::new(input);

    let plan = Query::<Value>::new().compile().unwrap();
    let mut results = TokenStreamStrategy::new()
        .execute(&plan, Source::reader(reader))
        .unwrap()
        .into_sequence()
        .unwrap();
    assert_eq!(read.load(Ordering::SeqCst), 0);

    assert_eq!(results.next().unwrap().unwrap(), doc(r#"{"a":1}"#));
    assert!(read.load(Ordering::SeqCst) < total);
    assert_eq!(results.count(), 402);
    assert_eq!(read.load(Ordering::SeqCst), total);
}

// ============================================================================
// Strategy equivalence
// ============================================================================

#[test]
fn test_path_filter_selects_subset() {
    let query = Query::new().path("$.records[?@.price<13&&@.inStock==true]");
    assert_eq!(ids(&both(&query, RECORDS)), vec![1, 4]);
}

#[test]
fn test_path_then_operators() {
    let query = Query::new()
        .path("$.records[*]")
        .filter(|v| v["inStock"].as_bool() == Some(true))
        .order_by_descending(|v| v["price"].clone())
        .skip(1)
        .select(|v| v["id"].clone());
    let result = both(&query, RECORDS);
    assert_eq!(result, vec![Value::Integer(5), Value::Integer(4), Value::Integer(1)]);
}

#[test]
fn test_descendant_path() {
    let query = Query::new().path("$..deep[*]");
    assert_eq!(both(&query, RECORDS), vec![Value::Integer(3), Value::Integer(4)]);
}

#[test]
fn test_negative_index_path_buffers() {
    let query = Query::new().path("$.records[-1]");
    assert_eq!(ids(&both(&query, RECORDS)), vec![5]);

    let query = Query::new().path("$.records[::-2]");
    assert_eq!(ids(&both(&query, RECORDS)), vec![5, 3, 1]);
}

#[test]
fn test_root_document_without_path() {
    assert_eq!(both(&Query::new(), "[1, [2, 3], {}]").len(), 3);
    assert_eq!(both(&Query::new(), r#"{"a": 1}"#), vec![doc(r#"{"a": 1}"#)]);
    assert_eq!(both(&Query::new(), "42"), vec![Value::Integer(42)]);
}

#[test]
fn test_group_by_through_stream() {
    let query = Query::new().group_by_result(
        |v| v["city"].clone(),
        |k, items| Value::object([("Key", k.clone()), ("Count", Value::from(items.len()))]),
    );
    let result = both(&query, r#"[{"city":"X"},{"city":"Y"}]"#);
    assert_eq!(result, items(r#"[{"Key":"X","Count":1},{"Key":"Y","Count":1}]"#));
}

#[test]
fn test_aggregates_on_empty_source() {
    for token in [false, true] {
        let sum_plan = Query::<Value>::new()
            .path("$.none[*]")
            .sum(NumericKind::Int32, |v| v["n"].clone())
            .compile()
            .unwrap();
        let min_plan = Query::<Value>::new()
            .path("$.none[*]")
            .min(NumericKind::Int32, |v| v["n"].clone())
            .compile()
            .unwrap();
        let source = || Source::text(r#"{"none": []}"#);

        let (sum, min) = if token {
            let s = TokenStreamStrategy::new();
            (s.execute(&sum_plan, source()), s.execute(&min_plan, source()))
        } else {
            let s = MaterializedStrategy::new();
            (s.execute(&sum_plan, source()), s.execute(&min_plan, source()))
        };
        assert_eq!(sum.unwrap().number(), Some(Number::Int32(0)));
        let err = min.unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::NoElements)));
        assert_eq!(err.to_string(), "Sequence contains no elements");
    }
}

// ============================================================================
// Sources and options
// ============================================================================

#[test]
fn test_file_source() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(RECORDS.as_bytes()).unwrap();
    file.flush().unwrap();

    let query = Query::new().path("$.records[*].id");
    let streamed = collect(&TokenStreamStrategy::new(), &query, Source::file(file.path()));
    let materialized = collect(&MaterializedStrategy::new(), &query, Source::file(file.path()));
    assert_eq!(streamed, materialized);
    assert_eq!(streamed.len(), 5);
}

#[test]
fn test_missing_file_is_io_error() {
    let plan = Query::<Value>::new().compile().unwrap();
    let err = TokenStreamStrategy::new()
        .execute(&plan, Source::file("/definitely/not/here.json"))
        .unwrap_err();
    assert!(matches!(err, QueryError::Io(_)));
}

#[test]
fn test_case_insensitive_names() {
    let text = r#"{"Records": [{"ID": 1}, {"ID": 2}]}"#;
    let query = Query::new().path("$.records[*].id");

    let options = DecodeOptions::new().case_insensitive_names(true);
    let streamed = collect(
        &TokenStreamStrategy::with_options(options.clone(), StreamOptions::default()),
        &query,
        Source::text(text),
    );
    let materialized = collect(
        &MaterializedStrategy::with_options(options),
        &query,
        Source::text(text),
    );
    assert_eq!(streamed, vec![Value::Integer(1), Value::Integer(2)]);
    assert_eq!(streamed, materialized);

    assert!(collect(&TokenStreamStrategy::new(), &query, Source::text(text)).is_empty());
}

#[test]
fn test_converters_run_before_operators() {
    let options = DecodeOptions::new().converter(|v: Value| -> Result<Value, DecodeError> {
        match v {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| DecodeError::with_preview(e.to_string(), &s, 48)),
            other => Ok(other),
        }
    });
    let query = Query::new().filter(|v| v.as_int().is_some_and(|n| n > 1));

    let strategy = TokenStreamStrategy::with_options(options.clone(), StreamOptions::default());
    let result = collect(&strategy, &query, Source::text(r#"["1", "2", 3]"#));
    assert_eq!(result, vec![Value::Integer(2), Value::Integer(3)]);

    let plan = query.compile().unwrap();
    let results = MaterializedStrategy::with_options(options)
        .execute(&plan, Source::text(r#"["1", "x"]"#))
        .map(|o| o.into_sequence().unwrap().collect::<Vec<_>>());
    assert!(matches!(results, Err(QueryError::Decode(_))));
}

#[derive(Debug, Deserialize, PartialEq)]
struct Record {
    id: u32,
    price: f64,
}

#[test]
fn test_typed_stream_results() {
    let plan = Query::<Record>::new()
        .path("$.records[?@.inStock == false]")
        .compile()
        .unwrap();
    let records: Vec<Record> = TokenStreamStrategy::new()
        .execute(&plan, Source::text(RECORDS))
        .unwrap()
        .into_sequence()
        .unwrap()
        .collect::<QueryResult<_>>()
        .unwrap();
    assert_eq!(records, vec![Record { id: 3, price: 12.0 }]);
}

// ============================================================================
// Long tokens
// ============================================================================

/// `[{"a":1,"s":"xxx..."},{"a":2,"s":"y"}]` with an `len`-byte string.
fn long_string_input(len: usize) -> Vec<u8> {
    let mut text = String::with_capacity(len + 64);
    text.push_str(r#"[{"a":1,"s":""#);
    text.push_str(&"x".repeat(len));
    text.push_str(r#""},{"a":2,"s":"y"}]"#);
    text.into_bytes()
}

#[test]
fn test_long_string_scanned_in_linear_time() {
    let input = long_string_input(8 * 1024 * 1024);
    let plan = Query::<Value>::new().count().compile().unwrap();

    let started = Instant::now();
    let outcome = TokenStreamStrategy::new()
        .execute(&plan, Source::reader(Cursor::new(input.clone())))
        .unwrap();
    assert_eq!(outcome.number(), Some(Number::Int32(2)));

    let query = Query::new().path("$[*].a");
    let (reader, read) = CountingReader::new(input);
    let result = collect(&TokenStreamStrategy::new(), &query, Source::reader(reader));
    assert_eq!(result, vec![Value::Integer(1), Value::Integer(2)]);
    assert_eq!(read.load(Ordering::SeqCst), 8 * 1024 * 1024 + 32);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_long_string_decoded_whole() {
    let input = long_string_input(256 * 1024);
    let query = Query::new().path("$[0].s");
    let result = collect(&TokenStreamStrategy::new(), &query, Source::bytes(input));
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].as_str().map(str::len), Some(256 * 1024));
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn test_malformed_input_reports_offset() {
    let plan = Query::<Value>::new().compile().unwrap();
    let results: Vec<_> = TokenStreamStrategy::new()
        .execute(&plan, Source::text(r#"[{"a":1}, {"a":}]"#))
        .unwrap()
        .into_sequence()
        .unwrap()
        .collect();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), &doc(r#"{"a":1}"#));
    let Err(QueryError::Decode(err)) = &results[1] else {
        panic!("expected a decode error, got {:?}", results[1]);
    };
    assert_eq!(err.offset, Some(15));
    assert!(err.preview.len() <= 48);
}

#[test]
fn test_malformed_input_materialized_fails_up_front() {
    let plan = Query::<Value>::new().compile().unwrap();
    let err = MaterializedStrategy::new()
        .execute(&plan, Source::text("[1, 2"))
        .unwrap_err();
    assert!(matches!(err, QueryError::Decode(_)));
}

#[test]
fn test_truncated_stream_fails_after_valid_prefix() {
    let plan = Query::<Value>::new().compile().unwrap();
    let outcome = TokenStreamStrategy::new()
        .execute(&plan, Source::text("[1, 2"))
        .unwrap();
    let results: Vec<_> = match outcome {
        Outcome::Sequence(results) => results.collect(),
        _ => panic!("expected a sequence"),
    };
    assert_eq!(results[0].as_ref().unwrap(), &Value::Integer(1));
    assert!(results.last().unwrap().is_err());
}
