use std::{marker::PhantomData, sync::Arc};

use crate::{
    error::QueryResult,
    executor::aggregate::NumericKind,
    path::PatternEngine,
    plan::{Plan, compiler},
    query::ast::{
        Combiner, ConversionKind, Direction, ElementKind, Grouping, JoinSpec, NumericAggregate,
        Operator, Partition, Predicate, Selector, SequenceOp, SetKind, SetOperation, Terminal,
        ZipSpec,
    },
    value::{Value, ValueKind},
};

/// A composed, not yet executed query.
///
/// `R` is the element type callers receive once the query runs; elements are
/// decoded into it with serde after every operator has been applied.
///
/// ```
/// use clove_query::{Query, Value};
///
/// let query = Query::<Value>::new()
///     .filter(|v| v["a"].as_int().is_some_and(|a| a > 1))
///     .take(1);
/// let plan = query.compile().unwrap();
/// assert!(!plan.requires_materialization());
/// ```
pub struct Query<R = Value> {
    operators: Vec<Operator>,
    path: Option<String>,
    engine: Option<Arc<dyn PatternEngine>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for Query<R> {
    fn clone(&self) -> Self {
        Query {
            operators: self.operators.clone(),
            path: self.path.clone(),
            engine: self.engine.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R> Default for Query<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Predicate {
    Arc::new(f)
}

fn selector<T: Into<Value>>(f: impl Fn(&Value) -> T + Send + Sync + 'static) -> Selector {
    Arc::new(move |v| f(v).into())
}

fn combiner<T: Into<Value>>(f: impl Fn(&Value, &Value) -> T + Send + Sync + 'static) -> Combiner {
    Arc::new(move |a, b| f(a, b).into())
}

fn sequence(items: impl IntoIterator<Item = Value>) -> Arc<Vec<Value>> {
    Arc::new(items.into_iter().collect())
}

impl<R> Query<R> {
    pub fn new() -> Self {
        Query {
            operators: Vec::new(),
            path: None,
            engine: None,
            _marker: PhantomData,
        }
    }

    /// Restrict the source to the nodes selected by a filter path.
    pub fn path(mut self, expr: impl Into<String>) -> Self {
        self.path = Some(expr.into());
        self
    }

    /// Pattern dialect for `match()` and `search()` in the filter path.
    /// Defaults to [`RegexEngine`](crate::path::RegexEngine).
    pub fn pattern_engine(mut self, engine: Arc<dyn PatternEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Append a raw operator node.
    pub fn push(mut self, operator: Operator) -> Self {
        self.operators.push(operator);
        self
    }

    /// Re-declare the result element type.
    pub fn returning<U>(self) -> Query<U> {
        Query {
            operators: self.operators,
            path: self.path,
            engine: self.engine,
            _marker: PhantomData,
        }
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn path_expr(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Validate and compile into an immutable plan.
    pub fn compile(&self) -> QueryResult<Plan<R>> {
        compiler::compile(&self.operators, self.path.as_deref(), self.engine.clone())
    }

    // ------------------------------------------------------------------
    // Filtering and projection
    // ------------------------------------------------------------------

    pub fn filter(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.push(Operator::Where(predicate(f)))
    }

    pub fn select<T: Into<Value>>(self, f: impl Fn(&Value) -> T + Send + Sync + 'static) -> Self {
        self.push(Operator::Select(selector(f)))
    }

    /// `f` returns an array whose items replace the element.
    pub fn select_many<T: Into<Value>>(
        self,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::SelectMany(selector(f)))
    }

    pub fn of_type(self, kind: ValueKind) -> Self {
        self.push(Operator::OfType(kind))
    }

    /// Pair elements with `second` by position as `[a, b]`.
    pub fn zip(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.push(Operator::Zip(ZipSpec {
            second: sequence(second),
            result: None,
        }))
    }

    pub fn zip_with<T: Into<Value>>(
        self,
        second: impl IntoIterator<Item = Value>,
        result: impl Fn(&Value, &Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::Zip(ZipSpec {
            second: sequence(second),
            result: Some(combiner(result)),
        }))
    }

    // ------------------------------------------------------------------
    // Sorting
    // ------------------------------------------------------------------

    pub fn order_by<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.order_by_keys(vec![selector(key)], vec![Direction::Ascending])
    }

    pub fn order_by_descending<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.order_by_keys(vec![selector(key)], vec![Direction::Descending])
    }

    /// Sort by several keys at once; `directions` pairs with `keys`.
    pub fn order_by_keys(self, keys: Vec<Selector>, directions: Vec<Direction>) -> Self {
        self.push(Operator::OrderBy { keys, directions })
    }

    pub fn then_by<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::ThenBy {
            key: selector(key),
            direction: Direction::Ascending,
        })
    }

    pub fn then_by_descending<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::ThenBy {
            key: selector(key),
            direction: Direction::Descending,
        })
    }

    pub fn reverse(self) -> Self {
        self.push(Operator::Reverse)
    }

    // ------------------------------------------------------------------
    // Partitioning
    // ------------------------------------------------------------------

    pub fn skip(self, count: i64) -> Self {
        self.push(Operator::Partition(Partition::Skip(count)))
    }

    pub fn take(self, count: i64) -> Self {
        self.push(Operator::Partition(Partition::Take(count)))
    }

    pub fn skip_while(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.push(Operator::Partition(Partition::SkipWhile(predicate(f))))
    }

    pub fn take_while(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.push(Operator::Partition(Partition::TakeWhile(predicate(f))))
    }

    pub fn skip_last(self, count: i64) -> Self {
        self.push(Operator::Partition(Partition::SkipLast(count)))
    }

    pub fn take_last(self, count: i64) -> Self {
        self.push(Operator::Partition(Partition::TakeLast(count)))
    }

    /// Group consecutive elements into arrays of `size`.
    pub fn chunk(self, size: i64) -> Self {
        self.push(Operator::Partition(Partition::Chunk(size)))
    }

    // ------------------------------------------------------------------
    // Set operations
    // ------------------------------------------------------------------

    fn set(self, kind: SetKind, second: Arc<Vec<Value>>, key: Option<Selector>) -> Self {
        self.push(Operator::Set(SetOperation {
            kind,
            second,
            key,
            comparer: None,
        }))
    }

    pub fn distinct(self) -> Self {
        self.set(SetKind::Distinct, Arc::default(), None)
    }

    pub fn distinct_with(
        self,
        comparer: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::Set(SetOperation {
            kind: SetKind::Distinct,
            second: Arc::default(),
            key: None,
            comparer: Some(Arc::new(comparer)),
        }))
    }

    pub fn distinct_by<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.set(SetKind::Distinct, Arc::default(), Some(selector(key)))
    }

    pub fn union(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.set(SetKind::Union, sequence(second), None)
    }

    pub fn union_by<T: Into<Value>>(
        self,
        second: impl IntoIterator<Item = Value>,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.set(SetKind::Union, sequence(second), Some(selector(key)))
    }

    pub fn intersect(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.set(SetKind::Intersect, sequence(second), None)
    }

    /// `second` holds keys, compared against each element's key.
    pub fn intersect_by<T: Into<Value>>(
        self,
        second: impl IntoIterator<Item = Value>,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.set(SetKind::Intersect, sequence(second), Some(selector(key)))
    }

    pub fn except(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.set(SetKind::Except, sequence(second), None)
    }

    /// `second` holds keys, compared against each element's key.
    pub fn except_by<T: Into<Value>>(
        self,
        second: impl IntoIterator<Item = Value>,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.set(SetKind::Except, sequence(second), Some(selector(key)))
    }

    // ------------------------------------------------------------------
    // Grouping and joining
    // ------------------------------------------------------------------

    /// Groups surface as `{"key": k, "items": [...]}`.
    pub fn group_by<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::GroupBy(Grouping {
            key: Some(selector(key)),
            element: None,
            result: None,
        }))
    }

    pub fn group_by_element<K: Into<Value>, E: Into<Value>>(
        self,
        key: impl Fn(&Value) -> K + Send + Sync + 'static,
        element: impl Fn(&Value) -> E + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::GroupBy(Grouping {
            key: Some(selector(key)),
            element: Some(selector(element)),
            result: None,
        }))
    }

    /// Each group becomes `result(key, items)`.
    pub fn group_by_result<K: Into<Value>, T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> K + Send + Sync + 'static,
        result: impl Fn(&Value, &[Value]) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::GroupBy(Grouping {
            key: Some(selector(key)),
            element: None,
            result: Some(Arc::new(move |k, items| result(k, items).into())),
        }))
    }

    /// Inner equi-join against `inner`.
    pub fn join<K1: Into<Value>, K2: Into<Value>, T: Into<Value>>(
        self,
        inner: impl IntoIterator<Item = Value>,
        outer_key: impl Fn(&Value) -> K1 + Send + Sync + 'static,
        inner_key: impl Fn(&Value) -> K2 + Send + Sync + 'static,
        result: impl Fn(&Value, &Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.push(Operator::Join(JoinSpec {
            inner: sequence(inner),
            outer_key: Some(selector(outer_key)),
            inner_key: Some(selector(inner_key)),
            result: Some(combiner(result)),
        }))
    }

    // ------------------------------------------------------------------
    // Sequence operations
    // ------------------------------------------------------------------

    pub fn append(self, value: impl Into<Value>) -> Self {
        self.push(Operator::Sequence(SequenceOp::Append(value.into())))
    }

    pub fn prepend(self, value: impl Into<Value>) -> Self {
        self.push(Operator::Sequence(SequenceOp::Prepend(value.into())))
    }

    pub fn concat(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.push(Operator::Sequence(SequenceOp::Concat(sequence(second))))
    }

    pub fn default_if_empty(self, value: impl Into<Value>) -> Self {
        self.push(Operator::DefaultIfEmpty(value.into()))
    }

    // ------------------------------------------------------------------
    // Terminal operators
    // ------------------------------------------------------------------

    fn terminal(self, terminal: Terminal) -> Self {
        self.push(Operator::Terminal(terminal))
    }

    pub fn count(self) -> Self {
        self.terminal(Terminal::Count {
            predicate: None,
            long: false,
        })
    }

    pub fn count_where(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.terminal(Terminal::Count {
            predicate: Some(predicate(f)),
            long: false,
        })
    }

    pub fn long_count(self) -> Self {
        self.terminal(Terminal::Count {
            predicate: None,
            long: true,
        })
    }

    fn numeric<T: Into<Value>>(
        self,
        aggregate: NumericAggregate,
        numeric: NumericKind,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.terminal(Terminal::Numeric {
            aggregate,
            selector: Some(selector(f)),
            numeric,
        })
    }

    pub fn sum<T: Into<Value>>(
        self,
        numeric: NumericKind,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.numeric(NumericAggregate::Sum, numeric, f)
    }

    pub fn average<T: Into<Value>>(
        self,
        numeric: NumericKind,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.numeric(NumericAggregate::Average, numeric, f)
    }

    pub fn min<T: Into<Value>>(
        self,
        numeric: NumericKind,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.numeric(NumericAggregate::Min, numeric, f)
    }

    pub fn max<T: Into<Value>>(
        self,
        numeric: NumericKind,
        f: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.numeric(NumericAggregate::Max, numeric, f)
    }

    /// The element with the smallest key.
    pub fn min_by<T: Into<Value>>(self, key: impl Fn(&Value) -> T + Send + Sync + 'static) -> Self {
        self.terminal(Terminal::MinBy(Some(selector(key))))
    }

    /// The element with the largest key.
    pub fn max_by<T: Into<Value>>(self, key: impl Fn(&Value) -> T + Send + Sync + 'static) -> Self {
        self.terminal(Terminal::MaxBy(Some(selector(key))))
    }

    /// Fold every element into `seed`.
    pub fn aggregate<T: Into<Value>>(
        self,
        seed: impl Into<Value>,
        folder: impl Fn(Value, &Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.terminal(Terminal::Fold {
            seed: seed.into(),
            folder: Arc::new(move |acc, v| folder(acc, v).into()),
        })
    }

    pub fn all(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.terminal(Terminal::All(predicate(f)))
    }

    pub fn any(self) -> Self {
        self.terminal(Terminal::Any(None))
    }

    pub fn any_where(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.terminal(Terminal::Any(Some(predicate(f))))
    }

    pub fn contains(self, value: impl Into<Value>) -> Self {
        self.terminal(Terminal::Contains {
            value: value.into(),
            comparer: None,
        })
    }

    pub fn contains_with(
        self,
        value: impl Into<Value>,
        comparer: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.terminal(Terminal::Contains {
            value: value.into(),
            comparer: Some(Arc::new(comparer)),
        })
    }

    pub fn sequence_equal(self, second: impl IntoIterator<Item = Value>) -> Self {
        self.terminal(Terminal::SequenceEqual {
            second: sequence(second),
            comparer: None,
        })
    }

    pub fn sequence_equal_with(
        self,
        second: impl IntoIterator<Item = Value>,
        comparer: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.terminal(Terminal::SequenceEqual {
            second: sequence(second),
            comparer: Some(Arc::new(comparer)),
        })
    }

    fn element(self, kind: ElementKind, predicate: Option<Predicate>, or_default: bool) -> Self {
        self.terminal(Terminal::Element {
            kind,
            predicate,
            or_default,
        })
    }

    pub fn first(self) -> Self {
        self.element(ElementKind::First, None, false)
    }

    pub fn first_where(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.element(ElementKind::First, Some(predicate(f)), false)
    }

    /// Like [`first`](Self::first) but yields `null` for an empty sequence.
    pub fn first_or_default(self) -> Self {
        self.element(ElementKind::First, None, true)
    }

    pub fn last(self) -> Self {
        self.element(ElementKind::Last, None, false)
    }

    pub fn last_where(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.element(ElementKind::Last, Some(predicate(f)), false)
    }

    pub fn last_or_default(self) -> Self {
        self.element(ElementKind::Last, None, true)
    }

    pub fn single(self) -> Self {
        self.element(ElementKind::Single, None, false)
    }

    pub fn single_where(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.element(ElementKind::Single, Some(predicate(f)), false)
    }

    pub fn single_or_default(self) -> Self {
        self.element(ElementKind::Single, None, true)
    }

    pub fn element_at(self, index: i64) -> Self {
        self.terminal(Terminal::ElementAt {
            index,
            or_default: false,
        })
    }

    pub fn element_at_or_default(self, index: i64) -> Self {
        self.terminal(Terminal::ElementAt {
            index,
            or_default: true,
        })
    }

    fn convert(
        self,
        kind: ConversionKind,
        key: Option<Selector>,
        element: Option<Selector>,
    ) -> Self {
        self.terminal(Terminal::Convert { kind, key, element })
    }

    pub fn to_list(self) -> Self {
        self.convert(ConversionKind::List, None, None)
    }

    pub fn to_array(self) -> Self {
        self.convert(ConversionKind::Array, None, None)
    }

    /// Fails on the first duplicate key.
    pub fn to_dictionary<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.convert(ConversionKind::Dictionary, Some(selector(key)), None)
    }

    pub fn to_dictionary_with<K: Into<Value>, E: Into<Value>>(
        self,
        key: impl Fn(&Value) -> K + Send + Sync + 'static,
        element: impl Fn(&Value) -> E + Send + Sync + 'static,
    ) -> Self {
        self.convert(ConversionKind::Dictionary, Some(selector(key)), Some(selector(element)))
    }

    pub fn to_hash_set(self) -> Self {
        self.convert(ConversionKind::HashSet, None, None)
    }

    pub fn to_lookup<T: Into<Value>>(
        self,
        key: impl Fn(&Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.convert(ConversionKind::Lookup, Some(selector(key)), None)
    }

    pub fn to_lookup_with<K: Into<Value>, E: Into<Value>>(
        self,
        key: impl Fn(&Value) -> K + Send + Sync + 'static,
        element: impl Fn(&Value) -> E + Send + Sync + 'static,
    ) -> Self {
        self.convert(ConversionKind::Lookup, Some(selector(key)), Some(selector(element)))
    }
}
