//! Push-based stages, one per operator family.
//!
//! Every stage must stay correct when fed after it has returned
//! [`Flow::Done`]; the pipeline stops feeding it, but stages never rely on
//! that.

use std::{
    cmp::Ordering,
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use indexmap::IndexMap;

use crate::{
    error::{PlanError, QueryResult},
    executor::{Flow, Stage},
    plan::{FlatFields, OperatorKind, Plan},
    query::ast::{
        Combiner, Comparer, Direction, GroupResult, Grouping, JoinSpec, Operator, Partition,
        Predicate, Selector, SequenceOp, SetKind, SetOperation, ZipSpec,
    },
    value::{HashKey, Value, ValueKind},
};

pub type BoxedStage = Box<dyn Stage>;

// ============================================================================
// Filtering and projection
// ============================================================================

struct Filter(Predicate);

impl Stage for Filter {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if (self.0)(&item) {
            out.push(item);
        }
        Flow::Continue
    }
}

struct Map(Selector);

impl Stage for Map {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        out.push((self.0)(&item));
        Flow::Continue
    }
}

/// Array results are flattened; anything else passes through as one element.
struct FlatMap(Selector);

impl Stage for FlatMap {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        match (self.0)(&item) {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
        Flow::Continue
    }
}

struct OfType(ValueKind);

impl Stage for OfType {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if item.is_kind(self.0) {
            out.push(item);
        }
        Flow::Continue
    }
}

struct Zip {
    spec: ZipSpec,
    position: usize,
}

impl Stage for Zip {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        let Some(other) = self.spec.second.get(self.position) else {
            return Flow::Done;
        };
        out.push(match &self.spec.result {
            Some(combine) => combine(&item, other),
            None => Value::Array(vec![item, other.clone()]),
        });
        self.position += 1;
        if self.position >= self.spec.second.len() {
            Flow::Done
        } else {
            Flow::Continue
        }
    }
}

// ============================================================================
// Sorting
// ============================================================================

struct Sort {
    keys: Vec<(Selector, Direction)>,
    items: Vec<(Vec<Value>, Value)>,
}

impl Sort {
    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), (_, direction)) in a.iter().zip(b).zip(&self.keys) {
            let ord = match direction {
                Direction::Ascending => x.total_cmp(y),
                Direction::Descending => y.total_cmp(x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Stage for Sort {
    fn accept(&mut self, item: Value, _out: &mut Vec<Value>) -> Flow {
        let keys = self.keys.iter().map(|(key, _)| key(&item)).collect();
        self.items.push((keys, item));
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        let mut items = std::mem::take(&mut self.items);
        // sort_by is stable
        items.sort_by(|a, b| self.compare(&a.0, &b.0));
        out.extend(items.into_iter().map(|(_, item)| item));
    }
}

#[derive(Default)]
struct Reverse(Vec<Value>);

impl Stage for Reverse {
    fn accept(&mut self, item: Value, _out: &mut Vec<Value>) -> Flow {
        self.0.push(item);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        out.extend(self.0.drain(..).rev());
    }
}

// ============================================================================
// Partitioning
// ============================================================================

struct Skip(u64);

impl Stage for Skip {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if self.0 > 0 {
            self.0 -= 1;
        } else {
            out.push(item);
        }
        Flow::Continue
    }
}

struct Take(u64);

impl Stage for Take {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if self.0 == 0 {
            return Flow::Done;
        }
        out.push(item);
        self.0 -= 1;
        if self.0 == 0 { Flow::Done } else { Flow::Continue }
    }
}

struct SkipWhile {
    predicate: Predicate,
    skipping: bool,
}

impl Stage for SkipWhile {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if self.skipping && (self.predicate)(&item) {
            return Flow::Continue;
        }
        self.skipping = false;
        out.push(item);
        Flow::Continue
    }
}

struct TakeWhile {
    predicate: Predicate,
    taking: bool,
}

impl Stage for TakeWhile {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if self.taking && (self.predicate)(&item) {
            out.push(item);
            return Flow::Continue;
        }
        self.taking = false;
        Flow::Done
    }
}

/// Holds back the last `n` elements; they are dropped at the end.
struct SkipLast {
    count: usize,
    window: VecDeque<Value>,
}

impl Stage for SkipLast {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        self.window.push_back(item);
        if self.window.len() > self.count
            && let Some(front) = self.window.pop_front()
        {
            out.push(front);
        }
        Flow::Continue
    }

    fn finish(&mut self, _out: &mut Vec<Value>) {
        self.window.clear();
    }
}

struct TakeLast {
    count: usize,
    window: VecDeque<Value>,
}

impl Stage for TakeLast {
    fn accept(&mut self, item: Value, _out: &mut Vec<Value>) -> Flow {
        if self.count == 0 {
            return Flow::Continue;
        }
        if self.window.len() == self.count {
            self.window.pop_front();
        }
        self.window.push_back(item);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        out.extend(self.window.drain(..));
    }
}

struct Chunk {
    size: usize,
    current: Vec<Value>,
}

impl Stage for Chunk {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        self.current.push(item);
        if self.current.len() == self.size {
            out.push(Value::Array(std::mem::take(&mut self.current)));
        }
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        if !self.current.is_empty() {
            out.push(Value::Array(std::mem::take(&mut self.current)));
        }
    }
}

// ============================================================================
// Set operations
// ============================================================================

/// Keys seen so far, hashed structurally unless a comparer is supplied.
enum Seen {
    Hashed(HashSet<HashKey>),
    Compared(Vec<Value>, Comparer),
}

impl Seen {
    fn new(comparer: Option<Comparer>) -> Self {
        match comparer {
            Some(comparer) => Seen::Compared(Vec::new(), comparer),
            None => Seen::Hashed(HashSet::new()),
        }
    }

    /// False when `key` was already present.
    fn insert(&mut self, key: Value) -> bool {
        match self {
            Seen::Hashed(set) => set.insert(HashKey(key)),
            Seen::Compared(keys, comparer) => {
                if keys.iter().any(|k| comparer(k, &key)) {
                    return false;
                }
                keys.push(key);
                true
            }
        }
    }

    fn contains(&self, key: &Value) -> bool {
        match self {
            Seen::Hashed(set) => set.contains(&HashKey(key.clone())),
            Seen::Compared(keys, comparer) => keys.iter().any(|k| comparer(k, key)),
        }
    }

    fn remove(&mut self, key: &Value) -> bool {
        match self {
            Seen::Hashed(set) => set.remove(&HashKey(key.clone())),
            Seen::Compared(keys, comparer) => match keys.iter().position(|k| comparer(k, key)) {
                Some(i) => {
                    keys.remove(i);
                    true
                }
                None => false,
            },
        }
    }
}

struct SetStage {
    kind: SetKind,
    second: Arc<Vec<Value>>,
    key: Option<Selector>,
    seen: Seen,
    /// Keys of the second sequence, for intersect and except
    other: Option<Seen>,
}

impl SetStage {
    fn new(op: SetOperation) -> Self {
        let key = op.key;
        let other = matches!(op.kind, SetKind::Intersect | SetKind::Except).then(|| {
            let mut other = Seen::new(op.comparer.clone());
            for item in op.second.iter() {
                other.insert(key.as_ref().map_or_else(|| item.clone(), |k| k(item)));
            }
            other
        });
        SetStage {
            kind: op.kind,
            seen: Seen::new(op.comparer),
            second: op.second,
            key,
            other,
        }
    }

    fn key_of(&self, item: &Value) -> Value {
        match &self.key {
            Some(key) => key(item),
            None => item.clone(),
        }
    }
}

impl Stage for SetStage {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        let key = self.key_of(&item);
        let keep = match (&mut self.other, self.kind) {
            // An intersected key is emitted once, then forgotten
            (Some(other), SetKind::Intersect) => other.remove(&key),
            (Some(other), SetKind::Except) => !other.contains(&key) && self.seen.insert(key),
            _ => self.seen.insert(key),
        };
        if keep {
            out.push(item);
        }
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        if self.kind != SetKind::Union {
            return;
        }
        let second = Arc::clone(&self.second);
        for item in second.iter() {
            if self.seen.insert(self.key_of(item)) {
                out.push(item.clone());
            }
        }
    }
}

// ============================================================================
// Grouping and joining
// ============================================================================

struct GroupBy {
    key: Selector,
    element: Option<Selector>,
    result: Option<GroupResult>,
    groups: IndexMap<HashKey, Vec<Value>>,
}

impl Stage for GroupBy {
    fn accept(&mut self, item: Value, _out: &mut Vec<Value>) -> Flow {
        let key = (self.key)(&item);
        let element = match &self.element {
            Some(element) => element(&item),
            None => item,
        };
        self.groups.entry(HashKey(key)).or_default().push(element);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        for (key, items) in std::mem::take(&mut self.groups) {
            let key = key.into_inner();
            out.push(match &self.result {
                Some(result) => result(&key, &items),
                None => Value::object([("key", key), ("items", Value::Array(items))]),
            });
        }
    }
}

/// Inner equi-join. Null keys never match.
struct Join {
    inner: IndexMap<HashKey, Vec<Value>>,
    outer_key: Selector,
    result: Combiner,
}

impl Join {
    fn new(spec: JoinSpec) -> QueryResult<Self> {
        let (Some(outer_key), Some(inner_key), Some(result)) =
            (spec.outer_key, spec.inner_key, spec.result)
        else {
            return Err(PlanError::IncompleteJoin("key or result selector").into());
        };
        let mut inner: IndexMap<HashKey, Vec<Value>> = IndexMap::new();
        for item in spec.inner.iter() {
            let key = inner_key(item);
            if !matches!(key, Value::Null) {
                inner.entry(HashKey(key)).or_default().push(item.clone());
            }
        }
        Ok(Join {
            inner,
            outer_key,
            result,
        })
    }
}

impl Stage for Join {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        let key = (self.outer_key)(&item);
        if matches!(key, Value::Null) {
            return Flow::Continue;
        }
        if let Some(matches) = self.inner.get(&HashKey(key)) {
            out.extend(matches.iter().map(|inner| (self.result)(&item, inner)));
        }
        Flow::Continue
    }
}

// ============================================================================
// Sequence operations
// ============================================================================

struct Prepend(Option<Value>);

impl Stage for Prepend {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        if let Some(first) = self.0.take() {
            out.push(first);
        }
        out.push(item);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        out.extend(self.0.take());
    }
}

/// Append and concat: the tail follows the source.
struct Extend(Vec<Value>);

impl Stage for Extend {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        out.push(item);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        out.append(&mut self.0);
    }
}

struct DefaultIfEmpty {
    default: Option<Value>,
}

impl Stage for DefaultIfEmpty {
    fn accept(&mut self, item: Value, out: &mut Vec<Value>) -> Flow {
        self.default = None;
        out.push(item);
        Flow::Continue
    }

    fn finish(&mut self, out: &mut Vec<Value>) {
        out.extend(self.default.take());
    }
}

// ============================================================================
// Construction
// ============================================================================

fn sort(keys: Vec<(Selector, Direction)>) -> BoxedStage {
    Box::new(Sort {
        keys,
        items: Vec::new(),
    })
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn partition(partition: Partition) -> BoxedStage {
    match partition {
        Partition::Skip(n) => Box::new(Skip(n.max(0) as u64)),
        Partition::Take(n) => Box::new(Take(n.max(0) as u64)),
        Partition::SkipWhile(predicate) => Box::new(SkipWhile {
            predicate,
            skipping: true,
        }),
        Partition::TakeWhile(predicate) => Box::new(TakeWhile {
            predicate,
            taking: true,
        }),
        Partition::SkipLast(n) => Box::new(SkipLast {
            count: count(n),
            window: VecDeque::new(),
        }),
        Partition::TakeLast(n) => Box::new(TakeLast {
            count: count(n),
            window: VecDeque::new(),
        }),
        Partition::Chunk(n) => Box::new(Chunk {
            size: count(n).max(1),
            current: Vec::new(),
        }),
    }
}

fn group(grouping: Grouping) -> QueryResult<BoxedStage> {
    let Some(key) = grouping.key else {
        return Err(PlanError::MissingSelector(OperatorKind::GroupBy).into());
    };
    Ok(Box::new(GroupBy {
        key,
        element: grouping.element,
        result: grouping.result,
        groups: IndexMap::new(),
    }))
}

fn sequence(op: SequenceOp) -> BoxedStage {
    match op {
        SequenceOp::Append(value) => Box::new(Extend(vec![value])),
        SequenceOp::Prepend(value) => Box::new(Prepend(Some(value))),
        SequenceOp::Concat(items) => Box::new(Extend(items.as_ref().clone())),
    }
}

fn pagination(skip: u64, take: Option<u64>, stages: &mut Vec<BoxedStage>) {
    if skip > 0 {
        stages.push(Box::new(Skip(skip)));
    }
    if let Some(take) = take {
        stages.push(Box::new(Take(take)));
    }
}

/// Stages for a flat plan, in the fixed precedence order.
fn flat_stages(flat: &FlatFields, skip: u64, take: Option<u64>) -> QueryResult<Vec<BoxedStage>> {
    let flat = flat.clone();
    let mut stages: Vec<BoxedStage> = Vec::new();

    if let Some(kind) = flat.of_type {
        stages.push(Box::new(OfType(kind)));
    }
    if let Some(selector) = flat.flatten {
        stages.push(Box::new(FlatMap(selector)));
    }
    if let Some(spec) = flat.zip {
        stages.push(Box::new(Zip { spec, position: 0 }));
    }
    stages.extend(
        flat.predicates
            .into_iter()
            .map(|p| Box::new(Filter(p)) as BoxedStage),
    );
    if let Some(set) = flat.set {
        stages.push(Box::new(SetStage::new(set)));
    }
    if let Some(grouping) = flat.group {
        stages.push(group(grouping)?);
    }
    if let Some(spec) = flat.join {
        stages.push(Box::new(Join::new(spec)?));
    }
    stages.extend(flat.sequence.into_iter().map(sequence));
    if let Some(p) = flat.partition {
        stages.push(partition(p));
    }
    if !flat.sort.is_empty() {
        stages.push(sort(flat.sort));
    }
    if flat.reverse {
        stages.push(Box::new(Reverse::default()));
    }
    pagination(skip, take, &mut stages);
    if let Some(default) = flat.default_if_empty {
        stages.push(Box::new(DefaultIfEmpty {
            default: Some(default),
        }));
    }
    stages.extend(
        flat.projections
            .into_iter()
            .map(|s| Box::new(Map(s)) as BoxedStage),
    );
    Ok(stages)
}

/// Stages for a step plan. A sort absorbs the then-by steps that follow it.
fn step_stages<R>(plan: &Plan<R>) -> QueryResult<Vec<BoxedStage>> {
    let mut stages: Vec<BoxedStage> = Vec::new();
    let mut steps = plan.steps.iter().peekable();

    while let Some(step) = steps.next() {
        let stage: BoxedStage = match step.operator.clone() {
            Operator::Where(p) => Box::new(Filter(p)),
            Operator::Select(s) => Box::new(Map(s)),
            Operator::SelectMany(s) => Box::new(FlatMap(s)),
            Operator::OfType(kind) => Box::new(OfType(kind)),
            Operator::Zip(spec) => Box::new(Zip { spec, position: 0 }),
            Operator::OrderBy { keys, directions } => {
                let mut keys: Vec<_> = keys.into_iter().zip(directions).collect();
                while let Some(Operator::ThenBy { key, direction }) = steps.peek().map(|s| &s.operator) {
                    keys.push((key.clone(), *direction));
                    steps.next();
                }
                sort(keys)
            }
            Operator::ThenBy { .. } => {
                return Err(PlanError::ThenByWithoutOrderBy(step.kind).into());
            }
            Operator::Reverse => Box::new(Reverse::default()),
            Operator::Partition(p) => partition(p),
            Operator::Set(set) => Box::new(SetStage::new(set)),
            Operator::GroupBy(grouping) => group(grouping)?,
            Operator::Join(spec) => Box::new(Join::new(spec)?),
            Operator::Sequence(op) => sequence(op),
            Operator::DefaultIfEmpty(value) => Box::new(DefaultIfEmpty {
                default: Some(value),
            }),
            Operator::Terminal(_) => continue,
        };
        stages.push(stage);
    }
    pagination(plan.skip, plan.take, &mut stages);
    Ok(stages)
}

/// Fresh stage state for one run of `plan`.
pub fn build<R>(plan: &Plan<R>) -> QueryResult<Vec<BoxedStage>> {
    if plan.is_step_mode() {
        step_stages(plan)
    } else {
        flat_stages(&plan.flat, plan.skip, plan.take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(stage: &mut dyn Stage, items: Vec<Value>) -> (Vec<Value>, usize) {
        let mut out = Vec::new();
        let mut accepted = 0;
        for item in items {
            accepted += 1;
            if let Flow::Done = stage.accept(item, &mut out) {
                break;
            }
        }
        stage.finish(&mut out);
        (out, accepted)
    }

    fn ints(ns: &[i64]) -> Vec<Value> {
        ns.iter().map(|n| Value::Integer(*n)).collect()
    }

    #[test]
    fn test_take_signals_done_on_last_item() {
        let (out, accepted) = feed(&mut Take(2), ints(&[1, 2, 3, 4]));
        assert_eq!(out, ints(&[1, 2]));
        assert_eq!(accepted, 2);
    }

    #[test]
    fn test_sort_is_stable() {
        let items: Vec<Value> = [("a", 2), ("b", 1), ("c", 2), ("d", 1)]
            .iter()
            .map(|(n, k)| Value::object([("n", Value::from(*n)), ("k", Value::Integer(*k))]))
            .collect();
        let key: Selector = Arc::new(|v: &Value| v["k"].clone());
        let mut stage = sort(vec![(key, Direction::Ascending)]);
        let (out, _) = feed(stage.as_mut(), items);
        let names: Vec<_> = out.iter().map(|v| v["n"].as_str().unwrap_or("")).collect();
        assert_eq!(names, ["b", "d", "a", "c"]);
    }

    #[test]
    fn test_chunk_keeps_short_tail() {
        let (out, _) = feed(partition(Partition::Chunk(2)).as_mut(), ints(&[1, 2, 3]));
        assert_eq!(out, vec![Value::Array(ints(&[1, 2])), Value::Array(ints(&[3]))]);
    }

    #[test]
    fn test_last_n_partitions() {
        let (out, _) = feed(partition(Partition::SkipLast(2)).as_mut(), ints(&[1, 2, 3, 4]));
        assert_eq!(out, ints(&[1, 2]));
        let (out, _) = feed(partition(Partition::TakeLast(2)).as_mut(), ints(&[1, 2, 3, 4]));
        assert_eq!(out, ints(&[3, 4]));
        let (out, _) = feed(partition(Partition::TakeLast(0)).as_mut(), ints(&[1, 2]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_set_operations_keep_first_seen_order() {
        let second = Arc::new(ints(&[4, 2, 5]));
        let op = |kind| SetOperation {
            kind,
            second: Arc::clone(&second),
            key: None,
            comparer: None,
        };
        let input = || ints(&[3, 2, 3, 1, 2, 4]);

        let (out, _) = feed(&mut SetStage::new(op(SetKind::Distinct)), input());
        assert_eq!(out, ints(&[3, 2, 1, 4]));
        let (out, _) = feed(&mut SetStage::new(op(SetKind::Union)), input());
        assert_eq!(out, ints(&[3, 2, 1, 4, 5]));
        let (out, _) = feed(&mut SetStage::new(op(SetKind::Intersect)), input());
        assert_eq!(out, ints(&[2, 4]));
        let (out, _) = feed(&mut SetStage::new(op(SetKind::Except)), input());
        assert_eq!(out, ints(&[3, 1]));
    }

    #[test]
    fn test_zip_stops_at_shorter() {
        let mut stage = Zip {
            spec: ZipSpec {
                second: Arc::new(vec![Value::from("a")]),
                result: None,
            },
            position: 0,
        };
        let (out, accepted) = feed(&mut stage, ints(&[1, 2, 3]));
        assert_eq!(out, vec![Value::Array(vec![Value::Integer(1), Value::from("a")])]);
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_sequence_stages() {
        let (out, _) = feed(sequence(SequenceOp::Prepend(Value::Integer(0))).as_mut(), vec![]);
        assert_eq!(out, ints(&[0]));
        let (out, _) = feed(sequence(SequenceOp::Append(Value::Integer(9))).as_mut(), ints(&[1]));
        assert_eq!(out, ints(&[1, 9]));
        let mut stage = DefaultIfEmpty {
            default: Some(Value::Null),
        };
        let (out, _) = feed(&mut stage, ints(&[1]));
        assert_eq!(out, ints(&[1]));
    }
}
