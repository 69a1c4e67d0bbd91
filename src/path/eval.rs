//! Path evaluation over decoded values.
//!
//! Evaluation tracks, for every node, the set of segment *positions* that
//! reached it: position `k` means segments `0..k` have matched on the way
//! down. The root starts at `{0}` and a node is selected when its set holds
//! `segments.len()`.
//!
//! Segments whose selection can be decided one child at a time (a single
//! name, wildcard, non-negative index or slice, or filter) advance through
//! [`Walker::step`]. The streaming matcher uses the same function, so both
//! evaluators agree on what is selected and in which order. Other segments
//! (unions, negative indices, reversed slices) need the whole parent and are
//! applied by [`Walker::walk`] once the node is fully known.

use std::{borrow::Cow, cmp::Ordering, sync::Arc};

use crate::{
    path::ast::{
        CompareOp, Comparable, FilterExpr, Function, FunctionCall, PatternSlot, RelativePath,
        Segment, Selector,
    },
    value::Value,
};

/// How a child is addressed within its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKey<'k> {
    Name(&'k str),
    Index(usize),
}

/// Positions reached by a child, plus filters that must see the child
/// before the position after them counts.
#[derive(Debug, Default)]
pub struct Transition {
    pub positions: Vec<usize>,
    pub pending: Vec<(usize, Arc<FilterExpr>)>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Walker<'q> {
    segments: &'q [Segment],
    ignore_case: bool,
}

impl<'q> Walker<'q> {
    pub fn new(segments: &'q [Segment], ignore_case: bool) -> Self {
        Walker {
            segments,
            ignore_case,
        }
    }

    /// True when the node reached with `positions` is selected.
    pub fn is_match(&self, positions: &[usize]) -> bool {
        positions.contains(&self.segments.len())
    }

    /// True when some active segment must see the whole node before it can
    /// select children.
    pub fn needs_whole(&self, positions: &[usize]) -> bool {
        positions
            .iter()
            .any(|&k| self.segments.get(k).is_some_and(|s| !s.is_streamable()))
    }

    /// Positions of a child given its parent's positions.
    ///
    /// When `child` is `None` filter selectors cannot be decided yet and are
    /// returned as pending.
    pub fn step(&self, parent: &[usize], key: ChildKey<'_>, child: Option<&Value>) -> Transition {
        let mut transition = Transition::default();

        for &k in parent {
            let Some(segment) = self.segments.get(k) else {
                continue;
            };
            if segment.descendant {
                transition.positions.push(k);
            }
            if !segment.is_streamable() {
                continue;
            }
            match &segment.selectors[0] {
                Selector::Filter(expr) => match child {
                    Some(value) => {
                        if self.test(expr, value) {
                            transition.positions.push(k + 1);
                        }
                    }
                    None => transition.pending.push((k + 1, expr.clone())),
                },
                selector => {
                    if self.selects_key(selector, key) {
                        transition.positions.push(k + 1);
                    }
                }
            }
        }

        transition.positions.sort_unstable();
        transition.positions.dedup();
        let positions = &transition.positions;
        transition.pending.retain(|(k, _)| !positions.contains(k));
        transition
    }

    /// Settle pending filters against the now-known child.
    pub fn resolve(&self, mut transition: Transition, child: &Value) -> Vec<usize> {
        for (k, expr) in transition.pending.drain(..) {
            if self.test(&expr, child) {
                transition.positions.push(k);
            }
        }
        transition.positions.sort_unstable();
        transition.positions.dedup();
        transition.positions
    }

    fn selects_key(&self, selector: &Selector, key: ChildKey<'_>) -> bool {
        match (selector, key) {
            (Selector::Wildcard, _) => true,
            (Selector::Name(name), ChildKey::Name(member)) => {
                name == member || (self.ignore_case && name.eq_ignore_ascii_case(member))
            }
            (Selector::Index(i), ChildKey::Index(j)) => *i >= 0 && *i as usize == j,
            (Selector::Slice { start, end, step }, ChildKey::Index(j)) => {
                let step = step.unwrap_or(1);
                let start = start.unwrap_or(0);
                let j = j as i64;
                step > 0 && j >= start && end.is_none_or(|e| j < e) && (j - start) % step == 0
            }
            _ => false,
        }
    }

    /// Select from `node` reached with `positions`, appending in document
    /// pre-order.
    pub fn walk<'a>(&self, node: &'a Value, positions: &[usize], out: &mut Vec<&'a Value>) {
        if self.is_match(positions) {
            out.push(node);
        }

        for &k in positions {
            let Some(segment) = self.segments.get(k) else {
                continue;
            };
            if segment.is_streamable() {
                continue;
            }
            for selector in &segment.selectors {
                for child in self.select_children(node, selector) {
                    self.walk(child, &[k + 1], out);
                }
            }
        }

        match node {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let next = self.step(positions, ChildKey::Index(i), Some(item));
                    if !next.positions.is_empty() {
                        self.walk(item, &next.positions, out);
                    }
                }
            }
            Value::Object(members) => {
                for (name, member) in members {
                    let next = self.step(positions, ChildKey::Name(name), Some(member));
                    if !next.positions.is_empty() {
                        self.walk(member, &next.positions, out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Children picked by one selector, in selector order.
    fn select_children<'a>(&self, node: &'a Value, selector: &Selector) -> Vec<&'a Value> {
        match (selector, node) {
            (Selector::Name(name), _) => {
                let found = if self.ignore_case {
                    node.get_ignore_case(name)
                } else {
                    node.get(name)
                };
                found.into_iter().collect()
            }
            (Selector::Wildcard, Value::Array(items)) => items.iter().collect(),
            (Selector::Wildcard, Value::Object(members)) => members.values().collect(),
            (Selector::Index(i), Value::Array(items)) => normalize(*i, items.len())
                .and_then(|i| items.get(i))
                .into_iter()
                .collect(),
            (Selector::Slice { start, end, step }, Value::Array(items)) => {
                slice_indices(items.len(), *start, *end, *step)
                    .into_iter()
                    .map(|i| &items[i])
                    .collect()
            }
            (Selector::Filter(expr), Value::Array(items)) => {
                items.iter().filter(|item| self.test(expr, item)).collect()
            }
            (Selector::Filter(expr), Value::Object(members)) => {
                members.values().filter(|member| self.test(expr, member)).collect()
            }
            _ => vec![],
        }
    }

    /// Evaluate a filter expression with `current` bound to `@`.
    pub fn test(&self, expr: &FilterExpr, current: &Value) -> bool {
        match expr {
            FilterExpr::Or(left, right) => self.test(left, current) || self.test(right, current),
            FilterExpr::And(left, right) => self.test(left, current) && self.test(right, current),
            FilterExpr::Not(inner) => !self.test(inner, current),
            FilterExpr::Comparison { left, op, right } => {
                let left = self.operand(left, current);
                let right = self.operand(right, current);
                compare(left.as_deref(), *op, right.as_deref())
            }
            FilterExpr::Exists(path) => !self.relative(path, current).is_empty(),
            FilterExpr::Test(call) => self.pattern_test(call, current),
        }
    }

    fn relative<'a>(&self, path: &RelativePath, current: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        Walker::new(&path.segments, self.ignore_case).walk(current, &[0], &mut out);
        out
    }

    /// Value of a comparison operand; `None` when a path selects nothing or
    /// more than one node.
    fn operand<'a>(&self, operand: &'a Comparable, current: &'a Value) -> Option<Cow<'a, Value>> {
        match operand {
            Comparable::Literal(value) => Some(Cow::Borrowed(value)),
            Comparable::Path(path) => match self.relative(path, current).as_slice() {
                [single] => Some(Cow::Borrowed(*single)),
                _ => None,
            },
            Comparable::Function(call) => self.call(call, current),
        }
    }

    fn call<'a>(&self, call: &'a FunctionCall, current: &'a Value) -> Option<Cow<'a, Value>> {
        match call.function {
            Function::Length => {
                let arg = self.operand(call.args.first()?, current)?;
                let len = match arg.as_ref() {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(members) => members.len(),
                    _ => return None,
                };
                Some(Cow::Owned(Value::from(len)))
            }
            Function::Count => match call.args.first()? {
                Comparable::Path(path) => Some(Cow::Owned(Value::from(self.relative(path, current).len()))),
                _ => None,
            },
            Function::Match | Function::Search => {
                Some(Cow::Owned(Value::Boolean(self.pattern_test(call, current))))
            }
        }
    }

    fn pattern_test(&self, call: &FunctionCall, current: &Value) -> bool {
        let Some(subject) = call.args.first().and_then(|arg| self.operand(arg, current)) else {
            return false;
        };
        let Some(text) = subject.as_str() else {
            return false;
        };

        match &call.pattern {
            PatternSlot::Compiled(pattern) => pattern.is_match(text),
            PatternSlot::Dynamic(engine) => {
                let Some(source) = call.args.get(1).and_then(|arg| self.operand(arg, current)) else {
                    return false;
                };
                let Some(source) = source.as_str() else {
                    return false;
                };
                match engine.compile(source, call.function == Function::Match) {
                    Ok(pattern) => pattern.is_match(text),
                    Err(message) => {
                        tracing::debug!(pattern = source, %message, "dynamic pattern failed to compile");
                        false
                    }
                }
            }
            PatternSlot::None => false,
        }
    }
}

/// Compare two operands. Missing operands only equal each other, and values
/// of different types are never ordered.
fn compare(left: Option<&Value>, op: CompareOp, right: Option<&Value>) -> bool {
    let (a, b) = match (left, right) {
        (None, None) => {
            return matches!(op, CompareOp::Equal | CompareOp::LessEqual | CompareOp::GreaterEqual);
        }
        (Some(a), Some(b)) => (a, b),
        _ => return op == CompareOp::NotEqual,
    };

    match op {
        CompareOp::Equal => a.loose_eq(b),
        CompareOp::NotEqual => !a.loose_eq(b),
        CompareOp::Less => less(a, b),
        CompareOp::LessEqual => less(a, b) || a.loose_eq(b),
        CompareOp::Greater => less(b, a),
        CompareOp::GreaterEqual => less(b, a) || a.loose_eq(b),
    }
}

fn less(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_))
        | (Value::String(_), Value::String(_)) => a.total_cmp(b) == Ordering::Less,
        _ => false,
    }
}

/// Resolve a possibly negative index against `len`.
fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Indices selected by `[start:end:step]` over an array of `len` items.
///
/// Bounds are clamped to the array, so out-of-range slices select nothing
/// instead of failing. A zero step selects nothing.
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    end: Option<i64>,
    step: Option<i64>,
) -> Vec<usize> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    let resolve = |i: i64| if i >= 0 { i } else { len + i };

    let mut indices = Vec::new();
    match step.cmp(&0) {
        Ordering::Equal => {}
        Ordering::Greater => {
            let lower = start.map_or(0, resolve).clamp(0, len);
            let upper = end.map_or(len, resolve).clamp(0, len);
            let mut i = lower;
            while i < upper {
                indices.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        }
        Ordering::Less => {
            let upper = start.map_or(len - 1, resolve).clamp(-1, len - 1);
            let lower = end.map_or(-1, resolve).clamp(-1, len - 1);
            let mut i = upper;
            while lower < i {
                indices.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        }
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-1)), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None), Vec::<usize>::new());
        assert_eq!(slice_indices(5, None, None, Some(0)), Vec::<usize>::new());
        assert_eq!(slice_indices(5, Some(-100), Some(2), None), vec![0, 1]);
    }

    #[test]
    fn test_slice_indices_extreme_steps() {
        assert_eq!(slice_indices(3, Some(1), None, Some(i64::MAX)), vec![1]);
        assert_eq!(slice_indices(3, Some(-2), None, Some(i64::MAX)), vec![1]);
        assert_eq!(slice_indices(3, None, None, Some(i64::MIN)), vec![2]);
        assert_eq!(slice_indices(3, Some(i64::MIN), Some(i64::MAX), Some(1)), vec![0, 1, 2]);
    }

    #[test]
    fn test_mismatched_types_never_order() {
        let one = Value::Integer(1);
        let text = Value::from("1");
        assert!(!compare(Some(&one), CompareOp::Less, Some(&text)));
        assert!(!compare(Some(&one), CompareOp::Equal, Some(&text)));
        assert!(compare(Some(&one), CompareOp::NotEqual, Some(&text)));
        assert!(compare(None, CompareOp::NotEqual, Some(&one)));
        assert!(compare(None, CompareOp::Equal, None));
    }
}
