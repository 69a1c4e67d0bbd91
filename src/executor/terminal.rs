//! Terminal operators: aggregations, quantifiers, element operators and
//! conversions.

use indexmap::{IndexMap, IndexSet, map::Entry};

use crate::{
    error::{LogicalError, QueryResult},
    executor::{
        Flow, Outcome,
        aggregate::{Accumulator, Number},
    },
    query::ast::{Comparer, ConversionKind, ElementKind, Folder, Predicate, Selector, Terminal},
    value::{HashKey, Value},
};

/// Keyed collection with unique keys, in insertion order.
pub type Dictionary = IndexMap<HashKey, Value>;

/// Materialized terminal collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    List(Vec<Value>),
    Array(Vec<Value>),
    Dictionary(Dictionary),
    Set(IndexSet<HashKey>),
    Lookup(Lookup),
}

impl Container {
    pub fn len(&self) -> usize {
        match self {
            Container::List(items) | Container::Array(items) => items.len(),
            Container::Dictionary(map) => map.len(),
            Container::Set(set) => set.len(),
            Container::Lookup(lookup) => lookup.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON rendering. Dictionaries with string keys become objects; any
    /// other dictionary becomes an array of `[key, value]` pairs.
    pub fn to_value(&self) -> Value {
        match self {
            Container::List(items) | Container::Array(items) => Value::Array(items.clone()),
            Container::Dictionary(map) => {
                if map.keys().all(|k| matches!(k.0, Value::String(_))) {
                    Value::Object(
                        map.iter()
                            .filter_map(|(k, v)| k.0.as_str().map(|k| (k.to_string(), v.clone())))
                            .collect(),
                    )
                } else {
                    Value::Array(
                        map.iter()
                            .map(|(k, v)| Value::Array(vec![k.0.clone(), v.clone()]))
                            .collect(),
                    )
                }
            }
            Container::Set(set) => Value::Array(set.iter().map(|k| k.0.clone()).collect()),
            Container::Lookup(lookup) => Value::Array(
                lookup
                    .iter()
                    .map(|(k, items)| {
                        Value::object([("key", k.clone()), ("items", Value::Array(items.to_vec()))])
                    })
                    .collect(),
            ),
        }
    }
}

/// One-to-many keyed collection. Absent keys yield an empty group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    groups: IndexMap<HashKey, Vec<Value>>,
}

impl Lookup {
    pub fn get(&self, key: &Value) -> &[Value] {
        self.groups
            .get(&HashKey(key.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.groups.contains_key(&HashKey(key.clone()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &[Value])> {
        self.groups.iter().map(|(k, v)| (&k.0, v.as_slice()))
    }
}

fn select(selector: &Option<Selector>, item: Value) -> Value {
    match selector {
        Some(selector) => selector(&item),
        None => item,
    }
}

fn equals(comparer: &Option<Comparer>, a: &Value, b: &Value) -> bool {
    match comparer {
        Some(comparer) => comparer(a, b),
        None => a.loose_eq(b),
    }
}

fn matches(predicate: &Option<Predicate>, item: &Value) -> bool {
    predicate.as_ref().is_none_or(|p| p(item))
}

enum State {
    Count {
        predicate: Option<Predicate>,
        long: bool,
        count: u64,
    },
    Numeric(Accumulator),
    Extreme {
        selector: Option<Selector>,
        max: bool,
        best: Option<(Value, Value)>,
    },
    Fold {
        acc: Value,
        folder: Folder,
    },
    All {
        predicate: Predicate,
        result: bool,
    },
    Any {
        predicate: Option<Predicate>,
        result: bool,
    },
    Contains {
        value: Value,
        comparer: Option<Comparer>,
        found: bool,
    },
    SequenceEqual {
        second: std::sync::Arc<Vec<Value>>,
        comparer: Option<Comparer>,
        position: usize,
        equal: bool,
    },
    Element {
        kind: ElementKind,
        predicate: Option<Predicate>,
        or_default: bool,
        found: Option<Value>,
    },
    ElementAt {
        index: i64,
        or_default: bool,
        position: i64,
        found: Option<Value>,
    },
    Convert {
        key: Option<Selector>,
        element: Option<Selector>,
        container: Container,
    },
}

/// Consumes the pipeline's output for one terminal operator.
pub struct Collector {
    state: State,
}

impl Collector {
    pub fn new(terminal: &Terminal) -> Self {
        let state = match terminal.clone() {
            Terminal::Count { predicate, long } => State::Count {
                predicate,
                long,
                count: 0,
            },
            Terminal::Numeric {
                aggregate,
                selector,
                numeric,
            } => State::Numeric(Accumulator::new(aggregate, numeric, selector)),
            Terminal::MinBy(selector) => State::Extreme {
                selector,
                max: false,
                best: None,
            },
            Terminal::MaxBy(selector) => State::Extreme {
                selector,
                max: true,
                best: None,
            },
            Terminal::Fold { seed, folder } => State::Fold { acc: seed, folder },
            Terminal::All(predicate) => State::All {
                predicate,
                result: true,
            },
            Terminal::Any(predicate) => State::Any {
                predicate,
                result: false,
            },
            Terminal::Contains { value, comparer } => State::Contains {
                value,
                comparer,
                found: false,
            },
            Terminal::SequenceEqual { second, comparer } => State::SequenceEqual {
                second,
                comparer,
                position: 0,
                equal: true,
            },
            Terminal::Element {
                kind,
                predicate,
                or_default,
            } => State::Element {
                kind,
                predicate,
                or_default,
                found: None,
            },
            Terminal::ElementAt { index, or_default } => State::ElementAt {
                index,
                or_default,
                position: 0,
                found: None,
            },
            Terminal::Convert { kind, key, element } => State::Convert {
                key,
                element,
                container: match kind {
                    ConversionKind::List => Container::List(Vec::new()),
                    ConversionKind::Array => Container::Array(Vec::new()),
                    ConversionKind::Dictionary => Container::Dictionary(IndexMap::new()),
                    ConversionKind::HashSet => Container::Set(IndexSet::new()),
                    ConversionKind::Lookup => Container::Lookup(Lookup::default()),
                },
            },
        };
        Collector { state }
    }

    /// Feed one element. `Flow::Done` means the outcome is already known.
    pub fn accept(&mut self, item: Value) -> QueryResult<Flow> {
        match &mut self.state {
            State::Count { predicate, long, count } => {
                if matches(predicate, &item) {
                    *count += 1;
                    if !*long && *count > i32::MAX as u64 {
                        return Err(LogicalError::Overflow("Count").into());
                    }
                }
            }
            State::Numeric(acc) => acc.accept(&item)?,
            State::Extreme { selector, max, best } => {
                let key = match selector {
                    Some(selector) => selector(&item),
                    None => item.clone(),
                };
                let better = match best {
                    None => true,
                    Some((current, _)) => {
                        let ord = key.total_cmp(current);
                        if *max { ord.is_gt() } else { ord.is_lt() }
                    }
                };
                if better {
                    *best = Some((key, item));
                }
            }
            State::Fold { acc, folder } => {
                let current = std::mem::take(acc);
                *acc = folder(current, &item);
            }
            State::All { predicate, result } => {
                if !predicate(&item) {
                    *result = false;
                    return Ok(Flow::Done);
                }
            }
            State::Any { predicate, result } => {
                if matches(predicate, &item) {
                    *result = true;
                    return Ok(Flow::Done);
                }
            }
            State::Contains { value, comparer, found } => {
                if equals(comparer, value, &item) {
                    *found = true;
                    return Ok(Flow::Done);
                }
            }
            State::SequenceEqual {
                second,
                comparer,
                position,
                equal,
            } => {
                let same = second
                    .get(*position)
                    .is_some_and(|other| equals(comparer, &item, other));
                *position += 1;
                if !same {
                    *equal = false;
                    return Ok(Flow::Done);
                }
            }
            State::Element {
                kind,
                predicate,
                found,
                ..
            } => {
                if matches(predicate, &item) {
                    match kind {
                        ElementKind::First => {
                            *found = Some(item);
                            return Ok(Flow::Done);
                        }
                        ElementKind::Last => *found = Some(item),
                        ElementKind::Single => {
                            if found.is_some() {
                                return Err(if predicate.is_some() {
                                    LogicalError::MoreThanOneMatch
                                } else {
                                    LogicalError::MoreThanOneElement
                                }
                                .into());
                            }
                            *found = Some(item);
                        }
                    }
                }
            }
            State::ElementAt {
                index,
                position,
                found,
                ..
            } => {
                if *position == *index {
                    *found = Some(item);
                    return Ok(Flow::Done);
                }
                *position += 1;
            }
            State::Convert {
                key,
                element,
                container,
            } => match container {
                Container::List(items) | Container::Array(items) => items.push(item),
                Container::Set(set) => {
                    set.insert(HashKey(item));
                }
                Container::Dictionary(map) => {
                    let k = select(key, item.clone());
                    match map.entry(HashKey(k)) {
                        Entry::Occupied(entry) => {
                            return Err(LogicalError::DuplicateKey(entry.key().0.to_string()).into());
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(select(element, item));
                        }
                    }
                }
                Container::Lookup(lookup) => {
                    let k = select(key, item.clone());
                    lookup
                        .groups
                        .entry(HashKey(k))
                        .or_default()
                        .push(select(element, item));
                }
            },
        }
        Ok(Flow::Continue)
    }

    pub fn finish<S>(self) -> QueryResult<Outcome<S>> {
        Ok(match self.state {
            State::Count { long, count, .. } => Outcome::Number(if long {
                Number::Int64(count as i64)
            } else {
                Number::Int32(count as i32)
            }),
            State::Numeric(acc) => Outcome::Number(acc.finish()?),
            State::Extreme { best, .. } => match best {
                Some((_, item)) => Outcome::Value(item),
                None => return Err(LogicalError::NoElements.into()),
            },
            State::Fold { acc, .. } => Outcome::Value(acc),
            State::All { result, .. } | State::Any { result, .. } => Outcome::Boolean(result),
            State::Contains { found, .. } => Outcome::Boolean(found),
            State::SequenceEqual {
                second,
                position,
                equal,
                ..
            } => Outcome::Boolean(equal && position == second.len()),
            State::Element {
                predicate,
                or_default,
                found,
                ..
            } => match found {
                Some(item) => Outcome::Value(item),
                None if or_default => Outcome::Value(Value::Null),
                None if predicate.is_some() => return Err(LogicalError::NoMatch.into()),
                None => return Err(LogicalError::NoElements.into()),
            },
            State::ElementAt {
                index,
                or_default,
                found,
                ..
            } => match found {
                Some(item) => Outcome::Value(item),
                None if or_default => Outcome::Value(Value::Null),
                None => return Err(LogicalError::IndexOutOfRange(index).into()),
            },
            State::Convert { container, .. } => Outcome::Container(container),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::QueryError;

    fn collect(terminal: Terminal, items: Vec<Value>) -> QueryResult<Outcome<()>> {
        let mut collector = Collector::new(&terminal);
        for item in items {
            if let Flow::Done = collector.accept(item)? {
                break;
            }
        }
        collector.finish()
    }

    fn convert(kind: ConversionKind) -> Terminal {
        Terminal::Convert {
            kind,
            key: Some(Arc::new(|v: &Value| v["k"].clone())),
            element: None,
        }
    }

    fn pair(k: &str, n: i64) -> Value {
        Value::object([("k", Value::from(k)), ("n", Value::Integer(n))])
    }

    #[test]
    fn test_dictionary_rejects_duplicate_key() {
        let err = collect(convert(ConversionKind::Dictionary), vec![pair("a", 1), pair("a", 2)]).unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::DuplicateKey(ref k)) if k == "\"a\""));
    }

    #[test]
    fn test_lookup_groups_duplicates() {
        let outcome = collect(convert(ConversionKind::Lookup), vec![pair("a", 1), pair("a", 2)]).unwrap();
        let Some(Container::Lookup(lookup)) = outcome.container() else {
            panic!("expected lookup");
        };
        assert_eq!(lookup.get(&Value::from("a")).len(), 2);
        assert!(lookup.get(&Value::from("missing")).is_empty());
    }

    #[test]
    fn test_single_fails_on_second_match() {
        let single = Terminal::Element {
            kind: ElementKind::Single,
            predicate: None,
            or_default: true,
        };
        let err = collect(single, vec![Value::Integer(1), Value::Integer(2)]).unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::MoreThanOneElement)));
    }

    #[test]
    fn test_element_defaults() {
        let first = Terminal::Element {
            kind: ElementKind::First,
            predicate: None,
            or_default: true,
        };
        assert_eq!(collect(first, vec![]).unwrap().value(), Some(&Value::Null));

        let at = Terminal::ElementAt {
            index: 3,
            or_default: false,
        };
        let err = collect(at, vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::IndexOutOfRange(3))));
    }

    #[test]
    fn test_sequence_equal_checks_length() {
        let terminal = |items: Vec<i64>| Terminal::SequenceEqual {
            second: Arc::new(items.into_iter().map(Value::Integer).collect()),
            comparer: None,
        };
        let input = || vec![Value::Integer(1), Value::Float(2.0)];
        assert_eq!(collect(terminal(vec![1, 2]), input()).unwrap().boolean(), Some(true));
        assert_eq!(collect(terminal(vec![1, 2, 3]), input()).unwrap().boolean(), Some(false));
        assert_eq!(collect(terminal(vec![1]), input()).unwrap().boolean(), Some(false));
    }

    #[test]
    fn test_max_by_keeps_first_of_ties() {
        let terminal = Terminal::MaxBy(Some(Arc::new(|v: &Value| v["n"].clone())));
        let outcome = collect(terminal, vec![pair("a", 2), pair("b", 2), pair("c", 1)]).unwrap();
        assert_eq!(outcome.value(), Some(&pair("a", 2)));
    }
}
