//! Path matching over tokenizer events.
//!
//! The matcher keeps one frame per open container it is navigating. Each
//! frame holds the positions that reached the container (see
//! [`eval`](crate::path::eval)). A child whose positions come out empty is
//! skipped without decoding. A child that is itself selected, that a filter
//! has to look at, or whose selection needs the whole container, is captured
//! into a `Value` and handed to the same walker the materialized evaluator
//! uses.

use std::collections::VecDeque;

use crate::{
    json::{Event, ValueBuilder},
    path::{
        PathQuery,
        ast::{Segment, Selector},
        eval::{ChildKey, Transition, Walker},
    },
    value::Value,
};

struct Frame {
    positions: Vec<usize>,
    is_array: bool,
    next_index: usize,
    /// Member name read but whose value has not started yet
    name: Option<String>,
}

impl Frame {
    fn next_key(&mut self) -> Option<ChildKeyOwned> {
        if self.is_array {
            let index = self.next_index;
            self.next_index += 1;
            Some(ChildKeyOwned::Index(index))
        } else {
            self.name.take().map(ChildKeyOwned::Name)
        }
    }
}

enum ChildKeyOwned {
    Name(String),
    Index(usize),
}

impl ChildKeyOwned {
    fn as_key(&self) -> ChildKey<'_> {
        match self {
            ChildKeyOwned::Name(name) => ChildKey::Name(name),
            ChildKeyOwned::Index(index) => ChildKey::Index(*index),
        }
    }
}

struct Capture {
    builder: ValueBuilder,
    transition: Transition,
}

pub struct StreamMatcher {
    segments: Vec<Segment>,
    ignore_case: bool,
    unwrap_root: bool,
    started: bool,
    frames: Vec<Frame>,
    /// Open containers left in the subtree being skipped
    skip_depth: usize,
    capture: Option<Capture>,
}

impl StreamMatcher {
    /// Select the nodes `path` matches.
    pub fn new(path: &PathQuery, ignore_case: bool) -> Self {
        Self::build(path.segments.clone(), ignore_case, false)
    }

    /// Without a path: the items of a root array, or any other root as a
    /// single element.
    pub fn unwrap_root(ignore_case: bool) -> Self {
        Self::build(Vec::new(), ignore_case, true)
    }

    fn build(segments: Vec<Segment>, ignore_case: bool, unwrap_root: bool) -> Self {
        StreamMatcher {
            segments,
            ignore_case,
            unwrap_root,
            started: false,
            frames: Vec::new(),
            skip_depth: 0,
            capture: None,
        }
    }

    /// Whether the next event must be decoded.
    ///
    /// False while inside a pruned subtree, and when the upcoming child is
    /// already known to be pruned from its key alone.
    pub fn wants_decode(&self) -> bool {
        if self.skip_depth > 0 {
            return false;
        }
        if self.capture.is_some() {
            return true;
        }
        let Some(frame) = self.frames.last() else {
            return true;
        };
        let walker = Walker::new(&self.segments, self.ignore_case);
        let key = if frame.is_array {
            ChildKey::Index(frame.next_index)
        } else {
            match &frame.name {
                Some(name) => ChildKey::Name(name),
                None => return true,
            }
        };
        !walker.step(&frame.positions, key, None).is_empty()
    }

    /// Consume one event, appending any selected nodes to `out`.
    pub fn push(&mut self, event: Event, out: &mut VecDeque<Value>) {
        if self.skip_depth > 0 {
            match event {
                Event::StartObject | Event::StartArray => self.skip_depth += 1,
                Event::EndObject | Event::EndArray => self.skip_depth -= 1,
                _ => {}
            }
            return;
        }

        if let Some(capture) = &mut self.capture {
            if let Some(value) = capture.builder.push(event)
                && let Some(capture) = self.capture.take()
            {
                self.emit(value, capture.transition, out);
            }
            return;
        }

        match event {
            Event::Name(name) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.name = Some(name);
                }
                return;
            }
            Event::EndObject | Event::EndArray => {
                self.frames.pop();
                return;
            }
            _ => {}
        }

        if !self.started {
            self.started = true;
            if self.unwrap_root && event == Event::StartArray {
                self.segments = vec![Segment {
                    descendant: false,
                    selectors: vec![Selector::Wildcard],
                }];
            }
        }

        let walker = Walker::new(&self.segments, self.ignore_case);
        let transition = match self.frames.last_mut() {
            None => Transition {
                positions: vec![0],
                pending: vec![],
            },
            Some(frame) => {
                let Some(key) = frame.next_key() else {
                    return;
                };
                let child = match &event {
                    Event::Scalar(value) => Some(value),
                    _ => None,
                };
                walker.step(&frame.positions, key.as_key(), child)
            }
        };

        match event {
            Event::Scalar(value) => {
                if walker.is_match(&transition.positions) {
                    out.push_back(value);
                }
            }
            Event::StartObject | Event::StartArray => {
                let is_array = event == Event::StartArray;
                if transition.is_empty() {
                    self.skip_depth = 1;
                } else if walker.is_match(&transition.positions)
                    || !transition.pending.is_empty()
                    || walker.needs_whole(&transition.positions)
                {
                    let mut builder = ValueBuilder::new();
                    builder.push(event);
                    self.capture = Some(Capture {
                        builder,
                        transition,
                    });
                } else {
                    self.frames.push(Frame {
                        positions: transition.positions,
                        is_array,
                        next_index: 0,
                        name: None,
                    });
                }
            }
            // A scalar read in skip mode
            _ => {}
        }
    }

    fn emit(&self, value: Value, transition: Transition, out: &mut VecDeque<Value>) {
        let walker = Walker::new(&self.segments, self.ignore_case);
        let positions = walker.resolve(transition, &value);
        if positions.is_empty() {
            return;
        }
        // Only the final position: nothing below can match.
        if positions.len() == 1 && walker.is_match(&positions) {
            out.push_back(value);
            return;
        }
        let mut found = Vec::new();
        walker.walk(&value, &positions, &mut found);
        out.extend(found.into_iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::{Next, Tokenizer};

    fn stream(path: Option<&str>, text: &str, chunk: usize) -> Vec<Value> {
        let mut matcher = match path {
            Some(p) => StreamMatcher::new(&PathQuery::compile(p).unwrap(), false),
            None => StreamMatcher::unwrap_root(false),
        };
        let mut tokenizer = Tokenizer::new(48);
        let mut chunks = text.as_bytes().chunks(chunk);
        let mut out = VecDeque::new();
        loop {
            match tokenizer.next(matcher.wants_decode()).unwrap() {
                Next::Event(event) => matcher.push(event, &mut out),
                Next::NeedMore => match chunks.next() {
                    Some(c) => tokenizer.feed(c),
                    None => tokenizer.finish(),
                },
                Next::Done => return out.into_iter().collect(),
            }
        }
    }

    fn materialized(path: &str, text: &str) -> Vec<Value> {
        let root = crate::convert::decode_slice(text.as_bytes(), 48).unwrap();
        PathQuery::compile(path)
            .unwrap()
            .select(&root)
            .into_iter()
            .cloned()
            .collect()
    }

    const STORE: &str = r#"{"store": {"book": [
        {"title": "A", "price": 8.95, "tags": ["x"]},
        {"title": "B", "price": 12.99, "tags": []},
        {"title": "C", "price": 22.99, "tags": ["y", "z"]}
    ], "bicycle": {"price": 19.95}}}"#;

    #[test]
    fn test_agrees_with_materialized() {
        for path in [
            "$",
            "$.store.book[*].title",
            "$..price",
            "$.store.book[-1]",
            "$.store.book[0:2]",
            "$.store.book[::-1].title",
            "$.store.book[?@.price < 13].title",
            "$..book[?length(@.tags) > 0]",
            "$.store['bicycle', 'book'][0]",
            "$..*",
        ] {
            for chunk in [1, 7, 4096] {
                assert_eq!(stream(Some(path), STORE, chunk), materialized(path, STORE), "{}", path);
            }
        }
    }

    #[test]
    fn test_unwrap_root() {
        assert_eq!(stream(None, "[1, {\"a\": 2}]", 3), vec![
            Value::Integer(1),
            Value::object([("a", Value::Integer(2))]),
        ]);
        assert_eq!(stream(None, "{\"a\": 2}", 3), vec![Value::object([("a", Value::Integer(2))])]);
    }
}
