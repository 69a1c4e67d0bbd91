use indexmap::IndexMap;

use crate::{json::tokenizer::Event, value::Value};

enum Partial {
    Array(Vec<Value>),
    Object(IndexMap<String, Value>, Option<String>),
}

/// Assembles a `Value` from decode-mode tokenizer events.
///
/// Feed the events of exactly one value, starting with its first event.
/// [`push`](Self::push) returns the value once it is complete.
#[derive(Default)]
pub struct ValueBuilder {
    stack: Vec<Partial>,
}

impl ValueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_building(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn push(&mut self, event: Event) -> Option<Value> {
        let value = match event {
            Event::StartObject => {
                self.stack.push(Partial::Object(IndexMap::new(), None));
                return None;
            }
            Event::StartArray => {
                self.stack.push(Partial::Array(Vec::new()));
                return None;
            }
            Event::Name(name) => {
                if let Some(Partial::Object(_, pending)) = self.stack.last_mut() {
                    *pending = Some(name);
                }
                return None;
            }
            Event::EndObject | Event::EndArray => match self.stack.pop()? {
                Partial::Array(items) => Value::Array(items),
                Partial::Object(members, _) => Value::Object(members),
            },
            Event::Scalar(value) => value,
            Event::Skipped => Value::Null,
        };

        match self.stack.last_mut() {
            None => Some(value),
            Some(Partial::Array(items)) => {
                items.push(value);
                None
            }
            Some(Partial::Object(members, pending)) => {
                if let Some(name) = pending.take() {
                    members.insert(name, value);
                }
                None
            }
        }
    }
}
