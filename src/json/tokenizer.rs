//! Incremental JSON tokenizer.
//!
//! Bytes are fed in arbitrary fragments with [`Tokenizer::feed`]; events are
//! pulled with [`Tokenizer::next`]. A token split across fragments is not
//! consumed until it is complete, so callers simply feed more bytes when
//! [`Next::NeedMore`] comes back. Scanning of a split string or number
//! resumes where it stopped, so every byte is scanned once.
//!
//! Pulling with `decode = false` still validates structure but does not
//! build strings or numbers; scalars and member names come back as
//! [`Event::Skipped`]. The path matcher uses this to step over pruned
//! subtrees.

use std::mem;

use crate::{error::DecodeError, value::Value};

/// Once this many consumed bytes sit at the front of the buffer they are
/// dropped on the next feed.
const COMPACT_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Name(String),
    Scalar(Value),
    /// A scalar or member name read in skip mode
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Event(Event),
    /// The buffered bytes end inside a token
    NeedMore,
    /// The root value is complete and only whitespace followed
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// After `[`
    ValueOrEnd,
    /// After `{`
    NameOrEnd,
    /// After `,` in an object
    Name,
    Colon,
    CommaOrEnd,
    /// The root value is complete
    End,
}

/// How far a string or number running past the buffered bytes was scanned.
#[derive(Debug, Clone, Copy, Default)]
struct Partial {
    /// Bytes past the token start
    scanned: usize,
    /// A backslash escape was seen
    escaped: bool,
}

pub struct Tokenizer {
    buf: Vec<u8>,
    pos: usize,
    /// Resume point of the token starting at `pos`
    partial: Partial,
    /// Bytes dropped from the front of `buf` so far
    discarded: u64,
    stack: Vec<Container>,
    expect: Expect,
    finished: bool,
    preview_len: usize,
}

impl Tokenizer {
    pub fn new(preview_len: usize) -> Self {
        Tokenizer {
            buf: Vec::new(),
            pos: 0,
            partial: Partial::default(),
            discarded: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            finished: false,
            preview_len,
        }
    }

    /// Append the next fragment of input.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.discarded += self.pos as u64;
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Mark the end of input. Pending numbers and literals are now complete.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Byte offset of the next unread byte within the whole input.
    pub fn offset(&self) -> u64 {
        self.discarded + self.pos as u64
    }

    /// Nesting depth of the container currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn error(&self, message: impl Into<String>, at: usize) -> DecodeError {
        DecodeError::at(
            message,
            self.discarded + at as u64,
            &self.buf,
            at,
            self.preview_len,
        )
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.buf.get(self.pos) {
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn after_value(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::End
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close(&mut self, container: Container) -> Event {
        self.stack.pop();
        self.pos += 1;
        self.after_value();
        match container {
            Container::Object => Event::EndObject,
            Container::Array => Event::EndArray,
        }
    }

    /// Pull the next event.
    pub fn next(&mut self, decode: bool) -> Result<Next, DecodeError> {
        loop {
            self.skip_whitespace();
            let Some(&b) = self.buf.get(self.pos) else {
                return if !self.finished {
                    Ok(Next::NeedMore)
                } else if self.expect == Expect::End {
                    Ok(Next::Done)
                } else {
                    Err(self.error("unexpected end of input", self.pos))
                };
            };

            match self.expect {
                Expect::End => {
                    return Err(self.error("trailing characters after JSON value", self.pos));
                }
                Expect::Colon => {
                    if b != b':' {
                        return Err(self.error("expected ':' after member name", self.pos));
                    }
                    self.pos += 1;
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd => match (b, self.stack.last()) {
                    (b',', Some(Container::Object)) => {
                        self.pos += 1;
                        self.expect = Expect::Name;
                    }
                    (b',', Some(Container::Array)) => {
                        self.pos += 1;
                        self.expect = Expect::Value;
                    }
                    (b'}', Some(Container::Object)) => {
                        return Ok(Next::Event(self.close(Container::Object)));
                    }
                    (b']', Some(Container::Array)) => {
                        return Ok(Next::Event(self.close(Container::Array)));
                    }
                    _ => return Err(self.error("expected ',' or closing bracket", self.pos)),
                },
                Expect::NameOrEnd | Expect::Name => {
                    if b == b'}' && self.expect == Expect::NameOrEnd {
                        return Ok(Next::Event(self.close(Container::Object)));
                    }
                    if b != b'"' {
                        return Err(self.error("expected member name", self.pos));
                    }
                    let Some(name) = self.read_string(decode)? else {
                        return Ok(Next::NeedMore);
                    };
                    self.expect = Expect::Colon;
                    return Ok(Next::Event(match name {
                        Some(name) => Event::Name(name),
                        None => Event::Skipped,
                    }));
                }
                Expect::Value | Expect::ValueOrEnd => {
                    if b == b']' && self.expect == Expect::ValueOrEnd {
                        return Ok(Next::Event(self.close(Container::Array)));
                    }
                    return self.read_value(b, decode);
                }
            }
        }
    }

    fn read_value(&mut self, b: u8, decode: bool) -> Result<Next, DecodeError> {
        let event = match b {
            b'{' => {
                self.pos += 1;
                self.stack.push(Container::Object);
                self.expect = Expect::NameOrEnd;
                return Ok(Next::Event(Event::StartObject));
            }
            b'[' => {
                self.pos += 1;
                self.stack.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
                return Ok(Next::Event(Event::StartArray));
            }
            b'"' => match self.read_string(decode)? {
                None => return Ok(Next::NeedMore),
                Some(Some(s)) => Event::Scalar(Value::String(s)),
                Some(None) => Event::Skipped,
            },
            b't' => match self.read_literal(b"true", Value::Boolean(true))? {
                None => return Ok(Next::NeedMore),
                Some(v) => Event::Scalar(v),
            },
            b'f' => match self.read_literal(b"false", Value::Boolean(false))? {
                None => return Ok(Next::NeedMore),
                Some(v) => Event::Scalar(v),
            },
            b'n' => match self.read_literal(b"null", Value::Null)? {
                None => return Ok(Next::NeedMore),
                Some(v) => Event::Scalar(v),
            },
            b'-' | b'0'..=b'9' => match self.read_number(decode)? {
                None => return Ok(Next::NeedMore),
                Some(Some(v)) => Event::Scalar(v),
                Some(None) => Event::Skipped,
            },
            _ => return Err(self.error(format!("unexpected character '{}'", b as char), self.pos)),
        };

        let event = match event {
            Event::Scalar(_) if !decode => Event::Skipped,
            other => other,
        };
        self.after_value();
        Ok(Next::Event(event))
    }

    /// `None` when the string is incomplete; `Some(None)` in skip mode.
    fn read_string(&mut self, decode: bool) -> Result<Option<Option<String>>, DecodeError> {
        let start = self.pos;
        let Partial { scanned, mut escaped } = mem::take(&mut self.partial);
        let mut i = start + scanned.max(1);

        loop {
            match self.buf.get(i) {
                None if self.finished => return Err(self.error("unterminated string", start)),
                None => {
                    self.partial = Partial {
                        scanned: i - start,
                        escaped,
                    };
                    return Ok(None);
                }
                Some(b'\\') => {
                    escaped = true;
                    i += 2;
                }
                Some(b'"') => break,
                Some(b) if *b < 0x20 => {
                    return Err(self.error("control character in string", i));
                }
                Some(_) => i += 1,
            }
        }

        let raw = &self.buf[start..=i];
        let result = if !decode {
            None
        } else if !escaped {
            match std::str::from_utf8(&raw[1..raw.len() - 1]) {
                Ok(s) => Some(s.to_string()),
                Err(_) => return Err(self.error("invalid UTF-8 in string", start)),
            }
        } else {
            match serde_json::from_slice::<String>(raw) {
                Ok(s) => Some(s),
                Err(e) => return Err(self.error(format!("invalid string: {}", e), start)),
            }
        };

        self.pos = i + 1;
        Ok(Some(result))
    }

    fn read_literal(&mut self, word: &[u8], value: Value) -> Result<Option<Value>, DecodeError> {
        let available = &self.buf[self.pos..];
        let n = available.len().min(word.len());
        if available[..n] != word[..n] {
            return Err(self.error("invalid literal", self.pos));
        }
        if n < word.len() {
            return if self.finished {
                Err(self.error("unexpected end of input in literal", self.pos))
            } else {
                Ok(None)
            };
        }
        self.pos += word.len();
        Ok(Some(value))
    }

    /// `None` when the number may continue past the buffered bytes.
    fn read_number(&mut self, decode: bool) -> Result<Option<Option<Value>>, DecodeError> {
        let start = self.pos;
        let mut end = start + mem::take(&mut self.partial).scanned;
        while let Some(b) = self.buf.get(end) {
            if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                end += 1;
            } else {
                break;
            }
        }
        if end == self.buf.len() && !self.finished {
            self.partial = Partial {
                scanned: end - start,
                escaped: false,
            };
            return Ok(None);
        }

        let text = &self.buf[start..end];
        if !is_json_number(text) {
            return Err(self.error("invalid number", start));
        }
        self.pos = end;
        if !decode {
            return Ok(Some(None));
        }

        // Same number conversion as whole-buffer decoding.
        let value = serde_json::from_slice::<serde_json::Value>(text)
            .map(crate::convert::from_json)
            .map_err(|e| self.error(format!("invalid number: {}", e), start))?;
        Ok(Some(Some(value)))
    }
}

/// `-? (0 | [1-9][0-9]*) (. [0-9]+)? ([eE] [+-]? [0-9]+)?`
fn is_json_number(text: &[u8]) -> bool {
    let mut i = 0;
    let digits = |i: &mut usize| {
        let from = *i;
        while text.get(*i).is_some_and(u8::is_ascii_digit) {
            *i += 1;
        }
        *i - from
    };

    if text.get(i) == Some(&b'-') {
        i += 1;
    }
    match text.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            digits(&mut i);
        }
        _ => return false,
    }
    if text.get(i) == Some(&b'.') {
        i += 1;
        if digits(&mut i) == 0 {
            return false;
        }
    }
    if matches!(text.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(text.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if digits(&mut i) == 0 {
            return false;
        }
    }
    i == text.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(chunks: &[&str], decode: bool) -> Result<Vec<Event>, DecodeError> {
        let mut tokenizer = Tokenizer::new(48);
        let mut chunks = chunks.iter();
        let mut out = vec![];
        loop {
            match tokenizer.next(decode)? {
                Next::Event(e) => out.push(e),
                Next::NeedMore => match chunks.next() {
                    Some(chunk) => tokenizer.feed(chunk.as_bytes()),
                    None => tokenizer.finish(),
                },
                Next::Done => return Ok(out),
            }
        }
    }

    #[test]
    fn test_tokens_split_across_fragments() {
        let got = events(&["{\"na", "me\": [12", "3, tr", "ue, \"x\\", "\"y\"]}"], true).unwrap();
        assert_eq!(
            got,
            vec![
                Event::StartObject,
                Event::Name("name".to_string()),
                Event::StartArray,
                Event::Scalar(Value::Integer(123)),
                Event::Scalar(Value::Boolean(true)),
                Event::Scalar(Value::String("x\"y".to_string())),
                Event::EndArray,
                Event::EndObject,
            ]
        );
    }

    #[test]
    fn test_split_string_resumes_scan() {
        let mut tokenizer = Tokenizer::new(48);
        tokenizer.feed(b"[\"ab\\");
        assert_eq!(tokenizer.next(true).unwrap(), Next::Event(Event::StartArray));
        assert_eq!(tokenizer.next(true).unwrap(), Next::NeedMore);
        assert_eq!(tokenizer.partial.scanned, 5);
        assert!(tokenizer.partial.escaped);

        tokenizer.feed(b"\"cd");
        assert_eq!(tokenizer.next(true).unwrap(), Next::NeedMore);
        assert_eq!(tokenizer.partial.scanned, 7);

        tokenizer.feed(b"\", 12");
        assert_eq!(
            tokenizer.next(true).unwrap(),
            Next::Event(Event::Scalar(Value::String("ab\"cd".to_string())))
        );
        assert_eq!(tokenizer.partial.scanned, 0);
        assert_eq!(tokenizer.next(true).unwrap(), Next::NeedMore);
        assert_eq!(tokenizer.partial.scanned, 2);

        tokenizer.feed(b"3]");
        tokenizer.finish();
        assert_eq!(tokenizer.next(true).unwrap(), Next::Event(Event::Scalar(Value::Integer(123))));
        assert_eq!(tokenizer.next(true).unwrap(), Next::Event(Event::EndArray));
        assert_eq!(tokenizer.next(true).unwrap(), Next::Done);
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let text = r#"{"kéy": ["s\\t\"r", -12.5e1, null, {"x": "long string value"}]}"#;
        let chunks: Vec<String> = text.chars().map(String::from).collect();
        let chunks: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let split = events(&chunks, true).unwrap();
        assert_eq!(split, events(&[text], true).unwrap());
        assert_eq!(split[1], Event::Name("kéy".to_string()));
    }

    #[test]
    fn test_number_at_end_of_input() {
        let got = events(&["4", "2"], true).unwrap();
        assert_eq!(got, vec![Event::Scalar(Value::Integer(42))]);
        let got = events(&["-1.5e2"], true).unwrap();
        assert_eq!(got, vec![Event::Scalar(Value::Float(-150.0))]);
    }

    #[test]
    fn test_skip_mode_keeps_structure() {
        let got = events(&[r#"{"a": [1, "two"]}"#], false).unwrap();
        assert_eq!(
            got,
            vec![
                Event::StartObject,
                Event::Skipped,
                Event::StartArray,
                Event::Skipped,
                Event::Skipped,
                Event::EndArray,
                Event::EndObject,
            ]
        );
    }

    #[test]
    fn test_malformed_input() {
        let err = events(&["[1, 2,, 3]"], true).unwrap_err();
        assert_eq!(err.offset, Some(6));
        assert!(err.preview.contains(",,"));
        assert!(events(&["[01]"], true).is_err());
        assert!(events(&["[1] 2"], true).is_err());
        assert!(events(&["{\"a\" 1}"], true).is_err());
        assert!(events(&["[1, 2"], true).is_err());
    }

    #[test]
    fn test_offset_survives_compaction() {
        let mut input = String::from("[");
        for i in 0..2000 {
            input.push_str(&format!("{},", i));
        }
        input.push_str("x]");
        let chunks: Vec<&str> = input
            .as_bytes()
            .chunks(100)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let err = events(&chunks, false).unwrap_err();
        assert_eq!(err.offset, Some(input.len() as u64 - 2));
    }

    #[test]
    fn test_json_number_grammar() {
        assert!(is_json_number(b"0"));
        assert!(is_json_number(b"-0.5"));
        assert!(is_json_number(b"1E+10"));
        assert!(!is_json_number(b"1."));
        assert!(!is_json_number(b"+1"));
        assert!(!is_json_number(b"1-2"));
    }
}
