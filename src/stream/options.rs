//! Decoding and buffering options.

use std::{fmt, sync::Arc};

use crate::{error::DecodeError, value::Value};

/// Rewrites each accepted element before the operators see it.
pub trait ValueConverter: Send + Sync {
    fn convert(&self, value: Value) -> Result<Value, DecodeError>;
}

impl<F> ValueConverter for F
where
    F: Fn(Value) -> Result<Value, DecodeError> + Send + Sync,
{
    fn convert(&self, value: Value) -> Result<Value, DecodeError> {
        self(value)
    }
}

/// Options passed through to the decoder.
#[derive(Clone)]
pub struct DecodeOptions {
    /// Match path member names without regard to ASCII case
    pub case_insensitive_names: bool,
    /// Applied in order to every accepted element
    pub converters: Vec<Arc<dyn ValueConverter>>,
    /// Bytes of input quoted by decode errors
    pub preview_len: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            case_insensitive_names: false,
            converters: Vec::new(),
            preview_len: 48,
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_insensitive_names(mut self, yes: bool) -> Self {
        self.case_insensitive_names = yes;
        self
    }

    pub fn converter(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.converters.push(Arc::new(converter));
        self
    }

    pub fn preview_len(mut self, len: usize) -> Self {
        self.preview_len = len;
        self
    }

    /// Run every converter over `value`.
    pub fn apply(&self, value: Value) -> Result<Value, DecodeError> {
        self.converters
            .iter()
            .try_fold(value, |value, converter| converter.convert(value))
    }
}

impl fmt::Debug for DecodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("case_insensitive_names", &self.case_insensitive_names)
            .field("converters", &self.converters.len())
            .field("preview_len", &self.preview_len)
            .finish()
    }
}

/// Buffering for the asynchronous token-stream strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Size of each pooled read buffer
    pub async_buffer_size: usize,
    /// Buffers kept by the pool
    pub pool_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            async_buffer_size: 8 * 1024,
            pool_capacity: 4,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn async_buffer_size(mut self, size: usize) -> Self {
        self.async_buffer_size = size.max(1);
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity.max(1);
        self
    }
}
