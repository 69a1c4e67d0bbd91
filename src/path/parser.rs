use std::{mem, sync::Arc};

use crate::{
    path::{
        PathError,
        ast::{
            CompareOp, Comparable, FilterExpr, Function, FunctionCall, PatternSlot, RelativePath,
            Segment, Selector,
        },
        lexer::{Lexer, Position},
        pattern::PatternEngine,
        tokens::Token,
    },
    value::Value,
};

/// Largest integer every JSON implementation represents exactly.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    /// Where `current_token` starts
    position: Position,
    engine: Arc<dyn PatternEngine>,
}

impl Parser {
    pub fn new(mut lexer: Lexer, engine: Arc<dyn PatternEngine>) -> Result<Self, PathError> {
        let position = lexer.position();
        let current_token = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current_token,
            position,
            engine,
        })
    }

    fn advance(&mut self) -> Result<(), PathError> {
        self.position = self.lexer.position();
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, PathError> {
        Err(PathError::Parse {
            message: message.into(),
            position: self.position,
        })
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), PathError> {
        if !self.check(&expected) {
            return self.error(format!("Expected {:?}, got {:?}", expected, self.current_token));
        }
        self.advance()
    }

    /// Parse `$` followed by segments, up to the end of input.
    pub fn parse_path(&mut self) -> Result<Vec<Segment>, PathError> {
        self.expect(Token::Dollar)?;
        let segments = self.parse_segments()?;
        if !self.check(&Token::Eof) {
            return self.error(format!("Unexpected {:?} after path", self.current_token));
        }
        Ok(segments)
    }

    fn parse_segments(&mut self) -> Result<Vec<Segment>, PathError> {
        let mut segments = vec![];
        loop {
            match self.current_token {
                Token::Dot => {
                    self.advance()?;
                    let selector = self.parse_shorthand()?;
                    segments.push(Segment {
                        descendant: false,
                        selectors: vec![selector],
                    });
                }
                Token::DotDot => {
                    self.advance()?;
                    let selectors = if self.check(&Token::LBracket) {
                        self.parse_bracket()?
                    } else {
                        vec![self.parse_shorthand()?]
                    };
                    segments.push(Segment {
                        descendant: true,
                        selectors,
                    });
                }
                Token::LBracket => {
                    let selectors = self.parse_bracket()?;
                    segments.push(Segment {
                        descendant: false,
                        selectors,
                    });
                }
                _ => return Ok(segments),
            }
        }
    }

    /// Selector after `.` or `..`: a member name or `*`.
    fn parse_shorthand(&mut self) -> Result<Selector, PathError> {
        let selector = match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Identifier(name) => Selector::Name(name),
            // `true`, `false` and `null` are valid member names here
            Token::Boolean(b) => Selector::Name(b.to_string()),
            Token::Null => Selector::Name("null".to_string()),
            Token::Star => Selector::Wildcard,
            other => {
                self.current_token = other;
                return self.error(format!("Expected member name or '*', got {:?}", self.current_token));
            }
        };
        self.advance()?;
        Ok(selector)
    }

    fn parse_bracket(&mut self) -> Result<Vec<Selector>, PathError> {
        self.expect(Token::LBracket)?;
        let mut selectors = vec![self.parse_selector()?];
        while self.check(&Token::Comma) {
            self.advance()?;
            selectors.push(self.parse_selector()?);
        }
        self.expect(Token::RBracket)?;
        Ok(selectors)
    }

    fn parse_selector(&mut self) -> Result<Selector, PathError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::String(name) => {
                self.advance()?;
                Ok(Selector::Name(name))
            }
            Token::Star => {
                self.advance()?;
                Ok(Selector::Wildcard)
            }
            Token::Question => {
                self.advance()?;
                let expr = self.parse_or()?;
                Ok(Selector::Filter(Arc::new(expr)))
            }
            Token::Integer(n) => {
                let n = self.array_offset(n)?;
                self.advance()?;
                if self.check(&Token::Colon) {
                    self.parse_slice(Some(n))
                } else {
                    Ok(Selector::Index(n))
                }
            }
            Token::Colon => {
                self.current_token = Token::Colon;
                self.parse_slice(None)
            }
            other => {
                self.current_token = other;
                self.error(format!("Unexpected {:?} in selector", self.current_token))
            }
        }
    }

    /// Parse `:end:step` after an optional start.
    fn parse_slice(&mut self, start: Option<i64>) -> Result<Selector, PathError> {
        self.expect(Token::Colon)?;
        let end = self.parse_slice_bound()?;
        let step = if self.check(&Token::Colon) {
            self.advance()?;
            self.parse_slice_bound()?
        } else {
            None
        };
        Ok(Selector::Slice { start, end, step })
    }

    fn parse_slice_bound(&mut self) -> Result<Option<i64>, PathError> {
        if let Token::Integer(n) = self.current_token {
            let n = self.array_offset(n)?;
            self.advance()?;
            Ok(Some(n))
        } else {
            Ok(None)
        }
    }

    /// Indices and slice bounds must lie within ±(2^53 - 1).
    fn array_offset(&self, n: i64) -> Result<i64, PathError> {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) {
            Ok(n)
        } else {
            self.error(format!("Array offset {} is out of range", n))
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, PathError> {
        let mut left = self.parse_and()?;

        while self.check(&Token::OrOr) {
            self.advance()?;
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, PathError> {
        let mut left = self.parse_basic()?;

        while self.check(&Token::AndAnd) {
            self.advance()?;
            let right = self.parse_basic()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_basic(&mut self) -> Result<FilterExpr, PathError> {
        match self.current_token {
            Token::Not => {
                self.advance()?;
                let operand = self.parse_basic()?;
                Ok(FilterExpr::Not(Box::new(operand)))
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, PathError> {
        let left = self.parse_comparable()?;

        let op = match self.current_token {
            Token::EqEq => CompareOp::Equal,
            Token::NotEq => CompareOp::NotEqual,
            Token::Lt => CompareOp::Less,
            Token::LtEq => CompareOp::LessEqual,
            Token::Gt => CompareOp::Greater,
            Token::GtEq => CompareOp::GreaterEqual,
            _ => return self.make_test(left),
        };
        self.advance()?;
        let right = self.parse_comparable()?;
        self.check_comparable(&left)?;
        self.check_comparable(&right)?;

        Ok(FilterExpr::Comparison { left, op, right })
    }

    /// A comparable standing alone must be a test: an existence check or a
    /// pattern function.
    fn make_test(&self, operand: Comparable) -> Result<FilterExpr, PathError> {
        match operand {
            Comparable::Path(path) => Ok(FilterExpr::Exists(path)),
            Comparable::Function(call) if matches!(call.function, Function::Match | Function::Search) => {
                Ok(FilterExpr::Test(call))
            }
            Comparable::Function(call) => self.error(format!(
                "{}() returns a value and must be compared",
                call.function.name()
            )),
            Comparable::Literal(value) => self.error(format!("Literal {:?} cannot be used as a test", value)),
        }
    }

    /// Pattern functions produce a logical result and cannot be compared.
    fn check_comparable(&self, operand: &Comparable) -> Result<(), PathError> {
        match operand {
            Comparable::Function(call) if matches!(call.function, Function::Match | Function::Search) => self
                .error(format!("{}() cannot be used in a comparison", call.function.name())),
            _ => Ok(()),
        }
    }

    fn parse_comparable(&mut self) -> Result<Comparable, PathError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Integer(n) => {
                self.advance()?;
                Ok(Comparable::Literal(Value::Integer(n)))
            }
            Token::Float(n) => {
                self.advance()?;
                Ok(Comparable::Literal(Value::Float(n)))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(Comparable::Literal(Value::String(s)))
            }
            Token::Boolean(b) => {
                self.advance()?;
                Ok(Comparable::Literal(Value::Boolean(b)))
            }
            Token::Null => {
                self.advance()?;
                Ok(Comparable::Literal(Value::Null))
            }
            Token::At => {
                self.advance()?;
                let segments = self.parse_segments()?;
                Ok(Comparable::Path(RelativePath { segments }))
            }
            Token::Dollar => {
                self.current_token = Token::Dollar;
                self.error("Root references are not supported inside filters; use '@'")
            }
            Token::Identifier(name) => {
                self.advance()?;
                self.parse_function(&name).map(Comparable::Function)
            }
            other => {
                self.current_token = other;
                self.error(format!("Unexpected {:?} in filter", self.current_token))
            }
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<FunctionCall, PathError> {
        let function = match name {
            "length" => Function::Length,
            "count" => Function::Count,
            "match" => Function::Match,
            "search" => Function::Search,
            _ => return self.error(format!("Unknown function '{}'", name)),
        };

        self.expect(Token::LParen)?;
        let mut args = vec![];
        if !self.check(&Token::RParen) {
            args.push(self.parse_comparable()?);
            while self.check(&Token::Comma) {
                self.advance()?;
                args.push(self.parse_comparable()?);
            }
        }
        self.expect(Token::RParen)?;

        let arity = match function {
            Function::Length | Function::Count => 1,
            Function::Match | Function::Search => 2,
        };
        if args.len() != arity {
            return self.error(format!(
                "{}() takes {} argument(s), got {}",
                function.name(),
                arity,
                args.len()
            ));
        }
        if function == Function::Count && !matches!(args[0], Comparable::Path(_)) {
            return self.error("count() requires a path argument");
        }

        let pattern = match (function, args.get(1)) {
            (Function::Match | Function::Search, Some(Comparable::Literal(Value::String(source)))) => {
                let compiled = self
                    .engine
                    .compile(source, function == Function::Match)
                    .map_err(|message| PathError::Pattern {
                        pattern: source.clone(),
                        message,
                    })?;
                PatternSlot::Compiled(compiled)
            }
            (Function::Match | Function::Search, Some(Comparable::Literal(other))) => {
                return self.error(format!("{}() pattern must be a string, got {:?}", function.name(), other));
            }
            (Function::Match | Function::Search, _) => PatternSlot::Dynamic(self.engine.clone()),
            _ => PatternSlot::None,
        };

        Ok(FunctionCall {
            function,
            args,
            pattern,
        })
    }
}
