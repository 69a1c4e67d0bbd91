use std::fmt;

use crate::path::tokens::Token;

/// Character offset into the path expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position(pub usize);

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: Position,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Offset of the next unread character.
    pub fn position(&self) -> Position {
        Position(self.position)
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            position: Position(self.position),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self, quote: char) -> Result<String, LexError> {
        let mut result = String::new();
        self.advance(); // opening quote

        while let Some(ch) = self.current_char() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    self.advance();
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('b') => result.push('\u{8}'),
                        Some('f') => result.push('\u{c}'),
                        Some('/') => result.push('/'),
                        Some('"') => result.push('"'),
                        Some('\'') => result.push('\''),
                        Some('\\') => result.push('\\'),
                        Some('u') => {
                            let code = self.read_hex4()?;
                            let ch = char::from_u32(code)
                                .ok_or_else(|| self.error(format!("Invalid code point \\u{:04x}", code)))?;
                            result.push(ch);
                            continue;
                        }
                        Some(ch) => return Err(self.error(format!("Invalid escape sequence: \\{}", ch))),
                        None => return Err(self.error("Unterminated string: unexpected end after backslash")),
                    }
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(self.error("Unterminated string: missing closing quote"))
    }

    fn read_hex4(&mut self) -> Result<u32, LexError> {
        self.advance(); // 'u'
        let mut code = 0;
        for _ in 0..4 {
            let digit = self
                .current_char()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("Expected four hex digits after \\u"))?;
            code = code * 16 + digit;
            self.advance();
        }
        Ok(code)
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let mut number = String::new();
        let mut is_float = false;

        if self.current_char() == Some('-') {
            number.push('-');
            self.advance();
        }

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_float
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                number.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E')
                && self
                    .peek_char(1)
                    .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
            {
                is_float = true;
                number.push(ch);
                self.advance();
                if let Some(sign @ ('-' | '+')) = self.current_char() {
                    number.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }

        if is_float {
            number
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("Invalid number: {}", number)))
        } else {
            number
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| self.error(format!("Invalid integer: {}", number)))
        }
    }

    fn two_char(
        &mut self,
        next: char,
        double: Token,
        single: Option<Token>,
    ) -> Result<Token, LexError> {
        if self.peek_char(1) == Some(next) {
            self.advance();
            self.advance();
            Ok(double)
        } else {
            match single {
                Some(token) => {
                    self.advance();
                    Ok(token)
                }
                None => Err(self.error(format!(
                    "Unexpected '{}' (did you mean '{}{}'?)",
                    self.current_char().unwrap_or_default(),
                    self.current_char().unwrap_or_default(),
                    next
                ))),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        match self.current_char() {
            None => Ok(Token::Eof),
            Some('$') => {
                self.advance();
                Ok(Token::Dollar)
            }
            Some('@') => {
                self.advance();
                Ok(Token::At)
            }
            Some('.') => self.two_char('.', Token::DotDot, Some(Token::Dot)),
            Some('*') => {
                self.advance();
                Ok(Token::Star)
            }
            Some(',') => {
                self.advance();
                Ok(Token::Comma)
            }
            Some(':') => {
                self.advance();
                Ok(Token::Colon)
            }
            Some('?') => {
                self.advance();
                Ok(Token::Question)
            }
            Some('(') => {
                self.advance();
                Ok(Token::LParen)
            }
            Some(')') => {
                self.advance();
                Ok(Token::RParen)
            }
            Some('[') => {
                self.advance();
                Ok(Token::LBracket)
            }
            Some(']') => {
                self.advance();
                Ok(Token::RBracket)
            }
            Some('=') => self.two_char('=', Token::EqEq, None),
            Some('!') => self.two_char('=', Token::NotEq, Some(Token::Not)),
            Some('<') => self.two_char('=', Token::LtEq, Some(Token::Lt)),
            Some('>') => self.two_char('=', Token::GtEq, Some(Token::Gt)),
            Some('&') => self.two_char('&', Token::AndAnd, None),
            Some('|') => self.two_char('|', Token::OrOr, None),
            Some('"') => self.read_string('"').map(Token::String),
            Some('\'') => self.read_string('\'').map(Token::String),
            Some('-') if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            Some(ch) if ch.is_ascii_digit() => self.read_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();

                Ok(match ident.as_str() {
                    "true" => Token::Boolean(true),
                    "false" => Token::Boolean(false),
                    "null" => Token::Null,
                    _ => Token::Identifier(ident),
                })
            }
            Some(ch) => Err(self.error(format!("Unexpected character '{}'", ch))),
        }
    }
}

#[test]
fn test_filter_tokens() {
    let mut lexer = Lexer::new("$[?@.price<13&&@.inStock==true]");
    let expected = [
        Token::Dollar,
        Token::LBracket,
        Token::Question,
        Token::At,
        Token::Dot,
        Token::Identifier("price".to_string()),
        Token::Lt,
        Token::Integer(13),
        Token::AndAnd,
        Token::At,
        Token::Dot,
        Token::Identifier("inStock".to_string()),
        Token::EqEq,
        Token::Boolean(true),
        Token::RBracket,
        Token::Eof,
    ];
    for token in expected {
        assert_eq!(lexer.next_token().unwrap(), token);
    }
}

#[test]
fn test_slice_tokens() {
    let mut lexer = Lexer::new("[-1:..]");
    assert_eq!(lexer.next_token().unwrap(), Token::LBracket);
    assert_eq!(lexer.next_token().unwrap(), Token::Integer(-1));
    assert_eq!(lexer.next_token().unwrap(), Token::Colon);
    assert_eq!(lexer.next_token().unwrap(), Token::DotDot);
    assert_eq!(lexer.next_token().unwrap(), Token::RBracket);
}
