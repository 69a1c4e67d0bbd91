#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Floating-point number
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 1e3
    /// ```
    Float(f64),

    /// Integer, also used for indices and slice bounds
    ///
    /// # Examples
    /// ```text
    /// 0
    /// -1
    /// ```
    Integer(i64),

    /// Quoted string, single or double quotes
    ///
    /// # Examples
    /// ```text
    /// 'name'
    /// "first name"
    /// ```
    String(String),

    Boolean(bool),
    Null,

    /// Member name or function name
    Identifier(String),

    // Roots
    /// `$`, the document root
    Dollar,
    /// `@`, the node under test inside a filter
    At,

    // Navigation
    Dot,
    /// `..`, descendant segment
    DotDot,
    Star,
    LBracket,
    RBracket,
    Comma,
    Colon,
    /// `?`, opens a filter selector
    Question,
    LParen,
    RParen,

    // Operators
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Not,

    Eof,
}
