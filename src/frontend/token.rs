#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(std::string::String),
    Bytes(Vec<u8>),
    Bool(bool),
    NoneLit,

    // Comparison symbols
    Lt,
    LtEq,
    EqEq,
    NotEq,
    Gt,
    GtEq,

    // Delimiters
    Colon,
    Comma,
    LParen,
    RParen,

    // Mnemonics, labels, names and comparison words
    Ident(std::string::String),

    // Special
    Comment(std::string::String),
    Newline,
    Eof,
}

impl Token {
    /// Returns true if this token can start a constant operand
    pub fn starts_constant(&self) -> bool {
        matches!(
            self,
            Token::Integer(_)
                | Token::Float(_)
                | Token::String(_)
                | Token::Bytes(_)
                | Token::Bool(_)
                | Token::NoneLit
                | Token::LParen
        )
    }

    pub fn is_line_end(&self) -> bool {
        matches!(self, Token::Newline | Token::Eof)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{}", x),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Bytes(b) => write!(f, "b<{} bytes>", b.len()),
            Token::Bool(true) => write!(f, "True"),
            Token::Bool(false) => write!(f, "False"),
            Token::NoneLit => write!(f, "None"),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Comment(_) => write!(f, "comment"),
            Token::Newline => write!(f, "end of line"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}
