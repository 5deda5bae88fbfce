use crate::frontend::token::Token;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize) -> LexerError {
        LexerError {
            message: message.into(),
            line,
            col,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_comment(&mut self) -> Token {
        self.advance();
        let mut comment = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            comment.push(ch);
            self.advance();
        }
        Token::Comment(comment.trim().to_string())
    }

    /// Reads a double-quoted body, returning its characters unescaped.
    fn read_quoted(&mut self) -> Result<String, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(string);
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some('0') => string.push('\0'),
                        Some(ch) => {
                            return Err(self.error(
                                format!("unknown escape sequence: \\{}", ch),
                                self.line,
                                self.col,
                            ));
                        }
                        None => {
                            return Err(self.error(
                                "unexpected EOF in escape sequence",
                                self.line,
                                self.col,
                            ));
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(self.error(
                        "unterminated string (newline before closing quote)",
                        start_line,
                        start_col,
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error("unterminated string literal", start_line, start_col));
                }
            }
        }
    }

    fn read_bytes(&mut self) -> Result<Token, LexerError> {
        let (line, col) = (self.line, self.col);
        self.advance(); // 'b'
        let body = self.read_quoted()?;
        let mut bytes = Vec::with_capacity(body.len());
        for ch in body.chars() {
            let byte = u8::try_from(u32::from(ch))
                .map_err(|_| self.error(format!("non-byte character {:?} in bytes literal", ch), line, col))?;
            bytes.push(byte);
        }
        Ok(Token::Bytes(bytes))
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;

        let is_negative = self.current() == Some('-');
        if is_negative {
            self.advance();
        }

        // Hex: 0x... or 0X...
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }

            if hex.is_empty() {
                return Err(self.error("expected hex digits after 0x", start_line, start_col));
            }

            let value = i64::from_str_radix(&hex, 16).map_err(|_| {
                self.error(format!("invalid hex number: 0x{}", hex), start_line, start_col)
            })?;

            return Ok(Token::Integer(if is_negative { -value } else { value }));
        }

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        if digits.is_empty() {
            return Err(self.error("expected digits", start_line, start_col));
        }

        if has_dot {
            let value: f64 = digits.parse().map_err(|_| {
                self.error(format!("invalid float: {}", digits), start_line, start_col)
            })?;
            Ok(Token::Float(if is_negative { -value } else { value }))
        } else {
            let value: i64 = digits.parse().map_err(|_| {
                self.error(format!("invalid integer: {}", digits), start_line, start_col)
            })?;
            Ok(Token::Integer(if is_negative { -value } else { value }))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "True" => Token::Bool(true),
            "False" => Token::Bool(false),
            "None" => Token::NoneLit,
            _ => Token::Ident(ident),
        }
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            (':', _) => (Token::Colon, 1),
            (',', _) => (Token::Comma, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('\n') => {
                    self.advance();
                    Token::Newline
                }
                Some('#') => self.read_comment(),
                Some('"') => Token::String(self.read_quoted()?),
                Some('b') if self.peek() == Some('"') => self.read_bytes()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some('-') if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number()?
                }
                Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        return Err(self.error(
                            format!("unexpected character: {:?}", ch),
                            span.line,
                            span.col,
                        ));
                    }
                },
            };
            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_instruction_line() {
        assert_eq!(
            lex("LOAD_CONST 1\n"),
            vec![
                Token::Ident("LOAD_CONST".to_string()),
                Token::Integer(1),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_label_and_comment() {
        assert_eq!(
            lex("loop: # head\n"),
            vec![
                Token::Ident("loop".to_string()),
                Token::Colon,
                Token::Comment("head".to_string()),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            lex("None True False -3 0x10 2.5 \"a\\n\" b\"\\0z\""),
            vec![
                Token::NoneLit,
                Token::Bool(true),
                Token::Bool(false),
                Token::Integer(-3),
                Token::Integer(16),
                Token::Float(2.5),
                Token::String("a\n".to_string()),
                Token::Bytes(vec![0, b'z']),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_tuple_and_comparisons() {
        assert_eq!(
            lex("(1, 2) <= == != > < >="),
            vec![
                Token::LParen,
                Token::Integer(1),
                Token::Comma,
                Token::Integer(2),
                Token::RParen,
                Token::LtEq,
                Token::EqEq,
                Token::NotEq,
                Token::Gt,
                Token::Lt,
                Token::GtEq,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_dotted_name() {
        assert_eq!(
            lex("IMPORT_NAME os.path"),
            vec![
                Token::Ident("IMPORT_NAME".to_string()),
                Token::Ident("os.path".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_spans() {
        let tokens = Lexer::new("NOP\n  POP_TOP").tokenize().unwrap();
        assert_eq!(tokens[2].span, Span { line: 2, col: 3 });
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("LOAD_CONST \"abc").tokenize().unwrap_err();
        assert_eq!((err.line, err.col), (1, 12));
        assert_eq!(err.to_string(), "1:12: unterminated string literal");
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("NOP @").tokenize().unwrap_err();
        assert_eq!(err.message, "unexpected character: '@'");
    }
}
