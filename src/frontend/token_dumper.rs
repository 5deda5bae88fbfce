use crate::bytecode::op::Opcode;
use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints a nicer value for some tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const BLU: &'static str = "\x1b[34m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.dump_to_string(tokens));
    }

    pub fn dump_to_string(&self, tokens: &[Spanned]) -> String {
        let mut out = String::new();
        for s in tokens {
            self.write_one(&mut out, s);
        }
        out
    }

    fn write_one(&self, out: &mut String, s: &Spanned) {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            format!(
                "[{:02}:{:02}] {}{:<9} {:?}{}\n",
                line, col, colr, kind, s.token, reset
            )
        } else {
            match &s.token {
                Token::Comment(c) => format!(
                    "[{:02}:{:02}] {}{:<9} # {}{}\n",
                    line, col, colr, kind, c, reset
                ),
                Token::Newline | Token::Eof => {
                    format!("[{:02}:{:02}] {}{}{}\n", line, col, colr, kind, reset)
                }
                _ => format!(
                    "[{:02}:{:02}] {}{:<9} {}{}\n",
                    line, col, colr, kind, s.token, reset
                ),
            }
        };
        out.push_str(&text);
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline => "NEWLINE",
            Comment(_) => "COMMENT",
            Eof => "EOF",

            Integer(_) => "INT",
            Float(_) => "FLOAT",
            String(_) => "STRING",
            Bytes(_) => "BYTES",
            Bool(_) | NoneLit => "CONST",

            Ident(name) if Opcode::from_mnemonic(&name.to_ascii_uppercase()).is_some() => {
                "MNEMONIC"
            }
            Ident(_) => "IDENT",

            Lt | LtEq | EqEq | NotEq | Gt | GtEq => "CMP",
            Colon | Comma | LParen | RParen => "PUNCT",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline | Comment(_) | Eof => Self::DIM,
            String(_) | Bytes(_) => Self::GRN,
            Integer(_) | Float(_) | Bool(_) | NoneLit => Self::CYN,
            Ident(name) if Opcode::from_mnemonic(&name.to_ascii_uppercase()).is_some() => {
                Self::BLU
            }
            Ident(_) => Self::YEL,
            Lt | LtEq | EqEq | NotEq | Gt | GtEq => Self::MAG,
            Colon | Comma | LParen | RParen => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    #[test]
    fn test_pretty_dump() {
        let tokens = Lexer::new("top: LOAD_CONST 1 # one").tokenize().unwrap();
        let out = TokenDumper::new().no_color().pretty().dump_to_string(&tokens);
        let expected = "\
[01:01] IDENT     top
[01:04] PUNCT     :
[01:06] MNEMONIC  LOAD_CONST
[01:17] INT       1
[01:19] COMMENT   # one
[01:24] EOF
";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_debug_dump() {
        let tokens = Lexer::new("None").tokenize().unwrap();
        let out = TokenDumper::new().no_color().dump_to_string(&tokens);
        assert_eq!(out, "[01:01] CONST     NoneLit\n[01:05] EOF       Eof\n");
    }

    #[test]
    fn test_color_codes() {
        let tokens = Lexer::new("x").tokenize().unwrap();
        let out = TokenDumper::new().pretty().dump_to_string(&tokens);
        assert!(out.starts_with("[01:01] \x1b[33mIDENT"));
        assert!(out.contains("\x1b[0m"));
    }
}
