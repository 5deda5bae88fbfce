use crate::bytecode::builder::FunctionBuilder;
use crate::bytecode::ir::{Label, Operand};
use crate::bytecode::op::{CmpOp, Opcode, OperandKind};
use crate::frontend::lexer::{Lexer, Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::value::Constant;

/// Line-oriented parser for assembler source.
///
/// Every line holds an optional `label:` followed by an optional
/// `MNEMONIC [operand]`. The operand's shape is chosen by the mnemonic's
/// operand kind, and each instruction takes the source line it appears on.
/// Comments are filtered out in `Parser::new`; newlines are kept because
/// they end statements.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    last_span: Option<Span>,
}

/// Lexes and parses `source` into a builder ready to assemble.
pub fn parse_source(source: &str) -> Result<FunctionBuilder, ParserError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse()
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |s| &s.token)
    }

    fn peek_next(&self) -> &Token {
        self.tokens.get(self.pos + 1).map_or(&Token::Eof, |s| &s.token)
    }

    fn advance(&mut self) -> Token {
        match self.tokens.get(self.pos) {
            Some(s) => {
                self.last_span = Some(s.span.clone());
                self.pos += 1;
                s.token.clone()
            }
            None => Token::Eof,
        }
    }

    /// Builds a `ParserError` at the current token, or the last one consumed.
    fn error(&self, message: impl Into<String>) -> ParserError {
        let span = self
            .current()
            .map(|s| s.span.clone())
            .or_else(|| self.last_span.clone())
            .unwrap_or(Span { line: 1, col: 1 });
        ParserError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    fn line(&self) -> u32 {
        let line = self.current().map_or(1, |s| s.span.line);
        u32::try_from(line).unwrap_or(u32::MAX)
    }

    pub fn parse(&mut self) -> Result<FunctionBuilder, ParserError> {
        let mut builder = FunctionBuilder::default();

        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Newline => {
                    self.advance();
                    continue;
                }
                _ => {}
            }

            if let Some(name) = self.label_name() {
                let label_error = self.error("");
                self.advance();
                self.advance();
                builder
                    .place_label(&Label::new(name))
                    .map_err(|e| ParserError {
                        message: e.to_string(),
                        ..label_error
                    })?;
            }

            if matches!(self.peek(), Token::Ident(_)) {
                self.parse_instruction(&mut builder)?;
            } else if !self.peek().is_line_end() {
                return Err(self.error(format!("expected label or mnemonic, found {}", self.peek())));
            }

            if !self.peek().is_line_end() {
                return Err(self.error(format!("expected end of line, found {}", self.peek())));
            }
        }

        Ok(builder)
    }

    /// Name of the label being placed, when the line starts with `name:`.
    fn label_name(&self) -> Option<String> {
        match (self.peek(), self.peek_next()) {
            (Token::Ident(name), Token::Colon) => Some(name.clone()),
            _ => None,
        }
    }

    fn parse_instruction(&mut self, builder: &mut FunctionBuilder) -> Result<(), ParserError> {
        let line = self.line();
        let mnemonic_error = self.error("");
        let Token::Ident(mnemonic) = self.advance() else {
            return Err(ParserError {
                message: "expected mnemonic".to_string(),
                ..mnemonic_error
            });
        };
        let op = Opcode::from_mnemonic(&mnemonic.to_ascii_uppercase()).ok_or_else(|| ParserError {
            message: format!("unknown mnemonic '{}'", mnemonic),
            ..mnemonic_error
        })?;

        let operand = match op.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Arg => Operand::Arg(self.parse_arg()?),
            OperandKind::Compare => Operand::Compare(self.parse_compare()?),
            OperandKind::Constant => Operand::Constant(self.parse_constant()?),
            OperandKind::Name => Operand::Name(self.parse_ident("name")?),
            OperandKind::Local => Operand::Local(self.parse_ident("local name")?),
            OperandKind::Free => Operand::Free(self.parse_ident("free variable name")?),
            OperandKind::AbsLabel | OperandKind::RelLabel => {
                Operand::Label(Label::new(self.parse_ident("label")?))
            }
        };

        builder.set_line(line);
        builder.emit(op, operand);
        Ok(())
    }

    fn parse_arg(&mut self) -> Result<u32, ParserError> {
        match self.peek().clone() {
            Token::Integer(n) => {
                let arg = u32::try_from(n)
                    .map_err(|_| self.error(format!("operand {} out of range", n)))?;
                self.advance();
                Ok(arg)
            }
            other => Err(self.error(format!("expected integer operand, found {}", other))),
        }
    }

    fn parse_ident(&mut self, what: &str) -> Result<String, ParserError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {}", what, other))),
        }
    }

    fn parse_compare(&mut self) -> Result<CmpOp, ParserError> {
        let cmp = match self.peek().clone() {
            Token::Lt => CmpOp::Lt,
            Token::LtEq => CmpOp::Le,
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::Ne,
            Token::Gt => CmpOp::Gt,
            Token::GtEq => CmpOp::Ge,
            Token::Ident(word) => {
                let follow = match self.peek_next() {
                    Token::Ident(next) => Some(next.as_str()),
                    _ => None,
                };
                let (cmp, words) = match (word.as_str(), follow) {
                    ("not", Some("in")) => (CmpOp::NotIn, 2),
                    ("is", Some("not")) => (CmpOp::IsNot, 2),
                    ("exception", Some("match")) => (CmpOp::ExceptionMatch, 2),
                    ("in", _) => (CmpOp::In, 1),
                    ("is", _) => (CmpOp::Is, 1),
                    ("exception_match", _) => (CmpOp::ExceptionMatch, 1),
                    _ => return Err(self.error(format!("unknown comparison '{}'", word))),
                };
                for _ in 0..words {
                    self.advance();
                }
                return Ok(cmp);
            }
            other => return Err(self.error(format!("expected comparison, found {}", other))),
        };
        self.advance();
        Ok(cmp)
    }

    fn parse_constant(&mut self) -> Result<Constant, ParserError> {
        let constant = match self.peek().clone() {
            Token::Integer(n) => Constant::Int(n),
            Token::Float(x) => Constant::Float(x),
            Token::String(s) => Constant::Str(s),
            Token::Bytes(b) => Constant::Bytes(b),
            Token::Bool(b) => Constant::Bool(b),
            Token::NoneLit => Constant::None,
            Token::LParen => return self.parse_tuple(),
            other => return Err(self.error(format!("expected constant, found {}", other))),
        };
        self.advance();
        Ok(constant)
    }

    /// `( )`, `(a,)`, `(a, b)` and `(a, b,)`.
    fn parse_tuple(&mut self) -> Result<Constant, ParserError> {
        self.advance(); // (
        let mut items = Vec::new();
        loop {
            if *self.peek() == Token::RParen {
                self.advance();
                return Ok(Constant::Tuple(items));
            }
            if !self.peek().starts_constant() {
                return Err(self.error(format!("expected constant or ')', found {}", self.peek())));
            }
            items.push(self.parse_constant()?);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RParen => {}
                other => {
                    return Err(self.error(format!("expected ',' or ')', found {}", other)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Instr;

    fn parse(src: &str) -> FunctionBuilder {
        parse_source(src).unwrap()
    }

    fn ops(b: &FunctionBuilder) -> Vec<Opcode> {
        b.instrs().iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_simple_program() {
        let b = parse("LOAD_CONST 1\nRETURN_VALUE\n");
        assert_eq!(ops(&b), vec![Opcode::LoadConst, Opcode::ReturnValue]);
        assert_eq!(
            b.instrs()[0],
            Instr {
                line: 1,
                op: Opcode::LoadConst,
                operand: Operand::Constant(Constant::Int(1))
            }
        );
        assert_eq!(b.instrs()[1].line, 2);
    }

    #[test]
    fn test_labels_and_blank_lines() {
        let b = parse("\n  # comment\nhead:\n  NOP\nend: RETURN_VALUE\n");
        assert_eq!(b.labels().get(&Label::new("head")), Some(&0));
        assert_eq!(b.labels().get(&Label::new("end")), Some(&1));
        assert_eq!(b.instrs()[0].line, 4);
    }

    #[test]
    fn test_lowercase_mnemonic() {
        let b = parse("load_fast x");
        assert_eq!(b.instrs()[0].operand, Operand::Local("x".to_string()));
    }

    #[test]
    fn test_operand_per_kind() {
        let b = parse(
            "LOAD_GLOBAL print\nLOAD_DEREF cell\nBUILD_TUPLE 2\nJUMP_ABSOLUTE top\nCOMPARE_OP not in\n",
        );
        let operands: Vec<_> = b.instrs().iter().map(|i| i.operand.clone()).collect();
        assert_eq!(
            operands,
            vec![
                Operand::Name("print".to_string()),
                Operand::Free("cell".to_string()),
                Operand::Arg(2),
                Operand::Label(Label::new("top")),
                Operand::Compare(CmpOp::NotIn),
            ]
        );
    }

    #[test]
    fn test_compare_forms() {
        let b = parse("COMPARE_OP <=\nCOMPARE_OP is not\nCOMPARE_OP in\nCOMPARE_OP exception match\n");
        let cmps: Vec<_> = b
            .instrs()
            .iter()
            .map(|i| match &i.operand {
                Operand::Compare(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(
            cmps,
            vec![
                Some(CmpOp::Le),
                Some(CmpOp::IsNot),
                Some(CmpOp::In),
                Some(CmpOp::ExceptionMatch)
            ]
        );
    }

    #[test]
    fn test_tuple_constants() {
        let b = parse("LOAD_CONST (1, \"a\", (None,), ())\n");
        assert_eq!(
            b.instrs()[0].operand,
            Operand::Constant(Constant::Tuple(vec![
                Constant::Int(1),
                Constant::Str("a".to_string()),
                Constant::Tuple(vec![Constant::None]),
                Constant::Tuple(vec![]),
            ]))
        );
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = parse_source("NOP\n  FROB 1\n").unwrap_err();
        assert_eq!(err.to_string(), "2:3: unknown mnemonic 'FROB'");
    }

    #[test]
    fn test_missing_operand() {
        let err = parse_source("LOAD_FAST\n").unwrap_err();
        assert_eq!(err.message, "expected local name, found end of line");
        assert_eq!((err.line, err.col), (1, 10));
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_source("POP_TOP 3\n").unwrap_err();
        assert_eq!(err.message, "expected end of line, found 3");
    }

    #[test]
    fn test_negative_arg_rejected() {
        let err = parse_source("BUILD_LIST -1\n").unwrap_err();
        assert_eq!(err.message, "operand -1 out of range");
    }

    #[test]
    fn test_line_must_start_with_name() {
        let err = parse_source("NOP\n42\n").unwrap_err();
        assert_eq!(err.to_string(), "2:1: expected label or mnemonic, found 42");
    }

    #[test]
    fn test_duplicate_label_located() {
        let err = parse_source("a:\nNOP\na:\nNOP\n").unwrap_err();
        assert_eq!((err.line, err.col), (3, 1));
        assert!(err.message.contains("placed twice"));
    }
}
