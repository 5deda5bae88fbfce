use crate::frontend::lexer::LexerError;
use thiserror::Error;

/// A parsing error with source location.
///
/// `line` and `col` are 1-based positions coming from the lexer spans.
/// Errors at end of input fall back to the last consumed token's span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{col}: {message}")]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl From<LexerError> for ParserError {
    fn from(e: LexerError) -> Self {
        ParserError {
            message: e.message,
            line: e.line,
            col: e.col,
        }
    }
}
