pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod token;
pub mod token_dumper;

pub use parser::{Parser, parse_source};
pub use parser_error::ParserError;
