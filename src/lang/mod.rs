//! # Assembler values
//!
//! Literal data that instructions carry as operands.

pub mod value;

pub use value::Constant;
