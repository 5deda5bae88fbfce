//! Bytecode assembler for a CPython-style wordcode machine.
//!
//! Instructions are emitted through a [`bytecode::FunctionBuilder`] (or parsed
//! from text by [`frontend::parse_source`]), encoded with pessimistic jump
//! sizing, and checked by a symbolic fixed-point analysis that yields the
//! maximum operand-stack depth stored in the resulting [`bytecode::CodeUnit`].

pub mod analysis;
pub mod bytecode;
pub mod frontend;
pub mod lang;
