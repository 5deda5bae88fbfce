pub mod assemble;
pub mod assemble_error;
pub mod builder;
pub mod disasm;
pub mod encode;
pub mod ir;
pub mod line_table;
pub mod op;

pub use assemble::{AssembleOptions, Assembly, assemble};
pub use assemble_error::AssembleError;
pub use builder::FunctionBuilder;
pub use ir::{CodeFlags, CodeUnit, Instr, Label, Operand};
pub use op::{CmpOp, Opcode, OperandKind};
