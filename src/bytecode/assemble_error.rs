use crate::analysis::BlockId;
use crate::bytecode::op::{Opcode, OperandKind};
use thiserror::Error;

/// Every way an assembly can fail. Nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    // input errors
    #[error("instruction {index}: {op} takes a {expected} operand")]
    OperandMismatch {
        index: usize,
        op: Opcode,
        expected: OperandKind,
    },

    #[error("instruction {index}: unknown label '{label}'")]
    UnknownLabel { index: usize, label: String },

    #[error("label '{label}' placed twice")]
    DuplicateLabel { label: String },

    #[error("label '{label}' placed past the last instruction")]
    DanglingLabel { label: String },

    // encoder
    #[error("instruction {index}: {op} operand {value} out of encodable range for {len} bytes")]
    FixupOverflow {
        index: usize,
        op: Opcode,
        value: i64,
        len: u32,
    },

    #[error("internal error: predicted {expected} bytes but emitted {actual}")]
    EncodingInconsistency { expected: u32, actual: u32 },

    // analysis
    #[error("internal error: stack analysis did not converge after {rounds} rounds (block {block})")]
    ConvergenceFailure { rounds: usize, block: BlockId },

    #[error("block {block}: stack depth does not reduce to a number: {expr}")]
    UnresolvedDepth { block: BlockId, expr: String },

    #[error("block {block}: operand stack underflows to {depth}")]
    StackUnderflow { block: BlockId, depth: i64 },

    // decoding and persistence
    #[error("offset {offset}: unknown opcode byte {byte}")]
    UnknownOpcode { offset: u32, byte: u8 },

    #[error("offset {offset}: instruction stream ends inside an instruction")]
    TruncatedCode { offset: u32 },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl AssembleError {
    /// Internal-consistency failures point at a defect, not at the input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AssembleError::EncodingInconsistency { .. } | AssembleError::ConvergenceFailure { .. }
        )
    }
}
