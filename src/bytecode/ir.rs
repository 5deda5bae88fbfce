use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::op::{CmpOp, Opcode, OperandKind};
use crate::lang::value::Constant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbolic jump target, resolved to a byte offset during encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operand as written by the caller, before interning and label resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Arg(u32),
    Compare(CmpOp),
    Constant(Constant),
    Name(String),
    Local(String),
    Free(String),
    Label(Label),
}

impl Operand {
    /// Whether this operand is acceptable for an opcode of `kind`.
    pub fn fits(&self, kind: OperandKind) -> bool {
        matches!(
            (self, kind),
            (Operand::None, OperandKind::None)
                | (Operand::Arg(_), OperandKind::Arg)
                | (Operand::Compare(_), OperandKind::Compare)
                | (Operand::Constant(_), OperandKind::Constant)
                | (Operand::Name(_), OperandKind::Name)
                | (Operand::Local(_), OperandKind::Local)
                | (Operand::Free(_), OperandKind::Free)
                | (Operand::Label(_), OperandKind::AbsLabel | OperandKind::RelLabel)
        )
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Arg(n) => write!(f, "{}", n),
            Operand::Compare(op) => write!(f, "{}", op),
            Operand::Constant(c) => write!(f, "{}", c),
            Operand::Name(s) | Operand::Local(s) | Operand::Free(s) => write!(f, "{}", s),
            Operand::Label(label) => write!(f, "{}", label),
        }
    }
}

/// One emitted instruction in program order.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub line: u32,
    pub op: Opcode,
    pub operand: Operand,
}

// =============================================================================
// Code flags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const OPTIMIZED: CodeFlags = CodeFlags(0x01);
    pub const NEWLOCALS: CodeFlags = CodeFlags(0x02);
    pub const GENERATOR: CodeFlags = CodeFlags(0x20);
    pub const NOFREE: CodeFlags = CodeFlags(0x40);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CodeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CodeFlags) {
        self.0 &= !other.0;
    }
}

impl fmt::Display for CodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (CodeFlags::OPTIMIZED, "OPTIMIZED"),
            (CodeFlags::NEWLOCALS, "NEWLOCALS"),
            (CodeFlags::GENERATOR, "GENERATOR"),
            (CodeFlags::NOFREE, "NOFREE"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", set.join(" | "))
        }
    }
}

// =============================================================================
// Code unit
// =============================================================================

/// An assembled, depth-verified instruction stream with its side tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub locals: Vec<String>,
    pub free_vars: Vec<String>,
    pub first_line: u32,
    /// `(offset_delta, line_delta)` byte pairs; see `line_table`.
    pub line_table: Vec<u8>,
    pub stack_depth: u32,
    pub flags: CodeFlags,
}

impl CodeUnit {
    pub fn to_bytes(&self) -> Result<Vec<u8>, AssembleError> {
        postcard::to_allocvec(self).map_err(|e| AssembleError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssembleError> {
        postcard::from_bytes(bytes).map_err(|e| AssembleError::Serialization(e.to_string()))
    }
}
