//! Two-phase wordcode encoder.
//!
//! [`layout`] fixes every instruction's byte length in one forward walk.
//! Backward references are exact; forward references are sized for the
//! furthest their target could possibly be. [`emit`] then writes the bytes
//! with every operand resolved, padding with zero prefixes where the real
//! operand turned out smaller than its reserved width.

use std::collections::BTreeMap;
use std::hash::Hash;

use hashbrown::HashMap;

use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::ir::{Instr, Label, Operand};
use crate::bytecode::op::{Opcode, OperandKind};
use crate::lang::value::Constant;

/// Three EXTENDED_ARG prefixes plus the instruction itself.
pub const MAX_INSTR_LEN: u32 = 8;

/// Bytes needed to carry `arg`.
pub fn encoded_len(arg: u32) -> u32 {
    match arg {
        0..=0xFF => 2,
        0x100..=0xFFFF => 4,
        0x1_0000..=0xFF_FFFF => 6,
        _ => 8,
    }
}

fn encoded_len_wide(bound: u64) -> u32 {
    u32::try_from(bound).map_or(MAX_INSTR_LEN, encoded_len)
}

// =============================================================================
// Intern tables
// =============================================================================

/// Insertion-ordered set where the first insertion of a value fixes its index.
#[derive(Debug, Clone)]
pub struct InternTable<T> {
    items: Vec<T>,
    index: HashMap<T, u32>,
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> InternTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> u32 {
        if let Some(&i) = self.index.get(&value) {
            return i;
        }
        let i = self.items.len() as u32;
        self.index.insert(value.clone(), i);
        self.items.push(value);
        i
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

// =============================================================================
// Phase 1
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedInstr {
    /// Position in the caller's instruction list.
    pub index: usize,
    pub line: u32,
    pub op: Opcode,
    pub operand: Operand,
    /// Resolved operand; for labels, final only after [`emit`].
    pub arg: u32,
    /// Byte offset of the jump target, set by [`emit`].
    pub target: Option<u32>,
    pub target_index: Option<usize>,
    pub offset: u32,
    /// Total bytes including EXTENDED_ARG prefixes.
    pub len: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub instrs: Vec<EncodedInstr>,
    pub total_len: u32,
    pub constants: InternTable<Constant>,
    pub names: InternTable<String>,
    pub locals: InternTable<String>,
    pub free_vars: InternTable<String>,
}

pub fn layout(instrs: &[Instr], labels: &BTreeMap<Label, usize>) -> Result<Layout, AssembleError> {
    let mut out = Layout::default();
    let mut offset: u32 = 0;

    for (i, instr) in instrs.iter().enumerate() {
        let kind = instr.op.operand_kind();
        if !instr.operand.fits(kind) {
            return Err(AssembleError::OperandMismatch {
                index: i,
                op: instr.op,
                expected: kind,
            });
        }

        let mut target_index = None;
        let (arg, len) = match &instr.operand {
            Operand::None => (0, 2),
            Operand::Arg(n) => (*n, encoded_len(*n)),
            Operand::Compare(c) => (c.index(), 2),
            Operand::Constant(c) => sized(out.constants.insert(c.clone())),
            Operand::Name(s) => sized(out.names.insert(s.clone())),
            Operand::Local(s) => sized(out.locals.insert(s.clone())),
            Operand::Free(s) => sized(out.free_vars.insert(s.clone())),
            Operand::Label(label) => {
                let t = *labels.get(label).ok_or_else(|| AssembleError::UnknownLabel {
                    index: i,
                    label: label.name().to_string(),
                })?;
                if t >= instrs.len() {
                    return Err(AssembleError::DanglingLabel {
                        label: label.name().to_string(),
                    });
                }
                target_index = Some(t);
                size_jump(i, t, offset, kind, instr.op, &out.instrs)?
            }
        };

        out.instrs.push(EncodedInstr {
            index: i,
            line: instr.line,
            op: instr.op,
            operand: instr.operand.clone(),
            arg,
            target: None,
            target_index,
            offset,
            len,
        });
        offset += len;
    }

    out.total_len = offset;
    Ok(out)
}

fn sized(arg: u32) -> (u32, u32) {
    (arg, encoded_len(arg))
}

/// Length reserved for a jump at `i` (starting at `offset`) to instruction `t`.
fn size_jump(
    i: usize,
    t: usize,
    offset: u32,
    kind: OperandKind,
    op: Opcode,
    placed: &[EncodedInstr],
) -> Result<(u32, u32), AssembleError> {
    if t <= i {
        let target = if t == i { offset } else { placed[t].offset };
        return match kind {
            OperandKind::RelLabel => Err(AssembleError::FixupOverflow {
                index: i,
                op,
                value: i64::from(target) - i64::from(offset) - 2,
                len: 2,
            }),
            _ => Ok(sized(target)),
        };
    }

    let span = (t - i) as u64;
    let bound = match kind {
        OperandKind::RelLabel => (span - 1) * u64::from(MAX_INSTR_LEN),
        _ => u64::from(offset) + span * u64::from(MAX_INSTR_LEN),
    };
    let len = encoded_len_wide(bound);
    if len > 2 {
        tracing::trace!(
            "instruction {} ({}) reserves {} bytes for forward jump, bound {}",
            i,
            op,
            len,
            bound
        );
    }
    Ok((0, len))
}

// =============================================================================
// Phase 2
// =============================================================================

/// Resolves every jump operand and writes the bytes.
pub fn emit(layout: &mut Layout) -> Result<Vec<u8>, AssembleError> {
    let offsets: Vec<u32> = layout.instrs.iter().map(|e| e.offset).collect();
    let mut code = Vec::with_capacity(layout.total_len as usize);

    for instr in &mut layout.instrs {
        if let Some(t) = instr.target_index {
            let target = offsets[t];
            let value = match instr.op.operand_kind() {
                OperandKind::RelLabel => {
                    i64::from(target) - i64::from(instr.offset) - i64::from(instr.len)
                }
                _ => i64::from(target),
            };
            instr.arg = u32::try_from(value).map_err(|_| AssembleError::FixupOverflow {
                index: instr.index,
                op: instr.op,
                value,
                len: instr.len,
            })?;
            instr.target = Some(target);
        }
        write_instr(&mut code, instr)?;
    }

    let actual = code.len() as u32;
    if actual != layout.total_len {
        return Err(AssembleError::EncodingInconsistency {
            expected: layout.total_len,
            actual,
        });
    }
    Ok(code)
}

fn write_instr(code: &mut Vec<u8>, instr: &EncodedInstr) -> Result<(), AssembleError> {
    let prefixes = instr.len / 2 - 1;
    let arg = u64::from(instr.arg);
    if arg >> (8 * (prefixes + 1)) != 0 {
        return Err(AssembleError::FixupOverflow {
            index: instr.index,
            op: instr.op,
            value: i64::from(instr.arg),
            len: instr.len,
        });
    }

    for k in (1..=prefixes).rev() {
        code.push(Opcode::ExtendedArg as u8);
        code.push((arg >> (8 * k)) as u8);
    }
    code.push(instr.op as u8);
    code.push(if instr.op.has_argument() { arg as u8 } else { 0 });
    Ok(())
}
