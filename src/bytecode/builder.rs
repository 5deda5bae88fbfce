use std::collections::BTreeMap;

use crate::bytecode::assemble::{self, AssembleOptions, Assembly};
use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::ir::{CodeUnit, Instr, Label, Operand};
use crate::bytecode::op::{CmpOp, Opcode};
use crate::lang::value::Constant;

/// Records instructions in program order, then hands them to [`assemble`].
///
/// Operands are not checked against their opcodes until assembly, so a
/// mismatch is reported with the index of the offending instruction.
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    instrs: Vec<Instr>,
    labels: BTreeMap<Label, usize>,
    line: u32,
    next_label: usize,
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FunctionBuilder {
    pub fn new(first_line: u32) -> Self {
        Self {
            instrs: Vec::new(),
            labels: BTreeMap::new(),
            line: first_line,
            next_label: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn labels(&self) -> &BTreeMap<Label, usize> {
        &self.labels
    }

    // =========================================================================
    // Labels and lines
    // =========================================================================

    pub fn make_label(&mut self) -> Label {
        self.make_label_with("auto")
    }

    pub fn make_label_with(&mut self, head: &str) -> Label {
        let label = Label::new(format!("{}_{}", head, self.next_label));
        self.next_label += 1;
        label
    }

    /// Binds `label` to the next instruction emitted.
    pub fn place_label(&mut self, label: &Label) -> Result<(), AssembleError> {
        if self.labels.contains_key(label) {
            return Err(AssembleError::DuplicateLabel {
                label: label.name().to_string(),
            });
        }
        self.labels.insert(label.clone(), self.instrs.len());
        Ok(())
    }

    /// Makes a fresh label and places it here.
    pub fn emit_label(&mut self) -> Label {
        let label = self.make_label();
        self.labels.insert(label.clone(), self.instrs.len());
        label
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn inc_line(&mut self, delta: u32) {
        self.line += delta;
    }

    // =========================================================================
    // Typed emitters
    // =========================================================================

    pub fn emit(&mut self, op: Opcode, operand: Operand) -> &mut Self {
        self.instrs.push(Instr {
            line: self.line,
            op,
            operand,
        });
        self
    }

    pub fn emit_op(&mut self, op: Opcode) -> &mut Self {
        self.emit(op, Operand::None)
    }

    pub fn emit_arg(&mut self, op: Opcode, arg: u32) -> &mut Self {
        self.emit(op, Operand::Arg(arg))
    }

    pub fn emit_name(&mut self, op: Opcode, name: &str) -> &mut Self {
        self.emit(op, Operand::Name(name.to_string()))
    }

    pub fn emit_local(&mut self, op: Opcode, name: &str) -> &mut Self {
        self.emit(op, Operand::Local(name.to_string()))
    }

    pub fn emit_free(&mut self, op: Opcode, name: &str) -> &mut Self {
        self.emit(op, Operand::Free(name.to_string()))
    }

    pub fn emit_jump(&mut self, op: Opcode, target: &Label) -> &mut Self {
        self.emit(op, Operand::Label(target.clone()))
    }

    pub fn compare(&mut self, cmp: CmpOp) -> &mut Self {
        self.emit(Opcode::CompareOp, Operand::Compare(cmp))
    }

    pub fn load_const(&mut self, value: impl Into<Constant>) -> &mut Self {
        self.emit(Opcode::LoadConst, Operand::Constant(value.into()))
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.emit(Opcode::LoadConst, Operand::Constant(Constant::None))
    }

    // =========================================================================
    // Common opcodes
    // =========================================================================

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        self.emit_local(Opcode::LoadFast, name)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        self.emit_local(Opcode::StoreFast, name)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.emit_name(Opcode::LoadName, name)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        self.emit_name(Opcode::StoreName, name)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.emit_name(Opcode::LoadGlobal, name)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        self.emit_name(Opcode::LoadAttr, name)
    }

    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        self.emit_free(Opcode::LoadDeref, name)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.emit_op(Opcode::PopTop)
    }

    pub fn dup_top(&mut self) -> &mut Self {
        self.emit_op(Opcode::DupTop)
    }

    pub fn binary_add(&mut self) -> &mut Self {
        self.emit_op(Opcode::BinaryAdd)
    }

    pub fn get_iter(&mut self) -> &mut Self {
        self.emit_op(Opcode::GetIter)
    }

    pub fn build_tuple(&mut self, count: u32) -> &mut Self {
        self.emit_arg(Opcode::BuildTuple, count)
    }

    pub fn call_function(&mut self, argc: u32) -> &mut Self {
        self.emit_arg(Opcode::CallFunction, argc)
    }

    pub fn raise_varargs(&mut self, argc: u32) -> &mut Self {
        self.emit_arg(Opcode::RaiseVarargs, argc)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.emit_op(Opcode::ReturnValue)
    }

    pub fn return_none(&mut self) -> &mut Self {
        self.load_none().return_value()
    }

    pub fn jump_absolute(&mut self, target: &Label) -> &mut Self {
        self.emit_jump(Opcode::JumpAbsolute, target)
    }

    pub fn jump_forward(&mut self, target: &Label) -> &mut Self {
        self.emit_jump(Opcode::JumpForward, target)
    }

    pub fn pop_jump_if_false(&mut self, target: &Label) -> &mut Self {
        self.emit_jump(Opcode::PopJumpIfFalse, target)
    }

    pub fn pop_jump_if_true(&mut self, target: &Label) -> &mut Self {
        self.emit_jump(Opcode::PopJumpIfTrue, target)
    }

    pub fn for_iter(&mut self, done: &Label) -> &mut Self {
        self.emit_jump(Opcode::ForIter, done)
    }

    pub fn setup_loop(&mut self, after: &Label) -> &mut Self {
        self.emit_jump(Opcode::SetupLoop, after)
    }

    pub fn setup_except(&mut self, handler: &Label) -> &mut Self {
        self.emit_jump(Opcode::SetupExcept, handler)
    }

    pub fn setup_finally(&mut self, handler: &Label) -> &mut Self {
        self.emit_jump(Opcode::SetupFinally, handler)
    }

    pub fn setup_with(&mut self, handler: &Label) -> &mut Self {
        self.emit_jump(Opcode::SetupWith, handler)
    }

    pub fn pop_block(&mut self) -> &mut Self {
        self.emit_op(Opcode::PopBlock)
    }

    pub fn pop_except(&mut self) -> &mut Self {
        self.emit_op(Opcode::PopExcept)
    }

    pub fn end_finally(&mut self) -> &mut Self {
        self.emit_op(Opcode::EndFinally)
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    pub fn assemble(&self, name: &str, options: &AssembleOptions) -> Result<Assembly, AssembleError> {
        assemble::assemble(name, &self.instrs, &self.labels, options)
    }

    /// Assembles with default options and keeps only the code unit.
    pub fn make(&self, name: &str) -> Result<CodeUnit, AssembleError> {
        self.assemble(name, &AssembleOptions::default())
            .map(|assembly| assembly.unit)
    }
}
