use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::cfg::{BlockGraph, CfgBuilder};
use crate::analysis::solver::{self, SolveStats, SolverConfig};
use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::encode;
use crate::bytecode::ir::{CodeFlags, CodeUnit, Instr, Label};
use crate::bytecode::line_table::LineTable;
use crate::bytecode::op::Opcode;

/// Configuration for a single assembly.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Known depth bound; skips the analysis entirely.
    pub stack_depth: Option<u32>,
    pub solver: SolverConfig,
    /// Defaults to the line of the first instruction.
    pub first_line: Option<u32>,
}

/// A verified code unit plus the solved graph it was checked against.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub unit: CodeUnit,
    /// `None` when the depth was supplied by the caller.
    pub graph: Option<BlockGraph>,
    pub stats: Option<SolveStats>,
}

pub fn assemble(
    name: &str,
    instrs: &[Instr],
    labels: &BTreeMap<Label, usize>,
    options: &AssembleOptions,
) -> Result<Assembly, AssembleError> {
    if let Some((label, _)) = labels.iter().find(|(_, index)| **index >= instrs.len()) {
        return Err(AssembleError::DanglingLabel {
            label: label.name().to_string(),
        });
    }

    let mut layout = encode::layout(instrs, labels)?;
    let code = encode::emit(&mut layout)?;
    tracing::debug!(
        "{}: encoded {} instructions into {} bytes",
        name,
        layout.instrs.len(),
        code.len()
    );

    let first_line = options
        .first_line
        .or_else(|| instrs.first().map(|i| i.line))
        .unwrap_or(1);
    let mut lines = LineTable::new(first_line);
    for instr in &layout.instrs {
        lines.add(instr.line, instr.offset);
    }

    let mut flags = CodeFlags::OPTIMIZED;
    for instr in instrs {
        match instr.op {
            Opcode::YieldValue => flags.insert(CodeFlags::GENERATOR),
            Opcode::LoadName | Opcode::StoreName | Opcode::DeleteName => {
                flags.remove(CodeFlags::OPTIMIZED)
            }
            _ => {}
        }
    }
    if !layout.locals.is_empty() {
        flags.insert(CodeFlags::NEWLOCALS);
    }
    if layout.free_vars.is_empty() {
        flags.insert(CodeFlags::NOFREE);
    }

    let (stack_depth, graph, stats) = match options.stack_depth {
        Some(depth) => (depth, None, None),
        None => {
            let label_offsets: BTreeSet<u32> = labels
                .values()
                .map(|index| layout.instrs[*index].offset)
                .collect();
            let mut builder = CfgBuilder::new(&label_offsets);
            for instr in &layout.instrs {
                builder.insert(instr);
            }
            let mut graph = builder.finish();
            let stats = solver::solve(&mut graph, &options.solver)?;
            let depth = solver::max_depth(&graph)?;
            tracing::debug!(
                "{}: {} blocks, {} rounds, max depth {}",
                name,
                graph.len(),
                stats.rounds,
                depth
            );
            (depth, Some(graph), Some(stats))
        }
    };

    let unit = CodeUnit {
        name: name.to_string(),
        code,
        constants: layout.constants.into_vec(),
        names: layout.names.into_vec(),
        locals: layout.locals.into_vec(),
        free_vars: layout.free_vars.into_vec(),
        first_line,
        line_table: lines.into_bytes(),
        stack_depth,
        flags,
    };
    Ok(Assembly { unit, graph, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Operand;
    use crate::lang::value::Constant;

    fn ins(line: u32, op: Opcode, operand: Operand) -> Instr {
        Instr { line, op, operand }
    }

    fn none() -> Operand {
        Operand::Constant(Constant::None)
    }

    #[test]
    fn test_push_return() {
        let instrs = vec![
            ins(1, Opcode::LoadConst, Operand::Constant(Constant::Int(1))),
            ins(1, Opcode::ReturnValue, Operand::None),
        ];
        let asm = assemble("f", &instrs, &BTreeMap::new(), &AssembleOptions::default()).unwrap();
        assert_eq!(asm.unit.code.len(), 4);
        assert_eq!(asm.unit.stack_depth, 1);
        assert_eq!(asm.unit.constants, vec![Constant::Int(1)]);
        assert!(asm.graph.is_some());
    }

    #[test]
    fn test_depth_override_skips_analysis() {
        let instrs = vec![
            ins(1, Opcode::LoadConst, none()),
            ins(1, Opcode::ReturnValue, Operand::None),
        ];
        let options = AssembleOptions {
            stack_depth: Some(9),
            ..AssembleOptions::default()
        };
        let asm = assemble("f", &instrs, &BTreeMap::new(), &options).unwrap();
        assert_eq!(asm.unit.stack_depth, 9);
        assert!(asm.graph.is_none());
        assert!(asm.stats.is_none());
    }

    #[test]
    fn test_flags() {
        let instrs = vec![
            ins(1, Opcode::LoadFast, Operand::Local("x".into())),
            ins(1, Opcode::YieldValue, Operand::None),
            ins(1, Opcode::ReturnValue, Operand::None),
        ];
        let asm = assemble("g", &instrs, &BTreeMap::new(), &AssembleOptions::default()).unwrap();
        let flags = asm.unit.flags;
        assert!(flags.contains(CodeFlags::OPTIMIZED));
        assert!(flags.contains(CodeFlags::GENERATOR));
        assert!(flags.contains(CodeFlags::NEWLOCALS));
        assert!(flags.contains(CodeFlags::NOFREE));

        let instrs = vec![
            ins(1, Opcode::LoadName, Operand::Name("x".into())),
            ins(1, Opcode::LoadDeref, Operand::Free("y".into())),
            ins(1, Opcode::BinaryAdd, Operand::None),
            ins(1, Opcode::ReturnValue, Operand::None),
        ];
        let asm = assemble("h", &instrs, &BTreeMap::new(), &AssembleOptions::default()).unwrap();
        assert_eq!(asm.unit.flags, CodeFlags::default());
        assert_eq!(asm.unit.stack_depth, 2);
    }

    #[test]
    fn test_line_table_follows_instructions() {
        let instrs = vec![
            ins(4, Opcode::LoadConst, none()),
            ins(4, Opcode::PopTop, Operand::None),
            ins(6, Opcode::LoadConst, none()),
            ins(6, Opcode::ReturnValue, Operand::None),
        ];
        let asm = assemble("f", &instrs, &BTreeMap::new(), &AssembleOptions::default()).unwrap();
        assert_eq!(asm.unit.first_line, 4);
        assert_eq!(asm.unit.line_table, vec![4, 2]);
    }

    #[test]
    fn test_dangling_label() {
        let instrs = vec![ins(1, Opcode::ReturnValue, Operand::None)];
        let labels = BTreeMap::from([(Label::new("end"), 1)]);
        let err = assemble("f", &instrs, &labels, &AssembleOptions::default()).unwrap_err();
        assert_eq!(
            err,
            AssembleError::DanglingLabel {
                label: "end".to_string()
            }
        );
    }
}
