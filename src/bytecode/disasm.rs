use crate::analysis::State;
use crate::analysis::cfg::BlockGraph;
use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::ir::CodeUnit;
use crate::bytecode::line_table::LineTable;
use crate::bytecode::op::{CmpOp, Opcode, OperandKind};
use std::collections::BTreeSet;

/// One instruction with its EXTENDED_ARG prefixes folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstr {
    /// Offset of the first prefix, or of the instruction itself.
    pub offset: u32,
    pub len: u32,
    pub op: Opcode,
    pub arg: u32,
}

impl DecodedInstr {
    pub fn jump_target(&self) -> Option<u32> {
        match self.op.operand_kind() {
            OperandKind::AbsLabel => Some(self.arg),
            OperandKind::RelLabel => Some(self.offset + self.len + self.arg),
            _ => None,
        }
    }
}

/// Splits `code` back into instructions.
pub fn decode(code: &[u8]) -> Result<Vec<DecodedInstr>, AssembleError> {
    let mut out = Vec::new();
    let mut start: Option<u32> = None;
    let mut arg: u32 = 0;

    for (i, pair) in code.chunks(2).enumerate() {
        let offset = (i * 2) as u32;
        let &[byte, operand] = pair else {
            return Err(AssembleError::TruncatedCode { offset });
        };
        let op = Opcode::from_u8(byte).ok_or(AssembleError::UnknownOpcode { offset, byte })?;
        let first = *start.get_or_insert(offset);

        arg = (arg << 8) | u32::from(operand);
        if op == Opcode::ExtendedArg {
            continue;
        }
        out.push(DecodedInstr {
            offset: first,
            len: offset + 2 - first,
            op,
            arg: if op.has_argument() { arg } else { 0 },
        });
        start = None;
        arg = 0;
    }

    if let Some(offset) = start {
        return Err(AssembleError::TruncatedCode { offset });
    }
    Ok(out)
}

// =============================================================================
// Listing
// =============================================================================

/// Print disassembly of a code unit
pub fn print_unit(unit: &CodeUnit) {
    println!("════════════════════════════════════════");
    println!(" {}", unit.name);
    println!(
        " {} bytes, stack depth {}, flags {}",
        unit.code.len(),
        unit.stack_depth,
        unit.flags
    );
    println!("════════════════════════════════════════");
    match disassemble_to_string(unit) {
        Ok(listing) => print!("{}", listing),
        Err(e) => println!("<undecodable: {}>", e),
    }
    println!();
}

/// Return disassembly as a String
///
/// One line per instruction: source line (when it changes), offset,
/// jump-target marker, mnemonic, raw operand and its resolved meaning.
pub fn disassemble_to_string(unit: &CodeUnit) -> Result<String, AssembleError> {
    let instrs = decode(&unit.code)?;
    let targets: BTreeSet<u32> = instrs.iter().filter_map(DecodedInstr::jump_target).collect();
    let lines = LineTable::entries(unit.first_line, &unit.line_table);

    let mut output = String::new();
    let mut last_line = None;
    for instr in &instrs {
        if targets.contains(&instr.offset) {
            output.push_str("           ┌──────────────────────────────────\n");
        }

        let line = lines
            .iter()
            .take_while(|(start, _)| *start <= instr.offset)
            .last()
            .map_or(unit.first_line, |(_, line)| *line);
        if last_line == Some(line) {
            output.push_str("     ");
        } else {
            output.push_str(&format!("{:>4} ", line));
            last_line = Some(line);
        }

        output.push_str(&format!("{:04} ", instr.offset));
        if targets.contains(&instr.offset) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }
        output.push_str(&format_instr(unit, instr));
        output.push('\n');
    }

    Ok(output)
}

fn format_instr(unit: &CodeUnit, instr: &DecodedInstr) -> String {
    let name = instr.op.mnemonic();
    if !instr.op.has_argument() {
        return name.to_string();
    }

    let i = instr.arg as usize;
    let missing = || "?".to_string();
    let detail = match instr.op.operand_kind() {
        OperandKind::Constant => unit.constants.get(i).map_or_else(missing, |c| c.to_string()),
        OperandKind::Name => unit.names.get(i).cloned().unwrap_or_else(missing),
        OperandKind::Local => unit.locals.get(i).cloned().unwrap_or_else(missing),
        OperandKind::Free => unit.free_vars.get(i).cloned().unwrap_or_else(missing),
        OperandKind::Compare => CmpOp::from_index(instr.arg).map_or_else(missing, |c| c.to_string()),
        OperandKind::AbsLabel | OperandKind::RelLabel => {
            let target = instr.jump_target().unwrap_or(instr.arg);
            let direction = if target <= instr.offset { "↑" } else { "↓" };
            format!("{} (→ {:04})", direction, target)
        }
        OperandKind::Arg | OperandKind::None => String::new(),
    };

    if detail.is_empty() {
        format!("{:<20} {}", name, instr.arg)
    } else {
        format!("{:<20} {:<5} ; {}", name, instr.arg, detail)
    }
}

// =============================================================================
// Solved blocks
// =============================================================================

/// Lists every block of a solved graph with its deltas, edges and the
/// entry/exit state pairs the solver settled on.
pub fn blocks_to_string(graph: &BlockGraph) -> String {
    let mut output = String::new();
    for (id, node) in graph.iter() {
        let block = &node.block;
        output.push_str(&format!(
            "block {}  delta {:+}  peak {:+}\n",
            id, block.delta, block.max_delta
        ));
        for instr in &block.instrs {
            let delta = instr
                .delta
                .map_or_else(|| "edge".to_string(), |d| format!("{:+}", d));
            output.push_str(&format!(
                "  {:04} {:<20} {:>5}\n",
                instr.offset, instr.op, delta
            ));
        }
        for (target, edges) in &block.targets {
            for edge in edges {
                output.push_str(&format!("  -> {} {}\n", target, edge));
            }
        }
        for state in &node.states {
            let entry = State {
                stack: &state.stack - block.delta,
                ..state.clone()
            };
            output.push_str(&format!("  entry {}  exit {}\n", entry, state));
        }
    }
    output
}
