use proptest::prelude::*;

use stackasm::analysis::BlockId;
use stackasm::bytecode::disasm::{decode, disassemble_to_string};
use stackasm::bytecode::encode::encoded_len;
use stackasm::bytecode::{
    AssembleError, AssembleOptions, CodeUnit, FunctionBuilder, Opcode, Operand, OperandKind,
};
use stackasm::frontend::parse_source;

fn loop_builder() -> FunctionBuilder {
    let mut b = FunctionBuilder::default();
    let after = b.make_label();
    let head = b.make_label();
    let done = b.make_label();
    b.setup_loop(&after).load_fast("xs").get_iter();
    b.place_label(&head).unwrap();
    b.for_iter(&done).store_fast("x").jump_absolute(&head);
    b.place_label(&done).unwrap();
    b.pop_block();
    b.place_label(&after).unwrap();
    b.return_none();
    b
}

/// Maximum running sum of static stack effects over straight-line code.
fn linear_depth(code: &[u8]) -> i64 {
    let mut depth = 0i64;
    let mut peak = 0i64;
    for instr in decode(code).unwrap() {
        depth += i64::from(instr.op.stack_effect(instr.arg));
        peak = peak.max(depth);
    }
    peak
}

#[test]
fn test_push_and_return() {
    let mut b = FunctionBuilder::default();
    b.load_const(1i64).return_value();
    let unit = b.make("one").unwrap();
    assert_eq!(unit.code.len(), 4);
    assert_eq!(unit.stack_depth, 1);
    assert_eq!(decode(&unit.code).unwrap().len(), 2);
}

#[test]
fn test_push_push_pop_pop() {
    let mut b = FunctionBuilder::default();
    b.load_const(1i64)
        .load_const(2i64)
        .pop_top()
        .pop_top()
        .return_none();
    let unit = b.make("pairs").unwrap();
    assert_eq!(unit.stack_depth, 2);
    assert_eq!(unit.constants.len(), 3);
}

#[test]
fn test_forward_branches_merge_to_one_state() {
    let mut b = FunctionBuilder::default();
    let other = b.make_label();
    let end = b.make_label();
    b.load_global("c").pop_jump_if_false(&other);
    b.load_const(1i64).jump_forward(&end);
    b.place_label(&other).unwrap();
    b.load_const(2i64);
    b.place_label(&end).unwrap();
    b.return_value();

    let asm = b.assemble("choose", &AssembleOptions::default()).unwrap();
    assert_eq!(asm.unit.stack_depth, 1);
    let graph = asm.graph.unwrap();
    for (id, node) in graph.code_blocks() {
        assert_eq!(node.states.len(), 1, "block {}", id);
    }
    assert!(graph.contains(BlockId(10)));
}

#[test]
fn test_loop_head_bounded_visits() {
    let asm = loop_builder()
        .assemble("loop", &AssembleOptions::default())
        .unwrap();
    assert_eq!(asm.unit.code.len(), 18);
    assert_eq!(asm.unit.stack_depth, 2);
    let stats = asm.stats.unwrap();
    assert!(stats.rounds <= 3, "loop took {} rounds", stats.rounds);
    for (id, visits) in &stats.visits {
        assert!(*visits <= 3, "block {} visited {} times", id, visits);
    }
}

#[test]
fn test_long_block_chain_within_default_budget() {
    let mut b = FunctionBuilder::default();
    for _ in 0..1100 {
        b.emit_label();
        b.emit_op(Opcode::Nop);
    }
    b.return_none();

    let asm = b.assemble("chain", &AssembleOptions::default()).unwrap();
    assert_eq!(asm.unit.stack_depth, 1);
    assert_eq!(asm.stats.map(|s| s.rounds), Some(1));
}

#[test]
fn test_backward_jump_is_exact() {
    let mut b = FunctionBuilder::default();
    for _ in 0..150 {
        b.emit_op(Opcode::Nop);
    }
    let head = b.emit_label();
    b.emit_op(Opcode::Nop).jump_absolute(&head);

    let unit = b.make("spin").unwrap();
    let decoded = decode(&unit.code).unwrap();
    let jump = decoded.last().copied().unwrap();
    assert_eq!(jump.op, Opcode::JumpAbsolute);
    assert_eq!(jump.arg, 300);
    assert_eq!(jump.len, encoded_len(300));
    assert_eq!(unit.code.len(), 302 + 4);
    assert_eq!(unit.stack_depth, 0);
}

#[test]
fn test_widened_forward_jump_decodes() {
    let mut b = FunctionBuilder::default();
    let end = b.make_label();
    b.load_global("c").pop_jump_if_false(&end);
    for _ in 0..100 {
        b.emit_op(Opcode::Nop);
    }
    b.place_label(&end).unwrap();
    b.return_none();

    let unit = b.make("wide").unwrap();
    assert_eq!(unit.code.len(), 210);
    let decoded = decode(&unit.code).unwrap();
    let jump = decoded[1];
    assert_eq!((jump.offset, jump.len, jump.op), (2, 4, Opcode::PopJumpIfFalse));
    assert_eq!(jump.arg, 206);
    // Padding prefixes come first, most significant byte first.
    assert_eq!(&unit.code[2..6], &[144, 0, 114, 206]);
    let target = decoded.iter().find(|d| d.offset == 206).map(|d| d.op);
    assert_eq!(target, Some(Opcode::LoadConst));
}

#[test]
fn test_reassembly_is_identical() {
    let b = loop_builder();
    let first = b.assemble("loop", &AssembleOptions::default()).unwrap();
    let second = b.assemble("loop", &AssembleOptions::default()).unwrap();
    assert_eq!(first.unit, second.unit);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_depth_override_skips_analysis() {
    let options = AssembleOptions {
        stack_depth: Some(9),
        ..AssembleOptions::default()
    };
    let asm = loop_builder().assemble("loop", &options).unwrap();
    assert_eq!(asm.unit.stack_depth, 9);
    assert!(asm.graph.is_none());
    assert!(asm.stats.is_none());
}

#[test]
fn test_straight_line_matches_linear_scan() {
    let mut b = FunctionBuilder::default();
    b.load_const(1i64)
        .load_const(2i64)
        .build_tuple(2)
        .load_const(3i64)
        .load_const(4i64)
        .load_const(5i64)
        .build_tuple(3)
        .build_tuple(2)
        .pop_top()
        .return_none();
    let unit = b.make("tuples").unwrap();
    assert_eq!(linear_depth(&unit.code), 4);
    assert_eq!(i64::from(unit.stack_depth), linear_depth(&unit.code));
}

#[test]
fn test_operand_mismatch() {
    let mut b = FunctionBuilder::default();
    b.emit(Opcode::LoadFast, Operand::Arg(1));
    let err = b.make("bad").unwrap_err();
    assert_eq!(
        err,
        AssembleError::OperandMismatch {
            index: 0,
            op: Opcode::LoadFast,
            expected: OperandKind::Local,
        }
    );
}

#[test]
fn test_unknown_label() {
    let mut b = FunctionBuilder::default();
    let nowhere = b.make_label();
    b.jump_absolute(&nowhere);
    let err = b.make("bad").unwrap_err();
    assert!(matches!(err, AssembleError::UnknownLabel { index: 0, .. }));
}

#[test]
fn test_dangling_label() {
    let mut b = FunctionBuilder::default();
    b.return_none();
    b.emit_label();
    let err = b.make("bad").unwrap_err();
    assert!(matches!(err, AssembleError::DanglingLabel { .. }));
}

#[test]
fn test_convergence_budget_reported() {
    let options = AssembleOptions {
        solver: stackasm::analysis::solver::SolverConfig { max_rounds: 1 },
        ..AssembleOptions::default()
    };
    let err = loop_builder().assemble("loop", &options).unwrap_err();
    assert!(matches!(err, AssembleError::ConvergenceFailure { rounds: 1, .. }));
    assert!(err.is_internal());
}

#[test]
fn test_text_program() {
    let source = "\
# for x in xs: pass
    SETUP_LOOP after
    LOAD_FAST xs
    GET_ITER
head:
    FOR_ITER done
    STORE_FAST x
    JUMP_ABSOLUTE head
done:
    POP_BLOCK
after:
    LOAD_CONST None
    RETURN_VALUE
";
    let builder = parse_source(source).unwrap();
    let unit = builder.make("loop").unwrap();
    assert_eq!(unit.code, loop_builder().make("loop").unwrap().code);
    assert_eq!(unit.stack_depth, 2);
    assert_eq!(unit.first_line, 2);

    let listing = disassemble_to_string(&unit).unwrap();
    assert!(listing.contains("FOR_ITER"));
    assert!(listing.contains("RETURN_VALUE"));
}

#[test]
fn test_code_unit_binary_round_trip() {
    let unit = loop_builder().make("loop").unwrap();
    let bytes = unit.to_bytes().unwrap();
    assert_eq!(CodeUnit::from_bytes(&bytes).unwrap(), unit);
}

#[test]
fn test_truncated_binary_rejected() {
    let unit = loop_builder().make("loop").unwrap();
    let bytes = unit.to_bytes().unwrap();
    let err = CodeUnit::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, AssembleError::Serialization(_)));
}

proptest! {
    #[test]
    fn prop_straight_line_depth_matches_linear_scan(pushes in proptest::collection::vec(any::<bool>(), 1..60)) {
        let mut b = FunctionBuilder::default();
        let mut depth = 0u32;
        for push in pushes {
            if push || depth == 0 {
                b.load_const(i64::from(depth));
                depth += 1;
            } else {
                b.pop_top();
                depth -= 1;
            }
        }
        for _ in 0..depth {
            b.pop_top();
        }
        b.return_none();

        let unit = b.make("random").unwrap();
        prop_assert_eq!(i64::from(unit.stack_depth), linear_depth(&unit.code));
    }
}
