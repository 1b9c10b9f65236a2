//! End-to-end tests for the register-traffic optimizer
//!
//! Each test drives the optimizer the way the front-end would and asserts on
//! the exact node stream reaching the downstream stage.

mod common;

use argent::bytecode::{
    BytecodeArrayWriter, BytecodeNode, BytecodePipelineStage, BytecodeRegisterOptimizer, Opcode,
    OperandScale, Register, RegisterFrame, TemporaryRegisterAllocator,
};
use common::{ldar, mov, optimizer, standard_frame, star, CollectingStage};
use pretty_assertions::assert_eq;

#[test]
fn test_load_store_fuses_into_move() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    // r0 = a1; return r0;
    optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
    optimizer.write(&mut star(&frame, Register::Local(0)));
    optimizer.write(&mut BytecodeNode::new(Opcode::Return));
    optimizer.flush_basic_block();

    assert_eq!(
        stage.opcodes(),
        vec![Opcode::Mov, Opcode::Ldar, Opcode::Return]
    );
    assert_eq!(stage.output[0].operand(0), frame.operand(Register::Parameter(1)));
    assert_eq!(stage.output[0].operand(1), frame.operand(Register::Local(0)));
    // The return value is reloaded from the local, the nearest materialized
    // copy, not the parameter.
    assert_eq!(stage.output[1].operand(0), frame.operand(Register::Local(0)));
}

#[test]
fn test_store_to_released_temporary_is_never_emitted() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    let temp = optimizer.new_temporary().unwrap();
    optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
    optimizer.write(&mut star(&frame, temp));
    optimizer.release_temporary(temp);
    optimizer.write(&mut BytecodeNode::new(Opcode::Return));
    optimizer.flush_basic_block();

    assert_eq!(stage.opcodes(), vec![Opcode::Ldar, Opcode::Return]);
    assert_eq!(stage.output[0].operand(0), frame.operand(Register::Parameter(1)));
}

#[test]
fn test_release_of_materialized_temporary_keeps_pending_value_reachable() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    // t = 1; acc = 2; acc = t; then t's live range ends. The release must
    // copy the temporary's value into the pending accumulator before the
    // slot is recycled, or the return reads a stale accumulator.
    let temp = optimizer.new_temporary().unwrap();
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::LdaSmi,
        &[1],
        OperandScale::Single,
    ));
    optimizer.write(&mut star(&frame, temp));
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::LdaSmi,
        &[2],
        OperandScale::Single,
    ));
    optimizer.write(&mut ldar(&frame, temp));
    optimizer.release_temporary(temp);
    optimizer.write(&mut BytecodeNode::new(Opcode::Return));
    optimizer.flush_basic_block();

    assert_eq!(
        stage.opcodes(),
        vec![
            Opcode::LdaSmi,
            Opcode::Star,
            Opcode::LdaSmi,
            Opcode::Ldar,
            Opcode::Return,
        ]
    );
    // The first store materializes before its value is clobbered; the
    // release forces the deferred reload out while the slot still holds it.
    assert_eq!(stage.output[1].operand(0), frame.operand(temp));
    assert_eq!(stage.output[3].operand(0), frame.operand(temp));
}

#[test]
fn test_temporary_not_materialized_for_single_register_input() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    // t0 = a1; t1 = a1; runtime_call(t0..t0+1) — the argument reads through
    // to a1 and neither move is ever emitted.
    let t0 = optimizer.new_temporary().unwrap();
    let t1 = optimizer.new_temporary().unwrap();
    optimizer.write(&mut mov(&frame, Register::Parameter(1), t0));
    optimizer.write(&mut mov(&frame, Register::Parameter(1), t1));
    let mut call = BytecodeNode::with_operands(
        Opcode::CallRuntime,
        &[7, frame.operand(t0), 1],
        OperandScale::Single,
    );
    optimizer.write(&mut call);

    assert_eq!(stage.opcodes(), vec![Opcode::CallRuntime]);
    assert_eq!(stage.output[0].operand(0), 7);
    assert_eq!(stage.output[0].operand(1), frame.operand(Register::Parameter(1)));
    assert_eq!(stage.output[0].operand(2), 1);
}

#[test]
fn test_range_of_temporaries_materialized_for_input() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    let t0 = optimizer.new_temporary().unwrap();
    let t1 = optimizer.new_temporary().unwrap();
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::LdaSmi,
        &[3],
        OperandScale::Single,
    ));
    optimizer.write(&mut star(&frame, t0));
    optimizer.write(&mut mov(&frame, Register::Parameter(1), t1));
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::CallRuntime,
        &[7, frame.operand(t0), 2],
        OperandScale::Single,
    ));

    // A multi-register range is consumed positionally, so both pending
    // transfers come out in range order, unsubstituted.
    assert_eq!(
        stage.opcodes(),
        vec![Opcode::LdaSmi, Opcode::Star, Opcode::Mov, Opcode::CallRuntime]
    );
    assert_eq!(stage.output[1].operand(0), frame.operand(t0));
    assert_eq!(stage.output[2].operand(1), frame.operand(t1));
    assert_eq!(stage.output[3].operand(1), frame.operand(t0));
    assert_eq!(stage.output[3].operand(2), 2);
}

#[test]
fn test_jump_materializes_state_and_breaks_equivalences() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
    optimizer.write(&mut star(&frame, Register::Local(0)));
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::JumpIfTrue,
        &[0],
        OperandScale::Single,
    ));
    // Before the jump this store would have been elided as redundant; the
    // equivalence does not survive into code a jump target can reach.
    optimizer.write(&mut star(&frame, Register::Local(0)));

    assert_eq!(
        stage.opcodes(),
        vec![Opcode::Mov, Opcode::Ldar, Opcode::JumpIfTrue, Opcode::Star]
    );
    assert_eq!(stage.output[3].operand(0), frame.operand(Register::Local(0)));
}

#[test]
fn test_debugger_flushes_like_a_jump() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    optimizer.write(&mut ldar(&frame, Register::Parameter(2)));
    optimizer.write(&mut BytecodeNode::new(Opcode::Debugger));

    // The pending accumulator load materializes so the debugger observes a
    // consistent frame.
    assert_eq!(stage.opcodes(), vec![Opcode::Ldar, Opcode::Debugger]);
}

#[test]
fn test_elided_transfer_emits_nop_carrying_source_position() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    let mut load = ldar(&frame, Register::Parameter(1));
    load.source_info_mut()
        .update(argent::bytecode::BytecodeSourceInfo::Statement(3));
    optimizer.write(&mut load);
    let mut store = star(&frame, Register::Local(0));
    store
        .source_info_mut()
        .update(argent::bytecode::BytecodeSourceInfo::Statement(21));
    optimizer.write(&mut store);

    // The deferred load leaves a Nop behind so the debugger can still step
    // to statement 3; the store comes out fused and keeps its own position.
    assert_eq!(stage.opcodes(), vec![Opcode::Nop, Opcode::Mov]);
    assert_eq!(
        stage.output[0].source_info(),
        argent::bytecode::BytecodeSourceInfo::Statement(3)
    );
    assert_eq!(
        stage.output[1].source_info(),
        argent::bytecode::BytecodeSourceInfo::Statement(21)
    );
}

#[test]
fn test_operand_substitution_recomputes_scale() {
    let frame = RegisterFrame::new(2, 1).unwrap();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    // Push the live temporary past the single-byte operand range.
    let mut temp = optimizer.new_temporary().unwrap();
    for _ in 0..299 {
        temp = optimizer.new_temporary().unwrap();
    }
    assert_eq!(frame.operand(temp), 302);

    optimizer.write(&mut mov(&frame, Register::Parameter(1), temp));
    optimizer.write(&mut BytecodeNode::with_operands(
        Opcode::CallRuntime,
        &[7, frame.operand(temp), 1],
        OperandScale::Double,
    ));

    // Substituting a1 for the wide temporary shrinks every operand back
    // into one byte.
    assert_eq!(stage.opcodes(), vec![Opcode::CallRuntime]);
    assert_eq!(stage.output[0].operands(), &[7, 1, 1]);
    assert_eq!(stage.output[0].operand_scale(), OperandScale::Single);
}

#[test]
fn test_flush_for_offset_passes_through_with_exact_size() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    assert_eq!(optimizer.flush_for_offset(), 0);

    optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
    // The deferred load must be forced out so the reported offset is final.
    let offset = optimizer.flush_for_offset();
    assert_eq!(offset, 2);
    assert_eq!(optimizer.flush_for_offset(), offset);

    assert_eq!(stage.opcodes(), vec![Opcode::Ldar]);
    assert_eq!(stage.flush_for_offset_count, 3);
}

#[test]
fn test_flush_basic_block_forwards_downstream() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
    optimizer.flush_basic_block();
    // A second flush with nothing pending still reaches the next stage.
    optimizer.flush_basic_block();

    assert_eq!(stage.opcodes(), vec![Opcode::Ldar]);
    assert_eq!(stage.flush_basic_block_count, 2);
}

#[test]
fn test_temporary_high_water_mark_sizes_the_frame() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    let t0 = optimizer.new_temporary().unwrap();
    let t1 = optimizer.new_temporary().unwrap();
    optimizer.release_temporary(t1);
    optimizer.release_temporary(t0);
    let t2 = optimizer.new_temporary().unwrap();
    assert_eq!(t2, Register::Temporary(0));
    assert_eq!(optimizer.temporary_count(), 2);
}

#[test]
fn test_non_transfer_instructions_pass_through_unchanged() {
    let frame = standard_frame();
    let mut stage = CollectingStage::default();
    let mut optimizer = optimizer(frame, &mut stage);

    let mut node = BytecodeNode::with_operands(
        Opcode::Add,
        &[frame.operand(Register::Local(0))],
        OperandScale::Single,
    );
    let expected = node.clone();
    optimizer.write(&mut node);

    assert_eq!(stage.output, vec![expected]);
}

#[test]
fn test_full_pipeline_serializes_optimized_stream() {
    let frame = standard_frame();
    let mut writer = BytecodeArrayWriter::new();
    let temporaries;
    {
        let mut optimizer =
            BytecodeRegisterOptimizer::new(frame, TemporaryRegisterAllocator::new(), &mut writer);
        optimizer.write(&mut ldar(&frame, Register::Parameter(1)));
        optimizer.write(&mut star(&frame, Register::Local(0)));
        optimizer.write(&mut BytecodeNode::new(Opcode::Return));
        optimizer.flush_basic_block();
        temporaries = optimizer.temporary_count();
    }
    let chunk = writer.into_chunk(&frame, temporaries);

    assert_eq!(
        chunk.code,
        vec![
            Opcode::Mov as u8,
            frame.operand(Register::Parameter(1)) as u8,
            frame.operand(Register::Local(0)) as u8,
            Opcode::Ldar as u8,
            frame.operand(Register::Local(0)) as u8,
            Opcode::Return as u8,
        ]
    );
    assert_eq!(temporaries, 0);

    let listing = chunk.disassemble("fused");
    assert!(listing.contains("Mov"));
    assert!(listing.contains("a1"));
    assert!(listing.contains("r0"));
}
