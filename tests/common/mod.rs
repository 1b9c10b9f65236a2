//! Shared helpers for integration tests

use argent::bytecode::{
    BytecodeNode, BytecodePipelineStage, BytecodeRegisterOptimizer, Opcode, OperandScale, Register,
    RegisterFrame, TemporaryRegisterAllocator,
};

/// Terminal stage recording everything forwarded to it
#[derive(Default)]
pub struct CollectingStage {
    pub output: Vec<BytecodeNode>,
    pub flush_for_offset_count: usize,
    pub flush_basic_block_count: usize,
}

impl BytecodePipelineStage for CollectingStage {
    fn write(&mut self, node: &mut BytecodeNode) {
        self.output.push(node.clone());
    }

    fn flush_for_offset(&mut self) -> usize {
        self.flush_for_offset_count += 1;
        self.output.iter().map(BytecodeNode::size).sum()
    }

    fn flush_basic_block(&mut self) {
        self.flush_basic_block_count += 1;
    }
}

impl CollectingStage {
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.output.iter().map(BytecodeNode::opcode).collect()
    }
}

/// Frame shaped like most tests want: receiver + two parameters, one local
pub fn standard_frame() -> RegisterFrame {
    RegisterFrame::new(3, 1).unwrap()
}

pub fn optimizer<'a>(
    frame: RegisterFrame,
    stage: &'a mut CollectingStage,
) -> BytecodeRegisterOptimizer<'a> {
    BytecodeRegisterOptimizer::new(frame, TemporaryRegisterAllocator::new(), stage)
}

pub fn ldar(frame: &RegisterFrame, register: Register) -> BytecodeNode {
    let operand = frame.operand(register);
    BytecodeNode::with_operands(Opcode::Ldar, &[operand], OperandScale::for_value(operand))
}

pub fn star(frame: &RegisterFrame, register: Register) -> BytecodeNode {
    let operand = frame.operand(register);
    BytecodeNode::with_operands(Opcode::Star, &[operand], OperandScale::for_value(operand))
}

pub fn mov(frame: &RegisterFrame, from: Register, to: Register) -> BytecodeNode {
    let operands = [frame.operand(from), frame.operand(to)];
    BytecodeNode::with_operands(Opcode::Mov, &operands, OperandScale::for_operands(&operands))
}
