//! Terminal pipeline stage that serializes instruction nodes
//!
//! The writer is the stage the register optimizer forwards into: it encodes
//! each node into the final byte stream (prefix byte when scaled, opcode
//! byte, little-endian operand words) and records source positions against
//! byte offsets. Jump-offset patching is owned by the surrounding driver and
//! happens on the serialized bytes; operands are written as given.

use tracing::trace;

use super::pipeline::{BytecodeNode, BytecodePipelineStage};
use super::register::RegisterFrame;
use super::{Chunk, SourcePositionEntry};
use crate::bytecode::opcode::OperandScale;

/// Accumulates the serialized bytecode array
#[derive(Debug, Default)]
pub struct BytecodeArrayWriter {
    code: Vec<u8>,
    source_positions: Vec<SourcePositionEntry>,
}

impl BytecodeArrayWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes serialized so far
    pub fn size(&self) -> usize {
        self.code.len()
    }

    /// Finish writing and package the output with its frame layout
    pub fn into_chunk(self, frame: &RegisterFrame, temporary_count: u16) -> Chunk {
        Chunk {
            code: self.code,
            source_positions: self.source_positions,
            parameter_count: frame.parameter_count(),
            local_count: frame.local_count(),
            temporary_count,
        }
    }

    fn emit(&mut self, node: &BytecodeNode) {
        let offset = self.code.len();
        if let Some(position) = node.source_info().position() {
            self.source_positions.push(SourcePositionEntry {
                offset,
                position,
                is_statement: node.source_info().is_statement(),
            });
        }

        let scale = node.operand_scale();
        if let Some(prefix) = scale.prefix() {
            self.code.push(prefix as u8);
        }
        self.code.push(node.opcode() as u8);
        for &operand in node.operands() {
            match scale {
                OperandScale::Single => {
                    debug_assert!(operand <= u8::MAX as u32);
                    self.code.push(operand as u8);
                }
                OperandScale::Double => {
                    debug_assert!(operand <= u16::MAX as u32);
                    self.code.extend_from_slice(&(operand as u16).to_le_bytes());
                }
                OperandScale::Quadruple => {
                    self.code.extend_from_slice(&operand.to_le_bytes());
                }
            }
        }
        trace!(offset, opcode = ?node.opcode(), "emitted instruction");
        debug_assert_eq!(self.code.len() - offset, node.size());
    }
}

impl BytecodePipelineStage for BytecodeArrayWriter {
    fn write(&mut self, node: &mut BytecodeNode) {
        self.emit(node);
    }

    fn flush_for_offset(&mut self) -> usize {
        self.code.len()
    }

    fn flush_basic_block(&mut self) {
        // Terminal stage: nothing buffered, nothing to discard.
    }
}
