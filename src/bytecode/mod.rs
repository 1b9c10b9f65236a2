//! Bytecode generation pipeline for the Argent VM
//!
//! The front-end walks the syntax tree and drives this pipeline one
//! instruction node at a time:
//!
//! front-end → [`BytecodeRegisterOptimizer`] → [`BytecodeArrayWriter`] → [`Chunk`]
//!
//! The register optimizer removes provably redundant accumulator loads,
//! stores, and register moves within each basic block; the array writer
//! serializes what survives. Both implement the same
//! [`BytecodePipelineStage`] contract, so the optimizer can be dropped from
//! the chain without changing neighboring code.

mod array_writer;
mod opcode;
mod pipeline;
mod register;
mod register_optimizer;

pub use array_writer::BytecodeArrayWriter;
pub use opcode::{AccumulatorUse, Opcode, OperandScale, OperandType};
pub use pipeline::{BytecodeNode, BytecodePipelineStage, BytecodeSourceInfo, MAX_OPERANDS};
pub use register::{Register, RegisterFrame, TemporaryRegisterAllocator};
pub use register_optimizer::BytecodeRegisterOptimizer;

use std::fmt;

/// Source position recorded against a bytecode offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePositionEntry {
    /// Byte offset of the instruction in [`Chunk::code`]
    pub offset: usize,
    /// Source position the instruction is attributed to
    pub position: u32,
    /// Whether the position is a statement boundary (a debugger step target)
    pub is_statement: bool,
}

/// A serialized bytecode array with its frame layout
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Encoded instructions
    pub code: Vec<u8>,
    /// Source position table, ordered by offset
    pub source_positions: Vec<SourcePositionEntry>,
    /// Number of parameter slots (receiver included)
    pub parameter_count: u16,
    /// Number of declared local slots
    pub local_count: u16,
    /// Number of scratch slots reserved beyond the locals (allocator
    /// high-water mark)
    pub temporary_count: u16,
}

impl Chunk {
    /// Total register slots the frame reserves
    pub fn register_count(&self) -> usize {
        self.parameter_count as usize + self.local_count as usize + self.temporary_count as usize
    }

    /// Disassemble the chunk for debugging
    pub fn disassemble(&self, name: &str) -> String {
        let mut output = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            let (instruction, next_offset) = self.disassemble_instruction(offset);
            output.push_str(&instruction);
            output.push('\n');
            offset = next_offset;
        }
        output
    }

    /// Disassemble a single instruction
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let position = self
            .source_positions
            .iter()
            .find(|entry| entry.offset == offset);
        let position_str = match position {
            Some(entry) if entry.is_statement => format!("{:4}S", entry.position),
            Some(entry) => format!("{:4}E", entry.position),
            None => "    |".to_string(),
        };

        let mut cursor = offset;
        let mut scale = OperandScale::Single;
        let mut opcode = match Opcode::from_u8(self.code[cursor]) {
            Some(opcode) => opcode,
            None => {
                let text = format!("{:04} {} UNKNOWN({})", offset, position_str, self.code[cursor]);
                return (text, cursor + 1);
            }
        };
        if opcode.is_prefix() {
            scale = if opcode == Opcode::Wide {
                OperandScale::Double
            } else {
                OperandScale::Quadruple
            };
            cursor += 1;
            opcode = match Opcode::from_u8(self.code[cursor]) {
                Some(opcode) => opcode,
                None => {
                    let text =
                        format!("{:04} {} UNKNOWN({})", offset, position_str, self.code[cursor]);
                    return (text, cursor + 1);
                }
            };
        }
        cursor += 1;

        let mut operands = String::new();
        for operand_type in opcode.operand_types() {
            let value = self.read_operand(cursor, scale);
            cursor += scale.bytes();
            if !operands.is_empty() {
                operands.push_str(", ");
            }
            match operand_type {
                OperandType::Reg | OperandType::RegRange => {
                    operands.push_str(&self.register_name(value));
                }
                OperandType::Imm | OperandType::Idx | OperandType::RegCount => {
                    operands.push_str(&value.to_string());
                }
            }
        }

        let text = format!(
            "{:04} {} {:12} {}",
            offset,
            position_str,
            format!("{:?}", opcode),
            operands
        );
        (text, cursor)
    }

    fn read_operand(&self, offset: usize, scale: OperandScale) -> u32 {
        match scale {
            OperandScale::Single => u32::from(self.code[offset]),
            OperandScale::Double => {
                u32::from(u16::from_le_bytes([self.code[offset], self.code[offset + 1]]))
            }
            OperandScale::Quadruple => u32::from_le_bytes([
                self.code[offset],
                self.code[offset + 1],
                self.code[offset + 2],
                self.code[offset + 3],
            ]),
        }
    }

    fn register_name(&self, operand: u32) -> String {
        let parameters = u32::from(self.parameter_count);
        let fixed = parameters + u32::from(self.local_count);
        if operand < parameters {
            format!("a{}", operand)
        } else if operand < fixed {
            format!("r{}", operand - parameters)
        } else {
            format!("t{}", operand - fixed)
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.disassemble("chunk"))
    }
}
