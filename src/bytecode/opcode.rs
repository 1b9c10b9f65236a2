//! Bytecode opcodes for the Argent VM
//!
//! This module defines the instruction set used by the interpreter and the
//! fixed classification tables the pipeline stages dispatch through. The
//! opcode set is closed: every property a stage needs (operand layout,
//! accumulator use, control-flow effect) is a total function of the opcode.

use bitflags::bitflags;

/// Bytecode opcodes
///
/// Most value-producing opcodes operate through the implicit accumulator;
/// explicit register operands name parameter, local, or temporary slots in
/// the unified frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ========== Prefixes ==========
    /// No operation
    Nop = 0x00,
    /// Prefix: operands of the following opcode are 2 bytes wide
    Wide = 0x01,
    /// Prefix: operands of the following opcode are 4 bytes wide
    ExtraWide = 0x02,

    // ========== Accumulator Loads ==========
    /// Load a constant-pool entry into the accumulator
    /// Operands: constant_index
    LdaConstant = 0x10,
    /// Load a small integer immediate into the accumulator
    /// Operands: immediate
    LdaSmi = 0x11,
    /// Load zero into the accumulator
    LdaZero = 0x12,
    /// Load undefined into the accumulator
    LdaUndefined = 0x13,
    /// Load null into the accumulator
    LdaNull = 0x14,
    /// Load true into the accumulator
    LdaTrue = 0x15,
    /// Load false into the accumulator
    LdaFalse = 0x16,

    // ========== Register Traffic ==========
    /// Load the accumulator from a register
    /// Operands: register
    Ldar = 0x20,
    /// Store the accumulator into a register
    /// Operands: register
    Star = 0x21,
    /// Copy one register into another without touching the accumulator
    /// Operands: source register, destination register
    Mov = 0x22,

    // ========== Binary Operations ==========
    /// accumulator = accumulator + register
    Add = 0x30,
    /// accumulator = accumulator - register
    Sub = 0x31,
    /// accumulator = accumulator * register
    Mul = 0x32,
    /// accumulator = accumulator / register
    Div = 0x33,
    /// accumulator = accumulator % register
    Mod = 0x34,

    // ========== Unary Operations ==========
    /// Increment the accumulator
    Inc = 0x40,
    /// Decrement the accumulator
    Dec = 0x41,
    /// Negate the accumulator
    Negate = 0x42,
    /// Logical-not the accumulator
    LogicalNot = 0x43,
    /// Replace the accumulator with its type name
    TypeOf = 0x44,

    // ========== Calls ==========
    /// Call the function in |callee| with a contiguous argument range
    /// Operands: callee register, range start register, range count
    Call = 0x50,
    /// Call a runtime function with a contiguous argument range
    /// Operands: runtime id, range start register, range count
    CallRuntime = 0x51,

    // ========== Control Flow ==========
    /// Unconditional relative jump
    /// Operands: offset
    Jump = 0x60,
    /// Jump if the accumulator is true
    /// Operands: offset
    JumpIfTrue = 0x61,
    /// Jump if the accumulator is false
    /// Operands: offset
    JumpIfFalse = 0x62,
    /// Return the accumulator to the caller
    Return = 0x70,
    /// Throw the accumulator as an exception
    Throw = 0x71,
    /// Break into an attached debugger
    Debugger = 0x7F,
}

/// Interpretation of one raw operand word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// Immediate value (jump offset, small integer)
    Imm,
    /// Index into an out-of-line table (constant pool, runtime id)
    Idx,
    /// Single register read
    Reg,
    /// First register of a contiguous range, consumed positionally
    RegRange,
    /// Register count for the preceding range operand
    RegCount,
}

bitflags! {
    /// How an opcode uses the implicit accumulator
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccumulatorUse: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// Operand width shared by every operand of one instruction
///
/// The scale is the smallest width able to encode the largest operand value
/// present; scaled instructions are serialized behind a [`Opcode::Wide`] or
/// [`Opcode::ExtraWide`] prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OperandScale {
    Single = 1,
    Double = 2,
    Quadruple = 4,
}

impl OperandScale {
    /// Number of bytes one operand occupies at this scale
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Smallest scale able to encode |value|
    pub fn for_value(value: u32) -> Self {
        if value <= u8::MAX as u32 {
            OperandScale::Single
        } else if value <= u16::MAX as u32 {
            OperandScale::Double
        } else {
            OperandScale::Quadruple
        }
    }

    /// Smallest scale able to encode every operand in |operands|
    pub fn for_operands(operands: &[u32]) -> Self {
        operands
            .iter()
            .map(|&operand| Self::for_value(operand))
            .max()
            .unwrap_or(OperandScale::Single)
    }

    /// Prefix opcode announcing this scale, if any
    pub fn prefix(self) -> Option<Opcode> {
        match self {
            OperandScale::Single => None,
            OperandScale::Double => Some(Opcode::Wide),
            OperandScale::Quadruple => Some(Opcode::ExtraWide),
        }
    }
}

impl Opcode {
    /// Operand layout for this opcode
    pub fn operand_types(self) -> &'static [OperandType] {
        use OperandType::*;
        match self {
            Opcode::Nop
            | Opcode::Wide
            | Opcode::ExtraWide
            | Opcode::LdaZero
            | Opcode::LdaUndefined
            | Opcode::LdaNull
            | Opcode::LdaTrue
            | Opcode::LdaFalse
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::Negate
            | Opcode::LogicalNot
            | Opcode::TypeOf
            | Opcode::Return
            | Opcode::Throw
            | Opcode::Debugger => &[],

            Opcode::LdaConstant => &[Idx],
            Opcode::LdaSmi => &[Imm],

            Opcode::Ldar | Opcode::Star => &[Reg],
            Opcode::Mov => &[Reg, Reg],

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => &[Reg],

            Opcode::Call => &[Reg, RegRange, RegCount],
            Opcode::CallRuntime => &[Idx, RegRange, RegCount],

            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => &[Imm],
        }
    }

    /// Number of operands this opcode carries
    pub fn operand_count(self) -> usize {
        self.operand_types().len()
    }

    /// How this opcode uses the accumulator
    pub fn accumulator_use(self) -> AccumulatorUse {
        match self {
            Opcode::LdaConstant
            | Opcode::LdaSmi
            | Opcode::LdaZero
            | Opcode::LdaUndefined
            | Opcode::LdaNull
            | Opcode::LdaTrue
            | Opcode::LdaFalse
            | Opcode::Ldar
            | Opcode::Call
            | Opcode::CallRuntime => AccumulatorUse::WRITE,

            Opcode::Star
            | Opcode::JumpIfTrue
            | Opcode::JumpIfFalse
            | Opcode::Return
            | Opcode::Throw => AccumulatorUse::READ,

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::Negate
            | Opcode::LogicalNot
            | Opcode::TypeOf => AccumulatorUse::READ | AccumulatorUse::WRITE,

            Opcode::Nop | Opcode::Wide | Opcode::ExtraWide | Opcode::Mov | Opcode::Jump
            | Opcode::Debugger => AccumulatorUse::empty(),
        }
    }

    /// True for opcodes that transfer control by relative offset
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse
        )
    }

    /// True for the operand-scale prefix pseudo-opcodes
    pub fn is_prefix(self) -> bool {
        matches!(self, Opcode::Wide | Opcode::ExtraWide)
    }

    /// Decode an opcode from its byte value
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        let opcode = match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Wide,
            0x02 => Opcode::ExtraWide,
            0x10 => Opcode::LdaConstant,
            0x11 => Opcode::LdaSmi,
            0x12 => Opcode::LdaZero,
            0x13 => Opcode::LdaUndefined,
            0x14 => Opcode::LdaNull,
            0x15 => Opcode::LdaTrue,
            0x16 => Opcode::LdaFalse,
            0x20 => Opcode::Ldar,
            0x21 => Opcode::Star,
            0x22 => Opcode::Mov,
            0x30 => Opcode::Add,
            0x31 => Opcode::Sub,
            0x32 => Opcode::Mul,
            0x33 => Opcode::Div,
            0x34 => Opcode::Mod,
            0x40 => Opcode::Inc,
            0x41 => Opcode::Dec,
            0x42 => Opcode::Negate,
            0x43 => Opcode::LogicalNot,
            0x44 => Opcode::TypeOf,
            0x50 => Opcode::Call,
            0x51 => Opcode::CallRuntime,
            0x60 => Opcode::Jump,
            0x61 => Opcode::JumpIfTrue,
            0x62 => Opcode::JumpIfFalse,
            0x70 => Opcode::Return,
            0x71 => Opcode::Throw,
            0x7F => Opcode::Debugger,
            _ => return None,
        };
        Some(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPCODES: &[Opcode] = &[
        Opcode::Nop,
        Opcode::Wide,
        Opcode::ExtraWide,
        Opcode::LdaConstant,
        Opcode::LdaSmi,
        Opcode::LdaZero,
        Opcode::LdaUndefined,
        Opcode::LdaNull,
        Opcode::LdaTrue,
        Opcode::LdaFalse,
        Opcode::Ldar,
        Opcode::Star,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::Negate,
        Opcode::LogicalNot,
        Opcode::TypeOf,
        Opcode::Call,
        Opcode::CallRuntime,
        Opcode::Jump,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::Return,
        Opcode::Throw,
        Opcode::Debugger,
    ];

    #[test]
    fn test_from_u8_roundtrip() {
        for &opcode in ALL_OPCODES {
            assert_eq!(Opcode::from_u8(opcode as u8), Some(opcode));
        }
        assert_eq!(Opcode::from_u8(0xEE), None);
    }

    #[test]
    fn test_operand_tables_are_consistent() {
        for &opcode in ALL_OPCODES {
            let types = opcode.operand_types();
            assert!(types.len() <= 4);
            // Every range operand is immediately followed by its count.
            for (i, ty) in types.iter().enumerate() {
                if *ty == OperandType::RegRange {
                    assert_eq!(types.get(i + 1), Some(&OperandType::RegCount));
                }
            }
        }
    }

    #[test]
    fn test_accumulator_use() {
        assert_eq!(Opcode::LdaSmi.accumulator_use(), AccumulatorUse::WRITE);
        assert_eq!(Opcode::Star.accumulator_use(), AccumulatorUse::READ);
        assert_eq!(
            Opcode::Add.accumulator_use(),
            AccumulatorUse::READ | AccumulatorUse::WRITE
        );
        assert_eq!(Opcode::Mov.accumulator_use(), AccumulatorUse::empty());
        assert!(Opcode::Return.accumulator_use().contains(AccumulatorUse::READ));
    }

    #[test]
    fn test_jump_classification() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::JumpIfFalse.is_jump());
        assert!(!Opcode::Return.is_jump());
        assert!(!Opcode::Debugger.is_jump());
    }

    #[test]
    fn test_operand_scale_for_value() {
        assert_eq!(OperandScale::for_value(0), OperandScale::Single);
        assert_eq!(OperandScale::for_value(255), OperandScale::Single);
        assert_eq!(OperandScale::for_value(256), OperandScale::Double);
        assert_eq!(OperandScale::for_value(65535), OperandScale::Double);
        assert_eq!(OperandScale::for_value(65536), OperandScale::Quadruple);
    }

    #[test]
    fn test_operand_scale_for_operands() {
        assert_eq!(OperandScale::for_operands(&[]), OperandScale::Single);
        assert_eq!(OperandScale::for_operands(&[1, 2, 3]), OperandScale::Single);
        assert_eq!(
            OperandScale::for_operands(&[1, 300, 3]),
            OperandScale::Double
        );
        assert_eq!(
            OperandScale::for_operands(&[1, 300, 70000]),
            OperandScale::Quadruple
        );
    }

    #[test]
    fn test_scale_prefix() {
        assert_eq!(OperandScale::Single.prefix(), None);
        assert_eq!(OperandScale::Double.prefix(), Some(Opcode::Wide));
        assert_eq!(OperandScale::Quadruple.prefix(), Some(Opcode::ExtraWide));
    }
}
