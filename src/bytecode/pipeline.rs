//! Pipeline stage contract and the instruction node it carries
//!
//! Bytecode generation is a chain of stages. Each stage accepts one
//! instruction node at a time, may buffer or rewrite it, and forwards zero or
//! more nodes to the next stage. The node delivered to
//! [`BytecodePipelineStage::write`] is only valid for the duration of the
//! call; a stage that defers must clone it.

use std::fmt;

use super::opcode::{Opcode, OperandScale};

/// Maximum number of operand words one instruction carries
pub const MAX_OPERANDS: usize = 4;

/// Source code position attached to an instruction
///
/// Statement positions mark debugger step targets; expression positions only
/// refine diagnostics. When the optimizer combines or elides instructions,
/// two tags can collapse onto one emitted node via [`update`](Self::update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BytecodeSourceInfo {
    /// No position attached
    #[default]
    None,
    /// Expression-level position
    Expression(u32),
    /// Statement boundary position
    Statement(u32),
}

impl BytecodeSourceInfo {
    pub fn is_valid(self) -> bool {
        !matches!(self, BytecodeSourceInfo::None)
    }

    pub fn is_statement(self) -> bool {
        matches!(self, BytecodeSourceInfo::Statement(_))
    }

    pub fn position(self) -> Option<u32> {
        match self {
            BytecodeSourceInfo::None => None,
            BytecodeSourceInfo::Expression(position) | BytecodeSourceInfo::Statement(position) => {
                Some(position)
            }
        }
    }

    /// Combine a later source info with the current one
    ///
    /// The incoming tag is adopted when (1) there is no existing tag, (2) the
    /// incoming tag is a statement and the existing one is an expression, or
    /// (3) both are statements and the incoming position is later. A
    /// statement marking is never downgraded: debuggers step to statement
    /// boundaries, and dropping one would break single-stepping.
    pub fn update(&mut self, entry: BytecodeSourceInfo) {
        use BytecodeSourceInfo::*;
        let adopt = match (*self, entry) {
            (_, None) => false,
            (None, _) => true,
            (Expression(_), Statement(_)) => true,
            (Statement(current), Statement(incoming)) => incoming > current,
            (Expression(_), Expression(_)) | (Statement(_), Expression(_)) => false,
        };
        if adopt {
            *self = entry;
        }
    }

    /// Clear the position
    pub fn invalidate(&mut self) {
        *self = BytecodeSourceInfo::None;
    }
}

impl fmt::Display for BytecodeSourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytecodeSourceInfo::None => write!(f, "?"),
            BytecodeSourceInfo::Expression(position) => write!(f, "{}E", position),
            BytecodeSourceInfo::Statement(position) => write!(f, "{}S", position),
        }
    }
}

/// A generated instruction: opcode, operands, operand scale, source position
///
/// Operand words are raw `u32`s; their interpretation is opcode-dependent
/// (see [`Opcode::operand_types`]). All operands of one node share a single
/// [`OperandScale`].
#[derive(Debug, Clone)]
pub struct BytecodeNode {
    opcode: Opcode,
    operands: [u32; MAX_OPERANDS],
    operand_scale: OperandScale,
    source_info: BytecodeSourceInfo,
}

impl BytecodeNode {
    /// Create a node for an opcode with no operands
    pub fn new(opcode: Opcode) -> Self {
        debug_assert_eq!(opcode.operand_count(), 0);
        Self {
            opcode,
            operands: [0; MAX_OPERANDS],
            operand_scale: OperandScale::Single,
            source_info: BytecodeSourceInfo::None,
        }
    }

    /// Create a node from an opcode and its operand words
    pub fn with_operands(opcode: Opcode, operands: &[u32], operand_scale: OperandScale) -> Self {
        debug_assert_eq!(opcode.operand_count(), operands.len());
        debug_assert!(operands.len() <= MAX_OPERANDS);
        let mut words = [0; MAX_OPERANDS];
        words[..operands.len()].copy_from_slice(operands);
        Self {
            opcode,
            operands: words,
            operand_scale,
            source_info: BytecodeSourceInfo::None,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn operand_count(&self) -> usize {
        self.opcode.operand_count()
    }

    /// Operand word |index|; requesting an index beyond the opcode's declared
    /// count is a programming error.
    pub fn operand(&self, index: usize) -> u32 {
        debug_assert!(index < self.operand_count());
        self.operands[index]
    }

    /// Rewrite operand word |index| in place
    pub fn set_operand(&mut self, index: usize, value: u32) {
        debug_assert!(index < self.operand_count());
        self.operands[index] = value;
    }

    /// The operand words actually used by this opcode
    pub fn operands(&self) -> &[u32] {
        &self.operands[..self.operand_count()]
    }

    pub fn operand_scale(&self) -> OperandScale {
        self.operand_scale
    }

    pub fn set_operand_scale(&mut self, operand_scale: OperandScale) {
        self.operand_scale = operand_scale;
    }

    pub fn source_info(&self) -> BytecodeSourceInfo {
        self.source_info
    }

    pub fn source_info_mut(&mut self) -> &mut BytecodeSourceInfo {
        &mut self.source_info
    }

    /// Serialized size in bytes: one opcode byte, a prefix byte when scaled,
    /// and one word of `operand_scale` bytes per operand.
    pub fn size(&self) -> usize {
        let prefix = if self.operand_scale.prefix().is_some() {
            1
        } else {
            0
        };
        1 + prefix + self.operand_count() * self.operand_scale.bytes()
    }

    /// Reclassify in place to |new_opcode|, which takes exactly one operand
    /// more than the current opcode, appending |extra_operand|. Used to fuse
    /// two nodes into one (a deferred load plus a store becoming a move).
    /// The operand scale is recomputed for the new operand set.
    pub fn transform(&mut self, new_opcode: Opcode, extra_operand: u32) {
        debug_assert_eq!(new_opcode.operand_count(), self.operand_count() + 1);
        let count = self.operand_count();
        self.operands[count] = extra_operand;
        self.opcode = new_opcode;
        self.operand_scale = OperandScale::for_operands(self.operands());
    }
}

impl PartialEq for BytecodeNode {
    fn eq(&self, other: &Self) -> bool {
        // Only the operand words the opcode declares participate.
        self.opcode == other.opcode
            && self.operands() == other.operands()
            && self.operand_scale == other.operand_scale
            && self.source_info == other.source_info
    }
}

impl Eq for BytecodeNode {}

impl fmt::Display for BytecodeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;
        for operand in self.operands() {
            write!(f, " {}", operand)?;
        }
        if self.source_info.is_valid() {
            write!(f, " [{}]", self.source_info)?;
        }
        Ok(())
    }
}

/// Contract every bytecode pipeline stage implements
///
/// The register optimizer both consumes and provides this contract, so it
/// can be inserted into or removed from the pipeline without changing
/// neighboring code.
pub trait BytecodePipelineStage {
    /// Accept one instruction node. The node is only valid for the duration
    /// of the call; clone it when deferring to a later `write`.
    fn write(&mut self, node: &mut BytecodeNode);

    /// Force pending state out so the running serialized size is exact, and
    /// return the cumulative size in bytes of everything forwarded so far.
    /// Used when a downstream consumer needs an authoritative byte offset.
    fn flush_for_offset(&mut self) -> usize;

    /// Force pending state out and discard per-block bookkeeping. Called at
    /// every control-flow join or split boundary.
    fn flush_basic_block(&mut self);
}
