//! Register-traffic optimizer
//!
//! The front-end emits naive accumulator traffic: nearly every expression
//! round-trips through `Ldar`/`Star` and a scratch temporary. This stage
//! sits between the front-end and the array writer and removes the provably
//! redundant part of that traffic while preserving exact observable
//! semantics, including debugger-visible source positions and the byte
//! offsets downstream jump patching depends on.
//!
//! The optimizer tracks equivalence classes of slots (the accumulator plus
//! every register) known to hold the same runtime value within the current
//! basic block. `Ldar`, `Star`, and `Mov` are never forwarded directly:
//! they only update the classes, and physical transfers are materialized on
//! demand — when an operand needs a concrete register, when a store target
//! is observable beyond the expression (a parameter or local), or when a
//! basic-block boundary invalidates the tracked equalities. A temporary
//! released with its pending write unread costs nothing at all.

use tracing::{debug, trace};

use super::opcode::{AccumulatorUse, Opcode, OperandScale, OperandType};
use super::pipeline::{BytecodeNode, BytecodePipelineStage, BytecodeSourceInfo};
use super::register::{Register, RegisterFrame, TemporaryRegisterAllocator};
use crate::error::Result;

type EquivalenceId = u32;

/// Index into the optimizer's slot table; slot 0 is the accumulator
type SlotIndex = usize;

const ACCUMULATOR_SLOT: SlotIndex = 0;

/// Per-slot equivalence bookkeeping
///
/// `materialized` records whether some already-forwarded instruction has
/// physically written the class value into this slot, as opposed to the
/// value being only logically implied by tracked traffic.
#[derive(Debug, Clone, Copy)]
struct SlotInfo {
    /// `None` for the accumulator, which is not addressable as an operand
    register: Option<Register>,
    class: EquivalenceId,
    materialized: bool,
}

/// Pipeline stage eliding redundant register and accumulator traffic
///
/// Lives for exactly one function compilation. Owns its frame layout and the
/// temporary allocator; borrows the downstream stage, which must outlive it.
pub struct BytecodeRegisterOptimizer<'a> {
    frame: RegisterFrame,
    allocator: TemporaryRegisterAllocator,
    /// Accumulator followed by every tracked register, indexed by
    /// `1 + flat operand`
    slots: Vec<SlotInfo>,
    /// Arena of class member lists, indexed by class id; member order is
    /// join order, which materialization walks cyclically
    classes: Vec<Vec<SlotIndex>>,
    next_stage: &'a mut dyn BytecodePipelineStage,
    /// Set once any equivalence spans more than one slot
    flush_required: bool,
}

impl<'a> BytecodeRegisterOptimizer<'a> {
    pub fn new(
        frame: RegisterFrame,
        allocator: TemporaryRegisterAllocator,
        next_stage: &'a mut dyn BytecodePipelineStage,
    ) -> Self {
        let fixed = 1 + frame.parameter_count() as usize + frame.local_count() as usize;
        let mut slots = Vec::with_capacity(fixed);
        let mut classes = Vec::with_capacity(fixed);
        // Every slot starts as its own materialized singleton: the caller
        // guarantees parameter contents, and each remaining slot physically
        // holds whatever value it currently has.
        for index in 0..fixed {
            let register = if index == ACCUMULATOR_SLOT {
                None
            } else {
                Some(frame.register_for_operand(index as u32 - 1))
            };
            classes.push(vec![index]);
            slots.push(SlotInfo {
                register,
                class: index as EquivalenceId,
                materialized: true,
            });
        }
        Self {
            frame,
            allocator,
            slots,
            classes,
            next_stage,
            flush_required: false,
        }
    }

    pub fn frame(&self) -> &RegisterFrame {
        &self.frame
    }

    /// Scratch slots the final frame layout must reserve
    pub fn temporary_count(&self) -> u16 {
        self.allocator.peak_count()
    }

    /// Borrow a scratch register for the front-end
    pub fn new_temporary(&mut self) -> Result<Register> {
        let index = self.allocator.borrow()?;
        let register = Register::Temporary(index);
        self.ensure_slot(register);
        Ok(register)
    }

    /// End a temporary's live range
    ///
    /// A pending write still recorded for the register is discarded without
    /// emission: with no reads left it was provably dead. A materialized
    /// temporary that is the only physical copy of a value pending members
    /// still owe is copied out first.
    pub fn release_temporary(&mut self, register: Register) {
        debug_assert!(register.is_temporary());
        let slot = self.slot_index(register);
        if self.slots[slot].materialized {
            self.preserve_class_value(slot);
        } else {
            trace!(%register, "discarding dead store to released temporary");
        }
        self.move_to_new_class(slot, true);
        if let Register::Temporary(index) = register {
            self.allocator.release(index);
        }
    }

    // ========== Ldar / Star / Mov interception ==========

    fn apply_ldar(&mut self, node: &BytecodeNode) {
        let register = self.frame.register_for_operand(node.operand(0));
        let slot = self.slot_index(register);
        trace!(%register, "tracking accumulator load");
        self.register_transfer(slot, ACCUMULATOR_SLOT, node.source_info());
    }

    fn apply_star(&mut self, node: &BytecodeNode) {
        let register = self.frame.register_for_operand(node.operand(0));
        let slot = self.slot_index(register);
        trace!(%register, "tracking accumulator store");
        self.register_transfer(ACCUMULATOR_SLOT, slot, node.source_info());
    }

    fn apply_mov(&mut self, node: &BytecodeNode) {
        let from = self.frame.register_for_operand(node.operand(0));
        let to = self.frame.register_for_operand(node.operand(1));
        let from_slot = self.slot_index(from);
        let to_slot = self.slot_index(to);
        trace!(%from, %to, "tracking register move");
        self.register_transfer(from_slot, to_slot, node.source_info());
    }

    /// Record that |output| now holds |input|'s value, emitting a physical
    /// transfer only when the destination is observable (a parameter or
    /// local). Deferred transfers with a valid source position emit a
    /// placeholder `Nop` so the position survives the elision.
    fn register_transfer(
        &mut self,
        input: SlotIndex,
        output: SlotIndex,
        source_info: BytecodeSourceInfo,
    ) {
        if self.in_same_class(input, output) && self.slots[output].materialized {
            // The destination already holds this value; the transfer is
            // redundant.
            self.emit_nop_for(source_info);
            return;
        }

        if self.slots[output].materialized {
            self.preserve_class_value(output);
        }
        if !self.in_same_class(input, output) {
            self.leave_class(output);
            let id = self.slots[input].class;
            self.classes[id as usize].push(output);
            self.slots[output].class = id;
            self.slots[output].materialized = false;
            self.flush_required = true;
        }

        let observable = self.slots[output]
            .register
            .is_some_and(|register| !register.is_temporary());
        if observable {
            // Parameters and locals outlive the expression; force the store
            // out now, fused with whatever load produced the value.
            self.slots[output].materialized = false;
            let source = self.materialized_equivalent(input);
            debug_assert!(source.is_some(), "equivalence class has no materialized member");
            if let Some(source) = source {
                self.emit_transfer(source, output, source_info);
            }
        } else {
            self.emit_nop_for(source_info);
        }
    }

    // ========== Materialization ==========

    /// Physically write the class value into |slot| if it is only pending
    fn materialize(&mut self, slot: SlotIndex) {
        if self.slots[slot].materialized {
            return;
        }
        let source = self.materialized_equivalent(slot);
        debug_assert!(source.is_some(), "equivalence class has no materialized member");
        if let Some(source) = source {
            self.emit_transfer(source, slot, BytecodeSourceInfo::None);
        }
    }

    /// First materialized member reached walking the class cyclically from
    /// |slot|
    fn materialized_equivalent(&self, slot: SlotIndex) -> Option<SlotIndex> {
        if self.slots[slot].materialized {
            return Some(slot);
        }
        let members = &self.classes[self.slots[slot].class as usize];
        let position = members.iter().position(|&member| member == slot)?;
        for step in 1..members.len() {
            let member = members[(position + step) % members.len()];
            if self.slots[member].materialized {
                return Some(member);
            }
        }
        None
    }

    /// |slot| is materialized and about to be clobbered or leave its class;
    /// if it is the only materialized member, copy the value into a pending
    /// member first so the class's value survives. A register member is
    /// preferred over the accumulator, keeping the value addressable as an
    /// operand.
    fn preserve_class_value(&mut self, slot: SlotIndex) {
        debug_assert!(self.slots[slot].materialized);
        let id = self.slots[slot].class as usize;
        if self.classes[id].len() <= 1 {
            return;
        }
        let mut register_target = None;
        let mut accumulator_target = None;
        for index in 0..self.classes[id].len() {
            let member = self.classes[id][index];
            if member == slot {
                continue;
            }
            if self.slots[member].materialized {
                // Another member carries the value already.
                return;
            }
            if self.slots[member].register.is_some() {
                register_target.get_or_insert(member);
            } else {
                accumulator_target = Some(member);
            }
        }
        if let Some(target) = register_target.or(accumulator_target) {
            self.emit_transfer(slot, target, BytecodeSourceInfo::None);
        }
    }

    /// Emit the single instruction moving |input|'s physical value into
    /// |output|: `Star` into a register, `Ldar` into the accumulator, or the
    /// pending load reclassified into a `Mov` for register-to-register.
    fn emit_transfer(&mut self, input: SlotIndex, output: SlotIndex, source_info: BytecodeSourceInfo) {
        debug_assert_ne!(input, output);
        debug_assert!(self.slots[input].materialized);
        let mut node = match (self.slots[input].register, self.slots[output].register) {
            (None, Some(to)) => {
                let operand = self.frame.operand(to);
                BytecodeNode::with_operands(Opcode::Star, &[operand], OperandScale::for_value(operand))
            }
            (Some(from), None) => {
                let operand = self.frame.operand(from);
                BytecodeNode::with_operands(Opcode::Ldar, &[operand], OperandScale::for_value(operand))
            }
            (Some(from), Some(to)) => {
                // Fuse the load/store pair into one move.
                let operand = self.frame.operand(from);
                let mut node = BytecodeNode::with_operands(
                    Opcode::Ldar,
                    &[operand],
                    OperandScale::for_value(operand),
                );
                node.transform(Opcode::Mov, self.frame.operand(to));
                node
            }
            (None, None) => unreachable!("transfer from the accumulator to itself"),
        };
        node.source_info_mut().update(source_info);
        self.slots[output].materialized = true;
        trace!(%node, "materializing deferred transfer");
        self.next_stage.write(&mut node);
    }

    fn emit_nop_for(&mut self, source_info: BytecodeSourceInfo) {
        if source_info.is_valid() {
            // The elided instruction carried a position the debugger must
            // still be able to step to.
            let mut nop = BytecodeNode::new(Opcode::Nop);
            nop.source_info_mut().update(source_info);
            self.next_stage.write(&mut nop);
        }
    }

    // ========== General operand preparation ==========

    fn prepare_operands(&mut self, node: &mut BytecodeNode) {
        let accumulator_use = node.opcode().accumulator_use();
        if accumulator_use.contains(AccumulatorUse::READ) {
            self.materialize(ACCUMULATOR_SLOT);
        }
        self.prepare_register_operands(node);
        if accumulator_use.contains(AccumulatorUse::WRITE) {
            // The instruction replaces the accumulator: preserve the old
            // class value if the accumulator was its only physical copy,
            // then start a fresh materialized class for the new value.
            if self.slots[ACCUMULATOR_SLOT].materialized {
                self.preserve_class_value(ACCUMULATOR_SLOT);
            }
            self.move_to_new_class(ACCUMULATOR_SLOT, true);
        }
    }

    fn prepare_register_operands(&mut self, node: &mut BytecodeNode) {
        let types = node.opcode().operand_types();
        let mut rewritten = false;
        let mut index = 0;
        while index < types.len() {
            match types[index] {
                OperandType::Reg => {
                    rewritten |= self.prepare_register_input(node, index);
                    index += 1;
                }
                OperandType::RegRange => {
                    debug_assert_eq!(types.get(index + 1), Some(&OperandType::RegCount));
                    let count = node.operand(index + 1);
                    if count == 1 {
                        // A range of one is positionally indistinguishable
                        // from a plain register operand, so substitution is
                        // still sound.
                        rewritten |= self.prepare_register_input(node, index);
                    } else {
                        self.materialize_range(node.operand(index), count);
                    }
                    index += 2;
                }
                OperandType::Imm | OperandType::Idx | OperandType::RegCount => {
                    index += 1;
                }
            }
        }
        if rewritten {
            node.set_operand_scale(OperandScale::for_operands(node.operands()));
        }
    }

    /// Resolve a single-register read operand through its equivalence class.
    /// Returns whether the operand word was rewritten.
    fn prepare_register_input(&mut self, node: &mut BytecodeNode, index: usize) -> bool {
        let register = self.frame.register_for_operand(node.operand(index));
        let slot = self.slot_index(register);
        if self.slots[slot].materialized && !register.is_temporary() {
            return false;
        }
        match self.operand_substitute(slot) {
            Some(substitute) if substitute != register => {
                trace!(%register, %substitute, "substituting equivalent operand register");
                node.set_operand(index, self.frame.operand(substitute));
                true
            }
            Some(_) => false,
            None => {
                self.materialize(slot);
                false
            }
        }
    }

    /// Best register able to stand in for |slot| as an operand: a
    /// materialized non-temporary member if one exists, else the slot's own
    /// register when materialized, else any materialized register member.
    /// The accumulator is never usable as an operand.
    fn operand_substitute(&self, slot: SlotIndex) -> Option<Register> {
        let mut fallback = if self.slots[slot].materialized {
            self.slots[slot].register
        } else {
            None
        };
        for &member in &self.classes[self.slots[slot].class as usize] {
            if !self.slots[member].materialized {
                continue;
            }
            let Some(register) = self.slots[member].register else {
                continue;
            };
            if !register.is_temporary() {
                return Some(register);
            }
            fallback.get_or_insert(register);
        }
        fallback
    }

    /// Force every register in a range operand to its precise pending value.
    /// Downstream consumers index the range by position, so no substitution
    /// is permitted.
    fn materialize_range(&mut self, start_operand: u32, count: u32) {
        for offset in 0..count {
            let register = self.frame.register_for_operand(start_operand + offset);
            let slot = self.slot_index(register);
            self.materialize(slot);
        }
    }

    // ========== Flushing ==========

    /// Materialize everything pending and break every equivalence.
    /// Equalities established on one control-flow path do not hold on a
    /// path that joins from elsewhere.
    fn flush_state(&mut self) {
        if !self.flush_required {
            return;
        }
        debug!("flushing register equivalence state");
        for slot in 0..self.slots.len() {
            if !self.slots[slot].materialized {
                self.materialize(slot);
            }
        }
        for slot in 0..self.slots.len() {
            if self.classes[self.slots[slot].class as usize].len() > 1 {
                self.move_to_new_class(slot, true);
            }
        }
        self.flush_required = false;
    }

    // ========== Slot and class bookkeeping ==========

    fn slot_index(&self, register: Register) -> SlotIndex {
        let slot = 1 + self.frame.operand(register) as usize;
        debug_assert!(slot < self.slots.len(), "register {} has no tracked slot", register);
        slot
    }

    fn ensure_slot(&mut self, register: Register) {
        let slot = 1 + self.frame.operand(register) as usize;
        while self.slots.len() <= slot {
            let index = self.slots.len();
            let id = self.classes.len() as EquivalenceId;
            self.classes.push(vec![index]);
            self.slots.push(SlotInfo {
                register: Some(self.frame.register_for_operand(index as u32 - 1)),
                class: id,
                materialized: true,
            });
        }
    }

    fn in_same_class(&self, a: SlotIndex, b: SlotIndex) -> bool {
        self.slots[a].class == self.slots[b].class
    }

    fn leave_class(&mut self, slot: SlotIndex) {
        let members = &mut self.classes[self.slots[slot].class as usize];
        if let Some(position) = members.iter().position(|&member| member == slot) {
            members.remove(position);
        }
    }

    fn move_to_new_class(&mut self, slot: SlotIndex, materialized: bool) {
        self.leave_class(slot);
        let id = self.classes.len() as EquivalenceId;
        self.classes.push(vec![slot]);
        self.slots[slot].class = id;
        self.slots[slot].materialized = materialized;
    }
}

impl BytecodePipelineStage for BytecodeRegisterOptimizer<'_> {
    fn write(&mut self, node: &mut BytecodeNode) {
        match node.opcode() {
            Opcode::Ldar => {
                self.apply_ldar(node);
                return;
            }
            Opcode::Star => {
                self.apply_star(node);
                return;
            }
            Opcode::Mov => {
                self.apply_mov(node);
                return;
            }
            _ => {}
        }
        if node.opcode().is_jump() || node.opcode() == Opcode::Debugger {
            // The instruction ends the basic block; tracked equalities stop
            // being valid at its target.
            self.flush_state();
        }
        self.prepare_operands(node);
        self.next_stage.write(node);
    }

    fn flush_for_offset(&mut self) -> usize {
        self.flush_state();
        self.next_stage.flush_for_offset()
    }

    fn flush_basic_block(&mut self) {
        self.flush_state();
        self.next_stage.flush_basic_block();
    }
}
