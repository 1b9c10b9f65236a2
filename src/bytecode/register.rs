//! Register descriptors and the temporary slot allocator
//!
//! The Argent VM addresses a unified frame of parameter, local, and
//! temporary slots. Parameters (receiver included) are declared by the
//! call's arity, locals by the function body, and temporaries are borrowed
//! dynamically while compiling expressions. The accumulator is not a
//! register: it is the implicit source/destination of most opcodes and is
//! never addressable as an operand.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// One addressable slot in the register frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Parameter slot; the receiver is parameter 0
    Parameter(u16),
    /// Declared local slot
    Local(u16),
    /// Scratch slot borrowed from the temporary allocator
    Temporary(u16),
}

impl Register {
    /// The receiver passed to every call
    pub fn receiver() -> Register {
        Register::Parameter(0)
    }

    pub fn is_parameter(self) -> bool {
        matches!(self, Register::Parameter(_))
    }

    pub fn is_temporary(self) -> bool {
        matches!(self, Register::Temporary(_))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Parameter(index) => write!(f, "a{}", index),
            Register::Local(index) => write!(f, "r{}", index),
            Register::Temporary(index) => write!(f, "t{}", index),
        }
    }
}

/// Frame layout mapping registers to flat operand words
///
/// Operand words index the unified frame: parameters first, then locals,
/// then temporaries. The mapping is total in both directions so pipeline
/// stages can rewrite register operands in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFrame {
    parameter_count: u16,
    local_count: u16,
}

impl RegisterFrame {
    /// Create a frame for a function with |parameter_count| parameters
    /// (receiver included) and |local_count| declared locals.
    pub fn new(parameter_count: usize, local_count: usize) -> Result<Self> {
        if parameter_count + local_count > u16::MAX as usize {
            return Err(Error::FrameTooLarge {
                parameters: parameter_count,
                locals: local_count,
            });
        }
        Ok(Self {
            parameter_count: parameter_count as u16,
            local_count: local_count as u16,
        })
    }

    pub fn parameter_count(&self) -> u16 {
        self.parameter_count
    }

    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Flat operand word for |register|
    pub fn operand(&self, register: Register) -> u32 {
        match register {
            Register::Parameter(index) => {
                debug_assert!(index < self.parameter_count);
                u32::from(index)
            }
            Register::Local(index) => {
                debug_assert!(index < self.local_count);
                u32::from(self.parameter_count) + u32::from(index)
            }
            Register::Temporary(index) => {
                u32::from(self.parameter_count) + u32::from(self.local_count) + u32::from(index)
            }
        }
    }

    /// Register named by the flat operand word |operand|
    pub fn register_for_operand(&self, operand: u32) -> Register {
        let parameters = u32::from(self.parameter_count);
        let fixed = parameters + u32::from(self.local_count);
        if operand < parameters {
            Register::Parameter(operand as u16)
        } else if operand < fixed {
            Register::Local((operand - parameters) as u16)
        } else {
            Register::Temporary((operand - fixed) as u16)
        }
    }
}

/// Allocator for scratch register slots beyond the fixed frame
///
/// Borrowed slots are reclaimed with [`release`](Self::release) and reused
/// lowest-index-first to keep the live frame small. The high-water mark of
/// issued slots determines how many scratch registers the final frame layout
/// reserves; it never decreases.
#[derive(Debug, Default)]
pub struct TemporaryRegisterAllocator {
    /// Next never-issued temporary index
    next: u16,
    /// Returned indices available for reuse, ordered for lowest-first reuse
    free: BTreeSet<u16>,
    /// Largest number of slots ever issued
    peak: u16,
}

impl TemporaryRegisterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow an unused temporary slot index
    pub fn borrow(&mut self) -> Result<u16> {
        if let Some(&index) = self.free.iter().next() {
            self.free.remove(&index);
            return Ok(index);
        }
        if self.next == u16::MAX {
            return Err(Error::TooManyTemporaries {
                limit: u16::MAX as usize,
            });
        }
        let index = self.next;
        self.next += 1;
        self.peak = self.peak.max(self.next);
        Ok(index)
    }

    /// Return a borrowed slot for reuse
    ///
    /// Must be called exactly once per matching [`borrow`](Self::borrow);
    /// the allocator does not defend against misuse by its single caller.
    pub fn release(&mut self, index: u16) {
        debug_assert!(index < self.next, "released temporary was never borrowed");
        let inserted = self.free.insert(index);
        debug_assert!(inserted, "temporary register released twice");
    }

    /// Number of slots currently borrowed
    pub fn live_count(&self) -> u16 {
        self.next - self.free.len() as u16
    }

    /// High-water mark of issued slots; sizes the final frame's scratch area
    pub fn peak_count(&self) -> u16 {
        self.peak
    }
}
