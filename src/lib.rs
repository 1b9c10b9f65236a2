//! # Argent
//!
//! Bytecode generation back-end for the Argent register VM: a pipeline of
//! stages that turns the front-end's instruction stream into a compact
//! serialized bytecode array.
//!
//! The centerpiece is the [`bytecode::BytecodeRegisterOptimizer`], which
//! elides the redundant accumulator and register traffic a syntax-directed
//! front-end naturally produces, while keeping observable semantics —
//! parameter and local contents, source positions, byte offsets — intact.
//!
//! ## Example
//!
//! ```
//! use argent::bytecode::{
//!     BytecodeArrayWriter, BytecodeNode, BytecodePipelineStage,
//!     BytecodeRegisterOptimizer, Opcode, OperandScale, Register,
//!     RegisterFrame, TemporaryRegisterAllocator,
//! };
//!
//! let frame = RegisterFrame::new(2, 1)?;
//! let mut writer = BytecodeArrayWriter::new();
//! let mut optimizer =
//!     BytecodeRegisterOptimizer::new(frame, TemporaryRegisterAllocator::new(), &mut writer);
//!
//! // return a1;
//! let operand = frame.operand(Register::Parameter(1));
//! optimizer.write(&mut BytecodeNode::with_operands(
//!     Opcode::Ldar,
//!     &[operand],
//!     OperandScale::Single,
//! ));
//! optimizer.write(&mut BytecodeNode::new(Opcode::Return));
//! optimizer.flush_basic_block();
//!
//! let temporaries = optimizer.temporary_count();
//! drop(optimizer);
//! let chunk = writer.into_chunk(&frame, temporaries);
//! assert_eq!(chunk.code, vec![Opcode::Ldar as u8, 1, Opcode::Return as u8]);
//! # Ok::<(), argent::Error>(())
//! ```

pub mod bytecode;
pub mod error;

pub use error::{Error, Result};
