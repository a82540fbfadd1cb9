//! Bytecode VM module.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions
//! - `code` - Code units containing bytecode and metadata
//! - `builder` - CodeBuilder for assembling code units
//! - `vm` - Virtual machine for bytecode execution

pub use builder::{CodeBuilder, Label};
pub use code::{Code, CodeSerdeError, CodeFlags, Const};
pub use op::{CompareOp, HAVE_ARGUMENT, Opcode, OperandKind};
pub use vm::{Block, BlockKind, Frame, GeneratorIter, ImportHook, Vm, WhyMarker};

mod builder;
mod code;
mod op;
mod vm;
