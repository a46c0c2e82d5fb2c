//! Typed SSA Intermediate Representation
//!
//! The IR facade the parallelizer consumes: instructions, basic blocks,
//! procedures, modules and globals, all referenced through dense handles,
//! plus a positional builder for the few create-sites the pass has.

pub mod builder;
pub mod instruction;
pub mod module;

// Re-export commonly used types
pub use builder::InstBuilder;
pub use instruction::{IcmpPred, Instruction, Opcode, Operand, Type};
pub use module::{BasicBlock, BlockId, Global, GlobalId, GlobalInit, InstId, Module, ProcId, Procedure};
