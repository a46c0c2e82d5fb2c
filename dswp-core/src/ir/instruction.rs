//! Intermediate Representation (IR) Instructions
//!
//! This module defines the typed SSA instruction set the parallelizer
//! operates on. The IR is deliberately small: integer arithmetic, pointer
//! arithmetic, memory access, calls, and structured control flow are enough
//! to express the loops DSWP targets, while keeping cloning and operand
//! rewiring tractable.
//!
//! # Memory Optimizations
//! - `Opcode` and `Type` use `#[repr(u8)]` to keep the discriminant in 1 byte
//! - `Instruction.operands` uses `SmallVec<[Operand; 4]>` (most instructions
//!   have ≤4 operands; φ-nodes with many incomings spill to the heap)
//! - Handle types (`InstId`, `BlockId`, ...) are `u32` newtypes instead of
//!   `usize`, saving 4 bytes each on 64-bit systems
//!
//! # IR Design
//! - **SSA**: every instruction defines at most one value, referenced by its
//!   `InstId`
//! - **Uniform operands**: values, blocks, constants, globals, parameters and
//!   procedures all appear in one `Operand` slot list, so a single rewiring
//!   rule covers every reference a clone can hold
//! - **φ layout**: φ-nodes store `[value, block, value, block, ...]` pairs;
//!   predecessor blocks are ordinary operands

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::module::{BlockId, GlobalId, InstId, ProcId};

/// Value type of an instruction or operand.
///
/// Scalars are integers only; `Ptr` is an opaque address. This is all the
/// queue link machinery needs (element types are scalar integers) and keeps
/// the type lattice out of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)] // Save 3-7 bytes per enum (default size -> 1 byte)
pub enum Type {
    /// No value (stores, branches)
    Void = 0,
    /// 1-bit integer (compare results)
    I1 = 1,
    /// 32-bit integer
    I32 = 2,
    /// 64-bit integer
    I64 = 3,
    /// Opaque pointer
    Ptr = 4,
}

impl Type {
    /// Whether this type can travel through an inter-stage queue.
    #[inline]
    pub fn is_scalar_int(self) -> bool {
        matches!(self, Type::I1 | Type::I32 | Type::I64)
    }
}

/// Predicate of an integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)] // Save 3-7 bytes per enum
pub enum IcmpPred {
    /// Equal: `a == b`
    Eq = 0,
    /// Not equal: `a != b`
    Ne = 1,
    /// Less than: `a < b` (signed)
    Slt = 2,
    /// Less than or equal: `a <= b` (signed)
    Sle = 3,
    /// Greater than: `a > b` (signed)
    Sgt = 4,
    /// Greater than or equal: `a >= b` (signed)
    Sge = 5,
}

/// Instruction opcode.
///
/// # Instruction Categories
/// - **Arithmetic**: `Add`, `Sub`, `Mul`
/// - **Pointer**: `PtrAdd` (base + scaled index)
/// - **Memory**: `Load`, `Store`, `Alloca`
/// - **Compare**: `ICmp`
/// - **Control flow**: `Br`, `CondBr`, `Ret` (terminators), `Call`
/// - **SSA**: `Phi`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// SSA φ-node: operands are `[v0, block0, v1, block1, ...]`
    Phi,
    /// Add: `[lhs, rhs]`
    Add,
    /// Subtract: `[lhs, rhs]`
    Sub,
    /// Multiply: `[lhs, rhs]`
    Mul,
    /// Integer compare: `[lhs, rhs]`, result type `I1`
    ICmp(IcmpPred),
    /// Pointer offset: `[base, index]`, result type `Ptr`
    PtrAdd,
    /// Load from memory: `[ptr]`
    Load,
    /// Store to memory: `[value, ptr]`
    Store,
    /// Stack allocation of one element of the given type, result type `Ptr`
    Alloca(Type),
    /// Procedure call: `[callee, arg0, arg1, ...]`
    Call,
    /// Unconditional branch: `[target]`
    Br,
    /// Conditional branch: `[cond, then_target, else_target]`
    CondBr,
    /// Return: `[value]` or `[]` for void
    Ret,
}

impl Opcode {
    /// Terminators end a basic block; every well-formed block has exactly one,
    /// in last position.
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::CondBr | Opcode::Ret)
    }

    /// Compare instructions are part of the loop skeleton duplicated into
    /// every pipeline stage.
    #[inline]
    pub fn is_compare(self) -> bool {
        matches!(self, Opcode::ICmp(_))
    }
}

/// A reference held in an instruction's operand slot.
///
/// Instruction and block references are procedure-local handles; globals and
/// procedures are module-level; constants are immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Result of another instruction in the same procedure
    Inst(InstId),
    /// Basic block (branch targets, φ predecessor slots)
    Block(BlockId),
    /// Immediate constant
    Const(i64, Type),
    /// Module-level global symbol
    Global(GlobalId),
    /// Parameter of the containing procedure (by index)
    Param(u32),
    /// Procedure address (callees, stage tables)
    Proc(ProcId),
}

impl Operand {
    /// Shorthand for a constant of type `I32`.
    #[inline]
    pub fn const_i32(v: i64) -> Self {
        Operand::Const(v, Type::I32)
    }

    /// The instruction handle, if this operand references one.
    #[inline]
    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Operand::Inst(id) => Some(id),
            _ => None,
        }
    }

    /// The block handle, if this operand references one.
    #[inline]
    pub fn as_block(self) -> Option<BlockId> {
        match self {
            Operand::Block(id) => Some(id),
            _ => None,
        }
    }
}

/// One IR instruction.
///
/// Instructions live in a per-procedure arena and are referenced by `InstId`.
/// `block` is the containing basic block, or `None` while an instruction is
/// detached (freshly cloned, not yet inserted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    /// What the instruction does
    pub opcode: Opcode,
    /// Result type (`Void` for instructions that define no value)
    pub ty: Type,
    /// Ordered operand slots
    /// Uses SmallVec with inline capacity for 4 operands (most instructions
    /// have ≤4; φ-nodes may spill)
    pub operands: SmallVec<[Operand; 4]>,
    /// Containing block, `None` while detached
    pub block: Option<BlockId>,
}

impl Instruction {
    /// Create a detached instruction.
    pub fn new(opcode: Opcode, ty: Type, operands: SmallVec<[Operand; 4]>) -> Self {
        Self {
            opcode,
            ty,
            operands,
            block: None,
        }
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    #[inline]
    pub fn is_compare(&self) -> bool {
        self.opcode.is_compare()
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi)
    }

    /// Incoming `(value, block)` pairs of a φ-node.
    ///
    /// Returns an empty iterator for non-φ instructions. The pairing relies
    /// on the `[value, block, ...]` operand layout.
    pub fn phi_incomings(&self) -> impl Iterator<Item = (Operand, BlockId)> + '_ {
        let ops: &[Operand] = if self.is_phi() { &self.operands } else { &[] };
        ops.chunks(2).filter_map(|pair| match pair {
            [value, Operand::Block(block)] => Some((*value, *block)),
            _ => None,
        })
    }

    /// Successor blocks named by a terminator's operands.
    pub fn branch_targets(&self) -> SmallVec<[BlockId; 2]> {
        let mut targets = SmallVec::new();
        if self.is_terminator() {
            for op in &self.operands {
                if let Operand::Block(b) = op {
                    targets.push(*b);
                }
            }
        }
        targets
    }
}
