//! IR Builder
//!
//! Positional construction facade over a procedure: the builder is parked on
//! one basic block and appends instructions to it. This is the only way the
//! pass creates instructions, so every create-site goes through one audited
//! constructor per opcode.
//!
//! # Conversion Strategy
//! Builders are short-lived: create one per block being filled, emit, drop.
//! They borrow the procedure mutably, which statically rules out two builders
//! racing on the same arena.

use smallvec::{smallvec, SmallVec};

use crate::ir::instruction::{IcmpPred, Instruction, Opcode, Operand, Type};
use crate::ir::module::{BlockId, InstId, Procedure};

/// Appends instructions to one block of a procedure.
pub struct InstBuilder<'p> {
    proc: &'p mut Procedure,
    block: BlockId,
}

impl<'p> InstBuilder<'p> {
    /// Park a builder at the end of `block`.
    pub fn at_end(proc: &'p mut Procedure, block: BlockId) -> Self {
        Self { proc, block }
    }

    /// The block this builder appends to.
    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    fn emit(&mut self, opcode: Opcode, ty: Type, operands: SmallVec<[Operand; 4]>) -> InstId {
        self.proc
            .append_inst(self.block, Instruction::new(opcode, ty, operands))
    }

    /// φ-node from `(value, incoming_block)` pairs.
    pub fn phi(&mut self, ty: Type, incomings: &[(Operand, BlockId)]) -> InstId {
        let mut operands = SmallVec::with_capacity(incomings.len() * 2);
        for &(value, block) in incomings {
            operands.push(value);
            operands.push(Operand::Block(block));
        }
        self.emit(Opcode::Phi, ty, operands)
    }

    pub fn add(&mut self, ty: Type, lhs: Operand, rhs: Operand) -> InstId {
        self.emit(Opcode::Add, ty, smallvec![lhs, rhs])
    }

    pub fn sub(&mut self, ty: Type, lhs: Operand, rhs: Operand) -> InstId {
        self.emit(Opcode::Sub, ty, smallvec![lhs, rhs])
    }

    pub fn mul(&mut self, ty: Type, lhs: Operand, rhs: Operand) -> InstId {
        self.emit(Opcode::Mul, ty, smallvec![lhs, rhs])
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: Operand, rhs: Operand) -> InstId {
        self.emit(Opcode::ICmp(pred), Type::I1, smallvec![lhs, rhs])
    }

    /// `base + index` pointer arithmetic.
    pub fn ptr_add(&mut self, base: Operand, index: Operand) -> InstId {
        self.emit(Opcode::PtrAdd, Type::Ptr, smallvec![base, index])
    }

    pub fn load(&mut self, ty: Type, ptr: Operand) -> InstId {
        self.emit(Opcode::Load, ty, smallvec![ptr])
    }

    pub fn store(&mut self, value: Operand, ptr: Operand) -> InstId {
        self.emit(Opcode::Store, Type::Void, smallvec![value, ptr])
    }

    /// Stack slot holding one element of `elem_ty`.
    pub fn alloca(&mut self, elem_ty: Type) -> InstId {
        self.emit(Opcode::Alloca(elem_ty), Type::Ptr, SmallVec::new())
    }

    pub fn call(&mut self, ret_ty: Type, callee: Operand, args: &[Operand]) -> InstId {
        let mut operands = SmallVec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend_from_slice(args);
        self.emit(Opcode::Call, ret_ty, operands)
    }

    pub fn br(&mut self, target: BlockId) -> InstId {
        self.emit(Opcode::Br, Type::Void, smallvec![Operand::Block(target)])
    }

    pub fn cond_br(&mut self, cond: Operand, then_target: BlockId, else_target: BlockId) -> InstId {
        self.emit(
            Opcode::CondBr,
            Type::Void,
            smallvec![cond, Operand::Block(then_target), Operand::Block(else_target)],
        )
    }

    pub fn ret(&mut self, value: Option<Operand>) -> InstId {
        let operands = match value {
            Some(v) => smallvec![v],
            None => SmallVec::new(),
        };
        self.emit(Opcode::Ret, Type::Void, operands)
    }
}
