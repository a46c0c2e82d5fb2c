//! IR Containers: Modules, Procedures, Basic Blocks, Globals
//!
//! A `Module` owns procedures and global symbols; a `Procedure` owns the
//! arenas for its instructions and basic blocks. All cross-references are
//! dense `u32` handles, which keeps the naturally cyclic structures (blocks
//! referencing instructions referencing blocks) free of ownership knots.
//!
//! # Handle Scoping
//! - `ProcId` and `GlobalId` index into the module
//! - `InstId` and `BlockId` index into one procedure's arenas and are only
//!   meaningful together with that procedure

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::instruction::{Instruction, Opcode, Operand, Type};

/// Procedure handle, unique within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcId(pub u32);

/// Global symbol handle, unique within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// Basic block handle, unique within a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Instruction handle, unique within a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

/// Initializer of a module-level global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalInit {
    /// Integer constant
    Int(i64),
    /// Table of procedure addresses (stage tables)
    ProcTable(Vec<ProcId>),
    /// Zero-initialized storage of the global's type
    Zero,
}

/// A module-level global symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: GlobalInit,
    /// External linkage makes the symbol visible to the runtime
    pub external_linkage: bool,
}

/// A basic block: an ordered list of instruction handles.
///
/// A well-formed block holds its φ-nodes first and exactly one terminator in
/// last position; the verifier-style checks in the pass rely on this but the
/// container itself does not enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<InstId>,
}

/// A procedure: parameter/return signature plus instruction and block arenas.
///
/// A procedure without blocks is a declaration; the runtime symbols
/// (`queue_push`, `queue_pop`, `pipeline_runner`) enter the module this way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<Type>,
    pub ret_ty: Type,
    /// Block arena; `BlockId` indexes here. Block 0 is the entry.
    pub blocks: Vec<BasicBlock>,
    /// Instruction arena; `InstId` indexes here. Erased instructions leave
    /// a detached tombstone behind rather than shifting the arena.
    pub insts: Vec<Instruction>,
}

impl Procedure {
    /// Create a declaration (no blocks).
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret_ty,
            blocks: Vec::new(),
            insts: Vec::new(),
        }
    }

    /// A declaration has a signature but no body.
    #[inline]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a new empty block.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: name.into(),
            insts: Vec::new(),
        });
        id
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0 as usize]
    }

    #[inline]
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0 as usize]
    }

    /// Add a detached instruction to the arena.
    pub fn add_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    /// Add an instruction and append it to `block`.
    pub fn append_inst(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = self.add_inst(inst);
        self.attach(id, block, None);
        id
    }

    /// Insert an already-allocated instruction into `block`, optionally
    /// before `before` (at the end otherwise). The instruction must be
    /// detached.
    pub fn attach(&mut self, id: InstId, block: BlockId, before: Option<InstId>) {
        debug_assert!(self.insts[id.0 as usize].block.is_none(), "instruction already attached");
        let list = &mut self.blocks[block.0 as usize].insts;
        match before.and_then(|b| list.iter().position(|&i| i == b)) {
            Some(pos) => list.insert(pos, id),
            None => list.push(id),
        }
        self.insts[id.0 as usize].block = Some(block);
    }

    /// Detach an instruction from its block, leaving it in the arena.
    pub fn detach(&mut self, id: InstId) {
        if let Some(block) = self.insts[id.0 as usize].block.take() {
            self.blocks[block.0 as usize].insts.retain(|&i| i != id);
        }
    }

    /// Move an instruction immediately before another one, across blocks if
    /// needed. Both instructions must be attached.
    pub fn move_before(&mut self, id: InstId, before: InstId) {
        let target_block = self.insts[before.0 as usize]
            .block
            .expect("move_before target is detached");
        self.detach(id);
        self.attach(id, target_block, Some(before));
    }

    /// Replace operand slot `index` of `id`.
    pub fn set_operand(&mut self, id: InstId, index: usize, op: Operand) {
        self.insts[id.0 as usize].operands[index] = op;
    }

    /// The block's terminator, if it has one.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.block(block).insts.last()?;
        self.inst(last).is_terminator().then_some(last)
    }

    /// Successor blocks of `block`, read off its terminator.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        match self.terminator(block) {
            Some(term) => self.inst(term).branch_targets(),
            None => SmallVec::new(),
        }
    }

    /// Predecessor lists for every block.
    ///
    /// Recomputed on demand; the pass mutates control flow rarely and in
    /// well-separated phases.
    pub fn predecessors(&self) -> Vec<SmallVec<[BlockId; 2]>> {
        let mut preds: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); self.blocks.len()];
        for id in 0..self.blocks.len() as u32 {
            let block = BlockId(id);
            for succ in self.successors(block) {
                preds[succ.0 as usize].push(block);
            }
        }
        preds
    }

    /// Iterate all attached instructions in block order.
    pub fn iter_insts(&self) -> impl Iterator<Item = (BlockId, InstId)> + '_ {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block.insts.iter().map(move |&i| (BlockId(b as u32), i))
        })
    }

    /// Shallow-clone an instruction of another procedure into this arena.
    ///
    /// Operand slots are copied verbatim and therefore still reference the
    /// source procedure until rewired; the clone starts detached.
    pub fn clone_inst_from(&mut self, source: &Procedure, id: InstId) -> InstId {
        let mut inst = source.inst(id).clone();
        inst.block = None;
        self.add_inst(inst)
    }

    /// Number of call instructions to `callee` in this procedure.
    pub fn count_calls_to(&self, callee: ProcId) -> usize {
        self.iter_insts()
            .filter(|&(_, i)| {
                let inst = self.inst(i);
                inst.opcode == Opcode::Call
                    && inst.operands.first() == Some(&Operand::Proc(callee))
            })
            .count()
    }
}

/// A module: the unit of work for the pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub procedures: Vec<Procedure>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn add_procedure(&mut self, proc: Procedure) -> ProcId {
        let id = ProcId(self.procedures.len() as u32);
        self.procedures.push(proc);
        id
    }

    #[inline]
    pub fn procedure(&self, id: ProcId) -> &Procedure {
        &self.procedures[id.0 as usize]
    }

    #[inline]
    pub fn procedure_mut(&mut self, id: ProcId) -> &mut Procedure {
        &mut self.procedures[id.0 as usize]
    }

    /// Look up a procedure by symbol name.
    pub fn find_procedure(&self, name: &str) -> Option<ProcId> {
        self.procedures
            .iter()
            .position(|p| p.name == name)
            .map(|i| ProcId(i as u32))
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(global);
        id
    }

    #[inline]
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    /// Look up a global by symbol name.
    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| GlobalId(i as u32))
    }
}
