//! Loop Analysis
//!
//! Natural-loop discovery over a procedure's control flow graph, plus the
//! two loop facts DSWP needs from its scalar analyses: the canonical
//! induction variable and the compile-time trip count.
//!
//! # Loop Detection Algorithm
//! Depth-first search finds back edges (edges to an ancestor in the DFS
//! tree); each back edge `latch -> header` induces a natural loop whose body
//! is everything that reaches the latch without passing through the header.
//! Loops sharing a header are merged.
//!
//! # Memory Optimizations
//! - `LoopInfo.blocks` uses `BitVec` for membership tests (1 bit per block
//!   instead of a hash set entry)
//! - Latch/exit lists use `SmallVec` (most loops have 1-2 of each)

use bitvec::prelude::*;
use smallvec::SmallVec;

use crate::ir::{BlockId, IcmpPred, InstId, Opcode, Operand, Procedure};

/// One natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// Loop header block (the target of every back edge)
    pub header: BlockId,
    /// Loop body membership, indexed by `BlockId` (header included)
    pub blocks: BitVec<u32>,
    /// Back edges as `(latch, header)`
    pub back_edges: SmallVec<[(BlockId, BlockId); 2]>,
    /// Blocks inside the loop with an edge leaving it
    pub exiting: SmallVec<[BlockId; 2]>,
    /// Blocks outside the loop targeted by exiting edges
    pub exits: SmallVec<[BlockId; 2]>,
    /// Canonical preheader: the unique out-of-loop predecessor of the
    /// header, ending in an unconditional branch to it. `None` when the
    /// entry edge is not in canonical form.
    pub preheader: Option<BlockId>,
}

impl LoopInfo {
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks
            .get(block.0 as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    /// The single latch, when there is exactly one back edge.
    pub fn unique_latch(&self) -> Option<BlockId> {
        match self.back_edges.as_slice() {
            [(latch, _)] => Some(*latch),
            _ => None,
        }
    }

    /// The single exit block, when all exiting edges agree on one target.
    pub fn unique_exit(&self) -> Option<BlockId> {
        match self.exits.as_slice() {
            [exit] => Some(*exit),
            _ => None,
        }
    }

    /// Block handles of the loop body, in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter_ones().map(|i| BlockId(i as u32))
    }
}

/// Canonical induction variable: a header φ starting at 0 and stepping by 1
/// along the latch edge.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalIv {
    /// The φ-node itself
    pub phi: InstId,
    /// The `add phi, 1` increment feeding the latch edge
    pub step: InstId,
}

/// The branch that decides loop exit.
#[derive(Debug, Clone, Copy)]
pub struct GoverningExit {
    /// Exiting block whose terminator leaves the loop
    pub block: BlockId,
    /// The compare feeding that terminator
    pub cmp: InstId,
    /// Whether the taken (`then`) side leaves the loop
    pub exit_on_true: bool,
}

/// Loop analyzer over one procedure.
pub struct LoopAnalyzer;

impl LoopAnalyzer {
    /// Detect natural loops.
    pub fn find_loops(proc: &Procedure) -> Vec<LoopInfo> {
        let n = proc.blocks.len();
        if n == 0 {
            return Vec::new();
        }
        let preds = proc.predecessors();

        // DFS for back edges.
        let mut visited: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
        let mut in_stack: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
        let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new();
        let mut frames: Vec<(u32, usize)> = vec![(0, 0)];
        visited.set(0, true);
        in_stack.set(0, true);
        while let Some(&(v, pos)) = frames.last() {
            let succs = proc.successors(BlockId(v));
            if pos < succs.len() {
                frames.last_mut().expect("frame stack underflow").1 = pos + 1;
                let w = succs[pos];
                if !visited[w.0 as usize] {
                    visited.set(w.0 as usize, true);
                    in_stack.set(w.0 as usize, true);
                    frames.push((w.0, 0));
                } else if in_stack[w.0 as usize] {
                    back_edges.push((BlockId(v), w));
                }
            } else {
                in_stack.set(v as usize, false);
                frames.pop();
            }
        }

        // Natural loop of each back edge; merge loops sharing a header.
        let mut loops: Vec<LoopInfo> = Vec::new();
        back_edges.sort_unstable_by_key(|&(latch, header)| (header, latch));
        for (latch, header) in back_edges {
            let body = Self::natural_loop_body(&preds, latch, header, n);
            match loops.iter_mut().find(|l| l.header == header) {
                Some(existing) => {
                    for i in body.iter_ones() {
                        existing.blocks.set(i, true);
                    }
                    existing.back_edges.push((latch, header));
                }
                None => loops.push(LoopInfo {
                    header,
                    blocks: body,
                    back_edges: SmallVec::from_slice(&[(latch, header)]),
                    exiting: SmallVec::new(),
                    exits: SmallVec::new(),
                    preheader: None,
                }),
            }
        }

        for lp in &mut loops {
            Self::fill_exits(proc, lp);
            lp.preheader = Self::find_preheader(proc, &preds, lp);
        }
        loops
    }

    /// Blocks reaching `latch` without passing through `header`, plus both.
    fn natural_loop_body(
        preds: &[SmallVec<[BlockId; 2]>],
        latch: BlockId,
        header: BlockId,
        n: usize,
    ) -> BitVec<u32> {
        let mut body: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
        body.set(header.0 as usize, true);
        let mut work = vec![latch];
        while let Some(b) = work.pop() {
            if body[b.0 as usize] {
                continue;
            }
            body.set(b.0 as usize, true);
            work.extend(preds[b.0 as usize].iter().copied());
        }
        body
    }

    fn fill_exits(proc: &Procedure, lp: &mut LoopInfo) {
        let body: Vec<BlockId> = lp.block_ids().collect();
        for block in body {
            let mut leaves = false;
            for succ in proc.successors(block) {
                if !lp.contains(succ) {
                    leaves = true;
                    if !lp.exits.contains(&succ) {
                        lp.exits.push(succ);
                    }
                }
            }
            if leaves {
                lp.exiting.push(block);
            }
        }
    }

    /// A canonical preheader is the unique out-of-loop predecessor of the
    /// header and must end in an unconditional branch. A guard branch left
    /// by a previous transformation breaks this on purpose.
    fn find_preheader(
        proc: &Procedure,
        preds: &[SmallVec<[BlockId; 2]>],
        lp: &LoopInfo,
    ) -> Option<BlockId> {
        let outside: SmallVec<[BlockId; 2]> = preds[lp.header.0 as usize]
            .iter()
            .copied()
            .filter(|&p| !lp.contains(p))
            .collect();
        match outside.as_slice() {
            [pre] => {
                let term = proc.terminator(*pre)?;
                (proc.inst(term).opcode == Opcode::Br).then_some(*pre)
            }
            _ => None,
        }
    }

    /// Find the canonical induction variable: a header φ initialized to 0 on
    /// the entry edge and incremented by 1 along a latch edge.
    pub fn canonical_induction_variable(proc: &Procedure, lp: &LoopInfo) -> Option<CanonicalIv> {
        for &inst in &proc.block(lp.header).insts {
            if !proc.inst(inst).is_phi() {
                continue;
            }
            let mut init_ok = false;
            let mut step: Option<InstId> = None;
            for (value, from) in proc.inst(inst).phi_incomings() {
                if !lp.contains(from) {
                    init_ok = matches!(value, Operand::Const(0, _));
                } else if let Operand::Inst(candidate) = value {
                    if Self::is_increment_of(proc, candidate, inst) {
                        step = Some(candidate);
                    }
                }
            }
            if init_ok {
                if let Some(step) = step {
                    return Some(CanonicalIv { phi: inst, step });
                }
            }
        }
        None
    }

    /// `candidate` is `add phi, 1` (in either operand order).
    fn is_increment_of(proc: &Procedure, candidate: InstId, phi: InstId) -> bool {
        let inst = proc.inst(candidate);
        if inst.opcode != Opcode::Add {
            return false;
        }
        match inst.operands.as_slice() {
            [Operand::Inst(a), Operand::Const(1, _)] => *a == phi,
            [Operand::Const(1, _), Operand::Inst(a)] => *a == phi,
            _ => false,
        }
    }

    /// The conditional branch (and its compare) that decides loop exit.
    /// Requires a single exiting block.
    pub fn governing_exit(proc: &Procedure, lp: &LoopInfo) -> Option<GoverningExit> {
        let [block] = lp.exiting.as_slice() else {
            return None;
        };
        let term = proc.terminator(*block)?;
        let term_inst = proc.inst(term);
        if term_inst.opcode != Opcode::CondBr {
            return None;
        }
        let cmp = term_inst.operands[0].as_inst()?;
        if !proc.inst(cmp).is_compare() {
            return None;
        }
        let then_target = term_inst.operands[1].as_block()?;
        Some(GoverningExit {
            block: *block,
            cmp,
            exit_on_true: !lp.contains(then_target),
        })
    }

    /// Compile-time trip count, when the exit compare tests the canonical IV
    /// (or its increment) against a positive constant in one of the shapes a
    /// counted loop produces. This is the miniature stand-in for scalar
    /// evolution; anything fancier reports "unknown".
    pub fn small_constant_trip_count(
        proc: &Procedure,
        lp: &LoopInfo,
        iv: &CanonicalIv,
    ) -> Option<u64> {
        let exit = Self::governing_exit(proc, lp)?;
        let cmp = proc.inst(exit.cmp);
        let Opcode::ICmp(pred) = cmp.opcode else {
            return None;
        };
        let (x, bound) = match cmp.operands.as_slice() {
            [Operand::Inst(x), Operand::Const(n, ty)] if ty.is_scalar_int() => (*x, *n),
            _ => return None,
        };
        if bound <= 0 {
            return None;
        }
        let n = bound as u64;
        let against_step = x == iv.step;
        let against_phi = x == iv.phi;
        let count = match (pred, exit.exit_on_true) {
            // Bottom-tested: `if i+1 == n` leaves after n iterations.
            (IcmpPred::Eq, true) if against_step => Some(n),
            // Bottom-tested: continue while `i+1 != n`.
            (IcmpPred::Ne, false) if against_step => Some(n),
            // Bottom-tested: continue while `i+1 < n`.
            (IcmpPred::Slt, false) if against_step => Some(n),
            // Top-tested: continue while `i < n`.
            (IcmpPred::Slt, false) if against_phi => Some(n),
            // Top-tested: `if i == n` leaves after n iterations.
            (IcmpPred::Eq, true) if against_phi => Some(n),
            _ => None,
        };
        count
    }
}
