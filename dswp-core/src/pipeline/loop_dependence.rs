//! Loop Dependence Info
//!
//! Per-loop analysis bundle: the loop's restricted dependence graph, the
//! SCCDAG of its body, the skeleton/body instruction partition, induction
//! variable attribution, and the cached per-block post-dominators. Created
//! once per invocation, consumed by the planner and materializer, then
//! dropped.
//!
//! Construction refuses (softly) whenever a structural assumption is absent;
//! the caller then leaves the procedure untouched.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::analysis::loops::{CanonicalIv, LoopAnalyzer, LoopInfo};
use crate::analysis::postdom::PostDominators;
use crate::error::Ineligibility;
use crate::graph::dependence::DepKind;
use crate::graph::digraph::GraphNodeId;
use crate::graph::{Pdg, SccDag};
use crate::ir::{BlockId, InstId, Opcode, Operand, Procedure};

/// Optional analyses that sharpen the dependence graph before partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LdiOptimization {
    /// Drop loop-carried memory dependences between accesses of scratch
    /// memory that each stage can clone privately.
    MemoryCloning,
}

/// The induction variable governing loop exit.
#[derive(Debug, Clone, Copy)]
pub struct GoverningIv {
    pub phi: InstId,
    pub step: InstId,
    /// The compare feeding the exiting branch
    pub exit_cmp: InstId,
}

/// Analysis bundle for one loop of one procedure.
#[derive(Debug)]
pub struct LoopDependenceInfo {
    pub loop_info: LoopInfo,
    pub iv: CanonicalIv,
    pub governing_iv: Option<GoverningIv>,
    /// Compile-time trip count, when scalar evolution found one
    pub trip_count: Option<u64>,
    /// PDG restricted to the loop, external live-in references preserved
    pub loop_dg: Pdg,
    /// Internal-only PDG over the body instructions
    pub body_dg: Pdg,
    /// Normalized condensation of `body_dg`
    pub sccdag: SccDag,
    /// Skeleton instructions in program order: latch-block instructions,
    /// terminators, compares, the induction φ, and the unique exit block's
    /// instructions. Duplicated into every stage.
    pub skeleton: Vec<InstId>,
    /// Remaining loop instructions, distributed across stages
    pub body: Vec<InstId>,
    skeleton_set: HashSet<InstId>,
    /// Immediate post-dominator per loop block
    pub ipostdom: HashMap<BlockId, BlockId>,
    /// Worker budget the caller planned for (carried, not a gate)
    pub max_cores: u32,
}

impl LoopDependenceInfo {
    pub fn new(
        proc: &Procedure,
        pdg: &Pdg,
        loop_info: LoopInfo,
        postdom: &PostDominators,
        max_cores: u32,
        optimizations: &HashSet<LdiOptimization>,
    ) -> Result<Self, Ineligibility> {
        if loop_info.preheader.is_none() {
            return Err(Ineligibility::NoCanonicalPreheader);
        }
        let latch = loop_info
            .unique_latch()
            .ok_or(Ineligibility::NoUniqueLatch)?;
        let exit = loop_info.unique_exit().ok_or(Ineligibility::NoUniqueExit)?;
        let iv = LoopAnalyzer::canonical_induction_variable(proc, &loop_info)
            .ok_or(Ineligibility::NoCanonicalInductionVariable)?;

        let trip_count = LoopAnalyzer::small_constant_trip_count(proc, &loop_info, &iv);
        let governing_iv = LoopAnalyzer::governing_exit(proc, &loop_info).and_then(|gexit| {
            let cmp = proc.inst(gexit.cmp);
            let tests_iv = cmp
                .operands
                .iter()
                .any(|op| matches!(op, Operand::Inst(i) if *i == iv.phi || *i == iv.step));
            tests_iv.then_some(GoverningIv {
                phi: iv.phi,
                step: iv.step,
                exit_cmp: gexit.cmp,
            })
        });

        let (skeleton, body) = Self::partition(proc, &loop_info, latch, exit, &iv);
        let skeleton_set: HashSet<InstId> = skeleton.iter().copied().collect();

        let loop_dg = pdg.loop_subgraph(proc, &loop_info);
        let body_nodes: Vec<GraphNodeId> = body
            .iter()
            .filter_map(|&i| loop_dg.node_of(i))
            .collect();
        let mut body_dg = loop_dg.restricted_to(&body_nodes, false);
        if optimizations.contains(&LdiOptimization::MemoryCloning) {
            Self::drop_deps_negated_by_memory_cloning(proc, &loop_info, &mut body_dg);
        }

        let mut sccdag = SccDag::condense(&body_dg);
        sccdag.normalize(&body_dg);
        trace!(
            "loop at block {:?}: {} body instructions, {} skeleton, {} SCCs",
            loop_info.header,
            body.len(),
            skeleton.len(),
            sccdag.num_sccs()
        );

        let mut ipostdom = HashMap::new();
        for block in loop_info.block_ids() {
            if let Some(pd) = postdom.ipdom(block) {
                ipostdom.insert(block, pd);
            }
        }

        let ldi = Self {
            loop_info,
            iv,
            governing_iv,
            trip_count,
            loop_dg,
            body_dg,
            sccdag,
            skeleton,
            body,
            skeleton_set,
            ipostdom,
            max_cores,
        };
        ldi.debug_check(proc);
        Ok(ldi)
    }

    /// Skeleton vs. body split (spec'd partition): latch-block instructions,
    /// terminators, compares and the induction φ are skeleton; so is every
    /// instruction of the unique exit block. Everything else in the loop is
    /// body.
    fn partition(
        proc: &Procedure,
        loop_info: &LoopInfo,
        latch: BlockId,
        exit: BlockId,
        iv: &CanonicalIv,
    ) -> (Vec<InstId>, Vec<InstId>) {
        let mut skeleton = Vec::new();
        let mut body = Vec::new();
        for block in loop_info.block_ids() {
            for &inst in &proc.block(block).insts {
                let rec = proc.inst(inst);
                if block == latch || rec.is_terminator() || rec.is_compare() || inst == iv.phi {
                    skeleton.push(inst);
                } else {
                    body.push(inst);
                }
            }
        }
        skeleton.extend(proc.block(exit).insts.iter().copied());
        (skeleton, body)
    }

    /// Remove loop-carried memory dependences whose endpoints both access a
    /// clonable location. Each stage gets its own copy of such scratch, so
    /// the carried dependence is vacuous.
    fn drop_deps_negated_by_memory_cloning(
        proc: &Procedure,
        loop_info: &LoopInfo,
        body_dg: &mut Pdg,
    ) {
        body_dg.remove_edges_where(|from, to, edge| {
            edge.kind == DepKind::Memory
                && edge.loop_carried
                && Self::clonable_location(proc, loop_info, from).is_some()
                && Self::clonable_location(proc, loop_info, to).is_some()
        });
    }

    /// The memory location behind a load/store, when it is clonable: a
    /// stack slot or private global cell whose every use in the procedure
    /// is a load/store pointer inside the loop. Such scratch can be
    /// replicated per stage, so carried dependences through it are vacuous.
    fn clonable_location(
        proc: &Procedure,
        loop_info: &LoopInfo,
        access: InstId,
    ) -> Option<Operand> {
        let inst = proc.inst(access);
        let ptr = *match inst.opcode {
            Opcode::Load => inst.operands.first()?,
            Opcode::Store => inst.operands.get(1)?,
            _ => return None,
        };
        match ptr {
            Operand::Inst(alloca) if matches!(proc.inst(alloca).opcode, Opcode::Alloca(_)) => {}
            Operand::Global(_) => {}
            _ => return None,
        }
        for (block, user) in proc.iter_insts() {
            let rec = proc.inst(user);
            if !rec.operands.contains(&ptr) {
                continue;
            }
            let is_pointer_slot = match rec.opcode {
                Opcode::Load => rec.operands.first() == Some(&ptr),
                Opcode::Store => rec.operands.get(1) == Some(&ptr),
                _ => false,
            };
            if !is_pointer_slot || !loop_info.contains(block) {
                return None;
            }
        }
        Some(ptr)
    }

    #[inline]
    pub fn is_skeleton(&self, inst: InstId) -> bool {
        self.skeleton_set.contains(&inst)
    }

    /// Instructions of one SCC, in program order.
    pub fn scc_insts(&self, scc: GraphNodeId) -> Vec<InstId> {
        self.sccdag
            .scc(scc)
            .members
            .iter()
            .map(|&n| self.body_dg.inst_of(n))
            .collect()
    }

    /// The body SCC that consumes the governing induction variable directly,
    /// if any. Diagnostic attribution; every stage re-derives the IV from
    /// its own skeleton copy.
    pub fn governing_scc(&self, proc: &Procedure) -> Option<GraphNodeId> {
        let iv_phi = self.iv.phi;
        self.body.iter().find_map(|&inst| {
            let uses_iv = proc
                .inst(inst)
                .operands
                .iter()
                .any(|op| matches!(op, Operand::Inst(i) if *i == iv_phi));
            if uses_iv {
                self.body_dg.node_of(inst).and_then(|n| self.sccdag.scc_of(n))
            } else {
                None
            }
        })
    }

    /// Debug-build safety checks mirroring the constructor's containment
    /// contract.
    fn debug_check(&self, proc: &Procedure) {
        if cfg!(debug_assertions) {
            let mut loop_insts = 0usize;
            for block in self.loop_info.block_ids() {
                for &inst in &proc.block(block).insts {
                    loop_insts += 1;
                    debug_assert!(
                        self.loop_dg.node_of(inst).is_some(),
                        "loop instruction missing from loop dependence graph"
                    );
                    debug_assert!(
                        self.is_skeleton(inst) != self.body.contains(&inst),
                        "instruction must be in exactly one of skeleton/body"
                    );
                }
            }
            debug_assert_eq!(self.loop_dg.graph.num_internal_nodes(), loop_insts);
            let scc_total: usize = (0..self.sccdag.num_sccs())
                .map(|i| self.sccdag.scc(GraphNodeId(i as u32)).members.len())
                .sum();
            debug_assert_eq!(scc_total, self.body.len(), "SCCs must cover the body exactly");
        }
    }
}
