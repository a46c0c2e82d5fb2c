//! Dependence Graph Construction
//!
//! Builds the program dependence graph of one procedure:
//! - **data edges** straight from SSA def-use (an edge per operand use),
//!   marked loop-carried when the use is a φ incoming along a back edge;
//! - **control edges** from each conditional terminator to every instruction
//!   of each block control-dependent on it (post-dominance test);
//! - **memory edges** between stores and other memory accesses under a
//!   deliberately conservative may-alias rule: any store may alias any other
//!   access in the procedure, loop-carried whenever both endpoints share a
//!   loop. Alias precision belongs upstream; the pass only needs soundness.

use log::trace;

use crate::analysis::loops::LoopInfo;
use crate::analysis::postdom::PostDominators;
use crate::graph::dependence::{DepEdge, Pdg};
use crate::ir::{BlockId, InstId, Opcode, Operand, Procedure};

/// PDG builder over one procedure.
pub struct PdgBuilder;

impl PdgBuilder {
    pub fn build(proc: &Procedure, postdom: &PostDominators, loops: &[LoopInfo]) -> Pdg {
        let mut pdg = Pdg::new();
        for (_, inst) in proc.iter_insts() {
            pdg.add_inst(inst);
        }
        Self::add_data_edges(proc, loops, &mut pdg);
        Self::add_control_edges(proc, postdom, &mut pdg);
        Self::add_memory_edges(proc, loops, &mut pdg);
        trace!(
            "pdg for `{}`: {} nodes, {} edges",
            proc.name,
            pdg.graph.num_nodes(),
            pdg.graph.num_edges()
        );
        pdg
    }

    fn add_data_edges(proc: &Procedure, loops: &[LoopInfo], pdg: &mut Pdg) {
        for (block, id) in proc.iter_insts() {
            let inst = proc.inst(id);
            if inst.is_phi() {
                for (value, from) in inst.phi_incomings() {
                    if let Operand::Inst(src) = value {
                        let carried = loops
                            .iter()
                            .any(|lp| lp.header == block && lp.back_edges.contains(&(from, block)));
                        pdg.add_dep(src, id, DepEdge::data(carried));
                    }
                }
            } else {
                for op in &inst.operands {
                    if let Operand::Inst(src) = op {
                        pdg.add_dep(*src, id, DepEdge::data(false));
                    }
                }
            }
        }
    }

    fn add_control_edges(proc: &Procedure, postdom: &PostDominators, pdg: &mut Pdg) {
        for b in 0..proc.blocks.len() as u32 {
            let block = BlockId(b);
            let Some(term) = proc.terminator(block) else {
                continue;
            };
            if proc.inst(term).opcode != Opcode::CondBr {
                continue;
            }
            for dep_block in postdom.control_dependent_blocks(proc, block) {
                for &inst in &proc.block(dep_block).insts {
                    pdg.add_dep(term, inst, DepEdge::control());
                }
            }
        }
    }

    fn add_memory_edges(proc: &Procedure, loops: &[LoopInfo], pdg: &mut Pdg) {
        let accesses: Vec<(BlockId, InstId, bool)> = proc
            .iter_insts()
            .filter_map(|(block, id)| match proc.inst(id).opcode {
                Opcode::Store => Some((block, id, true)),
                Opcode::Load => Some((block, id, false)),
                _ => None,
            })
            .collect();
        for &(store_block, store, is_store) in &accesses {
            if !is_store {
                continue;
            }
            for &(other_block, other, _) in &accesses {
                if other == store {
                    continue;
                }
                let carried = loops
                    .iter()
                    .any(|lp| lp.contains(store_block) && lp.contains(other_block));
                pdg.add_dep(store, other, DepEdge::memory(carried));
            }
        }
    }
}
