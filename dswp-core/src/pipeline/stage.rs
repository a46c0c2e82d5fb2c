//! Stage Materializer
//!
//! Turns each planned SCC into a standalone stage procedure: the loop
//! skeleton plus that SCC's instructions, cloned and rewired, with queue
//! operations splicing the cross-stage value in and out. Emission is a
//! three-phase pipeline (allocate all clones, insert into cloned blocks,
//! rewire operands) so the rewiring step always sees a fully populated
//! clone map.
//!
//! Materialization is transactional: stages are built as free-standing
//! procedures and handed back to the caller; nothing touches the module
//! until every stage has rewired cleanly.

use std::collections::{HashMap, HashSet};

use log::debug;
use smallvec::smallvec;

use crate::error::DswpError;
use crate::ir::{
    BlockId, InstBuilder, InstId, Instruction, Opcode, Operand, Procedure, Type,
};
use crate::pipeline::loop_dependence::LoopDependenceInfo;
use crate::pipeline::planner::StagePlan;
use crate::pipeline::RuntimeSymbols;

/// Build both stage procedures. Returns them in pipeline order without
/// adding them to any module.
pub fn materialize_stages(
    src: &Procedure,
    ldi: &LoopDependenceInfo,
    plan: &StagePlan,
    rt: &RuntimeSymbols,
) -> Result<Vec<Procedure>, DswpError> {
    let stages = plan.stages();
    let mut out = Vec::with_capacity(stages.len());
    for (index, &scc) in stages.iter().enumerate() {
        let emitter = StageEmitter {
            src,
            ldi,
            plan,
            rt,
            index,
            last: stages.len() - 1,
        };
        out.push(emitter.emit(scc)?);
    }
    Ok(out)
}

struct StageEmitter<'a> {
    src: &'a Procedure,
    ldi: &'a LoopDependenceInfo,
    plan: &'a StagePlan,
    rt: &'a RuntimeSymbols,
    index: usize,
    last: usize,
}

impl<'a> StageEmitter<'a> {
    fn emit(&self, scc: crate::graph::GraphNodeId) -> Result<Procedure, DswpError> {
        let ldi = self.ldi;
        let src = self.src;
        let mut stage = Procedure::new(
            format!("sccStage{}", self.index),
            vec![Type::Ptr, Type::Ptr],
            Type::I32,
        );
        let entry = stage.add_block("entry");
        let exit = stage.add_block("exit");

        // Phase 1: allocate clones for this SCC's instructions and for the
        // loop-resident skeleton. Operand slots stay dangling until phase 3.
        let mut clone_map: HashMap<InstId, InstId> = HashMap::new();
        for inst in ldi.scc_insts(scc) {
            clone_map.insert(inst, stage.clone_inst_from(src, inst));
        }
        for &inst in &ldi.skeleton {
            let in_loop = src
                .inst(inst)
                .block
                .is_some_and(|b| ldi.loop_info.contains(b));
            if in_loop {
                clone_map.insert(inst, stage.clone_inst_from(src, inst));
            }
        }

        // Phase 2: clone every loop block and insert the clones in origin
        // order. The loop preheader maps to the stage entry; the unique exit
        // maps to the stage exit, which is also where any other escaped
        // block reference lands during rewiring.
        let mut bb_map: HashMap<BlockId, BlockId> = HashMap::new();
        let preheader = self
            .ldi
            .loop_info
            .preheader
            .ok_or_else(|| DswpError::Materialization("loop lost its preheader".into()))?;
        bb_map.insert(preheader, entry);
        if let Some(unique_exit) = ldi.loop_info.unique_exit() {
            bb_map.insert(unique_exit, exit);
        }
        for block in ldi.loop_info.block_ids() {
            let clone_block = stage.add_block(src.block(block).name.clone());
            bb_map.insert(block, clone_block);
            for &inst in &src.block(block).insts {
                if let Some(&clone) = clone_map.get(&inst) {
                    stage.attach(clone, clone_block, None);
                }
            }
        }

        // Phase 3: rewire operands. Instruction references become their
        // clones; block references become their clones, or the stage exit
        // when the original target was the loop's exit path. φ predecessor
        // slots are ordinary block operands, so one rule covers them too.
        // The consumer's cross-stage slots are exempt: their producer lives
        // in the previous stage and phase 4 points them at the queue load.
        let queue_fed: HashSet<(InstId, usize)> = if self.index > 0 {
            let consumer_clone = *clone_map.get(&self.plan.link.consumer).ok_or_else(|| {
                DswpError::Materialization("cross-stage consumer has no clone in its stage".into())
            })?;
            self.plan
                .link
                .operand_indices
                .iter()
                .map(|&slot| (consumer_clone, slot))
                .collect()
        } else {
            HashSet::new()
        };
        let clones: Vec<InstId> = clone_map.values().copied().collect();
        for &clone in &clones {
            for slot in 0..stage.inst(clone).operands.len() {
                if queue_fed.contains(&(clone, slot)) {
                    continue;
                }
                match stage.inst(clone).operands[slot] {
                    Operand::Inst(old) => {
                        match clone_map.get(&old) {
                            Some(&new) => stage.set_operand(clone, slot, Operand::Inst(new)),
                            None => {
                                return Err(DswpError::Materialization(format!(
                                    "no clone for operand {old:?} of {clone:?} in {}",
                                    stage.name
                                )));
                            }
                        }
                    }
                    Operand::Block(old) => {
                        let new = bb_map.get(&old).copied().unwrap_or(exit);
                        stage.set_operand(clone, slot, Operand::Block(new));
                    }
                    Operand::Const(..) | Operand::Global(_) | Operand::Param(_) | Operand::Proc(_) => {}
                }
            }
        }

        // Phase 4: queue operations.
        if self.index > 0 {
            self.insert_inbound(&mut stage, entry, &clone_map, &bb_map)?;
        }
        if self.index < self.last {
            self.insert_outbound(&mut stage, &clone_map)?;
        }

        // Phase 5: stitch the entry into the cloned loop and give the exit
        // its return. Each stage returns its copy of the induction φ; the
        // runtime ignores the value, it only has to be deterministic.
        let header_clone = *bb_map
            .get(&ldi.loop_info.header)
            .ok_or_else(|| DswpError::Materialization("loop header was not cloned".into()))?;
        InstBuilder::at_end(&mut stage, entry).br(header_clone);
        let iv_clone = *clone_map
            .get(&ldi.iv.phi)
            .ok_or_else(|| DswpError::Materialization("induction variable was not cloned".into()))?;
        InstBuilder::at_end(&mut stage, exit).ret(Some(Operand::Inst(iv_clone)));

        verify_operand_closure(&stage)?;
        debug!(
            "materialized `{}`: {} blocks, {} instructions",
            stage.name,
            stage.blocks.len(),
            stage.iter_insts().count()
        );
        Ok(stage)
    }

    /// Pop the cross-stage value at the top of the consumer stage: allocate
    /// a scalar slot, `queue_pop` into it, reload it, and point every
    /// consumer operand that used the producer at the load. The pop+load
    /// pair then moves next to the consumer so the value is live exactly
    /// where the original SSA value was.
    fn insert_inbound(
        &self,
        stage: &mut Procedure,
        entry: BlockId,
        clone_map: &HashMap<InstId, InstId>,
        bb_map: &HashMap<BlockId, BlockId>,
    ) -> Result<(), DswpError> {
        let link = &self.plan.link;
        let consumer_clone = *clone_map.get(&link.consumer).ok_or_else(|| {
            DswpError::Materialization("cross-stage consumer has no clone in its stage".into())
        })?;

        let mut b = InstBuilder::at_end(stage, entry);
        let slot = b.alloca(link.elem_ty);
        let pop = b.call(
            Type::Void,
            Operand::Proc(self.rt.queue_pop),
            &[Operand::Param(0), Operand::Inst(slot)],
        );
        let load = b.load(link.elem_ty, Operand::Inst(slot));

        // Every slot that referenced the previous stage's producer now takes
        // the queue load instead. Phase 3 deliberately left these alone.
        for &slot_index in &link.operand_indices {
            stage.set_operand(consumer_clone, slot_index, Operand::Inst(load));
        }

        // Liveness: the queue is popped where the value is consumed. For a
        // φ consumer the value flows along an incoming edge, so the pair
        // lands before that edge's terminator instead of above the φ.
        let anchor = if self.src.inst(link.consumer).is_phi() {
            let first_slot = *link.operand_indices.first().ok_or_else(|| {
                DswpError::Materialization("queue link without consumer operand slots".into())
            })?;
            let incoming = self.src.inst(link.consumer).operands[first_slot + 1]
                .as_block()
                .ok_or_else(|| {
                    DswpError::Materialization("φ consumer has a malformed incoming slot".into())
                })?;
            let incoming_clone = *bb_map.get(&incoming).ok_or_else(|| {
                DswpError::Materialization("φ incoming block was not cloned".into())
            })?;
            stage.terminator(incoming_clone).ok_or_else(|| {
                DswpError::Materialization("cloned incoming block has no terminator".into())
            })?
        } else {
            consumer_clone
        };
        stage.move_before(pop, anchor);
        stage.move_before(load, anchor);
        Ok(())
    }

    /// Push the cross-stage value right before the terminator of the
    /// producer's cloned block, after the producer has executed.
    fn insert_outbound(
        &self,
        stage: &mut Procedure,
        clone_map: &HashMap<InstId, InstId>,
    ) -> Result<(), DswpError> {
        let link = &self.plan.link;
        let producer_clone = *clone_map.get(&link.producer).ok_or_else(|| {
            DswpError::Materialization("cross-stage producer has no clone in its stage".into())
        })?;
        let block = stage.inst(producer_clone).block.ok_or_else(|| {
            DswpError::Materialization("cross-stage producer clone is detached".into())
        })?;
        let term = stage.terminator(block).ok_or_else(|| {
            DswpError::Materialization("producer's cloned block has no terminator".into())
        })?;
        let push = stage.add_inst(Instruction::new(
            Opcode::Call,
            Type::Void,
            smallvec![
                Operand::Proc(self.rt.queue_push),
                Operand::Param(1),
                Operand::Inst(producer_clone)
            ],
        ));
        stage.attach(push, block, Some(term));
        Ok(())
    }
}

/// Operand-closure check: every attached instruction references only
/// attached instructions and existing blocks of the same stage. A violation
/// is an emission bug, not an input property, so it is fatal.
fn verify_operand_closure(stage: &Procedure) -> Result<(), DswpError> {
    for (_, inst) in stage.iter_insts() {
        for op in &stage.inst(inst).operands {
            match op {
                Operand::Inst(target) => {
                    let ok = (target.0 as usize) < stage.insts.len()
                        && stage.inst(*target).block.is_some();
                    if !ok {
                        return Err(DswpError::Materialization(format!(
                            "instruction {inst:?} in `{}` references dangling value {target:?}",
                            stage.name
                        )));
                    }
                }
                Operand::Block(target) => {
                    if target.0 as usize >= stage.blocks.len() {
                        return Err(DswpError::Materialization(format!(
                            "instruction {inst:?} in `{}` references missing block {target:?}",
                            stage.name
                        )));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}
