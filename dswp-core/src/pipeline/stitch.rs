//! Pipeline Stitcher
//!
//! Wires the emitted stages back into the original procedure: a `launch`
//! block invokes the runtime pipeline runner over the stage table and falls
//! through to the loop's exit, and the preheader's terminator becomes a
//! guard on a module-level flag choosing between the serial loop and the
//! pipeline. The serial loop stays in the procedure on purpose: downstream
//! passes can still see both forms, and the flag is runtime-readable.

use log::debug;

use crate::error::DswpError;
use crate::ir::{
    Global, GlobalInit, IcmpPred, InstBuilder, InstId, Instruction, Module, Opcode, Operand,
    ProcId, Procedure, Type,
};
use crate::pipeline::loop_dependence::LoopDependenceInfo;
use crate::pipeline::RuntimeSymbols;

/// Name of the module-level guard flag. Zero selects the pipeline.
pub const PARALLEL_FLAG: &str = "__dswp_parallel_flag";

/// Name of the module-level stage function table.
pub const STAGE_TABLE: &str = "__dswp_stage_table";

/// Stitch the stage procedures into `proc_id` and guard the serial loop.
pub fn stitch_pipeline(
    module: &mut Module,
    proc_id: ProcId,
    ldi: &LoopDependenceInfo,
    stage_ids: &[ProcId],
    rt: &RuntimeSymbols,
) -> Result<(), DswpError> {
    let unique_exit = ldi.loop_info.unique_exit().ok_or_else(|| {
        DswpError::Materialization("loop lost its unique exit before stitching".into())
    })?;
    let preheader = ldi.loop_info.preheader.ok_or_else(|| {
        DswpError::Materialization("loop lost its preheader before stitching".into())
    })?;

    let stage_table = module.add_global(Global {
        name: STAGE_TABLE.to_string(),
        ty: Type::Ptr,
        init: GlobalInit::ProcTable(stage_ids.to_vec()),
        external_linkage: true,
    });
    let flag = module.add_global(Global {
        name: PARALLEL_FLAG.to_string(),
        ty: Type::I32,
        init: GlobalInit::Int(0),
        external_linkage: true,
    });

    let proc = module.procedure_mut(proc_id);

    // Launch block: run the pipeline, then join the loop's normal exit path.
    let launch = proc.add_block("launch");
    let mut b = InstBuilder::at_end(proc, launch);
    b.call(
        Type::I32,
        Operand::Proc(rt.pipeline_runner),
        &[Operand::Global(stage_table)],
    );
    b.br(unique_exit);

    // Guard: divert the preheader through the flag check. The serial header
    // stays reachable, so removing the old loop is a later pass's choice,
    // not a correctness requirement here.
    let old_term = proc.terminator(preheader).ok_or_else(|| {
        DswpError::Materialization("preheader has no terminator to replace".into())
    })?;
    proc.detach(old_term);
    let mut b = InstBuilder::at_end(proc, preheader);
    let loaded = b.load(Type::I32, Operand::Global(flag));
    let cmp = b.icmp(IcmpPred::Eq, Operand::Inst(loaded), Operand::const_i32(0));
    b.cond_br(Operand::Inst(cmp), launch, ldi.loop_info.header);

    restore_lcssa(proc, ldi, unique_exit, launch);
    debug!(
        "stitched pipeline into `{}`: launch block {:?}, guard on `{}`",
        proc.name, launch, PARALLEL_FLAG
    );
    Ok(())
}

/// Loop-closed SSA: every value defined in the (preserved) serial loop and
/// used outside it is routed through a φ in the unique exit block.
///
/// The φ takes the value along each exiting edge; along the launch edge the
/// serial value never materializes (the runtime owns the pipeline's
/// results), so that incoming is a typed zero.
fn restore_lcssa(
    proc: &mut Procedure,
    ldi: &LoopDependenceInfo,
    unique_exit: crate::ir::BlockId,
    launch: crate::ir::BlockId,
) {
    // Definitions inside the loop, in program order.
    let mut loop_defs: Vec<InstId> = Vec::new();
    for block in ldi.loop_info.block_ids() {
        loop_defs.extend(proc.block(block).insts.iter().copied());
    }

    for def in loop_defs {
        // Conforming uses are φs already sitting in the exit block; every
        // other outside use gets rewritten.
        let mut outside_uses: Vec<(InstId, usize)> = Vec::new();
        for (block, user) in proc.iter_insts() {
            if ldi.loop_info.contains(block) {
                continue;
            }
            if block == unique_exit && proc.inst(user).is_phi() {
                continue;
            }
            for (slot, op) in proc.inst(user).operands.iter().enumerate() {
                if *op == Operand::Inst(def) {
                    outside_uses.push((user, slot));
                }
            }
        }
        if outside_uses.is_empty() {
            continue;
        }

        let ty = proc.inst(def).ty;
        let mut incomings: Vec<(Operand, crate::ir::BlockId)> = ldi
            .loop_info
            .exiting
            .iter()
            .filter(|&&e| proc.successors(e).contains(&unique_exit))
            .map(|&e| (Operand::Inst(def), e))
            .collect();
        incomings.push((Operand::Const(0, ty), launch));

        let phi = proc.add_inst(Instruction::new(
            Opcode::Phi,
            ty,
            incomings
                .iter()
                .flat_map(|&(v, b)| [v, Operand::Block(b)])
                .collect(),
        ));
        let first = proc.block(unique_exit).insts.first().copied();
        proc.attach(phi, unique_exit, first);

        for (user, slot) in outside_uses {
            proc.set_operand(user, slot, Operand::Inst(phi));
        }
    }
}
