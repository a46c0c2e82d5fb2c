// End-to-end tests for the DSWP transformation: the boundary scenarios plus
// the structural invariants the emitted pipeline must satisfy.

mod utils;

use std::collections::HashSet;

use dswp_core::analysis::{LoopAnalyzer, PdgBuilder, PostDominators};
use dswp_core::ir::{GlobalInit, Module, Opcode, Operand, Procedure};
use dswp_core::pipeline::{
    LdiOptimization, LoopDependenceInfo, DswpPass, PARALLEL_FLAG, STAGE_TABLE,
};
use dswp_core::{DswpError, DswpReport};

fn run(m: &mut Module) -> DswpReport {
    DswpPass::new().run_on_module(m).expect("pass completed")
}

fn proc_by_name<'a>(m: &'a Module, name: &str) -> &'a Procedure {
    m.procedure(m.find_procedure(name).unwrap_or_else(|| panic!("no `{name}` in module")))
}

fn snapshot(m: &Module) -> String {
    serde_json::to_string(m).expect("module serializes")
}

#[test]
fn minimal_two_scc_loop_is_pipelined() {
    let mut m = utils::counted_loop_module(10_000);
    let report = run(&mut m);

    assert!(report.transformed, "refused: {:?}", report.refusal);
    assert_eq!(report.stages, vec!["sccStage0", "sccStage1"]);
    assert_eq!(report.trip_count, Some(10_000));
    assert_eq!(report.scc_count, Some(2));

    assert!(m.find_procedure("sccStage0").is_some());
    assert!(m.find_procedure("sccStage1").is_some());

    // Guard flag: module-level i32, external linkage, initialized to 0.
    let flag = m.global(m.find_global(PARALLEL_FLAG).expect("guard flag exists"));
    assert_eq!(flag.init, GlobalInit::Int(0));
    assert!(flag.external_linkage);

    // Stage table holds both stage procedures in pipeline order.
    let table = m.global(m.find_global(STAGE_TABLE).expect("stage table exists"));
    match &table.init {
        GlobalInit::ProcTable(stages) => {
            let names: Vec<&str> = stages.iter().map(|&p| m.procedure(p).name.as_str()).collect();
            assert_eq!(names, vec!["sccStage0", "sccStage1"]);
        }
        other => panic!("stage table has unexpected initializer {other:?}"),
    }
}

#[test]
fn queue_push_and_pop_are_statically_paired() {
    let mut m = utils::counted_loop_module(10_000);
    run(&mut m);

    let push = m.find_procedure("queue_push").unwrap();
    let pop = m.find_procedure("queue_pop").unwrap();
    let stage0 = proc_by_name(&m, "sccStage0");
    let stage1 = proc_by_name(&m, "sccStage1");

    assert_eq!(stage0.count_calls_to(push), 1);
    assert_eq!(stage0.count_calls_to(pop), 0);
    assert_eq!(stage1.count_calls_to(pop), 1);
    assert_eq!(stage1.count_calls_to(push), 0);
}

#[test]
fn guard_keeps_the_serial_loop_reachable() {
    let mut m = utils::counted_loop_module(10_000);
    let header = {
        let proc = proc_by_name(&m, "main");
        LoopAnalyzer::find_loops(proc)[0].header
    };
    run(&mut m);

    let proc = proc_by_name(&m, "main");
    // Preheader (block 0) now ends in a conditional branch whose targets
    // include the original loop header.
    let term = proc.terminator(dswp_core::ir::BlockId(0)).expect("preheader terminated");
    assert_eq!(proc.inst(term).opcode, Opcode::CondBr);
    let targets = proc.inst(term).branch_targets();
    assert!(targets.contains(&header), "serial loop header must stay reachable");

    // The guard reads the module flag.
    let flag = m.find_global(PARALLEL_FLAG).unwrap();
    let guard_loads = proc
        .block(dswp_core::ir::BlockId(0))
        .insts
        .iter()
        .filter(|&&i| {
            proc.inst(i).opcode == Opcode::Load
                && proc.inst(i).operands.first() == Some(&Operand::Global(flag))
        })
        .count();
    assert_eq!(guard_loads, 1);
}

#[test]
fn emitted_stages_have_closed_operands() {
    let mut m = utils::counted_loop_module(10_000);
    run(&mut m);

    for name in ["sccStage0", "sccStage1"] {
        let stage = proc_by_name(&m, name);
        let attached: HashSet<_> = stage.iter_insts().map(|(_, i)| i).collect();
        for (_, inst) in stage.iter_insts() {
            for op in &stage.inst(inst).operands {
                match op {
                    Operand::Inst(target) => {
                        assert!(
                            attached.contains(target),
                            "`{name}`: {inst:?} references {target:?} outside the stage"
                        );
                    }
                    Operand::Block(target) => {
                        assert!(
                            (target.0 as usize) < stage.blocks.len(),
                            "`{name}`: {inst:?} references a missing block"
                        );
                    }
                    _ => {}
                }
            }
        }
    }
}

#[test]
fn consumer_stage_reads_the_link_through_its_pop_slot() {
    let mut m = utils::counted_loop_module(10_000);
    run(&mut m);
    let stage1 = proc_by_name(&m, "sccStage1");

    // Exactly one scalar slot and one reload of it.
    let slots: Vec<_> = stage1
        .iter_insts()
        .filter(|&(_, i)| matches!(stage1.inst(i).opcode, Opcode::Alloca(_)))
        .map(|(_, i)| i)
        .collect();
    assert_eq!(slots.len(), 1);
    let loads: Vec<_> = stage1
        .iter_insts()
        .filter(|&(_, i)| {
            stage1.inst(i).opcode == Opcode::Load
                && stage1.inst(i).operands.first() == Some(&Operand::Inst(slots[0]))
        })
        .map(|(_, i)| i)
        .collect();
    assert_eq!(loads.len(), 1);

    // Some instruction in the stage consumes the reloaded value.
    let consumed = stage1
        .iter_insts()
        .any(|(_, i)| stage1.inst(i).operands.contains(&Operand::Inst(loads[0])));
    assert!(consumed, "queue load must feed the consumer clone");
}

#[test]
fn loop_values_used_outside_flow_through_exit_phis() {
    let mut m = utils::counted_loop_module(10_000);
    let (loop_blocks, exit_block) = {
        let proc = proc_by_name(&m, "main");
        let lp = &LoopAnalyzer::find_loops(proc)[0];
        (lp.blocks.clone(), lp.unique_exit().unwrap())
    };
    run(&mut m);

    let proc = proc_by_name(&m, "main");
    for (block, user) in proc.iter_insts() {
        if loop_blocks
            .get(block.0 as usize)
            .map(|b| *b)
            .unwrap_or(false)
        {
            continue;
        }
        if block == exit_block && proc.inst(user).is_phi() {
            continue; // the LCSSA φs themselves
        }
        for op in &proc.inst(user).operands {
            if let Operand::Inst(def) = op {
                let def_block = proc.inst(*def).block.expect("uses reference attached values");
                let defined_in_loop = loop_blocks
                    .get(def_block.0 as usize)
                    .map(|b| *b)
                    .unwrap_or(false);
                assert!(
                    !defined_in_loop,
                    "outside use {user:?} of loop value {def:?} must go through an exit φ"
                );
            }
        }
    }
}

#[test]
fn partition_covers_the_loop_exactly() {
    let m = utils::counted_loop_module(64);
    let proc = m.procedure(utils::main_proc(&m));
    let loops = LoopAnalyzer::find_loops(proc);
    let postdom = PostDominators::compute(proc);
    let pdg = PdgBuilder::build(proc, &postdom, &loops);
    let ldi = LoopDependenceInfo::new(
        proc,
        &pdg,
        loops[0].clone(),
        &postdom,
        2,
        &HashSet::new(),
    )
    .expect("eligible loop analyzes");

    for block in ldi.loop_info.block_ids() {
        for &inst in &proc.block(block).insts {
            assert_ne!(
                ldi.is_skeleton(inst),
                ldi.body.contains(&inst),
                "{inst:?} must be in exactly one of skeleton/body"
            );
        }
    }
    // Every body instruction sits in exactly one SCC.
    let mut seen = HashSet::new();
    for i in 0..ldi.sccdag.num_sccs() {
        for inst in ldi.scc_insts(dswp_core::graph::GraphNodeId(i as u32)) {
            assert!(seen.insert(inst), "{inst:?} appears in two SCCs");
        }
    }
    assert_eq!(seen.len(), ldi.body.len());
}

#[test]
fn memory_dependence_between_stages_is_refused() {
    let mut m = utils::scratch_cell_module();
    let before = snapshot(&m);
    let report = run(&mut m);
    assert!(!report.transformed);
    assert_eq!(
        report.refusal.as_deref(),
        Some("memory dependence between pipeline stages")
    );
    assert_eq!(snapshot(&m), before, "refused module must be byte-identical");
}

#[test]
fn memory_cloning_unlocks_the_scratch_cell_loop() {
    let mut m = utils::scratch_cell_module();
    let report = DswpPass::new()
        .with_optimization(LdiOptimization::MemoryCloning)
        .run_on_module(&mut m)
        .expect("pass completed");
    assert!(report.transformed, "refused: {:?}", report.refusal);
    assert_eq!(report.stages.len(), 2);
}

#[test]
fn carried_array_recurrence_is_refused() {
    let mut m = utils::carried_array_module();
    let before = snapshot(&m);
    let report = run(&mut m);
    assert!(!report.transformed);
    // The memory recurrence collapses into one component; what remains to
    // forward across the split is the written pointer, which no queue
    // carries.
    assert!(
        report.refusal.as_deref().is_some_and(|r| r.contains("not a scalar integer")),
        "unexpected refusal: {:?}",
        report.refusal
    );
    assert_eq!(snapshot(&m), before);
}

#[test]
fn unknown_trip_count_is_refused() {
    let mut m = utils::unknown_trip_module();
    let before = snapshot(&m);
    let report = run(&mut m);
    assert!(!report.transformed);
    assert_eq!(
        report.refusal.as_deref(),
        Some("loop trip count is not known at compile time")
    );
    assert_eq!(snapshot(&m), before);
}

#[test]
fn three_scc_pipeline_is_refused_for_now() {
    let mut m = utils::three_stage_module();
    let report = run(&mut m);
    assert!(!report.transformed);
    assert!(
        report.refusal.as_deref().is_some_and(|r| r.contains("3 SCCs")),
        "unexpected refusal: {:?}",
        report.refusal
    );
}

#[test]
fn non_canonical_iv_is_refused() {
    let mut m = utils::non_canonical_iv_module();
    let report = run(&mut m);
    assert!(!report.transformed);
    assert_eq!(report.refusal.as_deref(), Some("no canonical induction variable"));
}

#[test]
fn second_application_is_a_no_op() {
    let mut m = utils::counted_loop_module(10_000);
    let first = run(&mut m);
    assert!(first.transformed);

    let after_first = snapshot(&m);
    let second = run(&mut m);
    assert!(!second.transformed);
    assert_eq!(second.refusal.as_deref(), Some("loop has no canonical preheader"));
    assert_eq!(snapshot(&m), after_first, "second application must not diff");
}

#[test]
fn missing_runtime_symbols_abort_the_pass() {
    let mut m = Module::new("bare");
    let err = DswpPass::new().run_on_module(&mut m).unwrap_err();
    assert_eq!(err, DswpError::MissingRuntimeSymbol("queue_push"));
}

#[test]
fn missing_target_procedure_aborts_the_pass() {
    let mut m = utils::module_with_runtime("no_main");
    let err = DswpPass::new().run_on_module(&mut m).unwrap_err();
    assert_eq!(err, DswpError::MissingProcedure("main".to_string()));
}

#[test]
fn loopless_procedure_aborts_the_pass() {
    let mut m = utils::module_with_runtime("no_loop");
    let mut main = Procedure::new("main", vec![], dswp_core::ir::Type::I32);
    let entry = main.add_block("entry");
    dswp_core::ir::InstBuilder::at_end(&mut main, entry).ret(Some(Operand::const_i32(0)));
    m.add_procedure(main);

    let err = DswpPass::new().run_on_module(&mut m).unwrap_err();
    assert_eq!(err, DswpError::NoLoopFound("main".to_string()));
}
