// Unit tests for loop discovery, induction variables, trip counts and
// post-dominators over the shared scenario modules.

mod utils;

use dswp_core::analysis::{LoopAnalyzer, PostDominators};
use dswp_core::ir::BlockId;

#[test]
fn counted_loop_structure_is_recognized() {
    let m = utils::counted_loop_module(10_000);
    let proc = m.procedure(utils::main_proc(&m));

    let loops = LoopAnalyzer::find_loops(proc);
    assert_eq!(loops.len(), 1);
    let lp = &loops[0];

    // Blocks were created as entry=0, header=1, body=2, latch=3, exit=4.
    assert_eq!(lp.header, BlockId(1));
    assert_eq!(lp.unique_latch(), Some(BlockId(3)));
    assert_eq!(lp.unique_exit(), Some(BlockId(4)));
    assert_eq!(lp.preheader, Some(BlockId(0)));
    assert!(lp.contains(BlockId(1)) && lp.contains(BlockId(2)) && lp.contains(BlockId(3)));
    assert!(!lp.contains(BlockId(0)) && !lp.contains(BlockId(4)));
}

#[test]
fn canonical_iv_and_trip_count_are_found() {
    let m = utils::counted_loop_module(10_000);
    let proc = m.procedure(utils::main_proc(&m));
    let lp = &LoopAnalyzer::find_loops(proc)[0];

    let iv = LoopAnalyzer::canonical_induction_variable(proc, lp).expect("canonical IV");
    assert!(proc.inst(iv.phi).is_phi());
    assert_eq!(
        LoopAnalyzer::small_constant_trip_count(proc, lp, &iv),
        Some(10_000)
    );
}

#[test]
fn non_canonical_iv_is_not_reported() {
    let m = utils::non_canonical_iv_module();
    let proc = m.procedure(utils::main_proc(&m));
    let lp = &LoopAnalyzer::find_loops(proc)[0];
    assert!(LoopAnalyzer::canonical_induction_variable(proc, lp).is_none());
}

#[test]
fn loaded_bound_has_no_compile_time_trip_count() {
    let m = utils::unknown_trip_module();
    let proc = m.procedure(utils::main_proc(&m));
    let lp = &LoopAnalyzer::find_loops(proc)[0];
    let iv = LoopAnalyzer::canonical_induction_variable(proc, lp).expect("canonical IV");
    assert_eq!(LoopAnalyzer::small_constant_trip_count(proc, lp, &iv), None);
}

#[test]
fn post_dominators_follow_the_exit_path() {
    let m = utils::counted_loop_module(100);
    let proc = m.procedure(utils::main_proc(&m));
    let pd = PostDominators::compute(proc);

    // entry=0, header=1, body=2, latch=3, exit=4: the only way out runs
    // header -> body -> latch -> exit.
    assert_eq!(pd.ipdom(BlockId(0)), Some(BlockId(1)));
    assert_eq!(pd.ipdom(BlockId(1)), Some(BlockId(2)));
    assert_eq!(pd.ipdom(BlockId(2)), Some(BlockId(3)));
    assert_eq!(pd.ipdom(BlockId(3)), Some(BlockId(4)));
    assert!(pd.postdominates(BlockId(4), BlockId(0)));
    assert!(!pd.postdominates(BlockId(2), BlockId(4)));

    // The loop's conditional branch controls the whole loop body.
    let deps = pd.control_dependent_blocks(proc, BlockId(3));
    assert!(deps.contains(&BlockId(1)) && deps.contains(&BlockId(2)) && deps.contains(&BlockId(3)));
    assert!(!deps.contains(&BlockId(4)));
}
