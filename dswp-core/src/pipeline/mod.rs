//! Decoupled Software Pipelining
//!
//! The transformation proper. Given a module that declares the runtime
//! support symbols, the pass fetches the hot loop of the target procedure,
//! bundles its dependence analyses into a `LoopDependenceInfo`, asks the
//! planner for a two-stage pipeline, materializes the stage procedures, and
//! stitches them in behind a runtime guard.
//!
//! # Outcomes
//! - transformed: stages appended, preheader guarded, report says so
//! - ineligible: one diagnostic line names the failing predicate, module
//!   untouched
//! - hard error: missing runtime symbols / procedure / loop, or an internal
//!   materialization bug; module untouched either way

pub mod loop_dependence;
pub mod planner;
pub mod stage;
pub mod stitch;

// Re-export commonly used types
pub use loop_dependence::{LdiOptimization, LoopDependenceInfo};
pub use planner::{plan_stages, LinkDescriptor, StagePlan};
pub use stage::materialize_stages;
pub use stitch::{stitch_pipeline, PARALLEL_FLAG, STAGE_TABLE};

use std::collections::HashSet;

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::analysis::loops::{LoopAnalyzer, LoopInfo};
use crate::analysis::postdom::PostDominators;
use crate::analysis::PdgBuilder;
use crate::error::DswpError;
use crate::ir::{Module, ProcId, Procedure};

/// Registration name of the transformation.
pub const PASS_NAME: &str = "DSWP";

/// Runtime symbol names the target module must declare.
pub const QUEUE_PUSH: &str = "queue_push";
pub const QUEUE_POP: &str = "queue_pop";
pub const PIPELINE_RUNNER: &str = "pipeline_runner";

/// Runtime support procedures resolved in the target module.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSymbols {
    pub queue_push: ProcId,
    pub queue_pop: ProcId,
    pub pipeline_runner: ProcId,
}

impl RuntimeSymbols {
    /// Resolve by symbol lookup; a missing symbol aborts the pass.
    pub fn resolve(module: &Module) -> Result<Self, DswpError> {
        let find = |name: &'static str| {
            module
                .find_procedure(name)
                .ok_or(DswpError::MissingRuntimeSymbol(name))
        };
        Ok(Self {
            queue_push: find(QUEUE_PUSH)?,
            queue_pop: find(QUEUE_POP)?,
            pipeline_runner: find(PIPELINE_RUNNER)?,
        })
    }
}

/// What one invocation did, serializable for driver output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DswpReport {
    pub module: String,
    pub procedure: String,
    pub loop_header: Option<String>,
    pub trip_count: Option<u64>,
    pub scc_count: Option<usize>,
    pub transformed: bool,
    /// Failing predicate, when the loop was ineligible
    pub refusal: Option<String>,
    /// Names of the emitted stage procedures
    pub stages: Vec<String>,
}

/// The DSWP module transformation.
///
/// All state is per-invocation; the only module-level artifacts are the
/// guard flag and stage table globals the stitcher adds.
#[derive(Debug, Clone)]
pub struct DswpPass {
    /// Procedure holding the loop to parallelize
    pub target_procedure: String,
    /// Worker budget forwarded to the analysis bundle
    pub max_cores: u32,
    /// Optional dependence-sharpening analyses
    pub optimizations: HashSet<LdiOptimization>,
}

impl Default for DswpPass {
    fn default() -> Self {
        Self {
            target_procedure: "main".to_string(),
            max_cores: 2,
            optimizations: HashSet::new(),
        }
    }
}

impl DswpPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimization(mut self, opt: LdiOptimization) -> Self {
        self.optimizations.insert(opt);
        self
    }

    pub fn with_max_cores(mut self, max_cores: u32) -> Self {
        self.max_cores = max_cores;
        self
    }

    /// Run the pass over one module.
    ///
    /// On success the report says whether the loop was transformed or why it
    /// was refused; in both cases the module is in a consistent state. `Err`
    /// means the environment was unusable or an internal invariant broke,
    /// and the module is untouched.
    pub fn run_on_module(&self, module: &mut Module) -> Result<DswpReport, DswpError> {
        info!("{} for `{}`", PASS_NAME, module.name);
        let rt = RuntimeSymbols::resolve(module)?;
        let proc_id = module
            .find_procedure(&self.target_procedure)
            .ok_or_else(|| DswpError::MissingProcedure(self.target_procedure.clone()))?;

        let proc = module.procedure(proc_id);
        let loops = LoopAnalyzer::find_loops(proc);
        let Some(loop_info) = loops.first().cloned() else {
            return Err(DswpError::NoLoopFound(proc.name.clone()));
        };
        log_loop(proc, &loop_info);

        let mut report = DswpReport {
            module: module.name.clone(),
            procedure: proc.name.clone(),
            loop_header: Some(proc.block(loop_info.header).name.clone()),
            ..DswpReport::default()
        };

        let postdom = PostDominators::compute(proc);
        let pdg = PdgBuilder::build(proc, &postdom, &loops);
        let ldi = match LoopDependenceInfo::new(
            proc,
            &pdg,
            loop_info,
            &postdom,
            self.max_cores,
            &self.optimizations,
        ) {
            Ok(ldi) => ldi,
            Err(reason) => {
                info!("{PASS_NAME} refused: {reason}");
                report.refusal = Some(reason.to_string());
                return Ok(report);
            }
        };
        report.trip_count = ldi.trip_count;
        report.scc_count = Some(ldi.sccdag.num_sccs());
        if let Some(scc) = ldi.governing_scc(proc) {
            debug!("governing induction variable feeds SCC {scc:?}");
        }

        let plan = match plan_stages(proc, &ldi) {
            Ok(plan) => plan,
            Err(reason) => {
                info!("{PASS_NAME} refused: {reason}");
                report.refusal = Some(reason.to_string());
                return Ok(report);
            }
        };

        // Stages are built off-module; nothing below this point can leave
        // the module half-rewritten.
        let stages = materialize_stages(proc, &ldi, &plan, &rt)?;
        report.stages = stages.iter().map(|s| s.name.clone()).collect();
        let stage_ids: Vec<ProcId> = stages
            .into_iter()
            .map(|s| module.add_procedure(s))
            .collect();
        stitch_pipeline(module, proc_id, &ldi, &stage_ids, &rt)?;

        report.transformed = true;
        info!(
            "{PASS_NAME} transformed `{}`: stages {:?}",
            report.procedure, report.stages
        );
        Ok(report)
    }
}

/// Structured version of the original loop printout: classify each block of
/// the loop for the trace log.
fn log_loop(proc: &Procedure, lp: &LoopInfo) {
    debug!(
        "candidate loop: header {:?}, {} blocks, {} exit(s)",
        lp.header,
        lp.blocks.count_ones(),
        lp.exits.len()
    );
    if log::log_enabled!(log::Level::Trace) {
        for block in lp.block_ids() {
            let role = if block == lp.header {
                "header"
            } else if lp.unique_latch() == Some(block) {
                "latch"
            } else if lp.exiting.contains(&block) {
                "exiting"
            } else {
                "body"
            };
            trace!(
                "  {role} {:?} `{}`: {} instructions",
                block,
                proc.block(block).name,
                proc.block(block).insts.len()
            );
        }
    }
}
