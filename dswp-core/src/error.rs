//! Error Handling
//!
//! Three failure categories, kept apart on purpose:
//! - `Ineligibility`: a loop does not satisfy the transformation's
//!   assumptions. This is a soft refusal; the caller proceeds with the
//!   module untouched and the variant names the failing predicate.
//! - `DswpError::Missing*` / `NoLoopFound`: the environment the pass needs
//!   is absent. The pass aborts, the module is untouched.
//! - `DswpError::Materialization`: an internal invariant broke while
//!   emitting stages. Partially-built stages are discarded before this
//!   surfaces, so callers never observe half-rewritten IR.

use thiserror::Error;

use crate::ir::Type;

/// A violated transformation assumption. Soft refusal, never a crash.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// The loop has no canonical induction variable (φ from 0, step 1).
    #[error("no canonical induction variable")]
    NoCanonicalInductionVariable,

    /// The loop's exit edges do not converge on a single exit block.
    #[error("loop has no unique exit block")]
    NoUniqueExit,

    /// The loop has no single latch block.
    #[error("loop has no unique latch")]
    NoUniqueLatch,

    /// Header entry edge is not a lone unconditional branch. Also the shape
    /// an already-transformed loop is left in by the preheader guard, which
    /// makes a second application refuse instead of stacking pipelines.
    #[error("loop has no canonical preheader")]
    NoCanonicalPreheader,

    /// Scalar evolution could not produce a compile-time trip count.
    #[error("loop trip count is not known at compile time")]
    UnknownTripCount,

    /// The body SCCDAG does not have exactly two components.
    #[error("loop body has {0} SCCs, pipeline needs exactly 2")]
    SccCount(usize),

    /// The two components are connected by more than one SCCDAG edge (or
    /// none), so there is no single pipeline direction.
    #[error("SCCDAG has {0} cross-SCC edges, pipeline needs exactly 1")]
    CrossEdgeCount(usize),

    /// The single cross-SCC edge bundles more than one data dependence.
    #[error("{0} values cross the stage boundary, pipeline forwards exactly 1")]
    CrossValueCount(usize),

    /// The cross-SCC edge is (at least partly) a memory dependence.
    #[error("memory dependence between pipeline stages")]
    MemoryDependence,

    /// A stage instruction consumes a loop instruction that is neither in
    /// its SCC, nor skeleton, nor the planned queue link.
    #[error("stage instruction depends on a value outside its stage")]
    OutsideOperand,

    /// The value crossing the stage boundary is not a scalar integer.
    #[error("queue element type {0:?} is not a scalar integer")]
    UnsupportedLinkType(Type),
}

/// Pass-level failures.
///
/// Uses `thiserror` for zero-cost error handling with detailed messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DswpError {
    /// A runtime support symbol is not declared in the target module.
    #[error("runtime symbol `{0}` is not declared in the target module")]
    MissingRuntimeSymbol(&'static str),

    /// The procedure the pass was pointed at does not exist.
    #[error("procedure `{0}` not found in module")]
    MissingProcedure(String),

    /// Loop analysis found nothing to parallelize.
    #[error("no natural loop found in `{0}`")]
    NoLoopFound(String),

    /// Internal invariant violation while emitting stages.
    #[error("stage materialization failed: {0}")]
    Materialization(String),
}
