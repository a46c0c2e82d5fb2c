//! Analysis Module
//!
//! The upstream analyses the parallelizer consumes: natural-loop discovery
//! with canonical induction variables and compile-time trip counts,
//! post-dominator trees, and program dependence graph construction.

pub mod dependence;
pub mod loops;
pub mod postdom;

// Re-export commonly used types
pub use dependence::PdgBuilder;
pub use loops::{CanonicalIv, GoverningExit, LoopAnalyzer, LoopInfo};
pub use postdom::PostDominators;
