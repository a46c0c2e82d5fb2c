//! # dswp-core
//!
//! Decoupled Software Pipelining (DSWP) over a typed SSA intermediate
//! representation. Given a module whose target procedure contains a counted
//! hot loop, the pass partitions the loop body along the strongly-connected
//! components of its program dependence graph, emits one procedure per
//! pipeline stage communicating through single-producer/single-consumer
//! queues, and reroutes the loop's preheader through a runtime-readable
//! guard so both the serial loop and the pipeline survive in the module.
//!
//! The crate is organized the way the pass consumes it:
//! - [`ir`]: the SSA IR facade (instructions, blocks, procedures, builder)
//! - [`graph`]: directed multigraphs, dependence edges, SCC condensation
//! - [`analysis`]: loops, induction variables, post-dominators, PDG
//!   construction
//! - [`pipeline`]: the DSWP transformation itself
//!
//! The companion `dswp-runtime` crate implements the queue and runner the
//! emitted code targets.

pub mod analysis;
pub mod error;
pub mod graph;
pub mod ir;
pub mod pipeline;

pub use error::{DswpError, Ineligibility};
pub use pipeline::{DswpPass, DswpReport, PASS_NAME};
