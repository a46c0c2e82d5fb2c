//! Graph Primitives
//!
//! Directed multigraphs, dependence-edge vocabulary, and SCC condensation.
//! Everything here is pure data structure; the only failure mode is an
//! invalid handle, which is a programming fault and panics.

pub mod dependence;
pub mod digraph;
pub mod sccdag;

// Re-export commonly used types
pub use dependence::{DepClasses, DepEdge, DepKind, Pdg};
pub use digraph::{DiGraph, EdgeRec, GraphEdgeId, GraphNodeId};
pub use sccdag::{DepSummary, Scc, SccDag};
