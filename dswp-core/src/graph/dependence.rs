//! Program Dependence Graph Facade
//!
//! Wraps the generic multigraph with the dependence vocabulary: edge kinds
//! (data / control / memory), the loop-carried flag, and the operations the
//! parallelizer needs on a PDG over IR instructions. Construction of the
//! full-procedure PDG lives with the upstream analyses; this module only
//! owns the representation and the loop-restriction queries.

use std::collections::HashMap;

use crate::analysis::loops::LoopInfo;
use crate::graph::digraph::{DiGraph, GraphEdgeId, GraphNodeId};
use crate::ir::{InstId, Procedure};

/// Kind of a single dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)] // Save 3-7 bytes per enum
pub enum DepKind {
    /// SSA value flows from producer to consumer
    Data = 0,
    /// Consumer's execution is decided by the producer branch
    Control = 1,
    /// Producer and consumer may touch the same memory
    Memory = 2,
}

/// Bitset of dependence kinds, used when edges are merged in a condensation.
///
/// A flag bitset instead of an enum hierarchy: merged edges OR their
/// classifications together, and membership tests stay one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepClasses(u8);

impl DepClasses {
    pub const DATA: DepClasses = DepClasses(1 << 0);
    pub const CONTROL: DepClasses = DepClasses(1 << 1);
    pub const MEMORY: DepClasses = DepClasses(1 << 2);

    #[inline]
    pub fn from_kind(kind: DepKind) -> Self {
        match kind {
            DepKind::Data => Self::DATA,
            DepKind::Control => Self::CONTROL,
            DepKind::Memory => Self::MEMORY,
        }
    }

    #[inline]
    pub fn insert(&mut self, other: DepClasses) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn contains(self, other: DepClasses) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any constituent was a memory dependence.
    #[inline]
    pub fn is_memory(self) -> bool {
        self.contains(Self::MEMORY)
    }

    /// Whether the set holds exactly one class.
    #[inline]
    pub fn is_only(self, other: DepClasses) -> bool {
        self.0 == other.0
    }
}

/// Attributes of one PDG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepEdge {
    pub kind: DepKind,
    /// The dependence crosses a loop back edge
    pub loop_carried: bool,
}

impl DepEdge {
    pub fn data(loop_carried: bool) -> Self {
        Self {
            kind: DepKind::Data,
            loop_carried,
        }
    }

    pub fn control() -> Self {
        Self {
            kind: DepKind::Control,
            loop_carried: false,
        }
    }

    pub fn memory(loop_carried: bool) -> Self {
        Self {
            kind: DepKind::Memory,
            loop_carried,
        }
    }
}

/// Program dependence graph over the instructions of one procedure.
///
/// Node payloads are instruction handles into that procedure; a side map
/// gives O(1) instruction-to-node lookup.
#[derive(Debug, Clone, Default)]
pub struct Pdg {
    pub graph: DiGraph<InstId, DepEdge>,
    node_of: HashMap<InstId, GraphNodeId>,
}

impl Pdg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an internal node for `inst` (idempotent).
    pub fn add_inst(&mut self, inst: InstId) -> GraphNodeId {
        if let Some(&node) = self.node_of.get(&inst) {
            return node;
        }
        let node = self.graph.add_node(inst);
        self.node_of.insert(inst, node);
        node
    }

    /// Node handle of `inst`, if it is in the graph.
    pub fn node_of(&self, inst: InstId) -> Option<GraphNodeId> {
        self.node_of.get(&inst).copied()
    }

    /// Instruction behind a node handle.
    #[inline]
    pub fn inst_of(&self, node: GraphNodeId) -> InstId {
        *self.graph.node(node)
    }

    /// Add a dependence edge between two instructions already in the graph.
    pub fn add_dep(&mut self, from: InstId, to: InstId, edge: DepEdge) -> GraphEdgeId {
        let from = self.node_of[&from];
        let to = self.node_of[&to];
        self.graph.add_edge(from, to, edge)
    }

    /// Producer and consumer instructions of an edge.
    pub fn endpoints(&self, edge: GraphEdgeId) -> (InstId, InstId) {
        let rec = self.graph.edge(edge);
        (self.inst_of(rec.from), self.inst_of(rec.to))
    }

    /// Restrict this PDG to the instructions of `loop_info`'s blocks.
    ///
    /// Instructions inside the loop become internal nodes; values defined
    /// outside the loop but connected to it survive as external references,
    /// so live-in edges keep both endpoints.
    pub fn loop_subgraph(&self, proc: &Procedure, loop_info: &LoopInfo) -> Pdg {
        let keep: Vec<GraphNodeId> = self
            .graph
            .internal_node_ids()
            .filter(|&n| {
                let inst = self.inst_of(n);
                proc.inst(inst)
                    .block
                    .is_some_and(|b| loop_info.contains(b))
            })
            .collect();
        self.restricted_to(&keep, true)
    }

    /// Subgraph over exactly `keep`, internal-only when `include_external`
    /// is false.
    pub fn restricted_to(&self, keep: &[GraphNodeId], include_external: bool) -> Pdg {
        let (graph, _) = self.graph.subgraph(keep, include_external);
        let node_of = graph
            .node_ids()
            .map(|n| (*graph.node(n), n))
            .collect();
        Pdg { graph, node_of }
    }

    /// Drop every edge matching the predicate.
    pub fn remove_edges_where(&mut self, mut drop: impl FnMut(InstId, InstId, &DepEdge) -> bool) {
        let inst_of: HashMap<GraphNodeId, InstId> =
            self.graph.node_ids().map(|n| (n, *self.graph.node(n))).collect();
        self.graph
            .retain_edges(|rec| !drop(inst_of[&rec.from], inst_of[&rec.to], &rec.payload));
    }
}
