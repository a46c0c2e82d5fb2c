//! SCC Condensation (SCCDAG)
//!
//! Condenses a dependence graph into its DAG of strongly-connected
//! components. SCCDAG nodes hold the base-graph handles of their members;
//! SCCDAG edges summarize every base edge crossing the same ordered pair of
//! components, with classifications merged by bitwise OR and the
//! loop-carried flag by logical OR. The constituent base edges are kept on
//! the summary so the stage planner can count cross-component data
//! dependences without rescanning the base graph.

use std::collections::{BTreeMap, HashMap};

use crate::graph::dependence::{DepClasses, DepEdge, Pdg};
use crate::graph::digraph::{DiGraph, GraphNodeId};

/// One strongly-connected component; members are base-graph node handles in
/// insertion order.
#[derive(Debug, Clone)]
pub struct Scc {
    pub members: Vec<GraphNodeId>,
}

impl Scc {
    #[inline]
    pub fn contains(&self, node: GraphNodeId) -> bool {
        self.members.contains(&node)
    }
}

/// Merged attributes of all base edges between one ordered SCC pair.
#[derive(Debug, Clone, Default)]
pub struct DepSummary {
    pub classes: DepClasses,
    pub loop_carried: bool,
    /// The underlying base edges as `(producer, consumer, attributes)`
    pub constituents: Vec<(GraphNodeId, GraphNodeId, DepEdge)>,
}

impl DepSummary {
    fn absorb(&mut self, from: GraphNodeId, to: GraphNodeId, edge: DepEdge) {
        self.classes.insert(DepClasses::from_kind(edge.kind));
        self.loop_carried |= edge.loop_carried;
        self.constituents.push((from, to, edge));
    }

    #[inline]
    pub fn is_memory(&self) -> bool {
        self.classes.is_memory()
    }

    /// Constituent data dependences, in base-edge order.
    pub fn data_deps(&self) -> impl Iterator<Item = (GraphNodeId, GraphNodeId)> + '_ {
        self.constituents
            .iter()
            .filter(|(_, _, e)| matches!(e.kind, crate::graph::dependence::DepKind::Data))
            .map(|&(f, t, _)| (f, t))
    }
}

/// Condensation of a PDG into its SCC DAG.
#[derive(Debug, Clone)]
pub struct SccDag {
    pub graph: DiGraph<Scc, DepSummary>,
    scc_of: HashMap<GraphNodeId, GraphNodeId>,
}

impl SccDag {
    /// Condense the internal nodes of `pdg`.
    pub fn condense(pdg: &Pdg) -> SccDag {
        let components = pdg.graph.strongly_connected_components();
        Self::from_groups(pdg, components)
    }

    fn from_groups(pdg: &Pdg, mut groups: Vec<Vec<GraphNodeId>>) -> SccDag {
        for group in &mut groups {
            group.sort_unstable();
        }
        groups.sort_unstable_by_key(|g| g[0]);

        let mut graph: DiGraph<Scc, DepSummary> = DiGraph::new();
        let mut scc_of: HashMap<GraphNodeId, GraphNodeId> = HashMap::new();
        for group in groups {
            let node = graph.add_node(Scc {
                members: group.clone(),
            });
            for member in group {
                scc_of.insert(member, node);
            }
        }

        // One summary edge per ordered SCC pair; BTreeMap keeps the edge
        // emission order deterministic.
        let mut summaries: BTreeMap<(GraphNodeId, GraphNodeId), DepSummary> = BTreeMap::new();
        for edge_id in pdg.graph.edge_ids() {
            let rec = pdg.graph.edge(edge_id);
            let (Some(&from_scc), Some(&to_scc)) = (scc_of.get(&rec.from), scc_of.get(&rec.to))
            else {
                continue; // endpoint is external to the condensed region
            };
            if from_scc == to_scc {
                continue;
            }
            summaries
                .entry((from_scc, to_scc))
                .or_default()
                .absorb(rec.from, rec.to, rec.payload);
        }
        for ((from, to), summary) in summaries {
            graph.add_edge(from, to, summary);
        }

        SccDag { graph, scc_of }
    }

    #[inline]
    pub fn num_sccs(&self) -> usize {
        self.graph.num_internal_nodes()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }

    /// Component containing a base-graph node.
    pub fn scc_of(&self, base: GraphNodeId) -> Option<GraphNodeId> {
        self.scc_of.get(&base).copied()
    }

    #[inline]
    pub fn scc(&self, node: GraphNodeId) -> &Scc {
        self.graph.node(node)
    }

    /// Merge two components into one and recompute the condensation edges.
    ///
    /// Used by normalization; the merged component keeps both member sets.
    pub fn merge(&mut self, pdg: &Pdg, a: GraphNodeId, b: GraphNodeId) {
        let mut groups: Vec<Vec<GraphNodeId>> = Vec::with_capacity(self.num_sccs() - 1);
        let mut merged = self.graph.node(a).members.clone();
        merged.extend_from_slice(&self.graph.node(b).members);
        groups.push(merged);
        for node in self.graph.internal_node_ids() {
            if node != a && node != b {
                groups.push(self.graph.node(node).members.clone());
            }
        }
        *self = Self::from_groups(pdg, groups);
    }

    /// Merge components whose separation is provably unnecessary. Runs to a
    /// fixpoint; each merge shrinks the DAG by one node.
    ///
    /// Three merges qualify:
    /// - a pair connected only by control dependences: once the loop
    ///   skeleton is duplicated into every stage, the control is re-derived
    ///   locally and the split buys nothing;
    /// - a single-instruction component whose data operands all arrive from
    ///   one producer component (none loop-carried): a straight-line
    ///   continuation of that producer;
    /// - a single-instruction component with no data producers and all data
    ///   consumers in one component (none loop-carried): a pure source that
    ///   only that consumer reads.
    pub fn normalize(&mut self, pdg: &Pdg) {
        while let Some((a, b)) = self.find_mergeable() {
            self.merge(pdg, a, b);
        }
    }

    fn find_mergeable(&self) -> Option<(GraphNodeId, GraphNodeId)> {
        for id in self.graph.edge_ids() {
            let rec = self.graph.edge(id);
            if rec.payload.classes.is_only(DepClasses::CONTROL) {
                return Some((rec.from, rec.to));
            }
        }
        for node in self.graph.internal_node_ids() {
            if self.graph.node(node).members.len() != 1 {
                continue;
            }
            let (data_in, carried_in) = self.data_neighbors(node, true);
            let (data_out, carried_out) = self.data_neighbors(node, false);
            if data_in.len() == 1 && !carried_in {
                return Some((data_in[0], node));
            }
            if data_in.is_empty() && data_out.len() == 1 && !carried_out {
                return Some((node, data_out[0]));
            }
        }
        None
    }

    /// Distinct components on the far side of `node`'s data constituents,
    /// and whether any such constituent is loop-carried.
    fn data_neighbors(&self, node: GraphNodeId, incoming: bool) -> (Vec<GraphNodeId>, bool) {
        let mut neighbors: Vec<GraphNodeId> = Vec::new();
        let mut carried = false;
        let edges: Vec<_> = if incoming {
            self.graph.in_edges(node).collect()
        } else {
            self.graph.out_edges(node).collect()
        };
        for id in edges {
            let rec = self.graph.edge(id);
            let data: Vec<_> = rec
                .payload
                .constituents
                .iter()
                .filter(|(_, _, e)| matches!(e.kind, crate::graph::dependence::DepKind::Data))
                .collect();
            if data.is_empty() {
                continue;
            }
            carried |= data.iter().any(|(_, _, e)| e.loop_carried);
            let far = if incoming { rec.from } else { rec.to };
            if !neighbors.contains(&far) {
                neighbors.push(far);
            }
        }
        (neighbors, carried)
    }
}
