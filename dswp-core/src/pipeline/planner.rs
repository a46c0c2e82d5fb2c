//! Stage Planner
//!
//! Applies the DSWP eligibility rules to a loop's SCCDAG and, when they all
//! hold, fixes the pipeline: which SCC feeds which, and the single value
//! crossing the boundary. The conjunction is checked in order and the first
//! violated predicate is reported, so a refusal diagnostic always names one
//! concrete reason.

use log::debug;
use smallvec::SmallVec;

use crate::error::Ineligibility;
use crate::graph::digraph::GraphNodeId;
use crate::ir::{InstId, Operand, Procedure, Type};
use crate::pipeline::loop_dependence::LoopDependenceInfo;

/// One producer/consumer pair crossing consecutive stages.
#[derive(Debug, Clone)]
pub struct LinkDescriptor {
    /// Instruction in the source SCC whose value is pushed
    pub producer: InstId,
    /// Instruction in the sink SCC that receives it
    pub consumer: InstId,
    /// Every operand slot of the consumer that referenced the producer.
    /// Multi-use consumers get all slots redirected to the queue load.
    pub operand_indices: SmallVec<[usize; 2]>,
    /// Scalar type transported by the queue, taken from the producer
    pub elem_ty: Type,
}

/// An eligible two-stage pipeline over a loop's SCCDAG.
#[derive(Debug, Clone)]
pub struct StagePlan {
    /// SCC executing as stage 0 (the producer side)
    pub source: GraphNodeId,
    /// SCC executing as stage 1 (the consumer side)
    pub sink: GraphNodeId,
    pub link: LinkDescriptor,
}

impl StagePlan {
    /// Stage SCCs in pipeline order.
    pub fn stages(&self) -> [GraphNodeId; 2] {
        [self.source, self.sink]
    }
}

/// Check eligibility and produce the stage plan.
pub fn plan_stages(
    proc: &Procedure,
    ldi: &LoopDependenceInfo,
) -> Result<StagePlan, Ineligibility> {
    if ldi.trip_count.is_none() {
        return Err(Ineligibility::UnknownTripCount);
    }

    let scc_count = ldi.sccdag.num_sccs();
    if scc_count != 2 {
        return Err(Ineligibility::SccCount(scc_count));
    }

    let edge_count = ldi.sccdag.num_edges();
    if edge_count != 1 {
        return Err(Ineligibility::CrossEdgeCount(edge_count));
    }
    let edge_id = ldi.sccdag.graph.edge_ids().next().expect("edge counted above");
    let edge = ldi.sccdag.graph.edge(edge_id);

    if edge.payload.is_memory() {
        return Err(Ineligibility::MemoryDependence);
    }

    let data_deps: Vec<(GraphNodeId, GraphNodeId)> = edge.payload.data_deps().collect();
    if data_deps.len() != 1 {
        return Err(Ineligibility::CrossValueCount(data_deps.len()));
    }
    let (producer_node, consumer_node) = data_deps[0];
    let producer = ldi.body_dg.inst_of(producer_node);
    let consumer = ldi.body_dg.inst_of(consumer_node);

    check_operands_are_stage_local(proc, ldi)?;

    let elem_ty = proc.inst(producer).ty;
    if !elem_ty.is_scalar_int() {
        return Err(Ineligibility::UnsupportedLinkType(elem_ty));
    }

    let operand_indices: SmallVec<[usize; 2]> = proc
        .inst(consumer)
        .operands
        .iter()
        .enumerate()
        .filter_map(|(i, op)| (*op == Operand::Inst(producer)).then_some(i))
        .collect();
    debug_assert!(
        !operand_indices.is_empty(),
        "cross-stage data dependence without a matching consumer operand"
    );

    debug!(
        "stage plan: {:?} -> {:?}, link {:?} -> {:?} ({:?})",
        edge.from, edge.to, producer, consumer, elem_ty
    );
    Ok(StagePlan {
        source: edge.from,
        sink: edge.to,
        link: LinkDescriptor {
            producer,
            consumer,
            operand_indices,
            elem_ty,
        },
    })
}

/// Every instruction cloned into a stage (SCC members and the loop-block
/// skeleton) must draw its instruction operands from inside the loop, so
/// each stage's clone map is total. Constants, globals and parameters need
/// no clone and pass freely; a reference to an instruction outside the loop
/// would dangle and is refused here rather than detected mid-emission.
fn check_operands_are_stage_local(
    proc: &Procedure,
    ldi: &LoopDependenceInfo,
) -> Result<(), Ineligibility> {
    let in_loop = |inst: InstId| {
        proc.inst(inst)
            .block
            .is_some_and(|b| ldi.loop_info.contains(b))
    };
    let loop_skeleton: Vec<InstId> = ldi
        .skeleton
        .iter()
        .copied()
        .filter(|&i| in_loop(i))
        .collect();
    for &inst in ldi.body.iter().chain(loop_skeleton.iter()) {
        for op in &proc.inst(inst).operands {
            let Operand::Inst(dep) = op else { continue };
            if !in_loop(*dep) {
                return Err(Ineligibility::OutsideOperand);
            }
            // Skeleton instructions are duplicated into every stage, so a
            // skeleton clone may only reference other skeleton values.
            if ldi.is_skeleton(inst) && !ldi.is_skeleton(*dep) {
                return Err(Ineligibility::OutsideOperand);
            }
        }
    }
    Ok(())
}
