//! Test Utilities
//!
//! Builders for the loop shapes the transformation tests exercise. Every
//! module declares the runtime support symbols; the loops differ in their
//! dependence structure.
#![allow(dead_code)]

use dswp_core::ir::{
    Global, GlobalInit, IcmpPred, InstBuilder, InstId, Module, Operand, ProcId, Procedure, Type,
};

/// A module with `queue_push` / `queue_pop` / `pipeline_runner` declared.
pub fn module_with_runtime(name: &str) -> Module {
    let mut m = Module::new(name);
    m.add_procedure(Procedure::new(
        "queue_push",
        vec![Type::Ptr, Type::I32],
        Type::Void,
    ));
    m.add_procedure(Procedure::new(
        "queue_pop",
        vec![Type::Ptr, Type::Ptr],
        Type::Void,
    ));
    m.add_procedure(Procedure::new("pipeline_runner", vec![Type::Ptr], Type::I32));
    m
}

/// Fill in a φ's latch incoming once the latch value exists.
pub fn seal_phi(proc: &mut Procedure, phi: InstId, value: InstId, block: dswp_core::ir::BlockId) {
    let inst = proc.inst_mut(phi);
    inst.operands.push(Operand::Inst(value));
    inst.operands.push(Operand::Block(block));
}

/// `sum = 0; for i in 0..trip { x = a[i] + 1; sum += x }`: the minimal
/// two-SCC loop, where the `x` chain feeds the `sum` recurrence through one
/// value.
pub fn counted_loop_module(trip: i64) -> Module {
    let mut m = module_with_runtime("counted");
    let a = m.add_global(Global {
        name: "a".to_string(),
        ty: Type::Ptr,
        init: GlobalInit::Zero,
        external_linkage: false,
    });

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let sum = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let p = b.ptr_add(Operand::Global(a), Operand::Inst(i));
    let x0 = b.load(Type::I32, Operand::Inst(p));
    let x = b.add(Type::I32, Operand::Inst(x0), Operand::const_i32(1));
    let sum_next = b.add(Type::I32, Operand::Inst(sum), Operand::Inst(x));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::Const(trip, Type::I32));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    seal_phi(&mut main, i, i_next, latch);
    seal_phi(&mut main, sum, sum_next, latch);
    m.add_procedure(main);
    m
}

/// Three chained recurrences (x feeds y feeds sum): a three-SCC pipeline,
/// currently past what the planner accepts.
pub fn three_stage_module() -> Module {
    let mut m = module_with_runtime("three_stage");

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let x = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let y = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let sum = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let x_next = b.add(Type::I32, Operand::Inst(x), Operand::const_i32(2));
    let y_next = b.add(Type::I32, Operand::Inst(y), Operand::Inst(x_next));
    let sum_next = b.add(Type::I32, Operand::Inst(sum), Operand::Inst(y_next));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::const_i32(1000));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    seal_phi(&mut main, i, i_next, latch);
    seal_phi(&mut main, x, x_next, latch);
    seal_phi(&mut main, y, y_next, latch);
    seal_phi(&mut main, sum, sum_next, latch);
    m.add_procedure(main);
    m
}

/// Canonical IV, but the loop bound is loaded from memory, so no
/// compile-time trip count exists.
pub fn unknown_trip_module() -> Module {
    let mut m = module_with_runtime("unknown_trip");
    let n = m.add_global(Global {
        name: "n".to_string(),
        ty: Type::I32,
        init: GlobalInit::Int(0),
        external_linkage: true,
    });

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let sum = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let x = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(3));
    let sum_next = b.add(Type::I32, Operand::Inst(sum), Operand::Inst(x));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let bound = b.load(Type::I32, Operand::Global(n));
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::Inst(bound));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    seal_phi(&mut main, i, i_next, latch);
    seal_phi(&mut main, sum, sum_next, latch);
    m.add_procedure(main);
    m
}

/// The counter starts at 3 and steps by 2: no canonical induction variable.
pub fn non_canonical_iv_module() -> Module {
    let mut m = module_with_runtime("non_canonical");

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::Const(3, Type::I32), entry)]);
    let sum = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let sum_next = b.add(Type::I32, Operand::Inst(sum), Operand::Const(5, Type::I32));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::Const(2, Type::I32));
    let c = b.icmp(IcmpPred::Sge, Operand::Inst(i_next), Operand::const_i32(101));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    seal_phi(&mut main, i, i_next, latch);
    seal_phi(&mut main, sum, sum_next, latch);
    m.add_procedure(main);
    m
}

/// Two-SCC loop whose stages also communicate through a scratch cell: the
/// producer recurrence stores into `@s`, the consumer side reloads it. The
/// cross-SCC edge therefore bundles a data and a carried memory dependence.
/// With memory cloning enabled the scratch dependence is dropped and the
/// loop becomes an ordinary one-value pipeline.
pub fn scratch_cell_module() -> Module {
    let mut m = module_with_runtime("scratch_cell");
    let s = m.add_global(Global {
        name: "s".to_string(),
        ty: Type::I32,
        init: GlobalInit::Int(0),
        external_linkage: false,
    });

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let x = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    let sum = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let x_next = b.add(Type::I32, Operand::Inst(x), Operand::Const(2, Type::I32));
    b.store(Operand::Inst(x_next), Operand::Global(s));
    let t = b.load(Type::I32, Operand::Global(s));
    let sum_next = b.add(Type::I32, Operand::Inst(sum), Operand::Inst(x_next));
    let sum2 = b.add(Type::I32, Operand::Inst(sum_next), Operand::Inst(t));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::const_i32(2000));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    seal_phi(&mut main, i, i_next, latch);
    seal_phi(&mut main, x, x_next, latch);
    seal_phi(&mut main, sum, sum2, latch);
    m.add_procedure(main);
    m
}

/// `for i { a[i+1] = a[i] + 1 }`: the carried store-to-load dependence
/// closes a cycle through memory, and the only value left to forward
/// between the remaining components is a pointer.
pub fn carried_array_module() -> Module {
    let mut m = module_with_runtime("carried_array");
    let a = m.add_global(Global {
        name: "a".to_string(),
        ty: Type::Ptr,
        init: GlobalInit::Zero,
        external_linkage: false,
    });

    let mut main = Procedure::new("main", vec![], Type::I32);
    let entry = main.add_block("entry");
    let header = main.add_block("header");
    let body = main.add_block("body");
    let latch = main.add_block("latch");
    let exit = main.add_block("exit");

    InstBuilder::at_end(&mut main, entry).br(header);

    let mut b = InstBuilder::at_end(&mut main, header);
    let i = b.phi(Type::I32, &[(Operand::const_i32(0), entry)]);
    b.br(body);

    let mut b = InstBuilder::at_end(&mut main, body);
    let p_read = b.ptr_add(Operand::Global(a), Operand::Inst(i));
    let x0 = b.load(Type::I32, Operand::Inst(p_read));
    let x = b.add(Type::I32, Operand::Inst(x0), Operand::const_i32(1));
    let i1 = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let p_write = b.ptr_add(Operand::Global(a), Operand::Inst(i1));
    b.store(Operand::Inst(x), Operand::Inst(p_write));
    b.br(latch);

    let mut b = InstBuilder::at_end(&mut main, latch);
    let i_next = b.add(Type::I32, Operand::Inst(i), Operand::const_i32(1));
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::const_i32(500));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(i)));

    seal_phi(&mut main, i, i_next, latch);
    m.add_procedure(main);
    m
}

/// Handle of the target procedure in a freshly built module.
pub fn main_proc(m: &Module) -> ProcId {
    m.find_procedure("main").expect("test module has a main")
}
