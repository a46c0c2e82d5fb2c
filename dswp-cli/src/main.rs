// CLI driver for the DSWP loop parallelizer
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dswp_core::ir::{
    Global, GlobalInit, IcmpPred, InstBuilder, Module, Operand, Procedure, Type,
};
use dswp_core::pipeline::LdiOptimization;
use dswp_core::DswpPass;

#[derive(Parser)]
#[command(name = "dswp")]
#[command(about = "Decoupled software pipelining for a typed SSA IR")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Apply the DSWP transformation to a module
    Run {
        /// Path to the module (JSON)
        #[arg(short, long)]
        module: PathBuf,

        /// Write the transformed module here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the transformation report here
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Procedure holding the loop to parallelize
        #[arg(long, default_value = "main")]
        procedure: String,

        /// Enable the memory-cloning dependence optimization
        #[arg(long)]
        memory_cloning: bool,
    },
    /// Build the reference two-SCC loop in memory and transform it
    Demo,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            module,
            output,
            report,
            procedure,
            memory_cloning,
        } => {
            let text = fs::read_to_string(&module)
                .with_context(|| format!("reading module from {}", module.display()))?;
            let mut m: Module = serde_json::from_str(&text)
                .with_context(|| format!("parsing module from {}", module.display()))?;

            let mut pass = DswpPass::new();
            pass.target_procedure = procedure;
            if memory_cloning {
                pass = pass.with_optimization(LdiOptimization::MemoryCloning);
            }
            let result = pass.run_on_module(&mut m)?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(path) = report {
                fs::write(&path, serde_json::to_string_pretty(&result)?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }
            if let Some(path) = output {
                fs::write(&path, serde_json::to_string_pretty(&m)?)
                    .with_context(|| format!("writing module to {}", path.display()))?;
            }
            Ok(())
        }
        Commands::Demo => {
            let mut m = demo_module();
            let result = DswpPass::new().run_on_module(&mut m)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

/// The reference loop: `sum = 0; for i in 0..10000 { x = a[i] + 1; sum += x }`
/// with the runtime symbols declared alongside.
fn demo_module() -> Module {
    let mut m = Module::new("demo");
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

    // φ slots for the latch values are filled once those exist.
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
    let c = b.icmp(IcmpPred::Eq, Operand::Inst(i_next), Operand::const_i32(10_000));
    b.cond_br(Operand::Inst(c), exit, header);

    InstBuilder::at_end(&mut main, exit).ret(Some(Operand::Inst(sum)));

    for (phi, value) in [(i, i_next), (sum, sum_next)] {
        let inst = main.inst_mut(phi);
        inst.operands.push(Operand::Inst(value));
        inst.operands.push(Operand::Block(latch));
    }

    m.add_procedure(main);
    m
}
