use std::{path::PathBuf, process::ExitCode, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;

use tomasim::{
    config::HwConfig,
    cpu::{Cpu, ExecResult, ExitStatus},
    emulated::Emulated,
    inst::{Reg, Word},
    mem::Memory,
    out_of_order::OutOfOrder,
    program::Program,
    regs::RegFile,
};

fn parse_reg_assign(s: &str) -> Result<(Reg, Word), String> {
    let (reg, val) = s
        .split_once('=')
        .ok_or_else(|| format!("expected reg=value, got '{s}'"))?;
    let reg = reg
        .to_lowercase()
        .parse::<Reg>()
        .map_err(|_| format!("invalid register '{reg}'"))?;
    let val = val
        .parse::<Word>()
        .map_err(|_| format!("invalid value '{val}'"))?;
    Ok((reg, val))
}

#[derive(Parser, Debug)]
#[command(
    name = "tomasim",
    version,
    about = "Cycle-accurate simulator of a speculative Tomasulo pipeline with a reorder buffer"
)]
struct Cli {
    /// Assembly program: one instruction per line, `label:` lines, `;` comments.
    program: PathBuf,

    /// Memory image of whitespace-separated `address value` lines.
    #[arg(short, long)]
    mem: Option<PathBuf>,

    /// Hardware configuration as JSON (station counts, latencies, ROB size).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial register value, e.g. `--reg r1=10`. May be repeated.
    #[arg(long = "reg", value_parser = parse_reg_assign)]
    regs: Vec<(Reg, Word)>,

    /// Override the starting program counter.
    #[arg(long)]
    start_pc: Option<u16>,

    /// Override the cycle budget (default: 10 cycles per instruction).
    #[arg(long)]
    budget: Option<u64>,

    /// Run the in-order functional model instead of the pipeline.
    #[arg(long)]
    emulated: bool,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(ExitStatus::Completed) => ExitCode::SUCCESS,
        Ok(ExitStatus::BudgetExceeded) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitStatus> {
    let start = Instant::now();

    let contents = std::fs::read_to_string(&cli.program)
        .with_context(|| format!("failed to open {}", cli.program.display()))?;
    let prog = contents
        .parse::<Program>()
        .with_context(|| format!("failed to parse {}", cli.program.display()))?;

    let mem = match &cli.mem {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .parse::<Memory>()
            .with_context(|| format!("failed to parse {}", path.display()))?,
        None => Memory::new(),
    };

    let mut config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            serde_json::from_str::<HwConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => HwConfig::default(),
    };

    if let Some(pc) = cli.start_pc {
        config.start_pc = pc;
    }
    if let Some(budget) = cli.budget {
        config.cycle_budget = Some(budget);
    }

    config.validate(&prog).context("invalid hardware configuration")?;

    let mut regs = RegFile::new();
    for &(reg, val) in &cli.regs {
        regs.set(reg, val);
    }

    let res = if cli.emulated {
        Emulated::new(prog, regs, mem, config).exec_all()
    } else {
        OutOfOrder::new(prog, regs, mem, config).exec_all()
    };

    display(&res, start.elapsed().as_secs_f32());

    Ok(res.status)
}

fn display(res: &ExecResult, elapsed: f32) {
    match res.status {
        ExitStatus::Completed => println!("    EXECUTION COMPLETED"),
        ExitStatus::BudgetExceeded => println!("    CYCLE BUDGET EXCEEDED"),
    }
    println!("    =====================");
    println!("    Instructions retired: {}", res.stats.retired);
    println!("            Cycles taken: {}", res.stats.cycles);
    println!("  Instructions per clock: {:.2}", res.stats.ipc());
    println!("    Conditional branches: {}", res.stats.branches);
    println!("  Branch mispredictions: {}", res.stats.mispredicts);
    match res.stats.mispredict_rate() {
        Some(rate) => println!("    Misprediction rate: {:.1}%", rate * 100.0),
        None => println!("    Misprediction rate: N/A (no branches encountered)"),
    }
    println!("  Simulator time elapsed: {:.2}s", elapsed);

    println!("\nFinal register states:");
    for (reg, val) in res.regs.iter() {
        println!("{} = {}", reg, val);
    }

    println!("\nFinal memory states:");
    for (addr, val) in res.mem.touched() {
        println!("memory[{}] = {}", addr.0, val);
    }

    if !res.trace.is_empty() {
        println!("\n{:<6} {:<6} {:>8} {:>11} {:>9} {:>8} {:>9}", "pc", "op", "issued", "start exec", "end exec", "written", "committed");
        for t in &res.trace {
            println!(
                "{:<6} {:<6} {:>8} {:>11} {:>9} {:>8} {:>9}",
                t.pc.0,
                t.op.to_string(),
                stamp(t.issued),
                stamp(t.exec_start),
                stamp(t.exec_end),
                stamp(t.written),
                stamp(t.committed),
            );
        }
    }
}

fn stamp(cycle: Option<u64>) -> String {
    match cycle {
        Some(c) => c.to_string(),
        None => "—".to_owned(),
    }
}
