use config::HwConfig;
use cpu::{Cpu, ExecResult};
use mem::Memory;
use program::Program;
use regs::RegFile;

pub mod cdb;
pub mod config;
pub mod cpu;
pub mod emulated;
pub mod inst;
pub mod mem;
pub mod out_of_order;
pub mod program;
pub mod queue;
pub mod rat;
pub mod regs;
pub mod reservation_station;
pub mod rob;

pub fn parse_and_exec<C: Cpu>(name: &'static str, regs: RegFile, mem: Memory) -> ExecResult {
    let contents = std::fs::read_to_string(format!("asm/{}.asm", name)).unwrap();
    let prog = contents
        .parse::<Program>()
        .expect("failed to parse assembly");

    let config = HwConfig::default();
    config.validate(&prog).expect("invalid default hardware");

    C::new(prog, regs, mem, config).exec_all()
}
