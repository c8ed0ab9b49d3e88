use crate::{
    config::HwConfig,
    cpu::{Cpu, ExecResult, ExitStatus, Stats},
    inst::{AbsPc, Inst, Reg, Word},
    mem::{Addr, Memory},
    program::Program,
    regs::RegFile,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CpuState {
    Running,
    Stopped,
}

/// In-order functional model: one instruction at a time, no speculation.
/// Defines the architectural semantics the pipeline must agree with; cycle
/// counts are the summed latencies, with no overlap modeled.
#[derive(Debug, Clone)]
pub struct Emulated {
    regs: RegFile,
    mem: Memory,
    prog: Program,
    config: HwConfig,
    pc: AbsPc,
    stats: Stats,
}

impl Cpu for Emulated {
    fn new(prog: Program, regs: RegFile, mem: Memory, config: HwConfig) -> Self {
        Self {
            pc: AbsPc(config.start_pc),
            stats: Stats::default(),
            regs,
            mem,
            prog,
            config,
        }
    }

    fn exec_all(mut self) -> ExecResult {
        let budget = self.config.budget_for(self.prog.len());

        while CpuState::Running == self.exec_one() {
            #[cfg(debug_assertions)]
            if std::env::var("VERBOSE").is_ok() {
                dbg!(&self.regs);
            }

            if self.stats.cycles >= budget {
                return self.result(ExitStatus::BudgetExceeded);
            }
        }

        self.result(ExitStatus::Completed)
    }
}

impl Emulated {
    fn result(self, status: ExitStatus) -> ExecResult {
        ExecResult {
            regs: self.regs,
            mem: self.mem,
            stats: self.stats,
            trace: Vec::new(),
            status,
        }
    }

    fn exec_one(&mut self) -> CpuState {
        let next_inst = match self.prog.fetch(self.pc) {
            Some(i) => i.clone(),
            None => return CpuState::Stopped,
        };

        self.stats.cycles += self.config.latency_of(next_inst.op());
        let mut next_pc = self.pc.next();

        match next_inst {
            Inst::Load(dst, src) => {
                let addr = Addr::from_base_offset(self.regs.get(src.base), src.offset);
                self.regs.set(dst, self.mem.read(addr));
            }
            Inst::Store(src, dst) => {
                let addr = Addr::from_base_offset(self.regs.get(dst.base), dst.offset);
                self.mem.write(addr, self.regs.get(src));
            }
            Inst::BranchIfEqual(a, b, tgt) => {
                self.stats.branches += 1;
                if self.regs.get(a) == self.regs.get(b) {
                    next_pc = tgt;
                }
            }
            Inst::Call(tgt) => {
                self.regs.set(Reg::R1, self.pc.next().0 as Word);
                next_pc = tgt;
            }
            Inst::Ret => {
                next_pc = AbsPc(self.regs.get(Reg::R1) as u16);
            }
            Inst::Add(dst, a, b) => {
                let val = self.regs.get(a).wrapping_add(self.regs.get(b));
                self.regs.set(dst, val);
            }
            Inst::AddImm(dst, a, imm) => {
                let val = self.regs.get(a).wrapping_add(imm.0);
                self.regs.set(dst, val);
            }
            Inst::Nand(dst, a, b) => {
                let val = !(self.regs.get(a) & self.regs.get(b));
                self.regs.set(dst, val);
            }
            Inst::Mul(dst, a, b) => {
                let val = self.regs.get(a).wrapping_mul(self.regs.get(b));
                self.regs.set(dst, val);
            }
        }

        self.pc = next_pc;
        self.stats.retired += 1;

        CpuState::Running
    }
}
