use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::HwConfig,
    inst::{AbsPc, Op},
    mem::Memory,
    program::Program,
    regs::RegFile,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Completed,
    BudgetExceeded,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub cycles: u64,
    pub retired: u64,
    /// Conditional branches retired.
    pub branches: u64,
    pub mispredicts: u64,
    pub rob_stalls: u64,
    pub rs_stalls: u64,
}

impl Stats {
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.retired as f64 / self.cycles as f64
        }
    }

    /// `None` when no conditional branch retired.
    pub fn mispredict_rate(&self) -> Option<f64> {
        (self.branches > 0).then(|| self.mispredicts as f64 / self.branches as f64)
    }
}

/// Stage timestamps for one dynamic (issued) instruction. Each stamp is set
/// at most once; a stage the instruction never reached stays `None`, e.g.
/// commit for a squashed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstTiming {
    /// Static instruction index this dynamic instance was fetched from.
    pub pc: AbsPc,
    pub op: Op,
    pub issued: Option<u64>,
    pub exec_start: Option<u64>,
    pub exec_end: Option<u64>,
    pub written: Option<u64>,
    pub committed: Option<u64>,
}

impl InstTiming {
    pub fn new(pc: AbsPc, op: Op) -> Self {
        Self {
            pc,
            op,
            issued: None,
            exec_start: None,
            exec_end: None,
            written: None,
            committed: None,
        }
    }
}

#[derive(Clone)]
pub struct ExecResult {
    pub regs: RegFile,
    pub mem: Memory,
    pub stats: Stats,
    /// One record per dynamic instruction, in issue order. Empty for models
    /// without a pipeline.
    pub trace: Vec<InstTiming>,
    pub status: ExitStatus,
}

impl fmt::Debug for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecResult")
            .field("regs", &self.regs)
            .field("stats", &self.stats)
            .field("status", &self.status)
            .finish()
    }
}

pub trait Cpu {
    fn new(prog: Program, regs: RegFile, mem: Memory, config: HwConfig) -> Self;

    fn exec_all(self) -> ExecResult;
}
