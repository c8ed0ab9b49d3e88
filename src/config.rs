use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{inst::Op, program::Program};

/// Baseline hardware: the station counts, latencies, and reorder-buffer depth
/// the simulator models when nothing is overridden.
mod defaults {
    use crate::inst::Op;

    pub const STATIONS: [(Op, usize); 9] = [
        (Op::Load, 2),
        (Op::Store, 1),
        (Op::Beq, 1),
        (Op::Call, 1),
        (Op::Ret, 1),
        (Op::Add, 4),
        (Op::Addi, 4),
        (Op::Nand, 2),
        (Op::Mul, 1),
    ];

    pub const LATENCIES: [(Op, u64); 9] = [
        (Op::Load, 6),
        (Op::Store, 6),
        (Op::Beq, 1),
        (Op::Call, 1),
        (Op::Ret, 1),
        (Op::Add, 2),
        (Op::Addi, 2),
        (Op::Nand, 1),
        (Op::Mul, 8),
    ];

    pub const ROB_SIZE: usize = 6;

    /// A runaway program is cut off after this many cycles per instruction.
    pub const BUDGET_PER_INST: u64 = 10;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("reorder buffer needs at least one entry")]
    RobTooSmall,
    #[error("no reservation stations configured for '{0}', which the program uses")]
    NoStations(Op),
    #[error("latency for '{0}' must be at least one cycle")]
    ZeroLatency(Op),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HwConfig {
    pub stations: HashMap<Op, usize>,
    pub latencies: HashMap<Op, u64>,
    pub rob_size: usize,
    pub cycle_budget: Option<u64>,
    pub start_pc: u16,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            stations: defaults::STATIONS.into_iter().collect(),
            latencies: defaults::LATENCIES.into_iter().collect(),
            rob_size: defaults::ROB_SIZE,
            cycle_budget: None,
            start_pc: 0,
        }
    }
}

impl HwConfig {
    pub fn stations_for(&self, op: Op) -> usize {
        self.stations.get(&op).copied().unwrap_or(0)
    }

    pub fn latency_of(&self, op: Op) -> u64 {
        self.latencies.get(&op).copied().unwrap_or(1)
    }

    pub fn budget_for(&self, prog_len: usize) -> u64 {
        self.cycle_budget
            .unwrap_or(defaults::BUDGET_PER_INST * prog_len as u64)
    }

    /// Fail fast on hardware the program cannot run on.
    pub fn validate(&self, prog: &Program) -> Result<(), ConfigError> {
        if self.rob_size < 1 {
            return Err(ConfigError::RobTooSmall);
        }

        for inst in &prog.insts {
            let op = inst.op();
            if self.stations_for(op) == 0 {
                return Err(ConfigError::NoStations(op));
            }
            if self.latencies.get(&op).copied() == Some(0) {
                return Err(ConfigError::ZeroLatency(op));
            }
        }

        Ok(())
    }
}
