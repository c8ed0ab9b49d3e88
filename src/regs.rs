use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::inst::{Reg, Word};

pub const REG_COUNT: usize = 8;

/// Architectural register file. R0 reads as zero and ignores writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegFile {
    regs: [Word; REG_COUNT],
}

impl RegFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Reg) -> Word {
        if reg == Reg::R0 {
            0
        } else {
            self.regs[reg.index()]
        }
    }

    pub fn set(&mut self, reg: Reg, val: Word) {
        if reg != Reg::R0 {
            self.regs[reg.index()] = val;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Reg, Word)> + '_ {
        Reg::iter().map(|r| (r, self.get(r)))
    }
}

impl<const N: usize> From<[(Reg, Word); N]> for RegFile {
    fn from(regs: [(Reg, Word); N]) -> Self {
        let mut rf = Self::new();
        for (reg, val) in regs {
            rf.set(reg, val);
        }
        rf
    }
}
