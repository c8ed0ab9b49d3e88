use std::str::FromStr;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inst::{Imm, Word};

/// Word address in data memory.
#[derive(Debug, Copy, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr(pub u16);

impl Addr {
    /// Effective address of a memory operand: base register value plus offset,
    /// wrapping in the 16-bit address space.
    pub fn from_base_offset(base: Word, offset: Imm) -> Addr {
        Addr((base as u16).wrapping_add(offset.0 as u16))
    }
}

/// Sparse data memory. Reads of unmapped addresses yield zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: HashMap<Addr, Word>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("line {line}: invalid address '{text}'")]
    BadAddress { line: usize, text: String },
    #[error("line {line}: invalid value '{text}'")]
    BadValue { line: usize, text: String },
    #[error("line {line}: expected 'address value'")]
    BadShape { line: usize },
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, addr: Addr) -> Word {
        self.cells.get(&addr).copied().unwrap_or(0)
    }

    pub fn write(&mut self, addr: Addr, val: Word) {
        self.cells.insert(addr, val);
    }

    /// Every address written so far (or preloaded), in address order.
    pub fn touched(&self) -> Vec<(Addr, Word)> {
        let mut cells = self.cells.iter().map(|(&a, &v)| (a, v)).collect::<Vec<_>>();
        cells.sort_unstable();
        cells
    }
}

impl<const N: usize> From<[(u16, Word); N]> for Memory {
    fn from(cells: [(u16, Word); N]) -> Self {
        Self {
            cells: cells.into_iter().map(|(a, v)| (Addr(a), v)).collect(),
        }
    }
}

/// Memory-image format: one `address value` pair per line, `;` comments.
impl FromStr for Memory {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mem = Memory::new();

        for (i, line) in s.lines().enumerate() {
            let line = line.trim();
            let line = &line[..line.find(';').unwrap_or(line.len())];
            if line.is_empty() {
                continue;
            }

            let i = i + 1;
            let mut fields = line.split_whitespace();
            let (addr, val) = match (fields.next(), fields.next(), fields.next()) {
                (Some(addr), Some(val), None) => (addr, val),
                _ => return Err(ImageError::BadShape { line: i }),
            };

            let addr = addr.parse::<u16>().map_err(|_| ImageError::BadAddress {
                line: i,
                text: addr.to_owned(),
            })?;
            let val = val.parse::<Word>().map_err(|_| ImageError::BadValue {
                line: i,
                text: val.to_owned(),
            })?;

            mem.write(Addr(addr), val);
        }

        Ok(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_reads_zero() {
        let mem = Memory::new();
        assert_eq!(mem.read(Addr(0)), 0);
        assert_eq!(mem.read(Addr(u16::MAX)), 0);
    }

    #[test]
    fn write_then_read() {
        let mut mem = Memory::new();
        mem.write(Addr(8), 99);
        mem.write(Addr(8), -1);
        assert_eq!(mem.read(Addr(8)), -1);
        assert_eq!(mem.touched(), vec![(Addr(8), -1)]);
    }

    #[test]
    fn parse_image() {
        let mem = "4 42\n8 -7 ; stack slot\n\n; done\n".parse::<Memory>().unwrap();
        assert_eq!(mem.read(Addr(4)), 42);
        assert_eq!(mem.read(Addr(8)), -7);
        assert_eq!(mem.read(Addr(12)), 0);
    }

    #[test]
    fn parse_image_errors() {
        assert!(matches!(
            "4".parse::<Memory>(),
            Err(ImageError::BadShape { line: 1 })
        ));
        assert!(matches!(
            "x 1".parse::<Memory>(),
            Err(ImageError::BadAddress { line: 1, .. })
        ));
        assert!(matches!(
            "0 1 2".parse::<Memory>(),
            Err(ImageError::BadShape { line: 1 })
        ));
    }

    #[test]
    fn effective_address_wraps() {
        assert_eq!(Addr::from_base_offset(8, Imm(0)), Addr(8));
        assert_eq!(Addr::from_base_offset(8, Imm(-2)), Addr(6));
        assert_eq!(Addr::from_base_offset(0, Imm(-1)), Addr(u16::MAX));
    }
}
