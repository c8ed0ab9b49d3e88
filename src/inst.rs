use std::{
    fmt::{self, Debug},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::{self, Display, EnumIter, EnumString};
use thiserror::Error;

/// Machine word. All arithmetic wraps at 16 bits.
pub type Word = i16;

#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Imm(pub Word);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(pub String);

/// Absolute instruction index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsPc(pub u16);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemRef {
    pub base: Reg,
    pub offset: Imm,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, EnumString, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
}

/// Opcode kind. Reservation stations and latencies are partitioned per kind.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, EnumString, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Load,
    Store,
    Beq,
    Call,
    Ret,
    Add,
    Addi,
    Nand,
    Mul,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst<JumpType: Debug + Clone = AbsPc> {
    Load(Reg, MemRef),
    Store(Reg, MemRef),
    BranchIfEqual(Reg, Reg, JumpType),
    Call(JumpType),
    Ret,
    Add(Reg, Reg, Reg),
    AddImm(Reg, Reg, Imm),
    Nand(Reg, Reg, Reg),
    Mul(Reg, Reg, Reg),
}

/// Inst with branch/call targets not yet resolved to instruction indices.
pub type LabeledInst = Inst<Label>;

/// Identifies one in-flight instruction: its reorder-buffer entry. Tags are
/// allocated in program order and never reused, so `<` is "older than".
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown instruction: '{0}'")]
    UnknownOp(String),
    #[error("missing operand {idx} for '{op}'")]
    MissingOperand { op: String, idx: usize },
    #[error("invalid register: '{0}'")]
    BadRegister(String),
    #[error("invalid immediate: '{0}'")]
    BadImmediate(String),
    #[error("invalid memory reference: '{0}'")]
    BadMemRef(String),
    #[error("invalid label name: '{0}'")]
    BadLabel(String),
    #[error("undefined label: '{0}'")]
    UndefinedLabel(String),
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<ParseError>,
    },
}

impl FromStr for LabeledInst {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, args) = s.split_once(' ').unwrap_or((s, ""));
        let args = args.split(',').collect::<Vec<_>>();

        let nth_arg = |n: usize| -> Result<&str, ParseError> {
            args.get(n)
                .map(|s| s.trim())
                .and_then(|s| if s.is_empty() { None } else { Some(s) })
                .ok_or_else(|| ParseError::MissingOperand {
                    op: op.to_owned(),
                    idx: n,
                })
        };
        let mem_arg = |n: usize| -> Result<MemRef, ParseError> { MemRef::from_str(nth_arg(n)?) };
        let imm_arg = |n: usize| -> Result<Imm, ParseError> { Imm::from_str(nth_arg(n)?) };
        let label_arg = |n: usize| -> Result<Label, ParseError> { Label::from_str(nth_arg(n)?) };
        let reg_arg = |n: usize| -> Result<Reg, ParseError> {
            let s = nth_arg(n)?;
            Reg::from_str(&s.to_lowercase()).map_err(|_| ParseError::BadRegister(s.to_owned()))
        };

        let inst = match op.to_lowercase().as_str() {
            "load" => LabeledInst::Load(reg_arg(0)?, mem_arg(1)?),
            "store" => LabeledInst::Store(reg_arg(0)?, mem_arg(1)?),
            "beq" => LabeledInst::BranchIfEqual(reg_arg(0)?, reg_arg(1)?, label_arg(2)?),
            "call" => LabeledInst::Call(label_arg(0)?),
            "ret" => LabeledInst::Ret,
            "add" => LabeledInst::Add(reg_arg(0)?, reg_arg(1)?, reg_arg(2)?),
            "addi" => LabeledInst::AddImm(reg_arg(0)?, reg_arg(1)?, imm_arg(2)?),
            "nand" => LabeledInst::Nand(reg_arg(0)?, reg_arg(1)?, reg_arg(2)?),
            "mul" => LabeledInst::Mul(reg_arg(0)?, reg_arg(1)?, reg_arg(2)?),
            _ => return Err(ParseError::UnknownOp(op.to_owned())),
        };

        Ok(inst)
    }
}

impl<J: Debug + Clone> Inst<J> {
    pub fn op(&self) -> Op {
        match self {
            Inst::Load(_, _) => Op::Load,
            Inst::Store(_, _) => Op::Store,
            Inst::BranchIfEqual(_, _, _) => Op::Beq,
            Inst::Call(_) => Op::Call,
            Inst::Ret => Op::Ret,
            Inst::Add(_, _, _) => Op::Add,
            Inst::AddImm(_, _, _) => Op::Addi,
            Inst::Nand(_, _, _) => Op::Nand,
            Inst::Mul(_, _, _) => Op::Mul,
        }
    }

    /// The architectural register this instruction's commit defines, if any.
    /// CALL defines R1 (the return-address register).
    pub fn dest(&self) -> Option<Reg> {
        match self {
            Inst::Load(dst, _)
            | Inst::Add(dst, _, _)
            | Inst::AddImm(dst, _, _)
            | Inst::Nand(dst, _, _)
            | Inst::Mul(dst, _, _) => Some(*dst),
            Inst::Call(_) => Some(Reg::R1),
            Inst::Store(_, _) | Inst::BranchIfEqual(_, _, _) | Inst::Ret => None,
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Inst::Store(_, _))
    }

    pub fn try_map_jumps<J2, E, F>(self, mut jump_fn: F) -> Result<Inst<J2>, E>
    where
        J2: Debug + Clone,
        F: FnMut(J) -> Result<J2, E>,
    {
        Ok(match self {
            Inst::Load(dst, src) => Inst::Load(dst, src),
            Inst::Store(src, dst) => Inst::Store(src, dst),
            Inst::BranchIfEqual(a, b, tgt) => Inst::BranchIfEqual(a, b, jump_fn(tgt)?),
            Inst::Call(tgt) => Inst::Call(jump_fn(tgt)?),
            Inst::Ret => Inst::Ret,
            Inst::Add(dst, a, b) => Inst::Add(dst, a, b),
            Inst::AddImm(dst, a, imm) => Inst::AddImm(dst, a, imm),
            Inst::Nand(dst, a, b) => Inst::Nand(dst, a, b),
            Inst::Mul(dst, a, b) => Inst::Mul(dst, a, b),
        })
    }

    pub fn map_jumps<J2, F>(self, mut jump_fn: F) -> Inst<J2>
    where
        J2: Debug + Clone,
        F: FnMut(J) -> J2,
    {
        self.try_map_jumps(|j| Ok::<_, std::convert::Infallible>(jump_fn(j)))
            .unwrap()
    }
}

impl Op {
    /// Functional-unit result for the operations that compute purely from
    /// their captured operands. LOAD (memory) and CALL (return address) are
    /// evaluated by the pipeline against memory and the instruction's PC.
    pub fn evaluate(self, vj: Word, vk: Word) -> Word {
        match self {
            Op::Add | Op::Addi => vj.wrapping_add(vk),
            Op::Nand => !(vj & vk),
            Op::Mul => vj.wrapping_mul(vk),
            Op::Beq => Word::from(vj == vk),
            Op::Ret | Op::Store => vj,
            Op::Load | Op::Call => unreachable!("{} is evaluated by the pipeline", self),
        }
    }
}

impl Reg {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Imm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = if let Some(hex) = s.strip_prefix("0x") {
            i32::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix("-0x") {
            i32::from_str_radix(hex, 16).map(|v| -v)
        } else {
            i32::from_str(s)
        };

        let val = val.map_err(|_| ParseError::BadImmediate(s.to_owned()))?;

        // Accept the signed range plus raw 16-bit patterns like 0xffff.
        if (-(1 << 15)..1 << 16).contains(&val) {
            Ok(Imm(val as u16 as Word))
        } else {
            Err(ParseError::BadImmediate(s.to_owned()))
        }
    }
}

impl FromStr for Label {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || "_.".contains(c)) {
            true => Ok(Label(s.to_owned())),
            false => Err(ParseError::BadLabel(s.to_owned())),
        }
    }
}

impl FromStr for MemRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseError::BadMemRef(s.to_owned());

        let (outer, rest) = s.split_once('(').ok_or_else(bad)?;
        let (inner, rest) = rest.split_once(')').ok_or_else(bad)?;

        if !rest.trim().is_empty() {
            return Err(bad());
        }

        let base = Reg::from_str(&inner.to_lowercase()).map_err(|_| bad())?;
        let offset = outer.parse::<Imm>().map_err(|_| bad())?;

        Ok(MemRef { base, offset })
    }
}

impl AbsPc {
    pub fn next(self) -> AbsPc {
        AbsPc(self.0 + 1)
    }
}

impl From<u16> for AbsPc {
    fn from(pc: u16) -> Self {
        AbsPc(pc)
    }
}

impl From<AbsPc> for usize {
    fn from(pc: AbsPc) -> Self {
        pc.0 as usize
    }
}

impl TryFrom<usize> for AbsPc {
    type Error = <u16 as TryFrom<usize>>::Error;

    fn try_from(pc: usize) -> Result<Self, Self::Error> {
        Ok(AbsPc(pc.try_into()?))
    }
}

impl From<u64> for Tag {
    fn from(x: u64) -> Self {
        Self(x)
    }
}

impl fmt::Debug for Imm {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Imm({})", self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Tag({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg() {
        assert_eq!(Reg::from_str("r0"), Ok(Reg::R0));
        assert_eq!(Reg::from_str("r1"), Ok(Reg::R1));
        assert_eq!(Reg::from_str("r7"), Ok(Reg::R7));
        assert!(Reg::from_str("r8").is_err());
        assert!(Reg::from_str("x0").is_err());
        assert!(Reg::from_str("0").is_err());
    }

    #[test]
    #[rustfmt::skip]
    fn test_imm() {
        assert_eq!(Imm::from_str("0"), Ok(Imm(0)));
        assert_eq!(Imm::from_str("42"), Ok(Imm(42)));
        assert_eq!(Imm::from_str("-1"), Ok(Imm(-1)));
        assert_eq!(Imm::from_str("0x10"), Ok(Imm(16)));
        assert_eq!(Imm::from_str("-0x10"), Ok(Imm(-16)));
        assert_eq!(Imm::from_str("0xffff"), Ok(Imm(-1)));
        assert_eq!(Imm::from_str("32767"), Ok(Imm(32767)));
        assert_eq!(Imm::from_str("-32768"), Ok(Imm(-32768)));
        assert!(Imm::from_str("65536").is_err());
        assert!(Imm::from_str("-32769").is_err());
        assert!(Imm::from_str("five").is_err());
    }

    #[test]
    #[rustfmt::skip]
    fn test_memref() {
        assert_eq!(MemRef::from_str("0(r1)"), Ok(MemRef { offset: Imm(0), base: Reg::R1 }));
        assert_eq!(MemRef::from_str("5(r2)"), Ok(MemRef { offset: Imm(5), base: Reg::R2 }));
        assert_eq!(MemRef::from_str("-2(r6)"), Ok(MemRef { offset: Imm(-2), base: Reg::R6 }));
        assert_eq!(MemRef::from_str("0x8(r0)"), Ok(MemRef { offset: Imm(8), base: Reg::R0 }));

        assert!(MemRef::from_str("(r1)").is_err());
        assert!(MemRef::from_str("0").is_err());
        assert!(MemRef::from_str("r1(0)").is_err());
        assert!(MemRef::from_str("0(r1) junk").is_err());
    }

    #[test]
    fn test_inst() {
        assert_eq!(
            "addi r1, r0, 5".parse::<LabeledInst>(),
            Ok(Inst::AddImm(Reg::R1, Reg::R0, Imm(5)))
        );
        assert_eq!(
            "LOAD r2, 0(r1)".parse::<LabeledInst>(),
            Ok(Inst::Load(
                Reg::R2,
                MemRef {
                    base: Reg::R1,
                    offset: Imm(0)
                }
            ))
        );
        assert_eq!(
            "beq r1, r2, end".parse::<LabeledInst>(),
            Ok(Inst::BranchIfEqual(
                Reg::R1,
                Reg::R2,
                Label("end".to_owned())
            ))
        );
        assert_eq!("ret".parse::<LabeledInst>(), Ok(Inst::Ret));
        assert!("jalr r1".parse::<LabeledInst>().is_err());
        assert!("add r1, r2".parse::<LabeledInst>().is_err());
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(Op::Add.evaluate(5, 7), 12);
        assert_eq!(Op::Add.evaluate(i16::MAX, 1), i16::MIN);
        assert_eq!(Op::Nand.evaluate(-1, -1), 0);
        assert_eq!(Op::Nand.evaluate(0, 0), -1);
        assert_eq!(Op::Mul.evaluate(6, 7), 42);
        assert_eq!(Op::Mul.evaluate(256, 256), 0);
        assert_eq!(Op::Beq.evaluate(3, 3), 1);
        assert_eq!(Op::Beq.evaluate(3, 4), 0);
        assert_eq!(Op::Ret.evaluate(9, 0), 9);
    }
}
