use strum::IntoEnumIterator;

use crate::{
    config::HwConfig,
    inst::{Imm, Op, Tag, Word},
    mem::Addr,
};

/// One reservation station. Only meaningful while `busy`; everything else is
/// stale leftovers from the previous occupant.
#[derive(Debug, Copy, Clone)]
pub struct Station {
    /// Opcode class this station serves, fixed at construction.
    pub class: Op,
    pub busy: bool,
    /// First operand: value once `qj` is `None`, otherwise waiting on that producer.
    pub vj: Word,
    pub qj: Option<Tag>,
    pub vk: Word,
    pub qk: Option<Tag>,
    pub result: Word,
    pub result_ready: bool,
    /// Set once execution has begun (operands resolved, first cycle counted).
    pub started: bool,
    pub cycles_left: u64,
    /// LOAD/STORE displacement; the effective address lands in `addr`.
    pub offset: Imm,
    pub addr: Option<Addr>,
    /// Backlink to the owning reorder-buffer entry.
    pub rob: Tag,
}

impl Station {
    fn idle(class: Op) -> Self {
        Self {
            class,
            busy: false,
            vj: 0,
            qj: None,
            vk: 0,
            qk: None,
            result: 0,
            result_ready: false,
            started: false,
            cycles_left: 0,
            offset: Imm(0),
            addr: None,
            rob: Tag::from(0),
        }
    }

    pub fn operands_ready(&self) -> bool {
        self.qj.is_none() && self.qk.is_none()
    }
}

/// All reservation stations, statically partitioned by opcode class with the
/// configured counts. An acquire for class X only ever takes a class-X slot.
#[derive(Debug, Clone)]
pub struct StationPool {
    stations: Vec<Station>,
}

impl StationPool {
    pub fn new(config: &HwConfig) -> Self {
        let mut stations = Vec::new();
        for op in Op::iter() {
            stations.extend((0..config.stations_for(op)).map(|_| Station::idle(op)));
        }

        Self { stations }
    }

    /// Claim a free station of the given class, reset for a new occupant.
    /// Fails when the class is saturated; the caller stalls.
    pub fn try_acquire(&mut self, op: Op) -> Option<usize> {
        let idx = self
            .stations
            .iter()
            .position(|s| s.class == op && !s.busy)?;

        self.stations[idx] = Station {
            busy: true,
            ..Station::idle(op)
        };

        Some(idx)
    }

    pub fn release(&mut self, idx: usize) {
        debug_assert!(self.stations[idx].busy);
        self.stations[idx].busy = false;
    }

    /// CDB snoop: every station waiting on this producer captures the value.
    pub fn snoop(&mut self, tag: Tag, value: Word) {
        for s in self.stations.iter_mut().filter(|s| s.busy) {
            if s.qj == Some(tag) {
                s.vj = value;
                s.qj = None;
            }
            if s.qk == Some(tag) {
                s.vk = value;
                s.qk = None;
            }
        }
    }

    pub fn kill_tags_after(&mut self, tag: Tag) {
        for s in self.stations.iter_mut() {
            if s.busy && s.rob > tag {
                s.busy = false;
            }
        }
    }

    pub fn all_idle(&self) -> bool {
        self.stations.iter().all(|s| !s.busy)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Station {
        &self.stations[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Station {
        &mut self.stations[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }
}
