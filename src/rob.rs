use crate::{
    inst::{AbsPc, Inst, Reg, Tag, Word},
    mem::Addr,
    queue::Queue,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RobState {
    Issued,
    Executing,
    Written,
}

/// Where a committed value lands. A store's address is unknown until its base
/// operand resolves; it is published here when the store starts executing so
/// younger loads can order against it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dest {
    Reg(Reg),
    Mem(Option<Addr>),
    None,
}

#[derive(Debug, Clone)]
pub struct RobEntry {
    pub tag: Tag,
    pub pc: AbsPc,
    pub inst: Inst,
    pub state: RobState,
    pub dest: Dest,
    pub value: Word,
    pub ready: bool,
    pub speculative: bool,
}

impl RobEntry {
    pub fn new(tag: Tag, pc: AbsPc, inst: Inst, speculative: bool) -> Self {
        let dest = match inst.dest() {
            Some(reg) => Dest::Reg(reg),
            None if inst.is_store() => Dest::Mem(None),
            None => Dest::None,
        };

        Self {
            tag,
            pc,
            inst,
            state: RobState::Issued,
            dest,
            value: 0,
            ready: false,
            speculative,
        }
    }
}

/// In-flight instructions in program order. Head commits, tail allocates.
/// Entries leave by committing (popped) or by being squashed (removed), so
/// "present in the buffer" means "issued and not yet retired".
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    rob: Queue<RobEntry>,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            rob: Queue::new(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.rob.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.rob.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rob.len()
    }

    #[must_use]
    pub fn try_push(&mut self, entry: RobEntry) -> Option<RobEntry> {
        debug_assert!(self
            .rob
            .iter()
            .last()
            .map(|prev| prev.tag < entry.tag)
            .unwrap_or(true));

        self.rob.try_push(entry)
    }

    pub fn head_ready_to_commit(&self) -> bool {
        self.rob
            .front()
            .map(|ent| ent.ready && ent.state == RobState::Written)
            .unwrap_or(false)
    }

    pub fn pop_head(&mut self) -> Option<RobEntry> {
        debug_assert!(self.head_ready_to_commit());
        self.rob.try_pop()
    }

    pub fn get(&self, tag: Tag) -> Option<&RobEntry> {
        self.rob.iter().find(|ent| ent.tag == tag)
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut RobEntry> {
        self.rob.iter_mut().find(|ent| ent.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RobEntry> {
        self.rob.iter()
    }

    pub fn kill_tags_after(&mut self, tag: Tag) {
        self.rob.retain(|ent| ent.tag <= tag);
    }
}
