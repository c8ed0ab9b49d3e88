use crate::inst::{Reg, Tag};
use hashbrown::HashMap;

/// Register status table: maps each architectural register to the in-flight
/// reorder-buffer entry that will produce its next value. R0 is never renamed.
#[derive(Debug, Clone, Default)]
pub struct RegisterAliasTable {
    map: HashMap<Reg, Tag>,
}

impl RegisterAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Reg) -> Option<Tag> {
        if reg == Reg::R0 {
            return None;
        }

        self.map.get(&reg).copied()
    }

    /// Issue-side rename. Overwrites any previous producer unconditionally,
    /// which is what keeps at most one in-flight writer per register.
    pub fn rename(&mut self, reg: Reg, tag: Tag) {
        if reg == Reg::R0 {
            return;
        }

        self.map.insert(reg, tag);
    }

    /// Commit-side clear. Only drops the mapping if it still names the
    /// committing entry; a younger writer may have renamed the register since.
    pub fn retire(&mut self, reg: Reg, tag: Tag) {
        if self.map.get(&reg) == Some(&tag) {
            self.map.remove(&reg);
        }
    }

    pub fn kill_tags_after(&mut self, tag: Tag) {
        self.map.retain(|_, &mut t| t <= tag);
    }
}
