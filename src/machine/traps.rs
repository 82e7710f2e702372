//! Which addresses the bus hands to the ULA instead of memory.

use crate::ula::peers::{TrapBus, TrapRange};

#[derive(Default)]
pub struct TrapTable {
    /// `None` traps in every set.
    claims: Vec<(Option<u8>, TrapRange)>,
    active_set: u8,
}

impl TrapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trapped(&self, addr: u16) -> bool {
        self.claims.iter().any(|&(set, range)| {
            set.map_or(true, |s| s == self.active_set) && range.contains(addr)
        })
    }

    pub fn active_set(&self) -> u8 {
        self.active_set
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl TrapBus for TrapTable {
    fn claim_trap_address(&mut self, range: TrapRange) {
        if !self.claims.contains(&(None, range)) {
            self.claims.push((None, range));
        }
    }

    fn claim_trap_address_in_set(&mut self, set: u8, range: TrapRange) {
        if !self.claims.contains(&(Some(set), range)) {
            self.claims.push((Some(set), range));
        }
    }

    fn release_trap_address(&mut self, range: TrapRange) {
        self.claims.retain(|&(_, r)| r != range);
    }

    fn set_trap_address_set(&mut self, set: u8) {
        self.active_set = set;
    }
}
