//! Flat storage arena behind 256-byte page tables.
//!
//! Every layout maps each page of the 64K address space to an offset in
//! the arena for reads, another for writes, and a timing table for code
//! executing there.  Which layout the CPU sees depends on the execution
//! context: the 8K region the program counter is in.

use crate::ula::event_queue::Cycles;
use crate::ula::peers::{Processor, StorageHandle};
use crate::ula::timing::{TimingTable, ONE_MHZ_BUS};

const PAGES: usize = 256;
const PAGE_SIZE: u32 = 256;
pub const CONTEXTS: usize = 8;
const MAX_LAYOUTS: u8 = 3;

#[derive(Clone)]
struct Layout {
    read: [u32; PAGES],
    write: [u32; PAGES],
    exec: [&'static TimingTable; PAGES],
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            read: [0; PAGES],
            write: [0; PAGES],
            exec: [&ONE_MHZ_BUS; PAGES],
        }
    }
}

pub struct PagedMemory {
    arena: Vec<u8>,
    next_free: u32,

    layouts: Vec<Layout>,
    /// Layout page calls currently apply to.
    editing: usize,
    /// Layout seen from each execution context.
    views: [u8; CONTEXTS],

    irq_line: bool,
    irq_changed_at: Cycles,
}

/// Execution context of code at `pc`.
pub fn context_of(pc: u16) -> usize {
    (pc >> 13) as usize
}

impl PagedMemory {
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            next_free: 0,
            layouts: vec![Layout::default()],
            editing: 0,
            views: [0; CONTEXTS],
            irq_line: false,
            irq_changed_at: 0,
        }
    }

    fn view(&self, context: usize) -> &Layout {
        let layout = self.views[context % CONTEXTS] as usize;
        &self.layouts[layout.min(self.layouts.len() - 1)]
    }

    fn pages(addr: u16, length: u32) -> impl Iterator<Item = (usize, u32)> {
        let first = (addr >> 8) as usize;
        let count = (length / PAGE_SIZE) as usize;
        (0..count)
            .map(move |i| (first + i, i as u32 * PAGE_SIZE))
            .take_while(|&(page, _)| page < PAGES)
    }

    /// Byte at `addr` as seen by code running in `context`.
    pub fn read(&self, addr: u16, context: usize) -> u8 {
        let base = self.view(context).read[(addr >> 8) as usize];
        self.arena
            .get((base + (addr & 0xFF) as u32) as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    pub fn write(&mut self, addr: u16, context: usize, value: u8) {
        let base = self.view(context).write[(addr >> 8) as usize];
        if let Some(byte) = self.arena.get_mut((base + (addr & 0xFF) as u32) as usize) {
            *byte = value;
        }
    }

    /// Cycles an instruction of `cycles` bus cycles costs when fetched
    /// from `pc` at `frame_offset`.
    pub fn instruction_cost(&self, pc: u16, cycles: u32, frame_offset: Cycles) -> u32 {
        let table = self.view(context_of(pc)).exec[(pc >> 8) as usize];
        let mut offset = frame_offset;
        let mut total = 0;
        for _ in 0..cycles {
            let cost = table.cost_at(offset) as u32;
            total += cost;
            offset = offset.wrapping_add(cost);
        }
        total
    }

    pub fn irq_line(&self) -> bool {
        self.irq_line
    }

    pub fn irq_changed_at(&self) -> Cycles {
        self.irq_changed_at
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn view_of(&self, context: usize) -> u8 {
        self.views[context % CONTEXTS]
    }

    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }
}

impl Default for PagedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PagedMemory {
    fn set_memory_total(&mut self, bytes: u32) {
        self.arena = vec![0; bytes as usize];
        self.next_free = 0;
    }

    fn get_storage(&mut self, size: u32) -> StorageHandle {
        let handle = self.next_free;
        self.next_free += size;
        if self.next_free as usize > self.arena.len() {
            log::warn!(
                "storage arena grown from {} to {} bytes",
                self.arena.len(),
                self.next_free
            );
            self.arena.resize(self.next_free as usize, 0);
        }
        handle
    }

    fn write_memory_block(&mut self, handle: StorageHandle, offset: u32, data: &[u8]) {
        let start = (handle + offset) as usize;
        let end = (start + data.len()).min(self.arena.len());
        if start >= end {
            log::warn!("block write outside the arena at {start}");
            return;
        }
        self.arena[start..end].copy_from_slice(&data[..end - start]);
    }

    fn establish_memory_layouts(&mut self, count: u8) {
        let count = count.clamp(1, MAX_LAYOUTS);
        self.layouts = vec![Layout::default(); count as usize];
        self.editing = 0;
        self.views = [0; CONTEXTS];
    }

    fn set_memory_layout(&mut self, layout: u8) {
        self.editing = (layout as usize).min(self.layouts.len() - 1);
    }

    fn set_memory_view(&mut self, context: u8, layout: u8) {
        if let Some(view) = self.views.get_mut(context as usize) {
            *view = layout;
        }
    }

    fn set_read_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
        let layout = &mut self.layouts[self.editing];
        for (page, offset) in Self::pages(addr, length) {
            layout.read[page] = storage + offset;
        }
    }

    fn set_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
        let layout = &mut self.layouts[self.editing];
        for (page, offset) in Self::pages(addr, length) {
            layout.write[page] = storage + offset;
        }
    }

    fn set_repeated_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
        let layout = &mut self.layouts[self.editing];
        for (page, _) in Self::pages(addr, length) {
            layout.write[page] = storage;
        }
    }

    fn set_exec_cycle_page(&mut self, addr: u16, table: &'static TimingTable, length: u32) {
        let layout = &mut self.layouts[self.editing];
        for (page, _) in Self::pages(addr, length) {
            layout.exec[page] = table;
        }
    }

    fn set_irq_line(&mut self, asserted: bool, timestamp: Cycles) {
        if self.irq_line != asserted {
            self.irq_changed_at = timestamp;
        }
        self.irq_line = asserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ula::timing::{HALTING_BUS, TWO_MHZ_BUS};

    fn memory() -> PagedMemory {
        let mut mem = PagedMemory::new();
        mem.set_memory_total(0x1_0000);
        mem
    }

    #[test]
    fn pages_map_into_the_arena() {
        let mut mem = memory();
        let ram = mem.get_storage(0x8000);
        let rom = mem.get_storage(0x4000);
        let scratch = mem.get_storage(256);
        mem.write_memory_block(rom, 0, &[0xA9, 0x01]);

        mem.set_read_page(0x0000, ram, 0x8000);
        mem.set_write_page(0x0000, ram, 0x8000);
        mem.set_read_page(0xC000, rom, 0x4000);
        mem.set_repeated_write_page(0xC000, scratch, 0x4000);

        mem.write(0x1234, 0, 0x55);
        assert_eq!(mem.read(0x1234, 0), 0x55);
        assert_eq!(mem.read(0xC001, 0), 0x01);

        // ROM writes land in the scratch page, at the same offset in every page
        mem.write(0xC001, 0, 0x99);
        assert_eq!(mem.read(0xC001, 0), 0x01);
        assert_eq!(mem.arena[(scratch + 1) as usize], 0x99);
        mem.write(0xD301, 0, 0x77);
        assert_eq!(mem.arena[(scratch + 1) as usize], 0x77);
    }

    #[test]
    fn views_select_layout_by_context() {
        let mut mem = memory();
        let low = mem.get_storage(0x8000);
        let high = mem.get_storage(0x8000);
        mem.establish_memory_layouts(2);
        mem.set_memory_layout(0);
        mem.set_read_page(0x0000, low, 0x8000);
        mem.set_write_page(0x0000, low, 0x8000);
        mem.set_memory_layout(1);
        mem.set_read_page(0x0000, high, 0x8000);
        mem.set_write_page(0x0000, high, 0x8000);
        mem.set_memory_view(6, 1);

        mem.write(0x3000, context_of(0xC123), 0xAB);
        assert_eq!(mem.read(0x3000, 6), 0xAB);
        assert_eq!(mem.read(0x3000, 0), 0x00);
        assert_eq!(mem.view_of(6), 1);
        assert_eq!(mem.layout_count(), 2);
    }

    #[test]
    fn instruction_cost_follows_exec_table() {
        let mut mem = memory();
        mem.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
        mem.set_exec_cycle_page(0x0000, &HALTING_BUS, 0x8000);

        assert_eq!(mem.instruction_cost(0xC000, 4, 0), 4);
        // 1 MHz above the display: every access waits for the odd phase
        assert_eq!(mem.instruction_cost(0x4000, 1, 0), 2);
        // start of a displayed line: stalled until the fetch is over
        let line = 60 * 128;
        assert_eq!(mem.instruction_cost(0x1000, 2, line), 80 + 2);
    }

    #[test]
    fn irq_line_remembers_last_edge() {
        let mut mem = memory();
        mem.set_irq_line(false, 10);
        assert_eq!(mem.irq_changed_at(), 0);
        mem.set_irq_line(true, 20);
        mem.set_irq_line(true, 30);
        assert!(mem.irq_line());
        assert_eq!(mem.irq_changed_at(), 20);
    }

    #[test]
    fn storage_grows_past_total() {
        let mut mem = PagedMemory::new();
        mem.set_memory_total(256);
        assert_eq!(mem.get_storage(256), 0);
        assert_eq!(mem.get_storage(512), 256);
        assert_eq!(mem.arena_len(), 768);
    }
}
