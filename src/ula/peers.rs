//! Interfaces the ULA drives but does not implement.
//!
//! The ULA never touches backing storage itself: it tells the processor
//! which storage block backs which page, which timing table applies, and
//! when the IRQ line changes level.  Likewise it asks the bus which
//! address ranges to route here, and pokes the display and tape deck when
//! the control register changes.
//!
//! Handles are injected once at composition time through [`Peers`].

use std::cell::RefCell;
use std::rc::Rc;

use super::event_queue::Cycles;
use super::timing::TimingTable;

/// Offset of a block inside the processor's storage arena.
pub type StorageHandle = u32;

/// Memory-mapping and interrupt primitives offered by the CPU side.
pub trait Processor {
    /// Resize the storage arena and forget every previous allocation.
    fn set_memory_total(&mut self, bytes: u32);
    /// Allocate `size` bytes from the arena.
    fn get_storage(&mut self, size: u32) -> StorageHandle;
    fn write_memory_block(&mut self, handle: StorageHandle, offset: u32, data: &[u8]);

    /// Define how many address-space layouts exist at once.
    fn establish_memory_layouts(&mut self, count: u8);
    /// Select the layout subsequent page calls apply to.
    fn set_memory_layout(&mut self, layout: u8);
    /// Select which layout code running in `context` sees.
    fn set_memory_view(&mut self, context: u8, layout: u8);

    fn set_read_page(&mut self, addr: u16, storage: StorageHandle, length: u32);
    fn set_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32);
    /// Map the same 256-byte block repeatedly over `length` bytes.
    fn set_repeated_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32);
    fn set_exec_cycle_page(&mut self, addr: u16, table: &'static TimingTable, length: u32);

    /// Level of the IRQ line from `timestamp` on.
    fn set_irq_line(&mut self, asserted: bool, timestamp: Cycles);
}

/// Address range routed to a peripheral: `addr` matches when
/// `addr & mask == base`, or when it falls within `[base, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapRange {
    Masked { base: u16, mask: u16 },
    Span { start: u16, end: u16 },
}

impl TrapRange {
    pub const fn masked(base: u16, mask: u16) -> Self {
        TrapRange::Masked { base, mask }
    }

    pub const fn span(start: u16, end: u16) -> Self {
        TrapRange::Span { start, end }
    }

    pub fn contains(&self, addr: u16) -> bool {
        match *self {
            TrapRange::Masked { base, mask } => addr & mask == base,
            TrapRange::Span { start, end } => addr >= start && addr < end,
        }
    }
}

/// Bus-side registration of trapped address ranges.
pub trait TrapBus {
    /// Trap `range` in every trap set.
    fn claim_trap_address(&mut self, range: TrapRange);
    /// Trap `range` only while trap set `set` is selected.
    fn claim_trap_address_in_set(&mut self, set: u8, range: TrapRange);
    fn release_trap_address(&mut self, range: TrapRange);
    fn set_trap_address_set(&mut self, set: u8);
}

pub trait DisplayPort {
    /// Electron display mode 0-6 from `timestamp` on.
    fn set_mode(&mut self, timestamp: Cycles, mode: u8);
    /// Palette register `register` (0-7, i.e. &FE08-&FE0F) written.
    fn set_palette(&mut self, timestamp: Cycles, register: u8, value: u8);
    /// The frame timer raised `bits` at `timestamp`.
    fn mark_interrupt(&mut self, timestamp: Cycles, bits: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeMode {
    Off,
    Input,
    Output,
}

pub trait TapePort {
    fn set_mode(&mut self, timestamp: Cycles, mode: TapeMode, motor: bool);
}

/// Shared single-threaded handle.
pub type Shared<T> = Rc<RefCell<T>>;

/// Everything the ULA talks to, wired once by the machine.
#[derive(Clone)]
pub struct Peers {
    pub cpu: Shared<dyn Processor>,
    pub bus: Shared<dyn TrapBus>,
    pub display: Shared<dyn DisplayPort>,
    pub tape: Shared<dyn TapePort>,
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording stand-ins used by the unit tests.

    use super::*;
    use crate::ula::timing::BusSpeed;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        MemoryTotal(u32),
        Storage(u32, StorageHandle),
        Block(StorageHandle, u32, usize),
        Layouts(u8),
        Layout(u8),
        View(u8, u8),
        Read(u16, StorageHandle, u32),
        Write(u16, StorageHandle, u32),
        Repeated(u16, StorageHandle, u32),
        Exec(u16, BusSpeed, u32),
        Irq(bool, Cycles),
    }

    #[derive(Default)]
    pub struct MockCpu {
        pub calls: Vec<Call>,
        pub next_storage: StorageHandle,
        pub blocks: Vec<(StorageHandle, Vec<u8>)>,
    }

    impl MockCpu {
        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        pub fn irqs(&self) -> Vec<(bool, Cycles)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Irq(level, ts) => Some((*level, *ts)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Processor for MockCpu {
        fn set_memory_total(&mut self, bytes: u32) {
            self.next_storage = 0;
            self.calls.push(Call::MemoryTotal(bytes));
        }
        fn get_storage(&mut self, size: u32) -> StorageHandle {
            let handle = self.next_storage;
            self.next_storage += size;
            self.calls.push(Call::Storage(size, handle));
            handle
        }
        fn write_memory_block(&mut self, handle: StorageHandle, offset: u32, data: &[u8]) {
            self.calls.push(Call::Block(handle, offset, data.len()));
            self.blocks.push((handle, data.to_vec()));
        }
        fn establish_memory_layouts(&mut self, count: u8) {
            self.calls.push(Call::Layouts(count));
        }
        fn set_memory_layout(&mut self, layout: u8) {
            self.calls.push(Call::Layout(layout));
        }
        fn set_memory_view(&mut self, context: u8, layout: u8) {
            self.calls.push(Call::View(context, layout));
        }
        fn set_read_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
            self.calls.push(Call::Read(addr, storage, length));
        }
        fn set_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
            self.calls.push(Call::Write(addr, storage, length));
        }
        fn set_repeated_write_page(&mut self, addr: u16, storage: StorageHandle, length: u32) {
            self.calls.push(Call::Repeated(addr, storage, length));
        }
        fn set_exec_cycle_page(&mut self, addr: u16, table: &'static TimingTable, length: u32) {
            self.calls.push(Call::Exec(addr, table.speed(), length));
        }
        fn set_irq_line(&mut self, asserted: bool, timestamp: Cycles) {
            self.calls.push(Call::Irq(asserted, timestamp));
        }
    }

    #[derive(Default)]
    pub struct MockBus {
        pub claimed: Vec<(Option<u8>, TrapRange)>,
        pub released: Vec<TrapRange>,
        pub set: u8,
    }

    impl TrapBus for MockBus {
        fn claim_trap_address(&mut self, range: TrapRange) {
            self.claimed.push((None, range));
        }
        fn claim_trap_address_in_set(&mut self, set: u8, range: TrapRange) {
            self.claimed.push((Some(set), range));
        }
        fn release_trap_address(&mut self, range: TrapRange) {
            self.released.push(range);
            self.claimed.retain(|(_, r)| *r != range);
        }
        fn set_trap_address_set(&mut self, set: u8) {
            self.set = set;
        }
    }

    #[derive(Default)]
    pub struct MockDisplay {
        pub modes: Vec<(Cycles, u8)>,
        pub palette: Vec<(Cycles, u8, u8)>,
        pub interrupts: Vec<(Cycles, u8)>,
    }

    impl DisplayPort for MockDisplay {
        fn set_mode(&mut self, timestamp: Cycles, mode: u8) {
            self.modes.push((timestamp, mode));
        }
        fn set_palette(&mut self, timestamp: Cycles, register: u8, value: u8) {
            self.palette.push((timestamp, register, value));
        }
        fn mark_interrupt(&mut self, timestamp: Cycles, bits: u8) {
            self.interrupts.push((timestamp, bits));
        }
    }

    #[derive(Default)]
    pub struct MockTape {
        pub modes: Vec<(Cycles, TapeMode, bool)>,
    }

    impl TapePort for MockTape {
        fn set_mode(&mut self, timestamp: Cycles, mode: TapeMode, motor: bool) {
            self.modes.push((timestamp, mode, motor));
        }
    }

    pub struct Rig {
        pub cpu: Rc<RefCell<MockCpu>>,
        pub bus: Rc<RefCell<MockBus>>,
        pub display: Rc<RefCell<MockDisplay>>,
        pub tape: Rc<RefCell<MockTape>>,
    }

    impl Rig {
        pub fn new() -> Self {
            Self {
                cpu: Rc::new(RefCell::new(MockCpu::default())),
                bus: Rc::new(RefCell::new(MockBus::default())),
                display: Rc::new(RefCell::new(MockDisplay::default())),
                tape: Rc::new(RefCell::new(MockTape::default())),
            }
        }

        pub fn peers(&self) -> Peers {
            Peers {
                cpu: self.cpu.clone(),
                bus: self.bus.clone(),
                display: self.display.clone(),
                tape: self.tape.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_ranges() {
        let reg = TrapRange::masked(0xFE05, 0xFF0F);
        assert!(reg.contains(0xFE05));
        assert!(reg.contains(0xFE35));
        assert!(!reg.contains(0xFE06));

        let keys = TrapRange::span(0x8000, 0xC000);
        assert!(keys.contains(0x8000));
        assert!(keys.contains(0xBFFF));
        assert!(!keys.contains(0xC000));
    }
}
