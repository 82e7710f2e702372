//! Address-space mapping: RAM, the sixteen sideways ROM slots, the
//! Slogger Master RAM Board modes, and which bus timing applies where.
//!
//! Storage itself belongs to the processor.  This module only allocates
//! blocks from its arena and tells it which block backs which page, in
//! every layout that is currently live.
//!
//! # Master RAM Board modes
//!
//! | mode      | layouts | RAM timing                                  |
//! |-----------|---------|---------------------------------------------|
//! | Off       | 1       | whole 32K on the 1 MHz bus                  |
//! | Turbo     | 1       | &0000-&3FFF at 2 MHz, rest 1 MHz            |
//! | 4 MHz     | 1       | everything at 2 MHz                         |
//! | Shadow    | 3       | screen memory moves to the extra 32K        |
//!
//! Only entering or leaving Shadow changes the storage topology; moving
//! between the other three just swaps timing tables.

use super::peers::{Processor, Shared, StorageHandle, TrapBus, TrapRange};
use super::roms::{self, RomError, RomLocator, ROM_SIZE};
use super::timing::{TimingTable, HALTING_BUS, ONE_MHZ_BUS, TWO_MHZ_BUS};

// ── Constants ─────────────────────────────────────────────────

/// Logical slot BASIC lives in (slot 10 and 11 alias it).
pub const ROM_BASIC: u8 = 8;
/// Logical slot of the operating system ROM.
pub const ROM_OS: u8 = 16;
const ROM_SLOTS: usize = 16;

/// Arena bytes before the shadow RAM is added: 32K RAM, 256 bytes of
/// write scratch, (OS + 13 sideways) × 16K and 64 bytes of JIM paging.
const ARENA_BASE: u32 = 360_704;
const RAM_SIZE: u32 = 0x8000;
const SHADOW_SIZE: u32 = 0x8000;
const SCRATCH_SIZE: u32 = 256;

/// Execution contexts the processor distinguishes for layout views.
pub const EXEC_CONTEXTS: u8 = 8;
/// In Shadow mode, code in this context sees the screen-in-shadow layout.
const SHADOW_VIEW_CONTEXT: u8 = 6;

/// Shadow-select register of the Master RAM Board.
pub const SHADOW_REGISTER: TrapRange = TrapRange::masked(0xFC7F, 0xFFFF);

/// Compatibility patch applied to the OS image (offsets into the ROM).
const OS_PATCH: [(usize, u8); 2] = [(0xFCC0 - 0xC000, b'l'), (0xFCC1 - 0xC000, b'e')];

/// Trap sets: normal, and with the keyboard paged over &8000-&BFFF.
pub const TRAP_SET_NORMAL: u8 = 0;
pub const TRAP_SET_KEYBOARD: u8 = 1;

const OS_ROM: &str = "%ROMPATH%/os.rom";
const SHADOW_OS_ROM: &str = "%ROMPATH%/os300.rom";
const BASIC_ROM: &str = "%ROMPATH%/basic.rom";

/// Logical sideways slot to physical slot.
///
/// Slots 8 and 9 are the keyboard, 10 and 11 both select BASIC, and the
/// slots above are packed down to close the gap.
pub fn remap_rom_slot(slot: u8) -> u8 {
    match slot {
        10 => 8,
        s if s > 10 => s - 3,
        s => s,
    }
}

/// Physical slot for a logical one, or `None` when nothing can live there.
fn physical_slot(slot: u8) -> Option<usize> {
    (slot < ROM_SLOTS as u8 || slot == ROM_OS).then(|| remap_rom_slot(slot) as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    Off,
    Turbo,
    FourMhz,
    Shadow,
}

impl MemoryMode {
    pub fn is_shadow(self) -> bool {
        self == MemoryMode::Shadow
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RomMode {
    #[default]
    Empty,
    Rom,
    Ram,
}

// ── Manager ───────────────────────────────────────────────────

pub struct MemoryBankManager {
    cpu: Shared<dyn Processor>,
    bus: Shared<dyn TrapBus>,
    locator: RomLocator,

    /// `None` until the first `set_mode`.
    mode: Option<MemoryMode>,
    halting: bool,

    ram: StorageHandle,
    scratch: StorageHandle,
    /// Physical slot storage; `None` means nothing allocated yet.
    rom_storage: [Option<StorageHandle>; ROM_SLOTS],
    rom_modes: [RomMode; ROM_SLOTS],
    /// Physical slots configured as sideways RAM, kept across rebuilds.
    sideways_ram: u16,

    // &FE05 paging state
    paged_rom: u8,
    last_page: u8,
    last_page_write: u8,
    keyboard_paged: bool,
}

impl MemoryBankManager {
    pub fn new(cpu: Shared<dyn Processor>, bus: Shared<dyn TrapBus>, locator: RomLocator) -> Self {
        Self {
            cpu,
            bus,
            locator,
            mode: None,
            halting: false,
            ram: 0,
            scratch: 0,
            rom_storage: [None; ROM_SLOTS],
            rom_modes: [RomMode::Empty; ROM_SLOTS],
            sideways_ram: 0,
            // nothing paged yet
            paged_rom: 0xFF,
            last_page: ROM_BASIC + 2,
            last_page_write: 0,
            keyboard_paged: false,
        }
    }

    pub fn mode(&self) -> Option<MemoryMode> {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MemoryMode) {
        if self.mode == Some(mode) {
            return;
        }
        let topology_change = match self.mode {
            None => true,
            Some(old) => old.is_shadow() != mode.is_shadow(),
        };
        log::debug!(
            "memory mode {:?} -> {mode:?}{}",
            self.mode,
            if topology_change { " (rebuild)" } else { "" }
        );

        if topology_change {
            self.rebuild(mode);
        }
        self.mode = Some(mode);
        self.assign_exec_timing(mode);
        self.set_ram_timing(self.halting);
    }

    /// Reallocate the arena and lay out every page for `mode`.
    fn rebuild(&mut self, mode: MemoryMode) {
        self.bus.borrow_mut().release_trap_address(SHADOW_REGISTER);

        let shadow = mode.is_shadow();
        {
            let mut cpu = self.cpu.borrow_mut();
            cpu.set_memory_total(ARENA_BASE + if shadow { SHADOW_SIZE } else { 0 });
            self.ram = cpu.get_storage(RAM_SIZE + if shadow { SHADOW_SIZE } else { 0 });
        }
        self.rom_storage = [None; ROM_SLOTS];
        self.rom_modes = [RomMode::Empty; ROM_SLOTS];

        if let Err(e) = self.install_rom(BASIC_ROM, ROM_BASIC) {
            log::warn!("BASIC ROM unavailable: {e}");
        }
        self.scratch = self.cpu.borrow_mut().get_storage(SCRATCH_SIZE);

        let os = if shadow { SHADOW_OS_ROM } else { OS_ROM };
        if let Err(e) = self.install_rom(os, ROM_OS) {
            log::warn!("OS ROM unavailable: {e}");
        }
        self.restore_sideways_ram();

        let ram = self.ram;
        let basic = self.rom_storage_for(remap_rom_slot(ROM_BASIC));
        let os = self.rom_storage_for(remap_rom_slot(ROM_OS));
        let scratch = self.scratch;
        let mut cpu = self.cpu.borrow_mut();

        let map_roms = |cpu: &mut dyn Processor| {
            cpu.set_read_page(0x8000, basic, 0x4000);
            cpu.set_repeated_write_page(0x8000, scratch, 0x4000);
            cpu.set_read_page(0xC000, os, 0x4000);
            cpu.set_repeated_write_page(0xC000, scratch, 0x4000);
        };

        if !shadow {
            cpu.establish_memory_layouts(1);
            cpu.set_memory_layout(0);
            cpu.set_read_page(0x0000, ram, 0x8000);
            cpu.set_write_page(0x0000, ram, 0x8000);
            map_roms(&mut *cpu);

            for context in 0..EXEC_CONTEXTS {
                cpu.set_memory_view(context, 0);
            }
            return;
        }

        cpu.establish_memory_layouts(3);

        // normal
        cpu.set_memory_layout(0);
        cpu.set_read_page(0x0000, ram, 0x8000);
        cpu.set_write_page(0x0000, ram, 0x8000);
        map_roms(&mut *cpu);

        // screen in shadow, rest normal
        cpu.set_memory_layout(1);
        cpu.set_read_page(0x0000, ram + SHADOW_SIZE, 0x3000);
        cpu.set_write_page(0x0000, ram + SHADOW_SIZE, 0x3000);
        cpu.set_read_page(0x3000, ram + 0x3000, 0x5000);
        cpu.set_write_page(0x3000, ram + 0x3000, 0x5000);
        map_roms(&mut *cpu);

        // everything in shadow
        cpu.set_memory_layout(2);
        cpu.set_read_page(0x0000, ram + SHADOW_SIZE, 0x8000);
        cpu.set_write_page(0x0000, ram + SHADOW_SIZE, 0x8000);
        map_roms(&mut *cpu);

        for context in 0..EXEC_CONTEXTS {
            cpu.set_memory_view(context, if context == SHADOW_VIEW_CONTEXT { 1 } else { 2 });
        }
    }

    fn assign_exec_timing(&mut self, mode: MemoryMode) {
        let standard = |cpu: &mut dyn Processor| {
            cpu.set_exec_cycle_page(0x0000, &ONE_MHZ_BUS, 0x8000);
            cpu.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
            cpu.set_exec_cycle_page(0xFE00, &ONE_MHZ_BUS, 0x0100);
        };

        let mut cpu = self.cpu.borrow_mut();
        match mode {
            MemoryMode::Off => {
                cpu.set_memory_layout(0);
                standard(&mut *cpu);
            }
            MemoryMode::Turbo => {
                cpu.set_memory_layout(0);
                cpu.set_exec_cycle_page(0x0000, &TWO_MHZ_BUS, 0x4000);
                cpu.set_exec_cycle_page(0x4000, &ONE_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0xFE00, &ONE_MHZ_BUS, 0x0100);
            }
            MemoryMode::FourMhz => {
                cpu.set_memory_layout(0);
                cpu.set_exec_cycle_page(0x0000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0xFE00, &TWO_MHZ_BUS, 0x0100);
            }
            MemoryMode::Shadow => {
                self.bus.borrow_mut().claim_trap_address(SHADOW_REGISTER);

                cpu.set_memory_layout(0);
                standard(&mut *cpu);

                cpu.set_memory_layout(1);
                cpu.set_exec_cycle_page(0x0000, &TWO_MHZ_BUS, 0x3000);
                cpu.set_exec_cycle_page(0x3000, &ONE_MHZ_BUS, 0x5000);
                cpu.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0xFE00, &ONE_MHZ_BUS, 0x0100);

                cpu.set_memory_layout(2);
                cpu.set_exec_cycle_page(0x0000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0x8000, &TWO_MHZ_BUS, 0x8000);
                cpu.set_exec_cycle_page(0xFE00, &ONE_MHZ_BUS, 0x0100);
            }
        }
    }

    /// Select whether RAM accesses stall for display fetches.
    pub fn set_ram_timing(&mut self, halting: bool) {
        self.halting = halting;
        let table: &'static TimingTable = if halting { &HALTING_BUS } else { &ONE_MHZ_BUS };

        let mut cpu = self.cpu.borrow_mut();
        cpu.set_memory_layout(0);
        match self.mode {
            Some(MemoryMode::Off) => cpu.set_exec_cycle_page(0x0000, table, 0x8000),
            Some(MemoryMode::Turbo) => cpu.set_exec_cycle_page(0x4000, table, 0x4000),
            Some(MemoryMode::Shadow) => cpu.set_exec_cycle_page(0x3000, table, 0x5000),
            Some(MemoryMode::FourMhz) | None => {}
        }
    }

    pub fn is_halting(&self) -> bool {
        self.halting
    }

    /// Map `length` bytes of `source` at `target` in every live layout.
    /// Read-only regions send writes to the scratch page.
    pub fn page(&mut self, target: u16, source: StorageHandle, length: u32, read_only: bool) {
        let layouts = if self.mode.is_some_and(MemoryMode::is_shadow) { 3 } else { 1 };
        let mut cpu = self.cpu.borrow_mut();
        for layout in 0..layouts {
            cpu.set_memory_layout(layout);
            cpu.set_read_page(target, source, length);
            if read_only {
                cpu.set_repeated_write_page(target, self.scratch, length);
            } else {
                cpu.set_write_page(target, source, length);
            }
        }
    }

    // ── ROM slots ─────────────────────────────────────────────

    /// Load a 16K image into logical `slot`.
    pub fn install_rom(&mut self, name: &str, slot: u8) -> Result<(), RomError> {
        let physical = physical_slot(slot).ok_or(RomError::BadSlot(slot))?;
        let path = self.locator.resolve(name)?;
        let mut image = roms::load_image(&path)?;

        if physical == remap_rom_slot(ROM_OS) as usize {
            for (offset, byte) in OS_PATCH {
                image[offset] = byte;
            }
        }

        let handle = self.allocate_slot(physical);
        self.cpu.borrow_mut().write_memory_block(handle, 0, &image);
        self.rom_modes[physical] = RomMode::Rom;
        log::info!("{} installed in slot {slot}", path.display());
        Ok(())
    }

    /// Turn logical `slot` into writable sideways RAM.
    pub fn install_sideways_ram(&mut self, slot: u8) {
        let Some(physical) = physical_slot(slot) else {
            log::warn!("no sideways slot {slot} for RAM, slots are 0-15");
            return;
        };
        self.allocate_slot(physical);
        self.rom_modes[physical] = RomMode::Ram;
        self.sideways_ram |= 1 << physical;
    }

    fn restore_sideways_ram(&mut self) {
        for physical in 0..ROM_SLOTS {
            if self.sideways_ram & (1 << physical) != 0 {
                self.allocate_slot(physical);
                self.rom_modes[physical] = RomMode::Ram;
            }
        }
    }

    fn allocate_slot(&mut self, physical: usize) -> StorageHandle {
        *self.rom_storage[physical]
            .get_or_insert_with(|| self.cpu.borrow_mut().get_storage(ROM_SIZE as u32))
    }

    /// Storage behind a physical slot; unallocated slots alias RAM.
    fn rom_storage_for(&self, physical: u8) -> StorageHandle {
        self.rom_storage[physical as usize].unwrap_or(self.ram)
    }

    pub fn rom_mode(&self, physical: u8) -> RomMode {
        self.rom_modes
            .get(physical as usize)
            .copied()
            .unwrap_or(RomMode::Empty)
    }

    pub fn rom_handle(&self, physical: u8) -> Option<StorageHandle> {
        self.rom_storage.get(physical as usize).copied().flatten()
    }

    pub fn ram_handle(&self) -> StorageHandle {
        self.ram
    }

    pub fn shadow_handle(&self) -> Option<StorageHandle> {
        self.mode
            .is_some_and(MemoryMode::is_shadow)
            .then_some(self.ram + SHADOW_SIZE)
    }

    // ── Registers ─────────────────────────────────────────────

    /// ROM select part of &FE05 (the caller has already dealt with the
    /// interrupt-clear bits).
    pub fn write_rom_select(&mut self, data: u8) {
        if data & 0xF0 != 0 {
            return;
        }
        self.last_page_write = data;

        // with BASIC or the keyboard paged, only slots 8-15 can be selected
        if self.paged_rom & 0x0C == 0x08 && data & 0x08 == 0 {
            return;
        }
        let slot = data & 0x0F;
        if self.paged_rom == slot {
            return;
        }
        self.paged_rom = slot;

        if data & 0x08 == 0 && slot & 0x0E == 0x0A {
            return;
        }

        self.last_page = slot;
        if slot & 0x0E == 0x08 {
            self.page_keyboard();
            return;
        }

        if self.keyboard_paged {
            self.bus.borrow_mut().set_trap_address_set(TRAP_SET_NORMAL);
            self.keyboard_paged = false;
        }

        let mut physical = remap_rom_slot(slot);
        let mode = self.rom_mode(physical);
        if mode == RomMode::Empty {
            self.last_page = ROM_BASIC + 2;
            physical = ROM_BASIC;
        }
        let storage = self.rom_storage_for(physical);
        self.page(0x8000, storage, 0x4000, mode != RomMode::Ram);
    }

    fn page_keyboard(&mut self) {
        if self.keyboard_paged {
            return;
        }
        self.bus.borrow_mut().set_trap_address_set(TRAP_SET_KEYBOARD);
        {
            let mut cpu = self.cpu.borrow_mut();
            cpu.set_repeated_write_page(0x8000, self.scratch, 0x4000);
        }
        self.keyboard_paged = true;
    }

    /// Master RAM Board shadow select at &FC7F.  Bit 7 clear puts every
    /// context except the shadow-view one on the all-shadow layout.
    pub fn write_shadow_select(&mut self, data: u8) {
        let layout = if data & 0x80 == 0 { 2 } else { 0 };
        let mut cpu = self.cpu.borrow_mut();
        cpu.set_memory_layout(1);
        for context in (0..EXEC_CONTEXTS).filter(|&c| c != SHADOW_VIEW_CONTEXT) {
            cpu.set_memory_view(context, layout);
        }
    }

    /// Last logical slot paged, as the OS would read it back.
    pub fn last_paged(&self) -> u8 {
        if self.keyboard_paged {
            ROM_BASIC
        } else {
            self.last_page
        }
    }

    pub fn last_page_write(&self) -> u8 {
        self.last_page_write
    }

    pub fn keyboard_paged(&self) -> bool {
        self.keyboard_paged
    }

    /// Forget the paging register, as on attach.
    pub fn reset_paging(&mut self) {
        self.paged_rom = 0xFF;
        self.keyboard_paged = false;
        self.bus.borrow_mut().set_trap_address_set(TRAP_SET_NORMAL);
    }
}
