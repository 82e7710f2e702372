//! The Electron's ULA: interrupt logic, ROM paging, sound, keyboard and
//! the display control registers.
//!
//! Register map (addresses decode with mask &FF0F):
//!
//! | addr  | write                          | read               |
//! |-------|--------------------------------|--------------------|
//! | &FE00 | interrupt enable mask          | interrupt status   |
//! | &FE05 | interrupt clear / ROM select   |                    |
//! | &FE06 | sound divider                  |                    |
//! | &FE07 | sound, display mode, cassette  |                    |
//! | &FE08-&FE0F | palette                  |                    |
//! | &FC7F | shadow select (Shadow only)    |                    |
//!
//! While the keyboard is paged in, reads of &8000-&BFFF return the
//! keyboard matrix instead of ROM.

pub mod audio;
pub mod event_queue;
pub mod interrupt;
pub mod keyboard;
pub mod memory;
pub mod peers;
pub mod roms;
pub mod timing;

use crate::config::Config;

use audio::{AudioEventKind, AudioSynthesizer};
use event_queue::Cycles;
use interrupt::{InterruptController, IRQ_DISPLAY, IRQ_HTONE, IRQ_RTC};
use keyboard::KeyboardMatrix;
use memory::{MemoryBankManager, MemoryMode, SHADOW_REGISTER, TRAP_SET_KEYBOARD};
use peers::{Peers, TapeMode, TrapRange};
use roms::RomLocator;
use timing::{CYCLES_PER_LINE, DISPLAY_FETCH_CYCLES, FRAME_CYCLES};

/// Real-time clock interrupt, halfway down the frame.
pub const RTC_OFFSET: Cycles = 155 * CYCLES_PER_LINE as Cycles;
/// Display-end interrupt, once the last visible line has been fetched.
pub const DISPLAY_END_OFFSET: Cycles =
    FRAME_CYCLES - CYCLES_PER_LINE as Cycles + DISPLAY_FETCH_CYCLES as Cycles;

const KEYBOARD_SPAN: TrapRange = TrapRange::span(0x8000, 0xC000);

/// Internal registers exposed for debuggers and front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlaRegister {
    InterruptStatus,
    InterruptControl,
    /// Logical ROM slot currently visible at &8000.
    LastPaged,
    /// Last value written to the paging register.
    PageRegister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    InterruptControl,
    RomPage,
    Divider,
    Control,
    Palette,
    ShadowSelect,
    Keyboard,
}

/// Register decode table, first match wins.
const REGISTERS: [(TrapRange, Register); 7] = [
    (TrapRange::masked(0xFE00, 0xFF0F), Register::InterruptControl),
    (TrapRange::masked(0xFE05, 0xFF0F), Register::RomPage),
    (TrapRange::masked(0xFE06, 0xFF0F), Register::Divider),
    (TrapRange::masked(0xFE07, 0xFF0F), Register::Control),
    (TrapRange::masked(0xFE08, 0xFF08), Register::Palette),
    (SHADOW_REGISTER, Register::ShadowSelect),
    (KEYBOARD_SPAN, Register::Keyboard),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameEvent {
    Rtc,
    DisplayEnd,
    FrameEnd,
}

impl FrameEvent {
    fn offset(self) -> Cycles {
        match self {
            FrameEvent::Rtc => RTC_OFFSET,
            FrameEvent::DisplayEnd => DISPLAY_END_OFFSET,
            FrameEvent::FrameEnd => FRAME_CYCLES,
        }
    }
}

pub struct Ula {
    peers: Peers,
    memory: MemoryBankManager,
    irq: InterruptController,
    audio: AudioSynthesizer,
    keyboard: KeyboardMatrix,

    /// Bound at attach; empty until then.
    registers: Vec<(TrapRange, Register)>,

    clock_divider: u8,
    control: u8,
    caps_led: bool,

    total_time: Cycles,
    frame_start: Cycles,
    next_frame_event: FrameEvent,
    paused: bool,
}

impl Ula {
    pub fn new(peers: Peers, locator: RomLocator) -> Self {
        let memory = MemoryBankManager::new(peers.cpu.clone(), peers.bus.clone(), locator);
        let irq = InterruptController::new(peers.cpu.clone());
        Self {
            peers,
            memory,
            irq,
            audio: AudioSynthesizer::new(),
            keyboard: KeyboardMatrix::new(),
            registers: Vec::new(),
            clock_divider: 0,
            control: 0,
            caps_led: false,
            total_time: 0,
            frame_start: 0,
            next_frame_event: FrameEvent::Rtc,
            paused: false,
        }
    }

    /// Claim the register addresses and restart every clock at zero.
    pub fn attach(&mut self) {
        {
            let mut bus = self.peers.bus.borrow_mut();
            for (range, register) in REGISTERS {
                match register {
                    // claimed by the memory manager while in Shadow mode
                    Register::ShadowSelect => {}
                    Register::Keyboard => bus.claim_trap_address_in_set(TRAP_SET_KEYBOARD, range),
                    _ => bus.claim_trap_address(range),
                }
            }
        }
        self.registers = REGISTERS.to_vec();
        self.memory.reset_paging();

        self.audio.rebase();
        self.total_time = 0;
        self.frame_start = 0;
        self.next_frame_event = FrameEvent::Rtc;
        log::debug!("ULA attached, {} registers", self.registers.len());
    }

    /// Take what applies of `config`.  ROM failures are logged and skipped.
    pub fn apply_config(&mut self, config: &Config) {
        self.audio.set_volume(config.volume);

        for &slot in &config.sideways_ram {
            self.memory.install_sideways_ram(slot);
        }
        self.memory.set_mode(config.memory_mode);
        for rom in &config.roms {
            if let Err(e) = self.memory.install_rom(&rom.path, rom.slot) {
                log::warn!("slot {}: {e}", rom.slot);
            }
        }
    }

    /// Cold start: the power-on interrupt is raised, all sources masked.
    pub fn power_on(&mut self) {
        self.irq.power_on();
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.audio.pause();
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.audio.resume();
            self.paused = false;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // ── Bus side ──────────────────────────────────────────────

    fn decode(&self, addr: u16) -> Option<Register> {
        self.registers
            .iter()
            .find(|(range, _)| range.contains(addr))
            .map(|&(_, register)| register)
    }

    pub fn write(&mut self, addr: u16, timestamp: Cycles, data: u8) {
        let Some(register) = self.decode(addr) else {
            log::trace!("unhandled write of {data:02x} to {addr:04x}");
            return;
        };

        match register {
            Register::InterruptControl => self.irq.set_mask(timestamp, data),
            Register::RomPage => self.write_paging(timestamp, data),
            Register::Divider => {
                if data != self.clock_divider {
                    self.clock_divider = data;
                    self.audio.push(AudioEventKind::SetDivider, data, timestamp);
                }
            }
            Register::Control => self.write_control(timestamp, data),
            Register::Palette => {
                self.peers
                    .display
                    .borrow_mut()
                    .set_palette(timestamp, (addr & 0x07) as u8, data);
            }
            Register::ShadowSelect => {
                if self.memory.mode() == Some(MemoryMode::Shadow) {
                    self.memory.write_shadow_select(data);
                }
            }
            // writes under the keyboard land in the scratch page
            Register::Keyboard => {}
        }
    }

    fn write_paging(&mut self, timestamp: Cycles, data: u8) {
        if data & 0x70 != 0 {
            let mut clear = 0;
            if data & 0x10 != 0 {
                clear |= IRQ_DISPLAY;
            }
            if data & 0x20 != 0 {
                clear |= IRQ_RTC;
            }
            if data & 0x40 != 0 {
                clear |= IRQ_HTONE;
            }
            self.irq.clear(timestamp, clear);
        }
        self.memory.write_rom_select(data);
    }

    /// &FE07: `[-, cassette motor, mode:3, sound/cassette:2, -]`, bit 7
    /// drives the caps lock LED.
    fn write_control(&mut self, timestamp: Cycles, data: u8) {
        self.caps_led = data & 0x80 != 0;

        let diff = self.control ^ data;
        self.control = data;

        if diff & 0x38 != 0 {
            let mode = match (data >> 3) & 7 {
                7 => 4,
                m => m,
            };
            self.peers.display.borrow_mut().set_mode(timestamp, mode);
            // modes 0-3 take the RAM bus for the whole fetch
            self.memory.set_ram_timing(mode < 4);
        }

        if diff & 0x06 != 0 {
            let kind = if data & 0x06 == 0x02 {
                AudioEventKind::Start
            } else {
                AudioEventKind::Stop
            };
            self.audio.push(kind, 0, timestamp);
        }

        let tape_mode = match data & 0x06 {
            0x00 => TapeMode::Input,
            0x04 => TapeMode::Output,
            _ => TapeMode::Off,
        };
        self.peers
            .tape
            .borrow_mut()
            .set_mode(timestamp, tape_mode, data & 0x40 != 0);
    }

    pub fn read(&mut self, addr: u16, _timestamp: Cycles) -> u8 {
        match self.decode(addr) {
            Some(Register::Keyboard) if self.memory.keyboard_paged() => self.keyboard.read(addr),
            Some(Register::InterruptControl) => self.irq.read_status(self.control & 0x06 != 0x04),
            _ => {
                log::trace!("unhandled read from {addr:04x}");
                0
            }
        }
    }

    // ── Time ──────────────────────────────────────────────────

    /// Advance the ULA's clock by `cycles`.  Fires the frame-timer
    /// interrupts that fall due and keeps the audio side awake.
    ///
    /// Returns the start time of the frame that completed during this
    /// call, if one did.  At most one frame is reported per call; when the
    /// clock has run past several frame ends the rest stay due and are
    /// reported by the following calls, oldest first.
    pub fn update(&mut self, cycles: Cycles) -> Option<Cycles> {
        self.total_time = self.total_time.wrapping_add(cycles);
        let now = self.total_time;
        let mut completed = None;

        while completed.is_none() {
            let at = self.frame_start.wrapping_add(self.next_frame_event.offset());
            if (now.wrapping_sub(at) as i32) < 0 {
                break;
            }
            self.next_frame_event = match self.next_frame_event {
                FrameEvent::Rtc => {
                    self.raise_frame_interrupt(at, IRQ_RTC);
                    FrameEvent::DisplayEnd
                }
                FrameEvent::DisplayEnd => {
                    self.raise_frame_interrupt(at, IRQ_DISPLAY);
                    FrameEvent::FrameEnd
                }
                FrameEvent::FrameEnd => {
                    completed = Some(self.frame_start);
                    self.frame_start = at;
                    FrameEvent::Rtc
                }
            };
        }

        self.audio.watchdog(now);
        completed
    }

    fn raise_frame_interrupt(&mut self, timestamp: Cycles, bits: u8) {
        self.irq.raise(timestamp, bits);
        self.peers.display.borrow_mut().mark_interrupt(timestamp, bits);
    }

    pub fn total_time(&self) -> Cycles {
        self.total_time
    }

    pub fn frame_start(&self) -> Cycles {
        self.frame_start
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn query(&self, register: UlaRegister) -> u8 {
        match register {
            UlaRegister::InterruptStatus => self.irq.status(),
            UlaRegister::InterruptControl => self.irq.mask(),
            UlaRegister::LastPaged => self.memory.last_paged(),
            UlaRegister::PageRegister => self.memory.last_page_write(),
        }
    }

    /// Last value written to a write-only register.
    pub fn last_written(&self, addr: u16) -> u8 {
        match addr {
            0xFE06 => self.clock_divider,
            0xFE07 => self.control,
            _ => 0,
        }
    }

    pub fn caps_led(&self) -> bool {
        self.caps_led
    }

    pub fn irq_asserted(&self) -> bool {
        self.irq.master()
    }

    pub fn set_key(&mut self, column: u8, row: u8, down: bool) {
        self.keyboard.set_key(column, row, down);
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardMatrix {
        &mut self.keyboard
    }

    pub fn memory(&self) -> &MemoryBankManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryBankManager {
        &mut self.memory
    }

    pub fn audio(&self) -> &AudioSynthesizer {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioSynthesizer {
        &mut self.audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ula::interrupt::{IRQ_MASTER, IRQ_POWER, IRQ_TX_EMPTY};
    use crate::ula::peers::mock::{Call, Rig};
    use crate::ula::roms::tests::{scratch_dir, write_rom};
    use crate::ula::timing::BusSpeed;

    fn ula(rig: &Rig, tag: &str) -> Ula {
        let dir = scratch_dir(tag);
        write_rom(&dir, "basic.rom", 0xBA);
        write_rom(&dir, "os.rom", 0x05);
        write_rom(&dir, "os300.rom", 0x03);
        let mut ula = Ula::new(rig.peers(), RomLocator::with_dirs(vec![dir]));
        ula.apply_config(&Config::default());
        ula.attach();
        ula.power_on();
        ula
    }

    #[test]
    fn attach_claims_registers() {
        let rig = Rig::new();
        let _ula = ula(&rig, "ula-attach");
        let bus = rig.bus.borrow();
        assert!(bus.claimed.contains(&(None, TrapRange::masked(0xFE05, 0xFF0F))));
        assert!(bus.claimed.contains(&(None, TrapRange::masked(0xFE08, 0xFF08))));
        assert!(bus.claimed.contains(&(Some(TRAP_SET_KEYBOARD), KEYBOARD_SPAN)));
        assert!(!bus.claimed.iter().any(|(_, r)| *r == SHADOW_REGISTER));
        assert_eq!(bus.set, 0);
    }

    #[test]
    fn status_register_and_power_flag() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-status");
        assert_eq!(ula.read(0xFE00, 0), 0x82);
        assert_eq!(ula.read(0xFE00, 0), 0x80);
        assert_eq!(ula.query(UlaRegister::InterruptStatus) & IRQ_POWER, 0);

        // mirror address, reserved bits dropped
        ula.write(0xFE30, 100, 0xFF);
        assert_eq!(ula.query(UlaRegister::InterruptControl), 0x7C);
        assert_eq!(rig.cpu.borrow().irqs().last(), Some(&(false, 100)));
    }

    #[test]
    fn frame_timer_raises_rtc_then_display_end() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-frame");
        ula.write(0xFE00, 0, IRQ_RTC | IRQ_DISPLAY);

        assert_eq!(ula.update(RTC_OFFSET - 1), None);
        assert!(!ula.irq_asserted());

        assert_eq!(ula.update(1), None);
        assert!(ula.irq_asserted());
        assert_eq!(rig.cpu.borrow().irqs().last(), Some(&(true, RTC_OFFSET)));

        // clearing RTC through &FE05 drops the line
        ula.write(0xFE05, RTC_OFFSET + 10, 0x20);
        assert!(!ula.irq_asserted());
        assert_eq!(rig.cpu.borrow().irqs().last(), Some(&(false, RTC_OFFSET + 10)));

        assert_eq!(ula.update(FRAME_CYCLES - RTC_OFFSET), Some(0));
        assert_eq!(ula.query(UlaRegister::InterruptStatus) & IRQ_DISPLAY, IRQ_DISPLAY);
        assert_eq!(ula.frame_start(), FRAME_CYCLES);

        let marks = rig.display.borrow().interrupts.clone();
        assert_eq!(marks, vec![(RTC_OFFSET, IRQ_RTC), (DISPLAY_END_OFFSET, IRQ_DISPLAY)]);
        assert_eq!(DISPLAY_END_OFFSET, 39_888);
    }

    #[test]
    fn long_update_reports_each_frame_in_turn() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-frames");

        assert_eq!(ula.update(3 * FRAME_CYCLES + 10), Some(0));
        assert_eq!(ula.update(0), Some(FRAME_CYCLES));
        assert_eq!(ula.update(0), Some(2 * FRAME_CYCLES));
        assert_eq!(ula.update(0), None);
        assert_eq!(ula.frame_start(), 3 * FRAME_CYCLES);

        let rtcs = rig
            .display
            .borrow()
            .interrupts
            .iter()
            .filter(|(_, bits)| *bits == IRQ_RTC)
            .count();
        assert_eq!(rtcs, 3);
    }

    #[test]
    fn rtc_shows_in_transmit_empty_unless_cassette_outputs() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-mirror");
        ula.update(RTC_OFFSET);
        assert_eq!(ula.read(0xFE00, 0) & IRQ_TX_EMPTY, IRQ_TX_EMPTY);
        ula.write(0xFE07, 0, 0x04);
        assert_eq!(ula.read(0xFE00, 0) & IRQ_TX_EMPTY, 0);
        assert_eq!(ula.read(0xFE00, 0) & IRQ_MASTER, 0);
    }

    #[test]
    fn control_register_side_effects() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-control");
        ula.audio_mut().enable(31_250);

        // mode 7 aliases mode 4, sound on, motor on, caps LED
        ula.write(0xFE07, 50, 0x80 | 0x40 | (7 << 3) | 0x02);
        assert_eq!(rig.display.borrow().modes, vec![(50, 4)]);
        assert_eq!(rig.tape.borrow().modes, vec![(50, TapeMode::Off, true)]);
        assert!(ula.caps_led());
        assert_eq!(ula.audio().pending(), 1);
        // mode 4: RAM back on plain 1 MHz timing
        assert_eq!(
            rig.cpu.borrow().calls.last(),
            Some(&Call::Exec(0x0000, BusSpeed::OneMhz, 0x8000))
        );

        // same mode and sound bits: no display or sound event, tape still told
        ula.write(0xFE07, 60, (7 << 3) | 0x02);
        assert_eq!(rig.display.borrow().modes.len(), 1);
        assert_eq!(ula.audio().pending(), 1);
        assert_eq!(rig.tape.borrow().modes.last(), Some(&(60, TapeMode::Off, false)));

        // cassette output stops the sound
        ula.write(0xFE07, 70, 0x04);
        assert_eq!(ula.audio().pending(), 2);
        assert_eq!(rig.display.borrow().modes.last(), Some(&(70, 0)));
        assert_eq!(rig.tape.borrow().modes.last(), Some(&(70, TapeMode::Output, false)));
        assert_eq!(
            rig.cpu.borrow().calls.last(),
            Some(&Call::Exec(0x0000, BusSpeed::Halting, 0x8000))
        );

        ula.write(0xFE07, 80, 0x00);
        assert_eq!(rig.tape.borrow().modes.last(), Some(&(80, TapeMode::Input, false)));
        assert_eq!(ula.last_written(0xFE07), 0x00);
    }

    #[test]
    fn divider_only_queues_changes() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-divider");
        ula.audio_mut().enable(31_250);
        ula.write(0xFE06, 10, 0x7A);
        ula.write(0xFE06, 20, 0x7A);
        ula.write(0xFE16, 30, 0x40);
        assert_eq!(ula.audio().pending(), 2);
        assert_eq!(ula.last_written(0xFE06), 0x40);
    }

    #[test]
    fn keyboard_reads_through_paging() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-keys");
        ula.set_key(0, 3, true);

        // not paged: nothing answers
        assert_eq!(ula.read(0xBFFE, 0), 0);

        ula.write(0xFE05, 0, 0x08);
        assert_eq!(rig.bus.borrow().set, TRAP_SET_KEYBOARD);
        assert_eq!(ula.read(0xBFFE, 0), 0xF8);
        assert_eq!(ula.read(0xBFFF, 0), 0xF0);
        assert_eq!(ula.query(UlaRegister::LastPaged), 8);
        assert_eq!(ula.query(UlaRegister::PageRegister), 0x08);

        ula.write(0xFE05, 0, 0x0C);
        assert_eq!(rig.bus.borrow().set, 0);
        assert_eq!(ula.query(UlaRegister::LastPaged), 10);
    }

    #[test]
    fn palette_writes_reach_display() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-palette");
        ula.write(0xFE08, 5, 0x12);
        ula.write(0xFE0F, 6, 0x34);
        assert_eq!(rig.display.borrow().palette, vec![(5, 0, 0x12), (6, 7, 0x34)]);
    }

    #[test]
    fn shadow_mode_config_and_register() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-shadow");
        // ignored outside Shadow mode
        ula.write(0xFC7F, 0, 0x00);
        assert_eq!(rig.cpu.borrow().count(|c| matches!(c, Call::View(0, 2))), 0);

        let config = Config {
            memory_mode: MemoryMode::Shadow,
            volume: 100,
            ..Config::default()
        };
        ula.apply_config(&config);
        assert_eq!(ula.audio().volume(), 100);
        assert!(rig.bus.borrow().claimed.iter().any(|(_, r)| *r == SHADOW_REGISTER));

        rig.cpu.borrow_mut().calls.clear();
        ula.write(0xFC7F, 0, 0x80);
        assert_eq!(rig.cpu.borrow().count(|c| matches!(c, Call::View(_, 0))), 7);
    }

    #[test]
    fn pause_silences_sound() {
        let rig = Rig::new();
        let mut ula = ula(&rig, "ula-pause");
        ula.audio_mut().enable(31_250);
        let source = ula.audio().source();
        ula.write(0xFE06, 0, 1);
        ula.write(0xFE07, 0, 0x02);

        let mut out = [0u8; 8];
        source.fill(&mut out);
        assert_eq!(out[7], 160);

        ula.pause();
        assert!(ula.is_paused());
        source.fill(&mut out);
        assert!(out.iter().all(|&s| s == 96));

        ula.resume();
        source.fill(&mut out);
        assert!(out.iter().all(|&s| s == 160));
    }
}
