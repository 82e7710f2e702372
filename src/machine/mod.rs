// The emulated Electron: a 6502 on a paged bus with the ULA behind its
// trapped addresses.
//
//   Each step costs the next instruction from the timing table of the page
//   it executes from, runs it, delivers a pending IRQ, then advances the
//   ULA by the cycles spent.  When the ULA reports a finished frame the
//   display renders it.

pub mod paged;
pub mod runner;
pub mod tape;
pub mod traps;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mos6502::cpu::CPU;
use mos6502::instruction::Nmos6502;
use mos6502::memory::Bus;
use mos6502::registers::{StackPointer, Status};

use crate::config::Config;
use crate::ula::event_queue::Cycles;
use crate::ula::keyboard::key_position;
use crate::ula::peers::Peers;
use crate::ula::roms::RomLocator;
use crate::ula::Ula;
use crate::video::surface::FrameHandle;
use crate::video::Display;

use paged::{context_of, PagedMemory};
use tape::LoggingTape;
use traps::TrapTable;

const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;
/// Cycles the 6502 spends entering an interrupt.
const IRQ_CYCLES: u32 = 7;

// ─────────────────────────────────────────────────────────────────────────────
//  Bus
// ─────────────────────────────────────────────────────────────────────────────

/// What the CPU sees: paged memory, with trapped addresses routed to the
/// ULA.
pub struct ElectronBus {
    memory: Rc<RefCell<PagedMemory>>,
    traps: Rc<RefCell<TrapTable>>,
    ula: Ula,
    /// Timestamp given to ULA accesses of the current instruction.
    clock: Cycles,
    /// Execution context of the current instruction.
    context: usize,
}

impl ElectronBus {
    fn trapped(&self, address: u16) -> bool {
        self.traps.borrow().is_trapped(address)
    }
}

impl Bus for ElectronBus {
    fn get_byte(&mut self, address: u16) -> u8 {
        if self.trapped(address) {
            return self.ula.read(address, self.clock);
        }
        self.memory.borrow().read(address, self.context)
    }

    fn set_byte(&mut self, address: u16, value: u8) {
        if self.trapped(address) {
            // the ULA may re-page memory, so no borrow is held here
            self.ula.write(address, self.clock, value);
            return;
        }
        self.memory.borrow_mut().write(address, self.context, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Machine
// ─────────────────────────────────────────────────────────────────────────────

pub struct Machine {
    cpu: CPU<ElectronBus, Nmos6502>,
    memory: Rc<RefCell<PagedMemory>>,
    display: Rc<RefCell<Display>>,
    tape: Rc<RefCell<LoggingTape>>,
    frames: u64,
}

impl Machine {
    /// Wire the peers, map the ROMs `config` asks for and reset the CPU.
    pub fn new(config: &Config) -> Self {
        let memory = Rc::new(RefCell::new(PagedMemory::new()));
        let traps = Rc::new(RefCell::new(TrapTable::new()));
        let display = Rc::new(RefCell::new(Display::new(config.output_mode)));
        let tape = Rc::new(RefCell::new(LoggingTape::new()));

        let peers = Peers {
            cpu: memory.clone(),
            bus: traps.clone(),
            display: display.clone(),
            tape: tape.clone(),
        };
        let locator = RomLocator::new(config.rom_dir.as_deref().map(Path::new));

        let mut ula = Ula::new(peers, locator);
        ula.apply_config(config);
        ula.attach();
        ula.power_on();

        let bus = ElectronBus {
            memory: memory.clone(),
            traps,
            ula,
            clock: 0,
            context: 0,
        };

        let mut machine = Self {
            cpu: CPU::new(bus, Nmos6502),
            memory,
            display,
            tape,
            frames: 0,
        };
        machine.reset();
        log::info!(
            "Electron up, memory {:?}, reset to {:04x}",
            config.memory_mode,
            machine.pc()
        );
        machine
    }

    fn read_vector(&mut self, vector: u16) -> u16 {
        self.cpu.memory.context = context_of(vector);
        let lo = self.cpu.memory.get_byte(vector) as u16;
        let hi = self.cpu.memory.get_byte(vector.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Jump through the reset vector with interrupts disabled.
    pub fn reset(&mut self) {
        let pc = self.read_vector(RESET_VECTOR);
        self.cpu.registers.program_counter = pc;
        self.cpu.registers.stack_pointer = StackPointer(0xFD);
        self.cpu
            .registers
            .status
            .insert(Status::PS_DISABLE_INTERRUPTS);
    }

    /// Execute one instruction, and an interrupt entry if the IRQ line is
    /// up afterwards.  Returns the frame number if a frame completed.
    pub fn step(&mut self) -> Option<u64> {
        let pc = self.cpu.registers.program_counter;
        let context = context_of(pc);
        let ula = &self.cpu.memory.ula;
        let now = ula.total_time();
        let frame_offset = now.wrapping_sub(ula.frame_start());

        let mut cycles = {
            let memory = self.memory.borrow();
            let opcode = memory.read(pc, context);
            memory.instruction_cost(pc, OPCODE_CYCLES[opcode as usize] as u32, frame_offset)
        };

        self.cpu.memory.context = context;
        self.cpu.memory.clock = now.wrapping_add(cycles);
        self.cpu.single_step();

        let irq = self.memory.borrow().irq_line();
        if irq && self.deliver_irq() {
            let pc = self.cpu.registers.program_counter;
            cycles += self.memory.borrow().instruction_cost(
                pc,
                IRQ_CYCLES,
                frame_offset.wrapping_add(cycles),
            );
        }

        self.advance(cycles)
    }

    fn advance(&mut self, cycles: u32) -> Option<u64> {
        let frame_start = self.cpu.memory.ula.update(cycles)?;
        self.frames = self.display.borrow_mut().end_frame(frame_start);
        Some(self.frames)
    }

    /// Push PC and status and take the IRQ vector, unless interrupts are
    /// disabled.
    fn deliver_irq(&mut self) -> bool {
        if self
            .cpu
            .registers
            .status
            .contains(Status::PS_DISABLE_INTERRUPTS)
        {
            return false;
        }

        let pc = self.cpu.registers.program_counter;
        // B flag clear, unused bit set
        let status = (self.cpu.registers.status.bits() | 0x20) & !0x10;
        let mut sp = self.cpu.registers.stack_pointer.0;
        self.cpu.memory.context = context_of(pc);
        for byte in [(pc >> 8) as u8, pc as u8, status] {
            self.cpu.memory.set_byte(0x0100 | sp as u16, byte);
            sp = sp.wrapping_sub(1);
        }
        self.cpu.registers.stack_pointer = StackPointer(sp);
        self.cpu
            .registers
            .status
            .insert(Status::PS_DISABLE_INTERRUPTS);

        let handler = self.read_vector(IRQ_VECTOR);
        self.cpu.registers.program_counter = handler;
        true
    }

    /// Run until the current frame completes.  Returns its number.
    pub fn run_frame(&mut self) -> u64 {
        loop {
            if let Some(frame) = self.step() {
                return frame;
            }
        }
    }

    pub fn pc(&self) -> u16 {
        self.cpu.registers.program_counter
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Presenter's view of the display.
    pub fn frame_handle(&self) -> FrameHandle {
        self.display.borrow().handle()
    }

    /// Byte at `address` as code in the lowest context sees it, bypassing
    /// the ULA.
    pub fn peek(&self, address: u16) -> u8 {
        self.memory.borrow().read(address, 0)
    }

    /// Press or release a key by its keycap name.  Returns false for
    /// unknown names.
    pub fn set_key(&mut self, name: &str, down: bool) -> bool {
        match key_position(name) {
            Some((column, row)) => {
                self.cpu.memory.ula.set_key(column, row, down);
                true
            }
            None => false,
        }
    }

    pub fn ula(&self) -> &Ula {
        &self.cpu.memory.ula
    }

    pub fn ula_mut(&mut self) -> &mut Ula {
        &mut self.cpu.memory.ula
    }

    pub fn display(&self) -> std::cell::Ref<'_, Display> {
        self.display.borrow()
    }

    pub fn tape(&self) -> std::cell::Ref<'_, LoggingTape> {
        self.tape.borrow()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Approximate 6502 cycle counts per opcode
// ─────────────────────────────────────────────────────────────────────────────

static OPCODE_CYCLES: [u8; 256] = [
    //0  1  2  3  4  5  6  7  8  9  A  B  C  D  E  F
    7, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6, // 0x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 1x
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6, // 2x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 3x
    6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6, // 4x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 5x
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6, // 6x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 7x
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // 8x
    2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5, // 9x
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // Ax
    2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4, // Bx
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // Cx
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // Dx
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // Ex
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // Fx
];
