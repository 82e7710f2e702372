//! ULA interrupt status and control.
//!
//! The status register at &FE00 reports the pending sources; the control
//! register at the same address (write) enables them.  The master bit is
//! pure combinatorial logic: it is set exactly when a pending source is
//! also enabled, and it drives the CPU's IRQ line directly.

use super::event_queue::Cycles;
use super::peers::{Processor, Shared};

pub const IRQ_MASTER: u8 = 1 << 0;
pub const IRQ_POWER: u8 = 1 << 1;
pub const IRQ_DISPLAY: u8 = 1 << 2;
pub const IRQ_RTC: u8 = 1 << 3;
pub const IRQ_RX_FULL: u8 = 1 << 4;
pub const IRQ_TX_EMPTY: u8 = 1 << 5;
pub const IRQ_HTONE: u8 = 1 << 6;
/// Unused status bit that reads back as set after power-on.
const STATUS_ALWAYS: u8 = 1 << 7;

/// Mask bits that cannot be enabled from software.
const MASK_RESERVED: u8 = IRQ_MASTER | IRQ_POWER | STATUS_ALWAYS;

pub struct InterruptController {
    status: u8,
    mask: u8,
    cpu: Shared<dyn Processor>,
}

impl InterruptController {
    pub fn new(cpu: Shared<dyn Processor>) -> Self {
        Self {
            status: 0,
            mask: 0,
            cpu,
        }
    }

    /// Cold start: power-on flag raised, every source disabled.
    pub fn power_on(&mut self) {
        self.status = IRQ_POWER | STATUS_ALWAYS;
        self.mask = 0;
    }

    /// `status = (status & and_mask) | or_mask`, then recompute the master
    /// bit and report the resulting line level to the CPU.
    pub fn adjust(&mut self, timestamp: Cycles, and_mask: u8, or_mask: u8) {
        self.status = (self.status & and_mask) | or_mask;

        let asserted = self.status & self.mask != 0;
        if asserted {
            self.status |= IRQ_MASTER;
        } else {
            self.status &= !IRQ_MASTER;
        }
        log::trace!(
            "irq {} at {timestamp}, status {:02x}",
            if asserted { "high" } else { "low" },
            self.status
        );
        self.cpu.borrow_mut().set_irq_line(asserted, timestamp);
    }

    /// Raise the sources in `bits`.
    pub fn raise(&mut self, timestamp: Cycles, bits: u8) {
        self.adjust(timestamp, 0xFF, bits);
    }

    /// Clear the sources in `bits`.
    pub fn clear(&mut self, timestamp: Cycles, bits: u8) {
        self.adjust(timestamp, !bits, 0);
    }

    /// Write to the interrupt control register.
    pub fn set_mask(&mut self, timestamp: Cycles, data: u8) {
        let data = data & !MASK_RESERVED;
        if self.mask != data {
            self.mask = data;
            self.adjust(timestamp, 0xFF, 0);
        }
    }

    /// Read the status register.  Power-on is reported once only.
    ///
    /// While the cassette interface is not transmitting, the RTC bit also
    /// shows up in the transmit-empty position.
    pub fn read_status(&mut self, mirror_rtc: bool) -> u8 {
        let mut value = self.status;
        if mirror_rtc {
            value |= (value & IRQ_RTC) << 2;
        }
        self.status &= !IRQ_POWER;
        value
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// Would any of `bits` reach the CPU if raised?
    pub fn is_meaningful(&self, bits: u8) -> bool {
        self.mask & bits != 0
    }

    pub fn master(&self) -> bool {
        self.status & IRQ_MASTER != 0
    }
}
