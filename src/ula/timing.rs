//! Per-cycle bus timing tables.
//!
//! The CPU looks up how many 2 MHz cycles an access costs from a table
//! indexed by scanline and by the cycle position within the line.  Three
//! tables exist:
//!
//! - 2 MHz: ROM and the Electron's own I/O, every access costs 1 cycle.
//! - 1 MHz: RAM outside the display, the CPU waits for the odd phase.
//! - Halting: RAM while the ULA is fetching pixel data.  An access during
//!   the first 80 cycles of a displayed line stalls until the fetch ends.
//!
//! All three are built at compile time and shared process-wide.

/// Scanlines per PAL frame.
pub const LINES_PER_FRAME: usize = 312;
/// 2 MHz cycles per scanline (64 µs).
pub const CYCLES_PER_LINE: usize = 128;
/// 2 MHz cycles per frame.
pub const FRAME_CYCLES: u32 = (LINES_PER_FRAME * CYCLES_PER_LINE) as u32;
/// First scanline on which the ULA fetches display data.
pub const FIRST_DISPLAY_LINE: usize = 56;
/// Cycles per line during which the ULA owns the RAM bus.
pub const DISPLAY_FETCH_CYCLES: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSpeed {
    OneMhz,
    TwoMhz,
    Halting,
}

pub type CycleRow = [u8; CYCLES_PER_LINE];

pub struct TimingTable {
    speed: BusSpeed,
    lines: [CycleRow; LINES_PER_FRAME],
}

impl TimingTable {
    pub fn speed(&self) -> BusSpeed {
        self.speed
    }

    /// Cycles an access costs when it starts at (`line`, `cycle`).
    /// Out-of-range positions wrap into the frame.
    pub fn cost(&self, line: usize, cycle: usize) -> u8 {
        self.lines[line % LINES_PER_FRAME][cycle % CYCLES_PER_LINE]
    }

    /// Cost of an access at an absolute position within the frame.
    pub fn cost_at(&self, frame_offset: u32) -> u8 {
        let offset = (frame_offset % FRAME_CYCLES) as usize;
        self.cost(offset / CYCLES_PER_LINE, offset % CYCLES_PER_LINE)
    }
}

impl std::fmt::Debug for TimingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingTable").field("speed", &self.speed).finish()
    }
}

impl PartialEq for TimingTable {
    fn eq(&self, other: &Self) -> bool {
        self.speed == other.speed
    }
}

// ── Row builders ──────────────────────────────────────────────

const fn one_mhz_row() -> CycleRow {
    let mut row = [0u8; CYCLES_PER_LINE];
    let mut c = 0;
    while c < CYCLES_PER_LINE {
        row[c] = 2 - (c & 1) as u8;
        c += 1;
    }
    row
}

const fn two_mhz_row() -> CycleRow {
    [1u8; CYCLES_PER_LINE]
}

const fn halting_row() -> CycleRow {
    let mut row = one_mhz_row();
    let mut c = 0;
    while c < DISPLAY_FETCH_CYCLES {
        row[c] = (DISPLAY_FETCH_CYCLES - c) as u8;
        c += 1;
    }
    row
}

const fn build(speed: BusSpeed) -> TimingTable {
    let mut lines = [[0u8; CYCLES_PER_LINE]; LINES_PER_FRAME];
    let mut line = 0;
    while line < LINES_PER_FRAME {
        lines[line] = match speed {
            BusSpeed::OneMhz => one_mhz_row(),
            BusSpeed::TwoMhz => two_mhz_row(),
            BusSpeed::Halting => {
                if line >= FIRST_DISPLAY_LINE {
                    halting_row()
                } else {
                    one_mhz_row()
                }
            }
        };
        line += 1;
    }
    TimingTable { speed, lines }
}

pub static ONE_MHZ_BUS: TimingTable = build(BusSpeed::OneMhz);
pub static TWO_MHZ_BUS: TimingTable = build(BusSpeed::TwoMhz);
pub static HALTING_BUS: TimingTable = build(BusSpeed::Halting);
