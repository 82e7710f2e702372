//! Electron keyboard matrix.
//!
//! Fourteen columns of four keys each, wired to address lines A0-A13 of
//! the &8000-&BFFF region while the keyboard is paged in.  A read with an
//! address line low selects that column; all selected columns are OR'd
//! onto data bits 0-3, and the top nibble always reads as set.

pub const COLUMNS: usize = 14;
pub const ROWS: u8 = 4;

/// Key names by (column, row), as printed on the keycaps.
const LAYOUT: [[&str; ROWS as usize]; COLUMNS] = [
    ["RIGHT", "COPY", "", "SPACE"],
    ["LEFT", "DOWN", "RETURN", "DELETE"],
    ["-", "UP", ":", ""],
    ["0", "P", ";", "/"],
    ["9", "O", "L", "."],
    ["8", "I", "K", ","],
    ["7", "U", "J", "M"],
    ["6", "Y", "H", "N"],
    ["5", "T", "G", "B"],
    ["4", "R", "F", "V"],
    ["3", "E", "D", "C"],
    ["2", "W", "S", "X"],
    ["1", "Q", "A", "Z"],
    ["ESCAPE", "CAPSLOCK", "CTRL", "SHIFT"],
];

/// Matrix position of a key by its keycap name (case-insensitive).
pub fn key_position(name: &str) -> Option<(u8, u8)> {
    LAYOUT.iter().enumerate().find_map(|(col, keys)| {
        keys.iter()
            .position(|k| !k.is_empty() && k.eq_ignore_ascii_case(name))
            .map(|row| (col as u8, row as u8))
    })
}

#[derive(Debug, Clone, Default)]
pub struct KeyboardMatrix {
    /// Pressed keys per column, bit n = row n.
    columns: [u8; COLUMNS],
}

impl KeyboardMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&mut self, column: u8, row: u8, down: bool) {
        let (col, row) = (column as usize, row);
        if col >= COLUMNS || row >= ROWS {
            log::debug!("ignoring key at column {column} row {row}");
            return;
        }
        if down {
            self.columns[col] |= 1 << row;
        } else {
            self.columns[col] &= !(1 << row);
        }
    }

    pub fn is_down(&self, column: u8, row: u8) -> bool {
        row < ROWS
            && self
                .columns
                .get(column as usize)
                .is_some_and(|c| c & (1 << row) != 0)
    }

    pub fn release_all(&mut self) {
        self.columns = [0; COLUMNS];
    }

    /// Value seen by a CPU read of `addr` within &8000-&BFFF.
    pub fn read(&self, addr: u16) -> u8 {
        self.columns
            .iter()
            .enumerate()
            .filter(|(col, _)| addr & (1 << col) == 0)
            .fold(0xF0, |acc, (_, keys)| acc | keys)
    }
}
