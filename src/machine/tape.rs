//! Cassette stand-in: there is no tape deck, only its motor and direction
//! are tracked so the control register's effect is visible.

use crate::ula::event_queue::Cycles;
use crate::ula::peers::{TapeMode, TapePort};

pub struct LoggingTape {
    mode: TapeMode,
    motor: bool,
}

impl LoggingTape {
    pub fn new() -> Self {
        Self {
            mode: TapeMode::Off,
            motor: false,
        }
    }

    pub fn mode(&self) -> TapeMode {
        self.mode
    }

    pub fn motor(&self) -> bool {
        self.motor
    }
}

impl Default for LoggingTape {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePort for LoggingTape {
    fn set_mode(&mut self, timestamp: Cycles, mode: TapeMode, motor: bool) {
        if mode != self.mode || motor != self.motor {
            log::debug!("tape {mode:?}, motor {} at {timestamp}", if motor { "on" } else { "off" });
        }
        self.mode = mode;
        self.motor = motor;
    }
}
