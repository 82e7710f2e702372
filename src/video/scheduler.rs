//! Cycle-exact replay of display register writes.
//!
//! Mode and palette writes, and the frame timer's interrupts, are not
//! applied when they happen.  They are queued with their timestamp and
//! replayed by the once-per-frame render pass, which draws everything up
//! to an event's position with the old state before applying it.  That is
//! what makes mid-frame mode and palette changes come out on the right
//! scanline.

use crate::ula::event_queue::{Cycles, Timed, TimedEventQueue};
use crate::ula::timing::{CYCLES_PER_LINE, FRAME_CYCLES};

use super::surface::Surface;

/// Worst case is a write every 4 cycles for a whole frame (9984), rounded
/// up to a power of two.
pub const VIDEO_QUEUE_LENGTH: usize = 16384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoEventKind {
    #[default]
    Mode,
    Palette,
    Irq,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoEvent {
    pub kind: VideoEventKind,
    pub value: u8,
    /// Palette register index, 0 for the other kinds.
    pub address: u8,
    pub timestamp: Cycles,
}

impl VideoEvent {
    /// Scanline and cycle-in-line of the event within the frame starting
    /// at `frame_start`.
    pub fn position(&self, frame_start: Cycles) -> (usize, usize) {
        let offset = self.timestamp.wrapping_sub(frame_start) as usize;
        (offset / CYCLES_PER_LINE, offset % CYCLES_PER_LINE)
    }
}

impl Timed for VideoEvent {
    fn timestamp(&self) -> Cycles {
        self.timestamp
    }
}

/// Receives the render pass: spans of unchanged state, then the events
/// that change it.
pub trait SpanSink {
    /// Draw frame offsets `[start, end)` with the current state.
    fn render_span(&mut self, surface: &mut Surface, start: u32, end: u32);
    fn apply(&mut self, event: &VideoEvent);
}

pub struct VideoEventScheduler {
    queue: TimedEventQueue<VideoEvent>,
}

impl VideoEventScheduler {
    pub fn new() -> Self {
        Self {
            queue: TimedEventQueue::new(VIDEO_QUEUE_LENGTH),
        }
    }

    pub fn enqueue(&mut self, kind: VideoEventKind, value: u8, address: u8, timestamp: Cycles) {
        let event = VideoEvent {
            kind,
            value,
            address,
            timestamp,
        };
        if let Some(lost) = self.queue.enqueue(event) {
            log::warn!("video queue full, dropped {:?} from cycle {}", lost.kind, lost.timestamp);
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VideoEvent> + '_ {
        self.queue.iter()
    }

    /// Render the frame that starts at `frame_start`.
    ///
    /// Events inside `[frame_start, frame_start + FRAME_CYCLES)` are
    /// applied in order at their offsets; later ones stay queued.  Events
    /// older than the frame are applied at its first cycle.  Returns the
    /// number of events applied.
    pub fn render_frame(
        &mut self,
        frame_start: Cycles,
        sink: &mut dyn SpanSink,
        surface: &mut Surface,
    ) -> usize {
        let mut position = 0;
        let mut applied = 0;

        while let Some(event) = self.queue.peek() {
            let offset = event.timestamp.wrapping_sub(frame_start);
            let offset = if (offset as i32) < 0 { 0 } else { offset };
            if offset >= FRAME_CYCLES {
                break;
            }

            let event = *event;
            if offset > position {
                sink.render_span(surface, position, offset);
                position = offset;
            }
            sink.apply(&event);
            self.queue.advance();
            applied += 1;
        }

        if position < FRAME_CYCLES {
            sink.render_span(surface, position, FRAME_CYCLES);
        }
        applied
    }
}

impl Default for VideoEventScheduler {
    fn default() -> Self {
        Self::new()
    }
}
