//! Display peer: queues the ULA's display writes and turns them into
//! frames.
//!
//! Pixel generation from screen memory is not modelled.  Each visible
//! cycle is drawn as a flat 8-pixel span in the colour the palette gives
//! logical colour 0, which is enough to see where every mode, palette and
//! interrupt event landed.

pub mod scheduler;
pub mod surface;

use crate::ula::event_queue::Cycles;
use crate::ula::peers::DisplayPort;
use crate::ula::timing::{CYCLES_PER_LINE, DISPLAY_FETCH_CYCLES, FIRST_DISPLAY_LINE};

use scheduler::{SpanSink, VideoEvent, VideoEventKind, VideoEventScheduler};
use surface::{FrameBuffers, FrameHandle, OutputMode, Surface, SURFACE_HEIGHT};

/// Pixels drawn per display cycle.
const PIXELS_PER_CYCLE: usize = 8;
const MARKER_COLOUR: u32 = 0xFFFFFF;

/// Per-mode tint for the multiplexed output, modes 0-6.
const MODE_TINT: [u32; 7] = [
    0x000000, 0x200000, 0x002000, 0x000020, 0x202000, 0x002020, 0x200020,
];

/// 3-bit physical colour (bit 0 red, 1 green, 2 blue) to 0RGB.
fn physical_rgb(colour: u8) -> u32 {
    let channel = |bit: u8, shift: u32| if colour & bit != 0 { 0xFFu32 << shift } else { 0 };
    channel(1, 16) | channel(2, 8) | channel(4, 0)
}

/// Display state as the render pass walks the frame.
struct FlatRenderer {
    output_mode: OutputMode,
    mode: u8,
    /// Raw &FE08-&FE0F values.
    palette: [u8; 8],
    /// Frame offsets of interrupts seen this frame.
    markers: Vec<u32>,
    frame_start: Cycles,
}

impl FlatRenderer {
    fn colour(&self) -> u32 {
        // palette bits are active low
        let base = physical_rgb(!self.palette[0] & 0x07);
        match self.output_mode {
            OutputMode::Multiplexed => base ^ MODE_TINT[self.mode as usize % MODE_TINT.len()],
            OutputMode::Plain | OutputMode::Overlay => base,
        }
    }
}

/// Surface coordinates of a frame offset, if it is in the visible area.
fn visible_position(offset: usize) -> Option<(usize, usize)> {
    let (line, column) = (offset / CYCLES_PER_LINE, offset % CYCLES_PER_LINE);
    let y = line.checked_sub(FIRST_DISPLAY_LINE)?;
    (y < SURFACE_HEIGHT && column < DISPLAY_FETCH_CYCLES).then_some((column * PIXELS_PER_CYCLE, y))
}

impl SpanSink for FlatRenderer {
    fn render_span(&mut self, surface: &mut Surface, start: u32, end: u32) {
        let colour = self.colour();
        let (mut pos, end) = (start as usize, end as usize);

        while pos < end {
            let line = pos / CYCLES_PER_LINE;
            let line_end = ((line + 1) * CYCLES_PER_LINE).min(end);
            let column = pos % CYCLES_PER_LINE;
            let last = (line_end - line * CYCLES_PER_LINE).min(DISPLAY_FETCH_CYCLES);

            if let Some((x, y)) = visible_position(pos) {
                surface.fill_span(x, y, (last - column) * PIXELS_PER_CYCLE, colour);
            }
            pos = line_end;
        }
    }

    fn apply(&mut self, event: &VideoEvent) {
        match event.kind {
            VideoEventKind::Mode => self.mode = event.value,
            VideoEventKind::Palette => self.palette[(event.address & 7) as usize] = event.value,
            VideoEventKind::Irq => {
                let offset = event.timestamp.wrapping_sub(self.frame_start);
                self.markers.push(offset);
            }
        }
    }
}

pub struct Display {
    scheduler: VideoEventScheduler,
    renderer: FlatRenderer,
    buffers: FrameBuffers,
}

impl Display {
    pub fn new(output_mode: OutputMode) -> Self {
        Self {
            scheduler: VideoEventScheduler::new(),
            renderer: FlatRenderer {
                output_mode,
                mode: 0,
                palette: [0xFF; 8],
                markers: Vec::new(),
                frame_start: 0,
            },
            buffers: FrameBuffers::new(),
        }
    }

    /// Presenter's view of the finished frames.
    pub fn handle(&self) -> FrameHandle {
        self.buffers.handle()
    }

    /// Render the frame that began at `frame_start` and publish it.
    /// Returns the new frame number.
    pub fn end_frame(&mut self, frame_start: Cycles) -> u64 {
        self.renderer.frame_start = frame_start;
        let applied =
            self.scheduler
                .render_frame(frame_start, &mut self.renderer, self.buffers.back_mut());

        let markers = std::mem::take(&mut self.renderer.markers);
        if self.renderer.output_mode == OutputMode::Overlay {
            let surface = self.buffers.back_mut();
            for (x, y) in markers.iter().filter_map(|&m| visible_position(m as usize)) {
                surface.fill_span(x, y, PIXELS_PER_CYCLE, MARKER_COLOUR);
            }
        }

        let frame = self.buffers.present();
        log::trace!("frame {frame}: {applied} video events");
        frame
    }

    pub fn mode(&self) -> u8 {
        self.renderer.mode
    }

    pub fn palette(&self) -> [u8; 8] {
        self.renderer.palette
    }

    pub fn output_mode(&self) -> OutputMode {
        self.renderer.output_mode
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.renderer.output_mode = mode;
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.pending()
    }
}

impl DisplayPort for Display {
    fn set_mode(&mut self, timestamp: Cycles, mode: u8) {
        self.scheduler.enqueue(VideoEventKind::Mode, mode, 0, timestamp);
    }

    fn set_palette(&mut self, timestamp: Cycles, register: u8, value: u8) {
        self.scheduler.enqueue(VideoEventKind::Palette, value, register, timestamp);
    }

    fn mark_interrupt(&mut self, timestamp: Cycles, bits: u8) {
        self.scheduler.enqueue(VideoEventKind::Irq, bits, 0, timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ula::timing::FRAME_CYCLES;

    fn at(line: usize, column: usize) -> Cycles {
        (line * CYCLES_PER_LINE + column) as Cycles
    }

    #[test]
    fn palette_change_splits_the_frame() {
        let mut display = Display::new(OutputMode::Plain);
        let handle = display.handle();
        // logical 0 red (active low), then blue from line 100
        display.set_palette(0, 0, !0x01);
        display.set_palette(at(100, 0), 0, !0x04);

        assert_eq!(display.end_frame(0), 1);
        handle.with_front(|s| {
            assert_eq!(s.pixel(0, 0), 0xFF0000);
            assert_eq!(s.pixel(639, 100 - FIRST_DISPLAY_LINE - 1), 0xFF0000);
            assert_eq!(s.pixel(0, 100 - FIRST_DISPLAY_LINE), 0x0000FF);
            assert_eq!(s.pixel(639, 255), 0x0000FF);
        });
        assert_eq!(display.palette()[0], !0x04);
        assert_eq!(display.pending_events(), 0);
    }

    #[test]
    fn mid_line_change_takes_effect_at_its_column() {
        let mut display = Display::new(OutputMode::Plain);
        let handle = display.handle();
        display.set_palette(0, 0, !0x02);
        display.set_palette(at(60, 40), 0, !0x07);
        display.end_frame(0);
        handle.with_front(|s| {
            let y = 60 - FIRST_DISPLAY_LINE;
            assert_eq!(s.pixel(39 * 8, y), 0x00FF00);
            assert_eq!(s.pixel(40 * 8, y), 0xFFFFFF);
        });
    }

    #[test]
    fn overlay_marks_interrupts() {
        let mut display = Display::new(OutputMode::Overlay);
        let handle = display.handle();
        display.mark_interrupt(at(155, 0), 0x08);
        // display-end lands past the fetch window, so is not visible
        display.mark_interrupt(at(311, 80), 0x04);
        display.end_frame(0);
        handle.with_front(|s| {
            assert_eq!(s.pixel(0, 155 - FIRST_DISPLAY_LINE), MARKER_COLOUR);
            assert_eq!(s.pixel(8, 155 - FIRST_DISPLAY_LINE), 0);
        });
    }

    #[test]
    fn multiplexed_output_tints_by_mode() {
        let mut display = Display::new(OutputMode::Multiplexed);
        let handle = display.handle();
        display.set_mode(at(200, 0), 1);
        display.set_mode(FRAME_CYCLES + 10, 2);
        display.end_frame(0);
        assert_eq!(display.mode(), 1);
        assert_eq!(display.pending_events(), 1);
        handle.with_front(|s| {
            assert_eq!(s.pixel(0, 0), 0);
            assert_eq!(s.pixel(0, 200 - FIRST_DISPLAY_LINE), MODE_TINT[1]);
        });
    }
}
