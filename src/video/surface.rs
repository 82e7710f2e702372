//! Frame surfaces and the front/back swap.
//!
//! The simulation thread renders into the back surface it owns outright.
//! At each frame boundary the back surface is swapped with the shared
//! front one under a short lock and the presenter is sent the frame
//! number, so a reader holding the front surface never sees a partial
//! frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

pub const SURFACE_WIDTH: usize = 640;
pub const SURFACE_HEIGHT: usize = 256;

/// How rendered spans are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Straight RGB framebuffer.
    #[default]
    Plain,
    /// Plain, with the frame-timer interrupt positions drawn on top.
    Overlay,
    /// Each span tinted by the display mode it was drawn in, so mid-frame
    /// mode and palette changes stand out.
    Multiplexed,
}

/// 640×256 0RGB pixels.
#[derive(Clone)]
pub struct Surface {
    pixels: Vec<u32>,
}

impl Surface {
    pub fn new() -> Self {
        Self {
            pixels: vec![0; SURFACE_WIDTH * SURFACE_HEIGHT],
        }
    }

    pub fn width(&self) -> usize {
        SURFACE_WIDTH
    }

    pub fn height(&self) -> usize {
        SURFACE_HEIGHT
    }

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * SURFACE_WIDTH + x]
    }

    pub fn row(&self, y: usize) -> &[u32] {
        &self.pixels[y * SURFACE_WIDTH..(y + 1) * SURFACE_WIDTH]
    }

    /// Fill `len` pixels of row `y` from `x` on, clipped to the surface.
    pub fn fill_span(&mut self, x: usize, y: usize, len: usize, colour: u32) {
        if y >= SURFACE_HEIGHT || x >= SURFACE_WIDTH {
            return;
        }
        let end = (x + len).min(SURFACE_WIDTH);
        let base = y * SURFACE_WIDTH;
        self.pixels[base + x..base + end].fill(colour);
    }

    pub fn clear(&mut self, colour: u32) {
        self.pixels.fill(colour);
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(surface: &Mutex<Surface>) -> MutexGuard<'_, Surface> {
    surface.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Presenter's end: the latest complete frame and a feed of frame numbers.
#[derive(Clone)]
pub struct FrameHandle {
    front: Arc<Mutex<Surface>>,
    frames: Receiver<u64>,
}

impl FrameHandle {
    /// Run `f` against the current front surface while holding the lock.
    pub fn with_front<R>(&self, f: impl FnOnce(&Surface) -> R) -> R {
        f(&lock(&self.front))
    }

    /// A copy of the current front surface.
    pub fn snapshot(&self) -> Surface {
        lock(&self.front).clone()
    }

    pub fn frames(&self) -> &Receiver<u64> {
        &self.frames
    }
}

/// Simulation thread's end.
pub struct FrameBuffers {
    back: Surface,
    front: Arc<Mutex<Surface>>,
    notify: Sender<u64>,
    frames: Receiver<u64>,
    frame_count: u64,
}

impl FrameBuffers {
    pub fn new() -> Self {
        // one pending wake-up is enough, the presenter always reads
        // whatever front surface is current
        let (notify, frames) = bounded(1);
        Self {
            back: Surface::new(),
            front: Arc::new(Mutex::new(Surface::new())),
            notify,
            frames,
            frame_count: 0,
        }
    }

    pub fn back_mut(&mut self) -> &mut Surface {
        &mut self.back
    }

    pub fn handle(&self) -> FrameHandle {
        FrameHandle {
            front: Arc::clone(&self.front),
            frames: self.frames.clone(),
        }
    }

    /// Publish the back surface as the new front.
    pub fn present(&mut self) -> u64 {
        std::mem::swap(&mut *lock(&self.front), &mut self.back);
        self.frame_count += 1;

        match self.notify.try_send(self.frame_count) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("no presenter for frame {}", self.frame_count);
            }
        }
        self.frame_count
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_are_clipped() {
        let mut surface = Surface::new();
        surface.fill_span(636, 3, 16, 0xFF0000);
        assert_eq!(surface.pixel(635, 3), 0);
        assert_eq!(surface.pixel(639, 3), 0xFF0000);
        surface.fill_span(0, SURFACE_HEIGHT, 8, 1);
        surface.fill_span(SURFACE_WIDTH, 0, 8, 1);
        assert!(surface.row(0).iter().all(|&p| p == 0));
    }

    #[test]
    fn present_swaps_whole_frames() {
        let mut buffers = FrameBuffers::new();
        let handle = buffers.handle();

        buffers.back_mut().clear(0x00FF00);
        // nothing published yet
        assert_eq!(handle.with_front(|s| s.pixel(10, 10)), 0);

        assert_eq!(buffers.present(), 1);
        assert_eq!(handle.frames().try_recv(), Ok(1));
        assert_eq!(handle.with_front(|s| s.pixel(10, 10)), 0x00FF00);

        // the old front comes back as the new back surface
        assert_eq!(buffers.back_mut().pixel(10, 10), 0);

        // a presenter that falls behind only sees the oldest unread frame
        buffers.present();
        buffers.present();
        assert_eq!(handle.frames().try_recv(), Ok(2));
        assert!(handle.frames().try_recv().is_err());
        assert_eq!(buffers.frame_count(), 3);
    }
}
