//! Square-wave sound generator.
//!
//! The Electron's sound is a single square wave whose frequency is set by
//! the divider at &FE06 and which is gated on or off by bits 1-2 of &FE07.
//! Register writes arrive on the simulation thread stamped with the 2 MHz
//! cycle count; the host audio callback pulls samples on its own thread
//! whenever it needs them.  The two sides meet in an event queue guarded
//! by a single mutex, held for a whole push or a whole pull.
//!
//! Each event carries the distance from its predecessor already converted
//! to output samples.  The conversion is done in integers with the
//! remainder carried forward, so the sample clock never drifts from the
//! cycle clock however long the machine runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event_queue::{Cycles, Timed, TimedEventQueue};
use super::timing::FRAME_CYCLES;

// ── Constants ─────────────────────────────────────────────────

/// Rate the hardware's divider is specified against.
pub const NOMINAL_SAMPLE_RATE: u32 = 31_250;
/// Emulated cycles per second: one PAL frame, fifty times.
pub const CYCLES_PER_SECOND: u64 = FRAME_CYCLES as u64 * 50;
/// Samples requested per device callback.
pub const DEVICE_BUFFER_SAMPLES: u32 = 2048;
/// Pending audio events.
pub const AUDIO_QUEUE_LENGTH: usize = 4096;
/// When the queued events span more than this many cycles the pull side
/// has fallen behind: stale events are applied without producing sound.
pub const CATCH_UP_CYCLES: Cycles = 125_000;
/// With audio on but nothing happening, a no-op event is queued after
/// this many cycles so the pull side keeps a recent time reference.
pub const WATCHDOG_CYCLES: Cycles = 8_000_000;
/// Phase increments above this are beyond hearing; output is held flat.
const INAUDIBLE_INCREMENT: u64 = 0x4000_0000;
const PHASE_TOP_BIT: u32 = 0x8000_0000;
const DEFAULT_VOLUME: u8 = 64;

// ── Events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioEventKind {
    #[default]
    Nop,
    Start,
    Stop,
    SetDivider,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioEvent {
    pub kind: AudioEventKind,
    pub value: u8,
    /// Cycle count at which the write happened.
    pub clock_time: Cycles,
    /// Output samples between the previous event and this one.
    pub sample_diff: u32,
    /// Fractional part of the conversion, in units of 1/CYCLES_PER_SECOND
    /// samples, carried into the next event.
    pub remainder: u32,
}

impl Timed for AudioEvent {
    fn timestamp(&self) -> Cycles {
        self.clock_time
    }
}

// ── Shared state ──────────────────────────────────────────────

struct AudioState {
    queue: TimedEventQueue<AudioEvent>,

    /// Time reference of the most recently queued event.
    last_clock: Cycles,
    last_remainder: u32,

    /// Samples produced since the last applied event.
    process_time: u32,

    phase: u32,
    increment: u32,
    /// 0xFF while the tone is on.
    mask: u8,
    mask_backup: u8,

    volume: u8,
    low_level: u8,

    sample_rate: u32,
    /// `(31250 << 32) / sample_rate`; divided by (divider + 1) it gives
    /// the phase increment per output sample.
    numerator: u64,
}

impl AudioState {
    fn new(volume: u8) -> Self {
        let mut state = Self {
            queue: TimedEventQueue::new(AUDIO_QUEUE_LENGTH),
            last_clock: 0,
            last_remainder: 0,
            process_time: 0,
            phase: 0,
            increment: 0,
            mask: 0,
            mask_backup: 0,
            volume: 0,
            low_level: 0,
            sample_rate: NOMINAL_SAMPLE_RATE,
            numerator: 0,
        };
        state.set_volume(volume);
        state.set_sample_rate(NOMINAL_SAMPLE_RATE);
        state
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
        self.low_level = 128 - ((volume as u16 + 1) >> 1) as u8;
    }

    fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate.max(1);
        self.numerator = ((NOMINAL_SAMPLE_RATE as u64) << 32) / self.sample_rate as u64;
    }

    fn push(&mut self, kind: AudioEventKind, value: u8, timestamp: Cycles) {
        let delta = timestamp.wrapping_sub(self.last_clock) as u64;
        let scaled = delta * self.sample_rate as u64 + self.last_remainder as u64;
        let event = AudioEvent {
            kind,
            value,
            clock_time: timestamp,
            sample_diff: (scaled / CYCLES_PER_SECOND) as u32,
            remainder: (scaled % CYCLES_PER_SECOND) as u32,
        };
        self.last_clock = timestamp;
        self.last_remainder = event.remainder;

        if self.queue.is_full() {
            self.enact_early();
        }
        self.queue.enqueue(event);
    }

    /// Make room by applying the oldest event ahead of its time.  Its gap
    /// is carried into the next event so later events keep their position.
    fn enact_early(&mut self) {
        let Some(oldest) = self.queue.peek().cloned() else {
            return;
        };
        log::warn!(
            "audio queue full, applying {:?} from cycle {} early",
            oldest.kind,
            oldest.clock_time
        );
        self.enact_next();
        if let Some(next) = self.queue.peek_mut() {
            next.sample_diff = next.sample_diff.saturating_add(oldest.sample_diff);
        }
    }

    /// Apply the oldest pending event.
    fn enact_next(&mut self) {
        let Some(event) = self.queue.advance() else {
            return;
        };
        match event.kind {
            AudioEventKind::Nop => {}
            AudioEventKind::Start => self.mask = 0xFF,
            AudioEventKind::Stop => self.mask = 0x00,
            AudioEventKind::SetDivider => {
                let increment = self.numerator / (event.value as u64 + 1);
                if increment > INAUDIBLE_INCREMENT {
                    self.increment = 0;
                    self.phase = PHASE_TOP_BIT;
                } else {
                    self.increment = increment as u32;
                }
            }
        }
    }

    #[inline]
    fn level(&self) -> u8 {
        let high = (self.phase >> 31) as u8;
        self.low_level
            .wrapping_add(high.wrapping_mul(self.volume) & self.mask)
    }

    fn fill(&mut self, out: &mut [u8]) {
        if self.mask == 0 && self.queue.is_empty() {
            // Silent and nothing scheduled: the outcome is known.
            out.fill(self.low_level);
            self.process_time = self.process_time.saturating_add(out.len() as u32);
            return;
        }

        // Never run ahead of the next event.
        if let Some(next) = self.queue.peek() {
            if self.process_time > next.sample_diff {
                self.process_time = next.sample_diff;
            }
        }

        // Far behind: drop the backlog without rendering it.
        while self.queue.pending_span() >= CATCH_UP_CYCLES {
            self.enact_next();
        }

        let mut pos = 0;
        while pos < out.len() {
            while let Some(next) = self.queue.peek() {
                if self.process_time < next.sample_diff {
                    break;
                }
                self.process_time -= next.sample_diff;
                self.enact_next();
            }

            let remaining = out.len() - pos;
            let run = match self.queue.peek() {
                Some(next) => ((next.sample_diff - self.process_time) as usize).min(remaining),
                None => remaining,
            };
            self.process_time = self.process_time.saturating_add(run as u32);

            for sample in &mut out[pos..pos + run] {
                *sample = self.level();
                self.phase = self.phase.wrapping_add(self.increment);
            }
            pos += run;
        }
    }
}

fn lock(state: &Mutex<AudioState>) -> MutexGuard<'_, AudioState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Simulation-side handle ────────────────────────────────────

pub struct AudioSynthesizer {
    state: Arc<Mutex<AudioState>>,
    enabled: bool,
}

impl AudioSynthesizer {
    /// A synthesizer with no output attached.  Nothing is queued until
    /// [`enable`](Self::enable) is called with the device's real rate.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AudioState::new(DEFAULT_VOLUME))),
            enabled: false,
        }
    }

    /// An output device was opened at `sample_rate`.
    pub fn enable(&mut self, sample_rate: u32) {
        lock(&self.state).set_sample_rate(sample_rate);
        self.enabled = true;
        log::info!("sound enabled at {sample_rate} Hz");
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handle for the audio callback.
    pub fn source(&self) -> SampleSource {
        SampleSource {
            state: Arc::clone(&self.state),
        }
    }

    pub fn push(&self, kind: AudioEventKind, value: u8, timestamp: Cycles) {
        if self.enabled {
            lock(&self.state).push(kind, value, timestamp);
        }
    }

    /// Keep the pull side's time reference fresh while nothing happens.
    pub fn watchdog(&self, now: Cycles) {
        if !self.enabled {
            return;
        }
        let mut state = lock(&self.state);
        if state.queue.is_empty() && now.wrapping_sub(state.last_clock) > WATCHDOG_CYCLES {
            state.push(AudioEventKind::Nop, 0, now);
        }
    }

    pub fn set_volume(&self, volume: u8) {
        lock(&self.state).set_volume(volume);
    }

    pub fn volume(&self) -> u8 {
        lock(&self.state).volume
    }

    pub fn pause(&self) {
        let mut state = lock(&self.state);
        state.mask_backup = state.mask;
        state.mask = 0;
    }

    pub fn resume(&self) {
        let mut state = lock(&self.state);
        state.mask = state.mask_backup;
    }

    /// Apply everything pending and restart the cycle clock at zero.
    pub fn rebase(&self) {
        let mut state = lock(&self.state);
        while !state.queue.is_empty() {
            state.enact_next();
        }
        state.last_clock = 0;
        state.process_time = 0;
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }
}

impl Default for AudioSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Callback-side handle ──────────────────────────────────────

/// Pull end of the synthesizer, safe to move onto the audio thread.
#[derive(Clone)]
pub struct SampleSource {
    state: Arc<Mutex<AudioState>>,
}

impl SampleSource {
    /// Render `out.len()` unsigned 8-bit mono samples.
    pub fn fill(&self, out: &mut [u8]) {
        lock(&self.state).fill(out);
    }

    pub fn sample_rate(&self) -> u32 {
        lock(&self.state).sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(synth: &AudioSynthesizer) -> Vec<AudioEvent> {
        let state = lock(&synth.state);
        state.queue.iter().cloned().collect()
    }

    fn enabled(rate: u32) -> AudioSynthesizer {
        let mut synth = AudioSynthesizer::new();
        synth.enable(rate);
        synth
    }

    #[test]
    fn conversion_never_drifts() {
        for rate in [31_250u32, 44_100, 48_000, 22_050] {
            let synth = enabled(rate);
            let mut now: Cycles = 0;
            let mut samples: u64 = 0;
            let mut last_remainder = 0;
            // irregular gaps, long enough run to expose accumulated error
            for i in 0..3000u32 {
                now += 1 + (i * 7919) % 2003;
                synth.push(AudioEventKind::Nop, 0, now);
                if i % 1000 == 999 {
                    for event in drain(&synth) {
                        samples += event.sample_diff as u64;
                        last_remainder = event.remainder;
                    }
                    lock(&synth.state).queue.clear();
                }
            }
            assert_eq!(
                samples * CYCLES_PER_SECOND + last_remainder as u64,
                now as u64 * rate as u64,
                "rate {rate}"
            );
        }
    }

    #[test]
    fn divider_then_start_scenario() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.set_volume(64);
        synth.push(AudioEventKind::SetDivider, 0x7A, 1000);
        synth.push(AudioEventKind::Start, 0, 1100);

        let events = drain(&synth);
        assert_eq!(events[0].sample_diff, 15);
        assert_eq!(events[1].sample_diff, 2);

        let mut out = vec![0u8; DEVICE_BUFFER_SAMPLES as usize];
        synth.source().fill(&mut out);

        let low = 96;
        let high = 160;
        // silent until the start event lands on sample 17
        assert!(out[..17].iter().all(|&s| s == low));
        // divider 0x7A: period of 123 samples, top bit first set on sample 77
        assert_eq!(out[76], low);
        assert_eq!(out[77], high);
        let edges = out.windows(2).filter(|w| w[0] != w[1]).count();
        assert!((30..=36).contains(&edges), "{edges} edges");
        assert!(out.iter().all(|&s| s == low || s == high));
    }

    #[test]
    fn full_queue_applies_oldest_early() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.set_volume(64);
        synth.push(AudioEventKind::SetDivider, 20, 0);
        synth.push(AudioEventKind::Start, 0, 10);
        // a tight loop rewriting the divider faster than the device pulls
        let mut now = 10;
        for _ in 0..AUDIO_QUEUE_LENGTH {
            now += 10;
            synth.push(AudioEventKind::SetDivider, 20, now);
        }
        assert_eq!(synth.pending(), AUDIO_QUEUE_LENGTH);
        {
            let state = lock(&synth.state);
            assert_eq!(state.mask, 0xFF);
            // the carried gaps still add up to the last event's position
            let total: u64 = state.queue.iter().map(|e| e.sample_diff as u64).sum();
            assert_eq!(total, now as u64 * NOMINAL_SAMPLE_RATE as u64 / CYCLES_PER_SECOND);
        }

        let mut out = vec![0u8; AUDIO_QUEUE_LENGTH];
        synth.source().fill(&mut out);
        assert!(out.contains(&96));
        assert!(out.contains(&160));
    }

    #[test]
    fn muted_and_idle_is_flat() {
        let synth = enabled(48_000);
        synth.set_volume(100);
        let mut out = vec![0u8; 512];
        synth.source().fill(&mut out);
        assert!(out.iter().all(|&s| s == 128 - 50));
    }

    #[test]
    fn inaudible_divider_holds_level() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.set_volume(64);
        // divider 1 at 31250 Hz: increment 2^31, beyond the cutoff
        synth.push(AudioEventKind::SetDivider, 1, 10);
        synth.push(AudioEventKind::Start, 0, 20);
        let mut out = vec![0u8; 256];
        synth.source().fill(&mut out);
        assert!(out[10..].iter().all(|&s| s == 160));
    }

    #[test]
    fn catch_up_discards_stale_backlog() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        for i in 0..10u32 {
            synth.push(AudioEventKind::SetDivider, i as u8, i * 50_000);
        }
        let mut out = vec![0u8; 16];
        synth.source().fill(&mut out);
        let state = lock(&synth.state);
        assert!(state.queue.pending_span() < CATCH_UP_CYCLES);
        assert!(state.queue.len() < 10);
    }

    #[test]
    fn watchdog_only_fires_when_idle() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.watchdog(WATCHDOG_CYCLES);
        assert_eq!(synth.pending(), 0);
        synth.watchdog(WATCHDOG_CYCLES + 1);
        assert_eq!(synth.pending(), 1);
        // still pending, so no second one
        synth.watchdog(2 * WATCHDOG_CYCLES + 2);
        assert_eq!(synth.pending(), 1);
    }

    #[test]
    fn disabled_synth_queues_nothing() {
        let synth = AudioSynthesizer::new();
        synth.push(AudioEventKind::Start, 0, 10);
        synth.watchdog(WATCHDOG_CYCLES * 2);
        assert_eq!(synth.pending(), 0);
    }

    #[test]
    fn pause_silences_until_resume() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.set_volume(64);
        synth.push(AudioEventKind::SetDivider, 1, 0);
        synth.push(AudioEventKind::Start, 0, 0);
        let source = synth.source();
        let mut out = vec![0u8; 8];
        source.fill(&mut out);
        assert_eq!(out[7], 160);

        synth.pause();
        source.fill(&mut out);
        assert!(out.iter().all(|&s| s == 96));

        synth.resume();
        source.fill(&mut out);
        assert!(out.iter().all(|&s| s == 160));
    }

    #[test]
    fn rebase_applies_pending_events() {
        let synth = enabled(NOMINAL_SAMPLE_RATE);
        synth.push(AudioEventKind::Start, 0, 5000);
        synth.rebase();
        assert_eq!(synth.pending(), 0);
        let state = lock(&synth.state);
        assert_eq!(state.mask, 0xFF);
        assert_eq!(state.last_clock, 0);
    }
}
