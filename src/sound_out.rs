// Host audio output for the ULA's square-wave generator using cpal.
//
//   The synthesizer renders unsigned 8-bit mono at whatever rate the
//   device runs at; the callback widens that to f32 and copies it to every
//   output channel.  The cpal::Stream is !Send, so it lives on its own
//   thread, parked until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::ula::audio::{AudioSynthesizer, SampleSource, DEVICE_BUFFER_SAMPLES};

// ─────────────────────────────────────────────────────────────────────────────
//  Audio thread  (owns the !Send cpal::Stream)
// ─────────────────────────────────────────────────────────────────────────────

/// Spawn a dedicated thread for cpal audio output.
/// Returns the device's actual sample rate on success.
fn spawn_audio_thread(
    source: SampleSource,
    shutdown: Arc<AtomicBool>,
) -> Result<(u32, thread::JoinHandle<()>), String> {
    let (result_tx, result_rx) = std::sync::mpsc::sync_channel::<Result<u32, String>>(1);

    let handle = thread::Builder::new()
        .name("ula-audio".into())
        .spawn(move || {
            let result = (|| -> Result<(cpal::Stream, u32), String> {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| "No audio output device found".to_string())?;

                let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

                // Query the device's preferred config to get the REAL sample rate.
                let default_config = device
                    .default_output_config()
                    .map_err(|e| format!("No default output config: {e}"))?;

                let actual_rate = default_config.sample_rate().0;
                let channels = default_config.channels().max(1);
                log::info!(
                    "Audio device: '{dev_name}', native rate: {actual_rate}Hz, {channels} channel(s)"
                );

                // Build stream at the device's native rate; the synthesizer
                // converts from the cycle clock directly.
                let config = cpal::StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(actual_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let mut mono = vec![0u8; DEVICE_BUFFER_SAMPLES as usize];
                let stride = channels as usize;

                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / stride;
                            if mono.len() < frames {
                                mono.resize(frames, 128);
                            }
                            let mono = &mut mono[..frames];
                            source.fill(mono);
                            for (frame, &sample) in data.chunks_exact_mut(stride).zip(mono.iter()) {
                                frame.fill((sample as f32 - 128.0) / 128.0);
                            }
                        },
                        move |err| {
                            log::error!("Audio error: {err}");
                        },
                        None,
                    )
                    .map_err(|e| format!("build_output_stream failed: {e}"))?;

                stream
                    .play()
                    .map_err(|e| format!("stream.play() failed: {e}"))?;

                Ok((stream, actual_rate))
            })();

            match result {
                Ok((stream, rate)) => {
                    let _ = result_tx.send(Ok(rate));
                    // Park this thread: it owns the stream.
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::park_timeout(std::time::Duration::from_millis(100));
                    }
                    drop(stream);
                    log::debug!("Audio thread exiting");
                }
                Err(e) => {
                    let _ = result_tx.send(Err(e));
                }
            }
        })
        .map_err(|e| format!("spawn audio thread: {e}"))?;

    let rate = result_rx
        .recv()
        .map_err(|_| "Audio thread died before reporting status".to_string())??;
    Ok((rate, handle))
}

// ─────────────────────────────────────────────────────────────────────────────
//  SoundOutput
// ─────────────────────────────────────────────────────────────────────────────

pub struct SoundOutput {
    sample_rate: u32,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SoundOutput {
    /// Open the default device and start pulling from `synth`.  On failure
    /// the synthesizer is left disabled, so it never queues anything.
    pub fn open(synth: &mut AudioSynthesizer) -> Result<Self, String> {
        let shutdown = Arc::new(AtomicBool::new(false));

        match spawn_audio_thread(synth.source(), shutdown.clone()) {
            Ok((sample_rate, thread)) => {
                synth.enable(sample_rate);
                Ok(Self {
                    sample_rate,
                    shutdown,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                synth.disable();
                Err(e)
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for SoundOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
        log::debug!("Sound output shut down");
    }
}
