// Emulation thread: owns the Machine (which is !Send) and the audio output,
// runs frames at 50 Hz, and talks to the front end over channels.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use super::Machine;
use crate::config::Config;
use crate::sound_out::SoundOutput;
use crate::ula::UlaRegister;
use crate::video::surface::FrameHandle;

/// 50 Hz PAL frame.
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Commands sent from the front end → emulation thread.
#[derive(Debug, Clone)]
pub enum MachineCmd {
    TogglePause,
    Key { name: String, down: bool },
    Reset,
    Quit,
}

/// Status sent once per frame from the emulation thread.
#[derive(Debug, Clone)]
pub struct MachineStatus {
    pub frame: u64,
    pub caps_led: bool,
    pub interrupt_status: u8,
    pub elapsed: Duration,
}

fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if now >= deadline {
        return;
    }
    let remaining = deadline - now;
    // Sleep if > 1.5ms remaining (sleep granularity is ~1ms on most OSes)
    if remaining > Duration::from_micros(1500) {
        thread::sleep(remaining - Duration::from_micros(1000));
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

pub type Spawned = (
    Sender<MachineCmd>,
    Receiver<MachineStatus>,
    FrameHandle,
    thread::JoinHandle<()>,
);

/// Start the emulation thread.  Returns once the machine is built, with
/// the command and status channels and the presenter's frame handle.
pub fn spawn_machine(config: Config) -> Result<Spawned, String> {
    let (cmd_tx, cmd_rx) = bounded::<MachineCmd>(64);
    let (status_tx, status_rx) = bounded::<MachineStatus>(16);
    let (ready_tx, ready_rx) = bounded::<FrameHandle>(1);

    let handle = thread::Builder::new()
        .name("electron".into())
        .spawn(move || {
            let mut machine = Machine::new(&config);
            let _ = ready_tx.send(machine.frame_handle());

            let sound = if config.sound {
                match SoundOutput::open(machine.ula_mut().audio_mut()) {
                    Ok(out) => {
                        log::info!("Sound at {}Hz", out.sample_rate());
                        Some(out)
                    }
                    Err(e) => {
                        log::warn!("Sound disabled: {e}");
                        None
                    }
                }
            } else {
                None
            };

            machine_loop(&mut machine, config.frames, &cmd_rx, &status_tx);

            // stop the simulation before the device stops pulling samples
            drop(machine);
            drop(sound);
            log::debug!("Emulation thread exiting");
        })
        .map_err(|e| format!("spawn emulation thread: {e}"))?;

    let frames = ready_rx
        .recv()
        .map_err(|_| "Emulation thread died during start-up".to_string())?;
    Ok((cmd_tx, status_rx, frames, handle))
}

fn machine_loop(
    machine: &mut Machine,
    frame_limit: u32,
    cmd_rx: &Receiver<MachineCmd>,
    status_tx: &Sender<MachineStatus>,
) {
    let started = Instant::now();
    let mut next_frame = Instant::now();

    loop {
        // Drain commands (also detect front-end shutdown)
        loop {
            match cmd_rx.try_recv() {
                Ok(MachineCmd::Quit) | Err(TryRecvError::Disconnected) => return,
                Ok(cmd) => handle_cmd(machine, cmd),
                Err(TryRecvError::Empty) => break,
            }
        }

        if machine.ula().is_paused() {
            // block until something changes
            match cmd_rx.recv() {
                Ok(MachineCmd::Quit) | Err(_) => return,
                Ok(cmd) => handle_cmd(machine, cmd),
            }
            next_frame = Instant::now();
            continue;
        }

        let frame = machine.run_frame();

        let _ = status_tx.try_send(MachineStatus {
            frame,
            caps_led: machine.ula().caps_led(),
            interrupt_status: machine.ula().query(UlaRegister::InterruptStatus),
            elapsed: started.elapsed(),
        });

        if frame_limit != 0 && frame >= frame_limit as u64 {
            log::info!("Stopping after {frame} frames");
            return;
        }

        // Absolute-timeline pacing; snap forward after a stall rather
        // than fast-forwarding.
        next_frame += FRAME_DURATION;
        let now = Instant::now();
        if next_frame < now {
            next_frame = now;
        }
        wait_until(next_frame);
    }
}

fn handle_cmd(machine: &mut Machine, cmd: MachineCmd) {
    match cmd {
        MachineCmd::TogglePause => {
            let ula = machine.ula_mut();
            if ula.is_paused() {
                ula.resume();
            } else {
                ula.pause();
            }
            log::info!("{}", if ula.is_paused() { "Paused" } else { "Resumed" });
        }
        MachineCmd::Key { name, down } => {
            if !machine.set_key(&name, down) {
                log::warn!("Unknown key {name:?}");
            }
        }
        MachineCmd::Reset => machine.reset(),
        MachineCmd::Quit => {}
    }
}
