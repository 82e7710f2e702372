mod config;
mod machine;
mod sound_out;
mod ula;
mod video;

use std::io::BufRead;
use std::thread;

use crossbeam_channel::Sender;

use config::Config;
use machine::runner::{spawn_machine, MachineCmd};

const USAGE: &str = "\
usage: electron-ula [--config FILE] [--frames N] [--mode off|turbo|4mhz|shadow] [--mute] [--save-config]

console commands, one per line:
  p          pause / resume
  r          reset
  +KEY -KEY  press / release a key by its keycap name (e.g. +SPACE)
  q          quit";

// ─────────────────────────────────────────────────────────────────────────────
//  Console
// ─────────────────────────────────────────────────────────────────────────────

fn parse_command(line: &str) -> Option<MachineCmd> {
    let line = line.trim();
    match line {
        "" => None,
        "p" => Some(MachineCmd::TogglePause),
        "r" => Some(MachineCmd::Reset),
        "q" => Some(MachineCmd::Quit),
        _ => {
            let (down, name) = if let Some(name) = line.strip_prefix('+') {
                (true, name)
            } else {
                (false, line.strip_prefix('-')?)
            };
            Some(MachineCmd::Key {
                name: name.to_string(),
                down,
            })
        }
    }
}

/// Forward stdin lines to the emulation thread.  End of input only stops
/// the console, not the machine.
fn spawn_console(cmd_tx: Sender<MachineCmd>) {
    let spawned = thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if cmd_tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("{USAGE}"),
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("No console: {e}");
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return;
    }

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };
    if args.iter().any(|a| a == "--save-config") {
        config.save();
    }

    let (cmd_tx, status_rx, frames, emulation) = match spawn_machine(config) {
        Ok(spawned) => spawned,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    spawn_console(cmd_tx);

    // one line a second; the loop ends when the emulation thread exits
    for status in status_rx.iter() {
        if status.frame % 50 != 0 {
            continue;
        }
        let centre = frames.with_front(|s| s.pixel(s.width() / 2, s.height() / 2));
        log::info!(
            "frame {} after {:.1}s, irq status {:02x}, caps {}, centre #{centre:06x}",
            status.frame,
            status.elapsed.as_secs_f32(),
            status.interrupt_status,
            if status.caps_led { "on" } else { "off" },
        );
    }

    if emulation.join().is_err() {
        log::error!("Emulation thread panicked");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands() {
        assert!(matches!(parse_command("p"), Some(MachineCmd::TogglePause)));
        assert!(matches!(parse_command(" q \n"), Some(MachineCmd::Quit)));
        assert!(matches!(
            parse_command("+SPACE"),
            Some(MachineCmd::Key { ref name, down: true }) if name == "SPACE"
        ));
        assert!(matches!(
            parse_command("-a"),
            Some(MachineCmd::Key { ref name, down: false }) if name == "a"
        ));
        assert!(parse_command("").is_none());
        assert!(parse_command("hello").is_none());
    }
}
