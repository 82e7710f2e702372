// Persistent configuration: memory board mode, ROMs, sound volume, display output.
// Stored as JSON in <config_dir>/electron-ula/config.json

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ula::memory::MemoryMode;
use crate::video::surface::OutputMode;

/// An extra sideways ROM image and the logical slot it goes in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomSlot {
    pub slot: u8,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Slogger Master RAM Board setting.
    pub memory_mode: MemoryMode,
    /// Directory searched first for `%ROMPATH%` names.
    pub rom_dir: Option<String>,
    /// Extra sideways ROMs, installed after BASIC and the OS.
    pub roms: Vec<RomSlot>,
    /// Logical slots turned into sideways RAM.
    pub sideways_ram: Vec<u8>,
    /// Open an audio device at all.
    pub sound: bool,
    /// Peak-to-peak amplitude of the square wave, 0-255.
    pub volume: u8,
    pub output_mode: OutputMode,
    /// Stop after this many frames; 0 runs until interrupted.
    pub frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_mode: MemoryMode::Off,
            rom_dir: None,
            roms: Vec::new(),
            sideways_ram: Vec::new(),
            sound: true,
            volume: 64,
            output_mode: OutputMode::Plain,
            frames: 0,
        }
    }
}

impl Config {
    /// Path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Load config from the default location, or return defaults if not
    /// found / invalid.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Load config from `path`.  Unknown fields are ignored, missing
    /// fields get defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_json(&content).unwrap_or_else(|e| {
                log::warn!("Invalid config {}: {e}", path.display());
                Self::default()
            }),
            Err(e) => {
                log::warn!("Cannot read config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save config to the default location.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Cannot serialise config: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, json) {
            log::warn!("Cannot save config: {e}");
        } else {
            log::info!("Config saved to {}", path.display());
        }
    }

    fn parse_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Apply `--config`, `--frames` and `--mode` overrides.  `--config`
    /// is handled first so the others win over the file.
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let mut config = match value_of(args, "--config")? {
            Some(path) => Self::load_from(Path::new(path)),
            None => Self::load(),
        };

        if let Some(frames) = value_of(args, "--frames")? {
            config.frames = frames
                .parse()
                .map_err(|_| format!("--frames expects a number, got {frames:?}"))?;
        }
        if let Some(mode) = value_of(args, "--mode")? {
            config.memory_mode = parse_memory_mode(mode)?;
        }
        if args.iter().any(|a| a == "--mute") {
            config.sound = false;
        }
        Ok(config)
    }
}

/// The value following `flag`, if the flag is present.
fn value_of<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>, String> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| format!("{flag} needs a value")),
    }
}

fn parse_memory_mode(name: &str) -> Result<MemoryMode, String> {
    match name.to_ascii_lowercase().as_str() {
        "off" | "normal" => Ok(MemoryMode::Off),
        "turbo" => Ok(MemoryMode::Turbo),
        "4mhz" | "four_mhz" => Ok(MemoryMode::FourMhz),
        "shadow" => Ok(MemoryMode::Shadow),
        other => Err(format!("unknown memory mode {other:?} (off, turbo, 4mhz, shadow)")),
    }
}

/// Get the application config directory.
fn config_dir() -> Option<PathBuf> {
    // macOS:   ~/Library/Application Support/electron-ula/
    // Linux:   ~/.config/electron-ula/
    // Windows: %APPDATA%/electron-ula/

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("electron-ula"),
        )
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("electron-ula"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".config").join("electron-ula"))
    }
}
