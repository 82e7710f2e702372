//! ROM image loader.
//!
//! Images are 16 KiB raw dumps, optionally gzip-compressed.  Names passed
//! in may start with `%ROMPATH%`, which expands to the first directory in
//! the search list that contains the file:
//!
//! 1. the directory set in the configuration, if any
//! 2. `$ELECTRON_ROM_DIR`
//! 3. `./roms/` and `./` in the working directory
//! 4. `roms/` next to the executable
//! 5. `~/.local/share/electron/roms/`

use std::io::Read;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use flate2::read::GzDecoder;
use thiserror::Error;

/// Every sideways slot holds exactly this much.
pub const ROM_SIZE: usize = 0x4000;

const ROM_PATH_PREFIX: &str = "%ROMPATH%";
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM {name} not found, searched:\n{searched}")]
    NotFound { name: String, searched: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: expected 16384 bytes, got {len}", .path.display())]
    Truncated { path: PathBuf, len: usize },

    #[error("no sideways slot {0}, slots are 0-15")]
    BadSlot(u8),
}

// ── Locator ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RomLocator {
    dirs: Vec<PathBuf>,
}

impl RomLocator {
    /// Search the standard locations, preceded by `preferred` when set.
    pub fn new(preferred: Option<&Path>) -> Self {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = preferred {
            dirs.push(dir.to_path_buf());
        }
        if let Ok(val) = env::var("ELECTRON_ROM_DIR") {
            dirs.push(PathBuf::from(val));
        }
        if let Ok(cwd) = env::current_dir() {
            dirs.push(cwd.join("roms"));
            dirs.push(cwd);
        }
        if let Ok(exe) = env::current_exe() {
            if let Some(d) = exe.parent() {
                dirs.push(d.join("roms"));
            }
        }
        if let Some(home) = dirs_home() {
            dirs.push(home.join(".local").join("share").join("electron").join("roms"));
        }
        Self { dirs }
    }

    /// Search only `dirs`, in order.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Expand `%ROMPATH%` and return the first existing match.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, RomError> {
        let Some(rest) = name.strip_prefix(ROM_PATH_PREFIX) else {
            let path = PathBuf::from(name);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(RomError::NotFound {
                    name: name.to_string(),
                    searched: format!("  {}", path.display()),
                })
            };
        };
        let rest = rest.trim_start_matches(['/', '\\']);

        self.dirs
            .iter()
            .map(|dir| dir.join(rest))
            .find(|p| p.is_file())
            .ok_or_else(|| RomError::NotFound {
                name: rest.to_string(),
                searched: self
                    .dirs
                    .iter()
                    .map(|p| format!("  {}", p.display()))
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
    }
}

// ── Loading ───────────────────────────────────────────────────

/// Read a ROM image, inflating it if it is gzip-compressed.
pub fn load_image(path: &Path) -> Result<Vec<u8>, RomError> {
    let io_err = |source| RomError::Io {
        path: path.to_path_buf(),
        source,
    };

    let raw = fs::read(path).map_err(io_err)?;
    let mut data = if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::with_capacity(ROM_SIZE);
        GzDecoder::new(&raw[..])
            .read_to_end(&mut inflated)
            .map_err(io_err)?;
        inflated
    } else {
        raw
    };

    if data.len() < ROM_SIZE {
        return Err(RomError::Truncated {
            path: path.to_path_buf(),
            len: data.len(),
        });
    }
    data.truncate(ROM_SIZE);

    log::debug!("loaded ROM {}", path.display());
    Ok(data)
}

fn dirs_home() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}
