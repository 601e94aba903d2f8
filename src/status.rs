//! Status file read by external supervisors, and the manual stop flag they
//! create to ask the engine to exit.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::SystemConfig;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub pid: u32,
    pub started_at: String,
    pub last_update: String,
    pub symbol: String,
    pub magic_number: u64,
    pub timeframe: String,
    pub mode: String,
    pub open_positions: usize,
    pub last_decision: String,
}

pub struct StatusFile {
    path: PathBuf,
    stop_flag: PathBuf,
}

impl StatusFile {
    pub fn new(system: &SystemConfig) -> Self {
        Self { path: PathBuf::from(&system.status_file), stop_flag: PathBuf::from(&system.stop_flag_file) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewritten every iteration; supervisors use the mtime as a heartbeat.
    pub fn write(&self, info: &StatusInfo) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_string_pretty(info).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, body)
    }

    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("[status] removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[status] cannot remove {}: {}", self.path.display(), e),
        }
    }

    /// The flag is left in place; whoever created it clears it.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.exists()
    }
}
