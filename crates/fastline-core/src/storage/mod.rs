mod config;

pub use config::{
    BridgeSection, Config, MilestonesSection, MonitorSection, RetrySection, UserConfig, WaterSection,
};

use std::path::PathBuf;

use crate::error::{ConfigError, CoreError};
use crate::session::LocalSessionStore;

/// Returns `~/.config/fastline[-dev]/` based on FASTLINE_ENV.
///
/// Set FASTLINE_ENV=dev to use development data directory.
/// FASTLINE_DATA_DIR overrides the location entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("FASTLINE_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("FASTLINE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("fastline-dev")
            } else {
                base_dir.join("fastline")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// Path of the local session file.
pub fn sessions_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join("sessions.json"))
}

/// File-backed session store in the data directory.
pub fn open_local_store() -> Result<LocalSessionStore, CoreError> {
    LocalSessionStore::with_file(sessions_path()?)
}
