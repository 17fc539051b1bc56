mod config;
pub mod migrations;
mod recorder;

pub use config::{Config, SceneConfig, StateSettings};
pub use recorder::{JourneyRecorder, SqliteJourneyStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/fieldcue[-dev]/` based on FIELDCUE_ENV.
///
/// Set FIELDCUE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .ok_or(ConfigError::NoDataDir)?
        .join(".config");

    let env = std::env::var("FIELDCUE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("fieldcue-dev")
    } else {
        base_dir.join("fieldcue")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::SaveFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}
