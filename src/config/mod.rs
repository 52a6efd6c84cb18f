//! Configuration module for iqtap
//!
//! [`AppConfig`] gathers every tunable of the recorder into one TOML file.
//! The archive byte budget is deliberately absent: it is the fixed
//! [`crate::ops::IMAGES_LIMIT_BYTES`].
//!
//! # App Data Location
//!
//! Application data (logs, the default config file) is stored in the
//! platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.hxyulin.iqtap/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.iqtap/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.iqtap\`
//!
//! # Example
//!
//! ```ignore
//! use iqtap::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default("iqtap.toml");
//! config.archive.finish_processing_after_live = true;
//! config.save("iqtap.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{IqTapError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.iqtap";

/// Default config filename inside the app data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Subdirectory of the app data directory holding log files
pub const LOG_DIR: &str = "logs";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| IqTapError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            IqTapError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== App Config ====================

/// Complete recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub archive: ArchiveSettings,
    pub recorder: RecorderSettings,
    pub restart: RestartSettings,
    pub source: SourceSettings,
}

impl AppConfig {
    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| IqTapError::Config(format!("Failed to read {:?}: {}", path, e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| IqTapError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        config.restart.clamp();
        Ok(config)
    }

    /// Load a config file, returning defaults when it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to a config file, creating its parent directory
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IqTapError::Config(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| IqTapError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| IqTapError::Config(format!("Failed to write {:?}: {}", path, e)))
    }
}
