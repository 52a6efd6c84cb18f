//! Configuration sections
//!
//! Every section deserializes with defaults for missing fields, so a partial
//! TOML file only needs to name what it changes.
//!
//! # Sections
//!
//! - [`ArchiveSettings`] - where completed runs live and what happens after them
//! - [`RecorderSettings`] - recording location and worker pool sizes
//! - [`RestartSettings`] - stall detection and reopen backoff
//! - [`SourceSettings`] - the synthetic source used without hardware

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Archive settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Root directory holding one directory per completed run
    pub root: PathBuf,

    /// Queue a full offline pass over each live run once it is promoted
    pub finish_processing_after_live: bool,

    /// Threads running deferred processing and quota eviction
    pub deferred_threads: usize,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            finish_processing_after_live: false,
            deferred_threads: 2,
        }
    }
}

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Directory for raw baseband recordings
    pub recording_path: PathBuf,

    /// Worker threads for the main live pipeline
    pub live_pool_size: usize,

    /// Worker threads for each VFO live pipeline
    pub vfo_pool_size: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            recording_path: PathBuf::from("recordings"),
            live_pool_size: 8,
            vfo_pool_size: 8,
        }
    }
}

/// Restart supervisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartSettings {
    /// Seconds without a sample batch before the stream counts as stalled
    pub stall_timeout_secs: f64,

    /// Initial and post-success reopen delay
    pub backoff_floor_secs: u64,

    /// Upper bound of the doubling reopen delay
    pub backoff_cap_secs: u64,

    /// Pipeline categories paused across a restart and resumed afterwards
    pub protected_categories: Vec<String>,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            stall_timeout_secs: 5.0,
            backoff_floor_secs: 3,
            backoff_cap_secs: 60,
            protected_categories: vec!["meteor".to_string()],
        }
    }
}

/// Smallest reopen delay; a zero floor would never grow when doubled
pub const MIN_BACKOFF_SECS: u64 = 1;

impl RestartSettings {
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_secs(self.backoff_floor_secs.max(MIN_BACKOFF_SECS))
    }

    pub fn backoff_cap(&self) -> Duration {
        self.backoff_floor().max(Duration::from_secs(self.backoff_cap_secs))
    }

    /// Raise a floor below [`MIN_BACKOFF_SECS`] to it.
    pub fn clamp(&mut self) {
        if self.backoff_floor_secs < MIN_BACKOFF_SECS {
            tracing::warn!(
                "backoff_floor_secs = {} is too small, using {}",
                self.backoff_floor_secs,
                MIN_BACKOFF_SECS
            );
            self.backoff_floor_secs = MIN_BACKOFF_SECS;
        }
    }
}

/// Synthetic source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Samples per second
    pub samplerate: f64,

    /// Centre frequency the source is tuned to
    pub center_frequency_hz: f64,

    /// Offset of the generated tone from the centre frequency
    pub tone_offset_hz: f64,

    /// Samples per batch pushed into the splitter
    pub batch_size: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            samplerate: 48_000.0,
            center_frequency_hz: 137_500_000.0,
            tone_offset_hz: 1_000.0,
            batch_size: 4096,
        }
    }
}
