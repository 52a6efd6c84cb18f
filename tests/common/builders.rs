//! Test data builders for archive layouts and configs

use iqtap::config::AppConfig;
use iqtap::ops::META_FILE_NAME;
use std::path::{Path, PathBuf};

/// Builder for a completed run directory under an archive root
pub struct RunDirBuilder {
    path: PathBuf,
    payload_bytes: usize,
    timestamp: Option<f64>,
}

impl RunDirBuilder {
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            path: root.join(name),
            payload_bytes: 0,
            timestamp: None,
        }
    }

    /// Size of the payload file written into the run
    pub fn payload_bytes(mut self, bytes: usize) -> Self {
        self.payload_bytes = bytes;
        self
    }

    /// Timestamp recorded in the run's metadata file
    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> PathBuf {
        std::fs::create_dir_all(&self.path).unwrap();
        std::fs::write(self.path.join("payload.bin"), vec![0u8; self.payload_bytes]).unwrap();
        if let Some(ts) = self.timestamp {
            let meta = serde_json::json!({ "timestamp": ts });
            std::fs::write(self.path.join(META_FILE_NAME), meta.to_string()).unwrap();
        }
        self.path
    }
}

/// Builder for an [`AppConfig`] rooted in a temporary directory
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new(root: &Path) -> Self {
        let mut config = AppConfig::default();
        config.archive.root = root.join("images");
        config.archive.deferred_threads = 1;
        config.recorder.recording_path = root.join("recordings");
        config.recorder.live_pool_size = 2;
        config.recorder.vfo_pool_size = 2;
        config.source.samplerate = 8000.0;
        config.source.batch_size = 256;
        Self { config }
    }

    pub fn samplerate(mut self, samplerate: f64) -> Self {
        self.config.source.samplerate = samplerate;
        self
    }

    pub fn center_frequency(mut self, frequency_hz: f64) -> Self {
        self.config.source.center_frequency_hz = frequency_hz;
        self
    }

    pub fn stall_timeout(mut self, seconds: f64) -> Self {
        self.config.restart.stall_timeout_secs = seconds;
        self
    }

    pub fn finish_processing_after_live(mut self, enabled: bool) -> Self {
        self.config.archive.finish_processing_after_live = enabled;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_dir_builder() {
        let root = tempfile::tempdir().unwrap();
        let run = RunDirBuilder::new(root.path(), "r1")
            .payload_bytes(10)
            .timestamp(5.0)
            .build();
        assert_eq!(std::fs::metadata(run.join("payload.bin")).unwrap().len(), 10);
        assert!(run.join(META_FILE_NAME).exists());
    }
}
