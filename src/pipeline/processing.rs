//! Offline processing entry point.
//!
//! [`OfflineProcessor::process`] is the orchestration boundary for pipeline
//! failures: errors are logged, surfaced as a user-visible message through
//! [`OfflineProcessor::last_error`], and never escape as panics. One offline
//! pass runs at a time.

use crate::ops::archive::{ArchiveQuota, EvictionReport};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::PipelineDefinition;
use crate::sync::lock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct OfflineProcessor {
    run_lock: Mutex<()>,
    is_processing: AtomicBool,
    last_error: Mutex<Option<String>>,
    quota: Arc<ArchiveQuota>,
}

impl OfflineProcessor {
    pub fn new(quota: Arc<ArchiveQuota>) -> Self {
        Self {
            run_lock: Mutex::new(()),
            is_processing: AtomicBool::new(false),
            last_error: Mutex::new(None),
            quota,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Message of the most recent failed pass, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn quota(&self) -> &Arc<ArchiveQuota> {
        &self.quota
    }

    /// Run `definition` over `input`, writing into `output_dir`, then enforce
    /// the archive quota on `output_dir`.
    pub fn process(
        &self,
        definition: &dyn PipelineDefinition,
        input: &Path,
        output_dir: &Path,
        params: &serde_json::Value,
    ) -> PipelineResult<Vec<PathBuf>> {
        let _guard = lock(&self.run_lock);
        self.is_processing.store(true, Ordering::SeqCst);

        let name = &definition.descriptor().name;
        tracing::info!("Starting processing pipeline {}...", name);
        tracing::debug!("Input file: {:?}", input);
        tracing::debug!("Output directory: {:?}", output_dir);

        let result = std::fs::create_dir_all(output_dir)
            .map_err(PipelineError::from)
            .and_then(|_| definition.run_offline(input, output_dir, params));

        match &result {
            Ok(files) => {
                tracing::info!("Processing with {} done, {} file(s) produced", name, files.len());
                *lock(&self.last_error) = None;
            }
            Err(e) => {
                tracing::error!("Fatal error running pipeline {}: {}", name, e);
                *lock(&self.last_error) = Some(e.to_string());
            }
        }
        self.is_processing.store(false, Ordering::SeqCst);

        let report: EvictionReport = self.quota.enforce(Some(output_dir));
        if !report.evicted.is_empty() {
            tracing::info!("Quota evicted {} run(s) after processing", report.evicted.len());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::pipeline::nodes::baseband_capture::{BasebandCapture, PRODUCTS_FILE_NAME};

    fn processor(root: &Path) -> OfflineProcessor {
        OfflineProcessor::new(Arc::new(ArchiveQuota::new(root, Arc::new(EventBus::new()))))
    }

    #[test]
    fn test_failure_sets_last_error() {
        let root = tempfile::tempdir().unwrap();
        let p = processor(root.path());
        let result = p.process(
            &BasebandCapture::new(),
            &root.path().join("missing.cf32"),
            &root.path().join("out"),
            &serde_json::json!({"samplerate": 1000.0}),
        );
        assert!(result.is_err());
        assert!(p.last_error().is_some());
        assert!(!p.is_processing());
        assert!(root.path().join("out").is_dir());
    }

    #[test]
    fn test_success_clears_last_error() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in.cf32");
        std::fs::write(&input, [0u8; 64]).unwrap();
        let p = processor(root.path());
        *lock(&p.last_error) = Some("old".into());

        let out = root.path().join("run");
        let files = p
            .process(
                &BasebandCapture::new(),
                &input,
                &out,
                &serde_json::json!({"samplerate": 1000.0}),
            )
            .unwrap();
        assert_eq!(files, vec![out.join(PRODUCTS_FILE_NAME)]);
        assert!(p.last_error().is_none());
    }
}
