//! Pipeline contract.
//!
//! A pipeline turns a sample stream into files inside one output directory.
//! The same definition serves two modes:
//!
//! - **live**: [`PipelineDefinition::build_live`] yields a [`LivePipeline`]
//!   that drains a splitter tap on a worker pool until stopped;
//! - **offline**: [`PipelineDefinition::run_offline`] reprocesses a recorded
//!   file in one pass, typically as deferred work after a live run.
//!
//! # Architecture
//!
//! ```text
//! Splitter tap ──► LivePipeline (own WorkerPool) ──► <run dir>/...
//!                                                     │
//!                   OfflineProcessor ◄── first output ┘
//! ```

pub mod error;
pub mod nodes;
pub mod pool;
pub mod processing;

pub use error::{PipelineError, PipelineResult};
pub use nodes::baseband_capture::BasebandCapture;
pub use pool::WorkerPool;
pub use processing::OfflineProcessor;

use crate::dsp::SampleStream;
use crate::events::EventBus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of a pipeline kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    /// Machine name, used in run directory names.
    pub name: String,
    /// Human-readable name.
    pub readable_name: String,
}

impl PipelineDescriptor {
    pub fn new(name: impl Into<String>, readable_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readable_name: readable_name.into(),
        }
    }

    /// Whether this pipeline falls in `category`.
    ///
    /// Matching is case-insensitive: the name starts with `<category>_`, or
    /// the readable name contains `category`.
    pub fn matches_category(&self, category: &str) -> bool {
        let category = category.to_lowercase();
        if category.is_empty() {
            return false;
        }
        self.name.to_lowercase().starts_with(&format!("{}_", category))
            || self.readable_name.to_lowercase().contains(&category)
    }
}

/// Something that can be run live against a tap or offline against a file.
pub trait PipelineDefinition: Send + Sync {
    fn descriptor(&self) -> &PipelineDescriptor;

    /// Construct a live instance writing into `output_dir`.
    ///
    /// # Arguments
    ///
    /// * `params` - pipeline parameters, including the injected `samplerate`,
    ///   `baseband_format`, `buffer_size`, `start_timestamp` and `run_id`
    /// * `output_dir` - staging directory of the run
    /// * `events` - bus on which the pipeline announces its first valid frame
    fn build_live(
        &self,
        params: &serde_json::Value,
        output_dir: &Path,
        events: Arc<EventBus>,
    ) -> PipelineResult<Box<dyn LivePipeline>>;

    /// Process `input` in one pass, returning the files produced.
    fn run_offline(
        &self,
        input: &Path,
        output_dir: &Path,
        params: &serde_json::Value,
    ) -> PipelineResult<Vec<PathBuf>>;
}

/// A running instance bound to one sample stream.
pub trait LivePipeline: Send {
    /// Begin draining `input` on `pool`.
    fn start(&mut self, input: Arc<SampleStream>, pool: &WorkerPool) -> PipelineResult<()>;

    /// Stop draining and finish every output file. Idempotent.
    fn stop(&mut self);

    /// Files produced so far, the primary product first.
    fn output_files(&self) -> Vec<PathBuf>;
}

/// Name-keyed set of available pipeline definitions.
#[derive(Default, Clone)]
pub struct PipelineRegistry {
    definitions: BTreeMap<String, Arc<dyn PipelineDefinition>>,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in pipelines.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BasebandCapture::new()));
        registry
    }

    pub fn register(&mut self, definition: Arc<dyn PipelineDefinition>) {
        let name = definition.descriptor().name.clone();
        self.definitions.insert(name, definition);
    }

    pub fn get(&self, name: &str) -> PipelineResult<Arc<dyn PipelineDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPipeline(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_matching() {
        let d = PipelineDescriptor::new("meteor_m2-x_lrpt", "METEOR M2-x LRPT");
        assert!(d.matches_category("meteor"));
        assert!(d.matches_category("METEOR"));

        let readable_only = PipelineDescriptor::new("lrpt", "Meteor LRPT");
        assert!(readable_only.matches_category("meteor"));

        let other = PipelineDescriptor::new("noaa_apt", "NOAA APT");
        assert!(!other.matches_category("meteor"));
        assert!(!other.matches_category(""));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = PipelineRegistry::with_builtin();
        assert!(registry.get(nodes::baseband_capture::BASEBAND_CAPTURE_NAME).is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(PipelineError::UnknownPipeline(_))
        ));
    }
}
