//! VFO fan-out.
//!
//! A VFO is a splitter tap shifted so that `frequency_hz` lands at DC. It
//! either feeds a live run (own worker pool, staged directory, promoted on
//! removal) or a raw recording (optional decimator, then a file sink).

use super::Recorder;
use crate::dsp::{DecimatorBlock, FileSink};
use crate::error::{IqTapError, Result, ResultExt};
use crate::ops::{baseband_file_name, run_dir_name, ActiveRun, PromotionOutcome, RunRequest, TapBinding};
use crate::pipeline::PipelineDefinition;
use crate::sync::lock;
use crate::types::unix_now_secs;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub(super) struct VfoEntry {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) frequency_hz: f64,
    run: Option<ActiveRun>,
    decimator: Option<DecimatorBlock>,
    file_sink: Option<FileSink>,
}

/// Read-only view of one VFO.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VfoSummary {
    pub id: String,
    pub name: String,
    pub frequency_hz: f64,
    /// Run id of the live pipeline, for live VFOs.
    pub run_id: Option<String>,
    /// File being written, for recording VFOs.
    pub recording: Option<PathBuf>,
}

impl VfoEntry {
    fn summary(&self) -> VfoSummary {
        VfoSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            frequency_hz: self.frequency_hz,
            run_id: self.run.as_ref().map(|r| r.record().run_id.clone()),
            recording: self.file_sink.as_ref().and_then(FileSink::recording_path),
        }
    }
}

impl Recorder {
    fn vfo_offset(&self, frequency_hz: f64) -> f64 {
        self.frequency_hz() - frequency_hz
    }

    /// Add a VFO feeding a live pipeline.
    ///
    /// On failure the tap is removed again and the VFO list is unchanged.
    pub fn add_vfo_live(
        &self,
        id: &str,
        name: &str,
        frequency_hz: f64,
        definition: Arc<dyn PipelineDefinition>,
        params: Value,
    ) -> Result<PathBuf> {
        let mut vfos = lock(&self.vfos);
        if vfos.iter().any(|v| v.id == id) {
            return Err(IqTapError::InvalidState(format!("VFO {} already exists", id)));
        }

        let samplerate = self.samplerate();
        let final_dir = self.lifecycle.archive_root().join(run_dir_name(
            unix_now_secs(),
            frequency_hz,
            &definition.descriptor().name,
        ));

        self.splitter
            .add_vfo(id, samplerate, self.vfo_offset(frequency_hz));
        let started = self.lifecycle.start(RunRequest {
            final_dir,
            definition,
            params,
            binding: TapBinding::Vfo(id.to_string()),
            samplerate,
            pool_size: self.config.recorder.vfo_pool_size,
            track_in_ops: false,
        });
        let run = match started {
            Ok(run) => run,
            Err(e) => {
                self.splitter.del_vfo(id);
                tracing::error!(tap = id, "Error adding VFO: {}", e);
                return Err(e);
            }
        };

        let final_dir = run.record().final_dir.clone();
        tracing::info!(tap = id, "Added live VFO {} at {} Hz", name, frequency_hz);
        vfos.push(VfoEntry {
            id: id.to_string(),
            name: name.to_string(),
            frequency_hz,
            run: Some(run),
            decimator: None,
            file_sink: None,
        });
        Ok(final_dir)
    }

    /// Add a VFO recording raw baseband, decimated by `decimation` when it is
    /// above 1. Returns the recording path.
    pub fn add_vfo_reco(&self, id: &str, name: &str, frequency_hz: f64, decimation: usize) -> Result<PathBuf> {
        let mut vfos = lock(&self.vfos);
        if vfos.iter().any(|v| v.id == id) {
            return Err(IqTapError::InvalidState(format!("VFO {} already exists", id)));
        }

        let samplerate = self.samplerate();
        self.splitter
            .add_vfo(id, samplerate, self.vfo_offset(frequency_hz));

        let (decimator, file_sink, path) = match self.build_vfo_recorder(id, samplerate, frequency_hz, decimation) {
            Ok(parts) => parts,
            Err(e) => {
                self.splitter.del_vfo(id);
                tracing::error!(tap = id, "Error adding VFO: {}", e);
                return Err(e);
            }
        };
        self.splitter.set_vfo_enabled(id, true);

        tracing::info!(tap = id, path = ?path, "Added recording VFO {} at {} Hz", name, frequency_hz);
        vfos.push(VfoEntry {
            id: id.to_string(),
            name: name.to_string(),
            frequency_hz,
            run: None,
            decimator,
            file_sink: Some(file_sink),
        });
        Ok(path)
    }

    fn build_vfo_recorder(
        &self,
        id: &str,
        samplerate: f64,
        frequency_hz: f64,
        decimation: usize,
    ) -> Result<(Option<DecimatorBlock>, FileSink, PathBuf)> {
        let tap = self
            .splitter
            .get_vfo_output(id)
            .ok_or_else(|| IqTapError::UnknownTap(id.to_string()))?;

        let mut decimator = (decimation > 1).then(|| DecimatorBlock::new(tap.clone(), decimation));
        let sink_input = decimator.as_ref().map(DecimatorBlock::output).unwrap_or(tap);
        let mut file_sink = FileSink::new(sink_input);

        if let Some(decimator) = decimator.as_mut() {
            decimator
                .start()
                .with_context(|| format!("Starting decimator for VFO {}", id))?;
        }
        file_sink
            .start()
            .with_context(|| format!("Starting file sink for VFO {}", id))?;

        let out_samplerate = samplerate / decimation.max(1) as f64;
        let base = self
            .config
            .recorder
            .recording_path
            .join(baseband_file_name(unix_now_secs(), out_samplerate, frequency_hz));
        let path = file_sink
            .start_recording(&base, out_samplerate)
            .with_context(|| format!("Opening VFO recording {:?}", base))?;
        Ok((decimator, file_sink, path))
    }

    /// Remove a VFO, finishing whatever it fed.
    ///
    /// A live VFO is stopped and promoted like the main run; the outcome is
    /// returned. A recording VFO is finalized and `None` is returned.
    pub fn del_vfo(&self, id: &str) -> Result<Option<PromotionOutcome>> {
        let mut vfos = lock(&self.vfos);
        let index = vfos
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| IqTapError::UnknownTap(id.to_string()))?;
        let mut vfo = vfos.remove(index);

        if let Some(sink) = vfo.file_sink.as_ref() {
            sink.stop_recording();
        }
        self.splitter.set_vfo_enabled(id, false);

        let outcome = vfo.run.take().map(|run| self.lifecycle.stop(run));

        if let Some(mut sink) = vfo.file_sink.take() {
            sink.stop();
        }
        if let Some(mut decimator) = vfo.decimator.take() {
            decimator.stop();
        }
        self.splitter.del_vfo(id);

        tracing::info!(tap = id, "Removed VFO {}", vfo.name);
        Ok(outcome)
    }

    /// Retune one VFO. Only its phase increment changes; the rotator phase
    /// carries over.
    pub fn set_vfo_frequency(&self, id: &str, frequency_hz: f64) -> Result<()> {
        let mut vfos = lock(&self.vfos);
        let vfo = vfos
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| IqTapError::UnknownTap(id.to_string()))?;
        vfo.frequency_hz = frequency_hz;
        self.splitter
            .set_vfo_offset(id, self.samplerate(), self.vfo_offset(frequency_hz));
        Ok(())
    }

    pub fn vfo_ids(&self) -> Vec<String> {
        lock(&self.vfos).iter().map(|v| v.id.clone()).collect()
    }

    pub fn vfos(&self) -> Vec<VfoSummary> {
        lock(&self.vfos).iter().map(VfoEntry::summary).collect()
    }
}
