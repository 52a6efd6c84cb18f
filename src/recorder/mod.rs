//! Recorder orchestration
//!
//! [`Recorder`] owns one hardware source, the splitter it feeds and every
//! consumer attached to the splitter:
//!
//! ```text
//!                        ┌─► "live"   ──► main live run (RunLifecycleManager)
//! source ──► Splitter ───┼─► "record" ──► FileSink (raw baseband)
//!                        └─► VFO taps ──► VFO live runs / VFO recordings
//! ```
//!
//! All methods take `&self`; the recorder is meant to be shared between a
//! control thread and whatever drives [`Recorder::handle_source_restart`].
//!
//! # Locks
//!
//! Each concern has its own mutex. When more than one is held they are taken
//! in this order:
//!
//! ```text
//! supervisor → live | vfos | record_sink → source | frequency → lifecycle sequence → splitter
//! ```
//!
//! `live` and `vfos` are held across a whole run start so that a concurrent
//! start for the same slot sees the first one finished.

mod restart;
mod vfo;

pub use vfo::VfoSummary;

use crate::backend::{RestartSupervisor, SampleSource, SupervisorState};
use crate::config::AppConfig;
use crate::dsp::{FileSink, Splitter};
use crate::error::{IqTapError, Result, ResultExt};
use crate::events::EventBus;
use crate::ops::{
    baseband_file_name, run_dir_name, ActiveRun, ArchiveQuota, OpsState, PromotionOutcome, RunLifecycleManager,
    RunRecord, RunRequest, TapBinding,
};
use crate::pipeline::{OfflineProcessor, PipelineDefinition};
use crate::sync::lock;
use crate::types::{unix_now_secs, RxStatus, SdrStatus, SourceStatus};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use vfo::VfoEntry;

/// Named splitter output feeding the main live pipeline
pub const LIVE_TAP: &str = "live";

/// Named splitter output feeding the raw baseband recorder
pub const RECORD_TAP: &str = "record";

struct SourceSlot {
    source: Box<dyn SampleSource>,
    opened: bool,
    started: bool,
}

/// What the last `start_processing` asked for, kept so a paused run can be
/// started again after a source restart.
#[derive(Clone)]
struct LiveRequest {
    definition: Arc<dyn PipelineDefinition>,
    params: Value,
    output_dir: Option<PathBuf>,
}

#[derive(Default)]
struct LiveSlot {
    run: Option<ActiveRun>,
    last_request: Option<LiveRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Statuses {
    sdr: SdrStatus,
    rx: RxStatus,
}

pub struct Recorder {
    config: AppConfig,
    bus: Arc<EventBus>,
    ops: Arc<OpsState>,
    splitter: Arc<Splitter>,
    lifecycle: Arc<RunLifecycleManager>,
    source: Mutex<SourceSlot>,
    live: Mutex<LiveSlot>,
    record_sink: Mutex<FileSink>,
    vfos: Mutex<Vec<VfoEntry>>,
    supervisor: Mutex<RestartSupervisor>,
    statuses: Mutex<Statuses>,
    last_source_error: Mutex<Option<String>>,
    frequency_hz: Mutex<f64>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("frequency_hz", &self.frequency_hz())
            .field("statuses", &*lock(&self.statuses))
            .field("vfos", &self.vfo_ids())
            .finish()
    }
}

impl Recorder {
    /// Build a recorder around `source`. The source is neither opened nor
    /// started until [`Recorder::start`].
    pub fn new(config: AppConfig, source: Box<dyn SampleSource>, bus: Arc<EventBus>) -> Result<Self> {
        let ops = Arc::new(OpsState::new());
        ops.register_event_handlers(&bus);

        let splitter = Arc::new(Splitter::new(source.output_stream()));
        splitter.add_output(LIVE_TAP);
        splitter.add_output(RECORD_TAP);

        let quota = Arc::new(ArchiveQuota::new(config.archive.root.clone(), bus.clone()));
        let processor = Arc::new(OfflineProcessor::new(quota));
        let lifecycle = RunLifecycleManager::new(
            splitter.clone(),
            ops.clone(),
            bus.clone(),
            processor,
            config.archive.deferred_threads,
        )?;
        lifecycle.set_finish_processing_after_live(config.archive.finish_processing_after_live);

        let record_stream = splitter
            .get_output(RECORD_TAP)
            .ok_or_else(|| IqTapError::UnknownTap(RECORD_TAP.to_string()))?;
        let mut record_sink = FileSink::new(record_stream);
        record_sink.start().context("Starting baseband recorder")?;

        let supervisor = RestartSupervisor::new(config.restart.clone());
        let frequency_hz = config.source.center_frequency_hz;

        Ok(Self {
            config,
            bus,
            ops,
            splitter,
            lifecycle: Arc::new(lifecycle),
            source: Mutex::new(SourceSlot {
                source,
                opened: false,
                started: false,
            }),
            live: Mutex::new(LiveSlot::default()),
            record_sink: Mutex::new(record_sink),
            vfos: Mutex::new(Vec::new()),
            supervisor: Mutex::new(supervisor),
            statuses: Mutex::new(Statuses {
                sdr: SdrStatus::Offline,
                rx: RxStatus::Stopped,
            }),
            last_source_error: Mutex::new(None),
            frequency_hz: Mutex::new(frequency_hz),
        })
    }

    // ==================== Accessors ====================

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ops(&self) -> &Arc<OpsState> {
        &self.ops
    }

    pub fn splitter(&self) -> &Arc<Splitter> {
        &self.splitter
    }

    pub fn lifecycle(&self) -> &Arc<RunLifecycleManager> {
        &self.lifecycle
    }

    pub fn samplerate(&self) -> f64 {
        lock(&self.source).source.samplerate()
    }

    pub fn source_status(&self) -> SourceStatus {
        lock(&self.source).source.status()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.source).started
    }

    pub fn sdr_status(&self) -> SdrStatus {
        lock(&self.statuses).sdr
    }

    pub fn rx_status(&self) -> RxStatus {
        lock(&self.statuses).rx
    }

    /// Message of the last failed source start or reopen.
    pub fn last_source_error(&self) -> Option<String> {
        lock(&self.last_source_error).clone()
    }

    pub fn frequency_hz(&self) -> f64 {
        *lock(&self.frequency_hz)
    }

    /// Retune the centre frequency. Every VFO keeps its absolute frequency,
    /// so their offsets are recomputed.
    pub fn set_frequency(&self, frequency_hz: f64) {
        *lock(&self.frequency_hz) = frequency_hz;
        let samplerate = self.samplerate();
        for vfo in lock(&self.vfos).iter() {
            self.splitter
                .set_vfo_offset(&vfo.id, samplerate, frequency_hz - vfo.frequency_hz);
        }
        tracing::debug!("Centre frequency set to {} Hz", frequency_hz);
    }

    fn set_sdr_status(&self, status: SdrStatus) {
        let mut statuses = lock(&self.statuses);
        if statuses.sdr != status {
            statuses.sdr = status;
            tracing::info!(sdr_status = status.as_str(), "SDR status changed");
        }
    }

    fn set_rx_status(&self, status: RxStatus) {
        let mut statuses = lock(&self.statuses);
        if statuses.rx != status {
            statuses.rx = status;
            tracing::info!(rx_status = status.as_str(), "RX status changed");
        }
    }

    // ==================== Source ====================

    /// Open (if needed) and start the source, then the splitter data plane.
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.source);
        if slot.started {
            return Ok(());
        }

        match self.start_locked(&mut slot) {
            Ok(()) => {
                slot.started = true;
                drop(slot);
                *lock(&self.last_source_error) = None;
                self.set_sdr_status(SdrStatus::Online);
                Ok(())
            }
            Err(e) => {
                slot.source.set_status(SourceStatus::Error);
                drop(slot);
                tracing::error!("Failed to start source: {}", e);
                *lock(&self.last_source_error) = Some(e.to_string());
                self.set_sdr_status(SdrStatus::Error);
                Err(e)
            }
        }
    }

    fn start_locked(&self, slot: &mut SourceSlot) -> Result<()> {
        if slot.source.samplerate() <= 0.0 {
            return Err(IqTapError::Source("Samplerate not set!".to_string()));
        }
        if !slot.opened {
            slot.source.open()?;
            slot.opened = true;
        }
        slot.source.start()?;
        slot.source.set_status(SourceStatus::Online);

        self.splitter.set_input(slot.source.output_stream());
        if let Err(e) = self.splitter.start() {
            slot.source.stop();
            return Err(e.into());
        }
        tracing::info!("{} started at {} SPS", slot.source.name(), slot.source.samplerate());
        Ok(())
    }

    /// Stop the source, then the splitter data plane. Taps and runs are left
    /// as they are.
    pub fn stop(&self) {
        let mut slot = lock(&self.source);
        if !slot.started {
            return;
        }
        slot.source.stop();
        self.splitter.stop();
        slot.started = false;
        slot.source.set_status(SourceStatus::Offline);
        drop(slot);
        self.set_sdr_status(SdrStatus::Offline);
    }

    // ==================== Main live run ====================

    /// Start the main live pipeline on the [`LIVE_TAP`] output.
    ///
    /// With `output_dir` unset, the run directory is named automatically under
    /// the archive root from the current time, centre frequency and pipeline.
    pub fn start_processing(
        &self,
        definition: Arc<dyn PipelineDefinition>,
        params: Value,
        output_dir: Option<PathBuf>,
    ) -> Result<RunRecord> {
        let request = LiveRequest {
            definition,
            params,
            output_dir,
        };
        let mut live = lock(&self.live);
        if live.run.is_some() {
            return Err(IqTapError::InvalidState("Live pipeline already running".to_string()));
        }
        live.last_request = Some(request.clone());

        match self.start_live(request) {
            Ok(run) => {
                let record = run.record().clone();
                live.run = Some(run);
                drop(live);
                self.set_rx_status(RxStatus::Running);
                Ok(record)
            }
            Err(e) => {
                drop(live);
                tracing::error!("Failed to start processing: {}", e);
                self.set_rx_status(RxStatus::Error);
                Err(e)
            }
        }
    }

    fn start_live(&self, request: LiveRequest) -> Result<ActiveRun> {
        let final_dir = match request.output_dir {
            Some(dir) => dir,
            None => self.lifecycle.archive_root().join(run_dir_name(
                unix_now_secs(),
                self.frequency_hz(),
                &request.definition.descriptor().name,
            )),
        };
        self.lifecycle.start(RunRequest {
            final_dir,
            definition: request.definition,
            params: request.params,
            binding: TapBinding::Output(LIVE_TAP.to_string()),
            samplerate: self.samplerate(),
            pool_size: self.config.recorder.live_pool_size,
            track_in_ops: true,
        })
    }

    /// Stop and promote the main live run, if one is running.
    pub fn stop_processing(&self) -> Option<PromotionOutcome> {
        let run = lock(&self.live).run.take()?;
        let outcome = self.lifecycle.stop(run);
        self.set_rx_status(RxStatus::Stopped);
        Some(outcome)
    }

    /// Start the main live pipeline again with the last request.
    fn resume_processing(&self) -> Result<()> {
        let request = lock(&self.live)
            .last_request
            .clone()
            .ok_or_else(|| IqTapError::InvalidState("No live pipeline to resume".to_string()))?;
        self.start_processing(request.definition, request.params, request.output_dir)
            .map(|_| ())
    }

    pub fn is_processing(&self) -> bool {
        lock(&self.live).run.is_some()
    }

    /// Record of the main live run, if one is running.
    pub fn live_record(&self) -> Option<RunRecord> {
        lock(&self.live).run.as_ref().map(|run| run.record().clone())
    }

    // ==================== Raw recording ====================

    /// Arm the baseband recorder on the [`RECORD_TAP`] output. Returns the
    /// path of the `.cf32` file being written.
    pub fn start_recording(&self) -> Result<PathBuf> {
        let samplerate = self.samplerate();
        let base = self.config.recorder.recording_path.join(baseband_file_name(
            unix_now_secs(),
            samplerate,
            self.frequency_hz(),
        ));

        let sink = lock(&self.record_sink);
        self.splitter.set_enabled(RECORD_TAP, true);
        match sink.start_recording(&base, samplerate) {
            Ok(path) => Ok(path),
            Err(e) => {
                self.splitter.set_enabled(RECORD_TAP, false);
                tracing::error!(path = ?base, "Failed to start recording: {}", e);
                Err(e.into())
            }
        }
    }

    /// Finalize the raw recording, returning its path if one was armed.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        let sink = lock(&self.record_sink);
        let path = sink.stop_recording();
        self.splitter.set_enabled(RECORD_TAP, false);
        path
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.record_sink).is_recording()
    }

    // ==================== Supervision ====================

    /// Run one restart-supervisor tick. Call periodically from a control loop.
    pub fn handle_source_restart(&self) -> SupervisorState {
        self.handle_source_restart_at(Instant::now())
    }

    /// [`Recorder::handle_source_restart`] with an explicit clock reading.
    pub fn handle_source_restart_at(&self, now: Instant) -> SupervisorState {
        lock(&self.supervisor).tick(self, now)
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        lock(&self.supervisor).state()
    }

    /// When the supervisor will next try to reopen the source.
    pub fn restart_deadline(&self) -> Option<Instant> {
        lock(&self.supervisor).deadline()
    }

    /// Stop every run, recording and VFO, then the source.
    pub fn shutdown(&self) {
        self.stop_recording();
        self.stop_processing();
        for id in self.vfo_ids() {
            if let Err(e) = self.del_vfo(&id) {
                tracing::warn!("Failed to remove VFO {}: {}", id, e);
            }
        }
        self.stop();
        let mut slot = lock(&self.source);
        if slot.opened {
            slot.source.close();
            slot.opened = false;
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(all(test, feature = "mock-source"))]
mod tests {
    use super::*;
    use crate::backend::{MockSignal, MockSource};
    use crate::dsp::read_cf32;
    use crate::pipeline::nodes::BasebandCapture;
    use crate::types::Sample;
    use serde_json::json;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.archive.root = root.join("images");
        config.recorder.recording_path = root.join("recordings");
        config.recorder.live_pool_size = 2;
        config.recorder.vfo_pool_size = 2;
        config.source.samplerate = 8000.0;
        config
    }

    fn recorder(root: &std::path::Path) -> Recorder {
        let config = test_config(root);
        let source = MockSource::new(config.source.samplerate)
            .with_signal(MockSignal::Constant(Sample::new(0.25, 0.5)))
            .with_batch_size(256);
        Recorder::new(config, Box::new(source), Arc::new(EventBus::new())).unwrap()
    }

    #[test]
    fn test_start_and_stop_source() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path());
        assert_eq!(rec.sdr_status(), SdrStatus::Offline);

        rec.start().unwrap();
        assert!(rec.is_started());
        assert_eq!(rec.source_status(), SourceStatus::Online);
        assert_eq!(rec.sdr_status(), SdrStatus::Online);

        rec.stop();
        assert!(!rec.is_started());
        assert_eq!(rec.source_status(), SourceStatus::Offline);
        assert_eq!(rec.sdr_status(), SdrStatus::Offline);
    }

    #[test]
    fn test_start_fails_without_samplerate() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(
            test_config(dir.path()),
            Box::new(MockSource::new(0.0)),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        assert!(rec.start().is_err());
        assert_eq!(rec.source_status(), SourceStatus::Error);
        assert_eq!(rec.sdr_status(), SdrStatus::Error);
        assert!(rec.last_source_error().unwrap().contains("Samplerate"));
    }

    #[test]
    fn test_processing_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path());
        rec.start().unwrap();

        let record = rec
            .start_processing(Arc::new(BasebandCapture::new()), json!({}), None)
            .unwrap();
        assert!(record.tmp_dir.exists());
        assert!(record.final_dir.starts_with(dir.path().join("images")));
        assert_eq!(rec.rx_status(), RxStatus::Running);
        assert!(rec.ops().snapshot().pipeline_active);

        assert!(rec
            .start_processing(Arc::new(BasebandCapture::new()), json!({}), None)
            .is_err());

        std::thread::sleep(std::time::Duration::from_millis(100));
        let outcome = rec.stop_processing().unwrap();
        assert!(outcome.promoted());
        assert!(record.final_dir.exists());
        assert!(!record.tmp_dir.exists());
        assert_eq!(rec.rx_status(), RxStatus::Stopped);
        assert!(!rec.ops().snapshot().pipeline_active);
        assert!(rec.stop_processing().is_none());
    }

    #[test]
    fn test_raw_recording() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(dir.path());
        rec.start().unwrap();

        let path = rec.start_recording().unwrap();
        assert!(rec.is_recording());
        assert!(path.starts_with(dir.path().join("recordings")));
        assert_eq!(path.extension().unwrap(), "cf32");

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(rec.stop_recording(), Some(path.clone()));
        assert!(!rec.is_recording());
        assert!(!rec.splitter().is_enabled(RECORD_TAP));

        let samples = read_cf32(&path).unwrap();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| *s == Sample::new(0.25, 0.5)));
    }
}
