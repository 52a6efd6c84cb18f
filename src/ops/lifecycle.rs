//! Run Lifecycle Manager.
//!
//! A run moves through `Idle → Staging → Active → Stopping → {Promoted |
//! Orphaned}`:
//!
//! 1. **Staging** - the sibling temporary directory is cleared and created.
//!    Failure aborts the start with [`IqTapError::Staging`]; nothing is bound.
//! 2. **Active** - a live pipeline drains a freshly reset splitter tap on its
//!    own worker pool, writing into the temporary directory.
//! 3. **Stopping** - the tap is disabled, the pipeline stopped, its outputs
//!    collected and [`RunFinalizedEvent`] fired.
//! 4. **Promoted / Orphaned** - the temporary directory is renamed to its
//!    final name. If the rename fails the run stays where it is and every
//!    later step uses the temporary location instead.
//!
//! Deferred processing and quota eviction are queued on a shared pool and
//! never block [`RunLifecycleManager::stop`]. Queued jobs are not cancelled
//! and are not persisted across process exit.
//!
//! Start and stop sequences are serialized end to end by one mutex.

use crate::dsp::{SampleStream, Splitter, STREAM_BUFFER_SIZE};
use crate::error::{IqTapError, Result};
use crate::events::{EventBus, RunFinalizedEvent};
use crate::ops::state::{build_temp_run_dir, run_id_for, OpsState};
use crate::pipeline::{LivePipeline, OfflineProcessor, PipelineDefinition, PipelineDescriptor, WorkerPool};
use crate::sync::lock;
use crate::types::unix_now_secs;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Staging,
    Active,
    Stopping,
    Promoted,
    /// Promotion failed; the run's data remains in its temporary directory.
    Orphaned,
}

/// Identity and locations of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub final_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub start_timestamp: f64,
    pub pipeline_params: Value,
}

/// Splitter tap a run drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapBinding {
    /// A named output; must already exist.
    Output(String),
    /// A VFO output; must already exist.
    Vfo(String),
}

impl TapBinding {
    pub fn id(&self) -> &str {
        match self {
            TapBinding::Output(id) | TapBinding::Vfo(id) => id,
        }
    }

    /// Replace the tap's stream with a fresh, disabled one and return it.
    fn reset(&self, splitter: &Splitter) -> Option<Arc<SampleStream>> {
        match self {
            TapBinding::Output(id) => {
                splitter.reset_output(id);
                splitter.get_output(id)
            }
            TapBinding::Vfo(id) => {
                splitter.reset_vfo(id);
                splitter.get_vfo_output(id)
            }
        }
    }

    fn set_enabled(&self, splitter: &Splitter, enabled: bool) {
        match self {
            TapBinding::Output(id) => splitter.set_enabled(id, enabled),
            TapBinding::Vfo(id) => splitter.set_vfo_enabled(id, enabled),
        }
    }
}

/// Everything needed to start one live run.
pub struct RunRequest {
    pub final_dir: PathBuf,
    pub definition: Arc<dyn PipelineDefinition>,
    /// User parameters; the live parameters are injected on top.
    pub params: Value,
    pub binding: TapBinding,
    pub samplerate: f64,
    /// Threads in the run's own worker pool.
    pub pool_size: usize,
    /// Whether this run is the one reported through [`OpsState`].
    pub track_in_ops: bool,
}

/// A started run. Hand it back to [`RunLifecycleManager::stop`] to finish it.
pub struct ActiveRun {
    record: RunRecord,
    state: RunState,
    binding: TapBinding,
    definition: Arc<dyn PipelineDefinition>,
    pipeline: Box<dyn LivePipeline>,
    pool: Option<WorkerPool>,
    tracked: bool,
}

impl std::fmt::Debug for ActiveRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRun")
            .field("record", &self.record)
            .field("state", &self.state)
            .field("binding", &self.binding)
            .field("pipeline", &self.definition.descriptor().name)
            .finish()
    }
}

impl ActiveRun {
    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn binding(&self) -> &TapBinding {
        &self.binding
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        self.definition.descriptor()
    }

    pub fn definition(&self) -> &Arc<dyn PipelineDefinition> {
        &self.definition
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        self.pipeline.output_files()
    }
}

/// Result of stopping a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionOutcome {
    pub run_id: String,
    /// [`RunState::Promoted`] or [`RunState::Orphaned`].
    pub state: RunState,
    /// Where the run's files now live.
    pub effective_dir: PathBuf,
    /// Output files, remapped into `effective_dir`.
    pub output_files: Vec<PathBuf>,
    pub deferred_processing: bool,
}

impl PromotionOutcome {
    pub fn promoted(&self) -> bool {
        self.state == RunState::Promoted
    }
}

pub struct RunLifecycleManager {
    splitter: Arc<Splitter>,
    ops: Arc<OpsState>,
    bus: Arc<EventBus>,
    processor: Arc<OfflineProcessor>,
    deferred: WorkerPool,
    finish_processing_after_live: AtomicBool,
    sequence: Mutex<()>,
}

impl std::fmt::Debug for RunLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLifecycleManager")
            .field("archive", &self.processor.quota().root())
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl RunLifecycleManager {
    /// # Arguments
    ///
    /// * `deferred_threads` - size of the shared pool running deferred
    ///   processing and quota eviction
    pub fn new(
        splitter: Arc<Splitter>,
        ops: Arc<OpsState>,
        bus: Arc<EventBus>,
        processor: Arc<OfflineProcessor>,
        deferred_threads: usize,
    ) -> Result<Self> {
        Ok(Self {
            splitter,
            ops,
            bus,
            processor,
            deferred: WorkerPool::new("deferred", deferred_threads)?,
            finish_processing_after_live: AtomicBool::new(false),
            sequence: Mutex::new(()),
        })
    }

    /// Queue a full offline pass over the first output of every finished run.
    pub fn set_finish_processing_after_live(&self, enabled: bool) {
        self.finish_processing_after_live.store(enabled, Ordering::SeqCst);
    }

    pub fn finish_processing_after_live(&self) -> bool {
        self.finish_processing_after_live.load(Ordering::SeqCst)
    }

    pub fn archive_root(&self) -> &Path {
        self.processor.quota().root()
    }

    pub fn ops(&self) -> &Arc<OpsState> {
        &self.ops
    }

    /// Stage a run directory and bind a live pipeline to the requested tap.
    pub fn start(&self, request: RunRequest) -> Result<ActiveRun> {
        let _sequence = lock(&self.sequence);

        let final_dir = request.final_dir;
        let tmp_dir = build_temp_run_dir(&final_dir);
        let run_id = run_id_for(&final_dir);

        tracing::debug!(run_id = %run_id, path = ?tmp_dir, "Staging run");
        prepare_live_output_dirs(&tmp_dir)?;

        let start_timestamp = unix_now_secs();
        let params = inject_live_params(request.params, request.samplerate, start_timestamp, &run_id);
        let record = RunRecord {
            run_id: run_id.clone(),
            final_dir,
            tmp_dir,
            start_timestamp,
            pipeline_params: params,
        };

        if request.track_in_ops {
            self.ops
                .set_live_run(&run_id, &record.tmp_dir, &record.final_dir, start_timestamp);
        }

        let bound = self.bind(&record, &request.binding, request.definition.as_ref(), request.pool_size);
        let (pipeline, pool) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(run_id = %run_id, "Failed to start live pipeline: {}", e);
                if request.track_in_ops {
                    self.ops.clear_live_run();
                }
                if let Err(rm) = std::fs::remove_dir_all(&record.tmp_dir) {
                    tracing::warn!(path = ?record.tmp_dir, "Failed to remove staging directory: {}", rm);
                }
                return Err(e);
            }
        };

        tracing::info!(
            run_id = %run_id,
            tap = request.binding.id(),
            "Live run started with {}",
            request.definition.descriptor().name
        );
        Ok(ActiveRun {
            record,
            state: RunState::Active,
            binding: request.binding,
            definition: request.definition,
            pipeline,
            pool: Some(pool),
            tracked: request.track_in_ops,
        })
    }

    fn bind(
        &self,
        record: &RunRecord,
        binding: &TapBinding,
        definition: &dyn PipelineDefinition,
        pool_size: usize,
    ) -> Result<(Box<dyn LivePipeline>, WorkerPool)> {
        let stream = binding
            .reset(&self.splitter)
            .ok_or_else(|| IqTapError::UnknownTap(binding.id().to_string()))?;
        let pool = WorkerPool::new(&format!("live-{}", binding.id()), pool_size)?;
        let mut pipeline = definition.build_live(&record.pipeline_params, &record.tmp_dir, self.bus.clone())?;
        pipeline.start(stream, &pool)?;
        binding.set_enabled(&self.splitter, true);
        Ok((pipeline, pool))
    }

    /// Stop a run and promote its directory.
    ///
    /// Never fails: a failed rename leaves the run [`RunState::Orphaned`] in
    /// its temporary directory, which then serves every downstream step.
    pub fn stop(&self, mut run: ActiveRun) -> PromotionOutcome {
        let _sequence = lock(&self.sequence);
        run.state = RunState::Stopping;
        let run_id = run.record.run_id.clone();

        run.binding.set_enabled(&self.splitter, false);
        run.pipeline.stop();
        let output_files = run.pipeline.output_files();
        drop(run.pool.take());

        self.bus.fire_event(RunFinalizedEvent {
            run_id: run_id.clone(),
            output_dir: run.record.final_dir.display().to_string(),
        });

        let (state, effective_dir) = match finalize_live_output_dir(&run.record.tmp_dir, &run.record.final_dir) {
            Ok(()) => (RunState::Promoted, run.record.final_dir.clone()),
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    "Failed to promote {:?} to {:?}, keeping staged data: {}",
                    run.record.tmp_dir,
                    run.record.final_dir,
                    e
                );
                (RunState::Orphaned, run.record.tmp_dir.clone())
            }
        };
        run.state = state;

        let output_files: Vec<PathBuf> = output_files
            .iter()
            .map(|p| remap_output_path(p, &run.record.tmp_dir, &effective_dir))
            .collect();

        if run.tracked {
            self.ops.set_pipeline_active(false);
        }

        let deferred_processing = self.finish_processing_after_live() && !output_files.is_empty();
        if deferred_processing {
            self.defer_processing(&run, &output_files[0], &effective_dir);
        } else {
            self.defer_quota(&effective_dir);
        }

        tracing::info!(run_id = %run_id, path = ?effective_dir, "Run finished ({:?})", state);
        PromotionOutcome {
            run_id,
            state,
            effective_dir,
            output_files,
            deferred_processing,
        }
    }

    fn defer_processing(&self, run: &ActiveRun, input: &Path, output_dir: &Path) {
        let processor = self.processor.clone();
        let definition = run.definition.clone();
        let params = run.record.pipeline_params.clone();
        let input = input.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let queued = self.deferred.push(move |_| {
            // Failures are recorded by the processor.
            let _ = processor.process(definition.as_ref(), &input, &output_dir, &params);
        });
        if let Err(e) = queued {
            tracing::warn!(run_id = %run.record.run_id, "Deferred processing not queued: {}", e);
        }
    }

    fn defer_quota(&self, output_dir: &Path) {
        let quota = self.processor.quota().clone();
        let output_dir = output_dir.to_path_buf();
        if let Err(e) = self.deferred.push(move |_| {
            quota.enforce(Some(output_dir.as_path()));
        }) {
            tracing::warn!("Quota enforcement not queued: {}", e);
        }
    }
}

/// Clear any stale staging directory and create a fresh one.
pub fn prepare_live_output_dirs(tmp_dir: &Path) -> Result<()> {
    let staging = |source| IqTapError::Staging {
        path: tmp_dir.to_path_buf(),
        source,
    };
    if tmp_dir.exists() {
        tracing::warn!(path = ?tmp_dir, "Removing stale staging directory");
        std::fs::remove_dir_all(tmp_dir).map_err(staging)?;
    }
    std::fs::create_dir_all(tmp_dir).map_err(staging)
}

/// Rename `tmp_dir` to `final_dir`. Succeeds without touching the filesystem
/// when either path is empty or both are the same.
pub fn finalize_live_output_dir(tmp_dir: &Path, final_dir: &Path) -> std::io::Result<()> {
    if tmp_dir.as_os_str().is_empty() || final_dir.as_os_str().is_empty() || tmp_dir == final_dir {
        return Ok(());
    }
    std::fs::rename(tmp_dir, final_dir)
}

/// Move `path` from under `from` to the same relative location under `to`.
/// Paths outside `from` are returned unchanged.
pub fn remap_output_path(path: &Path, from: &Path, to: &Path) -> PathBuf {
    if from == to {
        return path.to_path_buf();
    }
    match path.strip_prefix(from) {
        Ok(rel) => to.join(rel),
        Err(_) => path.to_path_buf(),
    }
}

/// Add the parameters every live pipeline receives.
pub fn inject_live_params(params: Value, samplerate: f64, start_timestamp: f64, run_id: &str) -> Value {
    let mut params = match params {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            tracing::warn!("Ignoring non-object pipeline parameters: {}", other);
            serde_json::Map::new()
        }
    };
    params.insert("samplerate".into(), samplerate.into());
    params.insert("baseband_format".into(), "cf32".into());
    params.insert("buffer_size".into(), STREAM_BUFFER_SIZE.into());
    params.insert("start_timestamp".into(), start_timestamp.into());
    params.insert("run_id".into(), run_id.into());
    Value::Object(params)
}

fn utc(timestamp: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.floor() as i64, 0).unwrap_or_default()
}

/// Directory name for an automatically placed run.
pub fn run_dir_name(timestamp: f64, frequency_hz: f64, pipeline: &str) -> String {
    format!(
        "{}_{}_{:.3}MHz",
        utc(timestamp).format("%Y-%m-%d_%H-%M"),
        pipeline,
        frequency_hz / 1e6
    )
}

/// Base name (without extension) of a raw recording.
pub fn baseband_file_name(timestamp: f64, samplerate: f64, frequency_hz: f64) -> String {
    format!(
        "{}_{}SPS_{}Hz",
        utc(timestamp).format("%Y-%m-%d_%H-%M-%S"),
        samplerate.round() as i64,
        frequency_hz.round() as i64
    )
}
