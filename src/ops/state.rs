//! Process-wide operational state and run-directory naming helpers.
//!
//! [`OpsState`] is an injectable, single-writer/many-reader holder. Readers
//! always receive a copied [`OpsStateSnapshot`]; no reference into the guarded
//! value ever escapes the lock.
//!
//! An in-progress run lives in a sibling directory whose file name carries the
//! [`TEMP_RUN_PREFIX`] marker. Archive readers must ignore such directories.

use crate::events::{EventBus, FifoDeleteEvent, FirstValidFrameEvent, RunFinalizedEvent};
use crate::sync::lock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Reserved prefix applied to the last path component of a staged run.
pub const TEMP_RUN_PREFIX: &str = ".tmp_";

/// Copy of the operational state at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OpsStateSnapshot {
    pub pipeline_active: bool,
    pub first_valid_frame: bool,
    pub run_finalized: bool,
    pub fifo_delete: bool,
    pub live_run_id: String,
    pub live_tmp_dir: String,
    pub live_final_dir: String,
    pub live_start_timestamp: f64,
    pub last_finalized_run_id: String,
    pub last_deleted_run_id: String,
    pub last_event: String,
}

impl OpsStateSnapshot {
    /// Whether an event for `run_id` concerns the tracked live run.
    fn tracks(&self, run_id: &str) -> bool {
        self.live_run_id.is_empty() || self.live_run_id == run_id
    }
}

#[derive(Debug, Default)]
pub struct OpsState {
    state: Mutex<OpsStateSnapshot>,
    handlers_registered: AtomicBool,
}

impl OpsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> OpsStateSnapshot {
        lock(&self.state).clone()
    }

    /// Track a newly started live run and reset its per-run flags.
    pub fn set_live_run(&self, run_id: &str, tmp_dir: &Path, final_dir: &Path, start_timestamp: f64) {
        let mut state = lock(&self.state);
        state.live_run_id = run_id.to_string();
        state.live_tmp_dir = tmp_dir.display().to_string();
        state.live_final_dir = final_dir.display().to_string();
        state.live_start_timestamp = start_timestamp;
        state.pipeline_active = true;
        state.first_valid_frame = false;
        state.run_finalized = false;
    }

    /// Forget the tracked live run, as if none had been started.
    pub fn clear_live_run(&self) {
        let mut state = lock(&self.state);
        state.live_run_id.clear();
        state.live_tmp_dir.clear();
        state.live_final_dir.clear();
        state.live_start_timestamp = 0.0;
        state.pipeline_active = false;
    }

    pub fn set_pipeline_active(&self, active: bool) {
        lock(&self.state).pipeline_active = active;
    }

    /// Subscribe this state to the ops events on `bus`. Idempotent.
    pub fn register_event_handlers(self: &Arc<Self>, bus: &EventBus) {
        if self.handlers_registered.swap(true, Ordering::SeqCst) {
            return;
        }

        let ops = self.clone();
        bus.register_handler::<FirstValidFrameEvent, _>(move |evt| {
            let run_id = normalize_run_id(&evt.run_id);
            {
                let mut state = lock(&ops.state);
                state.last_event = "first_valid_frame".to_string();
                if state.tracks(run_id) {
                    state.first_valid_frame = true;
                }
            }
            tracing::info!(run_id, source = %evt.source, "Event first_valid_frame");
        });

        let ops = self.clone();
        bus.register_handler::<RunFinalizedEvent, _>(move |evt| {
            let run_id = normalize_run_id(&evt.run_id);
            {
                let mut state = lock(&ops.state);
                state.last_event = "run_finalized".to_string();
                state.last_finalized_run_id = run_id.to_string();
                if state.tracks(run_id) {
                    state.run_finalized = true;
                    state.pipeline_active = false;
                }
            }
            tracing::info!(run_id, output_dir = %evt.output_dir, "Event run_finalized");
        });

        let ops = self.clone();
        bus.register_handler::<FifoDeleteEvent, _>(move |evt| {
            let run_id = normalize_run_id(&evt.run_id);
            {
                let mut state = lock(&ops.state);
                state.last_event = "fifo_delete".to_string();
                state.last_deleted_run_id = run_id.to_string();
                state.fifo_delete = true;
            }
            tracing::info!(run_id, output_dir = %evt.output_dir, "Event fifo_delete");
        });
    }
}

/// Strip the temporary-run marker from a directory name.
pub fn normalize_run_id(name: &str) -> &str {
    name.strip_prefix(TEMP_RUN_PREFIX).unwrap_or(name)
}

/// Whether a directory name marks an in-progress run.
pub fn is_temp_run_dir(name: &str) -> bool {
    name.starts_with(TEMP_RUN_PREFIX)
}

/// Staging directory for `final_dir`: a sibling whose file name carries the
/// temporary marker. A path without a file name is returned unchanged.
pub fn build_temp_run_dir(final_dir: &Path) -> PathBuf {
    match final_dir.file_name() {
        Some(name) => {
            let tmp_name = format!("{}{}", TEMP_RUN_PREFIX, name.to_string_lossy());
            final_dir.with_file_name(tmp_name)
        }
        None => final_dir.to_path_buf(),
    }
}

/// Run id derived from a final run directory.
pub fn run_id_for(final_dir: &Path) -> String {
    final_dir
        .file_name()
        .map(|n| normalize_run_id(&n.to_string_lossy()).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_is_sibling() {
        let tmp = build_temp_run_dir(Path::new("archive/2024-01-01_run"));
        assert_eq!(tmp, PathBuf::from("archive/.tmp_2024-01-01_run"));
    }

    #[test]
    fn test_temp_dir_without_file_name() {
        assert_eq!(build_temp_run_dir(Path::new("/")), PathBuf::from("/"));
    }

    #[test]
    fn test_normalize_and_detect() {
        assert_eq!(normalize_run_id(".tmp_abc"), "abc");
        assert_eq!(normalize_run_id("abc"), "abc");
        assert!(is_temp_run_dir(".tmp_abc"));
        assert!(!is_temp_run_dir("abc.tmp_"));
        assert_eq!(run_id_for(Path::new("/a/.tmp_x")), "x");
    }

    #[test]
    fn test_set_live_run_resets_flags() {
        let ops = OpsState::new();
        {
            let mut s = lock(&ops.state);
            s.first_valid_frame = true;
            s.run_finalized = true;
        }
        ops.set_live_run("r1", Path::new("/a/.tmp_r1"), Path::new("/a/r1"), 12.5);
        let snap = ops.snapshot();
        assert!(snap.pipeline_active);
        assert!(!snap.first_valid_frame);
        assert!(!snap.run_finalized);
        assert_eq!(snap.live_run_id, "r1");
        assert_eq!(snap.live_start_timestamp, 12.5);
    }

    #[test]
    fn test_events_only_flag_matching_run() {
        let bus = EventBus::new();
        let ops = Arc::new(OpsState::new());
        ops.register_event_handlers(&bus);
        ops.set_live_run("live", Path::new("/a/.tmp_live"), Path::new("/a/live"), 0.0);

        bus.fire_event(FirstValidFrameEvent {
            run_id: "other".into(),
            source: "vfo".into(),
        });
        assert!(!ops.snapshot().first_valid_frame);
        assert_eq!(ops.snapshot().last_event, "first_valid_frame");

        bus.fire_event(FirstValidFrameEvent {
            run_id: ".tmp_live".into(),
            source: "main".into(),
        });
        assert!(ops.snapshot().first_valid_frame);

        bus.fire_event(RunFinalizedEvent {
            run_id: "other".into(),
            output_dir: "/a/other".into(),
        });
        let snap = ops.snapshot();
        assert!(!snap.run_finalized);
        assert!(snap.pipeline_active);
        assert_eq!(snap.last_finalized_run_id, "other");

        bus.fire_event(RunFinalizedEvent {
            run_id: "live".into(),
            output_dir: "/a/live".into(),
        });
        let snap = ops.snapshot();
        assert!(snap.run_finalized);
        assert!(!snap.pipeline_active);
    }

    #[test]
    fn test_untracked_state_accepts_any_run() {
        let bus = EventBus::new();
        let ops = Arc::new(OpsState::new());
        ops.register_event_handlers(&bus);
        bus.fire_event(FirstValidFrameEvent {
            run_id: "anything".into(),
            source: "x".into(),
        });
        assert!(ops.snapshot().first_valid_frame);
    }

    #[test]
    fn test_register_is_idempotent() {
        let bus = EventBus::new();
        let ops = Arc::new(OpsState::new());
        ops.register_event_handlers(&bus);
        ops.register_event_handlers(&bus);
        assert_eq!(bus.handler_count::<FifoDeleteEvent>(), 1);

        bus.fire_event(FifoDeleteEvent {
            run_id: "old".into(),
            output_dir: "/a/old".into(),
        });
        let snap = ops.snapshot();
        assert!(snap.fifo_delete);
        assert_eq!(snap.last_deleted_run_id, "old");
        assert_eq!(snap.last_event, "fifo_delete");
    }
}
