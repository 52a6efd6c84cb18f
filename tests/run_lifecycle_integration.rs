//! Integration tests for the run lifecycle
//!
//! These tests drive the lifecycle manager over a real splitter and the
//! built-in capture pipeline:
//! - Staging, promotion and the events observed along the way
//! - Promotion atomicity when the rename fails
//! - Deferred processing and quota eviction after stop

mod common;

use common::{record_events, test_timeout, wait_until};
use iqtap::dsp::{read_cf32, SampleStream, Splitter};
use iqtap::events::{EventBus, FifoDeleteEvent, RunFinalizedEvent};
use iqtap::ops::{ArchiveQuota, OpsState, RunLifecycleManager, RunRequest, RunState, TapBinding};
use iqtap::pipeline::nodes::baseband_capture::{BASEBAND_FILE_NAME, PRODUCTS_FILE_NAME};
use iqtap::pipeline::{BasebandCapture, OfflineProcessor};
use iqtap::Sample;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Harness {
    bus: Arc<EventBus>,
    ops: Arc<OpsState>,
    splitter: Arc<Splitter>,
    manager: RunLifecycleManager,
}

fn harness(archive: &Path, limit_bytes: Option<u64>) -> Harness {
    std::fs::create_dir_all(archive).unwrap();
    let bus = Arc::new(EventBus::new());
    let ops = Arc::new(OpsState::new());
    ops.register_event_handlers(&bus);

    let splitter = Arc::new(Splitter::new(Arc::new(SampleStream::new())));
    splitter.add_output("live");

    let mut quota = ArchiveQuota::new(archive, bus.clone());
    if let Some(limit) = limit_bytes {
        quota = quota.with_limit(limit);
    }
    let manager = RunLifecycleManager::new(
        splitter.clone(),
        ops.clone(),
        bus.clone(),
        Arc::new(OfflineProcessor::new(Arc::new(quota))),
        1,
    )
    .unwrap();

    Harness {
        bus,
        ops,
        splitter,
        manager,
    }
}

fn live_request(final_dir: PathBuf) -> RunRequest {
    RunRequest {
        final_dir,
        definition: Arc::new(BasebandCapture::new()),
        params: json!({}),
        binding: TapBinding::Output("live".to_string()),
        samplerate: 1000.0,
        pool_size: 1,
        track_in_ops: true,
    }
}

#[test]
fn test_stage_then_promote_fires_finalized() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);
    let finalized = record_events::<RunFinalizedEvent>(&h.bus);

    let run = h.manager.start(live_request(archive.join("2024-01-01_run"))).unwrap();
    assert!(archive.join(".tmp_2024-01-01_run").is_dir());
    assert!(!archive.join("2024-01-01_run").exists());
    let snapshot = h.ops.snapshot();
    assert!(snapshot.pipeline_active);
    assert_eq!(snapshot.live_run_id, "2024-01-01_run");

    let outcome = h.manager.stop(run);
    assert_eq!(outcome.state, RunState::Promoted);
    assert!(archive.join("2024-01-01_run").is_dir());
    assert!(!archive.join(".tmp_2024-01-01_run").exists());

    let events = finalized.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].run_id, "2024-01-01_run");

    let snapshot = h.ops.snapshot();
    assert!(snapshot.run_finalized);
    assert!(!snapshot.pipeline_active);
    assert_eq!(snapshot.last_finalized_run_id, "2024-01-01_run");
    assert_eq!(snapshot.last_event, "run_finalized");
}

#[test]
fn test_first_valid_frame_through_running_splitter() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);
    let input = h.splitter.input();
    h.splitter.start().unwrap();

    let run = h.manager.start(live_request(archive.join("frames"))).unwrap();
    let batch = vec![Sample::new(0.5, 0.5); 128];
    for _ in 0..4 {
        assert!(input.write_all(&batch));
    }
    assert!(wait_until(test_timeout(), || h.ops.snapshot().first_valid_frame));

    let outcome = h.manager.stop(run);
    h.splitter.stop();

    assert!(outcome.promoted());
    let capture = archive.join("frames").join(BASEBAND_FILE_NAME);
    assert!(outcome.output_files.contains(&capture));
    let written = std::fs::metadata(&capture).unwrap().len();
    assert!(written > 0);
    assert_eq!(written % 8, 0);
}

#[test]
fn test_failed_promotion_keeps_everything_in_staging() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);

    let final_dir = archive.join("clash");
    let run = h.manager.start(live_request(final_dir.clone())).unwrap();
    let live = h.splitter.get_output("live").unwrap();
    assert!(live.write_all(&[Sample::new(1.0, 1.0); 16]));

    std::fs::create_dir_all(final_dir.join("someone-else")).unwrap();
    let outcome = h.manager.stop(run);

    assert_eq!(outcome.state, RunState::Orphaned);
    let tmp = archive.join(".tmp_clash");
    assert_eq!(outcome.effective_dir, tmp);
    assert!(!outcome.output_files.is_empty());
    assert!(outcome.output_files.iter().all(|p| p.starts_with(&tmp) && p.exists()));
    assert!(!final_dir.join(BASEBAND_FILE_NAME).exists());
}

#[test]
fn test_stale_staging_is_replaced() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);

    let stale = archive.join(".tmp_again");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("partial.bin"), b"crashed").unwrap();

    let run = h.manager.start(live_request(archive.join("again"))).unwrap();
    assert!(!stale.join("partial.bin").exists());
    let outcome = h.manager.stop(run);
    assert!(outcome.promoted());
    assert!(!archive.join("again").join("partial.bin").exists());
}

#[test]
fn test_stop_queues_deferred_processing() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);
    h.manager.set_finish_processing_after_live(true);

    let final_dir = archive.join("deferred");
    let run = h.manager.start(live_request(final_dir.clone())).unwrap();
    let live = h.splitter.get_output("live").unwrap();
    assert!(live.write_all(&vec![Sample::new(0.0, 1.0); 256]));

    let outcome = h.manager.stop(run);
    assert!(outcome.deferred_processing);

    let products = final_dir.join(PRODUCTS_FILE_NAME);
    assert!(wait_until(test_timeout(), || products.exists()));
}

#[test]
fn test_stop_evicts_older_runs_over_budget() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, Some(1));
    let deleted = record_events::<FifoDeleteEvent>(&h.bus);

    let old = common::builders::RunDirBuilder::new(&archive, "old")
        .payload_bytes(64)
        .timestamp(1_000.0)
        .build();

    let run = h.manager.start(live_request(archive.join("new"))).unwrap();
    h.manager.stop(run);

    assert!(wait_until(test_timeout(), || !old.exists()));
    assert!(wait_until(test_timeout(), || h.ops.snapshot().fifo_delete));
    assert!(deleted.lock().unwrap().iter().any(|e| e.run_id == "old"));
}

#[test]
fn test_stop_keeps_last_published_batch() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);

    for round in 0..20 {
        let final_dir = archive.join(format!("tail-{}", round));
        let run = h.manager.start(live_request(final_dir.clone())).unwrap();
        let live = h.splitter.get_output("live").unwrap();
        assert!(live.write_all(&vec![Sample::new(0.25, 0.0); 64]));
        assert!(live.write_all(&vec![Sample::new(0.0, 0.25); 64]));

        let outcome = h.manager.stop(run);
        assert!(outcome.promoted());
        let samples = read_cf32(final_dir.join(BASEBAND_FILE_NAME)).unwrap();
        assert_eq!(samples.len(), 128, "round {}", round);
    }
}

#[test]
fn test_failed_bind_leaves_no_live_run() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("archive");
    let h = harness(&archive, None);

    let mut request = live_request(archive.join("2024-01-01_fail"));
    request.binding = TapBinding::Output("missing".to_string());
    assert!(h.manager.start(request).is_err());
    assert!(!archive.join(".tmp_2024-01-01_fail").exists());

    let snapshot = h.ops.snapshot();
    assert!(!snapshot.pipeline_active);
    assert!(snapshot.live_run_id.is_empty());
    assert!(snapshot.live_tmp_dir.is_empty());
    assert!(snapshot.live_final_dir.is_empty());

    // With nothing tracked, finalization of any run is reflected.
    h.bus.fire_event(RunFinalizedEvent {
        run_id: "other".to_string(),
        output_dir: archive.join("other").display().to_string(),
    });
    assert!(h.ops.snapshot().run_finalized);
}
