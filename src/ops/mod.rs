//! Run operations: staging, promotion, eviction, and the state observers read.
//!
//! - [`state`] - [`OpsState`] holder and run-directory naming helpers
//! - [`lifecycle`] - [`RunLifecycleManager`], staging and promoting live runs
//! - [`archive`] - [`ArchiveQuota`], archive scans and disk-quota eviction

pub mod archive;
pub mod lifecycle;
pub mod state;

pub use archive::{
    directory_size, remove_run_from_index, run_timestamp, ArchiveQuota, ArchivedRun, EvictionReport,
    IMAGES_LIMIT_BYTES, INDEX_FILE_NAME, META_FILE_NAME,
};
pub use lifecycle::{
    baseband_file_name, finalize_live_output_dir, prepare_live_output_dirs, remap_output_path,
    run_dir_name, ActiveRun, PromotionOutcome, RunLifecycleManager, RunRecord, RunRequest,
    RunState, TapBinding,
};
pub use state::{
    build_temp_run_dir, is_temp_run_dir, normalize_run_id, run_id_for, OpsState, OpsStateSnapshot,
    TEMP_RUN_PREFIX,
};
