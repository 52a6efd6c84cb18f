//! Archive scanning and disk-quota eviction.
//!
//! The archive root holds one directory per completed run. Directories whose
//! name carries the temporary-run marker are in-progress runs and are never
//! listed, sized, or evicted.
//!
//! When the archive grows past its byte budget, completed runs are deleted
//! oldest-first until the total fits again. A run's age is recovered from, in
//! order: the `timestamp` field of its `meta.json`, a timestamp prefix of the
//! directory name, and finally the directory's modification time.

use crate::events::{EventBus, FifoDeleteEvent};
use crate::ops::state::is_temp_run_dir;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Byte budget for the archive root (10 GiB).
pub const IMAGES_LIMIT_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Per-run metadata file consulted for the run timestamp.
pub const META_FILE_NAME: &str = "meta.json";

/// Optional archive index rewritten when runs are evicted.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Full-string formats accepted for a `meta.json` timestamp.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d_%H-%M-%S",
    "%Y-%m-%d_%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y%m%d_%H%M%S",
    "%Y%m%d%H%M%S",
];

/// Additional datetime prefixes accepted in directory names.
const NAME_PREFIX_FORMATS: &[&str] = &["%Y-%m-%d_%H-%M"];

/// A completed run found under the archive root.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRun {
    pub run_id: String,
    pub path: PathBuf,
    /// Best-effort unix timestamp in seconds.
    pub timestamp: f64,
    pub size_bytes: u64,
}

/// Outcome of one quota enforcement pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    /// The pass did not look at the archive (missing root or foreign output).
    pub skipped: bool,
    pub total_before: u64,
    pub total_after: u64,
    pub evicted: Vec<PathBuf>,
    /// Directories whose removal failed; their bytes still count.
    pub failed: Vec<PathBuf>,
}

/// Disk quota over one archive root.
#[derive(Debug, Clone)]
pub struct ArchiveQuota {
    root: PathBuf,
    limit_bytes: u64,
    bus: Arc<EventBus>,
}

impl ArchiveQuota {
    pub fn new(root: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            root: root.into(),
            limit_bytes: IMAGES_LIMIT_BYTES,
            bus,
        }
    }

    /// Override the byte budget.
    pub fn with_limit(mut self, limit_bytes: u64) -> Self {
        self.limit_bytes = limit_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Completed runs under the root, oldest first.
    pub fn list_completed_runs(&self) -> Vec<ArchivedRun> {
        let mut runs = scan_runs(&self.root);
        sort_oldest_first(&mut runs);
        runs
    }

    /// Evict the oldest completed runs until the archive fits its budget.
    ///
    /// When `output` is given and lies outside the archive root, nothing is
    /// done: that output was written somewhere this quota does not own.
    pub fn enforce(&self, output: Option<&Path>) -> EvictionReport {
        let mut report = EvictionReport::default();

        if !self.root.is_dir() {
            report.skipped = true;
            return report;
        }
        if let Some(output) = output {
            if !output.as_os_str().is_empty() && !is_path_within(&self.root, output) {
                tracing::debug!("Output {:?} is outside archive {:?}, skipping quota", output, self.root);
                report.skipped = true;
                return report;
            }
        }

        let mut runs = scan_runs(&self.root);
        let mut total: u64 = runs.iter().map(|r| r.size_bytes).sum();
        report.total_before = total;

        if total <= self.limit_bytes {
            report.total_after = total;
            return report;
        }

        tracing::info!(
            "Archive {:?} uses {} bytes, over budget of {} bytes",
            self.root,
            total,
            self.limit_bytes
        );
        sort_oldest_first(&mut runs);

        for run in runs {
            if total <= self.limit_bytes {
                break;
            }
            if let Err(e) = fs::remove_dir_all(&run.path) {
                tracing::warn!("Failed to remove archive directory {:?}: {}", run.path, e);
                report.failed.push(run.path);
                continue;
            }

            total = total.saturating_sub(run.size_bytes);
            tracing::info!(run_id = %run.run_id, path = ?run.path, "Evicted run ({} bytes)", run.size_bytes);
            remove_run_from_index(&self.root, &run.run_id);
            self.bus.fire_event(FifoDeleteEvent {
                run_id: run.run_id.clone(),
                output_dir: run.path.display().to_string(),
            });
            report.evicted.push(run.path);
        }

        report.total_after = total;
        report
    }
}

fn sort_oldest_first(runs: &mut [ArchivedRun]) {
    runs.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
}

fn scan_runs(root: &Path) -> Vec<ArchivedRun> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read archive {:?}: {}", root, e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let run_id = entry.file_name().to_string_lossy().into_owned();
            if is_temp_run_dir(&run_id) {
                return None;
            }
            let path = entry.path();
            Some(ArchivedRun {
                timestamp: run_timestamp(&path),
                size_bytes: directory_size(&path),
                run_id,
                path,
            })
        })
        .collect()
}

/// Recursive size of every regular file under `path`. Unreadable entries
/// count as zero; symlinks are not followed.
pub fn directory_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => directory_size(&entry.path()),
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        })
        .sum()
}

/// Best-effort unix timestamp for a run directory.
pub fn run_timestamp(run_dir: &Path) -> f64 {
    if let Some(ts) = read_meta_timestamp(&run_dir.join(META_FILE_NAME)) {
        return ts;
    }
    if let Some(ts) = run_dir
        .file_name()
        .and_then(|name| parse_name_timestamp(&name.to_string_lossy()))
    {
        return ts;
    }
    fs::metadata(run_dir)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn read_meta_timestamp(meta_path: &Path) -> Option<f64> {
    let text = fs::read_to_string(meta_path).ok()?;
    let meta: Value = serde_json::from_str(&text).ok()?;
    match meta.get("timestamp")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

/// Parse a complete timestamp string, interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.and_utc().timestamp() as f64)
}

/// Parse a timestamp at the start of a run directory name, interpreted as UTC.
pub fn parse_name_timestamp(name: &str) -> Option<f64> {
    let datetime = TIMESTAMP_FORMATS
        .iter()
        .chain(NAME_PREFIX_FORMATS)
        .find_map(|fmt| NaiveDateTime::parse_and_remainder(name, fmt).ok())
        .map(|(dt, _)| dt);

    datetime
        .or_else(|| {
            NaiveDate::parse_and_remainder(name, "%Y-%m-%d")
                .ok()
                .and_then(|(date, _)| date.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp() as f64)
}

/// Whether `target` is `base` or lies beneath it, compared on resolved paths.
pub fn is_path_within(base: &Path, target: &Path) -> bool {
    let base = resolve(base);
    let target = resolve(target);
    target.starts_with(&base)
}

/// Canonical form of `path` when it exists; otherwise the canonical form of
/// its nearest existing ancestor with the remaining components appended.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    while let Some(parent) = existing.parent() {
        if let Some(name) = existing.file_name() {
            tail.push(name.to_os_string());
        }
        existing = parent;
        if let Ok(canonical) = fs::canonicalize(existing) {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return normalize_lexically(&out);
        }
    }
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Drop `run_id` from the archive index, if present.
///
/// A missing or unparsable index is left alone. The file is rewritten only
/// when an entry was actually removed.
pub fn remove_run_from_index(root: &Path, run_id: &str) -> bool {
    let index_path = root.join(INDEX_FILE_NAME);
    let Ok(text) = fs::read_to_string(&index_path) else {
        return false;
    };
    let mut index: Value = match serde_json::from_str(&text) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!("Ignoring malformed archive index {:?}: {}", index_path, e);
            return false;
        }
    };

    let changed = match &mut index {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !index_entry_matches(item, run_id));
            items.len() != before
        }
        Value::Object(map) => map.remove(run_id).is_some(),
        _ => false,
    };

    if changed {
        let written = serde_json::to_string_pretty(&index)
            .map_err(std::io::Error::from)
            .and_then(|text| fs::write(&index_path, text));
        if let Err(e) = written {
            tracing::warn!("Failed to rewrite archive index {:?}: {}", index_path, e);
            return false;
        }
    }
    changed
}

fn index_entry_matches(item: &Value, run_id: &str) -> bool {
    match item {
        Value::String(s) => s == run_id,
        Value::Object(obj) => obj
            .get("run_id")
            .and_then(Value::as_str)
            .or_else(|| obj.get("id").and_then(Value::as_str))
            .map(|id| id == run_id)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn make_run(root: &Path, name: &str, bytes: usize, meta_ts: Option<f64>) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("data.bin"), vec![0u8; bytes]).unwrap();
        if let Some(ts) = meta_ts {
            fs::write(dir.join(META_FILE_NAME), format!("{{\"timestamp\": {}}}", ts)).unwrap();
        }
        dir
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = 1_704_110_400.0; // 2024-01-01 12:00:00 UTC
        assert_eq!(parse_timestamp("2024-01-01_12-00-00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01_12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("20240101_120000"), Some(expected));
        assert_eq!(parse_timestamp("20240101120000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_parse_name_prefix() {
        assert_eq!(
            parse_name_timestamp("2024-01-01_12-00_meteor_m2_137.100MHz"),
            Some(1_704_110_400.0)
        );
        assert_eq!(parse_name_timestamp("2024-01-01_run"), Some(1_704_067_200.0));
        assert_eq!(parse_name_timestamp("noaa_pass"), None);
    }

    #[test]
    fn test_timestamp_prefers_meta() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_run(root.path(), "2024-01-01_run", 1, Some(42.0));
        assert_eq!(run_timestamp(&dir), 42.0);

        fs::write(dir.join(META_FILE_NAME), r#"{"timestamp": "2024-01-01T12:00:00"}"#).unwrap();
        assert_eq!(run_timestamp(&dir), 1_704_110_400.0);

        fs::write(dir.join(META_FILE_NAME), "not json").unwrap();
        assert_eq!(run_timestamp(&dir), 1_704_067_200.0);
    }

    #[test]
    fn test_directory_size_is_recursive() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_run(root.path(), "r", 100, None);
        fs::write(dir.join("top.bin"), vec![0u8; 28]).unwrap();
        assert_eq!(directory_size(&dir), 128);
        assert_eq!(directory_size(&root.path().join("missing")), 0);
    }

    #[test]
    fn test_path_within() {
        let root = tempfile::tempdir().unwrap();
        let inner = make_run(root.path(), "r", 1, None);
        assert!(is_path_within(root.path(), &inner));
        assert!(is_path_within(root.path(), &inner.join("not-yet-created")));
        assert!(is_path_within(root.path(), root.path()));
        assert!(!is_path_within(&inner, root.path()));
        assert!(!is_path_within(&inner, &root.path().join("r2")));
        assert!(!is_path_within(&inner, &inner.join("..").join("other")));
    }

    #[test]
    fn test_under_budget_is_noop() {
        let root = tempfile::tempdir().unwrap();
        make_run(root.path(), "a", 10, Some(1.0));
        let quota = ArchiveQuota::new(root.path(), Arc::new(EventBus::new())).with_limit(100);
        let report = quota.enforce(None);
        assert!(!report.skipped);
        assert_eq!(report.total_before, directory_size(&root.path().join("a")));
        assert!(report.evicted.is_empty());
    }

    #[test]
    fn test_evicts_oldest_first_and_fires_events() {
        let root = tempfile::tempdir().unwrap();
        let oldest = make_run(root.path(), "c_oldest", 40, Some(100.0));
        let middle = make_run(root.path(), "a_middle", 40, Some(200.0));
        let newest = make_run(root.path(), "b_newest", 40, Some(300.0));
        let staged = make_run(root.path(), ".tmp_live", 500, Some(1.0));

        let bus = Arc::new(EventBus::new());
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let d = deleted.clone();
        bus.register_handler::<FifoDeleteEvent, _>(move |e| d.lock().unwrap().push(e.run_id.clone()));

        let kept = directory_size(&middle) + directory_size(&newest);
        let total = kept + directory_size(&oldest);
        let quota = ArchiveQuota::new(root.path(), bus).with_limit(kept);
        let report = quota.enforce(Some(newest.as_path()));

        assert_eq!(report.total_before, total);
        assert_eq!(report.total_after, kept);
        assert_eq!(report.evicted, vec![oldest.clone()]);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
        assert!(staged.exists());
        assert_eq!(*deleted.lock().unwrap(), vec!["c_oldest"]);
    }

    #[test]
    fn test_skips_foreign_output_and_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        make_run(root.path(), "a", 50, Some(1.0));
        let bus = Arc::new(EventBus::new());

        let quota = ArchiveQuota::new(root.path(), bus.clone()).with_limit(1);
        assert!(quota.enforce(Some(elsewhere.path())).skipped);
        assert!(root.path().join("a").exists());

        let missing = ArchiveQuota::new(root.path().join("nope"), bus);
        assert!(missing.enforce(None).skipped);
    }

    #[test]
    fn test_list_completed_runs_hides_staged() {
        let root = tempfile::tempdir().unwrap();
        make_run(root.path(), "2024-01-02_run", 1, None);
        make_run(root.path(), "2024-01-01_run", 1, None);
        make_run(root.path(), ".tmp_2024-01-03_run", 1, None);
        fs::write(root.path().join(INDEX_FILE_NAME), "[]").unwrap();

        let quota = ArchiveQuota::new(root.path(), Arc::new(EventBus::new()));
        let ids: Vec<_> = quota.list_completed_runs().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["2024-01-01_run", "2024-01-02_run"]);
    }

    #[test]
    fn test_index_shapes() {
        let root = tempfile::tempdir().unwrap();
        let index = root.path().join(INDEX_FILE_NAME);

        fs::write(&index, r#"["a", "b"]"#).unwrap();
        assert!(remove_run_from_index(root.path(), "a"));
        let v: Value = serde_json::from_str(&fs::read_to_string(&index).unwrap()).unwrap();
        assert_eq!(v, serde_json::json!(["b"]));

        fs::write(&index, r#"[{"run_id": "a"}, {"id": "b"}, {"id": "c"}]"#).unwrap();
        assert!(remove_run_from_index(root.path(), "b"));
        let v: Value = serde_json::from_str(&fs::read_to_string(&index).unwrap()).unwrap();
        assert_eq!(v, serde_json::json!([{"run_id": "a"}, {"id": "c"}]));

        fs::write(&index, r#"{"a": {"size": 1}, "b": {}}"#).unwrap();
        assert!(remove_run_from_index(root.path(), "a"));
        assert!(!remove_run_from_index(root.path(), "zzz"));

        fs::write(&index, "{broken").unwrap();
        assert!(!remove_run_from_index(root.path(), "a"));
        assert_eq!(fs::read_to_string(&index).unwrap(), "{broken");

        fs::remove_file(&index).unwrap();
        assert!(!remove_run_from_index(root.path(), "a"));
    }
}
