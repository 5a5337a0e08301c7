//! TTL-cached data manager.
//!
//! Wraps [`analyze_path`] with a time-to-live cache and retry logic. Callers
//! use [`DataManager::get_data`] to obtain a fresh-or-cached
//! [`AnalysisResult`]; the manager handles staleness checks, up to three
//! attempts with back-off, and fallback to the previous result when the
//! input is temporarily unreadable (for example mid-write).

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use capacity_core::error::CapacityError;
use capacity_core::models::Granularity;
use capacity_core::settings::EngineConfig;
use capacity_data::analysis::{analyze_path, AnalysisResult};

/// Default cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Attempts per fetch before falling back to the cached result.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Everything needed to re-run one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub input: PathBuf,
    pub granularity: Granularity,
    pub config: EngineConfig,
    pub with_utilization: bool,
}

impl AnalysisJob {
    pub fn run(&self) -> Result<AnalysisResult, CapacityError> {
        analyze_path(
            &self.input,
            self.granularity,
            &self.config,
            self.with_utilization,
        )
    }
}

/// Latest modification time under `path`: the file itself, or the newest
/// entry of a directory. `None` when nothing can be stat'ed.
pub fn input_modified(path: &Path) -> Option<SystemTime> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.is_file() {
        return meta.modified().ok();
    }
    capacity_data::reader::find_csv_files(path)
        .iter()
        .filter_map(|f| std::fs::metadata(f).and_then(|m| m.modified()).ok())
        .chain(meta.modified().ok())
        .max()
}

// ── DataManager ───────────────────────────────────────────────────────────────

/// TTL-cached wrapper around the analysis pipeline.
pub struct DataManager {
    job: AnalysisJob,
    cache_ttl: Duration,
    cache: Option<AnalysisResult>,
    cache_timestamp: Option<Instant>,
    last_error: Option<String>,
    /// Whether any fetch has been attempted.
    fetched: bool,
    /// Input modification time observed at the last fetch, successful or not.
    source_modified: Option<SystemTime>,
}

impl DataManager {
    pub fn new(job: AnalysisJob, cache_ttl_secs: u64) -> Self {
        Self {
            job,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache: None,
            cache_timestamp: None,
            last_error: None,
            fetched: false,
            source_modified: None,
        }
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Return the analysis result, using the cache when it is still valid.
    ///
    /// `force_refresh` bypasses the cache. On failure the previous result
    /// (if any) is returned as a best-effort fallback.
    pub fn get_data(&mut self, force_refresh: bool) -> Option<&AnalysisResult> {
        if !force_refresh && self.is_cache_valid() {
            tracing::debug!("returning cached analysis result");
            return self.cache.as_ref();
        }

        self.fetched = true;
        self.source_modified = input_modified(&self.job.input);
        match self.fetch_with_retry() {
            Ok(result) => {
                tracing::debug!(
                    points = result.series.len(),
                    flags = result.flag_count(),
                    "analysis cache updated"
                );
                self.cache = Some(result);
                self.cache_timestamp = Some(Instant::now());
                self.last_error = None;
                self.cache.as_ref()
            }
            Err(e) => {
                tracing::warn!(error = %e, "analysis failed; falling back to cached result");
                self.last_error = Some(e);
                self.cache.as_ref()
            }
        }
    }

    /// `true` when the input changed since the last fetch attempt (or
    /// nothing has been fetched yet). A failed fetch is not retried until
    /// the input changes again.
    pub fn source_changed(&self) -> bool {
        !self.fetched || input_modified(&self.job.input) != self.source_modified
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
        self.cache_timestamp = None;
        tracing::debug!("cache invalidated");
    }

    pub fn cache_age(&self) -> Option<Duration> {
        self.cache_timestamp.map(|ts| ts.elapsed())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn job(&self) -> &AnalysisJob {
        &self.job
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn is_cache_valid(&self) -> bool {
        match (self.cache.as_ref(), self.cache_timestamp) {
            (Some(_), Some(ts)) => ts.elapsed() < self.cache_ttl,
            _ => false,
        }
    }

    /// Back-off schedule: attempt 1 → 0 ms, attempt 2 → 100 ms, attempt 3 → 200 ms.
    ///
    /// Schema and duplicate-date errors are not retried: the file is wrong,
    /// not busy.
    fn fetch_with_retry(&self) -> Result<AnalysisResult, String> {
        let mut last_err = String::new();

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                let sleep_ms = (attempt as u64) * 100;
                tracing::debug!(attempt, sleep_ms, "retrying analysis after back-off");
                thread::sleep(Duration::from_millis(sleep_ms));
            }

            match self.job.run() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_ingestion_failure() => return Err(e.to_string()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "analysis attempt failed");
                    last_err = e.to_string();
                }
            }
        }

        Err(last_err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str =
        "date,cbp_intake,cbp_active,hhs_transfers_in,hhs_active,discharges_to_sponsor\n";

    fn write_csv(dir: &Path, rows: &str) -> PathBuf {
        let path = dir.join("uac.csv");
        std::fs::write(&path, format!("{HEADER}{rows}")).expect("write csv");
        path
    }

    fn make_manager(ttl_secs: u64) -> (DataManager, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let input = write_csv(
            dir.path(),
            "2024-01-01,10,100,5,1000,5\n2024-01-02,12,104,6,1001,4\n",
        );
        let job = AnalysisJob {
            input,
            granularity: Granularity::Daily,
            config: EngineConfig::default(),
            with_utilization: false,
        };
        (DataManager::new(job, ttl_secs), dir)
    }

    #[test]
    fn test_cache_miss_on_first_call() {
        let (mgr, _dir) = make_manager(30);
        assert!(!mgr.is_cache_valid());
        assert!(mgr.cache_age().is_none());
        assert!(mgr.last_error().is_none());
        assert!(mgr.source_changed());
    }

    #[test]
    fn test_cache_valid_within_ttl() {
        let (mut mgr, dir) = make_manager(30);
        let first = mgr.get_data(false).map(|r| r.series.len());
        assert_eq!(first, Some(2));

        // Overwrite the input; a cached read must not notice.
        write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");
        let second = mgr.get_data(false).map(|r| r.series.len());
        assert_eq!(second, first);
    }

    #[test]
    fn test_cache_expired_refetches() {
        let (mut mgr, dir) = make_manager(0);
        mgr.get_data(false);
        assert!(!mgr.is_cache_valid());

        write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");
        assert_eq!(mgr.get_data(false).map(|r| r.series.len()), Some(1));
    }

    #[test]
    fn test_invalidate_cache() {
        let (mut mgr, _dir) = make_manager(30);
        mgr.get_data(false);
        assert!(mgr.cache.is_some());

        mgr.invalidate_cache();
        assert!(mgr.cache.is_none());
        assert!(mgr.cache_age().is_none());
    }

    #[test]
    fn test_force_refresh_bypasses_cache() {
        let (mut mgr, _dir) = make_manager(60);
        mgr.get_data(false);
        let ts1 = mgr.cache_timestamp.unwrap();
        thread::sleep(Duration::from_millis(10));
        mgr.get_data(true);
        assert!(mgr.cache_timestamp.unwrap() > ts1);
    }

    #[test]
    fn test_failure_falls_back_to_previous_result() {
        let (mut mgr, dir) = make_manager(0);
        assert!(mgr.get_data(false).is_some());

        // A malformed file is a schema error: no retry, previous result kept.
        write_csv(dir.path(), "2024-01-01,ten,100,5,1000,5\n");
        let fallback = mgr.get_data(false).map(|r| r.series.len());
        assert_eq!(fallback, Some(2));
        assert!(mgr.last_error().unwrap_or("").contains("Schema error"));
    }

    #[test]
    fn test_missing_input_without_cache_is_none() {
        let dir = TempDir::new().expect("temp dir");
        let job = AnalysisJob {
            input: dir.path().join("absent"),
            granularity: Granularity::Daily,
            config: EngineConfig::default(),
            with_utilization: false,
        };
        let mut mgr = DataManager::new(job, 30);
        assert!(mgr.get_data(false).is_none());
        assert!(mgr.last_error().is_some());
    }

    #[test]
    fn test_source_changed_after_fetch() {
        let (mut mgr, _dir) = make_manager(30);
        mgr.get_data(false);
        assert!(!mgr.source_changed());
    }

    #[test]
    fn test_failed_fetch_records_source_state() {
        let (mut mgr, dir) = make_manager(0);
        assert!(mgr.get_data(false).is_some());

        // Ensure a distinct mtime even on coarse-grained filesystems.
        thread::sleep(Duration::from_millis(1_100));
        write_csv(dir.path(), "2024-01-01,ten,100,5,1000,5\n");
        assert!(mgr.source_changed());

        mgr.get_data(false);
        assert!(mgr.last_error().is_some());
        assert!(!mgr.source_changed());
    }

    #[test]
    fn test_missing_input_is_not_changed_after_failed_fetch() {
        let dir = TempDir::new().expect("temp dir");
        let job = AnalysisJob {
            input: dir.path().join("absent.csv"),
            granularity: Granularity::Daily,
            config: EngineConfig::default(),
            with_utilization: false,
        };
        let mut mgr = DataManager::new(job, 30);
        assert!(mgr.source_changed());
        assert!(mgr.get_data(false).is_none());
        assert!(!mgr.source_changed());

        write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");
        std::fs::rename(dir.path().join("uac.csv"), dir.path().join("absent.csv"))
            .expect("rename");
        assert!(mgr.source_changed());
    }

    #[test]
    fn test_input_modified_directory_uses_newest_file() {
        let dir = TempDir::new().expect("temp dir");
        write_csv(dir.path(), "");
        assert!(input_modified(dir.path()).is_some());
        assert!(input_modified(&dir.path().join("nope")).is_none());
    }
}
