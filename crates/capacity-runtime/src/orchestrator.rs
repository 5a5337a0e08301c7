//! Watch orchestrator.
//!
//! Re-runs the analysis in a tokio task whenever the input changes and sends
//! each fresh [`AnalysisResult`] through an `mpsc` channel, so a report or
//! dashboard loop can consume updates without shared mutable state.

use std::time::Duration;

use capacity_data::analysis::AnalysisResult;
use tokio::sync::mpsc;
use tokio::time;

use crate::data_manager::{AnalysisJob, DataManager};

// ── Public types ──────────────────────────────────────────────────────────────

/// One re-run of the analysis.
#[derive(Debug, Clone)]
pub struct WatchUpdate {
    /// 1 for the initial run, incremented on every change-triggered re-run.
    pub revision: u64,
    pub analysis: AnalysisResult,
}

// ── WatchOrchestrator ─────────────────────────────────────────────────────────

/// Polls the input on a fixed interval and re-runs the analysis when its
/// modification time changes.
pub struct WatchOrchestrator {
    job: AnalysisJob,
    poll_interval: Duration,
}

impl WatchOrchestrator {
    pub fn new(job: AnalysisJob, poll_interval: Duration) -> Self {
        Self { job, poll_interval }
    }

    /// Spawn the watch loop.
    ///
    /// Returns the receiving end of the update channel and a
    /// [`WatchHandle`] that aborts the loop.
    pub fn start(self) -> (mpsc::Receiver<WatchUpdate>, WatchHandle) {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            self.watch_loop(tx).await;
        });

        (rx, WatchHandle { handle })
    }

    // ── Private implementation ────────────────────────────────────────────

    /// Initial run, then one poll per interval. Exits when the receiver is
    /// dropped.
    async fn watch_loop(self, tx: mpsc::Sender<WatchUpdate>) {
        // The TTL is irrelevant here: every re-run is forced by a change.
        let mut revision = 0u64;
        let Some(mut data_manager) =
            Self::run_and_send(DataManager::new(self.job, 0), &tx, &mut revision).await
        else {
            return;
        };

        let mut interval = time::interval(self.poll_interval);
        // The first tick fires immediately; the initial run already happened.
        interval.tick().await;

        loop {
            interval.tick().await;

            if tx.is_closed() {
                tracing::debug!("watch channel closed; exiting loop");
                break;
            }

            if data_manager.source_changed() {
                tracing::info!(
                    input = %data_manager.job().input.display(),
                    "input changed; re-running analysis"
                );
                match Self::run_and_send(data_manager, &tx, &mut revision).await {
                    Some(dm) => data_manager = dm,
                    None => break,
                }
            }
        }
    }

    /// Fetch on the blocking pool (the fetch reads files and sleeps between
    /// retries) and send the result if it is fresh. Hands the manager back,
    /// or `None` when the fetch task panicked.
    async fn run_and_send(
        mut data_manager: DataManager,
        tx: &mpsc::Sender<WatchUpdate>,
        revision: &mut u64,
    ) -> Option<DataManager> {
        let joined = tokio::task::spawn_blocking(move || {
            let result = data_manager.get_data(true).cloned();
            let stale = data_manager.last_error().is_some();
            (data_manager, result, stale)
        })
        .await;
        let (data_manager, result, stale) = match joined {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(error = %e, "analysis task failed; stopping watch");
                return None;
            }
        };

        match result {
            None => tracing::warn!("no analysis result available; skipping send"),
            // Fallback to a stale result: nothing new to report.
            Some(_) if stale => {}
            Some(analysis) => {
                *revision += 1;
                let update = WatchUpdate {
                    revision: *revision,
                    analysis,
                };
                if let Err(e) = tx.send(update).await {
                    tracing::warn!(error = %e, "failed to send analysis update; receiver dropped");
                }
            }
        }
        Some(data_manager)
    }
}

// ── WatchHandle ───────────────────────────────────────────────────────────────

/// Handle to the background watch task.
pub struct WatchHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Immediately abort the watch loop.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_core::models::Granularity;
    use capacity_core::settings::EngineConfig;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const HEADER: &str =
        "date,cbp_intake,cbp_active,hhs_transfers_in,hhs_active,discharges_to_sponsor\n";

    fn write_csv(dir: &Path, rows: &str) -> PathBuf {
        let path = dir.join("uac.csv");
        std::fs::write(&path, format!("{HEADER}{rows}")).unwrap();
        path
    }

    fn job(input: PathBuf) -> AnalysisJob {
        AnalysisJob {
            input,
            granularity: Granularity::Daily,
            config: EngineConfig::default(),
            with_utilization: false,
        }
    }

    #[test]
    fn test_orchestrator_creation() {
        let orch = WatchOrchestrator::new(job(PathBuf::from("/tmp/uac.csv")), Duration::from_secs(5));
        assert_eq!(orch.poll_interval, Duration::from_secs(5));
        assert_eq!(orch.job.input, PathBuf::from("/tmp/uac.csv"));
    }

    #[tokio::test]
    async fn test_sends_initial_update() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");

        let (mut rx, handle) = WatchOrchestrator::new(job(input), Duration::from_secs(60)).start();
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("channel closed before update");

        assert_eq!(update.revision, 1);
        assert_eq!(update.analysis.series.len(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_reruns_when_input_changes() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");

        let (mut rx, handle) =
            WatchOrchestrator::new(job(input.clone()), Duration::from_millis(20)).start();
        let first = rx.recv().await.expect("initial update");
        assert_eq!(first.revision, 1);

        // Make sure the new mtime differs even on coarse-grained filesystems.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n2024-01-02,10,100,5,1000,5\n");

        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for re-run")
            .expect("channel closed");
        assert_eq!(second.revision, 2);
        assert_eq!(second.analysis.series.len(), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_no_update_without_change() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");

        let (mut rx, handle) =
            WatchOrchestrator::new(job(input), Duration::from_millis(20)).start();
        rx.recv().await.expect("initial update");

        let next = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(next.is_err(), "unexpected update without an input change");
        handle.abort();
    }

    #[tokio::test]
    async fn test_recovers_after_bad_write() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");

        let (mut rx, handle) =
            WatchOrchestrator::new(job(input), Duration::from_millis(20)).start();
        rx.recv().await.expect("initial update");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        write_csv(dir.path(), "2024-01-01,ten,100,5,1000,5\n");
        // Give the loop time to see the change and fail once.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A fixed file is picked up as the next revision.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n2024-01-02,10,100,5,1000,5\n");
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for re-run")
            .expect("channel closed");
        assert_eq!(next.revision, 2);
        assert_eq!(next.analysis.series.len(), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_loop_exits_when_receiver_dropped() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "2024-01-01,10,100,5,1000,5\n");

        let (mut rx, handle) =
            WatchOrchestrator::new(job(input), Duration::from_millis(10)).start();
        rx.recv().await.expect("initial update");
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch loop did not exit");
    }
}
