//! Parallel per-facility analysis.
//!
//! Each facility is an independent series (one CSV file or directory). The
//! runner analyzes them concurrently on the tokio blocking pool; a failing
//! or panicking facility is reported in its own slot and never affects the
//! others.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use capacity_core::error::CapacityError;
use capacity_core::models::Granularity;
use capacity_core::settings::EngineConfig;
use capacity_data::analysis::{analyze_path, AnalysisResult};
use capacity_data::reader::find_csv_files;
use serde::Serialize;
use tokio::task::JoinSet;

/// Outcome for one facility.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FacilityOutcome {
    Ok { result: Box<AnalysisResult> },
    Error { message: String },
}

impl FacilityOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, FacilityOutcome::Ok { .. })
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            FacilityOutcome::Ok { result } => Some(&**result),
            FacilityOutcome::Error { .. } => None,
        }
    }
}

impl From<Result<AnalysisResult, CapacityError>> for FacilityOutcome {
    fn from(r: Result<AnalysisResult, CapacityError>) -> Self {
        match r {
            Ok(result) => FacilityOutcome::Ok {
                result: Box::new(result),
            },
            Err(e) => FacilityOutcome::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Runs one analysis per facility with shared settings.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    granularity: Granularity,
    config: EngineConfig,
    with_utilization: bool,
}

impl BatchRunner {
    pub fn new(granularity: Granularity, config: EngineConfig, with_utilization: bool) -> Self {
        Self {
            granularity,
            config,
            with_utilization,
        }
    }

    /// Facilities under `dir`: one per CSV file, named by its path relative
    /// to `dir` without the extension.
    pub fn discover(dir: &Path) -> BTreeMap<String, PathBuf> {
        find_csv_files(dir)
            .into_iter()
            .map(|path| {
                let rel = path.strip_prefix(dir).unwrap_or(&path).with_extension("");
                (rel.to_string_lossy().replace('\\', "/"), path)
            })
            .collect()
    }

    /// Analyze every facility concurrently. Results are keyed by facility.
    pub async fn run(
        &self,
        facilities: BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, FacilityOutcome> {
        let granularity = self.granularity;
        let config = self.config.clone();
        let with_utilization = self.with_utilization;
        run_facilities(facilities, move |path| {
            analyze_path(path, granularity, &config, with_utilization)
        })
        .await
    }

    /// [`discover`](Self::discover) then [`run`](Self::run).
    pub async fn run_dir(
        &self,
        dir: &Path,
    ) -> Result<BTreeMap<String, FacilityOutcome>, CapacityError> {
        let facilities = Self::discover(dir);
        if facilities.is_empty() {
            return Err(CapacityError::NoDataFiles(dir.to_path_buf()));
        }
        Ok(self.run(facilities).await)
    }
}

/// Run `analyze` once per facility on the blocking pool. Every facility
/// gets an outcome; a panic becomes an error in that facility's slot.
async fn run_facilities<F>(
    facilities: BTreeMap<String, PathBuf>,
    analyze: F,
) -> BTreeMap<String, FacilityOutcome>
where
    F: Fn(&Path) -> Result<AnalysisResult, CapacityError> + Clone + Send + 'static,
{
    let mut set = JoinSet::new();
    for (name, path) in facilities {
        let analyze = analyze.clone();
        set.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyze(&path)));
            (name, outcome)
        });
    }

    let mut outcomes = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(outcome))) => {
                if let Err(e) = &outcome {
                    tracing::warn!(facility = %name, error = %e, "facility analysis failed");
                }
                outcomes.insert(name, FacilityOutcome::from(outcome));
            }
            Ok((name, Err(payload))) => {
                let message = format!("analysis panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(facility = %name, %message, "facility analysis panicked");
                outcomes.insert(name, FacilityOutcome::Error { message });
            }
            // Tasks are never aborted, so only a runtime shutdown lands here.
            Err(e) => tracing::error!(error = %e, "facility task cancelled"),
        }
    }
    tracing::debug!(facilities = outcomes.len(), "batch complete");
    outcomes
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
