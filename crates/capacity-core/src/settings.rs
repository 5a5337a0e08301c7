use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{CapacityError, Result};
use crate::models::{CountField, Granularity, StrainParams};

// ── DuplicatePolicy ───────────────────────────────────────────────────────────

/// What the normalizer does when a date appears more than once in a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail ingestion with a duplicate-date error.
    #[default]
    Reject,
    /// Keep the first row seen for the date.
    KeepFirst,
    /// Keep the last row seen for the date.
    KeepLast,
}

// ── ColumnMapping ─────────────────────────────────────────────────────────────

/// Accepted source column names for each canonical field.
///
/// Names are compared after header normalization (lower-case, runs of
/// non-alphanumeric characters collapsed to `_`), so `"CBP Custody"` matches
/// the alias `cbp_custody`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub date: Vec<String>,
    pub cbp_intake: Vec<String>,
    pub cbp_active: Vec<String>,
    pub hhs_transfers_in: Vec<String>,
    pub hhs_active: Vec<String>,
    pub discharges_to_sponsor: Vec<String>,
    /// Optional reported-day marker; a false value makes the row a missing day.
    pub is_reported: Vec<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            date: owned(&["date", "report_date", "as_of_date", "day"]),
            cbp_intake: owned(&[
                "cbp_intake",
                "cbp_apprehended",
                "apprehended",
                "apprehensions",
                "children_apprehended_and_placed_in_cbp_custody",
            ]),
            cbp_active: owned(&[
                "cbp_active",
                "cbp_custody",
                "in_cbp_custody",
                "children_in_cbp_custody",
            ]),
            hhs_transfers_in: owned(&[
                "hhs_transfers_in",
                "transfers_to_hhs",
                "cbp_transferred",
                "children_transferred_out_of_cbp_custody",
            ]),
            hhs_active: owned(&["hhs_active", "hhs_care", "in_hhs_care", "children_in_hhs_care"]),
            discharges_to_sponsor: owned(&[
                "discharges_to_sponsor",
                "discharges",
                "hhs_discharged",
                "children_discharged_from_hhs_care",
            ]),
            is_reported: owned(&["is_reported", "reported"]),
        }
    }
}

impl ColumnMapping {
    /// Aliases configured for a count field.
    pub fn aliases(&self, field: CountField) -> &[String] {
        match field {
            CountField::CbpIntake => &self.cbp_intake,
            CountField::CbpActive => &self.cbp_active,
            CountField::HhsTransfersIn => &self.hhs_transfers_in,
            CountField::HhsActive => &self.hhs_active,
            CountField::DischargesToSponsor => &self.discharges_to_sponsor,
        }
    }
}

// ── EngineConfig ──────────────────────────────────────────────────────────────

/// Every recognised engine option.
///
/// Serialized as JSON in `~/.capacity-analytics/config.json` or a file given
/// with `--config`; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HHS bed capacity; required only for capacity utilization.
    pub hhs_capacity_ceiling: Option<u64>,
    /// Net intake pressure strictly above this counts towards strain.
    pub pressure_threshold: f64,
    /// Consecutive above-threshold periods before strain is reported.
    pub strain_window_min_days: usize,
    pub outlier_zscore_threshold: f64,
    /// Percentile (0–100) of day-over-day changes above which a jump is flagged.
    pub discontinuity_percentile_threshold: f64,
    /// Trailing window, in periods, for outlier z-scores.
    pub trailing_window_periods: usize,
    /// Trailing window for the discontinuity percentile; whole series when unset.
    pub discontinuity_window_periods: Option<usize>,
    /// Percentile (0–100) of total system load marking a high-load period.
    pub load_percentile_threshold: f64,
    pub duplicate_policy: DuplicatePolicy,
    pub column_mapping: ColumnMapping,
    /// Inclusive lower bound on record dates.
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on record dates.
    pub end_date: Option<NaiveDate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hhs_capacity_ceiling: None,
            pressure_threshold: 0.0,
            strain_window_min_days: 3,
            outlier_zscore_threshold: 3.0,
            discontinuity_percentile_threshold: 95.0,
            trailing_window_periods: 30,
            discontinuity_window_periods: None,
            load_percentile_threshold: 85.0,
            duplicate_policy: DuplicatePolicy::Reject,
            column_mapping: ColumnMapping::default(),
            start_date: None,
            end_date: None,
        }
    }
}

impl EngineConfig {
    /// Default location of the config file: `~/.capacity-analytics/config.json`.
    pub fn default_path() -> PathBuf {
        Self::default_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Config path rooted at `base_dir` (used for testing).
    pub fn default_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".capacity-analytics").join("config.json")
    }

    /// Load a config file. Unlike the optional default file, an explicit path
    /// that cannot be read is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CapacityError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Atomically write the config, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reject values outside their meaningful ranges.
    pub fn validate(&self) -> Result<()> {
        if self.strain_window_min_days == 0 {
            return Err(config_error("strain_window_min_days must be at least 1"));
        }
        if self.trailing_window_periods == 0 {
            return Err(config_error("trailing_window_periods must be at least 1"));
        }
        if self.discontinuity_window_periods == Some(0) {
            return Err(config_error("discontinuity_window_periods must be at least 1"));
        }
        if !self.pressure_threshold.is_finite() {
            return Err(config_error("pressure_threshold must be a finite number"));
        }
        if !(self.outlier_zscore_threshold.is_finite() && self.outlier_zscore_threshold > 0.0) {
            return Err(config_error("outlier_zscore_threshold must be a positive number"));
        }
        for (name, value) in [
            (
                "discontinuity_percentile_threshold",
                self.discontinuity_percentile_threshold,
            ),
            ("load_percentile_threshold", self.load_percentile_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(config_error(format!("{name} must be between 0 and 100")));
            }
        }
        if self.hhs_capacity_ceiling == Some(0) {
            return Err(config_error("hhs_capacity_ceiling must be greater than zero"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(config_error(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }
        Ok(())
    }

    /// The configured ceiling, or a configuration error when it is unset.
    pub fn capacity_ceiling(&self) -> Result<u64> {
        match self.hhs_capacity_ceiling {
            Some(c) if c > 0 => Ok(c),
            Some(_) => Err(config_error("hhs_capacity_ceiling must be greater than zero")),
            None => Err(config_error(
                "hhs_capacity_ceiling is not set; capacity utilization cannot be computed",
            )),
        }
    }

    /// Parameters for the strain and high-load indicators.
    pub fn strain_params(&self) -> StrainParams {
        StrainParams {
            pressure_threshold: self.pressure_threshold,
            window_min_periods: self.strain_window_min_days,
            load_percentile_threshold: self.load_percentile_threshold,
        }
    }

    /// `true` when `date` lies inside the configured inclusive date range.
    pub fn in_date_range(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |s| date >= s) && self.end_date.map_or(true, |e| date <= e)
    }
}

fn config_error(msg: impl Into<String>) -> CapacityError {
    CapacityError::Configuration(msg.into())
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// How the analysis result is written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON of the full result.
    Json,
    /// Plain-text KPI summary and period table.
    Text,
}

/// Capacity and care-load analytics for unaccompanied children
#[derive(Parser, Debug, Clone)]
#[command(
    name = "capacity-analytics",
    about = "Capacity and care-load analytics for unaccompanied children",
    version
)]
pub struct Settings {
    /// CSV file, or directory searched recursively for CSV files
    pub input: PathBuf,

    /// Time granularity of the reported series
    #[arg(long, value_enum, default_value = "daily")]
    pub granularity: Granularity,

    /// Engine config file (JSON)
    #[arg(long, env = "CAPACITY_ANALYTICS_CONFIG")]
    pub config: Option<PathBuf>,

    /// HHS capacity ceiling used for utilization (implies --utilization)
    #[arg(long)]
    pub capacity_ceiling: Option<u64>,

    /// Request capacity utilization (needs a capacity ceiling from the CLI or config file)
    #[arg(long)]
    pub utilization: bool,

    /// Net intake pressure above which a period counts towards strain
    #[arg(long, allow_negative_numbers = true)]
    pub pressure_threshold: Option<f64>,

    /// Consecutive above-threshold periods before strain is reported
    #[arg(long, default_value = "3")]
    pub strain_window: usize,

    /// z-score above which a value is flagged as an outlier
    #[arg(long, default_value = "3.0")]
    pub outlier_zscore: f64,

    /// Percentile of day-over-day changes above which a jump is flagged
    #[arg(long, default_value = "95")]
    pub discontinuity_percentile: f64,

    /// Trailing window (periods) for outlier detection
    #[arg(long, default_value = "30")]
    pub trailing_window: usize,

    /// Percentile of total system load marking a high-load period
    #[arg(long, default_value = "85")]
    pub load_percentile: f64,

    /// Policy for dates that appear more than once
    #[arg(long, value_enum, default_value = "reject")]
    pub duplicates: DuplicatePolicy,

    /// First date to include (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last date to include (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Treat each CSV under the input directory as a separate facility
    #[arg(long)]
    pub batch: bool,

    /// Re-run the analysis whenever the input file changes
    #[arg(long)]
    pub watch: bool,

    /// Watch polling interval in seconds (1-3600)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=3600))]
    pub refresh_rate: u32,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse CLI arguments and resolve the effective [`EngineConfig`].
    pub fn load() -> Result<(Self, EngineConfig)> {
        Self::load_from_args(std::env::args_os().collect(), &EngineConfig::default_path())
    }

    /// Same as [`Settings::load`] with explicit arguments and default config
    /// path, so tests can redirect to a temporary directory.
    ///
    /// Precedence: explicit CLI flags, then the config file (`--config`, else
    /// the default path when it exists), then built-in defaults.
    pub fn load_from_args(
        args: Vec<std::ffi::OsString>,
        default_config_path: &Path,
    ) -> Result<(Self, EngineConfig)> {
        let matches = Settings::command().get_matches_from(args);
        let mut settings = Settings::from_arg_matches(&matches)
            .map_err(|e| CapacityError::Configuration(e.to_string()))?;

        let mut config = match &settings.config {
            Some(path) => EngineConfig::load_from(path)?,
            None if default_config_path.exists() => EngineConfig::load_from(default_config_path)?,
            None => EngineConfig::default(),
        };

        settings.apply_overrides(&matches, &mut config);

        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        if settings.capacity_ceiling.is_some() {
            settings.utilization = true;
        }

        config.validate()?;
        Ok((settings, config))
    }

    /// Overlay CLI values onto `config`. Optional flags win whenever given;
    /// flags with defaults win only when typed on the command line.
    fn apply_overrides(&self, matches: &clap::ArgMatches, config: &mut EngineConfig) {
        if let Some(c) = self.capacity_ceiling {
            config.hhs_capacity_ceiling = Some(c);
        }
        if let Some(t) = self.pressure_threshold {
            config.pressure_threshold = t;
        }
        if let Some(d) = self.start_date {
            config.start_date = Some(d);
        }
        if let Some(d) = self.end_date {
            config.end_date = Some(d);
        }
        // NOTE: clap stores the arg id using the *field name* (underscores).
        if is_arg_explicitly_set(matches, "strain_window") {
            config.strain_window_min_days = self.strain_window;
        }
        if is_arg_explicitly_set(matches, "outlier_zscore") {
            config.outlier_zscore_threshold = self.outlier_zscore;
        }
        if is_arg_explicitly_set(matches, "discontinuity_percentile") {
            config.discontinuity_percentile_threshold = self.discontinuity_percentile;
        }
        if is_arg_explicitly_set(matches, "trailing_window") {
            config.trailing_window_periods = self.trailing_window;
        }
        if is_arg_explicitly_set(matches, "load_percentile") {
            config.load_percentile_threshold = self.load_percentile;
        }
        if is_arg_explicitly_set(matches, "duplicates") {
            config.duplicate_policy = self.duplicates;
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
