//! Main analysis pipeline.
//!
//! Normalizes the input tables, applies the date range, validates, fills
//! gaps, computes the derived series at the requested granularity and
//! assembles the [`AnalysisResult`] consumed by a dashboard or report layer.

use std::collections::BTreeMap;
use std::path::Path;

use capacity_core::error::{CapacityError, Result};
use capacity_core::models::{
    DerivedMetricSeries, Granularity, QualityFlag, QualityFlagKind, MAX_ABS_COUNT,
};
use capacity_core::settings::EngineConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gap_fill::fill_gaps;
use crate::metrics::MetricsEngine;
use crate::normalizer::{NormalizedBatch, Normalizer, RawTable};
use crate::reader::load_tables;
use crate::validator::{QualityValidator, ValidatorConfig};

// ── Public types ──────────────────────────────────────────────────────────────

/// A metric that could not be computed; the rest of the result is intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricError {
    pub metric: String,
    pub message: String,
}

/// Headline figures for the most recent reported period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    /// First day of the latest reported period, `None` for an empty series.
    pub period: Option<NaiveDate>,
    pub total_system_load: i64,
    pub cbp_active: i64,
    pub hhs_active: i64,
    pub net_hhs_intake: i64,
    pub backlog_streak: u32,
    pub backlog_estimate: i64,
    pub capacity_utilization: Option<f64>,
    /// Periods with the strain flag set.
    pub strain_periods: usize,
    /// Periods marked high-load.
    pub high_load_periods: usize,
}

impl KpiSummary {
    pub fn from_series(series: &DerivedMetricSeries) -> Self {
        let strain_periods = series.points.iter().filter(|p| p.strain_flag).count();
        let high_load_periods = series.points.iter().filter(|p| p.high_load_day).count();
        match series.latest_reported() {
            Some(p) => Self {
                period: Some(p.date),
                total_system_load: p.total_system_load,
                cbp_active: p.cbp_active,
                hhs_active: p.hhs_active,
                net_hhs_intake: p.net_hhs_intake,
                backlog_streak: p.backlog_streak,
                backlog_estimate: p.backlog_estimate,
                capacity_utilization: p.capacity_utilization,
                strain_periods,
                high_load_periods,
            },
            None => Self {
                strain_periods,
                high_load_periods,
                ..Default::default()
            },
        }
    }
}

/// Counters describing one analysis run. Contains no wall-clock values, so
/// identical inputs produce identical metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub sources: usize,
    /// Raw data rows read across all sources.
    pub rows_read: usize,
    /// Canonical records after normalization.
    pub records_ingested: usize,
    /// Records left after the date range filter.
    pub records_in_range: usize,
    /// In-range dates the input marked as unreported.
    pub days_unreported: usize,
    /// Days synthesized by gap filling.
    pub days_filled: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub flags_by_kind: BTreeMap<QualityFlagKind, usize>,
}

/// The complete output of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub granularity: Granularity,
    pub series: DerivedMetricSeries,
    /// Quality flags keyed by date.
    pub flags: BTreeMap<NaiveDate, Vec<QualityFlag>>,
    pub summary: KpiSummary,
    pub metric_errors: Vec<MetricError>,
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    pub fn flag_count(&self) -> usize {
        self.flags.values().map(Vec::len).sum()
    }
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Load CSV input from `input` (file or directory) and analyze it.
pub fn analyze_path(
    input: &Path,
    granularity: Granularity,
    config: &EngineConfig,
    with_utilization: bool,
) -> Result<AnalysisResult> {
    let tables = load_tables(input)?;
    analyze_tables(&tables, granularity, config, with_utilization)
}

/// Normalize `tables` and analyze the resulting series.
pub fn analyze_tables(
    tables: &[RawTable],
    granularity: Granularity,
    config: &EngineConfig,
    with_utilization: bool,
) -> Result<AnalysisResult> {
    let batch = Normalizer::from_config(config).normalize(tables)?;
    let mut result = analyze_batch(batch, granularity, config, with_utilization)?;
    result.metadata.sources = tables.len();
    Ok(result)
}

/// Run the pipeline over an already-normalized batch.
///
/// 0. Reject counts outside the supported magnitude.
/// 1. Restrict records and duplicate groups to the configured date range.
/// 2. Validate the reported records.
/// 3. Fill gaps and compute the daily series.
/// 4. Aggregate to `granularity`.
/// 5. Assemble the result.
pub fn analyze_batch(
    batch: NormalizedBatch,
    granularity: Granularity,
    config: &EngineConfig,
    with_utilization: bool,
) -> Result<AnalysisResult> {
    let NormalizedBatch {
        records,
        duplicates,
        rows_read,
        unreported,
    } = batch;
    let records_ingested = records.len();

    // ── Step 0: Bounds ────────────────────────────────────────────────────────
    for (idx, record) in records.iter().enumerate() {
        if let Some(field) = record.out_of_range_field() {
            return Err(CapacityError::schema(
                "<records>",
                idx + 1,
                field.name(),
                format!(
                    "count {} on {} exceeds the limit of {MAX_ABS_COUNT}",
                    field.value(record),
                    record.date
                ),
            ));
        }
    }

    // ── Step 1: Date range ────────────────────────────────────────────────────
    let records: Vec<_> = records
        .into_iter()
        .filter(|r| config.in_date_range(r.date))
        .collect();
    let duplicates: Vec<_> = duplicates
        .into_iter()
        .filter(|g| config.in_date_range(g.date))
        .collect();
    let days_unreported = unreported
        .iter()
        .filter(|date| config.in_date_range(**date))
        .count();
    if records.is_empty() {
        warn!("no records in the selected date range");
    }

    // ── Step 2: Validate ──────────────────────────────────────────────────────
    let validator = QualityValidator::new(ValidatorConfig::from(config));
    let mut all_flags = validator.validate(&records, &duplicates);

    // ── Step 3: Gap fill + metrics ────────────────────────────────────────────
    let filled = fill_gaps(&records);
    let mut metric_errors = Vec::new();
    if with_utilization {
        if let Err(e) = config.capacity_ceiling() {
            metric_errors.push(MetricError {
                metric: "capacity_utilization".to_string(),
                message: e.to_string(),
            });
        }
    }
    let engine = MetricsEngine::from_config(config, with_utilization);

    // ── Step 4: Aggregate ─────────────────────────────────────────────────────
    let (series, period_flags) = engine.compute(&filled.records, granularity)?;
    all_flags.extend(period_flags);

    // ── Step 5: Build result ──────────────────────────────────────────────────
    let flags = group_by_date(all_flags);
    let mut flags_by_kind: BTreeMap<QualityFlagKind, usize> = BTreeMap::new();
    for flag in flags.values().flatten() {
        *flags_by_kind.entry(flag.kind).or_insert(0) += 1;
    }

    let metadata = AnalysisMetadata {
        sources: 0,
        rows_read,
        records_ingested,
        records_in_range: records.len(),
        days_unreported,
        days_filled: filled.filled_days(),
        first_date: records.first().map(|r| r.date),
        last_date: records.last().map(|r| r.date),
        flags_by_kind,
    };

    debug!(
        "analysis complete: {} {} points, {} flags, {} metric errors",
        series.len(),
        granularity,
        flags.values().map(Vec::len).sum::<usize>(),
        metric_errors.len()
    );

    Ok(AnalysisResult {
        granularity,
        summary: KpiSummary::from_series(&series),
        series,
        flags,
        metric_errors,
        metadata,
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn group_by_date(mut flags: Vec<QualityFlag>) -> BTreeMap<NaiveDate, Vec<QualityFlag>> {
    flags.sort_by(|a, b| (a.date, a.kind, a.field).cmp(&(b.date, b.kind, b.field)));
    let mut grouped: BTreeMap<NaiveDate, Vec<QualityFlag>> = BTreeMap::new();
    for flag in flags {
        grouped.entry(flag.date).or_default().push(flag);
    }
    grouped
}

// ── Tests ─────────────────────────────────────────────────────────────────────
