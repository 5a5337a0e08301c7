//! Data quality validator.
//!
//! Produces advisory [`QualityFlag`]s for a normalized record series. The
//! validator is fail-open: it never drops records and never returns an error.

use capacity_core::models::{CountField, DailyRecord, QualityFlag, QualityFlagKind};
use capacity_core::settings::EngineConfig;
use capacity_core::stats::{percentile_of, z_score};
use capacity_core::time_utils::dates_between;
use chrono::{Days, NaiveDate};
use tracing::debug;

use crate::normalizer::DuplicateGroup;

/// Gap length, in days, at which a missing-day flag reaches full severity.
const FULL_SEVERITY_GAP_DAYS: f64 = 7.0;

/// Minimum prior observations before an outlier z-score is trusted.
const MIN_OUTLIER_OBSERVATIONS: usize = 3;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Thresholds used by [`QualityValidator`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    pub outlier_zscore_threshold: f64,
    pub trailing_window_periods: usize,
    pub discontinuity_percentile_threshold: f64,
    /// `None` compares each change against every change in the series.
    pub discontinuity_window_periods: Option<usize>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ValidatorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            outlier_zscore_threshold: config.outlier_zscore_threshold,
            trailing_window_periods: config.trailing_window_periods,
            discontinuity_percentile_threshold: config.discontinuity_percentile_threshold,
            discontinuity_window_periods: config.discontinuity_window_periods,
        }
    }
}

// ── QualityValidator ──────────────────────────────────────────────────────────

/// Runs every quality rule over a sorted record series.
#[derive(Debug, Clone, Default)]
pub struct QualityValidator {
    config: ValidatorConfig,
}

impl QualityValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Flag `records` (sorted by date, unique dates, reported days only).
    ///
    /// `duplicates` are the groups the normalizer merged under an explicit
    /// duplicate policy. The result is ordered by date, then kind, then field.
    pub fn validate(
        &self,
        records: &[DailyRecord],
        duplicates: &[DuplicateGroup],
    ) -> Vec<QualityFlag> {
        let mut flags = Vec::new();
        flags.extend(detect_gaps(records));
        flags.extend(detect_duplicates(duplicates));
        flags.extend(detect_negatives(records));
        flags.extend(self.detect_outliers(records));
        flags.extend(self.detect_discontinuities(records));
        flags.extend(detect_inconsistencies(records));

        flags.sort_by(|a, b| (a.date, a.kind, a.field).cmp(&(b.date, b.kind, b.field)));
        debug!(
            "validated {} records: {} quality flags",
            records.len(),
            flags.len()
        );
        flags
    }

    /// z-score of each value against the preceding `trailing_window_periods`
    /// observations of the same field.
    fn detect_outliers(&self, records: &[DailyRecord]) -> Vec<QualityFlag> {
        let threshold = self.config.outlier_zscore_threshold;
        let window = self.config.trailing_window_periods.max(1);
        let mut flags = Vec::new();

        for field in CountField::ALL {
            let values: Vec<f64> = records.iter().map(|r| field.value(r) as f64).collect();
            for (i, record) in records.iter().enumerate() {
                if i < MIN_OUTLIER_OBSERVATIONS {
                    continue;
                }
                let prior = &values[i.saturating_sub(window)..i];
                if prior.len() < MIN_OUTLIER_OBSERVATIONS {
                    continue;
                }
                let Some(z) = z_score(values[i], prior) else {
                    continue;
                };
                if z.abs() > threshold {
                    flags.push(
                        QualityFlag::new(
                            record.date,
                            QualityFlagKind::Outlier,
                            1.0 - threshold / z.abs(),
                            format!(
                                "{} = {} has z-score {:.2} against the previous {} days",
                                field,
                                field.value(record),
                                z,
                                prior.len()
                            ),
                        )
                        .with_field(field),
                    );
                }
            }
        }
        flags
    }

    /// Day-over-day jumps above the configured percentile of all jumps.
    ///
    /// Only records exactly one calendar day apart are compared, so a gap
    /// never masquerades as a jump.
    fn detect_discontinuities(&self, records: &[DailyRecord]) -> Vec<QualityFlag> {
        let p = self.config.discontinuity_percentile_threshold;
        let mut flags = Vec::new();

        for field in CountField::ALL {
            let changes: Vec<(NaiveDate, i64)> = records
                .windows(2)
                .filter(|pair| pair[0].date.checked_add_days(Days::new(1)) == Some(pair[1].date))
                .map(|pair| {
                    let delta = (field.value(&pair[1]) - field.value(&pair[0])).abs();
                    (pair[1].date, delta)
                })
                .collect();
            if changes.is_empty() {
                continue;
            }

            let deltas: Vec<i64> = changes.iter().map(|(_, d)| *d).collect();
            let global = percentile_of(&deltas, p);

            for (i, &(date, delta)) in changes.iter().enumerate() {
                let threshold = match self.config.discontinuity_window_periods {
                    None => global,
                    Some(w) => {
                        let start = (i + 1).saturating_sub(w.max(1));
                        percentile_of(&deltas[start..=i], p)
                    }
                };
                let delta_f = delta as f64;
                if delta_f > threshold {
                    let score = if delta_f > 0.0 {
                        1.0 - threshold.max(0.0) / delta_f
                    } else {
                        0.0
                    };
                    flags.push(
                        QualityFlag::new(
                            date,
                            QualityFlagKind::Discontinuity,
                            score,
                            format!(
                                "{} changed by {} day-over-day (p{} threshold {:.1})",
                                field, delta, p, threshold
                            ),
                        )
                        .with_field(field),
                    );
                }
            }
        }
        flags
    }
}

// ── Stateless rules ───────────────────────────────────────────────────────────

/// One `MissingDay` flag per calendar date absent between reported days.
fn detect_gaps(records: &[DailyRecord]) -> Vec<QualityFlag> {
    let mut flags = Vec::new();
    for pair in records.windows(2) {
        let missing = dates_between(pair[0].date, pair[1].date);
        let score = missing.len() as f64 / FULL_SEVERITY_GAP_DAYS;
        for date in &missing {
            flags.push(QualityFlag::new(
                *date,
                QualityFlagKind::MissingDay,
                score,
                format!(
                    "no record between {} and {} ({} day gap); values carried forward",
                    pair[0].date,
                    pair[1].date,
                    missing.len()
                ),
            ));
        }
    }
    flags
}

/// One `DuplicateDay` flag per duplicated date, scored by the largest
/// relative disagreement between the duplicate rows.
fn detect_duplicates(groups: &[DuplicateGroup]) -> Vec<QualityFlag> {
    groups
        .iter()
        .map(|group| {
            let mut score = 0.0_f64;
            for (i, a) in group.rows.iter().enumerate() {
                for b in &group.rows[i + 1..] {
                    for (field, va) in &a.values {
                        if let Some(vb) = b.values.get(field) {
                            score = score.max(relative_delta(*va, *vb));
                        }
                    }
                }
            }
            let rows: Vec<String> = group.rows.iter().map(|r| r.row.to_string()).collect();
            QualityFlag::new(
                group.date,
                QualityFlagKind::DuplicateDay,
                score,
                format!(
                    "{} rows for this date in {} (rows {})",
                    group.rows.len(),
                    group.source,
                    rows.join(", ")
                ),
            )
        })
        .collect()
}

fn relative_delta(a: i64, b: i64) -> f64 {
    let denom = a.abs().max(b.abs()).max(1) as f64;
    ((a - b).abs() as f64 / denom).min(1.0)
}

/// Negative counts are always high severity.
fn detect_negatives(records: &[DailyRecord]) -> Vec<QualityFlag> {
    let mut flags = Vec::new();
    for record in records {
        for field in CountField::ALL {
            let value = field.value(record);
            if value < 0 {
                flags.push(
                    QualityFlag::new(
                        record.date,
                        QualityFlagKind::NegativeValue,
                        1.0,
                        format!("{field} is negative ({value})"),
                    )
                    .with_field(field),
                );
            }
        }
    }
    flags
}

/// Cross-field checks: outflows larger than the stock they leave from.
fn detect_inconsistencies(records: &[DailyRecord]) -> Vec<QualityFlag> {
    let mut flags = Vec::new();
    for r in records {
        if r.hhs_transfers_in > r.cbp_active {
            flags.push(
                QualityFlag::new(
                    r.date,
                    QualityFlagKind::TransferExceedsCustody,
                    excess_ratio(r.hhs_transfers_in, r.cbp_active),
                    format!(
                        "{} transferred to HHS but only {} in CBP custody",
                        r.hhs_transfers_in, r.cbp_active
                    ),
                )
                .with_field(CountField::HhsTransfersIn),
            );
        }
        if r.discharges_to_sponsor > r.hhs_active {
            flags.push(
                QualityFlag::new(
                    r.date,
                    QualityFlagKind::DischargeExceedsCare,
                    excess_ratio(r.discharges_to_sponsor, r.hhs_active),
                    format!(
                        "{} discharged but only {} in HHS care",
                        r.discharges_to_sponsor, r.hhs_active
                    ),
                )
                .with_field(CountField::DischargesToSponsor),
            );
        }
    }
    flags
}

fn excess_ratio(outflow: i64, stock: i64) -> f64 {
    (outflow - stock) as f64 / outflow.max(1) as f64
}

// ── Tests ─────────────────────────────────────────────────────────────────────
