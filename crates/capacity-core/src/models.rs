use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Granularity ───────────────────────────────────────────────────────────────

/// Time-bucket resolution at which metrics are reported.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One period per calendar day.
    Daily,
    /// ISO calendar weeks, Monday start.
    Weekly,
    /// Calendar months.
    Monthly,
}

impl Granularity {
    /// Lower-case label used in keys, logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── CountField ────────────────────────────────────────────────────────────────

/// Largest magnitude accepted for a single daily count.
///
/// Keeps every derived sum (loads, pressures, multi-year backlog folds and
/// period totals) far inside `i64`.
pub const MAX_ABS_COUNT: i64 = 1_000_000_000;

/// The five raw count columns of a [`DailyRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountField {
    CbpIntake,
    CbpActive,
    HhsTransfersIn,
    HhsActive,
    DischargesToSponsor,
}

impl CountField {
    /// Every count field, in canonical column order.
    pub const ALL: [CountField; 5] = [
        CountField::CbpIntake,
        CountField::CbpActive,
        CountField::HhsTransfersIn,
        CountField::HhsActive,
        CountField::DischargesToSponsor,
    ];

    /// Canonical column name.
    pub fn name(&self) -> &'static str {
        match self {
            CountField::CbpIntake => "cbp_intake",
            CountField::CbpActive => "cbp_active",
            CountField::HhsTransfersIn => "hhs_transfers_in",
            CountField::HhsActive => "hhs_active",
            CountField::DischargesToSponsor => "discharges_to_sponsor",
        }
    }

    /// Flows accumulate over a period; stocks are point-in-time snapshots.
    pub fn is_flow(&self) -> bool {
        !matches!(self, CountField::CbpActive | CountField::HhsActive)
    }

    /// Read this field from `record`.
    pub fn value(&self, record: &DailyRecord) -> i64 {
        match self {
            CountField::CbpIntake => record.cbp_intake,
            CountField::CbpActive => record.cbp_active,
            CountField::HhsTransfersIn => record.hhs_transfers_in,
            CountField::HhsActive => record.hhs_active,
            CountField::DischargesToSponsor => record.discharges_to_sponsor,
        }
    }
}

impl fmt::Display for CountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── DailyRecord ───────────────────────────────────────────────────────────────

/// One calendar day of raw counts in canonical form.
///
/// `date` is the natural key. Counts are signed so that a negative value
/// present in the source survives ingestion and can be flagged by the
/// validator instead of being silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    /// Children newly apprehended / taken into CBP custody that day.
    pub cbp_intake: i64,
    /// Children in CBP custody at the end of the day.
    pub cbp_active: i64,
    /// Children transferred from CBP into HHS care that day.
    pub hhs_transfers_in: i64,
    /// Children in HHS care at the end of the day.
    pub hhs_active: i64,
    /// Children discharged from HHS care to a sponsor that day.
    pub discharges_to_sponsor: i64,
    /// `false` for days synthesized by the gap-fill pre-pass.
    #[serde(default = "default_reported")]
    pub is_reported: bool,
}

fn default_reported() -> bool {
    true
}

impl DailyRecord {
    /// Build a reported record from its five counts.
    pub fn new(
        date: NaiveDate,
        cbp_intake: i64,
        cbp_active: i64,
        hhs_transfers_in: i64,
        hhs_active: i64,
        discharges_to_sponsor: i64,
    ) -> Self {
        Self {
            date,
            cbp_intake,
            cbp_active,
            hhs_transfers_in,
            hhs_active,
            discharges_to_sponsor,
            is_reported: true,
        }
    }

    /// Children in the whole system: CBP custody plus HHS care.
    pub fn total_system_load(&self) -> i64 {
        self.cbp_active + self.hhs_active
    }

    /// Transfers into HHS minus discharges out of it.
    pub fn net_hhs_intake(&self) -> i64 {
        self.hhs_transfers_in - self.discharges_to_sponsor
    }

    /// CBP intake minus everything cleared that day (transfers and discharges).
    ///
    /// Positive means the system is accumulating load faster than it clears it.
    pub fn net_intake_pressure(&self) -> i64 {
        self.cbp_intake - (self.hhs_transfers_in + self.discharges_to_sponsor)
    }

    /// First count whose magnitude exceeds [`MAX_ABS_COUNT`], if any.
    pub fn out_of_range_field(&self) -> Option<CountField> {
        CountField::ALL
            .into_iter()
            .find(|f| f.value(self).unsigned_abs() > MAX_ABS_COUNT.unsigned_abs())
    }

    /// A synthetic copy of this record for `date`, marked as not reported.
    pub fn carried_forward(&self, date: NaiveDate) -> Self {
        Self {
            date,
            is_reported: false,
            ..self.clone()
        }
    }
}

// ── Quality flags ─────────────────────────────────────────────────────────────

/// What a [`QualityFlag`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityFlagKind {
    /// A calendar day with no record between two reported days.
    MissingDay,
    /// A date that appeared more than once in the raw input.
    DuplicateDay,
    /// A count below zero.
    NegativeValue,
    /// A count far outside its trailing-window distribution.
    Outlier,
    /// A day-over-day jump above the configured percentile of all jumps.
    Discontinuity,
    /// An aggregation window not fully covered by the series.
    PartialPeriod,
    /// More children transferred into HHS than were in CBP custody.
    TransferExceedsCustody,
    /// More children discharged than were in HHS care.
    DischargeExceedsCare,
}

impl QualityFlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlagKind::MissingDay => "MissingDay",
            QualityFlagKind::DuplicateDay => "DuplicateDay",
            QualityFlagKind::NegativeValue => "NegativeValue",
            QualityFlagKind::Outlier => "Outlier",
            QualityFlagKind::Discontinuity => "Discontinuity",
            QualityFlagKind::PartialPeriod => "PartialPeriod",
            QualityFlagKind::TransferExceedsCustody => "TransferExceedsCustody",
            QualityFlagKind::DischargeExceedsCare => "DischargeExceedsCare",
        }
    }
}

impl fmt::Display for QualityFlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse severity bucket derived from a flag's numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Bucket a score in `[0, 1]`: below 1/3 is low, below 2/3 medium, else high.
    pub fn from_score(score: f64) -> Self {
        if score < 1.0 / 3.0 {
            Severity::Low
        } else if score < 2.0 / 3.0 {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

/// Advisory data-quality annotation keyed by date.
///
/// Flags never suppress computation; consumers decide what to do with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub date: NaiveDate,
    pub kind: QualityFlagKind,
    pub severity: Severity,
    /// Magnitude of the problem, clamped to `[0, 1]`.
    pub score: f64,
    /// The count field concerned, when the flag is about a single column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<CountField>,
    pub detail: String,
}

impl QualityFlag {
    /// Create a flag; `score` is clamped and drives [`Severity`].
    pub fn new(
        date: NaiveDate,
        kind: QualityFlagKind,
        score: f64,
        detail: impl Into<String>,
    ) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            date,
            kind,
            severity: Severity::from_score(score),
            score,
            field: None,
            detail: detail.into(),
        }
    }

    /// Attach the count field this flag refers to.
    pub fn with_field(mut self, field: CountField) -> Self {
        self.field = Some(field);
        self
    }
}

// ── Derived metrics ───────────────────────────────────────────────────────────

/// Parameters of the strain and high-load indicators, carried with a series
/// so that re-aggregation can recompute them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainParams {
    /// Pressure strictly above this value counts towards strain.
    pub pressure_threshold: f64,
    /// Consecutive above-threshold periods required before strain is reported.
    pub window_min_periods: usize,
    /// Percentile of total system load above which a period is high-load.
    pub load_percentile_threshold: f64,
}

impl Default for StrainParams {
    fn default() -> Self {
        Self {
            pressure_threshold: 0.0,
            window_min_periods: 3,
            load_percentile_threshold: 85.0,
        }
    }
}

/// One period of derived indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricPoint {
    /// First calendar day of the period.
    pub date: NaiveDate,
    /// Last calendar day of the period (equal to `date` at daily granularity).
    pub period_end: NaiveDate,
    pub net_intake_pressure: i64,
    pub backlog_estimate: i64,
    pub strain_flag: bool,
    /// `None` when no capacity ceiling is configured.
    pub capacity_utilization: Option<f64>,

    pub cbp_intake: i64,
    pub cbp_active: i64,
    pub hhs_transfers_in: i64,
    pub hhs_active: i64,
    pub discharges_to_sponsor: i64,
    pub total_system_load: i64,
    pub net_hhs_intake: i64,
    /// Consecutive periods, ending here, with positive net HHS intake.
    pub backlog_streak: u32,
    /// High total load together with positive net HHS intake.
    pub high_load_day: bool,
    /// At least one day in the period was actually reported.
    pub is_reported: bool,
    /// The period window is not fully covered by the series.
    pub partial_period: bool,
    /// Number of daily observations (reported or filled) in the period.
    pub days_covered: u32,
}

/// Ordered derived indicators at one granularity.
///
/// Recomputed on demand; a pure function of its inputs with no identity of
/// its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricSeries {
    pub granularity: Granularity,
    pub strain_params: StrainParams,
    pub points: Vec<DerivedMetricPoint>,
}

impl DerivedMetricSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The most recent period containing at least one reported day.
    pub fn latest_reported(&self) -> Option<&DerivedMetricPoint> {
        self.points.iter().rev().find(|p| p.is_reported)
    }
}
