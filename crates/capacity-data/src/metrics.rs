//! Derived metrics engine.
//!
//! A pure function of (gap-filled daily records, granularity, parameters):
//! net intake pressure, the backlog fold, capacity utilization and the
//! period indicators (strain, backlog streak, high load).

use capacity_core::error::{CapacityError, Result};
use capacity_core::models::{
    DailyRecord, DerivedMetricPoint, DerivedMetricSeries, Granularity, QualityFlag, StrainParams,
};
use capacity_core::settings::EngineConfig;
use capacity_core::stats::percentile_of;
use tracing::debug;

use crate::aggregator::aggregate_series;
use crate::strain::{positive_streaks, strain_flags};

// ── Building blocks ───────────────────────────────────────────────────────────

/// Running backlog: `[seed, seed + p0, seed + p0 + p1, ...]`.
///
/// The output is one element longer than `pressures`; element `i + 1` is the
/// backlog after period `i`.
pub fn backlog_recurrence(seed: i64, pressures: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(pressures.len() + 1);
    out.push(seed);
    let mut acc = seed;
    for p in pressures {
        acc += p;
        out.push(acc);
    }
    out
}

/// `hhs_active / ceiling`, or a configuration error when no usable ceiling
/// is configured.
pub fn compute_capacity_utilization(hhs_active: i64, ceiling: Option<u64>) -> Result<f64> {
    match ceiling {
        Some(c) if c > 0 => Ok(hhs_active as f64 / c as f64),
        _ => Err(CapacityError::Configuration(
            "hhs_capacity_ceiling is not set; capacity utilization cannot be computed".to_string(),
        )),
    }
}

/// Recompute strain, backlog streak and high-load indicators over `points`
/// at whatever granularity they are expressed in.
///
/// The high-load cutoff is a percentile of reported points only, and only
/// reported points can be high-load.
pub fn apply_period_indicators(points: &mut [DerivedMetricPoint], params: &StrainParams) {
    let pressures: Vec<i64> = points.iter().map(|p| p.net_intake_pressure).collect();
    let net_hhs: Vec<i64> = points.iter().map(|p| p.net_hhs_intake).collect();
    let loads: Vec<i64> = points
        .iter()
        .filter(|p| p.is_reported)
        .map(|p| p.total_system_load)
        .collect();

    let strain = strain_flags(&pressures, params);
    let streaks = positive_streaks(&net_hhs);
    let load_cutoff = percentile_of(&loads, params.load_percentile_threshold);

    for (i, point) in points.iter_mut().enumerate() {
        point.strain_flag = strain[i];
        point.backlog_streak = streaks[i];
        point.high_load_day = point.is_reported
            && point.total_system_load as f64 > load_cutoff
            && point.net_hhs_intake > 0;
    }
}

// ── MetricsEngine ─────────────────────────────────────────────────────────────

/// Computes a [`DerivedMetricSeries`] from gap-filled daily records.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    params: StrainParams,
    capacity_ceiling: Option<u64>,
}

impl MetricsEngine {
    /// `capacity_ceiling = None` leaves utilization empty.
    pub fn new(params: StrainParams, capacity_ceiling: Option<u64>) -> Self {
        Self {
            params,
            capacity_ceiling,
        }
    }

    /// Engine with utilization enabled only when `with_utilization` is set.
    pub fn from_config(config: &EngineConfig, with_utilization: bool) -> Self {
        let ceiling = if with_utilization {
            config.hhs_capacity_ceiling
        } else {
            None
        };
        Self::new(config.strain_params(), ceiling)
    }

    pub fn strain_params(&self) -> &StrainParams {
        &self.params
    }

    /// Daily series over contiguous records (see [`fill_gaps`](crate::gap_fill::fill_gaps)).
    pub fn daily_series(&self, records: &[DailyRecord]) -> DerivedMetricSeries {
        let pressures: Vec<i64> = records.iter().map(DailyRecord::net_intake_pressure).collect();
        let seed = records.first().map(|r| r.cbp_active).unwrap_or(0);
        let backlog = backlog_recurrence(seed, &pressures);

        let mut points: Vec<DerivedMetricPoint> = records
            .iter()
            .enumerate()
            .map(|(i, r)| DerivedMetricPoint {
                date: r.date,
                period_end: r.date,
                net_intake_pressure: pressures[i],
                backlog_estimate: backlog[i + 1],
                strain_flag: false,
                capacity_utilization: compute_capacity_utilization(
                    r.hhs_active,
                    self.capacity_ceiling,
                )
                .ok(),
                cbp_intake: r.cbp_intake,
                cbp_active: r.cbp_active,
                hhs_transfers_in: r.hhs_transfers_in,
                hhs_active: r.hhs_active,
                discharges_to_sponsor: r.discharges_to_sponsor,
                total_system_load: r.total_system_load(),
                net_hhs_intake: r.net_hhs_intake(),
                backlog_streak: 0,
                high_load_day: false,
                is_reported: r.is_reported,
                partial_period: false,
                days_covered: 1,
            })
            .collect();

        apply_period_indicators(&mut points, &self.params);

        DerivedMetricSeries {
            granularity: Granularity::Daily,
            strain_params: self.params,
            points,
        }
    }

    /// Series at `granularity`, plus any partial-period flags produced by
    /// aggregation.
    pub fn compute(
        &self,
        records: &[DailyRecord],
        granularity: Granularity,
    ) -> Result<(DerivedMetricSeries, Vec<QualityFlag>)> {
        let daily = self.daily_series(records);
        let (series, flags) = aggregate_series(&daily, granularity)?;
        debug!(
            "computed {} {} points from {} daily records",
            series.len(),
            granularity,
            records.len()
        );
        Ok((series, flags))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
