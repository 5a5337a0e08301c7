//! Granularity aggregation.
//!
//! Resamples daily data into ISO weeks or calendar months. Flows are summed
//! over the window, stocks take the last value in the window, and period
//! indicators are recomputed over the resulting periods.

use std::collections::BTreeMap;

use capacity_core::error::{CapacityError, Result};
use capacity_core::models::{
    DailyRecord, DerivedMetricPoint, DerivedMetricSeries, Granularity, QualityFlag,
    QualityFlagKind,
};
use capacity_core::time_utils::{days_in_period, period_end, period_start};
use chrono::NaiveDate;

use crate::gap_fill::fill_gaps;
use crate::metrics::apply_period_indicators;

// ── Series aggregation ────────────────────────────────────────────────────────

/// Resample `series` to `target`.
///
/// Same granularity is a no-op. Only a daily series can be coarsened; any
/// other combination is a [`CapacityError::Resample`]. Returns the new series
/// and one `PartialPeriod` flag per window the series does not fully cover.
pub fn aggregate_series(
    series: &DerivedMetricSeries,
    target: Granularity,
) -> Result<(DerivedMetricSeries, Vec<QualityFlag>)> {
    if series.granularity == target {
        return Ok((series.clone(), Vec::new()));
    }
    if series.granularity != Granularity::Daily {
        return Err(CapacityError::Resample {
            from: series.granularity.to_string(),
            to: target.to_string(),
        });
    }

    let mut buckets: BTreeMap<NaiveDate, Vec<&DerivedMetricPoint>> = BTreeMap::new();
    for point in &series.points {
        buckets
            .entry(period_start(point.date, target))
            .or_default()
            .push(point);
    }

    let mut points = Vec::with_capacity(buckets.len());
    let mut flags = Vec::new();
    for (start, days) in buckets {
        let point = combine_points(start, target, &days);
        if point.partial_period {
            flags.push(partial_period_flag(point.date, point.days_covered, target));
        }
        points.push(point);
    }

    apply_period_indicators(&mut points, &series.strain_params);

    Ok((
        DerivedMetricSeries {
            granularity: target,
            strain_params: series.strain_params,
            points,
        },
        flags,
    ))
}

/// Fold the daily points of one window into a period point.
fn combine_points(
    start: NaiveDate,
    granularity: Granularity,
    days: &[&DerivedMetricPoint],
) -> DerivedMetricPoint {
    let sum = |f: fn(&DerivedMetricPoint) -> i64| days.iter().map(|p| f(p)).sum::<i64>();
    let last = days.last().copied();
    let last_stock = |f: fn(&DerivedMetricPoint) -> i64| last.map(f).unwrap_or(0);

    let days_covered: u32 = days.iter().map(|p| p.days_covered).sum();

    DerivedMetricPoint {
        date: start,
        period_end: period_end(start, granularity),
        net_intake_pressure: sum(|p| p.net_intake_pressure),
        backlog_estimate: last_stock(|p| p.backlog_estimate),
        strain_flag: false,
        capacity_utilization: last.and_then(|p| p.capacity_utilization),
        cbp_intake: sum(|p| p.cbp_intake),
        cbp_active: last_stock(|p| p.cbp_active),
        hhs_transfers_in: sum(|p| p.hhs_transfers_in),
        hhs_active: last_stock(|p| p.hhs_active),
        discharges_to_sponsor: sum(|p| p.discharges_to_sponsor),
        total_system_load: last_stock(|p| p.total_system_load),
        net_hhs_intake: sum(|p| p.net_hhs_intake),
        backlog_streak: 0,
        high_load_day: false,
        is_reported: days.iter().any(|p| p.is_reported),
        partial_period: days_covered < days_in_period(start, granularity),
        days_covered,
    }
}

fn partial_period_flag(
    start: NaiveDate,
    days_covered: u32,
    granularity: Granularity,
) -> QualityFlag {
    let expected = days_in_period(start, granularity);
    let missing = expected.saturating_sub(days_covered);
    QualityFlag::new(
        start,
        QualityFlagKind::PartialPeriod,
        f64::from(missing) / f64::from(expected),
        format!(
            "{} period {}..{} covers {} of {} days",
            granularity,
            start,
            period_end(start, granularity),
            days_covered,
            expected
        ),
    )
}

// ── Record aggregation ────────────────────────────────────────────────────────

/// Resample raw records to period totals, one record per period keyed by the
/// period's first day.
///
/// Gaps are filled first, so a window's flows include carried-forward days.
/// Uses the same rules as [`aggregate_series`]: flows summed, stocks last,
/// and a `PartialPeriod` flag for each window with fewer days than the
/// calendar period. A period is reported when any of its days is.
pub fn aggregate_records(
    records: &[DailyRecord],
    granularity: Granularity,
) -> (Vec<DailyRecord>, Vec<QualityFlag>) {
    let filled = fill_gaps(records);
    if granularity == Granularity::Daily {
        return (filled.records, Vec::new());
    }

    let mut buckets: BTreeMap<NaiveDate, (DailyRecord, u32)> = BTreeMap::new();
    for r in &filled.records {
        let start = period_start(r.date, granularity);
        buckets
            .entry(start)
            .and_modify(|(acc, days)| {
                acc.cbp_intake += r.cbp_intake;
                acc.hhs_transfers_in += r.hhs_transfers_in;
                acc.discharges_to_sponsor += r.discharges_to_sponsor;
                acc.cbp_active = r.cbp_active;
                acc.hhs_active = r.hhs_active;
                acc.is_reported |= r.is_reported;
                *days += 1;
            })
            .or_insert_with(|| {
                let first = DailyRecord {
                    date: start,
                    ..r.clone()
                };
                (first, 1)
            });
    }

    let mut out = Vec::with_capacity(buckets.len());
    let mut flags = Vec::new();
    for (start, (record, days_covered)) in buckets {
        if days_covered < days_in_period(start, granularity) {
            flags.push(partial_period_flag(start, days_covered, granularity));
        }
        out.push(record);
    }
    (out, flags)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
