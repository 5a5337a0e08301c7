//! Gap-fill pre-pass.
//!
//! Turns a sorted, possibly gappy record list into a contiguous daily series
//! before any fold runs over it. Synthetic days carry forward the previous
//! reported record and are marked `is_reported = false`.

use capacity_core::models::DailyRecord;
use capacity_core::time_utils::dates_between;
use chrono::NaiveDate;

/// A contiguous daily series plus the dates that had to be synthesized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilledSeries {
    pub records: Vec<DailyRecord>,
    pub missing: Vec<NaiveDate>,
}

impl FilledSeries {
    /// Number of synthesized days.
    pub fn filled_days(&self) -> usize {
        self.missing.len()
    }
}

/// Fill every missing calendar day of `records` (sorted, unique dates).
pub fn fill_gaps(records: &[DailyRecord]) -> FilledSeries {
    let mut out = FilledSeries {
        records: Vec::with_capacity(records.len()),
        missing: Vec::new(),
    };

    let mut prev: Option<&DailyRecord> = None;
    for record in records {
        if let Some(p) = prev {
            for date in dates_between(p.date, record.date) {
                out.records.push(p.carried_forward(date));
                out.missing.push(date);
            }
        }
        out.records.push(record.clone());
        prev = Some(record);
    }
    out
}
