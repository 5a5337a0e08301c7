//! Strain window detection.
//!
//! An explicit state machine over a period pressure series: a period is
//! strained once `window_min_periods` consecutive periods have exceeded the
//! pressure threshold, and any period at or below the threshold resets it.

use serde::{Deserialize, Serialize};

use capacity_core::models::StrainParams;

/// Strain state after observing a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrainState {
    /// Last period was at or below the threshold.
    Normal,
    /// `n` consecutive above-threshold periods, not yet enough for strain.
    Accumulating(usize),
    /// At least the minimum window of consecutive above-threshold periods.
    Strained,
}

impl StrainState {
    /// Advance the machine by one period.
    pub fn next(self, pressure: f64, params: &StrainParams) -> Self {
        if pressure <= params.pressure_threshold {
            return StrainState::Normal;
        }
        let run = match self {
            StrainState::Normal => 1,
            StrainState::Accumulating(n) => n + 1,
            StrainState::Strained => return StrainState::Strained,
        };
        if run >= params.window_min_periods.max(1) {
            StrainState::Strained
        } else {
            StrainState::Accumulating(run)
        }
    }

    pub fn is_strained(&self) -> bool {
        matches!(self, StrainState::Strained)
    }
}

/// Strain flag for every period of `pressures`.
pub fn strain_flags(pressures: &[i64], params: &StrainParams) -> Vec<bool> {
    pressures
        .iter()
        .scan(StrainState::Normal, |state, &p| {
            *state = state.next(p as f64, params);
            Some(state.is_strained())
        })
        .collect()
}

/// Consecutive positive values ending at each index.
pub fn positive_streaks(values: &[i64]) -> Vec<u32> {
    values
        .iter()
        .scan(0u32, |run, &v| {
            *run = if v > 0 { *run + 1 } else { 0 };
            Some(*run)
        })
        .collect()
}
