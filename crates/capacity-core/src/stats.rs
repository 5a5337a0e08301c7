//! Small descriptive-statistics helpers shared by the validator and the
//! metrics engine.

// ── Percentile helper ─────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm used by NumPy's `percentile` function).
///
/// Returns `0.0` for an empty slice. `p` is clamped to `[0, 100]`.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let len = sorted_data.len();
    if len == 1 {
        return sorted_data[0];
    }
    let p = p.clamp(0.0, 100.0);
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted_data[lo];
    }
    let frac = rank - lo as f64;
    sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo])
}

/// Percentile of an unsorted sample of integers.
pub fn percentile_of(values: &[i64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, p)
}

// ── Moments ───────────────────────────────────────────────────────────────────

/// Arithmetic mean, or `None` for an empty sample.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, or `None` for an empty sample.
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// z-score of `value` against `window`.
///
/// `None` when the window is empty or has zero spread, since the score is
/// undefined there.
pub fn z_score(value: f64, window: &[f64]) -> Option<f64> {
    let m = mean(window)?;
    let sd = population_std_dev(window)?;
    if sd <= f64::EPSILON {
        return None;
    }
    Some((value - m) / sd)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
