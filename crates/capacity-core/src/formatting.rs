/// Format a count with thousands separators.
///
/// # Examples
///
/// ```
/// use capacity_core::formatting::format_count;
///
/// assert_eq!(format_count(0), "0");
/// assert_eq!(format_count(12_345), "12,345");
/// assert_eq!(format_count(-1_234_567), "-1,234,567");
/// ```
pub fn format_count(value: i64) -> String {
    let grouped = group_thousands(&value.unsigned_abs().to_string());
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Format a flow with an explicit sign, so relief and pressure read apart.
///
/// # Examples
///
/// ```
/// use capacity_core::formatting::format_signed;
///
/// assert_eq!(format_signed(1_250), "+1,250");
/// assert_eq!(format_signed(-30), "-30");
/// assert_eq!(format_signed(0), "0");
/// ```
pub fn format_signed(value: i64) -> String {
    if value > 0 {
        format!("+{}", format_count(value))
    } else {
        format_count(value)
    }
}

/// Format a ratio (`0.813`) as a percentage string (`"81.3%"`).
///
/// # Examples
///
/// ```
/// use capacity_core::formatting::format_ratio_percent;
///
/// assert_eq!(format_ratio_percent(0.8134, 1), "81.3%");
/// assert_eq!(format_ratio_percent(1.0, 0), "100%");
/// ```
pub fn format_ratio_percent(ratio: f64, decimals: u32) -> String {
    format!(
        "{:.prec$}%",
        percentage(ratio, 1.0, decimals),
        prec = decimals as usize
    )
}

/// Calculate `(part / whole) * 100`, rounded to `decimal_places`.
///
/// Returns `0.0` if `whole` is zero to avoid division by zero.
pub fn percentage(part: f64, whole: f64, decimal_places: u32) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    let raw = (part / whole) * 100.0;
    let factor = 10_f64.powi(decimal_places as i32);
    (raw * factor).round() / factor
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let remainder = chars.len() % 3;
    for (i, &c) in chars.iter().enumerate() {
        if i != 0 && (i % 3 == remainder) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

// ── Tests ──────────────────────────────────────────────────────────────────────
