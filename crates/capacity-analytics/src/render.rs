//! Output rendering for the CLI: pretty JSON or a plain-text report.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use capacity_core::formatting::{format_count, format_ratio_percent, format_signed};
use capacity_core::settings::OutputFormat;
use capacity_core::time_utils::period_key;
use capacity_data::analysis::AnalysisResult;
use capacity_runtime::batch::FacilityOutcome;

/// Render one analysis result.
pub fn render_result(result: &AnalysisResult, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => render_text(result),
    })
}

/// Render a batch of per-facility outcomes.
pub fn render_batch(
    outcomes: &BTreeMap<String, FacilityOutcome>,
    format: OutputFormat,
) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(outcomes)?);
    }
    let mut out = String::new();
    for (name, outcome) in outcomes {
        let _ = writeln!(out, "=== {name} ===");
        match outcome {
            FacilityOutcome::Ok { result } => out.push_str(&render_text(result)),
            FacilityOutcome::Error { message } => {
                let _ = writeln!(out, "error: {message}");
            }
        }
        out.push('\n');
    }
    Ok(out)
}

// ── Text report ───────────────────────────────────────────────────────────────

fn render_text(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let s = &result.summary;

    let _ = writeln!(out, "Granularity: {}", result.granularity);
    match s.period {
        Some(p) => {
            let _ = writeln!(out, "Latest period: {}", period_key(p, result.granularity));
        }
        None => {
            let _ = writeln!(out, "No data in range.");
            return out;
        }
    }
    let _ = writeln!(out, "Total children under care: {}", format_count(s.total_system_load));
    let _ = writeln!(out, "  CBP custody: {}", format_count(s.cbp_active));
    let _ = writeln!(out, "  HHS care: {}", format_count(s.hhs_active));
    let _ = writeln!(out, "Net HHS intake: {}", format_signed(s.net_hhs_intake));
    let _ = writeln!(out, "Backlog estimate: {}", format_count(s.backlog_estimate));
    let _ = writeln!(out, "Backlog streak: {} period(s)", s.backlog_streak);
    if let Some(u) = s.capacity_utilization {
        let _ = writeln!(out, "Capacity utilization: {}", format_ratio_percent(u, 1));
    }
    let _ = writeln!(
        out,
        "Strain periods: {}, high-load periods: {}",
        s.strain_periods, s.high_load_periods
    );
    for e in &result.metric_errors {
        let _ = writeln!(out, "Unavailable: {} ({})", e.metric, e.message);
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<12} {:>10} {:>10} {:>10} {:>8} {:>7} {:>6}",
        "period", "load", "pressure", "backlog", "util", "strain", "flags"
    );
    for p in &result.series.points {
        let flags: usize = result
            .flags
            .range(p.date..=p.period_end)
            .map(|(_, f)| f.len())
            .sum();
        let util = p
            .capacity_utilization
            .map(|u| format_ratio_percent(u, 1))
            .unwrap_or_else(|| "-".to_string());
        let mut label = period_key(p.date, result.granularity);
        if p.partial_period {
            label.push('*');
        }
        if !p.is_reported {
            label.push('~');
        }
        let _ = writeln!(
            out,
            "{:<12} {:>10} {:>10} {:>10} {:>8} {:>7} {:>6}",
            label,
            format_count(p.total_system_load),
            format_signed(p.net_intake_pressure),
            format_count(p.backlog_estimate),
            util,
            if p.strain_flag { "yes" } else { "" },
            flags
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Quality flags: {}", result.flag_count());
    for (kind, n) in &result.metadata.flags_by_kind {
        let _ = writeln!(out, "  {kind}: {n}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_core::models::Granularity;
    use capacity_core::settings::EngineConfig;
    use capacity_data::analysis::analyze_tables;
    use capacity_data::reader::read_csv;

    fn result(config: &EngineConfig, with_utilization: bool) -> AnalysisResult {
        let csv = "date,cbp_intake,cbp_active,hhs_transfers_in,hhs_active,discharges_to_sponsor\n\
                   2024-01-01,120,600,100,9000,80\n\
                   2024-01-03,130,610,110,9020,90\n";
        let tables = vec![read_csv("uac.csv", csv.as_bytes()).unwrap()];
        analyze_tables(&tables, Granularity::Daily, config, with_utilization).unwrap()
    }

    #[test]
    fn test_render_json_is_parseable() {
        let r = result(&EngineConfig::default(), false);
        let json = render_result(&r, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["granularity"], "daily");
    }

    #[test]
    fn test_render_text_summary_and_rows() {
        let config = EngineConfig {
            hhs_capacity_ceiling: Some(10_000),
            ..Default::default()
        };
        let text = render_result(&result(&config, true), OutputFormat::Text).unwrap();
        assert!(text.contains("Latest period: 2024-01-03"));
        assert!(text.contains("Total children under care: 9,630"));
        assert!(text.contains("Capacity utilization: 90.2%"));
        // Filled day is marked.
        assert!(text.contains("2024-01-02~"));
        assert!(text.contains("MissingDay: 1"));
    }

    #[test]
    fn test_render_text_reports_metric_errors() {
        let text = render_result(&result(&EngineConfig::default(), true), OutputFormat::Text).unwrap();
        assert!(text.contains("Unavailable: capacity_utilization"));
    }

    #[test]
    fn test_render_batch_text_includes_errors() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "north".to_string(),
            FacilityOutcome::Error {
                message: "boom".to_string(),
            },
        );
        let text = render_batch(&outcomes, OutputFormat::Text).unwrap();
        assert!(text.contains("=== north ==="));
        assert!(text.contains("error: boom"));
    }
}
