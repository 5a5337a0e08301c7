//! Ingestion normalizer.
//!
//! Maps heterogeneous tabular sources (one row per date per source) onto the
//! canonical [`DailyRecord`] schema. Pure transform: no I/O, no logging of
//! data values, and every failure is a hard error carrying the source, row
//! and field needed to fix the input.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use capacity_core::error::{CapacityError, Result};
use capacity_core::models::{CountField, DailyRecord, MAX_ABS_COUNT};
use capacity_core::settings::{ColumnMapping, DuplicatePolicy, EngineConfig};
use capacity_core::time_utils::parse_date;
use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

// ── Input / output types ──────────────────────────────────────────────────────

/// One raw input table: a header row plus string cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// Name of the source (file name or caller-chosen label) used in errors.
    pub source: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// The counts one source supplied on one raw row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCounts {
    /// 1-based data row within its source.
    pub row: usize,
    pub values: BTreeMap<CountField, i64>,
}

/// Every raw row that carried the same date within one source.
///
/// Only produced under an explicit merge policy; under
/// [`DuplicatePolicy::Reject`] the first duplicate aborts ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub date: NaiveDate,
    pub source: String,
    pub rows: Vec<RawCounts>,
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Canonical records sorted by date, one per date.
    pub records: Vec<DailyRecord>,
    /// Duplicate dates resolved by the merge policy, for the validator.
    pub duplicates: Vec<DuplicateGroup>,
    /// Raw data rows read across all sources.
    pub rows_read: usize,
    /// Dates present in the input but marked unreported (an `is_reported`
    /// value of false, or every count blank). They are left out of
    /// `records` so they surface as missing days.
    pub unreported: Vec<NaiveDate>,
}

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Resolved column positions of one source table.
struct TableLayout {
    date_idx: usize,
    reported_idx: Option<usize>,
    counts: Vec<(CountField, usize)>,
}

/// Per-date values collected from one source.
type SourceRows = BTreeMap<NaiveDate, RawCounts>;

/// Everything [`Normalizer::collect_rows`] gathers from one source.
struct CollectedRows {
    rows: SourceRows,
    duplicates: Vec<DuplicateGroup>,
    unreported: BTreeSet<NaiveDate>,
}

/// Maps raw tables to canonical daily records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mapping: ColumnMapping,
    policy: DuplicatePolicy,
}

impl Normalizer {
    pub fn new(mapping: ColumnMapping, policy: DuplicatePolicy) -> Self {
        Self { mapping, policy }
    }

    /// Build a normalizer from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.column_mapping.clone(), config.duplicate_policy)
    }

    /// Normalize one or more source tables into a single date-ordered series.
    ///
    /// Each count field must be supplied by exactly one source. Dates are
    /// merged across sources; a date present in one source but missing a
    /// value from another is a schema error.
    pub fn normalize(&self, tables: &[RawTable]) -> Result<NormalizedBatch> {
        if tables.is_empty() {
            return Err(CapacityError::schema(
                "<input>",
                0,
                "date",
                "no input tables were supplied",
            ));
        }

        let layouts = self.resolve_layouts(tables)?;

        let mut duplicates = Vec::new();
        let mut unreported = BTreeSet::new();
        let mut per_source: Vec<SourceRows> = Vec::with_capacity(tables.len());
        let mut rows_read = 0usize;
        for (table, layout) in tables.iter().zip(&layouts) {
            rows_read += table.rows.len();
            let collected = self.collect_rows(table, layout)?;
            per_source.push(collected.rows);
            duplicates.extend(collected.duplicates);
            unreported.extend(collected.unreported);
        }

        // A date any source leaves unreported is a missing day for all of them.
        for rows in &mut per_source {
            rows.retain(|date, _| !unreported.contains(date));
        }
        duplicates.retain(|g| !unreported.contains(&g.date));

        let records = merge_sources(tables, &layouts, per_source)?;

        debug!(
            "normalized {} rows from {} source(s) into {} records ({} duplicate dates, {} unreported)",
            rows_read,
            tables.len(),
            records.len(),
            duplicates.len(),
            unreported.len()
        );

        Ok(NormalizedBatch {
            records,
            duplicates,
            rows_read,
            unreported: unreported.into_iter().collect(),
        })
    }

    // ── Header resolution ─────────────────────────────────────────────────────

    /// Resolve column positions for every table and check field ownership.
    fn resolve_layouts(&self, tables: &[RawTable]) -> Result<Vec<TableLayout>> {
        let mut owners: HashMap<CountField, &str> = HashMap::new();
        let mut layouts = Vec::with_capacity(tables.len());

        for table in tables {
            let header_map: HashMap<String, usize> = table
                .headers
                .iter()
                .enumerate()
                .map(|(idx, name)| (normalize_header(name), idx))
                .collect();

            let date_idx = find_column(&header_map, &self.mapping.date).ok_or_else(|| {
                CapacityError::schema(
                    &table.source,
                    0,
                    "date",
                    format!("no column matches any of {:?}", self.mapping.date),
                )
            })?;

            let mut counts = Vec::new();
            for field in CountField::ALL {
                let Some(idx) = find_column(&header_map, self.mapping.aliases(field)) else {
                    continue;
                };
                if let Some(other) = owners.insert(field, &table.source) {
                    return Err(CapacityError::schema(
                        &table.source,
                        0,
                        field.name(),
                        format!("field is also supplied by source {other}"),
                    ));
                }
                counts.push((field, idx));
            }

            if counts.is_empty() {
                return Err(CapacityError::schema(
                    &table.source,
                    0,
                    "<counts>",
                    "no column matches any count field",
                ));
            }

            let reported_idx = find_column(&header_map, &self.mapping.is_reported);
            layouts.push(TableLayout {
                date_idx,
                reported_idx,
                counts,
            });
        }

        for field in CountField::ALL {
            if !owners.contains_key(&field) {
                return Err(CapacityError::schema(
                    &tables[0].source,
                    0,
                    field.name(),
                    format!(
                        "no column matches any of {:?}",
                        self.mapping.aliases(field)
                    ),
                ));
            }
        }

        Ok(layouts)
    }

    // ── Row parsing ───────────────────────────────────────────────────────────

    /// Parse every row of `table`, applying the duplicate policy.
    ///
    /// Unreported rows are set aside before duplicate handling, so a
    /// reported row for the same date always wins.
    fn collect_rows(&self, table: &RawTable, layout: &TableLayout) -> Result<CollectedRows> {
        let mut rows: SourceRows = BTreeMap::new();
        let mut groups: BTreeMap<NaiveDate, DuplicateGroup> = BTreeMap::new();
        let mut unreported = BTreeSet::new();

        for (idx, cells) in table.rows.iter().enumerate() {
            let row = idx + 1;
            let date = parse_date_cell(table, row, cells, layout.date_idx)?;
            let marker = match layout.reported_idx {
                Some(col) => parse_reported(cell_at(cells, col)).map_err(|reason| {
                    CapacityError::schema(&table.source, row, "is_reported", reason)
                })?,
                None => None,
            };
            let all_blank = layout
                .counts
                .iter()
                .all(|&(_, col)| cell_at(cells, col).trim().is_empty());
            if marker == Some(false) || all_blank {
                unreported.insert(date);
                continue;
            }

            let mut values = BTreeMap::new();
            for &(field, col) in &layout.counts {
                let value = parse_count(cell_at(cells, col)).map_err(|reason| {
                    CapacityError::schema(&table.source, row, field.name(), reason)
                })?;
                values.insert(field, value);
            }
            let counts = RawCounts { row, values };

            let Some(existing) = rows.get(&date) else {
                rows.insert(date, counts);
                continue;
            };

            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(CapacityError::DuplicateDate {
                        date,
                        source_name: table.source.clone(),
                        first_row: existing.row,
                        second_row: row,
                    });
                }
                DuplicatePolicy::KeepFirst | DuplicatePolicy::KeepLast => {
                    let group = groups.entry(date).or_insert_with(|| DuplicateGroup {
                        date,
                        source: table.source.clone(),
                        rows: vec![existing.clone()],
                    });
                    group.rows.push(counts.clone());
                    if self.policy == DuplicatePolicy::KeepLast {
                        rows.insert(date, counts);
                    }
                }
            }
        }

        unreported.retain(|date| !rows.contains_key(date));
        Ok(CollectedRows {
            rows,
            duplicates: groups.into_values().collect(),
            unreported,
        })
    }
}

/// Combine per-source values into complete records, one per date.
fn merge_sources(
    tables: &[RawTable],
    layouts: &[TableLayout],
    per_source: Vec<SourceRows>,
) -> Result<Vec<DailyRecord>> {
    let mut merged: BTreeMap<NaiveDate, BTreeMap<CountField, i64>> = BTreeMap::new();
    for rows in per_source {
        for (date, counts) in rows {
            merged.entry(date).or_default().extend(counts.values);
        }
    }

    let mut records = Vec::with_capacity(merged.len());
    for (date, values) in merged {
        let get = |field: CountField| -> Result<i64> {
            values.get(&field).copied().ok_or_else(|| {
                let source = owner_of(tables, layouts, field).unwrap_or("<input>");
                CapacityError::schema(source, 0, field.name(), format!("no value for {date}"))
            })
        };
        records.push(DailyRecord::new(
            date,
            get(CountField::CbpIntake)?,
            get(CountField::CbpActive)?,
            get(CountField::HhsTransfersIn)?,
            get(CountField::HhsActive)?,
            get(CountField::DischargesToSponsor)?,
        ));
    }
    Ok(records)
}

fn owner_of<'a>(
    tables: &'a [RawTable],
    layouts: &[TableLayout],
    field: CountField,
) -> Option<&'a str> {
    tables
        .iter()
        .zip(layouts)
        .find(|(_, layout)| layout.counts.iter().any(|(f, _)| *f == field))
        .map(|(table, _)| table.source.as_str())
}

fn cell_at(cells: &[String], idx: usize) -> &str {
    cells.get(idx).map(String::as_str).unwrap_or("")
}

fn parse_date_cell(table: &RawTable, row: usize, cells: &[String], idx: usize) -> Result<NaiveDate> {
    let cell = cell_at(cells, idx);
    if cell.trim().is_empty() {
        return Err(CapacityError::schema(&table.source, row, "date", "empty value"));
    }
    parse_date(cell).ok_or_else(|| {
        CapacityError::schema(
            &table.source,
            row,
            "date",
            format!("unrecognised date: {cell:?}"),
        )
    })
}

fn find_column(header_map: &HashMap<String, usize>, aliases: &[String]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| header_map.get(&normalize_header(alias)).copied())
}

// ── Cell helpers ──────────────────────────────────────────────────────────────

/// Canonical form of a header or alias: BOM stripped, lower-cased, runs of
/// non-alphanumeric characters collapsed to a single `_`.
pub fn normalize_header(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("regex is valid"));
    let lower = name.trim().trim_start_matches('\u{feff}').to_lowercase();
    re.replace_all(&lower, "_").trim_matches('_').to_string()
}

/// Parse a count cell.
///
/// Accepts thousands separators (`"10,250"`) and integral decimals
/// (`"12.0"`). Magnitudes above [`MAX_ABS_COUNT`] are rejected; the error
/// string explains any rejection.
pub fn parse_count(cell: &str) -> std::result::Result<i64, String> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err("empty value".to_string());
    }
    let value = match cleaned.parse::<i64>() {
        Ok(v) => v,
        Err(_) => match cleaned.parse::<f64>() {
            Ok(f) if f.is_finite() && f.fract() == 0.0 => {
                if f.abs() > MAX_ABS_COUNT as f64 {
                    return Err(out_of_range(cell));
                }
                f as i64
            }
            _ => return Err(format!("not an integer count: {cell:?}")),
        },
    };
    if value.unsigned_abs() > MAX_ABS_COUNT.unsigned_abs() {
        return Err(out_of_range(cell));
    }
    Ok(value)
}

fn out_of_range(cell: &str) -> String {
    format!("count out of range (limit {MAX_ABS_COUNT}): {cell:?}")
}

/// Parse a reported-day marker. A blank cell gives `None`.
pub fn parse_reported(cell: &str) -> std::result::Result<Option<bool>, String> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "t" | "yes" | "y" | "1" => Ok(Some(true)),
        "false" | "f" | "no" | "n" | "0" => Ok(Some(false)),
        _ => Err(format!("not a boolean: {cell:?}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table(source: &str, headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            source: source.to_string(),
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    const CANONICAL: &[&str] = &[
        "date",
        "cbp_intake",
        "cbp_active",
        "hhs_transfers_in",
        "hhs_active",
        "discharges_to_sponsor",
    ];

    fn ymd(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn normalizer(policy: DuplicatePolicy) -> Normalizer {
        Normalizer::new(ColumnMapping::default(), policy)
    }

    // ── normalize_header / parse_count ────────────────────────────────────────

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("\u{feff}Date"), "date");
        assert_eq!(normalize_header("  CBP Custody "), "cbp_custody");
        assert_eq!(normalize_header("Transfers-to-HHS (daily)"), "transfers_to_hhs_daily");
    }

    #[test]
    fn test_parse_count_variants() {
        assert_eq!(parse_count("1,234"), Ok(1_234));
        assert_eq!(parse_count(" 42 "), Ok(42));
        assert_eq!(parse_count("12.0"), Ok(12));
        assert_eq!(parse_count("-3"), Ok(-3));
        assert!(parse_count("").is_err());
        assert!(parse_count("12.5").is_err());
        assert!(parse_count("n/a").is_err());
    }

    #[test]
    fn test_parse_count_rejects_extreme_values() {
        assert_eq!(parse_count("1,000,000,000"), Ok(MAX_ABS_COUNT));
        assert_eq!(parse_count("-1000000000"), Ok(-MAX_ABS_COUNT));
        let err = parse_count("9223372036854775807").unwrap_err();
        assert!(err.contains("out of range"));
        assert!(parse_count("-9223372036854775808").is_err());
        assert!(parse_count("1000000001").is_err());
        assert!(parse_count("1e12").is_err());
        assert!(parse_count("99999999999999999999").is_err());
    }

    #[test]
    fn test_parse_reported() {
        assert_eq!(parse_reported("True"), Ok(Some(true)));
        assert_eq!(parse_reported(" false "), Ok(Some(false)));
        assert_eq!(parse_reported("0"), Ok(Some(false)));
        assert_eq!(parse_reported(""), Ok(None));
        assert!(parse_reported("maybe").is_err());
    }

    // ── normalize: single source ──────────────────────────────────────────────

    #[test]
    fn test_normalize_sorts_by_date() {
        let t = table(
            "daily.csv",
            CANONICAL,
            &[
                &["2024-01-03", "3", "30", "2", "300", "1"],
                &["2024-01-01", "1", "10", "2", "100", "1"],
                &["2024-01-02", "2", "20", "2", "200", "1"],
            ],
        );
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        let dates: Vec<NaiveDate> = batch.records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![ymd(1), ymd(2), ymd(3)]);
        assert_eq!(batch.rows_read, 3);
        assert!(batch.duplicates.is_empty());
        assert_eq!(batch.records[2].hhs_active, 300);
    }

    #[test]
    fn test_normalize_maps_dashboard_column_names() {
        let t = table(
            "processed.csv",
            &[
                "Date",
                "CBP Apprehended",
                "CBP Custody",
                "Transfers to HHS",
                "HHS Care",
                "Discharges",
            ],
            &[&["January 5, 2024", "150", "900", "140", "8,500", "120"]],
        );
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        let r = &batch.records[0];
        assert_eq!(r.date, ymd(5));
        assert_eq!(r.cbp_intake, 150);
        assert_eq!(r.cbp_active, 900);
        assert_eq!(r.hhs_transfers_in, 140);
        assert_eq!(r.hhs_active, 8_500);
        assert_eq!(r.discharges_to_sponsor, 120);
    }

    #[test]
    fn test_normalize_keeps_negative_values() {
        let t = table("d", CANONICAL, &[&["2024-01-01", "-5", "10", "2", "100", "1"]]);
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        assert_eq!(batch.records[0].cbp_intake, -5);
    }

    // ── normalize: schema errors ──────────────────────────────────────────────

    #[test]
    fn test_normalize_missing_column_is_schema_error() {
        let t = table(
            "d",
            &["date", "cbp_intake", "cbp_active", "hhs_active", "discharges_to_sponsor"],
            &[&["2024-01-01", "1", "2", "3", "4"]],
        );
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        match err {
            CapacityError::Schema { field, row, .. } => {
                assert_eq!(field, "hhs_transfers_in");
                assert_eq!(row, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_missing_date_column_is_schema_error() {
        let t = table("d", &["when", "cbp_intake"], &[]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { ref field, .. } if field == "date"));
    }

    #[test]
    fn test_normalize_unparsable_value_reports_row_and_field() {
        let t = table(
            "d",
            CANONICAL,
            &[
                &["2024-01-01", "1", "2", "3", "4", "5"],
                &["2024-01-02", "1", "2", "three", "4", "5"],
            ],
        );
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        match err {
            CapacityError::Schema { field, row, reason, .. } => {
                assert_eq!(field, "hhs_transfers_in");
                assert_eq!(row, 2);
                assert!(reason.contains("three"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_bad_date_is_schema_error() {
        let t = table("d", CANONICAL, &[&["soon", "1", "2", "3", "4", "5"]]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { ref field, row: 1, .. } if field == "date"));
    }

    #[test]
    fn test_normalize_short_row_is_schema_error() {
        let t = table("d", CANONICAL, &[&["2024-01-01", "1", "2"]]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        assert!(err.is_ingestion_failure());
    }

    #[test]
    fn test_normalize_no_tables_is_schema_error() {
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { .. }));
    }

    #[test]
    fn test_normalize_extreme_count_is_schema_error() {
        let t = table(
            "d",
            CANONICAL,
            &[&["2024-01-01", "1", "2", "9223372036854775807", "4", "1"]],
        );
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        match err {
            CapacityError::Schema { field, row, reason, .. } => {
                assert_eq!(field, "hhs_transfers_in");
                assert_eq!(row, 1);
                assert!(reason.contains("out of range"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ── normalize: unreported days ────────────────────────────────────────────

    fn with_reported_column(rows: &[&[&str]]) -> RawTable {
        let mut headers = CANONICAL.to_vec();
        headers.push("is_reported");
        table("processed.csv", &headers, rows)
    }

    #[test]
    fn test_normalize_skips_rows_marked_unreported() {
        let t = with_reported_column(&[
            &["2024-01-01", "1", "10", "1", "100", "1", "True"],
            &["2024-01-02", "", "", "", "", "", "False"],
            &["2024-01-03", "1", "10", "1", "100", "1", "True"],
        ]);
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        let dates: Vec<NaiveDate> = batch.records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![ymd(1), ymd(3)]);
        assert_eq!(batch.unreported, vec![ymd(2)]);
        assert_eq!(batch.rows_read, 3);
    }

    #[test]
    fn test_normalize_unreported_marker_wins_over_values() {
        let t = with_reported_column(&[&["2024-01-01", "1", "10", "1", "100", "1", "false"]]);
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.unreported, vec![ymd(1)]);
    }

    #[test]
    fn test_normalize_all_blank_row_without_marker_is_unreported() {
        let t = table(
            "d",
            CANONICAL,
            &[
                &["2024-01-01", "1", "10", "1", "100", "1"],
                &["2024-01-02", "", " ", "", "", ""],
            ],
        );
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.unreported, vec![ymd(2)]);
    }

    #[test]
    fn test_normalize_partly_blank_reported_row_is_schema_error() {
        let t = with_reported_column(&[&["2024-01-01", "1", "", "1", "100", "1", "true"]]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { ref field, .. } if field == "cbp_active"));
    }

    #[test]
    fn test_normalize_bad_reported_marker_is_schema_error() {
        let t = with_reported_column(&[&["2024-01-01", "1", "10", "1", "100", "1", "maybe"]]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { ref field, row: 1, .. } if field == "is_reported"));
    }

    #[test]
    fn test_normalize_reported_duplicate_beats_unreported_row() {
        let t = with_reported_column(&[
            &["2024-01-01", "", "", "", "", "", "false"],
            &["2024-01-01", "1", "10", "1", "100", "1", "true"],
        ]);
        let batch = normalizer(DuplicatePolicy::Reject).normalize(&[t]).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert!(batch.unreported.is_empty());
        assert!(batch.duplicates.is_empty());
    }

    #[test]
    fn test_normalize_date_unreported_in_one_source_is_missing_for_all() {
        let cbp = table(
            "cbp.csv",
            &["date", "cbp_intake", "cbp_custody", "transfers_to_hhs"],
            &[&["2024-01-01", "50", "400", "45"], &["2024-01-02", "60", "410", "50"]],
        );
        let hhs = table(
            "hhs.csv",
            &["date", "hhs_care", "discharges"],
            &[&["2024-01-01", "6990", "35"], &["2024-01-02", "", ""]],
        );
        let batch = normalizer(DuplicatePolicy::Reject)
            .normalize(&[cbp, hhs])
            .unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.unreported, vec![ymd(2)]);
    }

    // ── normalize: duplicates ─────────────────────────────────────────────────

    fn duplicated() -> RawTable {
        table(
            "d",
            CANONICAL,
            &[
                &["2024-01-01", "10", "100", "5", "1000", "5"],
                &["2024-01-01", "12", "100", "5", "1000", "5"],
            ],
        )
    }

    #[test]
    fn test_normalize_duplicate_rejected_by_default() {
        let err = normalizer(DuplicatePolicy::Reject)
            .normalize(&[duplicated()])
            .unwrap_err();
        match err {
            CapacityError::DuplicateDate {
                date,
                first_row,
                second_row,
                ..
            } => {
                assert_eq!(date, ymd(1));
                assert_eq!((first_row, second_row), (1, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_duplicate_keep_first_and_last() {
        let first = normalizer(DuplicatePolicy::KeepFirst)
            .normalize(&[duplicated()])
            .unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].cbp_intake, 10);
        assert_eq!(first.duplicates.len(), 1);
        assert_eq!(first.duplicates[0].rows.len(), 2);

        let last = normalizer(DuplicatePolicy::KeepLast)
            .normalize(&[duplicated()])
            .unwrap();
        assert_eq!(last.records[0].cbp_intake, 12);
        assert_eq!(last.duplicates[0].rows[1].row, 2);
    }

    // ── normalize: multiple sources ───────────────────────────────────────────

    #[test]
    fn test_normalize_merges_sources_by_date() {
        let cbp = table(
            "cbp.csv",
            &["date", "cbp_intake", "cbp_custody", "transfers_to_hhs"],
            &[&["2024-01-01", "50", "400", "45"], &["2024-01-02", "60", "410", "50"]],
        );
        let hhs = table(
            "hhs.csv",
            &["date", "hhs_care", "discharges"],
            &[&["2024-01-02", "7000", "40"], &["2024-01-01", "6990", "35"]],
        );
        let batch = normalizer(DuplicatePolicy::Reject)
            .normalize(&[cbp, hhs])
            .unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0], DailyRecord::new(ymd(1), 50, 400, 45, 6_990, 35));
        assert_eq!(batch.rows_read, 4);
    }

    #[test]
    fn test_normalize_date_missing_from_one_source_is_schema_error() {
        let cbp = table(
            "cbp.csv",
            &["date", "cbp_intake", "cbp_custody", "transfers_to_hhs"],
            &[&["2024-01-01", "50", "400", "45"], &["2024-01-02", "60", "410", "50"]],
        );
        let hhs = table(
            "hhs.csv",
            &["date", "hhs_care", "discharges"],
            &[&["2024-01-01", "6990", "35"]],
        );
        let err = normalizer(DuplicatePolicy::Reject)
            .normalize(&[cbp, hhs])
            .unwrap_err();
        match err {
            CapacityError::Schema {
                source_name, reason, ..
            } => {
                assert_eq!(source_name, "hhs.csv");
                assert!(reason.contains("2024-01-02"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_field_from_two_sources_is_schema_error() {
        let a = table("a.csv", CANONICAL, &[]);
        let b = table("b.csv", &["date", "hhs_care"], &[]);
        let err = normalizer(DuplicatePolicy::Reject).normalize(&[a, b]).unwrap_err();
        assert!(matches!(err, CapacityError::Schema { ref field, .. } if field == "hhs_active"));
    }
}
