//! CSV discovery and loading.
//!
//! Turns CSV files on disk into [`RawTable`]s for the normalizer. No column
//! interpretation happens here: every cell stays a string.

use std::io::Read;
use std::path::{Path, PathBuf};

use capacity_core::error::{CapacityError, Result};
use tracing::{debug, warn};

use crate::normalizer::RawTable;

// ── Public API ────────────────────────────────────────────────────────────────

/// Find all `.csv` files recursively under `data_path`, sorted by path.
pub fn find_csv_files(data_path: &Path) -> Vec<PathBuf> {
    if !data_path.exists() {
        warn!("Data path does not exist: {}", data_path.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(data_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Load one CSV file into a [`RawTable`] named after the file.
pub fn read_csv_file(path: &Path) -> Result<RawTable> {
    let file = std::fs::File::open(path).map_err(|source| CapacityError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    read_csv(name, file)
}

/// Parse CSV text from any reader. The first record is the header row.
pub fn read_csv<R: Read>(source: impl Into<String>, reader: R) -> Result<RawTable> {
    let source = source.into();
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        // Fully blank lines carry no data.
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    debug!("read {} rows from {}", rows.len(), source);
    Ok(RawTable {
        source,
        headers,
        rows,
    })
}

/// Load the input for one series: a single CSV file, or every CSV under a
/// directory (each file being one data source of the same series).
pub fn load_tables(input: &Path) -> Result<Vec<RawTable>> {
    if input.is_file() {
        return Ok(vec![read_csv_file(input)?]);
    }

    let files = find_csv_files(input);
    if files.is_empty() {
        return Err(CapacityError::NoDataFiles(input.to_path_buf()));
    }

    files.iter().map(|f| read_csv_file(f)).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
