use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the capacity analytics engine.
///
/// Data-quality problems are never raised through this type; they travel as
/// [`QualityFlag`](crate::models::QualityFlag)s alongside the data.
#[derive(Error, Debug)]
pub enum CapacityError {
    /// A required input field is missing, unmapped or cannot be parsed.
    #[error("Schema error in {source_name} row {row}, field `{field}`: {reason}")]
    Schema {
        source_name: String,
        /// 1-based data row (header excluded); 0 when the problem is the header.
        row: usize,
        field: String,
        reason: String,
    },

    /// The same calendar date appears more than once in one input source.
    #[error(
        "Duplicate date {date} in {source_name} (rows {first_row} and {second_row}); \
         choose an explicit duplicate policy to merge"
    )]
    DuplicateDate {
        date: NaiveDate,
        source_name: String,
        first_row: usize,
        second_row: usize,
    },

    /// A configuration constant needed by the requested metric is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A series cannot be resampled to the requested granularity.
    #[error("Cannot resample {from} series to {to}")]
    Resample { from: String, to: String },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A CSV document could not be parsed.
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// No CSV input files were found under the given directory.
    #[error("No CSV files found in {0}")]
    NoDataFiles(PathBuf),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CapacityError {
    /// Shorthand for a [`CapacityError::Schema`] error.
    pub fn schema(
        source_name: impl Into<String>,
        row: usize,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CapacityError::Schema {
            source_name: source_name.into(),
            row,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// `true` for errors that abort ingestion (schema and duplicate-date errors).
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(
            self,
            CapacityError::Schema { .. } | CapacityError::DuplicateDate { .. }
        )
    }
}

/// Convenience alias used throughout the capacity crates.
pub type Result<T> = std::result::Result<T, CapacityError>;
