//! Ingestion, validation and metrics layer of the capacity analytics engine.
//!
//! Reads CSV tables, normalizes them into canonical daily records, flags data
//! quality problems, fills gaps, computes derived indicators, resamples them
//! to weekly or monthly views and runs the top-level analysis pipeline.

pub mod aggregator;
pub mod analysis;
pub mod gap_fill;
pub mod metrics;
pub mod normalizer;
pub mod reader;
pub mod strain;
pub mod validator;

pub use capacity_core as core;
