//! Runtime layer of the capacity analytics engine.
//!
//! Runs analyses for many facilities in parallel, caches results with a TTL
//! and re-runs the analysis when the input changes.

pub mod batch;
pub mod data_manager;
pub mod orchestrator;

pub use capacity_core as core;
pub use capacity_data as data;
