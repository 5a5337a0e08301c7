//! Core types for the capacity and care-load analytics engine.
//!
//! Holds the canonical data model, the error taxonomy, engine configuration
//! and CLI settings, calendar period helpers and small statistics helpers
//! shared by the ingestion, validation and metrics layers.

pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod stats;
pub mod time_utils;

pub use error::{CapacityError, Result};
