//! Error types for the stay-home index pipeline
//!
//! Only structural failures live here. Row and cell anomalies (zero device
//! counts, degenerate priors, short series, missing baselines) are recorded
//! as [`QualityFlag`](crate::types::QualityFlag)s on the panel and never abort a run.

use thiserror::Error;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Duplicate observation for {0}")]
    DuplicateObservation(String),

    #[error("Duplicate population record for {0}")]
    DuplicatePopulation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
