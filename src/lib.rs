//! Stay-home index - county-level "staying home" metrics from device panel data
//!
//! The crate turns a raw county × date panel of sampled device counts into a
//! population-adjusted, noise-corrected, baseline-indexed measure through a
//! deterministic pipeline: panel merge → sampling-bias normalization →
//! empirical-Bayes shrinkage → causal smoothing → baseline indexing.
//!
//! ## Modules
//!
//! - **Pipeline**: [`run_pipeline`] and [`IndexProcessor`] run every stage
//! - **Stages**: [`merger`], [`normalizer`], [`shrinkage`], [`smoother`], [`baseline`]
//! - **I/O**: [`schema`] reads input records, [`encoder`] writes output
//! - **Reporting**: [`summary`] rolls the panel up to state-days

pub mod baseline;
pub mod config;
pub mod encoder;
pub mod error;
pub mod merger;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod shrinkage;
pub mod smoother;
pub mod summary;
pub mod types;

pub use config::PipelineConfig;
pub use error::ComputeError;
pub use pipeline::{run_pipeline, IndexProcessor, PipelineOutput, PipelineReport};
pub use types::{ObservationRecord, PanelRow, PopulationRecord, QualityFlag};

// Schema exports
pub use schema::{RecordFormat, RecordReader, OBSERVATION_SCHEMA, OUTPUT_SCHEMA, POPULATION_SCHEMA};

/// Crate version embedded in run reports
pub const INDEX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run reports
pub const PRODUCER_NAME: &str = "stayhome-index";
