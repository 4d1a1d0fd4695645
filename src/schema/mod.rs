//! Input record schemas
//!
//! This module defines the two input contracts the pipeline consumes (the
//! device observation panel and the population reference table), how they are
//! read from NDJSON or JSON arrays, and record-level validation.

mod adapter;
mod record;

pub use adapter::*;
pub use record::*;
