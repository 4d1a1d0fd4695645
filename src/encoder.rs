//! Output encoding
//!
//! This module serializes the enriched panel (and any other record list, such
//! as state summaries) into NDJSON or JSON, and derives a content digest of
//! the panel so two runs can be compared without diffing whole files.

use crate::error::ComputeError;
use crate::types::PanelRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Newline-delimited JSON, one record per line
    #[default]
    Ndjson,
    /// A JSON array
    Json,
    /// A pretty-printed JSON array
    JsonPretty,
}

/// Encoder for output records
#[derive(Debug, Clone, Copy, Default)]
pub struct PanelEncoder {
    format: OutputFormat,
}

impl PanelEncoder {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Encode records in the configured format
    pub fn encode<T: Serialize>(&self, records: &[T]) -> Result<String, ComputeError> {
        let encoded = match self.format {
            OutputFormat::Ndjson => {
                let mut out = String::new();
                for record in records {
                    out.push_str(&serde_json::to_string(record)?);
                    out.push('\n');
                }
                out
            }
            OutputFormat::Json => serde_json::to_string(records)?,
            OutputFormat::JsonPretty => serde_json::to_string_pretty(records)?,
        };
        Ok(encoded)
    }

    /// Deterministic digest of a panel: a name-based UUID over its NDJSON encoding
    pub fn digest(rows: &[PanelRow]) -> Result<Uuid, ComputeError> {
        let ndjson = PanelEncoder::new(OutputFormat::Ndjson)
            .encode(rows)
            .map_err(|e| ComputeError::EncodingError(e.to_string()))?;
        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, ndjson.as_bytes()))
    }
}
