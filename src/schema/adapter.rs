//! Readers for observation and population records
//!
//! Both contracts are plain JSON objects, delivered either as NDJSON (one
//! record per line) or as a single JSON array.

use crate::error::ComputeError;
use crate::schema::record::ValidationError;
use crate::types::{ObservationRecord, PopulationRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Layout of a record file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// Newline-delimited JSON
    #[default]
    Ndjson,
    /// A JSON array of records
    Json,
}

/// Reader for input record files
pub struct RecordReader;

impl RecordReader {
    /// Parse a JSON string containing an array of records
    pub fn parse_array<T: DeserializeOwned>(json: &str) -> Result<Vec<T>, ComputeError> {
        let records: Vec<T> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON, skipping blank lines
    pub fn parse_ndjson<T: DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, ComputeError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(records)
    }

    pub fn parse<T: DeserializeOwned>(
        input: &str,
        format: RecordFormat,
    ) -> Result<Vec<T>, ComputeError> {
        match format {
            RecordFormat::Ndjson => Self::parse_ndjson(input),
            RecordFormat::Json => Self::parse_array(input),
        }
    }

    /// Parse observation records. Records failing validation are kept and
    /// logged; the merger drops negative counts and shrinkage flags home
    /// counts above device counts.
    pub fn read_observations(
        input: &str,
        format: RecordFormat,
    ) -> Result<Vec<ObservationRecord>, ComputeError> {
        let records: Vec<ObservationRecord> = Self::parse(input, format)?;
        let failures = Self::validate_observations(&records);
        if let Some(first) = failures.first() {
            warn!(
                invalid = failures.len(),
                first_record = first.index + 1,
                error = %first.error,
                "observations failed validation"
            );
        }
        Ok(records)
    }

    pub fn read_population(
        input: &str,
        format: RecordFormat,
    ) -> Result<Vec<PopulationRecord>, ComputeError> {
        Self::parse(input, format)
    }

    /// Validate a batch of observations, returning only the failures
    pub fn validate_observations(records: &[ObservationRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record
                    .validate()
                    .err()
                    .map(|error| ValidationResult { index, error })
            })
            .collect()
    }
}

/// A record that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Zero-based position in the input
    pub index: usize,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateCode;

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"state_id": 1, "county_id": 1, "date": "2020-02-01", "device_count": 10, "completely_home_device_count": 2}

{"state_id": "01", "county_id": "003", "date": "2020-02-01", "device_count": 20, "completely_home_device_count": 5}
"#;
        let records: Vec<ObservationRecord> = RecordReader::parse_ndjson(ndjson).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state_id, Some(StateCode(1)));
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let ndjson = "{\"state_id\": 1, \"county_id\": 1, \"date\": \"2020-02-01\", \"device_count\": 1, \"completely_home_device_count\": 0}\nnot json\n";
        let err = RecordReader::parse_ndjson::<ObservationRecord>(ndjson).unwrap_err();
        match err {
            ComputeError::ParseError(msg) => assert!(msg.contains("line 2"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_population() {
        let json = r#"[
            {"state_id": 1, "county_id": 0, "state_name": "Alabama", "county_name": "Alabama", "population_2019": 4903185},
            {"state_id": 1, "county_id": 1, "state_name": "Alabama", "county_name": "Autauga County", "population_2019": 55869},
            {"state_id": 1, "county_id": 3, "state_name": "Alabama", "county_name": "Baldwin County", "population_2019": null}
        ]"#;
        let records = RecordReader::read_population(json, RecordFormat::Json).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_state_aggregate());
        assert_eq!(records[1].population_2019, Some(55869));
        assert_eq!(records[2].population_2019, None);
    }

    #[test]
    fn test_read_observations_keeps_invalid_counts() {
        let ndjson = r#"{"state_id": 1, "county_id": 1, "date": "2020-02-01", "device_count": 10, "completely_home_device_count": 4}
{"state_id": 1, "county_id": 3, "date": "2020-02-01", "device_count": 10, "completely_home_device_count": 11}"#;
        let records = RecordReader::read_observations(ndjson, RecordFormat::Ndjson).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].completely_home_device_count, 11);
    }

    #[test]
    fn test_read_observations_still_fails_on_malformed_json() {
        let err = RecordReader::read_observations("{not json", RecordFormat::Ndjson).unwrap_err();
        assert!(matches!(err, ComputeError::ParseError(_)));
    }

    #[test]
    fn test_validate_observations_collects_failures() {
        let ndjson = r#"{"state_id": 1, "county_id": 1, "date": "2020-02-01", "device_count": 5, "completely_home_device_count": 1}
{"state_id": 1, "county_id": 1, "date": "2020-02-02", "device_count": -5, "completely_home_device_count": 0}
{"state_id": 1, "county_id": 1, "date": "2020-02-03", "device_count": 5, "completely_home_device_count": 6}"#;
        let records: Vec<ObservationRecord> = RecordReader::parse_ndjson(ndjson).unwrap();
        let failures = RecordReader::validate_observations(&records);

        let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
