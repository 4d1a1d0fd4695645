//! Record-level validation for the observation and population contracts

use crate::types::{ObservationRecord, PopulationRecord};

/// Schema identifier for observation records
pub const OBSERVATION_SCHEMA: &str = "stayhome.observation.v1";

/// Schema identifier for population records
pub const POPULATION_SCHEMA: &str = "stayhome.population.v1";

/// Schema identifier for enriched panel rows
pub const OUTPUT_SCHEMA: &str = "stayhome.panel.v1";

/// Validation errors for input records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Negative {field}: {value}")]
    NegativeCount { field: &'static str, value: i64 },

    #[error("completely_home_device_count ({home}) exceeds device_count ({devices})")]
    HomeExceedsDevices { home: i64, devices: i64 },
}

impl ObservationRecord {
    /// Validate counts. Null geography is not a validation failure; the merger
    /// drops such rows.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_count < 0 {
            return Err(ValidationError::NegativeCount {
                field: "device_count",
                value: self.device_count,
            });
        }

        if self.completely_home_device_count < 0 {
            return Err(ValidationError::NegativeCount {
                field: "completely_home_device_count",
                value: self.completely_home_device_count,
            });
        }

        if self.completely_home_device_count > self.device_count {
            return Err(ValidationError::HomeExceedsDevices {
                home: self.completely_home_device_count,
                devices: self.device_count,
            });
        }

        Ok(())
    }
}

impl PopulationRecord {
    /// Whether this row is a state-level total rather than a county
    pub fn is_state_aggregate(&self) -> bool {
        self.county_id.map_or(false, |c| c.is_state_aggregate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn observation(devices: i64, home: i64) -> ObservationRecord {
        ObservationRecord {
            state_id: None,
            county_id: None,
            date: NaiveDate::from_ymd_opt(2020, 2, 12).unwrap(),
            device_count: devices,
            completely_home_device_count: home,
        }
    }

    #[test]
    fn test_valid_observation() {
        assert!(observation(100, 25).validate().is_ok());
        assert!(observation(0, 0).validate().is_ok());
    }

    #[test]
    fn test_negative_counts_rejected() {
        assert_eq!(
            observation(-1, 0).validate(),
            Err(ValidationError::NegativeCount {
                field: "device_count",
                value: -1
            })
        );
        assert!(matches!(
            observation(10, -3).validate(),
            Err(ValidationError::NegativeCount { .. })
        ));
    }

    #[test]
    fn test_home_exceeding_devices_rejected() {
        assert_eq!(
            observation(10, 11).validate(),
            Err(ValidationError::HomeExceedsDevices {
                home: 11,
                devices: 10
            })
        );
    }

    #[test]
    fn test_state_aggregate_detection() {
        let record: PopulationRecord = serde_json::from_str(
            r#"{"state_id": 1, "county_id": "000", "state_name": "Alabama",
                "county_name": "Alabama", "population_2019": 4903185}"#,
        )
        .unwrap();
        assert!(record.is_state_aggregate());
    }
}
