//! Pipeline configuration

use crate::error::ComputeError;
use crate::types::StateCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default baseline date: the week before U.S. stay-at-home behavior shifted
pub const DEFAULT_REFERENCE_DATE: (i32, u32, u32) = (2020, 2, 12);

/// Default moving-average window in observations
pub const DEFAULT_SMOOTHING_WINDOW: usize = 7;

/// A county series needs strictly more observations than this to be smoothed
pub const DEFAULT_MIN_HISTORY: usize = 7;

/// First and last state FIPS codes of the 50 states plus DC
pub const FIRST_STATE_CODE: u16 = 1;
pub const LAST_STATE_CODE: u16 = 56;

/// Inclusive range of state codes the merger keeps. Territories use codes
/// above 56.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCodeRange {
    pub first: u16,
    pub last: u16,
}

impl Default for StateCodeRange {
    fn default() -> Self {
        Self {
            first: FIRST_STATE_CODE,
            last: LAST_STATE_CODE,
        }
    }
}

impl StateCodeRange {
    pub fn contains(&self, code: StateCode) -> bool {
        (self.first..=self.last).contains(&code.0)
    }
}

/// Settings for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Date each county series is indexed against
    pub reference_date: NaiveDate,
    /// Moving-average window length
    pub smoothing_window: usize,
    /// Series with this many observations or fewer are excluded
    pub min_history: usize,
    /// States kept by the merger
    pub state_codes: StateCodeRange,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let (y, m, d) = DEFAULT_REFERENCE_DATE;
        Self {
            reference_date: NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN),
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            min_history: DEFAULT_MIN_HISTORY,
            state_codes: StateCodeRange::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_reference_date(mut self, reference_date: NaiveDate) -> Self {
        self.reference_date = reference_date;
        self
    }

    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.smoothing_window = window;
        self
    }

    pub fn with_min_history(mut self, min_history: usize) -> Self {
        self.min_history = min_history;
        self
    }

    /// Parse a `YYYY-MM-DD` reference date
    pub fn parse_reference_date(value: &str) -> Result<NaiveDate, ComputeError> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map_err(|e| ComputeError::DateParseError(format!("{:?}: {}", value, e)))
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.smoothing_window == 0 {
            return Err(ComputeError::InvalidConfig(
                "smoothing_window must be at least 1".to_string(),
            ));
        }
        if self.min_history + 1 < self.smoothing_window {
            return Err(ComputeError::InvalidConfig(format!(
                "min_history ({}) leaves series shorter than the smoothing window ({})",
                self.min_history, self.smoothing_window
            )));
        }
        if self.state_codes.first > self.state_codes.last {
            return Err(ComputeError::InvalidConfig(format!(
                "state code range is empty: {}..={}",
                self.state_codes.first, self.state_codes.last
            )));
        }
        Ok(())
    }

    /// Load configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
