//! Core types for the stay-home index pipeline
//!
//! This module defines the geographic codes and keys, the input record
//! contracts, and the panel row that every stage of the pipeline enriches.

use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A geographic code as it appears in source data: either a JSON number or a
/// zero-padded numeric string such as `"06"` or `"001"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCode {
    Number(u64),
    Text(String),
}

impl RawCode {
    fn into_u64(self) -> Result<u64, String> {
        match self {
            RawCode::Number(n) => Ok(n),
            RawCode::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid numeric code: {:?}", s)),
        }
    }
}

/// State FIPS code. Territory and junk codes above 56 still parse; the merger
/// filters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StateCode(pub u16);

impl<'de> Deserialize<'de> for StateCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = RawCode::deserialize(deserializer)?
            .into_u64()
            .map_err(de::Error::custom)?;
        u16::try_from(value)
            .map(StateCode)
            .map_err(|_| de::Error::custom(format!("state code out of range: {}", value)))
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Three-digit county FIPS code within a state. `0` marks a state aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CountyCode(pub u16);

impl CountyCode {
    /// Population tables use county `0` for the state-level total row
    pub fn is_state_aggregate(&self) -> bool {
        self.0 == 0
    }
}

impl<'de> Deserialize<'de> for CountyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = RawCode::deserialize(deserializer)?
            .into_u64()
            .map_err(de::Error::custom)?;
        u16::try_from(value)
            .map(CountyCode)
            .map_err(|_| de::Error::custom(format!("county code out of range: {}", value)))
    }
}

impl fmt::Display for CountyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Identifies one county series
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CountyKey {
    pub state: StateCode,
    pub county: CountyCode,
}

impl fmt::Display for CountyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.state, self.county)
    }
}

/// Identifies one county-day observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountyDay {
    pub state: StateCode,
    pub county: CountyCode,
    pub date: NaiveDate,
}

impl CountyDay {
    pub fn county_key(&self) -> CountyKey {
        CountyKey {
            state: self.state,
            county: self.county,
        }
    }
}

impl fmt::Display for CountyDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} on {}", self.state, self.county, self.date)
    }
}

/// One row of the raw device panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// State FIPS code (nullable in source data)
    #[serde(default)]
    pub state_id: Option<StateCode>,
    /// County FIPS code (nullable in source data)
    #[serde(default)]
    pub county_id: Option<CountyCode>,
    /// Observation date (YYYY-MM-DD)
    pub date: NaiveDate,
    /// Sampled devices residing in the county
    pub device_count: i64,
    /// Sampled devices that did not leave home
    pub completely_home_device_count: i64,
}

/// One row of the population reference table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationRecord {
    #[serde(default)]
    pub state_id: Option<StateCode>,
    #[serde(default)]
    pub county_id: Option<CountyCode>,
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default)]
    pub county_name: Option<String>,
    /// Census population estimate; `None` when the source cell is blank
    #[serde(default)]
    pub population_2019: Option<u64>,
}

/// Why a derived cell of a panel row is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// `device_count` is zero, so the adjustment factor is undefined
    ZeroDeviceCount,
    /// The county has no population figure
    MissingPopulation,
    /// Every county of the state-day has zero or unknown population
    EmptyStatePopulation,
    /// Adjusted counts do not form a rate in [0, 1]
    InvalidRate,
    /// The state-day beta prior could not be fitted
    DegeneratePrior,
    /// The smoothing window contains a missing posterior
    IncompleteWindow,
    /// The county has no smoothed value on the reference date
    MissingBaseline,
}

/// A county-day row and every column the pipeline derives for it.
///
/// Derived columns are `None` until their stage runs, and stay `None` when the
/// stage hits a hazard for the row; `flags` records which hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRow {
    pub state_id: StateCode,
    pub county_id: CountyCode,
    pub date: NaiveDate,
    pub state_name: Option<String>,
    pub county_name: Option<String>,
    pub device_count: u64,
    pub completely_home_device_count: u64,
    pub population: Option<u64>,

    // Sampling-bias correction
    pub state_population: Option<f64>,
    pub state_sample_population: Option<f64>,
    pub adjustment_factor: Option<f64>,
    pub adjusted_device_count: Option<f64>,
    pub adjusted_home_count: Option<f64>,

    // State-day prior
    pub state_prior_mean: Option<f64>,
    pub state_prior_variance: Option<f64>,
    pub prior_alpha: Option<f64>,
    pub prior_beta: Option<f64>,

    // County-day posterior
    pub posterior_alpha: Option<f64>,
    pub posterior_beta: Option<f64>,
    pub posterior_mean_pct: Option<f64>,

    pub smoothed_estimate: Option<f64>,
    pub index_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<QualityFlag>,
}

impl PanelRow {
    /// Create a merged row with no derived columns yet
    pub fn new(key: CountyDay, device_count: u64, completely_home_device_count: u64) -> Self {
        Self {
            state_id: key.state,
            county_id: key.county,
            date: key.date,
            state_name: None,
            county_name: None,
            device_count,
            completely_home_device_count,
            population: None,
            state_population: None,
            state_sample_population: None,
            adjustment_factor: None,
            adjusted_device_count: None,
            adjusted_home_count: None,
            state_prior_mean: None,
            state_prior_variance: None,
            prior_alpha: None,
            prior_beta: None,
            posterior_alpha: None,
            posterior_beta: None,
            posterior_mean_pct: None,
            smoothed_estimate: None,
            index_value: None,
            flags: Vec::new(),
        }
    }

    pub fn key(&self) -> CountyDay {
        CountyDay {
            state: self.state_id,
            county: self.county_id,
            date: self.date,
        }
    }

    pub fn county_key(&self) -> CountyKey {
        CountyKey {
            state: self.state_id,
            county: self.county_id,
        }
    }

    /// Record a hazard once
    pub fn flag(&mut self, flag: QualityFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Index ranges of consecutive rows belonging to the same county series.
///
/// Expects rows sorted by `(state, county, date)`.
pub(crate) fn county_spans(rows: &[PanelRow]) -> Vec<std::ops::Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].county_key() != rows[start].county_key() {
            if start < i {
                spans.push(start..i);
            }
            start = i;
        }
    }
    spans
}
