//! Panel merging
//!
//! This module joins the device observation panel with the population
//! reference table:
//! - State-aggregate population rows (county `0`) never take part in the join
//! - Only states inside the configured code range are kept
//! - Rows with a null state or county are dropped
//! - Observations with no matching population row are dropped (inner join)
//! - Observations with a negative count are dropped. A home count above the
//!   device count is kept and flagged later as an invalid rate.

use crate::config::StateCodeRange;
use crate::error::ComputeError;
use crate::types::{CountyDay, CountyKey, ObservationRecord, PanelRow, PopulationRecord};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Counts of observations and population rows set aside by the merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub observations_in: usize,
    pub rows_out: usize,
    /// Observations whose state lies outside the allowed range
    pub out_of_range_state: usize,
    /// Observations with a null state or county
    pub null_key: usize,
    /// Observations with no population row (missing join key)
    pub unmatched: usize,
    /// Observations with a negative device or home count
    #[serde(default)]
    pub invalid_counts: usize,
    /// Population rows describing a whole state
    pub state_aggregate_rows_skipped: usize,
}

/// Merged panel, sorted by `(state, county, date)`
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub rows: Vec<PanelRow>,
    pub stats: MergeStats,
}

struct CountyPopulation {
    state_name: Option<String>,
    county_name: Option<String>,
    population: Option<u64>,
}

/// Joins observations to county populations
pub struct PanelMerger;

impl PanelMerger {
    /// Merge observations with the population table
    pub fn merge(
        observations: &[ObservationRecord],
        population: &[PopulationRecord],
        state_codes: &StateCodeRange,
    ) -> Result<MergeOutcome, ComputeError> {
        if observations.is_empty() {
            return Err(ComputeError::EmptyInput(
                "observation panel has no records".to_string(),
            ));
        }

        let mut stats = MergeStats {
            observations_in: observations.len(),
            ..Default::default()
        };
        let counties = index_population(population, state_codes, &mut stats)?;

        let mut merged: BTreeMap<CountyDay, PanelRow> = BTreeMap::new();
        for record in observations {
            let (Ok(device_count), Ok(home_count)) = (
                u64::try_from(record.device_count),
                u64::try_from(record.completely_home_device_count),
            ) else {
                stats.invalid_counts += 1;
                continue;
            };

            let (state, county) = match (record.state_id, record.county_id) {
                (Some(state), Some(county)) => (state, county),
                _ => {
                    stats.null_key += 1;
                    continue;
                }
            };

            if !state_codes.contains(state) {
                stats.out_of_range_state += 1;
                continue;
            }

            let Some(county_pop) = counties.get(&CountyKey { state, county }) else {
                stats.unmatched += 1;
                continue;
            };

            let key = CountyDay {
                state,
                county,
                date: record.date,
            };
            let mut row = PanelRow::new(key, device_count, home_count);
            row.population = county_pop.population;
            row.state_name = county_pop.state_name.clone();
            row.county_name = county_pop.county_name.clone();

            match merged.entry(key) {
                Entry::Occupied(_) => {
                    return Err(ComputeError::DuplicateObservation(key.to_string()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
            }
        }

        stats.rows_out = merged.len();
        log_drops(&stats);

        if merged.is_empty() {
            return Err(ComputeError::EmptyInput(
                "no observations matched the population table".to_string(),
            ));
        }

        info!(
            rows = stats.rows_out,
            observations = stats.observations_in,
            "merged observation panel"
        );

        Ok(MergeOutcome {
            rows: merged.into_values().collect(),
            stats,
        })
    }
}

/// Build the county-level population lookup
fn index_population(
    population: &[PopulationRecord],
    state_codes: &StateCodeRange,
    stats: &mut MergeStats,
) -> Result<BTreeMap<CountyKey, CountyPopulation>, ComputeError> {
    let mut counties = BTreeMap::new();

    for record in population {
        if record.is_state_aggregate() {
            stats.state_aggregate_rows_skipped += 1;
            continue;
        }
        let (Some(state), Some(county)) = (record.state_id, record.county_id) else {
            continue;
        };
        if !state_codes.contains(state) {
            continue;
        }

        let key = CountyKey { state, county };
        let entry = CountyPopulation {
            state_name: record.state_name.clone(),
            county_name: record.county_name.clone(),
            population: record.population_2019,
        };
        if counties.insert(key, entry).is_some() {
            return Err(ComputeError::DuplicatePopulation(key.to_string()));
        }
    }

    Ok(counties)
}

fn log_drops(stats: &MergeStats) {
    if stats.invalid_counts > 0 {
        warn!(
            count = stats.invalid_counts,
            "dropped observations with negative counts"
        );
    }
    if stats.out_of_range_state > 0 {
        warn!(
            count = stats.out_of_range_state,
            "dropped observations outside the state code range"
        );
    }
    if stats.null_key > 0 {
        warn!(count = stats.null_key, "dropped observations with null geography");
    }
    if stats.unmatched > 0 {
        warn!(
            count = stats.unmatched,
            "dropped observations with no population row"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CountyCode, StateCode};
    use chrono::NaiveDate;

    fn obs(state: Option<u16>, county: Option<u16>, day: u32, devices: i64) -> ObservationRecord {
        ObservationRecord {
            state_id: state.map(StateCode),
            county_id: county.map(CountyCode),
            date: NaiveDate::from_ymd_opt(2020, 2, day).unwrap(),
            device_count: devices,
            completely_home_device_count: devices / 4,
        }
    }

    fn pop(state: u16, county: u16, population: Option<u64>) -> PopulationRecord {
        PopulationRecord {
            state_id: Some(StateCode(state)),
            county_id: Some(CountyCode(county)),
            state_name: Some("Testland".to_string()),
            county_name: Some(format!("County {}", county)),
            population_2019: population,
        }
    }

    fn population_table() -> Vec<PopulationRecord> {
        vec![
            pop(1, 0, Some(1000)),
            pop(1, 1, Some(100)),
            pop(1, 3, Some(900)),
            pop(72, 1, Some(500)),
        ]
    }

    #[test]
    fn test_merge_attaches_population_and_sorts() {
        let observations = vec![obs(Some(1), Some(3), 2, 40), obs(Some(1), Some(1), 1, 20)];
        let outcome =
            PanelMerger::merge(&observations, &population_table(), &StateCodeRange::default())
                .unwrap();

        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.rows[0].county_id, CountyCode(1));
        assert_eq!(outcome.rows[0].population, Some(100));
        assert_eq!(outcome.rows[1].population, Some(900));
        assert_eq!(outcome.rows[1].county_name.as_deref(), Some("County 3"));
        assert_eq!(outcome.stats.state_aggregate_rows_skipped, 1);
    }

    #[test]
    fn test_merge_drops_invalid_geography() {
        let observations = vec![
            obs(Some(1), Some(1), 1, 20),
            obs(Some(72), Some(1), 1, 20), // territory
            obs(None, Some(1), 1, 20),
            obs(Some(1), None, 1, 20),
            obs(Some(1), Some(5), 1, 20), // no population row
            obs(Some(1), Some(0), 1, 20), // state aggregate is not joinable
        ];
        let outcome =
            PanelMerger::merge(&observations, &population_table(), &StateCodeRange::default())
                .unwrap();

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.stats.out_of_range_state, 1);
        assert_eq!(outcome.stats.null_key, 2);
        assert_eq!(outcome.stats.unmatched, 2);
        assert_eq!(outcome.stats.observations_in, 6);
        assert_eq!(outcome.stats.rows_out, 1);
    }

    #[test]
    fn test_negative_counts_are_dropped_not_clamped() {
        let mut negative_home = obs(Some(1), Some(3), 1, 1000);
        negative_home.completely_home_device_count = -50;
        let observations = vec![
            obs(Some(1), Some(1), 1, 1000),
            negative_home,
            obs(Some(1), Some(3), 2, -10),
        ];
        let outcome =
            PanelMerger::merge(&observations, &population_table(), &StateCodeRange::default())
                .unwrap();

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].county_id, CountyCode(1));
        assert_eq!(outcome.stats.invalid_counts, 2);
        assert_eq!(outcome.stats.rows_out, 1);
    }

    #[test]
    fn test_home_above_devices_is_kept() {
        let mut record = obs(Some(1), Some(1), 1, 10);
        record.completely_home_device_count = 11;
        let outcome =
            PanelMerger::merge(&[record], &population_table(), &StateCodeRange::default())
                .unwrap();

        assert_eq!(outcome.rows[0].device_count, 10);
        assert_eq!(outcome.rows[0].completely_home_device_count, 11);
        assert_eq!(outcome.stats.invalid_counts, 0);
    }

    #[test]
    fn test_wide_state_code_is_out_of_range() {
        let observations = vec![obs(Some(1), Some(1), 1, 20), obs(Some(300), Some(1), 1, 20)];
        let outcome =
            PanelMerger::merge(&observations, &population_table(), &StateCodeRange::default())
                .unwrap();

        assert_eq!(outcome.stats.out_of_range_state, 1);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[test]
    fn test_duplicate_observation_is_fatal() {
        let observations = vec![obs(Some(1), Some(1), 1, 20), obs(Some(1), Some(1), 1, 30)];
        let err = PanelMerger::merge(&observations, &population_table(), &StateCodeRange::default())
            .unwrap_err();
        assert!(matches!(err, ComputeError::DuplicateObservation(_)));
    }

    #[test]
    fn test_duplicate_population_is_fatal() {
        let mut population = population_table();
        population.push(pop(1, 1, Some(7)));
        let err = PanelMerger::merge(
            &[obs(Some(1), Some(1), 1, 20)],
            &population,
            &StateCodeRange::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::DuplicatePopulation(_)));
    }

    #[test]
    fn test_empty_inputs_are_fatal() {
        let err = PanelMerger::merge(&[], &population_table(), &StateCodeRange::default())
            .unwrap_err();
        assert!(matches!(err, ComputeError::EmptyInput(_)));

        let err = PanelMerger::merge(
            &[obs(Some(1), Some(9), 1, 20)],
            &population_table(),
            &StateCodeRange::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::EmptyInput(_)));
    }

    #[test]
    fn test_null_population_is_kept_as_missing() {
        let population = vec![pop(1, 1, None)];
        let outcome = PanelMerger::merge(
            &[obs(Some(1), Some(1), 1, 20)],
            &population,
            &StateCodeRange::default(),
        )
        .unwrap();
        assert_eq!(outcome.rows[0].population, None);
    }
}
