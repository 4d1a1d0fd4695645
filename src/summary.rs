//! State-level daily rollups of the indexed panel

use crate::types::{PanelRow, StateCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rollup of one state on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDailySummary {
    pub state_id: StateCode,
    pub state_name: Option<String>,
    pub date: NaiveDate,
    /// County rows present for the state-day
    pub counties: usize,
    /// County rows carrying an index value
    pub indexed_counties: usize,
    /// Population of the indexed counties
    pub population: u64,
    /// Population-weighted mean index value of the indexed counties
    pub weighted_index: Option<f64>,
    /// Unweighted mean posterior stay-home percentage
    pub mean_posterior_pct: Option<f64>,
}

#[derive(Default)]
struct Accumulator {
    state_name: Option<String>,
    counties: usize,
    indexed_counties: usize,
    population: u64,
    weighted_sum: f64,
    posterior_sum: f64,
    posterior_count: usize,
}

/// Summarize the final panel per `(state, date)`, in key order
pub fn summarize(rows: &[PanelRow]) -> Vec<StateDailySummary> {
    let mut groups: BTreeMap<(StateCode, NaiveDate), Accumulator> = BTreeMap::new();

    for row in rows {
        let acc = groups.entry((row.state_id, row.date)).or_default();
        acc.counties += 1;
        if acc.state_name.is_none() {
            acc.state_name = row.state_name.clone();
        }
        if let Some(posterior) = row.posterior_mean_pct {
            acc.posterior_sum += posterior;
            acc.posterior_count += 1;
        }
        // Weighting needs a population; an index without one is left out
        if let (Some(index), Some(population)) = (row.index_value, row.population) {
            acc.indexed_counties += 1;
            acc.population += population;
            acc.weighted_sum += index * population as f64;
        }
    }

    groups
        .into_iter()
        .map(|((state_id, date), acc)| StateDailySummary {
            state_id,
            state_name: acc.state_name,
            date,
            counties: acc.counties,
            indexed_counties: acc.indexed_counties,
            population: acc.population,
            weighted_index: (acc.population > 0)
                .then(|| acc.weighted_sum / acc.population as f64),
            mean_posterior_pct: (acc.posterior_count > 0)
                .then(|| acc.posterior_sum / acc.posterior_count as f64),
        })
        .collect()
}
