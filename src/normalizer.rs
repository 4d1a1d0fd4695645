//! Sampling-bias normalization
//!
//! The device panel samples a different share of residents in every county.
//! This module rescales device counts so that, within each state-day, each
//! county's share of sampled devices matches its share of true population:
//!
//! `factor = (population / state_population) * (state_sample_population / device_count)`
//!
//! Rows where the factor is undefined keep `None` adjusted counts and a
//! [`QualityFlag`] instead of an infinite or NaN value.

use crate::types::{PanelRow, QualityFlag, StateCode};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Population and sample totals for one state-day
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateDayTotals {
    /// Sum of county populations; unknown populations contribute zero
    pub population: f64,
    /// Sum of county device counts
    pub sample_population: f64,
}

/// Adjustment for a single county-day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasCorrection {
    pub factor: f64,
    pub adjusted_device_count: f64,
    pub adjusted_home_count: f64,
}

/// Sampling-bias corrector
pub struct Normalizer;

impl Normalizer {
    /// Aggregate state-day totals, then write adjusted counts back onto every row
    pub fn normalize(rows: &mut [PanelRow]) {
        let totals = Self::state_day_totals(rows);

        let mut hazards = 0usize;
        for row in rows.iter_mut() {
            let group = totals
                .get(&(row.state_id, row.date))
                .copied()
                .unwrap_or_default();
            row.state_population = Some(group.population);
            row.state_sample_population = Some(group.sample_population);

            match correct(row, &group) {
                Ok(correction) => {
                    row.adjustment_factor = Some(correction.factor);
                    row.adjusted_device_count = Some(correction.adjusted_device_count);
                    row.adjusted_home_count = Some(correction.adjusted_home_count);
                }
                Err(flag) => {
                    hazards += 1;
                    debug!(row = %row.key(), hazard = ?flag, "no adjustment factor");
                    row.flag(flag);
                }
            }
        }

        info!(
            rows = rows.len(),
            groups = totals.len(),
            hazards,
            "applied sampling-bias correction"
        );
    }

    /// Sum population and device counts per `(state, date)`
    pub fn state_day_totals(rows: &[PanelRow]) -> BTreeMap<(StateCode, NaiveDate), StateDayTotals> {
        let mut totals: BTreeMap<(StateCode, NaiveDate), StateDayTotals> = BTreeMap::new();
        for row in rows {
            let entry = totals.entry((row.state_id, row.date)).or_default();
            entry.population += row.population.unwrap_or(0) as f64;
            entry.sample_population += row.device_count as f64;
        }
        totals
    }
}

/// Compute the correction for one row, or the hazard that prevents it
fn correct(row: &PanelRow, group: &StateDayTotals) -> Result<BiasCorrection, QualityFlag> {
    if row.device_count == 0 {
        return Err(QualityFlag::ZeroDeviceCount);
    }
    let population = row.population.ok_or(QualityFlag::MissingPopulation)? as f64;
    if group.population <= 0.0 {
        return Err(QualityFlag::EmptyStatePopulation);
    }

    let factor =
        (population / group.population) * (group.sample_population / row.device_count as f64);
    if !factor.is_finite() {
        return Err(QualityFlag::ZeroDeviceCount);
    }

    Ok(BiasCorrection {
        factor,
        adjusted_device_count: row.device_count as f64 * factor,
        adjusted_home_count: row.completely_home_device_count as f64 * factor,
    })
}
