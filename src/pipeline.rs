//! Pipeline orchestration
//!
//! This module provides the public API of the crate. It runs the full
//! pipeline from the two input tables to the enriched panel.

use crate::baseline::BaselineIndexer;
use crate::config::PipelineConfig;
use crate::encoder::PanelEncoder;
use crate::error::ComputeError;
use crate::merger::{MergeStats, PanelMerger};
use crate::normalizer::Normalizer;
use crate::shrinkage::{ShrinkageStats, Shrinker};
use crate::smoother::Smoother;
use crate::types::{CountyKey, ObservationRecord, PanelRow, PopulationRecord, QualityFlag};
use crate::{INDEX_VERSION, PRODUCER_NAME};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// What happened during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub producer: String,
    pub version: String,
    pub reference_date: NaiveDate,
    pub merge: MergeStats,
    /// Rows flagged with zero device counts, missing or empty populations
    pub bias_hazard_rows: usize,
    pub shrinkage: ShrinkageStats,
    /// Counties dropped for insufficient history
    pub excluded_counties: Vec<CountyKey>,
    /// Counties with no smoothed value on the reference date
    pub missing_baseline_counties: Vec<CountyKey>,
    pub rows_out: usize,
    pub indexed_rows: usize,
    /// Content digest of the output panel
    pub output_digest: Uuid,
}

/// Enriched panel and run report
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub rows: Vec<PanelRow>,
    pub report: PipelineReport,
}

/// Run the full pipeline over an observation panel and a population table.
///
/// Pipeline stages:
/// 1. PanelMerger - Join population, filter geography
/// 2. Normalizer - Correct sampling bias
/// 3. Shrinker - Empirical-Bayes shrinkage toward the state mean
/// 4. Smoother - Causal moving average, drop short series
/// 5. BaselineIndexer - Difference from the reference date
///
/// # Example
/// ```ignore
/// let output = run_pipeline(&observations, &population, &PipelineConfig::default())?;
/// for row in &output.rows {
///     println!("{} {:?}", row.key(), row.index_value);
/// }
/// ```
pub fn run_pipeline(
    observations: &[ObservationRecord],
    population: &[PopulationRecord],
    config: &PipelineConfig,
) -> Result<PipelineOutput, ComputeError> {
    IndexProcessor::new(config.clone())?.process(observations, population)
}

/// Configured pipeline, reusable across input tables
pub struct IndexProcessor {
    config: PipelineConfig,
    smoother: Smoother,
    indexer: BaselineIndexer,
}

impl Default for IndexProcessor {
    fn default() -> Self {
        let config = PipelineConfig::default();
        Self {
            smoother: Smoother::new(config.smoothing_window, config.min_history),
            indexer: BaselineIndexer::new(config.reference_date),
            config,
        }
    }
}

impl IndexProcessor {
    /// Create a processor after validating the configuration
    pub fn new(config: PipelineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            smoother: Smoother::new(config.smoothing_window, config.min_history),
            indexer: BaselineIndexer::new(config.reference_date),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all five stages
    pub fn process(
        &self,
        observations: &[ObservationRecord],
        population: &[PopulationRecord],
    ) -> Result<PipelineOutput, ComputeError> {
        // Stage 1: merge
        let merged = PanelMerger::merge(observations, population, &self.config.state_codes)?;
        let mut rows = merged.rows;

        // Stage 2: sampling-bias correction
        Normalizer::normalize(&mut rows);
        let bias_hazard_rows = rows
            .iter()
            .filter(|r| {
                r.has_flag(QualityFlag::ZeroDeviceCount)
                    || r.has_flag(QualityFlag::MissingPopulation)
                    || r.has_flag(QualityFlag::EmptyStatePopulation)
            })
            .count();

        // Stage 3: shrinkage
        let shrinkage = Shrinker::shrink(&mut rows);

        // Stage 4: smoothing
        let smoothed = self.smoother.smooth(rows);
        let mut rows = smoothed.rows;

        // Stage 5: indexing
        let missing_baseline_counties = self.indexer.index(&mut rows);

        let indexed_rows = rows.iter().filter(|r| r.index_value.is_some()).count();
        let output_digest = PanelEncoder::digest(&rows)?;

        info!(
            rows = rows.len(),
            indexed_rows,
            excluded = smoothed.excluded.len(),
            missing_baseline = missing_baseline_counties.len(),
            digest = %output_digest,
            "pipeline complete"
        );

        let report = PipelineReport {
            producer: PRODUCER_NAME.to_string(),
            version: INDEX_VERSION.to_string(),
            reference_date: self.config.reference_date,
            merge: merged.stats,
            bias_hazard_rows,
            shrinkage,
            excluded_counties: smoothed.excluded,
            missing_baseline_counties,
            rows_out: rows.len(),
            indexed_rows,
            output_digest,
        };

        Ok(PipelineOutput { rows, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::OutputFormat;
    use crate::types::{CountyCode, StateCode};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 2, 1).unwrap()
    }

    fn obs(state: u16, county: u16, date: NaiveDate, devices: i64, home: i64) -> ObservationRecord {
        ObservationRecord {
            state_id: Some(StateCode(state)),
            county_id: Some(CountyCode(county)),
            date,
            device_count: devices,
            completely_home_device_count: home,
        }
    }

    fn pop(state: u16, county: u16, population: u64) -> PopulationRecord {
        PopulationRecord {
            state_id: Some(StateCode(state)),
            county_id: Some(CountyCode(county)),
            state_name: Some("Washington".to_string()),
            county_name: Some(format!("County {:03}", county)),
            population_2019: Some(population),
        }
    }

    /// Washington with three full counties from Feb 1 to Mar 1, a county
    /// observed only five days, and one that starts after the reference date.
    /// A territory row and an unmatched county ride along to be dropped.
    fn fixture() -> (Vec<ObservationRecord>, Vec<PopulationRecord>) {
        let mut observations = Vec::new();
        for day in 0..30 {
            let date = start() + Duration::days(day);
            let lockdown = if day >= 20 { 15 } else { 0 };
            observations.push(obs(53, 33, date, 20_000, 4_000 + 100 * lockdown + 10 * (day % 3)));
            observations.push(obs(53, 53, date, 8_000, 2_000 + 60 * lockdown + 7 * (day % 4)));
            observations.push(obs(53, 61, date, 300, 100 + 3 * lockdown + (day % 5)));
            if day < 5 {
                observations.push(obs(53, 75, date, 50, 20 + day));
            }
            if day >= 12 {
                observations.push(obs(53, 77, date, 900, 300 + 5 * day));
            }
            observations.push(obs(72, 1, date, 100, 30));
            observations.push(obs(53, 999, date, 100, 30));
        }

        let population = vec![
            pop(53, 0, 7_614_893),
            pop(53, 33, 2_252_782),
            pop(53, 53, 904_980),
            pop(53, 61, 822_083),
            pop(53, 75, 50_104),
            pop(53, 77, 250_873),
            pop(72, 1, 18_000),
        ];

        (observations, population)
    }

    #[test]
    fn test_run_pipeline_end_to_end() {
        let (observations, population) = fixture();
        let output = run_pipeline(&observations, &population, &PipelineConfig::default()).unwrap();
        let report = &output.report;

        assert_eq!(report.merge.out_of_range_state, 30);
        assert_eq!(report.merge.unmatched, 30);
        assert_eq!(report.merge.state_aggregate_rows_skipped, 1);

        // The five-day county is gone entirely
        let counties: BTreeSet<u16> = output.rows.iter().map(|r| r.county_id.0).collect();
        assert_eq!(counties, BTreeSet::from([33, 53, 61, 77]));
        assert_eq!(
            report.excluded_counties,
            vec![CountyKey {
                state: StateCode(53),
                county: CountyCode(75)
            }]
        );

        // County 77 starts after Feb 12 and cannot be indexed
        assert_eq!(
            report.missing_baseline_counties,
            vec![CountyKey {
                state: StateCode(53),
                county: CountyCode(77)
            }]
        );
        assert!(output
            .rows
            .iter()
            .filter(|r| r.county_id == CountyCode(77))
            .all(|r| r.index_value.is_none() && r.has_flag(QualityFlag::MissingBaseline)));

        assert_eq!(report.rows_out, 30 * 3 + 18);
        assert_eq!(report.shrinkage.degenerate_state_days, 0);
    }

    #[test]
    fn test_reference_day_indexes_to_zero() {
        let (observations, population) = fixture();
        let config = PipelineConfig::default();
        let output = run_pipeline(&observations, &population, &config).unwrap();

        for county in [33, 53, 61] {
            let series: Vec<&PanelRow> = output
                .rows
                .iter()
                .filter(|r| r.county_id == CountyCode(county))
                .collect();
            let reference = series
                .iter()
                .find(|r| r.date == config.reference_date)
                .unwrap();
            let baseline = reference.smoothed_estimate.unwrap();

            assert_eq!(reference.index_value, Some(0.0));
            for row in &series {
                match row.smoothed_estimate {
                    Some(v) => assert_eq!(row.index_value, Some(v - baseline)),
                    None => assert_eq!(row.index_value, None),
                }
            }
            // First six days have no full window
            assert!(series[..6].iter().all(|r| r.smoothed_estimate.is_none()));
            assert!(series[6..].iter().all(|r| r.smoothed_estimate.is_some()));
        }
    }

    #[test]
    fn test_sample_mass_is_preserved_per_state_day() {
        let (observations, population) = fixture();
        let output = run_pipeline(&observations, &population, &PipelineConfig::default()).unwrap();

        // Days 12..20 keep every county in the panel (75 only ran 5 days)
        let date = start() + Duration::days(15);
        let day: Vec<&PanelRow> = output.rows.iter().filter(|r| r.date == date).collect();
        let adjusted: f64 = day.iter().map(|r| r.adjusted_device_count.unwrap()).sum();
        let sample = day[0].state_sample_population.unwrap();
        assert!((adjusted - sample).abs() < 1e-6 * sample);
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let (observations, population) = fixture();
        let config = PipelineConfig::default();
        let first = run_pipeline(&observations, &population, &config).unwrap();
        let second = run_pipeline(&observations, &population, &config).unwrap();

        let encoder = PanelEncoder::new(OutputFormat::Ndjson);
        assert_eq!(
            encoder.encode(&first.rows).unwrap(),
            encoder.encode(&second.rows).unwrap()
        );
        assert_eq!(first.report.output_digest, second.report.output_digest);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let (mut observations, population) = fixture();
        let config = PipelineConfig::default();
        let forward = run_pipeline(&observations, &population, &config).unwrap();
        observations.reverse();
        let reversed = run_pipeline(&observations, &population, &config).unwrap();

        assert_eq!(forward.report.output_digest, reversed.report.output_digest);
    }

    #[test]
    fn test_bad_counts_do_not_abort_the_run() {
        let (mut observations, mut population) = fixture();
        for day in 0..30 {
            let home = if day == 18 { 600 } else { 150 };
            observations.push(obs(53, 79, start() + Duration::days(day), 500, home));
        }
        observations.push(obs(53, 33, start() + Duration::days(40), -5, 0));
        population.push(pop(53, 79, 60_000));

        let output = run_pipeline(&observations, &population, &PipelineConfig::default()).unwrap();
        assert_eq!(output.report.merge.invalid_counts, 1);
        assert_eq!(output.report.shrinkage.invalid_rates, 1);
        assert_eq!(output.report.shrinkage.degenerate_state_days, 0);

        let county: Vec<&PanelRow> = output
            .rows
            .iter()
            .filter(|r| r.county_id == CountyCode(79))
            .collect();
        assert_eq!(county.len(), 30);

        let bad = county[18];
        assert_eq!(bad.completely_home_device_count, 600);
        assert!(bad.has_flag(QualityFlag::InvalidRate));
        assert!(bad.adjusted_home_count.is_some());
        assert_eq!(bad.posterior_mean_pct, None);

        // Every window containing the bad day is blank
        for row in &county[18..25] {
            assert_eq!(row.smoothed_estimate, None);
            assert!(row.has_flag(QualityFlag::IncompleteWindow));
        }
        assert!(county[25].index_value.is_some());
        assert!(county[11].index_value.is_some());

        // The bad row stays out of its state-day prior
        let same_day: Vec<&PanelRow> = output.rows.iter().filter(|r| r.date == bad.date).collect();
        let rates: Vec<f64> = same_day
            .iter()
            .filter(|r| r.county_id != CountyCode(79))
            .map(|r| r.adjusted_home_count.unwrap() / r.adjusted_device_count.unwrap())
            .collect();
        let mean = rates.iter().sum::<f64>() / rates.len() as f64;
        assert!((bad.state_prior_mean.unwrap() - mean).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (observations, population) = fixture();
        let config = PipelineConfig::default().with_smoothing_window(0);
        assert!(matches!(
            run_pipeline(&observations, &population, &config),
            Err(ComputeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_custom_reference_date() {
        let (observations, population) = fixture();
        let config = PipelineConfig::default()
            .with_reference_date(NaiveDate::from_ymd_opt(2020, 2, 20).unwrap());
        let output = IndexProcessor::new(config)
            .unwrap()
            .process(&observations, &population)
            .unwrap();

        // County 77 now has a smoothed value on the reference date (its 8th observation)
        assert!(output.report.missing_baseline_counties.is_empty());
    }
}
