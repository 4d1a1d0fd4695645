//! Baseline indexing
//!
//! Each county's smoothed series is re-expressed as a difference from its own
//! smoothed value on a fixed reference date, so counties with different
//! pre-period habits can be compared by how much they changed.
//!
//! A county without a smoothed value on the reference date is never indexed
//! against some other date; it is reported as missing its baseline.

use crate::types::{county_spans, CountyKey, PanelRow, QualityFlag};
use chrono::NaiveDate;
use tracing::{info, warn};

/// Indexes county series against a reference date
pub struct BaselineIndexer {
    reference_date: NaiveDate,
}

impl BaselineIndexer {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self { reference_date }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Fill `index_value` on every row, returning counties that lack a baseline.
    ///
    /// Expects rows sorted by `(state, county, date)`.
    pub fn index(&self, rows: &mut [PanelRow]) -> Vec<CountyKey> {
        let mut missing = Vec::new();

        for span in county_spans(rows) {
            let series = &mut rows[span];
            match self.baseline_of(series) {
                Some(baseline) => {
                    for row in series.iter_mut() {
                        row.index_value = row.smoothed_estimate.map(|v| v - baseline);
                    }
                }
                None => {
                    missing.push(series[0].county_key());
                    for row in series.iter_mut() {
                        row.index_value = None;
                        row.flag(QualityFlag::MissingBaseline);
                    }
                }
            }
        }

        if !missing.is_empty() {
            warn!(
                counties = missing.len(),
                reference_date = %self.reference_date,
                "counties have no smoothed value on the reference date"
            );
        }
        info!(
            rows = rows.len(),
            reference_date = %self.reference_date,
            "indexed county series against baseline"
        );

        missing
    }

    /// Smoothed value on the reference date, if the series has one
    pub fn baseline_of(&self, series: &[PanelRow]) -> Option<f64> {
        series
            .binary_search_by_key(&self.reference_date, |row| row.date)
            .ok()
            .and_then(|i| series[i].smoothed_estimate)
    }
}
