//! Temporal smoothing
//!
//! A causal (trailing) moving average of the posterior stay-home percentage,
//! applied independently to each county series in date order. Day-of-week
//! swings wash out over a 7-observation window.

use crate::types::{county_spans, CountyKey, PanelRow, QualityFlag};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Result of a smoothing pass
#[derive(Debug, Clone)]
pub struct SmoothOutcome {
    /// Rows of the counties that were smoothed, still in `(state, county, date)` order
    pub rows: Vec<PanelRow>,
    /// Counties dropped for having too short a history
    pub excluded: Vec<CountyKey>,
}

/// Causal moving-average smoother
pub struct Smoother {
    window: usize,
    min_history: usize,
}

impl Smoother {
    /// `window` observations per average; series need more than `min_history`
    /// observations to be kept
    pub fn new(window: usize, min_history: usize) -> Self {
        Self {
            window: window.max(1),
            min_history,
        }
    }

    /// Drop short series, then fill `smoothed_estimate` on the rest.
    ///
    /// Expects rows sorted by `(state, county, date)`.
    pub fn smooth(&self, rows: Vec<PanelRow>) -> SmoothOutcome {
        let spans = county_spans(&rows);
        let mut kept = Vec::with_capacity(rows.len());
        let mut excluded = Vec::new();

        let mut rows = rows.into_iter();
        for span in spans {
            let mut series: Vec<PanelRow> = rows.by_ref().take(span.len()).collect();
            if series.len() <= self.min_history {
                excluded.push(series[0].county_key());
                continue;
            }
            self.smooth_series(&mut series);
            kept.extend(series);
        }

        if !excluded.is_empty() {
            warn!(
                counties = excluded.len(),
                min_history = self.min_history,
                "excluded counties with insufficient history"
            );
        }
        info!(rows = kept.len(), window = self.window, "smoothed county series");

        SmoothOutcome {
            rows: kept,
            excluded,
        }
    }

    /// Smooth one county series in place
    fn smooth_series(&self, series: &mut [PanelRow]) {
        let mut window: VecDeque<Option<f64>> = VecDeque::with_capacity(self.window);

        for row in series.iter_mut() {
            window.push_back(row.posterior_mean_pct);
            while window.len() > self.window {
                window.pop_front();
            }

            row.smoothed_estimate = None;
            if window.len() < self.window {
                continue;
            }
            match window_mean(&window) {
                Some(mean) => row.smoothed_estimate = Some(mean),
                None => row.flag(QualityFlag::IncompleteWindow),
            }
        }
    }
}

/// Mean of a full window; `None` if any value is missing
fn window_mean(window: &VecDeque<Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    for value in window {
        sum += (*value)?;
    }
    Some(sum / window.len() as f64)
}
