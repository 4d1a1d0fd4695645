//! Empirical-Bayes shrinkage
//!
//! County-day stay-home rates from small samples are noisy. Every state-day
//! gets a beta prior fitted by the method of moments to its counties' rates,
//! and each county-day rate is replaced by the mean of its beta-binomial
//! posterior. Counties with little evidence move toward the state mean;
//! counties with a lot of evidence barely move.
//!
//! The moment fit can fail (too few counties, no spread, or a spread too
//! wide for any beta distribution). [`BetaPrior::fit`] reports that as a
//! [`PriorFit::Degenerate`] instead of handing back invalid parameters.

use crate::types::{PanelRow, QualityFlag, StateCode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Mean and variance-of-the-mean of the county rates in one state-day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateMoments {
    /// Number of counties contributing a rate
    pub counties: usize,
    /// Mean county rate
    pub mean: f64,
    /// Sample variance (n - 1 denominator) divided by the number of counties.
    /// `None` with fewer than two counties.
    pub variance: Option<f64>,
}

impl StateMoments {
    /// Moments of a set of rates; `None` when there are no rates
    pub fn from_rates(rates: &[f64]) -> Option<Self> {
        if rates.is_empty() {
            return None;
        }
        let n = rates.len() as f64;
        let mean = rates.iter().sum::<f64>() / n;
        let variance = if rates.len() < 2 {
            None
        } else {
            let ss: f64 = rates.iter().map(|r| (r - mean) * (r - mean)).sum();
            Some(ss / (n - 1.0) / n)
        };
        Some(Self {
            counties: rates.len(),
            mean,
            variance,
        })
    }
}

/// Why a state-day prior could not be fitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorHazard {
    TooFewCounties { n: usize },
    MeanOutOfRange { mean: f64 },
    ZeroVariance,
    NonPositiveConcentration { alpha_plus_beta: f64 },
}

/// Result of a method-of-moments fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriorFit {
    Valid(BetaPrior),
    Degenerate(PriorHazard),
}

/// Beta prior over a county's stay-home rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaPrior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPrior {
    /// Fit `Beta(alpha, beta)` to a mean and variance by the method of moments
    pub fn fit(moments: &StateMoments) -> PriorFit {
        let mean = moments.mean;
        let Some(variance) = moments.variance else {
            return PriorFit::Degenerate(PriorHazard::TooFewCounties {
                n: moments.counties,
            });
        };
        if !(mean > 0.0 && mean < 1.0) {
            return PriorFit::Degenerate(PriorHazard::MeanOutOfRange { mean });
        }
        if !(variance > 0.0) {
            return PriorFit::Degenerate(PriorHazard::ZeroVariance);
        }

        let alpha_plus_beta = mean * (1.0 - mean) / variance - 1.0;
        if !(alpha_plus_beta > 0.0) || !alpha_plus_beta.is_finite() {
            return PriorFit::Degenerate(PriorHazard::NonPositiveConcentration { alpha_plus_beta });
        }

        PriorFit::Valid(BetaPrior {
            alpha: alpha_plus_beta * mean,
            beta: alpha_plus_beta * (1.0 - mean),
        })
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Conjugate update with (possibly fractional) successes and failures
    pub fn update(&self, successes: f64, failures: f64) -> Posterior {
        Posterior {
            alpha: self.alpha + successes,
            beta: self.beta + failures,
        }
    }
}

/// Beta posterior for one county-day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Posterior {
    /// Posterior mean on a 0-100 scale
    pub fn mean_pct(&self) -> f64 {
        100.0 * self.alpha / (self.alpha + self.beta)
    }
}

/// Counters from one shrinkage pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkageStats {
    pub state_days: usize,
    pub degenerate_state_days: usize,
    pub invalid_rates: usize,
    pub posteriors: usize,
}

/// Hierarchical shrinkage estimator
pub struct Shrinker;

impl Shrinker {
    /// Fit one prior per `(state, date)` and write priors and posteriors onto rows
    pub fn shrink(rows: &mut [PanelRow]) -> ShrinkageStats {
        let mut stats = ShrinkageStats::default();

        // Pass 1: collect usable rates per state-day
        let mut rates: BTreeMap<(StateCode, NaiveDate), Vec<f64>> = BTreeMap::new();
        for row in rows.iter_mut() {
            match county_rate(row) {
                RateOutcome::Rate(rate) => rates
                    .entry((row.state_id, row.date))
                    .or_default()
                    .push(rate),
                RateOutcome::Invalid => {
                    stats.invalid_rates += 1;
                    row.flag(QualityFlag::InvalidRate);
                }
                RateOutcome::Unavailable => {}
            }
        }

        // Pass 2: one fit per state-day
        let mut fits: BTreeMap<(StateCode, NaiveDate), (StateMoments, PriorFit)> = BTreeMap::new();
        for (key, group_rates) in &rates {
            let Some(moments) = StateMoments::from_rates(group_rates) else {
                continue;
            };
            let fit = BetaPrior::fit(&moments);
            if let PriorFit::Degenerate(hazard) = fit {
                stats.degenerate_state_days += 1;
                debug!(state = %key.0, date = %key.1, ?hazard, "degenerate state prior");
            }
            fits.insert(*key, (moments, fit));
        }
        stats.state_days = fits.len();

        // Pass 3: join back
        for row in rows.iter_mut() {
            let Some((moments, fit)) = fits.get(&(row.state_id, row.date)) else {
                continue;
            };
            row.state_prior_mean = Some(moments.mean);
            row.state_prior_variance = moments.variance;

            let prior = match fit {
                PriorFit::Valid(prior) => *prior,
                PriorFit::Degenerate(_) => {
                    row.flag(QualityFlag::DegeneratePrior);
                    continue;
                }
            };
            row.prior_alpha = Some(prior.alpha);
            row.prior_beta = Some(prior.beta);

            if let (RateOutcome::Rate(_), Some(devices), Some(home)) = (
                county_rate(row),
                row.adjusted_device_count,
                row.adjusted_home_count,
            ) {
                let posterior = prior.update(home, devices - home);
                row.posterior_alpha = Some(posterior.alpha);
                row.posterior_beta = Some(posterior.beta);
                row.posterior_mean_pct = Some(posterior.mean_pct());
                stats.posteriors += 1;
            }
        }

        info!(
            state_days = stats.state_days,
            degenerate = stats.degenerate_state_days,
            invalid_rates = stats.invalid_rates,
            posteriors = stats.posteriors,
            "fitted state priors"
        );
        stats
    }
}

enum RateOutcome {
    Rate(f64),
    /// Adjusted counts exist but do not form a rate in [0, 1]
    Invalid,
    /// An earlier stage already marked the counts missing
    Unavailable,
}

fn county_rate(row: &PanelRow) -> RateOutcome {
    let (Some(devices), Some(home)) = (row.adjusted_device_count, row.adjusted_home_count) else {
        return RateOutcome::Unavailable;
    };
    if !(devices > 0.0) || !(home >= 0.0) || home > devices {
        return RateOutcome::Invalid;
    }
    let rate = home / devices;
    if rate.is_finite() {
        RateOutcome::Rate(rate)
    } else {
        RateOutcome::Invalid
    }
}
