//! Monte Carlo error propagation.
//!
//! Parameter uncertainties come from refitting synthetic data sets: each
//! simulation draws every observable from a normal distribution with the
//! measured error as its width, runs the full fitting chain on the
//! synthetic set, and records the optimised parameters.  The per-parameter
//! standard deviation and the empirical 95% interval over the successful
//! simulations are the reported errors.

use crate::data::RelaxationDatum;
use crate::error::FitError;
use crate::fitter::{FitOptions, Fitter, ModelFit};
use crate::kernel::RatePredictor;

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where the synthetic data sets are centred.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonteCarloSource {
    /// Centre on the back-calculated values of the fitted model.  This is
    /// the statistically proper choice: the synthetic sets then sample the
    /// error distribution around the model, not around the noise.
    #[default]
    Predicted,
    /// Centre on the measured values (bootstrap-like; biased, but useful
    /// for diagnosing a poor fit).
    Observed,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct MonteCarloOptions {
    pub n_sims: usize,
    pub source: MonteCarloSource,
    pub seed: u64,
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self {
            n_sims: 500,
            source: MonteCarloSource::Predicted,
            seed: 0,
        }
    }
}

/// Fraction of failed simulations beyond which the error estimates are
/// flagged as unreliable.
const LOW_CONFIDENCE_FRACTION: f64 = 0.1;

/// Per-parameter error estimates from one Monte Carlo run.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct MonteCarloSummary {
    pub n_sims: usize,
    pub n_failed: usize,
    /// Sample standard deviation per parameter, external units.
    pub sigmas: Vec<f64>,
    /// Empirical 2.5% quantile per parameter.
    pub ci_lower: Vec<f64>,
    /// Empirical 97.5% quantile per parameter.
    pub ci_upper: Vec<f64>,
    /// Raised when more than 10% of the simulations failed.
    pub low_confidence: bool,
}

/// Run `options.n_sims` synthetic refits of `fit` and summarise the
/// parameter spread.
pub fn monte_carlo(
    predictor: &RatePredictor,
    data: &[RelaxationDatum],
    tm: f64,
    fit_options: &FitOptions,
    fit: &ModelFit,
    options: &MonteCarloOptions,
) -> Result<MonteCarloSummary, FitError> {
    if options.n_sims == 0 {
        return Err(FitError::InvalidInput(
            "the number of Monte Carlo simulations must be positive".into(),
        ));
    }
    let k = fit.k;
    if k == 0 {
        return Ok(MonteCarloSummary {
            n_sims: options.n_sims,
            n_failed: 0,
            sigmas: Vec::new(),
            ci_lower: Vec::new(),
            ci_upper: Vec::new(),
            low_confidence: false,
        });
    }

    // Centres of the synthetic distributions, one per datum.
    let centres: Vec<f64> = match options.source {
        MonteCarloSource::Predicted => data
            .iter()
            .map(|d| predictor.predict_datum(fit.model, &fit.theta, d))
            .collect(),
        MonteCarloSource::Observed => data.iter().map(|d| d.value()).collect(),
    };
    if centres.iter().any(|c| !c.is_finite()) {
        return Err(FitError::Domain);
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut samples = Array2::<f64>::zeros((0, k));
    let mut n_failed = 0usize;

    for _ in 0..options.n_sims {
        let synthetic: Result<Vec<RelaxationDatum>, FitError> = data
            .iter()
            .zip(&centres)
            .map(|(d, &c)| {
                let noise = Normal::new(c, d.error())
                    .map_err(|e| FitError::InvalidInput(e.to_string()))?;
                RelaxationDatum::new(d.kind(), d.frq(), noise.sample(&mut rng), d.error())
            })
            .collect();
        let synthetic = synthetic?;

        // Warm start at the point estimate; the grid stage is skipped.
        let sim = Fitter::new(predictor, &synthetic, tm, fit_options).fit_from(fit.model, &fit.theta);
        match sim {
            Ok(s) => {
                samples
                    .push_row(ndarray::ArrayView1::from(&s.theta))
                    .map_err(|e| FitError::InvalidInput(e.to_string()))?;
            }
            Err(FitError::Cancelled) => return Err(FitError::Cancelled),
            Err(e) => {
                log::trace!("monte carlo simulation failed: {e}");
                n_failed += 1;
            }
        }
    }

    let n_ok = samples.nrows();
    if n_ok < 2 {
        return Err(FitError::InvalidInput(format!(
            "only {n_ok} of {} Monte Carlo simulations succeeded",
            options.n_sims
        )));
    }

    let mut sigmas = Vec::with_capacity(k);
    let mut ci_lower = Vec::with_capacity(k);
    let mut ci_upper = Vec::with_capacity(k);
    for j in 0..k {
        let column = samples.column(j);
        let mean = column.mean().unwrap_or(0.0);
        let var = column.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>()
            / (n_ok as f64 - 1.0);
        sigmas.push(var.sqrt());

        let mut sorted: Vec<f64> = column.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        ci_lower.push(quantile(&sorted, 0.025));
        ci_upper.push(quantile(&sorted, 0.975));
    }

    Ok(MonteCarloSummary {
        n_sims: options.n_sims,
        n_failed,
        sigmas,
        ci_lower,
        ci_upper,
        low_confidence: (n_failed as f64) > LOW_CONFIDENCE_FRACTION * options.n_sims as f64,
    })
}

/// Linear-interpolation quantile of a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let w = pos - lo as f64;
        sorted[lo] * (1.0 - w) + sorted[hi] * w
    }
}
