//! Model selection and model elimination.
//!
//! Candidate fits are ranked by an information criterion built on the full
//! gaussian -2·ln L = n·ln 2π + Σ ln σᵢ² + χ², normalised by `2n`:
//!
//! ```text
//! AIC  = (-2 ln L + 2k) / 2n
//! AICc = (-2 ln L + 2k + 2k(k+1)/(n-k-1)) / 2n
//! BIC  = (-2 ln L + k·ln n) / 2n
//! ```
//!
//! The `n·ln 2π + Σ ln σᵢ²` term and the `2n` normalisation are constant
//! across the candidates of one residue, so the ranking is invariant to
//! both; they are kept so the recorded scores match the historical output
//! format.
//!
//! AICc is undefined when `n - k - 1 <= 0`; such fits are disqualified
//! from the ranking rather than scored.
//!
//! Before ranking, fits whose internal correlation times have run off
//! towards the tumbling time are eliminated: a `te`/`tf`/`ts` that close
//! to `tm` is indistinguishable from the overall tumbling and the fit is
//! a failed one regardless of its χ².

use crate::fitter::ModelFit;
use crate::model::Model;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Information criterion used for ranking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    #[default]
    Aic,
    Aicc,
    Bic,
}

impl Criterion {
    /// Normalised score; `None` when the criterion is undefined for this
    /// `(n, k)` combination.  `ln_sigma2_sum` is `Σ ln σᵢ²` over the data
    /// set.
    pub fn score(self, chi2: f64, k: usize, n: usize, ln_sigma2_sum: f64) -> Option<f64> {
        let kf = k as f64;
        let nf = n as f64;
        let minus_two_ln_l = nf * (2.0 * std::f64::consts::PI).ln() + ln_sigma2_sum + chi2;
        let raw = match self {
            Self::Aic => minus_two_ln_l + 2.0 * kf,
            Self::Aicc => {
                if n <= k + 1 {
                    return None;
                }
                minus_two_ln_l + 2.0 * kf + 2.0 * kf * (kf + 1.0) / (nf - kf - 1.0)
            }
            Self::Bic => minus_two_ln_l + kf * nf.ln(),
        };
        Some(raw / (2.0 * nf))
    }
}

/// `Σ ln σᵢ²` of a data set, the data-dependent constant of the gaussian
/// likelihood.
pub fn ln_sigma2_sum(data: &[crate::data::RelaxationDatum]) -> f64 {
    data.iter().map(|d| 2.0 * d.error().ln()).sum()
}

/// An internal correlation time within this factor of `tm` eliminates the
/// fit.
pub const ELIMINATION_TM_FACTOR: f64 = 1.5;

/// Check a fit against the elimination rules; returns the reason when the
/// fit must be discarded.
pub fn eliminate(fit: &ModelFit, tm: f64) -> Option<String> {
    for (i, &p) in fit.model.parameters().iter().enumerate() {
        if p.is_internal_time() && tm > 0.0 && fit.theta[i] >= ELIMINATION_TM_FACTOR * tm {
            return Some(format!(
                "{} = {:.3e} s has run into the tumbling time ({:.3e} s)",
                p.name(),
                fit.theta[i],
                tm
            ));
        }
    }
    None
}

/// Outcome of ranking one residue's candidate fits.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Selection {
    pub model: Model,
    pub score: f64,
    pub criterion: Criterion,
    /// Every candidate with its score; disqualified fits carry `None`.
    pub ranking: Vec<(Model, Option<f64>)>,
}

/// Rank `fits` under `criterion` and pick the winner.  `ln_sigma2_sum`
/// is the likelihood constant of the shared data set (see
/// [`ln_sigma2_sum`]).
///
/// Ties break towards fewer parameters, then towards the smaller model
/// id.  Returns `None` when no candidate has a defined score.
pub fn select(fits: &[ModelFit], criterion: Criterion, ln_sigma2_sum: f64) -> Option<Selection> {
    let ranking: Vec<(Model, Option<f64>)> = fits
        .iter()
        .map(|f| (f.model, criterion.score(f.chi2, f.k, f.n, ln_sigma2_sum)))
        .collect();

    let best = fits
        .iter()
        .zip(&ranking)
        .filter_map(|(f, &(_, score))| score.map(|s| (f, s)))
        .filter(|(_, s)| s.is_finite())
        .min_by(|(fa, sa), (fb, sb)| {
            sa.total_cmp(sb)
                .then_with(|| fa.k.cmp(&fb.k))
                .then_with(|| fa.model.cmp(&fb.model))
        })?;

    Some(Selection {
        model: best.0.model,
        score: best.1,
        criterion,
        ranking,
    })
}
