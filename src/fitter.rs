//! Per-residue, per-model fitting pipeline.
//!
//! One fit is a three-stage chain: a coarse grid search over the box
//! bounds seeds a downhill simplex, whose result is polished by
//! Levenberg-Marquardt.  If the chain ends somewhere unusable the grid is
//! refined once and the chain re-run; a second failure is reported as an
//! error.  A Levenberg-Marquardt stage that fails to improve on the
//! simplex is dropped with a warning rather than failing the fit, the
//! χ² surface is flat enough near some minima that this is routine.

use crate::constraints::{ConstraintMode, ConstraintSet};
use crate::data::RelaxationDatum;
use crate::error::FitError;
use crate::kernel::RatePredictor;
use crate::model::Model;
use crate::monte_carlo::MonteCarloSummary;
use crate::objective::{Chi2Objective, ObjectiveFunction};
use crate::optim::{
    GridSearch, LevenbergMarquardt, MinimizerTrait, NelderMead, OptimOptions, Termination,
};
use crate::params::Parameter;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Options for one model fit.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct FitOptions {
    /// Grid nodes per dimension for the seeding search.
    pub grid_inc: usize,
    pub constraint_mode: ConstraintMode,
    /// Bound overrides `(parameter, lower, upper)` applied on top of the
    /// defaults; entries for parameters the model lacks are ignored.
    pub bounds: Vec<(Parameter, f64, f64)>,
    pub optim: OptimOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            grid_inc: GridSearch::DEFAULT_INC,
            constraint_mode: ConstraintMode::Box,
            bounds: Vec::new(),
            optim: OptimOptions::default(),
        }
    }
}

/// Result of fitting one model to one residue's data.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ModelFit {
    pub model: Model,
    /// Optimised parameters in external units, ordered as
    /// `model.parameters()`.
    pub theta: Vec<f64>,
    pub chi2: f64,
    /// Number of data points.
    pub n: usize,
    /// Number of fitted parameters.
    pub k: usize,
    /// Scaled gradient norm at the solution.
    pub grad_norm: f64,
    pub iterations: usize,
    pub n_eval: usize,
    pub termination: Termination,
    pub warnings: Vec<String>,
    /// Monte Carlo error estimates, filled in by a later pass.
    pub mc: Option<MonteCarloSummary>,
}

impl ModelFit {
    /// Value of one parameter, `None` if the model lacks it.
    pub fn parameter(&self, p: Parameter) -> Option<f64> {
        self.model.index_of(p).map(|i| self.theta[i])
    }
}

/// Fits models to one residue's relaxation data.
pub struct Fitter<'a> {
    predictor: &'a RatePredictor,
    data: &'a [RelaxationDatum],
    /// Global tumbling time for the coupled constraints.
    tm: f64,
    options: &'a FitOptions,
}

impl<'a> Fitter<'a> {
    pub fn new(
        predictor: &'a RatePredictor,
        data: &'a [RelaxationDatum],
        tm: f64,
        options: &'a FitOptions,
    ) -> Self {
        Self {
            predictor,
            data,
            tm,
            options,
        }
    }

    pub fn constraints(&self, model: Model) -> ConstraintSet {
        let mut cs = ConstraintSet::new(model, self.tm, self.options.constraint_mode);
        for &(p, lo, hi) in &self.options.bounds {
            cs = cs.with_bounds(p, lo, hi);
        }
        cs
    }

    /// Fit `model`, running the grid → simplex → Levenberg-Marquardt chain.
    pub fn fit(&self, model: Model) -> Result<ModelFit, FitError> {
        let n = self.data.len();
        let k = model.arity();
        if n < k + 1 {
            return Err(FitError::InsufficientData { model, n, k });
        }

        let constraints = self.constraints(model);
        let objective = Chi2Objective::new(model, self.predictor, self.data, &constraints);

        match self.run_chain(&objective, &constraints, self.options.grid_inc, None) {
            Ok(fit) => Ok(fit),
            Err(e @ (FitError::Domain | FitError::ConstraintFatal)) => {
                // One retry on a finer grid before giving up: a feasible
                // sliver can fall between coarse nodes.
                log::debug!("model {model}: {e}, retrying with a refined grid");
                self.run_chain(&objective, &constraints, 2 * self.options.grid_inc - 1, None)
            }
            Err(e) => Err(e),
        }
    }

    /// Refit `model` from a warm start, skipping the grid stage.  Used by
    /// the Monte Carlo loop, where the previous optimum is an excellent
    /// seed for the perturbed data.
    pub fn fit_from(&self, model: Model, theta0: &[f64]) -> Result<ModelFit, FitError> {
        let n = self.data.len();
        let k = model.arity();
        if n < k + 1 {
            return Err(FitError::InsufficientData { model, n, k });
        }
        if theta0.len() != k {
            return Err(FitError::InvalidInput(format!(
                "warm start for {model} needs {k} parameters, got {}",
                theta0.len()
            )));
        }
        let constraints = self.constraints(model);
        let objective = Chi2Objective::new(model, self.predictor, self.data, &constraints);
        self.run_chain(&objective, &constraints, self.options.grid_inc, Some(theta0))
    }

    fn run_chain(
        &self,
        objective: &Chi2Objective<'_>,
        constraints: &ConstraintSet,
        grid_inc: usize,
        warm: Option<&[f64]>,
    ) -> Result<ModelFit, FitError> {
        let model = objective.model();
        let k = model.arity();
        let (lower, upper) = constraints.effective_bounds();
        let options = OptimOptions {
            bounds: Some((
                objective.to_scaled(&lower),
                objective.to_scaled(&upper),
            )),
            ..self.options.optim.clone()
        };

        let grid = match warm {
            Some(theta0) => {
                let mut x = objective.to_scaled(theta0);
                objective.clamp(&mut x);
                let value = objective.value(&x);
                crate::optim::MinimizeResult {
                    x,
                    value,
                    iterations: 0,
                    n_eval: 1,
                    termination: Termination::Converged,
                }
            }
            None => GridSearch::new(grid_inc).minimize(objective, &vec![0.0; k], &options),
        };
        match grid.termination {
            Termination::ConstraintFatal => return Err(FitError::ConstraintFatal),
            Termination::Cancelled => return Err(FitError::Cancelled),
            _ => {}
        }
        log::trace!(
            "model {model}: seed chi2 = {:.6e} after {} evaluations",
            grid.value,
            grid.n_eval
        );

        let mut warnings = Vec::new();
        let simplex = NelderMead::default().minimize(objective, &grid.x, &options);
        if simplex.termination == Termination::Cancelled {
            return Err(FitError::Cancelled);
        }
        if simplex.termination == Termination::MaxIter {
            warnings.push("simplex stopped at the iteration budget".to_string());
        }

        let mut best = if simplex.termination.is_usable() && simplex.value <= grid.value {
            simplex
        } else {
            grid
        };

        if k > 0 {
            let lm = LevenbergMarquardt::default().minimize(objective, &best.x, &options);
            if lm.termination == Termination::Cancelled {
                return Err(FitError::Cancelled);
            }
            if lm.termination.is_usable() && lm.value <= best.value {
                best.n_eval += lm.n_eval;
                best.iterations += lm.iterations;
                best.x = lm.x;
                best.value = lm.value;
                best.termination = lm.termination;
            } else {
                warnings.push(
                    "levenberg-marquardt failed to improve on the simplex minimum".to_string(),
                );
            }
        }

        if !best.value.is_finite() {
            return Err(FitError::Domain);
        }

        let theta = objective.to_external(&best.x);
        let mut grad = vec![0.0; k];
        objective.value_grad(&best.x, &mut grad);
        let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();

        self.warn_pinned(model, &theta, constraints, &mut warnings);

        Ok(ModelFit {
            model,
            theta,
            chi2: best.value,
            n: self.data.len(),
            k,
            grad_norm,
            iterations: best.iterations,
            n_eval: best.n_eval,
            termination: best.termination,
            warnings,
            mc: None,
        })
    }

    /// Flag parameters sitting on a box bound; those values are limits of
    /// the search, not estimates.
    fn warn_pinned(
        &self,
        model: Model,
        theta: &[f64],
        constraints: &ConstraintSet,
        warnings: &mut Vec<String>,
    ) {
        let (lower, upper) = constraints.effective_bounds();
        for (i, &p) in model.parameters().iter().enumerate() {
            let width = upper[i] - lower[i];
            if width <= 0.0 {
                continue;
            }
            let tol = 1e-6 * width;
            if !p.is_order_parameter() && theta[i] >= upper[i] - tol {
                warnings.push(format!("{} pinned at its upper bound", p.name()));
            }
        }
    }
}
