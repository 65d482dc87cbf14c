//! Minimisation algorithms.
//!
//! Three algorithms share one interface:
//!
//! - [`GridSearch`]: coarse global scan over the box bounds, derivative
//!   free.  Used to seed the local minimisers.
//! - [`NelderMead`]: downhill simplex, derivative free, robust to the
//!   flat valleys of the model-free χ² surface.
//! - [`LevenbergMarquardt`]: damped Gauss-Newton using the analytic
//!   gradient and the `JᵀWJ` Hessian, for fast terminal convergence.
//!
//! All three work in the scaled parameter space exposed by
//! [`ObjectiveFunction`](crate::objective::ObjectiveFunction) and report a
//! [`Termination`] rather than erroring out: the caller decides whether a
//! non-converged run is worth keeping.

pub mod grid;
pub mod newton;
pub mod simplex;

pub use grid::GridSearch;
pub use newton::LevenbergMarquardt;
pub use simplex::NelderMead;

use crate::objective::ObjectiveFunction;

use enum_dispatch::enum_dispatch;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared stopping tolerances and the evaluation budget.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct OptimOptions {
    /// Convergence tolerance on the objective decrease.
    pub tol_f: f64,
    /// Convergence tolerance on the (scaled) step length.
    pub tol_x: f64,
    /// Convergence tolerance on the (scaled) gradient norm.
    pub tol_g: f64,
    pub max_iter: usize,
    /// Box bounds in scaled coordinates; required by the grid search,
    /// advisory elsewhere.
    pub bounds: Option<(Vec<f64>, Vec<f64>)>,
    /// Wall-clock budget for one minimisation.
    pub max_time: Option<Duration>,
    /// Cooperative cancellation flag, checked once per iteration.  A
    /// process-local handle, never serialised.
    #[serde(skip)]
    #[schemars(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for OptimOptions {
    fn default() -> Self {
        Self {
            tol_f: 1e-12,
            tol_x: 1e-9,
            tol_g: 1e-8,
            max_iter: 500,
            bounds: None,
            max_time: None,
            cancel: None,
        }
    }
}

/// Why a minimisation stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A convergence tolerance was met.
    Converged,
    /// The step shrank below `tol_x` without meeting the other tests.
    StepTooSmall,
    /// The iteration budget ran out.
    MaxIter,
    /// The objective was not finite anywhere the algorithm looked.
    Diverged,
    /// Every starting node violated the constraints.
    ConstraintFatal,
    /// The time budget ran out or the cancel flag was raised.
    Cancelled,
}

impl Termination {
    /// True when the result is usable as a minimum.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Converged | Self::StepTooSmall | Self::MaxIter)
    }
}

/// Outcome of one minimisation.
#[derive(Clone, Debug)]
pub struct MinimizeResult {
    /// Minimiser location in scaled coordinates.
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub n_eval: usize,
    pub termination: Termination,
}

/// Common interface of the minimisation algorithms.
#[enum_dispatch]
pub trait MinimizerTrait {
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        x0: &[f64],
        options: &OptimOptions,
    ) -> MinimizeResult;
}

/// Any of the available algorithms.
#[enum_dispatch(MinimizerTrait)]
#[derive(Clone, Debug)]
pub enum Minimizer {
    GridSearch,
    NelderMead,
    LevenbergMarquardt,
}

/// Per-run deadline and cancellation bookkeeping.
pub(crate) struct Budget<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Budget<'a> {
    pub(crate) fn new(options: &'a OptimOptions) -> Self {
        Self {
            deadline: options.max_time.map(|d| Instant::now() + d),
            cancel: options.cancel.as_deref(),
        }
    }

    /// True when the run must stop now.
    pub(crate) fn exhausted(&self) -> bool {
        if let Some(c) = self.cancel {
            if c.load(Ordering::Relaxed) {
                return true;
            }
        }
        if let Some(d) = self.deadline {
            if Instant::now() >= d {
                return true;
            }
        }
        false
    }
}
