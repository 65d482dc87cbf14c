//! Levenberg-Marquardt minimisation.

use super::{Budget, MinimizeResult, MinimizerTrait, OptimOptions, Termination};
use crate::objective::ObjectiveFunction;

use nalgebra::{DMatrix, DVector};

/// Damped Gauss-Newton with a multiplicative trust parameter.
///
/// Each step solves `(H + λ·diag(H))·δ = -g` with the Gauss-Newton
/// Hessian; accepted steps divide λ by [`Self::down`], rejected ones are
/// first backtracked along δ and only then multiply λ by [`Self::up`].
/// Steps are clamped back into the feasible box before evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct LevenbergMarquardt {
    pub lambda0: f64,
    pub up: f64,
    pub down: f64,
}

impl LevenbergMarquardt {
    /// λ beyond which the damping has flattened the step to nothing.
    const LAMBDA_MAX: f64 = 1e12;

    /// Smallest fraction of the step tried during backtracking.
    const BACKTRACK_MIN: f64 = 1.0 / 16.0;

    pub fn new(lambda0: f64) -> Self {
        Self {
            lambda0,
            up: 10.0,
            down: 10.0,
        }
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new(1e-3)
    }
}

impl MinimizerTrait for LevenbergMarquardt {
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        x0: &[f64],
        options: &OptimOptions,
    ) -> MinimizeResult {
        let budget = Budget::new(options);
        let k = objective.dim();

        if k == 0 {
            let value = objective.value(&[]);
            return MinimizeResult {
                x: Vec::new(),
                value,
                iterations: 0,
                n_eval: 1,
                termination: if value.is_finite() {
                    Termination::Converged
                } else {
                    Termination::Diverged
                },
            };
        }

        let mut x = x0.to_vec();
        objective.clamp(&mut x);
        let mut grad = vec![0.0; k];
        let mut hess = DMatrix::zeros(k, k);
        let mut value = objective.value_grad_hess(&x, &mut grad, &mut hess);
        let mut n_eval = 1usize;
        if !value.is_finite() {
            return MinimizeResult {
                x,
                value,
                iterations: 0,
                n_eval,
                termination: Termination::Diverged,
            };
        }

        let mut lambda = self.lambda0;
        let mut termination = Termination::MaxIter;
        let mut iterations = 0usize;

        for iter in 0..options.max_iter {
            iterations = iter + 1;
            if budget.exhausted() {
                termination = Termination::Cancelled;
                break;
            }

            let g_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if g_norm <= options.tol_g {
                termination = Termination::Converged;
                break;
            }

            // Damped normal equations.  A singular factorisation means λ is
            // too small for the current curvature; crank it up and retry.
            let mut delta = None;
            while lambda <= Self::LAMBDA_MAX {
                let mut damped = hess.clone();
                for i in 0..k {
                    let d = hess[(i, i)];
                    damped[(i, i)] = d + lambda * if d > 0.0 { d } else { 1.0 };
                }
                if let Some(chol) = damped.cholesky() {
                    let step = chol.solve(&-DVector::from_column_slice(&grad));
                    if step.iter().all(|s| s.is_finite()) {
                        delta = Some(step);
                        break;
                    }
                }
                lambda *= self.up;
            }
            let Some(delta) = delta else {
                termination = Termination::StepTooSmall;
                break;
            };

            let mut trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(&xi, &d)| xi + d).collect();
            objective.clamp(&mut trial);
            let step_norm = trial
                .iter()
                .zip(&x)
                .map(|(&t, &xi)| (t - xi) * (t - xi))
                .sum::<f64>()
                .sqrt();
            let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
            if step_norm <= options.tol_x * (1.0 + x_norm) {
                termination = Termination::StepTooSmall;
                break;
            }

            let mut trial_value = objective.value(&trial);
            n_eval += 1;
            // Backtrack along δ before surrendering the step to more
            // damping; a shortened step often lands inside the valley the
            // full one overshot.
            let mut fraction = 1.0;
            while trial_value >= value && fraction > Self::BACKTRACK_MIN {
                fraction *= 0.5;
                trial = x
                    .iter()
                    .zip(delta.iter())
                    .map(|(&xi, &d)| xi + fraction * d)
                    .collect();
                objective.clamp(&mut trial);
                trial_value = objective.value(&trial);
                n_eval += 1;
            }
            if trial_value < value {
                let decrease = value - trial_value;
                x = trial;
                value = objective.value_grad_hess(&x, &mut grad, &mut hess);
                n_eval += 1;
                lambda = (lambda / self.down).max(1e-12);
                // A stalled objective alone is not convergence: the
                // gradient test must pass too, otherwise keep iterating
                // with the relaxed damping.
                if decrease <= options.tol_f * (1.0 + value.abs()) {
                    let g_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                    if g_norm <= options.tol_g {
                        termination = Termination::Converged;
                        break;
                    }
                }
            } else {
                lambda *= self.up;
                if lambda > Self::LAMBDA_MAX {
                    termination = Termination::StepTooSmall;
                    break;
                }
            }
        }

        MinimizeResult {
            x,
            value,
            iterations,
            n_eval,
            termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Bowl;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_converges_in_few_iterations() {
        let bowl = Bowl::new(&[2.0, -1.0]);
        let result =
            LevenbergMarquardt::default().minimize(&bowl, &[0.0, 0.0], &OptimOptions::default());
        assert_eq!(result.termination, Termination::Converged);
        assert!(result.iterations < 30, "iterations = {}", result.iterations);
        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.x[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn stays_inside_the_box() {
        let mut bowl = Bowl::new(&[5.0]);
        bowl.upper = vec![2.0];
        let result = LevenbergMarquardt::default().minimize(&bowl, &[0.0], &OptimOptions::default());
        assert!(result.x[0] <= 2.0 + 1e-12);
        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn converged_implies_a_small_gradient() {
        // Quartic valley r = x², f = r².  With a loose tol_f the very
        // first accepted step already decreases f by less than the
        // tolerance while the gradient is still O(1); convergence must
        // not be declared until the gradient test passes as well.
        struct Quartic;
        impl ObjectiveFunction for Quartic {
            fn dim(&self) -> usize {
                1
            }
            fn value(&self, x: &[f64]) -> f64 {
                x[0].powi(4)
            }
            fn value_grad(&self, x: &[f64], grad: &mut [f64]) -> f64 {
                grad[0] = 4.0 * x[0].powi(3);
                self.value(x)
            }
            fn value_grad_hess(
                &self,
                x: &[f64],
                grad: &mut [f64],
                hess: &mut DMatrix<f64>,
            ) -> f64 {
                hess[(0, 0)] = 8.0 * x[0] * x[0];
                self.value_grad(x, grad)
            }
            fn is_feasible(&self, _: &[f64]) -> bool {
                true
            }
            fn clamp(&self, _: &mut [f64]) {}
        }
        let options = OptimOptions {
            tol_f: 1.0,
            ..Default::default()
        };
        let result = LevenbergMarquardt::default().minimize(&Quartic, &[1.0], &options);
        assert_eq!(result.termination, Termination::Converged);
        let mut grad = [0.0];
        Quartic.value_grad(&result.x, &mut grad);
        assert!(
            grad[0].abs() <= options.tol_g,
            "gradient at the solution = {}",
            grad[0]
        );
    }

    #[test]
    fn non_finite_start_is_diverged() {
        struct Nan;
        impl ObjectiveFunction for Nan {
            fn dim(&self) -> usize {
                1
            }
            fn value(&self, _: &[f64]) -> f64 {
                f64::INFINITY
            }
            fn value_grad(&self, _: &[f64], _: &mut [f64]) -> f64 {
                f64::INFINITY
            }
            fn value_grad_hess(
                &self,
                _: &[f64],
                _: &mut [f64],
                _: &mut DMatrix<f64>,
            ) -> f64 {
                f64::INFINITY
            }
            fn is_feasible(&self, _: &[f64]) -> bool {
                true
            }
            fn clamp(&self, _: &mut [f64]) {}
        }
        let result = LevenbergMarquardt::default().minimize(&Nan, &[0.0], &OptimOptions::default());
        assert_eq!(result.termination, Termination::Diverged);
    }
}
