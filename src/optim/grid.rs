//! Exhaustive grid search over the box bounds.

use super::{Budget, MinimizeResult, MinimizerTrait, OptimOptions, Termination};
use crate::objective::ObjectiveFunction;

use itertools::Itertools;

/// Evaluate the objective on a regular grid and keep the best node.
///
/// The grid spans the scaled box bounds from
/// [`OptimOptions::bounds`](super::OptimOptions) with `inc` nodes per
/// dimension.  Without bounds only the starting point is evaluated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridSearch {
    inc: usize,
}

impl GridSearch {
    /// Default number of nodes per dimension.
    pub const DEFAULT_INC: usize = 21;

    pub fn new(inc: usize) -> Self {
        Self { inc: inc.max(2) }
    }
}

impl Default for GridSearch {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INC)
    }
}

impl MinimizerTrait for GridSearch {
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
                iterations: 1,
                n_eval: 1,
                termination: if value.is_finite() {
                    Termination::Converged
                } else {
                    Termination::Diverged
                },
            };
        }

        let Some((lower, upper)) = options.bounds.as_ref() else {
            let value = objective.value(x0);
            return MinimizeResult {
                x: x0.to_vec(),
                value,
                iterations: 1,
                n_eval: 1,
                termination: if value.is_finite() {
                    Termination::Converged
                } else {
                    Termination::ConstraintFatal
                },
            };
        };

        let axes: Vec<Vec<f64>> = (0..k)
            .map(|i| {
                let (lo, hi) = (lower[i], upper[i]);
                (0..self.inc)
                    .map(|n| lo + (hi - lo) * n as f64 / (self.inc - 1) as f64)
                    .collect()
            })
            .collect();

        let mut best_x: Option<Vec<f64>> = None;
        let mut best = f64::INFINITY;
        let mut n_eval = 0usize;
        for node in axes.iter().map(|a| a.iter().copied()).multi_cartesian_product() {
            if budget.exhausted() {
                return MinimizeResult {
                    x: best_x.unwrap_or_else(|| x0.to_vec()),
                    value: best,
                    iterations: n_eval,
                    n_eval,
                    termination: Termination::Cancelled,
                };
            }
            let value = objective.value(&node);
            n_eval += 1;
            if value < best {
                best = value;
                best_x = Some(node);
            }
        }

        match best_x {
            Some(x) if best.is_finite() => MinimizeResult {
                x,
                value: best,
                iterations: n_eval,
                n_eval,
                termination: Termination::Converged,
            },
            // Every node was infeasible or non-finite.
            _ => MinimizeResult {
                x: x0.to_vec(),
                value: f64::INFINITY,
                iterations: n_eval,
                n_eval,
                termination: Termination::ConstraintFatal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Bowl;
    use super::*;

    fn bounded_options(bowl: &Bowl) -> OptimOptions {
        OptimOptions {
            bounds: Some((bowl.lower.clone(), bowl.upper.clone())),
            ..Default::default()
        }
    }

    #[test]
    fn finds_the_nearest_node() {
        let bowl = Bowl::new(&[1.0, -2.0]);
        let options = bounded_options(&bowl);
        let result = GridSearch::new(21).minimize(&bowl, &[0.0, 0.0], &options);
        assert_eq!(result.termination, Termination::Converged);
        // 21 nodes over [-10, 10] step on integers, so the node is exact.
        assert_eq!(result.x, vec![1.0, -2.0]);
        assert_eq!(result.n_eval, 21 * 21);
    }

    #[test]
    fn zero_arity_is_a_single_evaluation() {
        struct Flat;
        impl ObjectiveFunction for Flat {
            fn dim(&self) -> usize {
                0
            }
            fn value(&self, _: &[f64]) -> f64 {
                7.0
            }
            fn value_grad(&self, _: &[f64], _: &mut [f64]) -> f64 {
                7.0
            }
            fn value_grad_hess(
                &self,
                _: &[f64],
                _: &mut [f64],
                _: &mut nalgebra::DMatrix<f64>,
            ) -> f64 {
                7.0
            }
            fn is_feasible(&self, _: &[f64]) -> bool {
                true
            }
            fn clamp(&self, _: &mut [f64]) {}
        }
        let result = GridSearch::default().minimize(&Flat, &[], &OptimOptions::default());
        assert_eq!(result.termination, Termination::Converged);
        assert_eq!(result.value, 7.0);
        assert_eq!(result.n_eval, 1);
    }

    #[test]
    fn all_infeasible_nodes_are_fatal() {
        struct Wall;
        impl ObjectiveFunction for Wall {
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
                _: &mut nalgebra::DMatrix<f64>,
            ) -> f64 {
                f64::INFINITY
            }
            fn is_feasible(&self, _: &[f64]) -> bool {
                false
            }
            fn clamp(&self, _: &mut [f64]) {}
        }
        let options = OptimOptions {
            bounds: Some((vec![0.0], vec![1.0])),
            ..Default::default()
        };
        let result = GridSearch::default().minimize(&Wall, &[0.5], &options);
        assert_eq!(result.termination, Termination::ConstraintFatal);
    }
}
