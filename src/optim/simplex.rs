//! Downhill simplex (Nelder-Mead) minimisation.

use super::{Budget, MinimizeResult, MinimizerTrait, OptimOptions, Termination};
use crate::objective::ObjectiveFunction;

/// Nelder-Mead with the standard coefficients (reflection 1, expansion 2,
/// contraction 0.5, shrink 0.5).
///
/// Trial vertices are projected back into the feasible region through
/// [`ObjectiveFunction::clamp`], which keeps the simplex inside the box
/// without the +∞ walls ever collapsing it.
#[derive(Clone, Debug, PartialEq)]
pub struct NelderMead {
    /// Initial simplex edge length, in scaled units.
    pub step: f64,
}

impl NelderMead {
    pub fn new(step: f64) -> Self {
        Self { step }
    }
}

impl Default for NelderMead {
    fn default() -> Self {
        Self::new(0.1)
    }
}

const ALPHA: f64 = 1.0;
const GAMMA: f64 = 2.0;
const RHO: f64 = 0.5;
const SIGMA: f64 = 0.5;

impl MinimizerTrait for NelderMead {
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

        let mut n_eval = 0usize;
        let mut eval = |x: &[f64], n_eval: &mut usize| {
            *n_eval += 1;
            objective.value(x)
        };

        // Initial simplex: x0 plus one offset vertex per dimension.
        let mut vertices: Vec<(Vec<f64>, f64)> = Vec::with_capacity(k + 1);
        let mut start = x0.to_vec();
        objective.clamp(&mut start);
        let f0 = eval(&start, &mut n_eval);
        vertices.push((start.clone(), f0));
        for i in 0..k {
            let mut v = start.clone();
            v[i] += if v[i].abs() > 1.0 {
                self.step * v[i].abs()
            } else {
                self.step
            };
            objective.clamp(&mut v);
            if v == start {
                // Clamping pushed us back onto the start; try the other side.
                v[i] -= self.step;
                objective.clamp(&mut v);
            }
            let f = eval(&v, &mut n_eval);
            vertices.push((v, f));
        }

        if vertices.iter().all(|(_, f)| !f.is_finite()) {
            return MinimizeResult {
                x: start,
                value: f64::INFINITY,
                iterations: 0,
                n_eval,
                termination: Termination::ConstraintFatal,
            };
        }

        let mut termination = Termination::MaxIter;
        let mut iterations = 0usize;
        for iter in 0..options.max_iter {
            iterations = iter + 1;
            if budget.exhausted() {
                termination = Termination::Cancelled;
                break;
            }

            vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
            let best = vertices[0].1;
            let worst = vertices[k].1;

            // Convergence: function spread and simplex diameter both small.
            let spread = if worst.is_finite() { worst - best } else { f64::INFINITY };
            let diameter = vertices[1..]
                .iter()
                .map(|(v, _)| {
                    v.iter()
                        .zip(&vertices[0].0)
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0, f64::max)
                })
                .fold(0.0, f64::max);
            if spread <= options.tol_f * (1.0 + best.abs()) && diameter <= options.tol_x {
                termination = Termination::Converged;
                break;
            }

            // Centroid of all but the worst vertex.
            let mut centroid = vec![0.0; k];
            for (v, _) in &vertices[..k] {
                for (c, &vi) in centroid.iter_mut().zip(v) {
                    *c += vi / k as f64;
                }
            }

            let mirror = |coef: f64| -> Vec<f64> {
                let mut p: Vec<f64> = centroid
                    .iter()
                    .zip(&vertices[k].0)
                    .map(|(&c, &w)| c + coef * (c - w))
                    .collect();
                objective.clamp(&mut p);
                p
            };

            let reflected = mirror(ALPHA);
            let f_r = eval(&reflected, &mut n_eval);

            if f_r < vertices[0].1 {
                let expanded = mirror(GAMMA);
                let f_e = eval(&expanded, &mut n_eval);
                vertices[k] = if f_e < f_r {
                    (expanded, f_e)
                } else {
                    (reflected, f_r)
                };
            } else if f_r < vertices[k - 1].1 {
                vertices[k] = (reflected, f_r);
            } else {
                let contracted = if f_r < vertices[k].1 {
                    mirror(RHO)
                } else {
                    mirror(-RHO)
                };
                let f_c = eval(&contracted, &mut n_eval);
                if f_c < vertices[k].1.min(f_r) {
                    vertices[k] = (contracted, f_c);
                } else {
                    // Shrink towards the best vertex.
                    let best_v = vertices[0].0.clone();
                    for (v, f) in vertices[1..].iter_mut() {
                        for (vi, &bi) in v.iter_mut().zip(&best_v) {
                            *vi = bi + SIGMA * (*vi - bi);
                        }
                        objective.clamp(v);
                        *f = eval(v, &mut n_eval);
                    }
                }
            }
        }

        vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (x, value) = vertices.swap_remove(0);
        if !value.is_finite() {
            termination = Termination::Diverged;
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
