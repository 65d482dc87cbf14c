//! Parameter constraints.
//!
//! Two families of rules apply to a model-free parameter vector:
//!
//! * box bounds per parameter (order parameters in `[0, 1]`, non-negative
//!   correlation times and exchange rates);
//! * coupled rules that tie parameters together: internal correlation
//!   times must stay below twice the global tumbling time, and in the
//!   two-timescale models the fast time must not exceed the slow one.
//!
//! The set can be enforced as hard box constraints (infeasible points are
//! rejected outright), as a smooth quadratic penalty added to χ², or
//! switched off entirely.

use crate::model::Model;
use crate::params::Parameter;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How constraint violations are handled during minimisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Infeasible points evaluate to +∞; simplex reflections and LM steps
    /// are clamped back into the box.
    #[default]
    Box,
    /// A quadratic penalty is added to χ² outside the feasible region.
    Penalty,
    /// No constraints at all.
    None,
}

/// Default weight of the quadratic penalty, in χ² units per unit of
/// scaled violation squared.
pub const PENALTY_WEIGHT: f64 = 1e4;

/// The constraint set for one model at a known global tumbling time.
#[derive(Clone, Debug)]
pub struct ConstraintSet {
    model: Model,
    mode: ConstraintMode,
    lower: Vec<f64>,
    upper: Vec<f64>,
    /// Global tm for the coupled internal-time ceiling, seconds; zero
    /// disables the rule.
    tm: f64,
    weight: f64,
}

impl ConstraintSet {
    pub fn new(model: Model, tm: f64, mode: ConstraintMode) -> Self {
        let mut lower = Vec::with_capacity(model.arity());
        let mut upper = Vec::with_capacity(model.arity());
        for &p in model.parameters() {
            let (lo, hi) = p.default_bounds();
            lower.push(lo);
            upper.push(hi);
        }
        Self {
            model,
            mode,
            lower,
            upper,
            tm,
            weight: PENALTY_WEIGHT,
        }
    }

    /// Override the box bounds of one parameter; ignored if the model does
    /// not carry it.
    pub fn with_bounds(mut self, param: Parameter, lo: f64, hi: f64) -> Self {
        if let Some(i) = self.model.index_of(param) {
            self.lower[i] = lo;
            self.upper[i] = hi;
        }
        self
    }

    pub fn mode(&self) -> ConstraintMode {
        self.mode
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Box bounds with the coupled internal-time ceiling folded in; this
    /// is the region the grid search spans.
    pub fn effective_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let upper = self
            .model
            .parameters()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if p.is_internal_time() {
                    self.internal_ceiling(i)
                } else {
                    self.upper[i]
                }
            })
            .collect();
        (self.lower.clone(), upper)
    }

    /// Ceiling on internal correlation times from the coupled rule
    /// `tau <= 2 tm`, combined with the parameter's own box bound.
    fn internal_ceiling(&self, i: usize) -> f64 {
        if self.tm > 0.0 {
            self.upper[i].min(2.0 * self.tm)
        } else {
            self.upper[i]
        }
    }

    /// True when every rule holds at `theta`.
    pub fn is_feasible(&self, theta: &[f64]) -> bool {
        if matches!(self.mode, ConstraintMode::None) {
            return true;
        }
        for (i, &p) in self.model.parameters().iter().enumerate() {
            if theta[i] < self.lower[i] || theta[i] > self.upper[i] {
                return false;
            }
            if p.is_internal_time() && theta[i] > self.internal_ceiling(i) {
                return false;
            }
        }
        if let (Some(f), Some(s)) = (
            self.model.index_of(Parameter::Tf),
            self.model.index_of(Parameter::Ts),
        ) {
            if theta[f] > theta[s] {
                return false;
            }
        }
        true
    }

    /// Project `theta` into the feasible box in place.
    ///
    /// The `tf <= ts` rule is restored by swapping the two times; the box
    /// rules are restored by clamping.
    pub fn clamp(&self, theta: &mut [f64]) {
        if matches!(self.mode, ConstraintMode::None) {
            return;
        }
        for (i, &p) in self.model.parameters().iter().enumerate() {
            let hi = if p.is_internal_time() {
                self.internal_ceiling(i)
            } else {
                self.upper[i]
            };
            theta[i] = theta[i].clamp(self.lower[i], hi);
        }
        if let (Some(f), Some(s)) = (
            self.model.index_of(Parameter::Tf),
            self.model.index_of(Parameter::Ts),
        ) {
            if theta[f] > theta[s] {
                theta.swap(f, s);
            }
        }
    }

    /// Quadratic penalty at `theta`, with its gradient accumulated into
    /// `grad` when given.  Violations are measured in scaled units so that
    /// a 1 ns overshoot of a time bound weighs like a 1.0 overshoot of an
    /// order parameter.
    pub fn penalty(&self, theta: &[f64], mut grad: Option<&mut [f64]>) -> f64 {
        if !matches!(self.mode, ConstraintMode::Penalty) {
            return 0.0;
        }
        let mut value = 0.0;
        for (i, &p) in self.model.parameters().iter().enumerate() {
            let scale = p.scale();
            let hi = if p.is_internal_time() {
                self.internal_ceiling(i)
            } else {
                self.upper[i]
            };
            let violation = if theta[i] < self.lower[i] {
                theta[i] - self.lower[i]
            } else if theta[i] > hi {
                theta[i] - hi
            } else {
                continue;
            };
            let v = violation / scale;
            value += self.weight * v * v;
            if let Some(g) = grad.as_deref_mut() {
                g[i] += 2.0 * self.weight * v / scale;
            }
        }
        if let (Some(f), Some(s)) = (
            self.model.index_of(Parameter::Tf),
            self.model.index_of(Parameter::Ts),
        ) {
            if theta[f] > theta[s] {
                let scale = Parameter::Tf.scale();
                let v = (theta[f] - theta[s]) / scale;
                value += self.weight * v * v;
                if let Some(g) = grad.as_deref_mut() {
                    g[f] += 2.0 * self.weight * v / scale;
                    g[s] -= 2.0 * self.weight * v / scale;
                }
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_bounds_hold() {
        let c = ConstraintSet::new(Model::M2, 10e-9, ConstraintMode::Box);
        assert!(c.is_feasible(&[0.8, 100e-12]));
        assert!(!c.is_feasible(&[1.1, 100e-12]));
        assert!(!c.is_feasible(&[0.8, -1e-12]));
    }

    #[test]
    fn internal_time_ceiling_couples_to_tm() {
        let c = ConstraintSet::new(Model::M2, 1e-9, ConstraintMode::Box);
        // 2 tm = 2 ns, below the default 20 ns box bound.
        assert!(c.is_feasible(&[0.8, 1.9e-9]));
        assert!(!c.is_feasible(&[0.8, 2.1e-9]));
    }

    #[test]
    fn fast_time_must_not_exceed_slow() {
        let c = ConstraintSet::new(Model::M6, 10e-9, ConstraintMode::Box);
        assert!(c.is_feasible(&[0.9, 20e-12, 0.8, 500e-12]));
        assert!(!c.is_feasible(&[0.9, 600e-12, 0.8, 500e-12]));
    }

    #[test]
    fn clamp_projects_into_box() {
        let c = ConstraintSet::new(Model::M3, 10e-9, ConstraintMode::Box);
        let mut theta = [1.2, -3.0];
        c.clamp(&mut theta);
        assert_eq!(theta, [1.0, 0.0]);
        assert!(c.is_feasible(&theta));
    }

    #[test]
    fn clamp_restores_time_ordering() {
        let c = ConstraintSet::new(Model::M6, 10e-9, ConstraintMode::Box);
        let mut theta = [0.9, 600e-12, 0.8, 500e-12];
        c.clamp(&mut theta);
        assert!(c.is_feasible(&theta));
        assert_eq!(theta[1], 500e-12);
        assert_eq!(theta[3], 600e-12);
    }

    #[test]
    fn penalty_is_zero_inside_and_smooth_outside() {
        let c = ConstraintSet::new(Model::M2, 10e-9, ConstraintMode::Penalty);
        assert_eq!(c.penalty(&[0.8, 100e-12], None), 0.0);
        let p_small = c.penalty(&[1.01, 100e-12], None);
        let p_large = c.penalty(&[1.10, 100e-12], None);
        assert!(p_small > 0.0);
        assert!(p_large > p_small);
    }

    #[test]
    fn penalty_gradient_matches_finite_differences() {
        let c = ConstraintSet::new(Model::M6, 10e-9, ConstraintMode::Penalty);
        let theta = [1.05, 600e-12, -0.02, 500e-12];
        let mut grad = vec![0.0; 4];
        c.penalty(&theta, Some(&mut grad));
        for i in 0..4 {
            let h = 1e-7 * theta[i].abs().max(1e-12);
            let mut plus = theta;
            plus[i] += h;
            let mut minus = theta;
            minus[i] -= h;
            let fd = (c.penalty(&plus, None) - c.penalty(&minus, None)) / (2.0 * h);
            assert_relative_eq!(grad[i], fd, max_relative = 1e-4, epsilon = 1e-6);
        }
    }

    #[test]
    fn mode_none_accepts_anything() {
        let c = ConstraintSet::new(Model::M1, 10e-9, ConstraintMode::None);
        assert!(c.is_feasible(&[5.0]));
        assert_eq!(c.penalty(&[5.0], None), 0.0);
    }
}
