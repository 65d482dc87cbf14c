//! The χ² objective.
//!
//! ```text
//! chi2(θ) = Σ_d [(obs_d - pred_d(θ)) / err_d]²  (+ penalty)
//! ```
//!
//! All minimisers see the objective through [`ObjectiveFunction`], which
//! works in *scaled* coordinates: each parameter is divided by its
//! [`Parameter::scale`] so the optimiser moves through an O(1) space.  The
//! Hessian is the Gauss-Newton approximation `2·JᵀWJ`, which is what the
//! Levenberg-Marquardt step needs and is positive semi-definite by
//! construction.

use crate::constraints::{ConstraintMode, ConstraintSet};
use crate::data::RelaxationDatum;
use crate::kernel::RatePredictor;
use crate::model::Model;

use nalgebra::DMatrix;

/// A smooth scalar objective over a scaled parameter space.
///
/// Object safe; the minimisers take `&dyn ObjectiveFunction`.
pub trait ObjectiveFunction {
    fn dim(&self) -> usize;

    /// Objective value; +∞ signals an infeasible or non-finite point.
    fn value(&self, x: &[f64]) -> f64;

    /// Value and gradient.  `grad` has length `dim()`.
    fn value_grad(&self, x: &[f64], grad: &mut [f64]) -> f64;

    /// Value, gradient and (approximate) Hessian.
    fn value_grad_hess(&self, x: &[f64], grad: &mut [f64], hess: &mut DMatrix<f64>) -> f64;

    fn is_feasible(&self, x: &[f64]) -> bool;

    /// Project `x` onto the feasible region.
    fn clamp(&self, x: &mut [f64]);
}

/// Weighted least-squares objective for one residue-model pair.
pub struct Chi2Objective<'a> {
    model: Model,
    predictor: &'a RatePredictor,
    data: &'a [RelaxationDatum],
    constraints: &'a ConstraintSet,
    scales: Vec<f64>,
}

impl<'a> Chi2Objective<'a> {
    pub fn new(
        model: Model,
        predictor: &'a RatePredictor,
        data: &'a [RelaxationDatum],
        constraints: &'a ConstraintSet,
    ) -> Self {
        let scales = model.parameters().iter().map(|p| p.scale()).collect();
        Self {
            model,
            predictor,
            data,
            constraints,
            scales,
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn n_data(&self) -> usize {
        self.data.len()
    }

    /// Scaled coordinates -> external parameter vector.
    pub fn to_external(&self, x: &[f64]) -> Vec<f64> {
        x.iter().zip(&self.scales).map(|(&xi, &s)| xi * s).collect()
    }

    /// External parameter vector -> scaled coordinates.
    pub fn to_scaled(&self, theta: &[f64]) -> Vec<f64> {
        theta
            .iter()
            .zip(&self.scales)
            .map(|(&t, &s)| t / s)
            .collect()
    }

    /// χ² in external coordinates.
    pub fn chi2(&self, theta: &[f64]) -> f64 {
        if matches!(self.constraints.mode(), ConstraintMode::Box)
            && !self.constraints.is_feasible(theta)
        {
            return f64::INFINITY;
        }
        let mut chi2 = 0.0;
        for d in self.data {
            let pred = self.predictor.predict_datum(self.model, theta, d);
            if !pred.is_finite() {
                return f64::INFINITY;
            }
            let r = (d.value() - pred) / d.error();
            chi2 += r * r;
        }
        chi2 + self.constraints.penalty(theta, None)
    }

    /// χ² and its gradient in external coordinates.
    pub fn chi2_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        grad.fill(0.0);
        if matches!(self.constraints.mode(), ConstraintMode::Box)
            && !self.constraints.is_feasible(theta)
        {
            return f64::INFINITY;
        }
        let k = self.model.arity();
        let mut dpred = vec![0.0; k];
        let mut chi2 = 0.0;
        for d in self.data {
            let pred = self
                .predictor
                .predict_datum_grad(self.model, theta, d, &mut dpred);
            if !pred.is_finite() {
                grad.fill(0.0);
                return f64::INFINITY;
            }
            let w = 1.0 / (d.error() * d.error());
            let r = d.value() - pred;
            chi2 += w * r * r;
            for i in 0..k {
                grad[i] -= 2.0 * w * r * dpred[i];
            }
        }
        chi2 + self.constraints.penalty(theta, Some(grad))
    }

    /// χ², gradient and Gauss-Newton Hessian `2·JᵀWJ`, external coordinates.
    pub fn chi2_grad_hess(
        &self,
        theta: &[f64],
        grad: &mut [f64],
        hess: &mut DMatrix<f64>,
    ) -> f64 {
        grad.fill(0.0);
        hess.fill(0.0);
        if matches!(self.constraints.mode(), ConstraintMode::Box)
            && !self.constraints.is_feasible(theta)
        {
            return f64::INFINITY;
        }
        let k = self.model.arity();
        let mut dpred = vec![0.0; k];
        let mut chi2 = 0.0;
        for d in self.data {
            let pred = self
                .predictor
                .predict_datum_grad(self.model, theta, d, &mut dpred);
            if !pred.is_finite() {
                grad.fill(0.0);
                return f64::INFINITY;
            }
            let w = 1.0 / (d.error() * d.error());
            let r = d.value() - pred;
            chi2 += w * r * r;
            for i in 0..k {
                grad[i] -= 2.0 * w * r * dpred[i];
                for j in 0..k {
                    hess[(i, j)] += 2.0 * w * dpred[i] * dpred[j];
                }
            }
        }
        chi2 + self.constraints.penalty(theta, Some(grad))
    }
}

impl ObjectiveFunction for Chi2Objective<'_> {
    fn dim(&self) -> usize {
        self.model.arity()
    }

    fn value(&self, x: &[f64]) -> f64 {
        self.chi2(&self.to_external(x))
    }

    fn value_grad(&self, x: &[f64], grad: &mut [f64]) -> f64 {
        let theta = self.to_external(x);
        let value = self.chi2_grad(&theta, grad);
        for (g, &s) in grad.iter_mut().zip(&self.scales) {
            *g *= s;
        }
        value
    }

    fn value_grad_hess(&self, x: &[f64], grad: &mut [f64], hess: &mut DMatrix<f64>) -> f64 {
        let theta = self.to_external(x);
        let value = self.chi2_grad_hess(&theta, grad, hess);
        let k = self.dim();
        for i in 0..k {
            grad[i] *= self.scales[i];
            for j in 0..k {
                hess[(i, j)] *= self.scales[i] * self.scales[j];
            }
        }
        value
    }

    fn is_feasible(&self, x: &[f64]) -> bool {
        self.constraints.is_feasible(&self.to_external(x))
    }

    fn clamp(&self, x: &mut [f64]) {
        let mut theta = self.to_external(x);
        self.constraints.clamp(&mut theta);
        x.copy_from_slice(&self.to_scaled(&theta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::Nucleus;
    use crate::data::RelaxationKind;
    use crate::diffusion::DiffusionTensor;
    use approx::assert_relative_eq;

    fn predictor() -> RatePredictor {
        RatePredictor::new(
            Nucleus::N15,
            &DiffusionTensor::isotropic(10e-9),
            None,
            Nucleus::N15.default_bond_length(),
            Nucleus::N15.default_csa(),
            &[500e6, 600e6],
        )
        .unwrap()
    }

    fn synthetic(p: &RatePredictor, model: Model, theta: &[f64]) -> Vec<RelaxationDatum> {
        let rates = p.predict(model, theta).unwrap();
        let mut data = Vec::new();
        for (i, &frq) in p.fields().iter().enumerate() {
            data.push(RelaxationDatum::new(RelaxationKind::R1, frq, rates[i].r1, 0.02).unwrap());
            data.push(RelaxationDatum::new(RelaxationKind::R2, frq, rates[i].r2, 0.1).unwrap());
            data.push(RelaxationDatum::new(RelaxationKind::Noe, frq, rates[i].noe, 0.03).unwrap());
        }
        data
    }

    #[test]
    fn chi2_is_zero_at_the_generating_point() {
        let p = predictor();
        let theta = [0.82, 45e-12];
        let data = synthetic(&p, Model::M2, &theta);
        let cs = ConstraintSet::new(Model::M2, 10e-9, ConstraintMode::Box);
        let obj = Chi2Objective::new(Model::M2, &p, &data, &cs);
        assert_relative_eq!(obj.chi2(&theta), 0.0, epsilon = 1e-16);
        assert!(obj.chi2(&[0.7, 45e-12]) > 1.0);
    }

    #[test]
    fn gradient_matches_finite_differences_in_scaled_space() {
        let p = predictor();
        let data = synthetic(&p, Model::M4, &[0.82, 45e-12, 1.2]);
        let cs = ConstraintSet::new(Model::M4, 10e-9, ConstraintMode::Box);
        let obj = Chi2Objective::new(Model::M4, &p, &data, &cs);
        let x = obj.to_scaled(&[0.75, 80e-12, 0.8]);
        let mut grad = vec![0.0; 3];
        obj.value_grad(&x, &mut grad);
        for i in 0..3 {
            let h = 1e-6 * x[i].abs().max(1e-6);
            let mut plus = x.clone();
            plus[i] += h;
            let mut minus = x.clone();
            minus[i] -= h;
            let fd = (obj.value(&plus) - obj.value(&minus)) / (2.0 * h);
            assert_relative_eq!(grad[i], fd, max_relative = 1e-3, epsilon = 1e-6);
        }
    }

    #[test]
    fn gauss_newton_hessian_is_symmetric_positive() {
        let p = predictor();
        let data = synthetic(&p, Model::M2, &[0.82, 45e-12]);
        let cs = ConstraintSet::new(Model::M2, 10e-9, ConstraintMode::Box);
        let obj = Chi2Objective::new(Model::M2, &p, &data, &cs);
        let x = obj.to_scaled(&[0.8, 60e-12]);
        let mut grad = vec![0.0; 2];
        let mut hess = DMatrix::zeros(2, 2);
        obj.value_grad_hess(&x, &mut grad, &mut hess);
        assert_relative_eq!(hess[(0, 1)], hess[(1, 0)], max_relative = 1e-12);
        assert!(hess[(0, 0)] > 0.0);
        assert!(hess[(1, 1)] > 0.0);
    }

    #[test]
    fn box_mode_walls_off_infeasible_points() {
        let p = predictor();
        let data = synthetic(&p, Model::M1, &[0.8]);
        let cs = ConstraintSet::new(Model::M1, 10e-9, ConstraintMode::Box);
        let obj = Chi2Objective::new(Model::M1, &p, &data, &cs);
        assert_eq!(obj.chi2(&[1.4]), f64::INFINITY);
        let mut grad = vec![0.0; 1];
        assert_eq!(obj.chi2_grad(&[1.4], &mut grad), f64::INFINITY);
    }

    #[test]
    fn penalty_mode_keeps_chi2_finite_outside_the_box() {
        let p = predictor();
        let data = synthetic(&p, Model::M1, &[0.8]);
        let cs = ConstraintSet::new(Model::M1, 10e-9, ConstraintMode::Penalty);
        let obj = Chi2Objective::new(Model::M1, &p, &data, &cs);
        let v = obj.chi2(&[1.01]);
        assert!(v.is_finite());
        assert!(v > obj.chi2(&[1.0]));
    }
}
