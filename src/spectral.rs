//! Model-free spectral density functions.
//!
//! The spectral density is a weighted sum of Lorentzians over the tumbling
//! components supplied by the diffusion tensor:
//!
//! ```text
//!                _n_
//!             2  \        /     S2·ti          (1 - S2)·t'        \
//!    J(w)  =  -   >  ci . | ------------  +  ----------------  +  ... |
//!             5  /__      \ 1 + (w·ti)^2     1 + (w·t')^2       /
//!                i=1
//! ```
//!
//! with `t' = te·ti / (te + ti)`.  The extended (Clore) models add a second
//! internal term and factorise `S2 = S2f·S2s`.  Gradients are analytic.

use crate::diffusion::TumblingComponent;
use crate::model::Model;
use crate::params::Parameter;

const TWO_FIFTHS: f64 = 0.4;

/// `t / (1 + (w t)^2)`
#[inline]
fn lorentz(tau: f64, w: f64) -> f64 {
    let wt = w * tau;
    tau / (1.0 + wt * wt)
}

/// `d/dt [ t / (1 + (w t)^2) ]`
#[inline]
fn dlorentz(tau: f64, w: f64) -> f64 {
    let wt2 = (w * tau) * (w * tau);
    let denom = 1.0 + wt2;
    (1.0 - wt2) / (denom * denom)
}

/// Effective correlation time of an internal motion riding on a tumbling
/// component: `te·ti / (te + ti)`.
#[inline]
fn tau_eff(te: f64, ti: f64) -> f64 {
    if te == 0.0 { 0.0 } else { te * ti / (te + ti) }
}

/// `d(tau_eff)/d(te) = (ti / (te + ti))^2`
#[inline]
fn dtau_eff(te: f64, ti: f64) -> f64 {
    let f = ti / (te + ti);
    f * f
}

/// Spectral density of one model over a fixed tumbling component list.
#[derive(Clone, Copy, Debug)]
pub struct SpectralDensity<'a> {
    model: Model,
    components: &'a [TumblingComponent],
}

impl<'a> SpectralDensity<'a> {
    pub fn new(model: Model, components: &'a [TumblingComponent]) -> Self {
        Self { model, components }
    }

    /// J(ω) for the external parameter vector `theta` (ordered as
    /// `model.parameters()`).
    pub fn value(&self, theta: &[f64], w: f64) -> f64 {
        let mut j = 0.0;
        for c in self.components {
            j += c.weight * self.component_value(theta, w, c.tau);
        }
        TWO_FIFTHS * j
    }

    /// J(ω) together with ∂J/∂θ; `grad` must have length `model.arity()`.
    pub fn value_and_grad(&self, theta: &[f64], w: f64, grad: &mut [f64]) -> f64 {
        debug_assert_eq!(grad.len(), self.model.arity());
        grad.fill(0.0);
        let mut j = 0.0;
        for c in self.components {
            j += c.weight * self.component_value(theta, w, c.tau);
            self.component_grad(theta, w, c.tau, c.weight, grad);
        }
        for g in grad.iter_mut() {
            *g *= TWO_FIFTHS;
        }
        TWO_FIFTHS * j
    }

    fn component_value(&self, theta: &[f64], w: f64, ti: f64) -> f64 {
        match self.model {
            // Rigid baselines: the spectral density carries no free
            // parameters (m9's Rex enters R2 only, not J).
            Model::M0 | Model::M9 => lorentz(ti, w),
            Model::M1 | Model::M3 => {
                let s2 = theta[0];
                s2 * lorentz(ti, w)
            }
            Model::M2 | Model::M4 => {
                let (s2, te) = (theta[0], theta[1]);
                s2 * lorentz(ti, w) + (1.0 - s2) * lorentz(tau_eff(te, ti), w)
            }
            Model::M5 | Model::M7 => {
                let (s2f, s2s, ts) = (theta[0], theta[1], theta[2]);
                s2f * s2s * lorentz(ti, w) + s2f * (1.0 - s2s) * lorentz(tau_eff(ts, ti), w)
            }
            Model::M6 | Model::M8 => {
                let (s2f, tf, s2s, ts) = (theta[0], theta[1], theta[2], theta[3]);
                s2f * s2s * lorentz(ti, w)
                    + (1.0 - s2f) * lorentz(tau_eff(tf, ti), w)
                    + s2f * (1.0 - s2s) * lorentz(tau_eff(ts, ti), w)
            }
        }
    }

    /// Accumulate the weighted component gradient into `grad` (without the
    /// leading 2/5 factor).
    fn component_grad(&self, theta: &[f64], w: f64, ti: f64, weight: f64, grad: &mut [f64]) {
        match self.model {
            Model::M0 | Model::M9 => {}
            Model::M1 | Model::M3 => {
                grad[0] += weight * lorentz(ti, w);
            }
            Model::M2 | Model::M4 => {
                let (s2, te) = (theta[0], theta[1]);
                let t_eff = tau_eff(te, ti);
                grad[0] += weight * (lorentz(ti, w) - lorentz(t_eff, w));
                grad[1] += weight * (1.0 - s2) * dlorentz(t_eff, w) * dtau_eff(te, ti);
            }
            Model::M5 | Model::M7 => {
                let (s2f, s2s, ts) = (theta[0], theta[1], theta[2]);
                let t_eff = tau_eff(ts, ti);
                grad[0] += weight * (s2s * lorentz(ti, w) + (1.0 - s2s) * lorentz(t_eff, w));
                grad[1] += weight * s2f * (lorentz(ti, w) - lorentz(t_eff, w));
                grad[2] += weight * s2f * (1.0 - s2s) * dlorentz(t_eff, w) * dtau_eff(ts, ti);
            }
            Model::M6 | Model::M8 => {
                let (s2f, tf, s2s, ts) = (theta[0], theta[1], theta[2], theta[3]);
                let tf_eff = tau_eff(tf, ti);
                let ts_eff = tau_eff(ts, ti);
                grad[0] += weight
                    * (s2s * lorentz(ti, w) - lorentz(tf_eff, w)
                        + (1.0 - s2s) * lorentz(ts_eff, w));
                grad[1] += weight * (1.0 - s2f) * dlorentz(tf_eff, w) * dtau_eff(tf, ti);
                grad[2] += weight * s2f * (lorentz(ti, w) - lorentz(ts_eff, w));
                grad[3] += weight * s2f * (1.0 - s2s) * dlorentz(ts_eff, w) * dtau_eff(ts, ti);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffusion::DiffusionTensor;
    use approx::assert_relative_eq;

    fn iso_components(tm: f64) -> Vec<TumblingComponent> {
        DiffusionTensor::isotropic(tm).components(None).unwrap()
    }

    #[test]
    fn rigid_m1_matches_closed_form() {
        let tm = 10e-9;
        let comps = iso_components(tm);
        let j = SpectralDensity::new(Model::M1, &comps);
        for &w in &[0.0, 1e8, 5e8] {
            let expected = 0.4 * tm / (1.0 + (w * tm).powi(2));
            assert_relative_eq!(j.value(&[1.0], w), expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn baseline_models_are_rigid() {
        // m0 and m9 carry no spectral-density parameters; J is the pure
        // tumbling term, identical to m1 at S2 = 1.
        let comps = iso_components(10e-9);
        let j1 = SpectralDensity::new(Model::M1, &comps);
        let j0 = SpectralDensity::new(Model::M0, &comps);
        let j9 = SpectralDensity::new(Model::M9, &comps);
        for &w in &[0.0, 1e8, 5e8] {
            assert_relative_eq!(j0.value(&[], w), j1.value(&[1.0], w), max_relative = 1e-12);
            assert_relative_eq!(j9.value(&[1.0], w), j1.value(&[1.0], w), max_relative = 1e-12);
        }
    }

    #[test]
    fn m2_reduces_to_m1_at_te_zero() {
        let comps = iso_components(8e-9);
        let j1 = SpectralDensity::new(Model::M1, &comps);
        let j2 = SpectralDensity::new(Model::M2, &comps);
        for &w in &[0.0, 2e8, 1e9] {
            assert_relative_eq!(
                j2.value(&[0.8, 0.0], w),
                j1.value(&[0.8], w),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn m5_factorises_s2() {
        // With ts = 0 the extended form collapses to m1 with S2 = S2f*S2s.
        let comps = iso_components(8e-9);
        let j1 = SpectralDensity::new(Model::M1, &comps);
        let j5 = SpectralDensity::new(Model::M5, &comps);
        for &w in &[0.0, 2e8, 1e9] {
            assert_relative_eq!(
                j5.value(&[0.9, 0.85, 0.0], w),
                j1.value(&[0.9 * 0.85], w),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn gradients_match_finite_differences() {
        let comps = iso_components(9e-9);
        let cases: Vec<(Model, Vec<f64>)> = vec![
            (Model::M1, vec![0.8]),
            (Model::M2, vec![0.8, 50e-12]),
            (Model::M4, vec![0.75, 200e-12, 2.0]),
            (Model::M5, vec![0.9, 0.85, 200e-12]),
            (Model::M8, vec![0.9, 20e-12, 0.85, 500e-12, 1.0]),
        ];
        let h_rel = 1e-6;
        for (model, theta) in cases {
            let j = SpectralDensity::new(model, &comps);
            for &w in &[0.0, 3e8, 2e9] {
                let mut grad = vec![0.0; model.arity()];
                j.value_and_grad(&theta, w, &mut grad);
                for i in 0..model.arity() {
                    let h = h_rel * theta[i].abs().max(1e-12);
                    let mut plus = theta.clone();
                    plus[i] += h;
                    let mut minus = theta.clone();
                    minus[i] -= h;
                    let fd = (j.value(&plus, w) - j.value(&minus, w)) / (2.0 * h);
                    assert_relative_eq!(grad[i], fd, max_relative = 1e-4, epsilon = 1e-8);
                }
            }
        }
    }

    #[test]
    fn multi_component_weighting() {
        // A spheroid component list must reproduce the weighted Lorentzian sum.
        let tensor = DiffusionTensor::Axial {
            tm: 10e-9,
            ratio: 1.5,
            theta: 0.0,
            phi: 0.0,
        };
        let comps = tensor.components(Some([0.6, 0.0, 0.8])).unwrap();
        let j = SpectralDensity::new(Model::M1, &comps);
        let w = 4e8;
        let manual: f64 = comps
            .iter()
            .map(|c| 0.4 * 0.9 * c.weight * c.tau / (1.0 + (w * c.tau).powi(2)))
            .sum();
        assert_relative_eq!(j.value(&[0.9], w), manual, max_relative = 1e-12);
    }
}
