//! Relaxation rate back-calculation.
//!
//! Maps (model parameters, diffusion tensor, field, nucleus) to predicted
//! R1, R2 and NOE values through the spectral density evaluated at the five
//! canonical frequencies `{0, wX, wH-wX, wH, wH+wX}`, using the standard
//! dipolar + CSA expressions:
//!
//! ```text
//! R1     = d·[J(wH-wX) + 3J(wX) + 6J(wH+wX)] + c·J(wX)
//! R2     = d/2·[4J(0) + J(wH-wX) + 3J(wX) + 6J(wH) + 6J(wH+wX)]
//!          + c/6·[4J(0) + 3J(wX)] + Rex·(B/Bref)²
//! sigma  = d·[6J(wH+wX) - J(wH-wX)]
//! NOE    = 1 + (γH/γX)·sigma/R1
//! ```
//!
//! with `d = (µ0/4π · γH·γX·ħ / r³)²/4` and `c = (Δσ·wX)²/3`.
//!
//! First derivatives are analytic; the χ² Hessian downstream is the
//! Gauss-Newton approximation built from this Jacobian.

use crate::consts::{GAMMA_H1, H_BAR, MU_0, Nucleus};
use crate::data::{RelaxationDatum, RelaxationKind};
use crate::diffusion::{DiffusionTensor, TumblingComponent};
use crate::error::FitError;
use crate::model::Model;
use crate::params::Parameter;
use crate::spectral::SpectralDensity;

use std::f64::consts::PI;

/// Predicted rates at one field strength.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldRates {
    pub r1: f64,
    pub r2: f64,
    pub noe: f64,
}

/// Predicted rates and their derivatives with respect to the model
/// parameters, at one field strength.
#[derive(Clone, Debug)]
pub struct FieldRatesGrad {
    pub rates: FieldRates,
    pub dr1: Vec<f64>,
    pub dr2: Vec<f64>,
    pub dnoe: Vec<f64>,
}

/// Back-calculates relaxation rates for one residue.
///
/// Holds everything that is fixed during a fit: the frequency table, the
/// dipolar and CSA interaction constants and the tumbling components of the
/// diffusion tensor.
#[derive(Clone, Debug)]
pub struct RatePredictor {
    nucleus: Nucleus,
    fields: Vec<f64>,
    /// Per field: `[0, wX, wH-wX, wH, wH+wX]` in rad/s.
    freq: Vec<[f64; 5]>,
    /// Dipolar constant d²/4.
    dip: f64,
    /// CSA constant (Δσ·wX)²/3 per field.
    csa: Vec<f64>,
    components: Vec<TumblingComponent>,
}

impl RatePredictor {
    /// Build a predictor for one residue.
    ///
    /// `fields` are the proton Larmor frequencies in Hz, `r` the bond
    /// length in metres and `csa` the unitless chemical shift anisotropy.
    /// `bond` is required for non-isotropic tensors.
    pub fn new(
        nucleus: Nucleus,
        tensor: &DiffusionTensor,
        bond: Option<[f64; 3]>,
        r: f64,
        csa: f64,
        fields: &[f64],
    ) -> Result<Self, FitError> {
        if fields.is_empty() {
            return Err(FitError::InvalidInput(
                "at least one field strength is required".into(),
            ));
        }
        if !(r > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "bond length must be positive, got {r}"
            )));
        }
        let components = tensor.components(bond).ok_or_else(|| {
            FitError::InvalidInput(
                "a bond unit vector is required for non-isotropic diffusion".into(),
            )
        })?;

        let gx = nucleus.gamma();
        let mut freq = Vec::with_capacity(fields.len());
        let mut csa_const = Vec::with_capacity(fields.len());
        for &f in fields {
            let wh = 2.0 * PI * f;
            let wx = wh * gx / GAMMA_H1;
            freq.push([0.0, wx, wh - wx, wh, wh + wx]);
            csa_const.push((csa * wx).powi(2) / 3.0);
        }

        let d = MU_0 / (4.0 * PI) * H_BAR * GAMMA_H1 * gx / r.powi(3);
        let dip = d * d / 4.0;

        Ok(Self {
            nucleus,
            fields: fields.to_vec(),
            freq,
            dip,
            csa: csa_const,
            components,
        })
    }

    pub fn fields(&self) -> &[f64] {
        &self.fields
    }

    /// The reference field for the `Rex` scaling: the lowest field present.
    pub fn reference_field(&self) -> f64 {
        self.fields[0]
    }

    pub fn field_index(&self, frq: f64) -> Option<usize> {
        self.fields.iter().position(|&f| f == frq)
    }

    /// Check the parameter vector against the model's domain.
    pub fn validate(&self, model: Model, theta: &[f64]) -> Result<(), FitError> {
        if theta.len() != model.arity() {
            return Err(FitError::InvalidInput(format!(
                "model {} expects {} parameters, got {}",
                model,
                model.arity(),
                theta.len()
            )));
        }
        for (&p, &x) in model.parameters().iter().zip(theta) {
            if !x.is_finite() {
                return Err(FitError::InvalidInput(format!(
                    "{} is not finite",
                    p.name()
                )));
            }
            if p.is_order_parameter() && !(0.0..=1.0).contains(&x) {
                return Err(FitError::InvalidInput(format!(
                    "{} = {x} lies outside [0, 1]",
                    p.name()
                )));
            }
            if (p.is_internal_time() || p == Parameter::Rex) && x < 0.0 {
                return Err(FitError::InvalidInput(format!(
                    "{} = {x} is negative",
                    p.name()
                )));
            }
        }
        Ok(())
    }

    /// Predicted rates at every field, with domain validation.
    pub fn predict(&self, model: Model, theta: &[f64]) -> Result<Vec<FieldRates>, FitError> {
        self.validate(model, theta)?;
        let rates = self.rates(model, theta);
        if rates
            .iter()
            .any(|r| !(r.r1.is_finite() && r.r2.is_finite() && r.noe.is_finite()))
        {
            return Err(FitError::Domain);
        }
        Ok(rates)
    }

    /// Predicted value for one datum, without domain validation; the
    /// objective treats non-finite values as a `Domain` failure.
    pub fn predict_datum(&self, model: Model, theta: &[f64], datum: &RelaxationDatum) -> f64 {
        let Some(i) = self.field_index(datum.frq()) else {
            return f64::NAN;
        };
        let rates = self.field_rates(model, theta, i);
        match datum.kind() {
            RelaxationKind::R1 => rates.r1,
            RelaxationKind::R2 => rates.r2,
            RelaxationKind::Noe => rates.noe,
        }
    }

    /// Rates at every field, no validation.
    pub fn rates(&self, model: Model, theta: &[f64]) -> Vec<FieldRates> {
        (0..self.fields.len())
            .map(|i| self.field_rates(model, theta, i))
            .collect()
    }

    fn rex_at(&self, model: Model, theta: &[f64], field_idx: usize) -> f64 {
        match model.index_of(Parameter::Rex) {
            Some(i) => theta[i] * (self.fields[field_idx] / self.fields[0]).powi(2),
            None => 0.0,
        }
    }

    /// R1, R2 and NOE at one field.
    pub fn field_rates(&self, model: Model, theta: &[f64], field_idx: usize) -> FieldRates {
        let sd = SpectralDensity::new(model, &self.components);
        let w = &self.freq[field_idx];
        let j: Vec<f64> = w.iter().map(|&wi| sd.value(theta, wi)).collect();

        let dip = self.dip;
        let csa = self.csa[field_idx];

        let r1 = dip * (j[2] + 3.0 * j[1] + 6.0 * j[4]) + csa * j[1];
        let r2 = dip / 2.0 * (4.0 * j[0] + j[2] + 3.0 * j[1] + 6.0 * j[3] + 6.0 * j[4])
            + csa / 6.0 * (4.0 * j[0] + 3.0 * j[1])
            + self.rex_at(model, theta, field_idx);
        let sigma = dip * (6.0 * j[4] - j[2]);
        let noe = if r1 == 0.0 {
            1.0
        } else {
            1.0 + self.nucleus.gamma_ratio() * sigma / r1
        };

        FieldRates { r1, r2, noe }
    }

    /// Rates and analytic parameter derivatives at one field.
    pub fn field_rates_grad(&self, model: Model, theta: &[f64], field_idx: usize) -> FieldRatesGrad {
        let k = model.arity();
        let sd = SpectralDensity::new(model, &self.components);
        let w = &self.freq[field_idx];

        let mut j = [0.0; 5];
        let mut dj = vec![vec![0.0; k]; 5];
        for (i, &wi) in w.iter().enumerate() {
            j[i] = sd.value_and_grad(theta, wi, &mut dj[i]);
        }

        let dip = self.dip;
        let csa = self.csa[field_idx];
        let g_ratio = self.nucleus.gamma_ratio();

        let r1 = dip * (j[2] + 3.0 * j[1] + 6.0 * j[4]) + csa * j[1];
        let r2 = dip / 2.0 * (4.0 * j[0] + j[2] + 3.0 * j[1] + 6.0 * j[3] + 6.0 * j[4])
            + csa / 6.0 * (4.0 * j[0] + 3.0 * j[1])
            + self.rex_at(model, theta, field_idx);
        let sigma = dip * (6.0 * j[4] - j[2]);
        let noe = if r1 == 0.0 {
            1.0
        } else {
            1.0 + g_ratio * sigma / r1
        };

        let mut dr1 = vec![0.0; k];
        let mut dr2 = vec![0.0; k];
        let mut dnoe = vec![0.0; k];
        for p in 0..k {
            dr1[p] = dip * (dj[2][p] + 3.0 * dj[1][p] + 6.0 * dj[4][p]) + csa * dj[1][p];
            dr2[p] = dip / 2.0
                * (4.0 * dj[0][p] + dj[2][p] + 3.0 * dj[1][p] + 6.0 * dj[3][p] + 6.0 * dj[4][p])
                + csa / 6.0 * (4.0 * dj[0][p] + 3.0 * dj[1][p]);
            let dsigma = dip * (6.0 * dj[4][p] - dj[2][p]);
            dnoe[p] = if r1 == 0.0 {
                0.0
            } else {
                g_ratio * (dsigma * r1 - sigma * dr1[p]) / (r1 * r1)
            };
        }
        if let Some(i) = model.index_of(Parameter::Rex) {
            dr2[i] += (self.fields[field_idx] / self.fields[0]).powi(2);
        }

        FieldRatesGrad {
            rates: FieldRates { r1, r2, noe },
            dr1,
            dr2,
            dnoe,
        }
    }

    /// Predicted value and gradient for one datum.
    pub fn predict_datum_grad(
        &self,
        model: Model,
        theta: &[f64],
        datum: &RelaxationDatum,
        grad: &mut [f64],
    ) -> f64 {
        let Some(i) = self.field_index(datum.frq()) else {
            grad.fill(f64::NAN);
            return f64::NAN;
        };
        let fg = self.field_rates_grad(model, theta, i);
        let (value, dvalue) = match datum.kind() {
            RelaxationKind::R1 => (fg.rates.r1, &fg.dr1),
            RelaxationKind::R2 => (fg.rates.r2, &fg.dr2),
            RelaxationKind::Noe => (fg.rates.noe, &fg.dnoe),
        };
        grad.copy_from_slice(dvalue);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn predictor(fields: &[f64]) -> RatePredictor {
        let tensor = DiffusionTensor::isotropic(10e-9);
        RatePredictor::new(
            Nucleus::N15,
            &tensor,
            None,
            Nucleus::N15.default_bond_length(),
            Nucleus::N15.default_csa(),
            fields,
        )
        .unwrap()
    }

    #[test]
    fn rigid_nh_rates_are_physical() {
        // A rigid 10 ns tumbler at 500 MHz: R1 of order 1-3 s⁻¹, R2 larger
        // than R1, NOE between -4 and 1 for ¹⁵N.
        let p = predictor(&[500e6]);
        let rates = p.predict(Model::M1, &[1.0]).unwrap();
        let r = rates[0];
        assert!(r.r1 > 0.5 && r.r1 < 4.0, "R1 = {}", r.r1);
        assert!(r.r2 > r.r1, "R2 = {} <= R1 = {}", r.r2, r.r1);
        assert!(r.noe < 1.0 && r.noe > -4.0, "NOE = {}", r.noe);
    }

    #[test]
    fn rex_scales_with_field_squared() {
        let p = predictor(&[500e6, 600e6]);
        let theta = [0.85, 2.0];
        let with = p.predict(Model::M3, &theta).unwrap();
        let without = p.predict(Model::M1, &[0.85]).unwrap();
        let rex_500 = with[0].r2 - without[0].r2;
        let rex_600 = with[1].r2 - without[1].r2;
        assert_relative_eq!(rex_500, 2.0, max_relative = 1e-12);
        assert_relative_eq!(rex_600, 2.0 * (600.0_f64 / 500.0).powi(2), max_relative = 1e-12);
    }

    #[test]
    fn validate_rejects_domain_violations() {
        let p = predictor(&[500e6]);
        assert!(matches!(
            p.predict(Model::M1, &[1.5]),
            Err(FitError::InvalidInput(_))
        ));
        assert!(matches!(
            p.predict(Model::M2, &[0.8, -1e-9]),
            Err(FitError::InvalidInput(_))
        ));
        assert!(matches!(
            p.predict(Model::M1, &[0.8, 0.3]),
            Err(FitError::InvalidInput(_))
        ));
    }

    #[test]
    fn baseline_m0_matches_rigid_m1() {
        let p = predictor(&[500e6]);
        let m0 = p.predict(Model::M0, &[]).unwrap();
        let m1 = p.predict(Model::M1, &[1.0]).unwrap();
        assert_relative_eq!(m0[0].r1, m1[0].r1, max_relative = 1e-12);
        assert_relative_eq!(m0[0].r2, m1[0].r2, max_relative = 1e-12);
        assert_relative_eq!(m0[0].noe, m1[0].noe, max_relative = 1e-12);
    }

    #[test]
    fn m9_is_rigid_plus_exchange() {
        let p = predictor(&[500e6, 600e6]);
        let m9 = p.predict(Model::M9, &[3.0]).unwrap();
        let rigid = p.predict(Model::M0, &[]).unwrap();
        assert_relative_eq!(m9[0].r1, rigid[0].r1, max_relative = 1e-12);
        assert_relative_eq!(m9[0].r2, rigid[0].r2 + 3.0, max_relative = 1e-12);
        assert_relative_eq!(
            m9[1].r2,
            rigid[1].r2 + 3.0 * (1.2_f64).powi(2),
            max_relative = 1e-12
        );
    }

    #[test]
    fn datum_gradients_match_finite_differences() {
        let p = predictor(&[500e6, 600e6]);
        let cases: Vec<(Model, Vec<f64>)> = vec![
            (Model::M2, vec![0.8, 100e-12]),
            (Model::M4, vec![0.8, 100e-12, 1.5]),
            (Model::M5, vec![0.9, 0.85, 300e-12]),
        ];
        for (model, theta) in cases {
            for kind in [RelaxationKind::R1, RelaxationKind::R2, RelaxationKind::Noe] {
                for frq in [500e6, 600e6] {
                    let datum = RelaxationDatum::new(kind, frq, 1.0, 0.01).unwrap();
                    let mut grad = vec![0.0; model.arity()];
                    p.predict_datum_grad(model, &theta, &datum, &mut grad);
                    for i in 0..model.arity() {
                        let h = 1e-6 * theta[i].abs().max(1e-12);
                        let mut plus = theta.clone();
                        plus[i] += h;
                        let mut minus = theta.clone();
                        minus[i] -= h;
                        let fd = (p.predict_datum(model, &plus, &datum)
                            - p.predict_datum(model, &minus, &datum))
                            / (2.0 * h);
                        assert_relative_eq!(grad[i], fd, max_relative = 1e-4, epsilon = 1e-7);
                    }
                }
            }
        }
    }

    #[test]
    fn axial_tensor_requires_bond() {
        let tensor = DiffusionTensor::Axial {
            tm: 10e-9,
            ratio: 1.3,
            theta: 0.1,
            phi: 0.2,
        };
        let result = RatePredictor::new(Nucleus::N15, &tensor, None, 1.02e-10, -172e-6, &[500e6]);
        assert!(matches!(result, Err(FitError::InvalidInput(_))));
    }
}
