//! Rotational diffusion tensors.
//!
//! A tensor maps an XH bond unit vector to the list of (weight, correlation
//! time) pairs entering the spectral density sum: one pair for the sphere,
//! three for the spheroid (Woessner) and five for the ellipsoid.  Weights
//! always sum to one.
//!
//! The spheroid is parameterised by `tm` and the ratio `Dpar/Dper`
//! (prolate > 1, oblate < 1), the ellipsoid by `tm`, the anisotropy `Da`,
//! the rhombicity `Dr` and three z-y-z Euler angles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One Lorentzian term of the tumbling part of the spectral density.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TumblingComponent {
    pub weight: f64,
    pub tau: f64,
}

/// Rotational diffusion tensor shared by all residues of a pipe.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffusionTensor {
    /// Isotropic tumbling with global correlation time `tm` (seconds).
    Isotropic { tm: f64 },
    /// Axially symmetric tensor; `ratio` is `Dpar / Dper`, the unique axis
    /// points along the polar angles `(theta, phi)`.
    Axial {
        tm: f64,
        ratio: f64,
        theta: f64,
        phi: f64,
    },
    /// Fully anisotropic tensor with anisotropy `Da` (s⁻¹), rhombicity `Dr`
    /// and z-y-z Euler angles orienting the eigenframe.
    Anisotropic {
        tm: f64,
        da: f64,
        dr: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    },
}

impl DiffusionTensor {
    pub fn isotropic(tm: f64) -> Self {
        Self::Isotropic { tm }
    }

    pub fn tm(&self) -> f64 {
        match *self {
            Self::Isotropic { tm } => tm,
            Self::Axial { tm, .. } => tm,
            Self::Anisotropic { tm, .. } => tm,
        }
    }

    pub fn is_isotropic(&self) -> bool {
        matches!(self, Self::Isotropic { .. })
    }

    /// Whether evaluating the tensor needs a bond orientation.
    pub fn needs_bond_vector(&self) -> bool {
        !self.is_isotropic()
    }

    /// The (weight, correlation time) pairs for a residue whose XH bond
    /// unit vector is `bond` (any frame shared with the tensor).
    ///
    /// Returns `None` when the tensor is anisotropic and no bond vector is
    /// available; the caller reports this as a pipe-level error.
    pub fn components(&self, bond: Option<[f64; 3]>) -> Option<Vec<TumblingComponent>> {
        match *self {
            Self::Isotropic { tm } => Some(vec![TumblingComponent {
                weight: 1.0,
                tau: tm,
            }]),
            Self::Axial {
                tm,
                ratio,
                theta,
                phi,
            } => {
                let bond = bond?;
                let axis = [
                    theta.sin() * phi.cos(),
                    theta.sin() * phi.sin(),
                    theta.cos(),
                ];
                let delta = dot(axis, bond);
                Some(spheroid_components(tm, ratio, delta))
            }
            Self::Anisotropic {
                tm,
                da,
                dr,
                alpha,
                beta,
                gamma,
            } => {
                let bond = bond?;
                let frame = euler_zyz(alpha, beta, gamma);
                let d = [
                    dot(frame[0], bond),
                    dot(frame[1], bond),
                    dot(frame[2], bond),
                ];
                Some(ellipsoid_components(tm, da, dr, d))
            }
        }
    }

    /// Flatten the tensor into an optimisable parameter vector.
    pub fn param_vector(&self) -> Vec<f64> {
        match *self {
            Self::Isotropic { tm } => vec![tm],
            Self::Axial {
                tm,
                ratio,
                theta,
                phi,
            } => vec![tm, ratio, theta, phi],
            Self::Anisotropic {
                tm,
                da,
                dr,
                alpha,
                beta,
                gamma,
            } => vec![tm, da, dr, alpha, beta, gamma],
        }
    }

    /// Diagonal scales matching [`Self::param_vector`]: correlation times
    /// in nanoseconds, the ellipsoid anisotropy in units of 10⁷ s⁻¹,
    /// ratios and angles untouched.
    pub fn param_scales(&self) -> Vec<f64> {
        match *self {
            Self::Isotropic { .. } => vec![1e-9],
            Self::Axial { .. } => vec![1e-9, 1.0, 1.0, 1.0],
            Self::Anisotropic { .. } => vec![1e-9, 1e7, 1.0, 1.0, 1.0, 1.0],
        }
    }

    /// Rebuild a tensor of the same variant from a parameter vector,
    /// wrapping angles into their canonical ranges.
    pub fn with_param_vector(&self, p: &[f64]) -> Self {
        match *self {
            Self::Isotropic { .. } => Self::Isotropic { tm: p[0] },
            Self::Axial { .. } => Self::Axial {
                tm: p[0],
                ratio: p[1],
                theta: wrap_angle(p[2], PI),
                phi: wrap_angle(p[3], 2.0 * PI),
            },
            Self::Anisotropic { .. } => Self::Anisotropic {
                tm: p[0],
                da: p[1],
                dr: p[2],
                alpha: wrap_angle(p[3], 2.0 * PI),
                beta: wrap_angle(p[4], PI),
                gamma: wrap_angle(p[5], 2.0 * PI),
            },
        }
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn wrap_angle(x: f64, period: f64) -> f64 {
    let r = x.rem_euclid(period);
    if r.is_nan() { x } else { r }
}

/// Woessner weights and times for the spheroid.
///
/// `delta` is the cosine of the angle between the bond and the unique axis.
fn spheroid_components(tm: f64, ratio: f64, delta: f64) -> Vec<TumblingComponent> {
    let d_iso = 1.0 / (6.0 * tm);
    let d_per = 3.0 * d_iso / (ratio + 2.0);
    let d_par = ratio * d_per;

    let d2 = delta * delta;
    let one_d2 = 1.0 - d2;

    vec![
        TumblingComponent {
            weight: 0.25 * (3.0 * d2 - 1.0).powi(2),
            tau: 1.0 / (6.0 * d_per),
        },
        TumblingComponent {
            weight: 3.0 * d2 * one_d2,
            tau: 1.0 / (5.0 * d_per + d_par),
        },
        TumblingComponent {
            weight: 0.75 * one_d2 * one_d2,
            tau: 1.0 / (2.0 * d_per + 4.0 * d_par),
        },
    ]
}

/// Five-term weights and times for the ellipsoid.
///
/// `d` holds the direction cosines of the bond in the diffusion eigenframe.
fn ellipsoid_components(tm: f64, da: f64, dr: f64, d: [f64; 3]) -> Vec<TumblingComponent> {
    let d_iso = 1.0 / (6.0 * tm);
    let r = (1.0 + 3.0 * dr * dr).sqrt();

    let [dx, dy, dz] = d;
    let (dx2, dy2, dz2) = (dx * dx, dy * dy, dz * dz);
    let (dx4, dy4, dz4) = (dx2 * dx2, dy2 * dy2, dz2 * dz2);

    let f = 3.0 * (dx4 + dy4 + dz4) - 1.0;
    let e = ((1.0 + 3.0 * dr) * (dx4 + 2.0 * dy2 * dz2)
        + (1.0 - 3.0 * dr) * (dy4 + 2.0 * dx2 * dz2)
        - 2.0 * (dz4 + 2.0 * dx2 * dy2))
        / r;

    vec![
        TumblingComponent {
            weight: 0.25 * (f - e),
            tau: 1.0 / (6.0 * d_iso - 2.0 * da * r),
        },
        TumblingComponent {
            weight: 3.0 * dy2 * dz2,
            tau: 1.0 / (6.0 * d_iso - da * (1.0 + 3.0 * dr)),
        },
        TumblingComponent {
            weight: 3.0 * dx2 * dz2,
            tau: 1.0 / (6.0 * d_iso - da * (1.0 - 3.0 * dr)),
        },
        TumblingComponent {
            weight: 3.0 * dx2 * dy2,
            tau: 1.0 / (6.0 * d_iso + 2.0 * da),
        },
        TumblingComponent {
            weight: 0.25 * (f + e),
            tau: 1.0 / (6.0 * d_iso + 2.0 * da * r),
        },
    ]
}

/// Rows of the z-y-z Euler rotation: the diffusion eigen-axes expressed in
/// the frame the bond vectors are given in.
fn euler_zyz(alpha: f64, beta: f64, gamma: f64) -> [[f64; 3]; 3] {
    let (sa, ca) = alpha.sin_cos();
    let (sb, cb) = beta.sin_cos();
    let (sg, cg) = gamma.sin_cos();
    [
        [
            ca * cb * cg - sa * sg,
            sa * cb * cg + ca * sg,
            -sb * cg,
        ],
        [
            -ca * cb * sg - sa * cg,
            -sa * cb * sg + ca * cg,
            sb * sg,
        ],
        [ca * sb, sa * sb, cb],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn isotropic_single_component() {
        let t = DiffusionTensor::isotropic(10e-9);
        let c = t.components(None).unwrap();
        assert_eq!(c.len(), 1);
        assert_relative_eq!(c[0].weight, 1.0);
        assert_relative_eq!(c[0].tau, 10e-9);
    }

    #[test]
    fn axial_needs_bond_vector() {
        let t = DiffusionTensor::Axial {
            tm: 10e-9,
            ratio: 1.3,
            theta: 0.0,
            phi: 0.0,
        };
        assert!(t.components(None).is_none());
        assert!(t.components(Some([0.0, 0.0, 1.0])).is_some());
    }

    #[test]
    fn axial_weights_sum_to_one() {
        let t = DiffusionTensor::Axial {
            tm: 8e-9,
            ratio: 1.5,
            theta: 0.3,
            phi: 1.1,
        };
        let bond = {
            let v: [f64; 3] = [0.2, -0.5, 0.84];
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        };
        let c = t.components(Some(bond)).unwrap();
        assert_eq!(c.len(), 3);
        let sum: f64 = c.iter().map(|x| x.weight).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        assert!(c.iter().all(|x| x.tau > 0.0));
    }

    #[test]
    fn axial_unity_ratio_collapses_to_sphere() {
        let tm = 10e-9;
        let t = DiffusionTensor::Axial {
            tm,
            ratio: 1.0,
            theta: 0.7,
            phi: 0.2,
        };
        let c = t.components(Some([1.0, 0.0, 0.0])).unwrap();
        let sum: f64 = c.iter().map(|x| x.weight).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        for x in &c {
            assert_relative_eq!(x.tau, tm, max_relative = 1e-12);
        }
    }

    #[test]
    fn ellipsoid_weights_sum_to_one() {
        let t = DiffusionTensor::Anisotropic {
            tm: 9e-9,
            da: 2e6,
            dr: 0.2,
            alpha: 0.4,
            beta: 1.0,
            gamma: 2.2,
        };
        let bond = {
            let v: [f64; 3] = [0.3, 0.4, 0.87];
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        };
        let c = t.components(Some(bond)).unwrap();
        assert_eq!(c.len(), 5);
        let sum: f64 = c.iter().map(|x| x.weight).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-10);
        assert!(c.iter().all(|x| x.tau > 0.0));
    }

    #[test]
    fn ellipsoid_axial_limit_matches_spheroid() {
        // Dr = 0 with the eigenframe z-axis along the lab z-axis reduces
        // the five-term form to the three-term Woessner form.
        let tm = 10e-9;
        let ratio: f64 = 1.4;
        let d_iso = 1.0 / (6.0 * tm);
        let d_per = 3.0 * d_iso / (ratio + 2.0);
        let d_par = ratio * d_per;
        let da = d_par - d_per;

        let bond = {
            let v: [f64; 3] = [0.1, 0.5, 0.86];
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        };

        let ell = DiffusionTensor::Anisotropic {
            tm,
            da,
            dr: 0.0,
            alpha: 0.0,
            beta: 0.0,
            gamma: 0.0,
        };
        let sph = DiffusionTensor::Axial {
            tm,
            ratio,
            theta: 0.0,
            phi: 0.0,
        };

        // Compare the reconstructed spectral densities rather than the raw
        // component lists: the degenerate ellipsoid terms merge.
        let j = |comps: &[TumblingComponent], w: f64| -> f64 {
            comps
                .iter()
                .map(|c| c.weight * c.tau / (1.0 + (w * c.tau).powi(2)))
                .sum()
        };
        let ce = ell.components(Some(bond)).unwrap();
        let cs = sph.components(Some(bond)).unwrap();
        for &w in &[0.0, 1e8, 5e8, 3e9] {
            assert_relative_eq!(j(&ce, w), j(&cs, w), max_relative = 1e-9);
        }
    }

    #[test]
    fn param_vector_round_trip() {
        let t = DiffusionTensor::Axial {
            tm: 8e-9,
            ratio: 0.8,
            theta: 0.5,
            phi: 4.0,
        };
        let p = t.param_vector();
        assert_eq!(t.with_param_vector(&p), t);
    }

    #[test]
    fn with_param_vector_wraps_angles() {
        let t = DiffusionTensor::Axial {
            tm: 8e-9,
            ratio: 1.2,
            theta: 0.5,
            phi: 0.5,
        };
        let wrapped = t.with_param_vector(&[8e-9, 1.2, 0.5, 2.0 * PI + 0.5]);
        match wrapped {
            DiffusionTensor::Axial { phi, .. } => assert_relative_eq!(phi, 0.5, epsilon = 1e-12),
            _ => unreachable!(),
        }
    }
}
