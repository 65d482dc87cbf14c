//! Physical constants used by the relaxation equations.
//!
//! Gyromagnetic ratios are in rad s⁻¹ T⁻¹, ħ in J s, µ₀ in T² J⁻¹ m³.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reduced Planck constant, J s.
pub const H_BAR: f64 = 1.054_571_596_42e-34;

/// Permeability of free space, T² J⁻¹ m³.
pub const MU_0: f64 = 4.0e-7 * std::f64::consts::PI;

/// Gyromagnetic ratio of ¹H.
pub const GAMMA_H1: f64 = 26.752_221_2e7;

/// Heteronucleus observed in the relaxation experiment.
///
/// The proton is always the coupled partner, so it is not a variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Nucleus {
    N15,
    C13,
    O17,
    P31,
}

impl Nucleus {
    /// Gyromagnetic ratio of the heteronucleus, rad s⁻¹ T⁻¹.
    pub fn gamma(self) -> f64 {
        match self {
            Self::N15 => -2.712_6e7,
            Self::C13 => 6.728e7,
            Self::O17 => -3.628e7,
            Self::P31 => 10.841e7,
        }
    }

    /// γH / γX, used by the NOE equation.
    pub fn gamma_ratio(self) -> f64 {
        GAMMA_H1 / self.gamma()
    }

    /// Default XH bond length in metres.
    pub fn default_bond_length(self) -> f64 {
        match self {
            Self::N15 => 1.02e-10,
            Self::C13 => 1.09e-10,
            // No common default; the backbone NH and aliphatic CH values
            // cover the supported spin systems, other nuclei require an
            // explicit per-residue value.
            Self::O17 | Self::P31 => 1.02e-10,
        }
    }

    /// Default chemical shift anisotropy, unitless (ppm × 1e-6).
    pub fn default_csa(self) -> f64 {
        match self {
            Self::N15 => -172e-6,
            Self::C13 => 25e-6,
            Self::O17 | Self::P31 => 0.0,
        }
    }
}
