//! The closed set of model-free parameters.
//!
//! Every parameter carries its own default box bounds, the diagonal scale
//! applied before optimisation, and a stable ASCII name used in reports.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A model-free parameter kind.
///
/// Order parameters are unitless and bounded to `[0, 1]`, correlation times
/// are in seconds, and `Rex` is the exchange contribution to R2 in s⁻¹ at
/// the reference field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Parameter {
    S2,
    S2f,
    S2s,
    Te,
    Tf,
    Ts,
    Rex,
}

/// Default upper bound for the internal correlation times, seconds.
pub const TAU_INTERNAL_UPPER: f64 = 20e-9;

/// Upper bound for the global tumbling time, seconds.  Used by the
/// diffusion-tensor refinement.
pub const TM_UPPER: f64 = 50e-9;

/// Default upper bound for `Rex` at the reference field, s⁻¹.
pub const REX_UPPER: f64 = 30.0;

impl Parameter {
    pub const ALL: [Self; 7] = [
        Self::S2,
        Self::S2f,
        Self::S2s,
        Self::Te,
        Self::Tf,
        Self::Ts,
        Self::Rex,
    ];

    /// Stable lower-case name, matching the report serialisation.
    pub fn name(self) -> &'static str {
        match self {
            Self::S2 => "s2",
            Self::S2f => "s2f",
            Self::S2s => "s2s",
            Self::Te => "te",
            Self::Tf => "tf",
            Self::Ts => "ts",
            Self::Rex => "rex",
        }
    }

    /// Human-readable name for messages.
    pub fn pretty(self) -> &'static str {
        match self {
            Self::S2 => "S2 order parameter",
            Self::S2f => "S2f fast order parameter",
            Self::S2s => "S2s slow order parameter",
            Self::Te => "te internal correlation time",
            Self::Tf => "tf fast internal correlation time",
            Self::Ts => "ts slow internal correlation time",
            Self::Rex => "Rex chemical exchange",
        }
    }

    pub fn is_order_parameter(self) -> bool {
        matches!(self, Self::S2 | Self::S2f | Self::S2s)
    }

    pub fn is_internal_time(self) -> bool {
        matches!(self, Self::Te | Self::Tf | Self::Ts)
    }

    /// Default box bounds `(lower, upper)` in external units.
    pub fn default_bounds(self) -> (f64, f64) {
        match self {
            p if p.is_order_parameter() => (0.0, 1.0),
            p if p.is_internal_time() => (0.0, TAU_INTERNAL_UPPER),
            Self::Rex => (0.0, REX_UPPER),
            _ => unreachable!(),
        }
    }

    /// Diagonal scale: the optimiser works on `theta / scale` so that all
    /// parameters are O(1).
    pub fn scale(self) -> f64 {
        match self {
            p if p.is_order_parameter() => 1.0,
            p if p.is_internal_time() => 1e-9,
            Self::Rex => 1.0,
            _ => unreachable!(),
        }
    }
}
