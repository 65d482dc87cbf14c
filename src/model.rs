//! Model-free model descriptors.
//!
//! The candidate set is the classic m0–m9 family.  Each descriptor is an
//! ordered parameter list; the parameter count is the model's arity `k`.
//!
//! The extended two-timescale models (m5–m8) are parameterised with
//! `{S2f, S2s, …}` so that the coupled constraint `S2 = S2f·S2s` holds by
//! construction.

use crate::params::Parameter;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identifier of a model-free model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Model {
    M0,
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    M9,
}

impl Model {
    pub const ALL: [Self; 10] = [
        Self::M0,
        Self::M1,
        Self::M2,
        Self::M3,
        Self::M4,
        Self::M5,
        Self::M6,
        Self::M7,
        Self::M8,
        Self::M9,
    ];

    /// The standard candidate set for model selection.
    pub const STANDARD: [Self; 5] = [Self::M1, Self::M2, Self::M3, Self::M4, Self::M5];

    /// Stable identifier, e.g. `"m4"`.
    pub fn id(self) -> &'static str {
        match self {
            Self::M0 => "m0",
            Self::M1 => "m1",
            Self::M2 => "m2",
            Self::M3 => "m3",
            Self::M4 => "m4",
            Self::M5 => "m5",
            Self::M6 => "m6",
            Self::M7 => "m7",
            Self::M8 => "m8",
            Self::M9 => "m9",
        }
    }

    /// Ordered parameter list.
    pub fn parameters(self) -> &'static [Parameter] {
        use Parameter::*;
        match self {
            Self::M0 => &[],
            Self::M1 => &[S2],
            Self::M2 => &[S2, Te],
            Self::M3 => &[S2, Rex],
            Self::M4 => &[S2, Te, Rex],
            Self::M5 => &[S2f, S2s, Ts],
            Self::M6 => &[S2f, Tf, S2s, Ts],
            Self::M7 => &[S2f, S2s, Ts, Rex],
            Self::M8 => &[S2f, Tf, S2s, Ts, Rex],
            Self::M9 => &[Rex],
        }
    }

    /// Number of fitted parameters `k`.
    pub fn arity(self) -> usize {
        self.parameters().len()
    }

    /// Position of a parameter within the ordered list.
    pub fn index_of(self, param: Parameter) -> Option<usize> {
        self.parameters().iter().position(|&p| p == param)
    }

    pub fn has(self, param: Parameter) -> bool {
        self.index_of(param).is_some()
    }

    /// Models with two internal timescales (the Clore extended form).
    pub fn is_extended(self) -> bool {
        matches!(self, Self::M5 | Self::M6 | Self::M7 | Self::M8)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.id() == id)
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_matches_parameter_list() {
        assert_eq!(Model::M0.arity(), 0);
        assert_eq!(Model::M1.arity(), 1);
        assert_eq!(Model::M4.arity(), 3);
        assert_eq!(Model::M5.arity(), 3);
        assert_eq!(Model::M8.arity(), 5);
        assert_eq!(Model::M9.arity(), 1);
    }

    #[test]
    fn extended_models_pair_s2f_with_s2s() {
        for m in Model::ALL {
            if m.is_extended() {
                assert!(m.has(Parameter::S2f));
                assert!(m.has(Parameter::S2s));
                assert!(m.has(Parameter::Ts));
                assert!(!m.has(Parameter::S2));
            }
        }
    }

    #[test]
    fn every_parameter_belongs_to_some_model() {
        for p in Parameter::ALL {
            assert!(
                Model::ALL.iter().any(|m| m.has(p)),
                "{} is carried by no model",
                p.name()
            );
        }
    }

    #[test]
    fn id_round_trip() {
        for m in Model::ALL {
            assert_eq!(Model::from_id(m.id()), Some(m));
        }
        assert_eq!(Model::from_id("m99"), None);
    }

    #[test]
    fn ids_sort_lexicographically_with_enum_order() {
        // The parsimony tie-break relies on the enum `Ord` matching the
        // lexicographic order of single-digit ids.
        let mut by_enum = Model::ALL.to_vec();
        by_enum.sort();
        let mut by_id = Model::ALL.to_vec();
        by_id.sort_by_key(|m| m.id());
        assert_eq!(by_enum, by_id);
    }
}
