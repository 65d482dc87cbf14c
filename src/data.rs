//! Relaxation observables.

use crate::error::FitError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of a relaxation observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum RelaxationKind {
    R1,
    R2,
    Noe,
}

impl RelaxationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::R1 => "R1",
            Self::R2 => "R2",
            Self::Noe => "NOE",
        }
    }
}

/// One measured relaxation value at one field strength.
///
/// The field is given as the proton Larmor frequency in Hz (e.g. 500 MHz
/// corresponds to `5e8`).  Immutable once constructed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RelaxationDatum {
    kind: RelaxationKind,
    frq: f64,
    value: f64,
    error: f64,
}

impl RelaxationDatum {
    pub fn new(kind: RelaxationKind, frq: f64, value: f64, error: f64) -> Result<Self, FitError> {
        if !(frq > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "field strength must be positive, got {frq} Hz"
            )));
        }
        if !(error > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "{} error must be positive, got {error}",
                kind.label()
            )));
        }
        if !value.is_finite() {
            return Err(FitError::InvalidInput(format!(
                "{} value is not finite",
                kind.label()
            )));
        }
        Ok(Self {
            kind,
            frq,
            value,
            error,
        })
    }

    pub fn kind(&self) -> RelaxationKind {
        self.kind
    }

    /// Proton Larmor frequency in Hz.
    pub fn frq(&self) -> f64 {
        self.frq
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn error(&self) -> f64 {
        self.error
    }
}

/// Collect the sorted unique field strengths of a data set.
///
/// The lowest field is the reference field for the `Rex` scaling.
pub fn unique_fields(data: &[RelaxationDatum]) -> Vec<f64> {
    let mut fields: Vec<f64> = Vec::new();
    for d in data {
        if !fields.iter().any(|&f| f == d.frq()) {
            fields.push(d.frq());
        }
    }
    fields.sort_by(|a, b| a.total_cmp(b));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_error() {
        assert!(RelaxationDatum::new(RelaxationKind::R1, 5e8, 1.5, 0.0).is_err());
        assert!(RelaxationDatum::new(RelaxationKind::R1, 5e8, 1.5, -0.1).is_err());
        assert!(RelaxationDatum::new(RelaxationKind::R1, 5e8, 1.5, 0.015).is_ok());
    }

    #[test]
    fn rejects_bad_field() {
        assert!(RelaxationDatum::new(RelaxationKind::R2, 0.0, 10.0, 0.1).is_err());
        assert!(RelaxationDatum::new(RelaxationKind::R2, f64::NAN, 10.0, 0.1).is_err());
    }

    #[test]
    fn unique_fields_are_sorted() {
        let data = [
            RelaxationDatum::new(RelaxationKind::R1, 6e8, 1.0, 0.01).unwrap(),
            RelaxationDatum::new(RelaxationKind::R2, 5e8, 10.0, 0.1).unwrap(),
            RelaxationDatum::new(RelaxationKind::Noe, 6e8, 0.7, 0.02).unwrap(),
            RelaxationDatum::new(RelaxationKind::R1, 5e8, 1.2, 0.01).unwrap(),
        ];
        assert_eq!(unique_fields(&data), vec![5e8, 6e8]);
    }
}
