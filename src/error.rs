//! Error types.
//!
//! Per-residue failures are recorded in the residue's fit slot and never
//! abort the whole analysis; pipe-level errors do.  Every error carries a
//! stable code for downstream consumers.

use crate::model::Model;

/// Error raised while fitting one residue-model pair.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model {model}: {n} data points cannot constrain {k} parameters (need at least k+1)")]
    InsufficientData { model: Model, n: usize, k: usize },

    #[error("domain error: the objective is not finite at the evaluated point")]
    Domain,

    #[error("every grid node violates the constraints, the fit cannot start")]
    ConstraintFatal,

    #[error("minimisation cancelled")]
    Cancelled,
}

impl FitError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::Domain => "domain",
            Self::ConstraintFatal => "constraint_fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Pipe-level fatal error: aborts the current operation, the pipe is left
/// unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipeError {
    #[error("no data pipe named '{0}'")]
    NoSuchPipe(String),

    #[error("a data pipe named '{0}' already exists")]
    DuplicatePipe(String),

    #[error("no current data pipe is set")]
    NoCurrentPipe,

    #[error("the diffusion tensor has not been specified")]
    MissingTensor,

    #[error("residue {residue}: a bond unit vector is required for non-isotropic diffusion")]
    MissingBondVector { residue: i32 },

    #[error("linking pipe '{from}' to '{to}' would create a hybrid pipe cycle")]
    HybridCycle { from: String, to: String },

    #[error("pipe state is inconsistent: {0}")]
    Inconsistent(String),

    #[error("the analysis was cancelled")]
    Cancelled,
}

impl PipeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchPipe(_) => "no_such_pipe",
            Self::DuplicatePipe(_) => "duplicate_pipe",
            Self::NoCurrentPipe => "no_current_pipe",
            Self::MissingTensor => "missing_tensor",
            Self::MissingBondVector { .. } => "missing_bond_vector",
            Self::HybridCycle { .. } => "hybrid_cycle",
            Self::Inconsistent(_) => "inconsistent_pipe",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FitError::Domain.code(), "domain");
        assert_eq!(
            FitError::InsufficientData {
                model: Model::M5,
                n: 3,
                k: 3
            }
            .code(),
            "insufficient_data"
        );
        assert_eq!(PipeError::MissingTensor.code(), "missing_tensor");
    }

    #[test]
    fn messages_name_the_model() {
        let err = FitError::InsufficientData {
            model: Model::M5,
            n: 3,
            k: 3,
        };
        assert!(err.to_string().contains("m5"));
    }
}
