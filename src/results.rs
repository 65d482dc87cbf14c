//! Serialisable analysis reports.
//!
//! A report is a flat snapshot of one analysed pipe: per residue the
//! chosen model, its parameters by name with their Monte Carlo errors and
//! confidence intervals, and anything that went wrong.  Reports
//! round-trip through serde, so they can be written out, archived and
//! compared between runs.

use crate::consts::Nucleus;
use crate::diffusion::DiffusionTensor;
use crate::model::Model;
use crate::optim::Termination;
use crate::pipe::{Pipe, ResidueState};
use crate::select::Criterion;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// One fitted parameter with its error estimates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParamEstimate {
    pub value: f64,
    /// Monte Carlo standard deviation, absent before simulation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_upper: Option<f64>,
}

/// Per-residue slice of the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResidueReport {
    pub id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: ResidueState,
    /// Selected model, absent when the residue failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,
    /// Optimised parameters by name, external units.
    pub parameters: BTreeMap<String, ParamEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chi2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub warnings: Vec<String>,
    /// Eliminated candidates with the reason.
    pub eliminated: Vec<(Model, String)>,
}

/// Snapshot of one analysed pipe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisReport {
    pub nucleus: Nucleus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor: Option<DiffusionTensor>,
    pub criterion: Criterion,
    pub residues: Vec<ResidueReport>,
}

impl AnalysisReport {
    pub fn from_pipe(pipe: &Pipe, criterion: Criterion) -> Self {
        let residues = pipe
            .residues()
            .iter()
            .map(|record| {
                let fit = record.selected_fit();
                let model = match record.state {
                    ResidueState::Selected(m) | ResidueState::Simulated(m) => Some(m),
                    _ => None,
                };
                let mut parameters = BTreeMap::new();
                let mut warnings = Vec::new();
                if let Some(fit) = fit {
                    for (i, p) in fit.model.parameters().iter().enumerate() {
                        parameters.insert(
                            p.name().to_string(),
                            ParamEstimate {
                                value: fit.theta[i],
                                sigma: fit.mc.as_ref().map(|mc| mc.sigmas[i]),
                                ci_lower: fit.mc.as_ref().map(|mc| mc.ci_lower[i]),
                                ci_upper: fit.mc.as_ref().map(|mc| mc.ci_upper[i]),
                            },
                        );
                    }
                    warnings.clone_from(&fit.warnings);
                }
                ResidueReport {
                    id: record.residue.id,
                    name: record.residue.name.clone(),
                    state: record.state.clone(),
                    model,
                    parameters,
                    chi2: fit.map(|f| f.chi2),
                    k: fit.map(|f| f.k),
                    n: fit.map(|f| f.n),
                    termination: fit.map(|f| f.termination),
                    score: record.selection.as_ref().map(|s| s.score),
                    warnings,
                    eliminated: record.eliminated.clone(),
                }
            })
            .collect();

        Self {
            nucleus: pipe.nucleus(),
            tensor: pipe.tensor().copied(),
            criterion,
            residues,
        }
    }

    /// Residues that ended in a failed state.
    pub fn failed(&self) -> impl Iterator<Item = &ResidueReport> {
        self.residues
            .iter()
            .filter(|r| matches!(r.state, ResidueState::Failed(_)))
    }
}
