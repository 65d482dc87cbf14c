//! Data pipes and the residue-level analysis.
//!
//! A [`Session`] holds named [`Pipe`]s, exactly one of which is current.
//! A pipe bundles everything one analysis needs: the heteronucleus, the
//! diffusion tensor and the per-residue relaxation data.  Running
//! [`Pipe::analyse`] fits every candidate model to every residue,
//! eliminates failed fits, selects a model per residue and, optionally,
//! propagates errors by Monte Carlo and optimises the diffusion tensor
//! against the whole molecule.
//!
//! Per-residue failures are recorded in the residue's state and never
//! abort the analysis; pipe-level problems (no tensor, a missing bond
//! vector under an anisotropic tensor) do.

use crate::consts::Nucleus;
use crate::data::{RelaxationDatum, unique_fields};
use crate::diffusion::DiffusionTensor;
use crate::error::{FitError, PipeError};
use crate::fitter::{FitOptions, Fitter, ModelFit};
use crate::kernel::RatePredictor;
use crate::model::Model;
use crate::monte_carlo::{MonteCarloOptions, monte_carlo};
use crate::objective::ObjectiveFunction;
use crate::optim::{MinimizerTrait, NelderMead, OptimOptions, Termination};
use crate::params::TM_UPPER;
use crate::select::{Criterion, Selection, eliminate, ln_sigma2_sum, select};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

/// One spin system and its measured data.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Residue {
    pub id: i32,
    pub name: Option<String>,
    /// XH bond unit vector in the tensor frame; required for anisotropic
    /// diffusion.
    pub bond: Option<[f64; 3]>,
    /// Bond length, metres.
    pub r: f64,
    /// Chemical shift anisotropy, unitless.
    pub csa: f64,
    pub data: Vec<RelaxationDatum>,
}

impl Residue {
    pub fn new(id: i32, nucleus: Nucleus) -> Self {
        Self {
            id,
            name: None,
            bond: None,
            r: nucleus.default_bond_length(),
            csa: nucleus.default_csa(),
            data: Vec::new(),
        }
    }

    pub fn with_bond(mut self, bond: [f64; 3]) -> Self {
        self.bond = Some(bond);
        self
    }

    pub fn push(&mut self, datum: RelaxationDatum) {
        self.data.push(datum);
    }
}

/// Where a residue stands in the analysis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum ResidueState {
    /// Not yet analysed.
    Idle,
    /// All candidate fits have run, no model chosen yet.
    Fitted,
    /// A model was chosen by the information criterion.
    Selected(Model),
    /// Monte Carlo errors exist for the chosen model.
    Simulated(Model),
    /// The analysis of this residue failed; the message says why.
    Failed(String),
}

/// A residue together with everything the analysis derived from it.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ResidueRecord {
    pub residue: Residue,
    pub state: ResidueState,
    /// Candidate fits that survived elimination.
    pub fits: BTreeMap<Model, ModelFit>,
    /// Eliminated candidates with the reason.
    pub eliminated: Vec<(Model, String)>,
    /// Candidates whose fit errored out, with the error code.
    pub fit_errors: Vec<(Model, String)>,
    pub selection: Option<Selection>,
}

impl ResidueRecord {
    fn new(residue: Residue) -> Self {
        Self {
            residue,
            state: ResidueState::Idle,
            fits: BTreeMap::new(),
            eliminated: Vec::new(),
            fit_errors: Vec::new(),
            selection: None,
        }
    }

    fn reset(&mut self) {
        self.state = ResidueState::Idle;
        self.fits.clear();
        self.eliminated.clear();
        self.fit_errors.clear();
        self.selection = None;
    }

    /// The fit of the selected model, if any.
    pub fn selected_fit(&self) -> Option<&ModelFit> {
        let model = self.selection.as_ref()?.model;
        self.fits.get(&model)
    }
}

/// Options controlling one run of [`Pipe::analyse`].
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisOptions {
    /// Candidate models per residue.
    pub models: Vec<Model>,
    pub fit: FitOptions,
    pub criterion: Criterion,
    /// Monte Carlo error propagation for the selected models; `None`
    /// skips it.
    pub monte_carlo: Option<MonteCarloOptions>,
    /// Refine the diffusion tensor against all residues.
    pub optimise_tensor: bool,
    /// Maximum alternations between residue fits and tensor refinement.
    pub tensor_rounds: usize,
    /// Relative decrease of the aggregate χ² below which the tensor loop
    /// stops.
    pub tensor_tol: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            models: Model::STANDARD.to_vec(),
            fit: FitOptions::default(),
            criterion: Criterion::default(),
            monte_carlo: Some(MonteCarloOptions::default()),
            optimise_tensor: false,
            tensor_rounds: 5,
            tensor_tol: 1e-3,
        }
    }
}

/// One named analysis context.
#[derive(Clone, Debug)]
pub struct Pipe {
    nucleus: Nucleus,
    tensor: Option<DiffusionTensor>,
    residues: Vec<ResidueRecord>,
    /// Names of pipes this one is hybridised with.
    hybrid: BTreeSet<String>,
}

impl Pipe {
    pub fn new(nucleus: Nucleus) -> Self {
        Self {
            nucleus,
            tensor: None,
            residues: Vec::new(),
            hybrid: BTreeSet::new(),
        }
    }

    pub fn nucleus(&self) -> Nucleus {
        self.nucleus
    }

    pub fn tensor(&self) -> Option<&DiffusionTensor> {
        self.tensor.as_ref()
    }

    pub fn set_tensor(&mut self, tensor: DiffusionTensor) {
        self.tensor = Some(tensor);
    }

    pub fn add_residue(&mut self, residue: Residue) {
        self.residues.push(ResidueRecord::new(residue));
    }

    pub fn residues(&self) -> &[ResidueRecord] {
        &self.residues
    }

    pub fn residue(&self, id: i32) -> Option<&ResidueRecord> {
        self.residues.iter().find(|r| r.residue.id == id)
    }

    pub fn hybrid_members(&self) -> &BTreeSet<String> {
        &self.hybrid
    }

    /// Run the full analysis: per-residue fits, elimination, model
    /// selection, then optionally tensor refinement and Monte Carlo.
    pub fn analyse(&mut self, options: &AnalysisOptions) -> Result<(), PipeError> {
        let mut tensor = self.tensor.ok_or(PipeError::MissingTensor)?;

        if tensor.needs_bond_vector() {
            if let Some(record) = self
                .residues
                .iter()
                .find(|r| !r.residue.data.is_empty() && r.residue.bond.is_none())
            {
                return Err(PipeError::MissingBondVector {
                    residue: record.residue.id,
                });
            }
        }

        let mut chi2 = self.fit_residues(&tensor, options)?;
        if options.optimise_tensor {
            for round in 0..options.tensor_rounds {
                let refined = self.refine_tensor(&tensor, options)?;
                tensor = refined;
                let new_chi2 = self.fit_residues(&tensor, options)?;
                log::debug!(
                    "tensor round {}: aggregate chi2 {:.6e} -> {:.6e}",
                    round + 1,
                    chi2,
                    new_chi2
                );
                let decrease = chi2 - new_chi2;
                if decrease.abs() <= options.tensor_tol * chi2.abs().max(1.0) {
                    chi2 = new_chi2;
                    break;
                }
                chi2 = new_chi2;
            }
            self.tensor = Some(tensor);
        }
        log::info!(
            "analysis done: {} residues, aggregate chi2 {:.6e}",
            self.residues.len(),
            chi2
        );

        // n_sims = 0 is an explicit "disable", like leaving the option out.
        if let Some(mc_options) = options.monte_carlo.as_ref().filter(|m| m.n_sims > 0) {
            self.simulate_errors(&tensor, options, mc_options)?;
        }
        Ok(())
    }

    /// Fit and select for every residue under a fixed tensor; returns the
    /// aggregate χ² of the selected models.
    fn fit_residues(
        &mut self,
        tensor: &DiffusionTensor,
        options: &AnalysisOptions,
    ) -> Result<f64, PipeError> {
        let nucleus = self.nucleus;
        let mut aggregate = 0.0;
        for record in &mut self.residues {
            record.reset();
            if record.residue.data.is_empty() {
                record.state = ResidueState::Failed("no relaxation data".into());
                continue;
            }

            let fields = unique_fields(&record.residue.data);
            let predictor = match RatePredictor::new(
                nucleus,
                tensor,
                record.residue.bond,
                record.residue.r,
                record.residue.csa,
                &fields,
            ) {
                Ok(p) => p,
                Err(e) => {
                    record.state = ResidueState::Failed(e.to_string());
                    continue;
                }
            };

            let fitter = Fitter::new(&predictor, &record.residue.data, tensor.tm(), &options.fit);
            for &model in &options.models {
                match fitter.fit(model) {
                    Ok(fit) => {
                        if let Some(reason) = eliminate(&fit, tensor.tm()) {
                            log::debug!("residue {} {model}: eliminated, {reason}", record.residue.id);
                            record.eliminated.push((model, reason));
                        } else {
                            record.fits.insert(model, fit);
                        }
                    }
                    Err(FitError::Cancelled) => return Err(PipeError::Cancelled),
                    Err(e) => {
                        log::debug!("residue {} {model}: {e}", record.residue.id);
                        record.fit_errors.push((model, e.to_string()));
                    }
                }
            }

            record.state = ResidueState::Fitted;
            let candidates: Vec<ModelFit> = record.fits.values().cloned().collect();
            let likelihood_const = ln_sigma2_sum(&record.residue.data);
            match select(&candidates, options.criterion, likelihood_const) {
                Some(selection) => {
                    record.state = ResidueState::Selected(selection.model);
                    record.selection = Some(selection);
                    if let Some(fit) = record.selected_fit() {
                        aggregate += fit.chi2;
                    }
                }
                None if record.fits.is_empty() && !record.eliminated.is_empty() => {
                    record.state =
                        ResidueState::Failed("every candidate model was eliminated".into());
                }
                None => {
                    record.state =
                        ResidueState::Failed("no candidate model could be selected".into());
                }
            }
        }
        Ok(aggregate)
    }

    /// One simplex refinement of the tensor parameters.  Every trial
    /// tensor re-optimises the per-residue parameters from a warm start,
    /// so the score measures the tensor alone and not how well the old
    /// internal motions happen to match it.
    fn refine_tensor(
        &self,
        tensor: &DiffusionTensor,
        options: &AnalysisOptions,
    ) -> Result<DiffusionTensor, PipeError> {
        let selected: Vec<(&Residue, Model, Vec<f64>)> = self
            .residues
            .iter()
            .filter_map(|r| {
                let fit = r.selected_fit()?;
                Some((&r.residue, fit.model, fit.theta.clone()))
            })
            .collect();
        if selected.is_empty() {
            return Err(PipeError::Inconsistent(
                "tensor refinement needs at least one selected residue".into(),
            ));
        }

        let objective = TensorObjective {
            base: *tensor,
            nucleus: self.nucleus,
            fit_options: &options.fit,
            residues: &selected,
            scales: tensor.param_scales(),
        };
        let x0: Vec<f64> = tensor
            .param_vector()
            .iter()
            .zip(&objective.scales)
            .map(|(&p, &s)| p / s)
            .collect();
        let optim = OptimOptions {
            max_iter: 200,
            ..options.fit.optim.clone()
        };
        let result = NelderMead::default().minimize(&objective, &x0, &optim);
        if result.termination == Termination::Cancelled {
            return Err(PipeError::Cancelled);
        }
        if !result.termination.is_usable() || !result.value.is_finite() {
            // Keep the old tensor; the next residue round will run anyway.
            log::warn!("tensor refinement did not converge, keeping the previous tensor");
            return Ok(*tensor);
        }
        Ok(objective.tensor_at(&result.x))
    }

    /// Monte Carlo errors for every selected residue.
    fn simulate_errors(
        &mut self,
        tensor: &DiffusionTensor,
        options: &AnalysisOptions,
        mc_options: &MonteCarloOptions,
    ) -> Result<(), PipeError> {
        let nucleus = self.nucleus;
        for record in &mut self.residues {
            let ResidueRecord {
                residue,
                state,
                fits,
                ..
            } = record;
            let ResidueState::Selected(model) = *state else {
                continue;
            };
            let fields = unique_fields(&residue.data);
            let predictor = match RatePredictor::new(
                nucleus,
                tensor,
                residue.bond,
                residue.r,
                residue.csa,
                &fields,
            ) {
                Ok(p) => p,
                Err(e) => {
                    *state = ResidueState::Failed(e.to_string());
                    continue;
                }
            };
            let Some(fit) = fits.get_mut(&model) else {
                continue;
            };
            match monte_carlo(
                &predictor,
                &residue.data,
                tensor.tm(),
                &options.fit,
                fit,
                mc_options,
            ) {
                Ok(summary) => {
                    fit.mc = Some(summary);
                    *state = ResidueState::Simulated(model);
                }
                Err(FitError::Cancelled) => return Err(PipeError::Cancelled),
                Err(e) => {
                    log::warn!("residue {}: monte carlo failed, {e}", residue.id);
                    fit.warnings.push(format!("monte carlo failed: {e}"));
                }
            }
        }
        Ok(())
    }
}

/// Aggregate χ² of the selected models as a function of the tensor
/// parameters, in the tensor's scaled coordinates.
///
/// The internal parameters are profiled out: each evaluation refits every
/// residue's selected model under the trial tensor, warm-started from the
/// current estimates.  Holding them fixed instead leaves a spurious
/// compromise minimum wherever the stale motions partially cancel the
/// tensor error.
struct TensorObjective<'a> {
    base: DiffusionTensor,
    nucleus: Nucleus,
    fit_options: &'a FitOptions,
    residues: &'a [(&'a Residue, Model, Vec<f64>)],
    scales: Vec<f64>,
}

impl TensorObjective<'_> {
    fn tensor_at(&self, x: &[f64]) -> DiffusionTensor {
        let external: Vec<f64> = x.iter().zip(&self.scales).map(|(&xi, &s)| xi * s).collect();
        self.base.with_param_vector(&external)
    }
}

impl ObjectiveFunction for TensorObjective<'_> {
    fn dim(&self) -> usize {
        self.scales.len()
    }

    fn value(&self, x: &[f64]) -> f64 {
        let tensor = self.tensor_at(x);
        if !self.is_feasible(x) {
            return f64::INFINITY;
        }
        let mut chi2 = 0.0;
        for (residue, model, theta) in self.residues {
            let fields = unique_fields(&residue.data);
            let Ok(predictor) = RatePredictor::new(
                self.nucleus,
                &tensor,
                residue.bond,
                residue.r,
                residue.csa,
                &fields,
            ) else {
                return f64::INFINITY;
            };
            let fitter = Fitter::new(&predictor, &residue.data, tensor.tm(), self.fit_options);
            match fitter.fit_from(*model, theta) {
                Ok(fit) => chi2 += fit.chi2,
                Err(_) => return f64::INFINITY,
            }
        }
        chi2
    }

    // The tensor loop only uses the simplex; derivatives fall back to
    // central differences.
    fn value_grad(&self, x: &[f64], grad: &mut [f64]) -> f64 {
        let h = 1e-6;
        for i in 0..self.dim() {
            let mut plus = x.to_vec();
            plus[i] += h;
            let mut minus = x.to_vec();
            minus[i] -= h;
            grad[i] = (self.value(&plus) - self.value(&minus)) / (2.0 * h);
        }
        self.value(x)
    }

    fn value_grad_hess(
        &self,
        x: &[f64],
        grad: &mut [f64],
        hess: &mut nalgebra::DMatrix<f64>,
    ) -> f64 {
        hess.fill(0.0);
        for i in 0..self.dim() {
            hess[(i, i)] = 1.0;
        }
        self.value_grad(x, grad)
    }

    fn is_feasible(&self, x: &[f64]) -> bool {
        let tensor = self.tensor_at(x);
        if !(tensor.tm() > 0.0 && tensor.tm() <= TM_UPPER) {
            return false;
        }
        match tensor {
            DiffusionTensor::Axial { ratio, .. } => ratio > 0.0,
            _ => true,
        }
    }

    fn clamp(&self, x: &mut [f64]) {
        // tm is the first parameter of every variant.
        let tm_scaled = x[0].clamp(1e-12 / self.scales[0], TM_UPPER / self.scales[0]);
        x[0] = tm_scaled;
        if let DiffusionTensor::Axial { .. } = self.base {
            x[1] = x[1].clamp(1e-2, 1e2);
        }
    }
}

/// A set of named pipes with one current pipe.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pipes: BTreeMap<String, Pipe>,
    current: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipe and make it current.
    pub fn create(&mut self, name: &str, nucleus: Nucleus) -> Result<&mut Pipe, PipeError> {
        if self.pipes.contains_key(name) {
            return Err(PipeError::DuplicatePipe(name.to_string()));
        }
        self.pipes.insert(name.to_string(), Pipe::new(nucleus));
        self.current = Some(name.to_string());
        Ok(self.pipes.get_mut(name).expect("just inserted"))
    }

    pub fn switch(&mut self, name: &str) -> Result<(), PipeError> {
        if !self.pipes.contains_key(name) {
            return Err(PipeError::NoSuchPipe(name.to_string()));
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    /// Delete a pipe; hybrid links pointing at it are dropped too.
    pub fn delete(&mut self, name: &str) -> Result<(), PipeError> {
        if self.pipes.remove(name).is_none() {
            return Err(PipeError::NoSuchPipe(name.to_string()));
        }
        for pipe in self.pipes.values_mut() {
            pipe.hybrid.remove(name);
        }
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        Ok(())
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Result<&Pipe, PipeError> {
        let name = self.current.as_deref().ok_or(PipeError::NoCurrentPipe)?;
        self.pipes.get(name).ok_or(PipeError::NoCurrentPipe)
    }

    pub fn current_mut(&mut self) -> Result<&mut Pipe, PipeError> {
        let name = self
            .current
            .clone()
            .ok_or(PipeError::NoCurrentPipe)?;
        self.pipes.get_mut(&name).ok_or(PipeError::NoCurrentPipe)
    }

    pub fn get(&self, name: &str) -> Result<&Pipe, PipeError> {
        self.pipes
            .get(name)
            .ok_or_else(|| PipeError::NoSuchPipe(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipes.keys().map(String::as_str)
    }

    /// Link `to` into the hybrid set of `from`.
    ///
    /// Fails when the link would make a pipe (transitively) a member of
    /// itself.
    pub fn link_hybrid(&mut self, from: &str, to: &str) -> Result<(), PipeError> {
        if !self.pipes.contains_key(to) {
            return Err(PipeError::NoSuchPipe(to.to_string()));
        }
        if !self.pipes.contains_key(from) {
            return Err(PipeError::NoSuchPipe(from.to_string()));
        }
        if from == to || self.reachable(to, from) {
            return Err(PipeError::HybridCycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.pipes
            .get_mut(from)
            .expect("checked above")
            .hybrid
            .insert(to.to_string());
        Ok(())
    }

    /// Depth-first reachability over the hybrid links.
    fn reachable(&self, start: &str, target: &str) -> bool {
        let mut stack = vec![start.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(pipe) = self.pipes.get(&name) {
                stack.extend(pipe.hybrid.iter().cloned());
            }
        }
        false
    }
}
