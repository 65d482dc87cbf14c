#![doc = include_str!("../README.md")]

pub mod consts;
pub mod constraints;
pub mod data;
pub mod diffusion;
pub mod error;
pub mod fitter;
pub mod kernel;
pub mod model;
pub mod monte_carlo;
pub mod objective;
pub mod optim;
pub mod params;
pub mod pipe;
pub mod results;
pub mod select;
pub mod spectral;


pub use consts::Nucleus;
pub use constraints::{ConstraintMode, ConstraintSet};
pub use data::{RelaxationDatum, RelaxationKind};
pub use diffusion::DiffusionTensor;
pub use error::{FitError, PipeError};
pub use fitter::{FitOptions, Fitter, ModelFit};
pub use kernel::RatePredictor;
pub use model::Model;
pub use monte_carlo::{MonteCarloOptions, MonteCarloSource, MonteCarloSummary, monte_carlo};
pub use params::Parameter;
pub use pipe::{AnalysisOptions, Pipe, Residue, ResidueState, Session};
pub use results::{AnalysisReport, ParamEstimate, ResidueReport};
pub use select::{Criterion, Selection, select};
pub use spectral::SpectralDensity;
