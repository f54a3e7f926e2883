//! Approximate Bayesian computation (ABC-SMC) for a four-compartment model of
//! tumour response to chemotherapy and radiotherapy.
//!
//! A [`problem::TumourProblem`] ties the ODE model, the integrator, the priors
//! and one patient's observed volumes together; [`algorithm::AbcSmc`] fits it
//! and returns a [`types::PosteriorHistory`], which [`storage`] can persist.

pub mod algorithm;
pub mod config;
pub mod data;
pub mod distance;
pub mod error;
pub mod integrator;
pub mod kernel;
pub mod model;
pub mod prior;
pub mod problem;
pub mod storage;
pub mod tolerance;
pub mod types;
pub mod wrapper;

pub use algorithm::AbcSmc;
pub use config::Config;
pub use error::{AbcErr, AbcResult};
pub use model::{CompartmentState, ParameterSet};
pub use problem::{Model, TumourProblem};
pub use types::{Particle, Population, PosteriorHistory, Termination};
