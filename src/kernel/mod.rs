use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{error::AbcResult, model::ParameterSet, types::Particle};

pub mod componentwise;
pub mod olcm;

/// Perturbs a parent parameter set and gives the density of having moved
/// from one set to another.
pub trait Kernel: Sync {
    fn perturb(&self, parameters: &ParameterSet, rng: &mut impl Rng) -> ParameterSet;
    fn pert_density(&self, from: &ParameterSet, to: &ParameterSet) -> f64;
}

/// Built once per generation from the previous population, then asked for a
/// kernel around each parent.
pub trait KernelBuilder: Sized {
    type K: Kernel;

    fn new(particles: &[Particle]) -> AbcResult<Self>;
    fn build_kernel_around_parameters(&self, parameters: &ParameterSet) -> AbcResult<Self::K>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelChoice {
    /// Independent Gaussian per parameter, twice the weighted variance.
    #[default]
    Componentwise,
    /// Multivariate Gaussian with optimal local covariance.
    Olcm,
}

pub(crate) fn check_normalised(particles: &[Particle]) -> AbcResult<()> {
    let total: f64 = particles.iter().map(|p| p.weight).sum();
    if particles.is_empty() || (total - 1.0).abs() > 1e-6 {
        return Err(crate::error::AbcErr::KernelError(format!(
            "Particles must be normalised to build a kernel, weights sum to {}",
            total
        )));
    }
    Ok(())
}
