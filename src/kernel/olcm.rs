//! Optimal local covariance matrix (OLCM) kernel.
//!
//! For a parent `θ` the proposal covariance is the weighted population
//! covariance plus `(m - θ)(m - θ)ᵀ`, where `m` is the weighted mean.

use nalgebra::{DMatrix, DVector};
use rand::{distributions::Distribution, Rng};
use statrs::distribution::{Continuous, MultivariateNormal};

use crate::{
    error::{AbcErr, AbcResult},
    model::ParameterSet,
    types::Particle,
};

use super::{check_normalised, Kernel, KernelBuilder};

const JITTER: f64 = 1e-10;

#[derive(Clone, Debug)]
pub struct OLCMKernel {
    pub weighted_mean: DVector<f64>,
    pub local_covariance: DMatrix<f64>,
    /// Dimensions that vary across the population, the rest are held fixed.
    active: Vec<usize>,
    /// Zero-mean Gaussian over the active dimensions only.
    distribution: Option<MultivariateNormal>,
}
impl OLCMKernel {
    fn new(
        weighted_mean: DVector<f64>,
        local_covariance: DMatrix<f64>,
        active: Vec<usize>,
    ) -> AbcResult<Self> {
        if active.is_empty() {
            return Ok(Self {
                weighted_mean,
                local_covariance,
                active,
                distribution: None,
            });
        }

        let reduced = local_covariance.select_rows(&active).select_columns(&active);
        let dim = reduced.nrows();
        let distribution = match MultivariateNormal::new_from_nalgebra(
            DVector::zeros(dim),
            reduced.clone(),
        ) {
            Ok(d) => d,
            Err(_) => {
                let scale = reduced.diagonal().max().max(1.0);
                let jittered = &reduced + DMatrix::<f64>::identity(dim, dim) * (JITTER * scale);
                log::debug!("Local covariance not positive definite, adding jitter");
                MultivariateNormal::new_from_nalgebra(DVector::zeros(dim), jittered).map_err(
                    |e| {
                        AbcErr::KernelError(format!(
                            "Local covariance is not positive definite ({}): {}",
                            e, local_covariance
                        ))
                    },
                )?
            }
        };

        Ok(Self {
            weighted_mean,
            local_covariance,
            active,
            distribution: Some(distribution),
        })
    }
}

impl Kernel for OLCMKernel {
    fn perturb(&self, parameters: &ParameterSet, rng: &mut impl Rng) -> ParameterSet {
        let mut values = parameters.to_array();
        if let Some(distribution) = &self.distribution {
            let step = distribution.sample(rng);
            for (&i, s) in self.active.iter().zip(step.iter()) {
                values[i] += s;
            }
        }
        ParameterSet::from_array(values)
    }

    fn pert_density(&self, from: &ParameterSet, to: &ParameterSet) -> f64 {
        let (from, to) = (from.to_array(), to.to_array());
        let fixed_moved = (0..ParameterSet::DIMENSION)
            .filter(|i| !self.active.contains(i))
            .any(|i| from[i] != to[i]);
        if fixed_moved {
            return 0.0;
        }

        match &self.distribution {
            None => 1.0,
            Some(distribution) => {
                let delta = DVector::<f64>::from_iterator(
                    self.active.len(),
                    self.active.iter().map(|&i| to[i] - from[i]),
                );
                distribution.pdf(&delta)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct OLCMKernelBuilder {
    weighted_mean: DVector<f64>,
    weighted_covariance: DMatrix<f64>,
    active: Vec<usize>,
}

impl KernelBuilder for OLCMKernelBuilder {
    type K = OLCMKernel;

    fn new(particles: &[Particle]) -> AbcResult<Self> {
        check_normalised(particles)?;

        let weighted_mean: DVector<f64> = particles
            .iter()
            .map(|particle| {
                let parameters_vec: DVector<f64> = particle.parameters.into();
                particle.weight * parameters_vec
            })
            .reduce(|acc, vec| acc + vec)
            .ok_or_else(|| AbcErr::KernelError("Failed to build weighted mean.".into()))?;

        let mut weighted_covariance: DMatrix<f64> = particles
            .iter()
            .map(|particle| {
                let params: DVector<f64> = particle.parameters.into();
                let offset = &params - &weighted_mean;
                particle.weight * &offset * offset.transpose()
            })
            .reduce(|acc, mat| acc + mat)
            .ok_or_else(|| AbcErr::KernelError("Failed to build weighted covariance.".into()))?;

        // Symmetric in exact arithmetic, mirror the upper triangle to remove rounding
        weighted_covariance.fill_lower_triangle_with_upper_triangle();

        // A parameter every particle agrees on exactly, e.g. a point-mass prior
        let first = particles[0].parameters.to_array();
        let active = (0..ParameterSet::DIMENSION)
            .filter(|&i| particles.iter().any(|p| p.parameters.to_array()[i] != first[i]))
            .collect();

        Ok(Self {
            weighted_mean,
            weighted_covariance,
            active,
        })
    }

    fn build_kernel_around_parameters(&self, parameters: &ParameterSet) -> AbcResult<OLCMKernel> {
        let local_covariance = {
            let particle_vector: DVector<f64> = (*parameters).into();
            let bias = (&self.weighted_mean - &particle_vector)
                * (&self.weighted_mean - &particle_vector).transpose();
            &self.weighted_covariance + bias
        };

        OLCMKernel::new(self.weighted_mean.clone(), local_covariance, self.active.clone())
    }
}
