use rand::Rng;
use statrs::distribution::{Continuous, Normal};

use crate::{error::AbcResult, model::ParameterSet, types::Particle};

use super::{check_normalised, Kernel, KernelBuilder};

/// Independent Gaussian jitter per parameter.
///
/// A parameter whose weighted variance is zero is left untouched, and its
/// density is an indicator on the parent value.
#[derive(Debug, Clone)]
pub struct ComponentwiseKernel {
    std_devs: [f64; 6],
    normals: [Option<Normal>; 6],
}
impl ComponentwiseKernel {
    pub fn from_std_devs(std_devs: [f64; 6]) -> AbcResult<Self> {
        let mut normals: [Option<Normal>; 6] = Default::default();
        for (normal, sd) in normals.iter_mut().zip(std_devs) {
            if sd > 0.0 {
                *normal = Some(Normal::new(0.0, sd)?);
            }
        }
        Ok(Self { std_devs, normals })
    }

    pub fn std_devs(&self) -> [f64; 6] {
        self.std_devs
    }
}

impl Kernel for ComponentwiseKernel {
    fn perturb(&self, parameters: &ParameterSet, rng: &mut impl Rng) -> ParameterSet {
        let mut values = parameters.to_array();
        for (v, normal) in values.iter_mut().zip(&self.normals) {
            if let Some(n) = normal {
                *v += rng.sample(n);
            }
        }
        ParameterSet::from_array(values)
    }

    fn pert_density(&self, from: &ParameterSet, to: &ParameterSet) -> f64 {
        from.to_array()
            .iter()
            .zip(to.to_array())
            .zip(&self.normals)
            .map(|((a, b), normal)| match normal {
                Some(n) => n.pdf(b - a),
                None if b == *a => 1.0,
                None => 0.0,
            })
            .product()
    }
}

impl KernelBuilder for ComponentwiseKernel {
    type K = ComponentwiseKernel;

    fn new(particles: &[Particle]) -> AbcResult<Self> {
        check_normalised(particles)?;

        let mut mean = [0.0; 6];
        for particle in particles {
            for (m, v) in mean.iter_mut().zip(particle.parameters.to_array()) {
                *m += particle.weight * v;
            }
        }

        let mut variance = [0.0; 6];
        for particle in particles {
            for ((var, m), v) in variance.iter_mut().zip(mean).zip(particle.parameters.to_array()) {
                *var += particle.weight * (v - m).powi(2);
            }
        }

        // Identical values must give exactly zero spread, whatever the rounding in the mean
        let first = particles[0].parameters.to_array();
        for (i, var) in variance.iter_mut().enumerate() {
            if particles.iter().all(|p| p.parameters.to_array()[i] == first[i]) {
                *var = 0.0;
            }
        }

        let std_devs = variance.map(|var| (2.0 * var).sqrt());
        log::debug!("Componentwise kernel standard deviations: {:?}", std_devs);
        ComponentwiseKernel::from_std_devs(std_devs)
    }

    /// Same kernel whatever the parent.
    fn build_kernel_around_parameters(&self, _: &ParameterSet) -> AbcResult<Self::K> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::types::test_helper::params;

    fn particle(x: f64, weight: f64) -> Particle {
        Particle {
            parameters: params(x),
            weight,
            distance: 0.0,
        }
    }

    #[test]
    fn twice_weighted_variance() -> AbcResult<()> {
        let particles = vec![particle(1.0, 0.5), particle(3.0, 0.5)];
        let kernel = ComponentwiseKernel::new(&particles)?;
        let sds = kernel.std_devs();

        // variance 1, doubled
        assert!((sds[0] - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!([0.0; 5], sds[1..]);
        Ok(())
    }

    #[test]
    fn zero_variance_dimensions_are_not_perturbed() -> AbcResult<()> {
        let particles = vec![particle(1.0, 0.25), particle(3.0, 0.75)];
        let kernel = ComponentwiseKernel::new(&particles)?;
        let mut rng = SmallRng::seed_from_u64(3);
        let parent = params(2.0);

        for _ in 0..100 {
            let child = kernel.perturb(&parent, &mut rng);
            assert_eq!(parent.to_array()[1..], child.to_array()[1..]);
            assert!(kernel.pert_density(&parent, &child) > 0.0);
        }

        let mut moved = parent;
        moved.gamma += 0.01;
        assert_eq!(0.0, kernel.pert_density(&parent, &moved));
        Ok(())
    }

    #[test]
    fn density_is_symmetric() -> AbcResult<()> {
        let kernel = ComponentwiseKernel::from_std_devs([0.1, 0.2, 0.3, 0.4, 0.5, 0.6])?;
        let a = ParameterSet::from_array([0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let b = ParameterSet::from_array([0.15, 0.1, 0.3, 0.9, 0.45, 0.0]);
        assert_eq!(kernel.pert_density(&a, &b), kernel.pert_density(&b, &a));
        Ok(())
    }

    #[test]
    fn reject_unnormalised_population() {
        let particles = vec![particle(1.0, 0.5), particle(3.0, 0.2)];
        assert!(ComponentwiseKernel::new(&particles).is_err());
    }
}
