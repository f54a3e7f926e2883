use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};

use crate::{
    error::{AbcErr, AbcResult},
    kernel::{Kernel, KernelBuilder},
    model::ParameterSet,
    problem::Model,
    types::{Particle, Population},
};

/// Redraws of a parent allowed within one trial before it gives up.
pub const MAX_REDRAWS: u64 = 1000;

/// Source of proposals for a generation: the prior for generation zero,
/// otherwise the previous population.
pub enum GenWrapper<'a, K> {
    Prior,
    Emp(Box<Empirical<'a, K>>),
}
impl<'a, K: Kernel> GenWrapper<'a, K> {
    pub fn from_prior() -> Self {
        Self::Prior
    }

    pub fn from_population<Kb>(population: &'a Population) -> AbcResult<Self>
    where
        Kb: KernelBuilder<K = K>,
    {
        Ok(Self::Emp(Box::new(Empirical::new::<Kb>(population)?)))
    }

    /// A candidate inside prior support, plus the number of out-of-support
    /// perturbations discarded on the way. `None` if every redraw missed.
    pub fn propose<M: Model>(&self, model: &M, rng: &mut impl Rng) -> (Option<ParameterSet>, u64) {
        match self {
            // No perturbation when simply sampling from the prior
            GenWrapper::Prior => (Some(model.prior_sample(rng)), 0),
            GenWrapper::Emp(g) => {
                for redraws in 0..MAX_REDRAWS {
                    let (parent, kernel) = g.sample_by_weight(rng);
                    let candidate = kernel.perturb(&parent.parameters, rng);
                    if model.prior_density(&candidate) > 0.0 {
                        return (Some(candidate), redraws);
                    }
                }
                (None, MAX_REDRAWS)
            }
        }
    }

    /// Not-normalised importance weight of an accepted candidate.
    pub fn weigh<M: Model>(&self, parameters: &ParameterSet, model: &M) -> f64 {
        match self {
            GenWrapper::Prior => 1.0,
            GenWrapper::Emp(g) => g.weigh(parameters, model),
        }
    }
}

pub struct Empirical<'a, K> {
    population: &'a Population,
    kernels: Vec<K>,
    weight_dist: WeightedIndex<f64>,
}
impl<'a, K: Kernel> Empirical<'a, K> {
    pub fn new<Kb>(population: &'a Population) -> AbcResult<Self>
    where
        Kb: KernelBuilder<K = K>,
    {
        let particles = population.normalised_particles();
        let builder = Kb::new(particles)?;
        let kernels = particles
            .iter()
            .map(|p| builder.build_kernel_around_parameters(&p.parameters))
            .collect::<AbcResult<Vec<K>>>()?;

        let weight_dist = WeightedIndex::new(particles.iter().map(|p| p.weight)).map_err(|e| {
            AbcErr::KernelError(format!(
                "Cannot sample from generation {}: {}",
                population.generation, e
            ))
        })?;

        Ok(Self {
            population,
            kernels,
            weight_dist,
        })
    }

    pub fn generation_number(&self) -> u16 {
        self.population.generation
    }

    fn sample_by_weight(&self, rng: &mut impl Rng) -> (&Particle, &K) {
        let index = self.weight_dist.sample(rng);
        (&self.population.normalised_particles()[index], &self.kernels[index])
    }

    fn weigh<M: Model>(&self, parameters: &ParameterSet, model: &M) -> f64 {
        let prior_prob = model.prior_density(parameters);
        let denominator: f64 = self
            .population
            .normalised_particles()
            .iter()
            .zip(&self.kernels)
            .map(|(prev_gen_particle, kernel)| {
                let density = kernel.pert_density(&prev_gen_particle.parameters, parameters);
                prev_gen_particle.weight * density
            })
            .sum();
        prior_prob / denominator
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        kernel::componentwise::ComponentwiseKernel,
        problem::test_helper::{problem, true_parameters, wide_priors},
        types::test_helper::params,
    };

    fn two_particle_population() -> Population {
        let particles = vec![
            Particle {
                parameters: params(0.1),
                weight: 1.0,
                distance: 1.0,
            },
            Particle {
                parameters: params(0.3),
                weight: 1.0,
                distance: 2.0,
            },
        ];
        Population::new(particles, 0, 5.0, 2).unwrap()
    }

    #[test]
    fn prior_proposals_are_unperturbed_with_unit_weight() {
        let problem = problem(wide_priors(), &[1.0]);
        let wrapper: GenWrapper<ComponentwiseKernel> = GenWrapper::from_prior();
        let mut rng = SmallRng::seed_from_u64(3);

        let (proposal, redraws) = wrapper.propose(&problem, &mut rng);
        let proposal = proposal.unwrap();
        assert_eq!(0, redraws);
        assert_eq!(0.05, proposal.k_qp_p);
        assert_eq!(1.0, wrapper.weigh(&proposal, &problem));
    }

    #[test]
    fn empirical_proposals_stay_in_support() {
        let problem = problem(wide_priors(), &[1.0]);
        let population = two_particle_population();
        let wrapper = GenWrapper::from_population::<ComponentwiseKernel>(&population).unwrap();
        let mut rng = SmallRng::seed_from_u64(11);

        for _ in 0..200 {
            let (proposal, _) = wrapper.propose(&problem, &mut rng);
            let proposal = proposal.unwrap();
            assert!(problem.priors().density(&proposal) > 0.0);
            // Point-mass dimensions never move
            assert_eq!(true_parameters().kde, proposal.kde);
        }
    }

    #[test]
    fn importance_weight_matches_hand_calculation() {
        let problem = problem(wide_priors(), &[1.0]);
        let population = two_particle_population();
        let wrapper = GenWrapper::from_population::<ComponentwiseKernel>(&population).unwrap();

        // Only lambda_p varies: weighted variance 0.01, kernel sd sqrt(0.02)
        let candidate = params(0.2);
        let sd = 0.02f64.sqrt();
        let normal_pdf =
            |x: f64| (-0.5 * (x / sd).powi(2)).exp() / (sd * (2.0 * std::f64::consts::PI).sqrt());
        let denominator = 0.5 * normal_pdf(0.1) + 0.5 * normal_pdf(-0.1);
        let expected = problem.priors().density(&candidate) / denominator;

        let actual = wrapper.weigh(&candidate, &problem);
        assert!((expected - actual).abs() / expected < 1e-9);
    }

    #[test]
    fn gives_up_after_bounded_redraws() {
        // Every perturbation of lambda_p leaves [0, 0.5] when the parents sit far outside it
        let problem = problem(wide_priors(), &[1.0]);
        let particles = vec![
            Particle {
                parameters: params(100.0),
                weight: 1.0,
                distance: 1.0,
            },
            Particle {
                parameters: params(100.1),
                weight: 1.0,
                distance: 1.0,
            },
        ];
        let population = Population::new(particles, 0, 5.0, 2).unwrap();
        let wrapper = GenWrapper::from_population::<ComponentwiseKernel>(&population).unwrap();

        let (proposal, redraws) = wrapper.propose(&problem, &mut SmallRng::seed_from_u64(5));
        assert_eq!(None, proposal);
        assert_eq!(MAX_REDRAWS, redraws);
    }
}
