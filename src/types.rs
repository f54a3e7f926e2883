use std::fmt::Display;

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::{
    error::{AbcErr, AbcResult},
    model::ParameterSet,
};

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Particle {
    pub parameters: ParameterSet,
    pub weight: f64,
    pub distance: f64,
}

/// Why a run stopped, attached to its final population.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ReachedMinEpsilon,
    GenerationLimit,
    ScheduleExhausted,
    AcceptanceStalled,
    Cancelled,
}
impl Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Termination::ReachedMinEpsilon => "reached min epsilon",
            Termination::GenerationLimit => "stopped by generation limit",
            Termination::ScheduleExhausted => "epsilon schedule exhausted",
            Termination::AcceptanceStalled => "acceptance rate stalled",
            Termination::Cancelled => "cancelled",
        };
        write!(f, "{}", reason)
    }
}

/// A finalised generation: exactly `num_particles` particles with weights
/// summing to one.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Population {
    pub generation: u16,
    pub epsilon: f64,
    /// Accepted over simulated attempts.
    pub acceptance: f64,
    pub attempts: u64,
    normalised_particles: Vec<Particle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
}
impl Population {
    pub fn new(
        mut particles: Vec<Particle>,
        generation: u16,
        epsilon: f64,
        attempts: u64,
    ) -> AbcResult<Self> {
        let total_weight: f64 = particles.iter().map(|p| p.weight).sum();
        if !(total_weight.is_finite() && total_weight > 0.0) {
            return Err(AbcErr::KernelError(format!(
                "Generation {} has unusable total weight {}",
                generation, total_weight
            )));
        }

        // Normalise all the weights together
        particles
            .iter_mut()
            .for_each(|p| p.weight /= total_weight);

        let acceptance = if attempts == 0 {
            0.0
        } else {
            cast::f64(particles.len()) / cast::f64(attempts)
        };

        Ok(Self {
            generation,
            epsilon,
            acceptance,
            attempts,
            normalised_particles: particles,
            termination: None,
        })
    }

    pub fn normalised_particles(&self) -> &Vec<Particle> {
        &self.normalised_particles
    }

    pub fn distances(&self) -> Vec<f64> {
        self.normalised_particles.iter().map(|p| p.distance).collect()
    }

    pub fn weighted_mean(&self) -> ParameterSet {
        let mut mean = [0.0; 6];
        for particle in &self.normalised_particles {
            for (m, v) in mean.iter_mut().zip(particle.parameters.to_array()) {
                *m += particle.weight * v;
            }
        }
        ParameterSet::from_array(mean)
    }

    /// Kish effective sample size, `1 / sum(w^2)`.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_sq: f64 = self
            .normalised_particles
            .iter()
            .map(|p| p.weight * p.weight)
            .sum();
        1.0 / sum_sq
    }

    /// Percentile of the accepted distances, used to set the next tolerance.
    pub fn distance_percentile(&self, percentile: usize) -> AbcResult<f64> {
        let distances = self.distances();
        if let Some(bad) = distances.iter().find(|d| !(**d >= 0.0)) {
            return Err(AbcErr::KernelError(format!(
                "Encountered invalid distance ({}) when calculating new tolerance.",
                bad
            )));
        }

        let mut distribution = Data::new(distances);
        let value = distribution.percentile(percentile);
        if value.is_nan() {
            Err(AbcErr::KernelError(
                "Tolerance (from percentile) was not a number (NaN).".into(),
            ))
        } else {
            Ok(value)
        }
    }
}

/// One population per completed generation, oldest first.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct PosteriorHistory {
    /// Run-level seed every random stream was derived from.
    pub seed: u64,
    pub populations: Vec<Population>,
}
impl PosteriorHistory {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            populations: Vec::new(),
        }
    }

    pub fn last(&self) -> Option<&Population> {
        self.populations.last()
    }

    pub fn epsilons(&self) -> Vec<f64> {
        self.populations.iter().map(|p| p.epsilon).collect()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.last().and_then(|p| p.termination)
    }

    pub(crate) fn terminate(mut self, reason: Termination) -> Self {
        if let Some(last) = self.populations.last_mut() {
            last.termination = Some(reason);
        }
        self
    }
}

#[cfg(test)]
pub(crate) mod test_helper {
    use super::*;

    pub fn params(x: f64) -> ParameterSet {
        ParameterSet::from_array([x, 0.1, 0.05, 0.1, 0.3, 0.1])
    }

    pub fn make_dummy_population(generation: u16, epsilon: f64) -> Population {
        let particles = vec![
            Particle {
                parameters: params(1.0),
                weight: 3.0,
                distance: 4.0,
            },
            Particle {
                parameters: params(2.0),
                weight: 1.0,
                distance: 2.0,
            },
        ];
        Population::new(particles, generation, epsilon, 8).unwrap()
    }
}
