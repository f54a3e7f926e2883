//! The ABC-SMC generation loop.
//!
//! Trial `k` of generation `t` draws from its own random stream, derived from
//! the run seed, so the accepted particles do not depend on how many workers
//! evaluate the trials.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::{prelude::*, ThreadPool};

use crate::{
    config::{Algorithm, Config, Job},
    error::{AbcErr, AbcResult, Diagnostics, Exhaustion},
    kernel::{
        componentwise::ComponentwiseKernel, olcm::OLCMKernelBuilder, Kernel, KernelBuilder,
        KernelChoice,
    },
    problem::Model,
    tolerance::ToleranceSchedule,
    types::{Particle, Population, PosteriorHistory, Termination},
    wrapper::GenWrapper,
};


enum TrialOutcome {
    Accepted(Particle),
    Rejected,
    NumericalFailure,
    /// Every redraw of a parent landed outside prior support.
    NoCandidate,
}

struct Trial {
    redraws: u64,
    outcome: TrialOutcome,
}

enum GenerationOutcome {
    Complete(Population),
    Stalled(Diagnostics, Vec<Particle>),
    Exhausted(Diagnostics, Vec<Particle>),
}

pub struct AbcSmc<'a, M> {
    model: &'a M,
    job: Job,
    algorithm: Algorithm,
    schedule: ToleranceSchedule,
    pool: ThreadPool,
    cancel: Arc<AtomicBool>,
}

impl<'a, M: Model> AbcSmc<'a, M> {
    pub fn new(model: &'a M, job: Job, algorithm: Algorithm) -> AbcResult<Self> {
        job.validate()?;
        algorithm.validate(&job)?;
        let schedule = ToleranceSchedule::new(algorithm.tolerance.clone(), algorithm.min_epsilon)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(job.num_workers)
            .build()?;

        Ok(Self {
            model,
            job,
            algorithm,
            schedule,
            pool,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn from_config(model: &'a M, config: &Config) -> AbcResult<Self> {
        Self::new(model, config.job.clone(), config.algorithm.clone())
    }

    /// Share a flag that stops the run at the next generation boundary.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(&self) -> AbcResult<PosteriorHistory> {
        let seed = match self.job.seed {
            Some(seed) => seed,
            None => rand::thread_rng().gen(),
        };
        log::info!("Starting run with seed {}", seed);
        self.continue_from(PosteriorHistory::new(seed))
    }

    /// Carries on from the last population of `history` until the run has
    /// `num_generations` populations in total.
    pub fn resume(&self, mut history: PosteriorHistory) -> AbcResult<PosteriorHistory> {
        if let Some(last) = history.populations.last_mut() {
            last.termination = None;
        }
        log::info!(
            "Resuming run with seed {} after {} generation(s)",
            history.seed,
            history.populations.len()
        );
        self.continue_from(history)
    }

    fn continue_from(&self, history: PosteriorHistory) -> AbcResult<PosteriorHistory> {
        match self.algorithm.kernel {
            KernelChoice::Componentwise => self.iterate::<ComponentwiseKernel>(history),
            KernelChoice::Olcm => self.iterate::<OLCMKernelBuilder>(history),
        }
    }

    fn iterate<Kb: KernelBuilder>(
        &self,
        mut history: PosteriorHistory,
    ) -> AbcResult<PosteriorHistory> {
        loop {
            if let Some(last) = history.last() {
                if self.schedule.reached_minimum(last.epsilon) {
                    return Ok(history.terminate(Termination::ReachedMinEpsilon));
                }
                if history.populations.len() >= usize::from(self.job.num_generations) {
                    return Ok(history.terminate(Termination::GenerationLimit));
                }
                if self.cancel.load(Ordering::SeqCst) {
                    log::warn!("Run cancelled after generation {}", last.generation);
                    return Ok(history.terminate(Termination::Cancelled));
                }
            }

            let generation = u16::try_from(history.populations.len()).map_err(|_| {
                AbcErr::ConfigurationError("History holds too many generations".into())
            })?;
            let epsilon = match self.schedule.epsilon_for(generation, history.last())? {
                Some(e) => e,
                None => return Ok(history.terminate(Termination::ScheduleExhausted)),
            };
            log::info!("Starting generation {} with epsilon {}", generation, epsilon);

            let outcome = {
                let source: GenWrapper<Kb::K> = match history.last() {
                    None => GenWrapper::from_prior(),
                    Some(previous) => GenWrapper::from_population::<Kb>(previous)?,
                };
                self.run_generation(generation, epsilon, &source, history.seed)?
            };

            match outcome {
                GenerationOutcome::Complete(population) => {
                    log::info!(
                        "Finished generation {}: epsilon {}, acceptance {:.4}, ESS {:.1}",
                        population.generation,
                        population.epsilon,
                        population.acceptance,
                        population.effective_sample_size()
                    );
                    history.populations.push(population);
                }
                GenerationOutcome::Stalled(diagnostics, _) if !history.populations.is_empty() => {
                    log::warn!("Acceptance stalled in {}", diagnostics);
                    return Ok(history.terminate(Termination::AcceptanceStalled));
                }
                GenerationOutcome::Stalled(diagnostics, partial) => {
                    log::error!("Acceptance stalled in first generation: {}", diagnostics);
                    return Err(AbcErr::GenerationExhaustion(Box::new(Exhaustion {
                        diagnostics,
                        history,
                        partial,
                    })));
                }
                GenerationOutcome::Exhausted(diagnostics, partial) => {
                    log::error!("Proposal budget exhausted: {}", diagnostics);
                    return Err(AbcErr::GenerationExhaustion(Box::new(Exhaustion {
                        diagnostics,
                        history,
                        partial,
                    })));
                }
            }
        }
    }

    fn run_generation<K: Kernel>(
        &self,
        generation: u16,
        epsilon: f64,
        source: &GenWrapper<K>,
        seed: u64,
    ) -> AbcResult<GenerationOutcome> {
        let target = self.job.num_particles as usize;
        let budget = self.algorithm.attempt_budget(self.job.num_particles);
        let batch_size = self.algorithm.batch_size(self.job.num_particles);

        let mut accepted: Vec<Particle> = Vec::with_capacity(target);
        let mut diagnostics = Diagnostics {
            generation,
            epsilon,
            accepted: 0,
            attempts: 0,
            out_of_support: 0,
            numerical_failures: 0,
        };
        let mut next_trial = 0usize;

        loop {
            let batch = next_trial..next_trial + batch_size;
            next_trial = batch.end;
            let trials: Vec<AbcResult<Trial>> = self.pool.install(|| {
                batch
                    .into_par_iter()
                    .map(|k| self.trial(source, epsilon, trial_rng(seed, generation, k as u64)))
                    .collect()
            });

            // Sequential, in trial order, so the outcome is independent of scheduling
            for trial in trials {
                if diagnostics.attempts + diagnostics.out_of_support >= budget {
                    diagnostics.accepted = accepted.len();
                    return Ok(GenerationOutcome::Exhausted(diagnostics, accepted));
                }

                let trial = trial?;
                diagnostics.out_of_support += trial.redraws;
                match trial.outcome {
                    TrialOutcome::NoCandidate => continue,
                    TrialOutcome::Accepted(particle) => accepted.push(particle),
                    TrialOutcome::Rejected => (),
                    TrialOutcome::NumericalFailure => diagnostics.numerical_failures += 1,
                }
                diagnostics.attempts += 1;

                if accepted.len() == target {
                    return Ok(GenerationOutcome::Complete(Population::new(
                        accepted,
                        generation,
                        epsilon,
                        diagnostics.attempts,
                    )?));
                }

                if let Some(stall) = self.algorithm.stall {
                    let rate = cast::f64(accepted.len()) / cast::f64(diagnostics.attempts);
                    if diagnostics.attempts >= stall.window && rate < stall.min_acceptance_rate {
                        diagnostics.accepted = accepted.len();
                        return Ok(GenerationOutcome::Stalled(diagnostics, accepted));
                    }
                }
            }
        }
    }

    fn trial<K: Kernel>(
        &self,
        source: &GenWrapper<K>,
        epsilon: f64,
        mut rng: SmallRng,
    ) -> AbcResult<Trial> {
        let (candidate, redraws) = source.propose(self.model, &mut rng);
        let parameters = match candidate {
            Some(p) => p,
            None => {
                log::debug!("No proposal inside prior support after {} redraws", redraws);
                return Ok(Trial {
                    redraws,
                    outcome: TrialOutcome::NoCandidate,
                });
            }
        };

        let distance = match self.model.score(&parameters) {
            Ok(d) => d,
            Err(AbcErr::NumericalFailure(msg)) => {
                log::debug!("Rejecting {:?}: {}", parameters, msg);
                return Ok(Trial {
                    redraws,
                    outcome: TrialOutcome::NumericalFailure,
                });
            }
            Err(e) => return Err(e),
        };

        let outcome = if distance <= epsilon {
            let weight = source.weigh(&parameters, self.model);
            if weight.is_finite() && weight > 0.0 {
                TrialOutcome::Accepted(Particle {
                    parameters,
                    weight,
                    distance,
                })
            } else {
                log::debug!("Rejecting {:?} with unusable weight {}", parameters, weight);
                TrialOutcome::Rejected
            }
        } else {
            TrialOutcome::Rejected
        };

        Ok(Trial { redraws, outcome })
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn trial_rng(seed: u64, generation: u16, trial: u64) -> SmallRng {
    let stream = splitmix64(splitmix64(splitmix64(seed) ^ u64::from(generation)) ^ trial);
    SmallRng::seed_from_u64(stream)
}
