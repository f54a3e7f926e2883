use std::fmt::Debug;
use std::path::Path;

use crate::{
    distance::Metric,
    error::{AbcErr, AbcResult},
    integrator::IntegratorConfig,
    kernel::KernelChoice,
    model::{CompartmentState, ModelTerms},
    prior::{PriorSpec, Priors},
    storage::config::StorageConfig,
    tolerance::{ToleranceConfig, ToleranceSchedule},
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub num_particles: u32,
    /// Maximum number of populations in a run.
    pub num_generations: u16,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Zero uses one worker per core.
    #[serde(default)]
    pub num_workers: usize,
}
impl Job {
    pub fn validate(&self) -> AbcResult<()> {
        if self.num_particles == 0 {
            return Err(AbcErr::ConfigurationError(
                "num_particles must be positive".into(),
            ));
        }
        if self.num_generations == 0 {
            return Err(AbcErr::ConfigurationError(
                "num_generations must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Abandon a generation whose acceptance rate is hopeless.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq)]
pub struct StallConfig {
    pub min_acceptance_rate: f64,
    /// Simulated attempts before the rate is judged.
    pub window: u64,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Algorithm {
    pub tolerance: ToleranceConfig,
    pub min_epsilon: f64,
    pub kernel: KernelChoice,
    /// Defaults to 1000 per particle.
    pub max_attempts_per_generation: Option<u64>,
    /// Trials evaluated per parallel batch, defaults to the population size.
    pub batch_size: Option<usize>,
    pub stall: Option<StallConfig>,
}
impl Algorithm {
    pub fn attempt_budget(&self, num_particles: u32) -> u64 {
        self.max_attempts_per_generation
            .unwrap_or(1000 * u64::from(num_particles))
    }

    pub fn batch_size(&self, num_particles: u32) -> usize {
        self.batch_size.unwrap_or(num_particles as usize)
    }

    pub fn validate(&self, job: &Job) -> AbcResult<()> {
        ToleranceSchedule::new(self.tolerance.clone(), self.min_epsilon)?;
        if self.attempt_budget(job.num_particles) < u64::from(job.num_particles) {
            return Err(AbcErr::ConfigurationError(format!(
                "max_attempts_per_generation ({}) cannot be below num_particles ({})",
                self.attempt_budget(job.num_particles),
                job.num_particles
            )));
        }
        if self.batch_size == Some(0) {
            return Err(AbcErr::ConfigurationError("batch_size must be positive".into()));
        }
        if let Some(stall) = self.stall {
            if !(stall.min_acceptance_rate > 0.0 && stall.min_acceptance_rate <= 1.0) {
                return Err(AbcErr::ConfigurationError(format!(
                    "Stall min_acceptance_rate must be within (0, 1], got {}",
                    stall.min_acceptance_rate
                )));
            }
            if stall.window == 0 {
                return Err(AbcErr::ConfigurationError("Stall window must be positive".into()));
            }
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Carrying capacity K.
    pub capacity: f64,
    #[serde(default)]
    pub initial_time: f64,
    pub initial_state: CompartmentState,
    #[serde(default)]
    pub terms: ModelTerms,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub job: Job,
    #[serde(default)]
    pub algorithm: Algorithm,
    pub model: ModelConfig,
    #[serde(default)]
    pub integrator: IntegratorConfig,
    #[serde(default)]
    pub distance: Metric,
    pub priors: PriorSpec,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}
impl Config {
    pub fn from_path<P>(config_path: P) -> AbcResult<Self>
    where
        P: AsRef<Path> + Debug,
    {
        let str = std::fs::read_to_string(config_path.as_ref()).map_err(|e| {
            AbcErr::ConfigurationError(format!(
                "Failed to load config from {:?}: {}",
                config_path, e
            ))
        })?;
        let config: Config = toml::from_str(&str)?;
        log::info!("Loading config: {:#?}", config);
        config.validate()?;
        Ok(config)
    }

    /// Everything that can be checked before a single simulation runs.
    pub fn validate(&self) -> AbcResult<()> {
        self.job.validate()?;
        self.algorithm.validate(&self.job)?;
        if !(self.model.capacity.is_finite() && self.model.capacity > 0.0) {
            return Err(AbcErr::ConfigurationError(format!(
                "Carrying capacity must be positive, got {}",
                self.model.capacity
            )));
        }
        self.model.initial_state.validate()?;
        Priors::new(self.priors.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::Prior;

    fn local_test_file_path(relative: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
    }

    #[test]
    fn load_config_from_toml() -> AbcResult<()> {
        let config = Config::from_path(local_test_file_path("resources/test/config_test.toml"))?;

        assert_eq!(200, config.job.num_particles);
        assert_eq!(Some(42), config.job.seed);
        assert_eq!(100.0, config.model.capacity);
        assert_eq!(CompartmentState::new(1.0, 20.0, 80.0, 0.0), config.model.initial_state);
        assert_eq!(Prior::Point { value: 0.1 }, config.priors.kde);
        assert_eq!(Metric::MeanSquared, config.distance);
        assert_eq!(KernelChoice::Olcm, config.algorithm.kernel);
        assert_eq!(
            ToleranceConfig::Adaptive {
                initial: Some(500.0),
                descent_percentile: 40
            },
            config.algorithm.tolerance
        );
        assert_eq!(0.005, config.integrator.max_step);
        assert_eq!(
            IntegratorConfig::default().negative_tolerance,
            config.integrator.negative_tolerance
        );
        assert!(config.model.terms.drug_damage);
        assert!(!config.model.terms.repair);
        Ok(())
    }

    #[test]
    fn defaults_fill_optional_sections() -> AbcResult<()> {
        let config: Config = toml::from_str(
            r#"
            [job]
            num_particles = 10
            num_generations = 3

            [model]
            capacity = 50.0
            initial_state = { C = 1.0, P = 5.0, Q = 5.0, QP = 0.0 }

            [priors]
            lambda_p = { type = "Uniform", low = 0.0, high = 1.0 }
            k_pq = { type = "Uniform", low = 0.0, high = 1.0 }
            k_qp_p = { type = "Uniform", low = 0.0, high = 1.0 }
            delta_qp = { type = "Uniform", low = 0.0, high = 1.0 }
            gamma = { type = "Uniform", low = 0.0, high = 1.0 }
            kde = { type = "Uniform", low = 0.0, high = 1.0 }
            "#,
        )?;
        config.validate()?;

        assert_eq!(Algorithm::default(), config.algorithm);
        assert_eq!(10_000, config.algorithm.attempt_budget(10));
        assert_eq!(10, config.algorithm.batch_size(10));
        assert_eq!(Metric::MeanAbsolute, config.distance);
        assert_eq!(None, config.storage);
        Ok(())
    }

    #[test]
    fn invalid_settings_rejected_up_front() {
        let base =
            Config::from_path(local_test_file_path("resources/test/config_test.toml")).unwrap();

        let mut zero_particles = base.clone();
        zero_particles.job.num_particles = 0;

        let mut zero_generations = base.clone();
        zero_generations.job.num_generations = 0;

        let mut no_capacity = base.clone();
        no_capacity.model.capacity = -5.0;

        let mut negative_state = base.clone();
        negative_state.model.initial_state.q = -1.0;

        let mut bad_prior = base.clone();
        bad_prior.priors.gamma = Prior::Uniform { low: -0.1, high: 1.0 };

        let mut rising_schedule = base.clone();
        rising_schedule.algorithm.tolerance = ToleranceConfig::Schedule {
            epsilons: vec![10.0, 20.0],
        };

        let mut bad_stall = base;
        bad_stall.algorithm.stall = Some(StallConfig {
            min_acceptance_rate: 0.0,
            window: 10,
        });

        for config in [
            zero_particles,
            zero_generations,
            no_capacity,
            negative_state,
            bad_prior,
            rising_schedule,
            bad_stall,
        ] {
            match config.validate() {
                Err(AbcErr::ConfigurationError(_)) => (),
                other => panic!("Expected configuration error, got {:?}", other),
            }
        }
    }
}
