use rand::Rng;

use crate::{
    config::{Config, ModelConfig},
    data::ObservedDataset,
    distance::{Distance, Metric},
    error::{AbcErr, AbcResult, TimeSpan},
    integrator::{Integrator, IntegratorConfig, Trajectory},
    model::{CompartmentState, ParameterSet, TumourModel},
    prior::Priors,
};

/// What the ABC engine needs from the thing being fitted.
pub trait Model: Sync {
    fn prior_sample(&self, rng: &mut impl Rng) -> ParameterSet;
    fn prior_density(&self, p: &ParameterSet) -> f64;

    /// Distance between a simulation under `p` and the observed data.
    ///
    /// `NumericalFailure` is treated by the engine as a rejection, any other
    /// error aborts the run.
    fn score(&self, p: &ParameterSet) -> AbcResult<f64>;
}

/// One patient's series fitted with the four-compartment model.
#[derive(Debug, Clone)]
pub struct TumourProblem<D: Distance = Metric> {
    model: TumourModel,
    integrator: Integrator,
    initial_state: CompartmentState,
    time_grid: Vec<f64>,
    priors: Priors,
    distance: D,
    observed: ObservedDataset,
}

impl TumourProblem<Metric> {
    pub fn from_config(config: &Config, observed: ObservedDataset) -> AbcResult<Self> {
        TumourProblem::new(
            &config.model,
            config.integrator,
            Priors::new(config.priors.clone())?,
            config.distance,
            observed,
        )
    }
}

impl<D: Distance> TumourProblem<D> {
    pub fn new(
        model_config: &ModelConfig,
        integrator_config: IntegratorConfig,
        priors: Priors,
        distance: D,
        observed: ObservedDataset,
    ) -> AbcResult<Self> {
        let model = TumourModel::new(model_config.capacity, model_config.terms)?;
        let integrator = Integrator::new(integrator_config)?;
        model_config.initial_state.validate()?;

        let t0 = model_config.initial_time;
        if !t0.is_finite() {
            return Err(AbcErr::ConfigurationError(format!(
                "Initial time must be finite, got {}",
                t0
            )));
        }

        let observed_times = observed.times();
        let later: Vec<f64> = observed_times
            .iter()
            .cloned()
            .filter(|t| *t > t0 + 1e-9)
            .collect();
        let at_start = observed_times.iter().any(|t| (t - t0).abs() <= 1e-9);
        if later.is_empty() && !at_start {
            return Err(AbcErr::DataMismatchError {
                simulated: Some(TimeSpan { first: t0, last: t0 }),
                observed: TimeSpan::of(&observed_times),
            });
        }

        let skipped = observed_times.iter().filter(|t| **t < t0 - 1e-9).count();
        if skipped > 0 {
            log::warn!(
                "{} observation(s) of {} precede the initial time {} and are not compared",
                skipped,
                observed.label(),
                t0
            );
        }

        let mut time_grid = Vec::with_capacity(later.len() + 1);
        time_grid.push(t0);
        time_grid.extend(later);

        Ok(Self {
            model,
            integrator,
            initial_state: model_config.initial_state,
            time_grid,
            priors,
            distance,
            observed,
        })
    }

    pub fn time_grid(&self) -> &[f64] {
        &self.time_grid
    }

    pub fn observed(&self) -> &ObservedDataset {
        &self.observed
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    pub fn simulate(&self, p: &ParameterSet) -> AbcResult<Trajectory> {
        self.integrator
            .simulate(&self.model, &self.initial_state, p, &self.time_grid)
    }
}

impl<D: Distance> Model for TumourProblem<D> {
    fn prior_sample(&self, rng: &mut impl Rng) -> ParameterSet {
        self.priors.sample(rng)
    }

    fn prior_density(&self, p: &ParameterSet) -> f64 {
        self.priors.density(p)
    }

    fn score(&self, p: &ParameterSet) -> AbcResult<f64> {
        let trajectory = self.simulate(p)?;
        self.distance.distance(&trajectory, &self.observed)
    }
}
