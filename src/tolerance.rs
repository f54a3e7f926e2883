use serde::{Deserialize, Serialize};

use crate::{
    error::{AbcErr, AbcResult},
    types::Population,
};

fn default_percentile() -> usize {
    50
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ToleranceConfig {
    /// Fixed, non-increasing tolerance per generation.
    Schedule { epsilons: Vec<f64> },
    /// Percentile of the previous generation's accepted distances.
    Adaptive {
        /// Tolerance of generation zero; accepts any finite distance if unset.
        #[serde(default)]
        initial: Option<f64>,
        #[serde(default = "default_percentile")]
        descent_percentile: usize,
    },
}
impl Default for ToleranceConfig {
    fn default() -> Self {
        ToleranceConfig::Adaptive {
            initial: None,
            descent_percentile: default_percentile(),
        }
    }
}
impl ToleranceConfig {
    pub fn validate(&self) -> AbcResult<()> {
        match self {
            ToleranceConfig::Schedule { epsilons } => {
                if epsilons.is_empty() {
                    return Err(AbcErr::ConfigurationError(
                        "Epsilon schedule must not be empty".into(),
                    ));
                }
                if let Some(e) = epsilons.iter().find(|e| !(**e >= 0.0)) {
                    return Err(AbcErr::ConfigurationError(format!(
                        "Epsilon schedule contains invalid value {}",
                        e
                    )));
                }
                if let Some(w) = epsilons.windows(2).find(|w| w[1] > w[0]) {
                    return Err(AbcErr::ConfigurationError(format!(
                        "Epsilon schedule must be non-increasing, found {} followed by {}",
                        w[0], w[1]
                    )));
                }
            }
            ToleranceConfig::Adaptive {
                initial,
                descent_percentile,
            } => {
                if let Some(e) = initial.filter(|e| !(*e >= 0.0)) {
                    return Err(AbcErr::ConfigurationError(format!(
                        "Initial epsilon must be non-negative, got {}",
                        e
                    )));
                }
                if *descent_percentile > 100 {
                    return Err(AbcErr::ConfigurationError(format!(
                        "Descent percentile must be within 0..=100, got {}",
                        descent_percentile
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Produces one tolerance per generation, never increasing.
#[derive(Debug, Clone)]
pub struct ToleranceSchedule {
    config: ToleranceConfig,
    min_epsilon: f64,
}
impl ToleranceSchedule {
    pub fn new(config: ToleranceConfig, min_epsilon: f64) -> AbcResult<Self> {
        config.validate()?;
        if !(min_epsilon >= 0.0 && min_epsilon.is_finite()) {
            return Err(AbcErr::ConfigurationError(format!(
                "min_epsilon must be finite and non-negative, got {}",
                min_epsilon
            )));
        }
        Ok(Self {
            config,
            min_epsilon,
        })
    }

    pub fn min_epsilon(&self) -> f64 {
        self.min_epsilon
    }

    /// `None` once an explicit schedule has run out.
    pub fn epsilon_for(
        &self,
        generation: u16,
        previous: Option<&Population>,
    ) -> AbcResult<Option<f64>> {
        let (candidate, previous) = match (&self.config, previous) {
            (ToleranceConfig::Schedule { epsilons }, prev) => {
                match epsilons.get(usize::from(generation)) {
                    Some(e) => (*e, prev),
                    None => return Ok(None),
                }
            }
            (ToleranceConfig::Adaptive { initial, .. }, None) => {
                (initial.unwrap_or(f64::MAX), None)
            }
            (
                ToleranceConfig::Adaptive {
                    descent_percentile, ..
                },
                Some(prev),
            ) => (prev.distance_percentile(*descent_percentile)?, Some(prev)),
        };

        let mut epsilon = candidate;
        if let Some(prev) = previous {
            if epsilon > prev.epsilon {
                log::warn!(
                    "Derived epsilon {} exceeds previous {}, keeping previous",
                    epsilon,
                    prev.epsilon
                );
                epsilon = prev.epsilon;
            }
        }
        Ok(Some(epsilon.max(self.min_epsilon)))
    }

    pub fn reached_minimum(&self, epsilon: f64) -> bool {
        epsilon <= self.min_epsilon
    }
}
