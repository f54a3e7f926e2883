//! Prior distributions over the six rate constants.
//!
//! Every family has non-negative support, so a perturbed parameter set with a
//! negative rate always has zero prior density.

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, LogNormal, Uniform};

use crate::{
    error::{AbcErr, AbcResult},
    model::ParameterSet,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type")]
pub enum Prior {
    Uniform { low: f64, high: f64 },
    LogUniform { low: f64, high: f64 },
    LogNormal { location: f64, scale: f64 },
    /// Zero-variance point mass.
    Point { value: f64 },
}

/// Prior for each parameter, as written in configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriorSpec {
    pub lambda_p: Prior,
    pub k_pq: Prior,
    pub k_qp_p: Prior,
    pub delta_qp: Prior,
    pub gamma: Prior,
    pub kde: Prior,
}
impl PriorSpec {
    fn in_order(&self) -> [Prior; 6] {
        [
            self.lambda_p,
            self.k_pq,
            self.k_qp_p,
            self.delta_qp,
            self.gamma,
            self.kde,
        ]
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Uniform(Uniform),
    LogUniform { log_low: f64, log_high: f64 },
    LogNormal(LogNormal),
    Point(f64),
}
impl Compiled {
    fn new(name: &str, prior: &Prior) -> AbcResult<Self> {
        let invalid = |reason: &str| {
            Err(AbcErr::ConfigurationError(format!(
                "Invalid prior {:?} for {}: {}",
                prior, name, reason
            )))
        };
        match *prior {
            Prior::Uniform { low, high } => {
                if !(low >= 0.0 && low < high && high.is_finite()) {
                    return invalid("require 0 <= low < high < inf");
                }
                Ok(Compiled::Uniform(Uniform::new(low, high)?))
            }
            Prior::LogUniform { low, high } => {
                if !(low > 0.0 && low < high && high.is_finite()) {
                    return invalid("require 0 < low < high < inf");
                }
                Ok(Compiled::LogUniform {
                    log_low: low.ln(),
                    log_high: high.ln(),
                })
            }
            Prior::LogNormal { location, scale } => {
                if !(location.is_finite() && scale.is_finite() && scale > 0.0) {
                    return invalid("require finite location and 0 < scale < inf");
                }
                Ok(Compiled::LogNormal(LogNormal::new(location, scale)?))
            }
            Prior::Point { value } => {
                if !(value >= 0.0 && value.is_finite()) {
                    return invalid("require 0 <= value < inf");
                }
                Ok(Compiled::Point(value))
            }
        }
    }

    fn sample(&self, rng: &mut impl Rng) -> f64 {
        match self {
            Compiled::Uniform(d) => rng.sample(d),
            Compiled::LogUniform { log_low, log_high } => rng.gen_range(*log_low..*log_high).exp(),
            Compiled::LogNormal(d) => rng.sample(d),
            Compiled::Point(v) => *v,
        }
    }

    fn density(&self, x: f64) -> f64 {
        match self {
            Compiled::Uniform(d) => d.pdf(x),
            Compiled::LogUniform { log_low, log_high } => {
                if x > 0.0 && x.ln() >= *log_low && x.ln() <= *log_high {
                    1.0 / (x * (log_high - log_low))
                } else {
                    0.0
                }
            }
            Compiled::LogNormal(d) => d.pdf(x),
            Compiled::Point(v) => {
                if x == *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Joint prior: independent across parameters.
#[derive(Debug, Clone)]
pub struct Priors {
    spec: PriorSpec,
    compiled: [Compiled; 6],
}
impl Priors {
    pub fn new(spec: PriorSpec) -> AbcResult<Self> {
        let priors = spec.in_order();
        let mut compiled = Vec::with_capacity(ParameterSet::DIMENSION);
        for (name, prior) in ParameterSet::NAMES.iter().zip(priors.iter()) {
            compiled.push(Compiled::new(name, prior)?);
        }
        let compiled: [Compiled; 6] = compiled.try_into().map_err(|_| {
            AbcErr::ConfigurationError("Expected exactly six priors".into())
        })?;
        Ok(Self { spec, compiled })
    }

    pub fn spec(&self) -> &PriorSpec {
        &self.spec
    }

    pub fn sample(&self, rng: &mut impl Rng) -> ParameterSet {
        let mut values = [0.0; 6];
        for (value, prior) in values.iter_mut().zip(&self.compiled) {
            *value = prior.sample(rng);
        }
        ParameterSet::from_array(values)
    }

    pub fn density(&self, params: &ParameterSet) -> f64 {
        params
            .to_array()
            .iter()
            .zip(&self.compiled)
            .map(|(x, prior)| prior.density(*x))
            .product()
    }
}
