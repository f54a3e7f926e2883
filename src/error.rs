use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::types::{Particle, PosteriorHistory};

pub type AbcResult<T> = Result<T, AbcErr>;

/// First and last time point of a series.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub first: f64,
    pub last: f64,
}
impl TimeSpan {
    pub fn of(times: &[f64]) -> Option<Self> {
        match (times.first(), times.last()) {
            (Some(&first), Some(&last)) => Some(Self { first, last }),
            _ => None,
        }
    }
}
impl Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// Where a generation was when it stopped making progress.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub generation: u16,
    pub epsilon: f64,
    pub accepted: usize,
    pub attempts: u64,
    pub out_of_support: u64,
    pub numerical_failures: u64,
}
impl Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "generation {}, epsilon {}, {} accepted after {} attempts \
             ({} out of prior support, {} numerical failures)",
            self.generation,
            self.epsilon,
            self.accepted,
            self.attempts,
            self.out_of_support,
            self.numerical_failures
        )
    }
}

/// Everything that had been built when a generation ran out of proposals.
#[derive(Debug)]
pub struct Exhaustion {
    pub diagnostics: Diagnostics,
    /// Completed generations before the exhausted one.
    pub history: PosteriorHistory,
    /// Accepted, not-normalised particles of the exhausted generation.
    pub partial: Vec<Particle>,
}

#[derive(Debug)]
pub enum AbcErr {
    ConfigurationError(String),

    /// Trajectory became non-finite or materially negative
    NumericalFailure(String),

    DataMismatchError {
        simulated: Option<TimeSpan>,
        observed: Option<TimeSpan>,
    },
    GenerationExhaustion(Box<Exhaustion>),
    KernelError(String),
    VectorConversionError(String),
    StorageError(String),
    InfrastructureError(String),
}

fn span_or_empty(span: &Option<TimeSpan>) -> String {
    span.map(|s| s.to_string()).unwrap_or_else(|| "<empty>".into())
}

impl Display for AbcErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigurationError(ref msg) => write!(f, "ConfigurationErr: {}", msg),
            Self::NumericalFailure(ref msg) => write!(f, "NumericalFailure: {}", msg),
            Self::DataMismatchError {
                ref simulated,
                ref observed,
            } => write!(
                f,
                "DataMismatchErr: simulated times {} share no points with observed times {}",
                span_or_empty(simulated),
                span_or_empty(observed)
            ),
            Self::GenerationExhaustion(ref exhaustion) => {
                write!(f, "GenerationExhaustion: {}", exhaustion.diagnostics)
            }
            Self::KernelError(ref msg) => write!(f, "KernelErr: {}", msg),
            Self::VectorConversionError(ref msg) => write!(f, "VectorConversionErr: {}", msg),
            Self::StorageError(ref msg) => write!(f, "StorageErr: {}", msg),
            Self::InfrastructureError(ref msg) => write!(f, "InfrastructureErr: {}", msg),
        }
    }
}

impl std::error::Error for AbcErr {}

impl From<serde_json::Error> for AbcErr {
    fn from(value: serde_json::Error) -> Self {
        AbcErr::InfrastructureError(format!("Serde Error: {}", value))
    }
}

impl From<std::io::Error> for AbcErr {
    fn from(value: std::io::Error) -> Self {
        AbcErr::InfrastructureError(format!("IO Error: {}", value))
    }
}

impl From<regex::Error> for AbcErr {
    fn from(value: regex::Error) -> Self {
        AbcErr::InfrastructureError(format!("RegEx Error: {}", value))
    }
}

impl From<std::num::ParseIntError> for AbcErr {
    fn from(value: std::num::ParseIntError) -> Self {
        AbcErr::StorageError(format!("Parse Int Error: {}", value))
    }
}

impl From<toml::de::Error> for AbcErr {
    fn from(value: toml::de::Error) -> Self {
        AbcErr::ConfigurationError(format!("Failed to parse config: {}", value))
    }
}

impl From<statrs::StatsError> for AbcErr {
    fn from(value: statrs::StatsError) -> Self {
        AbcErr::ConfigurationError(format!("Invalid distribution: {}", value))
    }
}

impl From<rayon::ThreadPoolBuildError> for AbcErr {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        AbcErr::InfrastructureError(format!("Failed to build worker pool: {}", value))
    }
}
