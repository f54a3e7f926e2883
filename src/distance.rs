use serde::{Deserialize, Serialize};

use crate::{
    data::ObservedDataset,
    error::{AbcErr, AbcResult, TimeSpan},
    integrator::Trajectory,
};

/// Times closer than this are treated as the same sampling point.
const TIME_MATCH_TOLERANCE: f64 = 1e-9;

pub trait Distance: Sync {
    fn distance(&self, simulated: &Trajectory, observed: &ObservedDataset) -> AbcResult<f64>;
}

/// Mean discrepancy between simulated total burden and observed volume over
/// the time points both series share.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    #[default]
    MeanAbsolute,
    MeanSquared,
}

impl Distance for Metric {
    fn distance(&self, simulated: &Trajectory, observed: &ObservedDataset) -> AbcResult<f64> {
        let pairs = matched_pairs(simulated, observed);
        if pairs.is_empty() {
            return Err(AbcErr::DataMismatchError {
                simulated: TimeSpan::of(&simulated.times),
                observed: TimeSpan::of(&observed.times()),
            });
        }

        let total: f64 = pairs
            .iter()
            .map(|(sim, obs)| match self {
                Metric::MeanAbsolute => (sim - obs).abs(),
                Metric::MeanSquared => (sim - obs).powi(2),
            })
            .sum();
        Ok(total / cast::f64(pairs.len()))
    }
}

/// Walks both ascending series together, pairing simulated total burden with
/// the observed value at each shared time.
fn matched_pairs(simulated: &Trajectory, observed: &ObservedDataset) -> Vec<(f64, f64)> {
    let observed = observed.points();
    let mut pairs = Vec::with_capacity(observed.len().min(simulated.times.len()));
    let (mut i, mut j) = (0, 0);

    while i < simulated.times.len() && j < observed.len() {
        let (t_sim, t_obs) = (simulated.times[i], observed[j].time);
        if (t_sim - t_obs).abs() <= TIME_MATCH_TOLERANCE {
            pairs.push((simulated.states[i].total(), observed[j].value));
            i += 1;
            j += 1;
        } else if t_sim < t_obs {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
