//! Four-compartment tumour response model.
//!
//! ```text
//! dC  = -KDE * C
//! dP  = lambda_P * P * (1 - total/K) + k_QP_P*QP - k_PQ*P - gamma*C*KDE*P
//! dQ  = k_PQ*P - gamma*C*KDE*Q
//! dQP = gamma*C*KDE*Q - k_QP_P*QP - delta_QP*QP
//! ```
//! where `total = P + Q + QP` is always taken from the state being evaluated.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{AbcErr, AbcResult};

/// Drug concentration and the three tissue compartments.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
    derive_more::Add,
    derive_more::Sub,
    derive_more::Mul,
)]
pub struct CompartmentState {
    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "Q")]
    pub q: f64,
    #[serde(rename = "QP")]
    pub qp: f64,
}
impl CompartmentState {
    pub fn new(c: f64, p: f64, q: f64, qp: f64) -> Self {
        Self { c, p, q, qp }
    }

    /// Total tumour burden, the observable compared against measured volume.
    pub fn total(&self) -> f64 {
        self.p + self.q + self.qp
    }

    pub fn is_finite(&self) -> bool {
        self.c.is_finite() && self.p.is_finite() && self.q.is_finite() && self.qp.is_finite()
    }

    pub fn min_component(&self) -> f64 {
        self.c.min(self.p).min(self.q).min(self.qp)
    }

    pub(crate) fn clamp_non_negative(self) -> Self {
        Self {
            c: self.c.max(0.0),
            p: self.p.max(0.0),
            q: self.q.max(0.0),
            qp: self.qp.max(0.0),
        }
    }

    pub fn validate(&self) -> AbcResult<()> {
        if !self.is_finite() || self.min_component() < 0.0 {
            return Err(AbcErr::ConfigurationError(format!(
                "Initial state must be finite and non-negative, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Kinetic rate constants inferred by the ABC run.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, derive_more::Add, derive_more::Sub,
)]
pub struct ParameterSet {
    pub lambda_p: f64,
    pub k_pq: f64,
    pub k_qp_p: f64,
    pub delta_qp: f64,
    pub gamma: f64,
    pub kde: f64,
}
impl ParameterSet {
    pub const NAMES: [&'static str; 6] = ["lambda_p", "k_pq", "k_qp_p", "delta_qp", "gamma", "kde"];
    pub const DIMENSION: usize = 6;

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.lambda_p,
            self.k_pq,
            self.k_qp_p,
            self.delta_qp,
            self.gamma,
            self.kde,
        ]
    }

    pub fn from_array(values: [f64; 6]) -> Self {
        let [lambda_p, k_pq, k_qp_p, delta_qp, gamma, kde] = values;
        Self {
            lambda_p,
            k_pq,
            k_qp_p,
            delta_qp,
            gamma,
            kde,
        }
    }
}

impl TryFrom<DVector<f64>> for ParameterSet {
    type Error = AbcErr;

    fn try_from(value: DVector<f64>) -> Result<Self, Self::Error> {
        if value.len() != ParameterSet::DIMENSION {
            return Err(AbcErr::VectorConversionError(format!(
                "Wrong number of arguments.  Expected {}, got {}",
                ParameterSet::DIMENSION,
                value.len()
            )));
        }
        let mut values = [0.0; 6];
        values.copy_from_slice(value.as_slice());
        Ok(ParameterSet::from_array(values))
    }
}

impl From<ParameterSet> for DVector<f64> {
    fn from(value: ParameterSet) -> Self {
        DVector::from_column_slice(&value.to_array())
    }
}

/// Which terms of the rate equations are switched on.
///
/// Therapy variants are expressed by switching terms off rather than by
/// separate model types. The default enables everything.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ModelTerms {
    pub logistic_growth: bool,
    /// `k_PQ` transfer from P to Q
    pub quiescence: bool,
    /// `k_QP_P` transfer from QP back to P
    pub repair: bool,
    /// `delta_QP` loss of damaged tissue
    pub elimination: bool,
    /// every `gamma` term
    pub drug_damage: bool,
}
impl Default for ModelTerms {
    fn default() -> Self {
        Self {
            logistic_growth: true,
            quiescence: true,
            repair: true,
            elimination: true,
            drug_damage: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TumourModel {
    capacity: f64,
    terms: ModelTerms,
}
impl TumourModel {
    pub fn new(capacity: f64, terms: ModelTerms) -> AbcResult<Self> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(AbcErr::ConfigurationError(format!(
                "Carrying capacity K must be positive and finite, got {}",
                capacity
            )));
        }
        Ok(Self { capacity, terms })
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn terms(&self) -> &ModelTerms {
        &self.terms
    }

    pub fn rates(&self, state: &CompartmentState, params: &ParameterSet) -> CompartmentState {
        let on = |flag: bool| if flag { 1.0 } else { 0.0 };
        let terms = &self.terms;

        let total = state.total();
        let headroom = 1.0 - total / self.capacity;
        let growth = on(terms.logistic_growth) * params.lambda_p * state.p * headroom;
        let to_quiescent = on(terms.quiescence) * params.k_pq * state.p;
        let repaired = on(terms.repair) * params.k_qp_p * state.qp;
        let eliminated = on(terms.elimination) * params.delta_qp * state.qp;
        let damage = on(terms.drug_damage) * params.gamma * state.c * params.kde;

        CompartmentState {
            c: -params.kde * state.c,
            p: growth + repaired - to_quiescent - damage * state.p,
            q: to_quiescent - damage * state.q,
            qp: damage * state.q - repaired - eliminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterSet {
        ParameterSet {
            lambda_p: 0.1,
            k_pq: 0.1,
            k_qp_p: 0.05,
            delta_qp: 0.1,
            gamma: 0.3,
            kde: 0.1,
        }
    }

    #[test]
    fn rates_match_hand_calculation() {
        let model = TumourModel::new(100.0, ModelTerms::default()).unwrap();
        let state = CompartmentState::new(1.0, 20.0, 80.0, 0.0);
        let d = model.rates(&state, &params());

        // total = 100 = K so logistic growth vanishes
        assert!((d.c - -0.1).abs() < 1e-12);
        assert!((d.p - (-0.1 * 20.0 - 0.3 * 0.1 * 20.0)).abs() < 1e-12);
        assert!((d.q - (0.1 * 20.0 - 0.3 * 0.1 * 80.0)).abs() < 1e-12);
        assert!((d.qp - 0.3 * 0.1 * 80.0).abs() < 1e-12);
    }

    #[test]
    fn total_taken_from_evaluated_state() {
        let model = TumourModel::new(100.0, ModelTerms::default()).unwrap();
        let p = ParameterSet {
            lambda_p: 1.0,
            k_pq: 0.0,
            k_qp_p: 0.0,
            delta_qp: 0.0,
            gamma: 0.0,
            kde: 0.0,
        };
        let half = model.rates(&CompartmentState::new(0.0, 10.0, 40.0, 0.0), &p);
        assert!((half.p - 10.0 * 0.5).abs() < 1e-12);

        let full = model.rates(&CompartmentState::new(0.0, 10.0, 40.0, 50.0), &p);
        assert!(full.p.abs() < 1e-12);
    }

    #[test]
    fn disabled_terms_drop_out() {
        let terms = ModelTerms {
            drug_damage: false,
            ..Default::default()
        };
        let model = TumourModel::new(100.0, terms).unwrap();
        let d = model.rates(&CompartmentState::new(5.0, 0.0, 10.0, 0.0), &params());
        assert_eq!(0.0, d.q);
        assert_eq!(0.0, d.qp);
        assert!((d.c - -0.5).abs() < 1e-12);
    }

    #[test]
    fn reject_non_positive_capacity() {
        for k in [0.0, -1.0, f64::NAN] {
            match TumourModel::new(k, ModelTerms::default()) {
                Err(AbcErr::ConfigurationError(_)) => (),
                other => panic!("Expected configuration error, got {:?}", other),
            }
        }
    }

    #[test]
    fn parameter_vector_conversion() {
        let vector: DVector<f64> = params().into();
        assert_eq!(6, vector.len());
        assert_eq!(0.3, vector[4]);
        assert_eq!(params(), ParameterSet::try_from(vector).unwrap());

        match ParameterSet::try_from(DVector::from_column_slice(&[1.0, 2.0])) {
            Err(AbcErr::VectorConversionError(_)) => (),
            other => panic!("Expected conversion error, got {:?}", other),
        }
    }
}
