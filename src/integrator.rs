//! Fixed-step classical RK4 over an irregular observation grid.
//!
//! Each gap between consecutive grid times is split into the smallest number
//! of equal sub-steps no longer than `max_step`, so a long gap between clinic
//! visits is integrated as finely as a short one.

use serde::{Deserialize, Serialize};

use crate::{
    error::{AbcErr, AbcResult},
    model::{CompartmentState, ParameterSet, TumourModel},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Longest allowed sub-step, in the time unit of the data.
    pub max_step: f64,
    /// Negative excursions smaller than this are clamped to zero.
    pub negative_tolerance: f64,
}
impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            max_step: 0.01,
            negative_tolerance: 1e-6,
        }
    }
}

/// Simulated states aligned one-to-one with `times`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<CompartmentState>,
}
impl Trajectory {
    pub fn totals(&self) -> Vec<f64> {
        self.states.iter().map(CompartmentState::total).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Integrator {
    config: IntegratorConfig,
}
impl Integrator {
    pub fn new(config: IntegratorConfig) -> AbcResult<Self> {
        if !(config.max_step.is_finite() && config.max_step > 0.0) {
            return Err(AbcErr::ConfigurationError(format!(
                "Integrator max_step must be positive, got {}",
                config.max_step
            )));
        }
        if !(config.negative_tolerance >= 0.0) {
            return Err(AbcErr::ConfigurationError(format!(
                "Integrator negative_tolerance must be non-negative, got {}",
                config.negative_tolerance
            )));
        }
        Ok(Self { config })
    }

    pub fn simulate(
        &self,
        model: &TumourModel,
        initial_state: &CompartmentState,
        params: &ParameterSet,
        time_grid: &[f64],
    ) -> AbcResult<Trajectory> {
        check_grid(time_grid)?;

        let mut states = Vec::with_capacity(time_grid.len());
        let mut state = *initial_state;
        if !time_grid.is_empty() {
            states.push(state);
        }

        for window in time_grid.windows(2) {
            let (from, to) = (window[0], window[1]);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n_steps = ((to - from) / self.config.max_step).ceil().max(1.0) as usize;
            let dt = (to - from) / cast::f64(n_steps);

            for step in 0..n_steps {
                state = rk4_step(model, &state, params, dt);
                state = self.check_state(state, from + dt * cast::f64(step + 1))?;
            }
            states.push(state);
        }

        Ok(Trajectory {
            times: time_grid.to_vec(),
            states,
        })
    }

    fn check_state(&self, state: CompartmentState, t: f64) -> AbcResult<CompartmentState> {
        if !state.is_finite() {
            return Err(AbcErr::NumericalFailure(format!(
                "Non-finite state {:?} at t={}",
                state, t
            )));
        }
        if state.min_component() < -self.config.negative_tolerance {
            return Err(AbcErr::NumericalFailure(format!(
                "Negative compartment in {:?} at t={}",
                state, t
            )));
        }
        Ok(state.clamp_non_negative())
    }
}

fn check_grid(time_grid: &[f64]) -> AbcResult<()> {
    if let Some(t) = time_grid.iter().find(|t| !t.is_finite()) {
        return Err(AbcErr::ConfigurationError(format!(
            "Time grid contains non-finite time {}",
            t
        )));
    }
    if let Some(w) = time_grid.windows(2).find(|w| w[1] <= w[0]) {
        return Err(AbcErr::ConfigurationError(format!(
            "Time grid must be strictly ascending, found {} followed by {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

fn rk4_step(
    model: &TumourModel,
    state: &CompartmentState,
    params: &ParameterSet,
    dt: f64,
) -> CompartmentState {
    let half_dt = 0.5 * dt;
    let k1 = model.rates(state, params);
    let k2 = model.rates(&(*state + k1 * half_dt), params);
    let k3 = model.rates(&(*state + k2 * half_dt), params);
    let k4 = model.rates(&(*state + k3 * dt), params);
    *state + (k1 + (k2 + k3) * 2.0 + k4) * (dt / 6.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelTerms;

    fn model(capacity: f64) -> TumourModel {
        TumourModel::new(capacity, ModelTerms::default()).unwrap()
    }

    fn integrator() -> Integrator {
        Integrator::new(IntegratorConfig::default()).unwrap()
    }

    fn reference_params() -> ParameterSet {
        ParameterSet {
            lambda_p: 0.1,
            k_pq: 0.1,
            k_qp_p: 0.05,
            delta_qp: 0.1,
            gamma: 0.3,
            kde: 0.1,
        }
    }

    fn assert_close(expected: f64, actual: f64, tolerance: f64) {
        assert!(
            (expected - actual).abs() < tolerance,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn reproduces_reference_trajectory() {
        let initial = CompartmentState::new(1.0, 20.0, 80.0, 0.0);
        let trajectory = integrator()
            .simulate(&model(100.0), &initial, &reference_params(), &[0.0, 1.0, 2.0, 3.0])
            .unwrap();

        // Converged reference, agrees to 1e-12 at steps of 1e-2 and 1e-4
        let expected = [
            [1.0, 20.0, 80.0, 0.0],
            [0.904837418036, 17.645760014592, 79.600067751857, 2.112865641315],
            [0.818730753078, 15.714526707888, 79.213673874439, 3.720905982750],
            [0.740818220682, 14.119979864844, 78.855561873488, 4.915838818624],
        ];
        assert_eq!(initial, trajectory.states[0]);
        for (state, row) in trajectory.states.iter().zip(expected) {
            assert_close(row[0], state.c, 1e-9);
            assert_close(row[1], state.p, 1e-9);
            assert_close(row[2], state.q, 1e-9);
            assert_close(row[3], state.qp, 1e-9);
        }
        assert_close(97.891380556956, trajectory.totals()[3], 1e-9);
    }

    #[test]
    fn drug_concentration_never_increases() {
        let initial = CompartmentState::new(3.0, 10.0, 30.0, 1.0);
        let grid: Vec<f64> = vec![0.0, 0.3, 2.0, 2.1, 9.0, 30.0];
        let trajectory = integrator()
            .simulate(&model(200.0), &initial, &reference_params(), &grid)
            .unwrap();

        for pair in trajectory.states.windows(2) {
            assert!(pair[1].c <= pair[0].c);
        }
        assert_close(3.0 * (-0.1f64 * 30.0).exp(), trajectory.states[5].c, 1e-9);
    }

    #[test]
    fn pure_logistic_growth_without_exchange() {
        let params = ParameterSet {
            lambda_p: 0.8,
            k_pq: 0.0,
            k_qp_p: 0.0,
            delta_qp: 0.0,
            gamma: 0.0,
            kde: 0.0,
        };
        let (k, p0, q0, qp0) = (100.0, 5.0, 10.0, 2.0);
        let initial = CompartmentState::new(1.0, p0, q0, qp0);
        let grid = [0.0, 1.5, 4.0, 40.0];
        let trajectory = integrator()
            .simulate(&model(k), &initial, &params, &grid)
            .unwrap();

        // With Q and QP frozen, P follows logistic growth towards K - Q - QP
        let ceiling: f64 = k - q0 - qp0;
        for (t, state) in grid.iter().zip(&trajectory.states) {
            let expected = ceiling / (1.0 + (ceiling / p0 - 1.0) * (-0.8 * ceiling / k * t).exp());
            assert_close(expected, state.p, 1e-6);
            assert_eq!(q0, state.q);
            assert_eq!(qp0, state.qp);
        }
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let initial = CompartmentState::new(1.0, 20.0, 80.0, 0.0);
        let grid = [0.0, 0.7, 5.3];
        let a = integrator()
            .simulate(&model(150.0), &initial, &reference_params(), &grid)
            .unwrap();
        let b = integrator()
            .simulate(&model(150.0), &initial, &reference_params(), &grid)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn blow_up_is_a_numerical_failure() {
        let params = ParameterSet {
            lambda_p: 1e6,
            ..reference_params()
        };
        let initial = CompartmentState::new(0.0, 1e3, 0.0, 0.0);
        let coarse = Integrator::new(IntegratorConfig {
            max_step: 1.0,
            ..Default::default()
        })
        .unwrap();
        match coarse.simulate(&model(1.0), &initial, &params, &[0.0, 10.0]) {
            Err(AbcErr::NumericalFailure(_)) => (),
            other => panic!("Expected numerical failure, got {:?}", other),
        }
    }

    #[test]
    fn reject_unordered_grid() {
        let initial = CompartmentState::new(1.0, 20.0, 80.0, 0.0);
        let grid = [0.0, 2.0, 1.0];
        match integrator().simulate(&model(100.0), &initial, &reference_params(), &grid) {
            Err(AbcErr::ConfigurationError(_)) => (),
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}
