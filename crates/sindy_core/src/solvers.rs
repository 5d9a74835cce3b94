use crate::traits::{DynamicalSystem, Scalar, Steppable};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = lift::<T>(0.5);
        let sixth = lift::<T>(1.0 / 6.0);
        let two = lift::<T>(2.0);
        let t0 = *t;

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Tsitouras 5(4) tableau. Row s of TSIT5_A holds the coefficients for stage s + 1.
const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];
const TSIT5_A: [[f64; 5]; 5] = [
    [0.161, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0],
    [
        2.897153057105493,
        -6.359448489975075,
        4.3622954328695815,
        0.0,
        0.0,
    ],
    [
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
    ],
];
const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436099,
    2.324710524099774,
];

/// Tsitouras 5/4 Solver, used here with a fixed step (5th order update).
pub struct Tsit5<T: Scalar> {
    stages: [Vec<T>; 6],
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            stages: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        system.apply(t0, state, &mut self.stages[0]);

        for s in 1..6 {
            let row = &TSIT5_A[s - 1];
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (r, &a) in row.iter().enumerate().take(s) {
                    acc = acc + lift::<T>(a) * self.stages[r][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + lift::<T>(TSIT5_C[s]) * dt, &self.tmp, &mut self.stages[s]);
        }

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (s, &b) in TSIT5_B.iter().enumerate() {
                acc = acc + lift::<T>(b) * self.stages[s][i];
            }
            state[i] = state[i] + dt * acc;
        }

        *t = t0 + dt;
    }
}

/// Discrete map stepper: x_{n+1} = f(x_n). `dt` only advances the clock.
pub struct DiscreteMap<T: Scalar> {
    tmp: Vec<T>,
}

impl<T: Scalar> DiscreteMap<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for DiscreteMap<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        system.apply(*t, state, &mut self.tmp);
        state.copy_from_slice(&self.tmp);
        *t = *t + dt;
    }
}

/// Whether a model describes a continuous flow or a discrete map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemKind {
    #[default]
    Flow,
    Map,
}

/// Fixed-step scheme used for continuous-time simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperKind {
    #[default]
    Rk4,
    Tsit5,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub stepper: StepperKind,
    /// Fixed steps taken between consecutive output times.
    pub substeps: usize,
    /// Optional upper bound on the internal step size; raises the substep
    /// count for wide output intervals.
    pub max_step: Option<f64>,
    /// Total step budget for one simulation.
    pub max_steps: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            stepper: StepperKind::Rk4,
            substeps: 10,
            max_step: None,
            max_steps: 1_000_000,
        }
    }
}

/// Failure signals raised by the integrator itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Invalid integration input: {what}")]
    InvalidInput { what: String },

    #[error("State became non-finite at t = {time} after {steps} steps")]
    Diverged { time: f64, steps: usize },

    #[error("Step budget of {limit} exhausted at t = {time}")]
    StepLimit { limit: usize, time: f64 },
}

enum InternalStepper {
    Rk4(RK4<f64>),
    Tsit5(Tsit5<f64>),
    Discrete(DiscreteMap<f64>),
}

impl InternalStepper {
    fn build(kind: SystemKind, stepper: StepperKind, dim: usize) -> Self {
        match (kind, stepper) {
            (SystemKind::Map, _) => InternalStepper::Discrete(DiscreteMap::new(dim)),
            (SystemKind::Flow, StepperKind::Rk4) => InternalStepper::Rk4(RK4::new(dim)),
            (SystemKind::Flow, StepperKind::Tsit5) => InternalStepper::Tsit5(Tsit5::new(dim)),
        }
    }

    fn step(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) {
        match self {
            InternalStepper::Rk4(s) => s.step(system, t, state, dt),
            InternalStepper::Tsit5(s) => s.step(system, t, state, dt),
            InternalStepper::Discrete(s) => s.step(system, t, state, dt),
        }
    }
}

/// Integrates `system` from `initial_state` and records the state at every
/// entry of `times`. Row 0 of the result is the initial state.
///
/// Flows take `substeps` (or more, when `max_step` demands it) fixed steps per
/// output interval; maps take exactly one iteration per interval.
pub fn integrate<S: DynamicalSystem<f64>>(
    system: &S,
    kind: SystemKind,
    initial_state: &[f64],
    times: &[f64],
    settings: &SimulationSettings,
) -> Result<DMatrix<f64>, IntegrationError> {
    let dim = system.dimension();
    if initial_state.len() != dim {
        return Err(IntegrationError::InvalidInput {
            what: format!(
                "initial state has {} entries, system dimension is {}",
                initial_state.len(),
                dim
            ),
        });
    }
    if times.is_empty() {
        return Err(IntegrationError::InvalidInput {
            what: "at least one output time is required".to_string(),
        });
    }
    if settings.substeps == 0 {
        return Err(IntegrationError::InvalidInput {
            what: "substeps must be at least 1".to_string(),
        });
    }
    if let Some(h) = settings.max_step {
        if !(h > 0.0 && h.is_finite()) {
            return Err(IntegrationError::InvalidInput {
                what: "max_step must be positive and finite".to_string(),
            });
        }
    }
    if times.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(IntegrationError::InvalidInput {
            what: "output times must be strictly increasing".to_string(),
        });
    }

    let mut trajectory = DMatrix::zeros(times.len(), dim);
    let mut state = initial_state.to_vec();
    for (j, &v) in state.iter().enumerate() {
        trajectory[(0, j)] = v;
    }

    let mut stepper = InternalStepper::build(kind, settings.stepper, dim);
    let mut t = times[0];
    let mut steps = 0usize;

    for (row, window) in times.windows(2).enumerate() {
        let interval = window[1] - window[0];
        let substeps = match kind {
            SystemKind::Map => 1,
            SystemKind::Flow => match settings.max_step {
                Some(h) => settings.substeps.max((interval / h).ceil() as usize),
                None => settings.substeps,
            },
        };
        let dt = interval / substeps as f64;

        for _ in 0..substeps {
            if steps >= settings.max_steps {
                return Err(IntegrationError::StepLimit {
                    limit: settings.max_steps,
                    time: t,
                });
            }
            stepper.step(system, &mut t, &mut state, dt);
            steps += 1;
            if state.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::Diverged { time: t, steps });
            }
        }

        // Snap to the requested output time so round-off does not accumulate.
        t = window[1];
        for (j, &v) in state.iter().enumerate() {
            trajectory[(row + 1, j)] = v;
        }
    }

    Ok(trajectory)
}
