//! Integration test: recover the Lorenz system from a simulated trajectory.
//!
//! Demonstrates:
//! - data generation with the crate's own RK4 integrator
//! - fitting a degree-2 polynomial library with STLSQ
//! - exact recovery of the sparsity pattern on clean data
//! - short-horizon simulation of the discovered model
//! - graceful degradation of coefficients, predictions and simulations as
//!   measurement noise grows

use nalgebra::DMatrix;
use sindy_core::traits::DynamicalSystem;
use sindy_core::{
    integrate, Differentiator, FeatureLibrary, SimulationSettings, SindyModel, StlsqSettings,
    SystemKind, TimeBase,
};

const SIGMA: f64 = 10.0;
const RHO: f64 = 28.0;
const BETA: f64 = 8.0 / 3.0;
const DT: f64 = 0.002;
const N_SAMPLES: usize = 5001;

struct Lorenz;

impl DynamicalSystem<f64> for Lorenz {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        out[0] = SIGMA * (x[1] - x[0]);
        out[1] = x[0] * (RHO - x[2]) - x[1];
        out[2] = x[0] * x[1] - BETA * x[2];
    }
}

fn times() -> Vec<f64> {
    (0..N_SAMPLES).map(|i| i as f64 * DT).collect()
}

fn lorenz_trajectory() -> DMatrix<f64> {
    integrate(
        &Lorenz,
        SystemKind::Flow,
        &[-8.0, 8.0, 27.0],
        &times(),
        &SimulationSettings::default(),
    )
    .expect("Lorenz integration should succeed")
}

/// Rows follow the library order `1, x0, x1, x2, x0^2, x0 x1, x0 x2, x1^2, x1 x2, x2^2`.
fn true_coefficients() -> DMatrix<f64> {
    let mut xi = DMatrix::zeros(10, 3);
    xi[(1, 0)] = -SIGMA;
    xi[(2, 0)] = SIGMA;
    xi[(1, 1)] = RHO;
    xi[(2, 1)] = -1.0;
    xi[(6, 1)] = -1.0;
    xi[(3, 2)] = -BETA;
    xi[(5, 2)] = 1.0;
    xi
}

fn lorenz_model() -> SindyModel {
    SindyModel::default()
        .with_library(FeatureLibrary::polynomial(2))
        .with_optimizer(StlsqSettings {
            threshold: 0.1,
            ..StlsqSettings::default()
        })
}

/// Uniform noise in `[-level, level]` from a fixed-seed LCG.
fn add_noise(x: &DMatrix<f64>, level: f64, seed: u64) -> DMatrix<f64> {
    let mut state = seed;
    x.map(|v| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (state >> 33) as f64 / u32::MAX as f64 * 2.0 - 1.0;
        v + level * unit
    })
}

#[test]
fn recovers_lorenz_structure_from_clean_data() {
    let x = lorenz_trajectory();
    let mut model = lorenz_model();
    model
        .fit(&x, &TimeBase::Step(DT), None)
        .expect("fit should succeed");

    let names = model.feature_names().unwrap();
    assert_eq!(
        names,
        &["1", "x0", "x1", "x2", "x0^2", "x0 x1", "x0 x2", "x1^2", "x1 x2", "x2^2"]
    );

    let xi = model.coefficients().unwrap();
    let truth = true_coefficients();
    for k in 0..truth.nrows() {
        for j in 0..truth.ncols() {
            let expected = truth[(k, j)];
            let actual = xi[(k, j)];
            if expected == 0.0 {
                assert_eq!(actual, 0.0, "spurious term {} in equation {j}", names[k]);
            } else {
                let rel = ((actual - expected) / expected).abs();
                assert!(
                    rel < 0.02,
                    "term {} in equation {j}: expected {expected}, got {actual}",
                    names[k]
                );
            }
        }
    }
    assert_eq!(model.complexity().unwrap(), 7);

    let equations = model.describe_with_precision(1).unwrap();
    assert_eq!(equations[0], "dx0/dt = -10.0 x0 + 10.0 x1");
    assert_eq!(equations[1], "dx1/dt = 28.0 x0 - 1.0 x1 - 1.0 x0 x2");
    assert_eq!(equations[2], "dx2/dt = -2.7 x2 + 1.0 x0 x1");
}

#[test]
fn predictions_match_numerical_derivatives() {
    let x = lorenz_trajectory();
    let mut model = lorenz_model();
    model.fit(&x, &TimeBase::Step(DT), None).unwrap();

    let derivative = Differentiator::default()
        .differentiate(&x, &TimeBase::Step(DT))
        .unwrap();
    let predicted = model.predict(&x).unwrap();
    let scale = derivative.abs().max();
    let worst = (&predicted - &derivative).abs().max();
    assert!(worst / scale < 1e-2, "worst relative mismatch {}", worst / scale);
}

#[test]
fn discovered_model_tracks_trajectory_over_short_horizon() {
    let x = lorenz_trajectory();
    let mut model = lorenz_model();
    model.fit(&x, &TimeBase::Step(DT), None).unwrap();

    let horizon = 251;
    let t = times();
    let x0: Vec<f64> = x.row(0).iter().copied().collect();
    let simulated = model
        .simulate(&x0, &t[..horizon], &SimulationSettings::default())
        .expect("simulation should succeed");

    let reference = x.rows(0, horizon).into_owned();
    let worst = (&simulated - &reference).abs().max();
    assert!(worst < 0.5, "trajectory drifted by {worst}");
}

/// How far a model fit on noisy data sits from the clean system.
struct NoiseOutcome {
    coefficient_error: f64,
    /// RMS of `predict(X) - differentiate(X)` on the noisy trajectory.
    derivative_mismatch: f64,
    /// Worst deviation of a short simulation from the clean trajectory.
    trajectory_divergence: f64,
}

fn fit_with_noise(clean: &DMatrix<f64>, level: f64) -> NoiseOutcome {
    let noisy = add_noise(clean, level, 42);
    let time = TimeBase::Step(DT);
    let mut model = lorenz_model();
    if model.fit(&noisy, &time, None).is_err() {
        return NoiseOutcome {
            coefficient_error: f64::INFINITY,
            derivative_mismatch: f64::INFINITY,
            trajectory_divergence: f64::INFINITY,
        };
    }

    let coefficient_error = (model.coefficients().unwrap() - true_coefficients()).norm();

    let derivative = Differentiator::default().differentiate(&noisy, &time).unwrap();
    let predicted = model.predict(&noisy).unwrap();
    let derivative_mismatch = (&predicted - &derivative).norm() / (derivative.len() as f64).sqrt();

    let horizon = 251;
    let t = times();
    let x0: Vec<f64> = clean.row(0).iter().copied().collect();
    let trajectory_divergence =
        match model.simulate(&x0, &t[..horizon], &SimulationSettings::default()) {
            Ok(simulated) => (&simulated - clean.rows(0, horizon).into_owned()).abs().max(),
            Err(_) => f64::INFINITY,
        };

    NoiseOutcome {
        coefficient_error,
        derivative_mismatch,
        trajectory_divergence,
    }
}

#[test]
fn fit_quality_degrades_monotonically_with_noise() {
    let clean = lorenz_trajectory();
    let outcomes: Vec<NoiseOutcome> = [0.0, 0.1, 1.0]
        .iter()
        .map(|&level| fit_with_noise(&clean, level))
        .collect();

    let coefficient: Vec<f64> = outcomes.iter().map(|o| o.coefficient_error).collect();
    let mismatch: Vec<f64> = outcomes.iter().map(|o| o.derivative_mismatch).collect();
    let divergence: Vec<f64> = outcomes.iter().map(|o| o.trajectory_divergence).collect();

    assert!(coefficient[0] < 0.1, "clean-data coefficient error {}", coefficient[0]);
    assert!(mismatch[0] < 0.5, "clean-data derivative mismatch {}", mismatch[0]);
    assert!(divergence[0] < 0.5, "clean-data divergence {}", divergence[0]);

    for (label, series) in [
        ("coefficient error", &coefficient),
        ("derivative mismatch", &mismatch),
        ("trajectory divergence", &divergence),
    ] {
        for pair in series.windows(2) {
            assert!(pair[0] <= pair[1], "{label} not monotone in noise: {series:?}");
        }
    }
}
