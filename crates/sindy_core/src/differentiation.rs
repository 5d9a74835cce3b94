//! Derivative estimation from sampled trajectories.
//!
//! Rows are samples, columns are state dimensions. Every sample receives an
//! estimate: interior rows use a centered stencil, rows near either end use a
//! stencil of the same width shifted toward the interior.

use crate::error::{SindyError, SindyResult};
use nalgebra::DMatrix;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Sample times attached to a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeBase {
    /// Uniform spacing; sample `i` sits at `i * dt`.
    Step(f64),
    /// Explicit, strictly increasing sample times, one per row.
    Samples(Vec<f64>),
}

impl TimeBase {
    /// Checks the time base against a trajectory with `n_samples` rows.
    pub fn validate(&self, n_samples: usize) -> SindyResult<()> {
        match self {
            TimeBase::Step(dt) => {
                if !(dt.is_finite() && *dt > 0.0) {
                    return Err(SindyError::NonMonotonicTime { index: 0 });
                }
            }
            TimeBase::Samples(times) => {
                if times.len() != n_samples {
                    return Err(SindyError::ShapeMismatch {
                        what: "time samples",
                        expected: n_samples,
                        actual: times.len(),
                    });
                }
                if let Some(index) = times.iter().position(|t| !t.is_finite()) {
                    return Err(SindyError::NonMonotonicTime { index });
                }
                if let Some(index) = times.windows(2).position(|w| !(w[1] > w[0])) {
                    return Err(SindyError::NonMonotonicTime { index: index + 1 });
                }
            }
        }
        Ok(())
    }

    /// Materializes the sample times for a trajectory with `n_samples` rows.
    pub fn times(&self, n_samples: usize) -> Vec<f64> {
        match self {
            TimeBase::Step(dt) => (0..n_samples).map(|i| i as f64 * dt).collect(),
            TimeBase::Samples(times) => times.clone(),
        }
    }

    /// The sample spacing if it is uniform (to a relative tolerance of 1e-9).
    pub fn uniform_step(&self) -> Option<f64> {
        match self {
            TimeBase::Step(dt) => Some(*dt),
            TimeBase::Samples(times) => {
                if times.len() < 2 {
                    return None;
                }
                let mean = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
                let uniform = times
                    .windows(2)
                    .all(|w| ((w[1] - w[0]) - mean).abs() <= 1e-9 * mean.abs());
                uniform.then_some(mean)
            }
        }
    }

    /// Offset of sample `j` relative to sample `i`.
    fn offset(&self, i: usize, j: usize) -> f64 {
        match self {
            TimeBase::Step(dt) => (j as f64 - i as f64) * dt,
            TimeBase::Samples(times) => times[j] - times[i],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiniteDifferenceSettings {
    /// Accuracy order; polynomials of this degree are differentiated exactly.
    pub order: usize,
    /// Which derivative to estimate (1 = first derivative).
    pub derivative: usize,
}

impl Default for FiniteDifferenceSettings {
    fn default() -> Self {
        Self {
            order: 2,
            derivative: 1,
        }
    }
}

impl FiniteDifferenceSettings {
    /// Number of samples in every stencil. Odd, so interior stencils are centered.
    pub fn stencil_width(&self) -> usize {
        let width = self.order + self.derivative;
        if width % 2 == 0 {
            width + 1
        } else {
            width
        }
    }
}

/// Derivative estimation method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Differentiator {
    FiniteDifference(FiniteDifferenceSettings),
    /// First derivative via FFT; assumes uniform, periodic sampling.
    Spectral,
}

impl Default for Differentiator {
    fn default() -> Self {
        Differentiator::FiniteDifference(FiniteDifferenceSettings::default())
    }
}

impl Differentiator {
    /// Minimum number of rows a trajectory needs for this method.
    pub fn min_samples(&self) -> usize {
        match self {
            Differentiator::FiniteDifference(settings) => settings.stencil_width(),
            Differentiator::Spectral => 2,
        }
    }

    pub fn differentiate(&self, x: &DMatrix<f64>, time: &TimeBase) -> SindyResult<DMatrix<f64>> {
        match self {
            Differentiator::FiniteDifference(settings) => finite_difference(x, time, settings),
            Differentiator::Spectral => spectral_derivative(x, time),
        }
    }
}

/// Generalized finite differences with per-sample Fornberg weights.
pub fn finite_difference(
    x: &DMatrix<f64>,
    time: &TimeBase,
    settings: &FiniteDifferenceSettings,
) -> SindyResult<DMatrix<f64>> {
    if settings.order == 0 {
        return Err(SindyError::invalid("finite difference order must be at least 1"));
    }
    if settings.derivative == 0 {
        return Err(SindyError::invalid("derivative order must be at least 1"));
    }
    let n = x.nrows();
    time.validate(n)?;
    let width = settings.stencil_width();
    if n < width {
        return Err(SindyError::InsufficientSamples {
            required: width,
            actual: n,
        });
    }

    let half = width / 2;
    let mut xdot = DMatrix::zeros(n, x.ncols());
    let mut offsets = vec![0.0; width];

    for i in 0..n {
        let start = i.saturating_sub(half).min(n - width);
        for (s, offset) in offsets.iter_mut().enumerate() {
            *offset = time.offset(i, start + s);
        }
        let weights = fornberg_weights(&offsets, settings.derivative);
        for j in 0..x.ncols() {
            let mut acc = 0.0;
            for (s, w) in weights.iter().enumerate() {
                acc += w * x[(start + s, j)];
            }
            xdot[(i, j)] = acc;
        }
    }

    Ok(xdot)
}

/// Weights for the `m`-th derivative at offset 0 from values at `nodes`
/// (node positions relative to the evaluation point). Fornberg (1988).
fn fornberg_weights(nodes: &[f64], m: usize) -> Vec<f64> {
    let n = nodes.len();
    let mut c = vec![vec![0.0; m + 1]; n];
    c[0][0] = 1.0;
    let mut c1 = 1.0;
    let mut c4 = nodes[0];

    for i in 1..n {
        let mn = i.min(m);
        let mut c2 = 1.0;
        let c5 = c4;
        c4 = nodes[i];
        for j in 0..i {
            let c3 = nodes[i] - nodes[j];
            c2 *= c3;
            if j == i - 1 {
                for k in (1..=mn).rev() {
                    c[i][k] = c1 * (k as f64 * c[i - 1][k - 1] - c5 * c[i - 1][k]) / c2;
                }
                c[i][0] = -c1 * c5 * c[i - 1][0] / c2;
            }
            for k in (1..=mn).rev() {
                c[j][k] = (c4 * c[j][k] - k as f64 * c[j][k - 1]) / c3;
            }
            c[j][0] = c4 * c[j][0] / c3;
        }
        c1 = c2;
    }

    c.into_iter().map(|row| row[m]).collect()
}

/// Spectral first derivative of each column. The Nyquist bin is dropped for
/// even sample counts.
pub fn spectral_derivative(x: &DMatrix<f64>, time: &TimeBase) -> SindyResult<DMatrix<f64>> {
    let n = x.nrows();
    time.validate(n)?;
    if n < 2 {
        return Err(SindyError::InsufficientSamples {
            required: 2,
            actual: n,
        });
    }
    let dt = time
        .uniform_step()
        .ok_or_else(|| SindyError::invalid("spectral differentiation requires uniform sampling"))?;

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);
    let span = n as f64 * dt;

    let mut xdot = DMatrix::zeros(n, x.ncols());
    let mut buffer = vec![Complex::new(0.0, 0.0); n];
    for j in 0..x.ncols() {
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(x[(i, j)], 0.0);
        }
        forward.process(&mut buffer);
        for (k, slot) in buffer.iter_mut().enumerate() {
            let wavenumber = if 2 * k < n {
                k as f64
            } else if 2 * k == n {
                0.0
            } else {
                k as f64 - n as f64
            };
            let omega = 2.0 * PI * wavenumber / span;
            *slot *= Complex::new(0.0, omega);
        }
        inverse.process(&mut buffer);
        for (i, value) in buffer.iter().enumerate() {
            xdot[(i, j)] = value.re / n as f64;
        }
    }

    Ok(xdot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn column(values: &[f64]) -> DMatrix<f64> {
        DMatrix::from_column_slice(values.len(), 1, values)
    }

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol * (1.0 + expected.abs()),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn centered_stencil_is_exact_for_quadratics() {
        let dt = 0.1;
        let t: Vec<f64> = (0..12).map(|i| i as f64 * dt).collect();
        let values: Vec<f64> = t.iter().map(|t| 3.0 * t * t - 2.0 * t + 1.0).collect();
        let xdot = finite_difference(
            &column(&values),
            &TimeBase::Step(dt),
            &FiniteDifferenceSettings::default(),
        )
        .expect("differentiation should succeed");
        for (i, t) in t.iter().enumerate() {
            assert_close(xdot[(i, 0)], 6.0 * t - 2.0, 1e-10);
        }
    }

    #[test]
    fn nonuniform_grid_is_exact_for_cubics() {
        let t: Vec<f64> = (0..15)
            .map(|i| i as f64 * 0.1 + 0.03 * (i as f64).sin())
            .collect();
        let values: Vec<f64> = t.iter().map(|t| t.powi(3) - 0.5 * t).collect();
        let settings = FiniteDifferenceSettings {
            order: 3,
            derivative: 1,
        };
        let xdot = finite_difference(&column(&values), &TimeBase::Samples(t.clone()), &settings)
            .expect("differentiation should succeed");
        for (i, t) in t.iter().enumerate() {
            assert_close(xdot[(i, 0)], 3.0 * t * t - 0.5, 1e-9);
        }
    }

    #[test]
    fn second_derivative_of_quadratic_is_constant() {
        let dt = 0.25;
        let values: Vec<f64> = (0..8).map(|i| (i as f64 * dt).powi(2)).collect();
        let settings = FiniteDifferenceSettings {
            order: 2,
            derivative: 2,
        };
        let xdot = finite_difference(&column(&values), &TimeBase::Step(dt), &settings)
            .expect("differentiation should succeed");
        for value in xdot.iter() {
            assert_close(*value, 2.0, 1e-9);
        }
    }

    #[test]
    fn preserves_shape_across_columns() {
        let x = DMatrix::from_fn(10, 3, |i, j| (i * (j + 1)) as f64);
        let xdot = Differentiator::default()
            .differentiate(&x, &TimeBase::Step(1.0))
            .expect("differentiation should succeed");
        assert_eq!(xdot.shape(), (10, 3));
        for i in 0..10 {
            for j in 0..3 {
                assert_close(xdot[(i, j)], (j + 1) as f64, 1e-12);
            }
        }
    }

    #[test]
    fn rejects_short_trajectories() {
        let err = finite_difference(
            &column(&[1.0, 2.0]),
            &TimeBase::Step(0.1),
            &FiniteDifferenceSettings::default(),
        )
        .expect_err("two samples cannot support a 3-point stencil");
        assert!(matches!(
            err,
            SindyError::InsufficientSamples {
                required: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn rejects_non_monotonic_time() {
        let err = finite_difference(
            &column(&[1.0, 2.0, 3.0, 4.0]),
            &TimeBase::Samples(vec![0.0, 0.1, 0.1, 0.3]),
            &FiniteDifferenceSettings::default(),
        )
        .expect_err("repeated time should fail");
        assert!(matches!(err, SindyError::NonMonotonicTime { index: 2 }));

        let err = finite_difference(
            &column(&[1.0, 2.0, 3.0]),
            &TimeBase::Step(-0.1),
            &FiniteDifferenceSettings::default(),
        )
        .expect_err("negative step should fail");
        assert!(matches!(err, SindyError::NonMonotonicTime { .. }));
    }

    #[test]
    fn rejects_non_finite_sample_times() {
        let values = column(&[1.0, 2.0, 3.0, 4.0]);
        let settings = FiniteDifferenceSettings::default();
        let err = finite_difference(
            &values,
            &TimeBase::Samples(vec![f64::NEG_INFINITY, 0.1, 0.2, 0.3]),
            &settings,
        )
        .expect_err("infinite first time should fail");
        assert!(matches!(err, SindyError::NonMonotonicTime { index: 0 }));

        let err = finite_difference(
            &values,
            &TimeBase::Samples(vec![0.0, 0.1, f64::NAN, 0.3]),
            &settings,
        )
        .expect_err("NaN time should fail");
        assert!(matches!(err, SindyError::NonMonotonicTime { index: 2 }));
    }

    #[test]
    fn rejects_mismatched_time_length() {
        let err = finite_difference(
            &column(&[1.0, 2.0, 3.0, 4.0]),
            &TimeBase::Samples(vec![0.0, 0.1, 0.2]),
            &FiniteDifferenceSettings::default(),
        )
        .expect_err("length mismatch should fail");
        assert!(matches!(
            err,
            SindyError::ShapeMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn spectral_derivative_of_periodic_signal() {
        let n = 64;
        let dt = 2.0 * PI / n as f64;
        let values: Vec<f64> = (0..n)
            .map(|i| (i as f64 * dt).sin() + 0.5 * (3.0 * i as f64 * dt).cos())
            .collect();
        let xdot = spectral_derivative(&column(&values), &TimeBase::Step(dt))
            .expect("spectral differentiation should succeed");
        for i in 0..n {
            let t = i as f64 * dt;
            assert_close(xdot[(i, 0)], t.cos() - 1.5 * (3.0 * t).sin(), 1e-10);
        }
    }

    #[test]
    fn spectral_requires_uniform_sampling() {
        let err = spectral_derivative(
            &column(&[0.0, 1.0, 2.0, 3.0]),
            &TimeBase::Samples(vec![0.0, 0.1, 0.3, 0.4]),
        )
        .expect_err("non-uniform grid should fail");
        assert!(matches!(err, SindyError::InvalidArgument { .. }));
    }

    proptest! {
        #[test]
        fn polynomials_up_to_order_are_exact(
            order in 1usize..5,
            coeffs in prop::collection::vec(-2.0_f64..2.0, 5),
            dt in 0.01_f64..0.2,
            extra in 0usize..20,
        ) {
            let settings = FiniteDifferenceSettings { order, derivative: 1 };
            let n = settings.stencil_width() + extra;
            let t: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
            let poly = |t: f64| (0..=order).map(|p| coeffs[p] * t.powi(p as i32)).sum::<f64>();
            let dpoly = |t: f64| (1..=order).map(|p| p as f64 * coeffs[p] * t.powi(p as i32 - 1)).sum::<f64>();
            let values: Vec<f64> = t.iter().map(|&t| poly(t)).collect();
            let scale = values.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
            let xdot = finite_difference(&column(&values), &TimeBase::Step(dt), &settings).unwrap();
            for (i, &ti) in t.iter().enumerate() {
                let err = (xdot[(i, 0)] - dpoly(ti)).abs();
                prop_assert!(err <= 1e-8 * (1.0 + scale / dt), "row {} error {}", i, err);
            }
        }
    }
}
