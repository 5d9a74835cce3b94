//! Sequentially thresholded least squares (STLSQ).
//!
//! Each target column is fit independently: solve a ridge problem over the
//! active features, zero every coefficient with `|c| < threshold`, shrink the
//! active set, and repeat until the active set stops changing.

use crate::error::{SindyError, SindyResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StlsqSettings {
    pub threshold: f64,
    pub max_iter: usize,
    pub ridge_alpha: f64,
    /// Refit plain least squares on the final support to undo ridge shrinkage.
    pub unbias: bool,
}

impl Default for StlsqSettings {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            max_iter: 20,
            ridge_alpha: 0.05,
            unbias: true,
        }
    }
}

impl StlsqSettings {
    fn validate(&self) -> SindyResult<()> {
        if !(self.threshold >= 0.0 && self.threshold.is_finite()) {
            return Err(SindyError::invalid("threshold must be non-negative and finite"));
        }
        if !(self.ridge_alpha >= 0.0 && self.ridge_alpha.is_finite()) {
            return Err(SindyError::invalid("ridge_alpha must be non-negative and finite"));
        }
        if self.max_iter == 0 {
            return Err(SindyError::invalid("max_iter must be at least 1"));
        }
        Ok(())
    }
}

/// Outcome of a full STLSQ solve.
#[derive(Debug, Clone)]
pub struct StlsqReport {
    /// One row per feature, one column per target.
    pub coefficients: DMatrix<f64>,
    pub iterations: Vec<usize>,
    pub converged: Vec<bool>,
    /// Targets whose coefficients were all thresholded away.
    pub inactive_targets: Vec<usize>,
}

/// Solves for a sparse Ξ with Θ Ξ ≈ Ẋ.
pub fn solve(
    theta: &DMatrix<f64>,
    xdot: &DMatrix<f64>,
    settings: &StlsqSettings,
) -> SindyResult<DMatrix<f64>> {
    solve_with_report(theta, xdot, settings).map(|report| report.coefficients)
}

pub fn solve_with_report(
    theta: &DMatrix<f64>,
    xdot: &DMatrix<f64>,
    settings: &StlsqSettings,
) -> SindyResult<StlsqReport> {
    settings.validate()?;
    if theta.nrows() != xdot.nrows() {
        return Err(SindyError::ShapeMismatch {
            what: "derivative rows",
            expected: theta.nrows(),
            actual: xdot.nrows(),
        });
    }
    if theta.ncols() == 0 {
        return Err(SindyError::EmptyLibrary);
    }
    if theta.nrows() == 0 {
        return Err(SindyError::InsufficientSamples {
            required: 1,
            actual: 0,
        });
    }
    if theta.iter().any(|v| !v.is_finite()) {
        return Err(SindyError::SingularSystem {
            target: 0,
            what: "feature matrix contains non-finite values".to_string(),
        });
    }

    let n_features = theta.ncols();
    let n_targets = xdot.ncols();
    let mut coefficients = DMatrix::zeros(n_features, n_targets);
    let mut iterations = Vec::with_capacity(n_targets);
    let mut converged = Vec::with_capacity(n_targets);
    let mut inactive_targets = Vec::new();

    for target in 0..n_targets {
        let y: DVector<f64> = xdot.column(target).into_owned();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(SindyError::SingularSystem {
                target,
                what: "target column contains non-finite values".to_string(),
            });
        }
        let fit = solve_target(theta, &y, target, settings)?;
        let n_active = fit.coefficients.iter().filter(|c| **c != 0.0).count();
        debug!(target, iterations = fit.iterations, n_active, "STLSQ target solved");
        if !fit.converged {
            warn!(
                target,
                max_iter = settings.max_iter,
                "STLSQ did not reach a fixed active set"
            );
        }
        if n_active == 0 {
            warn!(target, threshold = settings.threshold, "all coefficients eliminated");
            inactive_targets.push(target);
        }
        coefficients.set_column(target, &fit.coefficients);
        iterations.push(fit.iterations);
        converged.push(fit.converged);
    }

    Ok(StlsqReport {
        coefficients,
        iterations,
        converged,
        inactive_targets,
    })
}

struct TargetFit {
    coefficients: DVector<f64>,
    iterations: usize,
    converged: bool,
}

fn solve_target(
    theta: &DMatrix<f64>,
    y: &DVector<f64>,
    target: usize,
    settings: &StlsqSettings,
) -> SindyResult<TargetFit> {
    let n_features = theta.ncols();
    let mut active = vec![true; n_features];
    let mut coefficients = DVector::zeros(n_features);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < settings.max_iter {
        iterations += 1;
        let support = support_of(&active);
        if support.is_empty() {
            coefficients.fill(0.0);
            converged = true;
            break;
        }

        let restricted =
            restricted_least_squares(theta, &support, y, settings.ridge_alpha, target)?;
        coefficients.fill(0.0);
        for (&k, &c) in support.iter().zip(restricted.iter()) {
            coefficients[k] = c;
        }

        let next: Vec<bool> = (0..n_features)
            .map(|k| active[k] && !(coefficients[k].abs() < settings.threshold))
            .collect();
        for k in 0..n_features {
            if !next[k] {
                coefficients[k] = 0.0;
            }
        }

        if next == active {
            converged = true;
            break;
        }
        active = next;
    }

    if settings.unbias {
        let support = support_of(&active);
        if !support.is_empty() {
            let refit = restricted_least_squares(theta, &support, y, 0.0, target)?;
            coefficients.fill(0.0);
            for (&k, &c) in support.iter().zip(refit.iter()) {
                coefficients[k] = c;
            }
        }
    }

    Ok(TargetFit {
        coefficients,
        iterations,
        converged,
    })
}

fn support_of(active: &[bool]) -> Vec<usize> {
    active
        .iter()
        .enumerate()
        .filter_map(|(k, &on)| on.then_some(k))
        .collect()
}

/// Ridge least squares over the columns in `support`. Uses the regularized
/// normal equations when `alpha > 0` and a minimum-norm SVD solve otherwise.
fn restricted_least_squares(
    theta: &DMatrix<f64>,
    support: &[usize],
    y: &DVector<f64>,
    alpha: f64,
    target: usize,
) -> SindyResult<DVector<f64>> {
    let sub = theta.select_columns(support.iter());

    let solution = if alpha > 0.0 {
        let mut gram = sub.transpose() * &sub;
        for k in 0..gram.nrows() {
            gram[(k, k)] += alpha;
        }
        let rhs = sub.transpose() * y;
        gram.cholesky()
            .ok_or_else(|| SindyError::SingularSystem {
                target,
                what: "regularized normal equations are not positive definite".to_string(),
            })?
            .solve(&rhs)
    } else {
        let (rows, cols) = sub.shape();
        let svd = sub.svd(true, true);
        let largest = svd.singular_values.max();
        let eps = largest * rows.max(cols) as f64 * f64::EPSILON;
        svd.solve(y, eps).map_err(|msg| SindyError::SingularSystem {
            target,
            what: msg.to_string(),
        })?
    };

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(SindyError::SingularSystem {
            target,
            what: "least-squares solution is not finite".to_string(),
        });
    }
    Ok(solution)
}
