//! The user-facing model: differentiate, build features, regress, then
//! predict, simulate, score and render the discovered equations.

use crate::differentiation::{Differentiator, TimeBase};
use crate::error::{SindyError, SindyResult};
use crate::library::{default_input_names, FeatureLibrary, Generator, PolynomialTerms, Term};
use crate::optimizer::{self, StlsqSettings};
use crate::solvers::{integrate, SimulationSettings, SystemKind};
use crate::traits::DynamicalSystem;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use tracing::info;

/// Everything needed to build and fit a model. Deserializable from JSON;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SindyConfig {
    pub kind: SystemKind,
    pub differentiation: Differentiator,
    pub library: Vec<Generator>,
    pub optimizer: StlsqSettings,
    /// Names for the state columns; `x0, x1, ...` when absent.
    pub feature_names: Option<Vec<String>>,
}

impl Default for SindyConfig {
    fn default() -> Self {
        Self {
            kind: SystemKind::Flow,
            differentiation: Differentiator::default(),
            library: vec![
                Generator::Constant,
                Generator::Polynomial(PolynomialTerms::up_to(2)),
            ],
            optimizer: StlsqSettings::default(),
            feature_names: None,
        }
    }
}

impl SindyConfig {
    pub fn from_json_str(json: &str) -> SindyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Goodness-of-fit statistic used by [`SindyModel::score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Coefficient of determination, averaged uniformly over state columns.
    #[default]
    R2,
    MeanSquaredError,
    MeanAbsoluteError,
}

impl Metric {
    pub fn evaluate(self, truth: &DMatrix<f64>, predicted: &DMatrix<f64>) -> SindyResult<f64> {
        if truth.shape() != predicted.shape() {
            return Err(SindyError::ShapeMismatch {
                what: "score inputs",
                expected: truth.len(),
                actual: predicted.len(),
            });
        }
        if truth.is_empty() {
            return Err(SindyError::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }
        let value = match self {
            Metric::R2 => {
                let mut total = 0.0;
                for j in 0..truth.ncols() {
                    let column = truth.column(j);
                    let mean = column.mean();
                    let ss_tot: f64 = column.iter().map(|v| (v - mean).powi(2)).sum();
                    let ss_res: f64 = column
                        .iter()
                        .zip(predicted.column(j).iter())
                        .map(|(t, p)| (t - p).powi(2))
                        .sum();
                    total += if ss_tot > 0.0 {
                        1.0 - ss_res / ss_tot
                    } else if ss_res == 0.0 {
                        1.0
                    } else {
                        0.0
                    };
                }
                total / truth.ncols() as f64
            }
            Metric::MeanSquaredError => (truth - predicted).map(|v| v * v).mean(),
            Metric::MeanAbsoluteError => (truth - predicted).map(f64::abs).mean(),
        };
        Ok(value)
    }
}

#[derive(Debug, Clone)]
struct FittedState {
    library: FeatureLibrary,
    input_names: Vec<String>,
    feature_names: Vec<String>,
    coefficients: DMatrix<f64>,
}

/// Sparse symbolic model of a dynamical system.
///
/// `fit` replaces all fitted state; the read-only operations can be shared
/// across threads once fitting is done.
#[derive(Debug, Clone, Default)]
pub struct SindyModel {
    config: SindyConfig,
    fitted: Option<FittedState>,
}

impl SindyModel {
    pub fn new(config: SindyConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn with_library(mut self, library: FeatureLibrary) -> Self {
        self.config.library = library.generators().to_vec();
        self.fitted = None;
        self
    }

    pub fn with_optimizer(mut self, settings: StlsqSettings) -> Self {
        self.config.optimizer = settings;
        self.fitted = None;
        self
    }

    pub fn with_differentiator(mut self, differentiator: Differentiator) -> Self {
        self.config.differentiation = differentiator;
        self.fitted = None;
        self
    }

    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.config.feature_names = Some(names);
        self.fitted = None;
        self
    }

    pub fn with_kind(mut self, kind: SystemKind) -> Self {
        self.config.kind = kind;
        self.fitted = None;
        self
    }

    pub fn config(&self) -> &SindyConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fits on one trajectory. For flows `x_dot` replaces the numerical
    /// derivative; for maps it replaces the shifted next-state targets.
    pub fn fit(
        &mut self,
        x: &DMatrix<f64>,
        time: &TimeBase,
        x_dot: Option<&DMatrix<f64>>,
    ) -> SindyResult<()> {
        self.fitted = None;
        let (inputs, targets) = self.training_pair(x, time, x_dot)?;
        self.fit_pairs(&inputs, &targets)
    }

    /// Fits on several trajectories of the same width. Each one is
    /// differentiated on its own before the rows are stacked.
    pub fn fit_trajectories(&mut self, trajectories: &[(DMatrix<f64>, TimeBase)]) -> SindyResult<()> {
        self.fitted = None;
        let Some((first, _)) = trajectories.first() else {
            return Err(SindyError::invalid("at least one trajectory is required"));
        };
        let width = first.ncols();

        let mut inputs = Vec::with_capacity(trajectories.len());
        let mut targets = Vec::with_capacity(trajectories.len());
        for (x, time) in trajectories {
            if x.ncols() != width {
                return Err(SindyError::DimensionMismatch {
                    expected: width,
                    actual: x.ncols(),
                });
            }
            let (input, target) = self.training_pair(x, time, None)?;
            inputs.push(input);
            targets.push(target);
        }
        self.fit_pairs(&stack_rows(&inputs, width), &stack_rows(&targets, width))
    }

    fn training_pair(
        &self,
        x: &DMatrix<f64>,
        time: &TimeBase,
        x_dot: Option<&DMatrix<f64>>,
    ) -> SindyResult<(DMatrix<f64>, DMatrix<f64>)> {
        time.validate(x.nrows())?;
        if let Some(x_dot) = x_dot {
            if x_dot.nrows() != x.nrows() {
                return Err(SindyError::ShapeMismatch {
                    what: "precomputed derivative rows",
                    expected: x.nrows(),
                    actual: x_dot.nrows(),
                });
            }
            if x_dot.ncols() != x.ncols() {
                return Err(SindyError::ShapeMismatch {
                    what: "precomputed derivative columns",
                    expected: x.ncols(),
                    actual: x_dot.ncols(),
                });
            }
            return Ok((x.clone(), x_dot.clone()));
        }

        match self.config.kind {
            SystemKind::Flow => {
                let x_dot = self.config.differentiation.differentiate(x, time)?;
                Ok((x.clone(), x_dot))
            }
            SystemKind::Map => {
                let n = x.nrows();
                if n < 2 {
                    return Err(SindyError::InsufficientSamples {
                        required: 2,
                        actual: n,
                    });
                }
                Ok((x.rows(0, n - 1).into_owned(), x.rows(1, n - 1).into_owned()))
            }
        }
    }

    fn fit_pairs(&mut self, inputs: &DMatrix<f64>, targets: &DMatrix<f64>) -> SindyResult<()> {
        let input_names = match &self.config.feature_names {
            Some(names) if names.len() != inputs.ncols() => {
                return Err(SindyError::ShapeMismatch {
                    what: "feature names",
                    expected: inputs.ncols(),
                    actual: names.len(),
                });
            }
            Some(names) => names.clone(),
            None => default_input_names(inputs.ncols()),
        };

        let mut library = FeatureLibrary::new(self.config.library.clone());
        let (theta, _) = library.fit_transform(inputs)?;
        let feature_names = library.feature_names(Some(&input_names))?;
        let report = optimizer::solve_with_report(&theta, targets, &self.config.optimizer)?;

        info!(
            n_samples = inputs.nrows(),
            n_features = theta.ncols(),
            complexity = report.coefficients.iter().filter(|c| **c != 0.0).count(),
            inactive_targets = report.inactive_targets.len(),
            "model fit"
        );

        self.fitted = Some(FittedState {
            library,
            input_names,
            feature_names,
            coefficients: report.coefficients,
        });
        Ok(())
    }

    fn fitted(&self) -> SindyResult<&FittedState> {
        self.fitted.as_ref().ok_or(SindyError::ModelNotFit)
    }

    /// Θ(x) Ξ: derivatives for flows, next states for maps.
    pub fn predict(&self, x: &DMatrix<f64>) -> SindyResult<DMatrix<f64>> {
        let fitted = self.fitted()?;
        let theta = fitted.library.transform(x)?;
        Ok(theta * &fitted.coefficients)
    }

    /// Integrates the discovered equations from `x0`, returning one row per
    /// entry of `times` (row 0 is `x0`). Integrator failures are returned as
    /// [`SindyError::Integration`].
    pub fn simulate(
        &self,
        x0: &[f64],
        times: &[f64],
        settings: &SimulationSettings,
    ) -> SindyResult<DMatrix<f64>> {
        let fitted = self.fitted()?;
        let n_state = fitted.coefficients.ncols();
        if x0.len() != n_state {
            return Err(SindyError::DimensionMismatch {
                expected: n_state,
                actual: x0.len(),
            });
        }
        if times.is_empty() {
            return Err(SindyError::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }
        TimeBase::Samples(times.to_vec()).validate(times.len())?;

        let system = DiscoveredSystem::new(fitted)?;
        Ok(integrate(&system, self.config.kind, x0, times, settings)?)
    }

    /// Compares the model output on `x` against the reference: numerical
    /// derivatives for flows, shifted next states for maps.
    pub fn score(&self, x: &DMatrix<f64>, time: &TimeBase, metric: Metric) -> SindyResult<f64> {
        self.fitted()?;
        let (inputs, truth) = self.training_pair(x, time, None)?;
        let predicted = self.predict(&inputs)?;
        metric.evaluate(&truth, &predicted)
    }

    /// Right-hand sides of the discovered equations over nonzero terms only.
    pub fn equations(&self, precision: usize) -> SindyResult<Vec<String>> {
        let fitted = self.fitted()?;
        let coefficients = &fitted.coefficients;
        let mut equations = Vec::with_capacity(coefficients.ncols());
        for j in 0..coefficients.ncols() {
            let mut rendered = String::new();
            for (k, name) in fitted.feature_names.iter().enumerate() {
                let c = coefficients[(k, j)];
                if c == 0.0 {
                    continue;
                }
                let magnitude = if rendered.is_empty() {
                    format_coefficient(c, precision)
                } else if c < 0.0 {
                    rendered.push_str(" - ");
                    format_coefficient(-c, precision)
                } else {
                    rendered.push_str(" + ");
                    format_coefficient(c, precision)
                };
                rendered.push_str(&magnitude);
                if name != "1" {
                    rendered.push(' ');
                    rendered.push_str(name);
                }
            }
            if rendered.is_empty() {
                rendered.push('0');
            }
            equations.push(rendered);
        }
        Ok(equations)
    }

    /// One line per state, e.g. `dx0/dt = -10.000 x0 + 10.000 x1`.
    pub fn describe(&self) -> SindyResult<Vec<String>> {
        self.describe_with_precision(3)
    }

    pub fn describe_with_precision(&self, precision: usize) -> SindyResult<Vec<String>> {
        let fitted = self.fitted()?;
        let equations = self.equations(precision)?;
        Ok(fitted
            .input_names
            .iter()
            .zip(equations)
            .map(|(name, rhs)| match self.config.kind {
                SystemKind::Flow => format!("d{name}/dt = {rhs}"),
                SystemKind::Map => format!("{name}[k+1] = {rhs}"),
            })
            .collect())
    }

    pub fn coefficients(&self) -> SindyResult<&DMatrix<f64>> {
        Ok(&self.fitted()?.coefficients)
    }

    pub fn feature_names(&self) -> SindyResult<&[String]> {
        Ok(&self.fitted()?.feature_names)
    }

    /// Number of nonzero coefficients.
    pub fn complexity(&self) -> SindyResult<usize> {
        Ok(self
            .fitted()?
            .coefficients
            .iter()
            .filter(|c| **c != 0.0)
            .count())
    }

    pub fn n_state(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.coefficients.ncols())
    }

    pub fn to_json(&self) -> SindyResult<String> {
        let fitted = self.fitted()?;
        let coefficients = &fitted.coefficients;
        let snapshot = ModelSnapshot {
            config: self.config.clone(),
            input_names: fitted.input_names.clone(),
            feature_names: fitted.feature_names.clone(),
            coefficients: (0..coefficients.nrows())
                .map(|k| coefficients.row(k).iter().copied().collect())
                .collect(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Restores a model written by [`SindyModel::to_json`]. The library is
    /// rebuilt from the stored configuration and checked against the stored
    /// names.
    pub fn from_json(json: &str) -> SindyResult<Self> {
        let snapshot: ModelSnapshot = serde_json::from_str(json)?;
        let n_inputs = snapshot.input_names.len();

        let mut library = FeatureLibrary::new(snapshot.config.library.clone());
        library.fit(n_inputs)?;
        let feature_names = library.feature_names(Some(&snapshot.input_names))?;
        if feature_names != snapshot.feature_names {
            return Err(SindyError::invalid(
                "stored feature names do not match the stored library configuration",
            ));
        }
        if snapshot.coefficients.len() != feature_names.len() {
            return Err(SindyError::ShapeMismatch {
                what: "coefficient rows",
                expected: feature_names.len(),
                actual: snapshot.coefficients.len(),
            });
        }
        if let Some(row) = snapshot.coefficients.iter().find(|r| r.len() != n_inputs) {
            return Err(SindyError::ShapeMismatch {
                what: "coefficient columns",
                expected: n_inputs,
                actual: row.len(),
            });
        }
        let coefficients = DMatrix::from_fn(feature_names.len(), n_inputs, |k, j| {
            snapshot.coefficients[k][j]
        });

        Ok(Self {
            config: snapshot.config,
            fitted: Some(FittedState {
                library,
                input_names: snapshot.input_names,
                feature_names,
                coefficients,
            }),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ModelSnapshot {
    config: SindyConfig,
    input_names: Vec<String>,
    feature_names: Vec<String>,
    coefficients: Vec<Vec<f64>>,
}

/// Fixed-point to `precision` decimals; exponent form when that would print
/// a nonzero coefficient as zero.
fn format_coefficient(c: f64, precision: usize) -> String {
    let smallest = 10f64.powi(-(precision as i32));
    if c.abs() < smallest {
        format!("{c:.precision$e}")
    } else {
        format!("{c:.precision$}")
    }
}

fn stack_rows(blocks: &[DMatrix<f64>], width: usize) -> DMatrix<f64> {
    let total: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut stacked = DMatrix::zeros(total, width);
    let mut offset = 0;
    for block in blocks {
        stacked.rows_mut(offset, block.nrows()).copy_from(block);
        offset += block.nrows();
    }
    stacked
}

/// f(x) = Θ(x) Ξ, closed over the fitted terms and coefficients.
struct DiscoveredSystem<'a> {
    terms: &'a [Term],
    /// Nonzero (feature, coefficient) pairs per state.
    active: Vec<Vec<(usize, f64)>>,
    features: RefCell<Vec<f64>>,
}

impl<'a> DiscoveredSystem<'a> {
    fn new(fitted: &'a FittedState) -> SindyResult<Self> {
        let terms = fitted.library.terms().ok_or(SindyError::ModelNotFit)?;
        let coefficients = &fitted.coefficients;
        let active = (0..coefficients.ncols())
            .map(|j| {
                (0..coefficients.nrows())
                    .filter_map(|k| {
                        let c = coefficients[(k, j)];
                        (c != 0.0).then_some((k, c))
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            terms,
            active,
            features: RefCell::new(vec![0.0; terms.len()]),
        })
    }
}

impl DynamicalSystem<f64> for DiscoveredSystem<'_> {
    fn dimension(&self) -> usize {
        self.active.len()
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let mut features = self.features.borrow_mut();
        for (slot, term) in features.iter_mut().zip(self.terms) {
            *slot = term.evaluate(x);
        }
        for (j, terms) in self.active.iter().enumerate() {
            out[j] = terms.iter().map(|&(k, c)| c * features[k]).sum();
        }
    }
}
