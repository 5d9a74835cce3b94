//! Candidate-function libraries.
//!
//! A [`FeatureLibrary`] concatenates the terms of its generators in declared
//! order, dropping any term that an earlier generator already produced. The
//! term list depends only on the generator configuration and the number of
//! state columns, never on data values.

mod fourier;
mod polynomial;

pub use fourier::FourierTerms;
pub use polynomial::PolynomialTerms;

use crate::error::{SindyError, SindyResult};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// A single candidate function of the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Constant,
    /// Product of the listed state components; indices are sorted and repeat
    /// for powers, so `[0, 0, 1]` is `x0^2 x1`.
    Monomial(Vec<usize>),
    Sin { index: usize, frequency: f64 },
    Cos { index: usize, frequency: f64 },
}

impl Term {
    pub fn evaluate(&self, state: &[f64]) -> f64 {
        match self {
            Term::Constant => 1.0,
            Term::Monomial(indices) => indices.iter().map(|&i| state[i]).product(),
            Term::Sin { index, frequency } => (frequency * state[*index]).sin(),
            Term::Cos { index, frequency } => (frequency * state[*index]).cos(),
        }
    }

    pub fn name(&self, input_names: &[String]) -> String {
        match self {
            Term::Constant => "1".to_string(),
            Term::Monomial(indices) => {
                let mut parts = Vec::new();
                let mut k = 0;
                while k < indices.len() {
                    let index = indices[k];
                    let power = indices[k..].iter().take_while(|&&i| i == index).count();
                    if power == 1 {
                        parts.push(input_names[index].clone());
                    } else {
                        parts.push(format!("{}^{}", input_names[index], power));
                    }
                    k += power;
                }
                parts.join(" ")
            }
            Term::Sin { index, frequency } => {
                format!("sin({})", scaled_argument(*frequency, &input_names[*index]))
            }
            Term::Cos { index, frequency } => {
                format!("cos({})", scaled_argument(*frequency, &input_names[*index]))
            }
        }
    }
}

fn scaled_argument(frequency: f64, name: &str) -> String {
    if frequency == 1.0 {
        name.to_string()
    } else {
        format!("{frequency} {name}")
    }
}

/// Produces the candidate terms for a state of a given width.
pub trait TermGenerator {
    fn generate(&self, n_inputs: usize) -> Vec<Term>;
}

/// The closed set of generator families a library can be composed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Generator {
    Constant,
    Polynomial(PolynomialTerms),
    Fourier(FourierTerms),
}

impl Generator {
    fn validate(&self) -> SindyResult<()> {
        match self {
            Generator::Constant => Ok(()),
            Generator::Polynomial(p) => p.validate(),
            Generator::Fourier(f) => f.validate(),
        }
    }
}

impl TermGenerator for Generator {
    fn generate(&self, n_inputs: usize) -> Vec<Term> {
        match self {
            Generator::Constant => vec![Term::Constant],
            Generator::Polynomial(p) => p.generate(n_inputs),
            Generator::Fourier(f) => f.generate(n_inputs),
        }
    }
}

/// Default input names `x0, x1, ...`.
pub fn default_input_names(n_inputs: usize) -> Vec<String> {
    (0..n_inputs).map(|i| format!("x{i}")).collect()
}

#[derive(Debug, Clone)]
struct FittedTerms {
    n_inputs: usize,
    terms: Vec<Term>,
}

/// Composition of generators plus the term list fixed by the last fit.
#[derive(Debug, Clone)]
pub struct FeatureLibrary {
    generators: Vec<Generator>,
    fitted: Option<FittedTerms>,
}

impl Default for FeatureLibrary {
    /// Constant plus polynomials up to degree 2.
    fn default() -> Self {
        Self::polynomial(2)
    }
}

impl FeatureLibrary {
    pub fn new(generators: Vec<Generator>) -> Self {
        Self {
            generators,
            fitted: None,
        }
    }

    /// Bias column followed by all monomials of degree `1..=degree`.
    pub fn polynomial(degree: usize) -> Self {
        Self::new(vec![
            Generator::Constant,
            Generator::Polynomial(PolynomialTerms::up_to(degree)),
        ])
    }

    /// Appends a generator after the existing ones.
    pub fn with(mut self, generator: Generator) -> Self {
        self.generators.push(generator);
        self.fitted = None;
        self
    }

    /// Concatenates two libraries; `other`'s terms follow this library's.
    pub fn concat(mut self, other: FeatureLibrary) -> Self {
        self.generators.extend(other.generators);
        self.fitted = None;
        self
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    /// Forgets the fitted width so the library can be fit on new data.
    pub fn reset(&mut self) {
        self.fitted = None;
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn n_inputs(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_inputs)
    }

    /// The fitted term list, in column order.
    pub fn terms(&self) -> Option<&[Term]> {
        self.fitted.as_ref().map(|f| f.terms.as_slice())
    }

    pub fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.terms.len())
    }

    /// The de-duplicated term list for `n_inputs` state columns.
    pub fn candidate_terms(&self, n_inputs: usize) -> Vec<Term> {
        let mut terms: Vec<Term> = Vec::new();
        for generator in &self.generators {
            for term in generator.generate(n_inputs) {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
        terms
    }

    /// Fixes the term list for `n_inputs` state columns.
    pub fn fit(&mut self, n_inputs: usize) -> SindyResult<()> {
        if let Some(fitted) = &self.fitted {
            if fitted.n_inputs != n_inputs {
                return Err(SindyError::DimensionMismatch {
                    expected: fitted.n_inputs,
                    actual: n_inputs,
                });
            }
            return Ok(());
        }
        for generator in &self.generators {
            generator.validate()?;
        }
        let terms = self.candidate_terms(n_inputs);
        if terms.is_empty() {
            return Err(SindyError::EmptyLibrary);
        }
        self.fitted = Some(FittedTerms { n_inputs, terms });
        Ok(())
    }

    /// Fits on the width of `x` and evaluates every term on every row.
    pub fn fit_transform(&mut self, x: &DMatrix<f64>) -> SindyResult<(DMatrix<f64>, Vec<String>)> {
        self.fit(x.ncols())?;
        let theta = self.transform(x)?;
        let names = self.feature_names(None)?;
        Ok((theta, names))
    }

    /// Evaluates the fitted terms on `x` (one row per sample).
    pub fn transform(&self, x: &DMatrix<f64>) -> SindyResult<DMatrix<f64>> {
        let fitted = self.fitted_terms(x.ncols())?;
        let mut theta = DMatrix::zeros(x.nrows(), fitted.terms.len());
        let mut state = vec![0.0; x.ncols()];
        for i in 0..x.nrows() {
            for (j, slot) in state.iter_mut().enumerate() {
                *slot = x[(i, j)];
            }
            for (k, term) in fitted.terms.iter().enumerate() {
                theta[(i, k)] = term.evaluate(&state);
            }
        }
        Ok(theta)
    }

    /// Evaluates the fitted terms on a single state vector.
    pub fn transform_row(&self, state: &[f64], out: &mut [f64]) -> SindyResult<()> {
        let fitted = self.fitted_terms(state.len())?;
        if out.len() != fitted.terms.len() {
            return Err(SindyError::ShapeMismatch {
                what: "feature buffer",
                expected: fitted.terms.len(),
                actual: out.len(),
            });
        }
        for (slot, term) in out.iter_mut().zip(&fitted.terms) {
            *slot = term.evaluate(state);
        }
        Ok(())
    }

    /// Names of the fitted terms, rendered with `input_names` (or `x0, x1, ...`).
    pub fn feature_names(&self, input_names: Option<&[String]>) -> SindyResult<Vec<String>> {
        let fitted = self.fitted.as_ref().ok_or(SindyError::ModelNotFit)?;
        let defaults;
        let names = match input_names {
            Some(names) => {
                if names.len() != fitted.n_inputs {
                    return Err(SindyError::ShapeMismatch {
                        what: "input names",
                        expected: fitted.n_inputs,
                        actual: names.len(),
                    });
                }
                names
            }
            None => {
                defaults = default_input_names(fitted.n_inputs);
                &defaults[..]
            }
        };
        Ok(fitted.terms.iter().map(|t| t.name(names)).collect())
    }

    fn fitted_terms(&self, n_inputs: usize) -> SindyResult<&FittedTerms> {
        let fitted = self.fitted.as_ref().ok_or(SindyError::ModelNotFit)?;
        if fitted.n_inputs != n_inputs {
            return Err(SindyError::DimensionMismatch {
                expected: fitted.n_inputs,
                actual: n_inputs,
            });
        }
        Ok(fitted)
    }
}
