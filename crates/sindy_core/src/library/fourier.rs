use super::{Term, TermGenerator};
use crate::error::{SindyError, SindyResult};
use serde::{Deserialize, Serialize};

/// `sin(f x_j)` / `cos(f x_j)` for every configured frequency `f` and state `j`.
///
/// Order: frequency, then state, then sine before cosine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FourierTerms {
    pub frequencies: Vec<f64>,
    #[serde(default = "enabled")]
    pub include_sin: bool,
    #[serde(default = "enabled")]
    pub include_cos: bool,
}

fn enabled() -> bool {
    true
}

impl FourierTerms {
    /// Frequencies `1..=n_frequencies`, both sine and cosine.
    pub fn harmonics(n_frequencies: usize) -> Self {
        Self {
            frequencies: (1..=n_frequencies).map(|f| f as f64).collect(),
            include_sin: true,
            include_cos: true,
        }
    }

    pub(crate) fn validate(&self) -> SindyResult<()> {
        if let Some(bad) = self
            .frequencies
            .iter()
            .find(|f| !(f.is_finite() && **f > 0.0))
        {
            return Err(SindyError::invalid(format!(
                "Fourier frequency must be positive and finite, got {bad}"
            )));
        }
        Ok(())
    }
}

impl TermGenerator for FourierTerms {
    fn generate(&self, n_inputs: usize) -> Vec<Term> {
        let mut terms = Vec::new();
        for &frequency in &self.frequencies {
            for index in 0..n_inputs {
                if self.include_sin {
                    terms.push(Term::Sin { index, frequency });
                }
                if self.include_cos {
                    terms.push(Term::Cos { index, frequency });
                }
            }
        }
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harmonics_cover_every_state() {
        let terms = FourierTerms::harmonics(2).generate(3);
        assert_eq!(terms.len(), 2 * 2 * 3);
        assert_eq!(
            terms[0],
            Term::Sin {
                index: 0,
                frequency: 1.0
            }
        );
        assert_eq!(
            terms[1],
            Term::Cos {
                index: 0,
                frequency: 1.0
            }
        );
        assert_eq!(
            terms[6],
            Term::Sin {
                index: 0,
                frequency: 2.0
            }
        );
    }

    #[test]
    fn sine_only() {
        let generator = FourierTerms {
            frequencies: vec![1.0],
            include_sin: true,
            include_cos: false,
        };
        let terms = generator.generate(2);
        assert_eq!(terms.len(), 2);
        assert!(terms.iter().all(|t| matches!(t, Term::Sin { .. })));
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        let generator = FourierTerms {
            frequencies: vec![1.0, 0.0],
            include_sin: true,
            include_cos: true,
        };
        assert!(generator.validate().is_err());
    }
}
