use super::{Term, TermGenerator};
use crate::error::{SindyError, SindyResult};
use serde::{Deserialize, Serialize};

/// Monomials of the state with total degree in `min_degree..=max_degree`.
///
/// Within a degree, terms follow lexicographic order of their sorted index
/// multisets: for two states and degree 2 that is `x0^2, x0 x1, x1^2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolynomialTerms {
    pub min_degree: usize,
    pub max_degree: usize,
    /// Only products of distinct states (no powers).
    #[serde(default)]
    pub interaction_only: bool,
}

impl PolynomialTerms {
    pub fn up_to(max_degree: usize) -> Self {
        Self {
            min_degree: 1,
            max_degree,
            interaction_only: false,
        }
    }

    pub(crate) fn validate(&self) -> SindyResult<()> {
        if self.min_degree == 0 {
            return Err(SindyError::invalid(
                "polynomial min_degree must be at least 1; use the constant generator for a bias",
            ));
        }
        if self.min_degree > self.max_degree {
            return Err(SindyError::invalid(format!(
                "polynomial min_degree {} exceeds max_degree {}",
                self.min_degree, self.max_degree
            )));
        }
        Ok(())
    }
}

impl TermGenerator for PolynomialTerms {
    fn generate(&self, n_inputs: usize) -> Vec<Term> {
        (self.min_degree..=self.max_degree)
            .flat_map(|degree| combinations(n_inputs, degree, !self.interaction_only))
            .map(Term::Monomial)
            .collect()
    }
}

/// All sorted index tuples of length `k` drawn from `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize, with_replacement: bool) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if n == 0 || k == 0 || (!with_replacement && k > n) {
        return out;
    }

    let mut idx: Vec<usize> = if with_replacement {
        vec![0; k]
    } else {
        (0..k).collect()
    };

    loop {
        out.push(idx.clone());

        let limit = |p: usize| if with_replacement { n - 1 } else { n - k + p };
        let Some(pos) = (0..k).rev().find(|&p| idx[p] < limit(p)) else {
            return out;
        };

        idx[pos] += 1;
        for p in pos + 1..k {
            idx[p] = if with_replacement {
                idx[pos]
            } else {
                idx[p - 1] + 1
            };
        }
    }
}
