//! Error types for the identification engine.

use crate::solvers::IntegrationError;
use thiserror::Error;

/// Errors raised while differentiating, building features, regressing, or
/// driving a fitted model.
#[derive(Error, Debug)]
pub enum SindyError {
    #[error("Insufficient samples: need at least {required} rows, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Time sequence is not strictly increasing at index {index}")]
    NonMonotonicTime { index: usize },

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension mismatch: library was fit on {expected} state columns, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Feature library produced no candidate terms")]
    EmptyLibrary,

    #[error("Singular least-squares system for target column {target}: {what}")]
    SingularSystem { target: usize, what: String },

    #[error("Model has not been fit")]
    ModelNotFit,

    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    #[error("Integration failed: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SindyResult<T> = Result<T, SindyError>;

impl SindyError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        SindyError::InvalidArgument { what: what.into() }
    }
}
