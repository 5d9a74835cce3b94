//! The `sindy_core` crate discovers sparse governing equations from sampled
//! trajectories of a dynamical system.
//!
//! Key components:
//! - **Differentiation**: finite-difference (Fornberg weights) and spectral derivatives.
//! - **Library**: composable candidate-function generators (constant, polynomial, Fourier).
//! - **Optimizer**: sequentially thresholded least squares with optional ridge penalty.
//! - **Solvers**: RK4, Tsit5 and discrete-map steppers used to simulate discovered models.
//! - **Model**: `SindyModel`, which ties the pieces together.
pub mod differentiation;
pub mod error;
pub mod library;
pub mod model;
pub mod optimizer;
pub mod solvers;
pub mod traits;

pub use differentiation::{Differentiator, FiniteDifferenceSettings, TimeBase};
pub use error::{SindyError, SindyResult};
pub use library::{FeatureLibrary, FourierTerms, Generator, PolynomialTerms, Term, TermGenerator};
pub use model::{Metric, SindyConfig, SindyModel};
pub use optimizer::{StlsqReport, StlsqSettings};
pub use solvers::{integrate, IntegrationError, SimulationSettings, StepperKind, SystemKind};
