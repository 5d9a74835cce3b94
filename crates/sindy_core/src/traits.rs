use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Numeric type accepted by the steppers.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A right-hand side that can be advanced by a stepper.
///
/// For continuous-time models `apply` writes dx/dt; for discrete-time models
/// it writes the next state x_{k+1}.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field (flow) or map at `x`, writing into `out`.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A solver that advances a system by one step.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt, updating `t` and `state` in place.
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
