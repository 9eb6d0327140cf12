//! Time-integration update formulas
//!
//! These are plain tensor functions; the operators that expose them read
//! earlier history levels of their operands where a scheme needs the
//! previous state.

use crate::tensor::{Tensor, TensorError};

/// Explicit Euler: `x + f*dt`
pub fn euler(x: &Tensor, f: &Tensor, dt: &Tensor) -> Result<Tensor, TensorError> {
    x.try_add(&f.try_mul(dt)?)
}

/// Half step used by predictor-corrector schemes: `x + f*dt/2`
pub fn predictor(x: &Tensor, f: &Tensor, dt: &Tensor) -> Result<Tensor, TensorError> {
    x.try_add(&(f.try_mul(dt)? * 0.5))
}

/// Full step from the state stored before the predictor: `x_prev + f*dt`
pub fn corrector(x_prev: &Tensor, f: &Tensor, dt: &Tensor) -> Result<Tensor, TensorError> {
    x_prev.try_add(&f.try_mul(dt)?)
}

/// Velocity-Verlet position update: `x + v*dt + a*dt^2/2`
pub fn verlet_position(
    x: &Tensor,
    v: &Tensor,
    a: &Tensor,
    dt: &Tensor,
) -> Result<Tensor, TensorError> {
    let dt2 = dt.hadamard(dt)?;
    x.try_add(&v.try_mul(dt)?)?
        .try_add(&(a.try_mul(&dt2)? * 0.5))
}

/// Velocity-Verlet velocity update: `v + (a_prev + a)*dt/2`
pub fn verlet_velocity(
    v: &Tensor,
    a_prev: &Tensor,
    a: &Tensor,
    dt: &Tensor,
) -> Result<Tensor, TensorError> {
    v.try_add(&(a_prev.try_add(a)?.try_mul(dt)? * 0.5))
}

/// Elementwise clamp into `[lo, hi]`; bounds may be scalars
pub fn clamp(x: &Tensor, lo: &Tensor, hi: &Tensor) -> Result<Tensor, TensorError> {
    x.zip_with(lo, "clamp", f64::max)?
        .zip_with(hi, "clamp", f64::min)
}
