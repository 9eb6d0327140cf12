//! Reductions over spatial neighbors and over the whole particle range

use crate::domain::Domain;
use crate::eval::EvalError;
use crate::functions::Reduction;
use crate::tensor::Tensor;
use glam::DVec3;

/// A value that can be accumulated by an interaction
pub trait Reducible: Sized {
    /// Result of reducing nothing: 0 for sums and counts, +inf for min,
    /// -inf for max
    fn empty(how: Reduction) -> Self;

    fn combine(self, other: Self, how: Reduction) -> Result<Self, EvalError>;

    fn scale(self, factor: f64) -> Self;
}

impl Reducible for f64 {
    fn empty(how: Reduction) -> Self {
        match how {
            Reduction::Min => f64::INFINITY,
            Reduction::Max => f64::NEG_INFINITY,
            Reduction::Sum | Reduction::Mean | Reduction::Count => 0.0,
        }
    }

    fn combine(self, other: Self, how: Reduction) -> Result<Self, EvalError> {
        Ok(match how {
            Reduction::Min => self.min(other),
            Reduction::Max => self.max(other),
            Reduction::Sum | Reduction::Mean | Reduction::Count => self + other,
        })
    }

    fn scale(self, factor: f64) -> Self {
        self * factor
    }
}

impl Reducible for Tensor {
    fn empty(how: Reduction) -> Self {
        Tensor::scalar(f64::empty(how))
    }

    /// Elementwise; the scalar identity broadcasts against the first
    /// contribution and takes its shape
    fn combine(self, other: Self, how: Reduction) -> Result<Self, EvalError> {
        let out = match how {
            Reduction::Min => self.zip_with(&other, "min", f64::min)?,
            Reduction::Max => self.zip_with(&other, "max", f64::max)?,
            Reduction::Sum | Reduction::Mean | Reduction::Count => self.try_add(&other)?,
        };
        Ok(out)
    }

    fn scale(self, factor: f64) -> Self {
        self * factor
    }
}

/// Reduce `contribute(j, x_i - x_j)` over the neighbors of `i` closer than
/// the domain cutoff. The domain must be up to date.
pub fn interact<T: Reducible>(
    domain: &Domain,
    positions: &[Tensor],
    i: usize,
    how: Reduction,
    mut contribute: impl FnMut(usize, DVec3) -> Result<T, EvalError>,
) -> Result<T, EvalError> {
    let cutoff = domain.cutoff();
    let mut acc = Some(T::empty(how));
    let mut count = 0usize;
    let mut failure = None;
    domain.for_each_neighbor(i, positions, |j, rij| {
        if failure.is_some() || rij.length() >= cutoff {
            return;
        }
        let step = contribute(j, rij).and_then(|value| match acc.take() {
            Some(a) => a.combine(value, how),
            None => Ok(value),
        });
        match step {
            Ok(value) => {
                acc = Some(value);
                count += 1;
            }
            Err(e) => failure = Some(e),
        }
    })?;
    if let Some(e) = failure {
        return Err(e);
    }
    let acc = acc.unwrap_or_else(|| T::empty(how));
    Ok(finish(acc, count, how))
}

/// Reduce `contribute(j)` over every particle `j` in `0..count`, in index
/// order
pub fn reduce_all<T: Reducible>(
    count: usize,
    how: Reduction,
    mut contribute: impl FnMut(usize) -> Result<T, EvalError>,
) -> Result<T, EvalError> {
    let mut acc = T::empty(how);
    for j in 0..count {
        acc = acc.combine(contribute(j)?, how)?;
    }
    Ok(finish(acc, count, how))
}

/// Fold already-evaluated contributions, in order
pub fn reduce_values<T: Reducible>(
    values: impl IntoIterator<Item = T>,
    how: Reduction,
) -> Result<T, EvalError> {
    let mut acc = T::empty(how);
    let mut count = 0;
    for value in values {
        acc = acc.combine(value, how)?;
        count += 1;
    }
    Ok(finish(acc, count, how))
}

fn finish<T: Reducible>(acc: T, count: usize, how: Reduction) -> T {
    match how {
        Reduction::Mean if count > 0 => acc.scale(1.0 / count as f64),
        _ => acc,
    }
}
