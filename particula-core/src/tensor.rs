//! Dense tensor values up to 3x3
//!
//! `Tensor` is the universal value type flowing through expressions. It is a
//! plain `Copy` value with inline storage, so evaluating an expression tree
//! never allocates.

use glam::{DMat2, DMat3, DVec3};
use std::fmt;
use std::ops::{Mul, Neg};
use std::str::FromStr;
use thiserror::Error;

/// Largest number of rows or columns a tensor can hold
pub const MAX_DIM: usize = 3;

const QR_MAX_ITERATIONS: usize = 200;
const QR_TOLERANCE: f64 = 1e-12;
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Errors raised by tensor arithmetic
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    #[error("shape mismatch in '{op}': {left:?} vs {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("division by a non-scalar of shape {0:?}")]
    NonScalarDivisor((usize, usize)),
    #[error("'{op}' requires a square tensor, got {shape:?}")]
    NotSquare {
        op: &'static str,
        shape: (usize, usize),
    },
    #[error("'{op}' requires a vector, got {shape:?}")]
    NotVector {
        op: &'static str,
        shape: (usize, usize),
    },
    #[error("invalid tensor shape {0}x{1}")]
    InvalidShape(usize, usize),
    #[error("index ({0}, {1}) out of range")]
    OutOfRange(usize, usize),
    #[error("invalid tensor literal '{0}'")]
    InvalidLiteral(String),
}

/// Dense row-major tensor with at most 3 rows and 3 columns
#[derive(Clone, Copy, PartialEq)]
pub struct Tensor {
    rows: u8,
    cols: u8,
    data: [f64; MAX_DIM * MAX_DIM],
}

impl Tensor {
    /// Build a tensor from row-major values
    pub fn new(rows: usize, cols: usize, values: &[f64]) -> Result<Self, TensorError> {
        if rows > MAX_DIM || cols > MAX_DIM || values.len() != rows * cols {
            return Err(TensorError::InvalidShape(rows, cols));
        }
        let mut data = [0.0; MAX_DIM * MAX_DIM];
        data[..values.len()].copy_from_slice(values);
        Ok(Self {
            rows: rows as u8,
            cols: cols as u8,
            data,
        })
    }

    pub fn scalar(value: f64) -> Self {
        let mut data = [0.0; MAX_DIM * MAX_DIM];
        data[0] = value;
        Self {
            rows: 1,
            cols: 1,
            data,
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self, TensorError> {
        if rows > MAX_DIM || cols > MAX_DIM {
            return Err(TensorError::InvalidShape(rows, cols));
        }
        Self::new(rows, cols, &[0.0; MAX_DIM * MAX_DIM][..rows * cols])
    }

    pub fn identity(n: usize) -> Result<Self, TensorError> {
        let mut t = Self::zeros(n, n)?;
        for k in 0..n {
            t.data[k * n + k] = 1.0;
        }
        Ok(t)
    }

    /// Row vector from the given components, the shape of a `1;2;3` literal
    pub fn vector(components: &[f64]) -> Result<Self, TensorError> {
        Self::new(1, components.len(), components)
    }

    pub fn rows(&self) -> usize {
        self.rows as usize
    }

    pub fn cols(&self) -> usize {
        self.cols as usize
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    /// True for column or row vectors (and scalars)
    pub fn is_vector(&self) -> bool {
        self.rows == 1 || self.cols == 1
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data[..self.len()]
    }

    /// The first element, which is the value of a scalar
    pub fn value(&self) -> f64 {
        self.data[0]
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, TensorError> {
        if row >= self.rows() || col >= self.cols() {
            return Err(TensorError::OutOfRange(row, col));
        }
        Ok(self.data[row * self.cols() + col])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), TensorError> {
        if row >= self.rows() || col >= self.cols() {
            return Err(TensorError::OutOfRange(row, col));
        }
        let cols = self.cols();
        self.data[row * cols + col] = value;
        Ok(())
    }

    /// Nonzero scalars, and tensors with any nonzero entry, are true
    pub fn is_truthy(&self) -> bool {
        self.as_slice().iter().any(|v| *v != 0.0)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let mut out = *self;
        for v in out.data[..self.len()].iter_mut() {
            *v = f(*v);
        }
        out
    }

    /// Elementwise combination; a 1x1 operand broadcasts against any shape
    pub fn zip_with(
        &self,
        other: &Self,
        op: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, TensorError> {
        if self.shape() == other.shape() {
            let mut out = *self;
            for k in 0..self.len() {
                out.data[k] = f(self.data[k], other.data[k]);
            }
            Ok(out)
        } else if other.is_scalar() {
            let b = other.value();
            Ok(self.map(|a| f(a, b)))
        } else if self.is_scalar() {
            let a = self.value();
            Ok(other.map(|b| f(a, b)))
        } else {
            Err(TensorError::ShapeMismatch {
                op,
                left: self.shape(),
                right: other.shape(),
            })
        }
    }

    /// Fill `shape` from a 1x1 value; any other value must already have it
    pub fn broadcast(&self, shape: (usize, usize)) -> Result<Self, TensorError> {
        if self.shape() == shape {
            return Ok(*self);
        }
        if !self.is_scalar() {
            return Err(TensorError::ShapeMismatch {
                op: "broadcast",
                left: self.shape(),
                right: shape,
            });
        }
        let b = self.value();
        Ok(Self::zeros(shape.0, shape.1)?.map(|_| b))
    }

    pub fn try_add(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, "+", |a, b| a + b)
    }

    pub fn try_sub(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, "-", |a, b| a - b)
    }

    /// Term-wise product (`:`)
    pub fn hadamard(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, ":", |a, b| a * b)
    }

    /// Term-wise quotient (`%`)
    pub fn termwise_div(&self, other: &Self) -> Result<Self, TensorError> {
        self.zip_with(other, "%", |a, b| a / b)
    }

    /// Matrix product, or scaling when either side is a scalar
    pub fn try_mul(&self, other: &Self) -> Result<Self, TensorError> {
        if self.is_scalar() || other.is_scalar() {
            return self.zip_with(other, "*", |a, b| a * b);
        }
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                op: "*",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (n, m, p) = (self.rows(), self.cols(), other.cols());
        let mut out = Self::zeros(n, p)?;
        for r in 0..n {
            for c in 0..p {
                let mut acc = 0.0;
                for k in 0..m {
                    acc += self.data[r * m + k] * other.data[k * p + c];
                }
                out.data[r * p + c] = acc;
            }
        }
        Ok(out)
    }

    /// Division is only defined for a scalar divisor
    pub fn try_div(&self, other: &Self) -> Result<Self, TensorError> {
        if !other.is_scalar() {
            return Err(TensorError::NonScalarDivisor(other.shape()));
        }
        let d = other.value();
        Ok(self.map(|a| a / d))
    }

    /// Elementwise power with a scalar exponent
    pub fn try_pow(&self, exponent: &Self) -> Result<Self, TensorError> {
        self.zip_with(exponent, "^", f64::powf)
    }

    pub fn transpose(&self) -> Self {
        let mut out = *self;
        out.rows = self.cols;
        out.cols = self.rows;
        let (r, c) = self.shape();
        for i in 0..r {
            for j in 0..c {
                out.data[j * r + i] = self.data[i * c + j];
            }
        }
        out
    }

    fn require_square(&self, op: &'static str) -> Result<usize, TensorError> {
        if self.rows != self.cols {
            return Err(TensorError::NotSquare {
                op,
                shape: self.shape(),
            });
        }
        Ok(self.rows())
    }

    pub fn trace(&self) -> Result<f64, TensorError> {
        let n = self.require_square("trace")?;
        Ok((0..n).map(|k| self.data[k * n + k]).sum())
    }

    pub fn determinant(&self) -> Result<f64, TensorError> {
        match self.require_square("det")? {
            0 => Ok(1.0),
            1 => Ok(self.data[0]),
            2 => Ok(DMat2::from_cols_array(&[
                self.data[0],
                self.data[1],
                self.data[2],
                self.data[3],
            ])
            .determinant()),
            _ => Ok(DMat3::from_cols_array(&self.nine()).determinant()),
        }
    }

    /// Matrix inverse, or `None` when the matrix is singular
    pub fn inverse(&self) -> Result<Option<Self>, TensorError> {
        let n = self.require_square("inv")?;
        let det = self.determinant()?;
        if !det.is_finite() || det.abs() < SINGULAR_TOLERANCE {
            return Ok(None);
        }
        // Row-major data read as column-major is the transpose; the inverse of
        // the transpose read back column-major is the row-major inverse.
        let inv = match n {
            0 => *self,
            1 => Self::scalar(1.0 / self.data[0]),
            2 => {
                let m = DMat2::from_cols_array(&[
                    self.data[0],
                    self.data[1],
                    self.data[2],
                    self.data[3],
                ])
                .inverse();
                Self::new(2, 2, &m.to_cols_array())?
            }
            _ => Self::new(3, 3, &DMat3::from_cols_array(&self.nine()).inverse().to_cols_array())?,
        };
        Ok(Some(inv))
    }

    fn nine(&self) -> [f64; 9] {
        let mut out = [0.0; 9];
        out.copy_from_slice(&self.data);
        out
    }

    /// Frobenius norm
    pub fn norm(&self) -> f64 {
        self.as_slice().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn dot(&self, other: &Self) -> Result<f64, TensorError> {
        if self.len() != other.len() || !self.is_vector() || !other.is_vector() {
            return Err(TensorError::ShapeMismatch {
                op: "dot",
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(self
            .as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Cross product of 3-vectors; for 2-vectors the scalar z component
    pub fn cross(&self, other: &Self) -> Result<Self, TensorError> {
        let mismatch = || TensorError::ShapeMismatch {
            op: "cross",
            left: self.shape(),
            right: other.shape(),
        };
        if !self.is_vector() || !other.is_vector() || self.len() != other.len() {
            return Err(mismatch());
        }
        match self.len() {
            2 => {
                let (a, b) = (self.as_slice(), other.as_slice());
                Ok(Self::scalar(a[0] * b[1] - a[1] * b[0]))
            }
            3 => {
                let c = self.to_dvec3().cross(other.to_dvec3());
                let mut out = *self;
                out.data[..3].copy_from_slice(&c.to_array());
                Ok(out)
            }
            _ => Err(mismatch()),
        }
    }

    /// Position-like view: the first three entries padded with zeros
    pub fn to_dvec3(&self) -> DVec3 {
        let s = self.as_slice();
        DVec3::new(
            s.first().copied().unwrap_or(0.0),
            s.get(1).copied().unwrap_or(0.0),
            s.get(2).copied().unwrap_or(0.0),
        )
    }

    /// Row vector holding the first `dim` components of `v`
    pub fn from_dvec3(v: DVec3, dim: usize) -> Self {
        let mut data = [0.0; MAX_DIM * MAX_DIM];
        data[..3].copy_from_slice(&v.to_array());
        for slot in data.iter_mut().skip(dim) {
            *slot = 0.0;
        }
        Self {
            rows: 1,
            cols: dim.min(MAX_DIM) as u8,
            data,
        }
    }

    /// Eigenvalues (row vector) and eigenvectors (columns) via
    /// unshifted QR iteration. Exact for symmetric matrices; for general
    /// matrices the diagonal of the last iterate is returned.
    pub fn eigen(&self) -> Result<(Self, Self), TensorError> {
        let n = self.require_square("eig")?;
        let mut a = *self;
        let mut v = Self::identity(n)?;
        for _ in 0..QR_MAX_ITERATIONS {
            let (q, r) = a.qr()?;
            a = r.try_mul(&q)?;
            v = v.try_mul(&q)?;
            let off: f64 = (0..n)
                .flat_map(|i| (0..i).map(move |j| (i, j)))
                .map(|(i, j)| a.data[i * n + j].abs())
                .sum();
            if off < QR_TOLERANCE {
                break;
            }
        }
        let values: Vec<f64> = (0..n).map(|k| a.data[k * n + k]).collect();
        Ok((Self::new(1, n, &values)?, v))
    }

    /// Modified Gram-Schmidt QR decomposition of a square matrix
    fn qr(&self) -> Result<(Self, Self), TensorError> {
        let n = self.require_square("qr")?;
        let mut q = Self::zeros(n, n)?;
        let mut r = Self::zeros(n, n)?;
        let mut cols: Vec<[f64; MAX_DIM]> = (0..n)
            .map(|j| {
                let mut c = [0.0; MAX_DIM];
                for (i, slot) in c.iter_mut().enumerate().take(n) {
                    *slot = self.data[i * n + j];
                }
                c
            })
            .collect();
        for j in 0..n {
            let norm = cols[j][..n].iter().map(|x| x * x).sum::<f64>().sqrt();
            r.data[j * n + j] = norm;
            if norm > 0.0 {
                for i in 0..n {
                    q.data[i * n + j] = cols[j][i] / norm;
                }
            }
            for k in (j + 1)..n {
                let proj: f64 = (0..n).map(|i| q.data[i * n + j] * cols[k][i]).sum();
                r.data[j * n + k] = proj;
                for i in 0..n {
                    cols[k][i] -= proj * q.data[i * n + j];
                }
            }
        }
        Ok((q, r))
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Self::scalar(0.0)
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl Neg for Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        self.map(|v| -v)
    }
}

impl Mul<f64> for Tensor {
    type Output = Tensor;

    fn mul(self, rhs: f64) -> Tensor {
        self.map(|v| v * rhs)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{}x{}[{}]", self.rows, self.cols, self)
    }
}

/// Literal form: `;` between elements of a row, `|` between rows
impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (r, c) = self.shape();
        for i in 0..r {
            if i > 0 {
                f.write_str("|")?;
            }
            for j in 0..c {
                if j > 0 {
                    f.write_str(";")?;
                }
                write!(f, "{}", self.data[i * c + j])?;
            }
        }
        Ok(())
    }
}

/// Parses `"1;2;3|4;5;6"` row by row, so `"1;2"` is a 1x2 row vector and
/// `"1|2"` a 2x1 column
impl FromStr for Tensor {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TensorError::InvalidLiteral(s.to_string());
        let rows: Vec<Vec<f64>> = s
            .trim()
            .split('|')
            .map(|row| {
                row.split(';')
                    .map(|v| v.trim().parse::<f64>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?;
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(invalid());
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(rows.len(), cols, &flat)
    }
}
