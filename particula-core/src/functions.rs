//! Built-in function and operator catalog
//!
//! Every named operation is one variant of [`Func`], chosen once when an
//! expression is parsed and dispatched by `match` at evaluation time.

use crate::eval::EvalError;
use crate::integrator;
use crate::tensor::Tensor;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

/// How an operation participates in evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    /// Pure function of its evaluated operands
    Pure,
    /// Draws from the per-particle random stream
    Random,
    /// Reduces over spatial neighbors
    Neighbor(Reduction),
    /// Reads the current neighbor or pair context
    PairContext,
    /// Reduces over every particle
    Global(Reduction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

/// Every operation an expression node can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    // operators
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Hadamard,
    TermDiv,
    Neg,
    // scalar math, applied elementwise
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Sign,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    PowF,
    Mod,
    // vectors and matrices
    Norm,
    Normalize,
    Dot,
    Cross,
    Det,
    Inv,
    Trans,
    Trace,
    Eig,
    EigVec,
    Identity,
    Entry,
    X,
    Y,
    Z,
    // comparisons and logic
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
    If,
    // random draws
    Rand,
    Randn,
    LogNormal,
    // integrators
    Euler,
    Predictor,
    Corrector,
    VerletX,
    VerletV,
    Clamp,
    // spatial interactions
    NSum,
    NMin,
    NMax,
    NCount,
    Nb,
    Rij,
    Rlen,
    // global reductions
    GSum,
    GMean,
    GMax,
    GMin,
}

const NAMED: &[(&str, Func)] = &[
    ("add", Func::Add),
    ("sub", Func::Sub),
    ("mul", Func::Mul),
    ("div", Func::Div),
    ("neg", Func::Neg),
    ("sin", Func::Sin),
    ("cos", Func::Cos),
    ("tan", Func::Tan),
    ("asin", Func::Asin),
    ("acos", Func::Acos),
    ("atan", Func::Atan),
    ("atan2", Func::Atan2),
    ("sinh", Func::Sinh),
    ("cosh", Func::Cosh),
    ("tanh", Func::Tanh),
    ("exp", Func::Exp),
    ("log", Func::Log),
    ("log10", Func::Log10),
    ("sqrt", Func::Sqrt),
    ("abs", Func::Abs),
    ("sign", Func::Sign),
    ("floor", Func::Floor),
    ("ceil", Func::Ceil),
    ("round", Func::Round),
    ("min", Func::Min),
    ("max", Func::Max),
    ("pow", Func::PowF),
    ("mod", Func::Mod),
    ("norm", Func::Norm),
    ("normalize", Func::Normalize),
    ("dot", Func::Dot),
    ("cross", Func::Cross),
    ("det", Func::Det),
    ("inv", Func::Inv),
    ("trans", Func::Trans),
    ("trace", Func::Trace),
    ("eig", Func::Eig),
    ("eigvec", Func::EigVec),
    ("identity", Func::Identity),
    ("entry", Func::Entry),
    ("x", Func::X),
    ("y", Func::Y),
    ("z", Func::Z),
    ("lt", Func::Lt),
    ("gt", Func::Gt),
    ("le", Func::Le),
    ("ge", Func::Ge),
    ("eq", Func::Eq),
    ("ne", Func::Ne),
    ("and", Func::And),
    ("or", Func::Or),
    ("not", Func::Not),
    ("if", Func::If),
    ("rand", Func::Rand),
    ("randn", Func::Randn),
    ("lognormal", Func::LogNormal),
    ("euler", Func::Euler),
    ("predictor", Func::Predictor),
    ("corrector", Func::Corrector),
    ("verlet_x", Func::VerletX),
    ("verlet_v", Func::VerletV),
    ("clamp", Func::Clamp),
    ("nsum", Func::NSum),
    ("nmin", Func::NMin),
    ("nmax", Func::NMax),
    ("ncount", Func::NCount),
    ("nb", Func::Nb),
    ("rij", Func::Rij),
    ("rlen", Func::Rlen),
    ("gsum", Func::GSum),
    ("gmean", Func::GMean),
    ("gmax", Func::GMax),
    ("gmin", Func::GMin),
];

impl Func {
    /// Look up a function by its source name
    pub fn from_name(name: &str) -> Option<Func> {
        NAMED.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Pow => "^",
            Func::Hadamard => ":",
            Func::TermDiv => "%",
            other => NAMED
                .iter()
                .find(|(_, f)| f == other)
                .map(|(n, _)| *n)
                .unwrap_or("?"),
        }
    }

    /// Whether `n` operands are valid for this operation
    pub fn accepts(&self, n: usize) -> bool {
        use Func::*;
        match self {
            Rand | NCount | Rij | Rlen => n == 0,
            Randn | LogNormal => n == 0 || n == 2,
            Neg | Sin | Cos | Tan | Asin | Acos | Atan | Sinh | Cosh | Tanh | Exp | Log
            | Log10 | Sqrt | Abs | Sign | Floor | Ceil | Round | Norm | Normalize | Det | Inv
            | Trans | Trace | Eig | EigVec | Identity | X | Y | Z | Not | NSum | NMin | NMax
            | Nb | GSum | GMean | GMax | GMin => n == 1,
            Add | Sub | Mul | Div | Pow | Hadamard | TermDiv | Atan2 | Min | Max | PowF | Mod
            | Dot | Cross | Lt | Gt | Le | Ge | Eq | Ne | And | Or => n == 2,
            Entry | If | Euler | Predictor | Corrector | VerletV | Clamp => n == 3,
            VerletX => n == 4,
        }
    }

    pub fn kind(&self) -> FuncKind {
        use Func::*;
        match self {
            Rand | Randn | LogNormal => FuncKind::Random,
            NSum => FuncKind::Neighbor(Reduction::Sum),
            NMin => FuncKind::Neighbor(Reduction::Min),
            NMax => FuncKind::Neighbor(Reduction::Max),
            NCount => FuncKind::Neighbor(Reduction::Count),
            Nb | Rij | Rlen => FuncKind::PairContext,
            GSum => FuncKind::Global(Reduction::Sum),
            GMean => FuncKind::Global(Reduction::Mean),
            GMax => FuncKind::Global(Reduction::Max),
            GMin => FuncKind::Global(Reduction::Min),
            _ => FuncKind::Pure,
        }
    }

    /// Extra operand reads at deeper history levels, as
    /// `(operand, level offset)`; their values are appended after the
    /// regular operands.
    pub fn history_reads(&self) -> &'static [(usize, usize)] {
        match self {
            Func::Corrector => &[(0, 1)],
            Func::VerletV => &[(1, 1)],
            _ => &[],
        }
    }

    /// Apply a pure operation to evaluated operands
    pub fn apply(&self, args: &[Tensor]) -> Result<Tensor, EvalError> {
        use Func::*;
        let a = |k: usize| args[k];
        let out = match self {
            Add => a(0).try_add(&a(1))?,
            Sub => a(0).try_sub(&a(1))?,
            Mul => a(0).try_mul(&a(1))?,
            Div => a(0).try_div(&a(1))?,
            Pow | PowF => a(0).try_pow(&a(1))?,
            Hadamard => a(0).hadamard(&a(1))?,
            TermDiv => a(0).termwise_div(&a(1))?,
            Neg => -a(0),
            Sin => a(0).map(f64::sin),
            Cos => a(0).map(f64::cos),
            Tan => a(0).map(f64::tan),
            Asin => a(0).map(f64::asin),
            Acos => a(0).map(f64::acos),
            Atan => a(0).map(f64::atan),
            Atan2 => a(0).zip_with(&a(1), "atan2", f64::atan2)?,
            Sinh => a(0).map(f64::sinh),
            Cosh => a(0).map(f64::cosh),
            Tanh => a(0).map(f64::tanh),
            Exp => a(0).map(f64::exp),
            Log => a(0).map(f64::ln),
            Log10 => a(0).map(f64::log10),
            Sqrt => a(0).map(f64::sqrt),
            Abs => a(0).map(f64::abs),
            Sign => a(0).map(|v| if v == 0.0 { 0.0 } else { v.signum() }),
            Floor => a(0).map(f64::floor),
            Ceil => a(0).map(f64::ceil),
            Round => a(0).map(f64::round),
            Min => a(0).zip_with(&a(1), "min", f64::min)?,
            Max => a(0).zip_with(&a(1), "max", f64::max)?,
            Mod => a(0).zip_with(&a(1), "mod", |x, m| x - m * (x / m).floor())?,
            Norm => Tensor::scalar(a(0).norm()),
            Normalize => {
                let n = a(0).norm();
                if n > 0.0 {
                    a(0) * (1.0 / n)
                } else {
                    a(0)
                }
            }
            Dot => Tensor::scalar(a(0).dot(&a(1))?),
            Cross => a(0).cross(&a(1))?,
            Det => Tensor::scalar(a(0).determinant()?),
            Inv => match a(0).inverse()? {
                Some(inv) => inv,
                None => {
                    warn!("singular matrix {} in inv(); using identity", a(0));
                    Tensor::identity(a(0).rows())?
                }
            },
            Trans => a(0).transpose(),
            Trace => Tensor::scalar(a(0).trace()?),
            Eig => a(0).eigen()?.0,
            EigVec => a(0).eigen()?.1,
            Identity => Tensor::identity(scalar_arg(&a(0), "identity")?.round() as usize)?,
            Entry => {
                let m = a(0);
                let r = index_arg(&a(1), &m)?;
                let c = index_arg(&a(2), &m)?;
                Tensor::scalar(m.get(r, c)?)
            }
            X => Tensor::scalar(component(&a(0), 0)?),
            Y => Tensor::scalar(component(&a(0), 1)?),
            Z => Tensor::scalar(component(&a(0), 2)?),
            Lt => a(0).zip_with(&a(1), "lt", |x, y| truth(x < y))?,
            Gt => a(0).zip_with(&a(1), "gt", |x, y| truth(x > y))?,
            Le => a(0).zip_with(&a(1), "le", |x, y| truth(x <= y))?,
            Ge => a(0).zip_with(&a(1), "ge", |x, y| truth(x >= y))?,
            Eq => a(0).zip_with(&a(1), "eq", |x, y| truth(x == y))?,
            Ne => a(0).zip_with(&a(1), "ne", |x, y| truth(x != y))?,
            And => Tensor::scalar(truth(a(0).is_truthy() && a(1).is_truthy())),
            Or => Tensor::scalar(truth(a(0).is_truthy() || a(1).is_truthy())),
            Not => Tensor::scalar(truth(!a(0).is_truthy())),
            If => {
                if a(0).is_truthy() {
                    a(1)
                } else {
                    a(2)
                }
            }
            Euler => integrator::euler(&a(0), &a(1), &a(2))?,
            Predictor => integrator::predictor(&a(0), &a(1), &a(2))?,
            Corrector => integrator::corrector(&a(3), &a(1), &a(2))?,
            VerletX => integrator::verlet_position(&a(0), &a(1), &a(2), &a(3))?,
            VerletV => integrator::verlet_velocity(&a(0), &a(3), &a(1), &a(2))?,
            Clamp => integrator::clamp(&a(0), &a(1), &a(2))?,
            Rand | Randn | LogNormal | NSum | NMin | NMax | NCount | Nb | Rij | Rlen | GSum
            | GMean | GMax | GMin => return Err(EvalError::NotPure(self.name())),
        };
        Ok(out)
    }

    /// Draw a random value; `rng` is seeded per particle, step and node
    pub fn draw(&self, args: &[Tensor], rng: &mut ChaCha8Rng) -> Result<Tensor, EvalError> {
        let (mu, sigma) = match args {
            [] => (0.0, 1.0),
            [m, s] => (scalar_arg(m, self.name())?, scalar_arg(s, self.name())?),
            _ => return Err(EvalError::Arity {
                func: self.name(),
                got: args.len(),
            }),
        };
        let value = match self {
            Func::Rand => rng.gen::<f64>(),
            Func::Randn => mu + sigma * standard_normal(rng),
            Func::LogNormal => (mu + sigma * standard_normal(rng)).exp(),
            _ => return Err(EvalError::NotPure(self.name())),
        };
        Ok(Tensor::scalar(value))
    }
}

/// Box-Muller transform over two uniform draws
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn scalar_arg(t: &Tensor, func: &'static str) -> Result<f64, EvalError> {
    if !t.is_scalar() {
        return Err(EvalError::ExpectedScalar {
            func,
            shape: t.shape(),
        });
    }
    Ok(t.value())
}

// Row or column index of `entry`: a whole, non-negative scalar
fn index_arg(index: &Tensor, of: &Tensor) -> Result<usize, EvalError> {
    let k = scalar_arg(index, "entry")?;
    if k < 0.0 || k.fract() != 0.0 || !k.is_finite() {
        return Err(EvalError::BadIndex {
            index: k,
            shape: of.shape(),
        });
    }
    Ok(k as usize)
}

fn component(t: &Tensor, k: usize) -> Result<f64, EvalError> {
    if !t.is_vector() || k >= t.len() {
        return Err(EvalError::Component {
            index: k,
            shape: t.shape(),
        });
    }
    Ok(t.as_slice()[k])
}
