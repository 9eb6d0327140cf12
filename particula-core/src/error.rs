use crate::domain::DomainError;
use crate::equation::SolveError;
use crate::eval::EvalError;
use crate::parser::ParseError;
use crate::workspace::WorkspaceError;
use thiserror::Error;

/// Problems found while turning a parsed program into a runnable simulation
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("program has {} error(s):\n{}", .0.len(), .0.join("\n"))]
    Analysis(Vec<String>),
    #[error("missing 'domain' declaration")]
    MissingDomain,
    #[error("particle {index} has {got} coordinate(s) but the domain has {dim} axes")]
    PositionShape { index: usize, got: usize, dim: usize },
    #[error("initial value of '{name}': {source}")]
    Init {
        name: String,
        #[source]
        source: EvalError,
    },
    #[error("equation {name} ({text}): {source}")]
    Equation {
        name: String,
        text: String,
        #[source]
        source: EvalError,
    },
    #[error("equation {name} assigns a per-particle value to scalar '{lhs}'")]
    ScalarTarget { name: String, lhs: String },
    #[error("cannot start {threads} worker thread(s): {message}")]
    ThreadPool { threads: usize, message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Any failure from parsing through running a simulation
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("external solver '{name}' failed: {message}")]
    External { name: String, message: String },
}

impl From<SolveError> for Error {
    fn from(e: SolveError) -> Self {
        match e {
            SolveError::Eval(e) => Error::Eval(e),
            SolveError::Workspace(e) => Error::Workspace(e),
        }
    }
}
