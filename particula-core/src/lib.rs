pub mod analyzer;
pub mod ast;
pub mod diagnostics;
pub mod domain;
pub mod equation;
pub mod error;
pub mod eval;
pub mod expr;
pub mod external;
pub mod functions;
pub mod integrator;
pub mod interaction;
pub mod pairs;
pub mod parser;
pub mod runtime;
pub mod symbol;
pub mod tensor;
pub mod workspace;

pub use analyzer::analyze_program;
pub use diagnostics::{Diagnostic, DiagnosticSeverity, Diagnostics, SourceLocation, Span};
pub use domain::{Boundary, Domain, DomainError, PeriodicPolicy};
pub use equation::Equation;
pub use error::{Error, SetupError};
pub use eval::{EvalError, Evaluator, GlobalCache};
pub use expr::{ExprArena, ExprId, Expression};
pub use external::{CouplingBuffers, ExternalCoupling, ExternalError, ExternalSolver};
pub use functions::Func;
pub use pairs::Pairs;
pub use parser::{parse_equation, parse_expression, parse_program, ParseError};
pub use runtime::{run_program, RunReport, Simulation, SimulationSettings, Stage, StepOutcome};
pub use symbol::{Symbol, SymbolKind};
pub use tensor::{Tensor, TensorError};
pub use workspace::{SymbolId, Workspace, WorkspaceError};

// Test helpers module (public for integration tests)
// Always compiled - integration tests are separate crates and need access
pub mod tests;
