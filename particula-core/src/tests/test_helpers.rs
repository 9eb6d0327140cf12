//! Test helper utilities for particula tests

use crate::ast::Expr;
use crate::domain::{Boundary, Domain};
use crate::equation::Equation;
use crate::expr::{ExprArena, Expression};
use crate::parser::{parse_equation, parse_program};
use crate::runtime::Simulation;
use crate::tensor::Tensor;
use crate::workspace::Workspace;
use std::fs;

/// Check if two floating point values are approximately equal within tolerance
pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

/// Elementwise comparison of two tensors of the same shape
pub fn tensor_approx_eq(a: &Tensor, b: &Tensor, tol: f64) -> bool {
    a.shape() == b.shape()
        && a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .all(|(x, y)| approx_eq(*x, *y, tol))
}

/// Parse and build a simulation without running it
pub fn build_source(source: &str) -> Result<Simulation, Box<dyn std::error::Error>> {
    let program = parse_program(source)?;
    Ok(Simulation::from_program(&program)?)
}

/// Run a simulation description from source string
pub fn run_source(source: &str) -> Result<Simulation, Box<dyn std::error::Error>> {
    Ok(crate::run_program(source)?)
}

/// Run a simulation description from a file path
pub fn run_file(file: &str) -> Result<Simulation, Box<dyn std::error::Error>> {
    let src = fs::read_to_string(file)?;
    run_source(&src)
}

/// Same program with the thread count on the `simulate` line replaced
pub fn with_threads(source: &str, threads: usize) -> Result<Simulation, Box<dyn std::error::Error>> {
    let mut program = parse_program(source)?;
    program.simulate.threads = Some(threads);
    let mut sim = Simulation::from_program(&program)?;
    sim.run()?;
    Ok(sim)
}

/// Workspace with `count` particles on a line at x = 0.5, 1.5, ... inside
/// a symmetric 1-D domain of unit cells
pub fn line_workspace(count: usize) -> Workspace {
    let mut workspace = Workspace::new();
    let domain = Domain::new(&[0], &[count.max(1) as i32], &[1.0], &[Boundary::Symmetric])
        .expect("valid domain");
    let positions: Vec<Tensor> = (0..count)
        .map(|i| Tensor::scalar(i as f64 + 0.5))
        .collect();
    workspace
        .add_particle_system("x", &positions, domain)
        .expect("particle system");
    workspace.update().expect("domain update");
    workspace
}

/// Build an equation from `lhs = rhs [# condition]` text against a workspace
pub fn equation(
    arena: &mut ExprArena,
    workspace: &Workspace,
    text: &str,
) -> Result<Equation, Box<dyn std::error::Error>> {
    let (lhs, rhs, condition) = parse_equation(text)?;
    let lhs = workspace
        .get_instance(&lhs)
        .ok_or_else(|| format!("unknown lhs '{}'", lhs))?;
    let lower = |arena: &mut ExprArena, e: &Expr, name: &str| -> Result<Expression, Box<dyn std::error::Error>> {
        let root = arena.lower(e, workspace)?;
        let mut expr = Expression::new(name, root);
        expr.assign(arena, workspace)?;
        Ok(expr)
    };
    let rhs = lower(arena, &rhs, "rhs")?;
    let condition = match condition {
        Some(c) => Some(lower(arena, &c, "condition")?),
        None => None,
    };
    Ok(Equation::new("test", lhs, rhs, condition, text))
}

/// Compare two simulations' current values of every per-particle symbol
pub fn results_approx_equal(a: &Simulation, b: &Simulation, tol: f64) -> bool {
    let (wa, wb) = (a.get_workspace(), b.get_workspace());
    if wa.particle_count() != wb.particle_count() {
        return false;
    }
    for (id, symbol) in wa.symbols() {
        let Some(other) = wb.get_instance(symbol.name()) else {
            return false;
        };
        for i in 0..symbol.field_size() {
            match (wa.value(id, i, 0), wb.value(other, i, 0)) {
                (Some(x), Some(y)) if tensor_approx_eq(&x, &y, tol) => {}
                _ => return false,
            }
        }
    }
    true
}
