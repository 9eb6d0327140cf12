//! Static checks on parsed simulation descriptions
//!
//! Catches naming and declaration mistakes before any workspace is built.

use crate::ast::{Expr, Program, StageDecl, SymbolDeclKind};
use crate::diagnostics::{Diagnostic, Diagnostics, Span};
use std::collections::HashMap;

/// Name of the automatically managed time variable
pub const TIME: &str = "t";
/// Name of the required time-step variable
pub const TIME_STEP: &str = "dt";
/// Series created by `pairs ... within`, holding the initial bond length
pub const REST_LENGTH: &str = "r0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Constant,
    Variable,
    Field,
    Positions,
}

/// Analyze a program and return diagnostics
pub fn analyze_program(program: &Program) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    let mut names: HashMap<&str, NameKind> = HashMap::new();

    if let Some(particles) = &program.particles {
        names.insert(&particles.name, NameKind::Positions);
        if program.domain.is_none() {
            diagnostics.push(Diagnostic::error(
                "particles need a 'domain' declaration",
                particles.span,
            ));
        }
    }

    // Symbols are initialized in order, so an init may only use names
    // declared above it
    for decl in &program.symbols {
        for used in decl.init.names() {
            if !names.contains_key(used) && used != TIME {
                diagnostics.push(Diagnostic::error(
                    format!("'{}' is used before it is declared", used),
                    decl.span,
                ));
            }
        }
        let kind = match decl.kind {
            SymbolDeclKind::Constant { .. } => NameKind::Constant,
            SymbolDeclKind::Variable => NameKind::Variable,
            SymbolDeclKind::Field { .. } => {
                if program.particles.is_none() {
                    diagnostics.push(Diagnostic::error(
                        format!("field '{}' needs a particle system", decl.name),
                        decl.span,
                    ));
                }
                NameKind::Field
            }
        };
        if names.insert(&decl.name, kind).is_some() {
            diagnostics.push(Diagnostic::error(
                format!("duplicate symbol '{}'", decl.name),
                decl.span,
            ));
        }
    }

    match names.get(TIME_STEP) {
        Some(NameKind::Variable) | Some(NameKind::Constant) => {}
        Some(_) => diagnostics.push(Diagnostic::error(
            format!("'{}' must be a scalar variable or constant", TIME_STEP),
            None,
        )),
        None => diagnostics.push(Diagnostic::error(
            format!("missing time step: declare 'variable {} = ...'", TIME_STEP),
            None,
        )),
    }
    if let Some(kind) = names.get(TIME) {
        if *kind != NameKind::Variable {
            diagnostics.push(Diagnostic::error(
                format!("'{}' is reserved for the simulation time and must be a variable", TIME),
                None,
            ));
        }
    }
    names.entry(TIME).or_insert(NameKind::Variable);

    let mut pair_lists: HashMap<&str, Option<Span>> = HashMap::new();
    for decl in &program.pairs {
        if program.particles.is_none() {
            diagnostics.push(Diagnostic::error(
                format!("pair list '{}' needs a particle system", decl.name),
                decl.span,
            ));
        }
        if pair_lists.insert(&decl.name, decl.span).is_some() {
            diagnostics.push(Diagnostic::error(
                format!("duplicate pair list '{}'", decl.name),
                decl.span,
            ));
        }
    }

    for lock in &program.locks {
        match names.get(lock.field.as_str()) {
            Some(NameKind::Field) | Some(NameKind::Positions) => {}
            Some(_) => diagnostics.push(Diagnostic::error(
                format!("only per-particle fields can be locked, '{}' is not one", lock.field),
                lock.span,
            )),
            None => diagnostics.push(Diagnostic::error(
                format!("unknown field '{}' in lock", lock.field),
                lock.span,
            )),
        }
    }

    for stage in &program.stages {
        match stage {
            StageDecl::Equation(eq) => {
                match names.get(eq.lhs.as_str()) {
                    None => diagnostics.push(Diagnostic::error(
                        format!("equation assigns to unknown symbol '{}'", eq.lhs),
                        eq.span,
                    )),
                    Some(NameKind::Constant) => diagnostics.push(Diagnostic::error(
                        format!("cannot assign to constant '{}'", eq.lhs),
                        eq.span,
                    )),
                    Some(_) if eq.lhs == TIME => diagnostics.push(Diagnostic::warning(
                        format!("'{}' is also advanced by dt after every step", TIME),
                        eq.span,
                    )),
                    Some(_) => {}
                }
                check_expr(&eq.rhs, &names, &pair_lists, eq.span, &mut diagnostics);
                if let Some(condition) = &eq.condition {
                    check_expr(condition, &names, &pair_lists, eq.span, &mut diagnostics);
                }
            }
            StageDecl::Break(b) => {
                if !pair_lists.contains_key(b.pairs.as_str()) {
                    diagnostics.push(Diagnostic::error(
                        format!("unknown pair list '{}' in break", b.pairs),
                        b.span,
                    ));
                }
                check_expr(&b.condition, &names, &pair_lists, b.span, &mut diagnostics);
            }
        }
    }

    if program.simulate.end_time <= 0.0 {
        diagnostics.push(Diagnostic::warning(
            "end time is not positive; no steps will run",
            None,
        ));
    }

    diagnostics
}

fn check_expr(
    expr: &Expr,
    names: &HashMap<&str, NameKind>,
    pair_lists: &HashMap<&str, Option<Span>>,
    span: Option<Span>,
    diagnostics: &mut Diagnostics,
) {
    for used in expr.names() {
        if !names.contains_key(used) {
            diagnostics.push(Diagnostic::error(format!("unknown symbol '{}'", used), span));
        }
    }
    let (lists, series) = expr.pair_references();
    for list in lists {
        if !pair_lists.contains_key(list) {
            diagnostics.push(Diagnostic::error(format!("unknown pair list '{}'", list), span));
        }
    }
    for s in series {
        if s != REST_LENGTH {
            diagnostics.push(Diagnostic::error(format!("unknown pair series '{}'", s), span));
        }
    }
}
