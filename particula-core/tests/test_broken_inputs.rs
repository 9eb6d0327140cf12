//! Tests for broken/invalid input files

use particula_core::diagnostics::format_parse_error;
use particula_core::eval::EvalError;
use particula_core::{analyze_program, parse_program, run_program, DomainError, Error, SetupError, WorkspaceError};
use std::path::PathBuf;

fn broken_source(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("broken");
    path.push(filename);
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_syntax_error_produces_parse_error() {
    let source = broken_source("syntax_error.pq");
    let result = parse_program(&source);
    let err = result.unwrap_err();
    assert!(!err.to_string().is_empty(), "Error message should not be empty");

    let formatted = format_parse_error(&err, &source, None);
    assert!(formatted.contains("line 4"), "{}", formatted);
    assert!(matches!(run_program(&source), Err(Error::Parse(_))));
}

#[test]
fn test_missing_simulate_produces_error() {
    let source = broken_source("missing_simulate.pq");
    let err = parse_program(&source).unwrap_err();
    assert!(err.to_string().contains("simulate"));
}

#[test]
fn test_unknown_symbol_is_caught_before_running() {
    let source = broken_source("unknown_symbol.pq");
    let program = parse_program(&source).expect("Should parse");
    let diagnostics = analyze_program(&program);
    assert!(diagnostics.has_errors(), "Should detect unknown symbol");

    match run_program(&source) {
        Err(Error::Setup(SetupError::Analysis(messages))) => {
            assert!(messages.iter().any(|m| m.contains("force")));
        }
        other => panic!("Expected an analysis error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_shape_mismatch_is_found_by_the_dry_run() {
    let source = broken_source("shape_mismatch.pq");
    let program = parse_program(&source).expect("Should parse");
    assert!(!analyze_program(&program).has_errors());
    match run_program(&source) {
        Err(Error::Setup(SetupError::Equation { name, source, .. })) => {
            assert_eq!(name, "eq1");
            assert!(matches!(source, EvalError::AssignShape { .. }));
        }
        other => panic!("Expected an equation setup error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_particle_outside_closed_domain() {
    let source = broken_source("out_of_bounds.pq");
    match run_program(&source) {
        Err(Error::Setup(SetupError::Workspace(WorkspaceError::Domain(
            DomainError::OutOfBounds { index, .. },
        )))) => assert_eq!(index, 1),
        other => panic!("Expected an out-of-bounds error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_pair_radius_beyond_cutoff() {
    let source = broken_source("bad_radius.pq");
    let err = run_program(&source).unwrap_err();
    assert!(matches!(
        err,
        Error::Setup(SetupError::Workspace(WorkspaceError::RadiusTooLarge { .. }))
    ));
}

#[test]
fn test_errors_do_not_panic_on_garbage() {
    for source in ["", "simulate", "simulate end = x", "domain", "???", "equation = 1"] {
        assert!(parse_program(source).is_err(), "{:?} should not parse", source);
    }
}

#[test]
fn test_unknown_functions_fail_while_parsing() {
    let source = "
variable dt = 0.1
variable v = 0
equation v = frobnicate(dt)
simulate end = 1
";
    match run_program(source) {
        Err(Error::Parse(e)) => assert!(e.to_string().contains("frobnicate"), "{}", e),
        other => panic!("Expected a parse error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_fields_without_particles_stop_at_analysis() {
    let source = "
variable dt = 0.1
field v = 0
simulate end = 1
";
    match run_program(source) {
        Err(Error::Setup(SetupError::Analysis(messages))) => {
            assert!(messages.iter().any(|m| m.contains("needs a particle system")));
        }
        other => panic!("Expected an analysis error, got {:?}", other.map(|_| ())),
    }
}
