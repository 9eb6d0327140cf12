//! Solving single equations against a workspace

use particula_core::eval::EvalError;
use particula_core::equation::SolveError;
use particula_core::tests::test_helpers::{approx_eq, equation, line_workspace};
use particula_core::{ExprArena, Tensor};

#[test]
fn test_velocity_update_over_every_particle() {
    let mut ws = line_workspace(3);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    ws.add_constant("a", Tensor::scalar(1.0), false).unwrap();
    ws.add_variable("dt", Tensor::scalar(0.1), 1).unwrap();

    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "v = v + a*dt").unwrap();
    let written = eq.solve(&arena, &mut ws, 2).unwrap();
    assert_eq!(written, 3);
    for i in 0..3 {
        assert!(approx_eq(ws.value(v, i, 0).unwrap().value(), 0.1, 1e-12));
    }
}

#[test]
fn test_solve_reads_old_values_for_every_element() {
    // each element reads the pre-solve field, so a shift is not cumulative
    let mut ws = line_workspace(4);
    let v = ws.add_field("v", Tensor::scalar(1.0), 1).unwrap();
    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "v = gsum(v)").unwrap();
    eq.solve(&arena, &mut ws, 3).unwrap();
    for i in 0..4 {
        assert_eq!(ws.value(v, i, 0), Some(Tensor::scalar(4.0)));
    }
}

#[test]
fn test_condition_skips_false_elements() {
    let mut ws = line_workspace(4);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "v = 5 # gt(x, 2)").unwrap();
    assert_eq!(eq.solve(&arena, &mut ws, 1).unwrap(), 2);
    let values: Vec<f64> = (0..4).map(|i| ws.value(v, i, 0).unwrap().value()).collect();
    assert_eq!(values, vec![0.0, 0.0, 5.0, 5.0]);
}

#[test]
fn test_locked_elements_keep_their_value() {
    let mut ws = line_workspace(3);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    ws.lock(v, 1).unwrap();
    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "v = x").unwrap();
    assert_eq!(eq.solve(&arena, &mut ws, 2).unwrap(), 2);
    assert_eq!(ws.value(v, 0, 0), Some(Tensor::scalar(0.5)));
    assert_eq!(ws.value(v, 1, 0), Some(Tensor::scalar(0.0)));
    assert_eq!(ws.value(v, 2, 0), Some(Tensor::scalar(2.5)));
}

#[test]
fn test_shape_change_is_rejected_and_nothing_is_written() {
    let mut ws = line_workspace(2);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "v = 1;2").unwrap();
    let err = eq.solve(&arena, &mut ws, 1).unwrap_err();
    assert!(matches!(
        err,
        SolveError::Eval(EvalError::AssignShape {
            expected: (1, 1),
            got: (1, 2),
            ..
        })
    ));
    assert_eq!(ws.value(v, 0, 0), Some(Tensor::scalar(0.0)));
    assert!(eq.dry_run(&arena, &ws).is_err());
}

#[test]
fn test_scalar_variable_target() {
    let mut ws = line_workspace(3);
    let total = ws.add_variable("total", Tensor::scalar(0.0), 1).unwrap();
    let mut arena = ExprArena::new();
    let eq = equation(&mut arena, &ws, "total = gsum(x)").unwrap();
    assert_eq!(eq.solve(&arena, &mut ws, 4).unwrap(), 1);
    assert!(approx_eq(ws.value(total, 0, 0).unwrap().value(), 4.5, 1e-12));
}

#[test]
fn test_history_reads_previous_level() {
    let mut ws = line_workspace(2);
    let v = ws.add_field("v", Tensor::scalar(1.0), 2).unwrap();
    ws.add_variable("dt", Tensor::scalar(0.5), 1).unwrap();
    let mut arena = ExprArena::new();

    let double = equation(&mut arena, &ws, "v = 2*v").unwrap();
    double.solve(&arena, &mut ws, 1).unwrap();
    assert_eq!(ws.value(v, 0, 0), Some(Tensor::scalar(2.0)));
    assert_eq!(ws.value(v, 0, 1), Some(Tensor::scalar(1.0)));

    // corrector(v, f, dt) = v_prev + dt*f, reading v one level back
    let correct = equation(&mut arena, &ws, "v = corrector(v, 4, dt)").unwrap();
    correct.solve(&arena, &mut ws, 1).unwrap();
    assert_eq!(ws.value(v, 0, 0), Some(Tensor::scalar(3.0)));
}

#[test]
fn test_if_only_evaluates_the_taken_branch() {
    let mut ws = line_workspace(2);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    let mut arena = ExprArena::new();
    // the false branch would fail: nb() outside an interaction
    let eq = equation(&mut arena, &ws, "v = if(1, 3, nb(x))").unwrap();
    eq.solve(&arena, &mut ws, 1).unwrap();
    assert_eq!(ws.value(v, 1, 0), Some(Tensor::scalar(3.0)));
}

#[test]
fn test_evaluation_errors_surface() {
    let mut ws = line_workspace(2);
    ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    let mut arena = ExprArena::new();

    let eq = equation(&mut arena, &ws, "v = rlen()").unwrap();
    assert!(matches!(
        eq.evaluate(&arena, &ws, 1),
        Err(EvalError::NoPairContext("rlen"))
    ));

    assert!(equation(&mut arena, &ws, "v = w + 1").is_err());
    assert!(equation(&mut arena, &ws, "v = sin(1, 2)").is_err());
    assert!(equation(&mut arena, &ws, "v = frobnicate(x)").is_err());
}

#[test]
fn test_thread_count_does_not_change_results() {
    let mut arena = ExprArena::new();
    let mut reference = None;
    for threads in [1, 2, 3, 7, 16] {
        let mut ws = line_workspace(10);
        ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
        let eq = equation(&mut arena, &ws, "v = x^2 + nsum(rlen())").unwrap();
        let values = eq.evaluate(&arena, &ws, threads).unwrap();
        match &reference {
            None => reference = Some(values),
            Some(expected) => assert_eq!(&values, expected),
        }
    }
}

#[test]
fn test_entry_indices_must_be_whole_and_non_negative() {
    let mut ws = line_workspace(1);
    let v = ws.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    ws.add_constant("m", "1;2|3;4".parse().unwrap(), false).unwrap();
    let mut arena = ExprArena::new();

    let eq = equation(&mut arena, &ws, "v = entry(m, 1, 0)").unwrap();
    eq.solve(&arena, &mut ws, 1).unwrap();
    assert_eq!(ws.value(v, 0, 0), Some(Tensor::scalar(3.0)));

    for text in ["v = entry(m, -1, 0)", "v = entry(m, 0, 0.5)", "v = entry(m, 1.9, 1)"] {
        let eq = equation(&mut arena, &ws, text).unwrap();
        assert!(
            matches!(
                eq.evaluate(&arena, &ws, 1),
                Err(EvalError::BadIndex { shape: (2, 2), .. })
            ),
            "{}",
            text
        );
    }
}
