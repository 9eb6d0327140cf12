//! Expression trees: binding, broadcast size and copies across workspaces

use particula_core::eval::EvalError;
use particula_core::tests::test_helpers::{approx_eq, build_source, line_workspace};
use particula_core::{
    parse_expression, Evaluator, ExprArena, Expression, GlobalCache, Tensor, Workspace,
};

fn lower(arena: &mut ExprArena, ws: &Workspace, text: &str) -> Expression {
    let ast = parse_expression(text).unwrap();
    let root = arena.lower(&ast, ws).unwrap();
    Expression::new("e", root)
}

fn eval_at(arena: &ExprArena, ws: &Workspace, expr: &Expression, i: usize) -> Tensor {
    let globals = GlobalCache::prepare(arena, ws, &[expr.root]).unwrap();
    Evaluator::new(arena, ws, &globals)
        .evaluate(expr.root, i, 0)
        .unwrap()
}

#[test]
fn test_copy_binds_symbols_by_name_in_the_target() {
    let mut source = line_workspace(2);
    source.add_variable("dt", Tensor::scalar(0.1), 1).unwrap();
    let mut arena = ExprArena::new();
    let mut expr = lower(&mut arena, &source, "x + dt");
    expr.assign(&arena, &source).unwrap();

    // extra symbols first, so `dt` lands on a different id
    let mut target = line_workspace(2);
    target.add_field("v", Tensor::scalar(0.0), 1).unwrap();
    target.add_constant("k", Tensor::scalar(3.0), false).unwrap();
    let dt = target.add_variable("dt", Tensor::scalar(2.0), 1).unwrap();
    assert_ne!(Some(dt), source.get_instance("dt"));

    let mut dest = ExprArena::new();
    let copy = expr.clone_into(&arena, &mut dest, &source, &target).unwrap();
    assert_eq!(copy.name, "e");
    assert!(!copy.is_assigned());
    assert!(dest.symbols(copy.root).contains(&dt));

    assert_eq!(eval_at(&dest, &target, &copy, 1), Tensor::scalar(3.5));
    // the original still reads its own workspace
    assert!(approx_eq(eval_at(&arena, &source, &expr, 1).value(), 1.6, 1e-12));
}

#[test]
fn test_copy_fails_when_the_target_lacks_a_symbol() {
    let mut source = line_workspace(1);
    source.add_variable("dt", Tensor::scalar(0.1), 1).unwrap();
    let mut arena = ExprArena::new();
    let expr = lower(&mut arena, &source, "2*dt");

    let target = line_workspace(1);
    let mut dest = ExprArena::new();
    assert!(matches!(
        expr.clone_into(&arena, &mut dest, &source, &target),
        Err(EvalError::UnknownSymbol(name)) if name == "dt"
    ));
}

#[test]
fn test_field_size_is_the_widest_operand() {
    let mut ws = line_workspace(4);
    ws.add_variable("dt", Tensor::scalar(0.1), 1).unwrap();
    let mut arena = ExprArena::new();

    let cases = [
        ("2*dt", 1),
        ("x", 4),
        ("dt + sin(x)", 4),
        ("gsum(x) + dt", 1),
        ("ncount()", 4),
        ("max(1, 2)", 1),
    ];
    for (text, size) in cases {
        let expr = lower(&mut arena, &ws, text);
        assert_eq!(arena.field_size(expr.root, &ws), size, "{}", text);
    }
}

#[test]
fn test_assign_checks_field_sizes_against_the_particle_count() {
    let mut ws = line_workspace(3);
    let mut arena = ExprArena::new();
    let mut expr = lower(&mut arena, &ws, "x + 1");
    assert!(!expr.is_assigned());
    expr.assign(&arena, &ws).unwrap();
    assert!(expr.is_assigned());

    // a field built before the particle count changed no longer fits
    let w = ws.add_field("w", Tensor::scalar(0.0), 1).unwrap();
    let mut stale = lower(&mut arena, &ws, "w * 2");
    let field = ws.symbol_mut(w).as_field_mut().unwrap();
    field.push(Tensor::scalar(0.0));
    field.push(Tensor::scalar(0.0));
    assert!(matches!(
        stale.assign(&arena, &ws),
        Err(EvalError::FieldSize { size: 5, particles: 3, .. })
    ));
    assert!(!stale.is_assigned());
}

#[test]
fn test_assign_needs_a_particle_system_for_neighbor_sums() {
    let mut ws = Workspace::new();
    ws.add_variable("dt", Tensor::scalar(0.1), 1).unwrap();
    let mut arena = ExprArena::new();
    let mut plain = lower(&mut arena, &ws, "dt * 2");
    plain.assign(&arena, &ws).unwrap();

    let mut spatial = lower(&mut arena, &ws, "gsum(ncount())");
    assert!(matches!(
        spatial.assign(&arena, &ws),
        Err(EvalError::NoParticleSystem)
    ));
}

#[test]
fn test_equations_are_listed_in_declaration_order() {
    let sim = build_source(
        r#"
domain min 0 max 4 cell 1
particles x at 0.5 1.5
variable dt = 0.1
field v = 0
field a = 0
pairs bonds within 1.5
equation a = 0 - x
equation v = v + a*dt
break bonds when gt(rlen(), 2)
equation x = x + v*dt
simulate end = 0
"#,
    )
    .unwrap();
    let ws = sim.get_workspace();
    let lhs: Vec<&str> = sim.get_functions().map(|eq| ws.name(eq.lhs)).collect();
    assert_eq!(lhs, vec!["a", "v", "x"]);
    assert_eq!(sim.stages().len(), 4);
}
