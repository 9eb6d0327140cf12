//! Parser tests for declarations and expressions

use particula_core::ast::{BinaryOp, Expr, Placement, StageDecl, SymbolDeclKind};
use particula_core::{parse_equation, parse_expression, parse_program, Boundary, Func, PeriodicPolicy, Tensor};

const MINIMAL: &str = r#"
# a comment line
domain min 0;0 max 4;4 cell 1;1 boundary periodic symmetric policy remove
particles x at 0.5;0.5 1.5;0.5
constant hidden g = 9.81
variable dt = 0.01   # trailing comment
field v = 0;0 history 2
field flux = 0 antisymmetric
pairs springs within 0.9
lock v 0 1
equation v = v + dt*g # gt(x(x), 1)
break springs when gt(rlen(), 2*pval(r0))
simulate end = 1.0 threads = 4 seed = 7
"#;

#[test]
fn test_parse_full_program() {
    let result = parse_program(MINIMAL);
    assert!(result.is_ok(), "Failed to parse: {:?}", result.err());
    let program = result.unwrap();

    let domain = program.domain.unwrap();
    assert_eq!(domain.minimum, vec![0, 0]);
    assert_eq!(domain.maximum, vec![4, 4]);
    assert_eq!(domain.cell_size, vec![1.0, 1.0]);
    assert_eq!(domain.boundary, vec![Boundary::Periodic, Boundary::Symmetric]);
    assert_eq!(domain.policy, PeriodicPolicy::Remove);

    let particles = program.particles.unwrap();
    assert_eq!(particles.name, "x");
    match particles.placement {
        Placement::At(points) => assert_eq!(points.len(), 2),
        _ => panic!("Expected explicit positions"),
    }

    assert_eq!(program.symbols.len(), 4);
    assert_eq!(program.symbols[0].kind, SymbolDeclKind::Constant { hidden: true });
    assert_eq!(program.symbols[1].name, "dt");
    assert_eq!(program.symbols[2].history, 2);
    assert_eq!(program.symbols[3].kind, SymbolDeclKind::Field { symmetric: false });

    assert_eq!(program.pairs[0].name, "springs");
    assert_eq!(program.locks[0].indices, vec![0, 1]);
    assert_eq!(program.stages.len(), 2);
    assert_eq!(program.simulate.end_time, 1.0);
    assert_eq!(program.simulate.threads, Some(4));
    assert_eq!(program.simulate.seed, Some(7));
}

#[test]
fn test_equations_are_numbered_and_keep_conditions() {
    let program = parse_program(MINIMAL).unwrap();
    let equations: Vec<_> = program.equations().collect();
    assert_eq!(equations.len(), 1);
    assert_eq!(equations[0].name, "eq1");
    assert_eq!(equations[0].lhs, "v");
    assert!(equations[0].condition.is_some());
    assert!(matches!(program.stages[1], StageDecl::Break(_)));
}

#[test]
fn test_lattice_placement() {
    let source = r#"
domain min 0;0 max 4;4 cell 1;1
particles p lattice 0.5;0.5 1 2;3
variable dt = 0.1
simulate end = 1
"#;
    let program = parse_program(source).unwrap();
    match program.particles.unwrap().placement {
        Placement::Lattice {
            origin,
            spacing,
            counts,
        } => {
            assert_eq!(origin, Tensor::vector(&[0.5, 0.5]).unwrap());
            assert_eq!(spacing, 1.0);
            assert_eq!(counts, vec![2, 3]);
        }
        _ => panic!("Expected lattice placement"),
    }
}

#[test]
fn test_precedence() {
    // 1 + 2*3^2 = 1 + (2*(3^2))
    let expr = parse_expression("1 + 2*3^2").unwrap();
    let Expr::Binary { op: BinaryOp::Add, right, .. } = expr else {
        panic!("Expected addition at the root");
    };
    let Expr::Binary { op: BinaryOp::Mul, right, .. } = *right else {
        panic!("Expected multiplication");
    };
    assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
}

#[test]
fn test_subtraction_is_left_associative() {
    // 8 - 4 - 2 = (8 - 4) - 2
    let expr = parse_expression("8 - 4 - 2").unwrap();
    let Expr::Binary { op: BinaryOp::Sub, left, right } = expr else {
        panic!("Expected subtraction");
    };
    assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
    assert_eq!(*right, Expr::Literal(Tensor::scalar(2.0)));
}

#[test]
fn test_power_is_right_associative_and_binds_tighter_than_minus() {
    let expr = parse_expression("2^3^2").unwrap();
    let Expr::Binary { op: BinaryOp::Pow, right, .. } = expr else {
        panic!("Expected power");
    };
    assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));

    let neg = parse_expression("-a^2").unwrap();
    let Expr::UnaryMinus(inner) = neg else {
        panic!("Expected unary minus at the root");
    };
    assert!(matches!(*inner, Expr::Binary { op: BinaryOp::Pow, .. }));
}

#[test]
fn test_exponent_notation_is_not_subtraction() {
    let expr = parse_expression("1e-3").unwrap();
    assert_eq!(expr, Expr::Literal(Tensor::scalar(1e-3)));
    let expr = parse_expression("2.5E+2 - x").unwrap();
    assert!(matches!(expr, Expr::Binary { op: BinaryOp::Sub, .. }));
}

#[test]
fn test_tensor_literals_and_termwise_operators() {
    let expr = parse_expression("-1;2|3;4").unwrap();
    assert_eq!(
        expr,
        Expr::Literal(Tensor::new(2, 2, &[-1.0, 2.0, 3.0, 4.0]).unwrap())
    );
    assert!(matches!(
        parse_expression("a : b").unwrap(),
        Expr::Binary { op: BinaryOp::Hadamard, .. }
    ));
    assert!(matches!(
        parse_expression("a % b").unwrap(),
        Expr::Binary { op: BinaryOp::TermDiv, .. }
    ));
}

#[test]
fn test_function_calls() {
    let expr = parse_expression("max(sin(x), 0.5)").unwrap();
    let Expr::Call { func, args } = expr else {
        panic!("Expected a call");
    };
    assert_eq!(func, Func::Max);
    assert_eq!(args.len(), 2);
    assert!(matches!(&args[0], Expr::Call { func: Func::Sin, .. }));

    let Expr::Call { args, .. } = parse_expression("ncount()").unwrap() else {
        panic!("Expected a call");
    };
    assert!(args.is_empty());
}

#[test]
fn test_pair_expressions() {
    let expr = parse_expression("psum(springs, rlen() - pval(r0))").unwrap();
    let Expr::PairSum { pairs, body } = expr else {
        panic!("Expected psum");
    };
    assert_eq!(pairs, "springs");
    assert!(matches!(*body, Expr::Binary { op: BinaryOp::Sub, .. }));
    assert_eq!(parse_expression("pval(k)").unwrap(), Expr::PairValue("k".to_string()));
}

#[test]
fn test_parse_equation_splits_condition() {
    let (lhs, _, condition) = parse_equation("v = 2*v # lt(t, 1)").unwrap();
    assert_eq!(lhs, "v");
    assert!(condition.is_some());
    let (_, _, none) = parse_equation("v = 1").unwrap();
    assert!(none.is_none());
    assert!(parse_equation("v = 1 #").is_err());
}

#[test]
fn test_expression_errors() {
    assert!(parse_expression("").is_err());
    assert!(parse_expression("(1 + 2").is_err());
    assert!(parse_expression("1 + 2)").is_err());
    assert!(parse_expression("1 +").is_err());
    let err = parse_expression("frob(1)").unwrap_err();
    assert!(err.to_string().contains("Unknown function 'frob'"));
    assert!(parse_expression("sqrt(1, 2)").is_err());
    assert!(parse_expression("1;2|3").is_err());
}
