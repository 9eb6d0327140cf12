use crate::diagnostics::Span;
use crate::domain::{Boundary, PeriodicPolicy};
use crate::functions::Func;
use crate::tensor::Tensor;

// ============================================================================
// Expressions
// ============================================================================

/// Expression AST node, as written in source (symbols by name)
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Tensor),
    Var(String),
    UnaryMinus(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
    /// `psum(pairs, body)`
    PairSum {
        pairs: String,
        body: Box<Expr>,
    },
    /// `pval(series)`
    PairValue(String),
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    /// `:` term-wise product
    Hadamard,
    /// `%` term-wise quotient
    TermDiv,
}

impl BinaryOp {
    pub fn func(&self) -> Func {
        match self {
            BinaryOp::Add => Func::Add,
            BinaryOp::Sub => Func::Sub,
            BinaryOp::Mul => Func::Mul,
            BinaryOp::Div => Func::Div,
            BinaryOp::Pow => Func::Pow,
            BinaryOp::Hadamard => Func::Hadamard,
            BinaryOp::TermDiv => Func::TermDiv,
        }
    }
}

impl Expr {
    /// Every symbol name referenced, in first-seen order
    pub fn names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::UnaryMinus(inner) => inner.collect_names(out),
            Expr::Binary { left, right, .. } => {
                left.collect_names(out);
                right.collect_names(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_names(out)),
            Expr::PairSum { body, .. } => body.collect_names(out),
            Expr::Literal(_) | Expr::PairValue(_) => {}
        }
    }

    /// Pair lists named by `psum`, and series named by `pval`
    pub fn pair_references(&self) -> (Vec<&str>, Vec<&str>) {
        let mut lists = Vec::new();
        let mut series = Vec::new();
        self.collect_pairs(&mut lists, &mut series);
        (lists, series)
    }

    fn collect_pairs<'a>(&'a self, lists: &mut Vec<&'a str>, series: &mut Vec<&'a str>) {
        match self {
            Expr::PairSum { pairs, body } => {
                lists.push(pairs);
                body.collect_pairs(lists, series);
            }
            Expr::PairValue(name) => series.push(name),
            Expr::UnaryMinus(inner) => inner.collect_pairs(lists, series),
            Expr::Binary { left, right, .. } => {
                left.collect_pairs(lists, series);
                right.collect_pairs(lists, series);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_pairs(lists, series)),
            Expr::Literal(_) | Expr::Var(_) => {}
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// `domain min .. max .. cell .. boundary .. [policy ..]`
#[derive(Debug, Clone)]
pub struct DomainDecl {
    pub minimum: Vec<i32>,
    pub maximum: Vec<i32>,
    pub cell_size: Vec<f64>,
    pub boundary: Vec<Boundary>,
    pub policy: PeriodicPolicy,
    pub span: Option<Span>,
}

/// How initial particle positions are generated
#[derive(Debug, Clone)]
pub enum Placement {
    /// Explicit list of positions
    At(Vec<Tensor>),
    /// Regular lattice: origin, spacing, particle count per axis
    Lattice {
        origin: Tensor,
        spacing: f64,
        counts: Vec<usize>,
    },
}

/// `particles <name> ...`
#[derive(Debug, Clone)]
pub struct ParticlesDecl {
    pub name: String,
    pub placement: Placement,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolDeclKind {
    Constant { hidden: bool },
    Variable,
    Field { symmetric: bool },
}

/// `constant`, `variable` or `field` declaration with its initial value
#[derive(Debug, Clone)]
pub struct SymbolDecl {
    pub kind: SymbolDeclKind,
    pub name: String,
    pub init: Expr,
    pub history: usize,
    pub span: Option<Span>,
}

/// `pairs <name> within <radius>`
#[derive(Debug, Clone)]
pub struct PairsDecl {
    pub name: String,
    pub radius: f64,
    pub span: Option<Span>,
}

/// `lock <field> <index>...`
#[derive(Debug, Clone)]
pub struct LockDecl {
    pub field: String,
    pub indices: Vec<usize>,
    pub span: Option<Span>,
}

/// `equation lhs = rhs [# condition]`
#[derive(Debug, Clone)]
pub struct EquationDecl {
    pub name: String,
    pub lhs: String,
    pub rhs: Expr,
    pub condition: Option<Expr>,
    pub source: String,
    pub span: Option<Span>,
}

/// `break <pairs> when <condition>`
#[derive(Debug, Clone)]
pub struct BreakDecl {
    pub pairs: String,
    pub condition: Expr,
    pub span: Option<Span>,
}

/// One entry of the per-step schedule, in declaration order
#[derive(Debug, Clone)]
pub enum StageDecl {
    Equation(EquationDecl),
    Break(BreakDecl),
}

/// `simulate end = .. [threads = ..] [seed = ..]`
#[derive(Debug, Clone)]
pub struct SimulateDecl {
    pub end_time: f64,
    pub threads: Option<usize>,
    pub seed: Option<u64>,
}

/// A parsed simulation description
#[derive(Debug, Clone)]
pub struct Program {
    pub domain: Option<DomainDecl>,
    pub particles: Option<ParticlesDecl>,
    pub symbols: Vec<SymbolDecl>,
    pub pairs: Vec<PairsDecl>,
    pub locks: Vec<LockDecl>,
    pub stages: Vec<StageDecl>,
    pub simulate: SimulateDecl,
}

impl Program {
    pub fn equations(&self) -> impl Iterator<Item = &EquationDecl> {
        self.stages.iter().filter_map(|s| match s {
            StageDecl::Equation(e) => Some(e),
            StageDecl::Break(_) => None,
        })
    }
}
