//! Expression evaluation against a workspace
//!
//! Evaluation is a pure function of `(particle index, history level)`:
//! nothing here writes to the workspace, so any number of evaluators may
//! run concurrently over one shared borrow.

use crate::domain::DomainError;
use crate::expr::{ExprArena, ExprId, Node};
use crate::functions::{Func, FuncKind, Reduction};
use crate::interaction::{interact, reduce_all, reduce_values};
use crate::pairs::PairError;
use crate::tensor::{Tensor, TensorError};
use crate::workspace::Workspace;
use glam::DVec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

/// Evaluation error
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("'{func}' does not take {got} argument(s)")]
    Arity { func: &'static str, got: usize },
    #[error("'{0}' cannot be applied as a plain function")]
    NotPure(&'static str),
    #[error("'{func}' expects a scalar argument, got {}x{}", shape.0, shape.1)]
    ExpectedScalar {
        func: &'static str,
        shape: (usize, usize),
    },
    #[error("component {index} does not exist in a {}x{} value", shape.0, shape.1)]
    Component { index: usize, shape: (usize, usize) },
    #[error("{index} is not a row or column index of a {}x{} value", shape.0, shape.1)]
    BadIndex { index: f64, shape: (usize, usize) },
    #[error("index {index} out of range for '{symbol}'")]
    IndexOutOfRange { symbol: String, index: usize },
    #[error("'{0}' is only valid inside a neighbor or pair interaction")]
    NoPairContext(&'static str),
    #[error("no particle system has been defined")]
    NoParticleSystem,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("unknown pair list '{0}'")]
    UnknownPairs(String),
    #[error("pair list '{pairs}' has no series '{series}'")]
    UnknownSeries { pairs: String, series: String },
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error("'{symbol}' has {size} element(s) but the particle system has {particles}")]
    FieldSize {
        symbol: String,
        size: usize,
        particles: usize,
    },
    #[error("cannot assign a {}x{} value to '{lhs}' of shape {}x{}", got.0, got.1, expected.0, expected.1)]
    AssignShape {
        lhs: String,
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Neighbor or bond currently being visited
#[derive(Debug, Clone, Copy)]
struct PairContext {
    j: usize,
    rij: DVec3,
    /// `(pair list, bond position)` when visiting an explicit bond
    pair: Option<(usize, usize)>,
}

/// Values of global reductions, computed once per solve before the
/// parallel section
#[derive(Debug, Clone, Default)]
pub struct GlobalCache {
    values: HashMap<(ExprId, usize), Tensor>,
}

impl GlobalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ExprId, level: usize) -> Option<Tensor> {
        self.values.get(&(id, level)).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Evaluate every global reduction reachable from `roots`. Inner
    /// reductions are computed first so outer ones can read them.
    pub fn prepare(
        arena: &ExprArena,
        workspace: &Workspace,
        roots: &[ExprId],
    ) -> Result<Self, EvalError> {
        let mut pending = Vec::new();
        for root in roots {
            collect_globals(arena, *root, 0, &mut pending);
        }
        let mut cache = GlobalCache::new();
        let count = workspace.particle_count();
        for (id, level) in pending {
            if cache.values.contains_key(&(id, level)) {
                continue;
            }
            let Node::Call { func, args } = arena.get(id) else {
                continue;
            };
            let FuncKind::Global(how) = func.kind() else {
                continue;
            };
            let body = args[0];
            let value = {
                let evaluator = Evaluator::new(arena, workspace, &cache);
                let values = (0..count)
                    .into_par_iter()
                    .map(|j| evaluator.evaluate(body, j, level))
                    .collect::<Result<Vec<_>, _>>()?;
                reduce_values(values, how)?
            };
            cache.values.insert((id, level), value);
        }
        Ok(cache)
    }
}

/// Post-order list of `(global node, level)` pairs
fn collect_globals(arena: &ExprArena, id: ExprId, level: usize, out: &mut Vec<(ExprId, usize)>) {
    if let Node::Call { func, args } = arena.get(id) {
        for arg in args {
            collect_globals(arena, *arg, level, out);
        }
        for (operand, offset) in func.history_reads() {
            collect_globals(arena, args[*operand], level + offset, out);
        }
        if matches!(func.kind(), FuncKind::Global(_)) {
            out.push((id, level));
        }
    } else {
        for child in arena.children(id) {
            collect_globals(arena, child, level, out);
        }
    }
}

/// Read-only evaluator over one arena and workspace
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    arena: &'a ExprArena,
    workspace: &'a Workspace,
    globals: &'a GlobalCache,
}

impl<'a> Evaluator<'a> {
    pub fn new(arena: &'a ExprArena, workspace: &'a Workspace, globals: &'a GlobalCache) -> Self {
        Self {
            arena,
            workspace,
            globals,
        }
    }

    /// Value of `id` for particle `i` at history `level`
    pub fn evaluate(&self, id: ExprId, i: usize, level: usize) -> Result<Tensor, EvalError> {
        self.eval(id, i, level, None)
    }

    /// Value of `id` for bond `k` of pair list `pairs`, seen from its first
    /// particle with the second as neighbor
    pub fn evaluate_pair(
        &self,
        id: ExprId,
        pairs: usize,
        k: usize,
        level: usize,
    ) -> Result<Tensor, EvalError> {
        let list = self.workspace.pairs_at(pairs);
        if k >= list.len() {
            return Err(PairError::PairOutOfRange(k).into());
        }
        let (i, j) = (list.get_first()[k], list.get_second()[k]);
        let rij = self.separation(i, j)?;
        let ctx = PairContext {
            j,
            rij,
            pair: Some((pairs, k)),
        };
        self.eval(id, i, level, Some(&ctx))
    }

    /// `x_i - x_j`, using the nearest periodic image
    fn separation(&self, i: usize, j: usize) -> Result<DVec3, EvalError> {
        let domain = self.workspace.domain().ok_or(EvalError::NoParticleSystem)?;
        let positions = self.workspace.positions();
        let (Some(xi), Some(xj)) = (positions.get(i), positions.get(j)) else {
            return Err(DomainError::UnknownParticle(i.max(j)).into());
        };
        Ok(domain.minimum_image(xi.to_dvec3() - xj.to_dvec3()))
    }

    fn eval(
        &self,
        id: ExprId,
        i: usize,
        level: usize,
        ctx: Option<&PairContext>,
    ) -> Result<Tensor, EvalError> {
        match self.arena.get(id) {
            Node::Literal(t) => Ok(*t),
            Node::Symbol(s) => self.workspace.value(*s, i, level).ok_or_else(|| {
                EvalError::IndexOutOfRange {
                    symbol: self.workspace.name(*s).to_string(),
                    index: i,
                }
            }),
            Node::Call { func, args } => match func.kind() {
                FuncKind::Pure => {
                    if *func == Func::If {
                        let branch = if self.eval(args[0], i, level, ctx)?.is_truthy() {
                            args[1]
                        } else {
                            args[2]
                        };
                        return self.eval(branch, i, level, ctx);
                    }
                    let mut values = args
                        .iter()
                        .map(|a| self.eval(*a, i, level, ctx))
                        .collect::<Result<SmallVec<[Tensor; 4]>, _>>()?;
                    for (operand, offset) in func.history_reads() {
                        values.push(self.eval(args[*operand], i, level + offset, ctx)?);
                    }
                    func.apply(&values)
                }
                FuncKind::Random => {
                    let values = args
                        .iter()
                        .map(|a| self.eval(*a, i, level, ctx))
                        .collect::<Result<SmallVec<[Tensor; 4]>, _>>()?;
                    func.draw(&values, &mut self.stream(i, id))
                }
                FuncKind::Neighbor(how) => {
                    let domain = self.workspace.domain().ok_or(EvalError::NoParticleSystem)?;
                    let positions = self.workspace.positions();
                    if how == Reduction::Count {
                        let n = interact::<f64>(domain, positions, i, Reduction::Sum, |_, _| Ok(1.0))?;
                        return Ok(Tensor::scalar(n));
                    }
                    let body = args[0];
                    interact::<Tensor>(domain, positions, i, how, |j, rij| {
                        let inner = PairContext { j, rij, pair: None };
                        self.eval(body, i, level, Some(&inner))
                    })
                }
                FuncKind::PairContext => {
                    let ctx = ctx.ok_or(EvalError::NoPairContext(func.name()))?;
                    match func {
                        Func::Nb => self.eval(args[0], ctx.j, level, Some(ctx)),
                        Func::Rlen => Ok(Tensor::scalar(ctx.rij.length())),
                        _ => {
                            let dim = self.workspace.domain().map(|d| d.dimension()).unwrap_or(3);
                            Ok(Tensor::from_dvec3(ctx.rij, dim))
                        }
                    }
                }
                FuncKind::Global(how) => {
                    if let Some(value) = self.globals.get(id, level) {
                        return Ok(value);
                    }
                    let body = args[0];
                    reduce_all(self.workspace.particle_count(), how, |j| {
                        self.eval(body, j, level, None)
                    })
                }
            },
            Node::PairSum { pairs, body } => {
                let p = self
                    .workspace
                    .pairs_index(pairs)
                    .ok_or_else(|| EvalError::UnknownPairs(pairs.clone()))?;
                let list = self.workspace.pairs_at(p);
                let mut values = Vec::with_capacity(list.adjacency(i).len());
                for &k in list.adjacency(i) {
                    let j = list.other(k, i);
                    let inner = PairContext {
                        j,
                        rij: self.separation(i, j)?,
                        pair: Some((p, k)),
                    };
                    values.push(self.eval(*body, i, level, Some(&inner))?);
                }
                reduce_values(values, Reduction::Sum)
            }
            Node::PairValue { series } => {
                let (p, k) = ctx
                    .and_then(|c| c.pair)
                    .ok_or(EvalError::NoPairContext("pval"))?;
                let list = self.workspace.pairs_at(p);
                let s = list
                    .series_index(series)
                    .ok_or_else(|| EvalError::UnknownSeries {
                        pairs: list.name().to_string(),
                        series: series.clone(),
                    })?;
                list.series_value(s, k, i)
                    .map(Tensor::scalar)
                    .ok_or_else(|| PairError::PairOutOfRange(k).into())
            }
        }
    }

    /// Random stream for one draw: a pure function of the run seed, the
    /// step, the particle and the drawing node
    fn stream(&self, i: usize, id: ExprId) -> ChaCha8Rng {
        let mut key = splitmix64(self.workspace.seed());
        key = splitmix64(key ^ self.workspace.step());
        key = splitmix64(key ^ i as u64);
        key = splitmix64(key ^ id.index() as u64);
        ChaCha8Rng::seed_from_u64(key)
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
