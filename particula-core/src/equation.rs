//! Equations: `lhs = rhs [# condition]`, solved over the particle range
//!
//! A solve evaluates into a private output buffer split into contiguous
//! chunks, one per worker, and commits the buffer to the workspace only
//! after every chunk has joined. Workers never see a partially written lhs.

use crate::eval::{EvalError, Evaluator, GlobalCache};
use crate::expr::{ExprArena, ExprId, Expression};
use crate::tensor::Tensor;
use crate::workspace::{SymbolId, Workspace, WorkspaceError};
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

/// One equation of the per-step schedule
#[derive(Debug, Clone)]
pub struct Equation {
    pub name: String,
    pub lhs: SymbolId,
    pub rhs: Expression,
    pub condition: Option<Expression>,
    /// Source text, for messages
    pub text: String,
}

/// Failure while solving an equation
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl Equation {
    pub fn new(
        name: impl Into<String>,
        lhs: SymbolId,
        rhs: Expression,
        condition: Option<Expression>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            lhs,
            rhs,
            condition,
            text: text.into(),
        }
    }

    pub fn roots(&self) -> SmallVec<[ExprId; 2]> {
        let mut roots = SmallVec::new();
        roots.push(self.rhs.root);
        if let Some(c) = &self.condition {
            roots.push(c.root);
        }
        roots
    }

    /// True if the domain must be current before this equation runs: it
    /// writes positions or queries spatial neighbors
    pub fn needs_domain(&self, arena: &ExprArena, workspace: &Workspace) -> bool {
        Some(self.lhs) == workspace.particle_system_id()
            || self.roots().iter().any(|r| arena.uses_domain(*r))
    }

    /// Compute the new lhs values without writing them. `None` marks
    /// elements whose condition is false or that are locked.
    pub fn evaluate(
        &self,
        arena: &ExprArena,
        workspace: &Workspace,
        threads: usize,
    ) -> Result<Vec<Option<Tensor>>, EvalError> {
        let globals = GlobalCache::prepare(arena, workspace, &self.roots())?;
        let evaluator = Evaluator::new(arena, workspace, &globals);
        let lhs = workspace.symbol(self.lhs);
        let size = lhs.field_size();
        let field = lhs.as_field();

        let element = |i: usize| -> Result<Option<Tensor>, EvalError> {
            if field.map(|f| f.is_locked(i)).unwrap_or(false) {
                return Ok(None);
            }
            if let Some(c) = &self.condition {
                if !evaluator.evaluate(c.root, i, 0)?.is_truthy() {
                    return Ok(None);
                }
            }
            let value = evaluator.evaluate(self.rhs.root, i, 0)?;
            let current = lhs.value(i, 0).unwrap_or_default();
            fit_shape(lhs.name(), current.shape(), value).map(Some)
        };

        if field.is_none() {
            return Ok(vec![element(0)?]);
        }

        let mut out = vec![None; size];
        if size == 0 {
            return Ok(out);
        }
        let chunk = size.div_ceil(threads.max(1));
        out.par_chunks_mut(chunk)
            .enumerate()
            .try_for_each(|(c, slots)| -> Result<(), EvalError> {
                for (offset, slot) in slots.iter_mut().enumerate() {
                    *slot = element(c * chunk + offset)?;
                }
                Ok(())
            })?;
        Ok(out)
    }

    /// Evaluate and commit into the lhs current slot; returns how many
    /// elements were written. Runs on the current rayon pool.
    pub fn solve(
        &self,
        arena: &ExprArena,
        workspace: &mut Workspace,
        threads: usize,
    ) -> Result<usize, SolveError> {
        let values = self.evaluate(arena, workspace, threads)?;
        let written = workspace.commit(self.lhs, &values)?;
        debug!(equation = %self.name, written, "solved");
        Ok(written)
    }

    /// Evaluate once at particle 0 and check the result fits the lhs
    pub fn dry_run(&self, arena: &ExprArena, workspace: &Workspace) -> Result<(), EvalError> {
        let globals = GlobalCache::prepare(arena, workspace, &self.roots())?;
        let evaluator = Evaluator::new(arena, workspace, &globals);
        let lhs = workspace.symbol(self.lhs);
        if lhs.is_per_particle() && lhs.field_size() == 0 {
            return Ok(());
        }
        if let Some(c) = &self.condition {
            evaluator.evaluate(c.root, 0, 0)?;
        }
        let value = evaluator.evaluate(self.rhs.root, 0, 0)?;
        let current = lhs.value(0, 0).unwrap_or_default();
        fit_shape(lhs.name(), current.shape(), value)?;
        Ok(())
    }
}

/// Shape a value for assignment: a scalar fills the whole lhs (an empty
/// reduction or a plain `v = 0`), anything else must match exactly
pub fn fit_shape(lhs: &str, expected: (usize, usize), value: Tensor) -> Result<Tensor, EvalError> {
    if value.shape() != expected && !value.is_scalar() {
        return Err(EvalError::AssignShape {
            lhs: lhs.to_string(),
            expected,
            got: value.shape(),
        });
    }
    Ok(value.broadcast(expected)?)
}

/// Per-step removal of bonds whose condition holds
#[derive(Debug, Clone)]
pub struct BreakRule {
    pub pairs: String,
    pub condition: ExprId,
}

impl BreakRule {
    /// Bond positions where the condition is true, in order
    pub fn matching(&self, arena: &ExprArena, workspace: &Workspace) -> Result<Vec<usize>, EvalError> {
        let p = workspace
            .pairs_index(&self.pairs)
            .ok_or_else(|| EvalError::UnknownPairs(self.pairs.clone()))?;
        let globals = GlobalCache::prepare(arena, workspace, &[self.condition])?;
        let evaluator = Evaluator::new(arena, workspace, &globals);
        let hits = (0..workspace.pairs_at(p).len())
            .into_par_iter()
            .map(|k| -> Result<bool, EvalError> {
                Ok(evaluator.evaluate_pair(self.condition, p, k, 0)?.is_truthy())
            })
            .collect::<Result<Vec<bool>, EvalError>>()?;
        Ok(hits
            .into_iter()
            .enumerate()
            .filter_map(|(k, hit)| hit.then_some(k))
            .collect())
    }

    /// Mark and compact the matching bonds; returns how many were removed
    pub fn apply(&self, arena: &ExprArena, workspace: &mut Workspace) -> Result<usize, SolveError> {
        let hits = self.matching(arena, workspace)?;
        let pairs = workspace
            .pairs_mut(&self.pairs)
            .ok_or_else(|| WorkspaceError::UnknownPairs(self.pairs.clone()))?;
        for k in hits {
            pairs.mark_to_delete(k).map_err(WorkspaceError::from)?;
        }
        let removed = pairs.delete_marked_pairs();
        if removed > 0 {
            debug!(pairs = %self.pairs, removed, "bonds broken");
        }
        Ok(removed)
    }
}
