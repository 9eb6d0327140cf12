//! Expression trees stored in an arena
//!
//! Nodes live contiguously in an [`ExprArena`] and refer to their operands by
//! [`ExprId`]. Leaves that name a symbol store the workspace [`SymbolId`], so
//! the same `dt` is shared by every equation that mentions it. Cloning a tree
//! into another arena re-resolves those leaves by name.

use crate::ast;
use crate::eval::EvalError;
use crate::functions::{Func, FuncKind};
use crate::tensor::Tensor;
use crate::workspace::{SymbolId, Workspace};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;

/// Handle of a node in an [`ExprArena`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self.0)
    }
}

pub type Operands = SmallVec<[ExprId; 4]>;

/// One expression node
#[derive(Debug, Clone)]
pub enum Node {
    Literal(Tensor),
    Symbol(SymbolId),
    Call { func: Func, args: Operands },
    /// Sum of `body` over the bonds of a pair list touching the particle
    PairSum { pairs: String, body: ExprId },
    /// Value of a pair series for the bond being visited
    PairValue { series: String },
}

/// Contiguous storage for expression nodes
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Node>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ExprId) -> &Node {
        &self.nodes[id.index()]
    }

    fn push(&mut self, node: Node) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn literal(&mut self, value: Tensor) -> ExprId {
        self.push(Node::Literal(value))
    }

    pub fn symbol(&mut self, id: SymbolId) -> ExprId {
        self.push(Node::Symbol(id))
    }

    /// Add an operation node; the operand count is checked here, once
    pub fn call(&mut self, func: Func, args: &[ExprId]) -> Result<ExprId, EvalError> {
        if !func.accepts(args.len()) {
            return Err(EvalError::Arity {
                func: func.name(),
                got: args.len(),
            });
        }
        Ok(self.push(Node::Call {
            func,
            args: SmallVec::from_slice(args),
        }))
    }

    pub fn pair_sum(&mut self, pairs: &str, body: ExprId) -> ExprId {
        self.push(Node::PairSum {
            pairs: pairs.to_string(),
            body,
        })
    }

    pub fn pair_value(&mut self, series: &str) -> ExprId {
        self.push(Node::PairValue {
            series: series.to_string(),
        })
    }

    /// Operands of a node, in order
    pub fn children(&self, id: ExprId) -> SmallVec<[ExprId; 4]> {
        match self.get(id) {
            Node::Literal(_) | Node::Symbol(_) | Node::PairValue { .. } => SmallVec::new(),
            Node::Call { args, .. } => args.clone(),
            Node::PairSum { body, .. } => SmallVec::from_slice(&[*body]),
        }
    }

    /// Resolve a parsed expression against the workspace symbol table
    pub fn lower(&mut self, expr: &ast::Expr, workspace: &Workspace) -> Result<ExprId, EvalError> {
        match expr {
            ast::Expr::Literal(t) => Ok(self.literal(*t)),
            ast::Expr::Var(name) => {
                let id = workspace
                    .get_instance(name)
                    .ok_or_else(|| EvalError::UnknownSymbol(name.clone()))?;
                Ok(self.symbol(id))
            }
            ast::Expr::UnaryMinus(inner) => {
                let inner = self.lower(inner, workspace)?;
                self.call(Func::Neg, &[inner])
            }
            ast::Expr::Binary { op, left, right } => {
                let l = self.lower(left, workspace)?;
                let r = self.lower(right, workspace)?;
                self.call(op.func(), &[l, r])
            }
            ast::Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|a| self.lower(a, workspace))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(*func, &args)
            }
            ast::Expr::PairSum { pairs, body } => {
                if workspace.pairs_index(pairs).is_none() {
                    return Err(EvalError::UnknownPairs(pairs.clone()));
                }
                let body = self.lower(body, workspace)?;
                Ok(self.pair_sum(pairs, body))
            }
            ast::Expr::PairValue(series) => Ok(self.pair_value(series)),
        }
    }

    /// Copy the tree rooted at `id` into `dest`, re-binding symbol leaves by
    /// name in `to` rather than copying their values
    pub fn clone_tree(
        &self,
        id: ExprId,
        dest: &mut ExprArena,
        from: &Workspace,
        to: &Workspace,
    ) -> Result<ExprId, EvalError> {
        let node = match self.get(id) {
            Node::Symbol(s) => {
                let name = from.name(*s);
                let rebound = to
                    .get_instance(name)
                    .ok_or_else(|| EvalError::UnknownSymbol(name.to_string()))?;
                Node::Symbol(rebound)
            }
            Node::Call { func, args } => {
                let mut copied = Operands::new();
                for arg in args {
                    copied.push(self.clone_tree(*arg, dest, from, to)?);
                }
                Node::Call {
                    func: *func,
                    args: copied,
                }
            }
            Node::PairSum { pairs, body } => Node::PairSum {
                pairs: pairs.clone(),
                body: self.clone_tree(*body, dest, from, to)?,
            },
            other => other.clone(),
        };
        Ok(dest.push(node))
    }

    /// Symbol leaves reachable from `id`
    pub fn symbols(&self, id: ExprId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        self.walk(id, &mut |node| {
            if let Node::Symbol(s) = node {
                if !out.contains(s) {
                    out.push(*s);
                }
            }
        });
        out
    }

    fn walk(&self, id: ExprId, visit: &mut impl FnMut(&Node)) {
        visit(self.get(id));
        for child in self.children(id) {
            self.walk(child, visit);
        }
    }

    /// True if any node reduces over spatial neighbors
    pub fn uses_domain(&self, id: ExprId) -> bool {
        let mut found = false;
        self.walk(id, &mut |node| {
            if let Node::Call { func, .. } = node {
                found |= matches!(func.kind(), FuncKind::Neighbor(_));
            }
        });
        found
    }

    /// True if any node needs a particle system to evaluate
    pub fn needs_particles(&self, id: ExprId) -> bool {
        let mut found = false;
        self.walk(id, &mut |node| match node {
            Node::Call { func, .. } => {
                found |= !matches!(func.kind(), FuncKind::Pure | FuncKind::Random)
            }
            Node::PairSum { .. } | Node::PairValue { .. } => found = true,
            _ => {}
        });
        found
    }

    /// Broadcast size: 1 for scalar symbols, the particle count for
    /// anything per particle
    pub fn field_size(&self, id: ExprId, workspace: &Workspace) -> usize {
        match self.get(id) {
            Node::Literal(_) | Node::PairValue { .. } => 1,
            Node::Symbol(s) => workspace.symbol(*s).field_size(),
            Node::PairSum { .. } => workspace.particle_count(),
            Node::Call { func, args } => match func.kind() {
                FuncKind::Global(_) => 1,
                FuncKind::Neighbor(_) | FuncKind::PairContext => workspace.particle_count(),
                FuncKind::Pure | FuncKind::Random => args
                    .iter()
                    .map(|a| self.field_size(*a, workspace))
                    .max()
                    .unwrap_or(1),
            },
        }
    }

    /// Deepest history level each symbol is read at when `id` is evaluated
    /// at level 0, as required depths (level + 1)
    pub fn history_requirements(&self, id: ExprId) -> HashMap<SymbolId, usize> {
        let mut out = HashMap::new();
        self.collect_history(id, 0, &mut out);
        out
    }

    fn collect_history(&self, id: ExprId, level: usize, out: &mut HashMap<SymbolId, usize>) {
        match self.get(id) {
            Node::Symbol(s) => {
                let depth = out.entry(*s).or_insert(1);
                *depth = (*depth).max(level + 1);
            }
            Node::Call { func, args } => {
                for arg in args {
                    self.collect_history(*arg, level, out);
                }
                for (operand, offset) in func.history_reads() {
                    self.collect_history(args[*operand], level + offset, out);
                }
            }
            Node::PairSum { body, .. } => self.collect_history(*body, level, out),
            _ => {}
        }
    }
}

/// A named expression tree plus its binding state
#[derive(Debug, Clone)]
pub struct Expression {
    pub name: String,
    pub root: ExprId,
    assigned: bool,
}

impl Expression {
    pub fn new(name: impl Into<String>, root: ExprId) -> Self {
        Self {
            name: name.into(),
            root,
            assigned: false,
        }
    }

    /// Bind the tree to the workspace's particle system: every per-particle
    /// leaf must match the particle count, and spatial or pair operations
    /// need a particle system to exist
    pub fn assign(&mut self, arena: &ExprArena, workspace: &Workspace) -> Result<(), EvalError> {
        let count = workspace.particle_count();
        if arena.needs_particles(self.root) && workspace.get_particle_system().is_none() {
            return Err(EvalError::NoParticleSystem);
        }
        for s in arena.symbols(self.root) {
            let symbol = workspace.symbol(s);
            if symbol.is_per_particle() && symbol.field_size() != count {
                return Err(EvalError::FieldSize {
                    symbol: symbol.name().to_string(),
                    size: symbol.field_size(),
                    particles: count,
                });
            }
        }
        self.assigned = true;
        Ok(())
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// Independent copy bound to another arena and workspace
    pub fn clone_into(
        &self,
        arena: &ExprArena,
        dest: &mut ExprArena,
        from: &Workspace,
        to: &Workspace,
    ) -> Result<Expression, EvalError> {
        Ok(Expression::new(
            self.name.clone(),
            arena.clone_tree(self.root, dest, from, to)?,
        ))
    }
}
