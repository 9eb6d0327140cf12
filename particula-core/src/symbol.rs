//! Symbol value model: constants, variables, per-particle fields and the
//! particle system
//!
//! Every time-stepped value keeps a bounded FIFO history. Level 0 is the
//! current value and level k is the value assigned k assignments ago.

use crate::domain::Domain;
use crate::tensor::{Tensor, TensorError};

/// Kind of a named symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Constant,
    Variable,
    Field,
    ParticleSystem,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::Field => "field",
            SymbolKind::ParticleSystem => "particle system",
        }
    }
}

/// Bounded history for a sequence of elements, stored level-major so that
/// the current level is one contiguous slice.
#[derive(Debug, Clone)]
pub struct History {
    levels: Vec<Vec<Tensor>>,
}

impl History {
    pub fn new(len: usize, depth: usize, initial: Tensor) -> Self {
        Self {
            levels: vec![vec![initial; len]; depth.max(1)],
        }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current(&self) -> &[Tensor] {
        &self.levels[0]
    }

    /// Value of element `index` at `level`; levels past the depth read the
    /// oldest stored value.
    pub fn get(&self, index: usize, level: usize) -> Option<Tensor> {
        let level = level.min(self.depth() - 1);
        self.levels[level].get(index).copied()
    }

    /// Record a new current value, shifting older values back one level
    pub fn assign(&mut self, index: usize, value: Tensor) {
        for level in (1..self.depth()).rev() {
            self.levels[level][index] = self.levels[level - 1][index];
        }
        self.levels[0][index] = value;
    }

    /// Overwrite an element at every level
    pub fn reset(&mut self, index: usize, value: Tensor) {
        for level in self.levels.iter_mut() {
            level[index] = value;
        }
    }

    /// Offset one element at every level, keeping its history consistent
    pub fn translate(&mut self, index: usize, delta: &Tensor) -> Result<(), TensorError> {
        for level in self.levels.iter_mut() {
            level[index] = level[index].try_add(delta)?;
        }
        Ok(())
    }

    /// Grow (never shrink) the depth; new levels copy the oldest level
    pub fn ensure_depth(&mut self, depth: usize) {
        while self.levels.len() < depth {
            let oldest = self.levels[self.levels.len() - 1].clone();
            self.levels.push(oldest);
        }
    }

    pub fn push(&mut self, value: Tensor) {
        for level in self.levels.iter_mut() {
            level.push(value);
        }
    }

    pub fn duplicate(&mut self, index: usize) {
        for level in self.levels.iter_mut() {
            let value = level[index];
            level.push(value);
        }
    }

    /// Keep the elements whose `keep` flag is set, preserving order
    pub fn retain(&mut self, keep: &[bool]) {
        for level in self.levels.iter_mut() {
            let mut k = 0;
            level.retain(|_| {
                let kept = keep[k];
                k += 1;
                kept
            });
        }
    }
}

/// Immutable named value
#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub value: Tensor,
    /// Hidden constants are skipped when the symbol table is serialized
    pub hidden: bool,
}

/// Single time-stepped value
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub history: History,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Tensor, depth: usize) -> Self {
        Self {
            name: name.into(),
            history: History::new(1, depth, value),
        }
    }

    pub fn value(&self) -> Tensor {
        self.history.current()[0]
    }

    pub fn assign(&mut self, value: Tensor) {
        self.history.assign(0, value);
    }
}

/// Per-particle time-stepped values
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub history: History,
    /// When false, the value changes sign when read from the other end of
    /// a pair
    pub symmetric: bool,
    locked: Vec<bool>,
}

impl Field {
    pub fn new(name: impl Into<String>, len: usize, initial: Tensor, depth: usize) -> Self {
        Self {
            name: name.into(),
            history: History::new(len, depth, initial),
            symmetric: true,
            locked: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn values(&self) -> &[Tensor] {
        self.history.current()
    }

    pub fn get(&self, index: usize, level: usize) -> Option<Tensor> {
        self.history.get(index, level)
    }

    /// Assign a new value unless the element is locked; returns whether the
    /// write happened
    pub fn assign(&mut self, index: usize, value: Tensor) -> bool {
        if self.locked[index] {
            return false;
        }
        self.history.assign(index, value);
        true
    }

    /// Set every history level of one element, bypassing locks
    pub fn set_value(&mut self, value: Tensor, index: usize) {
        self.history.reset(index, value);
    }

    /// Move one element by `delta` at every history level
    pub fn translate(&mut self, index: usize, delta: &Tensor) -> Result<(), TensorError> {
        self.history.translate(index, delta)
    }

    pub fn lock(&mut self, index: usize) {
        self.locked[index] = true;
    }

    pub fn unlock(&mut self, index: usize) {
        self.locked[index] = false;
    }

    pub fn is_locked(&self, index: usize) -> bool {
        self.locked.get(index).copied().unwrap_or(false)
    }

    pub fn push(&mut self, value: Tensor) {
        self.history.push(value);
        self.locked.push(false);
    }

    pub fn duplicate(&mut self, index: usize) {
        self.history.duplicate(index);
        self.locked.push(self.locked[index]);
    }

    pub fn retain(&mut self, keep: &[bool]) {
        self.history.retain(keep);
        let mut k = 0;
        self.locked.retain(|_| {
            let kept = keep[k];
            k += 1;
            kept
        });
    }
}

/// The position field together with the spatial index built over it
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    pub positions: Field,
    pub domain: Domain,
}

/// A named entry of the workspace symbol table
#[derive(Debug, Clone)]
pub enum Symbol {
    Constant(Constant),
    Variable(Variable),
    Field(Field),
    ParticleSystem(ParticleSystem),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Constant(c) => &c.name,
            Symbol::Variable(v) => &v.name,
            Symbol::Field(f) => &f.name,
            Symbol::ParticleSystem(p) => &p.positions.name,
        }
    }

    pub fn kind(&self) -> SymbolKind {
        match self {
            Symbol::Constant(_) => SymbolKind::Constant,
            Symbol::Variable(_) => SymbolKind::Variable,
            Symbol::Field(_) => SymbolKind::Field,
            Symbol::ParticleSystem(_) => SymbolKind::ParticleSystem,
        }
    }

    /// 1 for scalar symbols, the element count for per-particle ones
    pub fn field_size(&self) -> usize {
        match self {
            Symbol::Constant(_) | Symbol::Variable(_) => 1,
            Symbol::Field(f) => f.len(),
            Symbol::ParticleSystem(p) => p.positions.len(),
        }
    }

    pub fn is_per_particle(&self) -> bool {
        matches!(self, Symbol::Field(_) | Symbol::ParticleSystem(_))
    }

    /// Value at `index` and history `level`; scalar symbols ignore the index
    pub fn value(&self, index: usize, level: usize) -> Option<Tensor> {
        match self {
            Symbol::Constant(c) => Some(c.value),
            Symbol::Variable(v) => v.history.get(0, level),
            Symbol::Field(f) => f.get(index, level),
            Symbol::ParticleSystem(p) => p.positions.get(index, level),
        }
    }

    pub fn history_depth(&self) -> usize {
        match self {
            Symbol::Constant(_) => 1,
            Symbol::Variable(v) => v.history.depth(),
            Symbol::Field(f) => f.history.depth(),
            Symbol::ParticleSystem(p) => p.positions.history.depth(),
        }
    }

    pub fn ensure_history(&mut self, depth: usize) {
        match self {
            Symbol::Constant(_) => {}
            Symbol::Variable(v) => v.history.ensure_depth(depth),
            Symbol::Field(f) => f.history.ensure_depth(depth),
            Symbol::ParticleSystem(p) => p.positions.history.ensure_depth(depth),
        }
    }

    /// Per-particle storage, if this symbol has any
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Symbol::Field(f) => Some(f),
            Symbol::ParticleSystem(p) => Some(&p.positions),
            _ => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut Field> {
        match self {
            Symbol::Field(f) => Some(f),
            Symbol::ParticleSystem(p) => Some(&mut p.positions),
            _ => None,
        }
    }
}
