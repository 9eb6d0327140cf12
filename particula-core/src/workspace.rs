//! Name-keyed symbol table and particle-system container
//!
//! The workspace owns every symbol, the single particle system with its
//! domain, and the registry of named pair lists. Expression trees refer to
//! symbols by [`SymbolId`] and resolve names through [`Workspace::get_instance`].

use crate::domain::{Domain, DomainError, PeriodicPolicy};
use crate::pairs::{PairError, Pairs};
use crate::symbol::{Constant, Field, ParticleSystem, Symbol, SymbolKind, Variable};
use crate::tensor::{Tensor, TensorError};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Stable handle of a symbol inside one workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors raised by symbol-table operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("symbol '{0}' is already defined")]
    Duplicate(String),
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("'{name}' is a {kind} and cannot be assigned per particle")]
    NotAField { name: String, kind: &'static str },
    #[error("constant '{0}' cannot be assigned")]
    ConstantAssignment(String),
    #[error("no particle system has been defined")]
    NoParticleSystem,
    #[error("a particle system is already defined")]
    SecondParticleSystem,
    #[error("index {index} out of range for '{name}' with {len} element(s)")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
    #[error("pair list '{0}' is already defined")]
    DuplicatePairs(String),
    #[error("unknown pair list '{0}'")]
    UnknownPairs(String),
    #[error("pairing radius {radius} exceeds the domain cutoff {cutoff}")]
    RadiusTooLarge { radius: f64, cutoff: f64 },
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Symbol table, particle system and pair registry of one simulation
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    particle_system: Option<SymbolId>,
    pairs: Vec<Pairs>,
    pending_removal: BTreeSet<usize>,
    seed: u64,
    step: u64,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, symbol: Symbol) -> Result<SymbolId, WorkspaceError> {
        let name = symbol.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(WorkspaceError::Duplicate(name));
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn add_constant(
        &mut self,
        name: &str,
        value: Tensor,
        hidden: bool,
    ) -> Result<SymbolId, WorkspaceError> {
        self.insert(Symbol::Constant(Constant {
            name: name.to_string(),
            value,
            hidden,
        }))
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        value: Tensor,
        depth: usize,
    ) -> Result<SymbolId, WorkspaceError> {
        self.insert(Symbol::Variable(Variable::new(name, value, depth)))
    }

    /// Add a per-particle field sized to the current particle count
    pub fn add_field(
        &mut self,
        name: &str,
        initial: Tensor,
        depth: usize,
    ) -> Result<SymbolId, WorkspaceError> {
        let count = self.particle_count();
        if self.particle_system.is_none() {
            return Err(WorkspaceError::NoParticleSystem);
        }
        self.insert(Symbol::Field(Field::new(name, count, initial, depth)))
    }

    /// Add the particle system: its positions field and the domain indexing it
    pub fn add_particle_system(
        &mut self,
        name: &str,
        positions: &[Tensor],
        domain: Domain,
    ) -> Result<SymbolId, WorkspaceError> {
        if self.particle_system.is_some() {
            return Err(WorkspaceError::SecondParticleSystem);
        }
        let mut field = Field::new(name, positions.len(), Tensor::default(), 1);
        for (i, p) in positions.iter().enumerate() {
            field.set_value(*p, i);
        }
        let id = self.insert(Symbol::ParticleSystem(ParticleSystem {
            positions: field,
            domain,
        }))?;
        self.particle_system = Some(id);
        Ok(id)
    }

    pub fn get_instance(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn name(&self, id: SymbolId) -> &str {
        self.symbols[id.index()].name()
    }

    /// All symbols in definition order
    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(k, s)| (SymbolId(k as u32), s))
    }

    pub fn particle_system_id(&self) -> Option<SymbolId> {
        self.particle_system
    }

    pub fn get_particle_system(&self) -> Option<&ParticleSystem> {
        match self.particle_system.map(|id| self.symbol(id)) {
            Some(Symbol::ParticleSystem(ps)) => Some(ps),
            _ => None,
        }
    }

    fn particle_system_mut(&mut self) -> Option<&mut ParticleSystem> {
        let id = self.particle_system?;
        match self.symbol_mut(id) {
            Symbol::ParticleSystem(ps) => Some(ps),
            _ => None,
        }
    }

    pub fn particle_count(&self) -> usize {
        self.get_particle_system()
            .map(|ps| ps.positions.len())
            .unwrap_or(0)
    }

    pub fn positions(&self) -> &[Tensor] {
        self.get_particle_system()
            .map(|ps| ps.positions.values())
            .unwrap_or(&[])
    }

    pub fn domain(&self) -> Option<&Domain> {
        self.get_particle_system().map(|ps| &ps.domain)
    }

    pub fn is_domain_valid(&self) -> bool {
        self.domain().map(Domain::is_valid).unwrap_or(false)
    }

    pub fn value(&self, id: SymbolId, index: usize, level: usize) -> Option<Tensor> {
        self.symbol(id).value(index, level)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Number of completed steps; part of the random stream key
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn advance_step(&mut self) {
        self.step += 1;
    }

    pub fn ensure_history(&mut self, id: SymbolId, depth: usize) {
        self.symbol_mut(id).ensure_history(depth);
    }

    fn invalidate_if_positions(&mut self, id: SymbolId) {
        if Some(id) == self.particle_system {
            if let Some(ps) = self.particle_system_mut() {
                ps.domain.invalidate();
            }
        }
    }

    /// Overwrite element `index` of a symbol at every history level. Used to
    /// repopulate fields when reading saved state.
    pub fn set_value(
        &mut self,
        id: SymbolId,
        value: Tensor,
        index: usize,
    ) -> Result<(), WorkspaceError> {
        match self.symbol_mut(id) {
            Symbol::Constant(c) => return Err(WorkspaceError::ConstantAssignment(c.name.clone())),
            Symbol::Variable(v) => v.history.reset(0, value),
            symbol => {
                let field = symbol
                    .as_field_mut()
                    .ok_or(WorkspaceError::NoParticleSystem)?;
                if index >= field.len() {
                    return Err(WorkspaceError::IndexOutOfRange {
                        name: field.name.clone(),
                        index,
                        len: field.len(),
                    });
                }
                field.set_value(value, index);
            }
        }
        self.invalidate_if_positions(id);
        Ok(())
    }

    /// Write freshly computed values into a symbol's current slot. `None`
    /// entries are skipped; locked elements are left untouched. Returns how
    /// many elements were written.
    pub fn commit(&mut self, id: SymbolId, values: &[Option<Tensor>]) -> Result<usize, WorkspaceError> {
        let mut written = 0;
        match self.symbol_mut(id) {
            Symbol::Constant(c) => return Err(WorkspaceError::ConstantAssignment(c.name.clone())),
            Symbol::Variable(v) => {
                if let Some(Some(value)) = values.first() {
                    v.assign(*value);
                    written = 1;
                }
            }
            symbol => {
                let field = symbol.as_field_mut().ok_or(WorkspaceError::NoParticleSystem)?;
                for (i, value) in values.iter().enumerate() {
                    if let Some(value) = value {
                        if i < field.len() && field.assign(i, *value) {
                            written += 1;
                        }
                    }
                }
            }
        }
        if written > 0 {
            self.invalidate_if_positions(id);
        }
        Ok(written)
    }

    pub fn lock(&mut self, id: SymbolId, index: usize) -> Result<(), WorkspaceError> {
        let name = self.name(id).to_string();
        let kind = self.symbol(id).kind();
        let field = self
            .symbol_mut(id)
            .as_field_mut()
            .ok_or(WorkspaceError::NotAField {
                name: name.clone(),
                kind: kind.as_str(),
            })?;
        if index >= field.len() {
            return Err(WorkspaceError::IndexOutOfRange {
                name,
                index,
                len: field.len(),
            });
        }
        field.lock(index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Domain maintenance
    // ------------------------------------------------------------------

    /// Shift particles on periodic axes back into the primary range.
    /// Returns the indices that were shifted; under
    /// [`PeriodicPolicy::Remove`] they are also queued for removal.
    pub fn restrict_particles(&mut self) -> Result<Vec<usize>, WorkspaceError> {
        let Some(ps) = self.particle_system_mut() else {
            return Err(WorkspaceError::NoParticleSystem);
        };
        let dim = ps.domain.dimension();
        let mut shifted = Vec::new();
        for i in 0..ps.positions.len() {
            let p = ps.positions.values()[i].to_dvec3();
            if !p.is_finite() {
                continue;
            }
            if let Some(shift) = ps.domain.periodic_shift(p) {
                let len = ps.positions.values()[i].len().min(dim);
                ps.positions.translate(i, &Tensor::from_dvec3(shift, len))?;
                shifted.push(i);
            }
        }
        if !shifted.is_empty() {
            ps.domain.invalidate();
        }
        if ps.domain.policy() == PeriodicPolicy::Remove {
            self.pending_removal.extend(shifted.iter().copied());
        }
        Ok(shifted)
    }

    /// Refresh the domain: wrap periodic particles, apply queued particle
    /// removals and rebuild the cell index. On failure the domain stays
    /// stale and the caller abandons the current step.
    pub fn update(&mut self) -> Result<(), WorkspaceError> {
        self.restrict_particles()?;
        if !self.pending_removal.is_empty() {
            let removed: Vec<usize> = std::mem::take(&mut self.pending_removal)
                .into_iter()
                .collect();
            warn!(count = removed.len(), "removing particles that crossed a periodic boundary");
            self.delete_set(&removed)?;
        }
        let ps = self
            .particle_system_mut()
            .ok_or(WorkspaceError::NoParticleSystem)?;
        let ParticleSystem { positions, domain } = ps;
        domain.update(positions.values())?;
        debug!(particles = positions.len(), "domain updated");
        Ok(())
    }

    /// Refresh only when a position write made the index stale
    pub fn update_if_stale(&mut self) -> Result<(), WorkspaceError> {
        if self.is_domain_valid() {
            return Ok(());
        }
        self.update()
    }

    // ------------------------------------------------------------------
    // Dynamic particle count
    // ------------------------------------------------------------------

    fn per_particle_ids(&self) -> Vec<SymbolId> {
        self.symbols()
            .filter(|(_, s)| s.is_per_particle())
            .map(|(id, _)| id)
            .collect()
    }

    /// Append a particle at `position`; other fields start at zero shaped
    /// like their first element. Returns the new index.
    pub fn add_member(&mut self, position: Tensor) -> Result<usize, WorkspaceError> {
        let ps_id = self.particle_system.ok_or(WorkspaceError::NoParticleSystem)?;
        for id in self.per_particle_ids() {
            if let Some(field) = self.symbol_mut(id).as_field_mut() {
                let value = if id == ps_id {
                    position
                } else {
                    let (r, c) = field.values().first().map(Tensor::shape).unwrap_or((1, 1));
                    Tensor::zeros(r, c)?
                };
                field.push(value);
            }
        }
        let count = self.particle_count();
        for pairs in self.pairs.iter_mut() {
            pairs.grow_particles(count);
        }
        self.invalidate_if_positions(ps_id);
        Ok(count - 1)
    }

    /// Append a copy of particle `index` across every field
    pub fn duplicate_member(&mut self, index: usize) -> Result<usize, WorkspaceError> {
        let ps_id = self.particle_system.ok_or(WorkspaceError::NoParticleSystem)?;
        self.check_index(index)?;
        for id in self.per_particle_ids() {
            if let Some(field) = self.symbol_mut(id).as_field_mut() {
                field.duplicate(index);
            }
        }
        let count = self.particle_count();
        for pairs in self.pairs.iter_mut() {
            pairs.grow_particles(count);
        }
        self.invalidate_if_positions(ps_id);
        Ok(count - 1)
    }

    pub fn delete_member(&mut self, index: usize) -> Result<(), WorkspaceError> {
        self.delete_set(&[index])
    }

    /// Remove a set of particles from every field and pair list; survivors
    /// keep their relative order
    pub fn delete_set(&mut self, indices: &[usize]) -> Result<(), WorkspaceError> {
        let ps_id = self.particle_system.ok_or(WorkspaceError::NoParticleSystem)?;
        let count = self.particle_count();
        let mut keep = vec![true; count];
        for &i in indices {
            self.check_index(i)?;
            keep[i] = false;
        }
        for id in self.per_particle_ids() {
            if let Some(field) = self.symbol_mut(id).as_field_mut() {
                field.retain(&keep);
            }
        }
        for pairs in self.pairs.iter_mut() {
            pairs.remove_particles(&keep);
        }
        self.invalidate_if_positions(ps_id);
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), WorkspaceError> {
        let len = self.particle_count();
        if index >= len {
            let name = self
                .particle_system
                .map(|id| self.name(id).to_string())
                .unwrap_or_default();
            return Err(WorkspaceError::IndexOutOfRange { name, index, len });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pair registry
    // ------------------------------------------------------------------

    pub fn add_pairs(&mut self, pairs: Pairs) -> Result<usize, WorkspaceError> {
        if self.pairs_index(pairs.name()).is_some() {
            return Err(WorkspaceError::DuplicatePairs(pairs.name().to_string()));
        }
        self.pairs.push(pairs);
        Ok(self.pairs.len() - 1)
    }

    pub fn pairs_index(&self, name: &str) -> Option<usize> {
        self.pairs.iter().position(|p| p.name() == name)
    }

    pub fn pairs(&self, name: &str) -> Option<&Pairs> {
        self.pairs.iter().find(|p| p.name() == name)
    }

    pub fn pairs_at(&self, index: usize) -> &Pairs {
        &self.pairs[index]
    }

    pub fn pairs_mut(&mut self, name: &str) -> Option<&mut Pairs> {
        self.pairs.iter_mut().find(|p| p.name() == name)
    }

    pub fn all_pairs(&self) -> &[Pairs] {
        &self.pairs
    }

    /// Create pair list `name` bonding every particle pair closer than
    /// `radius`, with a symmetric series `r0` holding the initial distance
    pub fn connect_within(&mut self, name: &str, radius: f64) -> Result<usize, WorkspaceError> {
        self.update_if_stale()?;
        let ps = self
            .get_particle_system()
            .ok_or(WorkspaceError::NoParticleSystem)?;
        let cutoff = ps.domain.cutoff();
        if radius > cutoff {
            return Err(WorkspaceError::RadiusTooLarge { radius, cutoff });
        }
        let positions = ps.positions.values();
        let mut pairs = Pairs::new(name, positions.len());
        pairs.add_series("r0", true)?;
        for i in 0..positions.len() {
            let mut found = Vec::new();
            ps.domain.for_each_neighbor(i, positions, |j, r| {
                if j > i && r.length() < radius {
                    found.push((j, r.length()));
                }
            })?;
            for (j, distance) in found {
                if !pairs.contains(i, j) {
                    pairs.add_pair(i, j, &[distance])?;
                }
            }
        }
        debug!(pairs = pairs.len(), name, "pair list built");
        self.add_pairs(pairs)
    }

    /// Kind of a named symbol, if defined
    pub fn kind_of(&self, name: &str) -> Option<SymbolKind> {
        self.get_instance(name).map(|id| self.symbol(id).kind())
    }
}
