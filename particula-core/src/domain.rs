//! Uniform-grid spatial index used for neighbor search
//!
//! The grid covers integer cell coordinates in `[minimum, maximum)` along
//! each active axis. Particles in the same cell form a singly-linked chain:
//! `cidx[cell]` holds the most recent occupant and `pidx[i]` the occupant
//! inserted before `i`. Neighbor enumeration walks the 3^d stencil of
//! surrounding cells and follows each chain.

use crate::tensor::Tensor;
use glam::{DVec3, IVec3};
use thiserror::Error;

const EMPTY: usize = usize::MAX;

/// Boundary treatment along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Closed axis: cells past the edge do not exist and particles that
    /// leave the grid are an error
    Symmetric,
    /// Wrapping axis: particles re-enter on the opposite side
    Periodic,
}

/// What happens to a particle shifted back across a periodic boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodicPolicy {
    /// Keep the particle at its wrapped position
    #[default]
    Wrap,
    /// Queue the particle for removal from the particle system
    Remove,
}

/// Errors raised while building or querying the spatial index
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("particle {index} hashes outside the grid at cell {cell:?}")]
    OutOfBounds { index: usize, cell: [i32; 3] },
    #[error("particle {0} has a non-finite position")]
    NonFinite(usize),
    #[error("neighbor data requested while the domain is stale")]
    Stale,
    #[error("particle index {0} is not indexed by the domain")]
    UnknownParticle(usize),
    #[error("invalid domain: {0}")]
    Invalid(String),
}

/// Grid-hashed spatial partition over a particle system's positions
#[derive(Debug, Clone)]
pub struct Domain {
    dim: usize,
    minimum: IVec3,
    maximum: IVec3,
    cell_size: DVec3,
    boundary: [Boundary; 3],
    policy: PeriodicPolicy,
    valid: bool,
    cidx: Vec<usize>,
    pidx: Vec<usize>,
    cell_of: Vec<usize>,
    cell_iterator: Vec<IVec3>,
}

impl Domain {
    /// Create a domain of dimension `minimum.len()` (1 to 3 axes)
    pub fn new(
        minimum: &[i32],
        maximum: &[i32],
        cell_size: &[f64],
        boundary: &[Boundary],
    ) -> Result<Self, DomainError> {
        let dim = minimum.len();
        if !(1..=3).contains(&dim) {
            return Err(DomainError::Invalid(format!(
                "dimension must be 1 to 3, got {}",
                dim
            )));
        }
        if maximum.len() != dim || cell_size.len() != dim || boundary.len() != dim {
            return Err(DomainError::Invalid(
                "minimum, maximum, cell size and boundary need one entry per axis".to_string(),
            ));
        }

        let mut min = IVec3::ZERO;
        let mut max = IVec3::ONE;
        let mut size = DVec3::ONE;
        let mut kinds = [Boundary::Symmetric; 3];
        for axis in 0..dim {
            if minimum[axis] > maximum[axis] {
                return Err(DomainError::Invalid(format!(
                    "minimum exceeds maximum on axis {}",
                    axis
                )));
            }
            if !(cell_size[axis] > 0.0) || !cell_size[axis].is_finite() {
                return Err(DomainError::Invalid(format!(
                    "cell size on axis {} must be positive",
                    axis
                )));
            }
            if boundary[axis] == Boundary::Periodic && maximum[axis] - minimum[axis] < 3 {
                return Err(DomainError::Invalid(format!(
                    "periodic axis {} needs at least 3 cells",
                    axis
                )));
            }
            min[axis] = minimum[axis];
            max[axis] = maximum[axis];
            size[axis] = cell_size[axis];
            kinds[axis] = boundary[axis];
        }

        Ok(Self {
            dim,
            minimum: min,
            maximum: max,
            cell_size: size,
            boundary: kinds,
            policy: PeriodicPolicy::default(),
            valid: false,
            cidx: Vec::new(),
            pidx: Vec::new(),
            cell_of: Vec::new(),
            cell_iterator: build_cell_iterator(dim),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn minimum(&self) -> IVec3 {
        self.minimum
    }

    pub fn maximum(&self) -> IVec3 {
        self.maximum
    }

    pub fn cell_size(&self) -> DVec3 {
        self.cell_size
    }

    pub fn boundary(&self, axis: usize) -> Boundary {
        self.boundary[axis]
    }

    pub fn policy(&self) -> PeriodicPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: PeriodicPolicy) {
        self.policy = policy;
    }

    /// Cells per axis; inactive axes count one cell
    pub fn counts(&self) -> IVec3 {
        self.maximum - self.minimum
    }

    pub fn num_cells(&self) -> usize {
        let c = self.counts();
        (c.x as usize) * (c.y as usize) * (c.z as usize)
    }

    /// Physical extent of the grid along each axis
    pub fn width(&self) -> DVec3 {
        self.counts().as_dvec3() * self.cell_size
    }

    /// Interaction range: the smallest cell edge over active axes
    pub fn cutoff(&self) -> f64 {
        (0..self.dim)
            .map(|a| self.cell_size[a])
            .fold(f64::INFINITY, f64::min)
    }

    /// True while the index reflects the current positions
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the index stale; called on every position write
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// The 3^d neighbor-cell offsets
    pub fn cell_iterator(&self) -> &[IVec3] {
        &self.cell_iterator
    }

    /// Grid coordinate of a position relative to `minimum`
    pub fn grid_coordinates(&self, position: DVec3) -> IVec3 {
        let mut g = IVec3::ZERO;
        for axis in 0..self.dim {
            let cell = (position[axis] / self.cell_size[axis]).floor() - self.minimum[axis] as f64;
            g[axis] = cell.round() as i32;
        }
        g
    }

    /// Mixed-radix flattening, most significant axis first. `None` for
    /// coordinates outside the grid.
    pub fn hash_key(&self, g: IVec3) -> Option<usize> {
        let counts = self.counts();
        let mut key = 0usize;
        for axis in 0..3 {
            if g[axis] < 0 || g[axis] >= counts[axis] {
                return None;
            }
            key = key * counts[axis] as usize + g[axis] as usize;
        }
        Some(key)
    }

    /// Inverse of [`Domain::hash_key`]
    pub fn decode_key(&self, mut key: usize) -> IVec3 {
        let counts = self.counts();
        let mut g = IVec3::ZERO;
        for axis in (0..3).rev() {
            let n = counts[axis] as usize;
            g[axis] = (key % n) as i32;
            key /= n;
        }
        g
    }

    /// Offset that brings a position back into the primary range along the
    /// periodic axes, or `None` if it is already inside
    pub fn periodic_shift(&self, position: DVec3) -> Option<DVec3> {
        let g = self.grid_coordinates(position);
        let counts = self.counts();
        let mut shift = DVec3::ZERO;
        let mut shifted = false;
        for axis in 0..self.dim {
            if self.boundary[axis] != Boundary::Periodic {
                continue;
            }
            let wrapped = g[axis].rem_euclid(counts[axis]);
            if wrapped != g[axis] {
                shift[axis] = (wrapped - g[axis]) as f64 * self.cell_size[axis];
                shifted = true;
            }
        }
        shifted.then_some(shift)
    }

    /// Shortest periodic image of a separation vector
    pub fn minimum_image(&self, mut delta: DVec3) -> DVec3 {
        let width = self.width();
        for axis in 0..self.dim {
            if self.boundary[axis] == Boundary::Periodic {
                delta[axis] -= width[axis] * (delta[axis] / width[axis]).round();
            }
        }
        delta
    }

    /// Rebuild the cell chains from the given positions. On failure the
    /// domain stays stale and the error names the first offending particle.
    pub fn update(&mut self, positions: &[Tensor]) -> Result<(), DomainError> {
        self.valid = false;
        self.cidx.clear();
        self.cidx.resize(self.num_cells(), EMPTY);
        self.pidx.clear();
        self.pidx.resize(positions.len(), EMPTY);
        self.cell_of.clear();
        self.cell_of.resize(positions.len(), EMPTY);

        for (i, p) in positions.iter().enumerate() {
            let p = p.to_dvec3();
            if !p.is_finite() {
                return Err(DomainError::NonFinite(i));
            }
            let g = self.grid_coordinates(p);
            let key = self
                .hash_key(g)
                .ok_or(DomainError::OutOfBounds {
                    index: i,
                    cell: g.to_array(),
                })?;
            self.pidx[i] = self.cidx[key];
            self.cidx[key] = i;
            self.cell_of[i] = key;
        }

        self.valid = true;
        Ok(())
    }

    /// Cell key of particle `i` from the last update
    pub fn particle_cell(&self, i: usize) -> Option<usize> {
        self.cell_of.get(i).copied().filter(|k| *k != EMPTY)
    }

    /// Particles chained in one cell, most recent first
    pub fn cell_members(&self, key: usize) -> CellChain<'_> {
        CellChain {
            domain: self,
            next: self.cidx.get(key).copied().unwrap_or(EMPTY),
        }
    }

    /// Visit every particle `j != i` in the stencil around `i`, passing the
    /// relative position `x_i - x_j` (periodic image on wrapping axes).
    pub fn for_each_neighbor(
        &self,
        i: usize,
        positions: &[Tensor],
        mut visit: impl FnMut(usize, DVec3),
    ) -> Result<(), DomainError> {
        if !self.valid {
            return Err(DomainError::Stale);
        }
        let home = self
            .particle_cell(i)
            .map(|k| self.decode_key(k))
            .ok_or(DomainError::UnknownParticle(i))?;
        let xi = positions
            .get(i)
            .ok_or(DomainError::UnknownParticle(i))?
            .to_dvec3();
        let counts = self.counts();
        let width = self.width();

        'cells: for offset in &self.cell_iterator {
            let mut cell = home + *offset;
            let mut image = DVec3::ZERO;
            for axis in 0..self.dim {
                if cell[axis] >= 0 && cell[axis] < counts[axis] {
                    continue;
                }
                match self.boundary[axis] {
                    Boundary::Symmetric => continue 'cells,
                    Boundary::Periodic => {
                        let wrapped = cell[axis].rem_euclid(counts[axis]);
                        let turns = (cell[axis] - wrapped) / counts[axis];
                        image[axis] = turns as f64 * width[axis];
                        cell[axis] = wrapped;
                    }
                }
            }
            let Some(key) = self.hash_key(cell) else {
                continue;
            };
            for j in self.cell_members(key) {
                if j != i {
                    let xj = positions[j].to_dvec3() + image;
                    visit(j, xi - xj);
                }
            }
        }
        Ok(())
    }

    /// Indices of the stencil neighbors of `i`
    pub fn neighbors(&self, i: usize, positions: &[Tensor]) -> Result<Vec<usize>, DomainError> {
        let mut out = Vec::new();
        self.for_each_neighbor(i, positions, |j, _| out.push(j))?;
        Ok(out)
    }
}

/// Iterator over one cell's particle chain
pub struct CellChain<'a> {
    domain: &'a Domain,
    next: usize,
}

impl Iterator for CellChain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next == EMPTY {
            return None;
        }
        let current = self.next;
        self.next = self.domain.pidx[current];
        Some(current)
    }
}

/// All combinations of {-1, 0, 1} over the active axes
fn build_cell_iterator(dim: usize) -> Vec<IVec3> {
    let mut offsets = vec![IVec3::ZERO];
    for axis in 0..dim {
        offsets = offsets
            .into_iter()
            .flat_map(|o| {
                (-1..=1).map(move |d| {
                    let mut next = o;
                    next[axis] = d;
                    next
                })
            })
            .collect();
    }
    offsets
}
