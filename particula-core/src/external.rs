//! Coupling to solvers that live outside the expression engine
//!
//! A coupling selects the particles whose tag field equals a given value,
//! copies their ids, positions and velocities into flat arrays, hands the
//! arrays to an [`ExternalSolver`] and scatters the returned records back
//! into the position and velocity fields by id.

use crate::error::Error;
use crate::tensor::Tensor;
use crate::workspace::{SymbolId, Workspace, WorkspaceError};
use glam::DVec3;
use thiserror::Error as ThisError;
use tracing::debug;

/// Failure reported by an external solver
#[derive(Debug, Clone, ThisError)]
#[error("{0}")]
pub struct ExternalError(pub String);

/// Flat particle records exchanged with an external solver. Entry `k` of
/// every array belongs to particle `ids[k]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouplingBuffers {
    pub ids: Vec<usize>,
    pub positions: Vec<[f64; 3]>,
    pub velocities: Vec<[f64; 3]>,
    pub time: f64,
    pub dt: f64,
}

impl CouplingBuffers {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// An opaque computation over coupled particles. It may rewrite positions
/// and velocities in place, and may drop records it does not update.
pub trait ExternalSolver: Send {
    fn name(&self) -> &str;

    fn calculation(&mut self, buffers: &mut CouplingBuffers) -> Result<(), ExternalError>;
}

/// A registered external solver plus the fields it reads and writes
pub struct ExternalCoupling {
    tag: SymbolId,
    tag_value: f64,
    positions: SymbolId,
    velocities: SymbolId,
    solver: Box<dyn ExternalSolver>,
}

impl std::fmt::Debug for ExternalCoupling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalCoupling")
            .field("solver", &self.solver.name())
            .field("tag", &self.tag)
            .field("tag_value", &self.tag_value)
            .finish()
    }
}

impl ExternalCoupling {
    /// Couple particles whose `tag` field equals `tag_value`; results go to
    /// the particle positions and the `velocity` field
    pub fn new(
        workspace: &Workspace,
        tag: &str,
        tag_value: f64,
        velocity: &str,
        solver: Box<dyn ExternalSolver>,
    ) -> Result<Self, WorkspaceError> {
        let positions = workspace
            .particle_system_id()
            .ok_or(WorkspaceError::NoParticleSystem)?;
        let field = |name: &str| {
            let id = workspace
                .get_instance(name)
                .ok_or_else(|| WorkspaceError::UnknownSymbol(name.to_string()))?;
            let symbol = workspace.symbol(id);
            if !symbol.is_per_particle() {
                return Err(WorkspaceError::NotAField {
                    name: name.to_string(),
                    kind: symbol.kind().as_str(),
                });
            }
            Ok(id)
        };
        Ok(Self {
            tag: field(tag)?,
            tag_value,
            positions,
            velocities: field(velocity)?,
            solver,
        })
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    /// Indices of the tagged particles, ascending
    pub fn select(&self, workspace: &Workspace) -> Vec<usize> {
        (0..workspace.particle_count())
            .filter(|&i| {
                workspace
                    .value(self.tag, i, 0)
                    .map(|t| t.is_scalar() && t.value() == self.tag_value)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Copy the tagged particles into flat buffers
    pub fn gather(&self, workspace: &Workspace, time: f64, dt: f64) -> CouplingBuffers {
        let ids = self.select(workspace);
        let read = |field: SymbolId, i: usize| {
            workspace
                .value(field, i, 0)
                .map(|t| t.to_dvec3().to_array())
                .unwrap_or([0.0; 3])
        };
        CouplingBuffers {
            positions: ids.iter().map(|&i| read(self.positions, i)).collect(),
            velocities: ids.iter().map(|&i| read(self.velocities, i)).collect(),
            ids,
            time,
            dt,
        }
    }

    /// Write returned records back by id; returns how many particles were
    /// updated
    pub fn scatter(
        &self,
        workspace: &mut Workspace,
        buffers: &CouplingBuffers,
    ) -> Result<usize, WorkspaceError> {
        let count = workspace.particle_count();
        let mut positions = vec![None; count];
        let mut velocities = vec![None; count];
        for (k, &id) in buffers.ids.iter().enumerate() {
            if id >= count {
                return Err(WorkspaceError::IndexOutOfRange {
                    name: workspace.name(self.positions).to_string(),
                    index: id,
                    len: count,
                });
            }
            if let Some(p) = buffers.positions.get(k) {
                positions[id] = Some(reshape(workspace, self.positions, id, *p));
            }
            if let Some(v) = buffers.velocities.get(k) {
                velocities[id] = Some(reshape(workspace, self.velocities, id, *v));
            }
        }
        workspace.commit(self.velocities, &velocities)?;
        workspace.commit(self.positions, &positions)
    }

    /// Gather, run the solver and scatter
    pub fn run(&mut self, workspace: &mut Workspace, time: f64, dt: f64) -> Result<usize, Error> {
        let mut buffers = self.gather(workspace, time, dt);
        if buffers.is_empty() {
            return Ok(0);
        }
        self.solver
            .calculation(&mut buffers)
            .map_err(|e| Error::External {
                name: self.solver.name().to_string(),
                message: e.0,
            })?;
        let updated = self.scatter(workspace, &buffers)?;
        debug!(solver = self.solver.name(), updated, "external solver ran");
        Ok(updated)
    }
}

/// Vector record shaped like the field's current value at `i`
fn reshape(workspace: &Workspace, field: SymbolId, i: usize, v: [f64; 3]) -> Tensor {
    let full = Tensor::from_dvec3(DVec3::from_array(v), 3);
    match workspace.value(field, i, 0).filter(Tensor::is_vector) {
        Some(t) => Tensor::new(t.rows(), t.cols(), &v[..t.len()]).unwrap_or(full),
        None => full,
    }
}
