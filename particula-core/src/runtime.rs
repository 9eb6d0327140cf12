//! Simulation setup and the per-step schedule

use crate::analyzer::{analyze_program, TIME, TIME_STEP};
use crate::ast::{Placement, Program, SimulateDecl, StageDecl, SymbolDeclKind};
use crate::domain::{Domain, DomainError};
use crate::equation::{fit_shape, BreakRule, Equation};
use crate::error::{Error, SetupError};
use crate::eval::{Evaluator, GlobalCache};
use crate::expr::{ExprArena, Expression};
use crate::external::{ExternalCoupling, ExternalSolver};
use crate::parser::parse_program;
use crate::tensor::Tensor;
use crate::workspace::{SymbolId, Workspace, WorkspaceError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Run settings taken from the `simulate` line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub end_time: f64,
    pub threads: usize,
    pub seed: u64,
}

impl SimulationSettings {
    pub fn from_decl(decl: &SimulateDecl) -> Self {
        Self {
            end_time: decl.end_time,
            threads: decl.threads.unwrap_or_else(default_threads),
            seed: decl.seed.unwrap_or(0),
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One entry of the per-step schedule
#[derive(Debug)]
pub enum Stage {
    Equation(Equation),
    BreakPairs(BreakRule),
    External(ExternalCoupling),
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    /// The domain could not be rebuilt; the remaining stages of the step
    /// were skipped and the clock still advanced
    Abandoned(DomainError),
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub steps: usize,
    pub abandoned: usize,
    pub time: f64,
    pub particles: usize,
}

/// A runnable simulation: workspace, expression arena and stage schedule
pub struct Simulation {
    workspace: Workspace,
    arena: ExprArena,
    stages: Vec<Stage>,
    settings: SimulationSettings,
    pool: ThreadPool,
    time: SymbolId,
    time_step: SymbolId,
    steps: usize,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("settings", &self.settings)
            .field("stages", &self.stages.len())
            .field("steps", &self.steps)
            .finish()
    }
}

impl Simulation {
    /// Build with the settings from the program's `simulate` line
    pub fn from_program(program: &Program) -> Result<Self, Error> {
        Self::build(program, SimulationSettings::from_decl(&program.simulate))
    }

    pub fn build(program: &Program, settings: SimulationSettings) -> Result<Self, Error> {
        let diagnostics = analyze_program(program);
        for w in diagnostics.warnings() {
            warn!("{}", w.message);
        }
        if diagnostics.has_errors() {
            let messages = diagnostics.errors().map(|d| d.message.clone()).collect();
            return Err(SetupError::Analysis(messages).into());
        }

        let mut workspace = Workspace::new();
        workspace.set_seed(settings.seed);
        let mut arena = ExprArena::new();

        if let Some(particles) = &program.particles {
            let decl = program.domain.as_ref().ok_or(SetupError::MissingDomain)?;
            let mut domain = Domain::new(&decl.minimum, &decl.maximum, &decl.cell_size, &decl.boundary)
                .map_err(SetupError::from)?;
            domain.set_policy(decl.policy);
            let positions = place_particles(&particles.placement, domain.dimension())?;
            workspace
                .add_particle_system(&particles.name, &positions, domain)
                .map_err(SetupError::from)?;
            workspace.update().map_err(SetupError::from)?;
            info!(particles = positions.len(), name = %particles.name, "particle system placed");
        }

        for decl in &program.symbols {
            define_symbol(&mut workspace, &mut arena, decl)?;
        }
        if workspace.get_instance(TIME).is_none() {
            workspace
                .add_variable(TIME, Tensor::scalar(0.0), 1)
                .map_err(SetupError::from)?;
        }

        for decl in &program.pairs {
            workspace
                .connect_within(&decl.name, decl.radius)
                .map_err(SetupError::from)?;
            if let Some(pairs) = workspace.pairs(&decl.name) {
                info!(name = %decl.name, bonds = pairs.len(), "pair list built");
            }
        }

        for lock in &program.locks {
            let id = lookup(&workspace, &lock.field)?;
            for &index in &lock.indices {
                workspace.lock(id, index).map_err(SetupError::from)?;
            }
        }

        let mut stages = Vec::with_capacity(program.stages.len());
        let mut depths: HashMap<SymbolId, usize> = HashMap::new();
        for stage in &program.stages {
            match stage {
                StageDecl::Equation(decl) => {
                    let setup = |source| SetupError::Equation {
                        name: decl.name.clone(),
                        text: decl.source.clone(),
                        source,
                    };
                    let lhs = lookup(&workspace, &decl.lhs)?;
                    let root = arena.lower(&decl.rhs, &workspace).map_err(setup)?;
                    let mut rhs = Expression::new(&decl.name, root);
                    rhs.assign(&arena, &workspace).map_err(setup)?;
                    let condition = match &decl.condition {
                        Some(c) => {
                            let root = arena.lower(c, &workspace).map_err(setup)?;
                            let mut cond = Expression::new(format!("{} condition", decl.name), root);
                            cond.assign(&arena, &workspace).map_err(setup)?;
                            Some(cond)
                        }
                        None => None,
                    };
                    let equation = Equation::new(&decl.name, lhs, rhs, condition, &decl.source);
                    if !workspace.symbol(lhs).is_per_particle()
                        && arena.field_size(equation.rhs.root, &workspace) > 1
                    {
                        return Err(SetupError::ScalarTarget {
                            name: decl.name.clone(),
                            lhs: decl.lhs.clone(),
                        }
                        .into());
                    }
                    for root in equation.roots() {
                        merge_depths(&mut depths, arena.history_requirements(root));
                    }
                    stages.push(Stage::Equation(equation));
                }
                StageDecl::Break(decl) => {
                    let condition = arena.lower(&decl.condition, &workspace).map_err(|source| {
                        SetupError::Equation {
                            name: format!("break {}", decl.pairs),
                            text: String::new(),
                            source,
                        }
                    })?;
                    merge_depths(&mut depths, arena.history_requirements(condition));
                    stages.push(Stage::BreakPairs(BreakRule {
                        pairs: decl.pairs.clone(),
                        condition,
                    }));
                }
            }
        }
        for (id, depth) in depths {
            if depth > workspace.symbol(id).history_depth() {
                debug!(symbol = workspace.name(id), depth, "raising history depth");
                workspace.ensure_history(id, depth);
            }
        }

        let time = lookup(&workspace, TIME)?;
        let time_step = lookup(&workspace, TIME_STEP)?;
        let pool = build_pool(settings.threads)?;

        let simulation = Self {
            workspace,
            arena,
            stages,
            settings,
            pool,
            time,
            time_step,
            steps: 0,
        };
        simulation.validate()?;
        info!(
            stages = simulation.stages.len(),
            threads = settings.threads,
            end_time = settings.end_time,
            "simulation ready"
        );
        Ok(simulation)
    }

    /// Evaluate every equation once at particle 0 so shape and name errors
    /// surface before the first step
    fn validate(&self) -> Result<(), Error> {
        for stage in &self.stages {
            if let Stage::Equation(eq) = stage {
                eq.dry_run(&self.arena, &self.workspace)
                    .map_err(|source| SetupError::Equation {
                        name: eq.name.clone(),
                        text: eq.text.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    /// Change the worker count; results do not depend on it
    pub fn set_threads(&mut self, threads: usize) -> Result<(), Error> {
        self.pool = build_pool(threads)?;
        self.settings.threads = threads;
        Ok(())
    }

    pub fn get_workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn get_workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    /// Equations in schedule order
    pub fn get_functions(&self) -> impl Iterator<Item = &Equation> {
        self.stages.iter().filter_map(|s| match s {
            Stage::Equation(eq) => Some(eq),
            _ => None,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Append an external solver stage after the current stages
    pub fn add_external(
        &mut self,
        tag: &str,
        tag_value: f64,
        velocity: &str,
        solver: Box<dyn ExternalSolver>,
    ) -> Result<(), Error> {
        let coupling = ExternalCoupling::new(&self.workspace, tag, tag_value, velocity, solver)?;
        self.stages.push(Stage::External(coupling));
        Ok(())
    }

    /// Insert an external solver stage at `position` in the schedule
    pub fn insert_external(
        &mut self,
        position: usize,
        tag: &str,
        tag_value: f64,
        velocity: &str,
        solver: Box<dyn ExternalSolver>,
    ) -> Result<(), Error> {
        let coupling = ExternalCoupling::new(&self.workspace, tag, tag_value, velocity, solver)?;
        self.stages.insert(position.min(self.stages.len()), Stage::External(coupling));
        Ok(())
    }

    pub fn time(&self) -> f64 {
        self.scalar(self.time)
    }

    pub fn dt(&self) -> f64 {
        self.scalar(self.time_step)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn scalar(&self, id: SymbolId) -> f64 {
        self.workspace
            .value(id, 0, 0)
            .map(|t| t.value())
            .unwrap_or(0.0)
    }

    /// Run every stage once in order, then advance `t` by `dt`
    pub fn step(&mut self) -> Result<StepOutcome, Error> {
        let threads = self.settings.threads;
        let time = self.time();
        let dt = self.dt();
        let mut outcome = StepOutcome::Completed;

        for stage in self.stages.iter_mut() {
            match stage {
                Stage::Equation(eq) => {
                    if eq.needs_domain(&self.arena, &self.workspace) {
                        if let Err(e) = self.workspace.update_if_stale() {
                            outcome = abandon(e)?;
                            break;
                        }
                    }
                    let arena = &self.arena;
                    let workspace = &mut self.workspace;
                    self.pool.install(|| eq.solve(arena, workspace, threads))?;
                }
                Stage::BreakPairs(rule) => {
                    if self.arena.uses_domain(rule.condition) {
                        if let Err(e) = self.workspace.update_if_stale() {
                            outcome = abandon(e)?;
                            break;
                        }
                    }
                    let arena = &self.arena;
                    let workspace = &mut self.workspace;
                    self.pool.install(|| rule.apply(arena, workspace))?;
                }
                Stage::External(coupling) => {
                    coupling.run(&mut self.workspace, time, dt)?;
                }
            }
        }

        self.workspace
            .commit(self.time, &[Some(Tensor::scalar(time + dt))])?;
        self.workspace.advance_step();
        self.steps += 1;
        debug!(step = self.steps, time = time + dt, "step finished");
        Ok(outcome)
    }

    /// Step until `t` reaches the end time
    pub fn run(&mut self) -> Result<RunReport, Error> {
        let end = self.settings.end_time;
        let mut abandoned = 0;
        let start = self.steps;
        loop {
            let dt = self.dt();
            if dt <= 0.0 || self.time() + 0.5 * dt >= end {
                break;
            }
            if let StepOutcome::Abandoned(e) = self.step()? {
                warn!(step = self.steps, "step abandoned: {}", e);
                abandoned += 1;
            }
        }
        // leave positions in the primary range for the caller
        if self.workspace.particle_system_id().is_some() {
            if let StepOutcome::Abandoned(e) = abandon_or_ok(self.workspace.update_if_stale())? {
                warn!("final positions left as computed: {}", e);
            }
        }
        let report = RunReport {
            steps: self.steps - start,
            abandoned,
            time: self.time(),
            particles: self.workspace.particle_count(),
        };
        info!(steps = report.steps, abandoned, time = report.time, "run finished");
        Ok(report)
    }

    /// Current value of a named symbol at every element
    pub fn values(&self, name: &str) -> Option<Vec<Tensor>> {
        let id = self.workspace.get_instance(name)?;
        let symbol = self.workspace.symbol(id);
        Some(
            (0..symbol.field_size())
                .filter_map(|i| symbol.value(i, 0))
                .collect(),
        )
    }
}

/// Domain failures abandon the step; anything else is fatal
fn abandon(error: WorkspaceError) -> Result<StepOutcome, Error> {
    match error {
        WorkspaceError::Domain(e) => Ok(StepOutcome::Abandoned(e)),
        other => Err(other.into()),
    }
}

fn abandon_or_ok(result: Result<(), WorkspaceError>) -> Result<StepOutcome, Error> {
    match result {
        Ok(()) => Ok(StepOutcome::Completed),
        Err(e) => abandon(e),
    }
}

fn build_pool(threads: usize) -> Result<ThreadPool, SetupError> {
    let threads = threads.max(1);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|k| format!("particula-worker-{}", k))
        .build()
        .map_err(|e| SetupError::ThreadPool {
            threads,
            message: e.to_string(),
        })
}

fn lookup(workspace: &Workspace, name: &str) -> Result<SymbolId, SetupError> {
    workspace
        .get_instance(name)
        .ok_or_else(|| WorkspaceError::UnknownSymbol(name.to_string()).into())
}

fn merge_depths(into: &mut HashMap<SymbolId, usize>, from: HashMap<SymbolId, usize>) {
    for (id, depth) in from {
        let entry = into.entry(id).or_insert(1);
        *entry = (*entry).max(depth);
    }
}

/// Initial positions as row vectors with one component per domain axis
fn place_particles(placement: &Placement, dim: usize) -> Result<Vec<Tensor>, SetupError> {
    let positions = match placement {
        Placement::At(points) => points.clone(),
        Placement::Lattice {
            origin,
            spacing,
            counts,
        } => {
            if counts.len() != dim {
                return Err(SetupError::PositionShape {
                    index: 0,
                    got: counts.len(),
                    dim,
                });
            }
            let origin = origin.to_dvec3();
            let total: usize = counts.iter().product();
            let mut out = Vec::with_capacity(total);
            for flat in 0..total {
                let mut rest = flat;
                let mut p = origin;
                for axis in (0..dim).rev() {
                    p[axis] += (rest % counts[axis]) as f64 * spacing;
                    rest /= counts[axis];
                }
                out.push(Tensor::from_dvec3(p, dim));
            }
            out
        }
    };
    for (index, p) in positions.iter().enumerate() {
        if !p.is_vector() || p.len() != dim {
            return Err(SetupError::PositionShape {
                index,
                got: p.len(),
                dim,
            });
        }
    }
    Ok(positions)
}

/// Create one declared symbol, evaluating its initial value
fn define_symbol(
    workspace: &mut Workspace,
    arena: &mut ExprArena,
    decl: &crate::ast::SymbolDecl,
) -> Result<(), Error> {
    let init_error = |source| SetupError::Init {
        name: decl.name.clone(),
        source,
    };
    let root = arena.lower(&decl.init, workspace).map_err(init_error)?;
    let globals = GlobalCache::prepare(arena, workspace, &[root]).map_err(init_error)?;
    let evaluator = Evaluator::new(arena, workspace, &globals);

    match decl.kind {
        SymbolDeclKind::Constant { hidden } => {
            let value = evaluator.evaluate(root, 0, 0).map_err(init_error)?;
            workspace
                .add_constant(&decl.name, value, hidden)
                .map_err(SetupError::from)?;
        }
        SymbolDeclKind::Variable => {
            let value = evaluator.evaluate(root, 0, 0).map_err(init_error)?;
            workspace
                .add_variable(&decl.name, value, decl.history)
                .map_err(SetupError::from)?;
        }
        SymbolDeclKind::Field { symmetric } => {
            let values = (0..workspace.particle_count())
                .map(|i| evaluator.evaluate(root, i, 0))
                .collect::<Result<Vec<_>, _>>()
                .map_err(init_error)?;
            // scalars from empty reductions take the shape of the others
            let shape = values
                .iter()
                .map(Tensor::shape)
                .find(|s| *s != (1, 1))
                .unwrap_or((1, 1));
            let values = values
                .into_iter()
                .map(|v| fit_shape(&decl.name, shape, v))
                .collect::<Result<Vec<_>, _>>()
                .map_err(init_error)?;
            let initial = values.first().copied().unwrap_or_default();
            let id = workspace
                .add_field(&decl.name, initial, decl.history)
                .map_err(SetupError::from)?;
            for (i, value) in values.into_iter().enumerate() {
                workspace.set_value(id, value, i).map_err(SetupError::from)?;
            }
            if let Some(field) = workspace.symbol_mut(id).as_field_mut() {
                field.symmetric = symmetric;
            }
        }
    }
    debug!(name = %decl.name, "symbol defined");
    Ok(())
}

/// Parse, set up and run a simulation description to completion
pub fn run_program(source: &str) -> Result<Simulation, Error> {
    let program = parse_program(source)?;
    let mut simulation = Simulation::from_program(&program)?;
    simulation.run()?;
    Ok(simulation)
}
