//! External solver coupling

use particula_core::tests::test_helpers::{approx_eq, build_source};
use particula_core::{CouplingBuffers, Error, ExternalCoupling, ExternalError, ExternalSolver, Stage, Tensor};
use std::sync::{Arc, Mutex};

const TAGGED: &str = r#"
domain min 0;0 max 10;10 cell 1;1
particles x at 1.5;1.5 2.5;1.5 3.5;1.5
variable dt = 0.5
field tag = if(gt(x(x), 2), 1, 0)
field u = 2;0
simulate end = 1
"#;

/// Moves every record by its velocity and remembers what it was given
struct Drift {
    seen: Arc<Mutex<Vec<CouplingBuffers>>>,
}

impl ExternalSolver for Drift {
    fn name(&self) -> &str {
        "drift"
    }

    fn calculation(&mut self, buffers: &mut CouplingBuffers) -> Result<(), ExternalError> {
        self.seen.lock().unwrap().push(buffers.clone());
        let dt = buffers.dt;
        for (p, v) in buffers.positions.iter_mut().zip(&buffers.velocities) {
            for axis in 0..3 {
                p[axis] += v[axis] * dt;
            }
        }
        for v in buffers.velocities.iter_mut() {
            v[1] = 1.0;
        }
        Ok(())
    }
}

struct Failing;

impl ExternalSolver for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn calculation(&mut self, _buffers: &mut CouplingBuffers) -> Result<(), ExternalError> {
        Err(ExternalError("solver diverged".to_string()))
    }
}

/// Claims a particle that does not exist
struct Rogue;

impl ExternalSolver for Rogue {
    fn name(&self) -> &str {
        "rogue"
    }

    fn calculation(&mut self, buffers: &mut CouplingBuffers) -> Result<(), ExternalError> {
        buffers.ids[0] = 99;
        Ok(())
    }
}

#[test]
fn test_only_tagged_particles_are_handed_over() {
    let sim = build_source(TAGGED).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let coupling = ExternalCoupling::new(
        sim.get_workspace(),
        "tag",
        1.0,
        "u",
        Box::new(Drift { seen: seen.clone() }),
    )
    .unwrap();
    assert_eq!(coupling.select(sim.get_workspace()), vec![1, 2]);

    let buffers = coupling.gather(sim.get_workspace(), 0.0, 0.5);
    assert_eq!(buffers.ids, vec![1, 2]);
    assert_eq!(buffers.positions[0], [2.5, 1.5, 0.0]);
    assert_eq!(buffers.velocities[1], [2.0, 0.0, 0.0]);
    assert_eq!(coupling.solver_name(), "drift");
}

#[test]
fn test_results_are_scattered_back_by_id() {
    let mut sim = build_source(TAGGED).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    sim.add_external("tag", 1.0, "u", Box::new(Drift { seen: seen.clone() }))
        .unwrap();
    assert!(matches!(sim.stages().last(), Some(Stage::External(_))));

    sim.step().unwrap();
    let x = sim.values("x").unwrap();
    let u = sim.values("u").unwrap();
    assert_eq!(x[0], Tensor::vector(&[1.5, 1.5]).unwrap());
    assert!(approx_eq(x[1].get(0, 0).unwrap(), 3.5, 1e-12));
    assert!(approx_eq(x[2].get(0, 0).unwrap(), 4.5, 1e-12));
    assert_eq!(u[0], Tensor::vector(&[2.0, 0.0]).unwrap());
    assert_eq!(u[1], Tensor::vector(&[2.0, 1.0]).unwrap());

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].time, 0.0);
    assert_eq!(calls[0].dt, 0.5);
}

#[test]
fn test_solver_failure_stops_the_run() {
    let mut sim = build_source(TAGGED).unwrap();
    sim.insert_external(0, "tag", 1.0, "u", Box::new(Failing))
        .unwrap();
    match sim.step() {
        Err(Error::External { name, message }) => {
            assert_eq!(name, "failing");
            assert_eq!(message, "solver diverged");
        }
        other => panic!("Expected an external error, got {:?}", other),
    }
}

#[test]
fn test_unknown_ids_are_rejected() {
    let mut sim = build_source(TAGGED).unwrap();
    sim.add_external("tag", 1.0, "u", Box::new(Rogue)).unwrap();
    assert!(matches!(sim.step(), Err(Error::Workspace(_))));
}

#[test]
fn test_coupling_needs_per_particle_fields() {
    let sim = build_source(TAGGED).unwrap();
    assert!(ExternalCoupling::new(sim.get_workspace(), "dt", 1.0, "u", Box::new(Failing)).is_err());
    assert!(ExternalCoupling::new(sim.get_workspace(), "tag", 1.0, "nope", Box::new(Failing)).is_err());
}

#[test]
fn test_no_tagged_particles_means_no_call() {
    let mut sim = build_source(TAGGED).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    sim.add_external("tag", 5.0, "u", Box::new(Drift { seen: seen.clone() }))
        .unwrap();
    sim.step().unwrap();
    assert!(seen.lock().unwrap().is_empty());
}
