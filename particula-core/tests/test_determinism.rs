//! Results must not depend on the worker count or on repeated runs

use particula_core::tests::test_helpers::{build_source, results_approx_equal, with_threads};

const BROWNIAN: &str = r#"
domain min 0;0 max 8;8 cell 1;1 boundary periodic periodic
particles x lattice 0.25;0.25 0.5 12;12
variable dt = 0.01
constant kT = 0.5
field v = 0;0
field kick = 0;0
field crowd = 0
equation kick = randn(0, kT)*(1;0) + randn(0, kT)*(0;1)
equation crowd = ncount()
equation v = 0.9*v + kick - 0.1*nsum(rij()/(rlen()^2 + 0.01))
equation x = x + v*dt
simulate end = 0.2 seed = 42
"#;

const SPRINGS: &str = r#"
domain min 0 max 20 cell 2
particles x lattice 1 1 30
variable dt = 0.01
constant k = 10
field v = rand()
field f = 0
pairs springs within 1.5
equation f = psum(springs, -k*(rlen() - pval(r0))*rij()/rlen())
equation v = v + f*dt
equation x = x + v*dt
equation v = v # gt(gsum(v), 1000)
break springs when gt(rlen(), 1.2*pval(r0))
simulate end = 0.5 seed = 3
"#;

#[test]
fn test_thread_counts_agree_with_random_forcing() {
    let reference = with_threads(BROWNIAN, 1).unwrap();
    for threads in [2, 3, 4, 8] {
        let other = with_threads(BROWNIAN, threads).unwrap();
        assert!(
            results_approx_equal(&reference, &other, 0.0),
            "{} threads diverged from the serial run",
            threads
        );
    }
}

#[test]
fn test_thread_counts_agree_with_pair_lists() {
    let reference = with_threads(SPRINGS, 1).unwrap();
    for threads in [2, 5, 7] {
        let other = with_threads(SPRINGS, threads).unwrap();
        assert!(results_approx_equal(&reference, &other, 0.0));
        assert_eq!(
            reference.get_workspace().pairs("springs").unwrap().len(),
            other.get_workspace().pairs("springs").unwrap().len()
        );
    }
}

#[test]
fn test_same_seed_same_run() {
    let a = with_threads(BROWNIAN, 4).unwrap();
    let b = with_threads(BROWNIAN, 4).unwrap();
    assert!(results_approx_equal(&a, &b, 0.0));
}

#[test]
fn test_seed_changes_the_draws() {
    let a = with_threads(BROWNIAN, 2).unwrap();
    let b = with_threads(&BROWNIAN.replace("seed = 42", "seed = 43"), 2).unwrap();
    assert!(!results_approx_equal(&a, &b, 1e-12));
}

#[test]
fn test_set_threads_between_steps() {
    let mut sim = build_source(BROWNIAN).unwrap();
    sim.set_threads(1).unwrap();
    sim.step().unwrap();
    sim.set_threads(6).unwrap();
    sim.run().unwrap();
    let reference = with_threads(BROWNIAN, 3).unwrap();
    assert!(results_approx_equal(&reference, &sim, 0.0));
}

#[test]
fn test_random_draws_are_distinct_per_particle() {
    let sim = build_source(SPRINGS).unwrap();
    let v = sim.values("v").unwrap();
    assert!(v.iter().all(|t| (0.0..1.0).contains(&t.value())));
    let mut values: Vec<f64> = v.iter().map(|t| t.value()).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values.dedup();
    assert_eq!(values.len(), 30);
}
