//! Integration tests for the relaxation engine.
//!
//! These tests verify:
//! - Layer 0 is clamped to the input after either protocol
//! - Zero weights at a zero state form a fixed point
//! - Iterative relaxation stays bounded for long runs
//! - Layered relaxation (free then nudged) leaves shapes and the free state intact

use approx::assert_abs_diff_eq;
use local_learn::{
    relax_iterative, relax_layered, NetError, Network, Nudge, Schedule, SignalSource, Sinusoid,
    State, TopLayer,
};
use ndarray::{arr1, Array1};
use proptest::prelude::*;

fn schedule(dims: &[usize]) -> Schedule {
    Schedule::new(dims.to_vec()).expect("Failed to create schedule")
}

#[test]
fn test_concrete_fixed_point() {
    let net = Network::zeros(schedule(&[4, 3, 2]));
    let input = arr1(&[1.0, 0.0, 1.0, 0.0]);
    let prev = net.init_state();

    let state = relax_iterative(&net, &input, &prev, 0.1, 1, TopLayer::Held)
        .expect("relax_iterative failed");

    assert_eq!(state.x[0], input);
    assert_eq!(state.x[1], prev.x[1]);
    assert_eq!(state.x[2], prev.x[2]);
    // Only the clamped input is unexplained
    assert_eq!(state.eps[0], input);
    assert_abs_diff_eq!(state.final_energy, 1.0, epsilon = 1e-6);
}

#[test]
fn test_clamping_both_protocols() {
    let net = Network::init(schedule(&[6, 5, 3]), false, 9);
    let source = Sinusoid::default();

    let mut state = net.init_state();
    for step in 0..10 {
        let input = source.input(step, 6);
        state = relax_iterative(&net, &input, &state, 0.05, 5, TopLayer::Held)
            .expect("relax_iterative failed");
        assert_eq!(state.x[0], input);

        let layered = relax_layered(&net, &input, &state, 0.05, None, TopLayer::Held)
            .expect("relax_layered failed");
        assert_eq!(layered.x[0], input);
    }
}

#[test]
fn test_non_explosion_zero_start() {
    let net = Network::zeros(schedule(&[16, 32, 16, 4]));
    let source = Sinusoid::default();
    let mut state = net.init_state();

    for step in 0..20 {
        state = relax_iterative(&net, &source.input(step, 16), &state, 0.05, 50, TopLayer::Held)
            .expect("relax_iterative failed");
        for layer in &state.x {
            assert!(layer.iter().all(|v| v.abs() <= 2.0));
        }
    }
}

#[test]
fn test_non_explosion_random_weights() {
    let net = Network::init(schedule(&[16, 32, 16, 4]), false, 42);
    let source = Sinusoid::default();
    let mut held = net.init_state();
    let mut relaxed = net.init_state();

    for step in 0..20 {
        let input = source.input(step, 16);
        held = relax_iterative(&net, &input, &held, 0.05, 50, TopLayer::Held)
            .expect("relax_iterative failed");
        relaxed = relax_iterative(&net, &input, &relaxed, 0.05, 50, TopLayer::Relaxed)
            .expect("relax_iterative failed");

        for layer in &held.x {
            assert!(layer.iter().all(|v| v.abs() <= 2.0));
        }
        assert!(relaxed.x.iter().all(|layer| layer.iter().all(|v| v.is_finite())));
    }

    // The held output never leaves its starting value
    assert_eq!(held.x[3], Array1::<f32>::zeros(4));
    assert_ne!(relaxed.x[3], Array1::<f32>::zeros(4));
}

#[test]
fn test_nudged_phase_from_free() {
    let net = Network::init(schedule(&[4, 6, 2]), true, 3);
    let input = arr1(&[0.2, 0.4, 0.6, 0.8]);
    let target = arr1(&[1.0, 0.0]);

    let free = relax_layered(&net, &input, &net.init_state(), 0.1, None, TopLayer::Held)
        .expect("free phase failed");
    let snapshot_of_free = free.clone();
    let nudged = relax_layered(
        &net,
        &input,
        &free,
        0.1,
        Some(Nudge {
            target: &target,
            beta: 0.5,
        }),
        TopLayer::Held,
    )
    .expect("nudged phase failed");

    assert_eq!(free, snapshot_of_free);
    assert_eq!(nudged.output().len(), 2);

    // Free output was held at zero, so the nudge moves it halfway to the target
    assert_abs_diff_eq!(nudged.output()[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(nudged.output()[1], 0.0, epsilon = 1e-6);
}

#[test]
fn test_shape_mismatch_rejected() {
    let net = Network::zeros(schedule(&[3, 2]));
    let bad_state = State::zeros(&schedule(&[3, 4]));

    assert!(relax_iterative(&net, &Array1::zeros(3), &bad_state, 0.1, 1, TopLayer::Held).is_err());
    assert!(relax_layered(&net, &Array1::zeros(2), &net.init_state(), 0.1, None, TopLayer::Held)
        .is_err());
}

#[test]
fn test_short_error_vectors_rejected() {
    let net = Network::zeros(schedule(&[3, 2]));

    let mut no_errors = net.init_state();
    no_errors.mu = vec![];
    no_errors.eps = vec![];
    assert!(matches!(
        relax_iterative(&net, &Array1::zeros(3), &no_errors, 0.1, 1, TopLayer::Held),
        Err(NetError::ShapeMismatch(_))
    ));

    let mut narrow_eps = net.init_state();
    narrow_eps.eps[1] = Array1::zeros(5);
    assert!(matches!(
        relax_layered(&net, &Array1::zeros(3), &narrow_eps, 0.1, None, TopLayer::Held),
        Err(NetError::ShapeMismatch(_))
    ));
}

fn schedules() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..12, 2..6)
}

proptest! {
    #[test]
    fn prop_relaxed_state_matches_schedule(dims in schedules(), seed in any::<u64>(), steps in 0usize..8) {
        let schedule = Schedule::new(dims.clone()).unwrap();
        let net = Network::init(schedule.clone(), false, seed);
        let input = Sinusoid::default().input(seed % 97, dims[0]);

        let iterative = relax_iterative(&net, &input, &net.init_state(), 0.05, steps, TopLayer::Held).unwrap();
        let layered = relax_layered(&net, &input, &net.init_state(), 0.05, None, TopLayer::Held).unwrap();

        for state in [&iterative, &layered] {
            prop_assert!(state.check_shape(&schedule).is_ok());
            prop_assert_eq!(&state.x[0], &input);
            prop_assert!(state.final_energy >= 0.0);
        }
        prop_assert_eq!(iterative.steps_taken, steps.max(1));
    }

    #[test]
    fn prop_bounded_inputs_stay_bounded(values in prop::collection::vec(0.0f32..=1.0, 8)) {
        let net = Network::zeros(Schedule::new(vec![8, 6, 3]).unwrap());
        let input = Array1::from(values);
        let state = relax_iterative(&net, &input, &net.init_state(), 0.05, 50, TopLayer::Held).unwrap();
        prop_assert!(state.x.iter().all(|layer| layer.iter().all(|v| v.abs() <= 2.0)));
    }
}
