//! Relaxation engine: settles layer activations under a fixed set of weights.
//!
//! Two protocols share one state model:
//!
//! - [`relax_iterative`]: predictive-coding relaxation. Each layer predicts
//!   the one below it; hidden layers move to reduce their own error while
//!   accounting for the error they induce below.
//! - [`relax_layered`]: a single forward walk where each layer moves toward
//!   the bottom-up projection of the layer beneath it, with an optional pull
//!   of the output layer toward a target (the EP "nudge").
//!
//! Both return a new [`State`]; the previous state and the weights are only read.

use ndarray::Array1;

use crate::core::{compute_energy, NetError, NetResult, Network, Schedule, State};
use crate::utils::{project, project_down, subtract};

/// Whether the deepest layer takes part in relaxation.
///
/// Nothing predicts the deepest layer, so when it is relaxed only the error it
/// causes in the layer below drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopLayer {
    /// Left as it was; only changed externally (e.g. by a nudge)
    #[default]
    Held,
    /// Updated like a hidden layer, with no error of its own
    Relaxed,
}

impl TopLayer {
    pub fn from_flag(relax_top: bool) -> Self {
        if relax_top {
            TopLayer::Relaxed
        } else {
            TopLayer::Held
        }
    }
}

/// Pull of the output layer toward a supervisory target.
#[derive(Debug, Clone, Copy)]
pub struct Nudge<'a> {
    pub target: &'a Array1<f32>,
    pub beta: f32,
}

fn check_input(schedule: &Schedule, input: &Array1<f32>) -> NetResult<()> {
    if input.len() == schedule.input_size() {
        Ok(())
    } else {
        Err(NetError::ShapeMismatch(format!(
            "input has {} units, layer 0 has {}",
            input.len(),
            schedule.input_size()
        )))
    }
}

/// Top-down predictions and errors for every layer.
///
/// For l ∈ [0..L): `mu[l] = tanh(W[l]ᵗ x[l+1])`, `eps[l] = x[l] - mu[l]`.
/// The deepest layer has no predictor; its entries are zero.
fn top_down_errors(net: &Network, x: &[Array1<f32>], mu: &mut [Array1<f32>], eps: &mut [Array1<f32>]) {
    let l_max = x.len() - 1;
    for (l, w) in net.weights().iter().enumerate() {
        let pred = project_down(&x[l + 1], w);
        eps[l] = &x[l] - &pred;
        mu[l] = pred;
    }
    mu[l_max].fill(0.0);
    eps[l_max].fill(0.0);
}

/// Predictive-coding relaxation for `steps` iterations (at least one).
///
/// # Algorithm
///
/// Each iteration:
/// ```text
/// x[0] = input
/// eps[l] = x[l] - tanh(W[l]ᵗ x[l+1])          for every transition l
/// x[l] += eta * (W[l-1] eps[l-1] - eps[l])     for hidden layers 1..L-1
/// ```
///
/// With [`TopLayer::Relaxed`] the deepest layer also takes
/// `x[L] += eta * W[L-1] eps[L-1]`. Errors are recomputed once more at the
/// end so the returned `eps` describes the returned activations.
///
/// # Errors
/// - `ShapeMismatch` if `input` or `prev` disagree with the schedule
pub fn relax_iterative(
    net: &Network,
    input: &Array1<f32>,
    prev: &State,
    eta: f32,
    steps: usize,
    top: TopLayer,
) -> NetResult<State> {
    check_input(net.schedule(), input)?;
    prev.check_shape(net.schedule())?;
    Ok(iterate(net, input, prev, eta, steps, top))
}

/// [`relax_iterative`] without shape checks; shapes must already agree.
pub(crate) fn iterate(
    net: &Network,
    input: &Array1<f32>,
    prev: &State,
    eta: f32,
    steps: usize,
    top: TopLayer,
) -> State {
    let w = net.weights();
    let l_max = net.schedule().output_index();
    let steps = steps.max(1);

    let mut x = prev.x.clone();
    // Predictions and errors are rebuilt every iteration; only x carries over.
    let mut mu: Vec<Array1<f32>> = x.iter().map(|v| Array1::zeros(v.len())).collect();
    let mut eps = mu.clone();

    for _ in 0..steps {
        x[0] = input.clone();
        top_down_errors(net, &x, &mut mu, &mut eps);

        // Errors are fixed for the whole sweep; every layer reads the same snapshot.
        for l in 1..l_max {
            let bottom_up = w[l - 1].dot(&eps[l - 1]);
            let delta = &bottom_up - &eps[l];
            x[l] = &x[l] + &(eta * &delta);
        }

        if top == TopLayer::Relaxed {
            let bottom_up = w[l_max - 1].dot(&eps[l_max - 1]);
            x[l_max] = &x[l_max] + &(eta * &bottom_up);
        }
    }

    top_down_errors(net, &x, &mut mu, &mut eps);
    let final_energy = compute_energy(&eps);

    State {
        x,
        mu,
        eps,
        steps_taken: steps,
        final_energy,
    }
}

/// Single-pass layered relaxation, optionally nudged toward a target.
///
/// # Algorithm
///
/// ```text
/// x[0] = input
/// for l in 0..L-1:                         (every transition but the last)
///     pred = tanh(W[l] x[l])
///     x[l+1] -= eta * (x[l+1] - pred)
/// if nudge:
///     x[L] += beta * (target - x[L])
/// ```
///
/// Layers are walked bottom-up, so each update sees the already-moved layer
/// beneath it. The output layer is only moved by the nudge unless `top` is
/// [`TopLayer::Relaxed`], in which case it first relaxes like a hidden layer.
/// Target entries missing past the output width count as zero.
///
/// Called without a nudge this yields the free phase; called again from the
/// free result with a nudge it yields the nudged phase.
///
/// # Errors
/// - `ShapeMismatch` if `input` or `prev` disagree with the schedule
pub fn relax_layered(
    net: &Network,
    input: &Array1<f32>,
    prev: &State,
    eta: f32,
    nudge: Option<Nudge<'_>>,
    top: TopLayer,
) -> NetResult<State> {
    check_input(net.schedule(), input)?;
    prev.check_shape(net.schedule())?;
    Ok(walk(net, input, prev, eta, nudge, top))
}

/// [`relax_layered`] without shape checks; shapes must already agree.
pub(crate) fn walk(
    net: &Network,
    input: &Array1<f32>,
    prev: &State,
    eta: f32,
    nudge: Option<Nudge<'_>>,
    top: TopLayer,
) -> State {
    let schedule = net.schedule();
    let l_max = schedule.output_index();
    let mut x = prev.x.clone();
    let mut mu: Vec<Array1<f32>> = schedule.dims().iter().map(|&d| Array1::zeros(d)).collect();
    let mut eps = mu.clone();

    x[0] = input.clone();

    for (l, w) in net.weights().iter().enumerate() {
        let pred = project(&x[l], w);
        let error = &x[l + 1] - &pred;

        if l + 1 < l_max || top == TopLayer::Relaxed {
            x[l + 1] = &x[l + 1] - &(eta * &error);
        }

        mu[l + 1] = pred;
        eps[l + 1] = error;
    }

    if let Some(Nudge { target, beta }) = nudge {
        // x - target, so the result keeps the output width
        let gap = subtract(&x[l_max], target);
        x[l_max] = &x[l_max] - &(beta * &gap);
    }

    let final_energy = compute_energy(&eps);

    State {
        x,
        mu,
        eps,
        steps_taken: 1,
        final_energy,
    }
}
