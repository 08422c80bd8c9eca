//! Step driver: one call advances the simulation by one discrete step.
//!
//! ## Step
//!
//! ```text
//! input, target  <- signal source at prev.step
//! relax          free | free + nudged | free + nudged + negative
//! learn          Hebbian | FA | FA then FF
//! energy         Σ (x_nudged[L] - x_free[L])²   (Σ ||eps||² for PC)
//! ```
//!
//! [`step`] reads the previous [`Snapshot`] and returns the next one. The
//! previous snapshot is left intact and the feedback matrices are shared
//! between them. [`Simulation`] wraps the same functions for callers that want
//! an owned, mutable handle.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{NetError, NetResult, Network, Schedule, State};
use crate::data::{corrupt, corruption_rng, SignalSource, Sinusoid};
use crate::relax::{iterate, walk, Nudge, TopLayer};
use crate::rules::{
    apply_rules, goodness_pairs, output_discrepancy, FeedbackAlignmentRule, ForwardForwardRule,
    Goodness, HebbianRule, LearningRule, Phases, RuleContext,
};
use crate::utils::{mean_abs, sum_squares};
use crate::Params;

/// Number of most recent energies kept in a snapshot.
pub const HISTORY_LEN: usize = 100;

/// Learning-rule variant: which relaxations run and which rules consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Iterative PC relaxation + Hebbian update
    #[serde(rename = "pc")]
    PredictiveCoding,
    /// Free and nudged layered relaxation + feedback alignment
    #[serde(rename = "ep-fa")]
    EquilibriumFa,
    /// Free, nudged and negative relaxation + feedback alignment, then Forward-Forward
    #[serde(rename = "ep-fa-ff")]
    EquilibriumFaFf,
}

const TWO_PHASE: [Phase; 2] = [Phase::Free, Phase::Nudged];
const THREE_PHASE: [Phase; 3] = [Phase::Inference, Phase::Nudging, Phase::Contrast];

impl Variant {
    pub const ALL: [Variant; 3] = [
        Variant::PredictiveCoding,
        Variant::EquilibriumFa,
        Variant::EquilibriumFaFf,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variant::PredictiveCoding => "pc",
            Variant::EquilibriumFa => "ep-fa",
            Variant::EquilibriumFaFf => "ep-fa-ff",
        }
    }

    /// Whether the variant trains through fixed feedback matrices.
    pub fn needs_feedback(self) -> bool {
        !matches!(self, Variant::PredictiveCoding)
    }

    /// Rules applied each step, in order.
    pub fn rules(self) -> Vec<Box<dyn LearningRule>> {
        match self {
            Variant::PredictiveCoding => vec![Box::new(HebbianRule)],
            Variant::EquilibriumFa => vec![Box::new(FeedbackAlignmentRule)],
            Variant::EquilibriumFaFf => {
                vec![Box::new(FeedbackAlignmentRule), Box::new(ForwardForwardRule)]
            }
        }
    }

    /// Phase markers the variant rotates through.
    pub fn phase_cycle(self) -> &'static [Phase] {
        match self {
            Variant::PredictiveCoding | Variant::EquilibriumFa => &TWO_PHASE,
            Variant::EquilibriumFaFf => &THREE_PHASE,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = NetError;

    fn from_str(s: &str) -> NetResult<Self> {
        Variant::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| {
                NetError::InvalidConfig(format!(
                    "Unknown variant '{}' (expected pc, ep-fa or ep-fa-ff)",
                    s
                ))
            })
    }
}

/// Which activation state is on display.
///
/// Purely observational: every phase runs on every step regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Free,
    Nudged,
    Inference,
    Nudging,
    Contrast,
}

impl Phase {
    /// Marker for the step with counter `step`: period 2 or 3 by variant.
    pub fn for_step(variant: Variant, step: u64) -> Self {
        let cycle = variant.phase_cycle();
        #[allow(clippy::cast_possible_truncation)]
        let idx = (step % cycle.len() as u64) as usize;
        cycle[idx]
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Free => "free",
            Phase::Nudged => "nudged",
            Phase::Inference => "inference",
            Phase::Nudging => "nudging",
            Phase::Contrast => "contrast",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complete simulation state after a step.
///
/// A plain value: cloning it gives an independent copy (the feedback
/// matrices, which are never written, stay shared).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub variant: Variant,
    /// Seed used for initialization and negative-sample corruption
    pub seed: u64,
    pub network: Network,
    /// Free phase; also the positive phase for Forward-Forward
    pub free: State,
    /// Nudged phase; a copy of `free` for variants without one
    pub nudged: State,
    /// Negative phase; a copy of `free` for variants without one
    pub negative: State,
    pub input: Array1<f32>,
    /// Corrupted input of the negative phase; equals `input` without one
    pub negative_input: Array1<f32>,
    pub target: Array1<f32>,
    pub goodness: Goodness,
    pub phase: Phase,
    pub energy: f32,
    /// Most recent energies, oldest first, at most [`HISTORY_LEN`]
    pub history: VecDeque<f32>,
    /// Number of steps taken since initialization
    pub step: u64,
}

/// Mean absolute activity of one layer in the free and nudged phases.
///
/// `nudged` and `shift` are `None` for variants without a nudged phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerActivity {
    pub layer: usize,
    pub units: usize,
    pub free: f32,
    pub nudged: Option<f32>,
    /// |nudged - free|
    pub shift: Option<f32>,
}

/// Serializable per-step summary for a presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: u64,
    pub variant: Variant,
    pub phase: Phase,
    pub energy: f32,
    /// Residual prediction energy of the free phase
    pub free_energy: f32,
    pub goodness: Goodness,
    pub target: Vec<f32>,
    /// Output layer of the state selected by `phase`
    pub output: Vec<f32>,
    pub layers: Vec<LayerActivity>,
}

impl Snapshot {
    pub fn schedule(&self) -> &Schedule {
        self.network.schedule()
    }

    /// The state selected by the phase marker.
    ///
    /// Falls back to the free phase when the variant never runs the marked one.
    pub fn active_state(&self) -> &State {
        match self.phase {
            Phase::Nudged | Phase::Nudging if self.variant.needs_feedback() => &self.nudged,
            Phase::Contrast if self.variant == Variant::EquilibriumFaFf => &self.negative,
            _ => &self.free,
        }
    }

    pub fn report(&self) -> StepReport {
        let nudges = self.variant.needs_feedback();
        let layers = self
            .free
            .x
            .iter()
            .zip(&self.nudged.x)
            .enumerate()
            .map(|(layer, (free, nudged))| {
                let free = mean_abs(free);
                let nudged = nudges.then(|| mean_abs(nudged));
                LayerActivity {
                    layer,
                    units: self.schedule().dims()[layer],
                    free,
                    nudged,
                    shift: nudged.map(|n| (n - free).abs()),
                }
            })
            .collect();

        StepReport {
            step: self.step,
            variant: self.variant,
            phase: self.phase,
            energy: self.energy,
            free_energy: self.free.final_energy,
            goodness: self.goodness.clone(),
            target: self.target.to_vec(),
            output: self.active_state().output().to_vec(),
            layers,
        }
    }
}

/// Fresh simulation: seeded weights (and feedback if the variant needs it),
/// zero states, empty history, step 0.
pub fn initialize(schedule: Schedule, variant: Variant, seed: u64) -> Snapshot {
    info!(
        layers = ?schedule.dims(),
        variant = %variant,
        seed,
        "initializing network"
    );
    let network = Network::init(schedule, variant.needs_feedback(), seed);
    fresh(network, variant, seed)
}

/// Fresh simulation around externally built tensors.
///
/// `seed` only drives negative-sample corruption here, and later [`reset`]s.
///
/// # Errors
/// - `InvalidConfig` if the variant needs feedback matrices and `network` has none
pub fn initialize_with(network: Network, variant: Variant, seed: u64) -> NetResult<Snapshot> {
    if variant.needs_feedback() && network.feedback().is_none() {
        return Err(NetError::InvalidConfig(format!(
            "variant {} requires feedback matrices",
            variant
        )));
    }
    Ok(fresh(network, variant, seed))
}

fn fresh(network: Network, variant: Variant, seed: u64) -> Snapshot {
    let schedule = network.schedule();
    let zeros = State::zeros(schedule);
    Snapshot {
        variant,
        seed,
        input: Array1::zeros(schedule.input_size()),
        negative_input: Array1::zeros(schedule.input_size()),
        target: Array1::zeros(schedule.output_size()),
        goodness: Goodness::zeros(schedule.transitions()),
        phase: Phase::for_step(variant, 0),
        energy: 0.0,
        history: VecDeque::with_capacity(HISTORY_LEN),
        step: 0,
        free: zeros.clone(),
        nudged: zeros.clone(),
        negative: zeros,
        network,
    }
}

/// Re-initialize from the snapshot's schedule, variant and seed.
///
/// Weights and feedback are redrawn from the seed, so they match what
/// [`initialize`] produced for the same arguments.
pub fn reset(prev: &Snapshot) -> Snapshot {
    initialize(prev.schedule().clone(), prev.variant, prev.seed)
}

/// Advance one step using the default sinusoidal signal source.
pub fn step(prev: &Snapshot, params: &Params) -> Snapshot {
    step_with(prev, params, &Sinusoid::default())
}

/// Advance one step using `source` for input and target.
///
/// Source vectors of the wrong width are truncated or zero-padded to the
/// schedule.
pub fn step_with(prev: &Snapshot, params: &Params, source: &dyn SignalSource) -> Snapshot {
    let net = &prev.network;
    let schedule = net.schedule();
    let eta = params.eta_infer;
    let top = TopLayer::from_flag(params.relax_top);

    let input = fit(source.input(prev.step, schedule.input_size()), schedule.input_size());
    let target = fit(
        source.target(prev.step, schedule.output_size()),
        schedule.output_size(),
    );

    let (free, nudged) = match prev.variant {
        Variant::PredictiveCoding => {
            let free = iterate(net, &input, &prev.free, eta, params.t_steps, top);
            (free, None)
        }
        Variant::EquilibriumFa | Variant::EquilibriumFaFf => {
            let free = walk(net, &input, &prev.free, eta, None, top);
            let nudge = Nudge {
                target: &target,
                beta: params.beta_ep,
            };
            let nudged = walk(net, &input, &free, eta, Some(nudge), top);
            (free, Some(nudged))
        }
    };

    let negative = (prev.variant == Variant::EquilibriumFaFf).then(|| {
        let mut rng = corruption_rng(prev.seed, prev.step);
        let negative_input = corrupt(&input, &mut rng);
        let negative = walk(net, &negative_input, &prev.negative, eta, None, top);
        (negative_input, negative)
    });

    let ctx = RuleContext {
        phases: Phases {
            free: &free,
            nudged: nudged.as_ref(),
            negative: negative.as_ref().map(|(_, state)| state),
        },
        feedback: net.feedback(),
        params,
    };
    let weights = apply_rules(&prev.variant.rules(), net.weights(), &ctx);

    let goodness = match &negative {
        Some((_, neg)) => goodness_pairs(net.weights(), &free, neg),
        None => Goodness::zeros(schedule.transitions()),
    };

    let energy = match &nudged {
        Some(nudged) => sum_squares(&output_discrepancy(&free, nudged)),
        None => free.eps.iter().map(sum_squares).sum::<f32>(),
    };
    if !energy.is_finite() {
        warn!(step = prev.step, energy, "energy is not finite; the simulation has diverged");
    }

    let mut history = prev.history.clone();
    history.push_back(energy);
    while history.len() > HISTORY_LEN {
        history.pop_front();
    }

    let phase = Phase::for_step(prev.variant, prev.step);
    debug!(
        step = prev.step + 1,
        variant = %prev.variant,
        phase = %phase,
        energy,
        free_energy = free.final_energy,
        "step complete"
    );

    // Phases the variant never runs mirror the free phase, so every emitted
    // state is clamped to this step's input.
    let (negative_input, negative) =
        negative.unwrap_or_else(|| (input.clone(), free.clone()));
    let nudged = nudged.unwrap_or_else(|| free.clone());

    Snapshot {
        variant: prev.variant,
        seed: prev.seed,
        network: net.successor(weights),
        nudged,
        free,
        negative,
        input,
        negative_input,
        target,
        goodness,
        phase,
        energy,
        history,
        step: prev.step + 1,
    }
}

fn fit(v: Array1<f32>, width: usize) -> Array1<f32> {
    if v.len() == width {
        return v;
    }
    warn!(got = v.len(), expected = width, "signal width mismatch; padding or truncating");
    Array1::from_shape_fn(width, |i| v.get(i).copied().unwrap_or(0.0))
}

/// Owned simulation handle.
///
/// Holds the current snapshot, the knobs and the signal source. Stepping takes
/// `&mut self`, so steps on one handle are always serialized.
pub struct Simulation {
    snapshot: Snapshot,
    params: Params,
    source: Box<dyn SignalSource>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("snapshot", &self.snapshot)
            .field("params", &self.params)
            .field("source", &"<signal source>")
            .finish()
    }
}

impl Simulation {
    pub fn new(schedule: Schedule, variant: Variant, seed: u64, params: Params) -> Self {
        Self::from_snapshot(initialize(schedule, variant, seed), params)
    }

    pub fn from_snapshot(snapshot: Snapshot, params: Params) -> Self {
        Self {
            snapshot,
            params,
            source: Box::new(Sinusoid::default()),
        }
    }

    /// Replace the default sinusoidal source.
    pub fn with_source<S: SignalSource + 'static>(mut self, source: S) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Advance one step and return the new snapshot.
    pub fn advance(&mut self) -> &Snapshot {
        self.snapshot = step_with(&self.snapshot, &self.params, self.source.as_ref());
        &self.snapshot
    }

    /// Advance `steps` steps.
    pub fn run(&mut self, steps: usize) -> &Snapshot {
        for _ in 0..steps {
            self.advance();
        }
        &self.snapshot
    }

    /// Re-initialize weights, states, history and step counter.
    pub fn reset(&mut self) -> &Snapshot {
        info!(step = self.snapshot.step, "resetting simulation");
        self.snapshot = reset(&self.snapshot);
        &self.snapshot
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }
}
