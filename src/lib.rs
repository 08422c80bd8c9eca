//! # local-learn
//!
//! A small simulation engine for local (non-backpropagation) learning rules on
//! layered networks: predictive coding, equilibrium propagation with feedback
//! alignment, and Forward-Forward contrastive learning.
//!
//! ## Overview
//!
//! The engine advances one discrete step at a time. Each step relaxes layer
//! activations toward equilibrium under a fixed set of weights (once, twice or
//! three times depending on the variant), applies one or more local weight
//! updates to the relaxed states, and returns a new immutable [`Snapshot`].
//! Nothing is mutated in place; the previous snapshot stays valid.
//!
//! ## Structure
//!
//! - [`core`]: Layer schedule, weight/feedback tensors, activation state, errors
//! - [`utils`]: Projection, goodness and other tensor helpers
//! - [`relax`]: Iterative and layered relaxation protocols
//! - [`rules`]: Hebbian, feedback-alignment and Forward-Forward updates
//! - [`data`]: Deterministic input/target source and negative-sample corruption
//! - [`sim`]: Step driver, snapshots, phase marker and metrics history
//!
//! ## Example
//!
//! ```
//! use local_learn::{Params, Schedule, Simulation, Variant};
//!
//! let schedule = Schedule::new(vec![16, 32, 16, 4]).unwrap();
//! let mut sim = Simulation::new(schedule, Variant::EquilibriumFaFf, 7, Params::default());
//! for _ in 0..10 {
//!     sim.advance();
//! }
//! assert_eq!(sim.snapshot().step, 10);
//! assert!(sim.snapshot().energy >= 0.0);
//! ```

pub mod core;
pub mod data;
pub mod relax;
pub mod rules;
pub mod sim;
pub mod utils;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub use crate::core::{NetError, NetResult, Network, Schedule, State};
pub use data::{SignalSource, Sinusoid};
pub use relax::{relax_iterative, relax_layered, Nudge, TopLayer};
pub use rules::{
    FeedbackAlignmentRule, ForwardForwardRule, Goodness, HebbianRule, LearningRule, RuleContext,
};
pub use sim::{
    initialize, initialize_with, reset, step, step_with, Phase, Simulation, Snapshot, StepReport,
    Variant, HISTORY_LEN,
};

/// Per-step simulation knobs.
///
/// Deserializes from a camelCase JSON object (`etaInfer`, `alphaLearn`,
/// `betaEp`, `thetaFF`, `tSteps`, `relaxTop`). Omitted keys take their
/// defaults and unknown keys are ignored. Values are never range-checked:
/// extreme settings destabilize the simulation instead of failing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Params {
    /// Relaxation rate (typically 0.001-0.2)
    pub eta_infer: f32,
    /// Weight learning rate (typically 0.0001-0.05)
    pub alpha_learn: f32,
    /// Nudging strength toward the target (typically 0.001-0.5)
    pub beta_ep: f32,
    /// Forward-Forward goodness threshold (typically 0.5-10)
    #[serde(rename = "thetaFF")]
    pub theta_ff: f32,
    /// Iterations of predictive-coding relaxation per step (at least 1 is run).
    /// Any JSON number is accepted and rounded; negatives count as 0.
    #[serde(deserialize_with = "iteration_count")]
    pub t_steps: usize,
    /// Let the deepest layer relax instead of holding it
    pub relax_top: bool,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn iteration_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let n = f64::deserialize(deserializer)?;
    if !n.is_finite() {
        return Err(D::Error::custom("tSteps must be a finite number"));
    }
    Ok(n.round().max(0.0) as usize)
}

impl Default for Params {
    fn default() -> Self {
        Self {
            eta_infer: 0.05,
            alpha_learn: 0.001,
            beta_ep: 0.01,
            theta_ff: 2.0,
            t_steps: 20,
            relax_top: false,
        }
    }
}

impl Params {
    /// Parse a JSON object of knobs, falling back to defaults for missing keys.
    ///
    /// # Errors
    /// - `InvalidConfig` if the text is not a JSON object with numeric knobs
    pub fn from_json(text: &str) -> NetResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| NetError::InvalidConfig(format!("Failed to parse params: {e}")))
    }
}
