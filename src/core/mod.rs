//! Network structures: layer schedule, weight and feedback tensors, activation state.
//!
//! ## Shape convention
//!
//! ```text
//! W[l]: (d_{l+1}, d_l)       forward weights, transition l -> l+1
//! B[l]: (d_{l+1}, d_L)       fixed feedback, output error -> layer l+1
//! x[l]: (d_l)                activation of layer l
//! ```
//!
//! Layer 0 is sensory and always clamped to the input. Layer `L` is the
//! deepest (output) layer.

use ndarray::{Array1, Array2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Half-width of the uniform interval used for every initial weight.
pub const INIT_RANGE: f32 = 0.05;

/// Error type for network construction and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Tensor or vector dimensions disagree with the layer schedule
    ShapeMismatch(String),
    /// Invalid schedule or configuration value
    InvalidConfig(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            NetError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl Error for NetError {}

pub type NetResult<T> = Result<T, NetError>;

/// Ordered unit counts, sensory layer first.
///
/// Always has at least two layers, each with at least one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule(Vec<usize>);

impl Schedule {
    /// Validate and wrap a list of layer sizes.
    ///
    /// # Errors
    /// - `InvalidConfig` if there are fewer than 2 layers or any layer is empty
    pub fn new(dims: Vec<usize>) -> NetResult<Self> {
        if dims.len() < 2 {
            return Err(NetError::InvalidConfig(
                "Must have at least 2 layers (input and output)".to_string(),
            ));
        }
        if let Some(l) = dims.iter().position(|&d| d == 0) {
            return Err(NetError::InvalidConfig(format!("Layer {} has zero units", l)));
        }
        Ok(Self(dims))
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of layers, including the sensory layer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a schedule has at least two layers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of layer transitions (`len() - 1`).
    pub fn transitions(&self) -> usize {
        self.0.len() - 1
    }

    /// Index of the deepest layer.
    pub fn output_index(&self) -> usize {
        self.0.len() - 1
    }

    pub fn input_size(&self) -> usize {
        self.0[0]
    }

    pub fn output_size(&self) -> usize {
        self.0[self.0.len() - 1]
    }
}

impl FromStr for Schedule {
    type Err = NetError;

    /// Parse a comma-separated list such as `16,32,16,4`.
    fn from_str(s: &str) -> NetResult<Self> {
        let dims = s
            .split(',')
            .map(|part| {
                part.trim().parse::<usize>().map_err(|e| {
                    NetError::InvalidConfig(format!("Bad layer size '{}': {}", part.trim(), e))
                })
            })
            .collect::<NetResult<Vec<_>>>()?;
        Self::new(dims)
    }
}

/// Create forward weights for a schedule.
///
/// `W[l]` has shape `(d_{l+1}, d_l)` with entries i.i.d. in `[-0.05, 0.05]`.
pub fn create_weights<R: Rng + ?Sized>(schedule: &Schedule, rng: &mut R) -> Vec<Array2<f32>> {
    let dist = Uniform::new_inclusive(-INIT_RANGE, INIT_RANGE);
    schedule
        .dims()
        .windows(2)
        .map(|pair| Array2::random_using((pair[1], pair[0]), dist, &mut *rng))
        .collect()
}

/// Create fixed random feedback matrices for a schedule.
///
/// `B[l]` has shape `(d_{l+1}, d_L)`: every matrix reads the output-layer error
/// directly, so the error reaches each layer without following the forward path.
pub fn create_feedback<R: Rng + ?Sized>(schedule: &Schedule, rng: &mut R) -> Vec<Array2<f32>> {
    let dist = Uniform::new_inclusive(-INIT_RANGE, INIT_RANGE);
    let d_out = schedule.output_size();
    schedule.dims()[1..]
        .iter()
        .map(|&rows| Array2::random_using((rows, d_out), dist, &mut *rng))
        .collect()
}

/// Layered network tensors.
///
/// Weights are replaced wholesale by the learning rules. Feedback matrices
/// sit behind an `Arc` and are never written after construction; successive
/// networks share the same allocation.
#[derive(Clone)]
pub struct Network {
    schedule: Schedule,
    /// Forward weights: w[l] has shape (d_{l+1}, d_l)
    weights: Vec<Array2<f32>>,
    /// Fixed feedback: b[l] has shape (d_{l+1}, d_L)
    feedback: Option<Arc<[Array2<f32>]>>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("schedule", &self.schedule.dims())
            .field("weights", &format!("<{} weight matrices>", self.weights.len()))
            .field(
                "feedback",
                &self
                    .feedback
                    .as_ref()
                    .map(|b| format!("<{} feedback matrices>", b.len())),
            )
            .finish()
    }
}

impl Network {
    /// Create a freshly initialized network from a seed.
    ///
    /// Weights are drawn first and feedback (when requested) second from one
    /// `StdRng`, so the same `(schedule, with_feedback, seed)` always yields
    /// identical tensors.
    pub fn init(schedule: Schedule, with_feedback: bool, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = create_weights(&schedule, &mut rng);
        let feedback = with_feedback.then(|| Arc::from(create_feedback(&schedule, &mut rng)));
        Self {
            schedule,
            weights,
            feedback,
        }
    }

    /// Assemble a network from externally built tensors.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the number of matrices is not `len(schedule) - 1`
    ///   or any matrix has the wrong dimensions
    pub fn from_parts(
        schedule: Schedule,
        weights: Vec<Array2<f32>>,
        feedback: Option<Vec<Array2<f32>>>,
    ) -> NetResult<Self> {
        let dims = schedule.dims();
        check_count("weight", weights.len(), schedule.transitions())?;
        for (l, w) in weights.iter().enumerate() {
            check_dim("weight", l, w.dim(), (dims[l + 1], dims[l]))?;
        }
        if let Some(b) = &feedback {
            check_count("feedback", b.len(), schedule.transitions())?;
            for (l, m) in b.iter().enumerate() {
                check_dim("feedback", l, m.dim(), (dims[l + 1], schedule.output_size()))?;
            }
        }
        Ok(Self {
            schedule,
            weights,
            feedback: feedback.map(Arc::from),
        })
    }

    /// All-zero weights, no feedback.
    pub fn zeros(schedule: Schedule) -> Self {
        let weights = schedule
            .dims()
            .windows(2)
            .map(|pair| Array2::zeros((pair[1], pair[0])))
            .collect();
        Self {
            schedule,
            weights,
            feedback: None,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn weights(&self) -> &[Array2<f32>] {
        &self.weights
    }

    pub fn feedback(&self) -> Option<&[Array2<f32>]> {
        self.feedback.as_deref()
    }

    /// Shared handle to the feedback matrices, for identity checks.
    pub fn feedback_handle(&self) -> Option<&Arc<[Array2<f32>]>> {
        self.feedback.as_ref()
    }

    /// Same schedule and feedback, new weights.
    ///
    /// Callers pass tensors derived from `self.weights()` by a learning rule,
    /// which preserves every shape.
    pub(crate) fn successor(&self, weights: Vec<Array2<f32>>) -> Self {
        debug_assert_eq!(weights.len(), self.weights.len());
        Self {
            schedule: self.schedule.clone(),
            weights,
            feedback: self.feedback.clone(),
        }
    }

    /// All-zero activation state for this network's schedule.
    pub fn init_state(&self) -> State {
        State::zeros(&self.schedule)
    }
}

fn check_count(what: &str, got: usize, expected: usize) -> NetResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(NetError::ShapeMismatch(format!(
            "expected {} {} matrices, got {}",
            expected, what, got
        )))
    }
}

fn check_dim(what: &str, l: usize, got: (usize, usize), expected: (usize, usize)) -> NetResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(NetError::ShapeMismatch(format!(
            "{} matrix {} has shape {:?}, expected {:?}",
            what, l, got, expected
        )))
    }
}

/// Activation state of every layer for one phase.
///
/// Produced whole by the relaxation engine; never edited afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// x[l]: activations at layer l
    pub x: Vec<Array1<f32>>,
    /// mu[l]: prediction of layer l made during the relaxation that produced this state
    pub mu: Vec<Array1<f32>>,
    /// eps[l]: prediction error at layer l (x[l] - mu[l])
    pub eps: Vec<Array1<f32>>,
    /// Number of inference iterations run to produce this state
    pub steps_taken: usize,
    /// Residual prediction energy: 0.5 * Σ ||eps[l]||²
    pub final_energy: f32,
}

impl State {
    /// All-zero state for a schedule.
    pub fn zeros(schedule: &Schedule) -> Self {
        let zeros = || -> Vec<Array1<f32>> {
            schedule.dims().iter().map(|&d| Array1::zeros(d)).collect()
        };
        Self {
            x: zeros(),
            mu: zeros(),
            eps: zeros(),
            steps_taken: 0,
            final_energy: 0.0,
        }
    }

    /// Activations of the deepest layer.
    pub fn output(&self) -> &Array1<f32> {
        &self.x[self.x.len() - 1]
    }

    /// Verify every layer vector (activations, predictions, errors) matches
    /// the schedule.
    ///
    /// # Errors
    /// - `ShapeMismatch` on a layer-count or width mismatch
    pub fn check_shape(&self, schedule: &Schedule) -> NetResult<()> {
        for (name, layers) in [("x", &self.x), ("mu", &self.mu), ("eps", &self.eps)] {
            if layers.len() != schedule.len() {
                return Err(NetError::ShapeMismatch(format!(
                    "state.{} has {} layers, schedule has {}",
                    name,
                    layers.len(),
                    schedule.len()
                )));
            }
            for (l, (v, &d)) in layers.iter().zip(schedule.dims()).enumerate() {
                if v.len() != d {
                    return Err(NetError::ShapeMismatch(format!(
                        "state.{}[{}] has {} units, expected {}",
                        name,
                        l,
                        v.len(),
                        d
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Total prediction error energy: `E = (1/2) * Σ_ℓ ||ε^ℓ||²`.
pub fn compute_energy(eps: &[Array1<f32>]) -> f32 {
    0.5 * eps.iter().map(|e| e.dot(e)).sum::<f32>()
}
