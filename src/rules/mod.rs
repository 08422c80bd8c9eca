//! Local learning rules.
//!
//! Each rule reads relaxed phase states and returns a brand-new weight tensor
//! list. Rules compose by sequential replacement: the output of one is the
//! input of the next.
//!
//! | Rule | Signal | Update for `W[l]` |
//! |------|--------|-------------------|
//! | [`HebbianRule`] | local top-down error `eps[l]` | `α x[l+1] ⊗ eps[l]` |
//! | [`FeedbackAlignmentRule`] | output discrepancy through fixed `B[l]` | `α δ ⊗ x_free[l]` |
//! | [`ForwardForwardRule`] | goodness contrast (one scalar per layer) | `α c (y⁺ ⊗ x⁺ − y⁻ ⊗ x⁻)` |

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::State;
use crate::utils::{d_saturate, goodness, outer, project, sigmoid, subtract};
use crate::Params;

/// Relaxed states available to a learning rule.
///
/// `free` is always present (it doubles as the positive phase). The others are
/// present only when the variant ran that phase.
#[derive(Debug, Clone, Copy)]
pub struct Phases<'a> {
    pub free: &'a State,
    pub nudged: Option<&'a State>,
    pub negative: Option<&'a State>,
}

/// Everything a rule may read besides the weights it replaces.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub phases: Phases<'a>,
    pub feedback: Option<&'a [Array2<f32>]>,
    pub params: &'a Params,
}

/// A local weight-update strategy.
///
/// Implementations never mutate `weights`; they return the successor tensors.
/// A rule whose inputs are missing from `ctx` (e.g. no nudged phase) returns
/// the weights unchanged.
pub trait LearningRule: Send + Sync {
    fn update(&self, weights: &[Array2<f32>], ctx: &RuleContext<'_>) -> Vec<Array2<f32>>;

    /// Name for logging
    fn name(&self) -> &'static str;
}

/// Error-driven Hebbian update for predictive coding.
///
/// ```text
/// ΔW[l] = α x[l+1] ⊗ eps[l]
/// ```
///
/// `eps[l]` is the error in layer `l`'s top-down prediction and `x[l+1]` the
/// predicting layer's activity; no quantity outside the transition is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct HebbianRule;

impl LearningRule for HebbianRule {
    fn update(&self, weights: &[Array2<f32>], ctx: &RuleContext<'_>) -> Vec<Array2<f32>> {
        let state = ctx.phases.free;
        let alpha = ctx.params.alpha_learn;

        weights
            .iter()
            .enumerate()
            .map(|(l, w)| {
                let delta_w = outer(&state.x[l + 1], &state.eps[l]);
                w + &(alpha * &delta_w)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "hebbian"
    }
}

/// Feedback-alignment update driven by the EP output discrepancy.
///
/// ```text
/// e = x_nudged[L] - x_free[L]
/// δ = (B[l] e) ⊙ (1 - x_free[l+1]²)
/// ΔW[l] = α δ ⊗ x_free[l]
/// ```
///
/// The fixed random `B[l]` stands in for the transposed downstream weights, so
/// no error is propagated through the forward path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedbackAlignmentRule;

impl LearningRule for FeedbackAlignmentRule {
    fn update(&self, weights: &[Array2<f32>], ctx: &RuleContext<'_>) -> Vec<Array2<f32>> {
        let (Some(nudged), Some(feedback)) = (ctx.phases.nudged, ctx.feedback) else {
            return weights.to_vec();
        };
        let free = ctx.phases.free;
        let alpha = ctx.params.alpha_learn;
        let e = output_discrepancy(free, nudged);

        weights
            .iter()
            .zip(feedback)
            .enumerate()
            .map(|(l, (w, b))| {
                let signal = b.dot(&e);
                let slope = free.x[l + 1].mapv(d_saturate);
                let delta = &signal * &slope;
                w + &(alpha * &outer(&delta, &free.x[l]))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "feedback-alignment"
    }
}

/// Forward-Forward contrastive-goodness update.
///
/// ```text
/// y⁺ = tanh(W x⁺),  y⁻ = tanh(W x⁻)
/// c  = σ(g(y⁺) - θ) - σ(g(y⁻) - θ)
/// ΔW = α c (y⁺ ⊗ x⁺ - y⁻ ⊗ x⁻)
/// ```
///
/// `x⁺` comes from the free (positive) phase and `x⁻` from the negative phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardForwardRule;

impl LearningRule for ForwardForwardRule {
    fn update(&self, weights: &[Array2<f32>], ctx: &RuleContext<'_>) -> Vec<Array2<f32>> {
        let Some(negative) = ctx.phases.negative else {
            return weights.to_vec();
        };
        let positive = ctx.phases.free;
        let alpha = ctx.params.alpha_learn;
        let theta = ctx.params.theta_ff;

        weights
            .iter()
            .enumerate()
            .map(|(l, w)| {
                let pos_in = &positive.x[l];
                let neg_in = &negative.x[l];
                let pos_out = project(pos_in, w);
                let neg_out = project(neg_in, w);

                let contrast =
                    sigmoid(goodness(&pos_out) - theta) - sigmoid(goodness(&neg_out) - theta);
                let delta_w = outer(&pos_out, pos_in) - outer(&neg_out, neg_in);
                w + &((alpha * contrast) * &delta_w)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "forward-forward"
    }
}

/// `x_nudged[L] - x_free[L]`.
pub fn output_discrepancy(free: &State, nudged: &State) -> Array1<f32> {
    subtract(nudged.output(), free.output())
}

/// Apply rules in order, each reading the previous rule's output.
pub fn apply_rules(
    rules: &[Box<dyn LearningRule>],
    weights: &[Array2<f32>],
    ctx: &RuleContext<'_>,
) -> Vec<Array2<f32>> {
    let mut current = weights.to_vec();
    for rule in rules {
        current = rule.update(&current, ctx);
    }
    current
}

/// Per-transition goodness under positive and negative input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goodness {
    pub pos: Vec<f32>,
    pub neg: Vec<f32>,
}

impl Goodness {
    pub fn zeros(transitions: usize) -> Self {
        Self {
            pos: vec![0.0; transitions],
            neg: vec![0.0; transitions],
        }
    }
}

/// Goodness of each transition's projected output for both phases.
///
/// Entry `l` is `g(tanh(W[l] x[l]))`. The driver passes the weights the step
/// started from, i.e. the ones both phases were relaxed under.
pub fn goodness_pairs(weights: &[Array2<f32>], positive: &State, negative: &State) -> Goodness {
    let (pos, neg) = weights
        .iter()
        .enumerate()
        .map(|(l, w)| {
            (
                goodness(&project(&positive.x[l], w)),
                goodness(&project(&negative.x[l], w)),
            )
        })
        .unzip();
    Goodness { pos, neg }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Schedule;
    use ndarray::{arr1, arr2};

    fn state(layers: &[&[f32]]) -> State {
        let schedule = Schedule::new(layers.iter().map(|l| l.len()).collect()).unwrap();
        let mut s = State::zeros(&schedule);
        for (l, values) in layers.iter().enumerate() {
            s.x[l] = arr1(values);
        }
        s
    }

    fn params(alpha: f32) -> Params {
        Params {
            alpha_learn: alpha,
            ..Params::default()
        }
    }

    #[test]
    fn test_hebbian_outer_product() {
        let mut s = state(&[&[0.0, 0.0], &[2.0]]);
        s.eps[0] = arr1(&[1.0, -1.0]);
        let p = params(0.5);
        let ctx = RuleContext {
            phases: Phases {
                free: &s,
                nudged: None,
                negative: None,
            },
            feedback: None,
            params: &p,
        };
        let w = vec![arr2(&[[0.1, 0.2]])];
        let next = HebbianRule.update(&w, &ctx);

        // ΔW = 0.5 * [2] ⊗ [1, -1] = [[1, -1]]
        assert!((next[0][[0, 0]] - 1.1).abs() < 1e-6);
        assert!((next[0][[0, 1]] + 0.8).abs() < 1e-6);
        assert_eq!(w[0], arr2(&[[0.1, 0.2]]));
    }

    #[test]
    fn test_feedback_alignment_by_hand() {
        let free = state(&[&[1.0, 0.5], &[0.5]]);
        let nudged = state(&[&[1.0, 0.5], &[1.0]]);
        let feedback = vec![arr2(&[[2.0]])];
        let p = params(0.1);
        let ctx = RuleContext {
            phases: Phases {
                free: &free,
                nudged: Some(&nudged),
                negative: None,
            },
            feedback: Some(&feedback),
            params: &p,
        };
        let w = vec![Array2::zeros((1, 2))];
        let next = FeedbackAlignmentRule.update(&w, &ctx);

        // e = 0.5; s = 1.0; δ = 1.0 * (1 - 0.25) = 0.75; ΔW = 0.1 * 0.75 * [1, 0.5]
        assert!((next[0][[0, 0]] - 0.075).abs() < 1e-6);
        assert!((next[0][[0, 1]] - 0.0375).abs() < 1e-6);
    }

    #[test]
    fn test_feedback_alignment_without_nudge_is_identity() {
        let free = state(&[&[1.0], &[0.5]]);
        let p = params(0.1);
        let ctx = RuleContext {
            phases: Phases {
                free: &free,
                nudged: None,
                negative: None,
            },
            feedback: None,
            params: &p,
        };
        let w = vec![arr2(&[[0.3]])];
        assert_eq!(FeedbackAlignmentRule.update(&w, &ctx), w);
    }

    #[test]
    fn test_forward_forward_identical_phases_no_change() {
        let s = state(&[&[1.0, 0.0], &[0.0]]);
        let p = params(0.1);
        let ctx = RuleContext {
            phases: Phases {
                free: &s,
                nudged: None,
                negative: Some(&s),
            },
            feedback: None,
            params: &p,
        };
        let w = vec![arr2(&[[0.4, -0.2]])];
        let next = ForwardForwardRule.update(&w, &ctx);
        assert_abs_eq(&next[0], &w[0]);
    }

    #[test]
    fn test_forward_forward_raises_positive_goodness() {
        let pos = state(&[&[1.0, 0.0], &[0.0, 0.0]]);
        let neg = state(&[&[0.0, 1.0], &[0.0, 0.0]]);
        let p = Params {
            alpha_learn: 0.05,
            theta_ff: 0.5,
            ..Params::default()
        };
        let ctx = RuleContext {
            phases: Phases {
                free: &pos,
                nudged: None,
                negative: Some(&neg),
            },
            feedback: None,
            params: &p,
        };
        let mut w = vec![arr2(&[[0.5, 0.1], [0.5, 0.1]])];
        let before = goodness_pairs(&w, &pos, &neg);
        for _ in 0..50 {
            w = ForwardForwardRule.update(&w, &ctx);
        }
        let after = goodness_pairs(&w, &pos, &neg);

        assert!(after.pos[0] > before.pos[0]);
        assert!(after.pos[0] - after.neg[0] > before.pos[0] - before.neg[0]);
    }

    #[test]
    fn test_apply_rules_in_sequence() {
        let mut s = state(&[&[1.0], &[1.0]]);
        s.eps[0] = arr1(&[1.0]);
        let p = params(0.1);
        let ctx = RuleContext {
            phases: Phases {
                free: &s,
                nudged: None,
                negative: None,
            },
            feedback: None,
            params: &p,
        };
        let rules: Vec<Box<dyn LearningRule>> = vec![Box::new(HebbianRule), Box::new(HebbianRule)];
        let next = apply_rules(&rules, &[arr2(&[[0.0]])], &ctx);
        assert!((next[0][[0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_goodness_pairs_length() {
        let pos = state(&[&[1.0, 1.0], &[0.0, 0.0, 0.0], &[0.0]]);
        let weights = vec![Array2::ones((3, 2)), Array2::ones((1, 3))];
        let g = goodness_pairs(&weights, &pos, &pos);
        assert_eq!(g.pos.len(), 2);
        assert_eq!(g.pos, g.neg);
        assert!((g.pos[0] - 3.0 * 2.0f32.tanh().powi(2)).abs() < 1e-5);
        assert_eq!(g.pos[1], 0.0);
    }

    fn assert_abs_eq(a: &Array2<f32>, b: &Array2<f32>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-7, "{} != {}", x, y);
        }
    }
}
