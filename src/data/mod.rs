//! Input and target generation.
//!
//! The driver asks a [`SignalSource`] for the sensory input and the
//! supervisory target at each step. [`Sinusoid`] is the default: phase-shifted
//! sine inputs and slower cosine targets, both in `[0, 1]`. Any other data
//! source can be plugged in without touching the rest of the engine.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Deterministic per-step data.
pub trait SignalSource: Send + Sync {
    /// Sensory input for `step`, `width` units.
    fn input(&self, step: u64, width: usize) -> Array1<f32>;

    /// Supervisory target for `step`, `width` units.
    fn target(&self, step: u64, width: usize) -> Array1<f32>;
}

/// Phase-shifted sinusoids.
///
/// ```text
/// input[i]  = 0.5 + 0.5 sin(step * input_rate  + i * input_shift)
/// target[i] = 0.5 + 0.5 cos(step * target_rate + i * target_shift)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sinusoid {
    pub input_rate: f32,
    pub input_shift: f32,
    pub target_rate: f32,
    pub target_shift: f32,
}

impl Default for Sinusoid {
    fn default() -> Self {
        Self {
            input_rate: 0.1,
            input_shift: 0.5,
            target_rate: 0.05,
            target_shift: 1.5,
        }
    }
}

impl SignalSource for Sinusoid {
    fn input(&self, step: u64, width: usize) -> Array1<f32> {
        wave(step, width, self.input_rate, self.input_shift, f32::sin)
    }

    fn target(&self, step: u64, width: usize) -> Array1<f32> {
        wave(step, width, self.target_rate, self.target_shift, f32::cos)
    }
}

#[allow(clippy::cast_precision_loss)]
fn wave(step: u64, width: usize, rate: f32, shift: f32, f: fn(f32) -> f32) -> Array1<f32> {
    let t = step as f32 * rate;
    Array1::from_shape_fn(width, |i| 0.5 * f(t + i as f32 * shift) + 0.5)
}

/// Corrupt an input into a negative sample by permuting its components.
///
/// The permutation keeps the input's value distribution but destroys which
/// unit carries which value.
pub fn corrupt<R: Rng + ?Sized>(input: &Array1<f32>, rng: &mut R) -> Array1<f32> {
    let mut values = input.to_vec();
    values.shuffle(rng);
    Array1::from(values)
}

/// RNG for the negative sample of a given step.
///
/// Derived from the run seed and the step counter only, so stepping the same
/// snapshot twice produces the same negative input.
pub fn corruption_rng(seed: u64, step: u64) -> StdRng {
    // splitmix64 finalizer to decorrelate neighbouring steps
    let mut z = seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}
