//! Tensor utilities: the saturating nonlinearity, projections and goodness.
//!
//! Every function here is pure. Weight matrices follow the crate-wide shape
//! convention `W[l]: (d_{l+1}, d_l)`: rows index the downstream layer,
//! columns the upstream layer.

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Saturating nonlinearity: tanh.
#[inline]
pub fn saturate(x: f32) -> f32 {
    x.tanh()
}

/// Derivative of tanh expressed through its output: `1 - y²` where `y = tanh(x)`.
#[inline]
pub fn d_saturate(y: f32) -> f32 {
    1.0 - y * y
}

/// Logistic sigmoid: `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply [`saturate`] elementwise.
pub fn saturate_vec(x: &Array1<f32>) -> Array1<f32> {
    x.mapv(saturate)
}

/// Forward projection: `y = tanh(W x)`.
///
/// `x` has length `n`, `w` has shape `(m, n)`, the result has length `m`.
/// No bias term.
pub fn project(x: &Array1<f32>, w: &Array2<f32>) -> Array1<f32> {
    w.dot(x).mapv_into(saturate)
}

/// Top-down projection: `y = tanh(Wᵗ x)`.
///
/// `x` has length `m` (the downstream layer), `w` has shape `(m, n)`,
/// the result has length `n` (the upstream layer).
pub fn project_down(x: &Array1<f32>, w: &Array2<f32>) -> Array1<f32> {
    w.t().dot(x).mapv_into(saturate)
}

/// Goodness of a layer: `Σ y_i²`.
pub fn goodness(y: &Array1<f32>) -> f32 {
    sum_squares(y)
}

/// Sum of squares of a vector.
pub fn sum_squares(v: &Array1<f32>) -> f32 {
    v.dot(v)
}

/// Elementwise `a - b`.
///
/// The result always has `a`'s length; entries missing from `b` count as zero.
pub fn subtract(a: &Array1<f32>, b: &Array1<f32>) -> Array1<f32> {
    Array1::from_shape_fn(a.len(), |i| a[i] - b.get(i).copied().unwrap_or(0.0))
}

/// Outer product `a ⊗ b`, shape `(len(a), len(b))`.
pub fn outer(a: &Array1<f32>, b: &Array1<f32>) -> Array2<f32> {
    outer_view(a.view(), b.view())
}

fn outer_view(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Array2<f32> {
    // a[:, None] * b[None, :]
    let col = a.insert_axis(Axis(1));
    let row = b.insert_axis(Axis(0));
    &col * &row
}

/// Mean absolute activation. Returns 0 for an empty vector.
pub fn mean_abs(v: &Array1<f32>) -> f32 {
    if v.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = v.len() as f32;
    v.iter().map(|x| x.abs()).sum::<f32>() / n
}
