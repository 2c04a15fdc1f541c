//! Host-side tensor math used by the layers. Spatial tensors are NHWC.
mod convolve;
mod normalize;
mod pool;
#[cfg(test)]
mod test;

pub use self::convolve::*;
pub use self::normalize::*;
pub use self::pool::*;
use crate::Result;
use ndarray::{Array, Array2, Array4, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, Dimension};
use num_traits::Float;
use rand::Rng;

/// Negative slope of the leaky rectifier used throughout the network.
pub const LEAKY_SLOPE: f32 = 0.1;

/// Leaky rectifier, `max(alpha * x, x)`.
pub fn leaky_relu<T: Float>(x: T, alpha: T) -> T {
    (alpha * x).max(x)
}

/// Applies the leaky rectifier with [`LEAKY_SLOPE`] to every element.
pub fn leaky_relu_inplace<D: Dimension>(arr: &mut Array<f32, D>) {
    arr.mapv_inplace(|x| leaky_relu(x, LEAKY_SLOPE));
}

/// Softmax over the last axis.
pub fn softmax(input: ArrayViewD<f32>) -> ArrayD<f32> {
    let mut out = input.to_owned();
    if out.ndim() == 0 {
        return out;
    }
    let axis = Axis(out.ndim() - 1);
    for mut lane in out.lanes_mut(axis) {
        // Shift by the maximum for numerical stability
        let max = lane.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        lane.mapv_inplace(|x| (x - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|x| x / sum);
    }
    out
}

/// Inverted dropout: zeroes elements with probability `rate` and scales the rest by
/// `1 / (1 - rate)`. A zero rate leaves the input untouched.
pub fn dropout<D: Dimension, R: Rng>(arr: &mut Array<f32, D>, rate: f32, rng: &mut R) {
    if rate <= 0.0 {
        return;
    }
    if rate >= 1.0 {
        arr.fill(0.0);
        return;
    }
    let keep = 1.0 - rate;
    arr.mapv_inplace(|x| if rng.gen::<f32>() < keep { x / keep } else { 0.0 });
}

/// Flattens every example of a batch into a row, keeping row-major (HWC) element order.
pub fn flatten(input: ArrayViewD<f32>) -> Result<Array2<f32>> {
    let batch = input.shape().first().cloned().unwrap_or(1);
    let row_len = input.shape().iter().skip(1).product::<usize>();
    Ok(Array2::from_shape_vec(
        (batch, row_len),
        input.iter().cloned().collect(),
    )?)
}

/// `x · w + b` for a batch of row vectors.
pub fn affine(x: ArrayView2<f32>, w: ArrayView2<f32>, b: ArrayView1<f32>) -> Array2<f32> {
    let mut out = x.dot(&w);
    out += &b;
    out
}

/// Repeats each row of `[batch, k]` over a `height` x `width` grid, giving
/// `[batch, height, width, k]`.
pub fn pack(input: ArrayView2<f32>, height: usize, width: usize) -> Array4<f32> {
    let (batch, k) = input.dim();
    Array4::from_shape_fn((batch, height, width, k), |(n, _, _, c)| input[[n, c]])
}

