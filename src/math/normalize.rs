use crate::config::LrnParams;
use ndarray::{s, Array4, ArrayView1, ArrayView4, Axis};

/// Epsilon of every batch normalization in the network.
pub const BATCH_NORM_EPSILON: f32 = 1e-3;

/// Local response normalization across channels:
/// `x_c / (bias + alpha * sum_{|c' - c| <= radius} x_c'^2)^beta`.
pub fn lrn(input: ArrayView4<f32>, params: &LrnParams) -> Array4<f32> {
    let channels = input.dim().3;
    let mut out = input.to_owned();
    for (src, mut dst) in input
        .lanes(Axis(3))
        .into_iter()
        .zip(out.lanes_mut(Axis(3)))
    {
        for c in 0..channels {
            let lo = c.saturating_sub(params.radius);
            let hi = (c + params.radius + 1).min(channels);
            let sqr_sum: f32 = src.slice(s![lo..hi]).iter().map(|v| v * v).sum();
            dst[c] = src[c] / (params.bias + params.alpha * sqr_sum).powf(params.beta);
        }
    }
    out
}

/// Inference-mode batch normalization over the channel axis using moving statistics.
pub fn batch_norm(
    input: ArrayView4<f32>,
    mean: ArrayView1<f32>,
    variance: ArrayView1<f32>,
    offset: ArrayView1<f32>,
    scale: ArrayView1<f32>,
    epsilon: f32,
) -> Array4<f32> {
    let factor = variance.mapv(|v| 1.0 / (v + epsilon).sqrt()) * &scale;
    let shift = &offset - &(&mean * &factor);
    let mut out = &input * &factor;
    out += &shift;
    out
}
