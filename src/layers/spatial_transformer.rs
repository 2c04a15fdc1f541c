use super::{ComputeOnHost, Layer, Runtime};
use crate::config::SpatialTransformerParams;
use crate::geometry::{ImageGeometry, StreamShape};
use crate::math::{affine, flatten};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::streams::invalid_layer;
use crate::network::StreamKind;
use crate::weights::{Initializer, WeightKey, WeightRole};
use crate::{Result, Tensor};
use ndarray::{Array4, ArrayView2, ArrayView4, Ix4};
use std::fmt::Debug;
use std::sync::Arc;

/// The number of parameters of a 2D affine transform.
pub const AFFINE_PARAMS: usize = 6;

/// Resamples images through per-example affine transforms.
pub trait ImageSampler: Debug + Send + Sync {
    /// Warps every image of `input` (NHWC) by the affine transform in the matching row of
    /// `theta`, laid out as `[a, b, tx, c, d, ty]`, onto an `out_h` x `out_w` grid. Both grids
    /// are in normalized `[-1, 1]` coordinates.
    fn sample(
        &self,
        input: ArrayView4<f32>,
        theta: ArrayView2<f32>,
        out_h: usize,
        out_w: usize,
    ) -> Array4<f32>;
}

/// Bilinear interpolation with source coordinates clamped to the image border.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilinearSampler;

impl ImageSampler for BilinearSampler {
    fn sample(
        &self,
        input: ArrayView4<f32>,
        theta: ArrayView2<f32>,
        out_h: usize,
        out_w: usize,
    ) -> Array4<f32> {
        let (batch, in_h, in_w, channels) = input.dim();
        let mut out = Array4::<f32>::zeros((batch, out_h, out_w, channels));
        for n in 0..batch {
            let t = theta.row(n);
            for oy in 0..out_h {
                let y_t = grid_coord(oy, out_h);
                for ox in 0..out_w {
                    let x_t = grid_coord(ox, out_w);
                    let x_s = t[0] * x_t + t[1] * y_t + t[2];
                    let y_s = t[3] * x_t + t[4] * y_t + t[5];
                    let (x0, x1, wx) = source_coord(x_s, in_w);
                    let (y0, y1, wy) = source_coord(y_s, in_h);
                    for c in 0..channels {
                        let top = (1.0 - wx) * input[[n, y0, x0, c]] + wx * input[[n, y0, x1, c]];
                        let bottom =
                            (1.0 - wx) * input[[n, y1, x0, c]] + wx * input[[n, y1, x1, c]];
                        out[[n, oy, ox, c]] = (1.0 - wy) * top + wy * bottom;
                    }
                }
            }
        }
        out
    }
}

/// Position `i` of an evenly spaced `[-1, 1]` grid of `n` points.
fn grid_coord(i: usize, n: usize) -> f32 {
    if n <= 1 {
        0.0
    } else {
        -1.0 + 2.0 * i as f32 / (n - 1) as f32
    }
}

/// Maps a normalized coordinate onto pixel indices of an axis of length `len`, returning the
/// two neighbouring indices and the weight of the second.
fn source_coord(normalized: f32, len: usize) -> (usize, usize, f32) {
    let max = (len - 1) as f32;
    let pos = ((normalized + 1.0) * max / 2.0).max(0.0).min(max);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(len - 1);
    (lo, hi, pos - lo as f32)
}

/// Predicts an affine transform from its input and resamples the input through it.
#[derive(Debug)]
pub struct SpatialTransformerLayer {
    name: String,
    weights: WeightKey,
    bias: WeightKey,
    out_size: usize,
    sampler: Arc<dyn ImageSampler>,
}

impl Layer for SpatialTransformerLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "spatial_transformer"
    }
}

impl ComputeOnHost for SpatialTransformerLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let input = inputs[0].view().into_dimensionality::<Ix4>()?;
        let flat = flatten(inputs[0].view())?;
        let theta = affine(
            flat.view(),
            rt.weights.view2(&self.weights)?,
            rt.weights.view1(&self.bias)?,
        );
        Ok(self
            .sampler
            .sample(input, theta.view(), self.out_size, self.out_size)
            .into_dyn())
    }
}

pub(crate) fn build_spatial_transformer(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    params: &SpatialTransformerParams,
    input: StreamOutput,
) -> Result<StreamOutput> {
    let (actual, train) = match input.shape {
        StreamShape::Spatial { actual, train } => (actual, train),
        StreamShape::Flat(_) => {
            return Err(invalid_layer(
                stream,
                name,
                "spatial transformer needs a spatial input",
            ))
        }
    };
    if params.num_transform_params != AFFINE_PARAMS {
        return Err(invalid_layer(
            stream,
            name,
            format!(
                "only affine transforms with {} parameters are supported, got {}",
                AFFINE_PARAMS, params.num_transform_params
            ),
        ));
    }
    if actual != train {
        return Err(invalid_layer(
            stream,
            name,
            "spatial transformer cannot run on inputs larger than the training size",
        ));
    }
    info!("Building spatial transformer layer: {}", name);

    let fan_in = actual.num_elems();
    let weights = gb.weight(
        WeightKey::new(stream, name, WeightRole::Weights),
        &[fan_in, AFFINE_PARAMS],
        Initializer::Zeros,
    )?;
    let bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Bias),
        &[AFFINE_PARAMS],
        Initializer::Constant(vec![0.5, 0.0, 0.0, 0.0, 0.5, 0.0]),
    )?;

    let out = ImageGeometry::new(params.out_size, params.out_size, actual.channels());
    debug!(
        "Create spatial transformer {} with input {:?}, output {:?}.",
        name, actual, out
    );
    let layer = SpatialTransformerLayer {
        name: name.to_owned(),
        weights,
        bias,
        out_size: params.out_size,
        sampler: gb.sampler(),
    };
    let node = gb.push(Box::new(layer), vec![input.node]);
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::spatial(out),
    })
}
