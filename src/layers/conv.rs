use super::{ComputeOnHost, Layer, Runtime};
use crate::config::{ConvParams, LrnParams};
use crate::geometry::StreamShape;
use crate::math::{conv2d, leaky_relu_inplace, lrn, max_pool, PaddingStyle};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::streams::invalid_layer;
use crate::network::StreamKind;
use crate::weights::{Initializer, WeightKey, WeightRole};
use crate::{Result, Tensor};
use ndarray::Ix4;

/// Convolution with SAME padding, leaky rectification, optional local response normalization
/// and max-pooling.
#[derive(Debug)]
pub struct ConvLayer {
    name: String,
    weights: WeightKey,
    bias: WeightKey,
    norm: Option<LrnParams>,
    pool_size: usize,
    pool_stride: usize,
}

impl Layer for ConvLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "conv"
    }
}

impl ComputeOnHost for ConvLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let input = inputs[0].view().into_dimensionality::<Ix4>()?;
        let mut out = conv2d(
            input,
            rt.weights.view4(&self.weights)?,
            Some(rt.weights.view1(&self.bias)?),
            PaddingStyle::Same,
        )?;
        leaky_relu_inplace(&mut out);
        if let Some(params) = &self.norm {
            out = lrn(out.view(), params);
        }
        Ok(max_pool(out.view(), self.pool_size, self.pool_stride).into_dyn())
    }
}

pub(crate) fn build_conv(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    params: &ConvParams,
    input: StreamOutput,
) -> Result<StreamOutput> {
    let (actual, train) = match input.shape {
        StreamShape::Spatial { actual, train } => (actual, train),
        StreamShape::Flat(_) => {
            return Err(invalid_layer(stream, name, "convolution needs a spatial input"))
        }
    };
    info!("Building convolutional layer: {}", name);

    let in_channels = actual.channels();
    let fan_in = params.filt_dim * params.filt_dim * in_channels;
    let init = Initializer::fan_in(fan_in);
    let weights = gb.weight(
        WeightKey::new(stream, name, WeightRole::Weights),
        &[params.filt_dim, params.filt_dim, in_channels, params.num_filt],
        init.clone(),
    )?;
    let bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Bias),
        &[params.num_filt],
        init,
    )?;

    let out_actual = actual
        .with_channels(params.num_filt)
        .pooled(params.pool_stride);
    let out_train = train
        .with_channels(params.num_filt)
        .pooled(params.pool_stride);
    debug!(
        "Create conv-layer {} with filter {}x{}, input {:?}, output {:?}, normalized: {}.",
        name, params.filt_dim, params.filt_dim, actual, out_actual, params.norm
    );

    let layer = ConvLayer {
        name: name.to_owned(),
        weights,
        bias,
        norm: if params.norm {
            Some(gb.config().lrn())
        } else {
            None
        },
        pool_size: params.pool_size,
        pool_stride: params.pool_stride,
    };
    let node = gb.push(Box::new(layer), vec![input.node]);
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::Spatial {
            actual: out_actual,
            train: out_train,
        },
    })
}
