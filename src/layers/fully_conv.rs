//! Dense layers re-expressed as VALID convolutions, so that a network trained on fixed-size
//! crops can slide over larger images.
use super::merge::merge_weights;
use super::{ComputeOnHost, Layer, Runtime};
use crate::geometry::{ImageGeometry, StreamShape};
use crate::math::{conv2d, dropout, flatten, leaky_relu_inplace, pack, PaddingStyle};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::streams::invalid_layer;
use crate::network::StreamKind;
use crate::weights::{Initializer, WeightKey, WeightRole};
use crate::{Result, Tensor};
use ndarray::{Ix4, IxDyn};

/// A fully-connected layer applied as a convolution with a kernel the size of its
/// training-time input.
#[derive(Debug)]
pub struct FullyConvLayer {
    name: String,
    kernel: WeightKey,
    bias: WeightKey,
    activation: bool,
}

impl Layer for FullyConvLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "fc"
    }
}

impl ComputeOnHost for FullyConvLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let input = inputs[0].view().into_dimensionality::<Ix4>()?;
        let mut out = conv2d(
            input,
            rt.weights.view4(&self.kernel)?,
            Some(rt.weights.view1(&self.bias)?),
            PaddingStyle::Valid,
        )?;
        if self.activation {
            leaky_relu_inplace(&mut out);
        }
        dropout(&mut out, rt.drop_rate, &mut *rt.rng);
        Ok(out.into_dyn())
    }
}

/// A merge whose image input is convolved and whose flat inputs are broadcast over the
/// resulting grid.
#[derive(Debug)]
pub struct FullyConvMergeLayer {
    name: String,
    im_kernel: WeightKey,
    flat_weights: Vec<WeightKey>,
    bias: WeightKey,
}

impl Layer for FullyConvMergeLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "fc_merge"
    }
}

impl ComputeOnHost for FullyConvMergeLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let image = inputs[0].view().into_dimensionality::<Ix4>()?;
        let mut out = conv2d(
            image,
            rt.weights.view4(&self.im_kernel)?,
            None,
            PaddingStyle::Valid,
        )?;
        let (_, height, width, _) = out.dim();
        for (input, key) in inputs[1..].iter().zip(&self.flat_weights) {
            let dense = flatten(input.view())?.dot(&rt.weights.view2(key)?);
            out += &pack(dense.view(), height, width);
        }
        out += &rt.weights.view1(&self.bias)?;
        leaky_relu_inplace(&mut out);
        dropout(&mut out, rt.drop_rate, &mut *rt.rng);
        Ok(out.into_dyn())
    }
}

/// Reshapes dense weights `[h * w * c, out]` into a `[h, w, c, out]` kernel. Flattening is
/// row-major HWC, so the element order carries over unchanged.
fn to_kernel(dense: &Tensor, train: ImageGeometry, out_size: usize) -> Result<Tensor> {
    Ok(Tensor::from_shape_vec(
        IxDyn(&[train.height(), train.width(), train.channels(), out_size]),
        dense.iter().cloned().collect(),
    )?)
}

fn spatial_input(
    stream: StreamKind,
    name: &str,
    input: &StreamOutput,
) -> Result<(ImageGeometry, ImageGeometry)> {
    match input.shape {
        StreamShape::Spatial { actual, train } => Ok((actual, train)),
        StreamShape::Flat(_) => Err(invalid_layer(
            stream,
            name,
            "fully convolutional conversion needs a spatial input",
        )),
    }
}

pub(crate) fn build_fully_conv(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    out_size: usize,
    input: StreamOutput,
    terminal: bool,
) -> Result<StreamOutput> {
    let (actual, train) = spatial_input(stream, name, &input)?;
    info!("Building fully convolutional layer: {}", name);

    let fan_in = train.num_elems();
    let init = Initializer::fan_in(fan_in);
    let weights = gb.weight(
        WeightKey::new(stream, name, WeightRole::Weights),
        &[fan_in, out_size],
        init.clone(),
    )?;
    let bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Bias),
        &[out_size],
        if terminal { Initializer::Zeros } else { init },
    )?;
    let kernel = to_kernel(gb.tensor(&weights)?, train, out_size)?;
    let kernel = gb.derived_weight(
        WeightKey::new(stream, name, WeightRole::FullyConvWeights),
        kernel,
    );

    let out_actual = actual.valid_filtered(train.height(), train.width(), out_size);
    debug!(
        "Create fully convolutional layer {} with filter {}x{}, input {:?}, output {:?}.",
        name,
        train.height(),
        train.width(),
        actual,
        out_actual
    );
    let layer = FullyConvLayer {
        name: name.to_owned(),
        kernel,
        bias,
        activation: !terminal,
    };
    let node = gb.push(Box::new(layer), vec![input.node]);
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::Spatial {
            actual: out_actual,
            train: ImageGeometry::new(1, 1, out_size),
        },
    })
}

pub(crate) fn build_fully_conv_merge(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    out_size: usize,
    inputs: &[StreamOutput],
) -> Result<StreamOutput> {
    let (actual, train) = spatial_input(stream, name, &inputs[0])?;
    if inputs[1..].iter().any(|i| i.shape.is_spatial()) {
        return Err(invalid_layer(
            stream,
            name,
            "only the first input of a fully convolutional merge may be spatial",
        ));
    }
    info!("Building fully convolutional merge layer: {}", name);

    let (input_weights, bias) = merge_weights(gb, stream, name, out_size, inputs)?;
    let im_kernel = to_kernel(gb.tensor(&input_weights[0])?, train, out_size)?;
    let im_kernel = gb.derived_weight(
        WeightKey::new(stream, name, WeightRole::ImFullyConvWeights),
        im_kernel,
    );

    let out_actual = actual.valid_filtered(train.height(), train.width(), out_size);
    debug!(
        "Create fully convolutional merge {} with filter {}x{}, input {:?}, output {:?}.",
        name,
        train.height(),
        train.width(),
        actual,
        out_actual
    );
    let layer = FullyConvMergeLayer {
        name: name.to_owned(),
        im_kernel,
        flat_weights: input_weights[1..].to_vec(),
        bias,
    };
    let node = gb.push(Box::new(layer), inputs.iter().map(|i| i.node).collect());
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::Spatial {
            actual: out_actual,
            train: ImageGeometry::new(1, 1, out_size),
        },
    })
}
