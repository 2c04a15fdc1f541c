use super::{ComputeOnHost, Layer, Runtime};
use crate::config::ResidualParams;
use crate::geometry::StreamShape;
use crate::math::{batch_norm, conv2d, leaky_relu_inplace, PaddingStyle, BATCH_NORM_EPSILON};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::streams::invalid_layer;
use crate::network::StreamKind;
use crate::weights::{BnParam, BnSlot, Initializer, WeightKey, WeightRole, WeightStore};
use crate::{Result, Tensor};
use ndarray::{Array4, ArrayView4, Ix4};

/// Keys of one inference-mode batch normalization.
#[derive(Debug)]
struct BatchNormKeys {
    gamma: WeightKey,
    beta: WeightKey,
    mean: WeightKey,
    variance: WeightKey,
}

impl BatchNormKeys {
    fn build(
        gb: &mut GraphBuilder,
        stream: StreamKind,
        name: &str,
        slot: BnSlot,
        channels: usize,
    ) -> Result<BatchNormKeys> {
        let mut key = |param, init| {
            gb.weight(
                WeightKey::new(stream, name, WeightRole::BatchNorm(slot, param)),
                &[channels],
                init,
            )
        };
        Ok(BatchNormKeys {
            gamma: key(BnParam::Gamma, Initializer::Ones)?,
            beta: key(BnParam::Beta, Initializer::Zeros)?,
            mean: key(BnParam::MovingMean, Initializer::Zeros)?,
            variance: key(BnParam::MovingVariance, Initializer::Ones)?,
        })
    }

    fn apply(&self, input: ArrayView4<f32>, store: &WeightStore) -> Result<Array4<f32>> {
        Ok(batch_norm(
            input,
            store.view1(&self.mean)?,
            store.view1(&self.variance)?,
            store.view1(&self.beta)?,
            store.view1(&self.gamma)?,
            BATCH_NORM_EPSILON,
        ))
    }
}

/// Pre-activation residual block: `x + conv2(act(bn(conv1(act(bn(x))))))`. The first block
/// of a run of residual blocks skips the leading normalization and activation.
#[derive(Debug)]
pub struct ResidualLayer {
    name: String,
    bn_input: Option<BatchNormKeys>,
    conv1_weights: WeightKey,
    conv1_bias: WeightKey,
    bn_hidden: BatchNormKeys,
    conv2_weights: WeightKey,
    conv2_bias: WeightKey,
}

impl Layer for ResidualLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "residual"
    }
}

impl ComputeOnHost for ResidualLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let x = inputs[0].view().into_dimensionality::<Ix4>()?;
        let normalized;
        let pre = match &self.bn_input {
            Some(bn) => {
                let mut y = bn.apply(x, rt.weights)?;
                leaky_relu_inplace(&mut y);
                normalized = y;
                normalized.view()
            }
            None => x,
        };
        let mut hidden = conv2d(
            pre,
            rt.weights.view4(&self.conv1_weights)?,
            Some(rt.weights.view1(&self.conv1_bias)?),
            PaddingStyle::Same,
        )?;
        hidden = self.bn_hidden.apply(hidden.view(), rt.weights)?;
        leaky_relu_inplace(&mut hidden);
        let mut out = conv2d(
            hidden.view(),
            rt.weights.view4(&self.conv2_weights)?,
            Some(rt.weights.view1(&self.conv2_bias)?),
            PaddingStyle::Same,
        )?;
        out += &x;
        Ok(out.into_dyn())
    }
}

pub(crate) fn build_residual(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    params: &ResidualParams,
    input: StreamOutput,
    first: bool,
) -> Result<StreamOutput> {
    let actual = match input.shape {
        StreamShape::Spatial { actual, .. } => actual,
        StreamShape::Flat(_) => {
            return Err(invalid_layer(stream, name, "residual block needs a spatial input"))
        }
    };
    if actual.channels() != params.num_filt {
        return Err(invalid_layer(
            stream,
            name,
            format!(
                "input has {} channels, but the block has {} filters",
                actual.channels(),
                params.num_filt
            ),
        ));
    }
    info!("Building residual layer: {}", name);

    let init = Initializer::fan_in(input.shape.fan_in());
    let kernel_shape = [params.filt_dim, params.filt_dim, params.num_filt, params.num_filt];
    let bn_input = if first {
        None
    } else {
        Some(BatchNormKeys::build(gb, stream, name, BnSlot::Input, params.num_filt)?)
    };
    let conv1_weights = gb.weight(
        WeightKey::new(stream, name, WeightRole::Conv1Weights),
        &kernel_shape,
        init.clone(),
    )?;
    let conv1_bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Conv1Bias),
        &[params.num_filt],
        init.clone(),
    )?;
    let bn_hidden = BatchNormKeys::build(gb, stream, name, BnSlot::Hidden, params.num_filt)?;
    let conv2_weights = gb.weight(
        WeightKey::new(stream, name, WeightRole::Conv2Weights),
        &kernel_shape,
        init.clone(),
    )?;
    let conv2_bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Conv2Bias),
        &[params.num_filt],
        init,
    )?;
    debug!(
        "Create residual block {} with filter {}x{} on {:?}, first in run: {}.",
        name, params.filt_dim, params.filt_dim, actual, first
    );

    let layer = ResidualLayer {
        name: name.to_owned(),
        bn_input,
        conv1_weights,
        conv1_bias,
        bn_hidden,
        conv2_weights,
        conv2_bias,
    };
    let node = gb.push(Box::new(layer), vec![input.node]);
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: input.shape,
    })
}
