use super::fully_conv::build_fully_conv_merge;
use super::{ComputeOnHost, Layer, Runtime};
use crate::geometry::StreamShape;
use crate::math::{dropout, flatten, leaky_relu_inplace};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::streams::invalid_layer;
use crate::network::StreamKind;
use crate::weights::{Initializer, WeightKey, WeightRole};
use crate::{Error, Result, Tensor};
use ndarray::Array2;

/// Joins two or three streams: `act(sum_i x_i · W_i + b)` followed by dropout.
#[derive(Debug)]
pub struct MergeLayer {
    name: String,
    input_weights: Vec<WeightKey>,
    bias: WeightKey,
}

impl Layer for MergeLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "fc_merge"
    }
}

impl ComputeOnHost for MergeLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        if inputs.len() != self.input_weights.len() {
            return Err(Error::State(format!(
                "merge layer {} expects {} inputs, got {}",
                self.name,
                self.input_weights.len(),
                inputs.len()
            )));
        }
        let mut acc: Option<Array2<f32>> = None;
        for (input, key) in inputs.iter().zip(&self.input_weights) {
            let product = flatten(input.view())?.dot(&rt.weights.view2(key)?);
            acc = Some(match acc {
                Some(sum) => sum + &product,
                None => product,
            });
        }
        let mut out = acc
            .ok_or_else(|| Error::State(format!("merge layer {} has no inputs", self.name)))?;
        out += &rt.weights.view1(&self.bias)?;
        leaky_relu_inplace(&mut out);
        dropout(&mut out, rt.drop_rate, &mut *rt.rng);
        Ok(out.into_dyn())
    }
}

/// Creates the per-input weights of a merge. All of them and the shared bias use the
/// deviation of the summed fan-in.
pub(crate) fn merge_weights(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    out_size: usize,
    inputs: &[StreamOutput],
) -> Result<(Vec<WeightKey>, WeightKey)> {
    let total_fan_in = inputs.iter().map(|i| i.shape.fan_in()).sum::<usize>();
    let init = Initializer::fan_in(total_fan_in);
    let mut input_weights = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        input_weights.push(gb.weight(
            WeightKey::new(stream, name, WeightRole::InputWeights(i as u8 + 1)),
            &[input.shape.fan_in(), out_size],
            init.clone(),
        )?);
    }
    let bias = gb.weight(
        WeightKey::new(stream, name, WeightRole::Bias),
        &[out_size],
        init,
    )?;
    Ok((input_weights, bias))
}

pub(crate) fn build_merge(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    out_size: usize,
    inputs: &[StreamOutput],
) -> Result<StreamOutput> {
    if inputs.len() < 2 || inputs.len() > 3 {
        return Err(invalid_layer(
            stream,
            name,
            format!("merge takes two or three inputs, got {}", inputs.len()),
        ));
    }
    if gb.config().is_fully_conv() && inputs[0].shape.is_spatial() {
        return build_fully_conv_merge(gb, stream, name, out_size, inputs);
    }
    info!("Building merge layer: {}", name);

    let (input_weights, bias) = merge_weights(gb, stream, name, out_size, inputs)?;
    debug!(
        "Create merge-layer {} with inputs: {:?}, output: {}.",
        name,
        inputs.iter().map(|i| i.shape.fan_in()).collect::<Vec<_>>(),
        out_size
    );
    let layer = MergeLayer {
        name: name.to_owned(),
        input_weights,
        bias,
    };
    let node = gb.push(Box::new(layer), inputs.iter().map(|i| i.node).collect());
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::Flat(out_size),
    })
}
