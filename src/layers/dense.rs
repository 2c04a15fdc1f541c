use super::fully_conv::build_fully_conv;
use super::{ComputeOnHost, Layer, Runtime};
use crate::geometry::StreamShape;
use crate::math::{affine, dropout, flatten, leaky_relu_inplace};
use crate::network::graph::{GraphBuilder, StreamOutput};
use crate::network::StreamKind;
use crate::weights::{Initializer, WeightKey, WeightRole};
use crate::{Result, Tensor};

/// The flavours of single-input dense layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseKind {
    /// Fully-connected, on the image stream or after a merge
    Fc,
    /// Pose-connected
    Pc,
    /// Gripper-connected
    Gc,
}

impl DenseKind {
    pub fn tag(self) -> &'static str {
        match self {
            DenseKind::Fc => "fc",
            DenseKind::Pc => "pc",
            DenseKind::Gc => "gc",
        }
    }
    fn uses_dropout(self) -> bool {
        self == DenseKind::Fc
    }
}

/// `x · W + b` on the flattened input, followed by the leaky rectifier unless the layer is
/// terminal. Fully-connected layers also apply dropout.
#[derive(Debug)]
pub struct DenseLayer {
    name: String,
    kind: DenseKind,
    weights: WeightKey,
    bias: WeightKey,
    activation: bool,
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        self.kind.tag()
    }
}

impl ComputeOnHost for DenseLayer {
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor> {
        let flat = flatten(inputs[0].view())?;
        let mut out = affine(
            flat.view(),
            rt.weights.view2(&self.weights)?,
            rt.weights.view1(&self.bias)?,
        );
        if self.activation {
            leaky_relu_inplace(&mut out);
        }
        if self.kind.uses_dropout() {
            dropout(&mut out, rt.drop_rate, &mut *rt.rng);
        }
        Ok(out.into_dyn())
    }
}

/// Builds a dense layer. A terminal layer starts with a zero bias and has no activation.
pub(crate) fn build_dense(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    name: &str,
    kind: DenseKind,
    out_size: usize,
    input: StreamOutput,
    terminal: bool,
) -> Result<StreamOutput> {
    if kind == DenseKind::Fc && gb.config().is_fully_conv() && input.shape.is_spatial() {
        return build_fully_conv(gb, stream, name, out_size, input, terminal);
    }
    match kind {
        DenseKind::Fc => info!("Building fully connected layer: {}", name),
        DenseKind::Pc => info!("Building pose layer: {}", name),
        DenseKind::Gc => info!("Building gripper layer: {}", name),
    }

    let fan_in = input.shape.fan_in();
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
    debug!(
        "Create {}-layer {} with input: {}, output: {}, terminal: {}.",
        kind.tag(),
        name,
        fan_in,
        out_size,
        terminal
    );

    let layer = DenseLayer {
        name: name.to_owned(),
        kind,
        weights,
        bias,
        activation: !terminal,
    };
    let node = gb.push(Box::new(layer), vec![input.node]);
    gb.register_feature(name, node);
    Ok(StreamOutput {
        node,
        shape: StreamShape::Flat(out_size),
    })
}
