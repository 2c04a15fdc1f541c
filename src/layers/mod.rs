//! The layer library. Every layer is a node of the inference graph that reads its parameters
//! from the weight store at compute time, and every layer type has a builder that creates its
//! weights and appends it to a graph under construction.
mod conv;
mod dense;
mod fully_conv;
mod merge;
mod residual;
mod softmax;
mod spatial_transformer;

pub use self::conv::ConvLayer;
pub use self::dense::{DenseKind, DenseLayer};
pub use self::fully_conv::{FullyConvLayer, FullyConvMergeLayer};
pub use self::merge::MergeLayer;
pub use self::residual::ResidualLayer;
pub use self::softmax::SoftmaxLayer;
pub use self::spatial_transformer::{
    BilinearSampler, ImageSampler, SpatialTransformerLayer, AFFINE_PARAMS,
};
pub(crate) use self::conv::build_conv;
pub(crate) use self::dense::build_dense;
pub(crate) use self::merge::build_merge;
pub(crate) use self::residual::build_residual;
pub(crate) use self::spatial_transformer::build_spatial_transformer;
use crate::weights::WeightStore;
use crate::{Result, Tensor};
use rand::rngs::StdRng;
use std::fmt::Debug;

/// Describes a layer of the grasp-quality network.
pub trait Layer: Debug {
    /// The name of the layer in the architecture, eg. `conv1_1`.
    fn name(&self) -> &str;
    /// Short type tag used in logs.
    fn kind(&self) -> &'static str;
}

/// A layer that can be evaluated on the host CPU.
pub trait ComputeOnHost: Layer {
    /// Computes the output for a batch. `inputs` are the outputs of the layer's input nodes, in
    /// the order they were given at build time.
    fn compute(&self, inputs: &[&Tensor], rt: &mut Runtime) -> Result<Tensor>;
}

/// Everything a layer may need besides its inputs during a forward pass.
pub struct Runtime<'a> {
    pub weights: &'a WeightStore,
    /// Dropout rate; zero disables dropout entirely
    pub drop_rate: f32,
    pub rng: &'a mut StdRng,
}
