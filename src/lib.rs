//! # gqcnn
//!
//! Grasp-quality convolutional network: predicts the probability of grasp success from a
//! depth image, a gripper pose and optional gripper parameters.
//!
//! The network is assembled from a declarative architecture (see [`Architecture`]) made of
//! per-stream layer lists. The image, pose and optional gripper streams are built
//! independently and joined by merge streams. Inference runs in fixed-size batches through an
//! explicitly opened session.
//!
//! ```ignore
//! use gqcnn::Gqcnn;
//!
//! let mut net = Gqcnn::load("models/GQCNN-2.0", None)?;
//! net.open_session()?;
//! let scores = net.predict(images.view(), poses.view(), None)?;
//! net.close_session()?;
//! ```
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod config;
pub mod geometry;
pub mod layers;
pub mod math;
pub mod network;
pub mod util;
pub mod weights;
#[cfg(test)]
mod tests;

pub use crate::config::{
    Architecture, FullyConvConfig, InputGripperMode, InputPoseMode, LayerKind, LayerSpec,
    ModelDescriptor, NetworkConfig, StreamSpec, TrainingMode,
};
pub use crate::layers::{BilinearSampler, ImageSampler};
pub use crate::network::{Gqcnn, MergeMode, Network, NormalizationParams, StreamKind};
pub use crate::weights::{Initializer, WeightKey, WeightRole, WeightStore};

/// Dense n-dimensional tensor used for weights, activations and outputs. Spatial tensors are
/// laid out as NHWC.
pub type Tensor = ndarray::ArrayD<f32>;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid architecture: layer '{layer}' in {stream}: {reason}")]
    InvalidArchitecture {
        stream: String,
        layer: String,
        reason: String,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("feature layer '{0}' not recognized")]
    UnknownFeature(String),

    #[error("layer '{0}' not found in the built network")]
    UnknownLayer(String),

    #[error("weight '{0}' is not present in the weight store")]
    MissingWeight(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[error("npy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, Error>;
