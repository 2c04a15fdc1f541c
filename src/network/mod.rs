//! The grasp-quality network: graph construction, sessions and batched inference.
mod builder;
pub(crate) mod graph;
mod normalization;
mod session;
pub(crate) mod streams;

pub use self::builder::{build_network, MergeMode};
pub use self::graph::{Feeds, InputKind, Network, NodeId, StreamOutput};
pub use self::normalization::NormalizationParams;
pub use self::streams::StreamKind;
use self::session::Session;
use crate::config::{FullyConvConfig, ModelDescriptor, NetworkConfig, TrainingMode};
use crate::layers::{BilinearSampler, ImageSampler, Runtime};
use crate::weights::WeightStore;
use crate::{Error, Result, Tensor};
use itertools::Itertools;
use ndarray::{concatenate, s, ArrayView2, ArrayView4, Axis, IxDyn, Slice};
use std::path::Path;
use std::sync::Arc;

/// Name of the network configuration inside a model directory.
pub const CONFIG_FILE: &str = "config.json";
/// Name of the weight checkpoint inside a model directory.
pub const CHECKPOINT_FILE: &str = "model.ckpt";

/// A grasp-quality CNN: configuration, weights, normalization statistics, the built graph
/// and the optional open session.
#[derive(Debug)]
pub struct Gqcnn {
    config: NetworkConfig,
    training_mode: Option<TrainingMode>,
    weights: WeightStore,
    normalization: NormalizationParams,
    sampler: Arc<dyn ImageSampler>,
    network: Option<Network>,
    add_softmax: bool,
    session: Option<Session>,
    batch_size: usize,
    drop_rate: f32,
}

impl Gqcnn {
    /// Creates an unbuilt model with an empty weight store and identity normalization.
    pub fn new(config: NetworkConfig) -> Gqcnn {
        Gqcnn::with_weights(config, WeightStore::new())
    }

    pub fn with_weights(config: NetworkConfig, weights: WeightStore) -> Gqcnn {
        Gqcnn {
            normalization: NormalizationParams::for_config(&config),
            batch_size: config.batch_size(),
            config,
            training_mode: None,
            weights,
            sampler: Arc::new(BilinearSampler),
            network: None,
            add_softmax: false,
            session: None,
            drop_rate: 0.0,
        }
    }

    /// Loads a trained model directory: the configuration, the checkpoint and the
    /// normalization statistics. Classifiers get a softmax output.
    pub fn load<P: AsRef<Path>>(
        model_dir: P,
        fully_conv: Option<FullyConvConfig>,
    ) -> Result<Gqcnn> {
        let dir = model_dir.as_ref();
        info!("Loading model from {}", dir.display());
        let descriptor = ModelDescriptor::from_file(dir.join(CONFIG_FILE))?;
        let training_mode = descriptor.training_mode;
        let config = NetworkConfig::new(descriptor.gqcnn_config, fully_conv)?;

        let mut gqcnn = Gqcnn::new(config);
        gqcnn.training_mode = Some(training_mode);
        gqcnn.init_weights_file(dir.join(CHECKPOINT_FILE))?;
        gqcnn.initialize_network(training_mode == TrainingMode::Classification)?;
        gqcnn.init_mean_and_std(dir)?;
        Ok(gqcnn)
    }

    /// Replaces the weights with the contents of a checkpoint file. If the checkpoint does
    /// not fit the built graph, the previous weights are restored.
    pub fn init_weights_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let loaded = WeightStore::read_checkpoint_entries(path)?;
        let previous = self.weights.replace_entries(loaded);
        if let Err(err) = self.rebuild() {
            warn!("Checkpoint does not fit the network, keeping previous weights");
            self.weights.replace_entries(previous);
            return Err(err);
        }
        Ok(())
    }

    pub fn save_weights_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.weights.save_checkpoint(path)
    }

    /// Reads the normalization statistics of a model directory.
    pub fn init_mean_and_std<P: AsRef<Path>>(&mut self, model_dir: P) -> Result<()> {
        self.normalization = NormalizationParams::load(model_dir, &self.config)?;
        Ok(())
    }

    /// Builds the inference graph, creating any weight the store does not hold yet. On
    /// failure the previous graph and the weights stay as they were.
    pub fn initialize_network(&mut self, add_softmax: bool) -> Result<()> {
        let network = build_network(
            &self.config,
            &mut self.weights,
            Arc::clone(&self.sampler),
            add_softmax,
        )?;
        self.network = Some(network);
        self.add_softmax = add_softmax;
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        if self.network.is_some() {
            self.initialize_network(self.add_softmax)?;
        }
        Ok(())
    }

    /// Allocates the scratch buffers used by [`predict`](Gqcnn::predict).
    pub fn open_session(&mut self) -> Result<()> {
        if self.network.is_none() {
            return Err(Error::State(
                "network must be initialized before opening a session".to_owned(),
            ));
        }
        if self.session.is_some() {
            return Err(Error::State("a session is already open".to_owned()));
        }
        self.session = Some(Session::new(&self.config, self.batch_size));
        info!("Opened session with batch size {}", self.batch_size);
        Ok(())
    }

    pub fn close_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(_) => {
                info!("Closed session");
                Ok(())
            }
            None => Err(Error::State("no session is open".to_owned())),
        }
    }

    pub fn has_open_session(&self) -> bool {
        self.session.is_some()
    }

    /// Predicts grasp quality for `N` images with their poses and, when the network takes
    /// them, gripper parameters. Requires an open session. The result has `N` rows.
    pub fn predict(
        &mut self,
        images: ArrayView4<f32>,
        poses: ArrayView2<f32>,
        grippers: Option<ArrayView2<f32>>,
    ) -> Result<Tensor> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| Error::State("network has not been initialized".to_owned()))?;
        check_inputs(&self.config, &images, &poses, grippers.as_ref())?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::State("predict requires an open session".to_owned()))?;

        let num_examples = images.dim().0;
        let mut result: Option<Tensor> = None;
        let ctx = BatchContext {
            network,
            weights: &self.weights,
            normalization: &self.normalization,
            depth_mask: self.config.uses_gripper_depth_mask(),
            drop_rate: self.drop_rate,
        };
        ctx.run(
            session,
            network.output(),
            images,
            poses,
            grippers,
            |start, dim, output| {
                let result = result.get_or_insert_with(|| {
                    let mut shape = output.shape().to_vec();
                    shape[0] = num_examples;
                    Tensor::zeros(IxDyn(&shape))
                });
                result
                    .slice_axis_mut(Axis(0), Slice::from(start..start + dim))
                    .assign(&output.slice_axis(Axis(0), Slice::from(0..dim)));
                Ok(())
            },
        )?;

        Ok(result.unwrap_or_else(|| {
            let shape = std::iter::once(0)
                .chain(network.output_shape().iter().cloned())
                .collect::<Vec<_>>();
            Tensor::zeros(IxDyn(&shape))
        }))
    }

    /// Computes the activations of the layer named `feature_layer` for every example. Opens
    /// a transient session if none is open and closes it again on every path.
    pub fn featurize(
        &mut self,
        images: ArrayView4<f32>,
        poses: ArrayView2<f32>,
        grippers: Option<ArrayView2<f32>>,
        feature_layer: &str,
    ) -> Result<Tensor> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| Error::State("network has not been initialized".to_owned()))?;
        let target = network
            .feature(feature_layer)
            .ok_or_else(|| Error::UnknownFeature(feature_layer.to_owned()))?;
        check_inputs(&self.config, &images, &poses, grippers.as_ref())?;

        let transient = self.session.is_none();
        if transient {
            debug!("Opening a transient session for featurization.");
            self.session = Some(Session::new(&self.config, self.batch_size));
        }
        let result = self.featurize_open(target, images, poses, grippers);
        if transient {
            self.session = None;
        }
        result
    }

    fn featurize_open(
        &mut self,
        target: NodeId,
        images: ArrayView4<f32>,
        poses: ArrayView2<f32>,
        grippers: Option<ArrayView2<f32>>,
    ) -> Result<Tensor> {
        let (network, session) = match (self.network.as_ref(), self.session.as_mut()) {
            (Some(network), Some(session)) => (network, session),
            _ => return Err(Error::State("featurize requires a built network".to_owned())),
        };
        let num_examples = images.dim().0;
        let mut chunks = Vec::new();
        let ctx = BatchContext {
            network,
            weights: &self.weights,
            normalization: &self.normalization,
            depth_mask: self.config.uses_gripper_depth_mask(),
            drop_rate: self.drop_rate,
        };
        ctx.run(session, target, images, poses, grippers, |_, _, output| {
            chunks.push(output);
            Ok(())
        })?;
        if chunks.is_empty() {
            return Ok(Tensor::zeros(IxDyn(&[0])));
        }
        let views = chunks.iter().map(|c| c.view()).collect::<Vec<_>>();
        let features = concatenate(Axis(0), &views)?;
        Ok(features
            .slice_axis(Axis(0), Slice::from(0..num_examples))
            .to_owned())
    }

    /// Re-initializes every weight of the named layers, eg. for fine-tuning a new head.
    pub fn reinitialize_layers(&mut self, layers: &[&str]) -> Result<()> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| Error::State("network has not been initialized".to_owned()))?;
        let mut specs = Vec::new();
        for &name in layers {
            let layer_specs = network
                .layer_weights(name)
                .ok_or_else(|| Error::UnknownLayer(name.to_owned()))?;
            specs.extend_from_slice(layer_specs);
        }
        self.weights.reinitialize(&specs)?;
        self.rebuild()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
    pub fn training_mode(&self) -> Option<TrainingMode> {
        self.training_mode
    }
    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }
    pub fn weights(&self) -> &WeightStore {
        &self.weights
    }
    /// Direct access to the weights. Derived fully convolutional kernels are refreshed only
    /// by [`initialize_network`](Gqcnn::initialize_network).
    pub fn weights_mut(&mut self) -> &mut WeightStore {
        &mut self.weights
    }
    pub fn normalization(&self) -> &NormalizationParams {
        &self.normalization
    }
    pub fn normalization_mut(&mut self) -> &mut NormalizationParams {
        &mut self.normalization
    }
    pub fn set_normalization(&mut self, normalization: NormalizationParams) -> Result<()> {
        let expected = NormalizationParams::for_config(&self.config);
        if normalization.pose_mean().len() != expected.pose_mean().len()
            || normalization.gripper_mean().len() != expected.gripper_mean().len()
        {
            return Err(Error::ShapeMismatch(format!(
                "normalization for pose dim {} and gripper dim {} required",
                self.config.pose_dim(),
                self.config.gripper_dim()
            )));
        }
        self.normalization = normalization;
        Ok(())
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
    /// Changes the inference batch size, reallocating the buffers of an open session.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::Config("batch size must be positive".to_owned()));
        }
        self.batch_size = batch_size;
        if self.session.is_some() {
            self.session = Some(Session::new(&self.config, batch_size));
        }
        Ok(())
    }
    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }
    /// Sets the dropout rate applied at inference. Zero makes inference deterministic.
    pub fn set_drop_rate(&mut self, drop_rate: f32) -> Result<()> {
        if !(0.0..1.0).contains(&drop_rate) {
            return Err(Error::Config(format!(
                "drop rate must be in [0, 1), got {}",
                drop_rate
            )));
        }
        self.drop_rate = drop_rate;
        Ok(())
    }
    /// Replaces the spatial transformer sampler and rebuilds a built network with it.
    pub fn set_image_sampler(&mut self, sampler: Arc<dyn ImageSampler>) -> Result<()> {
        self.sampler = sampler;
        self.rebuild()
    }
    /// Per-example output shape of the built network.
    pub fn output_shape(&self) -> Option<&[usize]> {
        self.network.as_ref().map(|n| n.output_shape())
    }
    pub fn merge_mode(&self) -> MergeMode {
        MergeMode::of(&self.config)
    }
    /// Names usable with [`featurize`](Gqcnn::featurize), sorted.
    pub fn feature_names(&self) -> Vec<String> {
        self.network
            .iter()
            .flat_map(|n| n.feature_names())
            .map(|s| s.to_owned())
            .sorted()
            .collect()
    }
}

/// Borrowed state shared by every chunk of a batched run.
struct BatchContext<'a> {
    network: &'a Network,
    weights: &'a WeightStore,
    normalization: &'a NormalizationParams,
    depth_mask: bool,
    drop_rate: f32,
}

impl<'a> BatchContext<'a> {
    /// Evaluates `target` for consecutive chunks of the session's batch size, in order, and
    /// hands each chunk output with its start row and row count to `on_chunk`.
    fn run<F>(
        &self,
        session: &mut Session,
        target: NodeId,
        images: ArrayView4<f32>,
        poses: ArrayView2<f32>,
        grippers: Option<ArrayView2<f32>>,
        mut on_chunk: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, Tensor) -> Result<()>,
    {
        let num_examples = images.dim().0;
        let batch_size = session.batch_size();
        let mut start = 0;
        let mut chunk = 0;
        while start < num_examples {
            let dim = batch_size.min(num_examples - start);
            let end = start + dim;
            debug!("Predicting batch {} (examples {}..{})", chunk, start, end);
            session.load_chunk(
                self.normalization,
                images.slice(s![start..end, .., .., ..]),
                poses.slice(s![start..end, ..]),
                grippers.map(|g| g.slice_move(s![start..end, ..])),
                self.depth_mask,
            )?;
            let (feeds, rng) = session.feeds_and_rng();
            let mut rt = Runtime {
                weights: self.weights,
                drop_rate: self.drop_rate,
                rng,
            };
            let output = self.network.run(&feeds, target, &mut rt)?;
            on_chunk(start, dim, output)?;
            start = end;
            chunk += 1;
        }
        Ok(())
    }
}

fn check_inputs(
    config: &NetworkConfig,
    images: &ArrayView4<f32>,
    poses: &ArrayView2<f32>,
    grippers: Option<&ArrayView2<f32>>,
) -> Result<()> {
    let (num_images, height, width, channels) = images.dim();
    let expected = config.input_geometry();
    if [height, width, channels] != expected.shape() {
        return Err(Error::ShapeMismatch(format!(
            "images are {}x{}x{}, the network takes {}x{}x{}",
            height,
            width,
            channels,
            expected.height(),
            expected.width(),
            expected.channels()
        )));
    }
    let (num_poses, pose_dim) = poses.dim();
    if num_poses != num_images {
        return Err(Error::ShapeMismatch(format!(
            "got {} images but {} poses",
            num_images, num_poses
        )));
    }
    if pose_dim != config.pose_dim() {
        return Err(Error::ShapeMismatch(format!(
            "poses have {} components, pose mode {} needs {}",
            pose_dim,
            config.input_pose_mode(),
            config.pose_dim()
        )));
    }
    match (config.gripper_dim(), grippers) {
        (0, None) => Ok(()),
        (0, Some(_)) => Err(Error::ShapeMismatch(
            "gripper parameters given, but the network takes none".to_owned(),
        )),
        (dim, None) => Err(Error::ShapeMismatch(format!(
            "the network requires {} gripper parameters per example",
            dim
        ))),
        (dim, Some(grippers)) => {
            let (num_grippers, gripper_dim) = grippers.dim();
            if num_grippers != num_images {
                Err(Error::ShapeMismatch(format!(
                    "got {} images but {} gripper parameter rows",
                    num_images, num_grippers
                )))
            } else if gripper_dim != dim {
                Err(Error::ShapeMismatch(format!(
                    "gripper parameters have {} components, gripper mode {} needs {}",
                    gripper_dim,
                    config.input_gripper_mode(),
                    dim
                )))
            } else {
                Ok(())
            }
        }
    }
}
