use super::MergeMode;
use crate::config::NetworkConfig;
use crate::geometry::StreamShape;
use crate::layers::{ComputeOnHost, ImageSampler, Layer, Runtime};
use crate::weights::{Initializer, WeightKey, WeightSpec, WeightTransaction};
use crate::{Error, Result, Tensor};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a node in a [`Network`].
pub type NodeId = usize;

/// The placeholders fed from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Pose,
    Gripper,
}

#[derive(Debug)]
pub(crate) enum Node {
    Input(InputKind),
    Op {
        layer: Box<dyn ComputeOnHost>,
        inputs: Vec<NodeId>,
    },
}

/// The batch tensors bound to the input nodes for one forward pass.
#[derive(Debug, Clone, Copy)]
pub struct Feeds<'a> {
    pub image: &'a Tensor,
    pub pose: &'a Tensor,
    pub gripper: Option<&'a Tensor>,
}

/// The result of building a stream: its last node and the shape flowing out of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOutput {
    pub node: NodeId,
    pub shape: StreamShape,
}

/// A built inference graph. Nodes are stored in topological order, so evaluating them in
/// index order is always valid.
#[derive(Debug)]
pub struct Network {
    nodes: Vec<Node>,
    features: HashMap<String, NodeId>,
    output: NodeId,
    output_shape: Vec<usize>,
    layer_weights: HashMap<String, Vec<WeightSpec>>,
    merge_mode: MergeMode,
}

impl Network {
    pub fn output(&self) -> NodeId {
        self.output
    }
    /// Per-example shape of the network output.
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }
    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
    /// Looks up the node whose output is registered under a layer name.
    pub fn feature(&self, name: &str) -> Option<NodeId> {
        self.features.get(name).cloned()
    }
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|s| s.as_str())
    }
    /// Every weight a layer owns, with what is needed to re-initialize it.
    pub fn layer_weights(&self, name: &str) -> Option<&[WeightSpec]> {
        self.layer_weights.get(name).map(|v| v.as_slice())
    }
    /// Whether the graph reads the gripper placeholder.
    pub fn uses_gripper_input(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, Node::Input(InputKind::Gripper)))
    }

    /// Evaluates the nodes up to and including `target` and returns the output of `target`.
    pub fn run(&self, feeds: &Feeds, target: NodeId, rt: &mut Runtime) -> Result<Tensor> {
        if target >= self.nodes.len() {
            return Err(Error::State(format!(
                "node {} does not exist in a graph of {} nodes",
                target,
                self.nodes.len()
            )));
        }
        let mut values: Vec<Cow<Tensor>> = Vec::with_capacity(target + 1);
        for node in &self.nodes[..=target] {
            let value = match node {
                Node::Input(InputKind::Image) => Cow::Borrowed(feeds.image),
                Node::Input(InputKind::Pose) => Cow::Borrowed(feeds.pose),
                Node::Input(InputKind::Gripper) => Cow::Borrowed(feeds.gripper.ok_or_else(|| {
                    Error::State("the network requires gripper parameters".to_owned())
                })?),
                Node::Op { layer, inputs } => {
                    let args = inputs.iter().map(|&i| &*values[i]).collect::<Vec<_>>();
                    trace!("Computing {} layer {}.", layer.kind(), layer.name());
                    Cow::Owned(layer.compute(&args, rt)?)
                }
            };
            values.push(value);
        }
        values
            .pop()
            .map(Cow::into_owned)
            .ok_or_else(|| Error::State("empty graph".to_owned()))
    }
}

/// Assembles a [`Network`] while staging its weights in a transaction.
pub(crate) struct GraphBuilder<'a> {
    config: &'a NetworkConfig,
    weights: WeightTransaction<'a>,
    sampler: Arc<dyn ImageSampler>,
    nodes: Vec<Node>,
    features: HashMap<String, NodeId>,
    layer_weights: HashMap<String, Vec<WeightSpec>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        config: &'a NetworkConfig,
        weights: WeightTransaction<'a>,
        sampler: Arc<dyn ImageSampler>,
    ) -> GraphBuilder<'a> {
        GraphBuilder {
            config,
            weights,
            sampler,
            nodes: Vec::new(),
            features: HashMap::new(),
            layer_weights: HashMap::new(),
        }
    }
    pub fn config(&self) -> &'a NetworkConfig {
        self.config
    }
    pub fn sampler(&self) -> Arc<dyn ImageSampler> {
        Arc::clone(&self.sampler)
    }

    pub fn input(&mut self, kind: InputKind, shape: StreamShape) -> StreamOutput {
        self.nodes.push(Node::Input(kind));
        StreamOutput {
            node: self.nodes.len() - 1,
            shape,
        }
    }

    /// Creates (or reuses) a trainable weight and records it for re-initialization.
    pub fn weight(
        &mut self,
        key: WeightKey,
        shape: &[usize],
        init: Initializer,
    ) -> Result<WeightKey> {
        self.weights.get_or_create(key.clone(), shape, &init)?;
        self.layer_weights
            .entry(key.layer.clone())
            .or_insert_with(Vec::new)
            .push(WeightSpec {
                key: key.clone(),
                shape: shape.to_vec(),
                init,
            });
        Ok(key)
    }

    /// Stages a weight computed from other weights. It is always recomputed on build.
    pub fn derived_weight(&mut self, key: WeightKey, tensor: Tensor) -> WeightKey {
        self.weights.derive(key.clone(), tensor);
        key
    }

    pub fn tensor(&self, key: &WeightKey) -> Result<&Tensor> {
        self.weights
            .get(key)
            .ok_or_else(|| Error::MissingWeight(key.to_string()))
    }

    pub fn push(&mut self, layer: Box<dyn ComputeOnHost>, inputs: Vec<NodeId>) -> NodeId {
        self.nodes.push(Node::Op { layer, inputs });
        self.nodes.len() - 1
    }

    /// Makes the output of `node` available for feature extraction under `name`.
    pub fn register_feature(&mut self, name: &str, node: NodeId) {
        self.features.insert(name.to_owned(), node);
    }

    /// Finalizes the graph. The returned transaction still has to be committed.
    pub fn finish(
        self,
        output: NodeId,
        output_shape: Vec<usize>,
        merge_mode: MergeMode,
    ) -> (Network, WeightTransaction<'a>) {
        let network = Network {
            nodes: self.nodes,
            features: self.features,
            output,
            output_shape,
            layer_weights: self.layer_weights,
            merge_mode,
        };
        (network, self.weights)
    }
}
