use super::graph::{GraphBuilder, InputKind, Network};
use super::streams::{compose, compose_merge};
use super::StreamKind;
use crate::config::NetworkConfig;
use crate::geometry::StreamShape;
use crate::layers::{ImageSampler, SoftmaxLayer};
use crate::weights::WeightStore;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// How the image, pose and gripper streams are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// No gripper input: the merge stream joins image and pose.
    ImagePose,
    /// The merge stream starts with a three-way merge of image, pose and gripper.
    ImagePoseGripper,
    /// Pose and gripper are first joined by the gripper-pose merge stream, whose output is
    /// then merged with the image.
    PremergedGripperPose,
}

impl MergeMode {
    pub fn of(config: &NetworkConfig) -> MergeMode {
        if config.gripper_dim() == 0 {
            MergeMode::ImagePose
        } else if config.architecture().gripper_pose_merge_stream.is_some() {
            MergeMode::PremergedGripperPose
        } else {
            MergeMode::ImagePoseGripper
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MergeMode::ImagePose => "image + pose",
            MergeMode::ImagePoseGripper => "image + pose + gripper",
            MergeMode::PremergedGripperPose => "image + (pose + gripper)",
        };
        f.write_str(s)
    }
}

/// Builds the inference graph described by `config`, creating missing weights in `weights`.
///
/// Weights are staged while building and committed only when the whole graph was built, so
/// a failed build leaves `weights` untouched.
pub fn build_network(
    config: &NetworkConfig,
    weights: &mut WeightStore,
    sampler: Arc<dyn ImageSampler>,
    add_softmax: bool,
) -> Result<Network> {
    let mode = MergeMode::of(config);
    let arch = config.architecture();
    info!("Building network with merge mode {}", mode);

    let mut gb = GraphBuilder::new(config, weights.transaction(), sampler);

    info!("Building image stream");
    let image = gb.input(
        InputKind::Image,
        StreamShape::Spatial {
            actual: config.input_geometry(),
            train: config.train_geometry(),
        },
    );
    let image = compose(&mut gb, StreamKind::Image, &arch.im_stream, image)?;

    info!("Building pose stream");
    let pose = gb.input(InputKind::Pose, StreamShape::Flat(config.pose_dim()));
    let pose = compose(&mut gb, StreamKind::Pose, &arch.pose_stream, pose)?;

    let merged = match mode {
        MergeMode::ImagePose => {
            info!("Building merge stream");
            compose_merge(&mut gb, StreamKind::Merge, &arch.merge_stream, &[image, pose])?
        }
        MergeMode::ImagePoseGripper | MergeMode::PremergedGripperPose => {
            let gripper_stream = arch.gripper_stream.as_ref().ok_or_else(|| {
                Error::Config("gripper input is configured without a gripper_stream".to_owned())
            })?;
            info!("Building gripper stream");
            let gripper = gb.input(InputKind::Gripper, StreamShape::Flat(config.gripper_dim()));
            let gripper = compose(&mut gb, StreamKind::Gripper, gripper_stream, gripper)?;

            match &arch.gripper_pose_merge_stream {
                Some(premerge) if mode == MergeMode::PremergedGripperPose => {
                    info!("Building gripper pose merge stream");
                    let gripper_pose = compose_merge(
                        &mut gb,
                        StreamKind::GripperPoseMerge,
                        premerge,
                        &[pose, gripper],
                    )?;
                    info!("Building merge stream");
                    compose_merge(
                        &mut gb,
                        StreamKind::Merge,
                        &arch.merge_stream,
                        &[image, gripper_pose],
                    )?
                }
                _ => {
                    info!("Building merge stream");
                    compose_merge(
                        &mut gb,
                        StreamKind::Merge,
                        &arch.merge_stream,
                        &[image, pose, gripper],
                    )?
                }
            }
        }
    };

    let output = if add_softmax {
        info!("Building softmax layer");
        gb.push(Box::new(SoftmaxLayer::new("softmax")), vec![merged.node])
    } else {
        merged.node
    };
    let (network, transaction) = gb.finish(output, merged.shape.dims(), mode);
    let created = transaction.commit();
    info!(
        "Built network of {} nodes with output shape {:?}, {} new weight tensors",
        network.num_nodes(),
        network.output_shape(),
        created
    );
    Ok(network)
}
