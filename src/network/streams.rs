//! Walks the ordered layer list of a stream, enforcing which layers may appear where.
use super::graph::{GraphBuilder, StreamOutput};
use crate::config::{LayerKind, LayerSpec, StreamSpec};
use crate::layers::{
    build_conv, build_dense, build_merge, build_residual, build_spatial_transformer, DenseKind,
};
use crate::{Error, Result};
use std::fmt;

/// The independent sub-pipelines of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Image,
    Pose,
    Gripper,
    GripperPoseMerge,
    Merge,
}

impl StreamKind {
    /// The name of the stream in the architecture and the prefix of its persisted weights.
    pub fn scope_name(self) -> &'static str {
        match self {
            StreamKind::Image => "im_stream",
            StreamKind::Pose => "pose_stream",
            StreamKind::Gripper => "gripper_stream",
            StreamKind::GripperPoseMerge => "gripper_pose_merge_stream",
            StreamKind::Merge => "merge_stream",
        }
    }
    pub fn from_scope_name(name: &str) -> Option<StreamKind> {
        match name {
            "im_stream" => Some(StreamKind::Image),
            "pose_stream" => Some(StreamKind::Pose),
            "gripper_stream" => Some(StreamKind::Gripper),
            "gripper_pose_merge_stream" => Some(StreamKind::GripperPoseMerge),
            "merge_stream" => Some(StreamKind::Merge),
            _ => None,
        }
    }
    pub fn is_merge(self) -> bool {
        match self {
            StreamKind::GripperPoseMerge | StreamKind::Merge => true,
            _ => false,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.scope_name())
    }
}

pub(crate) fn invalid_layer<S: Into<String>>(stream: StreamKind, layer: &str, reason: S) -> Error {
    Error::InvalidArchitecture {
        stream: stream.scope_name().to_owned(),
        layer: layer.to_owned(),
        reason: reason.into(),
    }
}

/// Checks a whole stream without building anything.
pub(crate) fn check_stream(stream: StreamKind, spec: &StreamSpec) -> Result<()> {
    if stream.is_merge() && spec.is_empty() {
        return Err(invalid_layer(stream, "", "merge stream must not be empty"));
    }
    let mut seen_fc = false;
    for (position, layer) in spec.iter().enumerate() {
        check_layer(stream, layer, position, seen_fc)?;
        seen_fc |= matches!(layer.kind, LayerKind::Fc(_));
    }
    Ok(())
}

/// Checks that `layer` may appear at `position` of `stream`. `seen_fc` tells whether a fully
/// connected layer came earlier in the stream.
pub(crate) fn check_layer(
    stream: StreamKind,
    layer: &LayerSpec,
    position: usize,
    seen_fc: bool,
) -> Result<()> {
    let illegal = |reason: String| Err(invalid_layer(stream, &layer.name, reason));
    let type_name = layer.kind.type_name();
    match (stream, &layer.kind) {
        (StreamKind::Image, LayerKind::Conv(_))
        | (StreamKind::Image, LayerKind::Residual(_))
        | (StreamKind::Image, LayerKind::SpatialTransformer(_))
            if seen_fc =>
        {
            return illegal(format!("{} layer cannot follow a fully connected layer", type_name));
        }
        (StreamKind::Image, LayerKind::Conv(_))
        | (StreamKind::Image, LayerKind::Residual(_))
        | (StreamKind::Image, LayerKind::SpatialTransformer(_))
        | (StreamKind::Image, LayerKind::Fc(_))
        | (StreamKind::Pose, LayerKind::Pc(_))
        | (StreamKind::Gripper, LayerKind::Gc(_)) => {}
        (s, LayerKind::FcMerge(_)) if s.is_merge() && position == 0 => {}
        (s, LayerKind::Fc(_)) if s.is_merge() && position > 0 => {}
        (s, _) if s.is_merge() && position == 0 => {
            return illegal(format!(
                "first layer of a merge stream must be fc_merge, got {}",
                type_name
            ));
        }
        (s, _) if s.is_merge() => {
            return illegal(format!(
                "only fc layers may follow the fc_merge of a merge stream, got {}",
                type_name
            ));
        }
        (s, _) => {
            return illegal(format!("{} layers are not allowed in {}", type_name, s));
        }
    }
    check_sizes(stream, layer)
}

fn check_sizes(stream: StreamKind, layer: &LayerSpec) -> Result<()> {
    let positive = match &layer.kind {
        LayerKind::Conv(p) => {
            p.filt_dim > 0 && p.num_filt > 0 && p.pool_size > 0 && p.pool_stride > 0
        }
        LayerKind::Fc(p) | LayerKind::Pc(p) | LayerKind::Gc(p) | LayerKind::FcMerge(p) => {
            p.out_size > 0
        }
        LayerKind::Residual(p) => p.filt_dim > 0 && p.num_filt > 0,
        LayerKind::SpatialTransformer(p) => p.out_size > 0,
    };
    if !positive {
        return Err(invalid_layer(
            stream,
            &layer.name,
            "size parameters must be positive",
        ));
    }
    Ok(())
}

/// Builds a single-input stream (image, pose or gripper) on top of `input`.
pub(crate) fn compose(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    spec: &StreamSpec,
    input: StreamOutput,
) -> Result<StreamOutput> {
    let mut out = input;
    let mut seen_fc = false;
    let mut first_residual = true;
    for (position, layer) in spec.iter().enumerate() {
        check_layer(stream, layer, position, seen_fc)?;
        let name = layer.name.as_str();
        out = match &layer.kind {
            LayerKind::SpatialTransformer(p) => {
                build_spatial_transformer(gb, stream, name, p, out)?
            }
            LayerKind::Conv(p) => build_conv(gb, stream, name, p, out)?,
            LayerKind::Residual(p) => build_residual(gb, stream, name, p, out, first_residual)?,
            LayerKind::Fc(p) => {
                build_dense(gb, stream, name, DenseKind::Fc, p.out_size, out, false)?
            }
            LayerKind::Pc(p) => {
                build_dense(gb, stream, name, DenseKind::Pc, p.out_size, out, false)?
            }
            LayerKind::Gc(p) => {
                build_dense(gb, stream, name, DenseKind::Gc, p.out_size, out, false)?
            }
            LayerKind::FcMerge(_) => {
                return Err(invalid_layer(stream, name, "fc_merge outside of a merge stream"))
            }
        };
        seen_fc |= matches!(layer.kind, LayerKind::Fc(_));
        first_residual = !matches!(layer.kind, LayerKind::Residual(_));
    }
    Ok(out)
}

/// Builds a merge stream joining `inputs`. Its last layer is terminal when it is an `fc`.
pub(crate) fn compose_merge(
    gb: &mut GraphBuilder,
    stream: StreamKind,
    spec: &StreamSpec,
    inputs: &[StreamOutput],
) -> Result<StreamOutput> {
    if spec.is_empty() {
        return Err(invalid_layer(stream, "", "merge stream must not be empty"));
    }
    let last = spec.len() - 1;
    let mut out: Option<StreamOutput> = None;
    for (position, layer) in spec.iter().enumerate() {
        check_layer(stream, layer, position, false)?;
        let name = layer.name.as_str();
        out = Some(match (&layer.kind, out) {
            (LayerKind::FcMerge(p), None) => build_merge(gb, stream, name, p.out_size, inputs)?,
            (LayerKind::Fc(p), Some(prev)) => build_dense(
                gb,
                stream,
                name,
                DenseKind::Fc,
                p.out_size,
                prev,
                position == last,
            )?,
            _ => return Err(invalid_layer(stream, name, "unexpected layer in merge stream")),
        });
    }
    out.ok_or_else(|| invalid_layer(stream, "", "merge stream must not be empty"))
}
