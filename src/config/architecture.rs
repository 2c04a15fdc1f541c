use crate::network::streams::check_stream;
use crate::network::StreamKind;
use crate::Error;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::slice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub filt_dim: usize,
    pub num_filt: usize,
    pub pool_size: usize,
    pub pool_stride: usize,
    #[serde(deserialize_with = "bool_or_number")]
    pub norm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseParams {
    pub out_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualParams {
    pub filt_dim: usize,
    pub num_filt: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialTransformerParams {
    pub num_transform_params: usize,
    pub out_size: usize,
}

/// The type of a layer together with the parameters that type requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    Conv(ConvParams),
    /// Fully-connected
    Fc(DenseParams),
    /// Pose-connected
    Pc(DenseParams),
    /// Gripper-connected
    Gc(DenseParams),
    FcMerge(DenseParams),
    Residual(ResidualParams),
    SpatialTransformer(SpatialTransformerParams),
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Conv(_) => "conv",
            LayerKind::Fc(_) => "fc",
            LayerKind::Pc(_) => "pc",
            LayerKind::Gc(_) => "gc",
            LayerKind::FcMerge(_) => "fc_merge",
            LayerKind::Residual(_) => "residual",
            LayerKind::SpatialTransformer(_) => "spatial_transformer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
}

impl LayerSpec {
    pub fn new<S: Into<String>>(name: S, kind: LayerKind) -> LayerSpec {
        LayerSpec {
            name: name.into(),
            kind,
        }
    }
}

/// The layers of one stream in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSpec(Vec<LayerSpec>);

impl StreamSpec {
    pub fn new(layers: Vec<LayerSpec>) -> StreamSpec {
        StreamSpec(layers)
    }
    pub fn iter(&self) -> slice::Iter<LayerSpec> {
        self.0.iter()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn first(&self) -> Option<&LayerSpec> {
        self.0.first()
    }
}

impl<'a> IntoIterator for &'a StreamSpec {
    type Item = &'a LayerSpec;
    type IntoIter = slice::Iter<'a, LayerSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for StreamSpec {
    fn deserialize<D>(deserializer: D) -> Result<StreamSpec, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(StreamSpecVisitor)
    }
}

/// Reads a stream from a JSON object while keeping the key order, which is the layer order.
struct StreamSpecVisitor;

impl<'de> Visitor<'de> for StreamSpecVisitor {
    type Value = StreamSpec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from layer names to layer configurations")
    }

    fn visit_map<A>(self, mut map: A) -> Result<StreamSpec, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut layers: Vec<LayerSpec> = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, kind)) = map.next_entry::<String, LayerKind>()? {
            if layers.iter().any(|l| l.name == name) {
                return Err(de::Error::custom(format!("duplicate layer name '{}'", name)));
            }
            layers.push(LayerSpec { name, kind });
        }
        Ok(StreamSpec(layers))
    }
}

impl Serialize for StreamSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for layer in &self.0 {
            map.serialize_entry(&layer.name, &layer.kind)?;
        }
        map.end()
    }
}

/// Per-stream layer lists of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub im_stream: StreamSpec,
    pub pose_stream: StreamSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gripper_stream: Option<StreamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gripper_pose_merge_stream: Option<StreamSpec>,
    pub merge_stream: StreamSpec,
}

impl Architecture {
    /// Checks every stream against the layer legality rules before anything is built.
    pub fn validate(&self, gripper_dim: usize) -> crate::Result<()> {
        check_stream(StreamKind::Image, &self.im_stream)?;
        check_stream(StreamKind::Pose, &self.pose_stream)?;
        if gripper_dim > 0 && self.gripper_stream.is_none() {
            return Err(Error::Config(format!(
                "gripper input of dimension {} is configured without a gripper_stream",
                gripper_dim
            )));
        }
        if let Some(gripper_stream) = &self.gripper_stream {
            check_stream(StreamKind::Gripper, gripper_stream)?;
        }
        if let Some(merge_stream) = &self.gripper_pose_merge_stream {
            check_stream(StreamKind::GripperPoseMerge, merge_stream)?;
        }
        check_stream(StreamKind::Merge, &self.merge_stream)
    }
}

fn bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0.0,
    })
}
