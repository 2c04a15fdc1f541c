//! Network configuration as found in the `config.json` of a model directory.
mod architecture;
#[cfg(test)]
mod test;

pub use self::architecture::*;
use crate::geometry::ImageGeometry;
use crate::util::read_file;
use crate::{Error, Result};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which components of the stored grasp pose are fed to the pose stream.
///
/// The stored pose layout is: grasp center row, grasp center col, gripper depth, grasp theta,
/// crop center row, crop center col, grip width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputPoseMode {
    /// depth
    #[serde(rename = "tf_image")]
    TfImage,
    /// depth, cx, cy
    #[serde(rename = "tf_image_with_perspective")]
    TfImagePerspective,
    /// u, v, depth, theta
    #[serde(rename = "raw_image")]
    RawImage,
    /// u, v, depth, theta, cx, cy
    #[serde(rename = "raw_image_with_perspective")]
    RawImagePerspective,
    /// depth, theta
    #[serde(rename = "tf_image_suction")]
    TfImageSuction,
}

impl InputPoseMode {
    pub fn pose_dim(self) -> usize {
        self.indices().len()
    }
    /// Indices into the stored pose layout that this mode uses.
    fn indices(self) -> &'static [usize] {
        use self::InputPoseMode::*;
        match self {
            TfImage => &[2],
            TfImagePerspective => &[2, 4, 5],
            RawImage => &[0, 1, 2, 3],
            RawImagePerspective => &[0, 1, 2, 3, 4, 5],
            TfImageSuction => &[2, 3],
        }
    }
    /// Selects the components of a stored pose statistics vector used by this mode. A vector
    /// that already has `pose_dim` entries is taken as-is.
    pub fn parse_pose_data(self, data: ArrayView1<f32>) -> Result<Array1<f32>> {
        select(data, self.indices(), &format!("pose mode {}", self))
    }
}

impl fmt::Display for InputPoseMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::InputPoseMode::*;
        let s = match self {
            TfImage => "tf_image",
            TfImagePerspective => "tf_image_with_perspective",
            RawImage => "raw_image",
            RawImagePerspective => "raw_image_with_perspective",
            TfImageSuction => "tf_image_suction",
        };
        f.write_str(s)
    }
}

/// Which gripper parameters are fed to the network.
///
/// The stored gripper layout is: width, palm depth, fx, fy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputGripperMode {
    Width,
    None,
    All,
    /// Gripper depth planes are passed as two extra image channels
    DepthMask,
}

impl Default for InputGripperMode {
    fn default() -> Self {
        InputGripperMode::None
    }
}

impl InputGripperMode {
    pub fn gripper_dim(self) -> usize {
        self.indices().len()
    }
    /// The number of image channels this mode adds to the input image.
    pub fn extra_channels(self) -> usize {
        match self {
            InputGripperMode::DepthMask => 2,
            _ => 0,
        }
    }
    fn indices(self) -> &'static [usize] {
        use self::InputGripperMode::*;
        match self {
            Width => &[0],
            None | DepthMask => &[],
            All => &[0, 1, 2, 3],
        }
    }
    /// Selects the components of a stored gripper statistics vector used by this mode.
    pub fn parse_gripper_data(self, data: ArrayView1<f32>) -> Result<Array1<f32>> {
        select(data, self.indices(), &format!("gripper mode {}", self))
    }
}

impl fmt::Display for InputGripperMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::InputGripperMode::*;
        let s = match self {
            Width => "width",
            None => "none",
            All => "all",
            DepthMask => "depth_mask",
        };
        f.write_str(s)
    }
}

fn select(data: ArrayView1<f32>, indices: &[usize], what: &str) -> Result<Array1<f32>> {
    if data.len() == indices.len() {
        return Ok(data.to_owned());
    }
    match indices.iter().max() {
        Some(&max) if max >= data.len() => Err(Error::ShapeMismatch(format!(
            "{} needs {} stored components, but only {} are available",
            what,
            max + 1,
            data.len()
        ))),
        _ => Ok(indices.iter().map(|&i| data[i]).collect()),
    }
}

/// Whether the trained network is a classifier (softmax head) or a regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    Classification,
    Regression,
}

/// Local response normalization constants shared by every normalizing conv layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrnParams {
    pub radius: usize,
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
}

/// Overrides the inference image size of a network, turning its dense layers into
/// convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullyConvConfig {
    pub im_height: usize,
    pub im_width: usize,
}

/// The raw `gqcnn_config` section of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GqcnnConfig {
    pub batch_size: usize,
    pub im_height: usize,
    pub im_width: usize,
    pub im_channels: usize,
    pub input_pose_mode: InputPoseMode,
    #[serde(default)]
    pub input_gripper_mode: InputGripperMode,
    pub architecture: Architecture,
    pub radius: usize,
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
}

impl GqcnnConfig {
    pub fn from_json(json: &str) -> Result<GqcnnConfig> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

/// The top-level `config.json` of a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub gqcnn_config: GqcnnConfig,
    pub training_mode: TrainingMode,
}

impl ModelDescriptor {
    pub fn from_json(json: &str) -> Result<ModelDescriptor> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ModelDescriptor> {
        let path = path.as_ref();
        debug!("Reading model descriptor from {}.", path.display());
        ModelDescriptor::from_json(&read_file(path)?)
    }
}

/// Parsed and validated network configuration. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    batch_size: usize,
    train_im_height: usize,
    train_im_width: usize,
    im_height: usize,
    im_width: usize,
    num_channels: usize,
    pose_dim: usize,
    gripper_dim: usize,
    input_pose_mode: InputPoseMode,
    input_gripper_mode: InputGripperMode,
    architecture: Architecture,
    lrn: LrnParams,
    fully_conv: Option<FullyConvConfig>,
}

impl NetworkConfig {
    /// Derives the input dimensions from the pose and gripper modes and validates the
    /// architecture. Every error here is fatal.
    pub fn new(raw: GqcnnConfig, fully_conv: Option<FullyConvConfig>) -> Result<NetworkConfig> {
        if raw.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_owned()));
        }
        if raw.im_height == 0 || raw.im_width == 0 || raw.im_channels == 0 {
            return Err(Error::Config(format!(
                "image dimensions must be positive, got {}x{}x{}",
                raw.im_height, raw.im_width, raw.im_channels
            )));
        }
        let (im_height, im_width) = match fully_conv {
            Some(fc) => {
                if fc.im_height < raw.im_height || fc.im_width < raw.im_width {
                    return Err(Error::Config(format!(
                        "fully convolutional input {}x{} is smaller than the training input {}x{}",
                        fc.im_height, fc.im_width, raw.im_height, raw.im_width
                    )));
                }
                (fc.im_height, fc.im_width)
            }
            None => (raw.im_height, raw.im_width),
        };
        let pose_dim = raw.input_pose_mode.pose_dim();
        let gripper_dim = raw.input_gripper_mode.gripper_dim();
        let num_channels = raw.im_channels + raw.input_gripper_mode.extra_channels();

        raw.architecture.validate(gripper_dim)?;

        let config = NetworkConfig {
            batch_size: raw.batch_size,
            train_im_height: raw.im_height,
            train_im_width: raw.im_width,
            im_height,
            im_width,
            num_channels,
            pose_dim,
            gripper_dim,
            input_pose_mode: raw.input_pose_mode,
            input_gripper_mode: raw.input_gripper_mode,
            architecture: raw.architecture,
            lrn: LrnParams {
                radius: raw.radius,
                alpha: raw.alpha,
                beta: raw.beta,
                bias: raw.bias,
            },
            fully_conv,
        };
        debug!(
            "Parsed network config: input {}x{}x{}, pose dim {} ({}), gripper dim {} ({}), fully convolutional: {}.",
            config.im_height,
            config.im_width,
            config.num_channels,
            config.pose_dim,
            config.input_pose_mode,
            config.gripper_dim,
            config.input_gripper_mode,
            config.is_fully_conv()
        );
        Ok(config)
    }
    pub fn from_json(json: &str, fully_conv: Option<FullyConvConfig>) -> Result<NetworkConfig> {
        NetworkConfig::new(GqcnnConfig::from_json(json)?, fully_conv)
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
    pub fn im_height(&self) -> usize {
        self.im_height
    }
    pub fn im_width(&self) -> usize {
        self.im_width
    }
    pub fn train_im_height(&self) -> usize {
        self.train_im_height
    }
    pub fn train_im_width(&self) -> usize {
        self.train_im_width
    }
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
    pub fn pose_dim(&self) -> usize {
        self.pose_dim
    }
    pub fn gripper_dim(&self) -> usize {
        self.gripper_dim
    }
    pub fn input_pose_mode(&self) -> InputPoseMode {
        self.input_pose_mode
    }
    pub fn input_gripper_mode(&self) -> InputGripperMode {
        self.input_gripper_mode
    }
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }
    pub fn lrn(&self) -> LrnParams {
        self.lrn
    }
    pub fn fully_conv(&self) -> Option<FullyConvConfig> {
        self.fully_conv
    }
    pub fn is_fully_conv(&self) -> bool {
        self.fully_conv.is_some()
    }
    pub fn uses_gripper_depth_mask(&self) -> bool {
        self.input_gripper_mode == InputGripperMode::DepthMask
    }
    /// Geometry of the images fed at inference.
    pub fn input_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.im_height, self.im_width, self.num_channels)
    }
    /// Geometry of the images the network was trained on.
    pub fn train_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.train_im_height, self.train_im_width, self.num_channels)
    }
}
