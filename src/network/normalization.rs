use crate::config::NetworkConfig;
use crate::util::read_npy_as_f32s;
use crate::{Error, Result};
use ndarray::Array1;
use std::path::Path;

/// The statistics inputs are standardized with, `(x - mean) / std`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationParams {
    im_mean: f32,
    im_std: f32,
    pose_mean: Array1<f32>,
    pose_std: Array1<f32>,
    gripper_mean: Array1<f32>,
    gripper_std: Array1<f32>,
    gripper_depth_mask_mean: Array1<f32>,
    gripper_depth_mask_std: Array1<f32>,
}

/// Number of extra image channels carrying the gripper depth mask.
const DEPTH_MASK_CHANNELS: usize = 2;

impl NormalizationParams {
    /// Statistics that leave every input unchanged.
    pub fn identity(pose_dim: usize, gripper_dim: usize) -> NormalizationParams {
        NormalizationParams {
            im_mean: 0.0,
            im_std: 1.0,
            pose_mean: Array1::zeros(pose_dim),
            pose_std: Array1::ones(pose_dim),
            gripper_mean: Array1::zeros(gripper_dim),
            gripper_std: Array1::ones(gripper_dim),
            gripper_depth_mask_mean: Array1::zeros(DEPTH_MASK_CHANNELS),
            gripper_depth_mask_std: Array1::ones(DEPTH_MASK_CHANNELS),
        }
    }

    pub fn for_config(config: &NetworkConfig) -> NormalizationParams {
        NormalizationParams::identity(config.pose_dim(), config.gripper_dim())
    }

    /// Reads the statistics saved next to a trained model. Stored pose and gripper
    /// statistics are sliced by the configured modes.
    pub fn load<P: AsRef<Path>>(
        model_dir: P,
        config: &NetworkConfig,
    ) -> Result<NormalizationParams> {
        let dir = model_dir.as_ref();
        info!("Reading normalization statistics from {}", dir.display());
        let mut params = NormalizationParams::for_config(config);
        params.im_mean = read_scalar(&dir.join("image_mean.npy"))?;
        params.im_std = read_scalar(&dir.join("image_std.npy"))?;

        let pose_mode = config.input_pose_mode();
        let pose_mean = read_vector(&dir.join("pose_mean.npy"))?;
        let pose_std = read_vector(&dir.join("pose_std.npy"))?;
        params.set_pose_mean(pose_mode.parse_pose_data(pose_mean.view())?)?;
        params.set_pose_std(pose_mode.parse_pose_data(pose_std.view())?)?;

        if config.gripper_dim() > 0 {
            let gripper_mode = config.input_gripper_mode();
            let gripper_mean = read_vector(&dir.join("gripper_mean.npy"))?;
            let gripper_std = read_vector(&dir.join("gripper_std.npy"))?;
            params.set_gripper_mean(gripper_mode.parse_gripper_data(gripper_mean.view())?)?;
            params.set_gripper_std(gripper_mode.parse_gripper_data(gripper_std.view())?)?;
        }
        debug!(
            "Normalization: image {} / {}, pose {} / {}",
            params.im_mean, params.im_std, params.pose_mean, params.pose_std
        );
        Ok(params)
    }

    pub fn im_mean(&self) -> f32 {
        self.im_mean
    }
    pub fn set_im_mean(&mut self, mean: f32) {
        self.im_mean = mean;
    }
    pub fn im_std(&self) -> f32 {
        self.im_std
    }
    pub fn set_im_std(&mut self, std: f32) {
        self.im_std = std;
    }
    pub fn pose_mean(&self) -> &Array1<f32> {
        &self.pose_mean
    }
    pub fn set_pose_mean(&mut self, mean: Array1<f32>) -> Result<()> {
        self.pose_mean = same_len("pose mean", &self.pose_mean, mean)?;
        Ok(())
    }
    pub fn pose_std(&self) -> &Array1<f32> {
        &self.pose_std
    }
    pub fn set_pose_std(&mut self, std: Array1<f32>) -> Result<()> {
        self.pose_std = same_len("pose std", &self.pose_std, std)?;
        Ok(())
    }
    pub fn gripper_mean(&self) -> &Array1<f32> {
        &self.gripper_mean
    }
    pub fn set_gripper_mean(&mut self, mean: Array1<f32>) -> Result<()> {
        self.gripper_mean = same_len("gripper mean", &self.gripper_mean, mean)?;
        Ok(())
    }
    pub fn gripper_std(&self) -> &Array1<f32> {
        &self.gripper_std
    }
    pub fn set_gripper_std(&mut self, std: Array1<f32>) -> Result<()> {
        self.gripper_std = same_len("gripper std", &self.gripper_std, std)?;
        Ok(())
    }
    pub fn gripper_depth_mask_mean(&self) -> &Array1<f32> {
        &self.gripper_depth_mask_mean
    }
    pub fn set_gripper_depth_mask_mean(&mut self, mean: Array1<f32>) -> Result<()> {
        self.gripper_depth_mask_mean =
            same_len("gripper depth mask mean", &self.gripper_depth_mask_mean, mean)?;
        Ok(())
    }
    pub fn gripper_depth_mask_std(&self) -> &Array1<f32> {
        &self.gripper_depth_mask_std
    }
    pub fn set_gripper_depth_mask_std(&mut self, std: Array1<f32>) -> Result<()> {
        self.gripper_depth_mask_std =
            same_len("gripper depth mask std", &self.gripper_depth_mask_std, std)?;
        Ok(())
    }
}

fn same_len(what: &str, current: &Array1<f32>, new: Array1<f32>) -> Result<Array1<f32>> {
    if new.len() != current.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} must have {} elements, got {}",
            what,
            current.len(),
            new.len()
        )));
    }
    Ok(new)
}

fn read_vector(path: &Path) -> Result<Array1<f32>> {
    Ok(read_npy_as_f32s(path)?.iter().cloned().collect())
}

fn read_scalar(path: &Path) -> Result<f32> {
    let arr = read_npy_as_f32s(path)?;
    match arr.iter().next() {
        Some(&value) if arr.len() == 1 => Ok(value),
        _ => Err(Error::ShapeMismatch(format!(
            "{} must hold a single value, got {}",
            path.display(),
            arr.len()
        ))),
    }
}
