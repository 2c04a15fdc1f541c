use super::graph::Feeds;
use super::NormalizationParams;
use crate::config::NetworkConfig;
use crate::{Result, Tensor};
use ndarray::{s, ArrayView2, ArrayView4, Ix2, Ix4, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Execution context of a model: fixed-size scratch buffers for one batch of normalized
/// inputs and the random state of dropout.
#[derive(Debug)]
pub(crate) struct Session {
    batch_size: usize,
    image: Tensor,
    pose: Tensor,
    gripper: Option<Tensor>,
    rng: StdRng,
}

impl Session {
    pub fn new(config: &NetworkConfig, batch_size: usize) -> Session {
        let [height, width, channels] = config.input_geometry().shape();
        debug!(
            "Opening session with scratch buffers for {} x {}x{}x{} images.",
            batch_size, height, width, channels
        );
        Session {
            batch_size,
            image: Tensor::zeros(IxDyn(&[batch_size, height, width, channels])),
            pose: Tensor::zeros(IxDyn(&[batch_size, config.pose_dim()])),
            gripper: if config.gripper_dim() > 0 {
                Some(Tensor::zeros(IxDyn(&[batch_size, config.gripper_dim()])))
            } else {
                None
            },
            rng: StdRng::from_entropy(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Normalizes one chunk of at most `batch_size` examples into the scratch buffers. Rows
    /// past the chunk are zeroed.
    pub fn load_chunk(
        &mut self,
        norm: &NormalizationParams,
        images: ArrayView4<f32>,
        poses: ArrayView2<f32>,
        grippers: Option<ArrayView2<f32>>,
        depth_mask: bool,
    ) -> Result<()> {
        let dim = images.dim().0;
        let mut image = self.image.view_mut().into_dimensionality::<Ix4>()?;
        image.fill(0.0);
        let mut head = image.slice_mut(s![..dim, .., .., ..]);
        head.assign(&images);
        let (im_mean, im_std) = (norm.im_mean(), norm.im_std());
        if depth_mask {
            // The last two channels carry the gripper depth mask with its own statistics
            let channels = head.dim().3;
            head.slice_mut(s![.., .., .., ..channels - 2])
                .mapv_inplace(|x| (x - im_mean) / im_std);
            for j in 0..2 {
                let (mean, std) = (
                    norm.gripper_depth_mask_mean()[j],
                    norm.gripper_depth_mask_std()[j],
                );
                head.slice_mut(s![.., .., .., channels - 2 + j])
                    .mapv_inplace(|x| (x - mean) / std);
            }
        } else {
            head.mapv_inplace(|x| (x - im_mean) / im_std);
        }

        let mut pose = self.pose.view_mut().into_dimensionality::<Ix2>()?;
        pose.fill(0.0);
        pose.slice_mut(s![..dim, ..])
            .assign(&((&poses - norm.pose_mean()) / norm.pose_std()));

        if let (Some(scratch), Some(grippers)) = (self.gripper.as_mut(), grippers) {
            let mut gripper = scratch.view_mut().into_dimensionality::<Ix2>()?;
            gripper.fill(0.0);
            gripper
                .slice_mut(s![..dim, ..])
                .assign(&((&grippers - norm.gripper_mean()) / norm.gripper_std()));
        }
        Ok(())
    }

    /// Splits the session into the batch feeds and the dropout state.
    pub fn feeds_and_rng(&mut self) -> (Feeds, &mut StdRng) {
        (
            Feeds {
                image: &self.image,
                pose: &self.pose,
                gripper: self.gripper.as_ref(),
            },
            &mut self.rng,
        )
    }
}
