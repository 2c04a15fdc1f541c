
use super::*;
use crate::util::is_within_margin;
use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const RESULT_MARGIN: f32 = 0.00001f32;
pub const SEED: u64 = 0x6763_6e6e;

/// 16x16 depth images, two conv layers, image + pose merge.
pub const STANDARD_ARCH: &str = r#"{
    "im_stream": {
        "conv1_1": {"type": "conv", "filt_dim": 3, "num_filt": 4, "pool_size": 2, "pool_stride": 2, "norm": 0},
        "conv1_2": {"type": "conv", "filt_dim": 3, "num_filt": 4, "pool_size": 1, "pool_stride": 1, "norm": 1},
        "fc3": {"type": "fc", "out_size": 8}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 4}},
    "merge_stream": {
        "fc4": {"type": "fc_merge", "out_size": 8},
        "fc5": {"type": "fc", "out_size": 2}
    }
}"#;

/// Pointwise image stream, so that a fully convolutional network evaluated on a larger image
/// computes exactly the network evaluated on each crop.
pub const POINTWISE_ARCH: &str = r#"{
    "im_stream": {
        "conv1": {"type": "conv", "filt_dim": 1, "num_filt": 2, "pool_size": 1, "pool_stride": 1, "norm": 0},
        "fc2": {"type": "fc", "out_size": 4}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 4}},
    "merge_stream": {
        "fc3": {"type": "fc_merge", "out_size": 4},
        "fc4": {"type": "fc", "out_size": 2}
    }
}"#;

pub const GRIPPER_ARCH: &str = r#"{
    "im_stream": {
        "conv1": {"type": "conv", "filt_dim": 3, "num_filt": 2, "pool_size": 2, "pool_stride": 2, "norm": 0},
        "fc2": {"type": "fc", "out_size": 4}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 4}},
    "gripper_stream": {"gc1": {"type": "gc", "out_size": 2}},
    "merge_stream": {
        "fc3": {"type": "fc_merge", "out_size": 4},
        "fc4": {"type": "fc", "out_size": 2}
    }
}"#;

pub const PREMERGE_ARCH: &str = r#"{
    "im_stream": {
        "conv1": {"type": "conv", "filt_dim": 3, "num_filt": 2, "pool_size": 2, "pool_stride": 2, "norm": 0},
        "fc2": {"type": "fc", "out_size": 4}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 4}},
    "gripper_stream": {"gc1": {"type": "gc", "out_size": 2}},
    "gripper_pose_merge_stream": {"gpm1": {"type": "fc_merge", "out_size": 3}},
    "merge_stream": {
        "fc3": {"type": "fc_merge", "out_size": 4},
        "fc4": {"type": "fc", "out_size": 2}
    }
}"#;

pub const RESIDUAL_ARCH: &str = r#"{
    "im_stream": {
        "conv1": {"type": "conv", "filt_dim": 3, "num_filt": 4, "pool_size": 1, "pool_stride": 1, "norm": 0},
        "res1": {"type": "residual", "filt_dim": 3, "num_filt": 4},
        "res2": {"type": "residual", "filt_dim": 3, "num_filt": 4},
        "fc3": {"type": "fc", "out_size": 4}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 2}},
    "merge_stream": {
        "fc4": {"type": "fc_merge", "out_size": 4},
        "fc5": {"type": "fc", "out_size": 2}
    }
}"#;

pub const SPATIAL_TRANSFORMER_ARCH: &str = r#"{
    "im_stream": {
        "st1": {"type": "spatial_transformer", "num_transform_params": 6, "out_size": 6},
        "conv1": {"type": "conv", "filt_dim": 3, "num_filt": 2, "pool_size": 2, "pool_stride": 2, "norm": 0},
        "fc2": {"type": "fc", "out_size": 4}
    },
    "pose_stream": {"pc1": {"type": "pc", "out_size": 2}},
    "merge_stream": {
        "fc3": {"type": "fc_merge", "out_size": 4},
        "fc4": {"type": "fc", "out_size": 2}
    }
}"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A network configuration in the on-disk JSON layout.
pub fn config_json(
    batch_size: usize,
    im_size: usize,
    im_channels: usize,
    pose_mode: &str,
    gripper_mode: &str,
    architecture: &str,
) -> String {
    format!(
        r#"{{
    "batch_size": {},
    "im_height": {},
    "im_width": {},
    "im_channels": {},
    "input_pose_mode": "{}",
    "input_gripper_mode": "{}",
    "architecture": {},
    "radius": 2,
    "alpha": 2e-5,
    "beta": 0.75,
    "bias": 1.0
}}"#,
        batch_size, im_size, im_size, im_channels, pose_mode, gripper_mode, architecture
    )
}

pub fn standard_config(batch_size: usize) -> NetworkConfig {
    NetworkConfig::from_json(
        &config_json(batch_size, 16, 1, "tf_image", "none", STANDARD_ARCH),
        None,
    )
    .unwrap()
}

/// A built model with seeded weights.
pub fn built(config: NetworkConfig) -> Gqcnn {
    init_logging();
    let mut gqcnn = Gqcnn::with_weights(config, WeightStore::with_seed(SEED));
    gqcnn.initialize_network(false).unwrap();
    gqcnn
}

pub fn random_images(num: usize, size: usize, channels: usize, seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array4::from_shape_simple_fn((num, size, size, channels), || rng.gen_range(0.0..1.0))
}

pub fn random_rows(num: usize, dim: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((num, dim), || rng.gen_range(-1.0..1.0))
}

pub fn as_slice(arr: &Tensor) -> Vec<f32> {
    arr.iter().cloned().collect()
}

pub fn row_sums(arr: &Tensor) -> Array1<f32> {
    arr.sum_axis(ndarray::Axis(arr.ndim() - 1))
        .iter()
        .cloned()
        .collect()
}
