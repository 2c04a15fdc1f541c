use super::*;
use crate::layers::BilinearSampler;
use crate::network::build_network;
use crate::weights::WeightStore;
use ndarray::arr1;
use std::sync::Arc;

const CONFIG: &str = r#"{
    "batch_size": 4,
    "im_height": 16,
    "im_width": 16,
    "im_channels": 1,
    "input_pose_mode": "tf_image",
    "architecture": {
        "im_stream": {
            "conv1_1": {"type": "conv", "filt_dim": 3, "num_filt": 4, "pool_size": 2, "pool_stride": 2, "norm": 0},
            "conv1_2": {"type": "conv", "filt_dim": 3, "num_filt": 4, "pool_size": 1, "pool_stride": 1, "norm": 1},
            "fc3": {"type": "fc", "out_size": 8}
        },
        "pose_stream": {
            "pc1": {"type": "pc", "out_size": 4}
        },
        "merge_stream": {
            "fc4": {"type": "fc_merge", "out_size": 8},
            "fc5": {"type": "fc", "out_size": 2}
        }
    },
    "radius": 2,
    "alpha": 2e-5,
    "beta": 0.75,
    "bias": 1.0
}"#;

#[test]
fn mode_dimensions() {
    use InputPoseMode::*;
    let dims = [
        (TfImage, 1),
        (TfImagePerspective, 3),
        (RawImage, 4),
        (RawImagePerspective, 6),
        (TfImageSuction, 2),
    ];
    for &(mode, dim) in &dims {
        assert_eq!(mode.pose_dim(), dim, "{}", mode);
    }
    assert_eq!(InputGripperMode::Width.gripper_dim(), 1);
    assert_eq!(InputGripperMode::All.gripper_dim(), 4);
    assert_eq!(InputGripperMode::None.gripper_dim(), 0);
    assert_eq!(InputGripperMode::DepthMask.gripper_dim(), 0);
    assert_eq!(InputGripperMode::DepthMask.extra_channels(), 2);
}

#[test]
fn pose_data_is_sliced_by_mode() {
    let stored = arr1(&[10., 11., 12., 13., 14., 15., 16.]);
    assert_eq!(
        InputPoseMode::TfImagePerspective
            .parse_pose_data(stored.view())
            .unwrap(),
        arr1(&[12., 14., 15.])
    );
    assert_eq!(
        InputPoseMode::TfImageSuction.parse_pose_data(stored.view()).unwrap(),
        arr1(&[12., 13.])
    );
    // Already sliced statistics pass through
    let sliced = arr1(&[0.5]);
    assert_eq!(
        InputPoseMode::TfImage.parse_pose_data(sliced.view()).unwrap(),
        sliced
    );
    assert!(InputPoseMode::RawImagePerspective
        .parse_pose_data(arr1(&[1., 2., 3.]).view())
        .is_err());
}

#[test]
fn parses_layers_in_order() {
    let config = NetworkConfig::from_json(CONFIG, None).unwrap();
    let names = config
        .architecture()
        .im_stream
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["conv1_1", "conv1_2", "fc3"]);
    match config.architecture().im_stream.first().unwrap().kind {
        LayerKind::Conv(p) => assert!(!p.norm),
        other => panic!("unexpected layer {:?}", other),
    }
    assert_eq!(config.pose_dim(), 1);
    assert_eq!(config.gripper_dim(), 0);
    assert_eq!(config.num_channels(), 1);
    assert_eq!(config.input_gripper_mode(), InputGripperMode::None);
    assert!(!config.is_fully_conv());
}

#[test]
fn depth_mask_adds_channels() {
    let mut raw = GqcnnConfig::from_json(CONFIG).unwrap();
    raw.input_gripper_mode = InputGripperMode::DepthMask;
    let config = NetworkConfig::new(raw, None).unwrap();
    assert_eq!(config.num_channels(), 3);
    assert!(config.uses_gripper_depth_mask());
}

#[test]
fn unknown_pose_mode_is_config_error() {
    let json = CONFIG.replace("\"tf_image\"", "\"side_view\"");
    match NetworkConfig::from_json(&json, None) {
        Err(Error::Config(msg)) => assert!(msg.contains("side_view")),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn merge_stream_must_start_with_fc_merge() {
    let json = CONFIG.replace(r#""type": "fc_merge""#, r#""type": "fc""#);
    match NetworkConfig::from_json(&json, None) {
        Err(Error::InvalidArchitecture { stream, layer, .. }) => {
            assert_eq!(stream, "merge_stream");
            assert_eq!(layer, "fc4");
        }
        other => panic!("expected an architecture error, got {:?}", other),
    }
}

fn assert_names_layer<T: fmt::Debug>(result: Result<T>, stream_name: &str, layer_name: &str) {
    match result {
        Err(Error::InvalidArchitecture { stream, layer, reason }) => {
            assert_eq!(stream, stream_name);
            assert_eq!(layer, layer_name);
            assert!(reason.contains("not allowed"), "{}", reason);
        }
        other => panic!("expected an architecture error, got {:?}", other),
    }
}

/// Builds the network of an otherwise valid configuration into an empty store.
fn build_into_empty_store(config: &NetworkConfig) -> (Result<()>, WeightStore) {
    let mut store = WeightStore::new();
    let result = build_network(config, &mut store, Arc::new(BilinearSampler), false);
    (result.map(|_| ()), store)
}

#[test]
fn pose_layer_is_rejected_in_image_stream() {
    let json = CONFIG.replace(r#""fc3": {"type": "fc""#, r#""bad": {"type": "pc""#);
    assert_names_layer(NetworkConfig::from_json(&json, None), "im_stream", "bad");

    let mut config = NetworkConfig::from_json(CONFIG, None).unwrap();
    let pc = LayerKind::Pc(DenseParams { out_size: 8 });
    config.architecture.im_stream = StreamSpec::new(vec![LayerSpec::new("bad", pc)]);
    let (result, store) = build_into_empty_store(&config);
    assert_names_layer(result, "im_stream", "bad");
    assert!(store.is_empty());
}

#[test]
fn fc_layer_is_rejected_in_pose_stream() {
    let json = CONFIG.replace(r#""pc1": {"type": "pc""#, r#""pc1": {"type": "fc""#);
    assert_names_layer(NetworkConfig::from_json(&json, None), "pose_stream", "pc1");

    let mut config = NetworkConfig::from_json(CONFIG, None).unwrap();
    let fc = LayerKind::Fc(DenseParams { out_size: 4 });
    config.architecture.pose_stream = StreamSpec::new(vec![LayerSpec::new("pc1", fc)]);
    let (result, store) = build_into_empty_store(&config);
    assert_names_layer(result, "pose_stream", "pc1");
    assert!(store.is_empty());
}

#[test]
fn gripper_mode_requires_gripper_stream() {
    let json = CONFIG.replace(
        "\"input_pose_mode\": \"tf_image\",",
        "\"input_pose_mode\": \"tf_image\", \"input_gripper_mode\": \"width\",",
    );
    match NetworkConfig::from_json(&json, None) {
        Err(Error::Config(msg)) => assert!(msg.contains("gripper_stream")),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn fully_conv_size_must_cover_training_size() {
    let small = FullyConvConfig {
        im_height: 8,
        im_width: 32,
    };
    assert!(NetworkConfig::from_json(CONFIG, Some(small)).is_err());

    let large = FullyConvConfig {
        im_height: 24,
        im_width: 32,
    };
    let config = NetworkConfig::from_json(CONFIG, Some(large)).unwrap();
    assert_eq!(config.input_geometry().shape(), [24, 32, 1]);
    assert_eq!(config.train_geometry().shape(), [16, 16, 1]);
}

#[test]
fn duplicate_layer_names_are_rejected() {
    let json = CONFIG.replace(
        r#""fc5": {"type": "fc", "out_size": 2}"#,
        r#""fc5": {"type": "fc", "out_size": 2}, "fc4": {"type": "fc", "out_size": 2}"#,
    );
    match NetworkConfig::from_json(&json, None) {
        Err(Error::Config(msg)) => assert!(msg.contains("duplicate layer name")),
        other => panic!("expected a config error, got {:?}", other),
    }
}
