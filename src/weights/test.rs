use super::*;
use crate::network::StreamKind;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

fn key(layer: &str, role: WeightRole) -> WeightKey {
    WeightKey::new(StreamKind::Image, layer, role)
}

#[test]
fn short_names_pick_longest_suffix() {
    let k = WeightKey::from_short_name(StreamKind::Image, "conv1_1_weights").unwrap();
    assert_eq!(k, key("conv1_1", WeightRole::Weights));

    let k = WeightKey::from_short_name(StreamKind::Image, "res1_conv1_weights").unwrap();
    assert_eq!(k, key("res1", WeightRole::Conv1Weights));

    let k = WeightKey::from_short_name(StreamKind::Merge, "fc4_input_2_weights").unwrap();
    assert_eq!(k.role, WeightRole::InputWeights(2));
    assert_eq!(k.layer, "fc4");

    let k = WeightKey::from_short_name(StreamKind::Image, "res2_bn_hidden_moving_mean").unwrap();
    assert_eq!(
        k.role,
        WeightRole::BatchNorm(BnSlot::Hidden, BnParam::MovingMean)
    );

    let k = WeightKey::from_short_name(StreamKind::Image, "fc3_im_fully_conv_weights").unwrap();
    assert_eq!(k, key("fc3", WeightRole::ImFullyConvWeights));
}

#[test]
fn persisted_names_carry_the_stream() {
    let k = WeightKey::new(StreamKind::Pose, "pc1", WeightRole::Bias);
    assert_eq!(k.persisted_name(), "pose_stream/pc1/pc1_bias");
    assert_eq!(WeightKey::from_persisted_name(&k.persisted_name()).unwrap(), k);

    match WeightKey::from_persisted_name("nowhere/pc1/pc1_bias") {
        Err(Error::Checkpoint(_)) => {}
        other => panic!("expected a checkpoint error, got {:?}", other),
    }
    assert!(WeightKey::from_short_name(StreamKind::Pose, "pc1_gradient").is_err());
}

#[test]
fn get_or_create_reuses_existing() {
    let mut store = WeightStore::with_seed(7);
    let k = key("fc3", WeightRole::Weights);
    let first = store
        .get_or_create(k.clone(), &[4, 3], &Initializer::fan_in(4))
        .unwrap()
        .clone();
    let second = store
        .get_or_create(k.clone(), &[4, 3], &Initializer::Zeros)
        .unwrap()
        .clone();
    assert_eq!(first, second);
    assert_eq!(store.len(), 1);

    match store.get_or_create(k, &[3, 4], &Initializer::Zeros) {
        Err(Error::Config(_)) => {}
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn truncated_normal_stays_within_two_deviations() {
    let mut store = WeightStore::with_seed(1);
    let std = 0.5;
    let w = store
        .get_or_create(
            key("conv1_1", WeightRole::Weights),
            &[5, 5, 1, 64],
            &Initializer::TruncatedNormal { std },
        )
        .unwrap();
    assert!(w.iter().all(|v| v.abs() <= 2.0 * std));
    assert!(w.iter().any(|&v| v != 0.0));
}

#[test]
fn constant_initializer_checks_length() {
    let mut rng = StdRng::seed_from_u64(0);
    let init = Initializer::Constant(vec![0.5, 0.0, 0.0, 0.0, 0.5, 0.0]);
    let t = init.generate(&[6], &mut rng).unwrap();
    assert_eq!(t[[0]], 0.5);
    assert_eq!(t[[4]], 0.5);
    assert!(init.generate(&[5], &mut rng).is_err());
}

#[test]
fn uncommitted_transaction_leaves_store_untouched() {
    let mut store = WeightStore::with_seed(3);
    store.insert(key("a", WeightRole::Bias), Tensor::zeros(IxDyn(&[2])));
    {
        let mut tx = store.transaction();
        tx.get_or_create(key("b", WeightRole::Bias), &[2], &Initializer::Ones)
            .unwrap();
        assert!(tx.get(&key("b", WeightRole::Bias)).is_some());
        assert!(tx.get(&key("a", WeightRole::Bias)).is_some());
    }
    assert_eq!(store.len(), 1);

    let mut tx = store.transaction();
    tx.get_or_create(key("b", WeightRole::Bias), &[2], &Initializer::Ones)
        .unwrap();
    assert_eq!(tx.commit(), 1);
    assert_eq!(store.len(), 2);
    assert_eq!(store.view1(&key("b", WeightRole::Bias)).unwrap()[1], 1.0);
}

#[test]
fn reinitialize_replaces_values() {
    let mut store = WeightStore::with_seed(11);
    let spec = WeightSpec {
        key: key("fc3", WeightRole::Bias),
        shape: vec![3],
        init: Initializer::Ones,
    };
    store.insert(spec.key.clone(), Tensor::zeros(IxDyn(&[3])));
    store.reinitialize(&[spec.clone()]).unwrap();
    assert!(store.view1(&spec.key).unwrap().iter().all(|&v| v == 1.0));
}

#[test]
fn missing_weight_is_reported() {
    let store = WeightStore::with_seed(0);
    match store.view2(&key("fc3", WeightRole::Weights)) {
        Err(Error::MissingWeight(name)) => assert!(name.contains("fc3_weights")),
        other => panic!("expected a missing weight error, got {:?}", other),
    }
}

#[test]
fn checkpoint_codec_preserves_tensors() {
    let a = Tensor::from_shape_vec(IxDyn(&[2, 3]), vec![1., 2., 3., 4., 5., 6.]).unwrap();
    let b = Tensor::from_shape_vec(IxDyn(&[1]), vec![-0.25]).unwrap();
    let entries = vec![
        ("im_stream/conv1_1/conv1_1_weights".to_owned(), &a),
        ("merge_stream/fc5/fc5_bias".to_owned(), &b),
    ];
    let mut buf = Vec::new();
    write_checkpoint(&mut buf, &entries).unwrap();

    let read = read_checkpoint(&mut Cursor::new(buf)).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].0, entries[0].0);
    assert_eq!(read[0].1, a);
    assert_eq!(read[1].1, b);
}

fn header(count: u32) -> Vec<u8> {
    let mut buf = b"GQCK".to_vec();
    buf.write_u32::<LittleEndian>(1).unwrap();
    buf.write_u32::<LittleEndian>(count).unwrap();
    buf
}

fn assert_checkpoint_error(buf: Vec<u8>) {
    match read_checkpoint(&mut Cursor::new(buf)) {
        Err(Error::Checkpoint(_)) => {}
        other => panic!("expected a checkpoint error, got {:?}", other),
    }
}

#[test]
fn checkpoint_with_huge_entry_count_is_truncated() {
    assert_checkpoint_error(header(u32::MAX));
}

#[test]
fn checkpoint_with_huge_dimensions_is_truncated() {
    let mut buf = header(1);
    buf.write_u32::<LittleEndian>(1).unwrap();
    buf.extend_from_slice(b"a");
    buf.write_u32::<LittleEndian>(1).unwrap();
    buf.write_u64::<LittleEndian>(1 << 40).unwrap();
    buf.write_f32::<LittleEndian>(1.0).unwrap();
    assert_checkpoint_error(buf);

    let mut buf = header(1);
    buf.write_u32::<LittleEndian>(u32::MAX).unwrap();
    buf.extend_from_slice(b"abc");
    assert_checkpoint_error(buf);
}

#[test]
fn checkpoint_with_overflowing_shape_is_rejected() {
    let mut buf = header(1);
    buf.write_u32::<LittleEndian>(1).unwrap();
    buf.extend_from_slice(b"a");
    buf.write_u32::<LittleEndian>(2).unwrap();
    buf.write_u64::<LittleEndian>(u64::MAX).unwrap();
    buf.write_u64::<LittleEndian>(u64::MAX).unwrap();
    assert_checkpoint_error(buf);
}

#[test]
fn checkpoint_rejects_bad_magic() {
    let buf = b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00".to_vec();
    match read_checkpoint(&mut Cursor::new(buf)) {
        Err(Error::Checkpoint(_)) => {}
        other => panic!("expected a checkpoint error, got {:?}", other),
    }
}

#[test]
fn store_checkpoint_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.ckpt");

    let mut store = WeightStore::with_seed(5);
    store
        .get_or_create(key("conv1_1", WeightRole::Weights), &[3, 3, 1, 2], &Initializer::fan_in(9))
        .unwrap();
    store
        .get_or_create(
            WeightKey::new(StreamKind::Merge, "fc4", WeightRole::InputWeights(1)),
            &[8, 4],
            &Initializer::fan_in(8),
        )
        .unwrap();
    store.save_checkpoint(&path).unwrap();

    let mut loaded = WeightStore::with_seed(6);
    loaded.load_checkpoint(&path).unwrap();
    assert_eq!(loaded.len(), store.len());
    for (k, t) in store.iter() {
        assert_eq!(loaded.get(k), Some(t));
    }
}
