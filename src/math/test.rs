use super::*;
use crate::config::LrnParams;
use crate::util::is_within_margin;
use ndarray::{arr1, arr2, Array1, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;

const MARGIN: f32 = 1e-5;

#[test]
fn leaky_relu_keeps_positives() {
    assert_eq!(leaky_relu(2f32, 0.1), 2.0);
    assert!((leaky_relu(-2f32, 0.1) + 0.2).abs() < MARGIN);
    assert_eq!(leaky_relu(0f64, 0.1), 0.0);
}

#[test]
fn softmax_rows_sum_to_one() {
    let logits = arr2(&[[1f32, 2., 3.], [1000., 1000., 1000.]]).into_dyn();
    let out = softmax(logits.view());
    for row in out.outer_iter() {
        assert!((row.sum() - 1.0).abs() < MARGIN);
    }
    assert!(out[[0, 2]] > out[[0, 1]]);
    assert!((out[[1, 0]] - 1.0 / 3.0).abs() < MARGIN);
}

#[test]
fn conv2d_same_matches_hand_computation() {
    // 3x3 single-channel input, 3x3 kernel of ones: each output sums its neighbourhood
    let input = Array4::from_shape_vec((1, 3, 3, 1), (1..=9).map(|v| v as f32).collect()).unwrap();
    let kernel = Array4::from_elem((3, 3, 1, 1), 1f32);
    let bias = arr1(&[0.5f32]);
    let out = conv2d(input.view(), kernel.view(), Some(bias.view()), PaddingStyle::Same).unwrap();
    assert_eq!(out.shape(), &[1, 3, 3, 1]);
    // Corner: 1 + 2 + 4 + 5
    assert_eq!(out[[0, 0, 0, 0]], 12.5);
    // Center: sum of all
    assert_eq!(out[[0, 1, 1, 0]], 45.5);
    // Bottom edge middle: 4 + 5 + 6 + 7 + 8 + 9
    assert_eq!(out[[0, 2, 1, 0]], 39.5);
}

#[test]
fn conv2d_valid_shrinks_output() {
    let input = Array4::from_elem((2, 5, 4, 3), 1f32);
    let kernel = Array4::from_elem((3, 2, 3, 4), 1f32);
    let out = conv2d(input.view(), kernel.view(), None, PaddingStyle::Valid).unwrap();
    assert_eq!(out.shape(), &[2, 3, 3, 4]);
    assert!(out.iter().all(|&v| v == 18.0));

    let too_big = Array4::from_elem((6, 1, 3, 1), 1f32);
    assert!(conv2d(input.view(), too_big.view(), None, PaddingStyle::Valid).is_err());
}

#[test]
fn conv2d_rejects_channel_mismatch() {
    let input = Array4::<f32>::zeros((1, 4, 4, 2));
    let kernel = Array4::<f32>::zeros((3, 3, 1, 8));
    assert!(conv2d(input.view(), kernel.view(), None, PaddingStyle::Same).is_err());
}

#[test]
fn max_pool_rounds_output_up() {
    let input = Array4::from_shape_vec((1, 3, 3, 1), (1..=9).map(|v| v as f32).collect()).unwrap();
    let out = max_pool(input.view(), 2, 2);
    assert_eq!(out.shape(), &[1, 2, 2, 1]);
    assert_eq!(out[[0, 0, 0, 0]], 5.0);
    assert_eq!(out[[0, 0, 1, 0]], 6.0);
    assert_eq!(out[[0, 1, 0, 0]], 8.0);
    assert_eq!(out[[0, 1, 1, 0]], 9.0);

    let negative = input.mapv(|v| -v);
    let out = max_pool(negative.view(), 3, 1);
    assert_eq!(out.shape(), &[1, 3, 3, 1]);
    assert_eq!(out[[0, 1, 1, 0]], -1.0);
}

#[test]
fn lrn_with_zero_radius() {
    let params = LrnParams {
        radius: 0,
        alpha: 1.0,
        beta: 0.5,
        bias: 1.0,
    };
    let input = Array4::from_shape_vec((1, 1, 1, 2), vec![3f32, 0.]).unwrap();
    let out = lrn(input.view(), &params);
    assert!(is_within_margin(
        out.as_slice().unwrap(),
        &[3.0 / 10f32.sqrt(), 0.0],
        MARGIN
    ));
}

#[test]
fn lrn_sums_neighbouring_channels() {
    let params = LrnParams {
        radius: 1,
        alpha: 1.0,
        beta: 1.0,
        bias: 0.0,
    };
    let input = Array4::from_shape_vec((1, 1, 1, 3), vec![1f32, 2., 3.]).unwrap();
    let out = lrn(input.view(), &params);
    assert!(is_within_margin(
        out.as_slice().unwrap(),
        &[1.0 / 5.0, 2.0 / 14.0, 3.0 / 13.0],
        MARGIN
    ));
}

#[test]
fn batch_norm_with_default_statistics_is_near_identity() {
    let input = Array4::from_shape_vec((1, 1, 2, 2), vec![1f32, -2., 3., 4.]).unwrap();
    let ones = Array1::from_elem(2, 1f32);
    let zeros = Array1::zeros(2);
    let out = batch_norm(
        input.view(),
        zeros.view(),
        ones.view(),
        zeros.view(),
        ones.view(),
        BATCH_NORM_EPSILON,
    );
    let expected = input.mapv(|v| v / (1.0 + BATCH_NORM_EPSILON).sqrt());
    assert!(is_within_margin(
        out.as_slice().unwrap(),
        expected.as_slice().unwrap(),
        MARGIN
    ));

    let mean = arr1(&[1f32, 0.]);
    let var = arr1(&[4f32, 1.]);
    let offset = arr1(&[0.5f32, 0.]);
    let scale = arr1(&[2f32, 1.]);
    let out = batch_norm(input.view(), mean.view(), var.view(), offset.view(), scale.view(), 0.0);
    // Channel 0: (3 - 1) / 2 * 2 + 0.5
    assert!((out[[0, 0, 1, 0]] - 2.5).abs() < MARGIN);
}

#[test]
fn dropout_at_zero_rate_is_identity() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut arr = Array4::from_elem((2, 2, 2, 2), 3f32);
    dropout(&mut arr, 0.0, &mut rng);
    assert!(arr.iter().all(|&v| v == 3.0));

    dropout(&mut arr, 0.5, &mut rng);
    assert!(arr.iter().all(|&v| v == 0.0 || v == 6.0));
}

#[test]
fn flatten_keeps_hwc_order() {
    let input = Array4::from_shape_vec((2, 1, 2, 2), (0..8).map(|v| v as f32).collect()).unwrap();
    let flat = flatten(input.view().into_dyn()).unwrap();
    assert_eq!(flat.shape(), &[2, 4]);
    assert_eq!(flat.row(1).to_vec(), vec![4., 5., 6., 7.]);

    let permuted = input.view().permuted_axes([0, 2, 1, 3]).into_dyn();
    let flat = flatten(permuted).unwrap();
    assert_eq!(flat.row(0).to_vec(), vec![0., 1., 2., 3.]);
    assert_eq!(flat.dim(), (2, 4));
}

#[test]
fn pack_repeats_rows_over_grid() {
    let rows = arr2(&[[1f32, 2.], [3., 4.]]);
    let packed = pack(rows.view(), 2, 3);
    assert_eq!(packed.shape(), &[2, 2, 3, 2]);
    assert_eq!(packed[[1, 1, 2, 0]], 3.0);
    assert_eq!(packed[[0, 0, 1, 1]], 2.0);
}

#[test]
fn affine_adds_bias_per_row() {
    let x = arr2(&[[1f32, 2.], [0., 1.]]);
    let w = arr2(&[[1f32], [1.]]);
    let b = arr1(&[0.5f32]);
    let out = affine(x.view(), w.view(), b.view());
    assert_eq!(out, arr2(&[[3.5f32], [1.5]]));
}
