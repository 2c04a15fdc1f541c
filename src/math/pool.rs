use ndarray::{s, Array4, ArrayView4};

/// Max-pooling with SAME padding: each output side is `ceil(in / stride)` and padded
/// positions never win.
pub fn max_pool(input: ArrayView4<f32>, size: usize, stride: usize) -> Array4<f32> {
    if size == 1 && stride == 1 {
        return input.to_owned();
    }
    let (batch, in_h, in_w, channels) = input.dim();
    let (out_h, pad_top) = same_extent(in_h, size, stride);
    let (out_w, pad_left) = same_extent(in_w, size, stride);

    let mut out = Array4::<f32>::zeros((batch, out_h, out_w, channels));
    for y in 0..out_h {
        let y0 = (y * stride) as isize - pad_top as isize;
        let (y_lo, y_hi) = (y0.max(0) as usize, ((y0 + size as isize) as usize).min(in_h));
        for x in 0..out_w {
            let x0 = (x * stride) as isize - pad_left as isize;
            let (x_lo, x_hi) = (x0.max(0) as usize, ((x0 + size as isize) as usize).min(in_w));
            let window = input.slice(s![.., y_lo..y_hi, x_lo..x_hi, ..]);
            for n in 0..batch {
                for c in 0..channels {
                    out[[n, y, x, c]] = window
                        .slice(s![n, .., .., c])
                        .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                }
            }
        }
    }
    out
}

/// Output extent and leading pad of one axis of a SAME-padded pooling.
fn same_extent(input: usize, size: usize, stride: usize) -> (usize, usize) {
    let out = (input + stride - 1) / stride;
    let pad_total = ((out - 1) * stride + size).saturating_sub(input);
    (out, pad_total / 2)
}
