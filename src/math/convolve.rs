use crate::{Error, Result};
use ndarray::{s, Array2, Array4, ArrayView1, ArrayView4};

/// Zero padding scheme of a cross-correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingStyle {
    /// Output has the input's spatial size; the input is zero-padded by `(k - 1) / 2` on the
    /// leading side and the rest on the trailing side.
    Same,
    /// No padding; output side is `in - k + 1`.
    Valid,
}

impl PaddingStyle {
    /// Output extent and leading pad of one spatial axis at stride 1.
    fn extent(self, input: usize, kernel: usize) -> Result<(usize, usize)> {
        match self {
            PaddingStyle::Same => Ok((input, (kernel - 1) / 2)),
            PaddingStyle::Valid if kernel <= input => Ok((input + 1 - kernel, 0)),
            PaddingStyle::Valid => Err(Error::ShapeMismatch(format!(
                "kernel extent {} exceeds input extent {} in a valid correlation",
                kernel, input
            ))),
        }
    }
}

/// Stride-1 2D cross-correlation of an NHWC `input` with a `[kh, kw, in_c, out_c]` kernel,
/// plus an optional per-output-channel bias.
///
/// Patches are gathered into a matrix (im2col) so that the actual work is one matrix product.
pub fn conv2d(
    input: ArrayView4<f32>,
    kernel: ArrayView4<f32>,
    bias: Option<ArrayView1<f32>>,
    padding: PaddingStyle,
) -> Result<Array4<f32>> {
    let (batch, in_h, in_w, channels) = input.dim();
    let (kernel_h, kernel_w, kernel_c, out_c) = kernel.dim();
    if kernel_c != channels {
        return Err(Error::ShapeMismatch(format!(
            "kernel expects {} input channels, input has {}",
            kernel_c, channels
        )));
    }
    if let Some(bias) = bias {
        if bias.len() != out_c {
            return Err(Error::ShapeMismatch(format!(
                "bias has {} elements for {} output channels",
                bias.len(),
                out_c
            )));
        }
    }
    let (out_h, pad_top) = padding.extent(in_h, kernel_h)?;
    let (out_w, pad_left) = padding.extent(in_w, kernel_w)?;
    trace!(
        "conv2d: input {:?}, kernel {:?}, {:?} -> {}x{}x{}",
        input.shape(),
        kernel.shape(),
        padding,
        out_h,
        out_w,
        out_c
    );

    let patch_len = kernel_h * kernel_w * channels;
    let mut patches = Array2::<f32>::zeros((batch * out_h * out_w, patch_len));
    for n in 0..batch {
        for y in 0..out_h {
            for x in 0..out_w {
                let mut row = patches.row_mut((n * out_h + y) * out_w + x);
                for ky in 0..kernel_h {
                    let iy = (y + ky) as isize - pad_top as isize;
                    if iy < 0 || iy >= in_h as isize {
                        continue;
                    }
                    for kx in 0..kernel_w {
                        let ix = (x + kx) as isize - pad_left as isize;
                        if ix < 0 || ix >= in_w as isize {
                            continue;
                        }
                        let offset = (ky * kernel_w + kx) * channels;
                        row.slice_mut(s![offset..offset + channels])
                            .assign(&input.slice(s![n, iy as usize, ix as usize, ..]));
                    }
                }
            }
        }
    }

    let kernel_mtx = Array2::from_shape_vec((patch_len, out_c), kernel.iter().cloned().collect())?;
    let mut out = patches.dot(&kernel_mtx);
    if let Some(bias) = bias {
        out += &bias;
    }
    Ok(out.into_shape((batch, out_h, out_w, out_c))?)
}
