// q7 kernels: saturating fixed-point layer operations
//
// ARITHMETIC:
//
//   acc  = (bias << bias_lshift) + round
//   acc += Σ input * weight          (saturating i32 accumulation)
//   out  = sat_q7(acc >> out_rshift)
//
// where round = 1 << (out_rshift - 1) when out_rshift > 0, so the right
// shift rounds half up. Results outside [-128, 127] clamp; nothing wraps.
//
// LAYOUT:
//
//   activations      [C, H, W]
//   conv weights     [C_out, C_in, k, k]
//   dense weights    [out, in]
//
// Max-pooling and ReLU keep the input's exponent. Softmax produces a q7
// distribution using power-of-two exponentials: entries more than 8 below
// the maximum are treated as zero.

use sprig_core::{Error, Result, Shape};

use crate::geometry::{MapDims, Window};

/// Scale alignment for one layer: bias left shift, output right shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shifts {
    pub bias_lshift: u32,
    pub out_rshift: u32,
}

impl Shifts {
    pub fn new(bias_lshift: u32, out_rshift: u32) -> Self {
        Shifts {
            bias_lshift,
            out_rshift,
        }
    }

    fn initial(&self, bias: i8) -> i32 {
        let b = (bias as i64) << self.bias_lshift.min(32);
        let round = if self.out_rshift > 0 {
            1i64 << (self.out_rshift.min(32) - 1)
        } else {
            0
        };
        (b + round).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    fn finish(&self, acc: i32) -> i8 {
        (acc >> self.out_rshift.min(31)).clamp(i8::MIN as i32, i8::MAX as i32) as i8
    }
}

/// 2-D convolution over a CHW q7 map.
///
/// `output` must hold `out_channels * H_out * W_out` values.
#[allow(clippy::too_many_arguments)]
pub fn convolve_q7(
    input: &[i8],
    dims: MapDims,
    weight: &[i8],
    bias: &[i8],
    out_channels: usize,
    window: Window,
    shifts: Shifts,
    output: &mut [i8],
) -> Result<MapDims> {
    dims.expect_len(input.len())?;
    let out = dims.after(&window, out_channels)?;
    let k = window.kernel;
    let filter_len = dims.channels * k * k;
    if weight.len() != out_channels * filter_len {
        return Err(Error::ElementCountMismatch {
            shape: Shape::from((out_channels, dims.channels, k, k)),
            expected: out_channels * filter_len,
            got: weight.len(),
        });
    }
    if bias.len() != out_channels {
        return Err(Error::shape_mismatch(&[out_channels], &[bias.len()]));
    }
    out.expect_len(output.len())?;

    let plane = dims.plane();
    for oc in 0..out_channels {
        let filter = &weight[oc * filter_len..(oc + 1) * filter_len];
        for oy in 0..out.height {
            for ox in 0..out.width {
                let mut acc = shifts.initial(bias[oc]);
                for ic in 0..dims.channels {
                    let channel = &input[ic * plane..(ic + 1) * plane];
                    let taps = &filter[ic * k * k..(ic + 1) * k * k];
                    for ky in 0..k {
                        let iy = (oy * window.stride + ky) as isize - window.padding as isize;
                        if iy < 0 || iy >= dims.height as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = (ox * window.stride + kx) as isize - window.padding as isize;
                            if ix < 0 || ix >= dims.width as isize {
                                continue;
                            }
                            let x = channel[iy as usize * dims.width + ix as usize] as i32;
                            acc = acc.saturating_add(x * taps[ky * k + kx] as i32);
                        }
                    }
                }
                output[(oc * out.height + oy) * out.width + ox] = shifts.finish(acc);
            }
        }
    }
    Ok(out)
}

/// Max-pooling over each channel. Padded cells never win.
pub fn maxpool_q7(input: &[i8], dims: MapDims, window: Window, output: &mut [i8]) -> Result<MapDims> {
    dims.expect_len(input.len())?;
    let out = dims.after(&window, dims.channels)?;
    out.expect_len(output.len())?;

    let plane = dims.plane();
    for c in 0..dims.channels {
        let channel = &input[c * plane..(c + 1) * plane];
        for oy in 0..out.height {
            let y0 = (oy * window.stride) as isize - window.padding as isize;
            for ox in 0..out.width {
                let x0 = (ox * window.stride) as isize - window.padding as isize;
                let mut best = i8::MIN;
                for y in y0.max(0)..(y0 + window.kernel as isize).min(dims.height as isize) {
                    for x in x0.max(0)..(x0 + window.kernel as isize).min(dims.width as isize) {
                        best = best.max(channel[y as usize * dims.width + x as usize]);
                    }
                }
                output[(c * out.height + oy) * out.width + ox] = best;
            }
        }
    }
    Ok(out)
}

/// In-place ReLU.
pub fn relu_q7(data: &mut [i8]) {
    for v in data.iter_mut() {
        if *v < 0 {
            *v = 0;
        }
    }
}

/// Dense layer: `output[o] = sat(bias[o] << l + Σ input[i] * weight[o][i]) >> r`.
pub fn fully_connected_q7(
    input: &[i8],
    weight: &[i8],
    bias: &[i8],
    shifts: Shifts,
    output: &mut [i8],
) -> Result<()> {
    let out_features = output.len();
    let in_features = input.len();
    if weight.len() != out_features * in_features {
        return Err(Error::ElementCountMismatch {
            shape: Shape::from((out_features, in_features)),
            expected: out_features * in_features,
            got: weight.len(),
        });
    }
    if bias.len() != out_features {
        return Err(Error::shape_mismatch(&[out_features], &[bias.len()]));
    }
    for (o, out) in output.iter_mut().enumerate() {
        let row = &weight[o * in_features..(o + 1) * in_features];
        let mut acc = shifts.initial(bias[o]);
        for (&x, &w) in input.iter().zip(row) {
            acc = acc.saturating_add(x as i32 * w as i32);
        }
        *out = shifts.finish(acc);
    }
    Ok(())
}

/// Power-of-two softmax into a q7 probability-like distribution.
pub fn softmax_q7(input: &[i8], output: &mut [i8]) -> Result<()> {
    if input.len() != output.len() {
        return Err(Error::shape_mismatch(&[input.len()], &[output.len()]));
    }
    let Some(&max) = input.iter().max() else {
        return Ok(());
    };
    let base = max as i32 - 8;

    let sum: i32 = input
        .iter()
        .filter(|&&v| v as i32 > base)
        .map(|&v| 1i32 << (v as i32 - base).clamp(0, 30))
        .sum();
    let output_base = 0x10_0000 / sum.max(1);

    for (o, &v) in output.iter_mut().zip(input) {
        *o = if v as i32 > base {
            let shift = (13 + base - v as i32).clamp(0, 31);
            (output_base >> shift).min(i8::MAX as i32) as i8
        } else {
            0
        };
    }
    Ok(())
}

/// Index of the largest q7 value, lowest index on ties.
pub fn argmax_q7(values: &[i8]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conv() {
        // 1x1 kernel, weight 1, no shift: output == input
        let dims = MapDims::new(1, 2, 2);
        let input = [1i8, -2, 3, 4];
        let mut out = [0i8; 4];
        let o = convolve_q7(
            &input,
            dims,
            &[1],
            &[0],
            1,
            Window::new(1, 1, 0),
            Shifts::default(),
            &mut out,
        )
        .unwrap();
        assert_eq!(o, dims);
        assert_eq!(out, input);
    }

    #[test]
    fn test_conv_padding_and_shifts() {
        // 3x3 all-ones kernel on a 2x2 map of 4s with padding 1: each output
        // sees all four cells → 16, plus bias 1<<2 and rounding 1 → 21, >> 1 → 10.
        let dims = MapDims::new(1, 2, 2);
        let mut out = [0i8; 4];
        convolve_q7(
            &[4; 4],
            dims,
            &[1; 9],
            &[1],
            1,
            Window::new(3, 1, 1),
            Shifts::new(2, 1),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [10; 4]);
    }

    #[test]
    fn test_conv_saturates() {
        let dims = MapDims::new(2, 1, 1);
        let mut out = [0i8; 2];
        convolve_q7(
            &[127, 127],
            dims,
            &[127, 127, -128, -128],
            &[0, 0],
            2,
            Window::new(1, 1, 0),
            Shifts::default(),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [127, -128]);
    }

    #[test]
    fn test_conv_rejects_bad_weights() {
        let mut out = [0i8; 4];
        let err = convolve_q7(
            &[0; 4],
            MapDims::new(1, 2, 2),
            &[1, 2],
            &[0],
            1,
            Window::new(1, 1, 0),
            Shifts::default(),
            &mut out,
        );
        assert!(matches!(err, Err(Error::ElementCountMismatch { .. })));
    }

    #[test]
    fn test_maxpool() {
        let dims = MapDims::new(1, 4, 4);
        let input: Vec<i8> = (0..16).map(|v| v as i8 - 8).collect();
        let mut out = [0i8; 4];
        let o = maxpool_q7(&input, dims, Window::new(2, 2, 0), &mut out).unwrap();
        assert_eq!(o, MapDims::new(1, 2, 2));
        assert_eq!(out, [-3, -1, 5, 7]);
    }

    #[test]
    fn test_relu() {
        let mut v = [-5i8, 0, 7, -128];
        relu_q7(&mut v);
        assert_eq!(v, [0, 0, 7, 0]);
    }

    #[test]
    fn test_fully_connected() {
        let mut out = [0i8; 2];
        fully_connected_q7(
            &[1, 2, 3],
            &[1, 1, 1, 2, 0, -1],
            &[1, 0],
            Shifts::new(1, 0),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [8, -1]);
    }

    #[test]
    fn test_softmax_orders_like_input() {
        let input = [10i8, 14, 12];
        let mut out = [0i8; 3];
        softmax_q7(&input, &mut out).unwrap();
        assert!(out[1] > out[2] && out[2] > out[0]);
        assert_eq!(argmax_q7(&out), 1);
        assert!(out.iter().all(|&v| v >= 0));
    }

    #[test]
    fn test_softmax_drops_far_values() {
        let mut out = [0i8; 2];
        softmax_q7(&[100, 10], &mut out).unwrap();
        assert_eq!(out, [127, 0]);
    }

    #[test]
    fn test_argmax_ties() {
        assert_eq!(argmax_q7(&[3, 9, 9, 1]), 1);
        assert_eq!(argmax_q7(&[0, 0, 0]), 0);
    }
}
