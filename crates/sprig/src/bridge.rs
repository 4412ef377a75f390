// Quantization bridge: float layers back to deployable fixed-point tensors
//
//   q = ceil(x * 2^Q), saturated to [-128, 127]
//
// using the exponents of the original layer, so the runner's shifts for
// that stage stay valid. Weights dequantized from i8 and requantized
// untouched come back bit-identical.

use sprig_core::{FixedTensor, QFormat, Result};
use sprig_nn::{Connected, Conv2d};

use crate::model::FixedLayer;

/// Requantize a (reduced) convolution into `[N, C_in, k, k]` / `[N]`.
pub fn requantize_conv(conv: &Conv2d, weight_q: QFormat, bias_q: QFormat) -> Result<FixedLayer> {
    let n = conv.out_channels();
    let k = conv.window().kernel;
    let c_in = conv.in_dims().channels;
    let weight = FixedTensor::from_f32((n, c_in, k, k), weight_q, conv.weight().data())?;
    let bias = FixedTensor::from_f32(n, bias_q, conv.bias().data())?;
    FixedLayer::new(weight, bias)
}

/// Requantize a dense layer into `[out, in]` / `[out]`.
pub fn requantize_connected(
    layer: &Connected,
    weight_q: QFormat,
    bias_q: QFormat,
) -> Result<FixedLayer> {
    let out = layer.out_features();
    let weight = FixedTensor::from_f32((out, layer.in_features()), weight_q, layer.weight().data())?;
    let bias = FixedTensor::from_f32(out, bias_q, layer.bias().data())?;
    FixedLayer::new(weight, bias)
}
