// Quantized model: backbone geometry and fixed-point parameters
//
// TOPOLOGY (fixed):
//
//   image → [Conv → MaxPool → ReLU] x 3 → Dense → ReLU → Dense → Softmax
//
// Every stage is described by an `Architecture` entry; the weights live in
// `FixedLayer`s whose tensors carry their own exponents:
//
//   conv weight   [C_out, C_in, k, k]     conv bias   [C_out]
//   dense weight  [out, in]               dense bias  [out]
//
// The third convolution is the prune target. Its input is the output of
// stage 2 (after pooling and ReLU).
//
// SHIFTS:
//
//   The accumulator of a layer runs at exponent Q_in + Q_w. The bias is
//   shifted left by `bias_lshift` to meet it, and the sum is shifted right
//   by `out_rshift` to land on the output exponent `out_q`.

use serde::{Deserialize, Serialize};

use sprig_core::{Error, FixedTensor, QFormat, Result};
use sprig_kernels::{MapDims, Shifts, Window};

/// Number of convolution stages in the backbone.
pub const CONV_STAGES: usize = 3;

/// Index of the convolution whose filters are pruned.
pub const TARGET_CONV: usize = 2;

/// Exponent of the q7 softmax output.
pub const SOFTMAX_Q: QFormat = QFormat::new(7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShiftSpec {
    pub bias_lshift: u32,
    pub out_rshift: u32,
}

impl From<ShiftSpec> for Shifts {
    fn from(s: ShiftSpec) -> Self {
        Shifts::new(s.bias_lshift, s.out_rshift)
    }
}

/// Image geometry and exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub q: QFormat,
}

impl InputSpec {
    pub fn dims(&self) -> MapDims {
        MapDims::new(self.channels, self.height, self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub out_channels: usize,
    pub kernel: usize,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    pub shifts: ShiftSpec,
    /// Exponent of this layer's output map.
    pub out_q: QFormat,
}

impl ConvSpec {
    pub fn window(&self) -> Window {
        Window::new(self.kernel, self.stride, self.padding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub kernel: usize,
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
}

impl PoolSpec {
    pub fn window(&self) -> Window {
        Window::new(self.kernel, self.stride, self.padding)
    }
}

/// One Conv → MaxPool → ReLU stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvStage {
    pub conv: ConvSpec,
    pub pool: PoolSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseSpec {
    pub out_features: usize,
    pub shifts: ShiftSpec,
    pub out_q: QFormat,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub input: InputSpec,
    pub stages: [ConvStage; CONV_STAGES],
    pub dense: [DenseSpec; 2],
}

/// Map sizes after every stage, derived from an `Architecture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDims {
    pub input: MapDims,
    pub conv: [MapDims; CONV_STAGES],
    pub pool: [MapDims; CONV_STAGES],
    pub dense: [usize; 2],
}

impl StageDims {
    /// Input map of stage `i`.
    pub fn stage_input(&self, i: usize) -> MapDims {
        if i == 0 {
            self.input
        } else {
            self.pool[i - 1]
        }
    }

    /// Width of the first dense layer's input.
    pub fn flattened(&self) -> usize {
        self.pool[CONV_STAGES - 1].len()
    }
}

impl Architecture {
    pub fn stage_dims(&self) -> Result<StageDims> {
        let input = self.input.dims();
        if input.is_empty() {
            return Err(Error::EmptyDimension {
                layer: "input",
                what: "image",
            });
        }
        let mut conv = [input; CONV_STAGES];
        let mut pool = [input; CONV_STAGES];
        let mut current = input;
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.conv.out_channels == 0 {
                return Err(Error::EmptyDimension {
                    layer: "conv",
                    what: "filter count",
                });
            }
            conv[i] = current.after(&stage.conv.window(), stage.conv.out_channels)?;
            pool[i] = conv[i].after(&stage.pool.window(), conv[i].channels)?;
            current = pool[i];
        }
        for d in &self.dense {
            if d.out_features == 0 {
                return Err(Error::EmptyDimension {
                    layer: "dense",
                    what: "output width",
                });
            }
        }
        Ok(StageDims {
            input,
            conv,
            pool,
            dense: [self.dense[0].out_features, self.dense[1].out_features],
        })
    }

    /// Class count, the width of the last dense layer.
    pub fn classes(&self) -> usize {
        self.dense[1].out_features
    }

    pub fn target(&self) -> &ConvStage {
        &self.stages[TARGET_CONV]
    }
}

/// A fixed-point weight tensor and its bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedLayer {
    pub weight: FixedTensor<i8>,
    pub bias: FixedTensor<i8>,
}

impl FixedLayer {
    pub fn new(weight: FixedTensor<i8>, bias: FixedTensor<i8>) -> Result<Self> {
        let outputs = weight.outer_count();
        bias.expect_dims(&[outputs])?;
        Ok(FixedLayer { weight, bias })
    }

    /// Number of filters (conv) or output features (dense).
    pub fn outputs(&self) -> usize {
        self.weight.outer_count()
    }

    /// Weights per filter or per output feature.
    pub fn fan_in(&self) -> usize {
        self.weight.shape().inner_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedModel {
    pub arch: Architecture,
    pub conv: [FixedLayer; CONV_STAGES],
    pub dense: [FixedLayer; 2],
}

impl QuantizedModel {
    /// Check every tensor against the architecture and return the stage
    /// geometry. Nothing is allocated before this succeeds.
    pub fn validate(&self) -> Result<StageDims> {
        let dims = self.arch.stage_dims()?;
        for (i, stage) in self.arch.stages.iter().enumerate() {
            let k = stage.conv.kernel;
            let c_in = dims.stage_input(i).channels;
            let c_out = stage.conv.out_channels;
            self.conv[i].weight.expect_dims(&[c_out, c_in, k, k])?;
            self.conv[i].bias.expect_dims(&[c_out])?;
        }
        let widths = [dims.flattened(), dims.dense[0]];
        for (i, d) in self.arch.dense.iter().enumerate() {
            self.dense[i].weight.expect_dims(&[d.out_features, widths[i]])?;
            self.dense[i].bias.expect_dims(&[d.out_features])?;
        }
        Ok(dims)
    }

    pub fn classes(&self) -> usize {
        self.arch.classes()
    }

    /// The layer being pruned.
    pub fn target(&self) -> &FixedLayer {
        &self.conv[TARGET_CONV]
    }
}
