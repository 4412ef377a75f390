// Runner: executes the fixed-point backbone over one image
//
// FULL MODE (`classify`):
//
//   Conv1 → Pool1 → Act1 → Conv2 → Pool2 → Act2 → Conv3 → Pool3 → Act3
//         → Dense1 → Act4 → Dense2 → Softmax → arg-max
//
// PRUNED MODE (`run_pruned`):
//
//   Conv1 → Pool1 → Act1 → Conv2 → Pool2 → Act2 → Conv3'
//
// where Conv3' uses an alternate (pruned) weight/bias pair with the same
// geometry and shifts as the original third convolution. The raw Conv3'
// output is returned; nothing after it runs.
//
// Every activation buffer is allocated once in `Runner::new` and reused for
// each image. Pooling and ReLU keep their input's exponent; ReLU runs in
// place on the pooled buffer. The buffers stay readable after a run through
// `activation` / `activations`.

use sprig_core::{Error, QFormat, Result};
use sprig_kernels::{
    argmax_q7, convolve_q7, fully_connected_q7, maxpool_q7, relu_q7, softmax_q7, MapDims,
};

use crate::model::{FixedLayer, QuantizedModel, StageDims, CONV_STAGES, SOFTMAX_Q, TARGET_CONV};

/// A named intermediate tensor of the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tap {
    /// Raw output of convolution `i`.
    Conv(usize),
    /// Output of stage `i` after pooling and ReLU.
    Pool(usize),
    /// Output of dense layer `i` (after ReLU for the first).
    Dense(usize),
    Softmax,
    /// Output of the last `run_pruned` call.
    Pruned,
}

/// Read-only view of a fixed-point activation.
#[derive(Debug, Clone, Copy)]
pub struct ActivationRef<'a> {
    pub data: &'a [i8],
    pub dims: MapDims,
    pub q: QFormat,
}

impl ActivationRef<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Dequantize by the activation's own exponent.
    pub fn dequantize_into(&self, out: &mut [f32]) {
        self.q.dequantize_into(self.data, out);
    }
}

fn buffer(len: usize) -> Result<Vec<i8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { elements: len })?;
    v.resize(len, 0);
    Ok(v)
}

pub struct Runner<'m> {
    model: &'m QuantizedModel,
    dims: StageDims,
    conv: [Vec<i8>; CONV_STAGES],
    pool: [Vec<i8>; CONV_STAGES],
    dense: [Vec<i8>; 2],
    probs: Vec<i8>,
    pruned: Vec<i8>,
    pruned_channels: usize,
}

impl<'m> Runner<'m> {
    /// Validate the model and allocate every activation buffer.
    pub fn new(model: &'m QuantizedModel) -> Result<Self> {
        let dims = model.validate()?;
        Ok(Runner {
            model,
            conv: [
                buffer(dims.conv[0].len())?,
                buffer(dims.conv[1].len())?,
                buffer(dims.conv[2].len())?,
            ],
            pool: [
                buffer(dims.pool[0].len())?,
                buffer(dims.pool[1].len())?,
                buffer(dims.pool[2].len())?,
            ],
            dense: [buffer(dims.dense[0])?, buffer(dims.dense[1])?],
            probs: buffer(dims.dense[1])?,
            pruned: buffer(dims.conv[TARGET_CONV].len())?,
            pruned_channels: 0,
            dims,
        })
    }

    pub fn model(&self) -> &'m QuantizedModel {
        self.model
    }

    pub fn dims(&self) -> &StageDims {
        &self.dims
    }

    /// Run the full network and return the predicted class.
    pub fn classify(&mut self, image: &[i8]) -> Result<usize> {
        self.backbone(image, CONV_STAGES)?;
        let model = self.model;
        let [d1, d2] = &model.dense;
        let [s1, s2] = &model.arch.dense;
        let [hidden, logits] = &mut self.dense;
        fully_connected_q7(
            &self.pool[CONV_STAGES - 1],
            d1.weight.data(),
            d1.bias.data(),
            s1.shifts.into(),
            hidden,
        )?;
        relu_q7(hidden);
        fully_connected_q7(
            hidden,
            d2.weight.data(),
            d2.bias.data(),
            s2.shifts.into(),
            logits,
        )?;
        softmax_q7(&self.dense[1], &mut self.probs)?;
        Ok(argmax_q7(&self.probs))
    }

    /// Run stages 1-2, then the target convolution with `pruned` weights.
    pub fn run_pruned(&mut self, image: &[i8], pruned: &FixedLayer) -> Result<ActivationRef<'_>> {
        let model = self.model;
        let stage = model.arch.target();
        let in_dims = self.dims.stage_input(TARGET_CONV);
        let k = stage.conv.kernel;
        let n = pruned.outputs();
        if n > stage.conv.out_channels {
            return Err(Error::KeepExceedsFilters {
                keep: n,
                filters: stage.conv.out_channels,
            });
        }
        pruned.weight.expect_dims(&[n, in_dims.channels, k, k])?;

        self.backbone(image, TARGET_CONV)?;
        let out_len = n * self.dims.conv[TARGET_CONV].plane();
        convolve_q7(
            &self.pool[TARGET_CONV - 1],
            in_dims,
            pruned.weight.data(),
            pruned.bias.data(),
            n,
            stage.conv.window(),
            stage.conv.shifts.into(),
            &mut self.pruned[..out_len],
        )?;
        self.pruned_channels = n;
        self.activation(Tap::Pruned)
            .ok_or_else(|| Error::msg("runner: pruned output unavailable"))
    }

    /// The first `stages` Conv → Pool → ReLU stages.
    fn backbone(&mut self, image: &[i8], stages: usize) -> Result<()> {
        let model = self.model;
        if image.len() != self.dims.input.len() {
            return Err(Error::ElementCountMismatch {
                shape: self.dims.input.shape(),
                expected: self.dims.input.len(),
                got: image.len(),
            });
        }
        for i in 0..stages {
            let stage = &model.arch.stages[i];
            let layer = &model.conv[i];
            let input: &[i8] = if i == 0 { image } else { &self.pool[i - 1] };
            convolve_q7(
                input,
                self.dims.stage_input(i),
                layer.weight.data(),
                layer.bias.data(),
                stage.conv.out_channels,
                stage.conv.window(),
                stage.conv.shifts.into(),
                &mut self.conv[i],
            )?;
            maxpool_q7(
                &self.conv[i],
                self.dims.conv[i],
                stage.pool.window(),
                &mut self.pool[i],
            )?;
            relu_q7(&mut self.pool[i]);
        }
        Ok(())
    }

    /// Exponent of a tap's tensor.
    pub fn exponent(&self, tap: Tap) -> Option<QFormat> {
        let arch = &self.model.arch;
        match tap {
            Tap::Conv(i) | Tap::Pool(i) => arch.stages.get(i).map(|s| s.conv.out_q),
            Tap::Dense(i) => arch.dense.get(i).map(|d| d.out_q),
            Tap::Softmax => Some(SOFTMAX_Q),
            Tap::Pruned => Some(arch.target().conv.out_q),
        }
    }

    /// The most recent value of a tap, `None` for an unknown stage index.
    pub fn activation(&self, tap: Tap) -> Option<ActivationRef<'_>> {
        let q = self.exponent(tap)?;
        let (data, dims): (&[i8], MapDims) = match tap {
            Tap::Conv(i) => (self.conv.get(i)?.as_slice(), self.dims.conv[i]),
            Tap::Pool(i) => (self.pool.get(i)?.as_slice(), self.dims.pool[i]),
            Tap::Dense(i) => {
                let d = self.dense.get(i)?;
                (d.as_slice(), MapDims::new(d.len(), 1, 1))
            }
            Tap::Softmax => (self.probs.as_slice(), MapDims::new(self.probs.len(), 1, 1)),
            Tap::Pruned => {
                let full = self.dims.conv[TARGET_CONV];
                let dims = MapDims::new(self.pruned_channels, full.height, full.width);
                (&self.pruned[..dims.len()], dims)
            }
        };
        Some(ActivationRef { data, dims, q })
    }

    /// Every full-mode tensor in execution order.
    pub fn activations(&self) -> Vec<(Tap, ActivationRef<'_>)> {
        let taps = (0..CONV_STAGES)
            .flat_map(|i| [Tap::Conv(i), Tap::Pool(i)])
            .chain([Tap::Dense(0), Tap::Dense(1), Tap::Softmax]);
        taps.filter_map(|t| self.activation(t).map(|a| (t, a)))
            .collect()
    }
}
