// Layer trait: the interface every float layer implements
//
// Inputs and outputs are `Matrix` values with one example per row; a
// feature map row is laid out CHW. Unlike an autograd graph, each layer
// caches what it needs during `forward` and computes its own gradients in
// `backward`:
//
//   forward(x)    → y, caching x (or derived state)
//   backward(dy)  → dx, accumulating parameter gradients
//
// A frozen layer still propagates dx (layers before it may be trainable)
// but never accumulates gradients and is skipped by the optimizer, so its
// weights stay bit-identical across training.

use std::any::Any;

use sprig_core::{Matrix, Result};

use crate::optim::Param;

/// The layer variants a network may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Convolution,
    Pooling,
    Activation,
    BatchNorm,
    FullyConnected,
}

pub trait Layer: Send {
    fn kind(&self) -> LayerKind;

    /// Width of one input row.
    fn input_len(&self) -> usize;

    /// Width of one output row.
    fn output_len(&self) -> usize;

    /// Compute the output for a batch, caching state for `backward`.
    fn forward(&mut self, x: &Matrix) -> Result<Matrix>;

    /// Propagate `dy` to the input, accumulating parameter gradients
    /// unless the layer is frozen.
    fn backward(&mut self, dy: &Matrix) -> Result<Matrix>;

    /// Trainable tensors, weights first. Empty for parameter-free layers.
    fn params(&self) -> Vec<&Param> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }

    fn is_frozen(&self) -> bool {
        false
    }

    /// Freezing a parameter-free layer is a no-op.
    fn set_frozen(&mut self, _frozen: bool) {}

    /// Train or evaluation mode. Only batch normalization cares.
    fn set_training(&mut self, _training: bool) {}

    fn as_any(&self) -> &dyn Any;

    fn name(&self) -> &'static str;
}

/// Row-width check shared by every layer's forward and backward.
pub(crate) fn expect_width(x: &Matrix, expected: usize) -> Result<()> {
    if x.cols() != expected {
        return Err(sprig_core::Error::shape_mismatch(
            &[x.rows(), expected],
            &[x.rows(), x.cols()],
        ));
    }
    Ok(())
}
