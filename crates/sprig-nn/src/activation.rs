// Activation: element-wise and row-wise nonlinearities
//
// ReLU:    y = max(0, x),  dx = dy * [x > 0]
// Softmax: y = exp(x - max) / Σ exp(x - max), row by row
//
// Softmax is only used as the last layer, paired with cross-entropy loss.
// The training driver hands it the combined gradient (probs - target), so
// its backward pass forwards dy untouched.

use std::any::Any;

use sprig_core::{Error, Matrix, Result};

use crate::layer::{expect_width, Layer, LayerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationFn {
    Relu,
    Softmax,
}

pub struct Activation {
    function: ActivationFn,
    width: usize,
    input: Option<Matrix>,
}

impl Activation {
    pub fn new(function: ActivationFn, width: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::EmptyDimension {
                layer: "activation",
                what: "width",
            });
        }
        Ok(Activation {
            function,
            width,
            input: None,
        })
    }

    pub fn relu(width: usize) -> Result<Self> {
        Self::new(ActivationFn::Relu, width)
    }

    pub fn softmax(width: usize) -> Result<Self> {
        Self::new(ActivationFn::Softmax, width)
    }

    pub fn function(&self) -> ActivationFn {
        self.function
    }
}

/// Numerically stable softmax of one row, in place.
pub fn softmax_row(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        row.iter_mut().for_each(|v| *v /= sum);
    }
}

impl Layer for Activation {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }

    fn input_len(&self) -> usize {
        self.width
    }

    fn output_len(&self) -> usize {
        self.width
    }

    fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        expect_width(x, self.width)?;
        let mut y = x.clone();
        match self.function {
            ActivationFn::Relu => {
                y.data_mut().iter_mut().for_each(|v| *v = v.max(0.0));
                self.input = Some(x.clone());
            }
            ActivationFn::Softmax => {
                for r in 0..y.rows() {
                    softmax_row(y.row_mut(r));
                }
            }
        }
        Ok(y)
    }

    fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        expect_width(dy, self.width)?;
        match self.function {
            ActivationFn::Relu => {
                let x = self
                    .input
                    .as_ref()
                    .ok_or_else(|| Error::msg("activation: backward before forward"))?;
                let mut dx = dy.clone();
                for (d, &xv) in dx.data_mut().iter_mut().zip(x.data()) {
                    if xv <= 0.0 {
                        *d = 0.0;
                    }
                }
                Ok(dx)
            }
            ActivationFn::Softmax => Ok(dy.clone()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &'static str {
        match self.function {
            ActivationFn::Relu => "relu",
            ActivationFn::Softmax => "softmax",
        }
    }
}
